//! Data access and storage
//!
//! API client for CollegeFootballData, polars table helpers and the CSV
//! primary store.

pub mod client;
pub mod frame;
pub mod store;

pub use client::CfbdClient;
pub use store::{FetchedBatch, PrimaryStore, Table, UpdateMode, UpdateSummary};
