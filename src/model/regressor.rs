//! Spread regressor
//!
//! A single linear layer over z-score normalised features, predicting a
//! normalised target. The weights go to `<name>.mpk` and the normalisation
//! plus feature order to `<name>_norm.json`, both under the model directory.

use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{CfbError, Result};

/// Anything that maps feature rows to predicted values
pub trait Regressor {
    /// Name the model was saved under
    fn name(&self) -> &str;

    /// Feature columns, in the order `predict` expects them
    fn features(&self) -> &[String];

    fn predict(&self, rows: &[Vec<f32>]) -> Result<Vec<f32>>;
}

/// Per-column z-score normalisation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Normalization {
    /// Mean and population std of each column; std is floored at 0.001
    pub fn fit(rows: &[Vec<f32>], dim: usize) -> Self {
        let mut sum = vec![0.0f64; dim];
        let mut sum_sq = vec![0.0f64; dim];
        for row in rows {
            for j in 0..dim {
                let v = f64::from(row[j]);
                sum[j] += v;
                sum_sq[j] += v * v;
            }
        }

        let n = rows.len().max(1) as f64;
        let mean: Vec<f64> = sum.iter().map(|s| s / n).collect();
        let std = sum_sq
            .iter()
            .zip(mean.iter())
            .map(|(sq, m)| ((sq / n - m * m).max(0.0).sqrt() as f32).max(0.001))
            .collect();

        Normalization {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            std,
        }
    }

    /// Normalisation of a single column
    pub fn fit_column(values: &[f32]) -> Self {
        let rows: Vec<Vec<f32>> = values.iter().map(|v| vec![*v]).collect();
        Self::fit(&rows, 1)
    }

    /// (x - mean) / std, broadcast over rows
    pub fn normalize<B: Backend>(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = x.device();
        let mean = Tensor::<B, 1>::from_floats(self.mean.as_slice(), &device).unsqueeze_dim(0);
        let std = Tensor::<B, 1>::from_floats(self.std.as_slice(), &device).unsqueeze_dim(0);
        (x - mean) / std
    }

    pub fn normalize_values(&self, values: &[f32]) -> Vec<f32> {
        values.iter().map(|v| (v - self.mean[0]) / self.std[0]).collect()
    }

    pub fn denormalize_values(&self, values: &[f32]) -> Vec<f32> {
        values.iter().map(|v| v * self.std[0] + self.mean[0]).collect()
    }
}

/// Everything besides the weights needed to score new rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub features: Vec<String>,
    pub target: String,
    pub feature_norm: Normalization,
    pub target_norm: Normalization,
    pub trained_at: String,
}

/// Build a `[rows, dim]` tensor from row-major feature values
pub fn rows_to_tensor<B: Backend>(rows: &[Vec<f32>], dim: usize, device: &B::Device) -> Tensor<B, 2> {
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([rows.len(), dim])
}

/// Saved linear model plus its normalisation
pub struct SpreadRegressor<B: Backend> {
    name: String,
    model: Linear<B>,
    meta: ModelMeta,
    device: B::Device,
}

impl<B: Backend> SpreadRegressor<B> {
    pub fn new(name: &str, model: Linear<B>, meta: ModelMeta, device: B::Device) -> Self {
        SpreadRegressor {
            name: name.to_string(),
            model,
            meta,
            device,
        }
    }

    fn weights_path(model_dir: &Path, name: &str) -> PathBuf {
        model_dir.join(name)
    }

    fn meta_path(model_dir: &Path, name: &str) -> PathBuf {
        model_dir.join(format!("{}_norm.json", name))
    }

    /// Whether a model of this name has been saved
    pub fn exists(model_dir: &Path, name: &str) -> bool {
        model_dir.join(format!("{}.mpk", name)).is_file()
            && Self::meta_path(model_dir, name).is_file()
    }
}

impl<B: Backend> SpreadRegressor<B>
where
    B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
    B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Write weights and normalisation under `model_dir`
    pub fn save(&self, model_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(model_dir)?;

        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        recorder
            .record(
                self.model.clone().into_record(),
                Self::weights_path(model_dir, &self.name),
            )
            .map_err(|e| CfbError::Io(std::io::Error::other(e.to_string())))?;

        let json = serde_json::to_string_pretty(&self.meta)?;
        std::fs::write(Self::meta_path(model_dir, &self.name), json)?;

        log::info!("Saved model '{}' to {}", self.name, model_dir.display());
        Ok(())
    }

    /// Load a model saved with [`save`](Self::save)
    pub fn load(device: &B::Device, model_dir: &Path, name: &str) -> Result<Self> {
        if !Self::exists(model_dir, name) {
            return Err(CfbError::NoModel(name.to_string()));
        }

        let json = std::fs::read_to_string(Self::meta_path(model_dir, name))?;
        let meta: ModelMeta = serde_json::from_str(&json)?;
        if meta.feature_norm.mean.len() != meta.features.len() {
            return Err(CfbError::Model(format!(
                "'{}' normalisation covers {} features but lists {}",
                name,
                meta.feature_norm.mean.len(),
                meta.features.len()
            )));
        }

        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let record = recorder
            .load(Self::weights_path(model_dir, name), device)
            .map_err(|e| CfbError::Io(std::io::Error::other(e.to_string())))?;
        let model = LinearConfig::new(meta.features.len(), 1)
            .init(device)
            .load_record(record);

        log::info!("Loaded model '{}' ({} features)", name, meta.features.len());
        Ok(SpreadRegressor::new(name, model, meta, device.clone()))
    }
}

impl<B: Backend> Regressor for SpreadRegressor<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn features(&self) -> &[String] {
        &self.meta.features
    }

    fn predict(&self, rows: &[Vec<f32>]) -> Result<Vec<f32>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let dim = self.meta.features.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != dim) {
            return Err(CfbError::Schema(format!(
                "expected {} features per row, got {}",
                dim,
                bad.len()
            )));
        }

        let x = self.meta.feature_norm.normalize(rows_to_tensor::<B>(rows, dim, &self.device));
        let output = self.model.forward(x);
        let values = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| CfbError::Model(format!("{:?}", e)))?;

        Ok(self.meta.target_norm.denormalize_values(&values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn meta(features: &[&str]) -> ModelMeta {
        let dim = features.len();
        ModelMeta {
            features: features.iter().map(|f| f.to_string()).collect(),
            target: "spread_residual".to_string(),
            feature_norm: Normalization {
                mean: vec![0.0; dim],
                std: vec![1.0; dim],
            },
            target_norm: Normalization {
                mean: vec![0.0],
                std: vec![1.0],
            },
            trained_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_normalization_fit() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let norm = Normalization::fit(&rows, 2);
        assert_eq!(norm.mean, vec![2.0, 5.0]);
        assert!((norm.std[0] - 1.0).abs() < 1e-6);
        // constant column is floored, not zero
        assert!((norm.std[1] - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_target_normalization_roundtrip() {
        let norm = Normalization::fit_column(&[2.0, 4.0, 6.0]);
        let scaled = norm.normalize_values(&[4.0, 6.0]);
        assert!(scaled[0].abs() < 1e-6);
        let back = norm.denormalize_values(&scaled);
        assert!((back[1] - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_predict_shape_and_width_check() {
        let device = Default::default();
        let model = LinearConfig::new(2, 1).init::<TestBackend>(&device);
        let regressor = SpreadRegressor::new("test", model, meta(&["a", "b"]), device);

        let preds = regressor.predict(&[vec![0.5, 1.0], vec![1.0, -1.0], vec![0.0, 0.0]]).unwrap();
        assert_eq!(preds.len(), 3);
        assert!(regressor.predict(&[]).unwrap().is_empty());
        assert!(matches!(
            regressor.predict(&[vec![1.0]]),
            Err(CfbError::Schema(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = LinearConfig::new(2, 1).init::<TestBackend>(&device);
        let regressor = SpreadRegressor::new("linear", model, meta(&["a", "b"]), device.clone());
        regressor.save(dir.path()).unwrap();

        assert!(SpreadRegressor::<TestBackend>::exists(dir.path(), "linear"));
        let loaded = SpreadRegressor::<TestBackend>::load(&device, dir.path(), "linear").unwrap();
        assert_eq!(loaded.features(), regressor.features());

        let rows = vec![vec![0.25, -2.0]];
        let a = regressor.predict(&rows).unwrap();
        let b = loaded.predict(&rows).unwrap();
        assert!((a[0] - b[0]).abs() < 1e-6);
    }

    #[test]
    fn test_load_unknown_model() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let err = SpreadRegressor::<TestBackend>::load(&device, dir.path(), "missing").err();
        assert!(matches!(err, Some(CfbError::NoModel(_))));
    }
}
