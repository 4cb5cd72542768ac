//! Training driver
//!
//! Fits the linear spread regressor on `training.csv` with full-batch SGD on
//! mean squared error, reports held-out season metrics, and saves the model
//! under its name.

use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::nn::{Linear, LinearConfig};
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use std::path::Path;

use super::dataset::{apply_mapping, train_test_matrices, FeatureMatrix};
use super::metrics::{Metrics, TrainingHistory};
use crate::data::frame::read_csv;
use crate::data::store::{PrimaryStore, TRAINING_FILE};
use crate::model::regressor::{rows_to_tensor, ModelMeta, Normalization, SpreadRegressor};
use crate::model::Regressor;
use crate::{CfbError, FeatureConfig, Result, TrainingConfig};

/// Backend used for fitting; the fitted model runs on its inner backend
pub type TrainBackend = Autodiff<NdArray<f32>>;

/// Fitted model with its training record
pub struct TrainedModel<B: AutodiffBackend> {
    pub regressor: SpreadRegressor<B::InnerBackend>,
    pub history: TrainingHistory,
    pub train_metrics: Metrics,
    pub test_metrics: Option<Metrics>,
}

/// Single linear layer trained with SGD
pub struct SpreadTrainer<B: AutodiffBackend> {
    model: Linear<B>,
    optimizer: burn::optim::adaptor::OptimizerAdaptor<burn::optim::Sgd<B::InnerBackend>, Linear<B>, B>,
    learning_rate: f64,
    patience: usize,
    device: B::Device,
}

impl<B: AutodiffBackend> SpreadTrainer<B> {
    pub fn new(device: B::Device, input_dim: usize, learning_rate: f64) -> Self {
        let model = LinearConfig::new(input_dim, 1).init(&device);
        let optimizer = SgdConfig::new().init();

        SpreadTrainer {
            model,
            optimizer,
            learning_rate,
            patience: 0,
            device,
        }
    }

    /// Stop once the tracked loss has not improved for `patience` epochs
    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    /// Fit on `train`, tracking loss on `test` when it has rows
    pub fn fit(
        mut self,
        name: &str,
        target: &str,
        train: &FeatureMatrix,
        test: Option<&FeatureMatrix>,
        epochs: usize,
    ) -> Result<TrainedModel<B>> {
        if train.is_empty() {
            return Err(CfbError::Model("no training rows".to_string()));
        }
        let dim = train.dim();
        let test = test.filter(|t| !t.is_empty());

        let feature_norm = Normalization::fit(&train.rows, dim);
        let target_norm = Normalization::fit_column(&train.targets);
        log::debug!(
            "Feature normalization: mean={:?}, std={:?}",
            feature_norm.mean,
            feature_norm.std
        );

        let x_train = feature_norm.normalize(rows_to_tensor::<B>(&train.rows, dim, &self.device));
        let y_train = self.target_tensor(&target_norm.normalize_values(&train.targets));
        let test_tensors = test.map(|t| {
            (
                feature_norm.normalize(rows_to_tensor::<B>(&t.rows, dim, &self.device)),
                self.target_tensor(&target_norm.normalize_values(&t.targets)),
            )
        });

        let mut history = TrainingHistory::new();
        log::info!(
            "Training '{}' on {} rows x {} features for {} epochs",
            name,
            train.len(),
            dim,
            epochs
        );

        for epoch in 0..epochs {
            let output = self.model.forward(x_train.clone());
            let loss = (output - y_train.clone()).powf_scalar(2.0).mean();
            let loss_val: f32 = loss.clone().into_scalar().elem();

            let grads = loss.backward();
            let grads_params = GradientsParams::from_grads(grads, &self.model);
            self.model = self.optimizer.step(self.learning_rate, self.model, grads_params);

            let val_loss = test_tensors.as_ref().map(|(x, y)| {
                let model = self.model.valid();
                let loss = (model.forward(x.clone().inner()) - y.clone().inner())
                    .powf_scalar(2.0)
                    .mean();
                let v: f32 = loss.into_scalar().elem();
                f64::from(v)
            });
            history.record_epoch(epoch, f64::from(loss_val), val_loss);

            if epoch % 50 == 0 || epoch + 1 == epochs {
                match val_loss {
                    Some(v) => log::info!("Epoch {}/{}: loss={:.4}, val_loss={:.4}", epoch + 1, epochs, loss_val, v),
                    None => log::info!("Epoch {}/{}: loss={:.4}", epoch + 1, epochs, loss_val),
                }
            }

            if history.should_early_stop(self.patience) {
                log::info!(
                    "Early stopping at epoch {}: no improvement since epoch {}",
                    epoch + 1,
                    history.best_epoch + 1
                );
                break;
            }
        }

        let meta = ModelMeta {
            features: train.features.clone(),
            target: target.to_string(),
            feature_norm,
            target_norm,
            trained_at: chrono::Utc::now().to_rfc3339(),
        };
        let regressor = SpreadRegressor::new(name, self.model.valid(), meta, self.device.clone());

        let train_metrics = Metrics::from_predictions(&regressor.predict(&train.rows)?, &train.targets);
        let test_metrics = match test {
            Some(t) => Some(Metrics::from_predictions(&regressor.predict(&t.rows)?, &t.targets)),
            None => None,
        };

        Ok(TrainedModel {
            regressor,
            history,
            train_metrics,
            test_metrics,
        })
    }

    fn target_tensor(&self, values: &[f32]) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(values, &self.device).reshape([values.len(), 1])
    }
}

/// Read `training.csv`, fit, report, and save the model as `name`
pub fn train_model(
    store: &PrimaryStore,
    model_dir: &Path,
    features: &FeatureConfig,
    training: &TrainingConfig,
    name: &str,
) -> Result<TrainedModel<TrainBackend>> {
    let path = store.path(TRAINING_FILE);
    if !path.is_file() {
        return Err(CfbError::MissingTable(path));
    }
    let frame = apply_mapping(&read_csv(&path)?, &features.mapping)?;
    let (train, test) = train_test_matrices(
        &frame,
        &features.features,
        &features.target,
        training.test_season_start,
    )?;

    let device = Default::default();
    let trainer = SpreadTrainer::<TrainBackend>::new(device, train.dim(), training.learning_rate)
        .with_patience(training.early_stopping_patience);
    let trained = trainer.fit(name, &features.target, &train, Some(&test), training.epochs)?;

    log::info!("Train: {}", trained.train_metrics);
    match &trained.test_metrics {
        Some(m) => log::info!("Test (seasons >= {}): {}", training.test_season_start, m),
        None => log::warn!("No test rows from season {} onwards", training.test_season_start),
    }

    trained.regressor.save(model_dir)?;
    Ok(trained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::write_csv;
    use polars::prelude::df;

    fn line(xs: &[f32]) -> FeatureMatrix {
        FeatureMatrix {
            features: vec!["x".to_string()],
            rows: xs.iter().map(|x| vec![*x]).collect(),
            targets: xs.iter().map(|x| 2.0 * x + 1.0).collect(),
        }
    }

    #[test]
    fn test_fits_a_line() {
        let train = line(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let test = line(&[12.0, 15.0]);

        let trainer = SpreadTrainer::<TrainBackend>::new(Default::default(), 1, 0.1);
        let trained = trainer.fit("line", "y", &train, Some(&test), 300).unwrap();

        let preds = trained.regressor.predict(&[vec![5.0], vec![12.0]]).unwrap();
        assert!((preds[0] - 11.0).abs() < 0.05, "got {}", preds[0]);
        assert!((preds[1] - 25.0).abs() < 0.1, "got {}", preds[1]);
        assert!(trained.train_metrics.mae() < 0.05);
        assert!(trained.test_metrics.is_some());
        assert_eq!(trained.history.epochs(), 300);
    }

    #[test]
    fn test_stops_when_loss_stalls() {
        let train = line(&[0.0, 1.0, 2.0, 3.0]);

        // a zero step size never improves on the first epoch
        let trainer = SpreadTrainer::<TrainBackend>::new(Default::default(), 1, 0.0).with_patience(3);
        let trained = trainer.fit("flat", "y", &train, None, 100).unwrap();

        assert_eq!(trained.history.best_epoch, 0);
        assert_eq!(trained.history.epochs(), 4);
    }

    #[test]
    fn test_zero_patience_runs_every_epoch() {
        let train = line(&[0.0, 1.0, 2.0, 3.0]);
        let trainer = SpreadTrainer::<TrainBackend>::new(Default::default(), 1, 0.0);
        let trained = trainer.fit("flat", "y", &train, None, 20).unwrap();
        assert_eq!(trained.history.epochs(), 20);
    }

    #[test]
    fn test_empty_training_set() {
        let trainer = SpreadTrainer::<TrainBackend>::new(Default::default(), 1, 0.1);
        let empty = FeatureMatrix {
            features: vec!["x".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            trainer.fit("empty", "y", &empty, None, 10),
            Err(CfbError::Model(_))
        ));
    }

    #[test]
    fn test_train_model_saves_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = PrimaryStore::new(dir.path());

        let xs = [0.0f64, 1.0, 2.0, 3.0, 4.0];
        let frame = df!(
            "season" => &[2021i64, 2021, 2022, 2022, 2023],
            "x" => &xs,
            "spread_residual" => xs.iter().map(|x| 2.0 * x + 1.0).collect::<Vec<_>>(),
        )
        .unwrap();
        write_csv(&frame, store.path(TRAINING_FILE)).unwrap();

        let features = FeatureConfig {
            features: vec!["x".to_string()],
            target: "spread_residual".to_string(),
            mapping: Default::default(),
        };
        let training = TrainingConfig {
            epochs: 50,
            learning_rate: 0.1,
            test_season_start: 2023,
            early_stopping_patience: 0,
        };
        let model_dir = dir.path().join("model");
        let trained = train_model(&store, &model_dir, &features, &training, "linear").unwrap();

        assert_eq!(trained.test_metrics.map(|m| m.count), Some(1));
        assert!(SpreadRegressor::<NdArray<f32>>::exists(&model_dir, "linear"));
    }
}
