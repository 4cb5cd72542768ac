//! Training metrics and evaluation

use std::fmt;

/// Regression errors accumulated over predictions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    /// Sum of absolute errors
    pub abs_error_sum: f64,
    /// Sum of squared errors
    pub sq_error_sum: f64,
    /// Sum of signed errors (prediction - target)
    pub error_sum: f64,
    /// Total predictions
    pub count: usize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics of a full set of predictions against their targets
    pub fn from_predictions(predictions: &[f32], targets: &[f32]) -> Self {
        let mut metrics = Self::new();
        metrics.update(predictions, targets);
        metrics
    }

    /// Update with a batch of predictions
    pub fn update(&mut self, predictions: &[f32], targets: &[f32]) {
        for (p, t) in predictions.iter().zip(targets) {
            let err = f64::from(*p) - f64::from(*t);
            self.abs_error_sum += err.abs();
            self.sq_error_sum += err * err;
            self.error_sum += err;
            self.count += 1;
        }
    }

    /// Mean absolute error
    pub fn mae(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.abs_error_sum / self.count as f64
        }
    }

    pub fn mse(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sq_error_sum / self.count as f64
        }
    }

    pub fn rmse(&self) -> f64 {
        self.mse().sqrt()
    }

    /// Mean signed error; positive means over-predicting
    pub fn bias(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.error_sum / self.count as f64
        }
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE: {:.3} | RMSE: {:.3} | Bias: {:+.3} | n={}",
            self.mae(),
            self.rmse(),
            self.bias(),
            self.count
        )
    }
}

/// Training history for tracking progress
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
    pub best_val_loss: f64,
    pub best_epoch: usize,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self {
            best_val_loss: f64::INFINITY,
            ..Default::default()
        }
    }

    /// Record losses for an epoch; without a validation set the training loss
    /// decides the best epoch
    pub fn record_epoch(&mut self, epoch: usize, train_loss: f64, val_loss: Option<f64>) {
        self.train_losses.push(train_loss);
        let tracked = val_loss.unwrap_or(train_loss);
        if let Some(v) = val_loss {
            self.val_losses.push(v);
        }

        if tracked < self.best_val_loss {
            self.best_val_loss = tracked;
            self.best_epoch = epoch;
        }
    }

    pub fn epochs(&self) -> usize {
        self.train_losses.len()
    }

    /// True once `patience` epochs have passed without a new best; 0 never stops
    pub fn should_early_stop(&self, patience: usize) -> bool {
        if patience == 0 || self.epochs() < patience {
            return false;
        }
        let current_epoch = self.epochs() - 1;
        current_epoch - self.best_epoch >= patience
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = Metrics::from_predictions(&[1.0, 2.0, 5.0], &[1.0, 4.0, 4.0]);
        assert_eq!(metrics.count, 3);
        assert!((metrics.mae() - 1.0).abs() < 1e-9);
        assert!((metrics.rmse() - (5.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert!((metrics.bias() - (-1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = Metrics::new();
        assert_eq!(metrics.mae(), 0.0);
        assert_eq!(metrics.rmse(), 0.0);
    }

    #[test]
    fn test_history_best_epoch_and_early_stop() {
        let mut history = TrainingHistory::new();
        history.record_epoch(0, 1.0, Some(0.9));
        history.record_epoch(1, 0.8, Some(0.5));
        history.record_epoch(2, 0.7, Some(0.6));
        history.record_epoch(3, 0.6, Some(0.7));

        assert_eq!(history.best_epoch, 1);
        assert_eq!(history.best_val_loss, 0.5);
        assert!(history.should_early_stop(2));
        assert!(!history.should_early_stop(3));
    }

    #[test]
    fn test_history_without_validation() {
        let mut history = TrainingHistory::new();
        history.record_epoch(0, 2.0, None);
        history.record_epoch(1, 1.0, None);
        assert!(history.val_losses.is_empty());
        assert_eq!(history.best_epoch, 1);
    }
}
