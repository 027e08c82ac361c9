// projeto: streamtrend
// file: src/neural/metrics.rs
// Per-epoch training metrics, progress events and early stopping

use crossbeam::channel::Sender;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::neural::utils::TrainingError;

/// One row of training history. Also the per-epoch progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 1-based.
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub early_stopping_counter: usize,
}

/// Receives one event per finished epoch. Implementations must not block.
pub trait ProgressObserver {
    fn on_epoch(&self, event: &ProgressEvent);
}

impl ProgressObserver for Sender<ProgressEvent> {
    fn on_epoch(&self, event: &ProgressEvent) {
        // fire-and-forget: a dropped receiver is not the trainer's problem
        let _ = self.try_send(event.clone());
    }
}

/// Writes every epoch to the log.
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_epoch(&self, e: &ProgressEvent) {
        info!("📈 Epoch {}: loss={:.4} acc={:.4} | val_loss={:.4} val_acc={:.4} | patience {}",
              e.epoch, e.loss, e.accuracy, e.val_loss, e.val_accuracy, e.early_stopping_counter);
    }
}

#[cfg(test)]
pub struct NoProgress;

#[cfg(test)]
impl ProgressObserver for NoProgress {
    fn on_epoch(&self, _event: &ProgressEvent) {}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<ProgressEvent>,
}

impl TrainingHistory {
    pub fn push(&mut self, event: ProgressEvent) {
        self.epochs.push(event);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn best(&self) -> Option<&ProgressEvent> {
        self.epochs.iter()
            .min_by(|a, b| a.val_loss.partial_cmp(&b.val_loss).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub fn print_summary(&self) {
        if self.is_empty() {
            info!("📈 No training epochs recorded");
            return;
        }
        if let Some(best) = self.best() {
            info!("📈 Training Summary:");
            info!("   ├── Epochs run: {}", self.len());
            info!("   ├── Best Epoch: {}", best.epoch);
            info!("   ├── Best Val Loss: {:.6}", best.val_loss);
            info!("   ├── Val Accuracy: {:.2}%", best.val_accuracy * 100.0);
            info!("   └── Train Accuracy: {:.2}%", best.accuracy * 100.0);
        }
    }

    pub fn save_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), TrainingError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for event in &self.epochs {
            writer.serialize(event)?;
        }
        writer.flush()?;
        info!("📊 Training history saved to: {}", path.display());
        Ok(())
    }
}

/// Patience-based early stopping that keeps a snapshot of the best state.
#[derive(Debug, Clone)]
pub struct EarlyStopping<T> {
    pub patience: usize,
    pub best_loss: f64,
    pub best_epoch: usize,
    pub counter: usize,
    best: Option<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    Improved,
    Continue,
    Stop,
}

impl<T: Clone> EarlyStopping<T> {
    pub fn new(patience: usize) -> Self {
        EarlyStopping {
            patience,
            best_loss: f64::INFINITY,
            best_epoch: 0,
            counter: 0,
            best: None,
        }
    }

    /// Records an epoch's validation loss. `snapshot` is only invoked when the
    /// loss strictly improves on the best seen so far.
    pub fn observe(&mut self, epoch: usize, val_loss: f64, snapshot: impl FnOnce() -> T) -> StopDecision {
        if val_loss < self.best_loss {
            self.best_loss = val_loss;
            self.best_epoch = epoch;
            self.counter = 0;
            self.best = Some(snapshot());
            StopDecision::Improved
        } else {
            self.counter += 1;
            if self.counter >= self.patience {
                StopDecision::Stop
            } else {
                StopDecision::Continue
            }
        }
    }

    #[cfg(test)]
    pub fn best(&self) -> Option<&T> {
        self.best.as_ref()
    }

    pub fn into_best(self) -> Option<T> {
        self.best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(epoch: usize, val_loss: f64) -> ProgressEvent {
        ProgressEvent {
            epoch,
            loss: 0.5,
            accuracy: 0.6,
            val_loss,
            val_accuracy: 0.55,
            early_stopping_counter: 0,
        }
    }

    #[test]
    fn test_strictly_decreasing_never_stops() {
        let mut stopper = EarlyStopping::new(2);
        for epoch in 1..=20 {
            let decision = stopper.observe(epoch, 1.0 / epoch as f64, || epoch);
            assert_eq!(decision, StopDecision::Improved);
        }
        assert_eq!(stopper.best(), Some(&20));
    }

    #[test]
    fn test_stops_after_patience_and_keeps_best_snapshot() {
        let mut stopper = EarlyStopping::new(3);
        let losses = [1.0, 0.8, 0.9, 0.8, 0.85];
        let mut stopped_at = None;
        for (i, &loss) in losses.iter().enumerate() {
            let epoch = i + 1;
            if stopper.observe(epoch, loss, || format!("marker-{}", epoch)) == StopDecision::Stop {
                stopped_at = Some(epoch);
                break;
            }
        }
        // a tie (0.8 at epoch 4) does not count as improvement
        assert_eq!(stopped_at, Some(5));
        assert_eq!(stopper.best_epoch, 2);
        assert_eq!(stopper.into_best(), Some("marker-2".to_string()));
    }

    #[test]
    fn test_channel_observer_is_fire_and_forget() {
        let (tx, rx) = crossbeam::channel::unbounded::<ProgressEvent>();
        tx.on_epoch(&event(1, 0.4));
        assert_eq!(rx.try_recv().unwrap().epoch, 1);
        drop(rx);
        tx.on_epoch(&event(2, 0.3));
    }

    #[test]
    fn test_history_best_and_csv() {
        let mut history = TrainingHistory::default();
        history.push(event(1, 0.7));
        history.push(event(2, 0.4));
        history.push(event(3, 0.5));
        assert_eq!(history.best().unwrap().epoch, 2);

        let path = std::env::temp_dir().join(format!("streamtrend-history-{}.csv", std::process::id()));
        history.save_to_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("epoch,loss,accuracy,val_loss,val_accuracy,early_stopping_counter"));
        assert_eq!(text.lines().count(), 4);
        let _ = std::fs::remove_file(path);
    }
}
