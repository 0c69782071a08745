//! Training observers
//!
//! A [`Watcher`] is notified at the start and end of a training run, after
//! every batch and every epoch, and when the trainer detects a numerical
//! problem. Every method has an empty default body.

use crate::params::WatcherKind;
use crate::trainer::{BatchStats, EpochStats};
use std::time::Instant;
use tracing::{info, warn};

pub trait Watcher: Send {
    fn training_begin(&mut self, _description: &str, _epochs: usize, _samples: usize) {}

    fn batch_end(&mut self, _epoch: usize, _batch: usize, _stats: &BatchStats) {}

    fn epoch_end(&mut self, _stats: &EpochStats) {}

    /// A non-finite reconstruction error was observed at `epoch`. `restored`
    /// tells whether the parameters were rolled back to the last backup.
    fn numerical_issue(&mut self, _epoch: usize, _error: f64, _restored: bool) {}

    fn training_end(&mut self, _final_error: f64) {}
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentWatcher;

impl Watcher for SilentWatcher {}

/// Logs the progress of the training through `tracing`.
#[derive(Debug, Default)]
pub struct DefaultRbmWatcher {
    start: Option<Instant>,
    epochs: usize,
}

impl DefaultRbmWatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Watcher for DefaultRbmWatcher {
    fn training_begin(&mut self, description: &str, epochs: usize, samples: usize) {
        self.start = Some(Instant::now());
        self.epochs = epochs;
        info!("Train {} for {} epochs on {} samples", description, epochs, samples);
    }

    fn epoch_end(&mut self, stats: &EpochStats) {
        match stats.free_energy {
            Some(free_energy) => info!(
                "Epoch {}/{} - Reconstruction error: {:.5} - Sparsity: {:.5} - Free energy: {:.3} - Time: {:.3}s",
                stats.epoch + 1,
                self.epochs,
                stats.reconstruction_error,
                stats.sparsity,
                free_energy,
                stats.seconds
            ),
            None => info!(
                "Epoch {}/{} - Reconstruction error: {:.5} - Sparsity: {:.5} - Time: {:.3}s",
                stats.epoch + 1,
                self.epochs,
                stats.reconstruction_error,
                stats.sparsity,
                stats.seconds
            ),
        }
    }

    fn numerical_issue(&mut self, epoch: usize, error: f64, restored: bool) {
        warn!(
            epoch = epoch + 1,
            error,
            restored,
            "non-finite reconstruction error, stopping training"
        );
    }

    fn training_end(&mut self, final_error: f64) {
        let seconds = self.start.map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0);
        info!("Training took {:.3}s, final reconstruction error: {:.5}", seconds, final_error);
    }
}

/// The watcher a configuration asks for.
pub fn watcher_for(kind: WatcherKind) -> Box<dyn Watcher> {
    match kind {
        WatcherKind::Default => Box::new(DefaultRbmWatcher::new()),
        WatcherKind::Silent => Box::new(SilentWatcher),
    }
}
