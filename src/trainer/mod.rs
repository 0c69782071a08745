//! Contrastive divergence training
//!
//! [`CdTrainer`] pretrains one RBM layer with CD-k or PCD-k, as selected by
//! the layer configuration. Each batch runs the [`CdBatch`] state machine,
//! then the gradients go through the configured penalties (sparsity, weight
//! decay, clipping) and the momentum update
//!
//! ```text
//! inc = momentum · inc + learning_rate · grad
//! w  += inc
//! ```
//!
//! Hyperparameters that are not part of the layer descriptor live in
//! [`TrainingParams`], which can be loaded from JSON.

pub mod watcher;

use crate::config::RbmConfig;
use crate::layers::{CdBatch, RbmGradients, RbmLayer};
use crate::params::{BiasMode, DecayType, SparsityMethod};
use crate::utils::{SimpleRng, Weight};
use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::time::Instant;
use tracing::debug;

pub use watcher::{watcher_for, DefaultRbmWatcher, SilentWatcher, Watcher};

/// Hyperparameters of a training run.
///
/// Every field is optional in JSON and falls back to the value of
/// [`TrainingParams::default`].
///
/// # Example
///
/// ```json
/// {
///   "learning_rate": 0.05,
///   "final_momentum": 0.9,
///   "sparsity_target": 0.05
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    pub learning_rate: f64,
    /// Momentum of the first `final_momentum_epoch` epochs.
    pub initial_momentum: f64,
    pub final_momentum: f64,
    pub final_momentum_epoch: usize,
    /// Weight decay factor for L1 and L2 decay.
    pub weight_cost: f64,
    /// Target mean activation of the hidden units.
    pub sparsity_target: f64,
    pub sparsity_cost: f64,
    /// Decay of the running mean used by local and global targets.
    pub sparsity_decay: f64,
    /// Maximum L2 norm of each gradient tensor when clipping is enabled.
    pub gradient_clip: f64,
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            initial_momentum: 0.5,
            final_momentum: 0.9,
            final_momentum_epoch: 6,
            weight_cost: 0.0002,
            sparsity_target: 0.01,
            sparsity_cost: 1.0,
            sparsity_decay: 0.9,
            gradient_clip: 5.0,
            seed: 42,
        }
    }
}

/// Loads training hyperparameters from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use rust_rbm::trainer::load_training_params;
///
/// let params = load_training_params("config/training.json").unwrap();
/// assert!(params.learning_rate > 0.0);
/// ```
pub fn load_training_params(path: &str) -> Result<TrainingParams, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    let params: TrainingParams = serde_json::from_str(&contents)?;
    validate_training_params(&params)?;
    Ok(params)
}

fn validate_training_params(params: &TrainingParams) -> Result<(), Box<dyn Error>> {
    let checks = [
        ("learning_rate", params.learning_rate),
        ("weight_cost", params.weight_cost),
        ("sparsity_cost", params.sparsity_cost),
        ("gradient_clip", params.gradient_clip),
    ];
    for (name, value) in checks {
        if !(value >= 0.0) {
            return Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} must be non-negative", name),
            )));
        }
    }

    if !(0.0..=1.0).contains(&params.sparsity_decay) {
        return Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "sparsity_decay must be in [0, 1]",
        )));
    }

    Ok(())
}

/// Statistics of one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchStats {
    pub rows: usize,
    /// Mean squared error between the input and its reconstruction.
    pub reconstruction_error: f64,
    /// Mean hidden activation probability.
    pub sparsity: f64,
}

/// Statistics of one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub reconstruction_error: f64,
    pub sparsity: f64,
    /// Mean free energy of the training set, when the layer asks for it.
    pub free_energy: Option<f64>,
    pub seconds: f64,
}

/// CD-k / PCD-k trainer for one layer.
pub struct CdTrainer<W: Weight> {
    config: RbmConfig,
    params: TrainingParams,
    batch: CdBatch<W>,
    grads: RbmGradients<W>,
    incs: RbmGradients<W>,
    /// Running mean activation per hidden bias (local target).
    q_local: Vec<f64>,
    /// Running mean activation of the whole layer (global target).
    q_global: f64,
    group_size: usize,
    epoch: usize,
    rng: SimpleRng,
    watcher: Box<dyn Watcher>,
    history: Vec<EpochStats>,
}

impl<W: Weight> CdTrainer<W> {
    pub fn new<L: RbmLayer<Weight = W>>(layer: &L, params: TrainingParams) -> Self {
        let config = layer.config().clone();
        let batch = CdBatch::new(layer, config.batch_size(), config.trainer());
        let grads = RbmGradients::zeros_like(layer);
        let incs = RbmGradients::zeros_like(layer);
        let nb = grads.b.len();

        Self {
            watcher: watcher_for(config.watcher()),
            rng: SimpleRng::new(params.seed),
            q_local: vec![params.sparsity_target; nb],
            q_global: params.sparsity_target,
            group_size: layer.hidden_group_size(),
            epoch: 0,
            history: Vec::new(),
            config,
            params,
            batch,
            grads,
            incs,
        }
    }

    /// Replace the watcher chosen by the configuration.
    pub fn with_watcher(mut self, watcher: Box<dyn Watcher>) -> Self {
        self.watcher = watcher;
        self
    }

    /// Statistics of every finished epoch of the last run.
    pub fn history(&self) -> &[EpochStats] {
        &self.history
    }

    /// Current weight increments (the last applied update).
    pub fn increments(&self) -> &RbmGradients<W> {
        &self.incs
    }

    fn momentum(&self) -> f64 {
        if !self.config.flags().momentum {
            0.0
        } else if self.epoch < self.params.final_momentum_epoch {
            self.params.initial_momentum
        } else {
            self.params.final_momentum
        }
    }

    /// Train on one batch of `rows × input_size` values and update the layer.
    pub fn train_batch<L: RbmLayer<Weight = W>>(&mut self, layer: &mut L, input: &[W]) -> BatchStats {
        self.batch.run(&*layer, input, &mut self.rng, &mut self.grads);

        let stats = BatchStats {
            rows: self.batch.rows(),
            reconstruction_error: self.batch.reconstruction_error(),
            sparsity: self.batch.hidden_mean(),
        };

        self.apply_sparsity();
        self.apply_decay(layer);
        if self.config.flags().clip_gradients {
            let limit = self.params.gradient_clip;
            clip_norm(&mut self.grads.w, limit);
            clip_norm(&mut self.grads.b, limit);
            clip_norm(&mut self.grads.c, limit);
        }
        self.update(layer);
        self.batch.finish();

        if self.config.flags().verbose {
            debug!(
                rows = stats.rows,
                error = stats.reconstruction_error,
                sparsity = stats.sparsity,
                "batch trained"
            );
        }
        stats
    }

    /// Mean positive-phase activation of the hidden units sharing each bias.
    fn bias_means(&self) -> Vec<f64> {
        let nb = self.grads.b.len();
        let h = &self.batch.h1_a[..self.batch.rows() * self.batch.num_hidden()];
        let mut sums = vec![0.0; nb];
        for (unit, &value) in h.iter().enumerate() {
            sums[(unit / self.group_size) % nb] += value.as_f64();
        }
        let per_bias = (h.len() / nb.max(1)).max(1) as f64;
        sums.iter().map(|s| s / per_bias).collect()
    }

    fn apply_sparsity(&mut self) {
        let method = self.config.sparsity();
        if method == SparsityMethod::None {
            return;
        }

        let target = self.params.sparsity_target;
        let decay = self.params.sparsity_decay;
        let cost = self.params.sparsity_cost;
        let means = self.bias_means();

        let penalties: Vec<f64> = match method {
            SparsityMethod::GlobalTarget => {
                let mean = means.iter().sum::<f64>() / means.len().max(1) as f64;
                self.q_global = decay * self.q_global + (1.0 - decay) * mean;
                vec![self.q_global - target; means.len()]
            }
            SparsityMethod::LocalTarget => {
                for (q, &m) in self.q_local.iter_mut().zip(&means) {
                    *q = decay * *q + (1.0 - decay) * m;
                }
                self.q_local.iter().map(|q| q - target).collect()
            }
            SparsityMethod::Lee => means.iter().map(|m| m - target).collect(),
            SparsityMethod::None => return,
        };

        for (g, p) in self.grads.b.iter_mut().zip(penalties) {
            *g = *g - W::cast(cost * p);
        }
    }

    fn apply_decay<L: RbmLayer<Weight = W>>(&mut self, layer: &L) {
        let cost = W::cast(self.params.weight_cost);
        let params = layer.params();
        let (l1, full) = match self.config.decay() {
            DecayType::None => return,
            DecayType::L1 => (true, false),
            DecayType::L2 => (false, false),
            DecayType::L1Full => (true, true),
            DecayType::L2Full => (false, true),
        };

        let decay = |grads: &mut [W], values: &[W]| {
            for (g, &v) in grads.iter_mut().zip(values) {
                let penalty = if l1 { v.signum() } else { v };
                *g = *g - cost * penalty;
            }
        };
        decay(&mut self.grads.w, params.w);
        if full {
            decay(&mut self.grads.b, params.b);
            decay(&mut self.grads.c, params.c);
        }
    }

    fn update<L: RbmLayer<Weight = W>>(&mut self, layer: &mut L) {
        let lr = W::cast(self.params.learning_rate);
        let momentum = W::cast(self.momentum());
        let train_biases = self.config.bias() != BiasMode::None;

        let step = |values: &mut [W], grads: &[W], incs: &mut [W]| {
            for ((v, &g), inc) in values.iter_mut().zip(grads).zip(incs.iter_mut()) {
                *inc = momentum * *inc + lr * g;
                *v = *v + *inc;
            }
        };

        let params = layer.params_mut();
        step(params.w, &self.grads.w, &mut self.incs.w);
        if train_biases {
            step(params.b, &self.grads.b, &mut self.incs.b);
            step(params.c, &self.grads.c, &mut self.incs.c);
        }
    }

    /// Train `layer` on `data` for `epochs` epochs.
    ///
    /// Returns the reconstruction error of the last finite epoch, or `0.0`
    /// when no epoch ran (empty data or zero epochs). If an epoch ends with a
    /// non-finite error, the parameters are restored from the backup taken
    /// after the previous epoch and training stops; when that happens on the
    /// first epoch, the non-finite error is returned.
    pub fn train<L: RbmLayer<Weight = W>>(&mut self, layer: &mut L, data: &[Vec<W>], epochs: usize) -> f64 {
        let description = layer.to_short_string();
        self.watcher.training_begin(&description, epochs, data.len());
        self.history.clear();
        self.batch.reset_chain();

        if data.is_empty() {
            self.watcher.training_end(0.0);
            return 0.0;
        }

        if self.config.flags().init_weights {
            layer.init_visible_biases(data);
        }
        layer.backup();

        let nv = layer.input_size();
        let batch_size = self.config.batch_size();
        let mut order: Vec<usize> = (0..data.len()).collect();
        let mut batch_input = vec![W::zero(); batch_size * nv];
        let mut final_error: Option<f64> = None;

        for epoch in 0..epochs {
            self.epoch = epoch;
            let start = Instant::now();

            if self.config.flags().shuffle {
                self.rng.shuffle_usize(&mut order);
            }

            let mut error_sum = 0.0;
            let mut sparsity_sum = 0.0;
            for (index, chunk) in order.chunks(batch_size).enumerate() {
                for (slot, &sample) in batch_input.chunks_mut(nv).zip(chunk) {
                    slot.copy_from_slice(&data[sample]);
                }
                let stats = self.train_batch(layer, &batch_input[..chunk.len() * nv]);
                error_sum += stats.reconstruction_error * stats.rows as f64;
                sparsity_sum += stats.sparsity * stats.rows as f64;
                self.watcher.batch_end(epoch, index, &stats);
            }

            let error = error_sum / data.len() as f64;
            if !error.is_finite() {
                let restored = layer.restore();
                self.watcher.numerical_issue(epoch, error, restored);
                if final_error.is_none() {
                    final_error = Some(error);
                }
                break;
            }
            layer.backup();

            let free_energy = if self.config.flags().free_energy {
                Some(data.iter().map(|v| layer.free_energy(v)).sum::<f64>() / data.len() as f64)
            } else {
                None
            };

            let stats = EpochStats {
                epoch,
                reconstruction_error: error,
                sparsity: sparsity_sum / data.len() as f64,
                free_energy,
                seconds: start.elapsed().as_secs_f64(),
            };
            self.watcher.epoch_end(&stats);
            self.history.push(stats);
            final_error = Some(error);
        }

        let final_error = final_error.unwrap_or(0.0);
        self.watcher.training_end(final_error);
        final_error
    }
}

/// Scale `grads` down so that its L2 norm is at most `limit`.
fn clip_norm<W: Weight>(grads: &mut [W], limit: f64) {
    let norm = grads.iter().map(|g| g.as_f64() * g.as_f64()).sum::<f64>().sqrt();
    if norm > limit && norm > 0.0 {
        let factor = W::cast(limit / norm);
        for g in grads.iter_mut() {
            *g = *g * factor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RbmDesc;
    use crate::layers::Rbm;
    use crate::params::Param;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_params() {
        let params = TrainingParams::default();
        assert_relative_eq!(params.learning_rate, 0.1);
        assert_eq!(params.final_momentum_epoch, 6);
    }

    #[test]
    fn test_params_from_partial_json() {
        let params: TrainingParams = serde_json::from_str(r#"{"learning_rate": 0.01}"#).unwrap();
        assert_relative_eq!(params.learning_rate, 0.01);
        assert_relative_eq!(params.final_momentum, 0.9);
        assert!(validate_training_params(&params).is_ok());

        let bad = TrainingParams {
            sparsity_decay: 2.0,
            ..TrainingParams::default()
        };
        assert!(validate_training_params(&bad).is_err());
    }

    #[test]
    fn test_clip_norm() {
        let mut grads = vec![3.0f64, 4.0];
        clip_norm(&mut grads, 1.0);
        assert_relative_eq!(grads[0], 0.6, epsilon = 1e-12);
        assert_relative_eq!(grads[1], 0.8, epsilon = 1e-12);

        let mut small = vec![0.1f64, 0.1];
        clip_norm(&mut small, 1.0);
        assert_eq!(small, vec![0.1, 0.1]);
    }

    #[test]
    fn test_momentum_schedule() {
        let config = RbmDesc::new(4, 2).param(Param::Momentum).resolve().unwrap();
        let layer = Rbm::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();
        let mut trainer = CdTrainer::new(&layer, TrainingParams::default());
        assert_relative_eq!(trainer.momentum(), 0.5);
        trainer.epoch = 6;
        assert_relative_eq!(trainer.momentum(), 0.9);

        let config = RbmDesc::new(4, 2).resolve().unwrap();
        let layer = Rbm::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();
        let trainer = CdTrainer::new(&layer, TrainingParams::default());
        assert_eq!(trainer.momentum(), 0.0);
    }

    #[test]
    fn test_bias_none_keeps_biases() {
        let config = RbmDesc::new(4, 3)
            .params([Param::Bias(BiasMode::None), Param::BatchSize(2)])
            .resolve()
            .unwrap();
        let mut layer = Rbm::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();
        let mut trainer = CdTrainer::new(&layer, TrainingParams::default());
        let w_before = layer.params().w.to_vec();

        trainer.train_batch(&mut layer, &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0]);
        assert!(layer.params().b.iter().all(|&b| b == 0.0));
        assert!(layer.params().c.iter().all(|&c| c == 0.0));
        assert_ne!(layer.params().w.to_vec(), w_before);
    }
}
