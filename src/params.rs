//! Configuration tags
//!
//! A layer is configured by an ordered list of [`Param`] values. Each value has
//! a [`ParamKind`]; a layer kind accepts a fixed set of kinds and every kind that
//! is not supplied falls back to a documented default. This module only holds
//! the tag vocabulary and the lookup helpers; resolution of a whole list into a
//! layer configuration lives in [`crate::config`].

use crate::error::ConfigurationError;
use crate::config::LayerKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Activation and sampling semantics of a group of units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    /// Sigmoid activation, Bernoulli sample.
    Binary,
    /// Identity activation, unit-variance Gaussian noise.
    Gaussian,
    /// Normalized exponential over the group, one-hot sample.
    Softmax,
    /// Rectified linear activation with noisy sampling.
    Relu,
    /// Rectified linear, capped at 1.
    Relu1,
    /// Rectified linear, capped at 6.
    Relu6,
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitType::Binary => "BINARY",
            UnitType::Gaussian => "GAUSSIAN",
            UnitType::Softmax => "SOFTMAX",
            UnitType::Relu => "RELU",
            UnitType::Relu1 => "RELU1",
            UnitType::Relu6 => "RELU6",
        };
        f.write_str(name)
    }
}

/// Sparsity penalty applied to the hidden biases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SparsityMethod {
    None,
    /// Penalize the mean activation of the whole hidden layer.
    GlobalTarget,
    /// Penalize a running mean of each hidden unit.
    LocalTarget,
    /// Penalize the batch mean of each hidden group (Lee et al.).
    Lee,
}

/// Whether the biases are trained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasMode {
    None,
    Simple,
}

/// Weight decay applied by the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayType {
    None,
    L1,
    L2,
    /// L1 on weights and biases.
    L1Full,
    /// L2 on weights and biases.
    L2Full,
}

/// Element type used to store weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightType {
    F32,
    F64,
}

impl fmt::Display for WeightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightType::F32 => f.write_str("f32"),
            WeightType::F64 => f.write_str("f64"),
        }
    }
}

/// Trainer used for unsupervised training. The payload is the number of Gibbs steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainerKind {
    /// Contrastive divergence, chain restarted from the data every batch.
    Cd(usize),
    /// Persistent contrastive divergence, chain carried over between batches.
    Pcd(usize),
}

impl TrainerKind {
    pub fn steps(&self) -> usize {
        match *self {
            TrainerKind::Cd(k) | TrainerKind::Pcd(k) => k,
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, TrainerKind::Pcd(_))
    }
}

/// Observer notified of training progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherKind {
    /// Logs epoch summaries through `tracing`.
    Default,
    /// Ignores every event.
    Silent,
}

/// One configuration tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    Momentum,
    BatchSize(usize),
    Visible(UnitType),
    Hidden(UnitType),
    Pooling(UnitType),
    DbnOnly,
    WeightDecay(DecayType),
    Sparsity(SparsityMethod),
    Trainer(TrainerKind),
    Watcher(WatcherKind),
    Bias(BiasMode),
    WeightType(WeightType),
    Shuffle,
    ParallelMode,
    Serial,
    Verbose,
    Nop,
    InitWeights,
    FreeEnergy,
    ClipGradients,
}

/// Identity of a configuration tag, independent of its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Momentum,
    BatchSize,
    Visible,
    Hidden,
    Pooling,
    DbnOnly,
    WeightDecay,
    Sparsity,
    Trainer,
    Watcher,
    Bias,
    WeightType,
    Shuffle,
    ParallelMode,
    Serial,
    Verbose,
    Nop,
    InitWeights,
    FreeEnergy,
    ClipGradients,
}

impl ParamKind {
    pub fn name(&self) -> &'static str {
        match self {
            ParamKind::Momentum => "momentum",
            ParamKind::BatchSize => "batch_size",
            ParamKind::Visible => "visible",
            ParamKind::Hidden => "hidden",
            ParamKind::Pooling => "pooling",
            ParamKind::DbnOnly => "dbn_only",
            ParamKind::WeightDecay => "weight_decay",
            ParamKind::Sparsity => "sparsity",
            ParamKind::Trainer => "trainer",
            ParamKind::Watcher => "watcher",
            ParamKind::Bias => "bias",
            ParamKind::WeightType => "weight_type",
            ParamKind::Shuffle => "shuffle",
            ParamKind::ParallelMode => "parallel_mode",
            ParamKind::Serial => "serial",
            ParamKind::Verbose => "verbose",
            ParamKind::Nop => "nop",
            ParamKind::InitWeights => "init_weights",
            ParamKind::FreeEnergy => "free_energy",
            ParamKind::ClipGradients => "clip_gradients",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Param {
    pub fn kind(&self) -> ParamKind {
        match self {
            Param::Momentum => ParamKind::Momentum,
            Param::BatchSize(_) => ParamKind::BatchSize,
            Param::Visible(_) => ParamKind::Visible,
            Param::Hidden(_) => ParamKind::Hidden,
            Param::Pooling(_) => ParamKind::Pooling,
            Param::DbnOnly => ParamKind::DbnOnly,
            Param::WeightDecay(_) => ParamKind::WeightDecay,
            Param::Sparsity(_) => ParamKind::Sparsity,
            Param::Trainer(_) => ParamKind::Trainer,
            Param::Watcher(_) => ParamKind::Watcher,
            Param::Bias(_) => ParamKind::Bias,
            Param::WeightType(_) => ParamKind::WeightType,
            Param::Shuffle => ParamKind::Shuffle,
            Param::ParallelMode => ParamKind::ParallelMode,
            Param::Serial => ParamKind::Serial,
            Param::Verbose => ParamKind::Verbose,
            Param::Nop => ParamKind::Nop,
            Param::InitWeights => ParamKind::InitWeights,
            Param::FreeEnergy => ParamKind::FreeEnergy,
            Param::ClipGradients => ParamKind::ClipGradients,
        }
    }
}

/// Tags accepted by a dense RBM.
pub const RBM_PARAMS: &[ParamKind] = &[
    ParamKind::Momentum,
    ParamKind::BatchSize,
    ParamKind::Visible,
    ParamKind::Hidden,
    ParamKind::DbnOnly,
    ParamKind::WeightDecay,
    ParamKind::Sparsity,
    ParamKind::Trainer,
    ParamKind::Watcher,
    ParamKind::Bias,
    ParamKind::WeightType,
    ParamKind::Shuffle,
    ParamKind::ParallelMode,
    ParamKind::Serial,
    ParamKind::Verbose,
    ParamKind::Nop,
    ParamKind::InitWeights,
    ParamKind::FreeEnergy,
    ParamKind::ClipGradients,
];

/// Tags accepted by a convolutional RBM with probabilistic max pooling.
pub const CONV_RBM_MP_PARAMS: &[ParamKind] = &[
    ParamKind::Momentum,
    ParamKind::BatchSize,
    ParamKind::Visible,
    ParamKind::Hidden,
    ParamKind::Pooling,
    ParamKind::DbnOnly,
    ParamKind::WeightDecay,
    ParamKind::Sparsity,
    ParamKind::Trainer,
    ParamKind::Watcher,
    ParamKind::Bias,
    ParamKind::WeightType,
    ParamKind::Shuffle,
    ParamKind::ParallelMode,
    ParamKind::Serial,
    ParamKind::Verbose,
    ParamKind::Nop,
];

/// Return the value carried by the first `$variant` tag of `$params`, or `$default`.
///
/// ```
/// use rust_rbm::get_value;
/// use rust_rbm::params::{Param, UnitType};
///
/// let params = [Param::Hidden(UnitType::Relu)];
/// assert_eq!(get_value!(params, Param::Hidden, UnitType::Binary), UnitType::Relu);
/// assert_eq!(get_value!(params, Param::BatchSize, 1), 1);
/// ```
#[macro_export]
macro_rules! get_value {
    ($params:expr, $variant:path, $default:expr) => {
        $params
            .iter()
            .find_map(|p| match p {
                $variant(value) => Some(*value),
                _ => None,
            })
            .unwrap_or($default)
    };
}

/// Whether a tag of the given kind is present.
pub fn contains(params: &[Param], kind: ParamKind) -> bool {
    params.iter().any(|p| p.kind() == kind)
}

/// Check `params` against the tags allowed for `layer`.
///
/// The first offending tag, in list order, is reported.
pub fn validate(
    params: &[Param],
    allowed: &[ParamKind],
    layer: LayerKind,
) -> Result<(), ConfigurationError> {
    for (i, param) in params.iter().enumerate() {
        let kind = param.kind();
        if !allowed.contains(&kind) {
            return Err(ConfigurationError::UnknownParameter { kind, layer });
        }
        if params[..i].iter().any(|p| p.kind() == kind) {
            return Err(ConfigurationError::DuplicateParameter(kind));
        }
    }
    Ok(())
}
