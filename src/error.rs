//! Error types
//!
//! Every error in this crate is a configuration error: it is raised while a
//! descriptor is resolved or while a layer is specialized from a resolved
//! configuration, never in the middle of a training batch. Numerical trouble
//! during training (non-finite reconstruction error, diverging updates) is not
//! an error; it is reported to the watcher as diagnostic data.

use crate::config::LayerKind;
use crate::params::{ParamKind, UnitType, WeightType};
use thiserror::Error;

/// Reasons a configuration is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("parameter '{kind}' is not valid for a {layer} layer")]
    UnknownParameter { kind: ParamKind, layer: LayerKind },

    #[error("parameter '{0}' is given more than once")]
    DuplicateParameter(ParamKind),

    #[error("a {layer} layer takes {expected} dimensions, got {found}")]
    DimensionArity {
        layer: LayerKind,
        expected: usize,
        found: usize,
    },

    #[error("dimension '{name}' must be at least 1")]
    DimensionTooSmall { name: &'static str },

    #[error("the convolutional filter must be of at least size 1 ({visible} visible < {hidden} hidden on axis {axis})")]
    FilterLargerThanInput {
        axis: usize,
        visible: usize,
        hidden: usize,
    },

    #[error("sparsity only works with binary hidden units, got {hidden}")]
    IncompatibleSparsity { hidden: UnitType },

    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    #[error("the trainer needs at least one Gibbs step")]
    InvalidTrainerSteps,

    #[error("{role} units of type {unit} are not supported by a {layer} layer")]
    UnsupportedUnitKind {
        layer: LayerKind,
        role: &'static str,
        unit: UnitType,
    },

    #[error("pooling ratio {ratio} does not divide the hidden extent {extent}")]
    PoolingRatioMismatch { ratio: usize, extent: usize },

    #[error("only binary, softmax or relu hidden units can be fine-tuned, got {0}")]
    UnsupportedActivationKind(UnitType),

    #[error("expected a {expected} configuration, got {found}")]
    LayerKindMismatch { expected: LayerKind, found: LayerKind },

    #[error("configuration stores {configured} weights but the layer was built for {requested}")]
    WeightTypeMismatch {
        configured: WeightType,
        requested: WeightType,
    },
}
