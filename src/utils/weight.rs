//! Element type of weights and activations.

use crate::params::WeightType;
use num_traits::Float;
use std::fmt::Debug;
use std::iter::Sum;

/// Floating point type a layer stores its parameters in.
///
/// Implemented for `f32` and `f64`; [`WeightType`] names the same choice at
/// configuration time.
pub trait Weight: Float + Sum + Default + Debug + Send + Sync + 'static {
    /// Configuration tag value matching this type.
    const KIND: WeightType;

    /// Lossy conversion from `f64`.
    fn cast(value: f64) -> Self;

    fn as_f64(self) -> f64;
}

impl Weight for f32 {
    const KIND: WeightType = WeightType::F32;

    fn cast(value: f64) -> Self {
        value as f32
    }

    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Weight for f64 {
    const KIND: WeightType = WeightType::F64;

    fn cast(value: f64) -> Self {
        value
    }

    fn as_f64(self) -> f64 {
        self
    }
}
