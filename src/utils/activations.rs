//! Activation functions for RBM units
//!
//! This module provides the activation and sampling rules of every
//! [`UnitType`], and the activation derivatives used when a layer is
//! fine-tuned by backpropagation:
//! - Sigmoid (binary units)
//! - Rectified linear, optionally capped (ReLU, ReLU1, ReLU6)
//! - Softmax (applied row-wise)
//! - Identity (Gaussian units)

use crate::error::ConfigurationError;
use crate::params::UnitType;
use crate::utils::rng::SimpleRng;
use crate::utils::weight::Weight;

/// Sigmoid activation function.
///
/// Returns the sigmoid of the input: 1 / (1 + exp(-x))
pub fn sigmoid<W: Weight>(x: W) -> W {
    W::one() / (W::one() + (-x).exp())
}

/// Sigmoid derivative assuming y = sigmoid(z).
///
/// Returns the derivative: y * (1 - y)
pub fn sigmoid_derivative<W: Weight>(y: W) -> W {
    y * (W::one() - y)
}

/// Softplus, log(1 + exp(x)), without overflow for large x.
pub fn softplus<W: Weight>(x: W) -> W {
    if x > W::cast(30.0) {
        x
    } else {
        x.exp().ln_1p()
    }
}

/// ReLU activation function applied in-place, with an optional upper cap.
///
/// Sets all negative values to 0.0 and values above `cap` to `cap`.
pub fn relu_inplace<W: Weight>(data: &mut [W], cap: Option<W>) {
    for value in data.iter_mut() {
        if *value < W::zero() {
            *value = W::zero();
        } else if let Some(cap) = cap {
            if *value > cap {
                *value = cap;
            }
        }
    }
}

/// Softmax activation function applied row-wise.
///
/// Converts logits to probabilities for each row. Uses the max-subtraction
/// trick for numerical stability to avoid overflow with large values.
///
/// # Arguments
/// * `outputs` - Flat array containing row-major matrix data
/// * `rows` - Number of rows in the matrix
/// * `cols` - Number of columns in the matrix
pub fn softmax_rows<W: Weight>(outputs: &mut [W], rows: usize, cols: usize) {
    if cols == 0 {
        return;
    }
    assert_eq!(outputs.len(), rows * cols, "outputs length mismatch in softmax_rows");

    for row in outputs.chunks_exact_mut(cols).take(rows) {
        let max_value = row.iter().copied().fold(W::neg_infinity(), W::max);

        let mut sum = W::zero();
        for value in row.iter_mut() {
            *value = (*value - max_value).exp();
            sum = sum + *value;
        }

        let inv_sum = W::one() / sum;
        for value in row.iter_mut() {
            *value = *value * inv_sum;
        }
    }
}

fn relu_cap<W: Weight>(unit: UnitType) -> Option<W> {
    match unit {
        UnitType::Relu1 => Some(W::one()),
        UnitType::Relu6 => Some(W::cast(6.0)),
        _ => None,
    }
}

/// Turn one row of pre-activations into activation probabilities (or means).
pub fn activate_row<W: Weight>(unit: UnitType, row: &mut [W]) {
    match unit {
        UnitType::Binary => {
            for value in row.iter_mut() {
                *value = sigmoid(*value);
            }
        }
        UnitType::Relu | UnitType::Relu1 | UnitType::Relu6 => relu_inplace(row, relu_cap(unit)),
        UnitType::Softmax => {
            let cols = row.len();
            softmax_rows(row, 1, cols);
        }
        UnitType::Gaussian => {}
    }
}

/// Which side of the RBM a row of units belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Visible,
    Hidden,
}

/// Draw a state for one row of units from their activations.
///
/// Gaussian visible units are reconstructed mean-field (the sample is the mean);
/// Gaussian hidden units get unit-variance noise.
pub fn sample_row<W: Weight>(
    unit: UnitType,
    side: Side,
    activations: &[W],
    samples: &mut [W],
    rng: &mut SimpleRng,
) {
    match unit {
        UnitType::Binary => {
            for (s, &a) in samples.iter_mut().zip(activations) {
                *s = W::cast(rng.bernoulli(a.as_f64()));
            }
        }
        UnitType::Relu | UnitType::Relu1 | UnitType::Relu6 => {
            let cap = relu_cap::<W>(unit);
            for (s, &a) in samples.iter_mut().zip(activations) {
                let std = sigmoid(a).as_f64().sqrt();
                *s = a + W::cast(rng.next_normal() * std);
            }
            relu_inplace(samples, cap);
        }
        UnitType::Softmax => {
            let probs: Vec<f64> = activations.iter().map(|a| a.as_f64()).collect();
            let winner = rng.categorical(&probs);
            for (i, s) in samples.iter_mut().enumerate() {
                *s = if i == winner { W::one() } else { W::zero() };
            }
        }
        UnitType::Gaussian => match side {
            Side::Visible => samples.copy_from_slice(activations),
            Side::Hidden => {
                for (s, &a) in samples.iter_mut().zip(activations) {
                    *s = a + W::cast(rng.next_normal());
                }
            }
        },
    }
}

/// Activation function of a layer, as seen by backpropagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sigmoid,
    Relu,
    Softmax,
}

impl Function {
    /// Function applied by hidden units of the given type.
    ///
    /// # Errors
    ///
    /// `UnsupportedActivationKind` for anything other than binary, ReLU and
    /// softmax units.
    pub fn for_unit(unit: UnitType) -> Result<Self, ConfigurationError> {
        match unit {
            UnitType::Binary => Ok(Function::Sigmoid),
            UnitType::Relu => Ok(Function::Relu),
            UnitType::Softmax => Ok(Function::Softmax),
            other => Err(ConfigurationError::UnsupportedActivationKind(other)),
        }
    }

    /// Derivative evaluated at an output `y = f(x)`.
    ///
    /// The softmax derivative is taken as 1: softmax outputs are trained
    /// against a cross-entropy loss, whose gradient already folds it in.
    pub fn derivative<W: Weight>(&self, y: W) -> W {
        match self {
            Function::Sigmoid => sigmoid_derivative(y),
            Function::Relu => {
                if y > W::zero() {
                    W::one()
                } else {
                    W::zero()
                }
            }
            Function::Softmax => W::one(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-10;
    const EPSILON_F32: f32 = 1e-6;

    #[test]
    fn test_sigmoid_zero() {
        let result = sigmoid(0.0f64);
        assert!((result - 0.5).abs() < EPSILON);
    }

    #[test]
    fn test_sigmoid_derivative_at_half() {
        let result = sigmoid_derivative(0.5f64);
        assert!((result - 0.25).abs() < EPSILON);
    }

    #[test]
    fn test_softplus_large_input() {
        assert_eq!(softplus(100.0f64), 100.0);
        assert!((softplus(0.0f64) - 2.0f64.ln()).abs() < EPSILON);
    }

    #[test]
    fn test_relu_mixed() {
        let mut data = vec![-2.0f32, -1.0, 0.0, 1.0, 2.0];
        relu_inplace(&mut data, None);
        assert_eq!(data, vec![0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_relu6_cap() {
        let mut data = vec![-1.0f64, 3.0, 9.0];
        activate_row(UnitType::Relu6, &mut data);
        assert_eq!(data, vec![0.0, 3.0, 6.0]);
    }

    #[test]
    fn test_softmax_numerical_stability() {
        let mut data = vec![1000.0f32, 1001.0, 1002.0];
        softmax_rows(&mut data, 1, 3);
        let sum: f32 = data.iter().sum();
        assert!((sum - 1.0).abs() < EPSILON_F32);
        assert!(!data.iter().any(|&x| x.is_nan() || x.is_infinite()));
    }

    #[test]
    fn test_softmax_sample_is_one_hot() {
        let mut rng = SimpleRng::new(5);
        let mut row = vec![0.3f64, 2.0, -1.0, 0.5];
        activate_row(UnitType::Softmax, &mut row);

        let mut sample = vec![0.0f64; 4];
        sample_row(UnitType::Softmax, Side::Hidden, &row, &mut sample, &mut rng);
        assert_eq!(sample.iter().sum::<f64>(), 1.0);
        assert!(sample.iter().all(|&s| s == 0.0 || s == 1.0));
    }

    #[test]
    fn test_gaussian_visible_is_mean_field() {
        let mut rng = SimpleRng::new(5);
        let means = vec![0.25f64, -1.5, 3.0];
        let mut sample = vec![0.0f64; 3];
        sample_row(UnitType::Gaussian, Side::Visible, &means, &mut sample, &mut rng);
        assert_eq!(sample, means);
    }

    #[test]
    fn test_function_for_unit() {
        assert_eq!(Function::for_unit(UnitType::Binary), Ok(Function::Sigmoid));
        assert_eq!(Function::for_unit(UnitType::Relu), Ok(Function::Relu));
        assert_eq!(Function::for_unit(UnitType::Softmax), Ok(Function::Softmax));
        assert_eq!(
            Function::for_unit(UnitType::Gaussian),
            Err(ConfigurationError::UnsupportedActivationKind(UnitType::Gaussian))
        );
    }
}
