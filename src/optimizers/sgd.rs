//! Stochastic gradient descent for supervised fine-tuning
//!
//! [`SgdContext`] holds the per-layer batch buffers the fine-tuning protocol
//! ([`FineTune`]) reads and writes; [`Sgd`] applies the momentum update rule
//! `inc = momentum · inc + lr · (grad / B − weight_cost · w)`, `w += inc`.
//!
//! Errors are `target − output`, so the accumulated gradients already point
//! downhill and are added to the weights.

use crate::error::ConfigurationError;
use crate::layers::{FineTune, RbmLayer};
use crate::utils::{Function, Weight};
use tracing::trace;

/// Training buffers of one layer for batch SGD.
#[derive(Debug, Clone)]
pub struct SgdContext<W> {
    batch_size: usize,
    rows: usize,
    num_visible: usize,
    num_hidden: usize,
    /// Activation function of the layer output.
    pub activation: Function,
    pub w_grad: Vec<W>,
    pub b_grad: Vec<W>,
    pub w_inc: Vec<W>,
    pub b_inc: Vec<W>,
    /// `batch × num_visible`.
    pub input: Vec<W>,
    /// `batch × num_hidden`.
    pub output: Vec<W>,
    /// `batch × num_hidden`.
    pub errors: Vec<W>,
}

impl<W: Weight> SgdContext<W> {
    /// Create the context of `layer` for batches of `batch_size` samples.
    ///
    /// # Errors
    ///
    /// `InvalidBatchSize` for an empty batch, `UnsupportedActivationKind` if
    /// the hidden units have no derivative usable by backpropagation.
    pub fn new<L: RbmLayer<Weight = W>>(layer: &L, batch_size: usize) -> Result<Self, ConfigurationError> {
        if batch_size == 0 {
            return Err(ConfigurationError::InvalidBatchSize);
        }
        let activation = Function::for_unit(layer.config().hidden_unit())?;

        let nv = layer.input_size();
        let nh = layer.num_hidden_units();
        Ok(Self {
            batch_size,
            rows: batch_size,
            num_visible: nv,
            num_hidden: nh,
            activation,
            w_grad: vec![W::zero(); nv * nh],
            b_grad: vec![W::zero(); nh],
            w_inc: vec![W::zero(); nv * nh],
            b_inc: vec![W::zero(); nh],
            input: vec![W::zero(); batch_size * nv],
            output: vec![W::zero(); batch_size * nh],
            errors: vec![W::zero(); batch_size * nh],
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of rows of the batch currently loaded.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn num_visible(&self) -> usize {
        self.num_visible
    }

    pub fn num_hidden(&self) -> usize {
        self.num_hidden
    }

    /// Copy a batch of inputs into the context.
    ///
    /// # Panics
    ///
    /// Panics if `input` is empty, not a whole number of rows, or larger than
    /// the batch size.
    pub fn load_input(&mut self, input: &[W]) {
        assert!(
            !input.is_empty() && input.len() % self.num_visible == 0,
            "input length {} is not a whole number of rows of {}",
            input.len(),
            self.num_visible
        );
        let rows = input.len() / self.num_visible;
        assert!(rows <= self.batch_size, "batch of {} rows exceeds {}", rows, self.batch_size);
        self.rows = rows;
        self.input[..input.len()].copy_from_slice(input);
    }

    /// The loaded rows of the input buffer.
    pub fn batch_input(&self) -> &[W] {
        &self.input[..self.rows * self.num_visible]
    }

    /// The loaded rows of the output buffer.
    pub fn batch_output(&self) -> &[W] {
        &self.output[..self.rows * self.num_hidden]
    }

    /// The loaded rows of the error buffer.
    pub fn batch_errors(&self) -> &[W] {
        &self.errors[..self.rows * self.num_hidden]
    }

    /// Set `errors = target − output` for the loaded rows and return the half
    /// mean squared error per sample.
    pub fn set_errors(&mut self, target: &[W]) -> f64 {
        let len = self.rows * self.num_hidden;
        assert_eq!(target.len(), len, "target length mismatch");

        let mut loss = 0.0;
        for ((e, &o), &t) in self.errors[..len].iter_mut().zip(&self.output[..len]).zip(target) {
            *e = t - o;
            let d = e.as_f64();
            loss += 0.5 * d * d;
        }
        loss / self.rows as f64
    }
}

/// Momentum SGD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    pub learning_rate: f64,
    pub momentum: f64,
    /// L2 weight decay applied to the weights (not the biases).
    pub weight_cost: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            momentum: 0.0,
            weight_cost: 0.0,
        }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_weight_cost(mut self, weight_cost: f64) -> Self {
        self.weight_cost = weight_cost;
        self
    }

    /// Update `parameters` in place from batch-summed `gradients`.
    ///
    /// # Panics
    ///
    /// Panics if the three slices have different lengths.
    pub fn update<W: Weight>(
        &self,
        parameters: &mut [W],
        gradients: &[W],
        increments: &mut [W],
        rows: usize,
        decay: bool,
    ) {
        assert_eq!(parameters.len(), gradients.len(), "parameters and gradients must match");
        assert_eq!(parameters.len(), increments.len(), "parameters and increments must match");

        let lr = W::cast(self.learning_rate);
        let momentum = W::cast(self.momentum);
        let cost = if decay { W::cast(self.weight_cost) } else { W::zero() };
        let inv_rows = W::one() / W::cast(rows.max(1) as f64);

        for ((p, &g), inc) in parameters.iter_mut().zip(gradients).zip(increments.iter_mut()) {
            *inc = momentum * *inc + lr * (g * inv_rows - cost * *p);
            *p = *p + *inc;
        }
    }

    /// One supervised step on a batch: forward, errors, gradients, update.
    ///
    /// Returns the half mean squared error of the batch before the update.
    pub fn step<L: FineTune<Weight = W>, W: Weight>(
        &self,
        layer: &mut L,
        context: &mut SgdContext<W>,
        input: &[W],
        target: &[W],
    ) -> f64 {
        context.load_input(input);
        let (nv, nh) = (context.rows * context.num_visible, context.rows * context.num_hidden);
        layer.forward_batch(&context.input[..nv], &mut context.output[..nh]);

        let loss = context.set_errors(target);
        layer.adapt_errors(context);
        layer.compute_gradients(context);

        let rows = context.rows;
        let params = layer.params_mut();
        self.update(params.w, &context.w_grad, &mut context.w_inc, rows, true);
        self.update(params.b, &context.b_grad, &mut context.b_inc, rows, false);

        trace!(rows, loss, "sgd step");
        loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RbmDesc;
    use crate::layers::Rbm;
    use crate::params::{Param, UnitType};
    use crate::utils::SimpleRng;
    use approx::assert_relative_eq;

    #[test]
    fn test_context_shapes() {
        let config = RbmDesc::new(5, 3).resolve().unwrap();
        let layer = Rbm::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();
        let ctx = SgdContext::new(&layer, 4).unwrap();

        assert_eq!(ctx.w_grad.len(), 15);
        assert_eq!(ctx.b_grad.len(), 3);
        assert_eq!(ctx.input.len(), 20);
        assert_eq!(ctx.output.len(), 12);
        assert_eq!(ctx.errors.len(), 12);
        assert!(ctx.w_inc.iter().all(|&x| x == 0.0));
        assert_eq!(ctx.activation, Function::Sigmoid);
    }

    #[test]
    fn test_context_rejects_gaussian_hidden() {
        let config = RbmDesc::new(5, 3).param(Param::Hidden(UnitType::Gaussian)).resolve().unwrap();
        let layer = Rbm::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();
        assert_eq!(
            SgdContext::new(&layer, 4).unwrap_err(),
            ConfigurationError::UnsupportedActivationKind(UnitType::Gaussian)
        );
        assert_eq!(
            SgdContext::<f64>::new(&layer, 0).unwrap_err(),
            ConfigurationError::InvalidBatchSize
        );
    }

    #[test]
    fn test_update_rule() {
        let sgd = Sgd::new(0.5).with_momentum(0.9).with_weight_cost(0.1);
        let mut params = vec![1.0f64];
        let mut incs = vec![0.2f64];
        sgd.update(&mut params, &[4.0], &mut incs, 2, true);

        // inc = 0.9·0.2 + 0.5·(4/2 − 0.1·1) = 1.13
        assert_relative_eq!(incs[0], 1.13, epsilon = 1e-12);
        assert_relative_eq!(params[0], 2.13, epsilon = 1e-12);
    }

    #[test]
    fn test_step_reduces_loss() {
        let config = RbmDesc::new(4, 2).param(Param::BatchSize(2)).resolve().unwrap();
        let mut layer = Rbm::<f64>::new(config, &mut SimpleRng::new(3)).unwrap();
        let mut ctx = SgdContext::new(&layer, 2).unwrap();
        let sgd = Sgd::new(0.5);

        let input = [1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0];
        let target = [1.0, 0.0, 0.0, 1.0];

        let first = sgd.step(&mut layer, &mut ctx, &input, &target);
        let mut last = first;
        for _ in 0..200 {
            last = sgd.step(&mut layer, &mut ctx, &input, &target);
        }
        assert!(last < first);
    }
}
