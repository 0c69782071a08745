//! Layer trait definitions
//!
//! [`Layer`] is what a network container needs to stack layers: sizes and a
//! description. [`RbmLayer`] is the capability set contrastive divergence
//! drives (activations, sampling, gradients, parameter access).
//! [`FineTune`] is the backpropagation protocol used when a trained layer is
//! fine-tuned with a supervised error signal.

use crate::config::RbmConfig;
use crate::layers::cd::RbmGradients;
use crate::optimizers::sgd::SgdContext;
use crate::utils::{SimpleRng, Weight};
use num_traits::Zero;

/// Core trait for layers that can be composed by a network container.
///
/// All buffers are flattened row-major, one row per sample.
pub trait Layer {
    /// Element type of the layer's parameters and activations.
    type Weight: Weight;

    /// Get the input size of the layer.
    ///
    /// Returns the expected number of input features per sample.
    fn input_size(&self) -> usize;

    /// Get the output size of the layer.
    ///
    /// Returns the number of output features per sample.
    fn output_size(&self) -> usize;

    /// Get the number of weights of the layer.
    fn parameter_count(&self) -> usize;

    /// Short human-readable description.
    fn to_short_string(&self) -> String;

    /// A zeroed input buffer of the right shape for one sample.
    fn prepare_input(&self) -> Vec<Self::Weight> {
        vec![<Self::Weight as Zero>::zero(); self.input_size()]
    }
}

/// Borrowed view of the parameters of an RBM.
pub struct RbmParams<'a, W> {
    pub w: &'a [W],
    /// Hidden biases.
    pub b: &'a [W],
    /// Visible biases.
    pub c: &'a [W],
}

/// Mutable view of the parameters of an RBM.
pub struct RbmParamsMut<'a, W> {
    pub w: &'a mut [W],
    pub b: &'a mut [W],
    pub c: &'a mut [W],
}

/// Capabilities contrastive divergence needs from a layer.
///
/// Every method taking a batch infers the number of rows from the slice
/// lengths; visible rows have [`Layer::input_size`] values and hidden rows
/// [`RbmLayer::num_hidden_units`] values.
pub trait RbmLayer: Layer {
    /// The resolved configuration the layer was built from.
    fn config(&self) -> &RbmConfig;

    /// Number of hidden (detection) units per sample.
    fn num_hidden_units(&self) -> usize;

    /// Number of consecutive hidden units sharing one hidden bias.
    fn hidden_group_size(&self) -> usize;

    /// Hidden activation probabilities (or means) given visible states.
    fn hidden_activations(&self, v: &[Self::Weight], h_a: &mut [Self::Weight]);

    /// Hidden states drawn from activations.
    fn sample_hidden(&self, h_a: &[Self::Weight], h_s: &mut [Self::Weight], rng: &mut SimpleRng);

    /// Visible activation probabilities (or means) given hidden states.
    fn visible_activations(&self, h: &[Self::Weight], v_a: &mut [Self::Weight]);

    /// Visible states drawn from activations.
    fn sample_visible(&self, v_a: &[Self::Weight], v_s: &mut [Self::Weight], rng: &mut SimpleRng);

    /// Contrastive divergence gradients from the positive (`v1`, `h1_a`) and
    /// negative (`v2_a`, `h2_a`) phases, averaged over the batch.
    fn cd_gradients(
        &self,
        v1: &[Self::Weight],
        h1_a: &[Self::Weight],
        v2_a: &[Self::Weight],
        h2_a: &[Self::Weight],
        grads: &mut RbmGradients<Self::Weight>,
    );

    /// Free energy of one visible vector.
    fn free_energy(&self, v: &[Self::Weight]) -> f64;

    fn params(&self) -> RbmParams<'_, Self::Weight>;

    fn params_mut(&mut self) -> RbmParamsMut<'_, Self::Weight>;

    /// Initialize the visible biases from the data statistics.
    fn init_visible_biases(&mut self, data: &[Vec<Self::Weight>]);

    /// Copy the parameters into the backup buffers, allocating them on first use.
    fn backup(&mut self);

    /// Copy the backup buffers back into the parameters. Returns `false` if no
    /// backup was ever taken.
    fn restore(&mut self) -> bool;
}

/// Backpropagation protocol for supervised fine-tuning.
pub trait FineTune: RbmLayer {
    /// Output activations for a batch of inputs.
    fn forward_batch(&self, input: &[Self::Weight], output: &mut [Self::Weight]);

    /// Multiply the errors by the derivative of the activation function at the
    /// last output.
    fn adapt_errors(&self, context: &mut SgdContext<Self::Weight>);

    /// Propagate the (adapted) errors to the previous layer, writing a
    /// `batch × input_size` buffer.
    fn backward_batch(&self, output: &mut [Self::Weight], context: &SgdContext<Self::Weight>);

    /// Weight and bias gradients of the batch held by the context.
    fn compute_gradients(&self, context: &mut SgdContext<Self::Weight>);
}
