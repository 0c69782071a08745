//! Dense Restricted Boltzmann Machine
//!
//! Follows Hinton's definition: visible and hidden units connected by a
//! `num_visible × num_hidden` weight matrix, hidden biases `b`, visible
//! biases `c`. Weights start from N(0, 1) · 0.1, biases at zero.

use crate::config::{LayerKind, RbmConfig};
use crate::error::ConfigurationError;
use crate::layers::cd::RbmGradients;
use crate::layers::dyn_rbm::DynRbm;
use crate::layers::standard::{DenseCore, ParamBackup, ReconstructionBuffers};
use crate::layers::{FineTune, Layer, RbmLayer, RbmParams, RbmParamsMut};
use crate::optimizers::sgd::SgdContext;
use crate::utils::matrix::{batch_outer, sum_rows};
use crate::utils::{SimpleRng, Weight};

/// Dense RBM layer with element type `W`.
///
/// # Example
///
/// ```
/// use rust_rbm::config::RbmDesc;
/// use rust_rbm::layers::{Layer, Rbm};
/// use rust_rbm::params::{Param, UnitType};
/// use rust_rbm::utils::SimpleRng;
///
/// let config = RbmDesc::new(784, 500)
///     .param(Param::Hidden(UnitType::Relu))
///     .resolve()
///     .unwrap();
/// let layer = Rbm::<f64>::new(config, &mut SimpleRng::new(42)).unwrap();
/// assert_eq!(layer.to_short_string(), "RBM: 784(BINARY) -> 500(RELU)");
/// ```
#[derive(Debug, Clone)]
pub struct Rbm<W: Weight> {
    config: RbmConfig,
    core: DenseCore<W>,
    backup: ParamBackup<W>,
    recon: Option<ReconstructionBuffers<W>>,
}

impl<W: Weight> Rbm<W> {
    /// Build a layer from a resolved configuration.
    ///
    /// # Errors
    ///
    /// `LayerKindMismatch` if the configuration describes another kind of
    /// layer, `WeightTypeMismatch` if its weight type is not `W`.
    pub fn new(config: RbmConfig, rng: &mut SimpleRng) -> Result<Self, ConfigurationError> {
        if config.kind() != LayerKind::Rbm {
            return Err(ConfigurationError::LayerKindMismatch {
                expected: LayerKind::Rbm,
                found: config.kind(),
            });
        }
        if config.weight_type() != W::KIND {
            return Err(ConfigurationError::WeightTypeMismatch {
                configured: config.weight_type(),
                requested: W::KIND,
            });
        }

        let (nv, nh) = (config.num_visible(), config.num_hidden());
        let core = DenseCore::new(
            nv,
            nh,
            config.visible_unit(),
            config.hidden_unit(),
            config.flags().parallel(),
            rng,
        );
        let recon = if config.flags().dbn_only {
            None
        } else {
            Some(ReconstructionBuffers::new(nv, nh))
        };

        Ok(Self {
            config,
            core,
            backup: ParamBackup::default(),
            recon,
        })
    }

    pub fn num_visible(&self) -> usize {
        self.core.num_visible
    }

    pub fn num_hidden(&self) -> usize {
        self.core.num_hidden
    }

    /// Reconstruction buffers, absent for `dbn_only` layers.
    pub fn reconstruction(&self) -> Option<&ReconstructionBuffers<W>> {
        self.recon.as_ref()
    }

    /// Run one Gibbs round trip on `sample` through the reconstruction
    /// buffers. Returns `None` for `dbn_only` layers.
    pub fn reconstruct(&mut self, sample: &[W], rng: &mut SimpleRng) -> Option<&ReconstructionBuffers<W>> {
        let recon = self.recon.as_mut()?;
        recon.reconstruct(&self.core, sample, rng);
        Some(&*recon)
    }

    /// Give a runtime-sized layer the dimensions and batch size of this one.
    pub fn dyn_init(&self, dyn_rbm: &mut DynRbm<W>) -> Result<(), ConfigurationError> {
        dyn_rbm.init_layer(self.num_visible(), self.num_hidden())?;
        dyn_rbm.set_batch_size(self.config.batch_size())
    }

    /// Hidden activations of a single sample.
    pub fn activate_hidden(&self, v: &[W]) -> Vec<W> {
        let mut h = vec![W::zero(); self.num_hidden()];
        self.core.hidden_activations(v, &mut h);
        h
    }
}

impl<W: Weight> Layer for Rbm<W> {
    type Weight = W;

    fn input_size(&self) -> usize {
        self.core.num_visible
    }

    fn output_size(&self) -> usize {
        self.core.num_hidden
    }

    fn parameter_count(&self) -> usize {
        self.core.w.len()
    }

    fn to_short_string(&self) -> String {
        self.config.to_short_string()
    }
}

impl<W: Weight> RbmLayer for Rbm<W> {
    fn config(&self) -> &RbmConfig {
        &self.config
    }

    fn num_hidden_units(&self) -> usize {
        self.core.num_hidden
    }

    fn hidden_group_size(&self) -> usize {
        1
    }

    fn hidden_activations(&self, v: &[W], h_a: &mut [W]) {
        self.core.hidden_activations(v, h_a);
    }

    fn sample_hidden(&self, h_a: &[W], h_s: &mut [W], rng: &mut SimpleRng) {
        self.core.sample_hidden(h_a, h_s, rng);
    }

    fn visible_activations(&self, h: &[W], v_a: &mut [W]) {
        self.core.visible_activations(h, v_a);
    }

    fn sample_visible(&self, v_a: &[W], v_s: &mut [W], rng: &mut SimpleRng) {
        self.core.sample_visible(v_a, v_s, rng);
    }

    fn cd_gradients(&self, v1: &[W], h1_a: &[W], v2_a: &[W], h2_a: &[W], grads: &mut RbmGradients<W>) {
        self.core.cd_gradients(v1, h1_a, v2_a, h2_a, grads);
    }

    fn free_energy(&self, v: &[W]) -> f64 {
        self.core.free_energy(v)
    }

    fn params(&self) -> RbmParams<'_, W> {
        RbmParams {
            w: &self.core.w,
            b: &self.core.b,
            c: &self.core.c,
        }
    }

    fn params_mut(&mut self) -> RbmParamsMut<'_, W> {
        RbmParamsMut {
            w: &mut self.core.w,
            b: &mut self.core.b,
            c: &mut self.core.c,
        }
    }

    fn init_visible_biases(&mut self, data: &[Vec<W>]) {
        self.core.init_visible_biases(data);
    }

    fn backup(&mut self) {
        self.backup.save(&self.core.w, &self.core.b, &self.core.c);
    }

    fn restore(&mut self) -> bool {
        self.backup.restore(&mut self.core.w, &mut self.core.b, &mut self.core.c)
    }
}

impl<W: Weight> FineTune for Rbm<W> {
    fn forward_batch(&self, input: &[W], output: &mut [W]) {
        self.core.forward(input, output);
    }

    fn adapt_errors(&self, context: &mut SgdContext<W>) {
        let len = context.rows() * context.num_hidden();
        let f = context.activation;
        for (e, &y) in context.errors[..len].iter_mut().zip(&context.output[..len]) {
            *e = *e * f.derivative(y);
        }
    }

    fn backward_batch(&self, output: &mut [W], context: &SgdContext<W>) {
        let len = context.rows() * self.num_visible();
        self.core.backward(context.batch_errors(), &mut output[..len]);
    }

    fn compute_gradients(&self, context: &mut SgdContext<W>) {
        let (nv, nh) = (self.num_visible(), self.num_hidden());
        let rows = context.rows();
        batch_outer(
            &context.input[..rows * nv],
            &context.errors[..rows * nh],
            &mut context.w_grad,
            nv,
            nh,
            self.core.parallel,
        );
        sum_rows(&context.errors[..rows * nh], nh, &mut context.b_grad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConvRbmMpDesc, RbmDesc};
    use crate::params::{Param, UnitType, WeightType};

    #[test]
    fn test_shapes() {
        let config = RbmDesc::new(12, 5).resolve().unwrap();
        let layer = Rbm::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();
        let params = layer.params();

        assert_eq!(params.w.len(), 60);
        assert_eq!(params.b.len(), 5);
        assert_eq!(params.c.len(), 12);
        assert_eq!(layer.parameter_count(), 60);
        assert_eq!(layer.prepare_input().len(), 12);
    }

    #[test]
    fn test_rejects_other_kind_and_weight_type() {
        let conv = ConvRbmMpDesc::square(1, 8, 2, 4, 2).resolve().unwrap();
        assert!(matches!(
            Rbm::<f64>::new(conv, &mut SimpleRng::new(1)),
            Err(ConfigurationError::LayerKindMismatch { .. })
        ));

        let f32_config = RbmDesc::new(3, 3).param(Param::WeightType(WeightType::F32)).resolve().unwrap();
        assert_eq!(
            Rbm::<f64>::new(f32_config.clone(), &mut SimpleRng::new(1)).unwrap_err(),
            ConfigurationError::WeightTypeMismatch {
                configured: WeightType::F32,
                requested: WeightType::F64,
            }
        );
        assert!(Rbm::<f32>::new(f32_config, &mut SimpleRng::new(1)).is_ok());
    }

    #[test]
    fn test_dbn_only_has_no_reconstruction() {
        let config = RbmDesc::new(6, 4).param(Param::DbnOnly).resolve().unwrap();
        let mut layer = Rbm::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();
        assert!(layer.reconstruction().is_none());
        assert!(layer.reconstruct(&[0.0; 6], &mut SimpleRng::new(2)).is_none());

        let config = RbmDesc::new(6, 4).resolve().unwrap();
        let mut layer = Rbm::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();
        let recon = layer.reconstruct(&[1.0, 0.0, 1.0, 0.0, 1.0, 0.0], &mut SimpleRng::new(2)).unwrap();
        assert_eq!(recon.v1.len(), 6);
        assert_eq!(recon.h2_s.len(), 4);
    }

    #[test]
    fn test_adapt_errors_sigmoid() {
        let config = RbmDesc::new(2, 2).resolve().unwrap();
        let layer = Rbm::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();
        let mut ctx = SgdContext::new(&layer, 1).unwrap();
        ctx.output.copy_from_slice(&[0.5, 0.0]);
        ctx.errors.copy_from_slice(&[1.0, 1.0]);
        layer.adapt_errors(&mut ctx);
        assert_eq!(ctx.errors, vec![0.25, 0.0]);
    }

    #[test]
    fn test_adapt_errors_relu() {
        let config = RbmDesc::new(2, 3).param(Param::Hidden(UnitType::Relu)).resolve().unwrap();
        let layer = Rbm::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();
        let mut ctx = SgdContext::new(&layer, 1).unwrap();
        ctx.output.copy_from_slice(&[2.0, 0.0, 0.1]);
        ctx.errors.copy_from_slice(&[3.0, 3.0, -1.0]);
        layer.adapt_errors(&mut ctx);
        assert_eq!(ctx.errors, vec![3.0, 0.0, -1.0]);
    }

    #[test]
    fn test_compute_gradients() {
        let config = RbmDesc::new(2, 2).param(Param::BatchSize(2)).resolve().unwrap();
        let layer = Rbm::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();
        let mut ctx = SgdContext::new(&layer, 2).unwrap();
        ctx.load_input(&[1.0, 2.0, 3.0, 4.0]);
        ctx.errors.copy_from_slice(&[1.0, 0.0, 0.0, 1.0]);
        layer.compute_gradients(&mut ctx);

        assert_eq!(ctx.w_grad, vec![1.0, 3.0, 2.0, 4.0]);
        assert_eq!(ctx.b_grad, vec![1.0, 1.0]);
    }
}
