//! Dense RBM whose dimensions are chosen at runtime
//!
//! [`DynRbm`] keeps its tag list so it can be re-resolved when its
//! dimensions or batch size change, e.g. when a trained [`crate::layers::Rbm`]
//! hands its shape over through `dyn_init`.

use crate::config::{self, LayerKind, RbmConfig};
use crate::error::ConfigurationError;
use crate::layers::cd::RbmGradients;
use crate::layers::standard::{DenseCore, ParamBackup};
use crate::layers::{Layer, RbmLayer, RbmParams, RbmParamsMut};
use crate::params::{Param, ParamKind};
use crate::utils::{SimpleRng, Weight};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DynRbm<W: Weight> {
    params: Vec<Param>,
    config: RbmConfig,
    core: DenseCore<W>,
    backup: ParamBackup<W>,
    rng: SimpleRng,
}

impl<W: Weight> DynRbm<W> {
    /// Resolve `params` for a `num_visible × num_hidden` layer and build it.
    /// `seed` drives the weight initialization, now and on every re-init.
    pub fn new(num_visible: usize, num_hidden: usize, params: &[Param], seed: u64) -> Result<Self, ConfigurationError> {
        let config = config::resolve(LayerKind::Rbm, &[num_visible, num_hidden], params)?;
        if config.weight_type() != W::KIND {
            return Err(ConfigurationError::WeightTypeMismatch {
                configured: config.weight_type(),
                requested: W::KIND,
            });
        }

        let mut rng = SimpleRng::new(seed);
        let core = Self::build_core(&config, &mut rng);
        Ok(Self {
            params: params.to_vec(),
            config,
            core,
            backup: ParamBackup::default(),
            rng,
        })
    }

    fn build_core(config: &RbmConfig, rng: &mut SimpleRng) -> DenseCore<W> {
        DenseCore::new(
            config.num_visible(),
            config.num_hidden(),
            config.visible_unit(),
            config.hidden_unit(),
            config.flags().parallel(),
            rng,
        )
    }

    /// Resize the layer. Weights are re-initialized and any backup dropped.
    pub fn init_layer(&mut self, num_visible: usize, num_hidden: usize) -> Result<(), ConfigurationError> {
        let config = config::resolve(LayerKind::Rbm, &[num_visible, num_hidden], &self.params)?;
        self.core = Self::build_core(&config, &mut self.rng);
        self.config = config;
        self.backup = ParamBackup::default();
        debug!(num_visible, num_hidden, "dynamic RBM initialized");
        Ok(())
    }

    /// Change the batch size, keeping the current weights.
    pub fn set_batch_size(&mut self, batch_size: usize) -> Result<(), ConfigurationError> {
        let mut params: Vec<Param> = self
            .params
            .iter()
            .copied()
            .filter(|p| p.kind() != ParamKind::BatchSize)
            .collect();
        params.push(Param::BatchSize(batch_size));

        let dims = [self.core.num_visible, self.core.num_hidden];
        self.config = config::resolve(LayerKind::Rbm, &dims, &params)?;
        self.params = params;
        Ok(())
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size()
    }
}

impl<W: Weight> Layer for DynRbm<W> {
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
        format!("Dyn{}", self.config.to_short_string())
    }
}

impl<W: Weight> RbmLayer for DynRbm<W> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RbmDesc;
    use crate::layers::Rbm;
    use crate::params::UnitType;

    #[test]
    fn test_dyn_init_from_rbm() {
        let config = RbmDesc::new(20, 8).param(Param::BatchSize(16)).resolve().unwrap();
        let rbm = Rbm::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();

        let mut dyn_rbm = DynRbm::<f64>::new(1, 1, &[Param::Hidden(UnitType::Relu)], 9).unwrap();
        rbm.dyn_init(&mut dyn_rbm).unwrap();

        assert_eq!(dyn_rbm.input_size(), 20);
        assert_eq!(dyn_rbm.output_size(), 8);
        assert_eq!(dyn_rbm.params().w.len(), 160);
        assert_eq!(dyn_rbm.batch_size(), 16);
        assert_eq!(dyn_rbm.config().hidden_unit(), UnitType::Relu);
    }

    #[test]
    fn test_init_layer_rejects_zero() {
        let mut dyn_rbm = DynRbm::<f64>::new(3, 3, &[], 1).unwrap();
        assert_eq!(
            dyn_rbm.init_layer(0, 3).unwrap_err(),
            ConfigurationError::DimensionTooSmall { name: "num_visible" }
        );
        assert_eq!(dyn_rbm.input_size(), 3);
        assert_eq!(dyn_rbm.set_batch_size(0).unwrap_err(), ConfigurationError::InvalidBatchSize);
    }
}
