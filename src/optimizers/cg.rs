//! Conjugate gradient training context
//!
//! Buffers used by a conjugate gradient fine-tuning run over a layer: current
//! and best increments, the gradients at the start (`df0`) and end (`df3`) of
//! a line search, the search direction `s` and a scratch buffer, each for
//! the weights and the hidden biases. The per-example hidden activations and
//! samples are sized for the whole run by [`CgContext::prepare_run`].

use crate::layers::RbmLayer;
use crate::utils::{SimpleRng, Weight};

#[derive(Debug, Clone)]
pub struct CgContext<W> {
    num_hidden: usize,

    pub w_incs: Vec<W>,
    pub b_incs: Vec<W>,
    pub w_best: Vec<W>,
    pub b_best: Vec<W>,
    pub w_best_incs: Vec<W>,
    pub b_best_incs: Vec<W>,
    pub w_df0: Vec<W>,
    pub b_df0: Vec<W>,
    pub w_df3: Vec<W>,
    pub b_df3: Vec<W>,
    pub w_s: Vec<W>,
    pub b_s: Vec<W>,
    pub w_tmp: Vec<W>,
    pub b_tmp: Vec<W>,

    /// Hidden activations of every example of the run.
    pub probs_a: Vec<Vec<W>>,
    /// Hidden samples of every example of the run.
    pub probs_s: Vec<Vec<W>>,
}

impl<W: Weight> CgContext<W> {
    pub fn new<L: RbmLayer<Weight = W>>(layer: &L) -> Self {
        // one hidden bias per filter on conv layers
        let params = layer.params();
        let (nw, nb) = (params.w.len(), params.b.len());
        let zeros = |n: usize| vec![W::zero(); n];

        Self {
            num_hidden: layer.num_hidden_units(),
            w_incs: zeros(nw),
            b_incs: zeros(nb),
            w_best: zeros(nw),
            b_best: zeros(nb),
            w_best_incs: zeros(nw),
            b_best_incs: zeros(nb),
            w_df0: zeros(nw),
            b_df0: zeros(nb),
            w_df3: zeros(nw),
            b_df3: zeros(nb),
            w_s: zeros(nw),
            b_s: zeros(nb),
            w_tmp: zeros(nw),
            b_tmp: zeros(nb),
            probs_a: Vec::new(),
            probs_s: Vec::new(),
        }
    }

    /// Size the per-example buffers for a run over `n` examples and clear them.
    pub fn prepare_run(&mut self, n: usize) {
        let nh = self.num_hidden;
        self.probs_a.resize_with(n, Vec::new);
        self.probs_s.resize_with(n, Vec::new);
        for buffer in self.probs_a.iter_mut().chain(self.probs_s.iter_mut()) {
            buffer.clear();
            buffer.resize(nh, W::zero());
        }
    }

    /// Fill the per-example buffers with the hidden activations and samples
    /// of `inputs`.
    ///
    /// # Panics
    ///
    /// Panics if [`prepare_run`](Self::prepare_run) was not called for
    /// `inputs.len()` examples.
    pub fn refresh_probs<L: RbmLayer<Weight = W>>(&mut self, layer: &L, inputs: &[Vec<W>], rng: &mut SimpleRng) {
        assert_eq!(inputs.len(), self.probs_a.len(), "run was prepared for another number of examples");
        for ((input, a), s) in inputs.iter().zip(&mut self.probs_a).zip(&mut self.probs_s) {
            layer.hidden_activations(input, a);
            layer.sample_hidden(a, s, rng);
        }
    }

    /// Record `layer`'s parameters and the current increments as the best so far.
    pub fn commit_best<L: RbmLayer<Weight = W>>(&mut self, layer: &L) {
        let params = layer.params();
        self.w_best.copy_from_slice(params.w);
        self.b_best.copy_from_slice(params.b);
        self.w_best_incs.copy_from_slice(&self.w_incs);
        self.b_best_incs.copy_from_slice(&self.b_incs);
    }

    /// Make the gradient at the end of the line search the starting gradient
    /// of the next one.
    pub fn shift_gradients(&mut self) {
        self.w_df0.copy_from_slice(&self.w_df3);
        self.b_df0.copy_from_slice(&self.b_df3);
    }

    /// Start a new search along the steepest descent direction `s = −df0`.
    pub fn reset_direction(&mut self) {
        for (s, &g) in self.w_s.iter_mut().zip(&self.w_df0) {
            *s = -g;
        }
        for (s, &g) in self.b_s.iter_mut().zip(&self.b_df0) {
            *s = -g;
        }
    }

    /// Polak-Ribière update of the search direction from `df0` (previous
    /// gradient) and `df3` (new gradient): `s = −df3 + β·s`.
    ///
    /// Returns β, clamped at zero (a restart along the steepest descent).
    pub fn update_direction(&mut self) -> f64 {
        let dot = |a: &[W], b: &[W]| -> f64 { a.iter().zip(b).map(|(&x, &y)| (x * y).as_f64()).sum() };

        let new_sq = dot(&self.w_df3, &self.w_df3) + dot(&self.b_df3, &self.b_df3);
        let cross = dot(&self.w_df3, &self.w_df0) + dot(&self.b_df3, &self.b_df0);
        let old_sq = dot(&self.w_df0, &self.w_df0) + dot(&self.b_df0, &self.b_df0);

        let beta = if old_sq > 0.0 {
            ((new_sq - cross) / old_sq).max(0.0)
        } else {
            0.0
        };
        let beta_w = W::cast(beta);

        for (s, &g) in self.w_s.iter_mut().zip(&self.w_df3) {
            *s = beta_w * *s - g;
        }
        for (s, &g) in self.b_s.iter_mut().zip(&self.b_df3) {
            *s = beta_w * *s - g;
        }
        beta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RbmDesc;
    use crate::layers::Rbm;
    use approx::assert_relative_eq;

    fn layer() -> Rbm<f64> {
        let config = RbmDesc::new(4, 3).resolve().unwrap();
        Rbm::new(config, &mut SimpleRng::new(11)).unwrap()
    }

    #[test]
    fn test_prepare_run_resizes_and_clears() {
        let layer = layer();
        let mut ctx = CgContext::new(&layer);
        assert!(ctx.probs_a.is_empty());

        ctx.prepare_run(5);
        assert_eq!(ctx.probs_a.len(), 5);
        assert!(ctx.probs_s.iter().all(|p| p.len() == 3));

        ctx.probs_a[0][0] = 1.0;
        ctx.prepare_run(2);
        assert_eq!(ctx.probs_a.len(), 2);
        assert_eq!(ctx.probs_a[0][0], 0.0);
    }

    #[test]
    fn test_refresh_probs() {
        let layer = layer();
        let mut ctx = CgContext::new(&layer);
        let inputs = vec![vec![1.0, 0.0, 1.0, 0.0], vec![0.0, 1.0, 0.0, 1.0]];
        ctx.prepare_run(inputs.len());
        ctx.refresh_probs(&layer, &inputs, &mut SimpleRng::new(2));

        let mut expected = vec![0.0; 3];
        layer.hidden_activations(&inputs[1], &mut expected);
        assert_eq!(ctx.probs_a[1], expected);
        assert!(ctx.probs_s[1].iter().all(|&s| s == 0.0 || s == 1.0));
    }

    #[test]
    fn test_commit_best_and_shift() {
        let layer = layer();
        let mut ctx = CgContext::new(&layer);
        ctx.w_incs.fill(0.5);
        ctx.commit_best(&layer);
        assert_eq!(ctx.w_best, layer.params().w.to_vec());
        assert!(ctx.w_best_incs.iter().all(|&x| x == 0.5));

        ctx.w_df3.fill(2.0);
        ctx.shift_gradients();
        assert!(ctx.w_df0.iter().all(|&x| x == 2.0));
    }

    #[test]
    fn test_update_direction() {
        let layer = layer();
        let mut ctx = CgContext::new(&layer);
        ctx.w_df0.fill(1.0);
        ctx.b_df0.fill(1.0);
        ctx.reset_direction();
        assert!(ctx.w_s.iter().all(|&s| s == -1.0));

        ctx.w_df3.fill(2.0);
        ctx.b_df3.fill(2.0);
        // (4n − 2n) / n = 2
        let beta = ctx.update_direction();
        assert_relative_eq!(beta, 2.0, epsilon = 1e-12);
        assert!(ctx.w_s.iter().all(|&s| (s + 4.0).abs() < 1e-12));
    }
}
