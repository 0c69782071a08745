//! Dense RBM mechanics shared by the fixed and dynamic layers
//!
//! [`DenseCore`] holds the weights (`num_visible × num_hidden`, row-major),
//! the hidden biases `b` and the visible biases `c`, and implements the
//! activation, sampling and gradient rules both [`crate::layers::Rbm`] and
//! [`crate::layers::DynRbm`] delegate to.

use crate::layers::cd::RbmGradients;
use crate::params::UnitType;
use crate::utils::activations::{activate_row, sample_row, softplus, Side};
use crate::utils::matrix::{affine_rows, affine_rows_transposed, batch_outer, scale, sub_assign, sum_rows};
use crate::utils::{SimpleRng, Weight};
use rayon::prelude::*;

/// Standard deviation of the initial weights.
const INIT_STD: f64 = 0.1;

/// Probability range used when visible biases are derived from data.
const MIN_PROBABILITY: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct DenseCore<W> {
    pub num_visible: usize,
    pub num_hidden: usize,
    pub visible_unit: UnitType,
    pub hidden_unit: UnitType,
    pub parallel: bool,
    pub w: Vec<W>,
    pub b: Vec<W>,
    pub c: Vec<W>,
}

impl<W: Weight> DenseCore<W> {
    /// Weights drawn from N(0, 1) · 0.1, zero biases.
    pub fn new(
        num_visible: usize,
        num_hidden: usize,
        visible_unit: UnitType,
        hidden_unit: UnitType,
        parallel: bool,
        rng: &mut SimpleRng,
    ) -> Self {
        let w = (0..num_visible * num_hidden)
            .map(|_| W::cast(rng.next_normal() * INIT_STD))
            .collect();

        Self {
            num_visible,
            num_hidden,
            visible_unit,
            hidden_unit,
            parallel,
            w,
            b: vec![W::zero(); num_hidden],
            c: vec![W::zero(); num_visible],
        }
    }

    fn activate_rows(&self, unit: UnitType, data: &mut [W], cols: usize) {
        if self.parallel {
            data.par_chunks_mut(cols).for_each(|row| activate_row(unit, row));
        } else {
            for row in data.chunks_mut(cols) {
                activate_row(unit, row);
            }
        }
    }

    pub fn hidden_activations(&self, v: &[W], h_a: &mut [W]) {
        affine_rows(v, &self.w, &self.b, h_a, self.num_visible, self.num_hidden, self.parallel);
        self.activate_rows(self.hidden_unit, h_a, self.num_hidden);
    }

    pub fn visible_activations(&self, h: &[W], v_a: &mut [W]) {
        affine_rows_transposed(h, &self.w, &self.c, v_a, self.num_hidden, self.num_visible, self.parallel);
        self.activate_rows(self.visible_unit, v_a, self.num_visible);
    }

    pub fn sample_hidden(&self, h_a: &[W], h_s: &mut [W], rng: &mut SimpleRng) {
        for (a, s) in h_a.chunks(self.num_hidden).zip(h_s.chunks_mut(self.num_hidden)) {
            sample_row(self.hidden_unit, Side::Hidden, a, s, rng);
        }
    }

    pub fn sample_visible(&self, v_a: &[W], v_s: &mut [W], rng: &mut SimpleRng) {
        for (a, s) in v_a.chunks(self.num_visible).zip(v_s.chunks_mut(self.num_visible)) {
            sample_row(self.visible_unit, Side::Visible, a, s, rng);
        }
    }

    /// `w = (v1ᵀ·h1_a − v2_aᵀ·h2_a) / B`, `b = mean(h1_a − h2_a)`,
    /// `c = mean(v1 − v2_a)`.
    pub fn cd_gradients(&self, v1: &[W], h1_a: &[W], v2_a: &[W], h2_a: &[W], grads: &mut RbmGradients<W>) {
        let rows = v1.len() / self.num_visible;
        if rows == 0 {
            grads.fill_zero();
            return;
        }
        let inv = W::one() / W::cast(rows as f64);

        let mut negative = vec![W::zero(); self.w.len()];
        batch_outer(v1, h1_a, &mut grads.w, self.num_visible, self.num_hidden, self.parallel);
        batch_outer(v2_a, h2_a, &mut negative, self.num_visible, self.num_hidden, self.parallel);
        sub_assign(&mut grads.w, &negative);
        scale(&mut grads.w, inv);

        let mut tmp = vec![W::zero(); self.num_hidden];
        sum_rows(h1_a, self.num_hidden, &mut grads.b);
        sum_rows(h2_a, self.num_hidden, &mut tmp);
        sub_assign(&mut grads.b, &tmp);
        scale(&mut grads.b, inv);

        let mut tmp = vec![W::zero(); self.num_visible];
        sum_rows(v1, self.num_visible, &mut grads.c);
        sum_rows(v2_a, self.num_visible, &mut tmp);
        sub_assign(&mut grads.c, &tmp);
        scale(&mut grads.c, inv);
    }

    /// Free energy of one visible vector.
    ///
    /// Binary visible: `−c·v − Σ_j softplus(b_j + v·W_j)`.
    /// Gaussian visible: `Σ_i (v_i − c_i)² / 2 − Σ_j softplus(b_j + v·W_j)`.
    /// Non-binary hidden units use the same softplus term.
    pub fn free_energy(&self, v: &[W]) -> f64 {
        let mut x = vec![W::zero(); self.num_hidden];
        affine_rows(v, &self.w, &self.b, &mut x, self.num_visible, self.num_hidden, false);
        let hidden_term: f64 = x.iter().map(|&xj| softplus(xj).as_f64()).sum();

        let visible_term: f64 = match self.visible_unit {
            UnitType::Gaussian => v
                .iter()
                .zip(&self.c)
                .map(|(&vi, &ci)| {
                    let d = (vi - ci).as_f64();
                    0.5 * d * d
                })
                .sum(),
            _ => -v.iter().zip(&self.c).map(|(&vi, &ci)| (vi * ci).as_f64()).sum::<f64>(),
        };

        visible_term - hidden_term
    }

    /// Visible biases from the data: `log(p / (1 − p))` of the mean activation
    /// of each unit for binary units, the mean itself for Gaussian units.
    pub fn init_visible_biases(&mut self, data: &[Vec<W>]) {
        if data.is_empty() {
            return;
        }
        let n = data.len() as f64;
        for (i, c) in self.c.iter_mut().enumerate() {
            let mean = data.iter().map(|sample| sample[i].as_f64()).sum::<f64>() / n;
            *c = match self.visible_unit {
                UnitType::Gaussian => W::cast(mean),
                _ => {
                    let p = mean.clamp(MIN_PROBABILITY, 1.0 - MIN_PROBABILITY);
                    W::cast((p / (1.0 - p)).ln())
                }
            };
        }
    }

    /// Output of the layer on a batch: the hidden activation probabilities.
    pub fn forward(&self, input: &[W], output: &mut [W]) {
        self.hidden_activations(input, output);
    }

    /// `output = errors · Wᵀ`, one row per sample.
    pub fn backward(&self, errors: &[W], output: &mut [W]) {
        let zeros = vec![W::zero(); self.num_visible];
        affine_rows_transposed(errors, &self.w, &zeros, output, self.num_hidden, self.num_visible, self.parallel);
    }
}

/// Optional copies of the parameters, allocated the first time they are saved.
#[derive(Debug, Clone)]
pub struct ParamBackup<W> {
    w: Option<Vec<W>>,
    b: Option<Vec<W>>,
    c: Option<Vec<W>>,
}

impl<W: Weight> Default for ParamBackup<W> {
    fn default() -> Self {
        Self {
            w: None,
            b: None,
            c: None,
        }
    }
}

impl<W: Weight> ParamBackup<W> {
    pub fn is_empty(&self) -> bool {
        self.w.is_none()
    }

    pub fn save(&mut self, w: &[W], b: &[W], c: &[W]) {
        fn store<W: Copy>(slot: &mut Option<Vec<W>>, values: &[W]) {
            match slot {
                Some(saved) => saved.copy_from_slice(values),
                None => *slot = Some(values.to_vec()),
            }
        }
        store(&mut self.w, w);
        store(&mut self.b, b);
        store(&mut self.c, c);
    }

    /// Copy the saved values back. Returns `false` if nothing was saved.
    pub fn restore(&self, w: &mut [W], b: &mut [W], c: &mut [W]) -> bool {
        match (&self.w, &self.b, &self.c) {
            (Some(bw), Some(bb), Some(bc)) => {
                w.copy_from_slice(bw);
                b.copy_from_slice(bb);
                c.copy_from_slice(bc);
                true
            }
            _ => false,
        }
    }
}

/// Single-sample reconstruction buffers of a layer. Layers built with
/// `dbn_only` do not carry them.
#[derive(Debug, Clone)]
pub struct ReconstructionBuffers<W> {
    pub v1: Vec<W>,
    pub h1_a: Vec<W>,
    pub h1_s: Vec<W>,
    pub v2_a: Vec<W>,
    pub v2_s: Vec<W>,
    pub h2_a: Vec<W>,
    pub h2_s: Vec<W>,
}

impl<W: Weight> ReconstructionBuffers<W> {
    pub fn new(num_visible: usize, num_hidden: usize) -> Self {
        Self {
            v1: vec![W::zero(); num_visible],
            h1_a: vec![W::zero(); num_hidden],
            h1_s: vec![W::zero(); num_hidden],
            v2_a: vec![W::zero(); num_visible],
            v2_s: vec![W::zero(); num_visible],
            h2_a: vec![W::zero(); num_hidden],
            h2_s: vec![W::zero(); num_hidden],
        }
    }

    /// One Gibbs round trip `v1 → h1 → v2 → h2` through `core`.
    pub fn reconstruct(&mut self, core: &DenseCore<W>, sample: &[W], rng: &mut SimpleRng) {
        self.v1.copy_from_slice(sample);
        core.hidden_activations(&self.v1, &mut self.h1_a);
        core.sample_hidden(&self.h1_a, &mut self.h1_s, rng);
        core.visible_activations(&self.h1_s, &mut self.v2_a);
        core.sample_visible(&self.v2_a, &mut self.v2_s, rng);
        core.hidden_activations(&self.v2_a, &mut self.h2_a);
        core.sample_hidden(&self.h2_a, &mut self.h2_s, rng);
    }
}
