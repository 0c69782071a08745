//! Convolutional RBM with probabilistic max pooling
//!
//! Visible units are `nc` channels of `nv1 × nv2`; hidden (detection) units
//! are `k` maps of `nh1 × nh2`, each map sharing one `nw1 × nw2` filter per
//! channel and one bias. Detection units are grouped in `c × c` blocks; at
//! most one unit of a block can be on, and the pooling unit of the block is
//! on iff one of them is. Per block the activations are a softmax over the
//! `c²` units plus an "off" state of energy zero.
//!
//! Layouts are row-major: visible `[nc][nv1][nv2]`, hidden `[k][nh1][nh2]`,
//! weights `[k][nc][nw1][nw2]`, pooling `[k][nh1 / c][nh2 / c]`.

use crate::config::{Dimensions, LayerKind, RbmConfig};
use crate::error::ConfigurationError;
use crate::layers::cd::RbmGradients;
use crate::layers::standard::ParamBackup;
use crate::layers::{Layer, RbmLayer, RbmParams, RbmParamsMut};
use crate::params::UnitType;
use crate::utils::activations::{activate_row, sample_row, Side};
use crate::utils::matrix::{add_assign, scale};
use crate::utils::{SimpleRng, Weight};
use rayon::prelude::*;

const INIT_STD: f64 = 0.01;
const INIT_HIDDEN_BIAS: f64 = -0.1;
const MIN_PROBABILITY: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct ConvRbmMp<W: Weight> {
    config: RbmConfig,
    nc: usize,
    nv1: usize,
    nv2: usize,
    k: usize,
    nh1: usize,
    nh2: usize,
    c: usize,
    nw1: usize,
    nw2: usize,
    visible_unit: UnitType,
    parallel: bool,
    w: Vec<W>,
    /// One bias per filter.
    b: Vec<W>,
    /// One bias per input channel.
    c_bias: Vec<W>,
    backup: ParamBackup<W>,
}

impl<W: Weight> ConvRbmMp<W> {
    /// Build a layer from a resolved configuration.
    ///
    /// Filters start from N(0, 1) · 0.01, hidden biases at −0.1 and visible
    /// biases at zero.
    pub fn new(config: RbmConfig, rng: &mut SimpleRng) -> Result<Self, ConfigurationError> {
        let Dimensions::ConvMp { nc, nv1, nv2, k, nh1, nh2, c } = config.dimensions() else {
            return Err(ConfigurationError::LayerKindMismatch {
                expected: LayerKind::ConvRbmMp,
                found: config.kind(),
            });
        };
        if config.weight_type() != W::KIND {
            return Err(ConfigurationError::WeightTypeMismatch {
                configured: config.weight_type(),
                requested: W::KIND,
            });
        }

        let (nw1, nw2) = (nv1 - nh1 + 1, nv2 - nh2 + 1);
        let w = (0..k * nc * nw1 * nw2)
            .map(|_| W::cast(rng.next_normal() * INIT_STD))
            .collect();

        Ok(Self {
            visible_unit: config.visible_unit(),
            parallel: config.flags().parallel(),
            config,
            nc,
            nv1,
            nv2,
            k,
            nh1,
            nh2,
            c,
            nw1,
            nw2,
            w,
            b: vec![W::cast(INIT_HIDDEN_BIAS); k],
            c_bias: vec![W::zero(); nc],
            backup: ParamBackup::default(),
        })
    }

    fn visible_len(&self) -> usize {
        self.nc * self.nv1 * self.nv2
    }

    fn hidden_len(&self) -> usize {
        self.k * self.nh1 * self.nh2
    }

    /// Number of pooling units per sample.
    pub fn pooling_len(&self) -> usize {
        self.k * (self.nh1 / self.c) * (self.nh2 / self.c)
    }

    /// Filter extent `(nw1, nw2)`.
    pub fn filter_dims(&self) -> (usize, usize) {
        (self.nw1, self.nw2)
    }

    /// `(map, block row, block column)` of every pooling block, in pooling order.
    fn blocks(&self) -> impl Iterator<Item = (usize, usize, usize)> {
        let (k, p1, p2) = (self.k, self.nh1 / self.c, self.nh2 / self.c);
        (0..k).flat_map(move |m| (0..p1).flat_map(move |bi| (0..p2).map(move |bj| (m, bi, bj))))
    }

    /// Hidden indices of one pooling block.
    fn block(&self, m: usize, bi: usize, bj: usize) -> impl Iterator<Item = usize> {
        let (nh1, nh2, c) = (self.nh1, self.nh2, self.c);
        (0..c).flat_map(move |di| (0..c).map(move |dj| m * nh1 * nh2 + (bi * c + di) * nh2 + bj * c + dj))
    }

    /// Valid correlation of one visible sample with the filters, plus biases.
    fn hidden_input(&self, v: &[W], x: &mut [W]) {
        let (nv1, nv2, nw1, nw2) = (self.nv1, self.nv2, self.nw1, self.nw2);
        for m in 0..self.k {
            for i in 0..self.nh1 {
                for j in 0..self.nh2 {
                    let mut acc = self.b[m];
                    for ch in 0..self.nc {
                        for a in 0..nw1 {
                            let v_row = &v[ch * nv1 * nv2 + (i + a) * nv2 + j..][..nw2];
                            let w_row = &self.w[((m * self.nc + ch) * nw1 + a) * nw2..][..nw2];
                            for (&vv, &ww) in v_row.iter().zip(w_row) {
                                acc = acc + vv * ww;
                            }
                        }
                    }
                    x[m * self.nh1 * self.nh2 + i * self.nh2 + j] = acc;
                }
            }
        }
    }

    /// Turn hidden inputs into detection probabilities, block by block.
    fn block_probabilities(&self, x: &mut [W]) {
        for (m, bi, bj) in self.blocks() {
            let max = self.block(m, bi, bj).map(|u| x[u]).fold(W::zero(), W::max);
            let mut sum = (-max).exp();
            for u in self.block(m, bi, bj) {
                x[u] = (x[u] - max).exp();
                sum = sum + x[u];
            }
            for u in self.block(m, bi, bj) {
                x[u] = x[u] / sum;
            }
        }
    }

    /// `log(1 + Σ exp(x))` of every block.
    fn block_log_partition(&self, x: &[W]) -> f64 {
        self.blocks()
            .map(|(m, bi, bj)| {
                let max = self.block(m, bi, bj).map(|u| x[u].as_f64()).fold(0.0, f64::max);
                let sum: f64 = (-max).exp() + self.block(m, bi, bj).map(|u| (x[u].as_f64() - max).exp()).sum::<f64>();
                max + sum.ln()
            })
            .sum()
    }

    /// Full convolution of one hidden sample with the filters, plus biases.
    fn visible_input(&self, h: &[W], v: &mut [W]) {
        let (nv1, nv2, nw1, nw2) = (self.nv1, self.nv2, self.nw1, self.nw2);
        for (ch, channel) in v.chunks_mut(nv1 * nv2).enumerate() {
            channel.fill(self.c_bias[ch]);
        }
        for m in 0..self.k {
            for i in 0..self.nh1 {
                for j in 0..self.nh2 {
                    let hv = h[m * self.nh1 * self.nh2 + i * self.nh2 + j];
                    if hv == W::zero() {
                        continue;
                    }
                    for ch in 0..self.nc {
                        for a in 0..nw1 {
                            let start = ch * nv1 * nv2 + (i + a) * nv2 + j;
                            let w_row = &self.w[((m * self.nc + ch) * nw1 + a) * nw2..][..nw2];
                            for (vv, &ww) in v[start..start + nw2].iter_mut().zip(w_row) {
                                *vv = *vv + hv * ww;
                            }
                        }
                    }
                }
            }
        }
    }

    /// `acc[w] += sign · Σ_ij h[m, i, j] · v[ch, i + a, j + b]` for one sample.
    fn accumulate_filters(&self, v: &[W], h: &[W], acc: &mut [W], sign: W) {
        let (nv1, nv2, nw1, nw2) = (self.nv1, self.nv2, self.nw1, self.nw2);
        for m in 0..self.k {
            for i in 0..self.nh1 {
                for j in 0..self.nh2 {
                    let hv = sign * h[m * self.nh1 * self.nh2 + i * self.nh2 + j];
                    if hv == W::zero() {
                        continue;
                    }
                    for ch in 0..self.nc {
                        for a in 0..nw1 {
                            let v_row = &v[ch * nv1 * nv2 + (i + a) * nv2 + j..][..nw2];
                            let start = ((m * self.nc + ch) * nw1 + a) * nw2;
                            for (g, &vv) in acc[start..start + nw2].iter_mut().zip(v_row) {
                                *g = *g + hv * vv;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Pooling-unit probabilities of a batch of visible samples.
    pub fn pooling_activations(&self, v: &[W], p_a: &mut [W]) {
        let mut h_a = vec![W::zero(); (v.len() / self.visible_len()) * self.hidden_len()];
        self.hidden_activations(v, &mut h_a);
        for (h_row, p_row) in h_a.chunks(self.hidden_len()).zip(p_a.chunks_mut(self.pooling_len())) {
            for (p, (m, bi, bj)) in p_row.iter_mut().zip(self.blocks()) {
                *p = self.block(m, bi, bj).fold(W::zero(), |acc, u| acc + h_row[u]);
            }
        }
    }

    /// Pooling states implied by a batch of detection samples.
    pub fn pool_samples(&self, h_s: &[W], p_s: &mut [W]) {
        for (h_row, p_row) in h_s.chunks(self.hidden_len()).zip(p_s.chunks_mut(self.pooling_len())) {
            for (p, (m, bi, bj)) in p_row.iter_mut().zip(self.blocks()) {
                let on = self.block(m, bi, bj).any(|u| h_row[u] != W::zero());
                *p = if on { W::one() } else { W::zero() };
            }
        }
    }
}

impl<W: Weight> Layer for ConvRbmMp<W> {
    type Weight = W;

    fn input_size(&self) -> usize {
        self.visible_len()
    }

    fn output_size(&self) -> usize {
        self.pooling_len()
    }

    fn parameter_count(&self) -> usize {
        self.w.len()
    }

    fn to_short_string(&self) -> String {
        self.config.to_short_string()
    }
}

impl<W: Weight> RbmLayer for ConvRbmMp<W> {
    fn config(&self) -> &RbmConfig {
        &self.config
    }

    fn num_hidden_units(&self) -> usize {
        self.hidden_len()
    }

    fn hidden_group_size(&self) -> usize {
        self.nh1 * self.nh2
    }

    fn hidden_activations(&self, v: &[W], h_a: &mut [W]) {
        let (nv, nh) = (self.visible_len(), self.hidden_len());
        let row = |(x, v_row): (&mut [W], &[W])| {
            self.hidden_input(v_row, x);
            self.block_probabilities(x);
        };
        if self.parallel {
            h_a.par_chunks_mut(nh).zip(v.par_chunks(nv)).for_each(row);
        } else {
            h_a.chunks_mut(nh).zip(v.chunks(nv)).for_each(row);
        }
    }

    /// At most one detection unit per block is turned on.
    fn sample_hidden(&self, h_a: &[W], h_s: &mut [W], rng: &mut SimpleRng) {
        let nh = self.hidden_len();
        let block_size = self.c * self.c;
        let mut probs = vec![0.0; block_size + 1];

        for (a_row, s_row) in h_a.chunks(nh).zip(h_s.chunks_mut(nh)) {
            for (m, bi, bj) in self.blocks() {
                for (p, u) in probs.iter_mut().zip(self.block(m, bi, bj)) {
                    *p = a_row[u].as_f64();
                }
                let on: f64 = probs[..block_size].iter().sum();
                probs[block_size] = (1.0 - on).max(0.0);

                let winner = rng.categorical(&probs);
                for (idx, u) in self.block(m, bi, bj).enumerate() {
                    s_row[u] = if idx == winner { W::one() } else { W::zero() };
                }
            }
        }
    }

    fn visible_activations(&self, h: &[W], v_a: &mut [W]) {
        let (nv, nh) = (self.visible_len(), self.hidden_len());
        let unit = self.visible_unit;
        let row = |(x, h_row): (&mut [W], &[W])| {
            self.visible_input(h_row, x);
            activate_row(unit, x);
        };
        if self.parallel {
            v_a.par_chunks_mut(nv).zip(h.par_chunks(nh)).for_each(row);
        } else {
            v_a.chunks_mut(nv).zip(h.chunks(nh)).for_each(row);
        }
    }

    fn sample_visible(&self, v_a: &[W], v_s: &mut [W], rng: &mut SimpleRng) {
        let nv = self.visible_len();
        for (a, s) in v_a.chunks(nv).zip(v_s.chunks_mut(nv)) {
            sample_row(self.visible_unit, Side::Visible, a, s, rng);
        }
    }

    /// Filter gradients are averaged over the batch and the detection map,
    /// visible bias gradients over the batch and the input map.
    fn cd_gradients(&self, v1: &[W], h1_a: &[W], v2_a: &[W], h2_a: &[W], grads: &mut RbmGradients<W>) {
        let (nv, nh) = (self.visible_len(), self.hidden_len());
        let rows = v1.len() / nv;
        if rows == 0 {
            grads.fill_zero();
            return;
        }

        let row_grad = |mut acc: Vec<W>, (((p_v, p_h), n_v), n_h): (((&[W], &[W]), &[W]), &[W])| {
            self.accumulate_filters(p_v, p_h, &mut acc, W::one());
            self.accumulate_filters(n_v, n_h, &mut acc, -W::one());
            acc
        };
        let w_sum = if self.parallel {
            v1.par_chunks(nv)
                .zip(h1_a.par_chunks(nh))
                .zip(v2_a.par_chunks(nv))
                .zip(h2_a.par_chunks(nh))
                .fold(|| vec![W::zero(); self.w.len()], row_grad)
                .reduce(
                    || vec![W::zero(); self.w.len()],
                    |mut lhs, rhs| {
                        add_assign(&mut lhs, &rhs);
                        lhs
                    },
                )
        } else {
            v1.chunks(nv)
                .zip(h1_a.chunks(nh))
                .zip(v2_a.chunks(nv))
                .zip(h2_a.chunks(nh))
                .fold(vec![W::zero(); self.w.len()], row_grad)
        };
        grads.w.copy_from_slice(&w_sum);

        let map_h = self.nh1 * self.nh2;
        grads.b.fill(W::zero());
        for (i, (p, n)) in h1_a.chunks(map_h).zip(h2_a.chunks(map_h)).enumerate() {
            let diff = p.iter().zip(n).fold(W::zero(), |acc, (&a, &b)| acc + a - b);
            grads.b[i % self.k] = grads.b[i % self.k] + diff;
        }

        let map_v = self.nv1 * self.nv2;
        grads.c.fill(W::zero());
        for (i, (p, n)) in v1.chunks(map_v).zip(v2_a.chunks(map_v)).enumerate() {
            let diff = p.iter().zip(n).fold(W::zero(), |acc, (&a, &b)| acc + a - b);
            grads.c[i % self.nc] = grads.c[i % self.nc] + diff;
        }

        let hidden_norm = W::one() / W::cast((rows * map_h) as f64);
        scale(&mut grads.w, hidden_norm);
        scale(&mut grads.b, hidden_norm);
        scale(&mut grads.c, W::one() / W::cast((rows * map_v) as f64));
    }

    fn free_energy(&self, v: &[W]) -> f64 {
        let mut x = vec![W::zero(); self.hidden_len()];
        self.hidden_input(v, &mut x);
        let hidden_term = self.block_log_partition(&x);

        let map_v = self.nv1 * self.nv2;
        let visible_term: f64 = v
            .chunks(map_v)
            .zip(&self.c_bias)
            .map(|(channel, &cb)| match self.visible_unit {
                UnitType::Gaussian => channel
                    .iter()
                    .map(|&vi| {
                        let d = (vi - cb).as_f64();
                        0.5 * d * d
                    })
                    .sum::<f64>(),
                _ => -channel.iter().map(|&vi| (vi * cb).as_f64()).sum::<f64>(),
            })
            .sum();

        visible_term - hidden_term
    }

    fn params(&self) -> RbmParams<'_, W> {
        RbmParams {
            w: &self.w,
            b: &self.b,
            c: &self.c_bias,
        }
    }

    fn params_mut(&mut self) -> RbmParamsMut<'_, W> {
        RbmParamsMut {
            w: &mut self.w,
            b: &mut self.b,
            c: &mut self.c_bias,
        }
    }

    /// One visible bias per channel, from the mean of the channel over the data.
    fn init_visible_biases(&mut self, data: &[Vec<W>]) {
        if data.is_empty() {
            return;
        }
        let map_v = self.nv1 * self.nv2;
        let count = (data.len() * map_v) as f64;
        for ch in 0..self.nc {
            let mean = data
                .iter()
                .map(|sample| sample[ch * map_v..(ch + 1) * map_v].iter().map(|x| x.as_f64()).sum::<f64>())
                .sum::<f64>()
                / count;
            self.c_bias[ch] = match self.visible_unit {
                UnitType::Gaussian => W::cast(mean),
                _ => {
                    let p = mean.clamp(MIN_PROBABILITY, 1.0 - MIN_PROBABILITY);
                    W::cast((p / (1.0 - p)).ln())
                }
            };
        }
    }

    fn backup(&mut self) {
        self.backup.save(&self.w, &self.b, &self.c_bias);
    }

    fn restore(&mut self) -> bool {
        self.backup.restore(&mut self.w, &mut self.b, &mut self.c_bias)
    }
}
