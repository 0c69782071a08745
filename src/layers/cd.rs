//! Contrastive divergence state machine
//!
//! One training batch walks through
//!
//! ```text
//! Idle -> VisibleSampled -> HiddenSampledFromVisible -> VisibleReconstructed
//!      -> HiddenSampledFromReconstruction -> GradientComputed -> Idle
//! ```
//!
//! With `k` Gibbs steps the reconstruction / resampling pair is repeated `k`
//! times before the gradient is taken. Each state only depends on the buffers
//! written by the previous one, so the order is fixed; calling a transition
//! from the wrong state is a programming error and panics.

use crate::layers::RbmLayer;
use crate::params::TrainerKind;
use crate::utils::{SimpleRng, Weight};

/// Position of a batch in the CD state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdState {
    Idle,
    VisibleSampled,
    HiddenSampledFromVisible,
    VisibleReconstructed,
    HiddenSampledFromReconstruction,
    GradientComputed,
}

/// Gradients (or increments) of the three parameter tensors of an RBM.
#[derive(Debug, Clone, PartialEq)]
pub struct RbmGradients<W> {
    pub w: Vec<W>,
    /// Hidden biases.
    pub b: Vec<W>,
    /// Visible biases.
    pub c: Vec<W>,
}

impl<W: Weight> RbmGradients<W> {
    /// Zeroed gradients shaped like the parameters of `layer`.
    pub fn zeros_like<L: RbmLayer<Weight = W>>(layer: &L) -> Self {
        let params = layer.params();
        Self {
            w: vec![W::zero(); params.w.len()],
            b: vec![W::zero(); params.b.len()],
            c: vec![W::zero(); params.c.len()],
        }
    }

    pub fn fill_zero(&mut self) {
        self.w.fill(W::zero());
        self.b.fill(W::zero());
        self.c.fill(W::zero());
    }

    pub fn is_finite(&self) -> bool {
        self.w
            .iter()
            .chain(&self.b)
            .chain(&self.c)
            .all(|g| g.is_finite())
    }

    /// True if every gradient is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.w
            .iter()
            .chain(&self.b)
            .chain(&self.c)
            .all(|&g| g == W::zero())
    }
}

/// Batch buffers of one CD run, sized for `batch_size` rows.
///
/// The last batch of an epoch may be shorter; only the first `rows` rows of
/// every buffer are meaningful.
#[derive(Debug, Clone)]
pub struct CdBatch<W> {
    state: CdState,
    trainer: TrainerKind,
    steps_done: usize,
    rows: usize,
    batch_size: usize,
    num_visible: usize,
    num_hidden: usize,
    pub v1: Vec<W>,
    pub h1_a: Vec<W>,
    pub h1_s: Vec<W>,
    pub v2_a: Vec<W>,
    pub v2_s: Vec<W>,
    pub h2_a: Vec<W>,
    pub h2_s: Vec<W>,
    /// Hidden states of the persistent chain (PCD only).
    chain: Option<Vec<W>>,
}

impl<W: Weight> CdBatch<W> {
    pub fn new<L: RbmLayer<Weight = W>>(layer: &L, batch_size: usize, trainer: TrainerKind) -> Self {
        let nv = layer.input_size();
        let nh = layer.num_hidden_units();
        Self {
            state: CdState::Idle,
            trainer,
            steps_done: 0,
            rows: 0,
            batch_size,
            num_visible: nv,
            num_hidden: nh,
            v1: vec![W::zero(); batch_size * nv],
            h1_a: vec![W::zero(); batch_size * nh],
            h1_s: vec![W::zero(); batch_size * nh],
            v2_a: vec![W::zero(); batch_size * nv],
            v2_s: vec![W::zero(); batch_size * nv],
            h2_a: vec![W::zero(); batch_size * nh],
            h2_s: vec![W::zero(); batch_size * nh],
            chain: None,
        }
    }

    pub fn state(&self) -> CdState {
        self.state
    }

    /// Number of rows of the current batch.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn num_visible(&self) -> usize {
        self.num_visible
    }

    pub fn num_hidden(&self) -> usize {
        self.num_hidden
    }

    fn check_state(&self, expected: &[CdState], transition: &str) {
        assert!(
            expected.contains(&self.state),
            "invalid CD transition '{}' from state {:?}",
            transition,
            self.state
        );
    }

    fn visible_len(&self) -> usize {
        self.rows * self.num_visible
    }

    fn hidden_len(&self) -> usize {
        self.rows * self.num_hidden
    }

    /// Clamp the batch input into the visible buffer.
    ///
    /// # Panics
    ///
    /// Panics if `input` is not a whole number of rows, holds more rows than
    /// the batch size, or the batch is not idle.
    pub fn sample_visible(&mut self, input: &[W]) {
        self.check_state(&[CdState::Idle], "sample_visible");
        assert!(
            input.len() % self.num_visible == 0,
            "input length {} is not a multiple of {}",
            input.len(),
            self.num_visible
        );
        let rows = input.len() / self.num_visible;
        assert!(
            rows > 0 && rows <= self.batch_size,
            "batch of {} rows does not fit a batch size of {}",
            rows,
            self.batch_size
        );

        self.rows = rows;
        self.steps_done = 0;
        self.v1[..input.len()].copy_from_slice(input);
        self.state = CdState::VisibleSampled;
    }

    pub fn sample_hidden_from_visible<L: RbmLayer<Weight = W>>(
        &mut self,
        layer: &L,
        rng: &mut SimpleRng,
    ) {
        self.check_state(&[CdState::VisibleSampled], "sample_hidden_from_visible");
        let (nv, nh) = (self.visible_len(), self.hidden_len());
        layer.hidden_activations(&self.v1[..nv], &mut self.h1_a[..nh]);
        layer.sample_hidden(&self.h1_a[..nh], &mut self.h1_s[..nh], rng);
        self.state = CdState::HiddenSampledFromVisible;
    }

    /// Reconstruct the visible units from the current hidden states: the first
    /// step starts from `h1_s` (or the persistent chain), later steps from `h2_s`.
    pub fn reconstruct_visible<L: RbmLayer<Weight = W>>(
        &mut self,
        layer: &L,
        rng: &mut SimpleRng,
    ) {
        self.check_state(
            &[
                CdState::HiddenSampledFromVisible,
                CdState::HiddenSampledFromReconstruction,
            ],
            "reconstruct_visible",
        );
        let (nv, nh) = (self.visible_len(), self.hidden_len());

        let source: &[W] = match (self.state, self.chain.as_deref()) {
            (CdState::HiddenSampledFromVisible, Some(chain)) if chain.len() >= nh => &chain[..nh],
            (CdState::HiddenSampledFromVisible, _) => &self.h1_s[..nh],
            _ => &self.h2_s[..nh],
        };
        layer.visible_activations(source, &mut self.v2_a[..nv]);
        layer.sample_visible(&self.v2_a[..nv], &mut self.v2_s[..nv], rng);
        self.state = CdState::VisibleReconstructed;
    }

    /// Resample the hidden units from the reconstruction probabilities.
    pub fn sample_hidden_from_reconstruction<L: RbmLayer<Weight = W>>(
        &mut self,
        layer: &L,
        rng: &mut SimpleRng,
    ) {
        self.check_state(&[CdState::VisibleReconstructed], "sample_hidden_from_reconstruction");
        let (nv, nh) = (self.visible_len(), self.hidden_len());
        layer.hidden_activations(&self.v2_a[..nv], &mut self.h2_a[..nh]);
        layer.sample_hidden(&self.h2_a[..nh], &mut self.h2_s[..nh], rng);
        self.steps_done += 1;
        self.state = CdState::HiddenSampledFromReconstruction;
    }

    pub fn compute_gradients<L: RbmLayer<Weight = W>>(
        &mut self,
        layer: &L,
        grads: &mut RbmGradients<W>,
    ) {
        self.check_state(&[CdState::HiddenSampledFromReconstruction], "compute_gradients");
        let (nv, nh) = (self.visible_len(), self.hidden_len());
        layer.cd_gradients(
            &self.v1[..nv],
            &self.h1_a[..nh],
            &self.v2_a[..nv],
            &self.h2_a[..nh],
            grads,
        );
        self.state = CdState::GradientComputed;
    }

    /// Return to `Idle`. With a persistent trainer the last hidden states are
    /// kept as the start of the next batch's negative chain.
    ///
    /// The chain always holds `batch_size` rows: a short batch only advances
    /// its first `rows` rows and leaves the others where they were.
    pub fn finish(&mut self) {
        self.check_state(&[CdState::GradientComputed], "finish");
        if self.trainer.is_persistent() {
            let nh = self.hidden_len();
            let full = self.batch_size * self.num_hidden;
            let chain = self.chain.get_or_insert_with(|| self.h2_s[..full].to_vec());
            chain[..nh].copy_from_slice(&self.h2_s[..nh]);
        }
        self.state = CdState::Idle;
    }

    /// Forget the persistent chain.
    pub fn reset_chain(&mut self) {
        self.chain = None;
    }

    /// Run the whole state machine up to `GradientComputed`.
    pub fn run<L: RbmLayer<Weight = W>>(
        &mut self,
        layer: &L,
        input: &[W],
        rng: &mut SimpleRng,
        grads: &mut RbmGradients<W>,
    ) {
        self.sample_visible(input);
        self.sample_hidden_from_visible(layer, rng);
        for _ in 0..self.trainer.steps() {
            self.reconstruct_visible(layer, rng);
            self.sample_hidden_from_reconstruction(layer, rng);
        }
        self.compute_gradients(layer, grads);
    }

    /// Number of Gibbs steps run on the current batch.
    pub fn steps_done(&self) -> usize {
        self.steps_done
    }

    /// Mean squared difference between the input and its reconstruction.
    pub fn reconstruction_error(&self) -> f64 {
        let nv = self.visible_len();
        if nv == 0 {
            return 0.0;
        }
        let sum: f64 = self.v1[..nv]
            .iter()
            .zip(&self.v2_a[..nv])
            .map(|(&a, &b)| {
                let d = (a - b).as_f64();
                d * d
            })
            .sum();
        sum / nv as f64
    }

    /// Mean hidden activation probability of the positive phase.
    pub fn hidden_mean(&self) -> f64 {
        let nh = self.hidden_len();
        if nh == 0 {
            return 0.0;
        }
        self.h1_a[..nh].iter().map(|h| h.as_f64()).sum::<f64>() / nh as f64
    }
}
