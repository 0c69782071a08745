//! Tests for the fine-tuning contexts
//!
//! This file tests the optimizers module including:
//! - SGD context buffers and the momentum update rule
//! - Backpropagation through a stack of two RBM layers
//! - Conjugate gradient buffers and direction updates

use approx::assert_relative_eq;
use rust_rbm::config::{ConvRbmMpDesc, RbmDesc};
use rust_rbm::layers::{ConvRbmMp, FineTune, Rbm, RbmLayer};
use rust_rbm::optimizers::{CgContext, Sgd, SgdContext};
use rust_rbm::params::{Param, UnitType};
use rust_rbm::utils::SimpleRng;

fn build(nv: usize, nh: usize, params: Vec<Param>, seed: u64) -> Rbm<f64> {
    let config = RbmDesc::new(nv, nh).params(params).resolve().unwrap();
    Rbm::new(config, &mut SimpleRng::new(seed)).unwrap()
}

// ============================================================================
// SGD Context Tests
// ============================================================================

mod sgd_context_tests {
    use super::*;

    #[test]
    fn test_buffer_sizes() {
        let layer = build(20, 10, vec![], 1);
        let ctx = SgdContext::new(&layer, 8).unwrap();

        assert_eq!(ctx.batch_size(), 8);
        assert_eq!(ctx.num_visible(), 20);
        assert_eq!(ctx.num_hidden(), 10);
        assert_eq!(ctx.w_grad.len(), 200);
        assert_eq!(ctx.w_inc.len(), 200);
        assert_eq!(ctx.b_grad.len(), 10);
        assert_eq!(ctx.b_inc.len(), 10);
        assert_eq!(ctx.input.len(), 160);
        assert_eq!(ctx.output.len(), 80);
        assert_eq!(ctx.errors.len(), 80);
    }

    #[test]
    fn test_partial_batch() {
        let layer = build(3, 2, vec![], 1);
        let mut ctx = SgdContext::new(&layer, 4).unwrap();
        ctx.load_input(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        assert_eq!(ctx.rows(), 2);
        assert_eq!(ctx.batch_input(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(ctx.batch_output().len(), 4);
        assert_eq!(ctx.batch_errors().len(), 4);
    }

    #[test]
    fn test_set_errors_returns_half_mse() {
        let layer = build(3, 2, vec![], 1);
        let mut ctx = SgdContext::new(&layer, 1).unwrap();
        ctx.output.copy_from_slice(&[0.25, 0.75]);

        let loss = ctx.set_errors(&[1.0, 0.0]);
        assert_eq!(ctx.errors, vec![0.75, -0.75]);
        assert_relative_eq!(loss, 0.5 * (0.5625 + 0.5625), epsilon = 1e-12);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_oversized_input_panics() {
        let layer = build(2, 2, vec![], 1);
        let mut ctx = SgdContext::new(&layer, 1).unwrap();
        ctx.load_input(&[1.0, 2.0, 3.0, 4.0]);
    }
}

// ============================================================================
// SGD Update Tests
// ============================================================================

mod sgd_update_tests {
    use super::*;

    #[test]
    fn test_plain_update() {
        let sgd = Sgd::new(0.1);
        let mut params = vec![1.0f64, -1.0];
        let mut incs = vec![0.0f64, 0.0];
        sgd.update(&mut params, &[2.0, -4.0], &mut incs, 1, true);

        assert_relative_eq!(params[0], 1.2, epsilon = 1e-12);
        assert_relative_eq!(params[1], -1.4, epsilon = 1e-12);
    }

    #[test]
    fn test_momentum_accumulates() {
        let sgd = Sgd::new(1.0).with_momentum(0.5);
        let mut params = vec![0.0f64];
        let mut incs = vec![0.0f64];
        sgd.update(&mut params, &[1.0], &mut incs, 1, false);
        sgd.update(&mut params, &[1.0], &mut incs, 1, false);

        // 1 then 0.5 + 1
        assert_relative_eq!(incs[0], 1.5, epsilon = 1e-12);
        assert_relative_eq!(params[0], 2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_weight_cost_only_when_decaying() {
        let sgd = Sgd::new(1.0).with_weight_cost(0.5);
        let mut decayed = vec![2.0f64];
        let mut kept = vec![2.0f64];
        sgd.update(&mut decayed, &[0.0], &mut [0.0f64], 1, true);
        sgd.update(&mut kept, &[0.0], &mut [0.0f64], 1, false);

        assert_relative_eq!(decayed[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(kept[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_softmax_layer_learns_targets() {
        let mut layer = build(4, 2, vec![Param::Hidden(UnitType::Softmax), Param::BatchSize(2)], 9);
        let mut ctx = SgdContext::new(&layer, 2).unwrap();
        let sgd = Sgd::new(0.5).with_momentum(0.5);

        let input = [1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0];
        let target = [1.0, 0.0, 0.0, 1.0];
        let first = sgd.step(&mut layer, &mut ctx, &input, &target);
        let mut last = first;
        for _ in 0..100 {
            last = sgd.step(&mut layer, &mut ctx, &input, &target);
        }

        assert!(last < first * 0.1, "loss went from {} to {}", first, last);
    }
}

// ============================================================================
// Backpropagation Tests
// ============================================================================

mod backprop_tests {
    use super::*;

    #[test]
    fn test_errors_flow_to_the_lower_layer() {
        let lower = build(6, 4, vec![Param::BatchSize(2)], 3);
        let upper = build(4, 2, vec![Param::BatchSize(2), Param::Hidden(UnitType::Softmax)], 4);
        let mut lower_ctx = SgdContext::new(&lower, 2).unwrap();
        let mut upper_ctx = SgdContext::new(&upper, 2).unwrap();

        let input = [1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        lower_ctx.load_input(&input);
        lower.forward_batch(&input, &mut lower_ctx.output);

        let hidden = lower_ctx.output.clone();
        upper_ctx.load_input(&hidden);
        upper.forward_batch(&hidden, &mut upper_ctx.output);
        upper_ctx.set_errors(&[1.0, 0.0, 0.0, 1.0]);
        upper.adapt_errors(&mut upper_ctx);

        // upper errors · Wᵀ, then through the sigmoid of the lower layer
        upper.backward_batch(&mut lower_ctx.errors, &upper_ctx);
        let w = upper.params().w;
        for row in 0..2 {
            for i in 0..4 {
                let expected: f64 = (0..2).map(|j| upper_ctx.errors[row * 2 + j] * w[i * 2 + j]).sum();
                assert_relative_eq!(lower_ctx.errors[row * 4 + i], expected, epsilon = 1e-12);
            }
        }

        let propagated = lower_ctx.errors.clone();
        lower.adapt_errors(&mut lower_ctx);
        for ((e, p), y) in lower_ctx.errors.iter().zip(&propagated).zip(&hidden) {
            assert_relative_eq!(*e, p * y * (1.0 - y), epsilon = 1e-12);
        }

        lower.compute_gradients(&mut lower_ctx);
        assert!(lower_ctx.w_grad.iter().all(|g| g.is_finite()));
        assert!(lower_ctx.w_grad.iter().any(|&g| g != 0.0));
    }
}

// ============================================================================
// Conjugate Gradient Tests
// ============================================================================

mod cg_tests {
    use super::*;

    #[test]
    fn test_buffer_sizes() {
        let layer = build(10, 5, vec![], 1);
        let ctx = CgContext::new(&layer);

        for buffer in [&ctx.w_incs, &ctx.w_best, &ctx.w_best_incs, &ctx.w_df0, &ctx.w_df3, &ctx.w_s, &ctx.w_tmp] {
            assert_eq!(buffer.len(), 50);
        }
        for buffer in [&ctx.b_incs, &ctx.b_best, &ctx.b_best_incs, &ctx.b_df0, &ctx.b_df3, &ctx.b_s, &ctx.b_tmp] {
            assert_eq!(buffer.len(), 5);
        }
    }

    #[test]
    fn test_conv_layer_bias_buffers_follow_the_filters() {
        // 2 filters of 3x3 over a 6x6 image, 4x4 detection maps pooled by 2
        let config = ConvRbmMpDesc::square(1, 6, 2, 4, 2).resolve().unwrap();
        let layer = ConvRbmMp::<f64>::new(config, &mut SimpleRng::new(1)).unwrap();
        let mut ctx = CgContext::new(&layer);

        assert_eq!(ctx.w_best.len(), 18);
        for buffer in [&ctx.b_incs, &ctx.b_best, &ctx.b_best_incs, &ctx.b_df0, &ctx.b_df3, &ctx.b_s, &ctx.b_tmp] {
            assert_eq!(buffer.len(), 2);
        }

        ctx.b_incs.fill(0.25);
        ctx.commit_best(&layer);
        assert_eq!(ctx.b_best, layer.params().b.to_vec());
        assert_eq!(ctx.b_best_incs, vec![0.25, 0.25]);

        ctx.w_df0.fill(1.0);
        ctx.b_df0.fill(1.0);
        ctx.w_df3.fill(2.0);
        ctx.b_df3.fill(2.0);
        ctx.reset_direction();
        assert!(ctx.update_direction() > 0.0);

        let inputs: Vec<Vec<f64>> = (0..3).map(|i| vec![(i % 2) as f64; 36]).collect();
        ctx.prepare_run(inputs.len());
        ctx.refresh_probs(&layer, &inputs, &mut SimpleRng::new(2));
        assert!(ctx.probs_a.iter().all(|p| p.len() == 32));
    }

    #[test]
    fn test_per_example_buffers_grow_with_the_run() {
        let layer = build(4, 3, vec![], 1);
        let mut ctx = CgContext::new(&layer);
        let inputs: Vec<Vec<f64>> = (0..100).map(|i| vec![(i % 2) as f64; 4]).collect();

        ctx.prepare_run(inputs.len());
        ctx.refresh_probs(&layer, &inputs, &mut SimpleRng::new(1));
        assert_eq!(ctx.probs_a.len(), 100);
        assert_eq!(ctx.probs_s.len(), 100);
        assert_eq!(ctx.probs_a[0], ctx.probs_a[2]);
    }

    #[test]
    fn test_negative_beta_restarts_search() {
        let layer = build(2, 1, vec![], 1);
        let mut ctx = CgContext::new(&layer);
        ctx.w_df0.fill(1.0);
        ctx.b_df0.fill(1.0);
        ctx.reset_direction();

        // new gradient opposite to the old one
        ctx.w_df3.fill(-1.0);
        ctx.b_df3.fill(-1.0);
        let beta = ctx.update_direction();

        assert_eq!(beta, 0.0);
        assert!(ctx.w_s.iter().all(|&s| s == 1.0));
        assert!(ctx.b_s.iter().all(|&s| s == 1.0));
    }
}
