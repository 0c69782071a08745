// Tests for RNG reproducibility and the distributions the units sample from.

use rust_rbm::utils::SimpleRng;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_deterministic() {
        let mut rng1 = SimpleRng::new(42);
        let mut rng2 = SimpleRng::new(42);

        for _ in 0..100 {
            assert_eq!(rng1.next_u32(), rng2.next_u32());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = SimpleRng::new(42);
        let mut rng2 = SimpleRng::new(43);

        let same = (0..100).filter(|_| rng1.next_u32() == rng2.next_u32()).count();
        assert!(same < 5);
    }

    #[test]
    fn test_rng_zero_seed() {
        let mut rng = SimpleRng::new(0);
        // The zero state would be a fixed point of xorshift
        let values: Vec<u32> = (0..10).map(|_| rng.next_u32()).collect();
        assert!(values.iter().any(|&v| v != 0));
    }

    #[test]
    fn test_gen_range() {
        let mut rng = SimpleRng::new(12345);

        for _ in 0..1000 {
            let val = rng.gen_range(-0.5, 0.5);
            assert!((-0.5..0.5).contains(&val));
        }
    }

    #[test]
    fn test_gen_usize() {
        let mut rng = SimpleRng::new(99999);

        for _ in 0..1000 {
            assert!(rng.gen_usize(10) < 10);
        }
        assert_eq!(rng.gen_usize(0), 0);
    }

    #[test]
    fn test_bernoulli_frequency() {
        let mut rng = SimpleRng::new(2024);
        let n = 20_000;
        let ones: f64 = (0..n).map(|_| rng.bernoulli(0.3)).sum();
        let freq = ones / n as f64;
        assert!((freq - 0.3).abs() < 0.02, "frequency {} too far from 0.3", freq);
    }

    #[test]
    fn test_normal_is_symmetric() {
        let mut rng = SimpleRng::new(77);
        let n = 20_000;
        let positive = (0..n).filter(|_| rng.next_normal() > 0.0).count();
        let ratio = positive as f64 / n as f64;
        assert!((ratio - 0.5).abs() < 0.02, "ratio {} too far from 0.5", ratio);
    }

    #[test]
    fn test_categorical_frequencies() {
        let mut rng = SimpleRng::new(31);
        let probs = [0.1, 0.2, 0.3, 0.4];
        let mut counts = [0usize; 4];
        let n = 20_000;
        for _ in 0..n {
            counts[rng.categorical(&probs)] += 1;
        }
        for (count, p) in counts.iter().zip(&probs) {
            let freq = *count as f64 / n as f64;
            assert!((freq - p).abs() < 0.02, "frequency {} too far from {}", freq, p);
        }
    }

    #[test]
    fn test_categorical_unnormalized() {
        let mut rng = SimpleRng::new(31);
        // Weights need not sum to 1
        for _ in 0..100 {
            assert_eq!(rng.categorical(&[0.0, 0.0, 5.0]), 2);
        }
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut rng = SimpleRng::new(33333);
        let mut data: Vec<usize> = (0..50).collect();
        rng.shuffle_usize(&mut data);

        let mut sorted = data.clone();
        sorted.sort();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
        assert_ne!(data, sorted);
    }

    #[test]
    fn test_shuffle_reproducible() {
        let mut a: Vec<usize> = (0..20).collect();
        let mut b = a.clone();
        SimpleRng::new(5).shuffle_usize(&mut a);
        SimpleRng::new(5).shuffle_usize(&mut b);
        assert_eq!(a, b);
    }
}
