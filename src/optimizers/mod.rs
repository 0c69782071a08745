//! Training contexts for supervised fine-tuning
//!
//! Once a layer has been pretrained with contrastive divergence it can be
//! fine-tuned with an error signal coming from the layers above it. Each
//! fine-tuning algorithm keeps its own per-layer buffers:
//!
//! - [`SgdContext`]: batch gradients, momentum increments and the
//!   input/output/error buffers of the current batch, updated by [`Sgd`]
//! - [`CgContext`]: the line search and search direction buffers of a
//!   conjugate gradient run
//!
//! # Example
//!
//! ```no_run
//! use rust_rbm::config::RbmDesc;
//! use rust_rbm::layers::Rbm;
//! use rust_rbm::optimizers::{Sgd, SgdContext};
//! use rust_rbm::utils::SimpleRng;
//!
//! let config = RbmDesc::new(784, 10).resolve().unwrap();
//! let mut layer = Rbm::<f64>::new(config, &mut SimpleRng::new(42)).unwrap();
//! let mut context = SgdContext::new(&layer, 1).unwrap();
//! let input = vec![0.0; 784];
//! let target = vec![0.0; 10];
//! let loss = Sgd::new(0.1).with_momentum(0.9).step(&mut layer, &mut context, &input, &target);
//! ```

pub mod cg;
pub mod sgd;

pub use cg::CgContext;
pub use sgd::{Sgd, SgdContext};
