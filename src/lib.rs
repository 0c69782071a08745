//! Rust RBM Library
//!
//! Restricted Boltzmann Machine layers trained by contrastive divergence,
//! configured by a list of tags resolved into a validated configuration.
//!
//! # Modules
//!
//! - `params`: Configuration tags and their defaults
//! - `config`: Layer descriptors, resolution and JSON loading
//! - `layers`: Layer traits, dense / dynamic / convolutional RBMs, CD state machine
//! - `trainer`: CD-k and PCD-k training, progress watchers
//! - `optimizers`: SGD and conjugate gradient contexts for fine-tuning
//! - `architecture`: Layer stacks and buffer planning
//! - `utils`: Shared utilities (RNG, activation functions, matrix kernels)
//! - `error`: Configuration errors
//!
//! # Example
//!
//! ```no_run
//! use rust_rbm::config::RbmDesc;
//! use rust_rbm::layers::Rbm;
//! use rust_rbm::params::{Param, TrainerKind};
//! use rust_rbm::trainer::{CdTrainer, TrainingParams};
//! use rust_rbm::utils::SimpleRng;
//!
//! let config = RbmDesc::new(784, 500)
//!     .params([Param::BatchSize(64), Param::Momentum, Param::Trainer(TrainerKind::Pcd(1))])
//!     .resolve()
//!     .unwrap();
//! let mut rbm = Rbm::<f64>::new(config, &mut SimpleRng::new(42)).unwrap();
//!
//! let data: Vec<Vec<f64>> = vec![vec![0.0; 784]; 256];
//! let mut trainer = CdTrainer::new(&rbm, TrainingParams::default());
//! let error = trainer.train(&mut rbm, &data, 10);
//! ```

pub mod architecture;
pub mod config;
pub mod error;
pub mod layers;
pub mod optimizers;
pub mod params;
pub mod trainer;
pub mod utils;

pub use config::{RbmConfig, RbmDesc};
pub use error::ConfigurationError;
