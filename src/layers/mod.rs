//! RBM layers
//!
//! This module provides the layer traits and the RBM implementations:
//! - [`Rbm`]: dense RBM whose shape comes from a resolved descriptor
//! - [`DynRbm`]: dense RBM whose shape is chosen at runtime
//! - [`ConvRbmMp`]: convolutional RBM with probabilistic max pooling
//!
//! and the contrastive divergence state machine ([`cd`]) that drives them.

mod r#trait;
pub mod cd;
pub mod conv_rbm_mp;
pub mod dyn_rbm;
pub mod rbm;
pub mod standard;

pub use cd::{CdBatch, CdState, RbmGradients};
pub use conv_rbm_mp::ConvRbmMp;
pub use dyn_rbm::DynRbm;
pub use r#trait::{FineTune, Layer, RbmLayer, RbmParams, RbmParamsMut};
pub use rbm::Rbm;
