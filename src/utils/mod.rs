//! Shared numeric utilities
//!
//! This module provides the weight element type, random number generation,
//! unit activation functions and the row-major matrix kernels the layers call.

pub mod activations;
pub mod matrix;
pub mod rng;
pub mod weight;

pub use activations::{sigmoid, softmax_rows, Function};
pub use rng::SimpleRng;
pub use weight::Weight;
