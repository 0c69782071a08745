//! Layer stack configuration
//!
//! A stack is an ordered list of layer descriptors, as they would be fed to a
//! deep belief network: the output of layer `i` is the input of layer `i + 1`.
//! Stacks are loaded from JSON, every descriptor is resolved, the connections
//! are checked with the size queries of the resolved configurations, and a
//! buffer plan is derived so a container can allocate its batch buffers
//! before any layer is built.

use crate::config::{DescriptorConfig, LayerKind, RbmConfig};
use crate::layers::{ConvRbmMp, Layer, Rbm};
use crate::utils::rng::SimpleRng;
use crate::utils::Weight;
use serde::Deserialize;
use std::error::Error;
use std::fs;

/// Serialized form of a stack.
///
/// # Example
///
/// ```json
/// {
///   "layers": [
///     {"layer": "rbm", "dimensions": [784, 500], "parameters": [{"batch_size": 64}]},
///     {"layer": "rbm", "dimensions": [500, 10], "parameters": [{"hidden": "softmax"}]}
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct StackConfig {
    /// Layer descriptors, from the input layer up
    pub layers: Vec<DescriptorConfig>,
}

/// Batch buffer sizes of one layer of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPlan {
    pub batch_size: usize,
    /// `batch_size × input_size`
    pub input: usize,
    /// `batch_size × hidden units`
    pub hidden: usize,
    /// `batch_size × output_size`
    pub output: usize,
    pub parameters: usize,
}

impl BufferPlan {
    fn for_config(config: &RbmConfig) -> Self {
        let batch_size = config.batch_size();
        Self {
            batch_size,
            input: batch_size * config.input_size(),
            hidden: batch_size * config.num_hidden(),
            output: batch_size * config.output_size(),
            parameters: config.parameter_count(),
        }
    }
}

/// A validated stack: resolved configurations and their buffer plans.
#[derive(Debug, Clone, PartialEq)]
pub struct StackPlan {
    pub layers: Vec<RbmConfig>,
    pub buffers: Vec<BufferPlan>,
}

impl StackPlan {
    /// Input size of the first layer.
    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |l| l.input_size())
    }

    /// Output size of the last layer.
    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |l| l.output_size())
    }

    /// Total number of weights of the stack.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.parameter_count()).sum()
    }
}

/// Loads a stack from a JSON file, resolving and validating every layer.
///
/// # Returns
///
/// `Ok(StackPlan)` on success, or an error if the file cannot be read, the JSON
/// is invalid, a descriptor is rejected or two layers do not connect.
///
/// # Examples
///
/// ```no_run
/// use rust_rbm::architecture::load_stack;
///
/// let plan = load_stack("config/dbn_mnist.json").unwrap();
/// assert_eq!(plan.input_size(), 784);
/// ```
pub fn load_stack(path: &str) -> Result<StackPlan, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    parse_stack(&contents)
}

/// Parse, resolve and validate a stack from a JSON string.
pub fn parse_stack(contents: &str) -> Result<StackPlan, Box<dyn Error>> {
    let config: StackConfig = serde_json::from_str(contents)?;
    plan_stack(&config)
}

/// Resolve every descriptor of a stack and check its connections.
pub fn plan_stack(config: &StackConfig) -> Result<StackPlan, Box<dyn Error>> {
    let mut layers = Vec::with_capacity(config.layers.len());
    for (i, descriptor) in config.layers.iter().enumerate() {
        let resolved = descriptor.resolve().map_err(|e| {
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Layer {}: {}", i, e),
            )) as Box<dyn Error>
        })?;
        layers.push(resolved);
    }

    validate_stack(&layers)?;

    let buffers = layers.iter().map(BufferPlan::for_config).collect();
    Ok(StackPlan { layers, buffers })
}

/// Validates a list of resolved layers.
///
/// Checks that:
/// - The stack has at least one layer
/// - The output size of layer i matches the input size of layer i+1
///
/// # Errors
///
/// Returns an error if validation fails with a descriptive message.
pub fn validate_stack(layers: &[RbmConfig]) -> Result<(), Box<dyn Error>> {
    if layers.is_empty() {
        return Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Stack must have at least one layer",
        )));
    }

    for (i, pair) in layers.windows(2).enumerate() {
        let current_output = pair[0].output_size();
        let next_input = pair[1].input_size();

        if current_output != next_input {
            return Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "Layer connection mismatch: Layer {} output size ({}) does not match Layer {} input size ({})",
                    i,
                    current_output,
                    i + 1,
                    next_input
                ),
            )));
        }
    }

    Ok(())
}

/// Builds the layers of a stack plan.
///
/// # Errors
///
/// Returns an error if a configuration cannot be built with element type `W`.
///
/// # Examples
///
/// ```no_run
/// use rust_rbm::architecture::{build_stack, load_stack};
/// use rust_rbm::utils::rng::SimpleRng;
///
/// let plan = load_stack("config/dbn_mnist.json").unwrap();
/// let mut rng = SimpleRng::new(42);
/// let layers = build_stack::<f64>(&plan, &mut rng).unwrap();
/// assert_eq!(layers.len(), plan.layers.len());
/// ```
pub fn build_stack<W: Weight>(
    plan: &StackPlan,
    rng: &mut SimpleRng,
) -> Result<Vec<Box<dyn Layer<Weight = W>>>, Box<dyn Error>> {
    let mut layers: Vec<Box<dyn Layer<Weight = W>>> = Vec::with_capacity(plan.layers.len());

    for config in &plan.layers {
        match config.kind() {
            LayerKind::Rbm => layers.push(Box::new(Rbm::<W>::new(config.clone(), rng)?)),
            LayerKind::ConvRbmMp => layers.push(Box::new(ConvRbmMp::<W>::new(config.clone(), rng)?)),
        }
    }

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConvRbmMpDesc, RbmDesc};
    use crate::params::Param;

    const DBN: &str = r#"{
        "layers": [
            {"layer": "rbm", "dimensions": [784, 500], "parameters": [{"batch_size": 64}]},
            {"layer": "rbm", "dimensions": [500, 10], "parameters": [{"hidden": "softmax"}]}
        ]
    }"#;

    #[test]
    fn test_parse_stack() {
        let plan = parse_stack(DBN).unwrap();
        assert_eq!(plan.layers.len(), 2);
        assert_eq!(plan.input_size(), 784);
        assert_eq!(plan.output_size(), 10);
        assert_eq!(plan.parameter_count(), 784 * 500 + 500 * 10);
        assert_eq!(
            plan.buffers[0],
            BufferPlan {
                batch_size: 64,
                input: 64 * 784,
                hidden: 64 * 500,
                output: 64 * 500,
                parameters: 784 * 500,
            }
        );
    }

    #[test]
    fn test_validate_empty_stack() {
        assert!(validate_stack(&[]).is_err());
        assert!(parse_stack(r#"{"layers": []}"#).is_err());
    }

    #[test]
    fn test_validate_connection_mismatch() {
        let layers = vec![
            RbmDesc::new(784, 500).resolve().unwrap(),
            RbmDesc::new(400, 10).resolve().unwrap(),
        ];
        let err = validate_stack(&layers).unwrap_err();
        assert!(err.to_string().contains("Layer 0 output size (500)"));
    }

    #[test]
    fn test_conv_connects_through_pooling() {
        // 2 filters of 8x8 pooled by 2: 2 * 4 * 4 = 32 outputs
        let layers = vec![
            ConvRbmMpDesc::square(1, 12, 2, 8, 2).resolve().unwrap(),
            RbmDesc::new(32, 10).resolve().unwrap(),
        ];
        assert!(validate_stack(&layers).is_ok());
    }

    #[test]
    fn test_invalid_descriptor_names_layer() {
        let json = r#"{"layers": [
            {"layer": "rbm", "dimensions": [10, 5]},
            {"layer": "rbm", "dimensions": [5, 3], "parameters": ["pooling"]}
        ]}"#;
        // "pooling" carries a unit type, so a bare string does not deserialize
        assert!(parse_stack(json).is_err());

        let json = r#"{"layers": [
            {"layer": "rbm", "dimensions": [10, 5]},
            {"layer": "rbm", "dimensions": [5, 3], "parameters": [{"pooling": "binary"}]}
        ]}"#;
        let err = parse_stack(json).unwrap_err();
        assert!(err.to_string().starts_with("Layer 1:"));
    }

    #[test]
    fn test_build_stack() {
        let layers = vec![
            RbmDesc::new(6, 4).param(Param::BatchSize(2)).resolve().unwrap(),
            RbmDesc::new(4, 2).resolve().unwrap(),
        ];
        let plan = StackPlan {
            buffers: layers.iter().map(BufferPlan::for_config).collect(),
            layers,
        };
        let built = build_stack::<f64>(&plan, &mut SimpleRng::new(1)).unwrap();
        assert_eq!(built.len(), 2);
        assert_eq!(built[0].output_size(), built[1].input_size());
        assert_eq!(built[1].to_short_string(), "RBM: 4(BINARY) -> 2(BINARY)");
        assert!(build_stack::<f32>(&plan, &mut SimpleRng::new(1)).is_err());
    }
}
