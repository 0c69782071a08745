//! Layer descriptors
//!
//! A descriptor pairs the structural dimensions of a layer with a list of
//! configuration tags ([`Param`]). Resolving it validates the list against the
//! tags the layer kind accepts, fills in defaults for every omitted tag and
//! checks the cross-field invariants. The result, [`RbmConfig`], is the only
//! thing a layer can be built from, so an invalid configuration never reaches
//! a layer constructor.
//!
//! Descriptors can be written in code with [`RbmDesc`] / [`ConvRbmMpDesc`] or
//! loaded from JSON with [`load_descriptor`]:
//!
//! ```json
//! {
//!   "layer": "rbm",
//!   "dimensions": [784, 500],
//!   "parameters": [{"batch_size": 64}, {"hidden": "relu"}, "momentum"]
//! }
//! ```

use crate::error::ConfigurationError;
use crate::get_value;
use crate::params::{
    self, BiasMode, DecayType, Param, ParamKind, SparsityMethod, TrainerKind, UnitType,
    WatcherKind, WeightType, CONV_RBM_MP_PARAMS, RBM_PARAMS,
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fs;

/// Kind of layer a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Dense RBM: `[num_visible, num_hidden]`.
    Rbm,
    /// Convolutional RBM with probabilistic max pooling:
    /// `[nc, nv1, nv2, k, nh1, nh2, c]`.
    ConvRbmMp,
}

impl LayerKind {
    /// Number of structural dimensions the layer kind takes.
    pub fn arity(&self) -> usize {
        match self {
            LayerKind::Rbm => 2,
            LayerKind::ConvRbmMp => 7,
        }
    }

    /// Tags accepted by the layer kind.
    pub fn allowed_params(&self) -> &'static [ParamKind] {
        match self {
            LayerKind::Rbm => RBM_PARAMS,
            LayerKind::ConvRbmMp => CONV_RBM_MP_PARAMS,
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Rbm => f.write_str("RBM"),
            LayerKind::ConvRbmMp => f.write_str("CRBM(MP)"),
        }
    }
}

/// Structural dimensions of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimensions {
    Dense {
        num_visible: usize,
        num_hidden: usize,
    },
    ConvMp {
        /// Input channels.
        nc: usize,
        nv1: usize,
        nv2: usize,
        /// Number of filters.
        k: usize,
        nh1: usize,
        nh2: usize,
        /// Pooling ratio.
        c: usize,
    },
}

impl Dimensions {
    /// Build dimensions from a flat list, checking the arity of the layer kind.
    pub fn from_slice(kind: LayerKind, dims: &[usize]) -> Result<Self, ConfigurationError> {
        if dims.len() != kind.arity() {
            return Err(ConfigurationError::DimensionArity {
                layer: kind,
                expected: kind.arity(),
                found: dims.len(),
            });
        }

        Ok(match kind {
            LayerKind::Rbm => Dimensions::Dense {
                num_visible: dims[0],
                num_hidden: dims[1],
            },
            LayerKind::ConvRbmMp => Dimensions::ConvMp {
                nc: dims[0],
                nv1: dims[1],
                nv2: dims[2],
                k: dims[3],
                nh1: dims[4],
                nh2: dims[5],
                c: dims[6],
            },
        })
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Dimensions::Dense { .. } => LayerKind::Rbm,
            Dimensions::ConvMp { .. } => LayerKind::ConvRbmMp,
        }
    }

    fn check(&self) -> Result<(), ConfigurationError> {
        let named: Vec<(&'static str, usize)> = match *self {
            Dimensions::Dense {
                num_visible,
                num_hidden,
            } => vec![("num_visible", num_visible), ("num_hidden", num_hidden)],
            Dimensions::ConvMp {
                nc,
                nv1,
                nv2,
                k,
                nh1,
                nh2,
                c,
            } => vec![
                ("nv1", nv1),
                ("nv2", nv2),
                ("nh1", nh1),
                ("nh2", nh2),
                ("nc", nc),
                ("k", k),
                ("c", c),
            ],
        };

        if let Some(&(name, _)) = named.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigurationError::DimensionTooSmall { name });
        }

        if let Dimensions::ConvMp {
            nv1, nv2, nh1, nh2, ..
        } = *self
        {
            for (axis, (visible, hidden)) in [(nv1, nh1), (nv2, nh2)].into_iter().enumerate() {
                if visible < hidden {
                    return Err(ConfigurationError::FilterLargerThanInput {
                        axis,
                        visible,
                        hidden,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Boolean options of a resolved configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub momentum: bool,
    pub clip_gradients: bool,
    pub parallel_mode: bool,
    pub serial: bool,
    pub verbose: bool,
    pub shuffle: bool,
    pub dbn_only: bool,
    pub init_weights: bool,
    pub free_energy: bool,
}

impl Flags {
    /// Whether batch rows are processed on the rayon pool. `serial` wins over
    /// `parallel_mode`.
    pub fn parallel(&self) -> bool {
        self.parallel_mode && !self.serial
    }
}

/// Capabilities a container can query without building the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerTraits {
    pub is_dense: bool,
    pub is_conv: bool,
    pub is_pooling: bool,
    pub is_rbm: bool,
    /// Whether the layer should be pretrained when it is the last of a stack.
    pub pretrain_last: bool,
    /// Whether the layer supports supervised fine-tuning by SGD.
    pub sgd_supported: bool,
}

/// Fully resolved layer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RbmConfig {
    dims: Dimensions,
    batch_size: usize,
    visible_unit: UnitType,
    hidden_unit: UnitType,
    pooling_unit: UnitType,
    sparsity: SparsityMethod,
    bias: BiasMode,
    decay: DecayType,
    weight_type: WeightType,
    trainer: TrainerKind,
    watcher: WatcherKind,
    flags: Flags,
}

impl RbmConfig {
    pub fn kind(&self) -> LayerKind {
        self.dims.kind()
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn visible_unit(&self) -> UnitType {
        self.visible_unit
    }

    pub fn hidden_unit(&self) -> UnitType {
        self.hidden_unit
    }

    pub fn pooling_unit(&self) -> UnitType {
        self.pooling_unit
    }

    pub fn sparsity(&self) -> SparsityMethod {
        self.sparsity
    }

    pub fn bias(&self) -> BiasMode {
        self.bias
    }

    pub fn decay(&self) -> DecayType {
        self.decay
    }

    pub fn weight_type(&self) -> WeightType {
        self.weight_type
    }

    pub fn trainer(&self) -> TrainerKind {
        self.trainer
    }

    pub fn watcher(&self) -> WatcherKind {
        self.watcher
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    /// Number of visible units per sample.
    pub fn num_visible(&self) -> usize {
        match self.dims {
            Dimensions::Dense { num_visible, .. } => num_visible,
            Dimensions::ConvMp { nc, nv1, nv2, .. } => nc * nv1 * nv2,
        }
    }

    /// Number of hidden (detection) units per sample.
    pub fn num_hidden(&self) -> usize {
        match self.dims {
            Dimensions::Dense { num_hidden, .. } => num_hidden,
            Dimensions::ConvMp { k, nh1, nh2, .. } => k * nh1 * nh2,
        }
    }

    pub fn input_size(&self) -> usize {
        self.num_visible()
    }

    /// Number of values the layer feeds to the next one. For pooling layers
    /// these are the pooling units.
    pub fn output_size(&self) -> usize {
        match self.dims {
            Dimensions::Dense { num_hidden, .. } => num_hidden,
            Dimensions::ConvMp { k, nh1, nh2, c, .. } => k * (nh1 / c) * (nh2 / c),
        }
    }

    /// Number of weights (biases are not counted).
    pub fn parameter_count(&self) -> usize {
        match self.dims {
            Dimensions::Dense {
                num_visible,
                num_hidden,
            } => num_visible * num_hidden,
            Dimensions::ConvMp {
                nc,
                nv1,
                nv2,
                k,
                nh1,
                nh2,
                ..
            } => k * nc * (nv1 - nh1 + 1) * (nv2 - nh2 + 1),
        }
    }

    pub fn traits(&self) -> LayerTraits {
        match self.dims {
            Dimensions::Dense { .. } => LayerTraits {
                is_dense: true,
                is_conv: false,
                is_pooling: false,
                is_rbm: true,
                pretrain_last: self.hidden_unit != UnitType::Softmax,
                sgd_supported: true,
            },
            Dimensions::ConvMp { .. } => LayerTraits {
                is_dense: false,
                is_conv: true,
                is_pooling: true,
                is_rbm: true,
                pretrain_last: true,
                sgd_supported: false,
            },
        }
    }

    /// One-line description of the layer.
    pub fn to_short_string(&self) -> String {
        match self.dims {
            Dimensions::Dense {
                num_visible,
                num_hidden,
            } => format!(
                "RBM: {}({}) -> {}({})",
                num_visible, self.visible_unit, num_hidden, self.hidden_unit
            ),
            Dimensions::ConvMp {
                nc,
                nv1,
                nv2,
                k,
                nh1,
                nh2,
                c,
            } => format!(
                "CRBM_MP: {}x{}x{}({}) -> {}x{}x{}({}) -> {}x{}x{}({})",
                nc,
                nv1,
                nv2,
                self.visible_unit,
                k,
                nh1,
                nh2,
                self.hidden_unit,
                k,
                nh1 / c,
                nh2 / c,
                self.pooling_unit
            ),
        }
    }
}

/// Resolve a layer configuration.
///
/// # Errors
///
/// In this order: an illegal or repeated tag, a wrong number of dimensions,
/// a zero dimension, a filter larger than its input, a zero batch size,
/// sparsity on non-binary hidden units, a trainer with zero steps, unit kinds
/// the layer cannot sample, and a pooling ratio that does not divide the hidden
/// extents.
pub fn resolve(
    kind: LayerKind,
    dims: &[usize],
    params: &[Param],
) -> Result<RbmConfig, ConfigurationError> {
    params::validate(params, kind.allowed_params(), kind)?;
    let dims = Dimensions::from_slice(kind, dims)?;

    let config = RbmConfig {
        dims,
        batch_size: get_value!(params, Param::BatchSize, 1),
        visible_unit: get_value!(params, Param::Visible, UnitType::Binary),
        hidden_unit: get_value!(params, Param::Hidden, UnitType::Binary),
        pooling_unit: get_value!(params, Param::Pooling, UnitType::Binary),
        sparsity: get_value!(params, Param::Sparsity, SparsityMethod::None),
        bias: get_value!(params, Param::Bias, BiasMode::Simple),
        decay: get_value!(params, Param::WeightDecay, DecayType::None),
        weight_type: get_value!(params, Param::WeightType, WeightType::F64),
        trainer: get_value!(params, Param::Trainer, TrainerKind::Cd(1)),
        watcher: get_value!(params, Param::Watcher, WatcherKind::Silent),
        flags: Flags {
            momentum: params::contains(params, ParamKind::Momentum),
            clip_gradients: params::contains(params, ParamKind::ClipGradients),
            parallel_mode: params::contains(params, ParamKind::ParallelMode),
            serial: params::contains(params, ParamKind::Serial),
            verbose: params::contains(params, ParamKind::Verbose),
            shuffle: params::contains(params, ParamKind::Shuffle),
            dbn_only: params::contains(params, ParamKind::DbnOnly),
            init_weights: params::contains(params, ParamKind::InitWeights),
            free_energy: params::contains(params, ParamKind::FreeEnergy),
        },
    };

    config.dims.check()?;

    if config.batch_size == 0 {
        return Err(ConfigurationError::InvalidBatchSize);
    }

    if config.sparsity != SparsityMethod::None && config.hidden_unit != UnitType::Binary {
        return Err(ConfigurationError::IncompatibleSparsity {
            hidden: config.hidden_unit,
        });
    }

    if config.trainer.steps() == 0 {
        return Err(ConfigurationError::InvalidTrainerSteps);
    }

    if let Dimensions::ConvMp { nh1, nh2, c, .. } = config.dims {
        check_conv_mp_units(&config)?;
        for extent in [nh1, nh2] {
            if extent % c != 0 {
                return Err(ConfigurationError::PoolingRatioMismatch { ratio: c, extent });
            }
        }
    }

    Ok(config)
}

fn check_conv_mp_units(config: &RbmConfig) -> Result<(), ConfigurationError> {
    let unsupported = |role: &'static str, unit: UnitType| ConfigurationError::UnsupportedUnitKind {
        layer: LayerKind::ConvRbmMp,
        role,
        unit,
    };

    if !matches!(config.visible_unit, UnitType::Binary | UnitType::Gaussian) {
        return Err(unsupported("visible", config.visible_unit));
    }
    if config.hidden_unit != UnitType::Binary {
        return Err(unsupported("hidden", config.hidden_unit));
    }
    if config.pooling_unit != UnitType::Binary {
        return Err(unsupported("pooling", config.pooling_unit));
    }
    Ok(())
}

/// Descriptor of a dense RBM.
///
/// # Example
///
/// ```
/// use rust_rbm::config::RbmDesc;
/// use rust_rbm::params::{Param, UnitType};
///
/// let config = RbmDesc::new(784, 500)
///     .param(Param::BatchSize(64))
///     .param(Param::Hidden(UnitType::Relu))
///     .resolve()
///     .unwrap();
/// assert_eq!(config.output_size(), 500);
/// assert_eq!(config.batch_size(), 64);
/// ```
#[derive(Debug, Clone)]
pub struct RbmDesc {
    num_visible: usize,
    num_hidden: usize,
    params: Vec<Param>,
}

impl RbmDesc {
    pub fn new(num_visible: usize, num_hidden: usize) -> Self {
        Self {
            num_visible,
            num_hidden,
            params: Vec::new(),
        }
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn params<I: IntoIterator<Item = Param>>(mut self, params: I) -> Self {
        self.params.extend(params);
        self
    }

    pub fn resolve(&self) -> Result<RbmConfig, ConfigurationError> {
        resolve(
            LayerKind::Rbm,
            &[self.num_visible, self.num_hidden],
            &self.params,
        )
    }
}

/// Descriptor of a convolutional RBM with probabilistic max pooling.
///
/// The input is `nc` channels of `nv1 x nv2`, the detection layer is `k`
/// feature maps of `nh1 x nh2` and the pooling layer groups `c x c` blocks of
/// detection units. Filters are `(nv1 - nh1 + 1) x (nv2 - nh2 + 1)`.
#[derive(Debug, Clone)]
pub struct ConvRbmMpDesc {
    dims: [usize; 7],
    params: Vec<Param>,
}

impl ConvRbmMpDesc {
    pub fn new(nc: usize, nv1: usize, nv2: usize, k: usize, nh1: usize, nh2: usize, c: usize) -> Self {
        Self {
            dims: [nc, nv1, nv2, k, nh1, nh2, c],
            params: Vec::new(),
        }
    }

    /// Square input and square detection maps.
    pub fn square(nc: usize, nv: usize, k: usize, nh: usize, c: usize) -> Self {
        Self::new(nc, nv, nv, k, nh, nh, c)
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn params<I: IntoIterator<Item = Param>>(mut self, params: I) -> Self {
        self.params.extend(params);
        self
    }

    pub fn resolve(&self) -> Result<RbmConfig, ConfigurationError> {
        resolve(LayerKind::ConvRbmMp, &self.dims, &self.params)
    }
}

/// Serialized form of a descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorConfig {
    /// Kind of layer: "rbm" or "conv_rbm_mp"
    pub layer: LayerKind,

    /// Structural dimensions, in the order of the layer kind
    pub dimensions: Vec<usize>,

    /// Configuration tags, e.g. `"momentum"` or `{"batch_size": 64}`
    #[serde(default)]
    pub parameters: Vec<Param>,
}

impl DescriptorConfig {
    pub fn resolve(&self) -> Result<RbmConfig, ConfigurationError> {
        resolve(self.layer, &self.dimensions, &self.parameters)
    }
}

/// Parse and resolve a descriptor from a JSON string.
pub fn parse_descriptor(contents: &str) -> Result<RbmConfig, Box<dyn Error>> {
    let descriptor: DescriptorConfig = serde_json::from_str(contents)?;
    Ok(descriptor.resolve()?)
}

/// Loads a layer descriptor from a JSON file and resolves it.
///
/// # Returns
///
/// `Ok(RbmConfig)` on success, or an error if the file cannot be read, the JSON
/// is invalid or the configuration is rejected.
///
/// # Examples
///
/// ```no_run
/// use rust_rbm::config::load_descriptor;
///
/// let config = load_descriptor("config/rbm_mnist.json").unwrap();
/// assert_eq!(config.input_size(), 784);
/// ```
pub fn load_descriptor(path: &str) -> Result<RbmConfig, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    parse_descriptor(&contents)
}
