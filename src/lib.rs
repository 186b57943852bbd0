//! # terraseg
//!
//! Model selection and checkpoint plumbing for remote-sensing semantic
//! segmentation, built on the Burn framework.
//!
//! ## Modules
//!
//! - `config`: the nested network configuration (JSON)
//! - `factory`: selection and construction of the configured architecture
//! - `model`: the segmentation networks and the coordconv machinery
//! - `checkpoint`: checkpoint loading and state-dict surgery
//! - `backend`: CPU/CUDA backend selection
//! - `utils`: logging and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use terraseg::backend::{default_device, DefaultBackend};
//! use terraseg::{build_network, NetConfig};
//!
//! let config = NetConfig::load("config.json".as_ref())?;
//! let device = default_device();
//! let (model, checkpoint, name) =
//!     build_network::<DefaultBackend>(&config, false, &device)?;
//! ```

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod factory;
pub mod model;
pub mod utils;

// Re-export commonly used items for convenience
pub use checkpoint::{
    chop_layer, load_checkpoint, rename_layer, save_checkpoint, Checkpoint, StateDict,
    TensorEntry,
};
pub use config::{CoordConvParams, NetConfig};
pub use factory::{build_network, ModelKind};
pub use model::{swap_coordconv_layers, SegmentationModel, MIN_NUM_CLASSES, RGB_BANDS};
pub use utils::error::{Result, TerrasegError};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
