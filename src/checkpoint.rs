//! Checkpoint Loading and State-Dict Surgery
//!
//! Checkpoints are JSON artifacts produced by a prior training run. The
//! canonical layout is an object with a `model` entry holding a state
//! dictionary (parameter name -> tensor), an optional `optimizer` entry,
//! and free-form metadata. Externally produced checkpoints that store a
//! bare state dictionary at the top level are accepted too: the loader
//! wraps the entire mapping under a synthesized `model` entry.
//!
//! Tensors are serialized as a shape plus flat f32 data, the same layout
//! this crate uses when exporting weights for interop.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::utils::error::{Result, TerrasegError};

/// A single serialized tensor: shape plus flat row-major data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorEntry {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorEntry {
    /// Number of elements implied by the shape
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

/// A state dictionary: parameter name -> serialized tensor
pub type StateDict = BTreeMap<String, TensorEntry>;

/// A deserialized checkpoint, always keyed by a `model` state dictionary
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Model parameters
    pub model: StateDict,

    /// Optimizer state, if the producing run saved one
    pub optimizer: Option<Value>,

    /// Any further top-level entries (epoch, metrics, ...)
    pub metadata: BTreeMap<String, Value>,
}

impl Checkpoint {
    /// Wrap a bare state dictionary in a checkpoint without optimizer state
    pub fn from_state_dict(model: StateDict) -> Self {
        Self {
            model,
            optimizer: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Total number of parameters across all entries
    pub fn num_parameters(&self) -> usize {
        self.model.values().map(TensorEntry::num_elements).sum()
    }
}

/// Load a checkpoint from the provided path.
///
/// If the file's top-level object has no `model` entry, the entire
/// mapping is treated as a state dictionary and wrapped under a
/// synthesized `model` key. The shim applies to mappings only; any other
/// top-level JSON is rejected.
pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    if !path.exists() {
        return Err(TerrasegError::CheckpointNotFound(path.to_path_buf()));
    }

    info!("Loading checkpoint '{}'", path.display());

    let contents = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&contents)?;

    let mut map = match value {
        Value::Object(map) => map,
        other => {
            return Err(TerrasegError::Checkpoint(format!(
                "checkpoint at '{}' is not a mapping (found {})",
                path.display(),
                json_type_name(&other),
            )))
        }
    };

    let checkpoint = match map.remove("model") {
        Some(model) => {
            let model: StateDict = serde_json::from_value(model)?;
            let optimizer = map.remove("optimizer");
            let metadata = map.into_iter().collect();

            Checkpoint {
                model,
                optimizer,
                metadata,
            }
        }
        None => {
            // Externally produced checkpoint: the whole mapping is the state dict
            debug!("No 'model' entry, wrapping entire state dict");
            let model: StateDict = serde_json::from_value(Value::Object(map))?;
            Checkpoint::from_state_dict(model)
        }
    };

    info!(
        "Checkpoint loaded: {} entries, {} parameters",
        checkpoint.model.len(),
        checkpoint.num_parameters()
    );

    Ok(checkpoint)
}

/// Save a checkpoint in the canonical layout
pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut map = serde_json::Map::new();
    map.insert("model".to_string(), serde_json::to_value(&checkpoint.model)?);
    if let Some(optimizer) = &checkpoint.optimizer {
        map.insert("optimizer".to_string(), optimizer.clone());
    }
    for (key, value) in &checkpoint.metadata {
        map.insert(key.clone(), value.clone());
    }

    std::fs::write(path, serde_json::to_string(&Value::Object(map))?)?;
    Ok(())
}

/// Remove every parameter belonging to one of the named layers.
///
/// A parameter belongs to a layer when its name equals the layer name or
/// is nested under it (`classifier.4` matches `classifier.4.weight`).
pub fn chop_layer(state: StateDict, layer_names: &[&str]) -> StateDict {
    state
        .into_iter()
        .filter(|(name, _)| !layer_names.iter().any(|layer| belongs_to(name, layer)))
        .collect()
}

/// Re-prefix parameter names, for adopting externally produced checkpoints.
///
/// Every parameter under `old` is moved under `new`; all other entries
/// are kept untouched.
pub fn rename_layer(state: StateDict, old: &str, new: &str) -> StateDict {
    state
        .into_iter()
        .map(|(name, tensor)| {
            if belongs_to(&name, old) {
                let renamed = format!("{}{}", new, &name[old.len()..]);
                (renamed, tensor)
            } else {
                (name, tensor)
            }
        })
        .collect()
}

fn belongs_to(param: &str, layer: &str) -> bool {
    param == layer || param.starts_with(layer) && param[layer.len()..].starts_with('.')
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(shape: Vec<usize>) -> TensorEntry {
        let n = shape.iter().product();
        TensorEntry {
            shape,
            data: vec![0.5; n],
        }
    }

    fn sample_state_dict() -> StateDict {
        let mut state = StateDict::new();
        state.insert("backbone.conv1.weight".to_string(), entry(vec![4, 3, 3, 3]));
        state.insert("classifier.4.weight".to_string(), entry(vec![2, 4, 1, 1]));
        state.insert("classifier.4.bias".to_string(), entry(vec![2]));
        state
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = load_checkpoint(Path::new("/nonexistent/checkpoint.json")).unwrap_err();
        assert!(matches!(err, TerrasegError::CheckpointNotFound(_)));
    }

    #[test]
    fn test_canonical_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut checkpoint = Checkpoint::from_state_dict(sample_state_dict());
        checkpoint.optimizer = Some(serde_json::json!({"lr": 0.001}));
        checkpoint
            .metadata
            .insert("epoch".to_string(), serde_json::json!(12));

        save_checkpoint(&path, &checkpoint).unwrap();
        let loaded = load_checkpoint(&path).unwrap();

        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_bare_state_dict_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("external.json");

        let state = sample_state_dict();
        std::fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let loaded = load_checkpoint(&path).unwrap();
        assert_eq!(loaded.model, state);
        assert!(loaded.optimizer.is_none());
        assert!(loaded.metadata.is_empty());
    }

    #[test]
    fn test_non_mapping_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let err = load_checkpoint(&path).unwrap_err();
        assert!(matches!(err, TerrasegError::Checkpoint(_)));
        assert!(format!("{}", err).contains("not a mapping"));
    }

    #[test]
    fn test_chop_layer_removes_nested_parameters() {
        let chopped = chop_layer(sample_state_dict(), &["classifier.4"]);

        assert_eq!(chopped.len(), 1);
        assert!(chopped.contains_key("backbone.conv1.weight"));
    }

    #[test]
    fn test_chop_layer_does_not_match_prefix_fragments() {
        let mut state = StateDict::new();
        state.insert("classifier.40.weight".to_string(), entry(vec![2]));

        let chopped = chop_layer(state, &["classifier.4"]);
        assert_eq!(chopped.len(), 1);
    }

    #[test]
    fn test_rename_layer_moves_all_entries() {
        let renamed = rename_layer(sample_state_dict(), "classifier.4", "head");

        assert_eq!(renamed.len(), 3);
        assert!(renamed.contains_key("head.weight"));
        assert!(renamed.contains_key("head.bias"));
        assert!(renamed.contains_key("backbone.conv1.weight"));
    }

    #[test]
    fn test_num_parameters() {
        let checkpoint = Checkpoint::from_state_dict(sample_state_dict());
        assert_eq!(checkpoint.num_parameters(), 4 * 3 * 3 * 3 + 2 * 4 + 2);
    }
}
