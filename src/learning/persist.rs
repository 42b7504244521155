//! Weight persistence (`weights.v1`)
//!
//! Small JSON document mapping pattern id to its learned weight. Written
//! off the hot path via temp file + atomic rename; read once at startup.
//! Unknown ids are ignored, missing ids default to 1.0.

use crate::error::GateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

pub const WEIGHTS_VERSION: &str = "weights.v1";

#[derive(Debug, Serialize, Deserialize)]
pub struct WeightsFile {
    pub version: String,
    pub updated_at: DateTime<Utc>,
    pub weights: HashMap<String, WeightEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightEntry {
    pub weight: f64,
    /// Microseconds since the Unix epoch.
    pub updated_at: u64,
}

/// Read and validate a weights file. A missing file is not an error; a
/// malformed or wrong-version file is.
pub fn load(path: impl AsRef<Path>) -> Result<Option<WeightsFile>, GateError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| GateError::Config(format!("cannot read {}: {e}", path.display())))?;
    let file: WeightsFile = serde_json::from_str(&contents)
        .map_err(|e| GateError::Config(format!("malformed weights {}: {e}", path.display())))?;
    if file.version != WEIGHTS_VERSION {
        return Err(GateError::Config(format!(
            "unsupported weights version '{}' in {}",
            file.version,
            path.display()
        )));
    }
    debug!(path = %path.display(), entries = file.weights.len(), "weights loaded");
    Ok(Some(file))
}

/// Atomic write: serialize to `<path>.tmp` in the same directory, then
/// rename over the target.
pub fn save(
    path: impl AsRef<Path>,
    entries: HashMap<String, WeightEntry>,
) -> Result<(), GateError> {
    let path = path.as_ref();
    let file = WeightsFile {
        version: WEIGHTS_VERSION.to_string(),
        updated_at: Utc::now(),
        weights: entries,
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| GateError::Learner(format!("weights serialization failed: {e}")))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GateError::Learner(format!("cannot create state dir: {e}")))?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .map_err(|e| GateError::Learner(format!("cannot write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        GateError::Learner(format!("cannot rename into {}: {e}", path.display()))
    })?;
    Ok(())
}

/// Load weights and apply them to the table through the slot mapping.
/// Entries whose pattern id is unknown are skipped.
pub fn restore_into(
    path: impl AsRef<Path>,
    slot_of: &HashMap<String, usize>,
    table: &super::WeightTable,
) -> usize {
    let file = match load(path.as_ref()) {
        Ok(Some(file)) => file,
        Ok(None) => return 0,
        Err(e) => {
            warn!(error = %e, "ignoring persisted weights");
            return 0;
        }
    };

    let mut applied = 0usize;
    for (id, entry) in &file.weights {
        if let Some(&slot) = slot_of.get(id) {
            if table.apply_update(slot, entry.weight, entry.updated_at) {
                applied += 1;
            }
        }
    }
    applied
}
