//! Pipeline resume checkpoint.
//!
//! Tracks which phases have completed per batch so an interrupted run can
//! skip straight to the first unfinished phase. The file is plain JSON
//! (`{"phases": {"<batch>": ["phase1", ...]}}`) and every save goes through
//! a temp file + rename so a crash mid-write cannot corrupt it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::CatalogResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub phases: HashMap<String, Vec<String>>,
}

impl Checkpoint {
    /// Load a checkpoint from disk, or start empty when the file is absent.
    pub fn load(path: &Path) -> CatalogResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> CatalogResult<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn is_done(&self, batch: &str, phase: &str) -> bool {
        self.phases
            .get(batch)
            .is_some_and(|done| done.iter().any(|p| p == phase))
    }

    pub fn mark_done(&mut self, batch: &str, phase: &str) {
        let done = self.phases.entry(batch.to_string()).or_default();
        if !done.iter().any(|p| p == phase) {
            done.push(phase.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_query_phases() {
        let mut cp = Checkpoint::default();
        assert!(!cp.is_done("dbo", "pk_discovery"));

        cp.mark_done("dbo", "pk_discovery");
        cp.mark_done("dbo", "pk_discovery");
        assert!(cp.is_done("dbo", "pk_discovery"));
        assert_eq!(cp.phases["dbo"], vec!["pk_discovery"]);
        assert!(!cp.is_done("sales", "pk_discovery"));
    }

    #[test]
    fn save_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("keystone_cp_{}", uuid::Uuid::new_v4()));
        let path = dir.join("pipeline_state.json");

        let mut cp = Checkpoint::default();
        cp.mark_done("dbo", "pk_discovery");
        cp.mark_done("dbo", "cardinality");
        cp.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert!(loaded.is_done("dbo", "pk_discovery"));
        assert!(loaded.is_done("dbo", "cardinality"));
        assert!(!loaded.is_done("dbo", "frequencies"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_loads_empty() {
        let path = Path::new("/nonexistent/keystone/pipeline_state.json");
        let cp = Checkpoint::load(path).unwrap();
        assert!(cp.phases.is_empty());
    }
}
