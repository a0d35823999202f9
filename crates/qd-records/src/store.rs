//! Whole-file registry persistence.

use std::fs;
use std::path::{Path, PathBuf};

use crate::RecordsResult;
use crate::registry::Registry;

pub const REGISTRY_FILE_NAME: &str = "calculations.json";

#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    /// Store at `<base>/calculations.json`.
    pub fn in_dir(base: &Path) -> Self {
        Self {
            path: base.join(REGISTRY_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty registry.
    pub fn load(&self) -> RecordsResult<Registry> {
        if !self.path.exists() {
            return Ok(Registry::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Rewrite the whole file.
    pub fn save(&self, registry: &Registry) -> RecordsResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(registry)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
