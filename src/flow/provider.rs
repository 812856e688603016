//! Versioned sources of flow definitions

use super::definition::FlowSetDefinition;
use crate::error::{DialogError, DialogResult};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// External source of flow definitions.
///
/// The engine compares `version()` before each turn and rebuilds the whole
/// graph when it changed.
pub trait FlowProvider: Send + Sync {
    fn version(&self) -> DialogResult<String>;

    fn load(&self) -> DialogResult<FlowSetDefinition>;
}

impl<T: FlowProvider + ?Sized> FlowProvider for Arc<T> {
    fn version(&self) -> DialogResult<String> {
        (**self).version()
    }

    fn load(&self) -> DialogResult<FlowSetDefinition> {
        (**self).load()
    }
}

/// Flows defined in code; the version never changes
#[derive(Debug, Clone)]
pub struct StaticFlowProvider {
    definition: FlowSetDefinition,
    version: String,
}

impl StaticFlowProvider {
    pub fn new(definition: FlowSetDefinition) -> Self {
        Self {
            definition,
            version: "static".to_string(),
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

impl FlowProvider for StaticFlowProvider {
    fn version(&self) -> DialogResult<String> {
        Ok(self.version.clone())
    }

    fn load(&self) -> DialogResult<FlowSetDefinition> {
        Ok(self.definition.clone())
    }
}

/// Flows read from a JSON file, versioned by content hash
#[derive(Debug, Clone)]
pub struct FileFlowProvider {
    path: PathBuf,
}

impl FileFlowProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> DialogResult<String> {
        std::fs::read_to_string(&self.path).map_err(|e| {
            DialogError::configuration(format!(
                "cannot read flow definitions from {}: {e}",
                self.path.display()
            ))
        })
    }
}

impl FlowProvider for FileFlowProvider {
    fn version(&self) -> DialogResult<String> {
        let contents = self.read()?;
        Ok(format!("{:x}", Sha256::digest(contents.as_bytes())))
    }

    fn load(&self) -> DialogResult<FlowSetDefinition> {
        let contents = self.read()?;
        FlowSetDefinition::from_json(&contents).map_err(|e| {
            DialogError::configuration(format!(
                "invalid flow definitions in {}: {e}",
                self.path.display()
            ))
        })
    }
}
