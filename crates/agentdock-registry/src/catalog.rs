//! The `agents.json` catalog file.
//!
//! The catalog is one JSON array holding every agent record. It is rewritten
//! wholesale on each save: records go to a sibling temp file which is then
//! renamed over the catalog, so readers never observe a half-written file.

use std::path::{Path, PathBuf};

use agentdock_core::Agent;

use crate::RegistryError;

/// File name of the catalog inside the workspace root.
pub const CATALOG_FILE: &str = "agents.json";

/// JSON file store for agent records.
#[derive(Debug, Clone)]
pub struct Catalog {
    path: PathBuf,
}

impl Catalog {
    /// Catalog stored at `<root>/agents.json`.
    #[must_use]
    pub fn in_root(root: &Path) -> Self {
        Self {
            path: root.join(CATALOG_FILE),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty catalog (`[]`) if none exists yet.
    ///
    /// # Errors
    /// Returns error if the file cannot be created.
    pub async fn ensure_exists(&self) -> Result<(), RegistryError> {
        if !tokio::fs::try_exists(&self.path).await? {
            tracing::info!(path = %self.path.display(), "Creating empty agent catalog");
            tokio::fs::write(&self.path, "[]").await?;
        }
        Ok(())
    }

    /// Read every record.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub async fn load(&self) -> Result<Vec<Agent>, RegistryError> {
        let data = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Replace the catalog with `agents`.
    ///
    /// # Errors
    /// Returns error if serialization or either file operation fails.
    pub async fn save(&self, agents: &[&Agent]) -> Result<(), RegistryError> {
        let data = serde_json::to_vec_pretty(agents)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), count = agents.len(), "Catalog saved");
        Ok(())
    }
}
