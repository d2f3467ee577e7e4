// SPDX-License-Identifier: MIT

//! Graph persistence
//!
//! The composer itself is synchronous; loading and saving workflows is the
//! only I/O and sits behind [`GraphStore`].

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Result;
use crate::workflow::graph::WorkflowDef;

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn load(&self) -> Result<WorkflowDef>;
    async fn save(&self, def: &WorkflowDef) -> Result<()>;
}

/// Workflow stored as a JSON file
#[derive(Debug, Clone)]
pub struct FileGraphStore {
    path: PathBuf,
}

impl FileGraphStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl GraphStore for FileGraphStore {
    async fn load(&self) -> Result<WorkflowDef> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let def = WorkflowDef::from_json(&content)?;
        log::debug!(
            "Loaded {} steps from {}",
            def.steps.len(),
            self.path.display()
        );
        Ok(def)
    }

    async fn save(&self, def: &WorkflowDef) -> Result<()> {
        let mut content = def.to_json_pretty()?;
        content.push('\n');
        tokio::fs::write(&self.path, content).await?;
        log::info!("Wrote {} steps to {}", def.steps.len(), self.path.display());
        Ok(())
    }
}
