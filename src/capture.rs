//! Screen capture targets and the current selection.

use std::sync::Mutex;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::effector::SharedEffector;

/// What kind of surface a capture target is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Screen,
    Window,
    Tab,
}

/// One enumerable capture target. Immutable value; selection happens by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSource {
    pub kind: SourceKind,
    pub id: String,
    pub name: String,
}

/// Holds the enumerated capture targets and the one the caller picked.
///
/// Leaf state: no I/O of its own. `refresh` pulls the current enumeration
/// from the effector; a stale selection that disappears on refresh is
/// cleared rather than silently kept.
#[derive(Default)]
pub struct ScreenSourceRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    sources: Vec<ScreenSource>,
    selected: Option<ScreenSource>,
}

impl ScreenSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-enumerate capture targets from the effector.
    pub async fn refresh(&self, effector: &SharedEffector) -> anyhow::Result<Vec<ScreenSource>> {
        let sources = effector.sources().await?;
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ref selected) = state.selected {
            if !sources.iter().any(|s| s.id == selected.id) {
                info!(source_id = %selected.id, "Selected capture source disappeared; clearing selection");
                state.selected = None;
            }
        }
        state.sources = sources.clone();
        Ok(sources)
    }

    pub fn list(&self) -> Vec<ScreenSource> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.sources.clone()
    }

    /// Select a capture target by id.
    pub fn select(&self, id: &str) -> anyhow::Result<ScreenSource> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(source) = state.sources.iter().find(|s| s.id == id).cloned() else {
            bail!("unknown capture source: {}", id);
        };
        info!(source_id = %source.id, source_name = %source.name, "Capture source selected");
        state.selected = Some(source.clone());
        Ok(source)
    }

    pub fn selected(&self) -> Option<ScreenSource> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.selected.clone()
    }

    pub fn clear_selection(&self) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.selected = None;
    }
}
