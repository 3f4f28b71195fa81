use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capture::ScreenSource;

/// A captured screen image (PNG bytes).
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Screenshot {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            captured_at: Utc::now(),
        }
    }

    /// Encode as a `data:` URL for multimodal API payloads and step audit refs.
    pub fn as_data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.data)
        )
    }
}

/// Scroll direction for the effector's single-axis scroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
}

/// Input/screen effector — the single physical mouse/keyboard/screen
/// resource.
///
/// Targets are natural-language descriptions ("the blue Login button"), not
/// pixel coordinates; resolving them is the implementation's business,
/// typically by pairing with the vision capability. Wrap implementations in
/// [`crate::effector::SharedEffector`] before handing them to concurrent
/// owners — only one logical input stream exists.
#[async_trait]
pub trait Effector: Send + Sync {
    /// Enumerate available capture targets (screens, windows, tabs).
    async fn sources(&self) -> anyhow::Result<Vec<ScreenSource>>;

    /// Capture the given source. `with_overlay` includes any UI the
    /// implementation draws on top of the captured surface.
    async fn screenshot(&self, source: &ScreenSource, with_overlay: bool)
        -> anyhow::Result<Screenshot>;

    async fn click(&self, target: &str) -> anyhow::Result<()>;

    async fn type_text(&self, text: &str) -> anyhow::Result<()>;

    async fn scroll(&self, direction: ScrollDirection) -> anyhow::Result<()>;

    async fn open_url(&self, url: &str) -> anyhow::Result<()>;

    async fn notify(&self, title: &str, message: &str) -> anyhow::Result<()>;

    /// Record the screen for the given duration.
    async fn record_screen(&self, duration_ms: u64) -> anyhow::Result<()>;

    /// Run an operator-authored script.
    async fn run_script(&self, command: &str) -> anyhow::Result<()>;
}
