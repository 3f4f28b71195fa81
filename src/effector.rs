//! Single-owner handle around the shared effector.
//!
//! The plan executor and the trigger monitor both drive the same physical
//! mouse/keyboard/screen. Truly concurrent input is meaningless — only one
//! logical input stream exists — so every effector call serializes through
//! one async mutex. Policy: first acquirer wins, the other party waits for
//! the lock; there is no priority or preemption between a plan step and a
//! trigger firing.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::capture::ScreenSource;
use crate::traits::{Effector, Screenshot, ScrollDirection};

/// Cloneable handle; clones share the same underlying effector and lock.
#[derive(Clone)]
pub struct SharedEffector {
    inner: Arc<Mutex<Box<dyn Effector>>>,
}

impl SharedEffector {
    pub fn new(effector: Box<dyn Effector>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(effector)),
        }
    }

    pub async fn sources(&self) -> anyhow::Result<Vec<ScreenSource>> {
        self.inner.lock().await.sources().await
    }

    pub async fn screenshot(
        &self,
        source: &ScreenSource,
        with_overlay: bool,
    ) -> anyhow::Result<Screenshot> {
        self.inner.lock().await.screenshot(source, with_overlay).await
    }

    pub async fn click(&self, target: &str) -> anyhow::Result<()> {
        self.inner.lock().await.click(target).await
    }

    pub async fn type_text(&self, text: &str) -> anyhow::Result<()> {
        self.inner.lock().await.type_text(text).await
    }

    pub async fn scroll(&self, direction: ScrollDirection) -> anyhow::Result<()> {
        self.inner.lock().await.scroll(direction).await
    }

    pub async fn open_url(&self, url: &str) -> anyhow::Result<()> {
        self.inner.lock().await.open_url(url).await
    }

    pub async fn notify(&self, title: &str, message: &str) -> anyhow::Result<()> {
        self.inner.lock().await.notify(title, message).await
    }

    pub async fn record_screen(&self, duration_ms: u64) -> anyhow::Result<()> {
        self.inner.lock().await.record_screen(duration_ms).await
    }

    pub async fn run_script(&self, command: &str) -> anyhow::Result<()> {
        self.inner.lock().await.run_script(command).await
    }
}
