//! Rendering engine module - turns HTML into PDF bytes through an external browser.
//!
//! - `lifecycle` - `EngineManager`, the single owner of the shared engine handle
//! - `diagnostics` - classification of launch failures into actionable categories
//! - `chrome` - headless Chrome backend
//! - `pdf` - inspection helpers for produced PDF bytes

pub mod chrome;
pub mod diagnostics;
pub mod lifecycle;
pub mod pdf;

pub use chrome::{ChromeLauncher, ChromeLauncherConfig};
pub use diagnostics::{classify, Diagnostic, DiagnosticClass};
pub use lifecycle::{ContextLease, EngineManager, EngineState, RetryPolicy};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Shared handle to a running engine. Only `EngineManager` creates or drops it.
pub type EngineHandle = Arc<dyn RenderEngine>;

/// Errors raised by an engine backend.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch rendering engine: {0}")]
    Launch(String),
    #[error("failed to open render context: {0}")]
    Context(String),
    #[error("HTML to PDF conversion failed: {0}")]
    Conversion(String),
    #[error("render context scratch space unavailable: {0}")]
    Scratch(#[source] std::io::Error),
}

/// Raised by `EngineManager::ensure_ready` once every launch attempt failed.
#[derive(Debug, Clone, Error, Serialize)]
#[error("rendering engine unavailable after {attempts} attempt(s): {diagnostic}")]
pub struct EngineUnavailable {
    pub attempts: u32,
    pub diagnostic: Diagnostic,
}

/// Page size handed to a conversion, in PostScript points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSetup {
    pub width_pt: f64,
    pub height_pt: f64,
    /// Uniform margin. `None` leaves the engine's own base margin in place.
    pub margin_pt: Option<f64>,
}

pub const A4_WIDTH_PT: f64 = 595.28;
pub const A4_HEIGHT_PT: f64 = 841.89;
const DEFAULT_MARGIN_PT: f64 = 28.35;

impl Default for PageSetup {
    fn default() -> Self {
        Self {
            width_pt: A4_WIDTH_PT,
            height_pt: A4_HEIGHT_PT,
            margin_pt: Some(DEFAULT_MARGIN_PT),
        }
    }
}

impl PageSetup {
    /// Custom geometry replaces the default page entirely; no default margin is blended in.
    pub fn custom(width_pt: f64, height_pt: f64) -> Self {
        Self {
            width_pt,
            height_pt,
            margin_pt: None,
        }
    }
}

/// Starts an engine process. Called only by `EngineManager`, serialized.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<EngineHandle, EngineError>;
}

/// A running engine that hands out isolated contexts.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Open a fresh, isolated context for exactly one conversion.
    async fn open_context(&self) -> Result<Box<dyn RenderContext>, EngineError>;

    /// Cheap liveness check; a disconnected engine is relaunched on next demand.
    fn is_connected(&self) -> bool {
        true
    }

    /// Best-effort graceful close.
    fn shutdown(&self);
}

/// One isolated unit of work (a browser tab in the Chrome backend).
#[async_trait]
pub trait RenderContext: Send {
    async fn print_pdf(&mut self, html: &str, page: &PageSetup) -> Result<Vec<u8>, EngineError>;

    /// Release the underlying resources and wait until they are gone.
    async fn release(&mut self) -> Result<(), EngineError> {
        self.close()
    }

    /// Non-blocking release for drop paths; may finish after returning.
    /// Must tolerate being called after `release`.
    fn close(&mut self) -> Result<(), EngineError>;
}
