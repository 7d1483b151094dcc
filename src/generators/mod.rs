//! Generators module - turns a category and a data payload into stored PDF documents.
//!
//! - `registry` - static category → template set configuration
//! - `renderer` - Handlebars rendering of one sub-template to HTML
//! - `helpers` - pure template helpers (dates, currency, predicates)
//! - `naming` - deterministic output paths
//! - `orchestrator` - the batch loop tying everything together
//! - `validation` - registry entry checks run at load time

pub mod helpers;
pub mod naming;
pub mod orchestrator;
pub mod registry;
pub mod renderer;
pub mod validation;

pub use naming::{OutputPath, PathResolver};
pub use orchestrator::DocumentGenerator;
pub use registry::{PageGeometry, TemplateConfig, TemplateRegistry};
pub use renderer::TemplateRenderer;
pub use validation::Validator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during document generation.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("unknown document category '{0}'")]
    UnknownCategory(String),
    #[error("template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),
    #[error("failed to read template {}: {source}", .path.display())]
    TemplateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template '{template}' does not compile: {message}")]
    TemplateCompile { template: String, message: String },
    #[error("template '{template}' failed to render: {message}")]
    TemplateRender { template: String, message: String },
    #[error("storage error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("all {} template(s) of category '{category}' failed: {}", .failures.len(), summarize(.failures))]
    AllTemplatesFailed {
        category: String,
        failures: Vec<TemplateFailure>,
    },
}

fn summarize(failures: &[TemplateFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One generation call.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub category: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub instrument_id: Option<i64>,
    #[serde(default)]
    pub instrument_variant: Option<String>,
}

impl GenerationRequest {
    pub fn new(category: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            category: category.into(),
            payload,
            instrument_id: None,
            instrument_variant: None,
        }
    }

    pub fn with_instrument_id(mut self, id: i64) -> Self {
        self.instrument_id = Some(id);
        self
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.instrument_variant = Some(variant.into());
        self
    }
}

/// A sub-template that did not produce a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateFailure {
    pub template: String,
    pub error: String,
}

impl fmt::Display for TemplateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.template, self.error)
    }
}

/// Outcome of a successful (possibly partial) generation.
///
/// `failures` is informational; callers decide whether a partial set is acceptable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Relative storage paths, in registry order.
    pub produced_paths: Vec<String>,
    pub failures: Vec<TemplateFailure>,
}

impl GenerationResult {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}
