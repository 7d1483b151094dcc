//! Template renderer - one sub-template plus a payload in, one HTML string out.
//!
//! Sources live at `{template_root}/{directory}/{name}.hbs`. The payload is always
//! bound under `data`, so templates address fields as `{{data.field}}`.

use handlebars::{Handlebars, Template};
use moka::future::Cache;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::helpers;
use super::GeneratorError;

pub const TEMPLATE_EXTENSION: &str = "hbs";

/// Handlebars renderer with cached template sources.
pub struct TemplateRenderer {
    root: PathBuf,
    handlebars: Handlebars<'static>,
    sources: Cache<PathBuf, Arc<String>>,
}

impl TemplateRenderer {
    pub fn new(root: impl Into<PathBuf>, cache_ttl: Duration, strict: bool) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(strict);
        helpers::register_all(&mut handlebars);

        let sources = Cache::builder()
            .time_to_live(cache_ttl)
            .max_capacity(256)
            .build();

        Self {
            root: root.into(),
            handlebars,
            sources,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn template_path(&self, directory: &str, name: &str) -> PathBuf {
        self.root
            .join(directory)
            .join(format!("{}.{}", name, TEMPLATE_EXTENSION))
    }

    /// Render `name` from `directory` with `payload` bound under `data`.
    pub async fn render(
        &self,
        directory: &str,
        name: &str,
        payload: &Value,
    ) -> Result<String, GeneratorError> {
        let path = self.template_path(directory, name);
        let source = self.load(&path).await?;
        let template_id = format!("{}/{}", directory, name);

        Template::compile(&source).map_err(|e| GeneratorError::TemplateCompile {
            template: template_id.clone(),
            message: e.to_string(),
        })?;

        self.handlebars
            .render_template(&source, &json!({ "data": payload }))
            .map_err(|e| GeneratorError::TemplateRender {
                template: template_id,
                message: e.to_string(),
            })
    }

    /// Drop every cached source, forcing the next render to re-read from disk.
    pub fn invalidate_all(&self) {
        self.sources.invalidate_all();
    }

    async fn load(&self, path: &Path) -> Result<Arc<String>, GeneratorError> {
        if let Some(source) = self.sources.get(path).await {
            return Ok(source);
        }

        let source = match tokio::fs::read_to_string(path).await {
            Ok(source) => Arc::new(source),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(GeneratorError::TemplateNotFound(path.to_path_buf()))
            }
            Err(e) => {
                return Err(GeneratorError::TemplateIo {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        log::debug!("Loaded template source {}", path.display());
        self.sources.insert(path.to_path_buf(), source.clone()).await;
        Ok(source)
    }
}
