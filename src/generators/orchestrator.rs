//! Document generation orchestrator.
//!
//! Sub-templates of one request are processed sequentially; each one that fails is
//! recorded and the batch moves on. The call only fails when nothing was produced.

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use super::naming::{OutputPath, PathResolver};
use super::registry::{TemplateConfig, TemplateRegistry};
use super::renderer::TemplateRenderer;
use super::{GenerationRequest, GenerationResult, GeneratorError, TemplateFailure};
use crate::engine::{pdf, EngineManager, PageSetup};

/// Upper bound on `-n` suffixes tried when a file name is already taken.
const MAX_NAME_COLLISIONS: u32 = 100;

pub struct DocumentGenerator {
    registry: Arc<TemplateRegistry>,
    renderer: Arc<TemplateRenderer>,
    engine: Arc<EngineManager>,
    paths: PathResolver,
}

impl DocumentGenerator {
    pub fn new(
        registry: Arc<TemplateRegistry>,
        renderer: Arc<TemplateRenderer>,
        engine: Arc<EngineManager>,
        paths: PathResolver,
    ) -> Self {
        Self {
            registry,
            renderer,
            engine,
            paths,
        }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &EngineManager {
        &self.engine
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GeneratorError> {
        self.generate_at(request, Local::now()).await
    }

    /// `generate` with an explicit timestamp shared by every document of the batch.
    pub async fn generate_at(
        &self,
        request: GenerationRequest,
        timestamp: DateTime<Local>,
    ) -> Result<GenerationResult, GeneratorError> {
        let config = self.registry.resolve(&request.category)?;
        let directory = config.template_dir_for(request.instrument_variant.as_deref());
        let page = config.page_setup();

        let category_dir = self.paths.category_dir(config);
        tokio::fs::create_dir_all(&category_dir)
            .await
            .map_err(|source| GeneratorError::Storage {
                path: category_dir.clone(),
                source,
            })?;

        info!(
            "Generating '{}' ({} template(s), directory '{}')",
            config.category,
            config.sub_templates.len(),
            directory
        );

        let mut result = GenerationResult::default();
        for name in &config.sub_templates {
            match self
                .produce_one(config, directory, name, &request, &page, &timestamp)
                .await
            {
                Ok(relative) => {
                    debug!("'{}' -> {}", name, relative);
                    result.produced_paths.push(relative);
                }
                Err(error) => {
                    warn!(
                        "Sub-template '{}' of '{}' failed: {}",
                        name, config.category, error
                    );
                    result.failures.push(TemplateFailure {
                        template: name.clone(),
                        error,
                    });
                }
            }
        }

        if result.produced_paths.is_empty() {
            return Err(GeneratorError::AllTemplatesFailed {
                category: config.category.clone(),
                failures: result.failures,
            });
        }

        info!(
            "Generated {} document(s) for '{}' ({} failed)",
            result.produced_paths.len(),
            config.category,
            result.failures.len()
        );
        Ok(result)
    }

    async fn produce_one(
        &self,
        config: &TemplateConfig,
        directory: &str,
        name: &str,
        request: &GenerationRequest,
        page: &PageSetup,
        timestamp: &DateTime<Local>,
    ) -> Result<String, String> {
        let html = self
            .renderer
            .render(directory, name, &request.payload)
            .await
            .map_err(|e| e.to_string())?;

        let pdf_bytes = self.convert(&html, page).await?;

        let target = self
            .paths
            .output_path(config, name, request.instrument_id, timestamp);
        let written = write_new_file(&target, &pdf_bytes)
            .await
            .map_err(|e| e.to_string())?;
        Ok(written.relative)
    }

    async fn convert(&self, html: &str, page: &PageSetup) -> Result<Vec<u8>, String> {
        let handle = self.engine.ensure_ready().await.map_err(|e| e.to_string())?;
        let mut lease = match self.engine.acquire_context(&handle).await {
            Ok(lease) => lease,
            // The engine died since it was last used; start a fresh one once.
            Err(e) if !handle.is_connected() => {
                warn!("Rendering engine lost ({}), relaunching", e);
                let handle = self.engine.ensure_ready().await.map_err(|e| e.to_string())?;
                self.engine
                    .acquire_context(&handle)
                    .await
                    .map_err(|e| e.to_string())?
            }
            Err(e) => return Err(e.to_string()),
        };

        let converted = lease.print_pdf(html, page).await;
        lease.release().await;

        let bytes = converted.map_err(|e| e.to_string())?;
        if !pdf::is_pdf(&bytes) {
            return Err(format!(
                "engine returned {} byte(s) that are not a PDF document",
                bytes.len()
            ));
        }
        Ok(bytes)
    }
}

/// Write the whole buffer to a path that did not exist yet, suffixing on collision.
async fn write_new_file(target: &OutputPath, bytes: &[u8]) -> Result<OutputPath, GeneratorError> {
    let mut candidate = target.clone();
    for attempt in 1..=MAX_NAME_COLLISIONS + 1 {
        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate.absolute)
            .await;

        match opened {
            Ok(mut file) => {
                let written = async {
                    file.write_all(bytes).await?;
                    file.flush().await
                }
                .await;
                if let Err(source) = written {
                    let _ = tokio::fs::remove_file(&candidate.absolute).await;
                    return Err(GeneratorError::Storage {
                        path: candidate.absolute,
                        source,
                    });
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{} already exists, trying a suffix", candidate.relative);
                candidate = target.with_suffix(attempt);
            }
            Err(source) => {
                return Err(GeneratorError::Storage {
                    path: candidate.absolute,
                    source,
                })
            }
        }
    }

    Err(GeneratorError::Storage {
        path: target.absolute.clone(),
        source: std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("{} name collisions", MAX_NAME_COLLISIONS),
        ),
    })
}
