//! Service wiring: builds the registry, renderer, engine manager and generator once,
//! and owns their start-up and shutdown.

use log::info;
use std::sync::Arc;

use crate::config::DocgenConfig;
use crate::engine::{ChromeLauncher, EngineLauncher, EngineManager};
use crate::generators::registry::RegistryError;
use crate::generators::{
    DocumentGenerator, GenerationRequest, GenerationResult, GeneratorError, PathResolver,
    TemplateRegistry, TemplateRenderer,
};

#[derive(Clone)]
pub struct DocumentService {
    generator: Arc<DocumentGenerator>,
    engine: Arc<EngineManager>,
}

impl DocumentService {
    /// Build with the headless Chrome backend and warm the engine up.
    pub async fn start(config: &DocgenConfig) -> Result<Self, RegistryError> {
        let launcher = Arc::new(ChromeLauncher::new(config.chrome()));
        Self::start_with_launcher(config, launcher).await
    }

    /// Build with any engine backend and warm the engine up; used by tests to inject a fake engine.
    pub async fn start_with_launcher(
        config: &DocgenConfig,
        launcher: Arc<dyn EngineLauncher>,
    ) -> Result<Self, RegistryError> {
        let service = Self::new(config, launcher)?;
        service.engine.warm_up().await;
        info!(
            "Document service started (templates: {}, storage: {})",
            config.template_root.display(),
            config.storage_root.display()
        );
        Ok(service)
    }

    /// Wire everything without touching the engine; it starts on first demand.
    pub fn new(config: &DocgenConfig, launcher: Arc<dyn EngineLauncher>) -> Result<Self, RegistryError> {
        let registry = load_registry(config)?;
        let renderer = TemplateRenderer::new(
            config.template_root.clone(),
            config.template_cache_ttl,
            config.strict_templates,
        );
        let engine = Arc::new(EngineManager::new(launcher, config.retry_policy()));
        let generator = DocumentGenerator::new(
            Arc::new(registry),
            Arc::new(renderer),
            engine.clone(),
            PathResolver::new(config.storage_root.clone()),
        );

        Ok(Self {
            generator: Arc::new(generator),
            engine,
        })
    }

    /// `new` with the headless Chrome backend.
    pub fn with_chrome(config: &DocgenConfig) -> Result<Self, RegistryError> {
        Self::new(config, Arc::new(ChromeLauncher::new(config.chrome())))
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GeneratorError> {
        self.generator.generate(request).await
    }

    pub fn generator(&self) -> &DocumentGenerator {
        &self.generator
    }

    pub fn engine(&self) -> &EngineManager {
        &self.engine
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
        info!("Document service stopped");
    }
}

/// The operator-supplied registry file when configured, the embedded one otherwise.
pub fn load_registry(config: &DocgenConfig) -> Result<TemplateRegistry, RegistryError> {
    match config.registry_path {
        Some(ref path) => {
            info!("Loading template registry from {}", path.display());
            TemplateRegistry::from_json_file(path)
        }
        None => TemplateRegistry::builtin(),
    }
}
