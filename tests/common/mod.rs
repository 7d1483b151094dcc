#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use tender_docgen::engine::{
    EngineError, EngineHandle, EngineLauncher, EngineManager, PageSetup, RenderContext,
    RenderEngine, RetryPolicy,
};
use tender_docgen::generators::{DocumentGenerator, PathResolver, TemplateRegistry, TemplateRenderer};

/// Marker that makes `FakeContext` fail the conversion.
pub const FAIL_CONVERSION: &str = "FAIL_CONVERSION";
/// Marker that makes `FakeContext` return bytes that are not a PDF.
pub const NOT_A_PDF: &str = "NOT_A_PDF";

pub const MISSING_LIBRARY: &str = "error while loading shared libraries: libnss3.so: cannot open shared object file: No such file or directory";

/// Counters shared by every engine and context a `FakeLauncher` creates.
#[derive(Default)]
pub struct EngineStats {
    pub contexts_opened: AtomicUsize,
    pub contexts_released: AtomicUsize,
    /// Releases that went through the awaited path rather than drop.
    pub contexts_awaited: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub rendered_html: Mutex<Vec<String>>,
}

impl EngineStats {
    pub fn opened(&self) -> usize {
        self.contexts_opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.contexts_released.load(Ordering::SeqCst)
    }

    pub fn awaited(&self) -> usize {
        self.contexts_awaited.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn html(&self) -> Vec<String> {
        self.rendered_html.lock().clone()
    }
}

/// Mock launcher standing in for a browser process.
pub struct FakeLauncher {
    launches: AtomicU32,
    failures_left: AtomicU32,
    error: String,
    delay: Duration,
    pub stats: Arc<EngineStats>,
    engines: Mutex<Vec<Arc<FakeEngine>>>,
}

impl FakeLauncher {
    pub fn healthy() -> Self {
        Self::failing(0, "")
    }

    /// Fail the first `failures` launches with `error`, then succeed.
    pub fn failing(failures: u32, error: &str) -> Self {
        Self {
            launches: AtomicU32::new(0),
            failures_left: AtomicU32::new(failures),
            error: error.to_string(),
            delay: Duration::ZERO,
            stats: Arc::new(EngineStats::default()),
            engines: Mutex::new(Vec::new()),
        }
    }

    pub fn broken(error: &str) -> Self {
        Self::failing(u32::MAX, error)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn repair(&self) {
        self.failures_left.store(0, Ordering::SeqCst);
    }

    /// Most recently launched engine.
    pub fn last_engine(&self) -> Option<Arc<FakeEngine>> {
        self.engines.lock().last().cloned()
    }
}

#[async_trait]
impl EngineLauncher for FakeLauncher {
    async fn launch(&self) -> Result<EngineHandle, EngineError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                (left > 0).then(|| left.saturating_sub(1))
            })
            .is_ok();
        if failed {
            return Err(EngineError::Launch(self.error.clone()));
        }

        let engine = Arc::new(FakeEngine {
            connected: AtomicBool::new(true),
            crashed: AtomicBool::new(false),
            stats: self.stats.clone(),
        });
        self.engines.lock().push(engine.clone());
        Ok(engine)
    }
}

pub struct FakeEngine {
    connected: AtomicBool,
    crashed: AtomicBool,
    stats: Arc<EngineStats>,
}

impl FakeEngine {
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Dies silently: still reports connected until the next context is opened.
    pub fn crash(&self) {
        self.crashed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn open_context(&self) -> Result<Box<dyn RenderContext>, EngineError> {
        if self.crashed.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(EngineError::Context("connection closed".into()));
        }
        if !self.is_connected() {
            return Err(EngineError::Context("browser connection closed".into()));
        }
        self.stats.contexts_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            stats: self.stats.clone(),
            closed: false,
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Emits a minimal PDF whose `/MediaBox` reflects the requested page.
pub struct FakeContext {
    stats: Arc<EngineStats>,
    closed: bool,
}

#[async_trait]
impl RenderContext for FakeContext {
    async fn print_pdf(&mut self, html: &str, page: &PageSetup) -> Result<Vec<u8>, EngineError> {
        self.stats.rendered_html.lock().push(html.to_string());

        if html.contains(FAIL_CONVERSION) {
            return Err(EngineError::Conversion("page crashed".into()));
        }
        if html.contains(NOT_A_PDF) {
            return Ok(html.as_bytes().to_vec());
        }

        Ok(format!(
            "%PDF-1.4\n1 0 obj\n<< /Type /Page /MediaBox [0 0 {:.2} {:.2}] >>\nendobj\n%%EOF\n",
            page.width_pt, page.height_pt
        )
        .into_bytes())
    }

    async fn release(&mut self) -> Result<(), EngineError> {
        if !self.closed {
            self.stats.contexts_awaited.fetch_add(1, Ordering::SeqCst);
        }
        self.close()
    }

    fn close(&mut self) -> Result<(), EngineError> {
        if !self.closed {
            self.closed = true;
            self.stats.contexts_released.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Retry policy with short delays so tests stay fast.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        launch_timeout: Duration::from_secs(5),
    }
}

pub const TEST_REGISTRY: &str = r#"{
  "categories": {
    "letters": {
      "template_dir": "letters",
      "sub_templates": ["first", "second", "third"],
      "storage_subpath": "out/letters"
    },
    "cheque": {
      "template_dir": "cheque",
      "sub_templates": ["cheque_print"],
      "storage_subpath": "cheques",
      "page_geometry": { "width_pt": 900, "height_pt": 500 },
      "serial_prefix": "cheque"
    },
    "guarantee": {
      "template_dir": "guarantee",
      "sub_templates": ["request_letter"],
      "storage_subpath": "guarantees",
      "variants": { "emd": "guarantee/emd" }
    }
  }
}"#;

/// Temporary template and storage roots.
pub struct Workspace {
    _dir: TempDir,
    pub templates: PathBuf,
    pub storage: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let templates = dir.path().join("templates");
        let storage = dir.path().join("storage");
        std::fs::create_dir_all(&templates).expect("create template root");
        Self {
            _dir: dir,
            templates,
            storage,
        }
    }

    pub fn write_template(&self, directory: &str, name: &str, body: &str) {
        let dir = self.templates.join(directory);
        std::fs::create_dir_all(&dir).expect("create template dir");
        std::fs::write(dir.join(format!("{}.hbs", name)), body).expect("write template");
    }

    /// Every regular file below the storage root, sorted.
    pub fn stored_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_files(&self.storage, &mut files);
        files.sort();
        files
    }

    pub fn registry(&self) -> Arc<TemplateRegistry> {
        Arc::new(TemplateRegistry::from_json(TEST_REGISTRY).expect("test registry is valid"))
    }

    pub fn generator(&self, launcher: Arc<FakeLauncher>) -> (DocumentGenerator, Arc<EngineManager>) {
        let engine = Arc::new(EngineManager::new(launcher, fast_policy()));
        let renderer = TemplateRenderer::new(self.templates.clone(), Duration::from_secs(60), false);
        let generator = DocumentGenerator::new(
            self.registry(),
            Arc::new(renderer),
            engine.clone(),
            PathResolver::new(self.storage.clone()),
        );
        (generator, engine)
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}
