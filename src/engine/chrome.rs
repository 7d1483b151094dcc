//! Headless Chrome backend.
//!
//! Each render context is a fresh tab plus a private scratch directory; the HTML
//! is written there and loaded through a `file://` URL before printing.
//!
//! headless_chrome only scans the browser's stderr for the DevTools URL, so a
//! binary that cannot start is run first with `--version` to capture the
//! loader's own error text for classification.

use async_trait::async_trait;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions, Tab};
use log::{debug, info, warn};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

use super::{EngineError, EngineHandle, EngineLauncher, PageSetup, RenderContext, RenderEngine};

const POINTS_PER_INCH: f64 = 72.0;
const DOCUMENT_FILE: &str = "document.html";
const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ChromeLauncherConfig {
    /// Explicit browser binary; auto-detected when `None`.
    pub chrome_path: Option<PathBuf>,
    /// Chrome refuses to sandbox when running as root inside containers.
    pub sandbox: bool,
    /// How long the browser connection may sit idle before headless_chrome drops it.
    pub idle_timeout: Duration,
}

impl Default for ChromeLauncherConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            sandbox: false,
            idle_timeout: Duration::from_secs(60 * 60 * 24),
        }
    }
}

pub struct ChromeLauncher {
    config: ChromeLauncherConfig,
}

impl ChromeLauncher {
    pub fn new(config: ChromeLauncherConfig) -> Self {
        Self { config }
    }

    fn launch_options(&self, executable: &Path) -> Result<LaunchOptions<'static>, EngineError> {
        LaunchOptions::default_builder()
            .headless(true)
            .sandbox(self.config.sandbox)
            .path(Some(executable.to_path_buf()))
            .idle_browser_timeout(self.config.idle_timeout)
            .args(vec![
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--font-render-hinting=none"),
            ])
            .build()
            .map_err(|e| EngineError::Launch(e.to_string()))
    }

    fn executable(&self) -> Result<PathBuf, EngineError> {
        match self.config.chrome_path {
            Some(ref path) => Ok(path.clone()),
            None => headless_chrome::browser::default_executable().map_err(EngineError::Launch),
        }
    }

    /// Run `{chrome} --version` and fail with its stderr when it does not start.
    async fn preflight(&self, executable: &Path) -> Result<(), EngineError> {
        let version = tokio::process::Command::new(executable)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(PREFLIGHT_TIMEOUT, version).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(EngineError::Launch(format!(
                    "could not execute {}: {}",
                    executable.display(),
                    e
                )))
            }
            Err(_) => {
                return Err(EngineError::Launch(format!(
                    "{} --version timed out after {}s",
                    executable.display(),
                    PREFLIGHT_TIMEOUT.as_secs()
                )))
            }
        };

        if output.status.success() {
            debug!(
                "Browser binary {}: {}",
                executable.display(),
                String::from_utf8_lossy(&output.stdout).trim()
            );
            return Ok(());
        }

        Err(EngineError::Launch(format!(
            "{} exited with {}: {}",
            executable.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[async_trait]
impl EngineLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<EngineHandle, EngineError> {
        let executable = self.executable()?;
        self.preflight(&executable).await?;

        let options = self.launch_options(&executable)?;
        let browser = tokio::task::spawn_blocking(move || Browser::new(options))
            .await
            .map_err(|e| EngineError::Launch(format!("launch task aborted: {}", e)))?
            .map_err(|e| EngineError::Launch(format!("{:#}", e)))?;

        info!(
            "Chrome started (pid {})",
            browser
                .get_process_id()
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "unknown".into())
        );

        Ok(Arc::new(ChromeEngine {
            browser: Arc::new(browser),
            connected: AtomicBool::new(true),
        }))
    }
}

pub struct ChromeEngine {
    browser: Arc<Browser>,
    connected: AtomicBool,
}

#[async_trait]
impl RenderEngine for ChromeEngine {
    async fn open_context(&self) -> Result<Box<dyn RenderContext>, EngineError> {
        let workdir = tempfile::Builder::new()
            .prefix("docgen-ctx-")
            .tempdir()
            .map_err(EngineError::Scratch)?;

        let browser = self.browser.clone();
        let opened = tokio::task::spawn_blocking(move || match browser.new_tab() {
            Ok(tab) => Ok(tab),
            Err(e) => {
                let alive = browser.get_version().is_ok();
                Err((format!("{:#}", e), alive))
            }
        })
        .await
        .map_err(|e| EngineError::Context(format!("context task aborted: {}", e)))?;

        match opened {
            Ok(tab) => Ok(Box::new(ChromeContext {
                tab: Some(tab),
                workdir,
            })),
            Err((message, alive)) => {
                if !alive {
                    self.connected.store(false, Ordering::Release);
                }
                Err(EngineError::Context(message))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
        let browser = self.browser.clone();
        let close_tabs = move || {
            let tabs: Vec<Arc<Tab>> = match browser.get_tabs().lock() {
                Ok(tabs) => tabs.clone(),
                Err(_) => return,
            };
            for tab in tabs {
                if let Err(e) = tab.close(false) {
                    debug!("Tab did not close during shutdown: {:#}", e);
                }
            }
        };

        // The browser process is killed once the last `Browser` reference drops.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(close_tabs);
            }
            Err(_) => close_tabs(),
        }
    }
}

struct ChromeContext {
    tab: Option<Arc<Tab>>,
    workdir: TempDir,
}

fn document_url(path: &Path) -> Result<Url, EngineError> {
    Url::from_file_path(path).map_err(|_| {
        EngineError::Conversion(format!("{} is not an absolute file path", path.display()))
    })
}

fn print_options(page: &PageSetup) -> PrintToPdfOptions {
    let margin = page.margin_pt.map(|m| m / POINTS_PER_INCH);
    PrintToPdfOptions {
        print_background: Some(true),
        paper_width: Some(page.width_pt / POINTS_PER_INCH),
        paper_height: Some(page.height_pt / POINTS_PER_INCH),
        margin_top: margin,
        margin_bottom: margin,
        margin_left: margin,
        margin_right: margin,
        prefer_css_page_size: Some(false),
        ..Default::default()
    }
}

#[async_trait]
impl RenderContext for ChromeContext {
    async fn print_pdf(&mut self, html: &str, page: &PageSetup) -> Result<Vec<u8>, EngineError> {
        let tab = self
            .tab
            .clone()
            .ok_or_else(|| EngineError::Context("tab already closed".into()))?;

        let document = self.workdir.path().join(DOCUMENT_FILE);
        tokio::fs::write(&document, html)
            .await
            .map_err(EngineError::Scratch)?;

        let url = document_url(&document)?;
        let options = print_options(page);

        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
            tab.navigate_to(url.as_str())?;
            tab.wait_until_navigated()?;
            tab.print_to_pdf(Some(options))
        })
        .await
        .map_err(|e| EngineError::Conversion(format!("conversion task aborted: {}", e)))?
        .map_err(|e| EngineError::Conversion(format!("{:#}", e)))
    }

    async fn release(&mut self) -> Result<(), EngineError> {
        let Some(tab) = self.tab.take() else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || tab.close(true))
            .await
            .map_err(|e| EngineError::Context(format!("close task aborted: {}", e)))?
            .map(|_| ())
            .map_err(|e| EngineError::Context(format!("{:#}", e)))
    }

    fn close(&mut self) -> Result<(), EngineError> {
        let Some(tab) = self.tab.take() else {
            return Ok(());
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || {
                    if let Err(e) = tab.close(true) {
                        warn!("Failed to close Chrome tab: {:#}", e);
                    }
                });
                Ok(())
            }
            Err(_) => tab
                .close(true)
                .map(|_| ())
                .map_err(|e| EngineError::Context(format!("{:#}", e))),
        }
    }
}
