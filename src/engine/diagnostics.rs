//! Classification of engine launch failures.
//!
//! Best-effort: the raw failure text is matched against a small ordered table of
//! known signatures. Anything that does not match is surfaced as-is, without
//! remediation text.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticClass {
    /// The browser binary exists but cannot load its shared libraries.
    MissingSystemDependencies,
    /// No browser binary could be found.
    NotInstalled,
    /// The binary was found but the process could not start (permissions, memory, limits).
    LaunchFailure,
    Unclassified,
}

impl DiagnosticClass {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissingSystemDependencies => "missing system dependencies",
            Self::NotInstalled => "browser not installed",
            Self::LaunchFailure => "launch failed (permissions/resources)",
            Self::Unclassified => "unclassified failure",
        }
    }
}

/// A classified failure with optional operator remediation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub class: DiagnosticClass,
    pub raw: String,
    /// Offending item pulled from the message, e.g. the missing `.so` file.
    pub detail: Option<String>,
    pub remediation: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.class.label(), self.raw)?;
        if let Some(ref detail) = self.detail {
            write!(f, " (offending item: {})", detail)?;
        }
        if let Some(ref remediation) = self.remediation {
            write!(f, ". Remediation: {}", remediation)?;
        }
        Ok(())
    }
}

struct Signature {
    pattern: Regex,
    class: DiagnosticClass,
    remediation: &'static str,
}

const MISSING_DEPS_REMEDIATION: &str = concat!(
    "install the shared libraries the browser links against ",
    "(Debian/Ubuntu: apt-get install -y libnss3 libatk1.0-0 libatk-bridge2.0-0 libcups2 ",
    "libdrm2 libxkbcommon0 libxcomposite1 libxdamage1 libxrandr2 libgbm1 libasound2 ",
    "libpango-1.0-0 libcairo2), then restart the service"
);

const NOT_INSTALLED_REMEDIATION: &str =
    "install Chrome or Chromium on the host, or point CHROME_PATH at the browser executable";

const LAUNCH_FAILURE_REMEDIATION: &str = concat!(
    "check that the service user may execute the browser binary, that /tmp and /dev/shm are ",
    "writable, and that the host has free memory and process slots"
);

lazy_static! {
    // Order matters: launch errors caused by a missing library also say "failed to launch".
    static ref SIGNATURES: Vec<Signature> = vec![
        Signature {
            pattern: Regex::new(
                r"(?i)(error while loading shared libraries|cannot open shared object file|\.so(\.\d+)*\b)"
            )
            .expect("valid regex"),
            class: DiagnosticClass::MissingSystemDependencies,
            remediation: MISSING_DEPS_REMEDIATION,
        },
        Signature {
            pattern: Regex::new(
                r"(?i)(could not auto detect a chrome executable|binary not found|executable not found|no such file or directory|could not find .*(chrome|chromium))"
            )
            .expect("valid regex"),
            class: DiagnosticClass::NotInstalled,
            remediation: NOT_INSTALLED_REMEDIATION,
        },
        Signature {
            pattern: Regex::new(
                r"(?i)(failed to launch|permission denied|eacces|operation not permitted|out of memory|resource temporarily unavailable|timed out)"
            )
            .expect("valid regex"),
            class: DiagnosticClass::LaunchFailure,
            remediation: LAUNCH_FAILURE_REMEDIATION,
        },
    ];
    static ref SHARED_LIBRARY: Regex =
        Regex::new(r"(lib[A-Za-z0-9_+.-]*?\.so(\.\d+)*)").expect("valid regex");
}

/// Classify a raw launch failure message.
pub fn classify(raw: &str) -> Diagnostic {
    let raw = raw.trim().to_string();

    for signature in SIGNATURES.iter() {
        if signature.pattern.is_match(&raw) {
            let detail = match signature.class {
                DiagnosticClass::MissingSystemDependencies => SHARED_LIBRARY
                    .captures(&raw)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string()),
                _ => None,
            };
            return Diagnostic {
                class: signature.class,
                raw,
                detail,
                remediation: Some(signature.remediation.to_string()),
            };
        }
    }

    Diagnostic {
        class: DiagnosticClass::Unclassified,
        raw,
        detail: None,
        remediation: None,
    }
}
