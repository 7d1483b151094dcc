//! Output path resolution.
//!
//! File names follow `{prefix}_{sub_template}_{timestamp}.pdf`. The prefix is the
//! category's storage directory name, or `{serial_prefix}_{id}` for serial-numbered
//! instruments when an id is supplied. Downstream viewers and audit trails parse
//! both forms.

use chrono::{DateTime, TimeZone};
use std::path::{Path, PathBuf};

use super::registry::TemplateConfig;

pub const PDF_EXTENSION: &str = "pdf";

/// Where a document lands on disk, and the stable form persisted in records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPath {
    pub absolute: PathBuf,
    /// Always `/`-separated, relative to the storage root.
    pub relative: String,
}

impl OutputPath {
    /// Same location with a `-{n}` suffix before the extension.
    pub fn with_suffix(&self, n: u32) -> OutputPath {
        let relative = suffixed(&self.relative, n);
        let absolute = match self.absolute.file_name().and_then(|f| f.to_str()) {
            Some(file) => self.absolute.with_file_name(suffixed(file, n)),
            None => self.absolute.clone(),
        };
        OutputPath { absolute, relative }
    }
}

fn suffixed(name: &str, n: u32) -> String {
    match name.strip_suffix(&format!(".{}", PDF_EXTENSION)) {
        Some(stem) => format!("{}-{}.{}", stem, n, PDF_EXTENSION),
        None => format!("{}-{}", name, n),
    }
}

/// Pure mapping from (category, sub-template, instrument id, timestamp) to a path.
#[derive(Debug, Clone)]
pub struct PathResolver {
    storage_root: PathBuf,
}

impl PathResolver {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Directory that holds every document of the category.
    pub fn category_dir(&self, config: &TemplateConfig) -> PathBuf {
        join_relative(&self.storage_root, &config.storage_subpath)
    }

    pub fn output_path<Tz: TimeZone>(
        &self,
        config: &TemplateConfig,
        sub_template: &str,
        instrument_id: Option<i64>,
        timestamp: &DateTime<Tz>,
    ) -> OutputPath {
        let file_name = format!(
            "{}_{}_{}.{}",
            storage_prefix(config, instrument_id),
            sanitize_filename::sanitize(sub_template),
            timestamp.timestamp_millis(),
            PDF_EXTENSION
        );

        let subpath = normalize_subpath(&config.storage_subpath);
        let relative = if subpath.is_empty() {
            file_name
        } else {
            format!("{}/{}", subpath, file_name)
        };

        OutputPath {
            absolute: join_relative(&self.storage_root, &relative),
            relative,
        }
    }
}

fn storage_prefix(config: &TemplateConfig, instrument_id: Option<i64>) -> String {
    match (&config.serial_prefix, instrument_id) {
        (Some(kind), Some(id)) => format!("{}_{}", sanitize_filename::sanitize(kind), id),
        _ => {
            let subpath = normalize_subpath(&config.storage_subpath);
            let last = subpath.rsplit('/').next().unwrap_or_default();
            sanitize_filename::sanitize(last)
        }
    }
}

fn normalize_subpath(subpath: &str) -> String {
    subpath
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn join_relative(root: &Path, relative: &str) -> PathBuf {
    relative
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}
