//! Template registry - static mapping from document category to its template set.
//!
//! Loaded once at start-up, either from the JSON embedded in the binary or from an
//! operator-supplied file. Entries are validated as a whole; an invalid registry is
//! a deployment error and the service refuses to start with it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use super::validation::{
    validate_plain_name, validate_positive, validate_relative_path, ValidationError,
    ValidationErrors, Validator,
};
use super::GeneratorError;
use crate::engine::PageSetup;

const BUILTIN_REGISTRY: &str = include_str!("../../config/registry.json");

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse registry: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid registry entry '{category}':\n{message}")]
    Invalid { category: String, message: String },
    #[error("registry defines no categories")]
    Empty,
}

/// Custom page size in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width_pt: f64,
    pub height_pt: f64,
}

/// Configuration of one document category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Category key; filled in from the map key at load time.
    #[serde(skip)]
    pub category: String,
    pub template_dir: String,
    /// Rendered in this order; one PDF each.
    pub sub_templates: Vec<String>,
    pub storage_subpath: String,
    #[serde(default)]
    pub page_geometry: Option<PageGeometry>,
    /// Instrument variant → directory alias.
    #[serde(default)]
    pub variants: BTreeMap<String, String>,
    /// Set for serial-numbered instruments; names files `{prefix}_{id}_...`.
    #[serde(default)]
    pub serial_prefix: Option<String>,
}

impl TemplateConfig {
    /// Directory to load templates from, honouring a known variant alias.
    pub fn template_dir_for(&self, variant: Option<&str>) -> &str {
        variant
            .and_then(|v| self.variants.get(v))
            .map(String::as_str)
            .unwrap_or(&self.template_dir)
    }

    pub fn page_setup(&self) -> PageSetup {
        match self.page_geometry {
            Some(geometry) => PageSetup::custom(geometry.width_pt, geometry.height_pt),
            None => PageSetup::default(),
        }
    }
}

impl Validator for TemplateConfig {
    fn validate(&self) -> Result<(), String> {
        let mut errors = ValidationErrors::new();

        validate_relative_path(&self.template_dir, "template_dir", "Template directory", &mut errors);
        validate_relative_path(
            &self.storage_subpath,
            "storage_subpath",
            "Storage subpath",
            &mut errors,
        );

        if self.sub_templates.is_empty() {
            errors.add(ValidationError::empty_field(
                "sub_templates",
                "Sub-template list",
            ));
        }
        for (i, name) in self.sub_templates.iter().enumerate() {
            validate_plain_name(name, &format!("sub_templates[{}]", i), &mut errors);
            if self.sub_templates[..i].contains(name) {
                errors.add(ValidationError::new(
                    format!("sub_templates[{}]", i),
                    format!("'{}' is listed more than once", name),
                ));
            }
        }

        for (variant, dir) in &self.variants {
            validate_relative_path(dir, &format!("variants.{}", variant), "Variant alias", &mut errors);
        }

        if let Some(ref prefix) = self.serial_prefix {
            validate_plain_name(prefix, "serial_prefix", &mut errors);
        }

        if let Some(geometry) = self.page_geometry {
            validate_positive(geometry.width_pt, "page_geometry.width_pt", &mut errors);
            validate_positive(geometry.height_pt, "page_geometry.height_pt", &mut errors);
        }

        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    categories: BTreeMap<String, TemplateConfig>,
}

/// Immutable category lookup.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    categories: BTreeMap<String, TemplateConfig>,
}

impl TemplateRegistry {
    /// Registry embedded in the binary.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_json(BUILTIN_REGISTRY)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = serde_json::from_str(raw)?;
        Self::from_entries(file.categories)
    }

    pub fn from_entries(
        entries: impl IntoIterator<Item = (String, TemplateConfig)>,
    ) -> Result<Self, RegistryError> {
        let mut categories = BTreeMap::new();
        for (key, mut config) in entries {
            if key.trim().is_empty() {
                return Err(RegistryError::Invalid {
                    category: key,
                    message: "category key must not be empty".into(),
                });
            }
            config.validate().map_err(|message| RegistryError::Invalid {
                category: key.clone(),
                message,
            })?;
            config.category = key.clone();
            categories.insert(key, config);
        }

        if categories.is_empty() {
            return Err(RegistryError::Empty);
        }

        log::info!("Template registry loaded with {} categories", categories.len());
        Ok(Self { categories })
    }

    pub fn resolve(&self, category: &str) -> Result<&TemplateConfig, GeneratorError> {
        self.categories
            .get(category)
            .ok_or_else(|| GeneratorError::UnknownCategory(category.to_string()))
    }

    pub fn storage_subpath(&self, category: &str) -> Result<&str, GeneratorError> {
        self.resolve(category).map(|c| c.storage_subpath.as_str())
    }

    /// Custom geometry when configured, the default page otherwise.
    pub fn page_geometry(&self, category: &str) -> Result<PageSetup, GeneratorError> {
        self.resolve(category).map(TemplateConfig::page_setup)
    }

    pub fn categories(&self) -> impl Iterator<Item = &TemplateConfig> {
        self.categories.values()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
