// Copyright 2025 The Dragonglass Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Plugin metadata carried as namespaced OCI manifest annotations.
//!
//! Publishers mirror the fields of the plugin's `manifest.json` into
//! annotations under a namespace (`vnd.obsidian.plugin` by default). The
//! namespace is an explicit parameter so concurrent verifications with
//! different publisher conventions stay well-defined.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::lockfile::PluginMetadata;

/// Default annotation namespace for plugin metadata.
pub const DEFAULT_ANNOTATION_NAMESPACE: &str = "vnd.obsidian.plugin";

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("required annotation {0:?} not found")]
    MissingAnnotation(String),
}

/// Plugin metadata as published alongside the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub id: String,

    pub name: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_app_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_url: Option<String>,

    #[serde(default)]
    pub is_desktop_only: bool,
}

/// One failed validation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

/// The outcome of validating a [`PluginInfo`].
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
}

impl PluginInfo {
    /// Extracts plugin metadata from manifest annotations under
    /// `namespace`. `id`, `name` and `version` are required; the rest is
    /// optional.
    pub fn from_annotations(
        namespace: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Self, PluginError> {
        let required = |field: &str| {
            let key = format!("{namespace}.{field}");
            annotations
                .get(&key)
                .cloned()
                .ok_or(PluginError::MissingAnnotation(key))
        };
        let optional = |field: &str| annotations.get(&format!("{namespace}.{field}")).cloned();

        Ok(PluginInfo {
            id: required("id")?,
            name: required("name")?,
            version: required("version")?,
            min_app_version: optional("minAppVersion"),
            description: optional("description"),
            author: optional("author"),
            author_url: optional("authorUrl"),
            is_desktop_only: optional("isDesktopOnly").as_deref() == Some("true"),
        })
    }

    /// Validates the metadata. In lenient mode, malformed ids and
    /// versions degrade to warnings; empty required fields are always
    /// errors.
    pub fn validate(&self, strict: bool) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut error = |field, message: String| {
            report.errors.push(ValidationIssue { field, message });
        };

        if self.id.is_empty() {
            error("id", "plugin ID cannot be empty".into());
        } else if !is_valid_plugin_id(&self.id) {
            let message = "plugin ID must contain only lowercase letters, numbers, and hyphens";
            if strict {
                error("id", message.into());
            } else {
                report.warnings.push(format!("plugin ID format: {message}"));
            }
        }

        if self.name.is_empty() {
            error("name", "plugin name cannot be empty".into());
        }

        if self.version.is_empty() {
            error("version", "plugin version cannot be empty".into());
        } else if !is_valid_semver(&self.version) {
            let message = "plugin version must be a valid semantic version (e.g., 1.0.0)";
            if strict {
                error("version", message.into());
            } else {
                report.warnings.push(format!("version format: {message}"));
            }
        }

        if let Some(min) = &self.min_app_version {
            if !is_valid_semver(min) {
                error(
                    "minAppVersion",
                    "minimum app version must be a valid semantic version".into(),
                );
            }
        }

        if let Some(url) = &self.author_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                error("authorUrl", "author URL must be a valid URL".into());
            }
        }

        report.valid = report.errors.is_empty();
        report
    }

    /// The lockfile metadata recorded for this plugin.
    pub fn lockfile_metadata(&self) -> PluginMetadata {
        PluginMetadata {
            author: self.author.clone(),
            description: self.description.clone(),
            homepage: self.author_url.clone(),
            repository: None,
            license: None,
            tags: Vec::new(),
        }
    }
}

fn is_valid_plugin_id(id: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9-]+$").expect("static pattern"));
    !id.is_empty() && id.len() <= 100 && pattern.is_match(id)
}

fn is_valid_semver(version: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^\d+\.\d+\.\d+(-[a-zA-Z0-9.-]+)?(\+[a-zA-Z0-9.-]+)?$")
            .expect("static pattern")
    });
    pattern.is_match(version)
}
