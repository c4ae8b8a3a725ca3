//! Match engine configuration.
//!
//! Each run gets a `config.xml` rendered from a template selected by match mode. Templates
//! reference run files through the `{{jobDir}}` placeholder, which is replaced with the
//! absolute workspace path, XML-escaped so any work root yields a well-formed document.
//!
//! Template lookup:
//! 1. templates compiled into the binary, by name
//! 2. the filesystem, treating the name as a path
//!
//! The engine writes its duplicates to the file named by
//! `configuration/left-data-source/preprocessing/deduplication/minus-file/@file`, which
//! [`locate_duplicates_file`] reads back from the rendered configuration.

use crate::config::CoreConfig;
use crate::constants::{DEFAULT_DEDUPLICATION_TEMPLATE, DEFAULT_LINKAGE_TEMPLATE};
use crate::request::MatchMode;
use crate::{MatchError, PtmatchResult};
use ptmatch_workspace::RunWorkspace;
use std::path::{Path, PathBuf};

const JOB_DIR_PLACEHOLDER: &str = "jobDir";

/// Looks up a configuration template by name.
pub trait TemplateSource: Send + Sync {
    /// Template text, or `None` when this source does not have `name`.
    fn load(&self, name: &str) -> Option<String>;
}

/// Templates shipped inside the binary.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbeddedTemplates;

impl TemplateSource for EmbeddedTemplates {
    fn load(&self, name: &str) -> Option<String> {
        let text = match name {
            DEFAULT_DEDUPLICATION_TEMPLATE => {
                include_str!("../templates/fril-dedupe-allFieldsNearlyEqualWeight-accept60.xml")
            }
            DEFAULT_LINKAGE_TEMPLATE => {
                include_str!("../templates/fril-linkage-allFieldsNearlyEqualWeight-accept60.xml")
            }
            _ => return None,
        };
        Some(text.to_string())
    }
}

/// Templates read from disk; the name is a path.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileSystemTemplates;

impl TemplateSource for FileSystemTemplates {
    fn load(&self, name: &str) -> Option<String> {
        match std::fs::read_to_string(name) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::debug!("template {} not readable from filesystem: {}", name, e);
                None
            }
        }
    }
}

/// Embedded templates first, then the filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct LayeredTemplateSource {
    embedded: EmbeddedTemplates,
    filesystem: FileSystemTemplates,
}

impl TemplateSource for LayeredTemplateSource {
    fn load(&self, name: &str) -> Option<String> {
        self.embedded
            .load(name)
            .or_else(|| self.filesystem.load(name))
    }
}

/// Name of the template configured for `mode`.
pub fn template_name(mode: MatchMode, config: &CoreConfig) -> PtmatchResult<&str> {
    let name = match mode {
        MatchMode::Deduplication => config.deduplication_template(),
        MatchMode::Linkage => config.linkage_template(),
    };
    name.ok_or_else(|| {
        MatchError::Configuration(format!("No Template File set for {} mode", mode.as_str()))
    })
}

/// Render the configuration for `mode` bound to `workspace_path`.
///
/// # Errors
///
/// Returns [`MatchError::Configuration`] when no template is configured for the mode, the
/// template cannot be found, or it uses a placeholder other than `{{jobDir}}`.
pub fn render_config(
    mode: MatchMode,
    workspace_path: &Path,
    templates: &dyn TemplateSource,
    config: &CoreConfig,
) -> PtmatchResult<String> {
    let name = template_name(mode, config)?;
    let template = templates.load(name).ok_or_else(|| {
        MatchError::Configuration(format!(
            "Unable to load matching rule configuration template: {name}"
        ))
    })?;

    substitute(&template, &xml_escape(&workspace_path.display().to_string()))
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn substitute(template: &str, job_dir: &str) -> PtmatchResult<String> {
    let mut out = String::with_capacity(template.len() + job_dir.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            MatchError::Configuration("unterminated placeholder in configuration template".into())
        })?;

        let key = after[..end].trim();
        if key != JOB_DIR_PLACEHOLDER {
            return Err(MatchError::Configuration(format!(
                "unknown placeholder '{{{{{key}}}}}' in configuration template"
            )));
        }
        out.push_str(job_dir);
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Writes the rendered configuration into run workspaces.
pub struct MatchConfigGenerator<'a> {
    config: &'a CoreConfig,
    templates: &'a dyn TemplateSource,
}

impl<'a> MatchConfigGenerator<'a> {
    pub fn new(config: &'a CoreConfig, templates: &'a dyn TemplateSource) -> Self {
        Self { config, templates }
    }

    /// Render and write `config.xml` for `mode` into `workspace`.
    ///
    /// # Returns
    ///
    /// Path of the written configuration file.
    pub fn generate(&self, mode: MatchMode, workspace: &RunWorkspace) -> PtmatchResult<PathBuf> {
        let rendered = render_config(mode, workspace.path(), self.templates, self.config)?;
        let path = workspace.config_file();
        std::fs::write(&path, rendered)?;
        tracing::debug!("wrote {} configuration to {}", mode.as_str(), path.display());
        Ok(path)
    }
}

/// Path of the duplicates file named by a rendered configuration.
///
/// # Errors
///
/// Returns [`MatchError::Configuration`] if the configuration cannot be parsed or does not
/// name a duplicates file.
pub fn locate_duplicates_file(config_path: &Path) -> PtmatchResult<PathBuf> {
    let text = std::fs::read_to_string(config_path)?;
    let doc = roxmltree::Document::parse(&text).map_err(|e| {
        MatchError::Configuration(format!(
            "Unable to find duplicates file: {} is not valid XML: {e}",
            config_path.display()
        ))
    })?;

    let file = ["left-data-source", "preprocessing", "deduplication", "minus-file"]
        .iter()
        .try_fold(doc.root_element(), |node, tag| {
            node.children().find(|c| c.has_tag_name(*tag))
        })
        .filter(|_| doc.root_element().has_tag_name("configuration"))
        .and_then(|minus_file| minus_file.attribute("file"))
        .filter(|file| !file.trim().is_empty())
        .ok_or_else(|| {
            MatchError::Configuration(format!(
                "Unable to find duplicates file in {}",
                config_path.display()
            ))
        })?;

    Ok(PathBuf::from(file))
}
