//! Manifest rendering.
//!
//! - `data`: assembles the per-pool render data from the NVIDIADriver
//! - this module: executes the template directory against that data and
//!   decodes the result into Kubernetes objects
//!
//! Templates are `minijinja` with strict undefined behaviour. Two helpers
//! are registered: the `yaml` filter (YAML serialization without the
//! trailing newline, meant to be piped into `indent`) and the `deref_bool`
//! function (missing or null means `false`).

pub mod data;

use std::path::{Path, PathBuf};

use kube::api::DynamicObject;
use minijinja::{AutoEscape, Environment, Error as TemplateError, ErrorKind, UndefinedBehavior, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

const TEMPLATE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Errors raised while rendering manifests. Any error aborts the whole render.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no templates found in {0}")]
    NoTemplates(PathBuf),

    #[error("failed to list templates in {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: TemplateError,
    },

    #[error("failed to decode output of {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid object in output of {path}: {source}")]
    Object {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Renders every template under a directory
#[derive(Debug, Clone)]
pub struct Renderer {
    dir: PathBuf,
}

impl Renderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Template files under the directory, sorted by full path
    pub fn template_files(&self) -> Result<Vec<PathBuf>, RenderError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir).follow_links(true) {
            let entry = entry.map_err(|source| RenderError::Walk {
                path: self.dir.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let has_template_extension = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext));
            if has_template_extension {
                files.push(entry.into_path());
            }
        }
        if files.is_empty() {
            return Err(RenderError::NoTemplates(self.dir.clone()));
        }
        files.sort();
        Ok(files)
    }

    /// Render all templates and decode them into objects, in file order
    pub fn render_objects<T: Serialize>(&self, data: &T) -> Result<Vec<DynamicObject>, RenderError> {
        let env = environment();
        let mut objects = Vec::new();
        for path in self.template_files()? {
            let source = std::fs::read_to_string(&path).map_err(|source| RenderError::Io {
                path: path.clone(),
                source,
            })?;
            let name = path.display().to_string();
            let rendered = env
                .render_named_str(&name, &source, data)
                .map_err(|source| RenderError::Template {
                    path: path.clone(),
                    source,
                })?;
            let decoded = decode_objects(&path, &rendered)?;
            debug!(template = %name, objects = decoded.len(), "Rendered template");
            objects.extend(decoded);
        }
        Ok(objects)
    }
}

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.add_filter("yaml", yaml_filter);
    env.add_function("deref_bool", deref_bool);
    env
}

fn yaml_filter(value: Value) -> Result<String, TemplateError> {
    serde_yaml::to_string(&value)
        .map(|text| text.trim_end().to_string())
        .map_err(|e| TemplateError::new(ErrorKind::InvalidOperation, format!("cannot serialize to YAML: {e}")))
}

fn deref_bool(value: Option<bool>) -> bool {
    value.unwrap_or(false)
}

/// Decode a YAML stream into objects, skipping blank documents and
/// documents without a `kind`
fn decode_objects(path: &Path, rendered: &str) -> Result<Vec<DynamicObject>, RenderError> {
    let mut objects = Vec::new();
    if rendered.trim().is_empty() {
        return Ok(objects);
    }
    for document in serde_yaml::Deserializer::from_str(rendered) {
        let value = serde_json::Value::deserialize(document).map_err(|source| RenderError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        if value.is_null() {
            continue;
        }
        let kind = value.get("kind").and_then(serde_json::Value::as_str).unwrap_or_default();
        if kind.is_empty() {
            continue;
        }
        let object: DynamicObject = serde_json::from_value(value).map_err(|source| RenderError::Object {
            path: path.to_path_buf(),
            source,
        })?;
        objects.push(object);
    }
    Ok(objects)
}
