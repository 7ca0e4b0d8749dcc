//! Template execution on top of tera, with a Jekyll-style tag layer.

mod compat;
mod filters;
mod tags;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tera::Tera;

use crate::config::SiteConfig;
use crate::context::RenderContext;

pub use compat::{AvatarTag, HighlightTag, IncludeRelativeTag, LinkTag, PostUrlTag};
pub use tags::{ParsedTag, TagDefinition, TagToken};

const INLINE_TEMPLATE: &str = "__ember_inline__";

/// Location marker pest prints in tera syntax errors, e.g. ` --> 3:7`.
static LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-->\s*(\d+):(\d+)").expect("valid location regex"));

type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// A template failed to parse or evaluate.
///
/// Wrapping layers (layouts, documents) build a new error pointing at their
/// own file and keep the previous one as `cause`, so the root error stays
/// reachable through `source()`.
#[derive(Debug)]
pub struct TemplateError {
    pub message: String,
    pub file: Option<PathBuf>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub template_name: Option<String>,
    pub cause: Option<Cause>,
}

impl TemplateError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            file: None,
            line: None,
            column: None,
            template_name: None,
            cause: None,
        }
    }

    pub(crate) fn from_tera(err: tera::Error, template_name: &str) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(inner) = source {
            message.push('\n');
            message.push_str(&inner.to_string());
            source = inner.source();
        }

        let (line, column) = match LOCATION_RE.captures(&message) {
            Some(caps) => (caps[1].parse().ok(), caps[2].parse().ok()),
            None => (None, None),
        };

        Self {
            message,
            file: None,
            line,
            column,
            template_name: Some(template_name.to_string()),
            cause: Some(Box::new(err)),
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn named<S: Into<String>>(mut self, template_name: S) -> Self {
        self.template_name = Some(template_name.into());
        self
    }

    pub fn in_file<P: Into<PathBuf>>(mut self, file: P) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn caused_by<E: Into<Cause>>(mut self, cause: E) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Re-point the error at `file`, keeping `self` as the cause.
    pub fn wrap<P: Into<PathBuf>, S: Into<String>>(self, file: P, template_name: S) -> Self {
        Self {
            message: self.message.clone(),
            file: Some(file.into()),
            line: self.line,
            column: self.column,
            template_name: Some(template_name.into()),
            cause: Some(Box::new(self)),
        }
    }

    /// The innermost error in the `source()` chain.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}", file.display())?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
                if let Some(column) = self.column {
                    write!(f, ":{column}")?;
                }
            }
            write!(f, ": ")?;
        } else if let Some(line) = self.line {
            write!(f, "line {line}: ")?;
        }
        write!(f, "{}", self.message)?;
        if let Some(name) = &self.template_name {
            write!(f, " (in template '{name}')")?;
        }
        Ok(())
    }
}

impl StdError for TemplateError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Keep only the characters `allowed` accepts. Used by every tag and filter
/// that emits user-supplied text into HTML.
pub fn sanitize<F: Fn(char) -> bool>(input: &str, allowed: F) -> String {
    input.chars().filter(|c| allowed(*c)).collect()
}

/// Owns the template executor and the registered filters and tags.
#[derive(Clone)]
pub struct TemplateEngine {
    tera: Tera,
    tags: HashMap<String, Arc<dyn TagDefinition>>,
}

impl fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&str> = self.tags.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("TemplateEngine").field("tags", &tags).finish()
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Bare engine: tera builtins only, no autoescaping.
    pub fn new() -> Self {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        Self {
            tera,
            tags: HashMap::new(),
        }
    }

    /// Engine with the built-in filters and compatibility tags installed.
    pub fn with_defaults(config: &SiteConfig) -> Self {
        let mut engine = Self::new();
        filters::register(&mut engine, config);
        compat::register(&mut engine, config);
        engine
    }

    /// Register a filter. A later registration under the same name wins.
    pub fn register_filter<F: tera::Filter + 'static>(&mut self, name: &str, filter: F) {
        self.tera.register_filter(name, filter);
    }

    /// Register a tag. A later registration under the same name wins.
    pub fn register_tag<T: TagDefinition + 'static>(&mut self, name: &str, tag: T) {
        if self.tags.insert(name.to_string(), Arc::new(tag)).is_some() {
            tracing::debug!(tag = name, "replacing previously registered tag");
        }
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn render(&self, source: &str, context: &RenderContext) -> Result<String, TemplateError> {
        self.render_named(INLINE_TEMPLATE, source, context)
    }

    /// Render `source`, reporting failures against `name`.
    pub fn render_named(
        &self,
        name: &str,
        source: &str,
        context: &RenderContext,
    ) -> Result<String, TemplateError> {
        let expanded = tags::expand(source, &self.tags, name)?;

        // Each render gets its own copy so concurrent renders never share
        // the template table or the tag function.
        let mut tera = self.tera.clone();
        let (source, tag_failure) = expanded.install(&mut tera, context);
        tera.add_raw_template(name, &source)
            .map_err(|e| TemplateError::from_tera(e, name))?;
        tera.render(name, &context.to_tera()).map_err(|e| {
            tag_failure
                .lock()
                .take()
                .unwrap_or_else(|| TemplateError::from_tera(e, name))
        })
    }

    pub fn render_file<P: AsRef<Path>>(
        &self,
        path: P,
        context: &RenderContext,
    ) -> Result<String, TemplateError> {
        let path = path.as_ref();
        let name = path.to_string_lossy();
        let source = std::fs::read_to_string(path).map_err(|e| {
            TemplateError::new(format!("cannot read template: {e}"))
                .in_file(path)
                .named(&*name)
                .caused_by(e)
        })?;

        self.render_named(&name, &source, context)
            .map_err(|e| e.in_file(path))
    }
}
