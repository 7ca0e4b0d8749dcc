//! The data bag a single render call exposes to templates.

use std::sync::Arc;

use serde_json::{Map, Value};

/// Per-render template context.
///
/// `site` is the shared snapshot and is never copied into the context;
/// every other key (`page`, `content`, `layout`, `paginator`, extras) is
/// owned by this render call.
#[derive(Debug, Clone)]
pub struct RenderContext {
    site: Arc<Value>,
    locals: Map<String, Value>,
}

impl RenderContext {
    pub fn new(site: Arc<Value>) -> Self {
        Self {
            site,
            locals: Map::new(),
        }
    }

    pub fn site(&self) -> &Arc<Value> {
        &self.site
    }

    pub fn insert<S: Into<String>>(&mut self, key: S, value: Value) {
        self.locals.insert(key.into(), value);
    }

    /// Merge top-level keys, overwriting existing ones. `site` is ignored.
    pub fn extend(&mut self, values: Map<String, Value>) {
        for (key, value) in values {
            if key == "site" {
                tracing::debug!("ignoring additional context key 'site'");
                continue;
            }
            self.locals.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        if key == "site" {
            return Some(&self.site);
        }
        self.locals.get(key)
    }

    pub fn page(&self) -> Option<&Map<String, Value>> {
        self.locals.get("page").and_then(Value::as_object)
    }

    /// Set `page.content`, creating `page` if needed.
    pub fn set_page_content<S: Into<String>>(&mut self, content: S) {
        let page = self
            .locals
            .entry("page")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(page) = page {
            page.insert("content".into(), Value::String(content.into()));
        }
    }

    /// Set the top-level `content` a layout embeds.
    pub fn set_content<S: Into<String>>(&mut self, content: S) {
        self.locals
            .insert("content".into(), Value::String(content.into()));
    }

    /// Resolve a dotted path such as `page.author.name` or `posts.0.url`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn to_tera(&self) -> tera::Context {
        let mut context = tera::Context::new();
        context.insert("site", self.site.as_ref());
        for (key, value) in &self.locals {
            context.insert(key.as_str(), value);
        }
        context
    }
}
