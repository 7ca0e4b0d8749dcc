use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::config::SiteConfig;

/// A single source unit: page, post or collection entry.
///
/// Identity is the path relative to the site source. Front matter has
/// already been split off by the loader and lives in `data`.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub content: String,
    pub data: Map<String, Value>,
    pub url: String,
    pub layout: Option<String>,
    /// Collection label, e.g. `posts`. `None` for plain pages.
    pub collection: Option<String>,
    pub date: Option<DateTime<FixedOffset>>,
    pub published: bool,
}

impl Document {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(path: P, content: S) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            data: Map::new(),
            url: String::new(),
            layout: None,
            collection: None,
            date: None,
            published: true,
        }
    }

    pub fn with_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_layout<S: Into<String>>(mut self, layout: S) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn with_data<S: Into<String>, V: Into<Value>>(mut self, key: S, value: V) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn in_collection<S: Into<String>>(mut self, collection: S) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Extension including the leading dot, e.g. `.md`. Empty if none.
    pub fn extname(&self) -> String {
        self.path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default()
    }

    pub fn basename(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// File stem, e.g. `2024-01-05-hello` for `_posts/2024-01-05-hello.md`.
    pub fn slug(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn title(&self) -> Option<&str> {
        self.data.get("title").and_then(Value::as_str)
    }

    /// Front matter merged with the computed fields templates see as `page`.
    ///
    /// Computed fields win over front matter keys of the same name.
    pub fn to_value(&self) -> Map<String, Value> {
        let mut page = self.data.clone();
        page.insert(
            "path".into(),
            Value::String(self.path.to_string_lossy().to_string()),
        );
        page.insert("url".into(), Value::String(self.url.clone()));
        page.insert("extname".into(), Value::String(self.extname()));
        page.insert("basename".into(), Value::String(self.basename()));
        page.insert("slug".into(), Value::String(self.slug()));
        page.insert("published".into(), Value::Bool(self.published));
        page.insert("content".into(), Value::String(self.content.clone()));
        if let Some(layout) = &self.layout {
            page.insert("layout".into(), Value::String(layout.clone()));
        }
        if let Some(collection) = &self.collection {
            page.insert("collection".into(), Value::String(collection.clone()));
        }
        if let Some(date) = &self.date {
            page.insert("date".into(), Value::String(date.to_rfc3339()));
        }
        page
    }
}

/// A wrapper template keyed by name. May name a parent in `data.layout`.
#[derive(Debug, Clone)]
pub struct Layout {
    pub name: String,
    pub path: PathBuf,
    pub content: String,
    pub data: Map<String, Value>,
}

impl Layout {
    pub fn new<S: Into<String>, C: Into<String>>(name: S, content: C) -> Self {
        let name = name.into();
        Self {
            path: PathBuf::from("_layouts").join(format!("{name}.html")),
            name,
            content: content.into(),
            data: Map::new(),
        }
    }

    pub fn with_parent<S: Into<String>>(mut self, parent: S) -> Self {
        self.data.insert("layout".into(), Value::String(parent.into()));
        self
    }

    pub fn with_data<S: Into<String>, V: Into<Value>>(mut self, key: S, value: V) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn parent(&self) -> Option<&str> {
        self.data
            .get("layout")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
    }
}

/// What the rendering pipeline needs from the site it renders.
pub trait Site: Send + Sync {
    fn config(&self) -> &SiteConfig;

    fn source(&self) -> &Path;

    fn layout(&self, name: &str) -> Option<&Layout>;

    /// Full read-only projection exposed to templates as `site`.
    fn to_value(&self) -> Value;
}

/// In-memory site assembled by [`crate::builder::SiteBuilder`].
pub struct StaticSite {
    pub(crate) source: PathBuf,
    pub(crate) config: SiteConfig,
    pub(crate) layouts: HashMap<String, Layout>,
    pub(crate) documents: Vec<Document>,
    pub(crate) data: RwLock<Map<String, Value>>,
    pub(crate) time: DateTime<Local>,
}

impl StaticSite {
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn document<P: AsRef<Path>>(&self, path: P) -> Option<&Document> {
        self.documents.iter().find(|d| d.path == path.as_ref())
    }

    /// Replace a `site.data` entry. Renderers keep serving their cached
    /// snapshot until `invalidate_site_cache` is called.
    pub fn insert_data<S: Into<String>>(&self, key: S, value: Value) {
        self.data.write().insert(key.into(), value);
    }
}

impl Site for StaticSite {
    fn config(&self) -> &SiteConfig {
        &self.config
    }

    fn source(&self) -> &Path {
        &self.source
    }

    fn layout(&self, name: &str) -> Option<&Layout> {
        self.layouts.get(name)
    }

    fn to_value(&self) -> Value {
        let mut site = self.config.to_value();

        let mut collections: BTreeMap<String, Vec<&Document>> = BTreeMap::new();
        let mut pages = Vec::new();
        for doc in self.documents.iter().filter(|d| d.published) {
            match &doc.collection {
                Some(label) => collections.entry(label.clone()).or_default().push(doc),
                None => pages.push(Value::Object(doc.to_value())),
            }
        }

        let mut posts: Vec<&Document> = collections.get("posts").cloned().unwrap_or_default();
        posts.sort_by(|a, b| b.date.cmp(&a.date));

        site.insert(
            "source".into(),
            Value::String(self.source.to_string_lossy().to_string()),
        );
        site.insert("time".into(), Value::String(self.time.to_rfc3339()));
        site.insert("data".into(), Value::Object(self.data.read().clone()));
        site.insert(
            "documents".into(),
            Value::Array(
                self.documents
                    .iter()
                    .filter(|d| d.published)
                    .map(|d| Value::Object(d.to_value()))
                    .collect(),
            ),
        );
        site.insert("pages".into(), Value::Array(pages));
        site.insert(
            "posts".into(),
            Value::Array(posts.iter().map(|d| Value::Object(d.to_value())).collect()),
        );
        site.insert(
            "collections".into(),
            Value::Object(
                collections
                    .into_iter()
                    .map(|(label, docs)| {
                        let docs = docs.iter().map(|d| Value::Object(d.to_value())).collect();
                        (label, Value::Array(docs))
                    })
                    .collect(),
            ),
        );

        Value::Object(site)
    }
}
