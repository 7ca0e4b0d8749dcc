use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::SiteConfig;
use crate::site::{Document, Layout, StaticSite};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Source directory not specified")]
    MissingSourceDir,
    #[error("Layout '{0}' registered twice")]
    DuplicateLayout(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct SiteBuilder {
    source_dir: Option<PathBuf>,
    config: SiteConfig,
    layouts: Vec<Layout>,
    documents: Vec<Document>,
    data: Map<String, Value>,
}

impl Default for SiteBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteBuilder {
    pub fn new() -> Self {
        Self {
            source_dir: None,
            config: SiteConfig::default(),
            layouts: Vec::new(),
            documents: Vec::new(),
            data: Map::new(),
        }
    }

    // Required configuration
    pub fn source_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.source_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn config(mut self, config: SiteConfig) -> Self {
        self.config = config;
        self
    }

    // Content management
    pub fn layout(mut self, layout: Layout) -> Self {
        self.layouts.push(layout);
        self
    }

    pub fn layouts(mut self, layouts: Vec<Layout>) -> Self {
        self.layouts.extend(layouts);
        self
    }

    pub fn document(mut self, document: Document) -> Self {
        self.documents.push(document);
        self
    }

    pub fn documents(mut self, documents: Vec<Document>) -> Self {
        self.documents.extend(documents);
        self
    }

    /// Add an entry under `site.data`, as a `_data/<key>` file would.
    pub fn data<T: Serialize>(mut self, key: &str, value: T) -> Result<Self, BuildError> {
        let json_value = serde_json::to_value(value)?;
        self.data.insert(key.to_string(), json_value);
        Ok(self)
    }

    pub fn build(self) -> Result<StaticSite, BuildError> {
        let source = self.source_dir.ok_or(BuildError::MissingSourceDir)?;

        let mut layouts = HashMap::with_capacity(self.layouts.len());
        for layout in self.layouts {
            if layouts.contains_key(&layout.name) {
                return Err(BuildError::DuplicateLayout(layout.name));
            }
            layouts.insert(layout.name.clone(), layout);
        }

        Ok(StaticSite {
            source,
            config: self.config,
            layouts,
            documents: self.documents,
            data: RwLock::new(self.data),
            time: Local::now(),
        })
    }
}
