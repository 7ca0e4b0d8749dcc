use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parsing(#[from] toml::de::Error),
}

/// Site-wide settings consumed by the rendering pipeline.
///
/// Keys not modelled here land in `extra` and are projected into the site
/// snapshot unchanged, so templates can read `site.<anything>`.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SiteConfig {
    pub title: Option<String>,
    /// Absolute base, e.g. `https://example.com`.
    pub url: String,
    /// Path prefix the site is served under, e.g. `/blog`.
    pub baseurl: String,
    /// Comma separated list of extensions treated as markdown.
    pub markdown_ext: String,
    /// syntect theme used for fenced code blocks and `highlight`.
    pub highlight_theme: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: None,
            url: String::new(),
            baseurl: String::new(),
            markdown_ext: "markdown,mkdown,mkdn,mkd,md".to_string(),
            highlight_theme: "base16-ocean.dark".to_string(),
            extra: Map::new(),
        }
    }
}

impl SiteConfig {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(data)?)
    }

    /// Normalized markdown extensions: lowercase, no leading dot.
    pub fn markdown_extensions(&self) -> Vec<String> {
        self.markdown_ext
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect()
    }

    pub fn is_markdown_ext(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.').to_lowercase();
        self.markdown_extensions().iter().any(|m| *m == ext)
    }

    /// Flattened projection used as the top level of the site snapshot.
    pub fn to_value(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        if let Some(title) = &self.title {
            map.insert("title".into(), Value::String(title.clone()));
        }
        map.insert("url".into(), Value::String(self.url.clone()));
        map.insert("baseurl".into(), Value::String(self.baseurl.clone()));
        map.insert(
            "markdown_ext".into(),
            Value::String(self.markdown_ext.clone()),
        );
        map.insert(
            "highlight_theme".into(),
            Value::String(self.highlight_theme.clone()),
        );
        map
    }
}
