//! Plugin registry: extensions, generators and converters.
//!
//! A plugin may play any combination of roles. Its capabilities are probed
//! once when it is registered and it is stored in one typed list per role,
//! so dispatch never has to inspect plugin shapes again.

use std::sync::Arc;

use crate::hooks::HookBus;
use crate::site::{Document, Site};
use crate::template::TemplateEngine;

pub const DEFAULT_PRIORITY: i32 = 50;

/// What a plugin gets to touch while it registers.
pub struct RegisterContext<'a> {
    pub engine: &'a mut TemplateEngine,
    pub hooks: &'a mut HookBus,
    pub site: &'a dyn Site,
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Add filters, tags or hooks. Called once at setup.
    fn register(&self, _cx: &mut RegisterContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn into_generator(self: Arc<Self>) -> Option<Arc<dyn Generator>> {
        None
    }

    fn into_converter(self: Arc<Self>) -> Option<Arc<dyn Converter>> {
        None
    }
}

/// A file emitted by a generator, relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratorOutput {
    pub files: Vec<GeneratedFile>,
}

/// Emits files not tied to a single source document (feeds, sitemaps,
/// redirects). Lower priority runs earlier.
pub trait Generator: Plugin {
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    fn generate(&self, site: &dyn Site, engine: &TemplateEngine) -> anyhow::Result<GeneratorOutput>;
}

/// Converts document content chosen by file extension. Lower priority is
/// consulted first; at most one converter runs per document.
pub trait Converter: Plugin {
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// `ext` includes the leading dot, e.g. `.md`.
    fn matches(&self, ext: &str) -> bool;

    fn convert(&self, content: &str, document: &Document, site: &dyn Site) -> anyhow::Result<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin '{name}' failed to register: {source:#}")]
    Register {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("generator '{name}' failed: {source:#}")]
    Generator {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    generators: Vec<Arc<dyn Generator>>,
    converters: Vec<Arc<dyn Converter>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("generators", &self.generators.iter().map(|g| g.name()).collect::<Vec<_>>())
            .field("converters", &self.converters.iter().map(|c| c.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a plugin under every role it plays.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        tracing::debug!(plugin = plugin.name(), "registering plugin");

        if let Some(generator) = Arc::clone(&plugin).into_generator() {
            self.generators.push(generator);
            // Stable: equal priorities keep registration order.
            self.generators.sort_by_key(|g| g.priority());
        }
        if let Some(converter) = Arc::clone(&plugin).into_converter() {
            self.converters.push(converter);
            self.converters.sort_by_key(|c| c.priority());
        }
        self.plugins.push(plugin);
    }

    /// Run each plugin's `register` and record the ones that succeed.
    ///
    /// A failing plugin is logged and skipped; the rest still register.
    /// Returns the failures.
    pub fn register_all<I>(&mut self, plugins: I, cx: &mut RegisterContext<'_>) -> Vec<PluginError>
    where
        I: IntoIterator<Item = Arc<dyn Plugin>>,
    {
        let mut failures = Vec::new();
        for plugin in plugins {
            match plugin.register(cx) {
                Ok(()) => self.register(plugin),
                Err(source) => {
                    let err = PluginError::Register {
                        name: plugin.name().to_string(),
                        source,
                    };
                    tracing::warn!(error = %err, "skipping plugin");
                    failures.push(err);
                }
            }
        }
        failures
    }

    /// First converter, in priority order, that claims `ext`.
    pub fn find_converter(&self, ext: &str) -> Option<Arc<dyn Converter>> {
        self.converters.iter().find(|c| c.matches(ext)).cloned()
    }

    pub fn basic_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.clone()
    }

    pub fn generators(&self) -> Vec<Arc<dyn Generator>> {
        self.generators.clone()
    }

    pub fn converters(&self) -> Vec<Arc<dyn Converter>> {
        self.converters.clone()
    }

    /// Run generators one after another in priority order.
    pub fn generate(
        &self,
        site: &dyn Site,
        engine: &TemplateEngine,
    ) -> Result<Vec<GeneratedFile>, PluginError> {
        let mut files = Vec::new();
        for generator in &self.generators {
            let output = generator
                .generate(site, engine)
                .map_err(|source| PluginError::Generator {
                    name: generator.name().to_string(),
                    source,
                })?;
            tracing::debug!(
                generator = generator.name(),
                files = output.files.len(),
                "generator finished"
            );
            files.extend(output.files);
        }
        Ok(files)
    }
}
