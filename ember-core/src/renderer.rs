//! The document rendering pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde_json::{Map, Value, json};

use crate::cache::SiteCache;
use crate::context::RenderContext;
use crate::hooks::{Hook, HookBus, HookContext, HookError};
use crate::layout::{LayoutError, LayoutResolver};
use crate::markdown::Markdown;
use crate::plugin::{GeneratedFile, Plugin, PluginError, PluginRegistry, RegisterContext};
use crate::site::{Document, Site};
use crate::template::{TemplateEngine, TemplateError};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("{}: circular layout reference: {}", file.display(), chain.join(" -> "))]
    CircularLayout { chain: Vec<String>, file: PathBuf },
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// A converter plugin failed on one document. Recovered locally and only
/// ever logged.
#[derive(Debug, thiserror::Error)]
#[error("converter '{converter}' failed on {}: {source:#}", path.display())]
pub struct ConverterFailure {
    pub converter: String,
    pub path: PathBuf,
    #[source]
    pub source: anyhow::Error,
}

/// One page of a paginated listing, built by the caller.
#[derive(Debug, Clone, Default)]
pub struct Paginator {
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
    pub total_posts: usize,
    pub previous_page: Option<usize>,
    pub previous_page_path: Option<String>,
    pub next_page: Option<usize>,
    pub next_page_path: Option<String>,
    pub posts: Vec<Document>,
}

impl Paginator {
    pub fn to_value(&self) -> Value {
        let posts: Vec<Value> = self
            .posts
            .iter()
            .map(|post| Value::Object(post.to_value()))
            .collect();
        json!({
            "page": self.page,
            "per_page": self.per_page,
            "total_pages": self.total_pages,
            "total_posts": self.total_posts,
            "previous_page": self.previous_page,
            "previous_page_path": self.previous_page_path,
            "next_page": self.next_page,
            "next_page_path": self.next_page_path,
            "posts": posts,
        })
    }
}

/// Assembles a [`DocumentRenderer`]: engine defaults, plugins, hooks.
pub struct RendererBuilder {
    site: Arc<dyn Site>,
    plugins: Vec<Arc<dyn Plugin>>,
    hooks: HookBus,
}

impl RendererBuilder {
    pub fn new<S: Site + 'static>(site: Arc<S>) -> Self {
        Self {
            site,
            plugins: Vec::new(),
            hooks: HookBus::new(),
        }
    }

    pub fn plugin<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn plugins(mut self, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    pub fn hook<F>(mut self, owner: &str, event: &str, callback: F) -> Result<Self, HookError>
    where
        F: Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.register(owner, event, callback)?;
        Ok(self)
    }

    /// Register plugins, freeze the registries and fire `site:after_init`.
    pub fn build(self) -> Result<DocumentRenderer, RenderError> {
        let Self {
            site,
            plugins,
            mut hooks,
        } = self;

        let mut engine = TemplateEngine::with_defaults(site.config());
        let mut registry = PluginRegistry::new();
        let mut cx = RegisterContext {
            engine: &mut engine,
            hooks: &mut hooks,
            site: site.as_ref(),
        };
        let skipped = registry.register_all(plugins, &mut cx).len();
        tracing::debug!(
            plugins = registry.basic_plugins().len(),
            skipped,
            "plugins registered"
        );

        hooks.trigger(Hook::SiteAfterInit, &mut HookContext::for_site(site.as_ref()))?;

        let markdown = Markdown::new(site.config().highlight_theme.clone());
        Ok(DocumentRenderer {
            site,
            engine: Arc::new(engine),
            plugins: Arc::new(registry),
            hooks: Arc::new(hooks),
            cache: SiteCache::new(),
            markdown,
        })
    }
}

/// Renders documents of one site. Registries are read-only once built.
pub struct DocumentRenderer {
    site: Arc<dyn Site>,
    engine: Arc<TemplateEngine>,
    plugins: Arc<PluginRegistry>,
    hooks: Arc<HookBus>,
    cache: SiteCache,
    markdown: Markdown,
}

impl DocumentRenderer {
    pub fn builder<S: Site + 'static>(site: Arc<S>) -> RendererBuilder {
        RendererBuilder::new(site)
    }

    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn hooks(&self) -> &HookBus {
        &self.hooks
    }

    pub fn site_snapshot(&self) -> Arc<Value> {
        self.cache.get_or_build(self.site.as_ref())
    }

    /// Drop the cached `site` snapshot. Call after changing site state.
    pub fn invalidate_site_cache(&self) {
        self.cache.invalidate();
    }

    /// Fire a `site:*` event for the build around this renderer.
    pub fn trigger_site_hook(&self, hook: Hook) -> Result<(), RenderError> {
        self.hooks
            .trigger(hook, &mut HookContext::for_site(self.site.as_ref()))?;
        Ok(())
    }

    pub fn generate(&self) -> Result<Vec<GeneratedFile>, RenderError> {
        Ok(self.plugins.generate(self.site.as_ref(), &self.engine)?)
    }

    pub fn render_document(
        &self,
        document: &Document,
        additional: Option<Map<String, Value>>,
    ) -> Result<String, RenderError> {
        let mut context = RenderContext::new(self.site_snapshot());
        context.insert("page", Value::Object(document.to_value()));
        if let Some(additional) = additional {
            context.extend(additional);
        }

        let name = document.path.to_string_lossy();
        let content = self
            .engine
            .render_named(&name, &document.content, &context)
            .map_err(|e| e.wrap(&document.path, &*name))?;

        // Observers only: changes made here are discarded.
        self.fire(Hook::DocumentsPreRender, document, content.clone());

        let content = self.convert(document, content);
        let content = self.fire(Hook::DocumentsPostConvert, document, content);
        let content = self.fire(Hook::DocumentsPostRender, document, content);

        context.set_page_content(content.as_str());

        let Some(layout_name) = document.layout.as_deref() else {
            return Ok(content);
        };
        let Some(layout) = self.site.layout(layout_name) else {
            tracing::warn!(
                path = %document.path.display(),
                layout = layout_name,
                "layout does not exist, rendering without it"
            );
            return Ok(content);
        };

        LayoutResolver::new(&self.engine, self.site.as_ref())
            .apply_layout(content, layout, &mut context, Vec::new())
            .map_err(|err| match err {
                LayoutError::CircularReference { chain } => RenderError::CircularLayout {
                    chain,
                    file: document.path.clone(),
                },
                LayoutError::Template(err) => {
                    let failing = err
                        .template_name
                        .clone()
                        .unwrap_or_else(|| layout.name.clone());
                    RenderError::Template(err.wrap(&document.path, failing))
                }
            })
    }

    /// Render `document` with `paginator` exposed to its templates.
    pub fn render_document_with_paginator(
        &self,
        document: &Document,
        paginator: &Paginator,
    ) -> Result<String, RenderError> {
        let mut additional = Map::new();
        additional.insert("paginator".into(), paginator.to_value());
        self.render_document(document, Some(additional))
    }

    /// Render independent documents in parallel, one result per document.
    pub fn render_documents(&self, documents: &[Document]) -> Vec<Result<String, RenderError>> {
        documents
            .par_iter()
            .map(|document| self.render_document(document, None))
            .collect()
    }

    fn convert(&self, document: &Document, content: String) -> String {
        let ext = document.extname();
        let is_markdown = self.site.config().is_markdown_ext(&ext);

        if let Some(converter) = self.plugins.find_converter(&ext) {
            tracing::debug!(
                path = %document.path.display(),
                converter = converter.name(),
                "converting"
            );
            match converter.convert(&content, document, self.site.as_ref()) {
                Ok(converted) => return converted,
                Err(source) => {
                    let failure = ConverterFailure {
                        converter: converter.name().to_string(),
                        path: document.path.clone(),
                        source,
                    };
                    tracing::warn!(error = %failure, "falling back to built-in conversion");
                }
            }
        }

        if !is_markdown {
            return content;
        }
        self.markdownify(&document.path, content)
    }

    fn markdownify(&self, path: &Path, content: String) -> String {
        match self.markdown.to_html(&content) {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "markdown conversion failed, keeping rendered source"
                );
                content
            }
        }
    }

    /// Trigger a document hook and return the content the callbacks left.
    /// Callbacks that clear the content leave the previous content in place.
    fn fire(&self, hook: Hook, document: &Document, content: String) -> String {
        if self.hooks.count(hook) == 0 {
            return content;
        }

        let previous = content.clone();
        let mut cx = HookContext::for_document(self.site.as_ref(), document, content);
        if let Err(e) = self.hooks.trigger(hook, &mut cx) {
            tracing::warn!(
                path = %document.path.display(),
                error = %e,
                "hook failed, continuing"
            );
        }
        cx.content.unwrap_or_else(|| {
            tracing::warn!(
                path = %document.path.display(),
                hook = %hook,
                "hook cleared the content, keeping the previous content"
            );
            previous
        })
    }
}
