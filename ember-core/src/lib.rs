pub mod builder;
pub mod cache;
pub mod config;
pub mod context;
pub mod hooks;
pub mod layout;
pub mod markdown;
pub mod plugin;
pub mod renderer;
pub mod site;
pub mod template;

// Re-export main types
pub use builder::{BuildError, SiteBuilder};
pub use cache::SiteCache;
pub use config::{ConfigError, SiteConfig};
pub use context::RenderContext;
pub use hooks::{Hook, HookBus, HookContext, HookError};
pub use layout::{LayoutError, LayoutResolver};
pub use plugin::{
    Converter, DEFAULT_PRIORITY, GeneratedFile, Generator, GeneratorOutput, Plugin, PluginError,
    PluginRegistry, RegisterContext,
};
pub use renderer::{ConverterFailure, DocumentRenderer, Paginator, RenderError, RendererBuilder};
pub use site::{Document, Layout, Site, StaticSite};
pub use template::{ParsedTag, TagDefinition, TagToken, TemplateEngine, TemplateError};
