//! Ordered lifecycle hooks keyed by (owner, event).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::site::{Document, Site};

/// Every (owner, event) pair a callback can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    SiteAfterInit,
    SiteAfterReset,
    SitePostRead,
    SitePreRender,
    SitePostRender,
    SitePostWrite,
    DocumentsPostInit,
    DocumentsPreRender,
    DocumentsPostConvert,
    DocumentsPostRender,
    DocumentsPostWrite,
}

impl Hook {
    pub const ALL: [Hook; 11] = [
        Hook::SiteAfterInit,
        Hook::SiteAfterReset,
        Hook::SitePostRead,
        Hook::SitePreRender,
        Hook::SitePostRender,
        Hook::SitePostWrite,
        Hook::DocumentsPostInit,
        Hook::DocumentsPreRender,
        Hook::DocumentsPostConvert,
        Hook::DocumentsPostRender,
        Hook::DocumentsPostWrite,
    ];

    pub fn owner(self) -> &'static str {
        match self {
            Hook::SiteAfterInit
            | Hook::SiteAfterReset
            | Hook::SitePostRead
            | Hook::SitePreRender
            | Hook::SitePostRender
            | Hook::SitePostWrite => "site",
            _ => "documents",
        }
    }

    pub fn event(self) -> &'static str {
        match self {
            Hook::SiteAfterInit => "after_init",
            Hook::SiteAfterReset => "after_reset",
            Hook::SitePostRead => "post_read",
            Hook::SitePreRender | Hook::DocumentsPreRender => "pre_render",
            Hook::SitePostRender | Hook::DocumentsPostRender => "post_render",
            Hook::SitePostWrite | Hook::DocumentsPostWrite => "post_write",
            Hook::DocumentsPostInit => "post_init",
            Hook::DocumentsPostConvert => "post_convert",
        }
    }

    /// Validate an (owner, event) pair against the supported vocabulary.
    pub fn parse(owner: &str, event: &str) -> Result<Self, HookError> {
        Self::ALL
            .into_iter()
            .find(|hook| hook.owner() == owner && hook.event() == event)
            .ok_or_else(|| HookError::Invalid {
                owner: owner.to_string(),
                event: event.to_string(),
            })
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner(), self.event())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("unsupported hook '{owner}:{event}'")]
    Invalid { owner: String, event: String },
    #[error("{hook} callback #{index} failed: {source:#}")]
    Callback {
        hook: Hook,
        index: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Shared mutable state handed to each callback of one trigger.
///
/// Callbacks run in order and each sees the previous one's changes to
/// `content`. Whether a change is honoured depends on the event; the
/// renderer only applies it for `post_convert` and `post_render`.
pub struct HookContext<'a> {
    pub site: &'a dyn Site,
    pub document: Option<&'a Document>,
    pub content: Option<String>,
}

impl<'a> HookContext<'a> {
    pub fn for_site(site: &'a dyn Site) -> Self {
        Self {
            site,
            document: None,
            content: None,
        }
    }

    pub fn for_document(site: &'a dyn Site, document: &'a Document, content: String) -> Self {
        Self {
            site,
            document: Some(document),
            content: Some(content),
        }
    }
}

pub type HookCallback = Arc<dyn Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Registry of hook callbacks, owned by one renderer.
#[derive(Default, Clone)]
pub struct HookBus {
    hooks: HashMap<Hook, Vec<HookCallback>>,
}

impl fmt::Debug for HookBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<String, usize> = self
            .hooks
            .iter()
            .map(|(hook, callbacks)| (hook.to_string(), callbacks.len()))
            .collect();
        f.debug_struct("HookBus").field("hooks", &counts).finish()
    }
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe by name, failing fast on pairs outside the vocabulary.
    pub fn register<F>(&mut self, owner: &str, event: &str, callback: F) -> Result<(), HookError>
    where
        F: Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let hook = Hook::parse(owner, event)?;
        self.on(hook, callback);
        Ok(())
    }

    pub fn on<F>(&mut self, hook: Hook, callback: F)
    where
        F: Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.entry(hook).or_default().push(Arc::new(callback));
    }

    pub fn count(&self, hook: Hook) -> usize {
        self.hooks.get(&hook).map_or(0, Vec::len)
    }

    /// Run every callback for `hook` in registration order.
    ///
    /// The first failure stops the trigger; later callbacks do not run.
    pub fn trigger(&self, hook: Hook, context: &mut HookContext<'_>) -> Result<(), HookError> {
        let Some(callbacks) = self.hooks.get(&hook) else {
            return Ok(());
        };

        for (index, callback) in callbacks.iter().enumerate() {
            callback(context).map_err(|source| HookError::Callback {
                hook,
                index,
                source,
            })?;
        }
        Ok(())
    }
}
