//! Recursive layout application.

use serde_json::Value;

use crate::context::RenderContext;
use crate::site::{Layout, Site};
use crate::template::{TemplateEngine, TemplateError};

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    /// `chain` lists the layouts entered so far plus the repeated one.
    #[error("circular layout reference: {}", chain.join(" -> "))]
    CircularReference { chain: Vec<String> },
    #[error(transparent)]
    Template(#[from] TemplateError),
}

pub struct LayoutResolver<'a> {
    engine: &'a TemplateEngine,
    site: &'a dyn Site,
}

impl<'a> LayoutResolver<'a> {
    pub fn new(engine: &'a TemplateEngine, site: &'a dyn Site) -> Self {
        Self { engine, site }
    }

    /// Wrap `content` in `layout`, then in its parents until one has no
    /// parent or names a layout the site doesn't have.
    ///
    /// `visited` belongs to one top-level render and is moved down the
    /// recursion, so no two renders ever share it.
    pub fn apply_layout(
        &self,
        content: String,
        layout: &Layout,
        context: &mut RenderContext,
        mut visited: Vec<String>,
    ) -> Result<String, LayoutError> {
        if visited.iter().any(|name| *name == layout.name) {
            visited.push(layout.name.clone());
            return Err(LayoutError::CircularReference { chain: visited });
        }
        visited.push(layout.name.clone());

        tracing::debug!(layout = %layout.name, "applying layout");
        context.set_content(content);
        context.insert("layout", Value::Object(layout.data.clone()));

        let rendered = self
            .engine
            .render_named(&layout.name, &layout.content, context)
            .map_err(|e| e.wrap(&layout.path, layout.name.as_str()))?;

        let Some(parent_name) = layout.parent() else {
            return Ok(rendered);
        };
        match self.site.layout(parent_name) {
            Some(parent) => self.apply_layout(rendered, parent, context, visited),
            None => {
                tracing::warn!(
                    layout = %layout.name,
                    parent = parent_name,
                    "parent layout does not exist, stopping here"
                );
                Ok(rendered)
            }
        }
    }
}
