//! Custom tag expansion.
//!
//! tera has no user-defined tags, so registered tags are parsed before the
//! source reaches it. Each `{% name markup %}` occurrence is parsed once into
//! a [`ParsedTag`] and replaced by a call to a per-render tera function.
//! tera therefore decides whether a tag runs: a tag inside an untaken
//! `{% if %}` branch emits nothing, and a tag inside a `{% for %}` loop sees
//! the loop variables it names. Tag output is never re-interpreted as
//! template syntax.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tera::Tera;

use super::TemplateError;
use crate::context::RenderContext;

/// tera function every tag occurrence is rewritten into.
const TAG_FUNCTION: &str = "__ember_tag";
/// Keyword argument carrying the occurrence index.
const ID_ARG: &str = "__ember_id";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{%(-?)\s*([A-Za-z_][A-Za-z0-9_]*)(.*?)(-?)%\}").expect("valid tag regex")
});
static END_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%-?\s*end([A-Za-z_][A-Za-z0-9_]*)\s*(-?)%\}").expect("valid end tag regex")
});
/// Words tera reserves; never valid as a variable root.
const RESERVED: &[&str] = &["true", "false", "True", "False", "and", "or", "not", "in", "is"];

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// One tag occurrence as found in the source.
#[derive(Debug, Clone, Copy)]
pub struct TagToken<'a> {
    pub name: &'a str,
    /// Everything between the tag name and `%}`, trimmed.
    pub markup: &'a str,
    /// Body between the opening tag and `{% end<name> %}` for block tags.
    pub body: Option<&'a str>,
    pub template_name: &'a str,
    pub line: usize,
    pub column: usize,
}

/// A tag type registered with the engine.
pub trait TagDefinition: Send + Sync {
    /// Block tags capture a body up to `{% end<name> %}`.
    fn is_block(&self) -> bool {
        false
    }

    /// Validate the arguments of one occurrence and capture them.
    fn parse(&self, token: &TagToken<'_>) -> anyhow::Result<Box<dyn ParsedTag>>;
}

/// A parsed tag occurrence, rendered against the current context.
pub trait ParsedTag: Send + Sync {
    /// Dotted variable paths read through [`RenderContext::lookup`] at
    /// render time. Their roots are evaluated by tera where the tag sits,
    /// so loop variables resolve.
    fn variables(&self) -> Vec<&str> {
        Vec::new()
    }

    fn render(&self, context: &RenderContext) -> anyhow::Result<String>;
}

/// Failure recorded by a tag call while tera was rendering.
pub(crate) type TagFailure = Arc<Mutex<Option<TemplateError>>>;

struct TagCall {
    name: String,
    template_name: String,
    line: usize,
    column: usize,
    parsed: Box<dyn ParsedTag>,
}

impl TagCall {
    fn render(
        &self,
        base: &RenderContext,
        args: &HashMap<String, Value>,
    ) -> Result<String, TemplateError> {
        let mut scoped = base.clone();
        for (key, value) in args {
            if key != ID_ARG {
                scoped.insert(key.clone(), value.clone());
            }
        }
        self.parsed.render(&scoped).map_err(|e| {
            TemplateError::new(format!("{} tag: {e:#}", self.name))
                .at(self.line, self.column)
                .named(self.template_name.as_str())
                .caused_by(e)
        })
    }
}

/// Source with tags rewritten into function calls, plus the parsed tags.
pub(crate) struct Expanded {
    pub source: String,
    calls: Vec<TagCall>,
}

impl Expanded {
    /// Register the tag function on `tera` for one render. A failing tag
    /// stores its error in the returned slot before tera aborts.
    pub fn install(self, tera: &mut Tera, context: &RenderContext) -> (String, TagFailure) {
        let failure: TagFailure = Arc::new(Mutex::new(None));
        if self.calls.is_empty() {
            return (self.source, failure);
        }

        let calls = self.calls;
        let base = context.clone();
        let slot = Arc::clone(&failure);
        tera.register_function(
            TAG_FUNCTION,
            move |args: &HashMap<String, Value>| -> tera::Result<Value> {
                let call = args
                    .get(ID_ARG)
                    .and_then(Value::as_u64)
                    .and_then(|index| calls.get(index as usize))
                    .ok_or_else(|| tera::Error::msg("unknown tag call"))?;
                match call.render(&base, args) {
                    Ok(output) => Ok(Value::String(output)),
                    Err(err) => {
                        let message = err.to_string();
                        let mut first = slot.lock();
                        if first.is_none() {
                            *first = Some(err);
                        }
                        Err(tera::Error::msg(message))
                    }
                }
            },
        );
        (self.source, failure)
    }
}

fn location(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map_or(before.chars().count(), |nl| before[nl + 1..].chars().count())
        + 1;
    (line, column)
}

/// `{{ __ember_tag(__ember_id=N, root=root, ...) }}` for one occurrence.
fn call_expression(
    index: usize,
    parsed: &dyn ParsedTag,
    trim_left: bool,
    trim_right: bool,
) -> String {
    let mut roots = HashSet::new();
    let mut out = String::from(if trim_left { "{{- " } else { "{{ " });
    out.push_str(&format!("{TAG_FUNCTION}({ID_ARG}={index}"));
    for path in parsed.variables() {
        let root = path.split('.').next().unwrap_or_default();
        let skip = root == "site" || RESERVED.contains(&root) || !IDENT_RE.is_match(root);
        if skip || !roots.insert(root.to_string()) {
            continue;
        }
        out.push_str(&format!(", {root}={root}"));
    }
    out.push_str(if trim_right { ") -}}" } else { ") }}" });
    out
}

pub(crate) fn expand(
    source: &str,
    tags: &HashMap<String, Arc<dyn TagDefinition>>,
    template_name: &str,
) -> Result<Expanded, TemplateError> {
    if tags.is_empty() || !source.contains("{%") {
        return Ok(Expanded {
            source: source.to_string(),
            calls: Vec::new(),
        });
    }

    let mut out = String::with_capacity(source.len());
    let mut calls = Vec::new();
    let mut copied = 0;
    let mut pos = 0;

    while let Some(caps) = TAG_RE.captures_at(source, pos) {
        let Some(whole) = caps.get(0) else { break };
        let name = caps.get(2).map_or("", |m| m.as_str());

        if name == "raw" {
            // Leave raw regions for tera, including any tags inside them.
            let end_raw = END_TAG_RE
                .captures_iter(&source[whole.end()..])
                .find(|end| &end[1] == "raw")
                .and_then(|end| end.get(0));
            match end_raw {
                Some(end) => pos = whole.end() + end.end(),
                None => break,
            }
            continue;
        }

        let Some(definition) = tags.get(name) else {
            pos = whole.end();
            continue;
        };

        let (line, column) = location(source, whole.start());
        let fail = |message: String| {
            TemplateError::new(message)
                .at(line, column)
                .named(template_name)
        };

        let trim_left = caps.get(1).is_some_and(|m| !m.is_empty());
        let mut trim_right = caps.get(4).is_some_and(|m| !m.is_empty());
        let (body, end) = if definition.is_block() {
            let closing = END_TAG_RE
                .captures_iter(&source[whole.end()..])
                .find(|end| &end[1] == name);
            let Some(closing) = closing else {
                return Err(fail(format!("'{name}' tag was never closed")));
            };
            let (Some(end), dash) = (closing.get(0), closing.get(2)) else {
                return Err(fail(format!("'{name}' tag was never closed")));
            };
            trim_right = dash.is_some_and(|m| !m.is_empty());
            let body = &source[whole.end()..whole.end() + end.start()];
            (Some(body), whole.end() + end.end())
        } else {
            (None, whole.end())
        };

        let token = TagToken {
            name,
            markup: caps.get(3).map_or("", |m| m.as_str()).trim(),
            body,
            template_name,
            line,
            column,
        };

        let parsed = definition
            .parse(&token)
            .map_err(|e| fail(format!("{name} tag: {e:#}")).caused_by(e))?;

        out.push_str(&source[copied..whole.start()]);
        out.push_str(&call_expression(
            calls.len(),
            parsed.as_ref(),
            trim_left,
            trim_right,
        ));
        calls.push(TagCall {
            name: name.to_string(),
            template_name: template_name.to_string(),
            line,
            column,
            parsed,
        });

        copied = end;
        pos = end;
    }

    out.push_str(&source[copied..]);
    Ok(Expanded { source: out, calls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateEngine;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Echo;

    struct EchoTag(String);

    impl TagDefinition for Echo {
        fn parse(&self, token: &TagToken<'_>) -> anyhow::Result<Box<dyn ParsedTag>> {
            anyhow::ensure!(!token.markup.is_empty(), "echo needs an argument");
            Ok(Box::new(EchoTag(token.markup.to_string())))
        }
    }

    impl ParsedTag for EchoTag {
        fn variables(&self) -> Vec<&str> {
            vec![self.0.as_str()]
        }

        fn render(&self, context: &RenderContext) -> anyhow::Result<String> {
            let value = context
                .lookup(&self.0)
                .ok_or_else(|| anyhow::anyhow!("'{}' is not set", self.0))?;
            Ok(value.as_str().map_or_else(|| value.to_string(), str::to_string))
        }
    }

    struct Upper;

    struct UpperTag(String);

    impl TagDefinition for Upper {
        fn is_block(&self) -> bool {
            true
        }

        fn parse(&self, token: &TagToken<'_>) -> anyhow::Result<Box<dyn ParsedTag>> {
            Ok(Box::new(UpperTag(token.body.unwrap_or_default().to_uppercase())))
        }
    }

    impl ParsedTag for UpperTag {
        fn render(&self, _context: &RenderContext) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    fn engine() -> TemplateEngine {
        let mut engine = TemplateEngine::new();
        engine.register_tag("echo", Echo);
        engine.register_tag("upper", Upper);
        engine
    }

    fn context() -> RenderContext {
        let mut ctx = RenderContext::new(Arc::new(json!({ "title": "Site" })));
        ctx.insert("page", json!({ "title": "Home", "tags": ["a", "b"] }));
        ctx
    }

    fn render(source: &str) -> Result<String, TemplateError> {
        engine().render_named("t", source, &context())
    }

    #[test]
    fn replaces_tags_and_leaves_the_rest_to_tera() {
        assert_eq!(
            render("a {% echo page.title %} {% if true %}b{% endif %}").unwrap(),
            "a Home b"
        );
    }

    #[test]
    fn block_tags_capture_body() {
        assert_eq!(
            render("[{% upper %}shout {{ x }}{% endupper %}]").unwrap(),
            "[SHOUT {{ X }}]"
        );
    }

    #[test]
    fn raw_regions_are_untouched() {
        let source = "{% raw %}{% echo page.title %}{% endraw %}{% echo site.title %}";
        assert_eq!(render(source).unwrap(), "{% echo page.title %}Site");
    }

    #[test]
    fn failing_tag_in_untaken_branch_is_never_rendered() {
        assert_eq!(
            render("{% if false %}{% echo page.missing %}{% endif %}ok").unwrap(),
            "ok"
        );
    }

    #[test]
    fn tags_see_loop_variables() {
        assert_eq!(
            render("{% for tag in page.tags %}<{% echo tag %}>{% endfor %}").unwrap(),
            "<a><b>"
        );
    }

    #[test]
    fn whitespace_control_is_kept() {
        assert_eq!(render("a  {%- echo page.title -%}  b").unwrap(), "aHomeb");
        assert_eq!(
            render("a {%- upper %}x{% endupper -%} b").unwrap(),
            "aXb"
        );
    }

    #[test]
    fn parse_failure_reports_line_and_column() {
        let err = render("one\n  {% echo %}").unwrap_err();
        assert_eq!((err.line, err.column), (Some(2), Some(3)));
        assert_eq!(err.template_name.as_deref(), Some("t"));
        assert!(err.message.contains("echo needs an argument"));
    }

    #[test]
    fn render_failure_keeps_tag_location() {
        let err = render("x\n{% if true %}{% echo page.missing %}{% endif %}").unwrap_err();
        assert_eq!((err.line, err.column), (Some(2), Some(14)));
        assert!(err.message.contains("'page.missing' is not set"), "{}", err.message);
    }

    #[test]
    fn end_tags_match_by_name() {
        assert_eq!(
            render("{% upper %}x{% endecho %}y{% endupper %}{%- upper %}z{% endupper %}").unwrap(),
            "X{% ENDECHO %}YZ"
        );
    }

    #[test]
    fn unclosed_block_fails() {
        let err = render("{% upper %}x{% endecho %}").unwrap_err();
        assert!(err.message.contains("never closed"));
    }
}
