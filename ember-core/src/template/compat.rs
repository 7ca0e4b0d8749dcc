//! Jekyll compatibility tags.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context as _, anyhow, bail};
use serde_json::Value;

use super::tags::{ParsedTag, TagDefinition, TagToken};
use super::{TemplateEngine, sanitize};
use crate::config::SiteConfig;
use crate::context::RenderContext;
use crate::markdown::highlight_code;

const DEFAULT_AVATAR_SIZE: u32 = 40;

pub(super) fn register(engine: &mut TemplateEngine, config: &SiteConfig) {
    engine.register_tag("include_relative", IncludeRelativeTag);
    engine.register_tag("link", LinkTag);
    engine.register_tag("post_url", PostUrlTag);
    engine.register_tag("highlight", HighlightTag::new(config.highlight_theme.clone()));
    engine.register_tag("avatar", AvatarTag);
}

/// A tag argument: a quoted literal or a context variable path.
#[derive(Debug, Clone, PartialEq)]
enum Argument {
    Literal(String),
    Variable(String),
}

impl Argument {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        for quote in ['"', '\''] {
            if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
                return Argument::Literal(raw[1..raw.len() - 1].to_string());
            }
        }
        Argument::Variable(raw.to_string())
    }

    fn resolve(&self, context: &RenderContext) -> Option<String> {
        match self {
            Argument::Literal(value) => Some(value.clone()),
            Argument::Variable(path) => match context.lookup(path)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            },
        }
    }
}

fn site_str<'a>(context: &'a RenderContext, key: &str) -> &'a str {
    context
        .site()
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
}

fn with_baseurl(context: &RenderContext, url: &str) -> String {
    let baseurl = site_str(context, "baseurl").trim_end_matches('/');
    format!("{baseurl}{url}")
}

/// `{% include_relative path %}`: raw contents of a file next to the page.
#[derive(Debug, Clone, Copy)]
pub struct IncludeRelativeTag;

struct IncludeRelative {
    path: PathBuf,
}

impl TagDefinition for IncludeRelativeTag {
    fn parse(&self, token: &TagToken<'_>) -> anyhow::Result<Box<dyn ParsedTag>> {
        let raw = match Argument::parse(token.markup) {
            Argument::Literal(path) | Argument::Variable(path) => path,
        };
        if raw.is_empty() {
            bail!("missing file name");
        }

        let path = PathBuf::from(&raw);
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            bail!("'{raw}' must be a relative path inside the site source");
        }
        Ok(Box::new(IncludeRelative { path }))
    }
}

impl ParsedTag for IncludeRelative {
    fn render(&self, context: &RenderContext) -> anyhow::Result<String> {
        let page_path = context
            .lookup("page.path")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("can only be used inside a page"))?;
        let page_dir = Path::new(page_path).parent().unwrap_or(Path::new(""));
        let file = Path::new(site_str(context, "source"))
            .join(page_dir)
            .join(&self.path);

        std::fs::read_to_string(&file)
            .with_context(|| format!("could not read '{}'", file.display()))
    }
}

/// `{% link path/to/doc.md %}`: URL of the document with that source path.
#[derive(Debug, Clone, Copy)]
pub struct LinkTag;

struct Link {
    target: String,
}

impl TagDefinition for LinkTag {
    fn parse(&self, token: &TagToken<'_>) -> anyhow::Result<Box<dyn ParsedTag>> {
        // Bare paths such as `_posts/x.md` are always literals.
        let target = match Argument::parse(token.markup) {
            Argument::Literal(path) | Argument::Variable(path) => path,
        };
        if target.is_empty() {
            bail!("missing document path");
        }
        Ok(Box::new(Link {
            target: target.trim_start_matches("./").to_string(),
        }))
    }
}

impl ParsedTag for Link {
    fn render(&self, context: &RenderContext) -> anyhow::Result<String> {
        let target = self.target.as_str();

        let url = context
            .lookup("site.documents")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|doc| doc.get("path").and_then(Value::as_str) == Some(target))
            .and_then(|doc| doc.get("url").and_then(Value::as_str))
            .ok_or_else(|| anyhow!("could not find document '{target}'"))?;

        Ok(with_baseurl(context, url))
    }
}

/// `{% post_url 2024-01-05-hello %}`: URL of the post with that slug.
#[derive(Debug, Clone, Copy)]
pub struct PostUrlTag;

struct PostUrl {
    slug: String,
}

impl TagDefinition for PostUrlTag {
    fn parse(&self, token: &TagToken<'_>) -> anyhow::Result<Box<dyn ParsedTag>> {
        let slug = token.markup.trim_end_matches(".md");
        let file = slug.rsplit('/').next().unwrap_or(slug);
        let bytes = file.as_bytes();
        let dated = bytes.len() > 11
            && bytes[10] == b'-'
            && bytes[..10]
                .iter()
                .enumerate()
                .all(|(i, b)| if i == 4 || i == 7 { *b == b'-' } else { b.is_ascii_digit() });
        if !dated {
            bail!("'{slug}' is not a valid post name, expected YYYY-MM-DD-title");
        }
        Ok(Box::new(PostUrl {
            slug: slug.to_string(),
        }))
    }
}

impl ParsedTag for PostUrl {
    fn render(&self, context: &RenderContext) -> anyhow::Result<String> {
        let matches = |post: &Value| {
            let path = post.get("path").and_then(Value::as_str).unwrap_or_default();
            let stem = Path::new(path).with_extension("");
            stem.ends_with(&self.slug)
        };

        let url = context
            .lookup("site.posts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|post| matches(*post))
            .and_then(|post| post.get("url").and_then(Value::as_str))
            .ok_or_else(|| anyhow!("could not find post '{}'", self.slug))?;

        Ok(with_baseurl(context, url))
    }
}

/// `{% highlight lang [linenos] %}code{% endhighlight %}`.
#[derive(Debug, Clone)]
pub struct HighlightTag {
    theme: String,
}

impl HighlightTag {
    pub fn new<S: Into<String>>(theme: S) -> Self {
        Self {
            theme: theme.into(),
        }
    }
}

struct Highlight {
    lang: String,
    code: String,
    theme: String,
}

impl TagDefinition for HighlightTag {
    fn is_block(&self) -> bool {
        true
    }

    fn parse(&self, token: &TagToken<'_>) -> anyhow::Result<Box<dyn ParsedTag>> {
        let raw_lang = token.markup.split_whitespace().next().unwrap_or_default();
        let lang = sanitize(raw_lang, |c| c.is_ascii_alphanumeric() || "_+#-".contains(c));
        if lang.is_empty() {
            bail!("a language is required, e.g. {{% highlight rust %}}");
        }

        let body = token.body.unwrap_or_default();
        let code = body.strip_prefix('\n').unwrap_or(body).trim_end();
        Ok(Box::new(Highlight {
            lang,
            code: format!("{code}\n"),
            theme: self.theme.clone(),
        }))
    }
}

impl ParsedTag for Highlight {
    fn render(&self, _context: &RenderContext) -> anyhow::Result<String> {
        let html = highlight_code(&self.code, &self.lang, &self.theme)?;
        Ok(format!(
            "<figure class=\"highlight\" data-lang=\"{}\">{}</figure>",
            self.lang, html
        ))
    }
}

/// `{% avatar username [size=N] %}`: GitHub avatar image.
#[derive(Debug, Clone, Copy)]
pub struct AvatarTag;

struct Avatar {
    user: Argument,
    size: u32,
}

impl TagDefinition for AvatarTag {
    fn parse(&self, token: &TagToken<'_>) -> anyhow::Result<Box<dyn ParsedTag>> {
        let mut parts = token.markup.split_whitespace();
        let user = parts
            .next()
            .map(Argument::parse)
            .ok_or_else(|| anyhow!("missing username"))?;

        let mut size = DEFAULT_AVATAR_SIZE;
        for part in parts {
            match part.split_once('=') {
                Some(("size", value)) => {
                    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                        bail!("invalid size '{value}', expected a whole number");
                    }
                    size = value
                        .parse()
                        .with_context(|| format!("invalid size '{value}'"))?;
                }
                _ => bail!("unknown argument '{part}'"),
            }
        }
        Ok(Box::new(Avatar { user, size }))
    }
}

impl ParsedTag for Avatar {
    fn variables(&self) -> Vec<&str> {
        match &self.user {
            Argument::Variable(path) => vec![path.as_str()],
            Argument::Literal(_) => Vec::new(),
        }
    }

    fn render(&self, context: &RenderContext) -> anyhow::Result<String> {
        let raw = self.user.resolve(context).unwrap_or_default();
        let user = sanitize(&raw, |c| c.is_ascii_alphanumeric() || c == '-');
        if user.is_empty() {
            bail!("username {:?} resolved to nothing usable", self.user);
        }

        let size = self.size;
        Ok(format!(
            "<img class=\"avatar\" src=\"https://avatars.githubusercontent.com/{user}?v=3&amp;s={size}\" \
             alt=\"{user}\" width=\"{size}\" height=\"{size}\" />"
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine() -> TemplateEngine {
        TemplateEngine::with_defaults(&SiteConfig::default())
    }

    fn context(source: &str) -> RenderContext {
        let site = json!({
            "source": source,
            "baseurl": "/blog",
            "documents": [
                { "path": "about.md", "url": "/about/" },
                { "path": "_posts/2024-01-05-hello.md", "url": "/2024/01/05/hello/" }
            ],
            "posts": [
                { "path": "_posts/2024-01-05-hello.md", "url": "/2024/01/05/hello/" }
            ]
        });
        let mut ctx = RenderContext::new(Arc::new(site));
        ctx.insert("page", json!({ "path": "notes/index.md", "author": "octo-cat" }));
        ctx
    }

    #[test]
    fn argument_parsing() {
        assert_eq!(Argument::parse("'x'"), Argument::Literal("x".into()));
        assert_eq!(Argument::parse("\"x y\""), Argument::Literal("x y".into()));
        assert_eq!(Argument::parse("page.author"), Argument::Variable("page.author".into()));
        assert_eq!(Argument::parse("'"), Argument::Variable("'".into()));
    }

    #[test]
    fn include_relative_reads_next_to_page() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();
        std::fs::write(dir.path().join("notes/snippet.txt"), "included {{ raw }}").unwrap();

        let ctx = context(&dir.path().to_string_lossy());
        let out = engine()
            .render("[{% include_relative snippet.txt %}]", &ctx)
            .unwrap();
        assert_eq!(out, "[included {{ raw }}]");
    }

    #[test]
    fn include_relative_rejects_escaping_paths() {
        let ctx = context("/srv");
        for source in [
            "{% include_relative ../secret.txt %}",
            "{% include_relative /etc/passwd %}",
        ] {
            let err = engine().render(source, &ctx).unwrap_err();
            assert!(err.message.contains("relative path"), "{}", err.message);
        }
    }

    #[test]
    fn include_relative_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir.path().to_string_lossy());
        let err = engine()
            .render("{% include_relative nope.txt %}", &ctx)
            .unwrap_err();
        assert!(err.message.contains("could not read"));
    }

    #[test]
    fn link_and_post_url_resolve_with_baseurl() {
        let ctx = context("/srv");
        let out = engine()
            .render(
                "{% link about.md %} {% post_url 2024-01-05-hello %}",
                &ctx,
            )
            .unwrap();
        assert_eq!(out, "/blog/about/ /blog/2024/01/05/hello/");
    }

    #[test]
    fn link_to_unknown_document_fails() {
        let err = engine()
            .render("{% link missing.md %}", &context("/srv"))
            .unwrap_err();
        assert!(err.message.contains("could not find document 'missing.md'"));
    }

    #[test]
    fn post_url_validates_name() {
        let err = engine()
            .render("{% post_url hello %}", &context("/srv"))
            .unwrap_err();
        assert!(err.message.contains("YYYY-MM-DD-title"));

        let err = engine()
            .render("{% post_url 2023-01-01-gone %}", &context("/srv"))
            .unwrap_err();
        assert!(err.message.contains("could not find post"));
    }

    #[test]
    fn highlight_wraps_code() {
        let out = engine()
            .render(
                "{% highlight rust %}\nlet x = \"{{ not_a_var }}\";\n{% endhighlight %}",
                &context("/srv"),
            )
            .unwrap();
        assert!(out.starts_with("<figure class=\"highlight\" data-lang=\"rust\">"));
        assert!(out.contains("not_a_var"));
    }

    #[test]
    fn highlight_sanitizes_language() {
        let out = engine()
            .render(
                "{% highlight x\"><script> %}a{% endhighlight %}",
                &context("/srv"),
            )
            .unwrap();
        assert!(!out.contains("<script>"));
        assert!(out.contains("data-lang=\"xscript\""));
    }

    #[test]
    fn avatar_resolves_literal_and_variable() {
        let ctx = context("/srv");
        let literal = engine().render("{% avatar 'hubot' size=80 %}", &ctx).unwrap();
        assert!(literal.contains("githubusercontent.com/hubot?v=3&amp;s=80"));
        assert!(literal.contains("width=\"80\""));

        let variable = engine().render("{% avatar page.author %}", &ctx).unwrap();
        assert!(variable.contains("/octo-cat?v=3&amp;s=40"));
    }

    #[test]
    fn avatar_strips_injection() {
        let mut ctx = context("/srv");
        ctx.insert("evil", json!("bob\"><script>alert(1)</script>"));
        let out = engine().render("{% avatar evil %}", &ctx).unwrap();
        assert!(out.contains("/bobscriptalert1script?"));
        assert!(!out.contains("<script>"));
    }

    #[test]
    fn avatar_reads_loop_variables() {
        let mut ctx = context("/srv");
        ctx.insert("authors", json!([{ "login": "hubot" }, { "login": "octo-cat" }]));
        let out = engine()
            .render("{% for a in authors %}{% avatar a.login size=20 %}\n{% endfor %}", &ctx)
            .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("/hubot?v=3&amp;s=20"), "{out}");
        assert!(lines[1].contains("/octo-cat?v=3&amp;s=20"), "{out}");
    }

    #[test]
    fn avatar_rejects_malformed_size() {
        for source in [
            "{% avatar hubot size=4x0 %}",
            "{% avatar hubot size= %}",
            "{% avatar hubot size=-5 %}",
        ] {
            let err = engine().render(source, &context("/srv")).unwrap_err();
            assert!(err.message.contains("invalid size"), "{}", err.message);
        }
    }

    #[test]
    fn avatar_rejects_unknown_arguments() {
        let err = engine()
            .render("{% avatar hubot colour=red %}", &context("/srv"))
            .unwrap_err();
        assert!(err.message.contains("unknown argument"));
    }
}
