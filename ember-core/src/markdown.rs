use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd, html};
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

// Initialize syntax highlighting resources once
static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

#[derive(Debug, thiserror::Error)]
pub enum MarkdownError {
    #[error("unknown highlight theme '{0}'")]
    UnknownTheme(String),
    #[error("highlighting failed: {0}")]
    Highlight(#[from] syntect::Error),
}

/// Built-in markdown conversion used when no converter plugin claims a
/// markdown document.
#[derive(Debug, Clone)]
pub struct Markdown {
    theme: String,
}

impl Markdown {
    pub fn new<S: Into<String>>(theme: S) -> Self {
        Self {
            theme: theme.into(),
        }
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub fn to_html(&self, content: &str) -> Result<String, MarkdownError> {
        let parser = Parser::new_ext(content, Options::all());

        let events: Vec<Event> = parser.collect();
        let mut processed_events = Vec::with_capacity(events.len());
        let mut i = 0;

        while i < events.len() {
            match &events[i] {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().unwrap_or_default().to_string()
                        }
                        CodeBlockKind::Indented => String::new(),
                    };

                    // Collect all text events until the end of the code block
                    let mut code_content = String::new();
                    i += 1;
                    while i < events.len() {
                        match &events[i] {
                            Event::End(TagEnd::CodeBlock) => break,
                            Event::Text(text) => code_content.push_str(text),
                            _ => {}
                        }
                        i += 1;
                    }

                    let highlighted = highlight_code(&code_content, &lang, &self.theme)?;
                    processed_events.push(Event::Html(highlighted.into()));
                }
                event => processed_events.push(event.clone()),
            }
            i += 1;
        }

        let mut out = String::new();
        html::push_html(&mut out, processed_events.into_iter());
        Ok(out)
    }
}

/// Highlight `code` as `lang`; unknown or empty languages produce a plain
/// escaped `<pre><code>` block.
///
/// Every output line carries markup, so the block survives a later markdown
/// pass even when the code contains blank lines.
pub fn highlight_code(code: &str, lang: &str, theme: &str) -> Result<String, MarkdownError> {
    let theme = THEME_SET
        .themes
        .get(theme)
        .ok_or_else(|| MarkdownError::UnknownTheme(theme.to_string()))?;

    let syntax = if lang.is_empty() {
        None
    } else {
        SYNTAX_SET.find_syntax_by_token(lang).or_else(|| {
            // Fallback mappings for unsupported languages
            match lang {
                "nix" => SYNTAX_SET.find_syntax_by_name("JavaScript"),
                "toml" => SYNTAX_SET.find_syntax_by_name("YAML"),
                _ => None,
            }
        })
    };

    match syntax {
        Some(syntax) => Ok(highlighted_html_for_string(code, &SYNTAX_SET, syntax, theme)?),
        None => Ok(format!("<pre><code>{}</code></pre>\n", plain_lines(code))),
    }
}

fn plain_lines(code: &str) -> String {
    let mut out = String::with_capacity(code.len() + 16);
    for line in code.split_inclusive('\n') {
        let text = line.strip_suffix('\n');
        out.push_str("<span>");
        out.push_str(&html_escape::encode_text(text.unwrap_or(line)));
        out.push_str("</span>");
        if text.is_some() {
            out.push('\n');
        }
    }
    out
}
