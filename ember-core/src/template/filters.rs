//! Built-in Jekyll-style filters.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat};
use tera::{Result, Value};

use super::TemplateEngine;
use crate::config::SiteConfig;
use crate::markdown::Markdown;

pub(super) fn register(engine: &mut TemplateEngine, config: &SiteConfig) {
    let markdown = Markdown::new(config.highlight_theme.clone());
    engine.register_filter(
        "markdownify",
        move |value: &Value, _: &HashMap<String, Value>| -> Result<Value> {
            let s = as_str(value, "markdownify")?;
            markdown
                .to_html(s)
                .map(Value::String)
                .map_err(|e| tera::Error::msg(format!("markdownify: {e}")))
        },
    );

    let baseurl = config.baseurl.clone();
    engine.register_filter(
        "relative_url",
        move |value: &Value, _: &HashMap<String, Value>| -> Result<Value> {
            Ok(Value::String(relative_url(&baseurl, as_str(value, "relative_url")?)))
        },
    );

    let (url, baseurl) = (config.url.clone(), config.baseurl.clone());
    engine.register_filter(
        "absolute_url",
        move |value: &Value, _: &HashMap<String, Value>| -> Result<Value> {
            Ok(Value::String(absolute_url(&url, &baseurl, as_str(value, "absolute_url")?)))
        },
    );

    engine.register_filter("slugify", slugify);
    engine.register_filter("xml_escape", xml_escape);
    engine.register_filter("jsonify", jsonify);
    engine.register_filter("number_of_words", number_of_words);
    engine.register_filter("date_to_xml_schema", date_to_xml_schema);
    engine.register_filter("date_to_rfc822", date_to_rfc822);
}

fn as_str<'a>(value: &'a Value, filter: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| tera::Error::msg(format!("{filter} filter expects a string")))
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("//") || url.contains("://")
}

fn relative_url(baseurl: &str, input: &str) -> String {
    if is_absolute(input) {
        return input.to_string();
    }
    let base = baseurl.trim_end_matches('/');
    let path = input.trim_start_matches('/');
    format!("{base}/{path}")
}

fn absolute_url(url: &str, baseurl: &str, input: &str) -> String {
    if is_absolute(input) {
        return input.to_string();
    }
    format!("{}{}", url.trim_end_matches('/'), relative_url(baseurl, input))
}

fn parse_date(value: &Value, filter: &str) -> Result<DateTime<chrono::FixedOffset>> {
    let s = as_str(value, filter)?;
    DateTime::parse_from_rfc3339(s)
        .map_err(|e| tera::Error::msg(format!("{filter}: invalid date '{s}': {e}")))
}

pub(crate) fn slugify(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    Ok(Value::String(slug::slugify(as_str(value, "slugify")?)))
}

pub(crate) fn xml_escape(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    let s = as_str(value, "xml_escape")?;
    Ok(Value::String(html_escape::encode_safe(s).into_owned()))
}

pub(crate) fn jsonify(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    serde_json::to_string(value)
        .map(Value::String)
        .map_err(|e| tera::Error::msg(format!("jsonify: {e}")))
}

pub(crate) fn number_of_words(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    let count = as_str(value, "number_of_words")?.split_whitespace().count();
    Ok(Value::from(count))
}

pub(crate) fn date_to_xml_schema(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    let date = parse_date(value, "date_to_xml_schema")?;
    Ok(Value::String(date.to_rfc3339_opts(SecondsFormat::Secs, false)))
}

pub(crate) fn date_to_rfc822(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    let date = parse_date(value, "date_to_rfc822")?;
    Ok(Value::String(date.to_rfc2822()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::RenderContext;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn apply(filter: fn(&Value, &HashMap<String, Value>) -> Result<Value>, input: Value) -> Value {
        filter(&input, &HashMap::new()).unwrap()
    }

    fn render(config: &SiteConfig, source: &str) -> String {
        let engine = TemplateEngine::with_defaults(config);
        let ctx = RenderContext::new(Arc::new(json!({})));
        engine.render(source, &ctx).unwrap()
    }

    #[test]
    fn test_slugify() {
        assert_eq!(apply(slugify, json!("Hello, World!")), json!("hello-world"));
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(
            apply(xml_escape, json!("<a href='x'>&</a>")),
            json!("&lt;a href=&#x27;x&#x27;&gt;&amp;&lt;&#x2F;a&gt;")
        );
    }

    #[test]
    fn test_jsonify_and_words() {
        assert_eq!(apply(jsonify, json!({ "a": [1, 2] })), json!("{\"a\":[1,2]}"));
        assert_eq!(apply(number_of_words, json!("one two\nthree")), json!(3));
    }

    #[test]
    fn test_dates() {
        let date = json!("2024-01-15T10:30:00+02:00");
        assert_eq!(apply(date_to_xml_schema, date.clone()), json!("2024-01-15T10:30:00+02:00"));
        assert_eq!(apply(date_to_rfc822, date), json!("Mon, 15 Jan 2024 10:30:00 +0200"));
        assert!(date_to_rfc822(&json!("yesterday"), &HashMap::new()).is_err());
    }

    #[test]
    fn test_filter_rejects_non_string() {
        assert!(slugify(&json!(42), &HashMap::new()).is_err());
    }

    #[test]
    fn test_url_filters_use_config() {
        let config = SiteConfig {
            url: "https://example.com/".into(),
            baseurl: "/blog/".into(),
            ..SiteConfig::default()
        };
        assert_eq!(
            render(&config, "{{ '/about/' | relative_url }} {{ 'feed.xml' | absolute_url }}"),
            "/blog/about/ https://example.com/blog/feed.xml"
        );
        assert_eq!(
            render(&config, "{{ 'https://x.org/a' | relative_url }}"),
            "https://x.org/a"
        );
    }

    #[test]
    fn test_markdownify() {
        assert_eq!(
            render(&SiteConfig::default(), "{{ '*hi*' | markdownify }}"),
            "<p><em>hi</em></p>\n"
        );
    }
}
