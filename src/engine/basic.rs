//! Built-in front-matter template engine.
//!
//! Sources carry optional TOML front matter between `+++` fences. The body
//! is plain text with two substitution forms:
//!
//! - `{{ content "posts/a.md" }}` embeds another entry's rendered output
//!   (through the scheduler's content lookup);
//! - `{{ key }}` reads front-matter extras, then run-level data; `title`,
//!   `permalink` and `page.index`/`page.count` resolve from the cascade.
//!
//! A `layout` in front matter wraps the rendered body into the layout
//! template's output at its `{{ body }}` slot.

use super::{ContentLookup, Engine, FrontMatter, PageSlot, ParsedSource, RenderError};
use crate::source::SourcePath;
use crate::template::DataCascade;
use anyhow::{Result, bail};
use regex::{Captures, Regex};
use std::sync::LazyLock;

static CONTENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{\{\s*content\s+"([^"]+)"\s*\}\}"#).unwrap());

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").unwrap());

pub struct BasicEngine;

impl Engine for BasicEngine {
    fn parse(&self, _source: &SourcePath, raw: &str) -> Result<ParsedSource> {
        let (front, body) = split_front_matter(raw)?;
        let includes = CONTENT_RE
            .captures_iter(body)
            .map(|caps| SourcePath::new(&caps[1]))
            .collect();
        Ok(ParsedSource {
            front,
            body: body.to_string(),
            includes,
        })
    }

    fn render(
        &self,
        _source: &SourcePath,
        parsed: &ParsedSource,
        data: &DataCascade,
        page: Option<PageSlot>,
        content: &dyn ContentLookup,
    ) -> Result<String, RenderError> {
        let expanded = expand_includes(&parsed.body, content)?;
        let mut rendered = expand_keys(&expanded, data, page);

        if let Some(layout) = &data.layout {
            let Some(shell) = content.rendered(layout) else {
                return Err(RenderError::ContentNotReady(layout.clone()));
            };
            rendered = shell.replace("{{ body }}", &rendered);
        }

        Ok(rendered)
    }
}

// ============================================================================
// Front matter
// ============================================================================

/// Split optional `+++` TOML front matter from the body.
fn split_front_matter(raw: &str) -> Result<(FrontMatter, &str)> {
    let Some(rest) = raw.strip_prefix("+++") else {
        return Ok((FrontMatter::default(), raw));
    };
    let Some(rest) = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')) else {
        bail!("front matter fence must end its line");
    };
    let Some(end) = rest.find("\n+++") else {
        bail!("unterminated front matter fence");
    };

    let front: FrontMatter = toml::from_str(&rest[..end])?;

    let after = &rest[end + "\n+++".len()..];
    let body = after
        .strip_prefix("\r\n")
        .or_else(|| after.strip_prefix('\n'))
        .unwrap_or(after);
    Ok((front, body))
}

// ============================================================================
// Substitution
// ============================================================================

/// Expand `{{ content "path" }}` directives from sibling output.
fn expand_includes(body: &str, content: &dyn ContentLookup) -> Result<String, RenderError> {
    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    for caps in CONTENT_RE.captures_iter(body) {
        let matched = caps.get(0).expect("regex match has a group 0");
        let path = SourcePath::new(&caps[1]);
        let Some(chunk) = content.rendered(&path) else {
            return Err(RenderError::ContentNotReady(path));
        };
        out.push_str(&body[last..matched.start()]);
        out.push_str(&chunk);
        last = matched.end();
    }
    out.push_str(&body[last..]);
    Ok(out)
}

/// Expand `{{ key }}` lookups. Unknown keys render empty.
fn expand_keys(input: &str, data: &DataCascade, page: Option<PageSlot>) -> String {
    KEY_RE
        .replace_all(input, |caps: &Captures| {
            let key = &caps[1];
            // The body slot belongs to the template embedding this one
            if key == "body" {
                return caps[0].to_string();
            }
            resolve_key(key, data, page).unwrap_or_default()
        })
        .into_owned()
}

fn resolve_key(key: &str, data: &DataCascade, page: Option<PageSlot>) -> Option<String> {
    match key {
        "title" => data.title.clone(),
        "permalink" => data.permalink.clone(),
        "page.index" => page.map(|p| (p.index + 1).to_string()),
        "page.count" => page.map(|p| p.count.to_string()),
        _ => lookup_table(&data.extra, key)
            .or_else(|| data.global.get(key).map(value_to_string)),
    }
}

fn lookup_table(table: &toml::Table, key: &str) -> Option<String> {
    let mut parts = key.split('.');
    let mut value = table.get(parts.next()?)?;
    for part in parts {
        value = value.as_table()?.get(part)?;
    }
    Some(value_to_string(value))
}

fn value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
