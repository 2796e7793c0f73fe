//! Channel-specific output built from result sets and flattened entries.

use std::fmt::Write as _;

use askama::Template;

use wayback_shared::{FlattenedEntry, Record, Result, ResultSet, WaybackError};

/// Output format requested by a web client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Html,
    Json,
}

impl Format {
    /// Parse the `data-type` form field. Anything other than `json` is HTML.
    pub fn from_data_type(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Html,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Json => "application/json",
        }
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[derive(Template)]
#[template(path = "entries.html", escape = "html")]
struct EntriesTemplate<'a> {
    entries: &'a [FlattenedEntry],
}

#[derive(Template)]
#[template(path = "chat.html", escape = "html")]
struct ChatTemplate<'a> {
    records: Vec<&'a Record>,
}

// ---------------------------------------------------------------------------
// Renderers
// ---------------------------------------------------------------------------

/// Render entries in `format`.
pub fn render_entries(entries: &[FlattenedEntry], format: Format) -> Result<String> {
    match format {
        Format::Html => render_html(entries),
        Format::Json => render_json(entries),
    }
}

/// HTML fragment listing every entry.
pub fn render_html(entries: &[FlattenedEntry]) -> Result<String> {
    EntriesTemplate { entries }
        .render()
        .map_err(|e| WaybackError::Render(format!("failed to render entries: {e}")))
}

/// JSON array of `{slot, src, dst}` objects.
pub fn render_json(entries: &[FlattenedEntry]) -> Result<String> {
    serde_json::to_string(entries)
        .map_err(|e| WaybackError::Render(format!("failed to encode entries: {e}")))
}

/// A single slot-less entry carrying `message` for the original `text`,
/// used when there is nothing archived to show.
pub fn notice_entries(text: &str, message: &str) -> Vec<FlattenedEntry> {
    vec![FlattenedEntry {
        slot: String::new(),
        src: text.to_string(),
        dst: message.to_string(),
    }]
}

/// Plain-text report: a `[Name]` header per record followed by
/// `original => archived` lines.
pub fn render_text(results: &ResultSet) -> String {
    let mut out = String::new();
    for record in results {
        let _ = writeln!(out, "[{}]", record.name);
        for (src, dst) in &record.dst {
            let _ = writeln!(out, "{src} => {dst}");
        }
        out.push('\n');
    }
    out
}

/// HTML body for a chat reply, grouped by slot.
pub fn render_chat(results: &ResultSet) -> Result<String> {
    ChatTemplate {
        records: results.iter().collect(),
    }
    .render()
    .map(|body| body.trim_end().to_string())
    .map_err(|e| WaybackError::Render(format!("failed to render chat reply: {e}")))
}

/// Plain-text fallback for chat clients without HTML support.
pub fn render_chat_plain(results: &ResultSet) -> String {
    render_text(results).trim_end().to_string()
}
