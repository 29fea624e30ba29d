//! HTML-subset codec for persisted documents.
//!
//! Blocks: `h1`..`h3`, `p`, `ul`/`ol` with `li`, and `table`/`tr`/`td`.
//! Inline: `strong`, `em`, `u`, `a href`, `img src` and `span` carrying
//! `style="color:…"` plus `data-citation-*` attributes. Every block element
//! may carry `data-block-id`.
//!
//! Serialization writes one op at a time and parsing pushes one op at a time,
//! so adjacent runs re-merge the same way and `parse(serialize(doc)) == doc`
//! for any document using these attributes.

use crate::block::ListKind;
use core_document::{Attributes, Content, Delta, Document, DocumentError, Embed, Op, TableData, attr};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::trace;

static TAG_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z][A-Za-z0-9-]*)\s*=\s*"([^"]*)""#).expect("attribute pattern compiles")
});

const DATA_CITATION: [(&str, &str); 4] = [
    ("data-citation-id", attr::CITATION_ID),
    ("data-citation-source", attr::CITATION_SOURCE),
    ("data-citation-style", attr::CITATION_STYLE),
    ("data-citation-trail", attr::CITATION_TRAIL),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkupError {
    #[error("text outside a block at byte {offset}")]
    UnexpectedText { offset: usize },
    #[error("unexpected <{tag}> at byte {offset}")]
    UnexpectedTag { tag: String, offset: usize },
    #[error("expected </{expected}>, found </{found}> at byte {offset}")]
    Mismatched {
        expected: String,
        found: String,
        offset: usize,
    },
    #[error("unterminated tag at byte {offset}")]
    Malformed { offset: usize },
    #[error("<{0}> is never closed")]
    Unclosed(String),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

fn escape(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn write_attr(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, " {name}=\"");
    escape(value, out);
    out.push('"');
}

fn block_id(out: &mut String, attrs: &Attributes) {
    if let Some(id) = attrs.get_str(attr::BLOCK_ID) {
        write_attr(out, "data-block-id", id);
    }
}

fn write_table(out: &mut String, table: &TableData, attrs: &Attributes) {
    out.push_str("<table");
    block_id(out, attrs);
    out.push('>');
    for row in &table.rows {
        out.push_str("<tr>");
        for cell in row {
            out.push_str("<td>");
            escape(cell, out);
            out.push_str("</td>");
        }
        out.push_str("</tr>");
    }
    out.push_str("</table>");
}

fn write_op(out: &mut String, op: &Op) {
    let Op::Insert { insert, attributes } = op else {
        return;
    };
    let mut closers: Vec<&str> = Vec::new();
    if let Some(href) = attributes.get_str(attr::LINK) {
        out.push_str("<a");
        write_attr(out, "href", href);
        out.push('>');
        closers.push("</a>");
    }
    for (key, open, close) in [
        (attr::BOLD, "<strong>", "</strong>"),
        (attr::ITALIC, "<em>", "</em>"),
        (attr::UNDERLINE, "<u>", "</u>"),
    ] {
        if attributes.is_set(key) {
            out.push_str(open);
            closers.push(close);
        }
    }
    let color = attributes.get_str(attr::COLOR);
    let citation: Vec<(&str, &str)> = DATA_CITATION
        .iter()
        .filter_map(|(name, key)| attributes.get_str(key).map(|v| (*name, v)))
        .collect();
    if color.is_some() || !citation.is_empty() {
        out.push_str("<span");
        if let Some(color) = color {
            write_attr(out, "style", &format!("color:{color}"));
        }
        for (name, value) in citation {
            write_attr(out, name, value);
        }
        out.push('>');
        closers.push("</span>");
    }
    match insert {
        Content::Text(text) => escape(text, out),
        Content::Embed(Embed::Image(src)) => {
            out.push_str("<img");
            write_attr(out, "src", src);
            out.push('>');
        }
        Content::Embed(Embed::Table(table)) => write_table(out, table, &Attributes::new()),
    }
    for closer in closers.into_iter().rev() {
        out.push_str(closer);
    }
}

/// Render `doc` as markup, one block element per line.
pub fn serialize(doc: &Document) -> String {
    let mut out = String::new();
    let mut open_list: Option<ListKind> = None;
    for line in doc.lines() {
        let attrs = &line.attributes;
        let list = attrs.get_str(attr::LIST).and_then(ListKind::parse);
        if open_list != list {
            if let Some(kind) = open_list {
                out.push_str(list_close(kind));
                out.push('\n');
            }
            if let Some(kind) = list {
                out.push_str(list_open(kind));
                out.push('\n');
            }
            open_list = list;
        }

        let bare_table = match line.ops.as_slice() {
            [Op::Insert { insert: Content::Embed(Embed::Table(t)), attributes }]
                if attributes.is_empty() && list.is_none() && !attrs.contains_key(attr::HEADER) =>
            {
                Some(t)
            }
            _ => None,
        };
        if let Some(table) = bare_table {
            write_table(&mut out, table, attrs);
            out.push('\n');
            continue;
        }

        let tag = match (attrs.get_int(attr::HEADER), list) {
            (_, Some(_)) => "li".to_string(),
            (Some(level), None) => format!("h{}", level.clamp(1, 3)),
            (None, None) => "p".to_string(),
        };
        let _ = write!(out, "<{tag}");
        block_id(&mut out, attrs);
        out.push('>');
        for op in &line.ops {
            write_op(&mut out, op);
        }
        let _ = writeln!(out, "</{tag}>");
    }
    if let Some(kind) = open_list {
        out.push_str(list_close(kind));
        out.push('\n');
    }
    out
}

fn list_tag(kind: ListKind) -> &'static str {
    match kind {
        ListKind::Bullet => "ul",
        ListKind::Ordered => "ol",
    }
}

fn list_open(kind: ListKind) -> &'static str {
    match kind {
        ListKind::Bullet => "<ul>",
        ListKind::Ordered => "<ol>",
    }
}

fn list_close(kind: ListKind) -> &'static str {
    match kind {
        ListKind::Bullet => "</ul>",
        ListKind::Ordered => "</ol>",
    }
}

struct OpenBlock {
    tag: String,
    line: Attributes,
}

struct Frame {
    tag: String,
    attrs: Attributes,
}

struct TableBuild {
    rows: Vec<Vec<String>>,
    row: Option<Vec<String>>,
    cell: Option<String>,
    /// `Some` for a table standing as its own block.
    line: Option<Attributes>,
    inline: Attributes,
}

#[derive(Default)]
struct Parser {
    delta: Delta,
    list: Option<ListKind>,
    block: Option<OpenBlock>,
    frames: Vec<Frame>,
    table: Option<TableBuild>,
}

fn tag_attrs(src: &str) -> Vec<(String, String)> {
    TAG_ATTR
        .captures_iter(src)
        .filter_map(|c| Some((c.get(1)?.as_str().to_ascii_lowercase(), unescape(c.get(2)?.as_str()))))
        .collect()
}

fn find<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn line_attrs(attrs: &[(String, String)]) -> Attributes {
    let mut line = Attributes::new();
    if let Some(id) = find(attrs, "data-block-id") {
        line.set(attr::BLOCK_ID, id);
    }
    line
}

impl Parser {
    fn inline_attrs(&self) -> Attributes {
        let mut out = Attributes::new();
        for frame in &self.frames {
            for (k, v) in frame.attrs.iter() {
                out.set(k, v.clone());
            }
        }
        out
    }

    fn unexpected(tag: &str, offset: usize) -> MarkupError {
        MarkupError::UnexpectedTag {
            tag: tag.to_string(),
            offset,
        }
    }

    fn text(&mut self, text: &str, offset: usize) -> Result<(), MarkupError> {
        if let Some(table) = &mut self.table {
            if let Some(cell) = &mut table.cell {
                cell.push_str(&unescape(text));
                return Ok(());
            }
        } else if self.block.is_some() {
            if !text.is_empty() {
                let attrs = self.inline_attrs();
                self.delta.push(Op::text(unescape(text), attrs));
            }
            return Ok(());
        }
        if text.trim().is_empty() {
            Ok(())
        } else {
            Err(MarkupError::UnexpectedText { offset })
        }
    }

    fn open(&mut self, tag: &str, attrs: &[(String, String)], offset: usize) -> Result<(), MarkupError> {
        if self.table.is_some() && !matches!(tag, "tr" | "td" | "th") {
            return Err(Self::unexpected(tag, offset));
        }
        match tag {
            "h1" | "h2" | "h3" | "p" => {
                if self.block.is_some() || self.list.is_some() {
                    return Err(Self::unexpected(tag, offset));
                }
                let mut line = line_attrs(attrs);
                if let Some(level) = tag.strip_prefix('h').and_then(|n| n.parse::<i64>().ok()) {
                    line.set(attr::HEADER, level);
                }
                self.block = Some(OpenBlock {
                    tag: tag.to_string(),
                    line,
                });
            }
            "ul" | "ol" => {
                if self.block.is_some() || self.list.is_some() {
                    return Err(Self::unexpected(tag, offset));
                }
                self.list = Some(if tag == "ul" {
                    ListKind::Bullet
                } else {
                    ListKind::Ordered
                });
            }
            "li" => {
                let Some(kind) = self.list.filter(|_| self.block.is_none()) else {
                    return Err(Self::unexpected(tag, offset));
                };
                let line = line_attrs(attrs).with(attr::LIST, kind.as_str());
                self.block = Some(OpenBlock {
                    tag: tag.to_string(),
                    line,
                });
            }
            "table" => {
                let line = if self.block.is_none() {
                    if self.list.is_some() {
                        return Err(Self::unexpected(tag, offset));
                    }
                    Some(line_attrs(attrs))
                } else {
                    None
                };
                self.table = Some(TableBuild {
                    rows: Vec::new(),
                    row: None,
                    cell: None,
                    line,
                    inline: self.inline_attrs(),
                });
            }
            "tr" => match &mut self.table {
                Some(t) if t.row.is_none() => t.row = Some(Vec::new()),
                _ => return Err(Self::unexpected(tag, offset)),
            },
            "td" | "th" => match &mut self.table {
                Some(t) if t.row.is_some() && t.cell.is_none() => t.cell = Some(String::new()),
                _ => return Err(Self::unexpected(tag, offset)),
            },
            "img" => {
                if self.block.is_none() {
                    return Err(Self::unexpected(tag, offset));
                }
                let src = find(attrs, "src").unwrap_or_default().to_string();
                let inline = self.inline_attrs();
                self.delta.push(Op::embed(Embed::Image(src), inline));
            }
            "strong" | "b" | "em" | "i" | "u" | "a" | "span" => {
                if self.block.is_none() {
                    return Err(Self::unexpected(tag, offset));
                }
                let mut frame = Attributes::new();
                match tag {
                    "strong" | "b" => frame.set(attr::BOLD, true),
                    "em" | "i" => frame.set(attr::ITALIC, true),
                    "u" => frame.set(attr::UNDERLINE, true),
                    "a" => frame.set(attr::LINK, find(attrs, "href").unwrap_or_default()),
                    _ => {
                        if let Some(color) = find(attrs, "style").and_then(style_color) {
                            frame.set(attr::COLOR, color);
                        }
                        for (name, key) in DATA_CITATION {
                            if let Some(value) = find(attrs, name) {
                                frame.set(key, value);
                            }
                        }
                    }
                }
                self.frames.push(Frame {
                    tag: canonical_inline(tag).to_string(),
                    attrs: frame,
                });
            }
            other => return Err(Self::unexpected(other, offset)),
        }
        Ok(())
    }

    fn close(&mut self, tag: &str, offset: usize) -> Result<(), MarkupError> {
        if self.table.is_some() && !matches!(tag, "tr" | "td" | "th" | "table") {
            return Err(Self::unexpected(tag, offset));
        }
        match tag {
            "td" | "th" => {
                if let Some(t) = &mut self.table
                    && let (Some(row), Some(cell)) = (&mut t.row, t.cell.take())
                {
                    row.push(cell);
                    return Ok(());
                }
                Err(Self::unexpected(tag, offset))
            }
            "tr" => {
                if let Some(t) = &mut self.table
                    && t.cell.is_none()
                    && let Some(row) = t.row.take()
                {
                    t.rows.push(row);
                    return Ok(());
                }
                Err(Self::unexpected(tag, offset))
            }
            "table" => {
                let Some(t) = self.table.take().filter(|t| t.row.is_none()) else {
                    return Err(Self::unexpected(tag, offset));
                };
                let embed = Embed::Table(TableData::new(t.rows));
                match t.line {
                    Some(line) => {
                        self.delta.push(Op::embed(embed, Attributes::new()));
                        self.delta.push(Op::text("\n", line));
                    }
                    None => {
                        self.delta.push(Op::embed(embed, t.inline));
                    }
                }
                Ok(())
            }
            "ul" | "ol" => {
                if self.block.is_some() || self.list.is_none() {
                    return Err(Self::unexpected(tag, offset));
                }
                self.list = None;
                Ok(())
            }
            "h1" | "h2" | "h3" | "p" | "li" => {
                let Some(block) = self.block.take() else {
                    return Err(Self::unexpected(tag, offset));
                };
                if block.tag != tag || !self.frames.is_empty() {
                    return Err(MarkupError::Mismatched {
                        expected: self
                            .frames
                            .last()
                            .map(|f| f.tag.clone())
                            .unwrap_or(block.tag),
                        found: tag.to_string(),
                        offset,
                    });
                }
                self.delta.push(Op::text("\n", block.line));
                Ok(())
            }
            _ => {
                let tag = canonical_inline(tag);
                match self.frames.pop() {
                    Some(frame) if frame.tag == tag => Ok(()),
                    Some(frame) => Err(MarkupError::Mismatched {
                        expected: frame.tag,
                        found: tag.to_string(),
                        offset,
                    }),
                    None => Err(Self::unexpected(tag, offset)),
                }
            }
        }
    }

    fn finish(self) -> Result<Document, MarkupError> {
        if self.table.is_some() {
            return Err(MarkupError::Unclosed("table".into()));
        }
        if let Some(block) = self.block {
            return Err(MarkupError::Unclosed(block.tag));
        }
        if let Some(kind) = self.list {
            return Err(MarkupError::Unclosed(list_tag(kind).into()));
        }
        if self.delta.ops.is_empty() {
            return Ok(Document::new());
        }
        Ok(Document::from_delta(self.delta)?)
    }
}

fn canonical_inline(tag: &str) -> &str {
    match tag {
        "b" => "strong",
        "i" => "em",
        other => other,
    }
}

fn style_color(style: &str) -> Option<&str> {
    style
        .split(';')
        .filter_map(|decl| decl.split_once(':'))
        .find(|(name, _)| name.trim() == "color")
        .map(|(_, value)| value.trim())
}

/// Parse markup produced by [`serialize`] (or hand-written in the same subset).
pub fn parse(markup: &str) -> Result<Document, MarkupError> {
    let mut parser = Parser::default();
    let mut rest = markup;
    let mut offset = 0usize;
    while !rest.is_empty() {
        let Some(lt) = rest.find('<') else {
            parser.text(rest, offset)?;
            break;
        };
        if lt > 0 {
            parser.text(&rest[..lt], offset)?;
        }
        let tag_start = offset + lt;
        let after = &rest[lt + 1..];
        let Some(gt) = after.find('>') else {
            return Err(MarkupError::Malformed { offset: tag_start });
        };
        let src = after[..gt].trim();
        let (closing, body) = match src.strip_prefix('/') {
            Some(body) => (true, body.trim()),
            None => (false, src.trim_end_matches('/').trim()),
        };
        let name_len = body
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(body.len());
        if name_len == 0 {
            return Err(MarkupError::Malformed { offset: tag_start });
        }
        let name = body[..name_len].to_ascii_lowercase();
        if closing {
            parser.close(&name, tag_start)?;
        } else {
            let attrs = tag_attrs(&body[name_len..]);
            parser.open(&name, &attrs, tag_start)?;
        }
        let consumed = lt + 1 + gt + 1;
        offset += consumed;
        rest = &rest[consumed..];
    }
    let doc = parser.finish()?;
    trace!(target: "blocks.markup", len = doc.len(), "parsed");
    Ok(doc)
}
