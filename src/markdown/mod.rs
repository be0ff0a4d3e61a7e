//! HTML → Markdown conversion (C6) with OneNote-specific asset/link rewrites.
//!
//! Grounded on the teacher's `content_saver/markdown_converter` pipeline,
//! which walks an `html5ever`/`markup5ever_rcdom` tree directly
//! (`htmd/dom_walker.rs`) rather than re-serializing through a text-based
//! converter. This module keeps that direct-DOM-walk shape but writes fresh
//! per-tag handling: the teacher's own `htmd`-crate-based walker and its
//! `custom_handlers/` tree are tuned for scraped web pages, not the
//! attribute-level rewrites this cache needs (`data-fullres-src` selection,
//! `<object>` attachments, absolute-positioned `<div>` flattening).
//!
//! Conversion never fails: malformed HTML still parses (`html5ever` is
//! forgiving by design) and any element this walker doesn't understand is
//! preserved verbatim as an inline HTML fragment rather than dropped.

use std::collections::HashMap;

use html5ever::serialize::{serialize, SerializeOpts};
use html5ever::tendril::TendrilSink;
use html5ever::{parse_document, ParseOpts};
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};

use crate::error::CoreResult;

/// An asset already downloaded and stored under its content hash, as known
/// to the caller (`ContentFetcher`, C8) at the point it converts a page's
/// HTML. `MarkdownConverter` never downloads or hashes anything itself.
#[derive(Debug, Clone)]
pub struct ResolvedAsset {
    /// Path to the asset relative to the page's own directory, as produced
    /// by `LinkResolver`/`CacheLayout` path math.
    pub relative_path: String,
}

/// Looks up a previously downloaded asset by the URL it was fetched from.
///
/// Implemented as a plain `HashMap` by callers; kept as a trait so tests
/// can build maps without going through the real download pipeline.
pub trait AssetResolutionMap {
    fn resolve(&self, url: &str) -> Option<ResolvedAsset>;
}

impl AssetResolutionMap for HashMap<String, ResolvedAsset> {
    fn resolve(&self, url: &str) -> Option<ResolvedAsset> {
        self.get(url).cloned()
    }
}

/// Looks up the local relative path for an anchor `href` that `LinkResolver`
/// (C7) has already classified and resolved against `MetadataStore`.
/// Unresolved or external hrefs simply return `None`, leaving the original
/// href in place.
pub trait LinkResolutionMap {
    fn resolve(&self, href: &str) -> Option<String>;
}

impl LinkResolutionMap for HashMap<String, String> {
    fn resolve(&self, href: &str) -> Option<String> {
        self.get(href).cloned()
    }
}

/// Stateless HTML→Markdown converter. A struct (rather than a free
/// function) to leave room for future per-page options without breaking
/// the call site, matching the teacher's `MarkdownConverter` shape.
#[derive(Debug, Default)]
pub struct MarkdownConverter;

impl MarkdownConverter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Converts `html` to Markdown, rewriting `<img>`/`<object>` references
    /// through `assets`. Never returns `Err` for malformed or empty input;
    /// it surfaces only on truly unexpected I/O failure from the parser's
    /// byte reader, which in-memory parsing never triggers in practice.
    pub fn convert(
        &self,
        html: &str,
        assets: &dyn AssetResolutionMap,
        links: &dyn LinkResolutionMap,
    ) -> CoreResult<String> {
        if html.trim().is_empty() {
            return Ok(String::new());
        }

        let dom = parse_document(RcDom::default(), ParseOpts::default())
            .from_utf8()
            .read_from(&mut html.as_bytes())?;

        let mut ctx = WalkCtx {
            assets,
            links,
            lists: Vec::new(),
        };
        let mut buf = String::new();
        walk(&dom.document, &mut buf, &mut ctx);
        Ok(normalize(&buf))
    }
}

enum ListKind {
    Ordered(u64),
    Unordered,
}

struct WalkCtx<'a> {
    assets: &'a dyn AssetResolutionMap,
    links: &'a dyn LinkResolutionMap,
    lists: Vec<ListKind>,
}

/// Appends `content` to `buf` as its own block, separated from whatever
/// precedes it by a blank line. Leading/trailing blank runs inside `content`
/// are left untouched; `normalize` collapses excess blank lines at the end.
fn push_block(buf: &mut String, content: &str) {
    if content.trim().is_empty() {
        return;
    }
    if !buf.is_empty() && !buf.ends_with("\n\n") {
        if !buf.ends_with('\n') {
            buf.push('\n');
        }
        buf.push('\n');
    }
    buf.push_str(content);
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
}

fn tag_name(handle: &Handle) -> Option<String> {
    match &handle.data {
        NodeData::Element { name, .. } => Some(name.local.to_string()),
        _ => None,
    }
}

fn get_attr(handle: &Handle, attr: &str) -> Option<String> {
    match &handle.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| &*a.name.local == attr)
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

fn walk_children(handle: &Handle, buf: &mut String, ctx: &mut WalkCtx) {
    for child in handle.children.borrow().iter() {
        walk(child, buf, ctx);
    }
}

/// Collects the flattened inline text/markup produced by walking `handle`'s
/// children, without touching the caller's block buffer. Used by block-level
/// handlers (headings, table cells, list items) that need their content as
/// a single string before deciding how to wrap it.
fn render_inline(handle: &Handle, ctx: &mut WalkCtx) -> String {
    let mut buf = String::new();
    walk_children(handle, &mut buf, ctx);
    buf.trim().to_string()
}

fn is_absolute_positioned(handle: &Handle) -> bool {
    get_attr(handle, "style")
        .map(|s| s.to_ascii_lowercase().replace(' ', "").contains("position:absolute"))
        .unwrap_or(false)
}

fn code_language(handle: &Handle) -> String {
    get_attr(handle, "data-language")
        .or_else(|| {
            get_attr(handle, "class").and_then(|class| {
                class
                    .split_ascii_whitespace()
                    .find_map(|tok| {
                        tok.strip_prefix("language-")
                            .or_else(|| tok.strip_prefix("lang-"))
                    })
                    .map(str::to_string)
            })
        })
        .unwrap_or_default()
}

/// Best-effort `<img>` resolution: prefer the higher-resolution
/// `data-fullres-src` variant when it was downloaded, falling back to `src`.
fn resolve_image(handle: &Handle, ctx: &WalkCtx) -> (String, Option<String>) {
    let src = get_attr(handle, "src").unwrap_or_default();
    let fullres = get_attr(handle, "data-fullres-src");

    let chosen_url = fullres
        .as_deref()
        .filter(|url| ctx.assets.resolve(url).is_some())
        .map(str::to_string)
        .or_else(|| {
            if ctx.assets.resolve(&src).is_some() {
                Some(src.clone())
            } else {
                None
            }
        });

    match chosen_url.and_then(|url| ctx.assets.resolve(&url)) {
        Some(resolved) => (resolved.relative_path, None),
        None => (src, Some("unresolved image reference".to_string())),
    }
}

fn object_attachment(handle: &Handle, ctx: &WalkCtx) -> Option<String> {
    let data_url = get_attr(handle, "data")?;
    let resolved = ctx.assets.resolve(&data_url)?;
    let filename = get_attr(handle, "data-attachment-name")
        .or_else(|| {
            resolved
                .relative_path
                .rsplit('/')
                .next()
                .map(str::to_string)
        })
        .unwrap_or_else(|| "attachment".to_string());
    Some(format!("[{filename}]({})", resolved.relative_path))
}

fn escape_inline(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('*', "\\*")
        .replace('_', "\\_")
        .replace('[', "\\[")
        .replace(']', "\\]")
}

fn serialize_raw(handle: &Handle) -> String {
    let serializable: SerializableHandle = handle.clone().into();
    let mut out = Vec::new();
    if serialize(&mut out, &serializable, SerializeOpts::default()).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&out).into_owned()
}

const KNOWN_TAGS: &[&str] = &[
    "html", "head", "body", "script", "style", "title", "meta", "link", "base",
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "br", "hr",
    "strong", "b", "em", "i", "u", "s", "strike", "del", "mark", "code", "pre",
    "a", "img", "object", "ul", "ol", "li", "blockquote",
    "table", "thead", "tbody", "tr", "th", "td", "caption",
    "div", "span", "section", "article", "main", "nav", "aside", "header", "footer",
];

fn walk(handle: &Handle, buf: &mut String, ctx: &mut WalkCtx) {
    match &handle.data {
        NodeData::Document => walk_children(handle, buf, ctx),
        NodeData::Doctype { .. } | NodeData::Comment { .. } | NodeData::ProcessingInstruction { .. } => {}
        NodeData::Text { contents } => {
            buf.push_str(&contents.borrow());
        }
        NodeData::Element { .. } => walk_element(handle, buf, ctx),
    }
}

fn walk_element(handle: &Handle, buf: &mut String, ctx: &mut WalkCtx) {
    let Some(tag) = tag_name(handle) else { return };

    match tag.as_str() {
        "script" | "style" | "head" | "title" | "meta" | "link" | "base" => {}

        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = tag[1..].parse::<usize>().unwrap_or(1);
            let text = render_inline(handle, ctx);
            push_block(buf, &format!("{} {}", "#".repeat(level), text));
        }

        "p" => {
            let text = render_inline(handle, ctx);
            push_block(buf, &text);
        }

        "br" => buf.push_str("  \n"),

        "hr" => push_block(buf, "---"),

        "strong" | "b" => {
            let inner = render_inline(handle, ctx);
            if !inner.is_empty() {
                buf.push_str(&format!("**{inner}**"));
            }
        }

        "em" | "i" => {
            let inner = render_inline(handle, ctx);
            if !inner.is_empty() {
                buf.push_str(&format!("*{inner}*"));
            }
        }

        "s" | "strike" | "del" => {
            let inner = render_inline(handle, ctx);
            if !inner.is_empty() {
                buf.push_str(&format!("~~{inner}~~"));
            }
        }

        // Markdown has no native underline; preserved as an HTML span per
        // the text-fidelity requirement (invariant 1 explicitly allows this).
        "u" | "mark" => {
            let inner = render_inline(handle, ctx);
            buf.push_str(&format!("<{tag}>{inner}</{tag}>"));
        }

        "code" => {
            let inner = render_inline(handle, ctx);
            let fence = "`".repeat(longest_backtick_run(&inner) + 1);
            buf.push_str(&format!("{fence}{inner}{fence}"));
        }

        "pre" => {
            let lang = code_language(handle);
            let code_node = handle
                .children
                .borrow()
                .iter()
                .find(|c| tag_name(c).as_deref() == Some("code"))
                .cloned();
            let raw_text = raw_text_content(code_node.as_ref().unwrap_or(handle));
            let fence = "`".repeat(3.max(longest_backtick_run(&raw_text) + 1));
            push_block(buf, &format!("{fence}{lang}\n{raw_text}\n{fence}"));
        }

        "a" => {
            let href = get_attr(handle, "href").unwrap_or_default();
            let text = render_inline(handle, ctx);
            if href.is_empty() {
                buf.push_str(&text);
            } else {
                let target = ctx.links.resolve(&href).unwrap_or_else(|| href.clone());
                buf.push_str(&format!("[{text}]({target})"));
            }
        }

        "img" => {
            let alt = get_attr(handle, "alt").unwrap_or_default();
            let (path, _warning) = resolve_image(handle, ctx);
            buf.push_str(&format!("![{alt}]({path})"));
        }

        "object" => {
            if let Some(link) = object_attachment(handle, ctx) {
                buf.push_str(&link);
            } else {
                walk_children(handle, buf, ctx);
            }
        }

        "ul" | "ol" => {
            let kind = if tag == "ol" {
                ListKind::Ordered(1)
            } else {
                ListKind::Unordered
            };
            ctx.lists.push(kind);
            let mut list_buf = String::new();
            for child in handle.children.borrow().iter() {
                if tag_name(child).as_deref() == Some("li") {
                    walk(child, &mut list_buf, ctx);
                }
            }
            ctx.lists.pop();
            push_block(buf, list_buf.trim_end());
        }

        "li" => {
            let depth = ctx.lists.len().saturating_sub(1);
            let indent = "  ".repeat(depth);
            let marker = match ctx.lists.last_mut() {
                Some(ListKind::Ordered(n)) => {
                    let m = format!("{n}.");
                    *n += 1;
                    m
                }
                _ => "-".to_string(),
            };
            let content = render_inline(handle, ctx);
            for (i, line) in content.lines().enumerate() {
                if i == 0 {
                    list_buf_push(buf, &format!("{indent}{marker} {line}\n"));
                } else {
                    list_buf_push(buf, &format!("{indent}  {line}\n"));
                }
            }
            if content.is_empty() {
                list_buf_push(buf, &format!("{indent}{marker}\n"));
            }
        }

        "blockquote" => {
            let inner = render_inline(handle, ctx);
            let quoted = inner
                .lines()
                .map(|l| format!("> {l}"))
                .collect::<Vec<_>>()
                .join("\n");
            push_block(buf, &quoted);
        }

        "table" => {
            let rendered = render_table(handle, ctx);
            push_block(buf, &rendered);
        }

        // `div` containers typical of the source service use absolute
        // positioning purely for canvas layout; positioning carries no
        // textual meaning so the wrapper is discarded and children flow
        // into the surrounding block.
        "div" | "span" if is_absolute_positioned(handle) => {
            let mut inner = String::new();
            walk_children(handle, &mut inner, ctx);
            push_block(buf, inner.trim());
        }

        "div" | "section" | "article" | "main" | "header" | "footer" | "nav" | "aside" => {
            let mut inner = String::new();
            walk_children(handle, &mut inner, ctx);
            push_block(buf, inner.trim());
        }

        "span" => walk_children(handle, buf, ctx),

        "html" | "body" => walk_children(handle, buf, ctx),

        _ if KNOWN_TAGS.contains(&tag.as_str()) => walk_children(handle, buf, ctx),

        // Anything this walker doesn't model is preserved verbatim as an
        // inline HTML fragment rather than silently dropped (§4.6 edge case).
        _ => {
            let raw = serialize_raw(handle);
            if !raw.is_empty() {
                push_block(buf, raw.trim());
            }
        }
    }
}

fn list_buf_push(buf: &mut String, s: &str) {
    buf.push_str(s);
}

fn raw_text_content(handle: &Handle) -> String {
    let mut out = String::new();
    collect_text(handle, &mut out);
    out.trim_end_matches('\n').to_string()
}

fn collect_text(handle: &Handle, out: &mut String) {
    match &handle.data {
        NodeData::Text { contents } => out.push_str(&contents.borrow()),
        NodeData::Element { .. } => {
            for child in handle.children.borrow().iter() {
                collect_text(child, out);
            }
        }
        _ => {}
    }
}

fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

fn render_table(handle: &Handle, ctx: &mut WalkCtx) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut header_row_idx = None;
    collect_rows(handle, ctx, &mut rows, &mut header_row_idx, 0);

    if rows.is_empty() {
        return String::new();
    }
    let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
    let header_idx = header_row_idx.unwrap_or(0);

    let mut out = String::new();
    let render_row = |row: &[String]| -> String {
        let mut cells = row.to_vec();
        cells.resize(cols, String::new());
        format!("| {} |", cells.join(" | "))
    };

    out.push_str(&render_row(&rows[header_idx]));
    out.push('\n');
    out.push_str(&format!(
        "| {} |\n",
        vec!["---"; cols].join(" | ")
    ));
    for (i, row) in rows.iter().enumerate() {
        if i == header_idx {
            continue;
        }
        out.push_str(&render_row(row));
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn collect_rows(
    handle: &Handle,
    ctx: &mut WalkCtx,
    rows: &mut Vec<Vec<String>>,
    header_row_idx: &mut Option<usize>,
    depth: usize,
) {
    for child in handle.children.borrow().iter() {
        match tag_name(child).as_deref() {
            Some("tr") => {
                let mut cells = Vec::new();
                let mut row_is_header = false;
                for cell in child.children.borrow().iter() {
                    match tag_name(cell).as_deref() {
                        Some("th") => {
                            row_is_header = true;
                            cells.push(escape_inline(&render_inline(cell, ctx)));
                        }
                        Some("td") => cells.push(escape_inline(&render_inline(cell, ctx))),
                        _ => {}
                    }
                }
                if !cells.is_empty() {
                    if row_is_header && header_row_idx.is_none() {
                        *header_row_idx = Some(rows.len());
                    }
                    rows.push(cells);
                }
            }
            Some("thead") | Some("tbody") | Some("tfoot") => {
                collect_rows(child, ctx, rows, header_row_idx, depth + 1);
            }
            Some("caption") => {}
            _ => {}
        }
    }
}

/// Collapses runs of 3+ blank lines to a single blank line and trims
/// trailing whitespace per line, leaving fenced code block contents
/// untouched.
fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_fence = false;
    let mut blank_run = 0;

    for line in input.lines() {
        let trimmed_fence_marker = line.trim_start();
        if trimmed_fence_marker.starts_with("```") {
            in_fence = !in_fence;
            out.push_str(line);
            out.push('\n');
            blank_run = 0;
            continue;
        }

        if in_fence {
            out.push_str(line);
            out.push('\n');
            continue;
        }

        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run <= 1 {
                out.push('\n');
            }
        } else {
            blank_run = 0;
            out.push_str(line);
            out.push('\n');
        }
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links() -> HashMap<String, String> {
        HashMap::new()
    }

    fn assets(pairs: &[(&str, &str)]) -> HashMap<String, ResolvedAsset> {
        pairs
            .iter()
            .map(|(url, path)| {
                (
                    (*url).to_string(),
                    ResolvedAsset {
                        relative_path: (*path).to_string(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn empty_html_yields_empty_markdown() {
        let converter = MarkdownConverter::new();
        let md = converter.convert("", &assets(&[]), &links()).unwrap();
        assert_eq!(md, "");
    }

    #[test]
    fn headings_and_paragraphs() {
        let converter = MarkdownConverter::new();
        let html = "<h1>Title</h1><p>Hello <strong>world</strong>.</p>";
        let md = converter.convert(html, &assets(&[]), &links()).unwrap();
        assert_eq!(md, "# Title\n\nHello **world**.");
    }

    #[test]
    fn nested_lists_preserve_order_and_depth() {
        let converter = MarkdownConverter::new();
        let html = "<ol><li>one</li><li>two<ul><li>nested</li></ul></li></ol>";
        let md = converter.convert(html, &assets(&[]), &links()).unwrap();
        assert!(md.contains("1. one"));
        assert!(md.contains("2. two"));
        assert!(md.contains("  - nested"));
    }

    #[test]
    fn table_renders_header_and_rows() {
        let converter = MarkdownConverter::new();
        let html = "<table><tr><th>A</th><th>B</th></tr><tr><td>1</td><td>2</td></tr></table>";
        let md = converter.convert(html, &assets(&[]), &links()).unwrap();
        assert!(md.contains("| A | B |"));
        assert!(md.contains("| --- | --- |"));
        assert!(md.contains("| 1 | 2 |"));
    }

    #[test]
    fn code_block_preserves_language_and_does_not_merge_backticks() {
        let converter = MarkdownConverter::new();
        let html = r#"<pre><code class="language-rust">fn f() { "`x`" }</code></pre>"#;
        let md = converter.convert(html, &assets(&[]), &links()).unwrap();
        assert!(md.starts_with("```rust\n"));
        assert!(md.contains(r#"fn f() { "`x`" }"#));
        assert!(!md.contains("``\n``"));
    }

    #[test]
    fn links_preserve_text_and_href() {
        let converter = MarkdownConverter::new();
        let html = r#"<a href="/notebook/page-2">see page two</a>"#;
        let md = converter.convert(html, &assets(&[]), &links()).unwrap();
        assert_eq!(md, "[see page two](/notebook/page-2)");
    }

    #[test]
    fn image_prefers_fullres_over_src_when_both_resolved() {
        let converter = MarkdownConverter::new();
        let html = r#"<img src="thumb.jpg" data-fullres-src="full.jpg" alt="a photo">"#;
        let resolved = assets(&[
            ("thumb.jpg", "../assets/ab/abc.jpg"),
            ("full.jpg", "../assets/cd/cde.jpg"),
        ]);
        let md = converter.convert(html, &resolved, &links()).unwrap();
        assert_eq!(md, "![a photo](../assets/cd/cde.jpg)");
    }

    #[test]
    fn image_falls_back_to_src_when_fullres_missing() {
        let converter = MarkdownConverter::new();
        let html = r#"<img src="thumb.jpg" data-fullres-src="full.jpg" alt="a photo">"#;
        let resolved = assets(&[("thumb.jpg", "../assets/ab/abc.jpg")]);
        let md = converter.convert(html, &resolved, &links()).unwrap();
        assert_eq!(md, "![a photo](../assets/ab/abc.jpg)");
    }

    #[test]
    fn object_attachment_becomes_markdown_link() {
        let converter = MarkdownConverter::new();
        let html = r#"<object data="https://graph/att1" data-attachment-name="notes.pdf"></object>"#;
        let resolved = assets(&[("https://graph/att1", "../assets/9a/9ab.pdf")]);
        let md = converter.convert(html, &resolved, &links()).unwrap();
        assert_eq!(md, "[notes.pdf](../assets/9a/9ab.pdf)");
    }

    #[test]
    fn absolute_positioned_div_is_flattened() {
        let converter = MarkdownConverter::new();
        let html = r#"<div style="position:absolute;left:10px;top:20px" data-id="x"><p>floating text</p></div>"#;
        let md = converter.convert(html, &assets(&[]), &links()).unwrap();
        assert_eq!(md, "floating text");
        assert!(!md.contains("position"));
        assert!(!md.contains("data-id"));
    }

    #[test]
    fn malformed_html_does_not_fail() {
        let converter = MarkdownConverter::new();
        let html = "<h1>Unclosed<p>Paragraph<ul><li>item";
        let md = converter.convert(html, &assets(&[]), &links());
        assert!(md.is_ok());
        let md = md.unwrap();
        assert!(md.contains("Unclosed"));
        assert!(md.contains("Paragraph"));
        assert!(md.contains("item"));
    }

    #[test]
    fn unknown_element_is_preserved_as_inline_html() {
        let converter = MarkdownConverter::new();
        let html = r#"<svg width="10" height="10"><circle r="5"></circle></svg>"#;
        let md = converter.convert(html, &assets(&[]), &links()).unwrap();
        assert!(md.contains("<svg"));
        assert!(md.contains("<circle"));
    }
}
