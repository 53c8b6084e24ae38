//! Best-effort plain-text, image, and table extraction from fetched HTML.
//!
//! [`extract_text`] prefers the main-article region (`<article>` or `<main>`)
//! and otherwise strips boilerplate (`script`, `style`, `noscript`, `header`,
//! `footer`, `nav`) from the whole page before removing tags. Extraction
//! never errors: hostile or malformed markup just yields less text.
//!
//! [`extract_images`] and [`extract_tables`] capture a bounded amount of
//! page media for readings; current pipeline stages carry them as empty
//! placeholders, but the extractor keeps the capability exercised and tested.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::models::{ImageRef, TableRef};

const MAX_IMAGES: usize = 6;
const MAX_TABLES: usize = 3;
const MAX_TABLE_ROWS: usize = 3;

fn regexes() -> &'static ExtractRegexes {
    static CELL: OnceLock<ExtractRegexes> = OnceLock::new();
    CELL.get_or_init(ExtractRegexes::compile)
}

struct ExtractRegexes {
    article: Regex,
    main: Regex,
    boilerplate: Vec<Regex>,
    comment: Regex,
    block_end: Regex,
    tag: Regex,
    img: Regex,
    src_attr: Regex,
    alt_attr: Regex,
    table: Regex,
    row: Regex,
    cell: Regex,
}

impl ExtractRegexes {
    fn compile() -> Self {
        Self {
            article: Regex::new(r"(?is)<article\b[^>]*>(.*?)</article>").unwrap(),
            main: Regex::new(r"(?is)<main\b[^>]*>(.*?)</main>").unwrap(),
            boilerplate: ["script", "style", "noscript", "header", "footer", "nav"]
                .iter()
                .map(|tag| {
                    Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).unwrap()
                })
                .collect(),
            comment: Regex::new(r"(?s)<!--.*?-->").unwrap(),
            block_end: Regex::new(r"(?i)</(p|div|li|h[1-6]|tr|br|section|blockquote)\s*>").unwrap(),
            tag: Regex::new(r"(?s)<[^>]+>").unwrap(),
            img: Regex::new(r"(?is)<img\b[^>]*>").unwrap(),
            src_attr: Regex::new(r#"(?is)\b(?:src|data-src)\s*=\s*["']([^"']+)["']"#).unwrap(),
            alt_attr: Regex::new(r#"(?is)\balt\s*=\s*["']([^"']*)["']"#).unwrap(),
            table: Regex::new(r"(?is)<table\b[^>]*>(.*?)</table>").unwrap(),
            row: Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").unwrap(),
            cell: Regex::new(r"(?is)<t[dh]\b[^>]*>(.*?)</t[dh]>").unwrap(),
        }
    }
}

/// Extract readable plain text from an HTML page.
pub fn extract_text(html: &str) -> String {
    let re = regexes();

    // Prefer the article/main region when one exists and carries real text.
    for region in [&re.article, &re.main] {
        if let Some(captures) = region.captures(html) {
            let text = strip_markup(captures.get(1).map(|m| m.as_str()).unwrap_or(""));
            if !text.trim().is_empty() {
                return text;
            }
        }
    }

    strip_markup(html)
}

fn strip_markup(fragment: &str) -> String {
    let re = regexes();
    let mut cleaned = re.comment.replace_all(fragment, " ").into_owned();
    for pattern in &re.boilerplate {
        cleaned = pattern.replace_all(&cleaned, " ").into_owned();
    }
    let cleaned = re.block_end.replace_all(&cleaned, "\n");
    let cleaned = re.tag.replace_all(&cleaned, " ");
    collapse_whitespace(&unescape_entities(&cleaned))
}

fn unescape_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}

fn collapse_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }
    lines.join("\n")
}

/// Extract up to six images as `{src, alt}`, with `src` resolved against
/// `base_url` so relative links come out absolute.
pub fn extract_images(html: &str, base_url: &str) -> Vec<ImageRef> {
    let re = regexes();
    let base = Url::parse(base_url).ok();

    let mut images = Vec::new();
    for tag in re.img.find_iter(html) {
        if images.len() >= MAX_IMAGES {
            break;
        }
        let tag = tag.as_str();
        let Some(src) = re.src_attr.captures(tag).and_then(|c| c.get(1)) else {
            continue;
        };
        let src = match &base {
            Some(base) => base
                .join(src.as_str())
                .map(|u| u.to_string())
                .unwrap_or_else(|_| src.as_str().to_string()),
            None => src.as_str().to_string(),
        };
        let alt = re
            .alt_attr
            .captures(tag)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        images.push(ImageRef { src, alt });
    }
    images
}

/// Extract up to three tables: first row as headers, then up to three data rows.
pub fn extract_tables(html: &str) -> Vec<TableRef> {
    let re = regexes();

    let mut tables = Vec::new();
    for table in re.table.captures_iter(html) {
        if tables.len() >= MAX_TABLES {
            break;
        }
        let body = table.get(1).map(|m| m.as_str()).unwrap_or("");

        let mut rows_iter = re.row.captures_iter(body);
        let headers: Vec<String> = match rows_iter.next() {
            Some(first) => extract_cells(first.get(1).map(|m| m.as_str()).unwrap_or("")),
            None => continue,
        };

        let mut rows: Vec<Vec<String>> = Vec::new();
        for row in rows_iter.take(MAX_TABLE_ROWS) {
            let cells = extract_cells(row.get(1).map(|m| m.as_str()).unwrap_or(""));
            if !cells.is_empty() {
                rows.push(cells);
            }
        }

        if !headers.is_empty() || !rows.is_empty() {
            tables.push(TableRef { headers, rows });
        }
    }
    tables
}

fn extract_cells(row_html: &str) -> Vec<String> {
    regexes()
        .cell
        .captures_iter(row_html)
        .map(|c| strip_markup(c.get(1).map(|m| m.as_str()).unwrap_or("")))
        .map(|s| s.replace('\n', " "))
        .collect()
}
