use once_cell::sync::Lazy;
use pulldown_cmark::{html, CowStr, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use regex::Regex;
use std::collections::HashSet;
use std::fmt::Write as _;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").expect("valid regex"));

const TOC_MARKER: &str = "[TOC]";

#[derive(Debug, Clone)]
struct TocEntry {
    level: usize,
    id: String,
    text: String,
}

/// Renders Markdown to HTML with tables, fenced code, heading anchors and an
/// optional `[TOC]` placeholder.
pub fn render_markdown(content: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

    let mut events: Vec<Event<'_>> = Parser::new_ext(content, options).collect();
    let toc = assign_heading_ids(&mut events);
    let events = replace_toc_markers(events, &toc);

    let mut output = String::with_capacity(content.len() * 3 / 2);
    html::push_html(&mut output, events.into_iter());
    output
}

fn assign_heading_ids(events: &mut [Event<'_>]) -> Vec<TocEntry> {
    // Explicit `{#id}` anchors are reserved before any slug is generated.
    let mut used: HashSet<String> = events
        .iter()
        .filter_map(|event| match event {
            Event::Start(Tag::Heading { id: Some(id), .. }) => Some(id.to_string()),
            _ => None,
        })
        .collect();
    let mut toc = Vec::new();

    let mut index = 0;
    while index < events.len() {
        let Event::Start(Tag::Heading { level, id, .. }) = &events[index] else {
            index += 1;
            continue;
        };
        let level = heading_depth(*level);
        let explicit = id.as_ref().map(|id| id.to_string());

        let mut text = String::new();
        let mut cursor = index + 1;
        while cursor < events.len() {
            match &events[cursor] {
                Event::End(TagEnd::Heading(_)) => break,
                Event::Text(value) | Event::Code(value) => text.push_str(value),
                _ => {}
            }
            cursor += 1;
        }

        let anchor = match explicit {
            Some(anchor) => anchor,
            None => {
                let anchor = unique_slug(&slugify(&text), &mut used);
                if let Event::Start(Tag::Heading { id, .. }) = &mut events[index] {
                    *id = Some(CowStr::from(anchor.clone()));
                }
                anchor
            }
        };

        toc.push(TocEntry {
            level,
            id: anchor,
            text: text.trim().to_string(),
        });
        index = cursor;
    }

    toc
}

fn replace_toc_markers<'a>(events: Vec<Event<'a>>, toc: &[TocEntry]) -> Vec<Event<'a>> {
    let mut output = Vec::with_capacity(events.len());
    let mut index = 0;
    while index < events.len() {
        if let Some(end) = toc_marker_end(&events, index) {
            output.push(Event::Html(CowStr::from(toc_html(toc))));
            index = end + 1;
        } else {
            output.push(events[index].clone());
            index += 1;
        }
    }
    output
}

// Brackets may split the marker across several text events.
fn toc_marker_end(events: &[Event<'_>], start: usize) -> Option<usize> {
    if !matches!(events.get(start), Some(Event::Start(Tag::Paragraph))) {
        return None;
    }
    let mut text = String::new();
    for (offset, event) in events[start + 1..].iter().enumerate() {
        match event {
            Event::Text(value) => text.push_str(value),
            Event::End(TagEnd::Paragraph) => {
                return (text.trim() == TOC_MARKER).then_some(start + 1 + offset);
            }
            _ => return None,
        }
    }
    None
}

fn toc_html(toc: &[TocEntry]) -> String {
    let mut html = String::from("<div class=\"toc\">\n");
    let Some(base) = toc.iter().map(|entry| entry.level).min() else {
        html.push_str("</div>\n");
        return html;
    };

    let mut depth = 0usize;
    for entry in toc {
        let target = entry.level - base + 1;
        if target > depth {
            while depth < target {
                html.push_str("<ul>\n<li>");
                depth += 1;
            }
        } else {
            html.push_str("</li>\n");
            while depth > target {
                html.push_str("</ul>\n</li>\n");
                depth -= 1;
            }
            html.push_str("<li>");
        }
        let _ = write!(html, "<a href=\"#{}\">{}</a>", escape_html(&entry.id), escape_html(&entry.text));
    }
    while depth > 0 {
        html.push_str("</li>\n</ul>\n");
        depth -= 1;
    }
    html.push_str("</div>\n");
    html
}

fn heading_depth(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

pub fn slugify(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    SEPARATORS.replace_all(stripped.trim(), "-").to_string()
}

fn unique_slug(slug: &str, used: &mut HashSet<String>) -> String {
    let base = if slug.is_empty() { "section" } else { slug };
    let mut anchor = base.to_string();
    let mut suffix = 0usize;
    while used.contains(&anchor) {
        suffix += 1;
        anchor = format!("{}_{}", base, suffix);
    }
    used.insert(anchor.clone());
    anchor
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{render_markdown, slugify};

    #[test]
    fn renders_tables() {
        let html = render_markdown("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<table>"));
        assert!(html.contains("<td>1</td>"));
    }

    #[test]
    fn renders_fenced_code_with_language_class() {
        let html = render_markdown("```rust\nfn main() {}\n```\n");
        assert!(html.contains("<pre><code class=\"language-rust\">fn main() {}"));
    }

    #[test]
    fn headings_get_unique_anchor_ids() {
        let html = render_markdown("# Hello World\n\n## Hello World\n\n### Custom {#mine}\n");
        assert!(html.contains("<h1 id=\"hello-world\">Hello World</h1>"));
        assert!(html.contains("<h2 id=\"hello-world_1\">Hello World</h2>"));
        assert!(html.contains("<h3 id=\"mine\">Custom</h3>"));
    }

    #[test]
    fn generated_ids_avoid_explicit_anchors() {
        let html = render_markdown("# Intro\n\n# Intro {#intro}\n\n# Intro\n");
        assert_eq!(html.matches("id=\"intro\"").count(), 1);
        assert!(html.contains("<h1 id=\"intro_1\">Intro</h1>"));
        assert!(html.contains("<h1 id=\"intro_2\">Intro</h1>"));
    }

    #[test]
    fn toc_marker_becomes_nested_list() {
        let html = render_markdown("[TOC]\n\n# Intro\n\n## Details\n\n# End\n");
        assert!(html.starts_with("<div class=\"toc\">"));
        assert!(html.contains("<a href=\"#intro\">Intro</a>"));
        assert!(html.contains("<ul>\n<li><a href=\"#details\">Details</a>"));
        assert!(html.contains("<a href=\"#end\">End</a>"));
        assert!(!html.contains("[TOC]"));
    }

    #[test]
    fn slugify_strips_punctuation() {
        assert_eq!(slugify("  What's New?  Release 2 "), "whats-new-release-2");
    }
}
