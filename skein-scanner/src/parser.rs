//! HTML to title/text/metadata/links extraction.

use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::url_utils::resolve_url;

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];
const LANDMARKS: &[&str] = &["nav", "header", "footer", "aside", "main", "article"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub open_graph: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedLink {
    pub url: String,
    pub anchor_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Nearest landmark element containing the anchor, `body` otherwise.
    pub context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedPage {
    pub title: Option<String>,
    pub content: String,
    pub metadata: PageMetadata,
    pub links: Vec<ExtractedLink>,
}

pub fn parse_html(html: &str, base_url: &str) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        content: extract_text(&document),
        metadata: extract_metadata(&document, base_url),
        links: extract_links(&document, base_url),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").unwrap();
    document
        .select(&selector)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// Visible text with script, style and head content removed.
fn extract_text(document: &Html) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
        });
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed);
        }
    }

    collapse_whitespace(&parts.join(" "))
}

fn extract_metadata(document: &Html, base_url: &str) -> PageMetadata {
    let mut metadata = PageMetadata::default();

    let meta_selector = Selector::parse("meta[content]").unwrap();
    for meta in document.select(&meta_selector) {
        let element = meta.value();
        let Some(content) = element.attr("content").map(str::trim) else {
            continue;
        };
        if content.is_empty() {
            continue;
        }

        if let Some(name) = element.attr("name") {
            match name.to_lowercase().as_str() {
                "description" => metadata.description = Some(content.to_string()),
                "keywords" => {
                    metadata.keywords = content
                        .split(',')
                        .map(|k| k.trim().to_string())
                        .filter(|k| !k.is_empty())
                        .collect();
                }
                _ => {}
            }
        }

        if let Some(property) = element.attr("property")
            && property.starts_with("og:")
        {
            metadata
                .open_graph
                .insert(property.to_string(), content.to_string());
        }
    }

    let canonical_selector = Selector::parse("link[rel=\"canonical\"][href]").unwrap();
    metadata.canonical = document
        .select(&canonical_selector)
        .next()
        .and_then(|l| l.value().attr("href"))
        .and_then(|href| resolve_url(base_url, href));

    let html_selector = Selector::parse("html[lang]").unwrap();
    metadata.language = document
        .select(&html_selector)
        .next()
        .and_then(|h| h.value().attr("lang"))
        .map(|l| l.to_string());

    metadata
}

/// Anchors resolved against `base_url`, de-duplicated by target URL in document order.
fn extract_links(document: &Html, base_url: &str) -> Vec<ExtractedLink> {
    let link_selector = Selector::parse("a[href]").unwrap();
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&link_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(url) = resolve_url(base_url, href) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }

        links.push(ExtractedLink {
            url,
            anchor_text: collapse_whitespace(&element.text().collect::<String>()),
            title: element.value().attr("title").map(|t| t.trim().to_string()),
            context: link_context(&element),
        });
    }

    links
}

fn link_context(element: &ElementRef) -> String {
    element
        .ancestors()
        .filter_map(|node| node.value().as_element().map(|e| e.name().to_string()))
        .find(|name| LANDMARKS.contains(&name.as_str()))
        .unwrap_or_else(|| "body".to_string())
}
