//! Resource hints: preconnect to third-party origins and prefetch visible
//! same-origin links.
//!
//! Subresources (`img[src]`, `script[src]`, stylesheet links) contribute
//! their origin to a per-pass set; each origin that is neither the page's
//! own nor already hinted in `<head>` gets one `preconnect` and one
//! `dns-prefetch` link. Anchors pointing at the page's origin get a
//! `prefetch` link once they intersect the viewport.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, trace};
use url::Url;

use crate::dom::{Document, NodeId};
use crate::geometry::Viewport;
use crate::marks::{self, Mark};

/// Origins seen during one pass. Never carried between passes.
pub type DomainSet = BTreeSet<String>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HintPlan {
    /// Origins that need new preconnect/dns-prefetch links, in order.
    pub origins: DomainSet,
    /// Subresource elements whose URL parsed; all get marked.
    pub resources: Vec<NodeId>,
    /// Absolute URLs that need a prefetch link.
    pub prefetch: Vec<String>,
    /// Anchors settled this pass, prefetched or permanently ineligible.
    pub anchors: Vec<NodeId>,
}

impl HintPlan {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.anchors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HintStats {
    pub preconnects: usize,
    pub prefetches: usize,
    pub elements_marked: usize,
}

fn has_rel(doc: &Document, node: NodeId, rel: &str) -> bool {
    doc.attr(node, "rel").is_some_and(|v| {
        v.split_ascii_whitespace()
            .any(|r| r.eq_ignore_ascii_case(rel))
    })
}

/// The URL a subresource element loads, if it is a hint candidate.
fn resource_reference(doc: &Document, node: NodeId) -> Option<&str> {
    match doc.tag(node)? {
        "img" | "script" => doc.attr(node, "src"),
        "link" if has_rel(doc, node, "stylesheet") => doc.attr(node, "href"),
        _ => None,
    }
}

fn http_url(doc: &Document, reference: &str) -> Option<Url> {
    doc.resolve_url(reference.trim())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}

fn origin_of(url: &Url) -> Option<String> {
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Origins and prefetch targets already declared by `<link>` elements.
fn existing_hints(doc: &Document) -> (DomainSet, BTreeSet<String>) {
    let mut hinted = DomainSet::new();
    let mut prefetched = BTreeSet::new();
    for node in doc.elements() {
        if doc.tag(node) != Some("link") {
            continue;
        }
        let Some(url) = doc.attr(node, "href").and_then(|h| http_url(doc, h)) else {
            continue;
        };
        if has_rel(doc, node, "preconnect") || has_rel(doc, node, "dns-prefetch") {
            hinted.extend(origin_of(&url));
        }
        if has_rel(doc, node, "prefetch") {
            prefetched.insert(url.to_string());
        }
    }
    (hinted, prefetched)
}

pub fn plan(doc: &Document, viewport: &Viewport) -> HintPlan {
    let own_origin = doc.origin();
    let (hinted, mut prefetched) = existing_hints(doc);
    let mut plan = HintPlan::default();

    for node in doc.elements() {
        if marks::is_marked(doc, node, Mark::HintProcessed) {
            continue;
        }
        if let Some(reference) = resource_reference(doc, node) {
            let Some(url) = http_url(doc, reference) else {
                trace!(node = %node, reference, "unusable resource URL");
                continue;
            };
            if let Some(origin) = origin_of(&url) {
                if own_origin.as_deref() != Some(origin.as_str()) && !hinted.contains(&origin) {
                    plan.origins.insert(origin);
                }
            }
            plan.resources.push(node);
        } else if doc.tag(node) == Some("a") {
            let Some(href) = doc.attr(node, "href") else {
                continue;
            };
            let Some(url) = doc.resolve_url(href.trim()) else {
                continue;
            };
            let same_origin = own_origin.is_some() && origin_of(&url) == own_origin;
            if !same_origin || href.contains('#') {
                plan.anchors.push(node);
                continue;
            }
            if !doc.layout(node).is_some_and(|r| viewport.intersects(&r)) {
                continue;
            }
            let target = url.to_string();
            if prefetched.insert(target.clone()) {
                plan.prefetch.push(target);
            }
            plan.anchors.push(node);
        }
    }
    plan
}

fn append_link(doc: &mut Document, head: NodeId, attrs: &[(&str, &str)]) -> Result<()> {
    let link = doc.create_element("link");
    for (name, value) in attrs {
        doc.set_attr(link, name, value)?;
    }
    doc.append_child(head, link)
}

pub fn apply(doc: &mut Document, plan: &HintPlan) -> Result<HintStats> {
    let mut stats = HintStats::default();
    if plan.is_empty() {
        return Ok(stats);
    }
    let head = doc.head().context("document has no <head> for resource hints")?;

    for origin in &plan.origins {
        append_link(
            doc,
            head,
            &[("rel", "preconnect"), ("href", origin), ("crossorigin", "anonymous")],
        )?;
        append_link(doc, head, &[("rel", "dns-prefetch"), ("href", origin)])?;
        stats.preconnects += 1;
    }
    for url in &plan.prefetch {
        append_link(doc, head, &[("rel", "prefetch"), ("href", url)])?;
        stats.prefetches += 1;
    }
    for &node in plan.resources.iter().chain(&plan.anchors) {
        if doc.is_connected(node) && marks::mark(doc, node, Mark::HintProcessed)? {
            stats.elements_marked += 1;
        }
    }

    debug!(
        preconnects = stats.preconnects,
        prefetches = stats.prefetches,
        marked = stats.elements_marked,
        "resource hints applied"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    fn links(doc: &Document, rel: &str) -> Vec<String> {
        doc.elements()
            .into_iter()
            .filter(|&n| doc.tag(n) == Some("link") && doc.attr(n, "rel") == Some(rel))
            .filter_map(|n| doc.attr(n, "href").map(str::to_string))
            .collect()
    }

    #[test]
    fn third_party_origins_get_one_hint_pair() {
        let mut doc = Document::parse(
            r#"<head><link rel="stylesheet" href="https://fonts.example.net/f.css"></head>
               <body>
                 <img src="https://cdn.example.org/1.jpg">
                 <img src="https://cdn.example.org/2.jpg">
                 <img src="/local.jpg">
                 <script src="https://cdn.example.org/app.js"></script>
               </body>"#,
            Some("https://site.example.com/"),
        );
        let plan = plan(&doc, &Viewport::default());
        assert_eq!(plan.origins.len(), 2);
        let stats = apply(&mut doc, &plan).unwrap();
        assert_eq!(stats.preconnects, 2);
        assert_eq!(stats.elements_marked, 5);
        assert_eq!(
            links(&doc, "preconnect"),
            vec!["https://cdn.example.org", "https://fonts.example.net"]
        );
        assert_eq!(links(&doc, "dns-prefetch").len(), 2);
    }

    #[test]
    fn already_hinted_origins_are_skipped() {
        let doc = Document::parse(
            r#"<head><link rel="preconnect" href="https://cdn.example.org"></head>
               <body><img src="https://cdn.example.org/1.jpg"></body>"#,
            Some("https://site.example.com/"),
        );
        let plan = plan(&doc, &Viewport::default());
        assert!(plan.origins.is_empty());
        assert_eq!(plan.resources.len(), 1);
    }

    #[test]
    fn unusable_urls_stay_unmarked() {
        let mut doc = Document::parse(
            r#"<body><img id="d" src="data:image/png;base64,AAAA"><img id="bad" src="http://[::1"></body>"#,
            Some("https://site.example.com/"),
        );
        let plan = plan(&doc, &Viewport::default());
        assert!(plan.is_empty());
        apply(&mut doc, &plan).unwrap();
        assert!(!marks::is_marked(&doc, doc.find_by_id("d").unwrap(), Mark::HintProcessed));
    }

    #[test]
    fn anchors_prefetch_when_visible() {
        let mut doc = Document::parse(
            r#"<body>
                 <a id="vis" href="/next">next</a>
                 <a id="dup" href="/next">again</a>
                 <a id="off" href="/later">later</a>
                 <a id="frag" href="/page#top">top</a>
                 <a id="ext" href="https://other.example/">other</a>
               </body>"#,
            Some("https://site.example.com/"),
        );
        for (id, y) in [("vis", 10.0), ("dup", 40.0), ("off", 5000.0), ("frag", 20.0)] {
            let n = doc.find_by_id(id).unwrap();
            doc.set_layout(n, Rect::new(0.0, y, 100.0, 20.0));
        }
        let plan = plan(&doc, &Viewport::new(1000.0, 800.0));
        apply(&mut doc, &plan).unwrap();

        assert_eq!(links(&doc, "prefetch"), vec!["https://site.example.com/next"]);
        for id in ["vis", "dup", "frag", "ext"] {
            assert!(marks::is_marked(&doc, doc.find_by_id(id).unwrap(), Mark::HintProcessed), "{id}");
        }
        assert!(!marks::is_marked(&doc, doc.find_by_id("off").unwrap(), Mark::HintProcessed));
    }

    #[test]
    fn second_plan_is_empty_after_apply() {
        let mut doc = Document::parse(
            r#"<body><img src="https://cdn.example.org/1.jpg"></body>"#,
            Some("https://site.example.com/"),
        );
        let first = plan(&doc, &Viewport::default());
        apply(&mut doc, &first).unwrap();
        let rev = doc.revision();
        let second = plan(&doc, &Viewport::default());
        assert!(second.is_empty());
        apply(&mut doc, &second).unwrap();
        assert_eq!(doc.revision(), rev);
    }
}
