//! Viewport-driven paint skipping for large content containers.
//!
//! Containers get the `optimize-viewport` class, which a stylesheet injected
//! once per document maps to `content-visibility: auto`. Each tagged element
//! is tracked by an [`IntersectionRegistry`]; when it enters the margin-widened
//! viewport its inline `content-visibility` flips to `visible`, and back to
//! `auto` when it leaves.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::CompiledHeuristics;
use crate::dom::{Document, NodeId};
use crate::geometry::Viewport;
use crate::marks::{self, Mark};

pub const VIEWPORT_CLASS: &str = "optimize-viewport";
pub const STYLE_MARKER_ATTR: &str = "data-pagelift";
const STYLE_MARKER: &str = "viewport";

const VIEWPORT_CSS: &str = ".optimize-viewport { content-visibility: auto; contain-intrinsic-size: 0 500px; contain: content; }";

// ── Intersection tracking ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntersectionEntry {
    pub target: NodeId,
    pub is_intersecting: bool,
}

/// Targets and their last delivered intersection state. `None` until the
/// first computation, so every target gets an initial entry.
#[derive(Debug)]
pub struct IntersectionRegistry {
    margin: f32,
    targets: BTreeMap<NodeId, Option<bool>>,
}

impl IntersectionRegistry {
    pub fn new(margin: f32) -> Self {
        Self {
            margin,
            targets: BTreeMap::new(),
        }
    }

    /// Start tracking `node`. Returns false if it was already tracked.
    pub fn observe(&mut self, node: NodeId) -> bool {
        if self.targets.contains_key(&node) {
            return false;
        }
        self.targets.insert(node, None);
        true
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.targets.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Stop tracking everything.
    pub fn disconnect(&mut self) {
        if !self.targets.is_empty() {
            debug!(targets = self.targets.len(), "intersection registry disconnected");
        }
        self.targets.clear();
    }

    /// Entries whose state changed since the last call. Targets no longer in
    /// the document are dropped.
    pub fn compute_changes(&mut self, doc: &Document, viewport: &Viewport) -> Vec<IntersectionEntry> {
        self.targets.retain(|&node, _| doc.is_connected(node));
        let mut changes = Vec::new();
        for (&target, last) in self.targets.iter_mut() {
            let is_intersecting = doc
                .layout(target)
                .is_some_and(|r| viewport.intersects_with_margin(&r, self.margin));
            if *last != Some(is_intersecting) {
                *last = Some(is_intersecting);
                changes.push(IntersectionEntry {
                    target,
                    is_intersecting,
                });
            }
        }
        changes
    }
}

/// Write `content-visibility` for each entry. Returns the number of writes.
pub fn deliver(doc: &mut Document, entries: &[IntersectionEntry]) -> Result<usize> {
    let mut written = 0;
    for entry in entries {
        let value = if entry.is_intersecting { "visible" } else { "auto" };
        if doc.set_style_property(entry.target, "content-visibility", value, false)? {
            trace!(target = %entry.target, value, "content-visibility toggled");
            written += 1;
        }
    }
    Ok(written)
}

// ── Container tagging ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilityPlan {
    pub inject_style: bool,
    pub tag: Vec<NodeId>,
    pub lazy_frames: Vec<NodeId>,
    pub wrap: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VisibilityStats {
    pub containers_tagged: usize,
    pub frames_lazy: usize,
    pub frames_wrapped: usize,
    pub registered: usize,
}

fn has_viewport_style(doc: &Document) -> bool {
    doc.elements().into_iter().any(|n| {
        doc.tag(n) == Some("style") && doc.attr(n, STYLE_MARKER_ATTR) == Some(STYLE_MARKER)
    })
}

pub fn plan(doc: &Document, heuristics: &CompiledHeuristics) -> VisibilityPlan {
    let mut plan = VisibilityPlan {
        inject_style: !has_viewport_style(doc),
        ..VisibilityPlan::default()
    };
    plan.tag = doc
        .select(&heuristics.containers)
        .into_iter()
        .filter(|&n| !doc.has_class(n, VIEWPORT_CLASS))
        .collect();
    for node in doc.elements() {
        if matches!(doc.tag(node), Some("iframe" | "embed")) {
            if !doc.has_attr(node, "loading") {
                plan.lazy_frames.push(node);
            }
            if !marks::is_marked(doc, node, Mark::ViewportWrapped) {
                plan.wrap.push(node);
            }
        }
    }
    plan
}

fn inject_style(doc: &mut Document) -> Result<()> {
    let Some(parent) = doc.head().or_else(|| doc.document_element()) else {
        return Ok(());
    };
    let style = doc.create_element("style");
    doc.set_attr(style, STYLE_MARKER_ATTR, STYLE_MARKER)?;
    let css = doc.create_text(VIEWPORT_CSS);
    doc.append_child(style, css)?;
    doc.append_child(parent, style)
}

fn wrap(doc: &mut Document, node: NodeId) -> Result<bool> {
    let Some(parent) = doc.parent(node) else {
        return Ok(false);
    };
    let wrapper = doc.create_element("div");
    doc.set_attr(wrapper, "class", VIEWPORT_CLASS)?;
    doc.insert_before(parent, wrapper, node)?;
    doc.append_child(wrapper, node)?;
    marks::mark(doc, node, Mark::ViewportWrapped)?;
    Ok(true)
}

pub fn apply(
    doc: &mut Document,
    plan: &VisibilityPlan,
    registry: &mut IntersectionRegistry,
) -> Result<VisibilityStats> {
    let mut stats = VisibilityStats::default();
    if plan.inject_style && !has_viewport_style(doc) {
        inject_style(doc)?;
    }
    for &node in &plan.tag {
        if doc.is_connected(node) && doc.add_class(node, VIEWPORT_CLASS)? {
            stats.containers_tagged += 1;
        }
    }
    for &node in &plan.lazy_frames {
        if doc.is_connected(node) && !doc.has_attr(node, "loading") {
            doc.set_attr(node, "loading", "lazy")?;
            stats.frames_lazy += 1;
        }
    }
    for &node in &plan.wrap {
        if doc.is_connected(node)
            && !marks::is_marked(doc, node, Mark::ViewportWrapped)
            && wrap(doc, node)?
        {
            stats.frames_wrapped += 1;
        }
    }
    for node in doc.elements() {
        if doc.has_class(node, VIEWPORT_CLASS) && registry.observe(node) {
            stats.registered += 1;
        }
    }
    if stats != VisibilityStats::default() {
        debug!(?stats, "viewport containers updated");
    }
    Ok(stats)
}
