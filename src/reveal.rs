//! Force-visible rules for content hidden behind entrance animations.
//!
//! Two rules share one candidate filter (rendered elements under `<body>`,
//! not yet revealed, not protected by [`crate::guard`]):
//!
//! - the hidden-element fixer un-hides elements that are hidden by style,
//!   by the `hidden` attribute or by a hidden-marker class, but only when
//!   one of their classes suggests an animation;
//! - the transform fixer neutralizes zero-scale or off-screen transforms,
//!   fully clipped `clip-path`s, and zero opacity paired with motion.
//!
//! Both are switched off by `Settings::reveal_hidden = false`.

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::config::Heuristics;
use crate::dom::{Document, NodeId};
use crate::guard::UiGuard;
use crate::marks::{self, Mark};
use crate::style::ComputedStyle;

const NON_RENDERED: &[&str] = &[
    "script", "style", "template", "noscript", "link", "meta", "title", "base", "head",
];

const OFFSCREEN_PX: f32 = 1000.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unhide {
    pub node: NodeId,
    pub display: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevealPlan {
    pub unhide: Vec<Unhide>,
    pub neutralize: Vec<NodeId>,
}

impl RevealPlan {
    pub fn is_empty(&self) -> bool {
        self.unhide.is_empty() && self.neutralize.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RevealStats {
    pub unhidden: usize,
    pub neutralized: usize,
}

/// UA default `display` for tags that are not plain blocks.
fn default_display(tag: &str) -> &'static str {
    match tag {
        "span" | "a" | "em" | "strong" | "b" | "i" | "small" | "label" | "abbr" | "code"
        | "cite" | "q" | "sub" | "sup" | "time" | "mark" => "inline",
        "img" | "video" | "canvas" | "iframe" | "button" | "input" | "select" | "textarea" => {
            "inline-block"
        }
        "li" => "list-item",
        "table" => "table",
        "tr" => "table-row",
        "td" | "th" => "table-cell",
        "thead" => "table-header-group",
        "tbody" => "table-row-group",
        "tfoot" => "table-footer-group",
        _ => "block",
    }
}

/// The `display` to force: keep a visible inline or cascaded value, else
/// fall back to the tag default.
fn visible_display(doc: &Document, node: NodeId, computed: &ComputedStyle) -> String {
    let inline = doc.inline_style(node);
    match inline.get("display") {
        Some(v) if v.trim().eq_ignore_ascii_case("none") => return "block".into(),
        Some(v) => return v.trim().to_string(),
        None => {}
    }
    match computed.get("display") {
        Some(v) if !v.trim().eq_ignore_ascii_case("none") => v.trim().to_string(),
        _ => default_display(doc.tag(node).unwrap_or("div")).to_string(),
    }
}

fn has_reveal_class(doc: &Document, node: NodeId, tables: &Heuristics) -> bool {
    doc.element(node).is_some_and(|el| {
        el.classes().any(|c| {
            let c = c.to_ascii_lowercase();
            tables.reveal_class_keywords.iter().any(|k| c.contains(k.as_str()))
        })
    })
}

fn is_marked_hidden(doc: &Document, node: NodeId, computed: &ComputedStyle, tables: &Heuristics) -> bool {
    computed.is_hidden()
        || doc.has_attr(node, "hidden")
        || tables.hidden_classes.iter().any(|c| doc.has_class(node, c))
}

fn candidates(doc: &Document) -> Vec<NodeId> {
    let Some(body) = doc.body() else {
        return Vec::new();
    };
    doc.descendant_elements(body)
        .into_iter()
        .filter(|&n| {
            !doc.tag(n).is_some_and(|t| NON_RENDERED.contains(&t))
                && !marks::is_marked(doc, n, Mark::Revealed)
        })
        .collect()
}

pub fn plan(doc: &Document, tables: &Heuristics) -> RevealPlan {
    let guard = UiGuard::new(tables);
    let mut plan = RevealPlan::default();
    for node in candidates(doc) {
        let computed = doc.computed_style(node);
        let hidden = is_marked_hidden(doc, node, &computed, tables) && has_reveal_class(doc, node, tables);
        let transformed = needs_neutralizing(&computed);
        if !(hidden || transformed) || guard.is_protected(doc, node) {
            continue;
        }
        if hidden {
            plan.unhide.push(Unhide {
                node,
                display: visible_display(doc, node, &computed),
            });
        }
        if transformed {
            plan.neutralize.push(node);
        }
    }
    plan
}

pub fn apply(doc: &mut Document, plan: &RevealPlan) -> Result<RevealStats> {
    let mut stats = RevealStats::default();
    for u in &plan.unhide {
        if !doc.is_connected(u.node) || marks::is_marked(doc, u.node, Mark::Revealed) {
            continue;
        }
        doc.set_style_property(u.node, "display", &u.display, true)?;
        doc.set_style_property(u.node, "visibility", "visible", true)?;
        doc.set_style_property(u.node, "opacity", "1", true)?;
        doc.remove_attr(u.node, "hidden")?;
        stats.unhidden += 1;
    }
    for &node in &plan.neutralize {
        if !doc.is_connected(node) || marks::is_marked(doc, node, Mark::Revealed) {
            continue;
        }
        for (name, value) in [
            ("transform", "none"),
            ("clip-path", "none"),
            ("opacity", "1"),
            ("animation", "none"),
            ("transition", "none"),
        ] {
            doc.set_style_property(node, name, value, true)?;
        }
        stats.neutralized += 1;
    }
    for node in plan
        .unhide
        .iter()
        .map(|u| u.node)
        .chain(plan.neutralize.iter().copied())
    {
        if doc.is_connected(node) {
            marks::mark(doc, node, Mark::Revealed)?;
        }
    }
    if stats != RevealStats::default() {
        debug!(unhidden = stats.unhidden, neutralized = stats.neutralized, "hidden content revealed");
    }
    Ok(stats)
}

// ── Transform / clip-path analysis ──────────────────────────────────────────

pub fn needs_neutralizing(style: &ComputedStyle) -> bool {
    style.get("transform").is_some_and(transform_hides)
        || style.get("clip-path").is_some_and(clip_path_hides)
        || (style.opacity() <= 0.0 && style.has_motion())
}

/// `name(args)` pairs of a CSS function list, names lowercased.
fn functions(value: &str) -> Vec<(String, Vec<&str>)> {
    let mut out = Vec::new();
    let mut rest = value;
    while let Some(open) = rest.find('(') {
        let name = rest[..open].trim().to_ascii_lowercase();
        let Some(close) = rest[open..].find(')') else {
            break;
        };
        let args = rest[open + 1..open + close]
            .split(|c: char| c == ',' || c.is_ascii_whitespace())
            .filter(|a| !a.is_empty())
            .collect();
        out.push((name, args));
        rest = &rest[open + close + 1..];
    }
    out
}

fn number(arg: &str) -> Option<f32> {
    arg.trim().parse().ok()
}

/// Split `12.5px` into `(12.5, "px")`.
fn length(arg: &str) -> Option<(f32, &str)> {
    let arg = arg.trim();
    let split = arg
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(arg.len());
    let value = arg[..split].parse().ok()?;
    Some((value, &arg[split..]))
}

fn is_offscreen(arg: &str) -> bool {
    match length(arg) {
        Some((v, "%" | "vw" | "vh")) => v.abs() >= 100.0,
        Some((v, "px")) => v.abs() >= OFFSCREEN_PX,
        _ => false,
    }
}

pub fn transform_hides(value: &str) -> bool {
    if value.trim().eq_ignore_ascii_case("none") {
        return false;
    }
    functions(value).iter().any(|(name, args)| match name.as_str() {
        "scale" | "scalex" | "scaley" | "scale3d" => {
            args.iter().any(|a| number(a).is_some_and(|n| n == 0.0))
        }
        "matrix" => {
            args.len() == 6
                && number(args[0]) == Some(0.0)
                && number(args[3]) == Some(0.0)
        }
        "translate" | "translatex" | "translatey" | "translate3d" => {
            args.iter().any(|a| is_offscreen(a))
        }
        _ => false,
    })
}

pub fn clip_path_hides(value: &str) -> bool {
    functions(value).iter().any(|(name, args)| match name.as_str() {
        "inset" => args
            .first()
            .and_then(|a| length(a))
            .is_some_and(|(v, unit)| unit == "%" && v >= 50.0),
        "circle" => args.first().and_then(|a| length(a)).is_some_and(|(v, _)| v == 0.0),
        "ellipse" => {
            args.len() >= 2
                && length(args[0]).is_some_and(|(v, _)| v == 0.0)
                && length(args[1]).is_some_and(|(v, _)| v == 0.0)
        }
        _ => false,
    })
}
