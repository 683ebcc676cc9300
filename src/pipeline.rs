//! One optimization pass over the document.
//!
//! Every rule splits into a read phase that only queries the document and a
//! write phase that mutates it. All read phases run before the first write,
//! so rules see the same snapshot and layout reads are never interleaved with
//! writes. A failing write phase is logged and recorded in the
//! [`PassReport`]; the remaining rules still run.

use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{CompiledHeuristics, Settings};
use crate::dom::{Document, NodeId};
use crate::geometry::Viewport;
use crate::hints::{self, HintPlan, HintStats};
use crate::images::{self, FallbackTable, ImageDescriptor, ImagePlan, ImageStats};
use crate::reveal::{self, RevealPlan, RevealStats};
use crate::scripts;
use crate::visibility::{self, IntersectionRegistry, VisibilityPlan, VisibilityStats};

/// Inputs shared by every rule during a pass.
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    pub settings: &'a Settings,
    pub heuristics: &'a CompiledHeuristics,
    pub viewport: Viewport,
}

impl<'a> PassContext<'a> {
    pub fn new(settings: &'a Settings, heuristics: &'a CompiledHeuristics, viewport: Viewport) -> Self {
        Self {
            settings,
            heuristics,
            viewport,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Images,
    Scripts,
    Hints,
    Viewport,
    Reveal,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Images => "images",
            Self::Scripts => "scripts",
            Self::Hints => "hints",
            Self::Viewport => "viewport",
            Self::Reveal => "reveal",
        })
    }
}

/// Everything the read phases found.
#[derive(Debug, Clone, Default)]
pub struct ReadPhase {
    pub images: Vec<ImageDescriptor>,
    pub scripts: Vec<NodeId>,
    pub hints: HintPlan,
    pub viewport: VisibilityPlan,
    /// `None` when the reveal rules are switched off.
    pub reveal: Option<RevealPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRule {
    pub rule: Rule,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub images: ImageStats,
    pub scripts_deferred: usize,
    pub hints: HintStats,
    pub viewport: VisibilityStats,
    pub reveal: RevealStats,
    pub intersections_delivered: usize,
    /// Time the pass spent queued before it started.
    pub waited_ms: u64,
    /// The pass was forced by its deadline rather than an idle period.
    pub timed_out: bool,
    pub revision_before: u64,
    pub revision_after: u64,
    pub failed_rules: Vec<FailedRule>,
}

impl PassReport {
    /// True if the pass changed the document.
    pub fn mutated(&self) -> bool {
        self.revision_after != self.revision_before
    }

    fn isolate<T: Default>(&mut self, rule: Rule, f: impl FnOnce() -> Result<T>) -> T {
        match f() {
            Ok(value) => value,
            Err(e) => {
                warn!(rule = %rule, error = %format!("{e:#}"), "rule failed, continuing pass");
                self.failed_rules.push(FailedRule {
                    rule,
                    error: format!("{e:#}"),
                });
                T::default()
            }
        }
    }
}

pub fn read_phase(doc: &Document, ctx: &PassContext) -> ReadPhase {
    let read = ReadPhase {
        images: images::collect(doc, ctx),
        scripts: scripts::plan(doc),
        hints: hints::plan(doc, &ctx.viewport),
        viewport: visibility::plan(doc, ctx.heuristics),
        reveal: ctx
            .settings
            .reveal_hidden
            .then(|| reveal::plan(doc, &ctx.heuristics.tables)),
    };
    debug!(
        images = read.images.len(),
        scripts = read.scripts.len(),
        hint_elements = read.hints.resources.len() + read.hints.anchors.len(),
        containers = read.viewport.tag.len(),
        "read phase complete"
    );
    read
}

/// Apply every rule's writes. `image_plans` are the classified descriptors
/// from `read`, computed inline or on the worker.
pub fn write_phase(
    doc: &mut Document,
    read: &ReadPhase,
    image_plans: &[ImagePlan],
    fallbacks: &mut FallbackTable,
    registry: &mut IntersectionRegistry,
) -> PassReport {
    let mut report = PassReport {
        revision_before: doc.revision(),
        ..PassReport::default()
    };

    report.images = report.isolate(Rule::Images, || images::apply(doc, image_plans, fallbacks));
    report.scripts_deferred = report.isolate(Rule::Scripts, || scripts::apply(doc, &read.scripts));
    report.hints = report.isolate(Rule::Hints, || hints::apply(doc, &read.hints));
    report.viewport = report.isolate(Rule::Viewport, || {
        visibility::apply(doc, &read.viewport, registry)
    });
    if let Some(plan) = &read.reveal {
        report.reveal = report.isolate(Rule::Reveal, || reveal::apply(doc, plan));
    }

    report.revision_after = doc.revision();
    report
}

/// Read, classify inline, write.
pub fn run(
    doc: &mut Document,
    ctx: &PassContext,
    fallbacks: &mut FallbackTable,
    registry: &mut IntersectionRegistry,
) -> PassReport {
    let read = read_phase(doc, ctx);
    let plans = images::classify_all(&read.images, &ctx.settings.heuristics.responsive_sizes);
    write_phase(doc, &read, &plans, fallbacks, registry)
}
