//! Image classification and rewriting.
//!
//! Split in three so classification can leave the main thread:
//! [`collect`] reads the document into owned [`ImageDescriptor`]s,
//! [`classify`] turns a descriptor into an [`ImageVerdict`] without touching
//! the document, and [`apply`] performs the writes. Load failures are handled
//! later through the [`FallbackTable`] that `apply` fills in.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::dom::{Document, NodeId};
use crate::marks::{self, Mark};
use crate::pipeline::PassContext;

/// Records the source an image had when it was first optimized.
pub const ORIGINAL_SRC_ATTR: &str = "data-original-src";

const SVG_DATA_PREFIX: &str = "data:image/svg+xml";

/// Read-phase snapshot of one unoptimized `<img>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub node: NodeId,
    pub current_src: Option<String>,
    pub deferred_src: Option<String>,
    /// Deferred source if present, else current source, resolved to an absolute URL.
    pub effective_src: Option<String>,
    pub library_handled: bool,
    pub has_loading: bool,
    pub has_srcset: bool,
    pub has_original_src: bool,
    pub has_error_handler: bool,
    pub inline_display_none: bool,
    pub in_viewport: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchPriority {
    High,
    Low,
}

impl FetchPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

/// Writes for a regular remote image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRewrite {
    pub set_lazy: bool,
    pub install_fallback: bool,
    pub fallback_src: Option<String>,
    pub record_original: Option<String>,
    pub srcset: Option<String>,
    pub sizes: Option<String>,
    pub priority: Option<FetchPriority>,
    pub clear_display_none: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ImageVerdict {
    /// Not a candidate this pass; left untouched and unmarked.
    Skip,
    /// A lazy-load library already finished with it; mark only.
    AlreadyHandled,
    /// SVG placeholder without a usable deferred source; mark only.
    PlaceholderOnly,
    SwapPlaceholder { src: String, original: String },
    Optimize(ImageRewrite),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePlan {
    pub node: NodeId,
    pub verdict: ImageVerdict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImageStats {
    pub optimized: usize,
    pub placeholders_swapped: usize,
    pub library_handled: usize,
    pub fallbacks_installed: usize,
}

/// True for inline SVG data URIs and references whose path ends in `.svg`.
pub fn is_svg_reference(src: &str) -> bool {
    let src = src.trim();
    if src
        .as_bytes()
        .get(..SVG_DATA_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(SVG_DATA_PREFIX.as_bytes()))
    {
        return true;
    }
    let path = src.split(['?', '#']).next().unwrap_or(src);
    path.to_ascii_lowercase().ends_with(".svg")
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

// ── Read phase ──────────────────────────────────────────────────────────────

pub fn collect(doc: &Document, ctx: &PassContext) -> Vec<ImageDescriptor> {
    let tables = &ctx.heuristics.tables;
    doc.elements()
        .into_iter()
        .filter(|&n| doc.tag(n) == Some("img") && !marks::is_marked(doc, n, Mark::ImageOptimized))
        .filter_map(|node| {
            let el = doc.element(node)?;
            let current_src = el.attr("src").map(str::to_string);
            let deferred_src = tables
                .deferred_src_attrs
                .iter()
                .filter_map(|a| el.attr(a))
                .find(|v| !v.trim().is_empty())
                .map(str::to_string);
            let effective_src = deferred_src
                .as_deref()
                .or(current_src.as_deref())
                .and_then(|s| doc.resolve_url(s))
                .map(String::from);
            let library_handled = tables.lazy_loaded_classes.iter().any(|c| el.has_class(c))
                || tables
                    .lazy_status_attrs
                    .iter()
                    .any(|s| el.attr(&s.name) == Some(s.value.as_str()));
            let inline_display_none = doc
                .inline_style(node)
                .get("display")
                .is_some_and(|v| v.eq_ignore_ascii_case("none"));
            let in_viewport = doc
                .layout(node)
                .is_some_and(|r| ctx.viewport.intersects(&r));

            Some(ImageDescriptor {
                node,
                current_src,
                deferred_src,
                effective_src,
                library_handled,
                has_loading: el.attr("loading").is_some(),
                has_srcset: el.attr("srcset").is_some_and(|s| !s.trim().is_empty()),
                has_original_src: el.attr(ORIGINAL_SRC_ATTR).is_some(),
                has_error_handler: el.attr(Mark::ErrorHandlerAttached.attribute()).is_some(),
                inline_display_none,
                in_viewport,
            })
        })
        .collect()
}

// ── Classification (pure) ───────────────────────────────────────────────────

pub fn classify(desc: &ImageDescriptor, sizes: &str) -> ImageVerdict {
    if desc.library_handled {
        return ImageVerdict::AlreadyHandled;
    }

    if let Some(current) = desc.current_src.as_deref().filter(|s| is_svg_reference(s)) {
        return match desc.deferred_src.as_deref() {
            Some(deferred) if !is_svg_reference(deferred) && deferred != current => {
                ImageVerdict::SwapPlaceholder {
                    src: deferred.to_string(),
                    original: current.to_string(),
                }
            }
            _ => ImageVerdict::PlaceholderOnly,
        };
    }

    let Some(src) = desc
        .effective_src
        .as_deref()
        .filter(|s| is_remote(s) && !is_svg_reference(s))
    else {
        return ImageVerdict::Skip;
    };

    let first_visit = !desc.has_original_src;
    ImageVerdict::Optimize(ImageRewrite {
        set_lazy: !desc.has_loading,
        install_fallback: !desc.has_error_handler,
        fallback_src: desc.deferred_src.clone(),
        record_original: first_visit.then(|| src.to_string()),
        srcset: (first_visit && !desc.has_srcset).then(|| format!("{src} 1x, {src} 2x")),
        sizes: (first_visit && !desc.has_srcset).then(|| sizes.to_string()),
        priority: first_visit.then_some(if desc.in_viewport {
            FetchPriority::High
        } else {
            FetchPriority::Low
        }),
        clear_display_none: desc.inline_display_none,
    })
}

pub fn classify_all(descriptors: &[ImageDescriptor], sizes: &str) -> Vec<ImagePlan> {
    descriptors
        .iter()
        .map(|d| ImagePlan {
            node: d.node,
            verdict: classify(d, sizes),
        })
        .collect()
}

// ── Write phase ─────────────────────────────────────────────────────────────

pub fn apply(doc: &mut Document, plans: &[ImagePlan], fallbacks: &mut FallbackTable) -> Result<ImageStats> {
    let mut stats = ImageStats::default();
    for plan in plans {
        let node = plan.node;
        // Plans can be stale when classification ran off-thread.
        if !doc.is_connected(node) || marks::is_marked(doc, node, Mark::ImageOptimized) {
            continue;
        }
        match &plan.verdict {
            ImageVerdict::Skip => continue,
            ImageVerdict::AlreadyHandled => stats.library_handled += 1,
            ImageVerdict::PlaceholderOnly => {}
            ImageVerdict::SwapPlaceholder { src, original } => {
                doc.set_attr(node, "src", src)?;
                fallbacks.install(
                    node,
                    ImageFallback::Revert {
                        original: original.clone(),
                        used: false,
                    },
                );
                stats.placeholders_swapped += 1;
                trace!(node = %node, src = %src, "placeholder swapped");
            }
            ImageVerdict::Optimize(rewrite) => {
                apply_rewrite(doc, node, rewrite, fallbacks, &mut stats)?;
                stats.optimized += 1;
            }
        }
        marks::mark(doc, node, Mark::ImageOptimized)?;
    }
    if stats != ImageStats::default() {
        debug!(?stats, "images rewritten");
    }
    Ok(stats)
}

fn apply_rewrite(
    doc: &mut Document,
    node: NodeId,
    rewrite: &ImageRewrite,
    fallbacks: &mut FallbackTable,
    stats: &mut ImageStats,
) -> Result<()> {
    if rewrite.set_lazy {
        doc.set_attr(node, "loading", "lazy")?;
        doc.set_attr(node, "decoding", "async")?;
    }
    if rewrite.install_fallback && !marks::is_marked(doc, node, Mark::ErrorHandlerAttached) {
        fallbacks.install(
            node,
            ImageFallback::Chain {
                deferred_src: rewrite.fallback_src.clone(),
                tried_deferred: false,
                tried_srcset: false,
            },
        );
        marks::mark(doc, node, Mark::ErrorHandlerAttached)?;
        stats.fallbacks_installed += 1;
    }
    if let Some(original) = &rewrite.record_original {
        doc.set_attr(node, ORIGINAL_SRC_ATTR, original)?;
    }
    if let (Some(srcset), Some(sizes)) = (&rewrite.srcset, &rewrite.sizes) {
        doc.set_attr(node, "srcset", srcset)?;
        doc.set_attr(node, "sizes", sizes)?;
    }
    if let Some(priority) = rewrite.priority {
        doc.set_attr(node, "fetchpriority", priority.as_str())?;
    }
    if rewrite.clear_display_none {
        doc.remove_style_property(node, "display")?;
    }
    Ok(())
}

// ── Load failure fallbacks ──────────────────────────────────────────────────

/// What to do when an optimized image fails to load. Each step runs at most once.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageFallback {
    /// Placeholder swap: go back to the placeholder.
    Revert { original: String, used: bool },
    /// Regular image: deferred source first, then the smallest srcset candidate.
    Chain {
        deferred_src: Option<String>,
        tried_deferred: bool,
        tried_srcset: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    Retried(String),
    Exhausted,
    NoHandler,
}

#[derive(Debug, Default)]
pub struct FallbackTable {
    plans: HashMap<NodeId, ImageFallback>,
}

impl FallbackTable {
    pub fn install(&mut self, node: NodeId, fallback: ImageFallback) {
        self.plans.entry(node).or_insert(fallback);
    }

    pub fn get(&self, node: NodeId) -> Option<&ImageFallback> {
        self.plans.get(&node)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Run the next fallback step for a failed load.
    pub fn handle_error(&mut self, doc: &mut Document, node: NodeId) -> Result<FallbackOutcome> {
        let Some(plan) = self.plans.get_mut(&node) else {
            return Ok(FallbackOutcome::NoHandler);
        };
        let current = doc.attr(node, "src").unwrap_or("").to_string();

        let next = match plan {
            ImageFallback::Revert { original, used } => {
                if *used || *original == current {
                    None
                } else {
                    *used = true;
                    Some(original.clone())
                }
            }
            ImageFallback::Chain {
                deferred_src,
                tried_deferred,
                tried_srcset,
            } => {
                let mut next = None;
                if !*tried_deferred {
                    *tried_deferred = true;
                    next = deferred_src.clone().filter(|d| *d != current);
                }
                if next.is_none() && !*tried_srcset {
                    *tried_srcset = true;
                    next = doc
                        .attr(node, "srcset")
                        .and_then(smallest_candidate)
                        .filter(|c| *c != current);
                }
                next
            }
        };

        match next {
            Some(src) => {
                doc.set_attr(node, "src", &src)?;
                debug!(node = %node, src = %src, "image fallback applied");
                Ok(FallbackOutcome::Retried(src))
            }
            None => Ok(FallbackOutcome::Exhausted),
        }
    }
}

/// Smallest non-SVG candidate of a `srcset`, by its width or density
/// descriptor. The first candidate wins ties.
pub fn smallest_candidate(srcset: &str) -> Option<String> {
    let mut best: Option<(f32, &str)> = None;
    for candidate in srcset.split(',') {
        let mut parts = candidate.split_ascii_whitespace();
        let Some(url) = parts.next() else { continue };
        if is_svg_reference(url) {
            continue;
        }
        let size = parts
            .next()
            .and_then(|d| d.strip_suffix(['w', 'x']))
            .and_then(|n| n.parse::<f32>().ok())
            .unwrap_or(1.0);
        if best.is_none_or(|(b, _)| size < b) {
            best = Some((size, url));
        }
    }
    best.map(|(_, url)| url.to_string())
}
