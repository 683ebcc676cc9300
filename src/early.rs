//! Optimizations applied as soon as the document commits, before the first
//! pass: a toggle-driven stylesheet and the preload downgrade.

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::dom::Document;
use crate::visibility::STYLE_MARKER_ATTR;

const STYLE_MARKER: &str = "early";

const NO_ANIMATION_CSS: &str = "* { animation: none !important; transition: none !important; }";
const LAZY_LOAD_CSS: &str = "img, iframe { loading: lazy !important; }";
const IMAGE_CSS: &str = "img { content-visibility: auto; }";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EarlyStats {
    pub style_injected: bool,
    pub preloads_downgraded: usize,
}

/// The early stylesheet for `config`, or `None` when no toggle contributes.
pub fn early_css(config: &Config) -> Option<String> {
    let rules: Vec<&str> = [
        (config.no_animation, NO_ANIMATION_CSS),
        (config.lazy_load, LAZY_LOAD_CSS),
        (config.image_optimization, IMAGE_CSS),
    ]
    .into_iter()
    .filter_map(|(on, css)| on.then_some(css))
    .collect();
    (!rules.is_empty()).then(|| rules.join("\n"))
}

/// Append the early stylesheet to `<head>` once per document.
pub fn inject_early_styles(doc: &mut Document, config: &Config) -> Result<bool> {
    let Some(css) = early_css(config) else {
        return Ok(false);
    };
    let already = doc.elements().into_iter().any(|n| {
        doc.tag(n) == Some("style") && doc.attr(n, STYLE_MARKER_ATTR) == Some(STYLE_MARKER)
    });
    if already {
        return Ok(false);
    }
    let Some(head) = doc.head() else {
        return Ok(false);
    };
    let style = doc.create_element("style");
    doc.set_attr(style, STYLE_MARKER_ATTR, STYLE_MARKER)?;
    let text = doc.create_text(&css);
    doc.append_child(style, text)?;
    doc.append_child(head, style)?;
    Ok(true)
}

/// Turn `rel=preload` links into `rel=prefetch` unless their href mentions
/// `critical`.
pub fn downgrade_preloads(doc: &mut Document, config: &Config) -> Result<usize> {
    if !config.preload {
        return Ok(0);
    }
    let targets: Vec<_> = doc
        .elements()
        .into_iter()
        .filter(|&n| {
            doc.tag(n) == Some("link")
                && doc
                    .attr(n, "rel")
                    .is_some_and(|r| r.trim().eq_ignore_ascii_case("preload"))
                && !doc.attr(n, "href").is_some_and(|h| h.contains("critical"))
        })
        .collect();
    for &link in &targets {
        doc.set_attr(link, "rel", "prefetch")?;
    }
    Ok(targets.len())
}

/// Both early steps.
pub fn apply(doc: &mut Document, config: &Config) -> Result<EarlyStats> {
    let stats = EarlyStats {
        style_injected: inject_early_styles(doc, config)?,
        preloads_downgraded: downgrade_preloads(doc, config)?,
    };
    debug!(
        style = stats.style_injected,
        preloads = stats.preloads_downgraded,
        "early optimizations applied"
    );
    Ok(stats)
}
