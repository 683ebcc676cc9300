//! Defer external scripts that would otherwise block parsing.

use anyhow::Result;
use tracing::debug;

use crate::dom::{Document, NodeId};
use crate::marks::{self, Mark};

/// External scripts with neither `async` nor `defer`, not yet visited.
pub fn plan(doc: &Document) -> Vec<NodeId> {
    doc.elements()
        .into_iter()
        .filter(|&n| {
            doc.tag(n) == Some("script")
                && doc.has_attr(n, "src")
                && !doc.has_attr(n, "async")
                && !doc.has_attr(n, "defer")
                && !marks::is_marked(doc, n, Mark::ScriptDeferred)
        })
        .collect()
}

pub fn apply(doc: &mut Document, scripts: &[NodeId]) -> Result<usize> {
    let mut deferred = 0;
    for &node in scripts {
        if !doc.is_connected(node) || marks::is_marked(doc, node, Mark::ScriptDeferred) {
            continue;
        }
        doc.set_attr(node, "defer", "")?;
        marks::mark(doc, node, Mark::ScriptDeferred)?;
        deferred += 1;
    }
    if deferred > 0 {
        debug!(deferred, "scripts deferred");
    }
    Ok(deferred)
}
