//! Per-element "already handled" flags, stored as data attributes.
//!
//! Rules mutate attributes that the mutation watcher also listens to, so a
//! rule must never visit the same element twice. Marks are write-once; there
//! is no unmark operation.

use std::fmt;

use anyhow::Result;

use crate::dom::{Document, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mark {
    ImageOptimized,
    ScriptDeferred,
    HintProcessed,
    ErrorHandlerAttached,
    Revealed,
    ViewportWrapped,
}

impl Mark {
    pub const ALL: [Mark; 6] = [
        Mark::ImageOptimized,
        Mark::ScriptDeferred,
        Mark::HintProcessed,
        Mark::ErrorHandlerAttached,
        Mark::Revealed,
        Mark::ViewportWrapped,
    ];

    pub fn attribute(self) -> &'static str {
        match self {
            Self::ImageOptimized => "data-optimized",
            Self::ScriptDeferred => "data-script-deferred",
            Self::HintProcessed => "data-hint-processed",
            Self::ErrorHandlerAttached => "data-error-handler",
            Self::Revealed => "data-revealed",
            Self::ViewportWrapped => "data-viewport-wrapped",
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.attribute())
    }
}

pub fn is_marked(doc: &Document, node: NodeId, mark: Mark) -> bool {
    doc.has_attr(node, mark.attribute())
}

/// Set a mark. Returns `Ok(false)` if it was already present.
pub fn mark(doc: &mut Document, node: NodeId, mark: Mark) -> Result<bool> {
    if is_marked(doc, node, mark) {
        return Ok(false);
    }
    doc.set_attr(node, mark.attribute(), "true")
}

/// All marks currently on a node, for diagnostics and tests.
pub fn marks_on(doc: &Document, node: NodeId) -> Vec<Mark> {
    Mark::ALL
        .into_iter()
        .filter(|&m| is_marked(doc, node, m))
        .collect()
}
