//! DOM mutation observation for incremental re-optimization.
//!
//! The document keeps a registry of observers and queues a record for each
//! one whose subscription covers a change. The [`MutationWatcher`] owns one
//! such subscription on `<body>` and turns relevant records into "schedule a
//! pass" decisions. This lets us:
//! 1. Skip passes entirely while nothing relevant changes
//! 2. Know how much the page changed (mutation count)
//! 3. Ignore our own mark writes, which are filtered out by attribute name

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{bail, Result};
use tracing::{debug, info};

use crate::dom::{Document, NodeId};

/// Attributes whose changes can reveal new work for a pass.
pub const WATCHED_ATTRIBUTES: &[&str] = &["class", "style"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u32);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    pub attribute: Option<String>,
    pub old_value: Option<String>,
}

impl MutationRecord {
    pub fn child_list(target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) -> Self {
        Self {
            kind: MutationKind::ChildList,
            target,
            added,
            removed,
            attribute: None,
            old_value: None,
        }
    }

    pub fn attribute(target: NodeId, name: &str, old_value: Option<String>) -> Self {
        Self {
            kind: MutationKind::Attributes,
            target,
            added: vec![],
            removed: vec![],
            attribute: Some(name.to_string()),
            old_value,
        }
    }
}

/// Subscription options, mirroring `MutationObserverInit`.
#[derive(Debug, Clone, Default)]
pub struct ObserverInit {
    pub child_list: bool,
    pub attributes: bool,
    pub subtree: bool,
    pub attribute_filter: Option<Vec<String>>,
}

impl ObserverInit {
    pub fn accepts(&self, record: &MutationRecord) -> bool {
        match record.kind {
            MutationKind::ChildList => self.child_list,
            MutationKind::Attributes => {
                if !self.attributes {
                    return false;
                }
                match (&self.attribute_filter, &record.attribute) {
                    (Some(filter), Some(name)) => filter.iter().any(|f| f == name),
                    _ => true,
                }
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct Registration {
    pub(crate) target: NodeId,
    pub(crate) init: ObserverInit,
    pub(crate) records: Vec<MutationRecord>,
}

/// Observer bookkeeping stored inside a [`Document`].
#[derive(Debug)]
pub(crate) struct ObserverRegistry {
    supported: bool,
    next_id: u32,
    pub(crate) observers: BTreeMap<ObserverId, Registration>,
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self {
            supported: true,
            next_id: 1,
            observers: BTreeMap::new(),
        }
    }
}

impl ObserverRegistry {
    pub(crate) fn set_supported(&mut self, supported: bool) {
        self.supported = supported;
    }

    pub(crate) fn register(&mut self, target: NodeId, init: ObserverInit) -> Result<ObserverId> {
        if !self.supported {
            bail!("mutation observers are not available in this environment");
        }
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.insert(
            id,
            Registration {
                target,
                init,
                records: Vec::new(),
            },
        );
        Ok(id)
    }

    pub(crate) fn disconnect(&mut self, id: ObserverId) -> bool {
        self.observers.remove(&id).is_some()
    }

    pub(crate) fn take_records(&mut self, id: ObserverId) -> Vec<MutationRecord> {
        self.observers
            .get_mut(&id)
            .map(|r| std::mem::take(&mut r.records))
            .unwrap_or_default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }
}

/// Activity since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchState {
    pub dirty: bool,
    /// Number of records seen since last reset. Available for diagnostics.
    pub mutation_count: u64,
}

/// Watches `<body>` for growth and class/style changes.
#[derive(Debug, Default)]
pub struct MutationWatcher {
    observer: Option<ObserverId>,
    state: WatchState,
}

impl MutationWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the observer. Safe to call repeatedly; a previous
    /// subscription is disconnected first.
    pub fn start(&mut self, doc: &mut Document) -> Result<()> {
        self.stop(doc);
        let target = doc
            .body()
            .or_else(|| doc.document_element())
            .unwrap_or_else(|| doc.root());
        let init = ObserverInit {
            child_list: true,
            attributes: true,
            subtree: true,
            attribute_filter: Some(WATCHED_ATTRIBUTES.iter().map(|s| s.to_string()).collect()),
        };
        let id = doc.observe(target, init)?;
        info!(%id, target = %target, "mutation watcher installed");
        self.observer = Some(id);
        self.state = WatchState::default();
        Ok(())
    }

    pub fn stop(&mut self, doc: &mut Document) {
        if let Some(id) = self.observer.take() {
            doc.disconnect(id);
            debug!(%id, "mutation watcher disconnected");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.observer.is_some()
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Take queued records and report whether any of them warrant a pass.
    pub fn drain(&mut self, doc: &mut Document) -> bool {
        let Some(id) = self.observer else {
            return false;
        };
        let records = doc.take_records(id);
        if records.is_empty() {
            return false;
        }
        self.state.mutation_count += records.len() as u64;
        let relevant = is_relevant(doc, &records);
        if relevant {
            self.state.dirty = true;
        }
        debug!(records = records.len(), relevant, "drained mutation records");
        relevant
    }

    /// Clear the dirty state, returning the mutation count before reset.
    pub fn reset(&mut self) -> u64 {
        let count = self.state.mutation_count;
        self.state = WatchState::default();
        count
    }
}

/// A batch matters when it adds elements or touches `class` / `style`.
pub fn is_relevant(doc: &Document, records: &[MutationRecord]) -> bool {
    records.iter().any(|r| match r.kind {
        MutationKind::ChildList => r.added.iter().any(|&n| doc.is_element(n)),
        MutationKind::Attributes => r
            .attribute
            .as_deref()
            .is_some_and(|a| WATCHED_ATTRIBUTES.contains(&a)),
    })
}
