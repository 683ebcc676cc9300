//! Menu/navigation guard shared by the reveal rules.
//!
//! Interactive UI (menus, dialogs, dropdowns) is often hidden on purpose.
//! An element is protected when it, any ancestor, or any descendant looks
//! like such UI. The check is broad and errs toward leaving content hidden.

use crate::config::Heuristics;
use crate::dom::{Document, NodeId};

/// Own text longer than this is treated as content, not a UI label.
const MAX_LABEL_CHARS: usize = 40;

/// The parts of an element the guard looks at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementFacts<'a> {
    pub tag: &'a str,
    pub role: Option<&'a str>,
    pub class: Option<&'a str>,
    pub id: Option<&'a str>,
    pub attr_names: Vec<&'a str>,
    pub own_text: String,
}

impl<'a> ElementFacts<'a> {
    pub fn of(doc: &'a Document, node: NodeId) -> Option<Self> {
        let el = doc.element(node)?;
        Some(Self {
            tag: el.tag.as_str(),
            role: el.attr("role"),
            class: el.attr("class"),
            id: el.attr("id"),
            attr_names: el.attrs().map(|(name, _)| name).collect(),
            own_text: doc.own_text(node),
        })
    }
}

/// Table-driven matcher over [`ElementFacts`].
#[derive(Debug, Clone, Copy)]
pub struct UiGuard<'a> {
    tables: &'a Heuristics,
}

impl<'a> UiGuard<'a> {
    pub fn new(tables: &'a Heuristics) -> Self {
        Self { tables }
    }

    pub fn looks_interactive(&self, facts: &ElementFacts) -> bool {
        let t = self.tables;

        if t.protected_tags.iter().any(|tag| tag == facts.tag) {
            return true;
        }
        if let Some(role) = facts.role {
            let role = role.to_ascii_lowercase();
            if role
                .split_ascii_whitespace()
                .any(|r| t.protected_roles.iter().any(|p| p == r))
            {
                return true;
            }
        }

        let names = [facts.class, facts.id];
        for value in names.into_iter().flatten() {
            let value = value.to_ascii_lowercase();
            if t.protected_keywords.iter().any(|k| value.contains(k.as_str())) {
                return true;
            }
        }

        let text = facts.own_text.trim();
        if !text.is_empty() && text.chars().count() <= MAX_LABEL_CHARS {
            let text = text.to_lowercase();
            let mut words = text.split(|c: char| !c.is_alphanumeric());
            if words.any(|w| t.protected_keywords.iter().any(|k| k == w)) {
                return true;
            }
        }

        facts.attr_names.iter().any(|name| {
            t.protected_attr_substrings
                .iter()
                .any(|s| name.contains(s.as_str()))
                || t.protected_attr_prefixes
                    .iter()
                    .any(|p| name.starts_with(p.as_str()))
        })
    }

    fn node_matches(&self, doc: &Document, node: NodeId) -> bool {
        ElementFacts::of(doc, node).is_some_and(|f| self.looks_interactive(&f))
    }

    /// True when `node`, an ancestor, or a descendant looks interactive.
    pub fn is_protected(&self, doc: &Document, node: NodeId) -> bool {
        self.node_matches(doc, node)
            || doc.ancestors(node).any(|a| self.node_matches(doc, a))
            || doc
                .descendant_elements(node)
                .into_iter()
                .any(|d| self.node_matches(doc, d))
    }
}
