//! Arena-backed document model the optimization rules run against.
//!
//! HTML is parsed with `scraper` and copied into a flat arena so nodes can be
//! mutated in place and addressed by a stable [`NodeId`]. Host-provided
//! facts that a browser would compute (layout boxes, cascaded styles) live in
//! side tables keyed by node id. Every effective change bumps the document
//! revision and is queued as a [`MutationRecord`] for matching observers.

use std::collections::HashMap;
use std::fmt;

use anyhow::{anyhow, bail, Result};
use scraper::{ElementRef, Html, Node as HtmlNode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::geometry::Rect;
use crate::mutation::{MutationRecord, ObserverId, ObserverInit, ObserverRegistry};
use crate::selector::SelectorList;
use crate::style::{ComputedStyle, InlineStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    attrs: Vec<(String, String)>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_ascii_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Document,
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    url: Option<Url>,
    has_doctype: bool,
    layout: HashMap<NodeId, Rect>,
    computed: HashMap<NodeId, InlineStyle>,
    observers: ObserverRegistry,
    revision: u64,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.nodes.len())
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("revision", &self.revision)
            .finish()
    }
}

impl Document {
    fn empty(url: Option<Url>, has_doctype: bool) -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Document,
            }],
            root: NodeId(0),
            url,
            has_doctype,
            layout: HashMap::new(),
            computed: HashMap::new(),
            observers: ObserverRegistry::default(),
            revision: 0,
        }
    }

    /// Parse a full HTML document. `url` is the page address used to resolve
    /// relative references and to decide what counts as same-origin.
    pub fn parse(html: &str, url: Option<&str>) -> Self {
        let url = url.filter(|u| !u.is_empty()).and_then(|u| match Url::parse(u) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(url = %u, error = %e, "ignoring unparseable document url");
                None
            }
        });

        let parsed = Html::parse_document(html);
        let has_doctype = parsed
            .tree
            .root()
            .children()
            .any(|n| matches!(n.value(), HtmlNode::Doctype(_)));

        let mut doc = Self::empty(url, has_doctype);
        let html_el = doc.import(parsed.root_element());
        doc.link(doc.root, html_el);
        debug!(html_len = html.len(), nodes = doc.nodes.len(), "document parsed");
        doc
    }

    fn import(&mut self, source: ElementRef) -> NodeId {
        let value = source.value();
        let mut element = Element::new(value.name());
        element.attrs = value
            .attrs()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect();
        // The parser's attribute order is not stable across runs.
        element.attrs.sort();
        let id = self.alloc(NodeData::Element(element));

        for child in source.children() {
            let child_id = if let Some(child_el) = ElementRef::wrap(child) {
                self.import(child_el)
            } else {
                match child.value() {
                    HtmlNode::Text(text) => self.alloc(NodeData::Text(String::from(&**text))),
                    HtmlNode::Comment(comment) => {
                        self.alloc(NodeData::Comment(String::from(&**comment)))
                    }
                    _ => continue,
                }
            };
            self.link(id, child_id);
        }
        id
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            data,
        });
        id
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    // ── Tree access ─────────────────────────────────────────────────────────

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// The page origin, e.g. `https://example.com`. `None` without a url or
    /// for opaque origins.
    pub fn origin(&self) -> Option<String> {
        let origin = self.url.as_ref()?.origin();
        origin.is_tuple().then(|| origin.ascii_serialization())
    }

    /// Resolve a reference the way `img.src` / `a.href` reflection does.
    pub fn resolve_url(&self, reference: &str) -> Option<Url> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        match &self.url {
            Some(base) => base.join(reference).ok(),
            None => Url::parse(reference).ok(),
        }
    }

    pub fn has_doctype(&self) -> bool {
        self.has_doctype
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.node(id).map(|n| &n.data)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.node(id)?.data {
            NodeData::Element(ref el) => Some(el),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut Element> {
        match self.nodes.get_mut(id.0).map(|n| &mut n.data) {
            Some(NodeData::Element(el)) => Ok(el),
            Some(_) => Err(anyhow!("node {id} is not an element")),
            None => Err(anyhow!("node {id} does not exist")),
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.tag.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Ancestors from the parent up to (and including) the document node.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&n| self.parent(n))
    }

    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        ancestor == node || self.ancestors(node).any(|a| a == ancestor)
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        self.is_inclusive_ancestor(self.root, id)
    }

    /// Pre-order element descendants of `id`, excluding `id` itself.
    pub fn descendant_elements(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            if self.is_element(n) {
                out.push(n);
            }
            stack.extend(self.children(n).iter().rev().copied());
        }
        out
    }

    /// Every connected element in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        self.descendant_elements(self.root)
    }

    fn first_child_tagged(&self, parent: NodeId, tag: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&c| self.tag(c) == Some(tag))
    }

    pub fn document_element(&self) -> Option<NodeId> {
        self.first_child_tagged(self.root, "html")
    }

    pub fn head(&self) -> Option<NodeId> {
        self.first_child_tagged(self.document_element()?, "head")
    }

    pub fn body(&self) -> Option<NodeId> {
        self.first_child_tagged(self.document_element()?, "body")
    }

    pub fn find_by_id(&self, id_attr: &str) -> Option<NodeId> {
        self.elements()
            .into_iter()
            .find(|&n| self.attr(n, "id") == Some(id_attr))
    }

    /// Elements matching `selectors`, in document order.
    pub fn select(&self, selectors: &SelectorList) -> Vec<NodeId> {
        self.elements()
            .into_iter()
            .filter(|&n| selectors.matches(self, n))
            .collect()
    }

    /// Concatenated text of the node's direct text children.
    pub fn own_text(&self, id: NodeId) -> String {
        self.children(id)
            .iter()
            .filter_map(|&c| match self.data(c) {
                Some(NodeData::Text(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    // ── Attributes ──────────────────────────────────────────────────────────

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attr(name)
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.element(id).is_some_and(|e| e.has_class(class))
    }

    /// Set an attribute. Returns `Ok(false)` when the value was already set.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<bool> {
        let name = name.to_ascii_lowercase();
        let el = self.element_mut(id)?;
        let old = match el.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) if v.as_str() == value => return Ok(false),
            Some((_, v)) => Some(std::mem::replace(v, value.to_string())),
            None => {
                el.attrs.push((name.clone(), value.to_string()));
                None
            }
        };
        self.record(MutationRecord::attribute(id, &name, old));
        Ok(true)
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<bool> {
        let el = self.element_mut(id)?;
        let Some(pos) = el.attrs.iter().position(|(k, _)| k == name) else {
            return Ok(false);
        };
        let (_, old) = el.attrs.remove(pos);
        self.record(MutationRecord::attribute(id, name, Some(old)));
        Ok(true)
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) -> Result<bool> {
        let el = self.element(id).ok_or_else(|| anyhow!("node {id} is not an element"))?;
        if el.has_class(class) {
            return Ok(false);
        }
        let updated = match el.attr("class").map(str::trim) {
            Some(existing) if !existing.is_empty() => format!("{existing} {class}"),
            _ => class.to_string(),
        };
        self.set_attr(id, "class", &updated)
    }

    // ── Inline and computed style ───────────────────────────────────────────

    pub fn inline_style(&self, id: NodeId) -> InlineStyle {
        InlineStyle::parse(self.attr(id, "style").unwrap_or(""))
    }

    pub fn set_style_property(
        &mut self,
        id: NodeId,
        name: &str,
        value: &str,
        important: bool,
    ) -> Result<bool> {
        let mut style = self.inline_style(id);
        if !style.set(name, value, important) {
            return Ok(false);
        }
        self.set_attr(id, "style", &style.to_string())
    }

    /// Remove an inline property; drops the `style` attribute once empty.
    pub fn remove_style_property(&mut self, id: NodeId, name: &str) -> Result<bool> {
        let mut style = self.inline_style(id);
        if !style.remove(name) {
            return Ok(false);
        }
        if style.is_empty() {
            self.remove_attr(id, "style")
        } else {
            self.set_attr(id, "style", &style.to_string())
        }
    }

    /// Record the host's cascaded values for an element, as declaration text.
    pub fn set_computed_style(&mut self, id: NodeId, declarations: &str) {
        self.computed.insert(id, InlineStyle::parse(declarations));
    }

    pub fn computed_style(&self, id: NodeId) -> ComputedStyle {
        ComputedStyle::resolve(self.computed.get(&id), &self.inline_style(id))
    }

    // ── Layout ──────────────────────────────────────────────────────────────

    pub fn set_layout(&mut self, id: NodeId, rect: Rect) {
        self.layout.insert(id, rect);
    }

    pub fn layout(&self, id: NodeId) -> Option<Rect> {
        self.layout.get(&id).copied()
    }

    // ── Tree mutation ───────────────────────────────────────────────────────

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeData::Element(Element::new(tag)))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let len = self.children(parent).len();
        self.insert_at(parent, child, len)
    }

    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) -> Result<()> {
        let pos = self
            .children(parent)
            .iter()
            .position(|&c| c == reference)
            .ok_or_else(|| anyhow!("node {reference} is not a child of {parent}"))?;
        self.insert_at(parent, child, pos)
    }

    fn insert_at(&mut self, parent: NodeId, child: NodeId, mut pos: usize) -> Result<()> {
        if self.node(parent).is_none() || self.node(child).is_none() {
            bail!("cannot insert {child} into {parent}: unknown node");
        }
        if matches!(self.data(parent), Some(NodeData::Text(_) | NodeData::Comment(_))) {
            bail!("node {parent} cannot have children");
        }
        if self.is_inclusive_ancestor(child, parent) {
            bail!("inserting {child} into {parent} would create a cycle");
        }
        if let Some(old_parent) = self.parent(child) {
            if old_parent == parent {
                let current = self.children(parent).iter().position(|&c| c == child);
                if let Some(current) = current {
                    if current < pos {
                        pos -= 1;
                    }
                }
            }
            self.detach(child)?;
        }
        let children = &mut self.nodes[parent.0].children;
        let pos = pos.min(children.len());
        children.insert(pos, child);
        self.nodes[child.0].parent = Some(parent);
        self.record(MutationRecord::child_list(parent, vec![child], vec![]));
        Ok(())
    }

    pub fn detach(&mut self, child: NodeId) -> Result<()> {
        let parent = self
            .parent(child)
            .ok_or_else(|| anyhow!("node {child} has no parent"))?;
        self.nodes[parent.0].children.retain(|&c| c != child);
        self.nodes[child.0].parent = None;
        self.record(MutationRecord::child_list(parent, vec![], vec![child]));
        Ok(())
    }

    // ── Observation ─────────────────────────────────────────────────────────

    /// Toggle whether the host environment offers mutation observers.
    pub fn set_observers_supported(&mut self, supported: bool) {
        self.observers.set_supported(supported);
    }

    pub fn observe(&mut self, target: NodeId, init: ObserverInit) -> Result<ObserverId> {
        if self.node(target).is_none() {
            bail!("cannot observe unknown node {target}");
        }
        self.observers.register(target, init)
    }

    pub fn disconnect(&mut self, id: ObserverId) -> bool {
        self.observers.disconnect(id)
    }

    pub fn take_records(&mut self, id: ObserverId) -> Vec<MutationRecord> {
        self.observers.take_records(id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Monotonic count of effective changes made to the document.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn record(&mut self, record: MutationRecord) {
        self.revision += 1;
        if self.observers.is_empty() {
            return;
        }
        let matching: Vec<ObserverId> = self
            .observers
            .observers
            .iter()
            .filter(|(_, reg)| {
                reg.init.accepts(&record)
                    && (reg.target == record.target
                        || (reg.init.subtree && self.is_inclusive_ancestor(reg.target, record.target)))
            })
            .map(|(&id, _)| id)
            .collect();
        for id in matching {
            if let Some(reg) = self.observers.observers.get_mut(&id) {
                reg.records.push(record.clone());
            }
        }
    }
}
