//! In-memory document tree.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Detaching a node
//! keeps its id valid, so ids held elsewhere (pending mutation records, for
//! instance) can be checked with [`Document::is_attached`]. [`Document::remove`]
//! frees a subtree's slots for reuse. Ids that do not belong to the document
//! read as detached, empty nodes.

pub mod html;
pub mod selector;

pub use selector::Selector;

use anyhow::{Result, anyhow, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    /// Slots released by `remove`, reused by the next created node.
    free: Vec<NodeId>,
    root: NodeId,
    doctype: Option<String>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub const ROOT_TAG: &'static str = "#document";

    pub fn new() -> Self {
        let root = Node {
            kind: NodeKind::Element {
                tag: Self::ROOT_TAG.to_string(),
                attrs: Vec::new(),
            },
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![root],
            free: Vec::new(),
            root: NodeId(0),
            doctype: None,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn doctype(&self) -> Option<&str> {
        self.doctype.as_deref()
    }

    pub fn set_doctype(&mut self, doctype: Option<String>) {
        self.doctype = doctype;
    }

    /// The `<body>` element, or the root when there is none.
    pub fn body(&self) -> NodeId {
        self.descendants(self.root)
            .into_iter()
            .find(|&id| self.tag(id) == Some("body"))
            .unwrap_or(self.root)
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            kind,
            parent: None,
            children: Vec::new(),
        };
        if let Some(id) = self.free.pop() {
            self.nodes[id.0] = node;
            return id;
        }
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Arena slots in use or waiting for reuse.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Creates a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        })
    }

    /// Creates a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// `None` for an id that does not belong to this document.
    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|node| &node.kind)
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Element { .. }))
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Element { tag, .. } => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |node| &node.children)
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        match self.kind(id) {
            Some(NodeKind::Element { attrs, .. }) => attrs,
            _ => &[],
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attrs(id)
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        let Some(NodeKind::Element { attrs, .. }) = self.nodes.get_mut(id.0).map(|n| &mut n.kind)
        else {
            bail!("Cannot set attribute {} on a text or unknown node", name);
        };
        match attrs.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => attrs.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Removes an attribute, returning whether it was present.
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> bool {
        let Some(NodeKind::Element { attrs, .. }) = self.nodes.get_mut(id.0).map(|n| &mut n.kind)
        else {
            return false;
        };
        let before = attrs.len();
        attrs.retain(|(key, _)| key != name);
        attrs.len() != before
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attr(id, "class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
    }

    fn check_insertable(&self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.node(child).is_none() {
            bail!("Unknown node");
        }
        if !self.is_element(parent) {
            bail!("Cannot insert into a text node");
        }
        if child == self.root {
            bail!("Cannot move the document root");
        }
        if self.contains(child, parent) {
            bail!("Cannot insert a node into its own subtree");
        }
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_insertable(parent, child)?;
        self.detach(child);
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
        Ok(())
    }

    /// Inserts `node` as the next sibling of `reference`.
    pub fn insert_after(&mut self, reference: NodeId, node: NodeId) -> Result<()> {
        let parent = self
            .parent(reference)
            .ok_or_else(|| anyhow!("Reference node has no parent"))?;
        self.check_insertable(parent, node)?;
        self.detach(node);
        let position = self
            .children(parent)
            .iter()
            .position(|&c| c == reference)
            .ok_or_else(|| anyhow!("Reference node is not a child of its parent"))?;
        self.nodes[parent.0].children.insert(position + 1, node);
        self.nodes[node.0].parent = Some(parent);
        Ok(())
    }

    /// Detaches `id` from its parent; the subtree itself is kept intact.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes.get_mut(id.0).and_then(|n| n.parent.take()) {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
    }

    /// Detaches `id` and releases its whole subtree. The released ids may be
    /// handed out again by later `create_*` calls. The root cannot be removed.
    pub fn remove(&mut self, id: NodeId) {
        if id == self.root || self.node(id).is_none() {
            return;
        }
        self.detach(id);
        for released in self.descendants(id) {
            self.nodes[released.0] = Node {
                kind: NodeKind::Text(String::new()),
                parent: None,
                children: Vec::new(),
            };
            self.free.push(released);
        }
    }

    /// True when `node` is `ancestor` or lies below it.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.contains(self.root, id)
    }

    /// Proper ancestors, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.parent(parent);
        }
        ancestors
    }

    /// `id` and everything below it, in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.node(id).is_none() {
            return out;
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev());
        }
        out
    }

    pub fn text_content(&self, id: NodeId) -> String {
        self.text_content_filtered(id, |_| false)
    }

    /// Concatenated text below `id`, leaving out subtrees for which `skip` holds.
    pub fn text_content_filtered(&self, id: NodeId, skip: impl Fn(NodeId) -> bool) -> String {
        let mut text = String::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if skip(current) {
                continue;
            }
            match self.kind(current) {
                Some(NodeKind::Text(t)) => text.push_str(t),
                Some(NodeKind::Element { .. }) => {
                    stack.extend(self.children(current).iter().rev())
                }
                None => {}
            }
        }
        text
    }

    /// Element with text child, appended to `parent`. Convenience for building pages.
    pub fn append_element_with_text(
        &mut self,
        parent: NodeId,
        tag: &str,
        class: Option<&str>,
        text: &str,
    ) -> Result<NodeId> {
        let element = self.create_element(tag);
        if let Some(class) = class {
            self.set_attr(element, "class", class)?;
        }
        if !text.is_empty() {
            let text_node = self.create_text(text);
            self.append_child(element, text_node)?;
        }
        self.append_child(parent, element)?;
        Ok(element)
    }
}
