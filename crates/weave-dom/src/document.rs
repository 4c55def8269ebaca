#![forbid(unsafe_code)]

//! The node arena and its edit operations.
//!
//! Nodes live in slots addressed by [`NodeId`]. Removing a node frees its
//! whole subtree and bumps each slot's generation, so handles kept elsewhere
//! (watcher callbacks, fragment blocks) fail validation instead of touching a
//! reused slot.
//!
//! Every edit that changes what the backend can see is appended to a pending
//! mutation list, drained with [`Document::take_mutations`].
//!
//! # Invariants
//!
//! 1. A node has at most one parent, and appears exactly once in that
//!    parent's child list.
//! 2. The node graph is a forest; inserting an ancestor below its own
//!    descendant is rejected.
//! 3. Indices in mutations count element siblings only.
//!
//! # Failure Modes
//!
//! - **Stale handle**: [`DomError::StaleNode`].
//! - **Anchor not under the expected parent**: [`DomError::NotAChild`] or
//!   [`DomError::Detached`].
//! - **Child operation on a leaf**: silently ignored.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use tracing::trace;

use crate::error::DomError;
use crate::id::NodeId;
use crate::mutation::{Mutation, NodeSnapshot};
use crate::node::{ChildHost, Element, EventHandler, NodeKind, Role};

/// Convenience alias for document results.
pub type Result<T> = std::result::Result<T, DomError>;

struct NodeData {
    node_ref: u64,
    parent: Option<NodeId>,
    kind: NodeKind,
    body: bool,
}

struct Slot {
    generation: u32,
    node: Option<NodeData>,
}

#[derive(Clone, Copy)]
enum Position {
    End,
    Before(NodeId),
    After(NodeId),
}

/// A virtual document.
pub struct Document {
    instance_id: String,
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    next_ref: u64,
    root: NodeId,
    pending: Vec<Mutation>,
    live: usize,
}

impl Document {
    /// Create a document with an empty root element.
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        let mut doc = Self {
            instance_id: instance_id.into(),
            slots: Vec::new(),
            free_list: Vec::new(),
            next_ref: 0,
            root: NodeId {
                idx: 0,
                generation: 0,
            },
            pending: Vec::new(),
            live: 0,
        };
        doc.root = doc.alloc(NodeKind::element("document", Role::Native), false);
        doc
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The document element. Always attached.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The body element, once attached under the root.
    #[must_use]
    pub fn body(&self) -> Option<NodeId> {
        self.children(self.root)
            .into_iter()
            .find(|id| self.data(*id).is_ok_and(|d| d.body))
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    fn alloc(&mut self, kind: NodeKind, body: bool) -> NodeId {
        let data = NodeData {
            node_ref: self.next_ref,
            parent: None,
            kind,
            body,
        };
        self.next_ref += 1;
        self.live += 1;
        if let Some(idx) = self.free_list.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.node = Some(data);
            return NodeId {
                idx,
                generation: slot.generation,
            };
        }
        let idx = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            node: Some(data),
        });
        NodeId { idx, generation: 0 }
    }

    #[must_use]
    pub fn create_element(&mut self, tag: &str, role: Role) -> NodeId {
        self.alloc(NodeKind::element(tag, role), false)
    }

    #[must_use]
    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Comment { text: text.into() }, false)
    }

    /// Create the body element. Attaching it under the root is reported as
    /// `createBody` rather than `addElement`.
    #[must_use]
    pub fn create_body(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeKind::element(tag, Role::Native), true)
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(slot) = self.slots.get_mut(current.idx as usize) else {
                continue;
            };
            if slot.generation != current.generation {
                continue;
            }
            if let Some(data) = slot.node.take() {
                stack.extend_from_slice(data.kind.children());
                slot.generation = slot.generation.wrapping_add(1);
                self.free_list.push(current.idx);
                self.live -= 1;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    fn data(&self, id: NodeId) -> Result<&NodeData> {
        self.slots
            .get(id.idx as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(DomError::StaleNode(id))
    }

    fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        self.slots
            .get_mut(id.idx as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(DomError::StaleNode(id))
    }

    #[must_use]
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.data(id).is_ok()
    }

    /// Number of live nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.live
    }

    #[must_use]
    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.data(id).ok().map(|d| &d.kind)
    }

    #[must_use]
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.kind(id).and_then(NodeKind::as_element)
    }

    #[must_use]
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| &*el.tag)
    }

    #[must_use]
    pub fn role(&self, id: NodeId) -> Option<Role> {
        self.kind(id).and_then(NodeKind::role)
    }

    #[must_use]
    pub fn is_comment(&self, id: NodeId) -> bool {
        self.kind(id).is_some_and(NodeKind::is_comment)
    }

    /// Backend reference number of a node.
    #[must_use]
    pub fn node_ref(&self, id: NodeId) -> Option<u64> {
        self.data(id).ok().map(|d| d.node_ref)
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).ok().and_then(|d| d.parent)
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.data(id)
            .map(|d| d.kind.children().to_vec())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.data(parent).ok()?.kind.children();
        let pos = siblings.iter().position(|c| *c == id)?;
        siblings.get(pos + 1).copied()
    }

    #[must_use]
    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.data(parent).ok()?.kind.children();
        let pos = siblings.iter().position(|c| *c == id)?;
        pos.checked_sub(1).map(|p| siblings[p])
    }

    /// Number of ancestors. The root has depth 0.
    #[must_use]
    pub fn depth(&self, id: NodeId) -> u32 {
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(p) = current {
            depth += 1;
            current = self.parent(p);
        }
        depth
    }

    /// Whether `id` is connected to the root.
    #[must_use]
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.root {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// Index of `child` among the element children of its parent.
    fn element_index(&self, parent: NodeId, child: NodeId) -> usize {
        self.children(parent)
            .into_iter()
            .take_while(|c| *c != child)
            .filter(|c| !self.is_comment(*c))
            .count()
    }

    /// Pre-order list of `id` and all its descendants.
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.is_alive(current) {
                continue;
            }
            out.push(current);
            let children = self.children(current);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    // -----------------------------------------------------------------------
    // Tree edits
    // -----------------------------------------------------------------------

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.place(child, parent, Position::End)
    }

    /// Insert `child` right before `before`, under `before`'s parent.
    pub fn insert_before(&mut self, child: NodeId, before: NodeId) -> Result<()> {
        let parent = self.parent(before).ok_or(DomError::Detached(before))?;
        if child == before {
            return Ok(());
        }
        self.place(child, parent, Position::Before(before))
    }

    /// Insert `child` right after `after`, under `after`'s parent.
    pub fn insert_after(&mut self, child: NodeId, after: NodeId) -> Result<()> {
        let parent = self.parent(after).ok_or(DomError::Detached(after))?;
        if child == after {
            return Ok(());
        }
        self.place(child, parent, Position::After(after))
    }

    /// Unlink `child` from its parent and free its subtree.
    pub fn remove(&mut self, child: NodeId) -> Result<()> {
        if child == self.root {
            return Err(DomError::RootImmutable);
        }
        self.detach(child)?;
        self.free_subtree(child);
        Ok(())
    }

    /// Remove `child` from `parent` and free its subtree.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.parent(child) != Some(parent) {
            self.data(parent)?;
            self.data(child)?;
            return Err(DomError::NotAChild { parent, child });
        }
        self.remove(child)
    }

    /// Unlink `child` from its parent, keeping it alive.
    pub fn detach(&mut self, child: NodeId) -> Result<()> {
        if child == self.root {
            return Err(DomError::RootImmutable);
        }
        let parent = self.data(child)?.parent;
        let Some(parent) = parent else {
            return Ok(());
        };
        let visible = self.is_attached(child) && !self.is_comment(child);
        let node_ref = self.data(child)?.node_ref;
        self.data_mut(parent)?.kind.remove_child(child);
        self.data_mut(child)?.parent = None;
        if visible {
            self.pending.push(Mutation::RemoveElement { node: node_ref });
        }
        Ok(())
    }

    fn place(&mut self, child: NodeId, parent: NodeId, position: Position) -> Result<()> {
        self.data(child)?;
        if !self.data(parent)?.kind.hosts_children() {
            trace!(?parent, "child operation on a leaf ignored");
            return Ok(());
        }
        if child == self.root {
            return Err(DomError::RootImmutable);
        }
        if self.is_ancestor_or_self(child, parent) {
            return Err(DomError::Cycle { parent, child });
        }
        if let Position::Before(anchor) | Position::After(anchor) = position
            && self.parent(anchor) != Some(parent)
        {
            return Err(DomError::NotAChild {
                parent,
                child: anchor,
            });
        }

        let old_parent = self.parent(child);
        let was_attached = self.is_attached(child);
        let old_index = old_parent.map(|p| self.element_index(p, child));
        if let Some(p) = old_parent {
            self.data_mut(p)?.kind.remove_child(child);
        }

        let siblings = self.data(parent)?.kind.children();
        let index = match position {
            Position::End => siblings.len(),
            Position::Before(anchor) => siblings.iter().position(|c| *c == anchor).unwrap_or(siblings.len()),
            Position::After(anchor) => siblings
                .iter()
                .position(|c| *c == anchor)
                .map_or(siblings.len(), |p| p + 1),
        };
        self.data_mut(parent)?.kind.insert_child(index, child);
        self.data_mut(child)?.parent = Some(parent);

        if self.is_comment(child) {
            return Ok(());
        }
        let now_attached = self.is_attached(parent);
        let node_ref = self.data(child)?.node_ref;
        let parent_ref = self.data(parent)?.node_ref;
        let new_index = self.element_index(parent, child);
        match (was_attached, now_attached) {
            (true, true) => {
                if old_parent != Some(parent) || old_index != Some(new_index) {
                    self.pending.push(Mutation::MoveElement {
                        node: node_ref,
                        parent: parent_ref,
                        index: new_index,
                    });
                }
            }
            (false, true) => {
                let element = self.snapshot(child).ok_or(DomError::StaleNode(child))?;
                let is_body = self.data(child)?.body;
                if is_body && parent == self.root {
                    self.pending.push(Mutation::CreateBody { element });
                } else {
                    self.pending.push(Mutation::AddElement {
                        parent: parent_ref,
                        element,
                        index: new_index,
                    });
                }
            }
            (true, false) => self.pending.push(Mutation::RemoveElement { node: node_ref }),
            (false, false) => {}
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Element properties
    // -----------------------------------------------------------------------

    fn element_mut(&mut self, id: NodeId) -> Result<Option<(&mut Element, u64)>> {
        let data = self.data_mut(id)?;
        let node_ref = data.node_ref;
        Ok(data.kind.as_element_mut().map(|el| (el, node_ref)))
    }

    pub fn set_attr(&mut self, id: NodeId, key: &str, value: serde_json::Value) -> Result<()> {
        let attached = self.is_attached(id);
        let Some((el, node_ref)) = self.element_mut(id)? else {
            return Ok(());
        };
        if el.attr.get(key) == Some(&value) {
            return Ok(());
        }
        el.attr.insert(key.to_string(), value.clone());
        if attached {
            self.pending.push(Mutation::UpdateAttrs {
                node: node_ref,
                attr: BTreeMap::from([(key.to_string(), value)]),
            });
        }
        Ok(())
    }

    pub fn set_style(&mut self, id: NodeId, key: &str, value: serde_json::Value) -> Result<()> {
        let attached = self.is_attached(id);
        let Some((el, node_ref)) = self.element_mut(id)? else {
            return Ok(());
        };
        if el.style.get(key) == Some(&value) {
            return Ok(());
        }
        el.style.insert(key.to_string(), value.clone());
        if attached {
            self.pending.push(Mutation::UpdateStyle {
                node: node_ref,
                style: BTreeMap::from([(key.to_string(), value)]),
            });
        }
        Ok(())
    }

    /// Replace the class-derived style. Keys that disappear are reset to an
    /// empty string unless an inline style still provides them.
    pub fn set_class_style(
        &mut self,
        id: NodeId,
        class_style: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        let attached = self.is_attached(id);
        let Some((el, node_ref)) = self.element_mut(id)? else {
            return Ok(());
        };
        let mut changed = BTreeMap::new();
        for key in el.class_style.keys() {
            if !class_style.contains_key(key) && !el.style.contains_key(key) {
                changed.insert(key.clone(), serde_json::Value::String(String::new()));
            }
        }
        for (key, value) in &class_style {
            if el.style.contains_key(key) || el.class_style.get(key) == Some(value) {
                continue;
            }
            changed.insert(key.clone(), value.clone());
        }
        el.class_style = class_style;
        if attached && !changed.is_empty() {
            self.pending.push(Mutation::UpdateStyle {
                node: node_ref,
                style: changed,
            });
        }
        Ok(())
    }

    /// Bind (or rebind) an event handler. Only a new event type is reported.
    pub fn add_event(&mut self, id: NodeId, event: &str, handler: EventHandler) -> Result<()> {
        let attached = self.is_attached(id);
        let Some((el, node_ref)) = self.element_mut(id)? else {
            return Ok(());
        };
        let fresh = el.events.insert(event.to_string(), handler).is_none();
        if attached && fresh {
            self.pending.push(Mutation::AddEvent {
                node: node_ref,
                event: event.to_string(),
            });
        }
        Ok(())
    }

    pub fn remove_event(&mut self, id: NodeId, event: &str) -> Result<()> {
        let attached = self.is_attached(id);
        let Some((el, node_ref)) = self.element_mut(id)? else {
            return Ok(());
        };
        if el.events.remove(event).is_some() && attached {
            self.pending.push(Mutation::RemoveEvent {
                node: node_ref,
                event: event.to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn event_handler(&self, id: NodeId, event: &str) -> Option<EventHandler> {
        self.element(id).and_then(|el| el.events.get(event).cloned())
    }

    /// Find a live node by its backend reference number.
    #[must_use]
    pub fn find_by_ref(&self, node_ref: u64) -> Option<NodeId> {
        self.slots.iter().enumerate().find_map(|(idx, slot)| {
            let data = slot.node.as_ref()?;
            (data.node_ref == node_ref).then(|| NodeId {
                idx: u32::try_from(idx).unwrap_or(u32::MAX),
                generation: slot.generation,
            })
        })
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Serialized view of an element and its element descendants.
    #[must_use]
    pub fn snapshot(&self, id: NodeId) -> Option<NodeSnapshot> {
        let data = self.data(id).ok()?;
        let el = data.kind.as_element()?;
        let children = data
            .kind
            .children()
            .iter()
            .filter_map(|c| self.snapshot(*c))
            .collect();
        Some(NodeSnapshot {
            node: data.node_ref,
            tag: el.tag.to_string(),
            attr: el.attr.clone(),
            style: el.effective_style(),
            event: el.events.keys().cloned().collect(),
            children,
        })
    }

    /// Queue a record that does not come from a tree edit (finish markers).
    pub fn push_mutation(&mut self, mutation: Mutation) {
        self.pending.push(mutation);
    }

    #[must_use]
    pub fn has_pending_mutations(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.pending)
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Compact outline of the element subtree: `tag(value){children}`.
    /// Comments are omitted.
    #[must_use]
    pub fn describe(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.describe_into(id, &mut out);
        out
    }

    fn describe_into(&self, id: NodeId, out: &mut String) {
        let Some(el) = self.element(id) else {
            return;
        };
        out.push_str(&el.tag);
        if let Some(value) = el.attr.get("value") {
            match value {
                serde_json::Value::String(s) => {
                    let _ = write!(out, "({s})");
                }
                other => {
                    let _ = write!(out, "({other})");
                }
            }
        }
        let children: Vec<NodeId> = self
            .children(id)
            .into_iter()
            .filter(|c| !self.is_comment(*c))
            .collect();
        if children.is_empty() {
            return;
        }
        out.push('{');
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            self.describe_into(*child, out);
        }
        out.push('}');
    }

    /// The `value` attribute of every leaf under `id`, in document order.
    #[must_use]
    pub fn leaf_values(&self, id: NodeId) -> Vec<String> {
        self.descendants(id)
            .into_iter()
            .filter(|n| self.role(*n) == Some(Role::Leaf))
            .filter_map(|n| {
                self.element(n)
                    .and_then(|el| el.attr.get("value"))
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
            })
            .collect()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("instance_id", &self.instance_id)
            .field("live", &self.live)
            .field("pending", &self.pending.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
