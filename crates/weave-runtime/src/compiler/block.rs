#![forbid(unsafe_code)]

//! Fragment blocks.
//!
//! A [`FragmentBlock`] is a pair of comment anchors delimiting a dynamically
//! sized run of siblings inside one parent element. Repeat, conditional and
//! dynamic-type directives render into blocks, so their output can be
//! replaced without touching the siblings around it.
//!
//! # Invariants
//!
//! 1. `start` precedes `end` under the same parent, and everything rendered
//!    into the block lies between them.
//! 2. While an update mark is set, new targets are placed right after it and
//!    the mark advances past them; otherwise they go right before `end`.
//! 3. Capture frames record every target attached directly to the block, in
//!    attach order, while the frame is open.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use weave_dom::{Document, NodeId};
use weave_reactive::Value;

use super::Dest;
use crate::vm::VmId;

/// Something rendered into a parent: a single element or a whole block.
#[derive(Clone, Debug)]
pub enum Target {
    Element(NodeId),
    Block(FragmentBlock),
}

impl Target {
    #[must_use]
    pub fn first(&self) -> NodeId {
        match self {
            Self::Element(id) => *id,
            Self::Block(block) => block.start(),
        }
    }

    #[must_use]
    pub fn last(&self) -> NodeId {
        match self {
            Self::Element(id) => *id,
            Self::Block(block) => block.end(),
        }
    }
}

/// One rendered repeat item.
#[derive(Debug)]
pub(crate) struct RepeatItem {
    pub(crate) scope: VmId,
    pub(crate) targets: Vec<Target>,
    pub(crate) data: Value,
}

struct BlockInner {
    id: u64,
    start: NodeId,
    end: NodeId,
    update_mark: Cell<Option<NodeId>>,
    captures: RefCell<Vec<Vec<Target>>>,
    items: RefCell<Vec<RepeatItem>>,
    display: Cell<bool>,
    scope: Cell<Option<VmId>>,
}

/// Shared handle to a start/end anchor pair.
#[derive(Clone)]
pub struct FragmentBlock {
    inner: Rc<BlockInner>,
}

impl FragmentBlock {
    /// Create the anchors and attach the block to `dest`.
    pub(crate) fn create(doc: &mut Document, id: u64, dest: &Dest) -> Self {
        let block = Self {
            inner: Rc::new(BlockInner {
                id,
                start: doc.create_comment("start"),
                end: doc.create_comment("end"),
                update_mark: Cell::new(None),
                captures: RefCell::new(Vec::new()),
                items: RefCell::new(Vec::new()),
                display: Cell::new(false),
                scope: Cell::new(None),
            }),
        };
        attach(doc, &Target::Block(block.clone()), dest);
        block
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn start(&self) -> NodeId {
        self.inner.start
    }

    #[must_use]
    pub fn end(&self) -> NodeId {
        self.inner.end
    }

    /// Whether the anchors are still in the document arena.
    #[must_use]
    pub fn is_alive(&self, doc: &Document) -> bool {
        doc.is_alive(self.inner.start) && doc.is_alive(self.inner.end)
    }

    /// Parent element of the anchors.
    #[must_use]
    pub fn parent(&self, doc: &Document) -> Option<NodeId> {
        doc.parent(self.inner.start)
    }

    /// Rendered nodes between the anchors, anchors excluded.
    #[must_use]
    pub fn content(&self, doc: &Document) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = doc.next_sibling(self.inner.start);
        while let Some(node) = current {
            if node == self.inner.end {
                break;
            }
            out.push(node);
            current = doc.next_sibling(node);
        }
        out
    }

    pub(crate) fn update_mark(&self) -> Option<NodeId> {
        self.inner.update_mark.get()
    }

    pub(crate) fn set_update_mark(&self, mark: Option<NodeId>) {
        self.inner.update_mark.set(mark);
    }

    pub(crate) fn begin_capture(&self) {
        self.inner.captures.borrow_mut().push(Vec::new());
    }

    pub(crate) fn end_capture(&self) -> Vec<Target> {
        self.inner.captures.borrow_mut().pop().unwrap_or_default()
    }

    fn record(&self, target: &Target) {
        if let Some(frame) = self.inner.captures.borrow_mut().last_mut() {
            frame.push(target.clone());
        }
    }

    pub(crate) fn take_items(&self) -> Vec<RepeatItem> {
        std::mem::take(&mut *self.inner.items.borrow_mut())
    }

    pub(crate) fn set_items(&self, items: Vec<RepeatItem>) {
        *self.inner.items.borrow_mut() = items;
    }

    #[must_use]
    pub fn display(&self) -> bool {
        self.inner.display.get()
    }

    pub(crate) fn set_display(&self, display: bool) {
        self.inner.display.set(display);
    }

    pub(crate) fn replace_scope(&self, scope: Option<VmId>) -> Option<VmId> {
        self.inner.scope.replace(scope)
    }
}

impl fmt::Debug for FragmentBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentBlock")
            .field("id", &self.inner.id)
            .field("start", &self.inner.start)
            .field("end", &self.inner.end)
            .field("items", &self.inner.items.borrow().len())
            .field("display", &self.inner.display.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Target placement
// ---------------------------------------------------------------------------

/// Nodes making up `target`, in document order.
fn nodes(doc: &Document, target: &Target) -> Vec<NodeId> {
    match target {
        Target::Element(id) => vec![*id],
        Target::Block(block) => {
            if doc.parent(block.start()).is_none() {
                return vec![block.start(), block.end()];
            }
            let mut out = vec![block.start()];
            out.extend(block.content(doc));
            out.push(block.end());
            out
        }
    }
}

fn report(result: weave_dom::document::Result<()>) {
    if let Err(err) = result {
        tracing::trace!(%err, "block edit skipped");
    }
}

/// Place `target` into `dest`.
pub(crate) fn attach(doc: &mut Document, target: &Target, dest: &Dest) {
    match dest {
        Dest::Element(parent) => {
            for node in nodes(doc, target) {
                report(doc.append_child(*parent, node));
            }
        }
        Dest::Block(block) => {
            block.record(target);
            if let Some(mark) = block.update_mark() {
                let last = move_after(doc, target, mark);
                block.set_update_mark(Some(last));
            } else {
                for node in nodes(doc, target) {
                    report(doc.insert_before(node, block.end()));
                }
            }
        }
    }
}

/// Move `target` right after `after`. Returns the last node placed.
pub(crate) fn move_after(doc: &mut Document, target: &Target, after: NodeId) -> NodeId {
    let mut cursor = after;
    for node in nodes(doc, target) {
        report(doc.insert_after(node, cursor));
        cursor = node;
    }
    cursor
}

/// Remove `target` and free its nodes.
pub(crate) fn remove(doc: &mut Document, target: &Target) {
    for node in nodes(doc, target) {
        if doc.is_alive(node) {
            report(doc.remove(node));
        }
    }
}

/// Remove everything between the anchors, keeping the block itself.
pub(crate) fn clear(doc: &mut Document, block: &FragmentBlock) {
    for node in block.content(doc) {
        if doc.is_alive(node) {
            report(doc.remove(node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_dom::Role;

    fn setup() -> (Document, NodeId) {
        let mut doc = Document::new("t");
        let body = doc.create_body("div");
        let root = doc.root();
        doc.append_child(root, body).unwrap();
        doc.take_mutations();
        (doc, body)
    }

    fn text(doc: &mut Document, value: &str) -> NodeId {
        let id = doc.create_element("text", Role::Leaf);
        doc.set_attr(id, "value", serde_json::json!(value)).unwrap();
        id
    }

    #[test]
    fn block_content_stays_between_anchors() {
        let (mut doc, body) = setup();
        let before = text(&mut doc, "before");
        doc.append_child(body, before).unwrap();
        let block = FragmentBlock::create(&mut doc, 1, &Dest::Element(body));
        let after = text(&mut doc, "after");
        doc.append_child(body, after).unwrap();

        let dest = Dest::Block(block.clone());
        let a = text(&mut doc, "a");
        attach(&mut doc, &Target::Element(a), &dest);
        let b = text(&mut doc, "b");
        attach(&mut doc, &Target::Element(b), &dest);

        assert_eq!(doc.leaf_values(body), ["before", "a", "b", "after"]);
        assert_eq!(block.content(&doc), vec![a, b]);
        assert_eq!(block.parent(&doc), Some(body));
    }

    #[test]
    fn update_mark_places_after_and_advances() {
        let (mut doc, body) = setup();
        let block = FragmentBlock::create(&mut doc, 1, &Dest::Element(body));
        let dest = Dest::Block(block.clone());
        let a = text(&mut doc, "a");
        attach(&mut doc, &Target::Element(a), &dest);

        block.set_update_mark(Some(block.start()));
        let b = text(&mut doc, "b");
        attach(&mut doc, &Target::Element(b), &dest);
        let c = text(&mut doc, "c");
        attach(&mut doc, &Target::Element(c), &dest);
        assert_eq!(block.update_mark(), Some(c));
        assert_eq!(doc.leaf_values(body), ["b", "c", "a"]);
    }

    #[test]
    fn nested_block_moves_as_a_unit() {
        let (mut doc, body) = setup();
        let outer = FragmentBlock::create(&mut doc, 1, &Dest::Element(body));
        let dest = Dest::Block(outer.clone());
        let x = text(&mut doc, "x");
        attach(&mut doc, &Target::Element(x), &dest);
        let inner = FragmentBlock::create(&mut doc, 2, &dest);
        let y = text(&mut doc, "y");
        attach(&mut doc, &Target::Element(y), &Dest::Block(inner.clone()));

        let last = move_after(&mut doc, &Target::Block(inner.clone()), outer.start());
        assert_eq!(last, inner.end());
        assert_eq!(doc.leaf_values(body), ["y", "x"]);

        remove(&mut doc, &Target::Block(inner.clone()));
        assert!(!inner.is_alive(&doc));
        assert!(!doc.is_alive(y));
        assert_eq!(doc.leaf_values(body), ["x"]);
    }

    #[test]
    fn capture_records_direct_attachments_only() {
        let (mut doc, body) = setup();
        let block = FragmentBlock::create(&mut doc, 1, &Dest::Element(body));
        let dest = Dest::Block(block.clone());
        block.begin_capture();
        let a = text(&mut doc, "a");
        attach(&mut doc, &Target::Element(a), &dest);
        let nested = FragmentBlock::create(&mut doc, 2, &dest);
        let b = text(&mut doc, "b");
        attach(&mut doc, &Target::Element(b), &Dest::Block(nested.clone()));
        let captured = block.end_capture();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].first(), a);
        assert_eq!(captured[1].first(), nested.start());
        assert!(block.end_capture().is_empty());
    }

    #[test]
    fn clear_keeps_anchors() {
        let (mut doc, body) = setup();
        let block = FragmentBlock::create(&mut doc, 1, &Dest::Element(body));
        let dest = Dest::Block(block.clone());
        for v in ["a", "b"] {
            let t = text(&mut doc, v);
            attach(&mut doc, &Target::Element(t), &dest);
        }
        clear(&mut doc, &block);
        assert!(block.is_alive(&doc));
        assert!(block.content(&doc).is_empty());
        assert!(doc.leaf_values(body).is_empty());
    }
}
