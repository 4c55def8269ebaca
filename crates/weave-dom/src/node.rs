#![forbid(unsafe_code)]

//! Node payloads and the child-management capability.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::id::NodeId;

/// Event callback bound on an element. Receives the event payload.
pub type EventHandler = Rc<dyn Fn(&serde_json::Value)>;

/// How an element manages children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Ordinary container; children are attached one by one.
    Native,
    /// Container delivered to the backend together with its whole subtree.
    Composite,
    /// Atomic element; child operations are no-ops.
    Leaf,
}

/// Element payload shared by every element role.
#[derive(Default)]
pub struct Element {
    pub tag: Rc<str>,
    pub attr: BTreeMap<String, serde_json::Value>,
    pub style: BTreeMap<String, serde_json::Value>,
    pub class_style: BTreeMap<String, serde_json::Value>,
    pub events: BTreeMap<String, EventHandler>,
}

impl Element {
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// Class style overlaid with inline style; inline wins.
    #[must_use]
    pub fn effective_style(&self) -> BTreeMap<String, serde_json::Value> {
        let mut merged = self.class_style.clone();
        merged.extend(self.style.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("tag", &self.tag)
            .field("attr", &self.attr)
            .field("style", &self.style)
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Node payload.
#[derive(Debug)]
pub enum NodeKind {
    Native { el: Element, children: Vec<NodeId> },
    Composite { el: Element, children: Vec<NodeId> },
    Leaf { el: Element },
    Comment { text: Rc<str> },
}

impl NodeKind {
    #[must_use]
    pub fn element(tag: &str, role: Role) -> Self {
        let el = Element::new(tag);
        match role {
            Role::Native => Self::Native {
                el,
                children: Vec::new(),
            },
            Role::Composite => Self::Composite {
                el,
                children: Vec::new(),
            },
            Role::Leaf => Self::Leaf { el },
        }
    }

    #[must_use]
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Native { el, .. } | Self::Composite { el, .. } | Self::Leaf { el } => Some(el),
            Self::Comment { .. } => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Self::Native { el, .. } | Self::Composite { el, .. } | Self::Leaf { el } => Some(el),
            Self::Comment { .. } => None,
        }
    }

    #[must_use]
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Native { .. } => Some(Role::Native),
            Self::Composite { .. } => Some(Role::Composite),
            Self::Leaf { .. } => Some(Role::Leaf),
            Self::Comment { .. } => None,
        }
    }

    #[must_use]
    pub fn is_comment(&self) -> bool {
        matches!(self, Self::Comment { .. })
    }
}

/// Child management. Leaves and comments accept no children; their
/// implementation of every mutating operation does nothing.
pub trait ChildHost {
    fn children(&self) -> &[NodeId];

    /// Whether `insert_child` can ever succeed.
    fn hosts_children(&self) -> bool;

    /// Insert `child` at `index` (clamped). Returns `false` when the node
    /// does not host children.
    fn insert_child(&mut self, index: usize, child: NodeId) -> bool;

    /// Remove `child`, returning its former index.
    fn remove_child(&mut self, child: NodeId) -> Option<usize>;
}

impl ChildHost for NodeKind {
    fn children(&self) -> &[NodeId] {
        match self {
            Self::Native { children, .. } | Self::Composite { children, .. } => children,
            Self::Leaf { .. } | Self::Comment { .. } => &[],
        }
    }

    fn hosts_children(&self) -> bool {
        matches!(self, Self::Native { .. } | Self::Composite { .. })
    }

    fn insert_child(&mut self, index: usize, child: NodeId) -> bool {
        match self {
            Self::Native { children, .. } | Self::Composite { children, .. } => {
                let index = index.min(children.len());
                children.insert(index, child);
                true
            }
            Self::Leaf { .. } | Self::Comment { .. } => false,
        }
    }

    fn remove_child(&mut self, child: NodeId) -> Option<usize> {
        match self {
            Self::Native { children, .. } | Self::Composite { children, .. } => {
                let pos = children.iter().position(|c| *c == child)?;
                children.remove(pos);
                Some(pos)
            }
            Self::Leaf { .. } | Self::Comment { .. } => None,
        }
    }
}
