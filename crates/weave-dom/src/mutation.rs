#![forbid(unsafe_code)]

//! Records delivered to a rendering backend.

use std::collections::BTreeMap;

use serde::Serialize;

type Props = BTreeMap<String, serde_json::Value>;

/// Serialized view of an element and its visible subtree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    #[serde(rename = "ref")]
    pub node: u64,
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attr: Props,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub style: Props,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}

/// One visible change of the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Mutation {
    CreateBody {
        element: NodeSnapshot,
    },
    AddElement {
        parent: u64,
        element: NodeSnapshot,
        index: usize,
    },
    RemoveElement {
        node: u64,
    },
    MoveElement {
        node: u64,
        parent: u64,
        index: usize,
    },
    UpdateAttrs {
        node: u64,
        attr: Props,
    },
    UpdateStyle {
        node: u64,
        style: Props,
    },
    AddEvent {
        node: u64,
        event: String,
    },
    RemoveEvent {
        node: u64,
        event: String,
    },
    CreateFinish,
    UpdateFinish,
    RefreshFinish,
}

impl Mutation {
    /// Short action name, as serialized.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::CreateBody { .. } => "createBody",
            Self::AddElement { .. } => "addElement",
            Self::RemoveElement { .. } => "removeElement",
            Self::MoveElement { .. } => "moveElement",
            Self::UpdateAttrs { .. } => "updateAttrs",
            Self::UpdateStyle { .. } => "updateStyle",
            Self::AddEvent { .. } => "addEvent",
            Self::RemoveEvent { .. } => "removeEvent",
            Self::CreateFinish => "createFinish",
            Self::UpdateFinish => "updateFinish",
            Self::RefreshFinish => "refreshFinish",
        }
    }
}
