#![forbid(unsafe_code)]

//! Declarative template trees.
//!
//! A [`Template`] is either an ordered fragment of sibling templates or a
//! single [`NodeTemplate`]. Templates are immutable once built and shared by
//! `Rc`, so a repeat block can recompile the same node for every item without
//! cloning the tree.
//!
//! Bindings come in three flavours:
//!
//! - [`Binding::Static`]: a literal JSON value, evaluated once.
//! - [`Binding::Path`]: a dotted path resolved against a view-model.
//! - [`Binding::Dynamic`]: an arbitrary function of the view-model.
//!
//! Only the last two are watched.

use std::fmt;
use std::rc::Rc;

use weave_reactive::{Path, Value};

use crate::vm::Vm;

/// Function of a view-model producing a value.
pub type Getter = Rc<dyn Fn(&Vm) -> Value>;

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Binding {
    Static(serde_json::Value),
    /// `None` when the path did not parse; evaluates to `Null`.
    Path(Option<Path>),
    Dynamic(Getter),
}

impl Binding {
    #[must_use]
    pub fn value(json: impl Into<serde_json::Value>) -> Self {
        Self::Static(json.into())
    }

    /// A dotted path such as `item.title`. A malformed path is logged and
    /// yields a binding that always reads `Null`.
    #[must_use]
    pub fn path(expr: &str) -> Self {
        Self::Path(Path::parse(expr))
    }

    #[must_use]
    pub fn func(f: impl Fn(&Vm) -> Value + 'static) -> Self {
        Self::Dynamic(Rc::new(f))
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, Self::Static(_))
    }

    /// Evaluate against `vm`. Reads are tracked when an evaluator is active.
    pub fn eval(&self, vm: &Vm) -> Value {
        match self {
            Self::Static(json) => Value::from_json(json.clone()),
            Self::Path(None) => Value::Null,
            Self::Path(Some(path)) => path.resolve_with(|head| vm.get(head)),
            Self::Dynamic(f) => f(vm),
        }
    }

    /// The binding as a shareable getter.
    #[must_use]
    pub fn getter(&self) -> Getter {
        let binding = self.clone();
        Rc::new(move |vm: &Vm| binding.eval(vm))
    }
}

impl From<serde_json::Value> for Binding {
    fn from(json: serde_json::Value) -> Self {
        Self::Static(json)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(json) => write!(f, "Static({json})"),
            Self::Path(Some(path)) => write!(f, "Path({path})"),
            Self::Path(None) => f.write_str("Path(<invalid>)"),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Node parts
// ---------------------------------------------------------------------------

/// Element or component type of a node.
#[derive(Clone)]
pub enum TypeSpec {
    Literal(Rc<str>),
    /// Re-resolved reactively; the result is read as a type name.
    Dynamic(Getter),
}

impl fmt::Debug for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(name) => write!(f, "{name}"),
            Self::Dynamic(_) => f.write_str("<dynamic>"),
        }
    }
}

/// Handler bound to an element event.
#[derive(Clone)]
pub enum EventSpec {
    /// Name of a method on the owning component.
    Method(Rc<str>),
    Func(Rc<dyn Fn(&Vm, &Value)>),
}

impl fmt::Debug for EventSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method(name) => write!(f, "Method({name})"),
            Self::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// When a native node is attached relative to its children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AppendMode {
    /// Attach first, then fill children one by one.
    #[default]
    Node,
    /// Fill children first, then attach the finished subtree at once.
    Tree,
}

/// List rendering directive.
#[derive(Clone, Debug)]
pub struct RepeatSpec {
    pub expr: Binding,
    /// Scope key holding the item index.
    pub key: Rc<str>,
    /// Scope key holding the item value.
    pub value: Rc<str>,
    pub track_by: Option<Rc<str>>,
    /// Object items are identified by reference and their fields are
    /// readable directly from the item scope.
    pub legacy: bool,
}

impl RepeatSpec {
    #[must_use]
    pub fn new(expr: Binding) -> Self {
        Self {
            expr,
            key: "$index".into(),
            value: "$value".into(),
            track_by: None,
            legacy: false,
        }
    }

    #[must_use]
    pub fn key(mut self, name: &str) -> Self {
        self.key = name.into();
        self
    }

    #[must_use]
    pub fn value(mut self, name: &str) -> Self {
        self.value = name.into();
        self
    }

    #[must_use]
    pub fn track_by(mut self, field: &str) -> Self {
        self.track_by = Some(field.into());
        self
    }

    #[must_use]
    pub fn legacy(mut self) -> Self {
        self.legacy = true;
        self
    }
}

// ---------------------------------------------------------------------------
// NodeTemplate
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct NodeTemplate {
    pub kind: TypeSpec,
    pub id: Option<Binding>,
    pub attr: Vec<(Rc<str>, Binding)>,
    pub style: Vec<(Rc<str>, Binding)>,
    /// Array of class names or a space separated string.
    pub class_list: Option<Binding>,
    pub events: Vec<(Rc<str>, EventSpec)>,
    pub repeat: Option<RepeatSpec>,
    pub shown: Option<Binding>,
    pub append: AppendMode,
    pub is_static: bool,
    pub children: Vec<Template>,
}

impl NodeTemplate {
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self::with_kind(TypeSpec::Literal(tag.into()))
    }

    /// Node whose type is computed from view-model state.
    #[must_use]
    pub fn dynamic(f: impl Fn(&Vm) -> Value + 'static) -> Self {
        Self::with_kind(TypeSpec::Dynamic(Rc::new(f)))
    }

    fn with_kind(kind: TypeSpec) -> Self {
        Self {
            kind,
            id: None,
            attr: Vec::new(),
            style: Vec::new(),
            class_list: None,
            events: Vec::new(),
            repeat: None,
            shown: None,
            append: AppendMode::Node,
            is_static: false,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(mut self, binding: impl Into<Binding>) -> Self {
        self.id = Some(binding.into());
        self
    }

    #[must_use]
    pub fn attr(mut self, key: &str, binding: impl Into<Binding>) -> Self {
        self.attr.push((key.into(), binding.into()));
        self
    }

    #[must_use]
    pub fn style(mut self, key: &str, binding: impl Into<Binding>) -> Self {
        self.style.push((key.into(), binding.into()));
        self
    }

    #[must_use]
    pub fn class_list(mut self, binding: impl Into<Binding>) -> Self {
        self.class_list = Some(binding.into());
        self
    }

    /// Bind `event` to the component method `method`.
    #[must_use]
    pub fn on(mut self, event: &str, method: &str) -> Self {
        self.events
            .push((event.into(), EventSpec::Method(method.into())));
        self
    }

    #[must_use]
    pub fn on_fn(mut self, event: &str, f: impl Fn(&Vm, &Value) + 'static) -> Self {
        self.events.push((event.into(), EventSpec::Func(Rc::new(f))));
        self
    }

    #[must_use]
    pub fn repeat(mut self, spec: RepeatSpec) -> Self {
        self.repeat = Some(spec);
        self
    }

    #[must_use]
    pub fn shown(mut self, binding: impl Into<Binding>) -> Self {
        self.shown = Some(binding.into());
        self
    }

    #[must_use]
    pub fn append_tree(mut self) -> Self {
        self.append = AppendMode::Tree;
        self
    }

    #[must_use]
    pub fn static_bindings(mut self) -> Self {
        self.is_static = true;
        self
    }

    #[must_use]
    pub fn child(mut self, child: impl Into<Template>) -> Self {
        self.children.push(child.into());
        self
    }

    #[must_use]
    pub fn children<I, T>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Template>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    /// Literal type name, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            TypeSpec::Literal(name) => Some(name),
            TypeSpec::Dynamic(_) => None,
        }
    }

    /// `content` and `slot` nodes mark where a component's caller content
    /// goes.
    #[must_use]
    pub fn is_content(&self) -> bool {
        matches!(self.tag(), Some("content" | "slot"))
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Template {
    Fragment(Rc<[Template]>),
    Node(Rc<NodeTemplate>),
}

impl Template {
    #[must_use]
    pub fn fragment<I, T>(children: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Template>,
    {
        Self::Fragment(children.into_iter().map(Into::into).collect())
    }
}

impl From<NodeTemplate> for Template {
    fn from(node: NodeTemplate) -> Self {
        Self::Node(Rc::new(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_collects_parts_in_order() {
        let node = NodeTemplate::new("div")
            .attr("a", json!(1))
            .attr("b", Binding::path("x.y"))
            .style("color", json!("red"))
            .on("click", "handle")
            .child(NodeTemplate::new("text"))
            .children([NodeTemplate::new("image"), NodeTemplate::new("text")]);
        assert_eq!(node.tag(), Some("div"));
        assert_eq!(node.attr.len(), 2);
        assert!(!node.attr[0].1.is_dynamic());
        assert!(node.attr[1].1.is_dynamic());
        assert_eq!(node.children.len(), 3);
        assert!(!node.is_content());
        assert!(NodeTemplate::new("slot").is_content());
    }

    #[test]
    fn malformed_path_binding_is_kept_as_null_binding() {
        let binding = Binding::path("a..b");
        assert!(matches!(binding, Binding::Path(None)));
        assert_eq!(format!("{binding:?}"), "Path(<invalid>)");
    }

    #[test]
    fn repeat_spec_defaults() {
        let spec = RepeatSpec::new(Binding::path("list")).track_by("id");
        assert_eq!(&*spec.key, "$index");
        assert_eq!(&*spec.value, "$value");
        assert_eq!(spec.track_by.as_deref(), Some("id"));
        assert!(!spec.legacy);
    }
}
