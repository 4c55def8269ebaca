#![forbid(unsafe_code)]

//! Component definitions.
//!
//! A [`ComponentDef`] is the static description a view-model is built from:
//! template, initial data, methods, computed properties, accepted props,
//! class stylesheet, lifecycle hooks and event-to-method wiring. Build one
//! with [`ComponentDef::builder`] and register it on an
//! [`App`](crate::App).

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use weave_reactive::Value;

use crate::template::Template;
use crate::vm::Vm;

/// Component method: receives the view-model and call arguments.
pub type Method = Rc<dyn Fn(&Vm, &[Value]) -> Value>;

/// Lifecycle hook callback.
pub type Hook = Rc<dyn Fn(&Vm)>;

/// Getter and optional setter of a computed property.
#[derive(Clone)]
pub struct ComputedDef {
    pub get: Rc<dyn Fn(&Vm) -> Value>,
    pub set: Option<Rc<dyn Fn(&Vm, Value)>>,
}

/// Lifecycle points a hook can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Init,
    Created,
    Ready,
    Destroyed,
}

impl HookKind {
    /// Event name the hook is emitted under.
    #[must_use]
    pub const fn event(self) -> &'static str {
        match self {
            Self::Init => "hook:init",
            Self::Created => "hook:created",
            Self::Ready => "hook:ready",
            Self::Destroyed => "hook:destroyed",
        }
    }
}

pub struct ComponentDef {
    pub(crate) name: Rc<str>,
    pub(crate) template: Template,
    pub(crate) data: serde_json::Map<String, serde_json::Value>,
    pub(crate) methods: FxHashMap<Rc<str>, Method>,
    pub(crate) computed: IndexMap<Rc<str>, ComputedDef>,
    pub(crate) props: Option<Vec<Rc<str>>>,
    pub(crate) style: FxHashMap<String, BTreeMap<String, serde_json::Value>>,
    pub(crate) hooks: Vec<(HookKind, Hook)>,
    pub(crate) events: Vec<(Rc<str>, Rc<str>)>,
}

impl ComponentDef {
    #[must_use]
    pub fn builder(name: &str) -> ComponentBuilder {
        ComponentBuilder {
            def: Self {
                name: name.into(),
                template: Template::fragment(Vec::<Template>::new()),
                data: serde_json::Map::new(),
                methods: FxHashMap::default(),
                computed: IndexMap::new(),
                props: None,
                style: FxHashMap::default(),
                hooks: Vec::new(),
                events: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Whether a prop named `key` is accepted. Without a declared list every
    /// attribute is a prop.
    #[must_use]
    pub fn accepts_prop(&self, key: &str) -> bool {
        self.props
            .as_ref()
            .is_none_or(|props| props.iter().any(|p| &**p == key))
    }

    /// Merged style of `classes`, later classes winning.
    #[must_use]
    pub fn class_style<'a>(
        &self,
        classes: impl IntoIterator<Item = &'a str>,
    ) -> BTreeMap<String, serde_json::Value> {
        let mut merged = BTreeMap::new();
        for class in classes {
            if let Some(style) = self.style.get(class) {
                merged.extend(style.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        merged
    }
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("name", &self.name)
            .field("data", &self.data.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.len())
            .field("computed", &self.computed.keys().collect::<Vec<_>>())
            .field("props", &self.props)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ComponentDef`].
#[must_use]
pub struct ComponentBuilder {
    def: ComponentDef,
}

impl ComponentBuilder {
    pub fn template(mut self, template: impl Into<Template>) -> Self {
        self.def.template = template.into();
        self
    }

    /// Initial data. Non-object JSON is ignored.
    pub fn data(mut self, json: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = json {
            self.def.data = map;
        }
        self
    }

    pub fn method(mut self, name: &str, f: impl Fn(&Vm, &[Value]) -> Value + 'static) -> Self {
        self.def.methods.insert(name.into(), Rc::new(f));
        self
    }

    pub fn computed(mut self, name: &str, get: impl Fn(&Vm) -> Value + 'static) -> Self {
        self.def.computed.insert(
            name.into(),
            ComputedDef {
                get: Rc::new(get),
                set: None,
            },
        );
        self
    }

    pub fn computed_with_setter(
        mut self,
        name: &str,
        get: impl Fn(&Vm) -> Value + 'static,
        set: impl Fn(&Vm, Value) + 'static,
    ) -> Self {
        self.def.computed.insert(
            name.into(),
            ComputedDef {
                get: Rc::new(get),
                set: Some(Rc::new(set)),
            },
        );
        self
    }

    pub fn props<I, S>(mut self, props: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Rc<str>>,
    {
        self.def.props = Some(props.into_iter().map(Into::into).collect());
        self
    }

    /// Style applied to elements carrying `class`. Non-object JSON is
    /// ignored.
    pub fn class_style(mut self, class: &str, style: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = style {
            self.def
                .style
                .insert(class.to_string(), map.into_iter().collect());
        }
        self
    }

    pub fn hook(mut self, kind: HookKind, f: impl Fn(&Vm) + 'static) -> Self {
        self.def.hooks.push((kind, Rc::new(f)));
        self
    }

    /// Call `method` whenever the view-model emits `event`.
    pub fn event(mut self, event: &str, method: &str) -> Self {
        self.def.events.push((event.into(), method.into()));
        self
    }

    #[must_use]
    pub fn build(self) -> Rc<ComponentDef> {
        Rc::new(self.def)
    }
}
