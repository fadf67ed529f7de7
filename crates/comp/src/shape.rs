use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use crate::{
    ast::{HandleRefNode, ShapeRefNode, TagRefNode},
    builtin,
    module::ModuleId,
    tag::{DefPath, path_matches_partial},
    value::Value,
};

/// The builtin placeholder shapes whose matching is wired into the morph
/// engine rather than described by fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Primitive {
    Num,
    Str,
    Bool,
    Tag,
    Any,
}

impl Primitive {
    fn from_path(path: &[String]) -> Option<Self> {
        match path {
            [leaf] => match leaf.as_str() {
                "num" => Some(Self::Num),
                "str" => Some(Self::Str),
                "bool" => Some(Self::Bool),
                "tag" => Some(Self::Tag),
                "any" => Some(Self::Any),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Type constraint on a shape field.
///
/// Constraints hold the reference node from the declaration; preparation
/// fills the node's resolve slot, and the morph engine reads through it.
#[derive(Debug, Clone)]
pub enum FieldConstraint {
    /// No constraint; accepts anything.
    Any,
    Shape(Rc<ShapeRefNode>),
    Tag(Rc<TagRefNode>),
    Handle(Rc<HandleRefNode>),
}

/// A single field of a shape.
///
/// Runtime fields never carry spreads; those are expanded while the shape's
/// definition body is built.
#[derive(Debug, Clone)]
pub struct ShapeField {
    name: Option<Rc<str>>,
    constraint: FieldConstraint,
    default: Option<Value>,
    is_array: bool,
    array_min: Option<usize>,
    array_max: Option<usize>,
}

impl ShapeField {
    #[must_use]
    pub fn new(name: Option<&str>, constraint: FieldConstraint, default: Option<Value>) -> Self {
        Self {
            name: name.map(Rc::from),
            constraint,
            default,
            is_array: false,
            array_min: None,
            array_max: None,
        }
    }

    #[must_use]
    pub fn array(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.is_array = true;
        self.array_min = min;
        self.array_max = max;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    pub fn is_positional(&self) -> bool {
        self.name.is_none()
    }

    pub fn constraint(&self) -> &FieldConstraint {
        &self.constraint
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }

    pub fn is_array(&self) -> bool {
        self.is_array
    }

    pub fn array_min(&self) -> Option<usize> {
        self.array_min
    }

    pub fn array_max(&self) -> Option<usize> {
        self.array_max
    }
}

/// A shape definition: a structural contract over values.
///
/// Field lists are filled while the module prepares (spreads expanded,
/// defaults evaluated); union shapes hold resolved member definitions
/// instead.
#[derive(Debug)]
pub struct ShapeDefinition {
    path: DefPath,
    fields: RefCell<Vec<ShapeField>>,
    fields_built: Cell<bool>,
    is_union: bool,
    union_members: RefCell<Vec<Rc<ShapeDefinition>>>,
    module_id: ModuleId,
}

impl ShapeDefinition {
    pub(crate) fn new(
        path: impl IntoIterator<Item = String>,
        fields: Vec<ShapeField>,
        module_id: ModuleId,
    ) -> Self {
        Self {
            path: path.into_iter().collect(),
            fields_built: Cell::new(false),
            fields: RefCell::new(fields),
            is_union: false,
            union_members: RefCell::new(Vec::new()),
            module_id,
        }
    }

    pub(crate) fn new_union(path: impl IntoIterator<Item = String>, module_id: ModuleId) -> Self {
        Self {
            path: path.into_iter().collect(),
            fields: RefCell::new(Vec::new()),
            fields_built: Cell::new(true),
            is_union: true,
            union_members: RefCell::new(Vec::new()),
            module_id,
        }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.last().map_or("", String::as_str)
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        self.path.join(".")
    }

    pub fn module_id(&self) -> &ModuleId {
        &self.module_id
    }

    pub fn is_union(&self) -> bool {
        self.is_union
    }

    /// The primitive this shape stands for, when it is one of the builtin
    /// placeholders.
    pub fn primitive(&self) -> Option<Primitive> {
        if self.module_id == builtin::builtin_module_id() {
            Primitive::from_path(&self.path)
        } else {
            None
        }
    }

    pub fn fields(&self) -> std::cell::Ref<'_, Vec<ShapeField>> {
        self.fields.borrow()
    }

    pub(crate) fn fields_built(&self) -> bool {
        self.fields_built.get()
    }

    pub(crate) fn replace_fields(&self, fields: Vec<ShapeField>) {
        *self.fields.borrow_mut() = fields;
        self.fields_built.set(true);
    }

    pub fn union_members(&self) -> Vec<Rc<ShapeDefinition>> {
        self.union_members.borrow().clone()
    }

    pub(crate) fn set_union_members(&self, members: Vec<Rc<ShapeDefinition>>) {
        *self.union_members.borrow_mut() = members;
    }

    /// Whether this shape's path ends with the leaf-first partial path.
    pub fn matches_partial(&self, partial: &[String]) -> bool {
        path_matches_partial(&self.path, partial)
    }

    pub fn named_field_count(&self) -> usize {
        self.fields.borrow().iter().filter(|f| f.is_named()).count()
    }
}

impl fmt::Display for ShapeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "~{{…}}")
        } else {
            write!(f, "~{}", self.full_name())
        }
    }
}
