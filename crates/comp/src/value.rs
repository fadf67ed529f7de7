use std::{cell::RefCell, cmp::Ordering, fmt, rc::Rc};

use ahash::AHashMap;
use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;

use crate::{
    ast::Node,
    builtin,
    engine::Scopes,
    handle::HandleInstance,
    module::{Module, ModuleId},
    structure::Structure,
    tag::TagDefinition,
};

/// Payload of a runtime value.
///
/// Numbers are arbitrary-precision decimals, never floats. Tags and handles
/// compare by identity of their definition / instance. Structures are the
/// only aggregate.
#[derive(Debug, Clone)]
pub enum ValueData {
    Number(BigDecimal),
    Text(String),
    Tag(Rc<TagDefinition>),
    Struct(Structure),
    Handle(Rc<HandleInstance>),
    Block(BlockValue),
}

/// A deferred expression with its captured scopes, invoked through pipeline
/// block-apply.
#[derive(Debug, Clone)]
pub struct BlockValue {
    pub body: Rc<Node>,
    pub scopes: Scopes,
    pub module: Rc<Module>,
}

/// Kind discriminant, used in type-failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ValueKind {
    Tag,
    Number,
    Text,
    Struct,
    Handle,
    Block,
}

type PrivateMap = AHashMap<ModuleId, Value>;

/// A runtime value.
///
/// Logically immutable: every "mutation" in the language builds a new value.
/// The payload is shared behind `Rc`, so copies are cheap and copies of a
/// structure share their field storage.
///
/// Two pieces of state ride along with the payload:
///
/// - An optional *side tag*. Failures are structures whose side tag is
///   `#fail` or a descendant; `is_fail` is a tag check, never a field scan.
/// - A *private map* from module id to value. The map itself is shared (not
///   copied) between all copies of a value, which is the one sanctioned
///   mutable channel: a module stores world state under its own id and every
///   copy of the value observes it.
#[derive(Debug, Clone)]
pub struct Value {
    data: Rc<ValueData>,
    tag: Option<Rc<TagDefinition>>,
    private: Rc<RefCell<PrivateMap>>,
}

impl Value {
    fn from_data(data: ValueData) -> Self {
        Self {
            data: Rc::new(data),
            tag: None,
            private: Rc::new(RefCell::new(PrivateMap::new())),
        }
    }

    /// The empty structure, also the result of converting `nil`.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_data(ValueData::Struct(Structure::new()))
    }

    pub fn number(n: impl Into<BigDecimal>) -> Self {
        Self::from_data(ValueData::Number(n.into()))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::from_data(ValueData::Text(s.into()))
    }

    #[must_use]
    pub fn tag(definition: Rc<TagDefinition>) -> Self {
        Self::from_data(ValueData::Tag(definition))
    }

    #[must_use]
    pub fn structure(fields: Structure) -> Self {
        Self::from_data(ValueData::Struct(fields))
    }

    #[must_use]
    pub fn handle(instance: Rc<HandleInstance>) -> Self {
        Self::from_data(ValueData::Handle(instance))
    }

    #[must_use]
    pub fn block(block: BlockValue) -> Self {
        Self::from_data(ValueData::Block(block))
    }

    /// `#true` or `#false` from the builtin module.
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::tag(builtin::bool_tag(value))
    }

    /// Rebuilds this value with a side tag, sharing payload and private map.
    #[must_use]
    pub fn with_tag(&self, tag: Rc<TagDefinition>) -> Self {
        Self {
            data: Rc::clone(&self.data),
            tag: Some(tag),
            private: Rc::clone(&self.private),
        }
    }

    pub fn data(&self) -> &ValueData {
        &self.data
    }

    pub fn side_tag(&self) -> Option<&Rc<TagDefinition>> {
        self.tag.as_ref()
    }

    pub fn kind(&self) -> ValueKind {
        match &*self.data {
            ValueData::Number(_) => ValueKind::Number,
            ValueData::Text(_) => ValueKind::Text,
            ValueData::Tag(_) => ValueKind::Tag,
            ValueData::Struct(_) => ValueKind::Struct,
            ValueData::Handle(_) => ValueKind::Handle,
            ValueData::Block(_) => ValueKind::Block,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(&*self.data, ValueData::Number(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(&*self.data, ValueData::Text(_))
    }

    pub fn is_struct(&self) -> bool {
        matches!(&*self.data, ValueData::Struct(_))
    }

    pub fn is_tag(&self) -> bool {
        matches!(&*self.data, ValueData::Tag(_))
    }

    pub fn is_handle(&self) -> bool {
        matches!(&*self.data, ValueData::Handle(_))
    }

    /// True for any value whose side tag is `#fail` or a descendant.
    pub fn is_fail(&self) -> bool {
        self.tag.as_ref().is_some_and(builtin::is_fail_tag)
    }

    pub fn as_number(&self) -> Option<&BigDecimal> {
        match &*self.data {
            ValueData::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &*self.data {
            ValueData::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> Option<&Rc<TagDefinition>> {
        match &*self.data {
            ValueData::Tag(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_struct_ref(&self) -> Option<&Structure> {
        match &*self.data {
            ValueData::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Rc<HandleInstance>> {
        match &*self.data {
            ValueData::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&BlockValue> {
        match &*self.data {
            ValueData::Block(b) => Some(b),
            _ => None,
        }
    }

    /// `#true`/`#false` to a bool; anything else is not a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        let tag = self.as_tag()?;
        builtin::tag_to_bool(tag)
    }

    /// A non-negative integer number as a structure index.
    pub(crate) fn as_index(&self) -> Option<usize> {
        let n = self.as_number()?;
        if !n.is_integer() {
            return None;
        }
        n.to_usize()
    }

    /// Unwraps a single-field structure to its sole value; identity
    /// otherwise. The unwrapped value is the *same* value object stored in
    /// the structure, so private data survives the round trip.
    #[must_use]
    pub fn as_scalar(&self) -> Value {
        match &*self.data {
            ValueData::Struct(s) => s.sole_value().cloned().unwrap_or_else(|| self.clone()),
            _ => self.clone(),
        }
    }

    /// Wraps a scalar into a single positional field; identity for
    /// structures.
    #[must_use]
    pub fn as_struct(&self) -> Value {
        match &*self.data {
            ValueData::Struct(_) => self.clone(),
            _ => {
                let mut fields = Structure::with_capacity(1);
                fields.push_unnamed(self.clone());
                Value::structure(fields)
            }
        }
    }

    /// Whether two values share the same payload allocation.
    ///
    /// This is the identity the scalar/struct round-trip guarantees preserve.
    #[must_use]
    pub fn shares_data(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    /// Stores a value in the private map under `module_id`.
    ///
    /// The map is shared between all copies of this value; every copy sees
    /// the update.
    pub fn set_private(&self, module_id: &ModuleId, value: Value) {
        self.private.borrow_mut().insert(module_id.clone(), value);
    }

    /// Reads the private entry for `module_id`, if any.
    #[must_use]
    pub fn get_private(&self, module_id: &ModuleId) -> Option<Value> {
        self.private.borrow().get(module_id).cloned()
    }

    /// Total order across kinds used by the comparison operators:
    /// tags sort before numbers, numbers before text. Structures, handles
    /// and blocks do not order.
    pub(crate) fn compare(&self, other: &Value) -> Option<Ordering> {
        let (a, b) = (self.kind(), other.kind());
        if a != b {
            return match (a, b) {
                (ValueKind::Struct | ValueKind::Handle | ValueKind::Block, _)
                | (_, ValueKind::Struct | ValueKind::Handle | ValueKind::Block) => None,
                _ => Some(a.cmp(&b)),
            };
        }
        match (&*self.data, &*other.data) {
            (ValueData::Number(x), ValueData::Number(y)) => Some(x.cmp(y)),
            (ValueData::Text(x), ValueData::Text(y)) => Some(x.cmp(y)),
            (ValueData::Tag(x), ValueData::Tag(y)) => Some(x.order(y)),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let tags_match = match (&self.tag, &other.tag) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        };
        if !tags_match {
            return false;
        }
        match (&*self.data, &*other.data) {
            (ValueData::Number(a), ValueData::Number(b)) => a == b,
            (ValueData::Text(a), ValueData::Text(b)) => a == b,
            (ValueData::Tag(a), ValueData::Tag(b)) => Rc::ptr_eq(a, b),
            (ValueData::Handle(a), ValueData::Handle(b)) => Rc::ptr_eq(a, b),
            (ValueData::Block(a), ValueData::Block(b)) => Rc::ptr_eq(&a.body, &b.body),
            (ValueData::Struct(a), ValueData::Struct(b)) => struct_eq(a, b),
            _ => false,
        }
    }
}

/// Structures compare by ordered pairs: positions must agree on namedness,
/// named keys must be equal, and values must be equal. Positional keys are
/// never equal across structures, so position stands in for the key.
fn struct_eq(a: &Structure, b: &Structure) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| {
        let keys_agree = match (ka.is_named(), kb.is_named()) {
            (true, true) => ka == kb,
            (false, false) => true,
            _ => false,
        };
        keys_agree && va == vb
    })
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::number(n)
    }
}

impl From<BigDecimal> for Value {
    fn from(n: BigDecimal) -> Self {
        Self::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::boolean(b)
    }
}

impl From<Structure> for Value {
    fn from(s: Structure) -> Self {
        Self::structure(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_value(self, f, false)
    }
}

/// Renders a value; `nested` quotes text when it appears inside a structure.
fn fmt_value(value: &Value, f: &mut fmt::Formatter<'_>, nested: bool) -> fmt::Result {
    match value.data() {
        ValueData::Number(n) => write!(f, "{}", n.normalized()),
        ValueData::Text(s) => {
            if nested {
                write!(f, "{s:?}")
            } else {
                write!(f, "{s}")
            }
        }
        ValueData::Tag(t) => write!(f, "{t}"),
        ValueData::Handle(h) => write!(f, "{h}"),
        ValueData::Block(_) => write!(f, ":{{…}}"),
        ValueData::Struct(s) => {
            write!(f, "{{")?;
            for (i, (key, field)) in s.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                if key.is_named() {
                    write!(f, "{key}=")?;
                }
                fmt_value(field, f, true)?;
            }
            write!(f, "}}")
        }
    }
}
