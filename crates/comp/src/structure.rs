use std::{
    fmt,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use indexmap::IndexMap;

use crate::{fail, tag::TagKey, value::Value};

/// Ticket source for unnamed keys. Process-wide so keys stay distinct across
/// every structure ever built in a run.
static UNNAMED_TICKETS: AtomicU64 = AtomicU64::new(1);

/// Key of one structure field.
///
/// Named fields key by text or by tag identity. Positional fields key by an
/// `Unnamed` ticket: each ticket is unique, so two positional fields never
/// collide and a positional key is only ever equal to itself. This is what
/// lets `{1, 2, 3}` hold three fields while preserving insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKey {
    Text(Rc<str>),
    Tag(TagKey),
    Unnamed(u64),
}

impl FieldKey {
    /// A fresh positional key, never equal to any existing key.
    #[must_use]
    pub fn unnamed() -> Self {
        Self::Unnamed(UNNAMED_TICKETS.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn text(name: &str) -> Self {
        Self::Text(Rc::from(name))
    }

    pub fn is_named(&self) -> bool {
        !matches!(self, Self::Unnamed(_))
    }

    /// The field name when this is a text key.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(name) => write!(f, "{name}"),
            Self::Tag(tag) => write!(f, "{}", tag.0),
            Self::Unnamed(_) => write!(f, "_"),
        }
    }
}

/// The aggregate value kind: an insertion-ordered map of field keys to
/// values.
///
/// All mutation happens while a structure is being assembled; once wrapped
/// into a [`Value`] it is shared immutably. Operations that "modify" a
/// structure clone the map and return a new one.
#[derive(Debug, Clone, Default)]
pub struct Structure {
    fields: IndexMap<FieldKey, Value, ahash::RandomState>,
}

impl Structure {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: IndexMap::with_capacity_and_hasher(capacity, ahash::RandomState::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Inserts a field. An existing key keeps its original position; the
    /// value is replaced.
    pub fn insert(&mut self, key: FieldKey, value: Value) {
        self.fields.insert(key, value);
    }

    /// Appends a positional field under a fresh unnamed key.
    pub fn push_unnamed(&mut self, value: Value) {
        self.fields.insert(FieldKey::unnamed(), value);
    }

    pub fn insert_named(&mut self, name: &str, value: Value) {
        self.fields.insert(FieldKey::text(name), value);
    }

    pub fn get(&self, key: &FieldKey) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.fields.get(&FieldKey::text(name))
    }

    pub fn contains_named(&self, name: &str) -> bool {
        self.fields.contains_key(&FieldKey::text(name))
    }

    /// The entry at insertion-order position `index`, named or not.
    pub fn entry_at(&self, index: usize) -> Option<(&FieldKey, &Value)> {
        self.fields.get_index(index)
    }

    /// Removes a field, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &FieldKey) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &Value)> {
        self.fields.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.fields.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.values()
    }

    /// The sole value of a single-field structure.
    pub(crate) fn sole_value(&self) -> Option<&Value> {
        if self.fields.len() == 1 {
            self.fields.get_index(0).map(|(_, v)| v)
        } else {
            None
        }
    }

    /// Splices another structure's fields in place (spread).
    ///
    /// Named keys override an existing entry at its original position;
    /// positional keys carry their tickets over, so distinct positional
    /// fields accumulate while spreading the same structure twice merges it.
    pub fn splice(&mut self, other: &Structure) {
        for (key, value) in other.iter() {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Replaces the value at insertion-order position `index`, keeping the
    /// key. Fails with `#fail.not_found` when out of bounds.
    pub(crate) fn replace_at(&self, index: usize, value: Value) -> Result<Structure, Value> {
        let Some((key, _)) = self.fields.get_index(index) else {
            return Err(fail::not_found(format!(
                "Index #{index} out of bounds for structure of {} fields",
                self.fields.len()
            )));
        };
        let key = key.clone();
        let mut next = self.clone();
        next.fields.insert(key, value);
        Ok(next)
    }
}

impl FromIterator<(FieldKey, Value)> for Structure {
    fn from_iter<I: IntoIterator<Item = (FieldKey, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// One resolved segment of an assignment path.
#[derive(Debug, Clone)]
pub(crate) enum AssignSeg {
    Key(FieldKey),
    Index(usize),
}

/// Rebuilds `base` with `value` stored at the deep `path`.
///
/// Values are immutable, so every level along the path is cloned into a new
/// structure. Missing intermediates are created as empty structures; an
/// existing non-structure at an intermediate segment is replaced by a
/// structure. Index segments must land on an existing entry.
pub(crate) fn assign_path(base: &Value, path: &[AssignSeg], value: Value) -> Result<Value, Value> {
    let Some((seg, rest)) = path.split_first() else {
        return Ok(value);
    };
    let current = base.as_struct_ref().cloned().unwrap_or_default();
    match seg {
        AssignSeg::Key(key) => {
            let inner = if rest.is_empty() {
                value
            } else {
                let nested = current.get(key).cloned().unwrap_or_else(Value::empty);
                assign_path(&nested, rest, value)?
            };
            let mut next = current;
            next.insert(key.clone(), inner);
            Ok(Value::structure(next))
        }
        AssignSeg::Index(index) => {
            let inner = if rest.is_empty() {
                value
            } else {
                let nested = current
                    .entry_at(*index)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(Value::empty);
                assign_path(&nested, rest, value)?
            };
            current.replace_at(*index, inner).map(Value::structure)
        }
    }
}
