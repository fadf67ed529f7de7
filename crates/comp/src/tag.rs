use std::{
    cell::RefCell,
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    rc::{Rc, Weak},
};

use smallvec::SmallVec;

use crate::{module::Module, module::ModuleId, value::Value};

/// Definition paths are short in practice; four segments covers almost
/// everything without spilling to the heap.
pub(crate) type DefPath = SmallVec<[String; 4]>;

/// A tag definition owned by a module.
///
/// Tags form a forest rooted at the first path segment. The path is fixed at
/// creation; re-defining the same path merges the attached value instead of
/// replacing the definition, so every reference resolved against a path keeps
/// pointing at the same definition object.
///
/// Runtime tag values compare by *identity* of their definition, never by the
/// attached value.
#[derive(Debug)]
pub struct TagDefinition {
    path: DefPath,
    /// Attached value, filled during module preparation (phase 2).
    value: RefCell<Option<Value>>,
    /// Cross-module parent declared with an extends clause.
    extends: RefCell<Option<Rc<TagDefinition>>>,
    module_id: ModuleId,
    owner: RefCell<Weak<Module>>,
}

impl TagDefinition {
    pub(crate) fn new(path: impl IntoIterator<Item = String>, module_id: ModuleId) -> Self {
        Self {
            path: path.into_iter().collect(),
            value: RefCell::new(None),
            extends: RefCell::new(None),
            module_id,
            owner: RefCell::new(Weak::new()),
        }
    }

    /// Full path in definition order, root first.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Leaf name (last path segment).
    pub fn name(&self) -> &str {
        self.path.last().map_or("", String::as_str)
    }

    /// Dot-separated full path.
    #[must_use]
    pub fn full_name(&self) -> String {
        self.path.join(".")
    }

    pub(crate) fn parent_path(&self) -> Option<&[String]> {
        if self.path.len() > 1 {
            Some(&self.path[..self.path.len() - 1])
        } else {
            None
        }
    }

    pub fn module_id(&self) -> &ModuleId {
        &self.module_id
    }

    pub(crate) fn set_owner(&self, module: &Rc<Module>) {
        *self.owner.borrow_mut() = Rc::downgrade(module);
    }

    /// The module that defined this tag, used for namespace dispatch.
    #[must_use]
    pub fn owner(&self) -> Option<Rc<Module>> {
        self.owner.borrow().upgrade()
    }

    pub fn value(&self) -> Option<Value> {
        self.value.borrow().clone()
    }

    pub(crate) fn set_value(&self, value: Option<Value>) {
        if value.is_some() {
            *self.value.borrow_mut() = value;
        }
    }

    pub fn extends(&self) -> Option<Rc<TagDefinition>> {
        self.extends.borrow().clone()
    }

    pub(crate) fn set_extends(&self, parent: Rc<TagDefinition>) {
        *self.extends.borrow_mut() = Some(parent);
    }

    /// Checks whether this definition's path ends with the given leaf-first
    /// partial path.
    pub fn matches_partial(&self, partial: &[String]) -> bool {
        path_matches_partial(&self.path, partial)
    }

    /// Natural parent: the definition at this tag's path prefix within the
    /// same module.
    fn natural_parent(self: &Rc<Self>) -> Option<Rc<TagDefinition>> {
        let parent = self.parent_path()?;
        self.owner()?.tag_by_path(parent)
    }

    /// Number of hierarchy steps from `self` up to `ancestor`.
    ///
    /// Zero means identity. Walks natural parents first, then follows an
    /// extends edge when the natural chain is exhausted. Returns `None` when
    /// `ancestor` is not reachable.
    pub(crate) fn hierarchy_distance(self: &Rc<Self>, ancestor: &Rc<TagDefinition>) -> Option<u32> {
        let mut current = Rc::clone(self);
        let mut steps = 0u32;
        loop {
            if Rc::ptr_eq(&current, ancestor) {
                return Some(steps);
            }
            let next = current.natural_parent().or_else(|| current.extends());
            match next {
                Some(parent) => {
                    current = parent;
                    steps += 1;
                    // Depth bound: paths are finite but extends edges could
                    // be cyclic across modules.
                    if steps > 64 {
                        return None;
                    }
                }
                None => return None,
            }
        }
    }

    /// Orders tags by leaf name, then by parent names walking up the path.
    pub(crate) fn order(&self, other: &TagDefinition) -> Ordering {
        let mine = self.path.iter().rev();
        let theirs = other.path.iter().rev();
        mine.cmp(theirs)
    }
}

impl fmt::Display for TagDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.full_name())
    }
}

/// Suffix match of a definition-order `path` against a leaf-first `partial`.
pub(crate) fn path_matches_partial(path: &[String], partial: &[String]) -> bool {
    if partial.is_empty() || partial.len() > path.len() {
        return false;
    }
    let tail = &path[path.len() - partial.len()..];
    tail.iter().rev().eq(partial.iter())
}

/// Identity wrapper so tag definitions can key hash maps.
///
/// Equality and hashing go through the allocation pointer; two separately
/// defined tags are never equal even with identical paths.
#[derive(Debug, Clone)]
pub struct TagKey(pub Rc<TagDefinition>);

impl PartialEq for TagKey {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TagKey {}

impl Hash for TagKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::from_ref::<TagDefinition>(&*self.0).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| (*p).to_owned()).collect()
    }

    #[test]
    fn partial_path_matches_suffixes() {
        let full = path(&["status", "error", "timeout"]);
        assert!(path_matches_partial(&full, &path(&["timeout"])));
        assert!(path_matches_partial(&full, &path(&["timeout", "error"])));
        assert!(path_matches_partial(&full, &path(&["timeout", "error", "status"])));
        assert!(!path_matches_partial(&full, &path(&["error"])));
        assert!(!path_matches_partial(&full, &path(&["timeout", "status"])));
        assert!(!path_matches_partial(&full, &path(&[])));
    }

    #[test]
    fn tag_ordering_is_leaf_first() {
        let m = ModuleId::fresh(Some("t"));
        let a = TagDefinition::new(path(&["status", "active"]), m.clone());
        let b = TagDefinition::new(path(&["status", "inactive"]), m.clone());
        assert_eq!(a.order(&b), Ordering::Less);
        let c = TagDefinition::new(path(&["zoo", "active"]), m);
        // Same leaf, parent breaks the tie.
        assert_eq!(a.order(&c), Ordering::Less);
    }
}
