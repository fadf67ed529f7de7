use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use crate::{
    ast::Node,
    module::{Module, ModuleId},
    tag::{DefPath, path_matches_partial},
    value::Value,
};

/// A handle kind declared by a module (`!handle @file`).
///
/// Kinds form a path hierarchy like tags: `@file.readonly` is a child of
/// `@file` and satisfies shape fields typed with the parent kind.
#[derive(Debug)]
pub struct HandleKind {
    path: DefPath,
    /// Drop block body, run when an instance of this kind is dropped.
    drop_block: RefCell<Option<Rc<Node>>>,
    module_id: ModuleId,
    owner: RefCell<Weak<Module>>,
}

impl HandleKind {
    pub(crate) fn new(path: impl IntoIterator<Item = String>, module_id: ModuleId) -> Self {
        Self {
            path: path.into_iter().collect(),
            drop_block: RefCell::new(None),
            module_id,
            owner: RefCell::new(Weak::new()),
        }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        self.path.join(".")
    }

    pub fn module_id(&self) -> &ModuleId {
        &self.module_id
    }

    pub(crate) fn set_owner(&self, module: &Rc<Module>) {
        *self.owner.borrow_mut() = Rc::downgrade(module);
    }

    /// The module that declared this kind, used for namespace dispatch.
    #[must_use]
    pub fn owner(&self) -> Option<Rc<Module>> {
        self.owner.borrow().upgrade()
    }

    pub(crate) fn drop_block(&self) -> Option<Rc<Node>> {
        self.drop_block.borrow().clone()
    }

    pub(crate) fn set_drop_block(&self, body: Rc<Node>) {
        *self.drop_block.borrow_mut() = Some(body);
    }

    /// Whether this kind's path ends with the leaf-first partial path.
    pub fn matches_partial(&self, partial: &[String]) -> bool {
        path_matches_partial(&self.path, partial)
    }

    /// Hierarchy steps from `self` up to `ancestor`; zero means the same
    /// kind. Kinds only relate within their declaring module.
    pub(crate) fn hierarchy_distance(self: &Rc<Self>, ancestor: &Rc<HandleKind>) -> Option<u32> {
        if Rc::ptr_eq(self, ancestor) {
            return Some(0);
        }
        if self.module_id != ancestor.module_id {
            return None;
        }
        let prefix = ancestor.path.as_slice();
        if self.path.len() > prefix.len() && self.path.starts_with(prefix) {
            return u32::try_from(self.path.len() - prefix.len()).ok();
        }
        None
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.full_name())
    }
}

/// A live handle produced by `!grab`.
///
/// Instances compare by identity and are never equal to one another. The
/// released flag is monotonic: once set it never clears, and a released
/// instance fails morphs against handle-typed fields.
#[derive(Debug)]
pub struct HandleInstance {
    kind: Rc<HandleKind>,
    owner_module: ModuleId,
    released: Cell<bool>,
    /// Private world state, replaced wholesale by handle operations.
    data: RefCell<Value>,
}

impl HandleInstance {
    pub(crate) fn grab(kind: Rc<HandleKind>) -> Self {
        let owner_module = kind.module_id().clone();
        Self {
            kind,
            owner_module,
            released: Cell::new(false),
            data: RefCell::new(Value::empty()),
        }
    }

    pub fn kind(&self) -> &Rc<HandleKind> {
        &self.kind
    }

    pub fn owner_module(&self) -> &ModuleId {
        &self.owner_module
    }

    pub fn is_released(&self) -> bool {
        self.released.get()
    }

    /// Marks the instance released. Returns true on the first call only, so
    /// callers can gate the drop block on the transition.
    pub(crate) fn release(&self) -> bool {
        !self.released.replace(true)
    }

    pub fn data(&self) -> Value {
        self.data.borrow().clone()
    }

    pub fn set_data(&self, value: Value) {
        *self.data.borrow_mut() = value;
    }
}

impl fmt::Display for HandleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_released() {
            write!(f, "@{}(released)", self.kind.full_name())
        } else {
            write!(f, "@{}", self.kind.full_name())
        }
    }
}
