use std::{
    cell::{Cell, OnceCell, RefCell},
    fmt,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    ast::{ModuleAst, Node},
    builtin,
    handle::HandleKind,
    morph::MorphMode,
    shape::{ShapeDefinition, ShapeField},
    tag::{DefPath, TagDefinition},
};

static MODULE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a module, used to key per-module private data on values.
///
/// Counter-derived and unique for the process; an optional human name is
/// folded in for readability of error messages and debug output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleId(Rc<str>);

impl ModuleId {
    pub(crate) fn fresh(name: Option<&str>) -> Self {
        let n = MODULE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let id = match name {
            Some(name) => format!("{name}#{n}"),
            None => format!("#{n}"),
        };
        Self(Rc::from(id.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of definition a reference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum DefKind {
    Tag,
    Shape,
    Function,
    Handle,
}

/// Key into a module's resolution table: definition kind, leaf-first partial
/// path, and the namespace the reference names (None for local-or-anywhere).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ResolveKey {
    pub kind: DefKind,
    pub path: Vec<String>,
    pub namespace: Option<String>,
}

/// What a resolution-table entry points at.
///
/// `Ambiguous` is a sentinel recorded when two definitions contribute the
/// same partial path; looking it up is a build-time error.
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    Tag(Rc<TagDefinition>),
    Shape(Rc<ShapeDefinition>),
    Function(Rc<Vec<Rc<FunctionDefinition>>>),
    Handle(Rc<HandleKind>),
    Ambiguous,
}

/// The executable part of a function definition.
#[derive(Debug, Clone)]
pub enum FunctionBody {
    /// A structure-literal (or other expression) AST evaluated per call.
    Ast(Rc<Node>),
    /// A native function from the builtin module.
    Builtin(builtin::BuiltinFunction),
}

/// One overload of a function.
///
/// Overloads share a path and are told apart at dispatch time by morphing
/// the pipeline input against each overload's input shape.
#[derive(Debug)]
pub struct FunctionDefinition {
    path: DefPath,
    body: FunctionBody,
    /// Input contract; empty cell means any input.
    input_shape: OnceCell<Rc<ShapeDefinition>>,
    /// Argument contract; empty cell means arguments pass through unshaped.
    arg_shape: OnceCell<Rc<ShapeDefinition>>,
    mode: MorphMode,
    is_pure: bool,
    doc: Option<String>,
    module_id: ModuleId,
    owner: RefCell<Weak<Module>>,
}

impl FunctionDefinition {
    pub(crate) fn new(
        path: impl IntoIterator<Item = String>,
        body: FunctionBody,
        mode: MorphMode,
        is_pure: bool,
        doc: Option<String>,
        module_id: ModuleId,
    ) -> Self {
        Self {
            path: path.into_iter().collect(),
            body,
            input_shape: OnceCell::new(),
            arg_shape: OnceCell::new(),
            mode,
            is_pure,
            doc,
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

    pub fn body(&self) -> &FunctionBody {
        &self.body
    }

    pub fn mode(&self) -> MorphMode {
        self.mode
    }

    pub fn is_pure(&self) -> bool {
        self.is_pure
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn module_id(&self) -> &ModuleId {
        &self.module_id
    }

    pub fn input_shape(&self) -> Option<&Rc<ShapeDefinition>> {
        self.input_shape.get()
    }

    pub(crate) fn set_input_shape(&self, shape: Rc<ShapeDefinition>) {
        let _ = self.input_shape.set(shape);
    }

    pub fn arg_shape(&self) -> Option<&Rc<ShapeDefinition>> {
        self.arg_shape.get()
    }

    pub(crate) fn set_arg_shape(&self, shape: Rc<ShapeDefinition>) {
        let _ = self.arg_shape.set(shape);
    }

    pub(crate) fn set_owner(&self, module: &Rc<Module>) {
        *self.owner.borrow_mut() = Rc::downgrade(module);
    }

    #[must_use]
    pub fn owner(&self) -> Option<Rc<Module>> {
        self.owner.borrow().upgrade()
    }

    /// Whether this overload's path ends with the leaf-first partial path.
    pub fn matches_partial(&self, partial: &[String]) -> bool {
        crate::tag::path_matches_partial(&self.path, partial)
    }
}

/// A module: the container of definitions plus namespace edges to other
/// modules.
///
/// All definition registries preserve definition order. A module starts
/// unprepared; [`crate::prepare::prepare`] runs the four preparation phases
/// exactly once, after which definitions are frozen and every AST reference
/// has been rewritten to a direct pointer.
///
/// Every non-builtin module gets a `builtin` namespace edge to the singleton
/// builtin module at construction.
pub struct Module {
    id: ModuleId,
    is_builtin: bool,
    tags: RefCell<IndexMap<String, Rc<TagDefinition>>>,
    shapes: RefCell<IndexMap<String, Rc<ShapeDefinition>>>,
    functions: RefCell<IndexMap<String, Rc<Vec<Rc<FunctionDefinition>>>>>,
    handles: RefCell<IndexMap<String, Rc<HandleKind>>>,
    namespaces: RefCell<IndexMap<String, Rc<Module>>>,
    resolution: RefCell<AHashMap<ResolveKey, Resolution>>,
    prepared: Cell<bool>,
    ast: RefCell<Option<Rc<ModuleAst>>>,
}

impl Module {
    /// Creates a module with an optional human-readable name.
    #[must_use]
    pub fn new(name: Option<&str>) -> Rc<Self> {
        let module = Rc::new(Self {
            id: ModuleId::fresh(name),
            is_builtin: false,
            tags: RefCell::new(IndexMap::new()),
            shapes: RefCell::new(IndexMap::new()),
            functions: RefCell::new(IndexMap::new()),
            handles: RefCell::new(IndexMap::new()),
            namespaces: RefCell::new(IndexMap::new()),
            resolution: RefCell::new(AHashMap::new()),
            prepared: Cell::new(false),
            ast: RefCell::new(None),
        });
        module
            .namespaces
            .borrow_mut()
            .insert("builtin".to_owned(), builtin::builtin_module());
        module
    }

    /// Used only to build the builtin singleton itself, which carries no
    /// implicit namespace edge.
    pub(crate) fn new_builtin() -> Rc<Self> {
        Rc::new(Self {
            id: ModuleId::fresh(Some("builtin")),
            is_builtin: true,
            tags: RefCell::new(IndexMap::new()),
            shapes: RefCell::new(IndexMap::new()),
            functions: RefCell::new(IndexMap::new()),
            handles: RefCell::new(IndexMap::new()),
            namespaces: RefCell::new(IndexMap::new()),
            resolution: RefCell::new(AHashMap::new()),
            prepared: Cell::new(false),
            ast: RefCell::new(None),
        })
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn is_builtin(&self) -> bool {
        self.is_builtin
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.get()
    }

    pub(crate) fn mark_prepared(&self) {
        self.prepared.set(true);
    }

    pub(crate) fn set_ast(&self, ast: Rc<ModuleAst>) {
        *self.ast.borrow_mut() = Some(ast);
    }

    /// The AST this module was prepared from, if any.
    pub fn ast(&self) -> Option<Rc<ModuleAst>> {
        self.ast.borrow().clone()
    }

    /// Registers a tag definition, merging with an existing definition of
    /// the same path (the path never changes; a provided value wins).
    pub fn define_tag(self: &Rc<Self>, path: &[String]) -> Rc<TagDefinition> {
        debug_assert!(!self.prepared.get(), "definitions are frozen after prepare");
        let full = path.join(".");
        let mut tags = self.tags.borrow_mut();
        if let Some(existing) = tags.get(&full) {
            return Rc::clone(existing);
        }
        let def = Rc::new(TagDefinition::new(path.iter().cloned(), self.id.clone()));
        def.set_owner(self);
        tags.insert(full, Rc::clone(&def));
        def
    }

    /// Registers a shape definition, replacing any previous fields for the
    /// same path.
    pub fn define_shape(
        self: &Rc<Self>,
        path: &[String],
        fields: Vec<ShapeField>,
    ) -> Rc<ShapeDefinition> {
        debug_assert!(!self.prepared.get(), "definitions are frozen after prepare");
        let full = path.join(".");
        let mut shapes = self.shapes.borrow_mut();
        if let Some(existing) = shapes.get(&full) {
            existing.replace_fields(fields);
            return Rc::clone(existing);
        }
        let def = Rc::new(ShapeDefinition::new(path.iter().cloned(), fields, self.id.clone()));
        shapes.insert(full, Rc::clone(&def));
        def
    }

    /// Registers a union shape definition.
    pub fn define_union_shape(self: &Rc<Self>, path: &[String]) -> Rc<ShapeDefinition> {
        debug_assert!(!self.prepared.get(), "definitions are frozen after prepare");
        let full = path.join(".");
        let def = Rc::new(ShapeDefinition::new_union(path.iter().cloned(), self.id.clone()));
        self.shapes.borrow_mut().insert(full, Rc::clone(&def));
        def
    }

    /// Registers a function overload; repeated paths accumulate.
    pub fn define_function(self: &Rc<Self>, def: FunctionDefinition) -> Rc<FunctionDefinition> {
        debug_assert!(!self.prepared.get(), "definitions are frozen after prepare");
        let full = def.full_name();
        let def = Rc::new(def);
        def.set_owner(self);
        let mut functions = self.functions.borrow_mut();
        let overloads = functions.entry(full).or_insert_with(|| Rc::new(Vec::new()));
        Rc::make_mut(overloads).push(Rc::clone(&def));
        def
    }

    /// Registers a handle kind, merging with an existing kind of the same
    /// path.
    pub fn define_handle(self: &Rc<Self>, path: &[String]) -> Rc<HandleKind> {
        debug_assert!(!self.prepared.get(), "definitions are frozen after prepare");
        let full = path.join(".");
        let mut handles = self.handles.borrow_mut();
        if let Some(existing) = handles.get(&full) {
            return Rc::clone(existing);
        }
        let def = Rc::new(HandleKind::new(path.iter().cloned(), self.id.clone()));
        def.set_owner(self);
        handles.insert(full, Rc::clone(&def));
        def
    }

    /// Adds a namespace edge to another module.
    pub fn add_namespace(&self, name: &str, module: Rc<Module>) {
        self.namespaces.borrow_mut().insert(name.to_owned(), module);
    }

    pub fn namespace(&self, name: &str) -> Option<Rc<Module>> {
        self.namespaces.borrow().get(name).cloned()
    }

    /// Tag definition at an exact definition-order path.
    pub fn tag_by_path(&self, path: &[String]) -> Option<Rc<TagDefinition>> {
        self.tags.borrow().get(&path.join(".")).cloned()
    }

    pub fn shape_by_path(&self, path: &[String]) -> Option<Rc<ShapeDefinition>> {
        self.shapes.borrow().get(&path.join(".")).cloned()
    }

    pub fn handle_by_path(&self, path: &[String]) -> Option<Rc<HandleKind>> {
        self.handles.borrow().get(&path.join(".")).cloned()
    }

    pub fn function_overloads(&self, full_name: &str) -> Option<Rc<Vec<Rc<FunctionDefinition>>>> {
        self.functions.borrow().get(full_name).cloned()
    }

    pub(crate) fn tags(&self) -> Vec<(String, Rc<TagDefinition>)> {
        self.tags
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), Rc::clone(v)))
            .collect()
    }

    pub(crate) fn shapes(&self) -> Vec<(String, Rc<ShapeDefinition>)> {
        self.shapes
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), Rc::clone(v)))
            .collect()
    }

    pub(crate) fn functions(&self) -> Vec<(String, Rc<Vec<Rc<FunctionDefinition>>>)> {
        self.functions
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), Rc::clone(v)))
            .collect()
    }

    pub(crate) fn handles(&self) -> Vec<(String, Rc<HandleKind>)> {
        self.handles
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), Rc::clone(v)))
            .collect()
    }

    pub(crate) fn namespaces_snapshot(&self) -> Vec<(String, Rc<Module>)> {
        self.namespaces
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), Rc::clone(v)))
            .collect()
    }

    pub(crate) fn set_resolution(&self, table: AHashMap<ResolveKey, Resolution>) {
        *self.resolution.borrow_mut() = table;
    }

    pub(crate) fn lookup_resolution(&self, key: &ResolveKey) -> Option<Resolution> {
        self.resolution.borrow().get(key).cloned()
    }

    /// Resolves a tag reference the way prepared code does: leaf-first
    /// partial path, optional namespace. Exposed for hosts and tests.
    pub fn resolve_tag(&self, partial: &[&str], namespace: Option<&str>) -> Option<Rc<TagDefinition>> {
        let key = ResolveKey {
            kind: DefKind::Tag,
            path: partial.iter().map(|s| (*s).to_owned()).collect(),
            namespace: namespace.map(ToOwned::to_owned),
        };
        match self.lookup_resolution(&key) {
            Some(Resolution::Tag(definition)) => Some(definition),
            _ => None,
        }
    }

    /// Resolves a shape reference by leaf-first partial path.
    pub fn resolve_shape(&self, partial: &[&str], namespace: Option<&str>) -> Option<Rc<ShapeDefinition>> {
        let key = ResolveKey {
            kind: DefKind::Shape,
            path: partial.iter().map(|s| (*s).to_owned()).collect(),
            namespace: namespace.map(ToOwned::to_owned),
        };
        match self.lookup_resolution(&key) {
            Some(Resolution::Shape(definition)) => Some(definition),
            _ => None,
        }
    }

    /// Resolves a function's overload set by leaf-first partial path.
    pub fn resolve_function(
        &self,
        partial: &[&str],
        namespace: Option<&str>,
    ) -> Option<Rc<Vec<Rc<FunctionDefinition>>>> {
        let key = ResolveKey {
            kind: DefKind::Function,
            path: partial.iter().map(|s| (*s).to_owned()).collect(),
            namespace: namespace.map(ToOwned::to_owned),
        };
        match self.lookup_resolution(&key) {
            Some(Resolution::Function(overloads)) => Some(overloads),
            _ => None,
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("is_builtin", &self.is_builtin)
            .field("tags", &self.tags.borrow().len())
            .field("shapes", &self.shapes.borrow().len())
            .field("functions", &self.functions.borrow().len())
            .field("handles", &self.handles.borrow().len())
            .field("namespaces", &self.namespaces.borrow().len())
            .field("prepared", &self.prepared.get())
            .finish()
    }
}
