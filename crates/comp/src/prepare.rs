//! Module preparation: create definitions, build the resolution table,
//! pre-resolve every reference, then evaluate definition bodies.
//!
//! Preparation runs once per module and is monotonic: re-preparing is a
//! no-op and definitions never change afterwards. Reference resolution
//! problems are build-time errors; nothing here produces failure values.

use std::{fmt, rc::Rc};

use ahash::AHashMap;

use crate::{
    ast::{
        Decl, FieldOpNode, FieldSeg, FuncNamespace, FuncRefNode, HandleRefNode, IndexSeg, ModuleAst, Node, NodeKind,
        PipeOp, ShapeBody, ShapeDecl, ShapeFieldDecl, ShapeRefNode, TagDecl, TagRefNode, TypeRef,
    },
    engine::{Engine, Scopes},
    io::NoPrint,
    module::{DefKind, FunctionBody, FunctionDefinition, Module, Resolution, ResolveKey},
    shape::{FieldConstraint, ShapeDefinition, ShapeField},
    tracer::NoopTracer,
    value::Value,
};

/// Build-time preparation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareError {
    /// No definition matches the reference.
    Undefined { kind: DefKind, path: String },
    /// More than one definition matches the reference.
    Ambiguous { kind: DefKind, path: String },
    /// An import names a module the registry does not know.
    UnknownImport { source: String },
    /// A shape's spread expansion loops back into itself.
    ShapeCycle { path: String },
    /// A definition body (tag value, field default) failed to evaluate.
    DefinitionBody { path: String, message: String },
}

impl fmt::Display for PrepareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined { kind, path } => write!(f, "Undefined {kind} reference: {path}"),
            Self::Ambiguous { kind, path } => write!(f, "Ambiguous {kind} reference: {path}"),
            Self::UnknownImport { source } => write!(f, "Unknown import source: {source}"),
            Self::ShapeCycle { path } => write!(f, "Shape cycle without union break: {path}"),
            Self::DefinitionBody { path, message } => {
                write!(f, "Definition body of {path} failed: {message}")
            }
        }
    }
}

impl std::error::Error for PrepareError {}

/// Host-side registry resolving import sources to modules.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: AHashMap<String, Rc<Module>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: &str, module: Rc<Module>) {
        self.modules.insert(source.to_owned(), module);
    }

    fn get(&self, source: &str) -> Option<Rc<Module>> {
        self.modules.get(source).cloned()
    }
}

/// Prepares `module` from its AST.
///
/// Runs the four phases in order; a prepared module returns `Ok` without
/// doing anything.
pub fn prepare(module: &Rc<Module>, ast: ModuleAst, registry: &ModuleRegistry) -> Result<(), PrepareError> {
    if module.is_prepared() {
        return Ok(());
    }
    let ast = Rc::new(ast);
    module.set_ast(Rc::clone(&ast));

    create_definitions(module, &ast, registry)?;
    build_resolution_table(module);

    let mut preparer = Preparer {
        module: Rc::clone(module),
        inline_refs: Vec::new(),
        building: Vec::new(),
    };
    preparer.resolve_references(&ast)?;
    preparer.evaluate_bodies(&ast)?;

    module.mark_prepared();
    Ok(())
}

/// Pre-resolves the references of a standalone expression against a
/// prepared module.
///
/// Hosts evaluating ad-hoc expressions (a REPL line, a test probe) call
/// this before [`crate::evaluate`]; expressions inside a module's AST are
/// resolved by [`prepare`] itself.
pub fn resolve_expr(module: &Rc<Module>, node: &Rc<Node>) -> Result<(), PrepareError> {
    let mut preparer = Preparer {
        module: Rc::clone(module),
        inline_refs: Vec::new(),
        building: Vec::new(),
    };
    preparer.walk_expr(node)?;
    let pending = std::mem::take(&mut preparer.inline_refs);
    let empty = ModuleAst { statements: Vec::new() };
    for reference in pending {
        let ShapeRefNode::Inline { fields, .. } = &*reference else {
            continue;
        };
        let definition = Rc::clone(reference.resolved().expect("inline shape materialized"));
        if definition.fields_built() {
            continue;
        }
        let built = preparer.build_fields(fields, &empty)?;
        definition.replace_fields(built);
    }
    Ok(())
}

// --- phase 1: create definitions -----------------------------------------

fn create_definitions(module: &Rc<Module>, ast: &ModuleAst, registry: &ModuleRegistry) -> Result<(), PrepareError> {
    for statement in &ast.statements {
        match statement {
            Decl::Tag(tag) => create_tag(module, &[], tag),
            Decl::Shape(shape) => match &shape.body {
                ShapeBody::Fields(_) => {
                    module.define_shape(&shape.path, Vec::new());
                }
                ShapeBody::Union(_) => {
                    module.define_union_shape(&shape.path);
                }
            },
            Decl::Func(func) => {
                module.define_function(FunctionDefinition::new(
                    func.path.iter().cloned(),
                    FunctionBody::Ast(Rc::clone(&func.body)),
                    func.mode,
                    func.is_pure,
                    func.doc.clone(),
                    module.id().clone(),
                ));
            }
            Decl::Handle(handle) => {
                module.define_handle(&handle.path);
            }
            Decl::Import(import) => {
                let Some(imported) = registry.get(&import.source) else {
                    return Err(PrepareError::UnknownImport {
                        source: import.source.clone(),
                    });
                };
                module.add_namespace(&import.namespace, imported);
            }
        }
    }
    Ok(())
}

fn create_tag(module: &Rc<Module>, parent: &[String], decl: &TagDecl) {
    let mut path = parent.to_vec();
    path.extend(decl.path.iter().cloned());
    module.define_tag(&path);
    for child in &decl.children {
        create_tag(module, &path, child);
    }
}

// --- phase 3: the resolution table ---------------------------------------

#[derive(Clone, PartialEq, Eq)]
enum Source {
    Local,
    Namespace,
}

/// Builds the `(kind, partial path, namespace) -> definition` table from
/// every suffix of every definition path, locally and per namespace. A
/// local entry shadows namespace contributions on the empty-namespace key;
/// any other collision marks the sentinel.
pub(crate) fn build_resolution_table(module: &Rc<Module>) {
    let mut table: AHashMap<ResolveKey, (Source, Resolution)> = AHashMap::new();

    let mut add = |key: ResolveKey, source: Source, resolution: Resolution| {
        use std::collections::hash_map::Entry;
        match table.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert((source, resolution));
            }
            Entry::Occupied(mut slot) => {
                let (existing, _) = slot.get();
                if *existing == Source::Local && source == Source::Namespace {
                    return; // shadowed by the local definition
                }
                let keep = slot.get().0.clone();
                slot.insert((keep, Resolution::Ambiguous));
            }
        }
    };

    contribute_definitions(module, None, &mut add);
    for (name, imported) in module.namespaces_snapshot() {
        contribute_definitions(&imported, Some(&name), &mut add);
    }

    module.set_resolution(table.into_iter().map(|(key, (_, resolution))| (key, resolution)).collect());
}

/// Registers every suffix of every definition of `module` with `add`, under
/// the namespace keys the contribution is visible through.
fn contribute_definitions(
    module: &Rc<Module>,
    namespace: Option<&str>,
    add: &mut dyn FnMut(ResolveKey, Source, Resolution),
) {
    let source = if namespace.is_some() { Source::Namespace } else { Source::Local };
    for (_, definition) in module.tags() {
        for partial in suffix_keys(definition.path()) {
            for namespace_key in namespace_keys(namespace) {
                add(
                    ResolveKey {
                        kind: DefKind::Tag,
                        path: partial.clone(),
                        namespace: namespace_key,
                    },
                    source.clone(),
                    Resolution::Tag(Rc::clone(&definition)),
                );
            }
        }
    }
    for (_, definition) in module.shapes() {
        for partial in suffix_keys(definition.path()) {
            for namespace_key in namespace_keys(namespace) {
                add(
                    ResolveKey {
                        kind: DefKind::Shape,
                        path: partial.clone(),
                        namespace: namespace_key,
                    },
                    source.clone(),
                    Resolution::Shape(Rc::clone(&definition)),
                );
            }
        }
    }
    for (_, overloads) in module.functions() {
        let Some(first) = overloads.first() else { continue };
        for partial in suffix_keys(first.path()) {
            for namespace_key in namespace_keys(namespace) {
                add(
                    ResolveKey {
                        kind: DefKind::Function,
                        path: partial.clone(),
                        namespace: namespace_key,
                    },
                    source.clone(),
                    Resolution::Function(Rc::clone(&overloads)),
                );
            }
        }
    }
    for (_, definition) in module.handles() {
        for partial in suffix_keys(definition.path()) {
            for namespace_key in namespace_keys(namespace) {
                add(
                    ResolveKey {
                        kind: DefKind::Handle,
                        path: partial.clone(),
                        namespace: namespace_key,
                    },
                    source.clone(),
                    Resolution::Handle(Rc::clone(&definition)),
                );
            }
        }
    }
}

/// Every leaf-first suffix of a definition-order path.
fn suffix_keys(path: &[String]) -> Vec<Vec<String>> {
    (1..=path.len())
        .map(|len| path[path.len() - len..].iter().rev().cloned().collect())
        .collect()
}

/// A namespace contribution registers under its own name and the empty
/// namespace; local definitions register under the empty namespace only.
fn namespace_keys(namespace: Option<&str>) -> Vec<Option<String>> {
    match namespace {
        None => vec![None],
        Some(name) => vec![Some(name.to_owned()), None],
    }
}

// --- phases 4 and 2: reference resolution and definition bodies ----------

struct Preparer {
    module: Rc<Module>,
    /// Inline/union shape references whose anonymous definitions still need
    /// their field lists built.
    inline_refs: Vec<Rc<ShapeRefNode>>,
    /// Stack of shape names being built, for spread-cycle detection.
    building: Vec<String>,
}

impl Preparer {
    fn resolve_references(&mut self, ast: &ModuleAst) -> Result<(), PrepareError> {
        for statement in &ast.statements {
            match statement {
                Decl::Tag(tag) => self.resolve_tag_decl(tag)?,
                Decl::Shape(shape) => match &shape.body {
                    ShapeBody::Fields(fields) => {
                        for field in fields {
                            self.resolve_field_decl(field)?;
                        }
                    }
                    ShapeBody::Union(members) => {
                        for member in members {
                            self.resolve_shape_ref(member)?;
                        }
                    }
                },
                Decl::Func(func) => {
                    if let Some(shape) = &func.input_shape {
                        self.resolve_shape_ref(shape)?;
                    }
                    if let Some(shape) = &func.arg_shape {
                        self.resolve_shape_ref(shape)?;
                    }
                    self.walk_expr(&func.body)?;
                }
                Decl::Handle(handle) => {
                    if let Some(block) = &handle.drop_block {
                        self.walk_expr(block)?;
                    }
                }
                Decl::Import(_) => {}
            }
        }
        Ok(())
    }

    fn resolve_tag_decl(&mut self, decl: &TagDecl) -> Result<(), PrepareError> {
        if let Some(value) = &decl.value {
            self.walk_expr(value)?;
        }
        if let Some(extends) = &decl.extends {
            self.resolve_tag_ref(extends)?;
        }
        for child in &decl.children {
            self.resolve_tag_decl(child)?;
        }
        Ok(())
    }

    fn resolve_field_decl(&mut self, field: &ShapeFieldDecl) -> Result<(), PrepareError> {
        match &field.constraint {
            Some(TypeRef::Shape(shape)) => self.resolve_shape_ref(shape)?,
            Some(TypeRef::Tag(tag)) => self.resolve_tag_ref(tag)?,
            Some(TypeRef::Handle(handle)) => self.resolve_handle_ref(handle)?,
            None => {}
        }
        if let Some(default) = &field.default {
            self.walk_expr(default)?;
        }
        Ok(())
    }

    fn resolve_tag_ref(&self, reference: &TagRefNode) -> Result<(), PrepareError> {
        if reference.resolved().is_some() {
            return Ok(());
        }
        let key = ResolveKey {
            kind: DefKind::Tag,
            path: reference.path.clone(),
            namespace: reference.namespace.clone(),
        };
        match self.module.lookup_resolution(&key) {
            Some(Resolution::Tag(definition)) => {
                reference.resolve(definition);
                Ok(())
            }
            Some(Resolution::Ambiguous) => Err(PrepareError::Ambiguous {
                kind: DefKind::Tag,
                path: reference.display_path(),
            }),
            _ => Err(PrepareError::Undefined {
                kind: DefKind::Tag,
                path: reference.display_path(),
            }),
        }
    }

    fn resolve_handle_ref(&self, reference: &HandleRefNode) -> Result<(), PrepareError> {
        if reference.resolved().is_some() {
            return Ok(());
        }
        let key = ResolveKey {
            kind: DefKind::Handle,
            path: reference.path.clone(),
            namespace: reference.namespace.clone(),
        };
        match self.module.lookup_resolution(&key) {
            Some(Resolution::Handle(definition)) => {
                reference.resolve(definition);
                Ok(())
            }
            Some(Resolution::Ambiguous) => Err(PrepareError::Ambiguous {
                kind: DefKind::Handle,
                path: reference.display_path(),
            }),
            _ => Err(PrepareError::Undefined {
                kind: DefKind::Handle,
                path: reference.display_path(),
            }),
        }
    }

    fn resolve_func_ref(&self, reference: &FuncRefNode, namespace: Option<&str>) -> Result<(), PrepareError> {
        if reference.resolved().is_some() {
            return Ok(());
        }
        let key = ResolveKey {
            kind: DefKind::Function,
            path: reference.path.clone(),
            namespace: namespace.map(ToOwned::to_owned),
        };
        match self.module.lookup_resolution(&key) {
            Some(Resolution::Function(overloads)) => {
                reference.resolve(overloads);
                Ok(())
            }
            Some(Resolution::Ambiguous) => Err(PrepareError::Ambiguous {
                kind: DefKind::Function,
                path: reference.display_path(),
            }),
            _ => Err(PrepareError::Undefined {
                kind: DefKind::Function,
                path: reference.display_path(),
            }),
        }
    }

    fn resolve_shape_ref(&mut self, reference: &Rc<ShapeRefNode>) -> Result<(), PrepareError> {
        if reference.resolved().is_some() {
            return Ok(());
        }
        match &**reference {
            ShapeRefNode::Named { path, namespace, .. } => {
                let key = ResolveKey {
                    kind: DefKind::Shape,
                    path: path.clone(),
                    namespace: namespace.clone(),
                };
                match self.module.lookup_resolution(&key) {
                    Some(Resolution::Shape(definition)) => {
                        reference.resolve(definition);
                        Ok(())
                    }
                    Some(Resolution::Ambiguous) => Err(PrepareError::Ambiguous {
                        kind: DefKind::Shape,
                        path: reference.display_path(),
                    }),
                    _ => Err(PrepareError::Undefined {
                        kind: DefKind::Shape,
                        path: reference.display_path(),
                    }),
                }
            }
            ShapeRefNode::Inline { fields, .. } => {
                for field in fields {
                    self.resolve_field_decl(field)?;
                }
                let definition = Rc::new(ShapeDefinition::new(
                    Vec::new(),
                    Vec::new(),
                    self.module.id().clone(),
                ));
                reference.resolve(definition);
                self.inline_refs.push(Rc::clone(reference));
                Ok(())
            }
            ShapeRefNode::Union { members, .. } => {
                let mut resolved = Vec::with_capacity(members.len());
                for member in members {
                    self.resolve_shape_ref(member)?;
                    resolved.push(Rc::clone(member.resolved().expect("member just resolved")));
                }
                let definition = Rc::new(ShapeDefinition::new_union(
                    Vec::new(),
                    self.module.id().clone(),
                ));
                definition.set_union_members(resolved);
                reference.resolve(definition);
                Ok(())
            }
        }
    }

    fn walk_expr(&mut self, node: &Rc<Node>) -> Result<(), PrepareError> {
        match &node.kind {
            NodeKind::Number(_) | NodeKind::String(_) | NodeKind::Placeholder => Ok(()),
            NodeKind::Identifier(segs) => {
                for seg in segs {
                    match seg {
                        FieldSeg::Compute(expr) | FieldSeg::Index(IndexSeg::Computed(expr)) => {
                            self.walk_expr(expr)?;
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
            NodeKind::Arithmetic { left, right, .. }
            | NodeKind::Comparison { left, right, .. }
            | NodeKind::Boolean { left, right, .. }
            | NodeKind::Fallback { left, right } => {
                self.walk_expr(left)?;
                self.walk_expr(right)
            }
            NodeKind::Unary { operand, .. } => self.walk_expr(operand),
            NodeKind::Morph { expr, shape, .. } | NodeKind::Mask { expr, shape, .. } => {
                self.walk_expr(expr)?;
                self.resolve_shape_ref(shape)
            }
            NodeKind::Structure(ops) => {
                for op in ops {
                    match op {
                        FieldOpNode::Field { key, value } => {
                            if let Some(segs) = key {
                                for seg in segs {
                                    match seg {
                                        FieldSeg::Compute(expr) | FieldSeg::Index(IndexSeg::Computed(expr)) => {
                                            self.walk_expr(expr)?;
                                        }
                                        _ => {}
                                    }
                                }
                            }
                            self.walk_expr(value)?;
                        }
                        FieldOpNode::Spread(expr) => self.walk_expr(expr)?,
                    }
                }
                Ok(())
            }
            NodeKind::Pipeline { seed, ops } => {
                if let Some(seed) = seed {
                    self.walk_expr(seed)?;
                }
                for op in ops {
                    match op {
                        PipeOp::Func(func) => {
                            match &func.func.namespace {
                                FuncNamespace::Local => self.resolve_func_ref(&func.func, None)?,
                                FuncNamespace::Static(name) => self.resolve_func_ref(&func.func, Some(name))?,
                                FuncNamespace::Dynamic(selector) => self.walk_expr(selector)?,
                            }
                            if let Some(args) = &func.args {
                                self.walk_expr(args)?;
                            }
                        }
                        PipeOp::Struct(expr) | PipeOp::Block(expr) | PipeOp::Fallback(expr) => {
                            self.walk_expr(expr)?;
                        }
                    }
                }
                Ok(())
            }
            NodeKind::Block(body) => self.walk_expr(body),
            NodeKind::TagValue(tag) => self.resolve_tag_ref(tag),
            NodeKind::Grab(handle) => self.resolve_handle_ref(handle),
            NodeKind::Drop(expr) => self.walk_expr(expr),
        }
    }

    // --- definition bodies ------------------------------------------------

    fn evaluate_bodies(&mut self, ast: &ModuleAst) -> Result<(), PrepareError> {
        for statement in &ast.statements {
            match statement {
                Decl::Tag(tag) => self.evaluate_tag_decl(&[], tag)?,
                Decl::Shape(shape) => match &shape.body {
                    ShapeBody::Fields(_) => {
                        self.ensure_shape_fields(&shape.path.join("."), ast)?;
                    }
                    ShapeBody::Union(members) => {
                        let definition = self
                            .module
                            .shape_by_path(&shape.path)
                            .expect("union shape defined in phase 1");
                        let resolved = members
                            .iter()
                            .map(|member| Rc::clone(member.resolved().expect("resolved in phase 4")))
                            .collect();
                        definition.set_union_members(resolved);
                    }
                },
                Decl::Func(func) => {
                    let overloads = self
                        .module
                        .function_overloads(&func.path.join("."))
                        .expect("function defined in phase 1");
                    // Several overloads share the path; match this declaration
                    // by body identity.
                    let definition = overloads
                        .iter()
                        .find(|overload| {
                            matches!(overload.body(), FunctionBody::Ast(body) if Rc::ptr_eq(body, &func.body))
                        })
                        .cloned()
                        .expect("declaration registered its overload");
                    if let Some(shape) = &func.input_shape {
                        definition.set_input_shape(Rc::clone(shape.resolved().expect("resolved in phase 4")));
                    }
                    if let Some(shape) = &func.arg_shape {
                        definition.set_arg_shape(Rc::clone(shape.resolved().expect("resolved in phase 4")));
                    }
                }
                Decl::Handle(handle) => {
                    if let Some(block) = &handle.drop_block {
                        let definition = self
                            .module
                            .handle_by_path(&handle.path)
                            .expect("handle defined in phase 1");
                        let body = match &block.kind {
                            NodeKind::Block(inner) => Rc::clone(inner),
                            _ => Rc::clone(block),
                        };
                        definition.set_drop_block(body);
                    }
                }
                Decl::Import(_) => {}
            }
        }

        let pending = std::mem::take(&mut self.inline_refs);
        for reference in pending {
            let ShapeRefNode::Inline { fields, .. } = &*reference else {
                continue;
            };
            let definition = Rc::clone(reference.resolved().expect("inline shape materialized"));
            if definition.fields_built() {
                continue;
            }
            let built = self.build_fields(fields, ast)?;
            definition.replace_fields(built);
        }
        Ok(())
    }

    fn evaluate_tag_decl(&mut self, parent: &[String], decl: &TagDecl) -> Result<(), PrepareError> {
        let mut path = parent.to_vec();
        path.extend(decl.path.iter().cloned());
        let definition = self.module.tag_by_path(&path).expect("tag defined in phase 1");
        if let Some(value) = &decl.value {
            let evaluated = self.eval_expr(value, &path.join("."))?;
            definition.set_value(Some(evaluated));
        }
        if let Some(extends) = &decl.extends {
            definition.set_extends(Rc::clone(extends.resolved().expect("resolved in phase 4")));
        }
        for child in &decl.children {
            self.evaluate_tag_decl(&path, child)?;
        }
        Ok(())
    }

    /// Builds a named shape's field list, expanding spreads; recursion
    /// through spreads in the same module is driven on demand, with the
    /// `building` stack catching cycles.
    fn ensure_shape_fields(&mut self, full_name: &str, ast: &ModuleAst) -> Result<(), PrepareError> {
        let path: Vec<String> = full_name.split('.').map(ToOwned::to_owned).collect();
        let definition = self
            .module
            .shape_by_path(&path)
            .expect("shape defined in phase 1");
        if definition.fields_built() {
            return Ok(());
        }
        if self.building.iter().any(|name| name == full_name) {
            return Err(PrepareError::ShapeCycle {
                path: full_name.to_owned(),
            });
        }
        let Some(decl) = find_shape_decl(ast, full_name) else {
            // Defined programmatically without a declaration; nothing to build.
            definition.replace_fields(Vec::new());
            return Ok(());
        };
        let ShapeBody::Fields(field_decls) = &decl.body else {
            return Ok(());
        };
        self.building.push(full_name.to_owned());
        let built = self.build_fields(field_decls, ast);
        self.building.pop();
        definition.replace_fields(built?);
        Ok(())
    }

    fn build_fields(&mut self, decls: &[ShapeFieldDecl], ast: &ModuleAst) -> Result<Vec<ShapeField>, PrepareError> {
        let mut fields = Vec::with_capacity(decls.len());
        for decl in decls {
            if decl.is_spread {
                let Some(TypeRef::Shape(reference)) = &decl.constraint else {
                    continue;
                };
                let target = Rc::clone(reference.resolved().expect("resolved in phase 4"));
                if !target.fields_built() {
                    if *target.module_id() == *self.module.id() {
                        self.ensure_shape_fields(&target.full_name(), ast)?;
                    } else {
                        return Err(PrepareError::ShapeCycle {
                            path: target.full_name(),
                        });
                    }
                }
                fields.extend(target.fields().iter().cloned());
                continue;
            }
            let constraint = match &decl.constraint {
                None => FieldConstraint::Any,
                Some(TypeRef::Shape(shape)) => FieldConstraint::Shape(Rc::clone(shape)),
                Some(TypeRef::Tag(tag)) => FieldConstraint::Tag(Rc::clone(tag)),
                Some(TypeRef::Handle(handle)) => FieldConstraint::Handle(Rc::clone(handle)),
            };
            let default = match &decl.default {
                Some(expr) => {
                    let describe = decl.name.clone().unwrap_or_else(|| "positional field".to_owned());
                    Some(self.eval_expr(expr, &describe)?)
                }
                None => None,
            };
            let mut field = ShapeField::new(decl.name.as_deref(), constraint, default);
            if decl.is_array {
                field = field.array(decl.array_min, decl.array_max);
            }
            fields.push(field);
        }
        Ok(fields)
    }

    /// Evaluates a definition body in a minimal frame: the module is
    /// visible, no scopes are bound, and output is suppressed.
    fn eval_expr(&self, node: &Rc<Node>, path: &str) -> Result<Value, PrepareError> {
        let mut print = NoPrint;
        let mut tracer = NoopTracer;
        let result = Engine::new(&mut print, &mut tracer).run(&self.module, node, Scopes::new());
        if result.is_fail() {
            return Err(PrepareError::DefinitionBody {
                path: path.to_owned(),
                message: format!("{result}"),
            });
        }
        Ok(result)
    }
}

fn find_shape_decl<'a>(ast: &'a ModuleAst, full_name: &str) -> Option<&'a ShapeDecl> {
    ast.statements.iter().find_map(|statement| match statement {
        Decl::Shape(shape) if shape.path.join(".") == full_name => Some(shape),
        _ => None,
    })
}
