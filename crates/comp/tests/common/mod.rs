//! Shared helpers for the integration tests: module assembly, expression
//! evaluation with suppressed output, and value construction shorthands.

#![allow(dead_code, reason = "each test binary uses a subset of the helpers")]

use std::rc::Rc;

use comp::{
    Decl, Module, ModuleAst, ModuleRegistry, NoPrint, Node, NoopTracer, ScopeName, Scopes, ShapeFieldDecl,
    ShapeRefNode, Structure, TagRefNode, TypeRef, Value,
};

/// Builds and prepares a module from declarations.
pub fn prepared_module(statements: Vec<Decl>) -> Rc<Module> {
    let module = Module::new(Some("test"));
    comp::prepare(&module, ModuleAst { statements }, &ModuleRegistry::new()).expect("module prepares");
    module
}

/// An empty prepared module (builtin namespace only).
pub fn empty_module() -> Rc<Module> {
    prepared_module(Vec::new())
}

/// Resolves and evaluates an expression, discarding print output.
pub fn eval_in(module: &Rc<Module>, node: &Rc<Node>) -> Value {
    eval_scoped(module, node, Scopes::new())
}

pub fn eval_scoped(module: &Rc<Module>, node: &Rc<Node>, scopes: Scopes) -> Value {
    comp::resolve_expr(module, node).expect("expression resolves");
    let mut print = NoPrint;
    let mut tracer = NoopTracer;
    comp::Engine::new(&mut print, &mut tracer).run(module, node, scopes)
}

/// Evaluates in a fresh empty module.
pub fn eval_expr(node: &Rc<Node>) -> Value {
    eval_in(&empty_module(), node)
}

pub fn num(n: i64) -> Value {
    Value::number(n)
}

pub fn text(s: &str) -> Value {
    Value::text(s)
}

/// `{name: value, ...}` with named fields in the given order.
pub fn struct_of(fields: &[(&str, Value)]) -> Value {
    let mut built = Structure::new();
    for (name, value) in fields {
        built.insert_named(name, value.clone());
    }
    Value::structure(built)
}

/// `{value, value, ...}` with positional fields only.
pub fn positional_of(values: &[Value]) -> Value {
    let mut built = Structure::new();
    for value in values {
        built.push_unnamed(value.clone());
    }
    Value::structure(built)
}

/// Named field of a structure value.
pub fn field(value: &Value, name: &str) -> Value {
    value
        .as_struct_ref()
        .unwrap_or_else(|| panic!("{value} is not a structure"))
        .get_named(name)
        .unwrap_or_else(|| panic!("{value} has no field {name}"))
        .clone()
}

/// The failure's message text.
pub fn fail_message(value: &Value) -> String {
    assert!(value.is_fail(), "expected a failure, got {value}");
    field(value, "message").as_text().expect("failure message is text").to_owned()
}

pub fn assert_fail_citing(value: &Value, needle: &str) {
    let message = fail_message(value);
    assert!(
        message.contains(needle),
        "failure message {message:?} does not mention {needle:?}"
    );
}

/// Shape reference to a builtin primitive (`~num`, `~str`, …).
pub fn prim(name: &str) -> TypeRef {
    TypeRef::Shape(ShapeRefNode::named(vec![name.to_owned()], None))
}

/// Shape reference by leaf-first partial path.
pub fn shape_ref(path: &[&str]) -> Rc<ShapeRefNode> {
    ShapeRefNode::named(path.iter().map(|s| (*s).to_owned()).collect(), None)
}

/// Tag constraint by leaf-first partial path.
pub fn tag_constraint(path: &[&str]) -> TypeRef {
    TypeRef::Tag(TagRefNode::new(path.iter().map(|s| (*s).to_owned()).collect(), None))
}

/// Named shape field with a constraint.
pub fn named_field(name: &str, constraint: TypeRef) -> ShapeFieldDecl {
    ShapeFieldDecl::new(Some(name), Some(constraint))
}

/// Positional shape field with a constraint.
pub fn positional_field(constraint: TypeRef) -> ShapeFieldDecl {
    ShapeFieldDecl::new(None, Some(constraint))
}

/// A tag value from a prepared module, by leaf-first partial path.
pub fn tag_value(module: &Rc<Module>, path: &[&str]) -> Value {
    Value::tag(
        module
            .resolve_tag(path, None)
            .unwrap_or_else(|| panic!("tag {path:?} resolves")),
    )
}

/// Runs a zero-argument function by piping `$in` through it.
pub fn run_function(module: &Rc<Module>, name: &str, scopes: Vec<(ScopeName, Value)>) -> Value {
    let node = Node::pipeline(None, vec![comp::PipeOp::func(&[name])]);
    eval_scoped(module, &node, Scopes::from_pairs(scopes))
}
