//! Handle lifecycle: grab, idempotent drop, drop blocks, released-handle
//! morph failures, and kind hierarchies.

mod common;

use std::rc::Rc;

use common::{field, named_field, num, prepared_module};
use comp::{
    Decl, FieldOpNode, FieldSeg, HandleDecl, Module, Node, PipeOp, ScopeName, Scopes, ShapeBody, ShapeDecl, TypeRef,
    Value,
};
use pretty_assertions::assert_eq;

fn handle_decl(path: &[&str]) -> Decl {
    Decl::Handle(HandleDecl {
        path: path.iter().map(|s| (*s).to_owned()).collect(),
        drop_block: None,
    })
}

fn handle_constraint(path: &[&str]) -> TypeRef {
    TypeRef::Handle(comp::HandleRefNode::new(
        path.iter().map(|s| (*s).to_owned()).collect(),
        None,
    ))
}

fn var_key(rest: &[&str]) -> Vec<FieldSeg> {
    let mut segs = vec![FieldSeg::Scope(ScopeName::Var)];
    segs.extend(rest.iter().map(|p| FieldSeg::Token((*p).to_owned())));
    segs
}

#[test]
fn grab_produces_a_live_instance() {
    let module = prepared_module(vec![handle_decl(&["file"])]);
    let value = common::eval_in(&module, &Node::grab(&["file"]));
    let instance = value.as_handle().expect("handle value");
    assert!(!instance.is_released());
    assert_eq!(instance.kind().full_name(), "file");
}

#[test]
fn grab_resolves_nested_kinds() {
    let module = prepared_module(vec![handle_decl(&["file"]), handle_decl(&["file", "readonly"])]);
    let value = common::eval_in(&module, &Node::grab(&["readonly", "file"]));
    assert_eq!(value.as_handle().expect("handle").kind().full_name(), "file.readonly");
}

#[test]
fn distinct_grabs_are_never_equal() {
    let module = prepared_module(vec![handle_decl(&["file"])]);
    let first = common::eval_in(&module, &Node::grab(&["file"]));
    let second = common::eval_in(&module, &Node::grab(&["file"]));
    assert_ne!(first, second);
    assert_eq!(first, first.clone());
}

#[test]
fn drop_is_idempotent() {
    // {$var.f = !grab @file  a = !drop $var.f  b = !drop $var.f  out = $var.f}
    let module = prepared_module(vec![handle_decl(&["file"])]);
    let node = Node::structure(vec![
        FieldOpNode::path(var_key(&["f"]), Node::grab(&["file"])),
        FieldOpNode::named("a", Node::drop_handle(Node::scoped(ScopeName::Var, &["f"]))),
        FieldOpNode::named("b", Node::drop_handle(Node::scoped(ScopeName::Var, &["f"]))),
        FieldOpNode::named("out", Node::scoped(ScopeName::Var, &["f"])),
    ]);
    let value = common::eval_in(&module, &node);
    let instance = field(&value, "out").as_handle().cloned().expect("handle value");
    assert!(instance.is_released());
}

#[test]
fn drop_on_non_handles_fails() {
    let module = common::empty_module();
    let result = common::eval_in(&module, &Node::drop_handle(Node::number(5)));
    assert!(result.is_fail());
}

#[test]
fn drop_block_runs_once_and_sees_a_released_handle() {
    // !handle @db = :{[ "closing" | print ]} — re-dropping must not re-run it.
    let drop_body = Node::pipeline(Some(Node::text("closing")), vec![PipeOp::func(&["print"])]);
    let module = prepared_module(vec![Decl::Handle(HandleDecl {
        path: vec!["db".to_owned()],
        drop_block: Some(Node::block(drop_body)),
    })]);

    let node = Node::structure(vec![
        FieldOpNode::path(var_key(&["h"]), Node::grab(&["db"])),
        FieldOpNode::named("first", Node::drop_handle(Node::scoped(ScopeName::Var, &["h"]))),
        FieldOpNode::named("second", Node::drop_handle(Node::scoped(ScopeName::Var, &["h"]))),
    ]);
    comp::resolve_expr(&module, &node).expect("resolves");
    let (value, output) = comp::evaluate_with_output(&module, &node, Scopes::new());
    assert!(!value.is_fail(), "got {value}");
    assert_eq!(output.matches("closing").count(), 1, "drop block ran more than once");

    // The handle the block observed was already released.
    let first = field(&value, "first").as_handle().cloned().expect("handle");
    assert!(first.is_released());
}

#[test]
fn drop_block_failures_are_discarded() {
    let drop_body = Node::arithmetic(comp::ArithOp::Div, Node::number(1), Node::number(0));
    let module = prepared_module(vec![Decl::Handle(HandleDecl {
        path: vec!["db".to_owned()],
        drop_block: Some(Node::block(drop_body)),
    })]);
    let node = Node::structure(vec![
        FieldOpNode::path(var_key(&["h"]), Node::grab(&["db"])),
        FieldOpNode::named("dropped", Node::drop_handle(Node::scoped(ScopeName::Var, &["h"]))),
    ]);
    let value = common::eval_in(&module, &node);
    assert!(!value.is_fail(), "drop block failure must not leak, got {value}");
    assert!(field(&value, "dropped").as_handle().expect("handle").is_released());
}

fn holder_module() -> Rc<Module> {
    prepared_module(vec![
        handle_decl(&["db"]),
        handle_decl(&["db", "replica"]),
        Decl::Shape(ShapeDecl {
            path: vec!["holder".to_owned()],
            body: ShapeBody::Fields(vec![named_field("h", handle_constraint(&["db"]))]),
        }),
    ])
}

#[test]
fn live_handles_morph_into_handle_fields() {
    let module = holder_module();
    let shape = module.resolve_shape(&["holder"], None).expect("shape resolves");
    let handle = common::eval_in(&module, &Node::grab(&["db"]));

    let mut fields = comp::Structure::new();
    fields.insert_named("h", handle.clone());
    let result = comp::morph(&Value::structure(fields), &shape);
    assert!(result.success());
    assert_eq!(field(result.value().expect("value"), "h"), handle);
}

#[test]
fn released_handles_fail_morphs_citing_release() {
    let module = holder_module();
    let node = Node::structure(vec![
        FieldOpNode::path(var_key(&["h"]), Node::grab(&["db"])),
        FieldOpNode::positional(Node::drop_handle(Node::scoped(ScopeName::Var, &["h"]))),
        FieldOpNode::named(
            "result",
            Node::morph(
                Node::structure(vec![FieldOpNode::named("h", Node::scoped(ScopeName::Var, &["h"]))]),
                common::shape_ref(&["holder"]),
                comp::MorphMode::Normal,
            ),
        ),
    ]);
    let result = common::eval_in(&module, &node);
    common::assert_fail_citing(&result, "released");
}

#[test]
fn child_kinds_satisfy_parent_fields() {
    let module = holder_module();
    let shape = module.resolve_shape(&["holder"], None).expect("shape resolves");
    let replica = common::eval_in(&module, &Node::grab(&["replica", "db"]));

    let mut fields = comp::Structure::new();
    fields.insert_named("h", replica);
    let result = comp::morph(&Value::structure(fields), &shape);
    assert!(result.success());
    assert_eq!(result.tag_depth, 1);
}

#[test]
fn unrelated_kinds_do_not_match() {
    let module = prepared_module(vec![
        handle_decl(&["db"]),
        handle_decl(&["file"]),
        Decl::Shape(ShapeDecl {
            path: vec!["holder".to_owned()],
            body: ShapeBody::Fields(vec![named_field("h", handle_constraint(&["db"]))]),
        }),
    ]);
    let shape = module.resolve_shape(&["holder"], None).expect("shape resolves");
    let file = common::eval_in(&module, &Node::grab(&["file"]));

    let mut fields = comp::Structure::new();
    fields.insert_named("h", file);
    assert!(!comp::morph(&Value::structure(fields), &shape).success());
}

#[test]
fn bare_handle_fills_a_handle_field_positionally() {
    let module = holder_module();
    let shape = module.resolve_shape(&["holder"], None).expect("shape resolves");
    let handle = common::eval_in(&module, &Node::grab(&["db"]));

    let mut fields = comp::Structure::new();
    fields.push_unnamed(handle.clone());
    let result = comp::morph(&Value::structure(fields), &shape);
    assert!(result.success());
    assert_eq!(field(result.value().expect("value"), "h"), handle);
}

#[test]
fn handle_private_data_is_replaced_wholesale() {
    let module = prepared_module(vec![handle_decl(&["db"])]);
    let value = common::eval_in(&module, &Node::grab(&["db"]));
    let instance = value.as_handle().expect("handle");
    assert_eq!(instance.data(), Value::empty());
    instance.set_data(num(42));
    assert_eq!(instance.data(), num(42));
}
