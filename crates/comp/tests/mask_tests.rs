//! Mask operations: permissive filtering and strict validation.

mod common;

use common::{named_field, num, positional_field, prepared_module, prim, struct_of, text};
use comp::{Decl, MaskMode, Node, ShapeBody, ShapeDecl, Value};
use pretty_assertions::assert_eq;

fn session_module() -> std::rc::Rc<comp::Module> {
    prepared_module(vec![
        Decl::Shape(ShapeDecl {
            path: vec!["session".to_owned()],
            body: ShapeBody::Fields(vec![named_field("user", prim("str")), named_field("session", prim("str"))]),
        }),
        Decl::Shape(ShapeDecl {
            path: vec!["timeouts".to_owned()],
            body: ShapeBody::Fields(vec![
                named_field("user", prim("str")),
                named_field("session", prim("str")),
                named_field("timeout", prim("num")).with_default(Node::number(30)),
            ]),
        }),
        Decl::Shape(ShapeDecl {
            path: vec!["coords".to_owned()],
            body: ShapeBody::Fields(vec![positional_field(prim("num")), named_field("x", prim("num"))]),
        }),
    ])
}

#[test]
fn permissive_mask_keeps_the_intersection() {
    let module = session_module();
    let shape = module.resolve_shape(&["session"], None).expect("shape resolves");
    let value = struct_of(&[
        ("user", text("alice")),
        ("session", text("abc123")),
        ("debug", text("on")),
        ("admin", text("secret")),
    ]);

    let result = comp::mask(&value, &shape);
    assert!(result.success());
    let masked = result.value().expect("value").clone();
    let fields = masked.as_struct_ref().expect("structure");
    assert_eq!(fields.len(), 2);
    assert_eq!(common::field(&masked, "user"), text("alice"));
    assert_eq!(common::field(&masked, "session"), text("abc123"));
    assert!(fields.get_named("debug").is_none());
    assert_eq!(result.named_matches, 2);
}

#[test]
fn permissive_mask_never_applies_defaults() {
    let module = session_module();
    let shape = module.resolve_shape(&["timeouts"], None).expect("shape resolves");
    let value = struct_of(&[("user", text("bob"))]);

    let result = comp::mask(&value, &shape);
    assert!(result.success());
    let masked = result.value().expect("value").clone();
    assert_eq!(masked, struct_of(&[("user", text("bob"))]));
    assert_eq!(result.named_matches, 1);
}

#[test]
fn permissive_mask_with_no_overlap_is_empty() {
    let module = session_module();
    let shape = module.resolve_shape(&["session"], None).expect("shape resolves");
    let value = struct_of(&[("a", num(1)), ("b", num(2))]);

    let result = comp::mask(&value, &shape);
    assert!(result.success());
    assert_eq!(result.value().cloned().expect("value"), Value::empty());
    assert_eq!(result.named_matches, 0);

    let empty = comp::mask(&Value::empty(), &shape);
    assert!(empty.success());
    assert_eq!(empty.value().cloned().expect("value"), Value::empty());
}

#[test]
fn masks_fail_on_non_structures() {
    let module = session_module();
    let shape = module.resolve_shape(&["session"], None).expect("shape resolves");
    assert!(!comp::mask(&num(5), &shape).success());
    assert!(!comp::mask(&text("hello"), &shape).success());
    assert!(!comp::strict_mask(&num(5), &shape).success());
}

#[test]
fn permissive_mask_ignores_positional_fields() {
    let module = session_module();
    let shape = module.resolve_shape(&["session"], None).expect("shape resolves");
    let mut fields = comp::Structure::new();
    fields.insert_named("user", text("ada"));
    fields.push_unnamed(num(10));
    fields.insert_named("other", num(15));

    let result = comp::mask(&Value::structure(fields), &shape);
    assert!(result.success());
    let masked = result.value().expect("value").clone();
    assert_eq!(masked, struct_of(&[("user", text("ada"))]));
}

#[test]
fn permissive_mask_preserves_nested_values() {
    let module = prepared_module(vec![Decl::Shape(ShapeDecl {
        path: vec!["holder".to_owned()],
        body: ShapeBody::Fields(vec![named_field("data", prim("any"))]),
    })]);
    let shape = module.resolve_shape(&["holder"], None).expect("shape resolves");
    let nested = struct_of(&[("inner", text("value"))]);
    let value = struct_of(&[("data", nested.clone()), ("extra", text("removed"))]);

    let result = comp::mask(&value, &shape);
    assert_eq!(result.value().cloned().expect("value"), struct_of(&[("data", nested)]));
}

#[test]
fn strict_mask_applies_defaults() {
    let module = session_module();
    let shape = module.resolve_shape(&["timeouts"], None).expect("shape resolves");
    let value = struct_of(&[("user", text("u")), ("session", text("s"))]);

    let result = comp::strict_mask(&value, &shape);
    assert!(result.success());
    assert_eq!(
        result.value().cloned().expect("value"),
        struct_of(&[("user", text("u")), ("session", text("s")), ("timeout", num(30))])
    );
}

#[test]
fn strict_mask_rejects_extras_and_missing_fields() {
    let module = session_module();
    let shape = module.resolve_shape(&["session"], None).expect("shape resolves");

    let extra = struct_of(&[("user", text("u")), ("session", text("s")), ("debug", text("x"))]);
    assert!(!comp::strict_mask(&extra, &shape).success());

    let missing = struct_of(&[("user", text("u"))]);
    assert!(!comp::strict_mask(&missing, &shape).success());
}

#[test]
fn strict_mask_rejects_type_mismatches() {
    let module = session_module();
    let shape = module.resolve_shape(&["timeouts"], None).expect("shape resolves");
    let value = struct_of(&[("user", num(1)), ("session", text("s"))]);
    assert!(!comp::strict_mask(&value, &shape).success());
}

#[test]
fn strict_mask_allows_positionals_only_where_declared() {
    let module = session_module();
    let coords = module.resolve_shape(&["coords"], None).expect("shape resolves");

    let mut fields = comp::Structure::new();
    fields.push_unnamed(num(3));
    fields.insert_named("x", num(4));
    assert!(comp::strict_mask(&Value::structure(fields), &coords).success());

    // No positional slot in ~session, so an unnamed field fails.
    let session = module.resolve_shape(&["session"], None).expect("shape resolves");
    let mut fields = comp::Structure::new();
    fields.insert_named("user", text("u"));
    fields.insert_named("session", text("s"));
    fields.push_unnamed(num(9));
    assert!(!comp::strict_mask(&Value::structure(fields), &session).success());
}

#[test]
fn mask_node_evaluates_both_modes() {
    let module = session_module();
    let value_node = Node::structure(vec![
        comp::FieldOpNode::named("user", Node::text("ada")),
        comp::FieldOpNode::named("extra", Node::number(1)),
    ]);
    let permissive = Node::mask(value_node, common::shape_ref(&["session"]), MaskMode::Permissive);
    let result = common::eval_in(&module, &permissive);
    assert_eq!(result, struct_of(&[("user", text("ada"))]));

    let value_node = Node::structure(vec![comp::FieldOpNode::named("user", Node::text("ada"))]);
    let strict = Node::mask(value_node, common::shape_ref(&["session"]), MaskMode::Strict);
    assert!(common::eval_in(&module, &strict).is_fail());
}
