//! Structure literals: field ops, deep assignment, spread, index and
//! computed fields, insertion order.

mod common;

use common::{empty_module, eval_expr, eval_scoped, field, num, struct_of, text};
use comp::{FieldOpNode, FieldSeg, IndexSeg, Node, ScopeName, Scopes, Value};
use pretty_assertions::assert_eq;

fn toks(path: &[&str]) -> Vec<FieldSeg> {
    path.iter().map(|p| FieldSeg::Token((*p).to_owned())).collect()
}

#[test]
fn literal_preserves_insertion_order() {
    let node = Node::structure(vec![
        FieldOpNode::named("zebra", Node::number(1)),
        FieldOpNode::named("apple", Node::number(2)),
        FieldOpNode::positional(Node::number(3)),
    ]);
    let value = eval_expr(&node);
    let fields = value.as_struct_ref().expect("structure");
    let keys: Vec<String> = fields.keys().map(|k| format!("{k}")).collect();
    assert_eq!(keys, vec!["zebra", "apple", "_"]);
}

#[test]
fn deep_assignment_builds_intermediates() {
    // {one.two.three = 5}
    let node = Node::structure(vec![FieldOpNode::path(toks(&["one", "two", "three"]), Node::number(5))]);
    let value = eval_expr(&node);
    assert_eq!(
        value,
        struct_of(&[("one", struct_of(&[("two", struct_of(&[("three", num(5))]))]))])
    );
}

#[test]
fn deep_assignment_replaces_non_structures() {
    // {one = 1  one.two = 2} — the number at `one` becomes a structure.
    let node = Node::structure(vec![
        FieldOpNode::named("one", Node::number(1)),
        FieldOpNode::path(toks(&["one", "two"]), Node::number(2)),
    ]);
    let value = eval_expr(&node);
    assert_eq!(field(&value, "one"), struct_of(&[("two", num(2))]));
}

#[test]
fn later_named_fields_override_in_place() {
    let node = Node::structure(vec![
        FieldOpNode::named("a", Node::number(1)),
        FieldOpNode::named("b", Node::number(2)),
        FieldOpNode::named("a", Node::number(3)),
    ]);
    let value = eval_expr(&node);
    let fields = value.as_struct_ref().expect("structure");
    assert_eq!(fields.len(), 2);
    // Overriding keeps the original position.
    let keys: Vec<String> = fields.keys().map(|k| format!("{k}")).collect();
    assert_eq!(keys, vec!["a", "b"]);
    assert_eq!(field(&value, "a"), num(3));
}

#[test]
fn spread_inlines_fields() {
    // {..$in  c = 3}
    let node = Node::structure(vec![
        FieldOpNode::spread(Node::scoped(ScopeName::In, &[])),
        FieldOpNode::named("c", Node::number(3)),
    ]);
    let input = struct_of(&[("a", num(1)), ("b", num(2))]);
    let module = empty_module();
    let value = eval_scoped(&module, &node, Scopes::from_pairs([(ScopeName::In, input)]));
    assert_eq!(value, struct_of(&[("a", num(1)), ("b", num(2)), ("c", num(3))]));
}

#[test]
fn spread_collisions_override_named_keys_only() {
    // {a = 1  ..{a = 9  5}  7} — `a` is overridden, positionals accumulate.
    let inner = Node::structure(vec![
        FieldOpNode::named("a", Node::number(9)),
        FieldOpNode::positional(Node::number(5)),
    ]);
    let node = Node::structure(vec![
        FieldOpNode::named("a", Node::number(1)),
        FieldOpNode::spread(inner),
        FieldOpNode::positional(Node::number(7)),
    ]);
    let value = eval_expr(&node);
    let fields = value.as_struct_ref().expect("structure");
    assert_eq!(fields.len(), 3);
    assert_eq!(field(&value, "a"), num(9));
    let positionals: Vec<Value> = fields
        .iter()
        .filter(|(key, _)| !key.is_named())
        .map(|(_, v)| v.clone())
        .collect();
    assert_eq!(positionals, vec![num(5), num(7)]);
}

#[test]
fn spreading_a_non_structure_fails() {
    let node = Node::structure(vec![FieldOpNode::spread(Node::number(5))]);
    assert!(eval_expr(&node).is_fail());
}

#[test]
fn index_field_selects_by_insertion_order() {
    // $in.#1 over {a=10, 20} — position one is the unnamed 20.
    let node = Node::new(comp::NodeKind::Identifier(vec![
        FieldSeg::Scope(ScopeName::In),
        FieldSeg::Index(IndexSeg::Literal(1)),
    ]));
    let module = empty_module();
    let mut fields = comp::Structure::new();
    fields.insert_named("a", num(10));
    fields.push_unnamed(num(20));
    let scopes = Scopes::from_pairs([(ScopeName::In, Value::structure(fields))]);
    assert_eq!(eval_scoped(&module, &node, scopes), num(20));
}

#[test]
fn index_field_on_empty_structure_fails_not_found() {
    let node = Node::new(comp::NodeKind::Identifier(vec![
        FieldSeg::Scope(ScopeName::In),
        FieldSeg::Index(IndexSeg::Literal(0)),
    ]));
    let module = empty_module();
    let scopes = Scopes::from_pairs([(ScopeName::In, Value::empty())]);
    let result = eval_scoped(&module, &node, scopes);
    assert!(result.is_fail());
    assert_eq!(result.side_tag().expect("tagged").full_name(), "fail.not_found");
}

#[test]
fn computed_index_must_be_a_non_negative_integer() {
    let node = Node::new(comp::NodeKind::Identifier(vec![
        FieldSeg::Scope(ScopeName::In),
        FieldSeg::Index(IndexSeg::Computed(Node::decimal("1.5"))),
    ]));
    let module = empty_module();
    let scopes = Scopes::from_pairs([(ScopeName::In, struct_of(&[("a", num(1))]))]);
    assert!(eval_scoped(&module, &node, scopes).is_fail());
}

#[test]
fn computed_index_selects_entries() {
    let node = Node::new(comp::NodeKind::Identifier(vec![
        FieldSeg::Scope(ScopeName::In),
        FieldSeg::Index(IndexSeg::Computed(Node::arithmetic(
            comp::ArithOp::Add,
            Node::number(0),
            Node::number(1),
        ))),
    ]));
    let module = empty_module();
    let scopes = Scopes::from_pairs([(ScopeName::In, struct_of(&[("a", num(10)), ("b", num(20))]))]);
    assert_eq!(eval_scoped(&module, &node, scopes), num(20));
}

#[test]
fn computed_key_reads_named_fields() {
    // $in.("na" + "me")
    let key = Node::arithmetic(comp::ArithOp::Add, Node::text("na"), Node::text("me"));
    let node = Node::new(comp::NodeKind::Identifier(vec![
        FieldSeg::Scope(ScopeName::In),
        FieldSeg::Compute(key),
    ]));
    let module = empty_module();
    let scopes = Scopes::from_pairs([(ScopeName::In, struct_of(&[("name", text("ada"))]))]);
    assert_eq!(eval_scoped(&module, &node, scopes), text("ada"));
}

#[test]
fn computed_key_in_assignment() {
    // {("k" + "ey") = 5}
    let key = Node::arithmetic(comp::ArithOp::Add, Node::text("k"), Node::text("ey"));
    let node = Node::structure(vec![FieldOpNode::path(vec![FieldSeg::Compute(key)], Node::number(5))]);
    let value = eval_expr(&node);
    assert_eq!(field(&value, "key"), num(5));
}

#[test]
fn index_assignment_replaces_in_place() {
    // {10 20 #0 = 11} — replaces the first entry, keeping its key.
    let node = Node::structure(vec![
        FieldOpNode::positional(Node::number(10)),
        FieldOpNode::positional(Node::number(20)),
        FieldOpNode::path(vec![FieldSeg::Index(IndexSeg::Literal(0))], Node::number(11)),
    ]);
    let value = eval_expr(&node);
    let fields = value.as_struct_ref().expect("structure");
    assert_eq!(fields.len(), 2);
    assert_eq!(fields.entry_at(0).map(|(_, v)| v.clone()), Some(num(11)));
    assert_eq!(fields.entry_at(1).map(|(_, v)| v.clone()), Some(num(20)));
}

#[test]
fn out_of_bounds_index_assignment_fails() {
    let node = Node::structure(vec![FieldOpNode::path(
        vec![FieldSeg::Index(IndexSeg::Literal(3))],
        Node::number(1),
    )]);
    let result = eval_expr(&node);
    assert!(result.is_fail());
    assert_eq!(result.side_tag().expect("tagged").full_name(), "fail.not_found");
}

#[test]
fn quoted_field_names_access_like_tokens() {
    let node = Node::structure(vec![FieldOpNode::path(
        vec![FieldSeg::Text("weird name".to_owned())],
        Node::number(1),
    )]);
    let value = eval_expr(&node);
    assert_eq!(field(&value, "weird name"), num(1));
}

#[test]
fn string_field_access_via_in() {
    let module = empty_module();
    let node = Node::new(comp::NodeKind::Identifier(vec![
        FieldSeg::Scope(ScopeName::In),
        FieldSeg::Text("weird name".to_owned()),
    ]));
    let scopes = Scopes::from_pairs([(ScopeName::In, struct_of(&[("weird name", num(4))]))]);
    assert_eq!(eval_scoped(&module, &node, scopes), num(4));
}

#[test]
fn field_access_on_missing_field_fails_not_found() {
    let module = empty_module();
    let node = Node::scoped(ScopeName::In, &["missing"]);
    let scopes = Scopes::from_pairs([(ScopeName::In, struct_of(&[("present", num(1))]))]);
    let result = eval_scoped(&module, &node, scopes);
    assert!(result.is_fail());
    assert_eq!(result.side_tag().expect("tagged").full_name(), "fail.not_found");
}
