//! Operator evaluation: arithmetic, precedence by tree shape, comparisons,
//! booleans with short-circuiting, unary ops, and tag comparisons.

mod common;

use common::{assert_fail_citing, empty_module, eval_expr, eval_in, num, prepared_module, text};
use comp::{ArithOp, BoolOp, CompareOp, Decl, Node, TagDecl, UnaryOp, Value};
use pretty_assertions::assert_eq;

fn arith(op: ArithOp, left: std::rc::Rc<Node>, right: std::rc::Rc<Node>) -> std::rc::Rc<Node> {
    Node::arithmetic(op, left, right)
}

#[test]
fn arithmetic_basics() {
    assert_eq!(eval_expr(&arith(ArithOp::Add, Node::number(4), Node::number(4))), num(8));
    assert_eq!(eval_expr(&arith(ArithOp::Mul, Node::number(4), Node::number(4))), num(16));
    assert_eq!(eval_expr(&arith(ArithOp::Sub, Node::number(1), Node::number(4))), num(-3));
    assert_eq!(eval_expr(&arith(ArithOp::Pow, Node::number(2), Node::number(8))), num(256));
    assert_eq!(eval_expr(&arith(ArithOp::Div, Node::number(0), Node::number(12))), num(0));
}

#[test]
fn division_by_zero_fails() {
    let result = eval_expr(&arith(ArithOp::Div, Node::number(10), Node::number(0)));
    assert!(result.is_fail());
    assert_eq!(result.side_tag().expect("tagged").full_name(), "fail.div_zero");
}

#[test]
fn text_concatenation() {
    assert_eq!(
        eval_expr(&arith(ArithOp::Add, Node::text("cat"), Node::text("pig"))),
        text("catpig")
    );
}

#[test]
fn arithmetic_type_mismatches_fail() {
    let module = empty_module();
    let bool_plus = arith(ArithOp::Add, Node::tag_ref(&["true"]), Node::number(2));
    assert!(eval_in(&module, &bool_plus).is_fail());
    let text_times = arith(ArithOp::Mul, Node::text("cat"), Node::number(2));
    assert!(eval_expr(&text_times).is_fail());
}

#[test]
fn precedence_comes_from_tree_shape() {
    // 1 + 2 * 3 == 7
    let flat = arith(
        ArithOp::Add,
        Node::number(1),
        arith(ArithOp::Mul, Node::number(2), Node::number(3)),
    );
    assert_eq!(eval_expr(&flat), num(7));

    // (1 + 2) * 3 == 9
    let grouped = arith(
        ArithOp::Mul,
        arith(ArithOp::Add, Node::number(1), Node::number(2)),
        Node::number(3),
    );
    assert_eq!(eval_expr(&grouped), num(9));

    // 1 + 2 * 3 - 4 == 3
    let mixed = arith(ArithOp::Sub, flat, Node::number(4));
    assert_eq!(eval_expr(&mixed), num(3));
}

#[test]
fn unary_operators() {
    assert_eq!(eval_expr(&Node::unary(UnaryOp::Plus, Node::number(4))), num(4));
    assert_eq!(eval_expr(&Node::unary(UnaryOp::Minus, Node::number(4))), num(-4));
    assert!(eval_expr(&Node::unary(UnaryOp::Plus, Node::text("cat"))).is_fail());

    let module = empty_module();
    assert!(eval_in(&module, &Node::unary(UnaryOp::Minus, Node::tag_ref(&["true"]))).is_fail());
    assert_eq!(
        eval_in(&module, &Node::unary(UnaryOp::Not, Node::tag_ref(&["true"]))),
        Value::boolean(false)
    );
    assert_eq!(
        eval_in(&module, &Node::unary(UnaryOp::Not, Node::tag_ref(&["false"]))),
        Value::boolean(true)
    );
    assert!(eval_expr(&Node::unary(UnaryOp::Not, Node::number(0))).is_fail());
}

#[test]
fn boolean_operators_require_booleans() {
    let module = empty_module();
    let t = || Node::tag_ref(&["true"]);
    let f = || Node::tag_ref(&["false"]);

    assert_eq!(eval_in(&module, &Node::boolean(BoolOp::And, t(), t())), Value::boolean(true));
    assert_eq!(eval_in(&module, &Node::boolean(BoolOp::And, t(), f())), Value::boolean(false));
    assert_eq!(eval_in(&module, &Node::boolean(BoolOp::Or, f(), t())), Value::boolean(true));
    assert_eq!(eval_in(&module, &Node::boolean(BoolOp::Or, f(), f())), Value::boolean(false));

    // The left operand is always type-checked.
    assert!(eval_in(&module, &Node::boolean(BoolOp::Or, Node::number(1), Node::number(0))).is_fail());
    // The right operand is checked only when it is evaluated.
    assert_eq!(
        eval_in(&module, &Node::boolean(BoolOp::Or, t(), Node::number(2))),
        Value::boolean(true)
    );
    assert!(eval_in(&module, &Node::boolean(BoolOp::Or, f(), Node::number(2))).is_fail());
    assert_eq!(
        eval_in(&module, &Node::boolean(BoolOp::And, f(), Node::number(2))),
        Value::boolean(false)
    );
}

#[test]
fn boolean_operators_short_circuit_side_conditions() {
    let module = empty_module();
    let div_zero = || Node::arithmetic(ArithOp::Div, Node::number(0), Node::number(0));
    let t = || Node::tag_ref(&["true"]);
    let f = || Node::tag_ref(&["false"]);

    assert_eq!(
        eval_in(&module, &Node::boolean(BoolOp::And, f(), div_zero())),
        Value::boolean(false)
    );
    assert!(eval_in(&module, &Node::boolean(BoolOp::And, t(), div_zero())).is_fail());
    assert_eq!(
        eval_in(&module, &Node::boolean(BoolOp::Or, t(), div_zero())),
        Value::boolean(true)
    );
    assert!(eval_in(&module, &Node::boolean(BoolOp::Or, f(), div_zero())).is_fail());
}

#[test]
fn equality_requires_matching_kinds() {
    let cmp = |op, l, r| Node::comparison(op, l, r);
    assert_eq!(
        eval_expr(&cmp(CompareOp::Eq, Node::number(100), Node::number(100))),
        Value::boolean(true)
    );
    assert_eq!(
        eval_expr(&cmp(CompareOp::Ne, Node::decimal("1.5"), Node::decimal("1.4"))),
        Value::boolean(true)
    );
    assert_eq!(
        eval_expr(&cmp(CompareOp::Eq, Node::text("cat"), Node::text("Cat"))),
        Value::boolean(false)
    );
    assert_eq!(
        eval_expr(&cmp(CompareOp::Ne, Node::text("cat"), Node::text("cat "))),
        Value::boolean(true)
    );
    // Mixed kinds are an error for equality.
    assert!(eval_expr(&cmp(CompareOp::Eq, Node::number(1), Node::text("cat"))).is_fail());
    let module = empty_module();
    assert!(eval_in(&module, &cmp(CompareOp::Eq, Node::number(2), Node::tag_ref(&["true"]))).is_fail());
}

#[test]
fn ordering_within_and_across_kinds() {
    let cmp = |op, l, r| Node::comparison(op, l, r);
    assert_eq!(
        eval_expr(&cmp(CompareOp::Lt, Node::number(100), Node::number(100))),
        Value::boolean(false)
    );
    assert_eq!(
        eval_expr(&cmp(CompareOp::Le, Node::number(100), Node::number(100))),
        Value::boolean(true)
    );
    assert_eq!(
        eval_expr(&cmp(CompareOp::Lt, Node::text("cat"), Node::text("dog"))),
        Value::boolean(true)
    );
    // Cross-kind ordering: tags sort before numbers, numbers before text.
    assert_eq!(
        eval_expr(&cmp(CompareOp::Lt, Node::number(1), Node::text("cat"))),
        Value::boolean(true)
    );
    let module = empty_module();
    assert_eq!(
        eval_in(&module, &cmp(CompareOp::Le, Node::number(2), Node::tag_ref(&["true"]))),
        Value::boolean(false)
    );
}

#[test]
fn tag_equality_is_identity() {
    let module = prepared_module(vec![
        Decl::Tag(TagDecl::new(&["red"])),
        Decl::Tag(TagDecl::new(&["blue"])),
        Decl::Tag(TagDecl::new(&["active"]).with_value(Node::number(1))),
        Decl::Tag(TagDecl::new(&["inactive"]).with_value(Node::number(1))),
    ]);
    let cmp = |op, l, r| Node::comparison(op, l, r);

    assert_eq!(
        eval_in(&module, &cmp(CompareOp::Eq, Node::tag_ref(&["red"]), Node::tag_ref(&["red"]))),
        Value::boolean(true)
    );
    assert_eq!(
        eval_in(&module, &cmp(CompareOp::Ne, Node::tag_ref(&["red"]), Node::tag_ref(&["blue"]))),
        Value::boolean(true)
    );
    // Tags with equal attached values still compare by identity.
    assert_eq!(
        eval_in(
            &module,
            &cmp(CompareOp::Eq, Node::tag_ref(&["active"]), Node::tag_ref(&["inactive"]))
        ),
        Value::boolean(false)
    );
}

#[test]
fn tag_ordering_is_leaf_first() {
    let module = prepared_module(vec![
        Decl::Tag(TagDecl::new(&["active"])),
        Decl::Tag(TagDecl::new(&["inactive"])),
    ]);
    let cmp = |op, l, r| Node::comparison(op, l, r);
    assert_eq!(
        eval_in(
            &module,
            &cmp(CompareOp::Lt, Node::tag_ref(&["active"]), Node::tag_ref(&["inactive"]))
        ),
        Value::boolean(true)
    );
    assert_eq!(
        eval_in(
            &module,
            &cmp(CompareOp::Lt, Node::tag_ref(&["inactive"]), Node::tag_ref(&["active"]))
        ),
        Value::boolean(false)
    );
}

#[test]
fn fallback_expression_recovers_exactly_one_failure() {
    let div_zero = Node::arithmetic(ArithOp::Div, Node::number(1), Node::number(0));
    let recovered = Node::fallback(div_zero, Node::number(42));
    assert_eq!(eval_expr(&recovered), num(42));

    let fine = Node::fallback(Node::number(5), Node::number(42));
    assert_eq!(eval_expr(&fine), num(5));
}

#[test]
fn placeholder_fails_at_runtime() {
    let result = eval_expr(&Node::placeholder());
    assert_fail_citing(&result, "placeholder");
}
