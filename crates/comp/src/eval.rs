//! Per-node evaluation state machines.
//!
//! Each node kind advances through [`step`]: it may request a child
//! computation (pausing the frame) or finish with a value. The engine owns
//! scheduling and failure propagation; nothing here recurses.

use std::rc::Rc;

use bigdecimal::BigDecimal;
use num_traits::Zero;

use crate::{
    ast::{ArithOp, BoolOp, CompareOp, FieldOpNode, FieldSeg, IndexSeg, Node, NodeKind, PipeOp, UnaryOp},
    builtin::BuiltinFunction,
    engine::{Compute, Frame, ScopeName, Scopes, Services, Step},
    fail,
    handle::HandleInstance,
    module::{FunctionBody, FunctionDefinition, Module, ResolveKey, Resolution},
    morph::{self, DispatchOutcome},
    structure::{AssignSeg, FieldKey, Structure, assign_path},
    value::{BlockValue, Value},
};

/// Per-frame evaluation state.
#[derive(Debug)]
pub(crate) enum Work {
    Leaf,
    Ident(IdentWork),
    Binary(BinaryWork),
    Logic(LogicWork),
    Unary(UnaryWork),
    Fallback(FallbackWork),
    Shape(ShapeOpWork),
    Build(Box<BuildWork>),
    Pipe(Box<PipeWork>),
    DropOp(DropWork),
}

impl Work {
    pub(crate) fn for_node(node: &Rc<Node>) -> Self {
        match &node.kind {
            NodeKind::Identifier(_) => Self::Ident(IdentWork::default()),
            NodeKind::Arithmetic { .. } | NodeKind::Comparison { .. } => Self::Binary(BinaryWork::default()),
            NodeKind::Boolean { .. } => Self::Logic(LogicWork::default()),
            NodeKind::Unary { .. } => Self::Unary(UnaryWork::default()),
            NodeKind::Fallback { .. } => Self::Fallback(FallbackWork::default()),
            NodeKind::Morph { .. } | NodeKind::Mask { .. } => Self::Shape(ShapeOpWork::default()),
            NodeKind::Structure(_) => Self::Build(Box::default()),
            NodeKind::Pipeline { .. } => Self::Pipe(Box::default()),
            NodeKind::Drop(_) => Self::DropOp(DropWork::default()),
            _ => Self::Leaf,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct IdentWork {
    index: usize,
    current: Option<Value>,
    pending: bool,
}

#[derive(Debug, Default)]
pub(crate) struct BinaryWork {
    stage: u8,
    left: Option<Value>,
}

#[derive(Debug, Default)]
pub(crate) struct LogicWork {
    stage: u8,
}

#[derive(Debug, Default)]
pub(crate) struct UnaryWork {
    started: bool,
}

#[derive(Debug, Default)]
pub(crate) struct FallbackWork {
    stage: u8,
}

#[derive(Debug, Default)]
pub(crate) struct ShapeOpWork {
    started: bool,
}

#[derive(Debug, Default)]
pub(crate) struct DropWork {
    stage: u8,
    handle: Option<Value>,
}

/// State of a structure literal build.
#[derive(Debug, Default)]
pub(crate) struct BuildWork {
    op_index: usize,
    out: Structure,
    /// Working scope set; scope assignments inside the literal rebind here.
    scopes: Option<Scopes>,
    stage: BuildStage,
    /// Resolved assignment segments of the current field op.
    key: Vec<AssignSeg>,
    key_index: usize,
    target: AssignTarget,
    positional: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum BuildStage {
    #[default]
    NextOp,
    Key,
    Value,
    Spread,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum AssignTarget {
    #[default]
    Out,
    Scope(ScopeName),
}

/// State of a pipeline run.
#[derive(Debug, Default)]
pub(crate) struct PipeWork {
    stage: PipeStage,
    op_index: usize,
    current: Option<Value>,
    call: Option<PendingCall>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum PipeStage {
    #[default]
    Start,
    AwaitSeed,
    AwaitFallback,
    AwaitStruct,
    AwaitBlockValue,
    AwaitBody,
    AwaitDynamic,
    AwaitArgs,
    NextOp,
}

#[derive(Debug)]
struct PendingCall {
    overloads: Option<Rc<Vec<Rc<FunctionDefinition>>>>,
    name: String,
    args_node: Option<Rc<Node>>,
    args: Option<Value>,
}

/// Advances the frame's state machine one step.
pub(crate) fn step(frame: &mut Frame, incoming: Option<Value>, services: &mut Services<'_>) -> Step {
    let node = Rc::clone(&frame.node);
    let scopes = frame.scopes.clone();
    let module = Rc::clone(&frame.module);
    match (&node.kind, &mut frame.work) {
        (NodeKind::Number(n), Work::Leaf) => Step::Done(Value::number(n.clone())),
        (NodeKind::String(s), Work::Leaf) => Step::Done(Value::text(s.clone())),
        (NodeKind::Placeholder, Work::Leaf) => Step::Done(fail::runtime("placeholder (???) evaluated")),
        (NodeKind::TagValue(tag_ref), Work::Leaf) => match tag_ref.resolved() {
            Some(definition) => Step::Done(Value::tag(Rc::clone(definition))),
            None => Step::Done(fail::runtime(format!(
                "unresolved tag reference #{}",
                tag_ref.display_path()
            ))),
        },
        (NodeKind::Block(body), Work::Leaf) => Step::Done(Value::block(BlockValue {
            body: Rc::clone(body),
            scopes,
            module,
        })),
        (NodeKind::Grab(handle_ref), Work::Leaf) => match handle_ref.resolved() {
            Some(kind) => Step::Done(Value::handle(Rc::new(HandleInstance::grab(Rc::clone(kind))))),
            None => Step::Done(fail::runtime(format!(
                "unresolved handle reference @{}",
                handle_ref.display_path()
            ))),
        },
        (NodeKind::Identifier(segs), Work::Ident(work)) => step_identifier(segs, work, &scopes, incoming),
        (NodeKind::Arithmetic { op, left, right }, Work::Binary(work)) => {
            step_binary(work, incoming, left, right, |a, b| arith(*op, a, b))
        }
        (NodeKind::Comparison { op, left, right }, Work::Binary(work)) => {
            step_binary(work, incoming, left, right, |a, b| compare(*op, a, b))
        }
        (NodeKind::Boolean { op, left, right }, Work::Logic(work)) => step_logic(*op, left, right, work, incoming),
        (NodeKind::Unary { op, operand }, Work::Unary(work)) => step_unary(*op, operand, work, incoming),
        (NodeKind::Fallback { left, right }, Work::Fallback(work)) => step_fallback(left, right, work, incoming),
        (NodeKind::Morph { expr, shape, mode }, Work::Shape(work)) => {
            if !work.started {
                work.started = true;
                return Step::Compute(Compute::new(Rc::clone(expr)));
            }
            let value = incoming.expect("resumed with the operand value");
            match shape.resolved() {
                Some(target) => {
                    let result = morph::morph_with_mode(&value, target, *mode);
                    Step::Done(finish_shape_op(result, "morph", &shape.display_path()))
                }
                None => Step::Done(fail::runtime(format!(
                    "unresolved shape reference ~{}",
                    shape.display_path()
                ))),
            }
        }
        (NodeKind::Mask { expr, shape, mode }, Work::Shape(work)) => {
            if !work.started {
                work.started = true;
                return Step::Compute(Compute::new(Rc::clone(expr)));
            }
            let value = incoming.expect("resumed with the operand value");
            match shape.resolved() {
                Some(target) => {
                    let result = morph::mask_with_mode(&value, target, *mode);
                    Step::Done(finish_shape_op(result, "mask", &shape.display_path()))
                }
                None => Step::Done(fail::runtime(format!(
                    "unresolved shape reference ~{}",
                    shape.display_path()
                ))),
            }
        }
        (NodeKind::Structure(ops), Work::Build(work)) => step_build(ops, work, &scopes, incoming),
        (NodeKind::Pipeline { seed, ops }, Work::Pipe(work)) => {
            step_pipeline(seed.as_ref(), ops, work, &scopes, &module, incoming, services)
        }
        (NodeKind::Drop(expr), Work::DropOp(work)) => step_drop(expr, work, incoming),
        _ => Step::Done(fail::runtime("evaluator state does not match node")),
    }
}

fn finish_shape_op(result: morph::MorphResult, operation: &str, shape: &str) -> Value {
    match result.reason().map(ToOwned::to_owned) {
        None => result
            .into_value()
            .unwrap_or_else(|| fail::type_err(format!("cannot {operation} to ~{shape}"))),
        Some(reason) => fail::type_err(format!("cannot {operation} to ~{shape}: {reason}")),
    }
}

// --- identifiers ----------------------------------------------------------

fn step_identifier(segs: &[FieldSeg], work: &mut IdentWork, scopes: &Scopes, incoming: Option<Value>) -> Step {
    if work.pending {
        let key = incoming.expect("resumed with a computed key");
        let current = work.current.take().expect("descent has a base value");
        match descend_computed(&current, &segs[work.index], &key) {
            Ok(next) => {
                work.current = Some(next);
                work.index += 1;
                work.pending = false;
            }
            Err(failure) => return Step::Done(failure),
        }
    }
    loop {
        if work.index >= segs.len() {
            let value = work.current.take().expect("identifier produced a value");
            return Step::Done(value);
        }
        let seg = &segs[work.index];
        if work.index == 0 {
            let base = match seg {
                FieldSeg::Scope(name) => match scopes.get(*name) {
                    Some(value) => Ok(value.clone()),
                    None => Err(fail::not_found(format!("{name} is not bound"))),
                },
                FieldSeg::Token(name) | FieldSeg::Text(name) => lookup_loose(scopes, name),
                FieldSeg::Index(_) | FieldSeg::Compute(_) => {
                    Err(fail::runtime("identifier cannot start with an index or computed field"))
                }
            };
            match base {
                Ok(value) => {
                    work.current = Some(value);
                    work.index += 1;
                    continue;
                }
                Err(failure) => return Step::Done(failure),
            }
        }
        let current = work.current.as_ref().expect("descent has a base value");
        match seg {
            FieldSeg::Token(name) | FieldSeg::Text(name) => match field_of(current, name) {
                Ok(next) => {
                    work.current = Some(next);
                    work.index += 1;
                }
                Err(failure) => return Step::Done(failure),
            },
            FieldSeg::Index(IndexSeg::Literal(index)) => match index_of(current, *index) {
                Ok(next) => {
                    work.current = Some(next);
                    work.index += 1;
                }
                Err(failure) => return Step::Done(failure),
            },
            FieldSeg::Index(IndexSeg::Computed(expr)) | FieldSeg::Compute(expr) => {
                work.pending = true;
                return Step::Compute(Compute::new(Rc::clone(expr)));
            }
            FieldSeg::Scope(name) => {
                return Step::Done(fail::runtime(format!("{name} cannot appear mid-path")));
            }
        }
    }
}

/// Unprefixed lookup: the structure being built (`$out`) first, then the
/// pipeline input (`$in`).
fn lookup_loose(scopes: &Scopes, name: &str) -> Result<Value, Value> {
    for scope in [ScopeName::Out, ScopeName::In] {
        if let Some(value) = scopes.get(scope)
            && let Some(fields) = value.as_struct_ref()
            && let Some(found) = fields.get_named(name)
        {
            return Ok(found.clone());
        }
    }
    Err(fail::not_found(format!("{name} is not defined")))
}

fn field_of(value: &Value, name: &str) -> Result<Value, Value> {
    let Some(fields) = value.as_struct_ref() else {
        return Err(fail::type_err(format!("cannot access field {name} of {}", value.kind())));
    };
    fields
        .get_named(name)
        .cloned()
        .ok_or_else(|| fail::not_found(format!("field {name} not found")))
}

fn index_of(value: &Value, index: usize) -> Result<Value, Value> {
    let Some(fields) = value.as_struct_ref() else {
        return Err(fail::type_err(format!("cannot index into {}", value.kind())));
    };
    fields
        .entry_at(index)
        .map(|(_, v)| v.clone())
        .ok_or_else(|| fail::not_found(format!("index #{index} out of bounds for {} fields", fields.len())))
}

fn descend_computed(current: &Value, seg: &FieldSeg, key: &Value) -> Result<Value, Value> {
    match seg {
        FieldSeg::Index(IndexSeg::Computed(_)) => {
            let Some(index) = key.as_index() else {
                return Err(fail::type_err("computed index must be a non-negative integer"));
            };
            index_of(current, index)
        }
        FieldSeg::Compute(_) => match computed_key(key) {
            Some(FieldKey::Text(name)) => field_of(current, &name),
            Some(field_key) => {
                let Some(fields) = current.as_struct_ref() else {
                    return Err(fail::type_err(format!("cannot access field of {}", current.kind())));
                };
                fields
                    .get(&field_key)
                    .cloned()
                    .ok_or_else(|| fail::not_found("computed field not found"))
            }
            None => Err(fail::type_err(format!(
                "computed key must be text or a tag, got {}",
                key.kind()
            ))),
        },
        _ => Err(fail::runtime("segment does not take a computed key")),
    }
}

fn computed_key(key: &Value) -> Option<FieldKey> {
    if let Some(text) = key.as_text() {
        Some(FieldKey::text(text))
    } else {
        key.as_tag().map(|tag| FieldKey::Tag(crate::tag::TagKey(Rc::clone(tag))))
    }
}

// --- operators ------------------------------------------------------------

fn step_binary(
    work: &mut BinaryWork,
    incoming: Option<Value>,
    left: &Rc<Node>,
    right: &Rc<Node>,
    combine: impl FnOnce(&Value, &Value) -> Value,
) -> Step {
    match work.stage {
        0 => {
            work.stage = 1;
            Step::Compute(Compute::new(Rc::clone(left)))
        }
        1 => {
            work.left = incoming;
            work.stage = 2;
            Step::Compute(Compute::new(Rc::clone(right)))
        }
        _ => {
            let lhs = work.left.take().expect("left operand evaluated");
            let rhs = incoming.expect("right operand evaluated");
            Step::Done(combine(&lhs, &rhs))
        }
    }
}

fn arith(op: ArithOp, left: &Value, right: &Value) -> Value {
    let (lhs, rhs) = (left.as_scalar(), right.as_scalar());
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        return match op {
            ArithOp::Add => Value::number(a + b),
            ArithOp::Sub => Value::number(a - b),
            ArithOp::Mul => Value::number(a * b),
            ArithOp::Div => {
                if b.is_zero() {
                    fail::div_zero("division by zero")
                } else {
                    Value::number(a / b)
                }
            }
            ArithOp::Rem => {
                if b.is_zero() {
                    fail::div_zero("modulo by zero")
                } else {
                    Value::number(a % b)
                }
            }
            ArithOp::Pow => pow(a, b),
        };
    }
    if op == ArithOp::Add
        && let (Some(a), Some(b)) = (lhs.as_text(), rhs.as_text())
    {
        return Value::text(format!("{a}{b}"));
    }
    fail::type_err(format!("cannot apply {op} to {} and {}", left.kind(), right.kind()))
}

/// Exponentiation with an integer exponent, by binary squaring.
fn pow(base: &BigDecimal, exponent: &BigDecimal) -> Value {
    use num_traits::ToPrimitive;
    if !exponent.is_integer() {
        return fail::type_err("exponent must be an integer");
    }
    let Some(exp) = exponent.to_i64() else {
        return fail::type_err("exponent out of range");
    };
    let negative = exp < 0;
    let mut remaining = exp.unsigned_abs();
    let mut result = BigDecimal::from(1);
    let mut factor = base.clone();
    while remaining > 0 {
        if remaining & 1 == 1 {
            result = &result * &factor;
        }
        remaining >>= 1;
        if remaining > 0 {
            factor = &factor * &factor;
        }
    }
    if negative {
        if result.is_zero() {
            return fail::div_zero("zero to a negative power");
        }
        result = BigDecimal::from(1) / result;
    }
    Value::number(result)
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Value {
    let (lhs, rhs) = (left.clone(), right.clone());
    match op {
        CompareOp::Eq | CompareOp::Ne => {
            if lhs.kind() != rhs.kind() {
                return fail::type_err(format!(
                    "cannot compare {} with {} for equality",
                    lhs.kind(),
                    rhs.kind()
                ));
            }
            let equal = lhs == rhs;
            Value::boolean(if op == CompareOp::Eq { equal } else { !equal })
        }
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => match lhs.compare(&rhs) {
            Some(ordering) => {
                let holds = match op {
                    CompareOp::Lt => ordering.is_lt(),
                    CompareOp::Le => ordering.is_le(),
                    CompareOp::Gt => ordering.is_gt(),
                    CompareOp::Ge => ordering.is_ge(),
                    CompareOp::Eq | CompareOp::Ne => unreachable!(),
                };
                Value::boolean(holds)
            }
            None => fail::type_err(format!("cannot order {} against {}", lhs.kind(), rhs.kind())),
        },
    }
}

fn step_logic(op: BoolOp, left: &Rc<Node>, right: &Rc<Node>, work: &mut LogicWork, incoming: Option<Value>) -> Step {
    match work.stage {
        0 => {
            work.stage = 1;
            Step::Compute(Compute::new(Rc::clone(left)))
        }
        1 => {
            let value = incoming.expect("left operand evaluated");
            let Some(flag) = value.as_scalar().as_bool() else {
                return Step::Done(fail::type_err(format!("{op} expects #true or #false, got {}", value.kind())));
            };
            // Short-circuit: the right operand is never evaluated when the
            // left decides the result.
            match (op, flag) {
                (BoolOp::And, false) => Step::Done(Value::boolean(false)),
                (BoolOp::Or, true) => Step::Done(Value::boolean(true)),
                _ => {
                    work.stage = 2;
                    Step::Compute(Compute::new(Rc::clone(right)))
                }
            }
        }
        _ => {
            let value = incoming.expect("right operand evaluated");
            match value.as_scalar().as_bool() {
                Some(flag) => Step::Done(Value::boolean(flag)),
                None => Step::Done(fail::type_err(format!("{op} expects #true or #false, got {}", value.kind()))),
            }
        }
    }
}

fn step_unary(op: UnaryOp, operand: &Rc<Node>, work: &mut UnaryWork, incoming: Option<Value>) -> Step {
    if !work.started {
        work.started = true;
        return Step::Compute(Compute::new(Rc::clone(operand)));
    }
    let value = incoming.expect("operand evaluated");
    let scalar = value.as_scalar();
    let result = match op {
        UnaryOp::Plus => match scalar.as_number() {
            Some(_) => scalar,
            None => fail::type_err(format!("unary + expects a number, got {}", value.kind())),
        },
        UnaryOp::Minus => match scalar.as_number() {
            Some(n) => Value::number(-n),
            None => fail::type_err(format!("unary - expects a number, got {}", value.kind())),
        },
        UnaryOp::Not => match scalar.as_bool() {
            Some(flag) => Value::boolean(!flag),
            None => fail::type_err(format!("!! expects #true or #false, got {}", value.kind())),
        },
    };
    Step::Done(result)
}

fn step_fallback(left: &Rc<Node>, right: &Rc<Node>, work: &mut FallbackWork, incoming: Option<Value>) -> Step {
    match work.stage {
        0 => {
            work.stage = 1;
            Step::Compute(Compute::new(Rc::clone(left)).allow_failures(true))
        }
        1 => {
            let value = incoming.expect("left operand evaluated");
            if value.is_fail() {
                work.stage = 2;
                Step::Compute(Compute::new(Rc::clone(right)))
            } else {
                Step::Done(value)
            }
        }
        _ => Step::Done(incoming.expect("right operand evaluated")),
    }
}

// --- structure literals ---------------------------------------------------

fn step_build(ops: &[FieldOpNode], work: &mut BuildWork, frame_scopes: &Scopes, incoming: Option<Value>) -> Step {
    if work.scopes.is_none() {
        work.scopes = Some(frame_scopes.clone());
    }
    let mut incoming = incoming;
    loop {
        match work.stage {
            BuildStage::NextOp => {
                let Some(op) = ops.get(work.op_index) else {
                    return Step::Done(Value::structure(std::mem::take(&mut work.out)));
                };
                match op {
                    FieldOpNode::Spread(expr) => {
                        work.stage = BuildStage::Spread;
                        return Step::Compute(compute_in_build(work, Rc::clone(expr)));
                    }
                    FieldOpNode::Field { key, value } => {
                        work.key.clear();
                        work.key_index = 0;
                        work.positional = key.is_none();
                        work.target = AssignTarget::Out;
                        if let Some(segs) = key {
                            if let Some(FieldSeg::Scope(name)) = segs.first() {
                                work.target = AssignTarget::Scope(*name);
                                work.key_index = 1;
                            }
                            work.stage = BuildStage::Key;
                        } else {
                            work.stage = BuildStage::Value;
                            return Step::Compute(compute_in_build(work, Rc::clone(value)));
                        }
                    }
                }
            }
            BuildStage::Key => {
                let FieldOpNode::Field { key, value } = &ops[work.op_index] else {
                    return Step::Done(fail::runtime("field op changed under evaluation"));
                };
                let segs = key.as_ref().expect("key stage only runs for keyed fields");
                if let Some(resolved) = incoming.take() {
                    match assign_seg_from_value(&segs[work.key_index], &resolved) {
                        Ok(seg) => {
                            work.key.push(seg);
                            work.key_index += 1;
                        }
                        Err(failure) => return Step::Done(failure),
                    }
                }
                while work.key_index < segs.len() {
                    match &segs[work.key_index] {
                        FieldSeg::Token(name) | FieldSeg::Text(name) => {
                            work.key.push(AssignSeg::Key(FieldKey::text(name)));
                            work.key_index += 1;
                        }
                        FieldSeg::Index(IndexSeg::Literal(index)) => {
                            work.key.push(AssignSeg::Index(*index));
                            work.key_index += 1;
                        }
                        FieldSeg::Index(IndexSeg::Computed(expr)) | FieldSeg::Compute(expr) => {
                            return Step::Compute(compute_in_build(work, Rc::clone(expr)));
                        }
                        FieldSeg::Scope(name) => {
                            return Step::Done(fail::runtime(format!("{name} cannot appear mid-path")));
                        }
                    }
                }
                work.stage = BuildStage::Value;
                return Step::Compute(compute_in_build(work, Rc::clone(value)));
            }
            BuildStage::Value => {
                let value = incoming.take().expect("field value evaluated");
                if let Err(failure) = apply_field(work, value) {
                    return Step::Done(failure);
                }
                work.op_index += 1;
                work.stage = BuildStage::NextOp;
            }
            BuildStage::Spread => {
                let value = incoming.take().expect("spread operand evaluated");
                let Some(fields) = value.as_struct_ref() else {
                    return Step::Done(fail::type_err(format!("cannot spread {}", value.kind())));
                };
                work.out.splice(fields);
                work.op_index += 1;
                work.stage = BuildStage::NextOp;
            }
        }
    }
}

/// Child computations inside a literal see the fields built so far as
/// `$out`, plus any scope rebinds made by earlier ops.
fn compute_in_build(work: &BuildWork, node: Rc<Node>) -> Compute {
    let scopes = work
        .scopes
        .as_ref()
        .expect("build scopes initialized")
        .bind(ScopeName::Out, Value::structure(work.out.clone()));
    Compute::new(node).base(scopes)
}

fn assign_seg_from_value(seg: &FieldSeg, resolved: &Value) -> Result<AssignSeg, Value> {
    match seg {
        FieldSeg::Index(IndexSeg::Computed(_)) => resolved
            .as_index()
            .map(AssignSeg::Index)
            .ok_or_else(|| fail::type_err("computed index must be a non-negative integer")),
        FieldSeg::Compute(_) => computed_key(resolved).map(AssignSeg::Key).ok_or_else(|| {
            fail::type_err(format!("computed key must be text or a tag, got {}", resolved.kind()))
        }),
        _ => Err(fail::runtime("segment does not take a computed key")),
    }
}

fn apply_field(work: &mut BuildWork, value: Value) -> Result<(), Value> {
    if work.positional {
        work.out.push_unnamed(value);
        return Ok(());
    }
    match work.target {
        AssignTarget::Out => {
            let base = Value::structure(std::mem::take(&mut work.out));
            let assigned = assign_path(&base, &work.key, value)?;
            work.out = assigned
                .as_struct_ref()
                .cloned()
                .expect("assignment into a structure yields a structure");
            Ok(())
        }
        AssignTarget::Scope(name) => {
            let scopes = work.scopes.as_ref().expect("build scopes initialized");
            let base = scopes.get(name).cloned().unwrap_or_else(Value::empty);
            let updated = if work.key.is_empty() {
                value
            } else {
                assign_path(&base, &work.key, value)?
            };
            work.scopes = Some(scopes.bind(name, updated));
            Ok(())
        }
    }
}

// --- pipelines ------------------------------------------------------------

fn next_is_fallback(ops: &[PipeOp], index: usize) -> bool {
    matches!(ops.get(index), Some(PipeOp::Fallback(_)))
}

#[expect(clippy::too_many_arguments, reason = "pipeline stage plumbing is wide by nature")]
fn step_pipeline(
    seed: Option<&Rc<Node>>,
    ops: &[PipeOp],
    work: &mut PipeWork,
    scopes: &Scopes,
    module: &Rc<Module>,
    incoming: Option<Value>,
    services: &mut Services<'_>,
) -> Step {
    let mut incoming = incoming;
    loop {
        match work.stage {
            PipeStage::Start => {
                if let Some(seed) = seed {
                    work.stage = PipeStage::AwaitSeed;
                    return Step::Compute(Compute::new(Rc::clone(seed)).allow_failures(next_is_fallback(ops, 0)));
                }
                let Some(input) = scopes.get(ScopeName::In).cloned() else {
                    return Step::Done(fail::runtime("pipeline without a seed needs $in"));
                };
                work.current = Some(input);
                work.stage = PipeStage::NextOp;
            }
            PipeStage::AwaitSeed => {
                work.current = incoming.take();
                work.stage = PipeStage::NextOp;
            }
            PipeStage::AwaitFallback | PipeStage::AwaitBody => {
                work.current = incoming.take();
                work.op_index += 1;
                work.stage = PipeStage::NextOp;
            }
            PipeStage::AwaitStruct => {
                let produced = incoming.take().expect("struct op evaluated");
                if produced.is_fail() {
                    work.current = Some(produced);
                } else {
                    let current = work.current.take().expect("pipeline holds a value");
                    let mut merged = current
                        .as_struct_ref()
                        .cloned()
                        .expect("checked to be a structure before merging");
                    let Some(fields) = produced.as_struct_ref() else {
                        return Step::Done(fail::type_err("pipeline struct op must produce a structure"));
                    };
                    merged.splice(fields);
                    work.current = Some(Value::structure(merged));
                }
                work.op_index += 1;
                work.stage = PipeStage::NextOp;
            }
            PipeStage::AwaitBlockValue => {
                let produced = incoming.take().expect("block expression evaluated");
                let Some(block) = produced.as_block().cloned() else {
                    return Step::Done(fail::type_err(format!(
                        "pipeline block op expects a block, got {}",
                        produced.kind()
                    )));
                };
                let current = work.current.clone().expect("pipeline holds a value");
                work.stage = PipeStage::AwaitBody;
                return Step::Compute(
                    Compute::new(Rc::clone(&block.body))
                        .base(block.scopes.clone())
                        .scope(ScopeName::In, current)
                        .module(Rc::clone(&block.module))
                        .allow_failures(next_is_fallback(ops, work.op_index + 1)),
                );
            }
            PipeStage::AwaitDynamic => {
                let selector = incoming.take().expect("dynamic selector evaluated");
                let target = if let Some(tag) = selector.as_tag() {
                    tag.owner()
                } else if let Some(instance) = selector.as_handle() {
                    instance.kind().owner()
                } else {
                    match emit(
                        work,
                        ops,
                        fail::type_err(format!(
                            "dynamic dispatch expects a tag or handle, got {}",
                            selector.kind()
                        )),
                    ) {
                        Some(step) => return step,
                        None => continue,
                    }
                };
                let Some(target) = target else {
                    match emit(work, ops, fail::runtime("dispatch target module is gone")) {
                        Some(step) => return step,
                        None => continue,
                    }
                };
                let name = work.call.as_ref().expect("dynamic call in progress").name.clone();
                let key = ResolveKey {
                    kind: crate::module::DefKind::Function,
                    path: name.split('.').map(ToOwned::to_owned).collect(),
                    namespace: None,
                };
                match target.lookup_resolution(&key) {
                    Some(Resolution::Function(overloads)) => {
                        work.call.as_mut().expect("dynamic call in progress").overloads = Some(overloads);
                        match continue_call(work, ops, services) {
                            Some(step) => return step,
                            None => continue,
                        }
                    }
                    Some(Resolution::Ambiguous) => {
                        match emit(work, ops, fail::ambiguous(format!("ambiguous function |{name}"))) {
                            Some(step) => return step,
                            None => continue,
                        }
                    }
                    _ => match emit(work, ops, fail::not_found(format!("unknown function |{name}"))) {
                        Some(step) => return step,
                        None => continue,
                    },
                }
            }
            PipeStage::AwaitArgs => {
                let args = incoming.take().expect("argument structure evaluated");
                let call = work.call.as_mut().expect("call in progress");
                call.args = Some(args);
                call.args_node = None;
                match continue_call(work, ops, services) {
                    Some(step) => return step,
                    None => continue,
                }
            }
            PipeStage::NextOp => {
                let Some(op) = ops.get(work.op_index) else {
                    let value = work.current.take().expect("pipeline holds a value");
                    return Step::Done(value);
                };
                let current = work.current.clone().expect("pipeline holds a value");
                match op {
                    PipeOp::Fallback(expr) => {
                        if current.is_fail() {
                            work.stage = PipeStage::AwaitFallback;
                            return Step::Compute(
                                Compute::new(Rc::clone(expr))
                                    .scope(ScopeName::In, current)
                                    .allow_failures(next_is_fallback(ops, work.op_index + 1)),
                            );
                        }
                        work.op_index += 1;
                    }
                    PipeOp::Struct(literal) => {
                        if current.as_struct_ref().is_none() {
                            match emit(work, ops, fail::type_err(format!(
                                "pipeline struct op needs a structure, got {}",
                                current.kind()
                            ))) {
                                Some(step) => return step,
                                None => continue,
                            }
                        }
                        work.stage = PipeStage::AwaitStruct;
                        return Step::Compute(
                            Compute::new(Rc::clone(literal))
                                .scope(ScopeName::In, current)
                                .allow_failures(next_is_fallback(ops, work.op_index + 1)),
                        );
                    }
                    PipeOp::Block(expr) => {
                        work.stage = PipeStage::AwaitBlockValue;
                        return Step::Compute(Compute::new(Rc::clone(expr)).scope(ScopeName::In, current));
                    }
                    PipeOp::Func(pipe_func) => {
                        let name = pipe_func.func.display_path();
                        match &pipe_func.func.namespace {
                            crate::ast::FuncNamespace::Dynamic(selector) => {
                                work.call = Some(PendingCall {
                                    overloads: None,
                                    name,
                                    args_node: pipe_func.args.clone(),
                                    args: None,
                                });
                                work.stage = PipeStage::AwaitDynamic;
                                return Step::Compute(
                                    Compute::new(Rc::clone(selector)).scope(ScopeName::In, current),
                                );
                            }
                            _ => {
                                let Some(overloads) = pipe_func.func.resolved().cloned() else {
                                    match emit(work, ops, fail::runtime(format!(
                                        "unresolved function reference |{name}"
                                    ))) {
                                        Some(step) => return step,
                                        None => continue,
                                    }
                                };
                                work.call = Some(PendingCall {
                                    overloads: Some(overloads),
                                    name,
                                    args_node: pipe_func.args.clone(),
                                    args: None,
                                });
                                match continue_call(work, ops, services) {
                                    Some(step) => return step,
                                    None => continue,
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Produces a failure inside the pipeline frame itself. When the next op is
/// a fallback the failure becomes the pipeline value for it to replace;
/// otherwise the pipeline finishes with it (and the engine unwinds).
fn emit(work: &mut PipeWork, ops: &[PipeOp], failure: Value) -> Option<Step> {
    if next_is_fallback(ops, work.op_index + 1) {
        work.current = Some(failure);
        work.op_index += 1;
        work.stage = PipeStage::NextOp;
        None
    } else {
        Some(Step::Done(failure))
    }
}

/// Advances a function call once the overload set (and arguments, when
/// present) are known: evaluate arguments, then dispatch and invoke.
fn continue_call(work: &mut PipeWork, ops: &[PipeOp], services: &mut Services<'_>) -> Option<Step> {
    let pending_args = work
        .call
        .as_ref()
        .expect("call in progress")
        .args_node
        .clone();
    if let Some(args_node) = pending_args {
        let current = work.current.clone().expect("pipeline holds a value");
        work.stage = PipeStage::AwaitArgs;
        return Some(Step::Compute(
            Compute::new(args_node).scope(ScopeName::In, current),
        ));
    }

    let call = work.call.take().expect("call in progress");
    let overloads = call.overloads.expect("overloads resolved before dispatch");
    let current = work.current.clone().expect("pipeline holds a value");
    let name = call.name;

    match morph::dispatch(&current, &overloads) {
        DispatchOutcome::NoMatch => emit(work, ops, fail::fail(format!("no matching overload for |{name}"))),
        DispatchOutcome::Ambiguous => emit(work, ops, fail::ambiguous(format!("ambiguous overload for |{name}"))),
        DispatchOutcome::Selected { definition, morphed } => {
            // Arguments morph against the overload's arg shape when present.
            let args = match (definition.arg_shape(), call.args) {
                (Some(shape), Some(args)) => {
                    let result = morph::morph(&args, shape);
                    match result.into_value() {
                        Some(shaped) => Some(shaped),
                        None => {
                            return emit(work, ops, fail::type_err(format!("arguments do not fit |{name}")));
                        }
                    }
                }
                (_, args) => args,
            };
            match definition.body() {
                FunctionBody::Builtin(function) => {
                    let result = run_builtin(*function, &morphed, args.as_ref(), services);
                    if result.is_fail() {
                        return emit(work, ops, result);
                    }
                    work.current = Some(result);
                    work.op_index += 1;
                    work.stage = PipeStage::NextOp;
                    None
                }
                FunctionBody::Ast(body) => {
                    let owner = definition
                        .owner()
                        .expect("prepared function definitions keep their module alive");
                    work.stage = PipeStage::AwaitBody;
                    Some(Step::Compute(
                        Compute::new(Rc::clone(body))
                            .scope(ScopeName::In, morphed)
                            .scope(ScopeName::Arg, args.unwrap_or_else(Value::empty))
                            .scope(ScopeName::Var, Value::empty())
                            .module(owner)
                            .allow_failures(next_is_fallback(ops, work.op_index + 1)),
                    ))
                }
            }
        }
    }
}

fn run_builtin(
    function: BuiltinFunction,
    input: &Value,
    args: Option<&Value>,
    services: &mut Services<'_>,
) -> Value {
    function.call(input, args, services.print)
}

// --- handles --------------------------------------------------------------

fn step_drop(expr: &Rc<Node>, work: &mut DropWork, incoming: Option<Value>) -> Step {
    match work.stage {
        0 => {
            work.stage = 1;
            Step::Compute(Compute::new(Rc::clone(expr)))
        }
        1 => {
            let value = incoming.expect("drop operand evaluated");
            let Some(instance) = value.as_handle().cloned() else {
                return Step::Done(fail::type_err(format!("!drop expects a handle, got {}", value.kind())));
            };
            // Mark released before the drop block runs so re-entrant drops
            // and uses inside the block fail fast.
            let first_release = instance.release();
            if first_release
                && let Some(body) = instance.kind().drop_block()
            {
                let owner = instance.kind().owner();
                work.handle = Some(value.clone());
                work.stage = 2;
                let mut compute = Compute::new(body)
                    .scope(ScopeName::In, value)
                    .allow_failures(true);
                if let Some(owner) = owner {
                    compute = compute.module(owner);
                }
                return Step::Compute(compute);
            }
            Step::Done(value)
        }
        _ => {
            // The drop block's result (failure included) is discarded.
            let handle = work.handle.take().expect("handle retained across drop block");
            Step::Done(handle)
        }
    }
}
