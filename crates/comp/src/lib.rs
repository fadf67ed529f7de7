#![doc = include_str!("../../../README.md")]

mod ast;
mod builtin;
mod engine;
mod eval;
mod fail;
mod handle;
mod io;
mod module;
mod morph;
mod prepare;
mod shape;
mod structure;
mod tag;
mod tracer;
mod value;

pub use crate::{
    ast::{
        ArithOp, BoolOp, CompareOp, Decl, FieldOpNode, FieldSeg, FuncDecl, FuncNamespace, FuncRefNode, HandleDecl,
        HandleRefNode, ImportDecl, IndexSeg, ModuleAst, Node, NodeKind, PipeFuncNode, PipeOp, ShapeBody, ShapeDecl,
        ShapeFieldDecl, ShapeRefNode, Span, TagDecl, TagRefNode, TypeRef, UnaryOp,
    },
    builtin::{BuiltinFunction, builtin_module},
    engine::{Engine, ScopeName, Scopes},
    fail::fail,
    handle::{HandleInstance, HandleKind},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    module::{DefKind, FunctionBody, FunctionDefinition, Module, ModuleId},
    morph::{
        MaskMode, MorphMode, MorphResult, mask, mask_with_mode, morph, morph_with_mode, strict_mask, strong_morph,
        weak_morph,
    },
    prepare::{ModuleRegistry, PrepareError, prepare, resolve_expr},
    shape::{FieldConstraint, Primitive, ShapeDefinition, ShapeField},
    structure::{FieldKey, Structure},
    tag::{TagDefinition, TagKey},
    tracer::{EngineTracer, NoopTracer, RecordingTracer, TraceEvent},
    value::{BlockValue, Value, ValueData, ValueKind},
};

use std::rc::Rc;

/// Evaluates a node against a prepared module, printing to stdout.
///
/// Convenience wrapper over [`Engine`] for hosts that don't need custom
/// output or tracing. The result may be a failure value.
#[must_use]
pub fn evaluate(module: &Rc<Module>, node: &Rc<Node>, scopes: Scopes) -> Value {
    let mut print = StdPrint;
    let mut tracer = NoopTracer;
    Engine::new(&mut print, &mut tracer).run(module, node, scopes)
}

/// Evaluates a node, capturing print output alongside the result.
#[must_use]
pub fn evaluate_with_output(module: &Rc<Module>, node: &Rc<Node>, scopes: Scopes) -> (Value, String) {
    let mut print = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let value = Engine::new(&mut print, &mut tracer).run(module, node, scopes);
    (value, print.into_output())
}
