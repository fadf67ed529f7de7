//! The evaluation engine: a trampoline over per-node state machines.
//!
//! Each AST node evaluates as a small state machine that can pause on a
//! [`Compute`] request for a child node. The engine keeps an explicit frame
//! stack, advances exactly one frame per turn, and feeds each child's value
//! back into its requester. Failures close frames upward until they reach a
//! frame whose pending request opted in with `allow_failures`.

use std::{fmt, rc::Rc};

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    ast::Node,
    eval::{self, Work},
    io::PrintWriter,
    module::Module,
    tracer::{EngineTracer, TraceEvent},
    value::Value,
};

/// Named scope slots passed between frames.
///
/// `Out` is the structure literal currently being built; unprefixed
/// identifier lookup reads it before `In`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeName {
    In,
    Out,
    Arg,
    Ctx,
    Mod,
    Var,
}

impl fmt::Display for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spelled = match self {
            Self::In => "$in",
            Self::Out => "$out",
            Self::Arg => "$arg",
            Self::Ctx => "$ctx",
            Self::Mod => "$mod",
            Self::Var => "$var",
        };
        f.write_str(spelled)
    }
}

/// An immutable, flattened scope map.
///
/// Child frames share the parent's map unless a request overlays bindings,
/// in which case the map is copied once and extended. Values are cheap to
/// clone, so the copy is shallow.
#[derive(Debug, Clone, Default)]
pub struct Scopes {
    map: Rc<AHashMap<ScopeName, Value>>,
}

impl Scopes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (ScopeName, Value)>) -> Self {
        Self {
            map: Rc::new(pairs.into_iter().collect()),
        }
    }

    pub fn get(&self, name: ScopeName) -> Option<&Value> {
        self.map.get(&name)
    }

    /// A new scope set with one binding overlaid.
    #[must_use]
    pub fn bind(&self, name: ScopeName, value: Value) -> Self {
        let mut map = (*self.map).clone();
        map.insert(name, value);
        Self { map: Rc::new(map) }
    }

    fn overlay(&self, overlay: &[(ScopeName, Value)]) -> Self {
        if overlay.is_empty() {
            return self.clone();
        }
        let mut map = (*self.map).clone();
        for (name, value) in overlay {
            map.insert(*name, value.clone());
        }
        Self { map: Rc::new(map) }
    }
}

/// A request to evaluate a child node.
///
/// Produced by a node's state machine; the engine allocates a child frame
/// for it and later feeds the child's value back in.
#[derive(Debug)]
pub struct Compute {
    pub(crate) node: Rc<Node>,
    overlay: SmallVec<[(ScopeName, Value); 3]>,
    base: Option<Scopes>,
    module: Option<Rc<Module>>,
    pub(crate) allow_failures: bool,
}

impl Compute {
    #[must_use]
    pub(crate) fn new(node: Rc<Node>) -> Self {
        Self {
            node,
            overlay: SmallVec::new(),
            base: None,
            module: None,
            allow_failures: false,
        }
    }

    #[must_use]
    pub(crate) fn scope(mut self, name: ScopeName, value: Value) -> Self {
        self.overlay.push((name, value));
        self
    }

    /// Replaces the inherited scope map entirely; used for block bodies,
    /// which see their captured scopes instead of the caller's.
    #[must_use]
    pub(crate) fn base(mut self, scopes: Scopes) -> Self {
        self.base = Some(scopes);
        self
    }

    #[must_use]
    pub(crate) fn module(mut self, module: Rc<Module>) -> Self {
        self.module = Some(module);
        self
    }

    #[must_use]
    pub(crate) fn allow_failures(mut self, allow: bool) -> Self {
        self.allow_failures = allow;
        self
    }
}

/// One step of a node's state machine.
pub(crate) enum Step {
    Compute(Compute),
    Done(Value),
}

/// One entry of the evaluation stack.
pub(crate) struct Frame {
    pub(crate) node: Rc<Node>,
    pub(crate) scopes: Scopes,
    pub(crate) module: Rc<Module>,
    /// Whether this frame's pending request opted in to receive failures.
    allowed: bool,
    pub(crate) work: Work,
}

impl Frame {
    fn root(node: Rc<Node>, scopes: Scopes, module: Rc<Module>) -> Self {
        Self {
            work: Work::for_node(&node),
            node,
            scopes,
            module,
            allowed: false,
        }
    }

    fn for_request(request: Compute, parent: &Frame) -> Self {
        let base = request.base.unwrap_or_else(|| parent.scopes.clone());
        let scopes = base.overlay(&request.overlay);
        let module = request.module.unwrap_or_else(|| Rc::clone(&parent.module));
        Self {
            work: Work::for_node(&request.node),
            node: request.node,
            scopes,
            module,
            allowed: false,
        }
    }
}

/// Host services a run threads through every frame step.
pub(crate) struct Services<'io> {
    pub print: &'io mut dyn PrintWriter,
    pub tracer: &'io mut dyn EngineTracer,
}

/// The evaluation engine.
///
/// Single-threaded and cooperative: one `run` drives one computation to
/// completion, and side effects happen in depth-first source order. Runtime
/// problems come back as failure values, never as Rust errors.
pub struct Engine<'io> {
    print: &'io mut dyn PrintWriter,
    tracer: &'io mut dyn EngineTracer,
}

impl<'io> Engine<'io> {
    pub fn new(print: &'io mut dyn PrintWriter, tracer: &'io mut dyn EngineTracer) -> Self {
        Self { print, tracer }
    }

    /// Evaluates `node` in the context of `module` with the given initial
    /// scopes, returning the final value (which may be a failure).
    pub fn run(&mut self, module: &Rc<Module>, node: &Rc<Node>, scopes: Scopes) -> Value {
        let mut services = Services {
            print: &mut *self.print,
            tracer: &mut *self.tracer,
        };
        let mut stack: Vec<Frame> = vec![Frame::root(Rc::clone(node), scopes, Rc::clone(module))];
        let mut incoming: Option<Value> = None;

        loop {
            let depth = stack.len();
            let frame = stack.last_mut().expect("stack drains only through returns");
            let step = eval::step(frame, incoming.take(), &mut services);
            match step {
                Step::Compute(request) => {
                    frame.allowed = request.allow_failures;
                    let child = Frame::for_request(request, frame);
                    services.tracer.event(TraceEvent::Push {
                        node: child.node.kind.name(),
                        depth: depth + 1,
                    });
                    stack.push(child);
                }
                Step::Done(value) => {
                    let finished = stack.pop().expect("current frame is on the stack");
                    let is_fail = value.is_fail();
                    services.tracer.event(TraceEvent::Return {
                        node: finished.node.kind.name(),
                        depth,
                        is_fail,
                    });
                    if !is_fail {
                        if stack.is_empty() {
                            return value;
                        }
                        incoming = Some(value);
                        continue;
                    }
                    // Failure: close frames until one with a pending
                    // allow_failures request consumes it.
                    loop {
                        let Some(parent) = stack.last_mut() else {
                            return value;
                        };
                        if parent.allowed {
                            parent.allowed = false;
                            incoming = Some(value);
                            break;
                        }
                        services.tracer.event(TraceEvent::Unwind {
                            node: parent.node.kind.name(),
                            depth: stack.len(),
                        });
                        stack.pop();
                    }
                }
            }
        }
    }
}
