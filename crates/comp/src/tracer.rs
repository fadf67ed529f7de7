//! Observability hooks for the evaluation engine.
//!
//! The engine reports frame lifecycle events through an [`EngineTracer`];
//! the default [`NoopTracer`] compiles away to nothing, and
//! [`RecordingTracer`] captures the event stream for tests and debugging
//! tools.

/// One engine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A frame was pushed for a node; `depth` is the stack depth after the
    /// push.
    Push { node: &'static str, depth: usize },
    /// A frame returned a value.
    Return { node: &'static str, depth: usize, is_fail: bool },
    /// A failure closed a frame that had not opted in to receive it.
    Unwind { node: &'static str, depth: usize },
}

/// Receives engine events during a run.
pub trait EngineTracer {
    fn event(&mut self, event: TraceEvent);
}

/// Tracer that discards everything.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl EngineTracer for NoopTracer {
    #[inline]
    fn event(&mut self, _event: TraceEvent) {}
}

/// Tracer that records the full event stream.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Maximum frame depth observed, a proxy for evaluation nesting.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.events
            .iter()
            .map(|e| match e {
                TraceEvent::Push { depth, .. }
                | TraceEvent::Return { depth, .. }
                | TraceEvent::Unwind { depth, .. } => *depth,
            })
            .max()
            .unwrap_or(0)
    }

    /// Number of frames that returned a failure value.
    #[must_use]
    pub fn failure_returns(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::Return { is_fail: true, .. }))
            .count()
    }
}

impl EngineTracer for RecordingTracer {
    fn event(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}
