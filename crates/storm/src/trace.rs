//! Compilation tracing infrastructure.
//!
//! Provides a trait-based tracing system for the compilation substrate. The
//! [`CompilerTracer`] trait defines hook points at the interesting events of a
//! compile: reader phases starting and finishing, lazy loads of name-tree
//! nodes, template instantiation, hot-reload steps, and reported diagnostics.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op (production default) |
//! | [`StderrTracer`] | Human-readable log to stderr |
//! | [`RecordingTracer`] | Full event recording for tests and post-mortem |
//!
//! All hooks have default no-op implementations, so [`NoopTracer`] requires no
//! code of its own and implementations only override the hooks they care
//! about.

use serde::Serialize;

use crate::{diag::CompileError, reader::ReaderPhase};

/// One traced compilation event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TraceEvent {
    /// A reader phase started for a package.
    PhaseStart {
        /// Dotted path of the package.
        pkg: String,
        /// The phase being entered.
        phase: ReaderPhase,
    },
    /// A reader phase finished for a package.
    PhaseEnd { pkg: String, phase: ReaderPhase },
    /// A name-tree node was lazily loaded.
    LazyLoad {
        /// Dotted path of the loaded node.
        path: String,
        /// True when the whole node was loaded, false for a single name.
        all: bool,
    },
    /// A template produced a new entity.
    TemplateInstantiated {
        /// Canonical name of the generated entity, e.g. `Array(Int)`.
        name: String,
    },
    /// One step of a hot reload.
    ReloadStep { what: String },
    /// A diagnostic was reported.
    Diagnostic { error: CompileError },
    /// A behavioural decision at an underspecified site.
    ///
    /// Emitted the first time such a site runs, so the chosen behaviour is
    /// observable rather than silent.
    Decision { what: String },
}

/// Trait for compilation tracing.
///
/// The substrate carries the tracer as a boxed trait object on the world;
/// hooks are rare (per-phase, per-load) so dynamic dispatch is fine here,
/// unlike the per-instruction hooks a VM would need.
pub trait CompilerTracer: std::fmt::Debug {
    /// Called for every traced event.
    fn on_event(&mut self, _event: TraceEvent) {}
}

/// No-op tracer, the production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl CompilerTracer for NoopTracer {}

/// Tracer printing every event to stderr, for debugging a compile.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl CompilerTracer for StderrTracer {
    fn on_event(&mut self, event: TraceEvent) {
        eprintln!("[storm] {event:?}");
    }
}

/// Tracer recording every event, for tests and post-mortem analysis.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events in emission order.
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Removes and returns the recorded events.
    pub fn take(&mut self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.events)
    }
}

impl CompilerTracer for RecordingTracer {
    fn on_event(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}
