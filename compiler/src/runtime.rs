// runtime.rs — Pipeline entry points and the invocation discipline
//
// A `Pipeline` is one compiled entry point. `invoke` runs it in bounds-query
// mode when any buffer argument lacks host memory and in compute mode
// otherwise, checks the arguments against the entry point's signature,
// and moves the descriptors through their lifecycle states. Failures the
// pipeline reports go through the `ErrorLatch`, which then refuses further
// invocations until it is reset.
//
// Preconditions: a compute-mode invocation only receives descriptors whose
//   shape came from a completed query (or an external backing store).
// Postconditions: on success, every unbacked descriptor is QUERIED
//   (query mode) or the output descriptor is COMPUTED (compute mode).
// Failure modes: signature mismatch (E0206), latched failure (E0204),
//   host access during a query (E0207), degenerate query answer (E0201).
// Side effects: `set_num_threads` changes a process-wide setting.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::argument::{ArgumentKind, Signature};
use crate::descriptor::BufferDescriptor;
use crate::diag::{codes, Diagnostic};
use crate::types::ScalarValue;

// ── Arguments ───────────────────────────────────────────────────────────────

/// One actual argument of an invocation.
pub enum PipelineArg<'a> {
    Buffer(&'a mut BufferDescriptor),
    Scalar(ScalarValue),
}

impl PipelineArg<'_> {
    pub fn as_buffer(&self) -> Option<&BufferDescriptor> {
        match self {
            PipelineArg::Buffer(b) => Some(b),
            PipelineArg::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<ScalarValue> {
        match self {
            PipelineArg::Scalar(v) => Some(*v),
            PipelineArg::Buffer(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    BoundsQuery,
    Compute,
}

impl fmt::Display for InvocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationMode::BoundsQuery => write!(f, "bounds query"),
            InvocationMode::Compute => write!(f, "compute"),
        }
    }
}

/// True if any buffer argument has no host memory.
pub fn is_bounds_query(args: &[PipelineArg<'_>]) -> bool {
    args.iter()
        .filter_map(PipelineArg::as_buffer)
        .any(|b| !b.is_backed())
}

// ── Error callback ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LatchState {
    tripped: AtomicBool,
    messages: Mutex<Vec<String>>,
}

/// Error callback target. Clones share the same latch.
#[derive(Debug, Clone, Default)]
pub struct ErrorLatch {
    state: Arc<LatchState>,
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure reported by a running pipeline.
    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(%message, "pipeline reported an error");
        self.state
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        self.state.tripped.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.state.tripped.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<String> {
        self.state
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clear the latch for a new invocation cycle.
    pub fn reset(&self) {
        self.state
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.state.tripped.store(false, Ordering::SeqCst);
    }

    fn unusable(&self, pipeline: &str) -> Diagnostic {
        let mut diag = Diagnostic::error(
            codes::E0204,
            format!("pipeline {pipeline} is unusable for this invocation cycle"),
        )
        .with_hint("re-initialize before invoking it again");
        for message in self.messages() {
            diag = diag.with_cause(message, None);
        }
        diag
    }
}

/// What a running pipeline can reach: the error callback and the
/// parallelism side channel.
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    errors: ErrorLatch,
}

impl RuntimeContext {
    pub fn new(errors: ErrorLatch) -> Self {
        RuntimeContext { errors }
    }

    pub fn errors(&self) -> &ErrorLatch {
        &self.errors
    }

    /// Error callback; returns the status code the pipeline should return.
    pub fn report_error(&self, message: impl Into<String>) -> i32 {
        self.errors.report(message);
        -1
    }

    pub fn num_threads(&self) -> usize {
        num_threads()
    }
}

// ── Parallelism side channel ────────────────────────────────────────────────

static NUM_THREADS: AtomicUsize = AtomicUsize::new(0);

/// Set how many worker threads pipelines use. Zero selects the machine's
/// available parallelism.
pub fn set_num_threads(n: usize) {
    let old = NUM_THREADS.swap(n, Ordering::SeqCst);
    if old != n {
        tracing::info!(threads = n, "pipeline thread count changed");
    }
}

pub fn num_threads() -> usize {
    match NUM_THREADS.load(Ordering::SeqCst) {
        0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
        n => n,
    }
}

/// Evaluate `row` for every `y` in `[min, min + extent)`, splitting the rows
/// into contiguous bands across `num_threads()` scoped threads. Results come
/// back in row order.
pub fn parallel_rows<T, F>(min: i32, extent: i32, row: F) -> Result<Vec<T>, Diagnostic>
where
    T: Send,
    F: Fn(i32) -> Result<T, Diagnostic> + Sync,
{
    let extent = extent.max(0);
    let threads = num_threads().clamp(1, extent.max(1) as usize);
    if threads == 1 {
        return (min..min + extent).map(&row).collect();
    }
    let band = (extent as usize).div_ceil(threads) as i32;
    let row = &row;
    let bands: Vec<Result<Vec<T>, Diagnostic>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads as i32)
            .map(|t| {
                let lo = min + t * band;
                let hi = (lo + band).min(min + extent);
                scope.spawn(move || (lo..hi).map(row).collect::<Result<Vec<T>, _>>())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    Err(Diagnostic::error(codes::E0204, "pipeline worker thread panicked"))
                })
            })
            .collect()
    });
    let mut rows = Vec::with_capacity(extent as usize);
    for band in bands {
        rows.extend(band?);
    }
    Ok(rows)
}

// ── Pipelines ───────────────────────────────────────────────────────────────

/// A compiled pipeline entry point. Buffer arguments appear in signature
/// order and the output buffer is the last one.
pub trait Pipeline: Send + Sync {
    fn name(&self) -> &str;

    fn signature(&self) -> &Signature;

    /// Run once. In bounds-query mode the pipeline must only write the
    /// shape of unbacked descriptors. Nonzero status means failure, which
    /// the pipeline also reports through `ctx.report_error`.
    fn run(&self, ctx: &RuntimeContext, args: &mut [PipelineArg<'_>]) -> i32;
}

fn check_signature(pipeline: &dyn Pipeline, args: &[PipelineArg<'_>]) -> Result<(), Diagnostic> {
    let sig = pipeline.signature();
    let mismatch = |detail: String| {
        Diagnostic::error(
            codes::E0206,
            format!("invalid arguments for {}: {}", pipeline.name(), detail),
        )
        .with_hint(format!("expected {sig}"))
    };
    if sig.arguments.len() != args.len() {
        return Err(mismatch(format!(
            "{} arguments given, {} declared",
            args.len(),
            sig.arguments.len()
        )));
    }
    for (decl, actual) in sig.arguments.iter().zip(args) {
        match (decl.kind, actual) {
            (ArgumentKind::Scalar, PipelineArg::Scalar(v)) => {
                if v.ty() != decl.ty {
                    return Err(mismatch(format!(
                        "{} expects {} but got {} of type {}",
                        decl.name,
                        decl.ty,
                        v,
                        v.ty()
                    )));
                }
            }
            (ArgumentKind::Buffer, PipelineArg::Buffer(b)) => {
                if b.ty() != decl.ty {
                    return Err(mismatch(format!(
                        "{} expects {} elements but {} holds {}",
                        decl.name,
                        decl.ty,
                        b.name(),
                        b.ty()
                    )));
                }
                if b.is_backed() && b.dimensions() != decl.dimensions {
                    return Err(mismatch(format!(
                        "{} expects {} dimensions but {} has {}",
                        decl.name,
                        decl.dimensions,
                        b.name(),
                        b.dimensions()
                    )));
                }
            }
            (ArgumentKind::Scalar, PipelineArg::Buffer(b)) => {
                return Err(mismatch(format!("{} is a scalar but got buffer {}", decl.name, b.name())));
            }
            (ArgumentKind::Buffer, PipelineArg::Scalar(v)) => {
                return Err(mismatch(format!("{} is a buffer but got scalar {}", decl.name, v)));
            }
        }
    }
    Ok(())
}

/// Invoke `pipeline` once, in bounds-query or compute mode.
pub fn invoke(
    pipeline: &dyn Pipeline,
    ctx: &RuntimeContext,
    args: &mut [PipelineArg<'_>],
) -> Result<InvocationMode, Diagnostic> {
    if ctx.errors().is_tripped() {
        return Err(ctx.errors().unusable(pipeline.name()));
    }
    check_signature(pipeline, args)?;

    let mode = if is_bounds_query(args) {
        InvocationMode::BoundsQuery
    } else {
        InvocationMode::Compute
    };
    let touched_before: Vec<u64> = args
        .iter()
        .filter_map(PipelineArg::as_buffer)
        .map(BufferDescriptor::unbacked_accesses)
        .collect();

    tracing::debug!(pipeline = pipeline.name(), %mode, "invoking");
    let status = pipeline.run(ctx, args);

    if mode == InvocationMode::BoundsQuery {
        let buffers = args.iter().filter_map(PipelineArg::as_buffer);
        for (b, before) in buffers.zip(touched_before) {
            if b.unbacked_accesses() != before {
                ctx.errors().report(format!(
                    "{} touched host memory of {} during a bounds query",
                    pipeline.name(),
                    b.name()
                ));
            }
        }
    }
    if status != 0 || ctx.errors().is_tripped() {
        if !ctx.errors().is_tripped() {
            ctx.errors()
                .report(format!("{} returned status {}", pipeline.name(), status));
        }
        return Err(ctx.errors().unusable(pipeline.name()));
    }

    match mode {
        InvocationMode::BoundsQuery => {
            for arg in args.iter_mut() {
                if let PipelineArg::Buffer(b) = arg {
                    if !b.is_backed() {
                        b.required_bytes()?;
                        b.mark_queried();
                        tracing::debug!(buffer = b.name(), shape = ?b.dims(), "bounds query answered");
                    }
                }
            }
        }
        InvocationMode::Compute => {
            let output = args.iter_mut().rev().find_map(|a| match a {
                PipelineArg::Buffer(b) => Some(b),
                PipelineArg::Scalar(_) => None,
            });
            if let Some(b) = output {
                b.mark_computed();
            }
        }
    }
    Ok(mode)
}
