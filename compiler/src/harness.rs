// harness.rs — The demo request loop
//
// Each request names a demo and a thread count ("<digit>:<threads>"). The
// harness keeps the render target, the two ping-pong state buffers and the
// timing/latch state in one object. Switching demo re-runs the bounds
// query against the render target and re-allocates the state; every other
// request runs one `update` + `render` frame.
//
// Preconditions: at most one request is in flight; `RequestGate` enforces it.
// Postconditions: after any request returns, the gate is released unless
//   the caller still holds the frame's `Completion`.
// Failure modes: unknown demo index (rejected), allocation failure (E0202),
//   latched pipeline failure (frames suppressed until the next switch).
// Side effects: host allocation, process-wide thread count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::allocator::{HostAllocator, SystemAllocator};
use crate::bounds_query::{compute, query, ManagedBuffer};
use crate::config::HarnessConfig;
use crate::descriptor::{BufferDescriptor, DimensionBounds};
use crate::diag::{codes, Diagnostic};
use crate::demos::{Demo, DemoKind};
use crate::runtime::{set_num_threads, ErrorLatch, PipelineArg, RuntimeContext};
use crate::types::{ScalarType, ScalarValue};

pub const MIN_THREADS: usize = 1;
pub const MAX_THREADS: usize = 32;
const MOUSE_IDLE: (i32, i32) = (-100, -100);

// ── Request gate ────────────────────────────────────────────────────────────

/// Single-flight gate: at most one `Completion` exists at a time.
#[derive(Debug, Clone, Default)]
pub struct RequestGate {
    busy: Arc<AtomicBool>,
}

impl RequestGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<Completion> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Completion {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the gate when the frame has been presented, or when dropped.
#[derive(Debug)]
#[must_use = "the request gate stays closed until the completion is signalled or dropped"]
pub struct Completion {
    busy: Arc<AtomicBool>,
}

impl Completion {
    pub fn complete(self) {}
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

// ── Requests ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Raw demo index; validated against `DemoKind` by the harness.
    pub demo: i32,
    /// Requested thread count, already clamped. `None` for an empty message.
    pub threads: Option<usize>,
}

impl Request {
    /// Parse `"<digit>:<threads>"`. The first byte is the demo digit and
    /// the thread count starts at the third byte.
    pub fn parse(message: &str) -> Self {
        let bytes = message.as_bytes();
        let Some(&first) = bytes.first() else {
            return Request {
                demo: 0,
                threads: None,
            };
        };
        let tail = message.get(2..).unwrap_or("");
        let threads = atoi(tail).clamp(MIN_THREADS as i64, MAX_THREADS as i64) as usize;
        Request {
            demo: i32::from(first) - i32::from(b'0'),
            threads: Some(threads),
        }
    }
}

/// C `atoi`: optional leading whitespace and sign, then digits; anything
/// unparsable is zero.
fn atoi(s: &str) -> i64 {
    let s = s.trim_start();
    let (sign, digits) = match s.as_bytes().first() {
        Some(b'-') => (-1, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (1, s),
    };
    let mut n: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        n = n.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }
    sign * n
}

// ── Timing ──────────────────────────────────────────────────────────────────

/// Rolling average of frame times in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTimer {
    average: u64,
    weight: u64,
}

impl FrameTimer {
    const MAX_WEIGHT: u64 = 100;
    const STABLE_WEIGHT: u64 = 10;

    pub fn record(&mut self, micros: u64) -> u64 {
        self.average = (self.average * self.weight + micros) / (self.weight + 1);
        if self.weight < Self::MAX_WEIGHT {
            self.weight += 1;
        }
        self.average
    }

    pub fn reset(&mut self) {
        *self = FrameTimer::default();
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// The average, or `?` until enough frames have been seen.
    pub fn display(&self) -> String {
        if self.weight < Self::STABLE_WEIGHT {
            "?".to_string()
        } else {
            self.average.to_string()
        }
    }
}

// ── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FrameReport {
    pub demo: DemoKind,
    pub micros: u64,
    pub average: String,
    /// Signal (or drop) once the frame has been presented.
    pub completion: Completion,
}

impl FrameReport {
    pub fn status_line(&self) -> String {
        format!("Pipeline takes: {} us", self.average)
    }
}

#[derive(Debug)]
pub enum Outcome {
    /// A previous request still holds the gate.
    Busy,
    /// The message named no demo.
    Rejected(String),
    /// A pipeline failure was latched earlier; nothing ran.
    Suppressed,
    /// This request failed.
    Failed(Diagnostic),
    Frame(FrameReport),
}

impl Outcome {
    pub fn busy_diagnostic() -> Diagnostic {
        Diagnostic::error(codes::E0205, "a request is already in flight")
            .with_hint("wait for the previous frame to be presented")
    }
}

// ── Harness ─────────────────────────────────────────────────────────────────

pub struct DemoHarness<A: HostAllocator + Clone> {
    demos: Vec<Demo>,
    ctx: RuntimeContext,
    gate: RequestGate,
    target: BufferDescriptor,
    state_1: ManagedBuffer<A>,
    state_2: ManagedBuffer<A>,
    threads: usize,
    first_run: bool,
    current: Option<DemoKind>,
    timer: FrameTimer,
    mouse: (i32, i32),
}

/// The render target: 32-bit pixels, one row per `row_stride` elements.
fn framebuffer(width: i32, height: i32, row_stride: i32) -> Result<BufferDescriptor, Diagnostic> {
    let mut target = BufferDescriptor::new("framebuffer", ScalarType::int(32), 2);
    target.set_shape(vec![
        DimensionBounds::new(0, width, 1),
        DimensionBounds::new(0, height, row_stride),
    ]);
    let size = target.required_bytes()?;
    let memory = SystemAllocator.alloc(size).map_err(|e| {
        Diagnostic::error(codes::E0202, format!("can't allocate the framebuffer: {e}"))
    })?;
    target.attach(memory).map_err(|(diag, _)| diag)?;
    Ok(target)
}

impl<A: HostAllocator + Clone> DemoHarness<A> {
    pub fn new(config: &HarnessConfig, allocator: A) -> Result<Self, Diagnostic> {
        let demos = DemoKind::ALL
            .iter()
            .map(|&kind| Demo::new(kind))
            .collect::<Result<Vec<_>, _>>()?;
        let target = framebuffer(config.width, config.height, config.width)?;
        let state = |name: &str| {
            ManagedBuffer::new(
                BufferDescriptor::new(name, ScalarType::uint(8), 3),
                allocator.clone(),
            )
        };
        Ok(DemoHarness {
            demos,
            ctx: RuntimeContext::new(ErrorLatch::new()),
            gate: RequestGate::new(),
            target,
            state_1: state("state_1"),
            state_2: state("state_2"),
            threads: config.threads,
            first_run: true,
            current: None,
            timer: FrameTimer::default(),
            mouse: MOUSE_IDLE,
        })
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn errors(&self) -> &ErrorLatch {
        self.ctx.errors()
    }

    pub fn current_demo(&self) -> Option<DemoKind> {
        self.current
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn timer(&self) -> &FrameTimer {
        &self.timer
    }

    pub fn mouse(&self) -> (i32, i32) {
        self.mouse
    }

    pub fn set_mouse(&mut self, x: i32, y: i32) {
        self.mouse = (x, y);
    }

    pub fn target(&self) -> &BufferDescriptor {
        &self.target
    }

    /// The buffer the next frame reads from.
    pub fn state(&self) -> &BufferDescriptor {
        self.state_1.descriptor()
    }

    pub fn scratch_state(&self) -> &BufferDescriptor {
        self.state_2.descriptor()
    }

    /// Handle one `"<digit>:<threads>"` message.
    pub fn handle(&mut self, message: &str) -> Outcome {
        let Some(completion) = self.gate.try_acquire() else {
            tracing::debug!(message, "request dropped, previous one still in flight");
            return Outcome::Busy;
        };
        let request = Request::parse(message);

        if let Some(threads) = request.threads {
            if threads != self.threads {
                self.threads = threads;
                set_num_threads(threads);
                self.timer.reset();
            }
        }
        if self.first_run {
            self.first_run = false;
            set_num_threads(self.threads);
        }

        let Some(kind) = DemoKind::from_index(request.demo) else {
            tracing::warn!(demo = request.demo, "bad demo index");
            return Outcome::Rejected("Bad demo index".to_string());
        };
        if self.current != Some(kind) {
            if let Err(diag) = self.switch_to(kind) {
                return Outcome::Failed(diag);
            }
        }
        if self.ctx.errors().is_tripped() {
            return Outcome::Suppressed;
        }
        match self.frame(kind) {
            Ok(micros) => {
                let average = self.timer.record(micros);
                tracing::trace!(demo = %kind, micros, average, "frame");
                Outcome::Frame(FrameReport {
                    demo: kind,
                    micros,
                    average: self.timer.display(),
                    completion,
                })
            }
            Err(diag) => Outcome::Failed(diag),
        }
    }

    fn switch_to(&mut self, kind: DemoKind) -> Result<(), Diagnostic> {
        self.current = None;
        self.state_1.release_if_allocated();
        self.state_2.release_if_allocated();
        self.timer.reset();
        self.ctx.errors().reset();

        let demo = &self.demos[kind.index()];
        self.state_1
            .reset_to(BufferDescriptor::new("state_1", kind.element_type(), 3));
        query(
            &demo.render,
            &self.ctx,
            &mut [
                PipelineArg::Buffer(self.state_1.descriptor_mut()),
                PipelineArg::Buffer(&mut self.target),
            ],
        )?;
        let shape = self.state_1.descriptor().shape_clone("state_2");
        self.state_2.reset_to(shape);

        self.state_1.allocate()?;
        if let Err(diag) = self.state_2.allocate() {
            self.state_1.release_if_allocated();
            return Err(diag);
        }
        if matches!(kind, DemoKind::ReactionDiffusion | DemoKind::ReactionDiffusion2) {
            tracing::debug!("{}", describe_buffer(self.state_1.descriptor()));
        }

        compute(
            &demo.init,
            &self.ctx,
            &mut [PipelineArg::Buffer(self.state_1.descriptor_mut())],
        )?;
        self.current = Some(kind);
        tracing::info!(demo = %kind, threads = self.threads, "switched demo");
        Ok(())
    }

    fn frame(&mut self, kind: DemoKind) -> Result<u64, Diagnostic> {
        let demo = &self.demos[kind.index()];
        let start = Instant::now();
        let updated = compute(
            &demo.update,
            &self.ctx,
            &mut [
                PipelineArg::Buffer(self.state_1.descriptor_mut()),
                PipelineArg::Scalar(ScalarValue::I32(self.mouse.0)),
                PipelineArg::Scalar(ScalarValue::I32(self.mouse.1)),
                PipelineArg::Buffer(self.state_2.descriptor_mut()),
            ],
        );
        let rendered = updated.and_then(|()| {
            compute(
                &demo.render,
                &self.ctx,
                &mut [
                    PipelineArg::Buffer(self.state_2.descriptor_mut()),
                    PipelineArg::Buffer(&mut self.target),
                ],
            )
        });
        let micros = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        std::mem::swap(&mut self.state_1, &mut self.state_2);
        self.mouse = MOUSE_IDLE;
        rendered.map(|()| micros)
    }
}

/// Host state and per-dimension `min, extent, stride` of a descriptor.
pub fn describe_buffer(desc: &BufferDescriptor) -> String {
    desc.to_string()
}
