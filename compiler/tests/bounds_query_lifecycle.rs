// Integration tests for the query / allocate / compute protocol.
//
// These drive the demo entry points the way an ahead-of-time caller would:
// - a render-stage bounds query sizes the state buffer (halo included)
// - allocate, init, update and render run against real host memory
// - repeated demo switches return every allocation

use pbind::allocator::{CountingAllocator, HostAllocator, SystemAllocator};
use pbind::argument::{Argument, Signature};
use pbind::bounds_query::{allocate, compute, query, release, ManagedBuffer};
use pbind::config::HarnessConfig;
use pbind::descriptor::{BufferDescriptor, DescriptorState, DimensionBounds};
use pbind::diag::codes;
use pbind::demos::{Demo, DemoKind};
use pbind::harness::{DemoHarness, Outcome};
use pbind::runtime::{Pipeline, PipelineArg, RuntimeContext};
use pbind::types::{ScalarType, ScalarValue};

const W: i32 = 16;
const H: i32 = 8;

fn framebuffer() -> BufferDescriptor {
    let mut fb = BufferDescriptor::new("fb", ScalarType::int(32), 2);
    fb.set_shape(vec![DimensionBounds::new(0, W, 1), DimensionBounds::new(0, H, W)]);
    let mem = SystemAllocator.alloc((W * H * 4) as usize).unwrap();
    fb.attach(mem).map_err(|(e, _)| e).unwrap();
    fb
}

/// A state descriptor sized by the render stage's bounds query.
fn queried_state(kind: DemoKind, target: &mut BufferDescriptor) -> BufferDescriptor {
    let demo = Demo::new(kind).unwrap();
    let mut state = BufferDescriptor::new("s", kind.element_type(), 3);
    query(
        &demo.render,
        &RuntimeContext::default(),
        &mut [PipelineArg::Buffer(&mut state), PipelineArg::Buffer(target)],
    )
    .unwrap();
    state
}

fn full_cycle(kind: DemoKind) {
    let demo = Demo::new(kind).unwrap();
    let ctx = RuntimeContext::default();
    let alloc = CountingAllocator::new();
    let mut target = framebuffer();

    let mut state_1 = BufferDescriptor::new("state_1", kind.element_type(), 3);
    query(
        &demo.render,
        &ctx,
        &mut [PipelineArg::Buffer(&mut state_1), PipelineArg::Buffer(&mut target)],
    )
    .unwrap();
    assert_eq!(state_1.state(), DescriptorState::Queried);
    assert_eq!(state_1.unbacked_accesses(), 0, "{kind} touched memory during the query");

    let halo = kind.halo();
    assert_eq!(state_1.dim(0).unwrap().min, -halo);
    assert_eq!(state_1.dim(0).unwrap().extent, W + 2 * halo);
    assert_eq!(state_1.dim(1).unwrap().extent, H + 2 * halo);
    assert_eq!(state_1.dim(2).unwrap().extent, kind.channels());

    let bytes = allocate(&mut state_1, &alloc).unwrap();
    let expected = (W + 2 * halo) * (H + 2 * halo) * kind.channels();
    assert_eq!(bytes, expected as usize * kind.element_type().bytes());

    let mut state_2 = state_1.shape_clone("state_2");
    allocate(&mut state_2, &alloc).unwrap();
    assert_eq!(alloc.live_allocations(), 2);

    compute(&demo.init, &ctx, &mut [PipelineArg::Buffer(&mut state_1)]).unwrap();
    assert_eq!(state_1.state(), DescriptorState::Computed);

    compute(
        &demo.update,
        &ctx,
        &mut [
            PipelineArg::Buffer(&mut state_1),
            PipelineArg::Scalar(ScalarValue::I32(W / 2)),
            PipelineArg::Scalar(ScalarValue::I32(H / 2)),
            PipelineArg::Buffer(&mut state_2),
        ],
    )
    .unwrap();
    compute(
        &demo.render,
        &ctx,
        &mut [PipelineArg::Buffer(&mut state_2), PipelineArg::Buffer(&mut target)],
    )
    .unwrap();
    assert!(!ctx.errors().is_tripped());

    for y in 0..H {
        for x in 0..W {
            let pixel = target.load::<i32>(&[x, y]).unwrap() as u32;
            assert_eq!(pixel >> 24, 0xFF, "{kind}: pixel ({x}, {y}) not written");
        }
    }

    release(&mut state_1, &alloc).unwrap();
    release(&mut state_2, &alloc).unwrap();
    assert_eq!(alloc.live_allocations(), 0);
    assert_eq!(alloc.live_bytes(), 0);
    assert_eq!(state_1.state(), DescriptorState::Uninitialized);
}

#[test]
fn game_of_life_cycle() {
    full_cycle(DemoKind::GameOfLife);
}

#[test]
fn julia_cycle() {
    full_cycle(DemoKind::Julia);
}

#[test]
fn reaction_diffusion_cycle() {
    full_cycle(DemoKind::ReactionDiffusion);
}

#[test]
fn reaction_diffusion_2_cycle() {
    full_cycle(DemoKind::ReactionDiffusion2);
}

#[test]
fn compute_before_allocate_is_rejected() {
    let demo = Demo::new(DemoKind::Julia).unwrap();
    let ctx = RuntimeContext::default();
    let mut state = BufferDescriptor::new("s", ScalarType::float(32), 3);
    let err = compute(&demo.init, &ctx, &mut [PipelineArg::Buffer(&mut state)]).unwrap_err();
    assert!(err.has_code(codes::E0200));
    assert!(err.message.contains("UNINITIALIZED"));
    assert!(!ctx.errors().is_tripped());
}

#[test]
fn allocate_needs_a_query_first() {
    let mut state = BufferDescriptor::new("s", ScalarType::float(32), 3);
    let err = allocate(&mut state, &CountingAllocator::new()).unwrap_err();
    assert!(err.has_code(codes::E0200));
}

#[test]
fn release_without_memory_is_rejected() {
    let mut state = BufferDescriptor::new("s", ScalarType::uint(8), 3);
    let err = release(&mut state, &CountingAllocator::new()).unwrap_err();
    assert!(err.has_code(codes::E0203));
}

#[test]
fn query_with_everything_backed_is_rejected() {
    let demo = Demo::new(DemoKind::GameOfLife).unwrap();
    let ctx = RuntimeContext::default();
    let alloc = CountingAllocator::new();
    let mut target = framebuffer();
    let mut state = queried_state(DemoKind::GameOfLife, &mut target);
    allocate(&mut state, &alloc).unwrap();

    let err = query(
        &demo.render,
        &ctx,
        &mut [PipelineArg::Buffer(&mut state), PipelineArg::Buffer(&mut target)],
    )
    .unwrap_err();
    assert!(err.has_code(codes::E0200));
    release(&mut state, &alloc).unwrap();
}

/// Reads its input even when the input is unbacked.
struct Peeker {
    sig: Signature,
}

impl Peeker {
    fn new() -> Self {
        let sig = Signature::new("peeker")
            .with(Argument::buffer("input", ScalarType::int(32), 1))
            .unwrap()
            .with(Argument::buffer("output", ScalarType::int(32), 1))
            .unwrap();
        Peeker { sig }
    }
}

impl Pipeline for Peeker {
    fn name(&self) -> &str {
        "peeker"
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn run(&self, _ctx: &RuntimeContext, args: &mut [PipelineArg<'_>]) -> i32 {
        if let PipelineArg::Buffer(input) = &args[0] {
            let _ = input.load::<i32>(&[0]);
        }
        if let PipelineArg::Buffer(input) = &mut args[0] {
            input.set_dense_shape(&[(0, 4)]).unwrap();
        }
        0
    }
}

#[test]
fn touching_memory_during_a_query_latches_an_error() {
    let ctx = RuntimeContext::default();
    let mut input = BufferDescriptor::new("in", ScalarType::int(32), 1);
    let mut output = BufferDescriptor::new("out", ScalarType::int(32), 1);
    output.set_dense_shape(&[(0, 4)]).unwrap();
    let mem = SystemAllocator.alloc(16).unwrap();
    output.attach(mem).map_err(|(e, _)| e).unwrap();

    let err = query(
        &Peeker::new(),
        &ctx,
        &mut [PipelineArg::Buffer(&mut input), PipelineArg::Buffer(&mut output)],
    )
    .unwrap_err();
    assert!(err.has_code(codes::E0204));
    assert!(ctx.errors().is_tripped());
    assert!(ctx.errors().messages()[0].contains("during a bounds query"));
    assert_ne!(input.state(), DescriptorState::Queried);
}

#[test]
fn managed_buffers_release_on_drop() {
    let alloc = CountingAllocator::new();
    {
        let desc = queried_state(DemoKind::ReactionDiffusion, &mut framebuffer());
        let mut managed = ManagedBuffer::new(desc, alloc.clone());
        managed.allocate().unwrap();
        assert!(managed.is_allocated());
        assert_eq!(alloc.live_bytes(), (W + 2) as usize * (H + 2) as usize * 3 * 4);
    }
    assert_eq!(alloc.live_allocations(), 0);
    assert_eq!(alloc.total_frees(), 1);
}

fn small_config() -> HarnessConfig {
    HarnessConfig {
        width: 24,
        height: 16,
        threads: 2,
        ..HarnessConfig::default()
    }
}

#[test]
fn repeated_switches_do_not_leak() {
    let alloc = CountingAllocator::new();
    let mut harness = DemoHarness::new(&small_config(), alloc.clone()).unwrap();
    for round in 0..3 {
        for demo in [0, 1, 2, 3, 1, 1, 0] {
            match harness.handle(&format!("{demo}:2")) {
                Outcome::Frame(report) => report.completion.complete(),
                _ => panic!("round {round}, demo {demo}: expected a frame"),
            }
            assert_eq!(alloc.live_allocations(), 2);
        }
    }
    drop(harness);
    assert_eq!(alloc.live_allocations(), 0);
    assert_eq!(alloc.total_allocations(), alloc.total_frees());
}

#[test]
fn harness_state_matches_the_render_query() {
    let mut harness = DemoHarness::new(&small_config(), CountingAllocator::new()).unwrap();
    match harness.handle("2:4") {
        Outcome::Frame(report) => {
            assert_eq!(report.demo, DemoKind::ReactionDiffusion);
            report.completion.complete();
        }
        _ => panic!("expected a frame"),
    }
    let state = harness.state();
    assert_eq!(state.dim(0), Some(DimensionBounds::new(-1, 26, 1)));
    assert_eq!(state.dim(1), Some(DimensionBounds::new(-1, 18, 26)));
    assert_eq!(state.dim(2), Some(DimensionBounds::new(0, 3, 26 * 18)));
    assert_eq!(harness.threads(), 4);
}
