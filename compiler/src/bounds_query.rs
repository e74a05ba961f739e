// bounds_query.rs — The two-phase query / allocate / compute protocol
//
// `query` and `compute` wrap `runtime::invoke` with the mode each phase
// requires. `allocate` and `release` are the QUERIED → ALLOCATED and
// any → UNINITIALIZED transitions. `ManagedBuffer` owns a descriptor plus
// the allocator that backs it and returns the memory on drop, so a
// descriptor can never be discarded while still holding an allocation.
//
// Preconditions: `allocate` needs a QUERIED descriptor.
// Postconditions: after `release`, the descriptor is UNINITIALIZED and the
//   memory went back to the allocator exactly once.
// Failure modes: E0200 for out-of-order transitions, E0201 for degenerate
//   shapes, E0202 for allocation failure, E0203 for releasing nothing.
// Side effects: host allocation through the supplied allocator.

use crate::allocator::HostAllocator;
use crate::descriptor::{BufferDescriptor, DescriptorState};
use crate::diag::{codes, Diagnostic};
use crate::runtime::{invoke, is_bounds_query, InvocationMode, Pipeline, PipelineArg, RuntimeContext};

/// Run `pipeline` in bounds-query mode. At least one buffer argument must
/// be unbacked; afterwards every unbacked descriptor is QUERIED.
pub fn query(
    pipeline: &dyn Pipeline,
    ctx: &RuntimeContext,
    args: &mut [PipelineArg<'_>],
) -> Result<(), Diagnostic> {
    if !is_bounds_query(args) {
        return Err(Diagnostic::error(
            codes::E0200,
            format!("bounds query of {} with every buffer already allocated", pipeline.name()),
        ));
    }
    invoke(pipeline, ctx, args).map(|_| ())
}

/// Run `pipeline` in compute mode. Every buffer argument must be backed.
pub fn compute(
    pipeline: &dyn Pipeline,
    ctx: &RuntimeContext,
    args: &mut [PipelineArg<'_>],
) -> Result<(), Diagnostic> {
    if let Some(b) = args
        .iter()
        .filter_map(PipelineArg::as_buffer)
        .find(|b| !b.is_backed())
    {
        return Err(Diagnostic::error(
            codes::E0200,
            format!(
                "{} is {} and has no host memory; query and allocate before computing with {}",
                b.name(),
                b.state(),
                pipeline.name()
            ),
        ));
    }
    match invoke(pipeline, ctx, args)? {
        InvocationMode::Compute => Ok(()),
        InvocationMode::BoundsQuery => Err(Diagnostic::error(
            codes::E0200,
            format!("{} ran as a bounds query", pipeline.name()),
        )),
    }
}

/// QUERIED → ALLOCATED. Returns the number of bytes allocated.
pub fn allocate<A: HostAllocator + ?Sized>(
    desc: &mut BufferDescriptor,
    allocator: &A,
) -> Result<usize, Diagnostic> {
    if desc.state() != DescriptorState::Queried {
        return Err(Diagnostic::error(
            codes::E0200,
            format!("can't allocate {} in state {}", desc.name(), desc.state()),
        )
        .with_hint("allocation follows a completed bounds query"));
    }
    let size = desc.required_bytes()?;
    let memory = allocator.alloc(size).map_err(|e| {
        Diagnostic::error(
            codes::E0202,
            format!("can't allocate host memory for {}: {}", desc.name(), e),
        )
    })?;
    if let Err((diag, memory)) = desc.attach(memory) {
        allocator.free(memory);
        return Err(diag);
    }
    tracing::debug!(buffer = desc.name(), bytes = size, "allocated");
    Ok(size)
}

/// Any state → UNINITIALIZED, returning the memory to `allocator`.
pub fn release<A: HostAllocator + ?Sized>(
    desc: &mut BufferDescriptor,
    allocator: &A,
) -> Result<(), Diagnostic> {
    let memory = desc.detach().ok_or_else(|| {
        Diagnostic::error(
            codes::E0203,
            format!("{} has no host memory to release", desc.name()),
        )
    })?;
    tracing::debug!(buffer = desc.name(), bytes = memory.len(), "released");
    allocator.free(memory);
    Ok(())
}

// ── Managed buffer ──────────────────────────────────────────────────────────

/// A descriptor together with the allocator backing it. Dropping it
/// releases any attached memory.
pub struct ManagedBuffer<A: HostAllocator> {
    desc: BufferDescriptor,
    allocator: A,
}

impl<A: HostAllocator> ManagedBuffer<A> {
    pub fn new(desc: BufferDescriptor, allocator: A) -> Self {
        ManagedBuffer { desc, allocator }
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.desc
    }

    pub fn descriptor_mut(&mut self) -> &mut BufferDescriptor {
        &mut self.desc
    }

    pub fn is_allocated(&self) -> bool {
        self.desc.is_backed()
    }

    pub fn allocate(&mut self) -> Result<usize, Diagnostic> {
        allocate(&mut self.desc, &self.allocator)
    }

    pub fn release(&mut self) -> Result<(), Diagnostic> {
        release(&mut self.desc, &self.allocator)
    }

    /// Release only if something is attached.
    pub fn release_if_allocated(&mut self) {
        if self.desc.is_backed() {
            let _ = self.release();
        }
    }

    /// Replace the descriptor, releasing the old one's memory first.
    pub fn reset_to(&mut self, desc: BufferDescriptor) {
        self.release_if_allocated();
        self.desc = desc;
    }
}

impl<A: HostAllocator> Drop for ManagedBuffer<A> {
    fn drop(&mut self) {
        self.release_if_allocated();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::CountingAllocator;
    use crate::types::ScalarType;

    fn queried(extents: &[(i32, i32)]) -> BufferDescriptor {
        let mut d = BufferDescriptor::new("q", ScalarType::float(32), extents.len());
        d.set_dense_shape(extents).unwrap();
        d.mark_queried();
        d
    }

    #[test]
    fn allocate_sizes_from_the_queried_shape() {
        let alloc = CountingAllocator::new();
        let mut d = queried(&[(-1, 10), (-1, 10), (0, 3)]);
        assert_eq!(allocate(&mut d, &alloc).unwrap(), 4 * 10 * 10 * 3);
        assert_eq!(d.state(), DescriptorState::Allocated);
        assert_eq!(alloc.live_bytes(), 1200);
        release(&mut d, &alloc).unwrap();
        assert_eq!(alloc.live_allocations(), 0);
    }

    #[test]
    fn oversized_query_allocates_nothing() {
        let alloc = CountingAllocator::new();
        let mut d = BufferDescriptor::new("huge", ScalarType::float(64), 3);
        d.set_shape(vec![crate::descriptor::DimensionBounds::new(0, i32::MAX, 1); 3]);
        d.mark_queried();
        let err = allocate(&mut d, &alloc).unwrap_err();
        assert!(err.has_code(codes::E0201));
        assert_eq!(alloc.total_allocations(), 0);
        assert_eq!(d.state(), DescriptorState::Queried);
    }

    #[test]
    fn allocate_requires_a_query() {
        let alloc = CountingAllocator::new();
        let mut d = BufferDescriptor::new("fresh", ScalarType::uint(8), 2);
        let err = allocate(&mut d, &alloc).unwrap_err();
        assert!(err.has_code(codes::E0200));
        assert!(err.message.contains("UNINITIALIZED"));
        assert_eq!(alloc.total_allocations(), 0);
    }

    #[test]
    fn degenerate_query_allocates_nothing() {
        let alloc = CountingAllocator::new();
        let mut d = queried(&[(0, 0), (0, 0)]);
        assert!(allocate(&mut d, &alloc).unwrap_err().has_code(codes::E0201));
        assert_eq!(alloc.total_allocations(), 0);
    }

    #[test]
    fn allocation_failure_leaves_nothing_behind() {
        let alloc = CountingAllocator::with_limit(16);
        let mut d = queried(&[(0, 100)]);
        let err = allocate(&mut d, &alloc).unwrap_err();
        assert!(err.has_code(codes::E0202));
        assert!(err.message.contains("400 bytes"));
        assert!(!d.is_backed());
        assert_eq!(d.state(), DescriptorState::Queried);
    }

    #[test]
    fn double_release_is_an_error() {
        let alloc = CountingAllocator::new();
        let mut d = queried(&[(0, 4)]);
        allocate(&mut d, &alloc).unwrap();
        release(&mut d, &alloc).unwrap();
        assert!(release(&mut d, &alloc).unwrap_err().has_code(codes::E0203));
        assert_eq!(alloc.total_frees(), 1);
    }

    #[test]
    fn managed_buffer_releases_on_drop_and_reset() {
        let alloc = CountingAllocator::new();
        {
            let mut m = ManagedBuffer::new(queried(&[(0, 8)]), alloc.clone());
            m.allocate().unwrap();
            assert_eq!(alloc.live_allocations(), 1);
            m.reset_to(queried(&[(0, 16)]));
            assert_eq!(alloc.live_allocations(), 0);
            m.allocate().unwrap();
            assert_eq!(alloc.live_bytes(), 64);
        }
        assert_eq!(alloc.live_allocations(), 0);
        assert_eq!(alloc.total_allocations(), alloc.total_frees());
    }
}
