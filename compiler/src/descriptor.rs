// descriptor.rs — Buffer descriptors for the bounds-query protocol
//
// A descriptor carries optional host memory, a per-dimension
// `{min, extent, stride}` shape, an element type and its lifecycle state.
// A descriptor without host memory puts any invocation that receives it
// into bounds-query mode.
//
// Preconditions: coordinates passed to element access are absolute (they
//   include each dimension's `min`).
// Postconditions: element access never reads or writes outside the
//   reported shape or the attached memory.
// Failure modes: access without host memory, outside the shape or with the
//   wrong element type; attaching memory to an already backed descriptor;
//   sizing a degenerate shape.
// Side effects: none.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::allocator::HostMemory;
use crate::diag::{codes, Diagnostic};
use crate::types::{Handle, ScalarType, ScalarValue, TypeCode};

/// Shape of one dimension. `stride` is in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DimensionBounds {
    pub min: i32,
    pub extent: i32,
    pub stride: i32,
}

impl DimensionBounds {
    pub fn new(min: i32, extent: i32, stride: i32) -> Self {
        DimensionBounds {
            min,
            extent,
            stride,
        }
    }

    /// One past the largest valid coordinate.
    pub fn end(&self) -> i32 {
        self.min.saturating_add(self.extent)
    }

    pub fn contains(&self, coord: i32) -> bool {
        let end = i64::from(self.min) + i64::from(self.extent);
        coord >= self.min && i64::from(coord) < end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorState {
    /// No host memory, shape unknown.
    Uninitialized,
    /// Shape reported by a bounds query, no host memory yet.
    Queried,
    /// Host memory attached, contents not yet produced.
    Allocated,
    /// A compute-mode invocation has written the contents.
    Computed,
}

impl fmt::Display for DescriptorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DescriptorState::Uninitialized => "UNINITIALIZED",
            DescriptorState::Queried => "QUERIED",
            DescriptorState::Allocated => "ALLOCATED",
            DescriptorState::Computed => "COMPUTED",
        };
        f.write_str(s)
    }
}

// ── Descriptor ──────────────────────────────────────────────────────────────

pub struct BufferDescriptor {
    name: String,
    ty: ScalarType,
    dims: Vec<DimensionBounds>,
    host: Option<HostMemory>,
    state: DescriptorState,
    /// Element accesses attempted while no host memory was attached.
    unbacked_accesses: AtomicU64,
}

impl BufferDescriptor {
    /// An unbacked descriptor of the given dimensionality with zeroed shape.
    pub fn new(name: impl Into<String>, ty: ScalarType, dimensions: usize) -> Self {
        BufferDescriptor {
            name: name.into(),
            ty,
            dims: vec![DimensionBounds::default(); dimensions],
            host: None,
            state: DescriptorState::Uninitialized,
            unbacked_accesses: AtomicU64::new(0),
        }
    }

    /// An unbacked descriptor whose shape is copied from `reference`.
    pub fn seeded_from(name: impl Into<String>, ty: ScalarType, reference: &BufferDescriptor) -> Self {
        let mut d = Self::new(name, ty, 0);
        d.dims = reference.dims.clone();
        d
    }

    /// An unbacked copy of this descriptor's type, shape and query state.
    pub fn shape_clone(&self, name: impl Into<String>) -> Self {
        let mut d = Self::new(name, self.ty, 0);
        d.dims = self.dims.clone();
        if self.state != DescriptorState::Uninitialized {
            d.state = DescriptorState::Queried;
        }
        d
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ScalarType {
        self.ty
    }

    pub fn dimensions(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, d: usize) -> Option<DimensionBounds> {
        self.dims.get(d).copied()
    }

    pub fn dims(&self) -> &[DimensionBounds] {
        &self.dims
    }

    pub fn state(&self) -> DescriptorState {
        self.state
    }

    pub fn host(&self) -> Option<&HostMemory> {
        self.host.as_ref()
    }

    pub fn is_backed(&self) -> bool {
        self.host.is_some()
    }

    pub fn unbacked_accesses(&self) -> u64 {
        self.unbacked_accesses.load(Ordering::Relaxed)
    }

    // ── Shape ──

    /// Replace the shape. Used by pipelines answering a bounds query; the
    /// dimensionality may change.
    pub fn set_shape(&mut self, dims: Vec<DimensionBounds>) {
        self.dims = dims;
    }

    /// Set `(min, extent)` per dimension with dense strides, first
    /// dimension innermost. Fails with E0201, leaving the shape untouched,
    /// when a stride does not fit in an `i32`.
    pub fn set_dense_shape(&mut self, bounds: &[(i32, i32)]) -> Result<(), Diagnostic> {
        let mut dims = Vec::with_capacity(bounds.len());
        let mut stride: i32 = 1;
        for (i, &(min, extent)) in bounds.iter().enumerate() {
            dims.push(DimensionBounds::new(min, extent, stride));
            if i + 1 < bounds.len() {
                stride = stride.checked_mul(extent.max(1)).ok_or_else(|| {
                    Diagnostic::error(
                        codes::E0201,
                        format!(
                            "dense stride of dimension {} of {} overflows",
                            i + 1,
                            self.name
                        ),
                    )
                })?;
            }
        }
        self.dims = dims;
        Ok(())
    }

    /// Bytes needed to back the current shape: element size times the
    /// product of the extents, where a zero extent counts as one. A shape
    /// whose extents are all zero (or negative anywhere) is degenerate.
    pub fn required_bytes(&self) -> Result<usize, Diagnostic> {
        let degenerate = self.dims.iter().all(|d| d.extent == 0)
            || self.dims.iter().any(|d| d.extent < 0);
        if degenerate {
            return Err(Diagnostic::error(
                codes::E0201,
                format!("pipeline rejected the shape of {}: {}", self.name, self.shape_string()),
            ));
        }
        self.dims
            .iter()
            .filter(|d| d.extent != 0)
            .try_fold(self.ty.bytes(), |size, d| size.checked_mul(d.extent as usize))
            .ok_or_else(|| {
                Diagnostic::error(
                    codes::E0201,
                    format!(
                        "shape of {} needs more bytes than the host can address: {}",
                        self.name,
                        self.shape_string()
                    ),
                )
            })
    }

    fn shape_string(&self) -> String {
        let parts: Vec<String> = self
            .dims
            .iter()
            .map(|d| format!("[{}, {}, {}]", d.min, d.extent, d.stride))
            .collect();
        parts.join(" ")
    }

    // ── Lifecycle ──

    /// Attach host memory. The memory must cover `required_bytes()`; on
    /// failure it is handed back so the caller can return it to its
    /// allocator.
    pub fn attach(&mut self, memory: HostMemory) -> Result<(), (Diagnostic, HostMemory)> {
        if self.host.is_some() {
            let diag = Diagnostic::error(
                codes::E0200,
                format!("{} already has host memory attached", self.name),
            )
            .with_hint("release it before attaching new memory");
            return Err((diag, memory));
        }
        let needed = match self.required_bytes() {
            Ok(n) => n,
            Err(diag) => return Err((diag, memory)),
        };
        if memory.len() < needed {
            let diag = Diagnostic::error(
                codes::E0200,
                format!(
                    "{} needs {} bytes but {} were attached",
                    self.name,
                    needed,
                    memory.len()
                ),
            );
            return Err((diag, memory));
        }
        self.host = Some(memory);
        self.state = DescriptorState::Allocated;
        Ok(())
    }

    /// Take the host memory back and return to UNINITIALIZED.
    pub fn detach(&mut self) -> Option<HostMemory> {
        let memory = self.host.take()?;
        self.state = DescriptorState::Uninitialized;
        for d in &mut self.dims {
            *d = DimensionBounds::default();
        }
        Some(memory)
    }

    pub(crate) fn mark_queried(&mut self) {
        self.state = DescriptorState::Queried;
    }

    pub(crate) fn mark_computed(&mut self) {
        self.state = DescriptorState::Computed;
    }

    // ── Element access ──

    /// Element offset of absolute coordinates.
    pub fn offset_of(&self, coords: &[i32]) -> Result<usize, Diagnostic> {
        if coords.len() != self.dims.len() {
            return Err(Diagnostic::error(
                codes::E0207,
                format!(
                    "{}-coordinate access to {}, which has {} dimensions",
                    coords.len(),
                    self.name,
                    self.dims.len()
                ),
            ));
        }
        let mut offset: i128 = 0;
        for (i, (&c, d)) in coords.iter().zip(&self.dims).enumerate() {
            if !d.contains(c) {
                return Err(Diagnostic::error(
                    codes::E0207,
                    format!(
                        "coordinate {} of dimension {} is outside [{}, {}) in {}",
                        c,
                        i,
                        d.min,
                        d.end(),
                        self.name
                    ),
                ));
            }
            offset += (i128::from(c) - i128::from(d.min)) * i128::from(d.stride);
        }
        usize::try_from(offset).map_err(|_| {
            Diagnostic::error(
                codes::E0207,
                format!("negative element offset {} in {}", offset, self.name),
            )
        })
    }

    fn byte_range<T>(&self, coords: &[i32]) -> Result<std::ops::Range<usize>, Diagnostic> {
        if std::mem::size_of::<T>() != self.ty.bytes() {
            return Err(Diagnostic::error(
                codes::E0105,
                format!(
                    "{}-byte access to {} whose elements are {}",
                    std::mem::size_of::<T>(),
                    self.name,
                    self.ty
                ),
            ));
        }
        let bytes = self.ty.bytes();
        let start = self.offset_of(coords)?.checked_mul(bytes).ok_or_else(|| {
            Diagnostic::error(
                codes::E0207,
                format!("element at {:?} lies beyond the address space in {}", coords, self.name),
            )
        })?;
        Ok(start..start + bytes)
    }

    fn unbacked(&self) -> Diagnostic {
        self.unbacked_accesses.fetch_add(1, Ordering::Relaxed);
        Diagnostic::error(
            codes::E0207,
            format!("{} has no host memory (bounds query in progress)", self.name),
        )
    }

    fn out_of_memory(&self, range: &std::ops::Range<usize>, len: usize) -> Diagnostic {
        Diagnostic::error(
            codes::E0207,
            format!(
                "bytes {}..{} are outside the {} bytes backing {}",
                range.start, range.end, len, self.name
            ),
        )
    }

    pub fn load<T: bytemuck::Pod>(&self, coords: &[i32]) -> Result<T, Diagnostic> {
        let host = self.host.as_ref().ok_or_else(|| self.unbacked())?;
        let range = self.byte_range::<T>(coords)?;
        let bytes = host
            .as_slice()
            .get(range.clone())
            .ok_or_else(|| self.out_of_memory(&range, host.len()))?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn store<T: bytemuck::Pod>(&mut self, coords: &[i32], value: T) -> Result<(), Diagnostic> {
        if self.host.is_none() {
            return Err(self.unbacked());
        }
        let range = self.byte_range::<T>(coords)?;
        let len = self.host.as_ref().map_or(0, HostMemory::len);
        if range.end > len {
            return Err(self.out_of_memory(&range, len));
        }
        let Some(host) = self.host.as_mut() else {
            return Err(self.unbacked());
        };
        host.as_mut_slice()[range].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Load an element as a tagged value, dispatching on the element type.
    pub fn load_value(&self, coords: &[i32]) -> Result<ScalarValue, Diagnostic> {
        let ty = self.ty;
        let value = match (ty.code, ty.bits) {
            (TypeCode::UInt, 1) => ScalarValue::Bool(self.load::<u8>(coords)? != 0),
            (TypeCode::Int, 8) => ScalarValue::I8(self.load(coords)?),
            (TypeCode::Int, 16) => ScalarValue::I16(self.load(coords)?),
            (TypeCode::Int, 32) => ScalarValue::I32(self.load(coords)?),
            (TypeCode::Int, 64) => ScalarValue::I64(self.load(coords)?),
            (TypeCode::UInt, 8) => ScalarValue::U8(self.load(coords)?),
            (TypeCode::UInt, 16) => ScalarValue::U16(self.load(coords)?),
            (TypeCode::UInt, 32) => ScalarValue::U32(self.load(coords)?),
            (TypeCode::UInt, 64) => ScalarValue::U64(self.load(coords)?),
            (TypeCode::Float, 32) => ScalarValue::F32(self.load(coords)?),
            (TypeCode::Float, 64) => ScalarValue::F64(self.load(coords)?),
            (TypeCode::Handle, _) => ScalarValue::Handle(Handle(self.load::<u64>(coords)? as usize)),
            _ => {
                return Err(Diagnostic::error(
                    codes::E0105,
                    format!("no element access for type {} of {}", ty, self.name),
                ))
            }
        };
        Ok(value)
    }
}

impl fmt::Debug for BufferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferDescriptor")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("dims", &self.dims)
            .field("host", &self.host)
            .field("state", &self.state)
            .finish()
    }
}

/// Host address then one line per dimension: `min, extent, stride`.
impl fmt::Display for BufferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self.host.as_ref().map_or(0, HostMemory::address);
        write!(f, "Buffer {} host = {:#x} ({})", self.name, host, self.state)?;
        for (i, d) in self.dims.iter().enumerate() {
            write!(f, "\n Dimension {}: {}, {}, {}", i, d.min, d.extent, d.stride)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{HostAllocator, SystemAllocator};

    fn backed(bounds: &[(i32, i32)]) -> BufferDescriptor {
        let mut d = BufferDescriptor::new("t", ScalarType::int(32), bounds.len());
        d.set_dense_shape(bounds).unwrap();
        let mem = SystemAllocator.alloc(d.required_bytes().unwrap()).unwrap();
        d.attach(mem).map_err(|(e, _)| e).unwrap();
        d
    }

    #[test]
    fn dense_strides() {
        let mut d = BufferDescriptor::new("s", ScalarType::float(32), 3);
        d.set_dense_shape(&[(-1, 10), (-1, 6), (0, 3)]).unwrap();
        let strides: Vec<i32> = d.dims().iter().map(|d| d.stride).collect();
        assert_eq!(strides, vec![1, 10, 60]);
        assert_eq!(d.required_bytes().unwrap(), 4 * 10 * 6 * 3);
    }

    #[test]
    fn zero_extents_count_as_one() {
        let mut d = BufferDescriptor::new("z", ScalarType::uint(8), 3);
        d.set_shape(vec![
            DimensionBounds::new(0, 4, 1),
            DimensionBounds::new(0, 5, 4),
            DimensionBounds::default(),
        ]);
        assert_eq!(d.required_bytes().unwrap(), 20);
    }

    #[test]
    fn all_zero_shape_is_degenerate() {
        let d = BufferDescriptor::new("degenerate", ScalarType::uint(8), 2);
        let err = d.required_bytes().unwrap_err();
        assert!(err.has_code(codes::E0201));
        assert!(err.message.contains("rejected the shape"));
    }

    #[test]
    fn access_honours_min_and_extent() {
        let mut d = backed(&[(-2, 4), (1, 2)]);
        d.store(&[-2, 1], 7i32).unwrap();
        d.store(&[1, 2], 9i32).unwrap();
        assert_eq!(d.load::<i32>(&[-2, 1]).unwrap(), 7);
        assert_eq!(d.load::<i32>(&[1, 2]).unwrap(), 9);
        assert_eq!(d.offset_of(&[1, 2]).unwrap(), 7);
        assert!(d.store(&[2, 1], 0i32).unwrap_err().has_code(codes::E0207));
        assert!(d.load::<i32>(&[-3, 1]).is_err());
    }

    #[test]
    fn unbacked_access_is_counted() {
        let mut d = BufferDescriptor::new("q", ScalarType::int(32), 1);
        d.set_dense_shape(&[(0, 4)]).unwrap();
        let err = d.load::<i32>(&[0]).unwrap_err();
        assert!(err.message.contains("bounds query"));
        assert!(d.store(&[0], 1i32).is_err());
        assert_eq!(d.unbacked_accesses(), 2);
    }

    #[test]
    fn element_size_must_match() {
        let d = backed(&[(0, 2)]);
        assert!(d.load::<u8>(&[0]).unwrap_err().has_code(codes::E0105));
        assert_eq!(d.load_value(&[1]).unwrap(), ScalarValue::I32(0));
    }

    #[test]
    fn lifecycle_states() {
        let mut d = BufferDescriptor::new("l", ScalarType::uint(8), 1);
        assert_eq!(d.state(), DescriptorState::Uninitialized);
        d.set_dense_shape(&[(0, 8)]).unwrap();
        d.mark_queried();
        let twin = d.shape_clone("l2");
        assert_eq!(twin.state(), DescriptorState::Queried);
        assert_eq!(twin.dims(), d.dims());

        assert!(d.attach(SystemAllocator.alloc(8).unwrap()).is_ok());
        assert_eq!(d.state(), DescriptorState::Allocated);
        let again = SystemAllocator.alloc(8).unwrap();
        let (err, returned) = d.attach(again).unwrap_err();
        assert!(err.has_code(codes::E0200));
        assert_eq!(returned.len(), 8);

        assert!(d.detach().is_some());
        assert_eq!(d.state(), DescriptorState::Uninitialized);
        assert!(d.detach().is_none());
    }

    #[test]
    fn oversized_shape_is_degenerate() {
        let mut d = BufferDescriptor::new("huge", ScalarType::float(64), 3);
        d.set_shape(vec![DimensionBounds::new(0, i32::MAX, 1); 3]);
        let err = d.required_bytes().unwrap_err();
        assert!(err.has_code(codes::E0201));
        assert!(err.message.contains("huge"));
    }

    #[test]
    fn overflowing_dense_stride_keeps_the_old_shape() {
        let mut d = BufferDescriptor::new("wide", ScalarType::uint(8), 3);
        d.set_dense_shape(&[(0, 4)]).unwrap();
        let err = d
            .set_dense_shape(&[(0, 1 << 16), (0, 1 << 16), (0, 2)])
            .unwrap_err();
        assert!(err.has_code(codes::E0201));
        assert_eq!(d.dims(), &[DimensionBounds::new(0, 4, 1)]);
        d.set_dense_shape(&[(0, 1 << 16), (0, 1 << 14)]).unwrap();
        assert_eq!(d.dim(1).unwrap().stride, 1 << 16);
    }

    #[test]
    fn extreme_bounds_do_not_overflow_lookups() {
        let mut d = BufferDescriptor::new("edge", ScalarType::int(32), 1);
        d.set_shape(vec![DimensionBounds::new(i32::MAX - 1, i32::MAX, 1)]);
        assert!(d.dim(0).unwrap().contains(i32::MAX));
        assert!(!d.dim(0).unwrap().contains(i32::MAX - 2));
        assert_eq!(d.offset_of(&[i32::MAX]).unwrap(), 1);
    }

    #[test]
    fn undersized_memory_is_rejected() {
        let mut d = BufferDescriptor::new("small", ScalarType::int(32), 1);
        d.set_dense_shape(&[(0, 4)]).unwrap();
        let (err, _) = d.attach(SystemAllocator.alloc(8).unwrap()).unwrap_err();
        assert!(err.message.contains("needs 16 bytes"));
    }

    #[test]
    fn display_lists_dimensions() {
        let mut d = BufferDescriptor::new("shown", ScalarType::uint(8), 2);
        d.set_dense_shape(&[(-1, 3), (0, 2)]).unwrap();
        let text = d.to_string();
        assert!(text.starts_with("Buffer shown host = 0x0 (UNINITIALIZED)"));
        assert!(text.contains("\n Dimension 0: -1, 3, 1"));
        assert!(text.contains("\n Dimension 1: 0, 2, 3"));
    }
}
