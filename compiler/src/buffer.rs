// buffer.rs — Concrete data buffers bound to image parameters
//
// A `Buffer` is the value an input image parameter is bound to during
// interactive evaluation. Cloning shares the same storage.
//
// Preconditions: extents are non-negative.
// Postconditions: storage holds exactly `bytes()` zero-initialized bytes.
// Failure modes: typed access with the wrong element type or outside the
//   extents is a usage error.
// Side effects: none.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::diag::{codes, Diagnostic};
use crate::id::unique_name;
use crate::types::{ScalarKind, ScalarType};

struct BufferInner {
    name: String,
    ty: ScalarType,
    extents: Vec<usize>,
    data: RefCell<Vec<u8>>,
}

#[derive(Clone)]
pub struct Buffer {
    inner: Rc<BufferInner>,
}

impl Buffer {
    /// A dense, zero-filled buffer with a synthesized name.
    pub fn new(ty: ScalarType, extents: &[usize]) -> Self {
        Self::with_name(ty, extents, unique_name('b'))
    }

    pub fn with_name(ty: ScalarType, extents: &[usize], name: impl Into<String>) -> Self {
        let len = extents.iter().product::<usize>() * ty.bytes();
        Buffer {
            inner: Rc::new(BufferInner {
                name: name.into(),
                ty,
                extents: extents.to_vec(),
                data: RefCell::new(vec![0; len]),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ty(&self) -> ScalarType {
        self.inner.ty
    }

    pub fn dimensions(&self) -> usize {
        self.inner.extents.len()
    }

    pub fn extent(&self, dim: usize) -> Option<usize> {
        self.inner.extents.get(dim).copied()
    }

    pub fn bytes(&self) -> usize {
        self.inner.data.borrow().len()
    }

    pub fn same_as(&self, other: &Buffer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Dense element index, first dimension innermost.
    fn index_of(&self, coords: &[usize]) -> Result<usize, Diagnostic> {
        if coords.len() != self.dimensions()
            || coords.iter().zip(&self.inner.extents).any(|(c, e)| c >= e)
        {
            return Err(Diagnostic::error(
                codes::E0207,
                format!(
                    "access at {:?} is outside buffer {} with extents {:?}",
                    coords,
                    self.name(),
                    self.inner.extents
                ),
            ));
        }
        let mut index = 0;
        let mut stride = 1;
        for (c, e) in coords.iter().zip(&self.inner.extents) {
            index += c * stride;
            stride *= e;
        }
        Ok(index)
    }

    fn check_type<T: ScalarKind>(&self) -> Result<(), Diagnostic> {
        if T::scalar_type() != self.ty() {
            return Err(Diagnostic::error(
                codes::E0105,
                format!(
                    "can't access buffer {} of type {} as {}",
                    self.name(),
                    self.ty(),
                    T::scalar_type()
                ),
            ));
        }
        Ok(())
    }

    pub fn get<T: ScalarKind + bytemuck::Pod>(&self, coords: &[usize]) -> Result<T, Diagnostic> {
        self.check_type::<T>()?;
        let offset = self.index_of(coords)? * self.ty().bytes();
        let data = self.inner.data.borrow();
        Ok(bytemuck::pod_read_unaligned(
            &data[offset..offset + std::mem::size_of::<T>()],
        ))
    }

    pub fn set<T: ScalarKind + bytemuck::Pod>(
        &self,
        coords: &[usize],
        value: T,
    ) -> Result<(), Diagnostic> {
        self.check_type::<T>()?;
        let offset = self.index_of(coords)? * self.ty().bytes();
        let mut data = self.inner.data.borrow_mut();
        data[offset..offset + std::mem::size_of::<T>()].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.inner.name)
            .field("ty", &self.inner.ty)
            .field("extents", &self.inner.extents)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_storage_size() {
        let b = Buffer::new(ScalarType::float(32), &[4, 3]);
        assert_eq!(b.bytes(), 48);
        assert_eq!(b.dimensions(), 2);
        assert_eq!(b.extent(1), Some(3));
        assert_eq!(b.extent(2), None);
    }

    #[test]
    fn typed_access_round_trips() {
        let b = Buffer::new(ScalarType::int(16), &[2, 2]);
        b.set(&[1, 1], -3i16).unwrap();
        assert_eq!(b.get::<i16>(&[1, 1]).unwrap(), -3);
        assert_eq!(b.get::<i16>(&[0, 1]).unwrap(), 0);
    }

    #[test]
    fn wrong_type_and_out_of_bounds_are_rejected() {
        let b = Buffer::new(ScalarType::uint(8), &[2]);
        assert!(b.get::<i16>(&[0]).unwrap_err().has_code(codes::E0105));
        assert!(b.set(&[2], 1u8).unwrap_err().has_code(codes::E0207));
    }

    #[test]
    fn clones_share_storage() {
        let b = Buffer::new(ScalarType::uint(8), &[1]);
        let c = b.clone();
        c.set(&[0], 9u8).unwrap();
        assert_eq!(b.get::<u8>(&[0]).unwrap(), 9);
        assert!(b.same_as(&c));
    }
}
