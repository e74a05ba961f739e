// parameter.rs — Shared internal parameter object
//
// Every scalar and image parameter handle wraps one `Parameter`. Cloning a
// handle clones the reference, so all copies observe the same bound value,
// range and dimension constraints; the name and type never change after
// construction.
//
// Preconditions: none.
// Postconditions: constraint vectors always have exactly `dimensions` entries.
// Failure modes: constraint indices outside `[0, dimensions)`, constraints on
//   scalar parameters, and scalar values of the wrong type are usage errors.
// Side effects: none beyond the shared state itself.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::buffer::Buffer;
use crate::diag::{codes, Diagnostic};
use crate::expr::Expr;
use crate::id::{alloc_param_id, make_entity_name, ParamId};
use crate::types::{ScalarType, ScalarValue};

/// Per-dimension constraint expressions of an image parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimConstraint {
    pub min: Option<Expr>,
    pub extent: Option<Expr>,
    pub stride: Option<Expr>,
}

/// Which per-dimension field a constraint or bound variable refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundField {
    Min,
    Extent,
    Stride,
}

impl BoundField {
    pub fn as_str(self) -> &'static str {
        match self {
            BoundField::Min => "min",
            BoundField::Extent => "extent",
            BoundField::Stride => "stride",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "min" => Some(BoundField::Min),
            "extent" => Some(BoundField::Extent),
            "stride" => Some(BoundField::Stride),
            _ => None,
        }
    }
}

impl fmt::Display for BoundField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct ParameterState {
    scalar: Option<ScalarValue>,
    min_value: Option<Expr>,
    max_value: Option<Expr>,
    buffer: Option<Buffer>,
    constraints: Vec<DimConstraint>,
}

struct ParameterInner {
    id: ParamId,
    name: String,
    ty: ScalarType,
    is_buffer: bool,
    dimensions: usize,
    state: RefCell<ParameterState>,
}

/// Reference-counted handle on an internal parameter object.
#[derive(Clone)]
pub struct Parameter {
    inner: Rc<ParameterInner>,
}

impl Parameter {
    fn make(
        ty: ScalarType,
        is_buffer: bool,
        dimensions: usize,
        name: impl FnOnce(ParamId) -> String,
    ) -> Self {
        let state = ParameterState {
            constraints: vec![DimConstraint::default(); dimensions],
            ..ParameterState::default()
        };
        let id = alloc_param_id();
        Parameter {
            inner: Rc::new(ParameterInner {
                id,
                name: name(id),
                ty,
                is_buffer,
                dimensions,
                state: RefCell::new(state),
            }),
        }
    }

    /// A scalar parameter.
    pub fn scalar(ty: ScalarType, name: impl Into<String>) -> Self {
        let name = name.into();
        Self::make(ty, false, 0, |_| name)
    }

    /// A buffer (image) parameter of the given dimensionality.
    pub fn buffer(ty: ScalarType, dimensions: usize, name: impl Into<String>) -> Self {
        let name = name.into();
        Self::make(ty, true, dimensions, |_| name)
    }

    /// A parameter whose name is synthesized from its identity token.
    /// `dimensions` of `None` makes a scalar.
    pub fn anonymous(ty: ScalarType, dimensions: Option<usize>, kind: &str, prefix: char) -> Self {
        Self::make(ty, dimensions.is_some(), dimensions.unwrap_or(0), |id| {
            make_entity_name(id, kind, prefix)
        })
    }

    pub fn id(&self) -> ParamId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ty(&self) -> ScalarType {
        self.inner.ty
    }

    pub fn is_buffer(&self) -> bool {
        self.inner.is_buffer
    }

    pub fn dimensions(&self) -> usize {
        self.inner.dimensions
    }

    /// True if both handles refer to the same underlying object.
    pub fn same_as(&self, other: &Parameter) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Scalar value ──

    pub fn set_scalar(&self, value: ScalarValue) -> Result<(), Diagnostic> {
        if self.is_buffer() || value.ty() != self.ty() {
            return Err(Diagnostic::error(
                codes::E0108,
                format!(
                    "can't bind value {} of type {} to parameter {} of type {}",
                    value,
                    value.ty(),
                    self.name(),
                    self.ty()
                ),
            ));
        }
        self.inner.state.borrow_mut().scalar = Some(value);
        Ok(())
    }

    /// Store a value already known to match the declared type.
    pub(crate) fn bind_scalar(&self, value: ScalarValue) {
        debug_assert_eq!(value.ty(), self.ty());
        self.inner.state.borrow_mut().scalar = Some(value);
    }

    pub fn scalar_value(&self) -> Option<ScalarValue> {
        self.inner.state.borrow().scalar
    }

    // ── Range ──

    pub fn set_min_value(&self, min: Option<Expr>) {
        self.inner.state.borrow_mut().min_value = min;
    }

    pub fn set_max_value(&self, max: Option<Expr>) {
        self.inner.state.borrow_mut().max_value = max;
    }

    pub fn min_value(&self) -> Option<Expr> {
        self.inner.state.borrow().min_value.clone()
    }

    pub fn max_value(&self) -> Option<Expr> {
        self.inner.state.borrow().max_value.clone()
    }

    // ── Bound buffer ──

    pub fn set_buffer(&self, buffer: Option<Buffer>) {
        self.inner.state.borrow_mut().buffer = buffer;
    }

    pub fn bound_buffer(&self) -> Option<Buffer> {
        self.inner.state.borrow().buffer.clone()
    }

    // ── Dimension constraints ──

    fn check_dim(&self, dim: usize, field: BoundField) -> Result<(), Diagnostic> {
        if !self.is_buffer() {
            return Err(Diagnostic::error(
                codes::E0101,
                format!(
                    "can't constrain the {} of scalar parameter {}",
                    field,
                    self.name()
                ),
            ));
        }
        if dim >= self.dimensions() {
            return Err(Diagnostic::error(
                codes::E0101,
                format!(
                    "can't constrain the {} of dimension {} of {}, which has {} dimensions",
                    field,
                    dim,
                    self.name(),
                    self.dimensions()
                ),
            ));
        }
        Ok(())
    }

    /// Install a constraint. Purely declarative: nothing is allocated and
    /// no bound buffer is checked.
    pub fn set_constraint(
        &self,
        dim: usize,
        field: BoundField,
        value: Expr,
    ) -> Result<(), Diagnostic> {
        self.check_dim(dim, field)?;
        tracing::debug!(param = self.name(), dim, %field, value = %value, "constraint installed");
        let value = Expr::cast(ScalarType::int(32), value);
        let mut state = self.inner.state.borrow_mut();
        let slot = &mut state.constraints[dim];
        match field {
            BoundField::Min => slot.min = Some(value),
            BoundField::Extent => slot.extent = Some(value),
            BoundField::Stride => slot.stride = Some(value),
        }
        Ok(())
    }

    pub fn constraint(&self, dim: usize, field: BoundField) -> Option<Expr> {
        let state = self.inner.state.borrow();
        let slot = state.constraints.get(dim)?;
        match field {
            BoundField::Min => slot.min.clone(),
            BoundField::Extent => slot.extent.clone(),
            BoundField::Stride => slot.stride.clone(),
        }
    }

    /// Snapshot of all dimension constraints.
    pub fn constraints(&self) -> Vec<DimConstraint> {
        self.inner.state.borrow().constraints.clone()
    }
}

impl PartialEq for Parameter {
    /// Parameters sharing a name are the same binding site.
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other) || self.name() == other.name()
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.inner.name)
            .field("ty", &self.inner.ty)
            .field("is_buffer", &self.inner.is_buffer)
            .field("dimensions", &self.inner.dimensions)
            .finish()
    }
}
