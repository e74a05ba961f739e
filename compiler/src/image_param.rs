// image_param.rs — Image parameters: bound accessors, constraints, sampling
//
// `OutputImageParam` is a dimensioned external buffer handle. It exposes the
// symbolic min/extent/stride of each dimension, lets callers install
// constraints on them, and derives edge accessors (left, right, ...).
// `ImageParam` adds buffer binding and call-style sampling with implicit
// placeholder expansion and coordinate type coercion.
//
// Preconditions: none.
// Postconditions: sampling expressions carry exactly `dimensions` int32
//   coordinates.
// Failure modes: every misuse returns a usage `Diagnostic` naming the
//   parameter, the dimension or argument index, and expected vs actual
//   counts or types.
// Side effects: explicitly named `ImageParam`s reserve their name in the
//   process-wide name table.

use std::fmt;
use std::ops::Deref;

use crate::argument::Argument;
use crate::buffer::Buffer;
use crate::diag::{codes, Diagnostic};
use crate::expr::{Expr, Var};
use crate::id::reserve_name;
use crate::parameter::{BoundField, Parameter};
use crate::types::{CoordinateCoercion, ScalarType};

// ── Output image parameter ──────────────────────────────────────────────────

/// Handle on an output (or any) image parameter. A default-constructed
/// handle is undefined: it has no name, no type and zero dimensions.
#[derive(Clone, Default)]
pub struct OutputImageParam {
    param: Option<Parameter>,
}

impl OutputImageParam {
    pub fn undefined() -> Self {
        Self::default()
    }

    /// Wrap an existing buffer parameter.
    pub fn from_parameter(param: Parameter) -> Result<Self, Diagnostic> {
        if !param.is_buffer() {
            return Err(Diagnostic::error(
                codes::E0109,
                format!(
                    "parameter {} is a scalar and can't be used as an image",
                    param.name()
                ),
            ));
        }
        Ok(OutputImageParam { param: Some(param) })
    }

    /// A fresh output image parameter with the given name.
    pub fn with_name(ty: ScalarType, dimensions: usize, name: impl Into<String>) -> Self {
        OutputImageParam {
            param: Some(Parameter::buffer(ty, dimensions, name)),
        }
    }

    /// The parameter's name; empty for an undefined handle.
    pub fn name(&self) -> &str {
        self.param.as_ref().map_or("", Parameter::name)
    }

    pub fn ty(&self) -> Option<ScalarType> {
        self.param.as_ref().map(Parameter::ty)
    }

    pub fn dimensions(&self) -> usize {
        self.param.as_ref().map_or(0, Parameter::dimensions)
    }

    pub fn defined(&self) -> bool {
        self.param.is_some()
    }

    pub fn parameter(&self) -> Option<&Parameter> {
        self.param.as_ref()
    }

    fn require_defined(&self, what: &str) -> Result<&Parameter, Diagnostic> {
        self.param.as_ref().ok_or_else(|| {
            Diagnostic::error(
                codes::E0109,
                format!("can't {what} an undefined image parameter"),
            )
        })
    }

    // ── Symbolic bound accessors ──

    /// The int32 variable `{name}.{field}.{dim}`.
    pub fn bound(&self, field: BoundField, dim: usize) -> Expr {
        let name = format!("{}.{}.{}", self.name(), field, dim);
        let ty = ScalarType::int(32);
        match &self.param {
            Some(param) => Expr::param_variable(ty, name, param.clone()),
            None => Expr::variable(ty, name),
        }
    }

    /// Smallest coordinate of dimension `dim`.
    pub fn min(&self, dim: usize) -> Expr {
        self.bound(BoundField::Min, dim)
    }

    /// Number of coordinates along dimension `dim`.
    pub fn extent(&self, dim: usize) -> Expr {
        self.bound(BoundField::Extent, dim)
    }

    /// Element step between consecutive coordinates of dimension `dim`.
    pub fn stride(&self, dim: usize) -> Expr {
        self.bound(BoundField::Stride, dim)
    }

    // ── Constraints ──

    fn set_constraint(
        &self,
        dim: usize,
        field: BoundField,
        value: Expr,
    ) -> Result<&Self, Diagnostic> {
        let param = self.require_defined("constrain")?;
        param.set_constraint(dim, field, value)?;
        Ok(self)
    }

    pub fn set_min(&self, dim: usize, min: impl Into<Expr>) -> Result<&Self, Diagnostic> {
        self.set_constraint(dim, BoundField::Min, min.into())
    }

    pub fn set_extent(&self, dim: usize, extent: impl Into<Expr>) -> Result<&Self, Diagnostic> {
        self.set_constraint(dim, BoundField::Extent, extent.into())
    }

    pub fn set_stride(&self, dim: usize, stride: impl Into<Expr>) -> Result<&Self, Diagnostic> {
        self.set_constraint(dim, BoundField::Stride, stride.into())
    }

    pub fn set_bounds(
        &self,
        dim: usize,
        min: impl Into<Expr>,
        extent: impl Into<Expr>,
    ) -> Result<&Self, Diagnostic> {
        self.set_min(dim, min)?.set_extent(dim, extent)
    }

    pub fn min_constraint(&self, dim: usize) -> Option<Expr> {
        self.param.as_ref()?.constraint(dim, BoundField::Min)
    }

    pub fn extent_constraint(&self, dim: usize) -> Option<Expr> {
        self.param.as_ref()?.constraint(dim, BoundField::Extent)
    }

    pub fn stride_constraint(&self, dim: usize) -> Option<Expr> {
        self.param.as_ref()?.constraint(dim, BoundField::Stride)
    }

    /// Replace this parameter's bound variables by their installed
    /// constraints and fold constants. Constraints may refer to other bound
    /// variables of the same image; substitution repeats until nothing
    /// changes or every constraint has been applied once per slot.
    pub fn apply_constraints(&self, expr: &Expr) -> Expr {
        let Some(param) = &self.param else {
            return expr.clone();
        };
        let prefix = format!("{}.", param.name());
        let lookup = |name: &str| -> Option<Expr> {
            let rest = name.strip_prefix(&prefix)?;
            let (field, dim) = rest.split_once('.')?;
            param.constraint(dim.parse().ok()?, BoundField::parse(field)?)
        };
        let mut current = expr.clone();
        for _ in 0..=param.dimensions() * 3 {
            let next = current.substitute(&lookup);
            if next == current {
                break;
            }
            current = next;
        }
        current.simplify()
    }

    // ── Derived accessors ──

    fn require_dims(&self, needed: usize, what: &str, which: &str) -> Result<(), Diagnostic> {
        if self.dimensions() < needed {
            return Err(Diagnostic::error(
                codes::E0100,
                format!(
                    "can't ask for the {} of {} image {}",
                    what,
                    which,
                    self.name()
                ),
            )
            .with_hint(format!(
                "{} requires at least {} dimension{}; {} has {}",
                what,
                needed,
                if needed == 1 { "" } else { "s" },
                self.name(),
                self.dimensions()
            )));
        }
        Ok(())
    }

    /// `min(0)`.
    pub fn left(&self) -> Result<Expr, Diagnostic> {
        self.require_dims(1, "left", "a zero-dimensional")?;
        Ok(self.min(0))
    }

    /// `min(0) + extent(0) - 1`.
    pub fn right(&self) -> Result<Expr, Diagnostic> {
        self.require_dims(1, "right", "a zero-dimensional")?;
        Ok(self.min(0) + self.extent(0) - 1)
    }

    /// `min(1)`.
    pub fn top(&self) -> Result<Expr, Diagnostic> {
        self.require_dims(2, "top", "a zero- or one-dimensional")?;
        Ok(self.min(1))
    }

    /// `min(1) + extent(1) - 1`.
    pub fn bottom(&self) -> Result<Expr, Diagnostic> {
        self.require_dims(2, "bottom", "a zero- or one-dimensional")?;
        Ok(self.min(1) + self.extent(1) - 1)
    }

    pub fn width(&self) -> Result<Expr, Diagnostic> {
        self.require_dims(1, "width", "a zero-dimensional")?;
        Ok(self.extent(0))
    }

    pub fn height(&self) -> Result<Expr, Diagnostic> {
        self.require_dims(2, "height", "a zero- or one-dimensional")?;
        Ok(self.extent(1))
    }

    pub fn channels(&self) -> Result<Expr, Diagnostic> {
        self.require_dims(3, "channels", "a fewer-than-three-dimensional")?;
        Ok(self.extent(2))
    }

    /// Argument declaration marking this parameter as a buffer.
    pub fn to_argument(&self) -> Result<Argument, Diagnostic> {
        let param = self.require_defined("declare an argument for")?;
        Ok(Argument::buffer(param.name(), param.ty(), param.dimensions()))
    }
}

impl fmt::Debug for OutputImageParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.param {
            Some(p) => write!(f, "OutputImageParam({}: {}[{}])", p.name(), p.ty(), p.dimensions()),
            None => write!(f, "OutputImageParam(undefined)"),
        }
    }
}

// ── Input image parameter ───────────────────────────────────────────────────

/// An input image parameter: an `OutputImageParam` that can also be bound
/// to a buffer and sampled.
#[derive(Clone)]
pub struct ImageParam {
    image: OutputImageParam,
}

impl ImageParam {
    /// A new image parameter with a synthesized unique name.
    pub fn new(ty: ScalarType, dimensions: usize) -> Self {
        ImageParam {
            image: OutputImageParam {
                param: Some(Parameter::anonymous(ty, Some(dimensions), "ImageParam", 'p')),
            },
        }
    }

    /// A new image parameter with an explicit name, which is reserved so
    /// that no synthesized name collides with it.
    pub fn with_name(ty: ScalarType, dimensions: usize, name: impl Into<String>) -> Self {
        let name = name.into();
        if !reserve_name(&name) {
            tracing::debug!(name = %name, "image parameter name was already in use");
        }
        ImageParam {
            image: OutputImageParam {
                param: Some(Parameter::buffer(ty, dimensions, name)),
            },
        }
    }

    fn param(&self) -> Result<&Parameter, Diagnostic> {
        self.image.require_defined("use")
    }

    /// Bind (or with `None`, unbind) a concrete buffer.
    pub fn set(&self, buffer: impl Into<Option<Buffer>>) -> Result<(), Diagnostic> {
        let param = self.param()?;
        let buffer = buffer.into();
        if let Some(b) = &buffer {
            if b.ty() != param.ty() {
                return Err(Diagnostic::error(
                    codes::E0105,
                    format!(
                        "can't bind ImageParam {} of type {} to Buffer {} of type {}",
                        param.name(),
                        param.ty(),
                        b.name(),
                        b.ty()
                    ),
                ));
            }
        }
        param.set_buffer(buffer);
        Ok(())
    }

    pub fn get(&self) -> Option<Buffer> {
        self.image.param.as_ref()?.bound_buffer()
    }

    /// A load from this image at `coords`. One coordinate may be the
    /// placeholder `_`, which expands in place into enough implicit
    /// variables to reach the image's dimensionality.
    pub fn call<I, E>(&self, coords: I) -> Result<Expr, Diagnostic>
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        let param = self.param()?;
        let dims = param.dimensions();
        let coords: Vec<Expr> = coords.into_iter().map(Into::into).collect();
        if coords.is_empty() {
            if dims != 0 {
                return Err(Diagnostic::error(
                    codes::E0106,
                    format!(
                        "zero-argument access to image {}, which has {} dimensions",
                        param.name(),
                        dims
                    ),
                ));
            }
            return Ok(Expr::call(param.ty(), param.name(), Vec::new(), param.clone()));
        }

        let total = coords.len();
        let mut args = Vec::with_capacity(dims.max(total));
        let mut placeholder_seen = false;
        for coord in coords {
            if coord.is_placeholder() {
                if placeholder_seen {
                    return Err(Diagnostic::error(
                        codes::E0104,
                        format!(
                            "only one implicit placeholder ('_') allowed in argument list for image {}",
                            param.name()
                        ),
                    ));
                }
                placeholder_seen = true;
                // The placeholder itself occupies one of the supplied slots.
                let implicit = (dims + 1).saturating_sub(total);
                args.extend((0..implicit).map(|i| Var::implicit(i).to_expr()));
            } else {
                args.push(coord);
            }
        }

        let args = check_arg_types(param.name(), args, dims)?;
        Ok(Expr::call(param.ty(), param.name(), args, param.clone()))
    }

    /// Fully implicit sampling: `call([_])`.
    pub fn to_expr(&self) -> Result<Expr, Diagnostic> {
        self.call([Var::placeholder()])
    }

    pub fn as_output(&self) -> &OutputImageParam {
        &self.image
    }
}

impl Deref for ImageParam {
    type Target = OutputImageParam;

    fn deref(&self) -> &OutputImageParam {
        &self.image
    }
}

impl fmt::Debug for ImageParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImageParam({}: {}[{}])",
            self.name(),
            self.ty().unwrap_or(ScalarType::int(32)),
            self.dimensions()
        )
    }
}

/// Check the coordinate count and coerce every coordinate to int32.
fn check_arg_types(name: &str, args: Vec<Expr>, dims: usize) -> Result<Vec<Expr>, Diagnostic> {
    if args.len() != dims {
        return Err(Diagnostic::error(
            codes::E0102,
            format!(
                "{}-argument access to image {}, which has {} dimensions",
                args.len(),
                name,
                dims
            ),
        ));
    }
    let int32 = ScalarType::int(32);
    args.into_iter()
        .enumerate()
        .map(|(i, arg)| match arg.ty().coordinate_coercion() {
            CoordinateCoercion::Keep => Ok(arg),
            CoordinateCoercion::Widen => Ok(Expr::cast(int32, arg)),
            CoordinateCoercion::Reject => Err(Diagnostic::error(
                codes::E0103,
                format!(
                    "implicit cast from {} to int32 in argument {} in call to {} is not allowed",
                    arg.ty(),
                    i + 1,
                    name
                ),
            )
            .with_hint("use an explicit cast")),
        })
        .collect()
}
