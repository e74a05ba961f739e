// param.rs — Typed scalar parameters
//
// `Param<T>` is a named external scalar input. In interactive evaluation it
// holds a bound value; in ahead-of-time compilation it becomes a declared
// argument of the generated entry point. Optional min/max expressions are
// hints for bounds inference and are never used to clamp the bound value.
//
// Preconditions: none.
// Postconditions: stored range expressions have the parameter's type.
// Failure modes: `get` before any `set` is a usage error (E0107).
// Side effects: an inverted constant range is logged as a warning (W0100).

use std::fmt;
use std::marker::PhantomData;

use crate::argument::Argument;
use crate::diag::{codes, Diagnostic};
use crate::expr::Expr;
use crate::parameter::Parameter;
use crate::types::{Handle, ScalarKind, ScalarType};

/// Name of the implicit user-context argument.
pub const USER_CONTEXT_NAME: &str = "__user_context";

/// A typed scalar parameter. Clones alias the same binding.
#[derive(Clone)]
pub struct Param<T: ScalarKind> {
    param: Parameter,
    _ty: PhantomData<T>,
}

impl<T: ScalarKind> Param<T> {
    /// A parameter with a synthesized unique name.
    pub fn new() -> Self {
        Param {
            param: Parameter::anonymous(T::scalar_type(), None, "Param", 'p'),
            _ty: PhantomData,
        }
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Param {
            param: Parameter::scalar(T::scalar_type(), name),
            _ty: PhantomData,
        }
    }

    /// A named parameter with an initial bound value.
    pub fn with_value(name: impl Into<String>, value: T) -> Self {
        let p = Self::with_name(name);
        p.set(value);
        p
    }

    pub fn name(&self) -> &str {
        self.param.name()
    }

    pub fn ty(&self) -> ScalarType {
        T::scalar_type()
    }

    pub fn parameter(&self) -> &Parameter {
        &self.param
    }

    pub fn get(&self) -> Result<T, Diagnostic> {
        let value = self.param.scalar_value().ok_or_else(|| {
            Diagnostic::error(
                codes::E0107,
                format!("parameter {} has no bound value", self.name()),
            )
            .with_hint("values exist only in interactive evaluation; bind one with set()")
        })?;
        T::from_value(value).ok_or_else(|| {
            Diagnostic::error(
                codes::E0108,
                format!(
                    "parameter {} holds a {} but was read as {}",
                    self.name(),
                    value.ty(),
                    self.ty()
                ),
            )
        })
    }

    pub fn set(&self, value: T) {
        self.param.bind_scalar(value.into_value());
    }

    // ── Range ──

    pub fn set_min_value(&self, min: impl Into<Expr>) {
        let min = Expr::cast(self.ty(), min.into());
        self.param.set_min_value(Some(min));
        self.warn_if_inverted();
    }

    pub fn set_max_value(&self, max: impl Into<Expr>) {
        let max = Expr::cast(self.ty(), max.into());
        self.param.set_max_value(Some(max));
        self.warn_if_inverted();
    }

    pub fn set_range(&self, min: impl Into<Expr>, max: impl Into<Expr>) {
        self.set_min_value(min);
        self.set_max_value(max);
    }

    /// Lower bound, or None when unbounded.
    pub fn min_value(&self) -> Option<Expr> {
        self.param.min_value()
    }

    /// Upper bound, or None when unbounded.
    pub fn max_value(&self) -> Option<Expr> {
        self.param.max_value()
    }

    /// A warning if both bounds fold to constants with min > max.
    pub fn check_range(&self) -> Option<Diagnostic> {
        range_warning(&self.param)
    }

    fn warn_if_inverted(&self) {
        if let Some(diag) = self.check_range() {
            tracing::warn!(param = self.name(), "{}", diag);
        }
    }

    // ── Conversions ──

    pub fn to_expr(&self) -> Expr {
        Expr::param_variable(self.ty(), self.name(), self.param.clone())
    }

    pub fn to_argument(&self) -> Argument {
        Argument::scalar(self.name(), self.ty())
    }
}

impl<T: ScalarKind> Default for Param<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ScalarKind> From<&Param<T>> for Expr {
    fn from(p: &Param<T>) -> Expr {
        p.to_expr()
    }
}

impl<T: ScalarKind> From<Param<T>> for Expr {
    fn from(p: Param<T>) -> Expr {
        p.to_expr()
    }
}

impl<T: ScalarKind> fmt::Debug for Param<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param")
            .field("name", &self.name())
            .field("ty", &self.ty())
            .field("value", &self.param.scalar_value())
            .finish()
    }
}

/// W0100 if both range bounds of `param` fold to constants with min > max.
pub fn range_warning(param: &Parameter) -> Option<Diagnostic> {
    let min = param.min_value()?.simplify();
    let max = param.max_value()?.simplify();
    let (lo, hi) = (min.as_f64()?, max.as_f64()?);
    (lo > hi).then(|| {
        Diagnostic::warning(
            codes::W0100,
            format!(
                "range of parameter {} is empty: min {} exceeds max {}",
                param.name(),
                min,
                max
            ),
        )
        .with_hint("ranges are hints and are not used to clamp values")
    })
}

/// The handle-typed parameter carrying the caller's user context.
pub fn user_context_param() -> Param<Handle> {
    Param::with_name(USER_CONTEXT_NAME)
}
