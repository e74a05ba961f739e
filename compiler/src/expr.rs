// expr.rs — Symbolic expressions consumed by pipeline definitions
//
// The minimal expression surface the parameter front end produces and
// downstream bounds inference consumes: typed immediates, named variables
// (optionally tied to a parameter), casts, arithmetic, and loads from image
// parameters. Also hosts `Var`, including the implicit placeholder `_` and
// the implicit coordinate variables `_0`, `_1`, ...
//
// Preconditions: none.
// Postconditions: binary nodes always have operands of the same type.
// Failure modes: none (division by a zero constant is left unfolded).
// Side effects: none.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::id::unique_name;
use crate::parameter::Parameter;
use crate::types::{ScalarType, TypeCode};

/// Name of the implicit placeholder variable.
pub const PLACEHOLDER: &str = "_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Min => "min",
            BinOp::Max => "max",
        }
    }
}

/// A symbolic expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntImm {
        ty: ScalarType,
        value: i64,
    },
    UIntImm {
        ty: ScalarType,
        value: u64,
    },
    FloatImm {
        ty: ScalarType,
        value: f64,
    },
    /// A named free variable. Parameter-derived variables carry the
    /// parameter so later stages can find its bound value or constraints.
    Variable {
        ty: ScalarType,
        name: String,
        param: Option<Parameter>,
    },
    Cast {
        ty: ScalarType,
        value: Box<Expr>,
    },
    Binary {
        op: BinOp,
        a: Box<Expr>,
        b: Box<Expr>,
    },
    /// A load from an image parameter at the given coordinates.
    Call {
        ty: ScalarType,
        name: String,
        args: Vec<Expr>,
        param: Option<Parameter>,
    },
}

// ── Construction ────────────────────────────────────────────────────────────

fn wrap_signed(value: i64, bits: u8) -> i64 {
    if bits >= 64 {
        value
    } else {
        let shift = 64 - u32::from(bits);
        (value << shift) >> shift
    }
}

fn wrap_unsigned(value: u64, bits: u8) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

impl Expr {
    /// An int32 immediate.
    pub fn int32(value: i32) -> Expr {
        Expr::IntImm {
            ty: ScalarType::int(32),
            value: i64::from(value),
        }
    }

    /// An immediate of type `ty` holding `value`, wrapped to the type's width.
    pub fn make_const(ty: ScalarType, value: i64) -> Expr {
        match ty.code {
            TypeCode::Int => Expr::IntImm {
                ty,
                value: wrap_signed(value, ty.bits),
            },
            TypeCode::UInt | TypeCode::Handle => Expr::UIntImm {
                ty,
                value: wrap_unsigned(value as u64, ty.bits),
            },
            TypeCode::Float => Expr::make_float(ty, value as f64),
        }
    }

    /// An immediate of type `ty` from a float; integer types truncate.
    pub fn make_float(ty: ScalarType, value: f64) -> Expr {
        match ty.code {
            TypeCode::Float if ty.bits == 32 => Expr::FloatImm {
                ty,
                value: f64::from(value as f32),
            },
            TypeCode::Float => Expr::FloatImm { ty, value },
            _ => Expr::make_const(ty, value as i64),
        }
    }

    pub fn variable(ty: ScalarType, name: impl Into<String>) -> Expr {
        Expr::Variable {
            ty,
            name: name.into(),
            param: None,
        }
    }

    pub fn param_variable(ty: ScalarType, name: impl Into<String>, param: Parameter) -> Expr {
        Expr::Variable {
            ty,
            name: name.into(),
            param: Some(param),
        }
    }

    /// Cast to `ty`; a no-op if the expression already has that type.
    pub fn cast(ty: ScalarType, value: Expr) -> Expr {
        if value.ty() == ty {
            value
        } else {
            Expr::Cast {
                ty,
                value: Box::new(value),
            }
        }
    }

    /// Build a binary node, coercing operand types first.
    pub fn binary(op: BinOp, a: Expr, b: Expr) -> Expr {
        let (a, b) = match_types(a, b);
        Expr::Binary {
            op,
            a: Box::new(a),
            b: Box::new(b),
        }
    }

    pub fn min(a: Expr, b: Expr) -> Expr {
        Expr::binary(BinOp::Min, a, b)
    }

    pub fn max(a: Expr, b: Expr) -> Expr {
        Expr::binary(BinOp::Max, a, b)
    }

    pub fn call(ty: ScalarType, name: impl Into<String>, args: Vec<Expr>, param: Parameter) -> Expr {
        Expr::Call {
            ty,
            name: name.into(),
            args,
            param: Some(param),
        }
    }

    // ── Queries ──

    pub fn ty(&self) -> ScalarType {
        match self {
            Expr::IntImm { ty, .. }
            | Expr::UIntImm { ty, .. }
            | Expr::FloatImm { ty, .. }
            | Expr::Variable { ty, .. }
            | Expr::Cast { ty, .. }
            | Expr::Call { ty, .. } => *ty,
            Expr::Binary { a, .. } => a.ty(),
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(
            self,
            Expr::IntImm { .. } | Expr::UIntImm { .. } | Expr::FloatImm { .. }
        )
    }

    /// Integer value of an integer immediate.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::IntImm { value, .. } => Some(*value),
            Expr::UIntImm { value, .. } => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    /// Numeric value of any immediate.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Expr::IntImm { value, .. } => Some(*value as f64),
            Expr::UIntImm { value, .. } => Some(*value as f64),
            Expr::FloatImm { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_variable_name(&self) -> Option<&str> {
        match self {
            Expr::Variable { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.as_variable_name().is_some_and(Var::is_placeholder)
    }

    /// The parameter this expression reads, for variables and loads.
    pub fn parameter(&self) -> Option<&Parameter> {
        match self {
            Expr::Variable { param, .. } | Expr::Call { param, .. } => param.as_ref(),
            _ => None,
        }
    }

    // ── Rewriting ──

    /// Replace every variable for which `lookup` returns a value.
    pub fn substitute(&self, lookup: &impl Fn(&str) -> Option<Expr>) -> Expr {
        match self {
            Expr::Variable { name, .. } => lookup(name).unwrap_or_else(|| self.clone()),
            Expr::Cast { ty, value } => Expr::cast(*ty, value.substitute(lookup)),
            Expr::Binary { op, a, b } => {
                Expr::binary(*op, a.substitute(lookup), b.substitute(lookup))
            }
            Expr::Call {
                ty,
                name,
                args,
                param,
            } => Expr::Call {
                ty: *ty,
                name: name.clone(),
                args: args.iter().map(|a| a.substitute(lookup)).collect(),
                param: param.clone(),
            },
            _ => self.clone(),
        }
    }

    /// Fold constants and drop arithmetic identities.
    pub fn simplify(&self) -> Expr {
        match self {
            Expr::Cast { ty, value } => {
                let value = value.simplify();
                cast_const(&value, *ty).unwrap_or_else(|| Expr::cast(*ty, value))
            }
            Expr::Binary { op, a, b } => fold_binary(*op, a.simplify(), b.simplify()),
            Expr::Call {
                ty,
                name,
                args,
                param,
            } => Expr::Call {
                ty: *ty,
                name: name.clone(),
                args: args.iter().map(Expr::simplify).collect(),
                param: param.clone(),
            },
            _ => self.clone(),
        }
    }
}

/// Re-type an immediate; None for non-constants.
fn cast_const(e: &Expr, ty: ScalarType) -> Option<Expr> {
    match *e {
        Expr::IntImm { value, .. } => Some(Expr::make_const(ty, value)),
        Expr::UIntImm { value, .. } => Some(Expr::make_const(ty, value as i64)),
        Expr::FloatImm { value, .. } => Some(Expr::make_float(ty, value)),
        _ => None,
    }
}

/// Bring both operands to one type. Constants adopt the other side's type;
/// otherwise floats win over integers and wider types over narrower ones.
fn match_types(a: Expr, b: Expr) -> (Expr, Expr) {
    let (ta, tb) = (a.ty(), b.ty());
    if ta == tb {
        return (a, b);
    }
    if let Some(b) = cast_const(&b, ta) {
        return (a, b);
    }
    if let Some(a) = cast_const(&a, tb) {
        return (a, b);
    }
    let a_wins = match (ta.is_float(), tb.is_float()) {
        (true, false) => true,
        (false, true) => false,
        _ => ta.bits >= tb.bits,
    };
    if a_wins {
        (a, Expr::cast(ta, b))
    } else {
        (Expr::cast(tb, a), b)
    }
}

fn fold_i64(op: BinOp, x: i64, y: i64) -> Option<i64> {
    match op {
        BinOp::Add => Some(x.wrapping_add(y)),
        BinOp::Sub => Some(x.wrapping_sub(y)),
        BinOp::Mul => Some(x.wrapping_mul(y)),
        BinOp::Div => x.checked_div_euclid(y),
        BinOp::Min => Some(x.min(y)),
        BinOp::Max => Some(x.max(y)),
    }
}

fn fold_f64(op: BinOp, x: f64, y: f64) -> f64 {
    match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::Min => x.min(y),
        BinOp::Max => x.max(y),
    }
}

fn is_const_value(e: &Expr, v: i64) -> bool {
    match e {
        Expr::FloatImm { value, .. } => *value == v as f64,
        _ => e.as_int() == Some(v),
    }
}

fn fold_binary(op: BinOp, a: Expr, b: Expr) -> Expr {
    let ty = a.ty();
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        if let Some(v) = fold_i64(op, x, y) {
            return Expr::make_const(ty, v);
        }
    }
    if let (Expr::FloatImm { value: x, .. }, Expr::FloatImm { value: y, .. }) = (&a, &b) {
        return Expr::make_float(ty, fold_f64(op, *x, *y));
    }
    match op {
        BinOp::Add if is_const_value(&b, 0) => return a,
        BinOp::Add if is_const_value(&a, 0) => return b,
        BinOp::Sub if is_const_value(&b, 0) => return a,
        BinOp::Mul | BinOp::Div if is_const_value(&b, 1) => return a,
        BinOp::Mul if is_const_value(&a, 1) => return b,
        _ => {}
    }
    Expr::binary(op, a, b)
}

// ── Operators ───────────────────────────────────────────────────────────────

macro_rules! impl_expr_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }

        impl $trait<i32> for Expr {
            type Output = Expr;
            fn $method(self, rhs: i32) -> Expr {
                Expr::binary($op, self, Expr::int32(rhs))
            }
        }
    };
}

impl_expr_op!(Add, add, BinOp::Add);
impl_expr_op!(Sub, sub, BinOp::Sub);
impl_expr_op!(Mul, mul, BinOp::Mul);
impl_expr_op!(Div, div, BinOp::Div);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        let zero = Expr::make_const(self.ty(), 0);
        Expr::binary(BinOp::Sub, zero, self)
    }
}

macro_rules! impl_from_int {
    ($($t:ty => $ty:expr),* $(,)?) => {
        $(
            impl From<$t> for Expr {
                fn from(v: $t) -> Expr {
                    Expr::make_const($ty, v as i64)
                }
            }
        )*
    };
}

impl_from_int! {
    i8 => ScalarType::int(8),
    i16 => ScalarType::int(16),
    i32 => ScalarType::int(32),
    i64 => ScalarType::int(64),
    u8 => ScalarType::uint(8),
    u16 => ScalarType::uint(16),
    u32 => ScalarType::uint(32),
    bool => ScalarType::bool(),
}

impl From<u64> for Expr {
    fn from(v: u64) -> Expr {
        Expr::UIntImm {
            ty: ScalarType::uint(64),
            value: v,
        }
    }
}

impl From<f32> for Expr {
    fn from(v: f32) -> Expr {
        Expr::make_float(ScalarType::float(32), f64::from(v))
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Expr {
        Expr::make_float(ScalarType::float(64), v)
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntImm { ty, value } if *ty == ScalarType::int(32) => write!(f, "{value}"),
            Expr::IntImm { ty, value } => write!(f, "({ty}){value}"),
            Expr::UIntImm { ty, value } => write!(f, "({ty}){value}"),
            Expr::FloatImm { ty, value } if ty.bits == 32 => write!(f, "{value}f"),
            Expr::FloatImm { ty, value } => write!(f, "({ty}){value}"),
            Expr::Variable { name, .. } => write!(f, "{name}"),
            Expr::Cast { ty, value } => write!(f, "{ty}({value})"),
            Expr::Binary { op, a, b } => match op {
                BinOp::Min | BinOp::Max => write!(f, "{}({a}, {b})", op.symbol()),
                _ => write!(f, "({a} {} {b})", op.symbol()),
            },
            Expr::Call { name, args, .. } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

// ── Var ─────────────────────────────────────────────────────────────────────

/// A named int32 coordinate variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    name: String,
}

impl Var {
    pub fn new(name: impl Into<String>) -> Self {
        Var { name: name.into() }
    }

    /// A variable with a synthesized unique name.
    pub fn fresh() -> Self {
        Var::new(unique_name('v'))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The implicit placeholder `_`. In a coordinate list it stands for
    /// however many implicit variables are needed to fill the remaining
    /// dimensions.
    pub fn placeholder() -> Self {
        Var::new(PLACEHOLDER)
    }

    /// The `n`th implicit coordinate variable (`_0`, `_1`, ...).
    pub fn implicit(n: usize) -> Self {
        Var::new(format!("_{n}"))
    }

    pub fn is_placeholder(name: &str) -> bool {
        name == PLACEHOLDER
    }

    pub fn is_implicit(name: &str) -> bool {
        name.len() > 1
            && name.starts_with('_')
            && name[1..].chars().all(|c| c.is_ascii_digit())
    }

    pub fn to_expr(&self) -> Expr {
        Expr::variable(ScalarType::int(32), self.name.clone())
    }
}

impl From<Var> for Expr {
    fn from(v: Var) -> Expr {
        v.to_expr()
    }
}

impl From<&Var> for Expr {
    fn from(v: &Var) -> Expr {
        v.to_expr()
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_types() {
        assert_eq!(Expr::from(3i16).ty(), ScalarType::int(16));
        assert_eq!(Expr::from(3u8).ty(), ScalarType::uint(8));
        assert_eq!(Expr::from(1.5f32).ty(), ScalarType::float(32));
        assert_eq!(Expr::from(7).ty(), ScalarType::int(32));
    }

    #[test]
    fn constants_adopt_the_other_operand_type() {
        let x = Expr::variable(ScalarType::uint(8), "x");
        let e = x + 1;
        match &e {
            Expr::Binary { b, .. } => assert_eq!(b.ty(), ScalarType::uint(8)),
            other => panic!("expected binary, got {other:?}"),
        }
        assert_eq!(e.ty(), ScalarType::uint(8));
    }

    #[test]
    fn mixed_variables_widen() {
        let a = Expr::variable(ScalarType::int(16), "a");
        let b = Expr::variable(ScalarType::float(32), "b");
        assert_eq!((a + b).ty(), ScalarType::float(32));
    }

    #[test]
    fn display_forms() {
        let x = Var::new("x").to_expr();
        assert_eq!((x.clone() + 1).to_string(), "(x + 1)");
        assert_eq!(Expr::cast(ScalarType::int(32), Expr::from(2i16)).to_string(), "int32((int16)2)");
        assert_eq!(Expr::min(x, Expr::int32(4)).to_string(), "min(x, 4)");
        assert_eq!(Expr::from(0.5f32).to_string(), "0.5f");
    }

    #[test]
    fn simplify_folds_constants() {
        let e = (Expr::int32(100) - 1) + Expr::int32(0);
        assert_eq!(e.simplify(), Expr::int32(99));
        let d = Expr::int32(-7) / 2;
        assert_eq!(d.simplify(), Expr::int32(-4));
    }

    #[test]
    fn simplify_drops_identities() {
        let x = Var::new("x").to_expr();
        assert_eq!((x.clone() + 0).simplify(), x);
        assert_eq!((x.clone() * 1).simplify(), x);
        assert_eq!((x.clone() - 0).simplify(), x);
    }

    #[test]
    fn simplify_leaves_division_by_zero() {
        let e = Expr::int32(4) / 0;
        assert!(matches!(e.simplify(), Expr::Binary { op: BinOp::Div, .. }));
    }

    #[test]
    fn simplify_leaves_overflowing_division() {
        let e = Expr::from(i64::MIN) / -1;
        assert!(matches!(e.simplify(), Expr::Binary { op: BinOp::Div, .. }));
        assert_eq!((Expr::from(i64::MIN) / 2).simplify(), Expr::from(i64::MIN / 2));
    }

    #[test]
    fn casts_of_constants_fold_with_wrapping() {
        let e = Expr::cast(ScalarType::uint(8), Expr::int32(300));
        assert_eq!(e.simplify(), Expr::make_const(ScalarType::uint(8), 44));
        let f = Expr::cast(ScalarType::int(32), Expr::from(2.75f32));
        assert_eq!(f.simplify(), Expr::int32(2));
    }

    #[test]
    fn substitute_replaces_named_variables() {
        let e = Var::new("a").to_expr() + Var::new("b").to_expr();
        let out = e.substitute(&|name| (name == "a").then(|| Expr::int32(5)));
        assert_eq!(out.to_string(), "(5 + b)");
    }

    #[test]
    fn placeholder_and_implicit_names() {
        assert!(Var::placeholder().to_expr().is_placeholder());
        assert_eq!(Var::implicit(2).name(), "_2");
        assert!(Var::is_implicit("_12"));
        assert!(!Var::is_implicit("_"));
        assert!(!Var::is_implicit("_x"));
    }
}
