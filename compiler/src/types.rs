// types.rs — Value types for parameters, buffers and expressions
//
// A value type is a bit width plus a category (signed int, unsigned int,
// float, opaque handle). Rust primitives map onto value types through
// `ScalarKind`, which is how typed parameters store and recover values.
//
// Preconditions: none.
// Postconditions: none (types and pure helpers only).
// Failure modes: `ScalarType::parse` returns None for unknown names.
// Side effects: none.

use std::fmt;

use serde::{Serialize, Serializer};

// ── Type code ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeCode {
    Int,
    UInt,
    Float,
    Handle,
}

// ── Scalar type ─────────────────────────────────────────────────────────────

/// A value type: category plus bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScalarType {
    pub code: TypeCode,
    pub bits: u8,
}

impl ScalarType {
    pub const fn int(bits: u8) -> Self {
        ScalarType {
            code: TypeCode::Int,
            bits,
        }
    }

    pub const fn uint(bits: u8) -> Self {
        ScalarType {
            code: TypeCode::UInt,
            bits,
        }
    }

    pub const fn float(bits: u8) -> Self {
        ScalarType {
            code: TypeCode::Float,
            bits,
        }
    }

    /// Opaque pointer-sized handle.
    pub const fn handle() -> Self {
        ScalarType {
            code: TypeCode::Handle,
            bits: 64,
        }
    }

    pub const fn bool() -> Self {
        Self::uint(1)
    }

    pub fn is_int(self) -> bool {
        self.code == TypeCode::Int
    }

    pub fn is_uint(self) -> bool {
        self.code == TypeCode::UInt
    }

    pub fn is_float(self) -> bool {
        self.code == TypeCode::Float
    }

    pub fn is_handle(self) -> bool {
        self.code == TypeCode::Handle
    }

    pub fn is_bool(self) -> bool {
        self == Self::bool()
    }

    /// Storage size of one element in bytes.
    pub fn bytes(self) -> usize {
        (self.bits as usize).div_ceil(8)
    }

    /// How a coordinate of this type may be used as an implicit image index.
    pub fn coordinate_coercion(self) -> CoordinateCoercion {
        match self.code {
            TypeCode::Float => CoordinateCoercion::Reject,
            TypeCode::UInt if self.bits >= 32 => CoordinateCoercion::Reject,
            TypeCode::Int if self.bits > 32 => CoordinateCoercion::Reject,
            TypeCode::Int if self.bits == 32 => CoordinateCoercion::Keep,
            TypeCode::Int | TypeCode::UInt | TypeCode::Handle => CoordinateCoercion::Widen,
        }
    }

    /// C spelling used in generated prototypes.
    pub fn c_type(self) -> &'static str {
        match (self.code, self.bits) {
            (TypeCode::UInt, 1) => "bool",
            (TypeCode::Int, 8) => "int8_t",
            (TypeCode::Int, 16) => "int16_t",
            (TypeCode::Int, 32) => "int32_t",
            (TypeCode::Int, 64) => "int64_t",
            (TypeCode::UInt, 8) => "uint8_t",
            (TypeCode::UInt, 16) => "uint16_t",
            (TypeCode::UInt, 32) => "uint32_t",
            (TypeCode::UInt, 64) => "uint64_t",
            (TypeCode::Float, 32) => "float",
            (TypeCode::Float, 64) => "double",
            _ => "void *",
        }
    }

    /// Parse a type name as written by `Display` (`int32`, `uint8`, `float32`,
    /// `bool`, `handle`).
    pub fn parse(name: &str) -> Option<Self> {
        let ty = match name {
            "bool" => Self::bool(),
            "handle" => Self::handle(),
            "int8" => Self::int(8),
            "int16" => Self::int(16),
            "int32" => Self::int(32),
            "int64" => Self::int(64),
            "uint8" => Self::uint(8),
            "uint16" => Self::uint(16),
            "uint32" => Self::uint(32),
            "uint64" => Self::uint(64),
            "float32" => Self::float(32),
            "float64" => Self::float(64),
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            TypeCode::UInt if self.bits == 1 => write!(f, "bool"),
            TypeCode::Int => write!(f, "int{}", self.bits),
            TypeCode::UInt => write!(f, "uint{}", self.bits),
            TypeCode::Float => write!(f, "float{}", self.bits),
            TypeCode::Handle => write!(f, "handle"),
        }
    }
}

impl Serialize for ScalarType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of checking a coordinate's type for implicit indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateCoercion {
    /// Already the canonical index type (int32).
    Keep,
    /// Narrower integer; cast to int32.
    Widen,
    /// Float, wide unsigned, wide signed or handle; needs an explicit cast.
    Reject,
}

// ── Scalar values ───────────────────────────────────────────────────────────

/// Opaque handle value (e.g. a user context pointer), stored as an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(pub usize);

/// A concrete value bound to a scalar parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Handle(Handle),
}

impl ScalarValue {
    pub fn ty(&self) -> ScalarType {
        match self {
            ScalarValue::Bool(_) => ScalarType::bool(),
            ScalarValue::I8(_) => ScalarType::int(8),
            ScalarValue::I16(_) => ScalarType::int(16),
            ScalarValue::I32(_) => ScalarType::int(32),
            ScalarValue::I64(_) => ScalarType::int(64),
            ScalarValue::U8(_) => ScalarType::uint(8),
            ScalarValue::U16(_) => ScalarType::uint(16),
            ScalarValue::U32(_) => ScalarType::uint(32),
            ScalarValue::U64(_) => ScalarType::uint(64),
            ScalarValue::F32(_) => ScalarType::float(32),
            ScalarValue::F64(_) => ScalarType::float(64),
            ScalarValue::Handle(_) => ScalarType::handle(),
        }
    }

    /// Integer view of the value; floats truncate toward zero.
    pub fn as_i64(&self) -> i64 {
        match *self {
            ScalarValue::Bool(b) => b as i64,
            ScalarValue::I8(v) => v as i64,
            ScalarValue::I16(v) => v as i64,
            ScalarValue::I32(v) => v as i64,
            ScalarValue::I64(v) => v,
            ScalarValue::U8(v) => v as i64,
            ScalarValue::U16(v) => v as i64,
            ScalarValue::U32(v) => v as i64,
            ScalarValue::U64(v) => v as i64,
            ScalarValue::F32(v) => v as i64,
            ScalarValue::F64(v) => v as i64,
            ScalarValue::Handle(h) => h.0 as i64,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::I8(v) => write!(f, "{v}"),
            ScalarValue::I16(v) => write!(f, "{v}"),
            ScalarValue::I32(v) => write!(f, "{v}"),
            ScalarValue::I64(v) => write!(f, "{v}"),
            ScalarValue::U8(v) => write!(f, "{v}"),
            ScalarValue::U16(v) => write!(f, "{v}"),
            ScalarValue::U32(v) => write!(f, "{v}"),
            ScalarValue::U64(v) => write!(f, "{v}"),
            ScalarValue::F32(v) => write!(f, "{v}"),
            ScalarValue::F64(v) => write!(f, "{v}"),
            ScalarValue::Handle(h) => write!(f, "{:#x}", h.0),
        }
    }
}

/// Rust types usable as the `T` of a typed scalar parameter.
pub trait ScalarKind: Copy + PartialEq + fmt::Debug + 'static {
    fn scalar_type() -> ScalarType;
    fn into_value(self) -> ScalarValue;
    fn from_value(value: ScalarValue) -> Option<Self>;
}

macro_rules! impl_scalar_kind {
    ($($t:ty => $variant:ident, $ty:expr;)*) => {
        $(
            impl ScalarKind for $t {
                fn scalar_type() -> ScalarType {
                    $ty
                }

                fn into_value(self) -> ScalarValue {
                    ScalarValue::$variant(self)
                }

                fn from_value(value: ScalarValue) -> Option<Self> {
                    match value {
                        ScalarValue::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_scalar_kind! {
    bool => Bool, ScalarType::bool();
    i8 => I8, ScalarType::int(8);
    i16 => I16, ScalarType::int(16);
    i32 => I32, ScalarType::int(32);
    i64 => I64, ScalarType::int(64);
    u8 => U8, ScalarType::uint(8);
    u16 => U16, ScalarType::uint(16);
    u32 => U32, ScalarType::uint(32);
    u64 => U64, ScalarType::uint(64);
    f32 => F32, ScalarType::float(32);
    f64 => F64, ScalarType::float(64);
    Handle => Handle, ScalarType::handle();
}

/// Value type of a Rust primitive.
pub fn type_of<T: ScalarKind>() -> ScalarType {
    T::scalar_type()
}
