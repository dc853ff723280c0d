//! The CIM typed-value model.
//!
//! Every CIM property, qualifier, and method parameter carries a value of one
//! of the scalar types below, or a homogeneous array of one of them. The
//! compact binary encoding has a dedicated encode/decode path per type, so the
//! type enumeration here is the authoritative list of what can be encoded.

use crate::datetime::CimDateTime;
use crate::path::CimObjectPath;
use crate::CimInstance;

/// The CIM scalar type system (DSP0004 intrinsic data types).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum CimType {
    Boolean = 0,
    Uint8 = 1,
    Sint8 = 2,
    Uint16 = 3,
    Sint16 = 4,
    Uint32 = 5,
    Sint32 = 6,
    Uint64 = 7,
    Sint64 = 8,
    Real32 = 9,
    Real64 = 10,
    Char16 = 11,
    String = 12,
    DateTime = 13,
    /// A reference to another managed object (an object path).
    Reference = 14,
    /// An embedded CIM object (class or instance), carried opaquely.
    Object = 15,
    /// An embedded CIM instance.
    Instance = 16,
}

impl CimType {
    /// Whether this is one of the integer or floating-point types.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Uint8
                | Self::Sint8
                | Self::Uint16
                | Self::Sint16
                | Self::Uint32
                | Self::Sint32
                | Self::Uint64
                | Self::Sint64
                | Self::Real32
                | Self::Real64
        )
    }

    /// Whether this is an unsigned integer type.
    #[must_use]
    pub const fn is_unsigned(self) -> bool {
        matches!(self, Self::Uint8 | Self::Uint16 | Self::Uint32 | Self::Uint64)
    }

    /// Whether this is a signed integer type.
    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::Sint8 | Self::Sint16 | Self::Sint32 | Self::Sint64)
    }

    /// Whether values of this type live outside the arena (individually owned
    /// objects tracked through the external-reference index).
    #[must_use]
    pub const fn is_external(self) -> bool {
        matches!(self, Self::Reference | Self::Object | Self::Instance)
    }

    /// Decode from the stored tag byte.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Boolean,
            1 => Self::Uint8,
            2 => Self::Sint8,
            3 => Self::Uint16,
            4 => Self::Sint16,
            5 => Self::Uint32,
            6 => Self::Sint32,
            7 => Self::Uint64,
            8 => Self::Sint64,
            9 => Self::Real32,
            10 => Self::Real64,
            11 => Self::Char16,
            12 => Self::String,
            13 => Self::DateTime,
            14 => Self::Reference,
            15 => Self::Object,
            16 => Self::Instance,
            _ => return None,
        })
    }
}

impl std::fmt::Display for CimType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Boolean => "boolean",
            Self::Uint8 => "uint8",
            Self::Sint8 => "sint8",
            Self::Uint16 => "uint16",
            Self::Sint16 => "sint16",
            Self::Uint32 => "uint32",
            Self::Sint32 => "sint32",
            Self::Uint64 => "uint64",
            Self::Sint64 => "sint64",
            Self::Real32 => "real32",
            Self::Real64 => "real64",
            Self::Char16 => "char16",
            Self::String => "string",
            Self::DateTime => "datetime",
            Self::Reference => "reference",
            Self::Object => "object",
            Self::Instance => "instance",
        };
        f.write_str(s)
    }
}

/// A dynamically-typed CIM value: one scalar, or one homogeneous array.
///
/// "Not set" / NULL is represented at the property level (`Option<CimValue>`),
/// not here.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum CimValue {
    Boolean(bool),
    Uint8(u8),
    Sint8(i8),
    Uint16(u16),
    Sint16(i16),
    Uint32(u32),
    Sint32(i32),
    Uint64(u64),
    Sint64(i64),
    Real32(f32),
    Real64(f64),
    /// A UCS-2 code unit.
    Char16(u16),
    String(String),
    DateTime(CimDateTime),
    Reference(CimObjectPath),
    Object(Box<CimInstance>),
    Instance(Box<CimInstance>),
    Array(CimValueArray),
}

/// The array forms, one per scalar type.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum CimValueArray {
    Boolean(Vec<bool>),
    Uint8(Vec<u8>),
    Sint8(Vec<i8>),
    Uint16(Vec<u16>),
    Sint16(Vec<i16>),
    Uint32(Vec<u32>),
    Sint32(Vec<i32>),
    Uint64(Vec<u64>),
    Sint64(Vec<i64>),
    Real32(Vec<f32>),
    Real64(Vec<f64>),
    Char16(Vec<u16>),
    String(Vec<String>),
    DateTime(Vec<CimDateTime>),
    Reference(Vec<CimObjectPath>),
    Object(Vec<CimInstance>),
    Instance(Vec<CimInstance>),
}

impl CimValue {
    /// The scalar type of this value (element type, for arrays).
    #[must_use]
    pub const fn cim_type(&self) -> CimType {
        match self {
            Self::Boolean(_) => CimType::Boolean,
            Self::Uint8(_) => CimType::Uint8,
            Self::Sint8(_) => CimType::Sint8,
            Self::Uint16(_) => CimType::Uint16,
            Self::Sint16(_) => CimType::Sint16,
            Self::Uint32(_) => CimType::Uint32,
            Self::Sint32(_) => CimType::Sint32,
            Self::Uint64(_) => CimType::Uint64,
            Self::Sint64(_) => CimType::Sint64,
            Self::Real32(_) => CimType::Real32,
            Self::Real64(_) => CimType::Real64,
            Self::Char16(_) => CimType::Char16,
            Self::String(_) => CimType::String,
            Self::DateTime(_) => CimType::DateTime,
            Self::Reference(_) => CimType::Reference,
            Self::Object(_) => CimType::Object,
            Self::Instance(_) => CimType::Instance,
            Self::Array(a) => a.element_type(),
        }
    }

    /// Whether this value is an array.
    #[must_use]
    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Element count for arrays, 0 for scalars.
    #[must_use]
    pub fn array_len(&self) -> usize {
        match self {
            Self::Array(a) => a.len(),
            _ => 0,
        }
    }
}

impl CimValueArray {
    /// The element type of the array.
    #[must_use]
    pub const fn element_type(&self) -> CimType {
        match self {
            Self::Boolean(_) => CimType::Boolean,
            Self::Uint8(_) => CimType::Uint8,
            Self::Sint8(_) => CimType::Sint8,
            Self::Uint16(_) => CimType::Uint16,
            Self::Sint16(_) => CimType::Sint16,
            Self::Uint32(_) => CimType::Uint32,
            Self::Sint32(_) => CimType::Sint32,
            Self::Uint64(_) => CimType::Uint64,
            Self::Sint64(_) => CimType::Sint64,
            Self::Real32(_) => CimType::Real32,
            Self::Real64(_) => CimType::Real64,
            Self::Char16(_) => CimType::Char16,
            Self::String(_) => CimType::String,
            Self::DateTime(_) => CimType::DateTime,
            Self::Reference(_) => CimType::Reference,
            Self::Object(_) => CimType::Object,
            Self::Instance(_) => CimType::Instance,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(v) => v.len(),
            Self::Uint8(v) => v.len(),
            Self::Sint8(v) => v.len(),
            Self::Uint16(v) => v.len(),
            Self::Sint16(v) => v.len(),
            Self::Uint32(v) => v.len(),
            Self::Sint32(v) => v.len(),
            Self::Uint64(v) => v.len(),
            Self::Sint64(v) => v.len(),
            Self::Real32(v) => v.len(),
            Self::Real64(v) => v.len(),
            Self::Char16(v) => v.len(),
            Self::String(v) => v.len(),
            Self::DateTime(v) => v.len(),
            Self::Reference(v) => v.len(),
            Self::Object(v) => v.len(),
            Self::Instance(v) => v.len(),
        }
    }

    /// Whether the array is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
