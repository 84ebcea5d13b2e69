//! Cell datatypes.

use derive_more::Display;

use crate::array::schema::SchemaError;

/// The datatype of an attribute or dimension value.
///
/// Every datatype has a fixed byte width; [`Datatype::Char`] cells are single
/// bytes that may be combined with a variable cell value count to form
/// strings.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    /// A `char` byte.
    #[display("CHAR")]
    Char,
    /// An `i8`.
    #[display("INT8")]
    Int8,
    /// A `u8`.
    #[display("UINT8")]
    UInt8,
    /// An `i16`.
    #[display("INT16")]
    Int16,
    /// A `u16`.
    #[display("UINT16")]
    UInt16,
    /// An `i32`.
    #[display("INT32")]
    Int32,
    /// A `u32`.
    #[display("UINT32")]
    UInt32,
    /// An `i64`.
    #[display("INT64")]
    Int64,
    /// A `u64`.
    #[display("UINT64")]
    UInt64,
    /// An `f32`.
    #[display("FLOAT32")]
    Float32,
    /// An `f64`.
    #[display("FLOAT64")]
    Float64,
}

impl Datatype {
    /// The width of one value in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        match self {
            Self::Char | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// True for the signed and unsigned integer datatypes.
    #[must_use]
    pub const fn is_integral(&self) -> bool {
        !matches!(self, Self::Char | Self::Float32 | Self::Float64)
    }

    /// True for the signed integer datatypes.
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// True for the float datatypes.
    #[must_use]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// The serialized datatype code.
    #[must_use]
    pub(crate) const fn code(&self) -> u8 {
        match self {
            Self::Char => 0,
            Self::Int8 => 1,
            Self::UInt8 => 2,
            Self::Int16 => 3,
            Self::UInt16 => 4,
            Self::Int32 => 5,
            Self::UInt32 => 6,
            Self::Int64 => 7,
            Self::UInt64 => 8,
            Self::Float32 => 9,
            Self::Float64 => 10,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, SchemaError> {
        Ok(match code {
            0 => Self::Char,
            1 => Self::Int8,
            2 => Self::UInt8,
            3 => Self::Int16,
            4 => Self::UInt16,
            5 => Self::Int32,
            6 => Self::UInt32,
            7 => Self::Int64,
            8 => Self::UInt64,
            9 => Self::Float32,
            10 => Self::Float64,
            _ => return Err(SchemaError::Corrupt(format!("unknown datatype code {code}"))),
        })
    }

    /// One fill element, used for dense cells never written by any fragment:
    /// signed minimum, unsigned maximum, `NaN` for floats, `0` for chars.
    #[must_use]
    pub fn fill_element(&self) -> Vec<u8> {
        match self {
            Self::Char => vec![0],
            Self::Int8 => i8::MIN.to_le_bytes().to_vec(),
            Self::UInt8 => u8::MAX.to_le_bytes().to_vec(),
            Self::Int16 => i16::MIN.to_le_bytes().to_vec(),
            Self::UInt16 => u16::MAX.to_le_bytes().to_vec(),
            Self::Int32 => i32::MIN.to_le_bytes().to_vec(),
            Self::UInt32 => u32::MAX.to_le_bytes().to_vec(),
            Self::Int64 => i64::MIN.to_le_bytes().to_vec(),
            Self::UInt64 => u64::MAX.to_le_bytes().to_vec(),
            Self::Float32 => f32::NAN.to_le_bytes().to_vec(),
            Self::Float64 => f64::NAN.to_le_bytes().to_vec(),
        }
    }
}
