use crate::error::{OverviewError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pixel datatypes a band can hold.
///
/// Samples travel through the engine as `f64`, which represents every
/// value of every variant exactly. Storing a value into a band goes
/// through [`DataType::coerce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    pub const ALL: [DataType; 7] = [
        DataType::Byte,
        DataType::UInt16,
        DataType::Int16,
        DataType::UInt32,
        DataType::Int32,
        DataType::Float32,
        DataType::Float64,
    ];

    pub fn is_integer(self) -> bool {
        !matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn size_bits(self) -> u32 {
        match self {
            DataType::Byte => 8,
            DataType::UInt16 | DataType::Int16 => 16,
            DataType::UInt32 | DataType::Int32 | DataType::Float32 => 32,
            DataType::Float64 => 64,
        }
    }

    /// Inclusive value range of the integer types.
    pub fn range(self) -> Option<(f64, f64)> {
        match self {
            DataType::Byte => Some((u8::MIN as f64, u8::MAX as f64)),
            DataType::UInt16 => Some((u16::MIN as f64, u16::MAX as f64)),
            DataType::Int16 => Some((i16::MIN as f64, i16::MAX as f64)),
            DataType::UInt32 => Some((u32::MIN as f64, u32::MAX as f64)),
            DataType::Int32 => Some((i32::MIN as f64, i32::MAX as f64)),
            DataType::Float32 | DataType::Float64 => None,
        }
    }

    /// Convert a computed value to what the band can actually store.
    ///
    /// Integers round half away from zero and saturate; NaN becomes 0.
    pub fn coerce(self, value: f64) -> f64 {
        match self.range() {
            Some((min, max)) => {
                if value.is_nan() {
                    0.0
                } else {
                    value.round().clamp(min, max)
                }
            }
            None if self == DataType::Float32 => value as f32 as f64,
            None => value,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Byte => "Byte",
            DataType::UInt16 => "UInt16",
            DataType::Int16 => "Int16",
            DataType::UInt32 => "UInt32",
            DataType::Int32 => "Int32",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = OverviewError;

    fn from_str(s: &str) -> Result<Self> {
        DataType::ALL
            .into_iter()
            .find(|dt| dt.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| OverviewError::InvalidOption(format!("unknown datatype '{}'", s)))
    }
}

/// Native scalar types that map onto a [`DataType`].
pub trait Sample: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn to_f64(self) -> f64;

    /// Convert from the engine's `f64` carrier, rounding and saturating
    /// like [`DataType::coerce`].
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_int_sample {
    ($t:ty, $dt:expr) => {
        impl Sample for $t {
            const DATA_TYPE: DataType = $dt;

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                // `as` saturates for float → int; NaN maps to 0.
                value.round() as $t
            }
        }
    };
}

impl_int_sample!(u8, DataType::Byte);
impl_int_sample!(u16, DataType::UInt16);
impl_int_sample!(i16, DataType::Int16);
impl_int_sample!(u32, DataType::UInt32);
impl_int_sample!(i32, DataType::Int32);

impl Sample for f32 {
    const DATA_TYPE: DataType = DataType::Float32;

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Sample for f64 {
    const DATA_TYPE: DataType = DataType::Float64;

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> Self {
        value
    }
}
