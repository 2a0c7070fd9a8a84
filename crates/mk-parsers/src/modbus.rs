//! Modbus register decoding.
//!
//! The collector reads raw words off the wire; this module turns them
//! into scalar values according to the declared register set.

use serde::{Deserialize, Serialize};

use mk_model::ScalarValue;

use crate::ParseError;

/// Which Modbus table a register lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

/// Declared data type of a register (or register pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterDataType {
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Bool,
}

impl RegisterDataType {
    /// Number of 16-bit words this type occupies.
    pub fn word_count(&self) -> u16 {
        match self {
            RegisterDataType::Uint16 | RegisterDataType::Int16 | RegisterDataType::Bool => 1,
            RegisterDataType::Uint32 | RegisterDataType::Int32 | RegisterDataType::Float32 => 2,
        }
    }
}

/// One declared register in a target's register set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSpec {
    pub name: String,
    pub address: u16,
    pub kind: RegisterKind,
    pub data_type: RegisterDataType,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Decode raw register words into a scalar, applying the scale factor.
/// 32-bit types take two words, high word first.
pub fn decode_registers(
    words: &[u16],
    data_type: RegisterDataType,
    scale: Option<f64>,
) -> Result<ScalarValue, ParseError> {
    let needed = data_type.word_count() as usize;
    if words.len() < needed {
        return Err(ParseError::Field(format!(
            "need {needed} register words, got {}",
            words.len()
        )));
    }
    let value = match data_type {
        RegisterDataType::Bool => return Ok(ScalarValue::Bool(words[0] != 0)),
        RegisterDataType::Uint16 => ScalarValue::Int(words[0] as i64),
        RegisterDataType::Int16 => ScalarValue::Int(words[0] as i16 as i64),
        RegisterDataType::Uint32 => {
            ScalarValue::Int(((words[0] as u32) << 16 | words[1] as u32) as i64)
        }
        RegisterDataType::Int32 => {
            ScalarValue::Int(((words[0] as u32) << 16 | words[1] as u32) as i32 as i64)
        }
        RegisterDataType::Float32 => {
            ScalarValue::Float(f32::from_bits((words[0] as u32) << 16 | words[1] as u32) as f64)
        }
    };
    Ok(apply_scale(value, scale))
}

fn apply_scale(value: ScalarValue, scale: Option<f64>) -> ScalarValue {
    let Some(scale) = scale else {
        return value;
    };
    match value {
        ScalarValue::Int(v) => ScalarValue::Float(v as f64 * scale),
        ScalarValue::Float(v) => ScalarValue::Float(v * scale),
        other => other,
    }
}

/// Decode a coil/discrete-input bit from the packed response byte.
pub fn decode_bit(bytes: &[u8], offset: usize) -> Result<bool, ParseError> {
    let byte = offset / 8;
    if byte >= bytes.len() {
        return Err(ParseError::Field(format!(
            "bit offset {offset} beyond {} response bytes",
            bytes.len()
        )));
    }
    Ok(bytes[byte] & (1 << (offset % 8)) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint16() {
        assert_eq!(
            decode_registers(&[1234], RegisterDataType::Uint16, None).unwrap(),
            ScalarValue::Int(1234)
        );
    }

    #[test]
    fn test_int16_negative() {
        assert_eq!(
            decode_registers(&[0xffff], RegisterDataType::Int16, None).unwrap(),
            ScalarValue::Int(-1)
        );
    }

    #[test]
    fn test_uint32_word_order() {
        assert_eq!(
            decode_registers(&[0x0001, 0x0000], RegisterDataType::Uint32, None).unwrap(),
            ScalarValue::Int(65536)
        );
    }

    #[test]
    fn test_int32_negative() {
        assert_eq!(
            decode_registers(&[0xffff, 0xfffe], RegisterDataType::Int32, None).unwrap(),
            ScalarValue::Int(-2)
        );
    }

    #[test]
    fn test_float32() {
        // 21.5f32 == 0x41AC0000
        let decoded = decode_registers(&[0x41ac, 0x0000], RegisterDataType::Float32, None).unwrap();
        match decoded {
            ScalarValue::Float(v) => assert!((v - 21.5).abs() < 1e-6),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn test_scale_factor() {
        // Raw 215 with scale 0.1 → 21.5 engineering units.
        let decoded =
            decode_registers(&[215], RegisterDataType::Uint16, Some(0.1)).unwrap();
        match decoded {
            ScalarValue::Float(v) => assert!((v - 21.5).abs() < 1e-9),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn test_bool() {
        assert_eq!(
            decode_registers(&[1], RegisterDataType::Bool, None).unwrap(),
            ScalarValue::Bool(true)
        );
        assert_eq!(
            decode_registers(&[0], RegisterDataType::Bool, None).unwrap(),
            ScalarValue::Bool(false)
        );
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(decode_registers(&[1], RegisterDataType::Float32, None).is_err());
        assert!(decode_registers(&[], RegisterDataType::Uint16, None).is_err());
    }

    #[test]
    fn test_decode_bit() {
        let bytes = [0b0000_0101u8, 0b0000_0001];
        assert!(decode_bit(&bytes, 0).unwrap());
        assert!(!decode_bit(&bytes, 1).unwrap());
        assert!(decode_bit(&bytes, 2).unwrap());
        assert!(decode_bit(&bytes, 8).unwrap());
        assert!(decode_bit(&bytes, 16).is_err());
    }
}
