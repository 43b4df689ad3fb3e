//! The self-describing binary codec for [`Value`].
//!
//! One tag byte identifies the kind, then a kind-specific body follows.
//! Lengths for strings, bytes, decimals, and collections are themselves
//! recursively encoded integers; integers carry a `u16` little-endian byte
//! count followed by two's-complement little-endian payload. Both
//! directions stream from a cursor with no seeks or look-ahead.
//!
//! The encoding is injective up to decimal normalization: equal values
//! produce identical bytes, and `decode(encode(v)) == v` for every
//! supported value.

use num_bigint::{BigInt, Sign};
use rust_decimal::Decimal;

use crate::error::CodecError;
use crate::value::{
    canonical_decimal_string, decimal_significant_digits, Value, ValueKind, ValueMap,
    MAX_DECIMAL_DIGITS,
};

/// Strings, byte strings, and decimal renderings are capped at `2^32 - 1`
/// encoded bytes.
const MAX_BLOB_LEN: u64 = u32::MAX as u64;

/// Encodes `value` into its canonical byte representation.
pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    encode_into(value, &mut out)?;
    Ok(out)
}

/// Encodes `value`, appending to `out`.
pub fn encode_into(value: &Value, out: &mut Vec<u8>) -> Result<(), CodecError> {
    out.push(value.kind().tag());
    match value {
        Value::Int(n) => encode_int_body(n, out),
        Value::Bool(b) => {
            out.push(*b as u8);
            Ok(())
        }
        Value::Str(s) => encode_blob(s.as_bytes(), out),
        Value::Bytes(b) => encode_blob(b, out),
        Value::Decimal(d) => encode_decimal_body(d, out),
        Value::Map(map) => {
            encode_len(map.len(), out)?;
            for (key, item) in map.iter() {
                encode_into(key, out)?;
                encode_into(item, out)?;
            }
            Ok(())
        }
        Value::List(items) | Value::Tuple(items) => {
            encode_len(items.len(), out)?;
            for item in items {
                encode_into(item, out)?;
            }
            Ok(())
        }
    }
}

/// Decodes a single value from the front of `bytes`. Trailing bytes are
/// permitted; callers that frame their input pass exact slices.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    Cursor::new(bytes).decode_value()
}

/// Encoded size of `value`, without materializing the buffer twice.
pub fn encoded_len(value: &Value) -> Result<usize, CodecError> {
    encode(value).map(|b| b.len())
}

fn encode_int_body(n: &BigInt, out: &mut Vec<u8>) -> Result<(), CodecError> {
    // Byte count is ceil(bit_length / 8) doubled, leaving the sign bit a
    // full spare byte-pair; zero encodes as an empty payload.
    let len = (n.bits() as usize).div_ceil(8) * 2;
    if len > u16::MAX as usize {
        return Err(CodecError::OversizedLength);
    }
    out.extend_from_slice(&(len as u16).to_le_bytes());
    let mut body = n.to_signed_bytes_le();
    let fill = if n.sign() == Sign::Minus { 0xff } else { 0x00 };
    body.resize(len, fill);
    out.extend_from_slice(&body);
    Ok(())
}

fn encode_blob(bytes: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
    if bytes.len() as u64 > MAX_BLOB_LEN {
        return Err(CodecError::OversizedLength);
    }
    encode_len(bytes.len(), out)?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn encode_decimal_body(d: &Decimal, out: &mut Vec<u8>) -> Result<(), CodecError> {
    if decimal_significant_digits(d) > MAX_DECIMAL_DIGITS {
        return Err(CodecError::DecimalPrecision);
    }
    encode_blob(canonical_decimal_string(d).as_bytes(), out)
}

fn encode_len(len: usize, out: &mut Vec<u8>) -> Result<(), CodecError> {
    encode_into(&Value::Int(BigInt::from(len)), out)
}

/// Streaming decoder over a borrowed buffer.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_byte(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn decode_value(&mut self) -> Result<Value, CodecError> {
        let tag = self.take_byte()?;
        let kind = ValueKind::from_tag(tag).ok_or(CodecError::InvalidTag(tag))?;
        match kind {
            ValueKind::Int => {
                let len = u16::from_le_bytes(self.take(2)?.try_into().unwrap()) as usize;
                Ok(Value::Int(BigInt::from_signed_bytes_le(self.take(len)?)))
            }
            ValueKind::Bool => Ok(Value::Bool(self.take_byte()? != 0)),
            ValueKind::Str => {
                let bytes = self.decode_blob()?;
                let s = std::str::from_utf8(bytes).map_err(|_| CodecError::Utf8)?;
                Ok(Value::Str(s.to_string()))
            }
            ValueKind::Bytes => Ok(Value::Bytes(self.decode_blob()?.to_vec())),
            ValueKind::Decimal => {
                let bytes = self.decode_blob()?;
                let s = std::str::from_utf8(bytes).map_err(|_| CodecError::Utf8)?;
                let d = parse_decimal(s)?;
                Ok(Value::Decimal(d))
            }
            ValueKind::Map => {
                let count = self.decode_len()?;
                let mut map = ValueMap::new();
                for _ in 0..count {
                    let key = self.decode_value()?;
                    let item = self.decode_value()?;
                    map.insert(key, item);
                }
                Ok(Value::Map(map))
            }
            ValueKind::List => {
                let count = self.decode_len()?;
                let mut items = Vec::with_capacity(count.min(self.remaining()));
                for _ in 0..count {
                    items.push(self.decode_value()?);
                }
                Ok(Value::List(items))
            }
            ValueKind::Tuple => {
                let count = self.decode_len()?;
                let mut items = Vec::with_capacity(count.min(self.remaining()));
                for _ in 0..count {
                    items.push(self.decode_value()?);
                }
                Ok(Value::Tuple(items))
            }
        }
    }

    fn decode_blob(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.decode_len()?;
        self.take(len)
    }

    /// Reads a recursively encoded integer and bounds it as a length.
    fn decode_len(&mut self) -> Result<usize, CodecError> {
        match self.decode_value()? {
            Value::Int(n) => {
                if n.sign() == Sign::Minus {
                    return Err(CodecError::OversizedLength);
                }
                let len = u64::try_from(&n).map_err(|_| CodecError::OversizedLength)?;
                if len > MAX_BLOB_LEN {
                    return Err(CodecError::OversizedLength);
                }
                Ok(len as usize)
            }
            other => Err(CodecError::InvalidTag(other.kind().tag())),
        }
    }
}

fn parse_decimal(s: &str) -> Result<Decimal, CodecError> {
    s.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|_| CodecError::Decimal(s.to_string()))
}
