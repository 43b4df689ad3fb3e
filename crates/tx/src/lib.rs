//! Framed payload formats for VM-bound ledger outputs.
//!
//! A payload is a framed record (contract creation or contract call),
//! optionally wrapped in a call list that batches several records into one
//! transaction message. Payloads may arrive raw or zlib-compressed;
//! decoders attempt decompression first and fall back to treating the
//! bytes as already raw.
//!
//! ```text
//! specifier     : 5 bytes, b"dvm0\0"
//! kind          : 1 byte, 0 = creation, 1 = call
//! -- creation --
//! src_len       : u16 LE, then src_len bytes of UTF-8 source
//! args_len      : u16 LE, then args_len bytes of encoded tuple
//! -- call --
//! contract_hash : 32 bytes
//! method_len    : u8, then method_len bytes of UTF-8
//! args          : encoded tuple, remainder of buffer
//! ```

use std::io::Read;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

use dvm_types::codec;
use dvm_types::error::{CodecError, PayloadError};
use dvm_types::{ContractHash, Value};

/// Version specifier at the head of every framed record.
pub const SPECIFIER: &[u8; 5] = b"dvm0\0";

/// An invocation of an exported method on a deployed contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub contract_hash: ContractHash,
    pub method: String,
    pub args: Vec<Value>,
}

impl ContractCall {
    pub fn new(contract_hash: ContractHash, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            contract_hash,
            method: method.into(),
            args,
        }
    }

    /// Frames the call. Call payloads travel uncompressed; the call-list
    /// wrapper compresses the whole batch instead.
    pub fn to_payload(&self) -> Result<Vec<u8>, PayloadError> {
        let method = self.method.as_bytes();
        if method.len() > u8::MAX as usize {
            return Err(PayloadError::FieldTooLong("method name"));
        }
        let mut out = Vec::new();
        out.extend_from_slice(SPECIFIER);
        out.push(1);
        out.extend_from_slice(self.contract_hash.as_bytes());
        out.push(method.len() as u8);
        out.extend_from_slice(method);
        codec::encode_into(&Value::Tuple(self.args.clone()), &mut out)?;
        Ok(out)
    }
}

/// A request to deploy new contract source. The resulting contract hash is
/// derived by the block driver, never carried in the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCreation {
    pub source: String,
    pub args: Vec<Value>,
}

impl ContractCreation {
    pub fn new(source: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            source: source.into(),
            args,
        }
    }

    /// Frames and compresses the creation record. Source blobs dominate
    /// creation payloads, so these always travel deflated.
    pub fn to_payload(&self) -> Result<Vec<u8>, PayloadError> {
        let source = self.source.as_bytes();
        if source.len() > u16::MAX as usize {
            return Err(PayloadError::FieldTooLong("contract source"));
        }
        let args = codec::encode(&Value::Tuple(self.args.clone()))?;
        if args.len() > u16::MAX as usize {
            return Err(PayloadError::FieldTooLong("constructor arguments"));
        }
        let mut out = Vec::new();
        out.extend_from_slice(SPECIFIER);
        out.push(0);
        out.extend_from_slice(&(source.len() as u16).to_le_bytes());
        out.extend_from_slice(source);
        out.extend_from_slice(&(args.len() as u16).to_le_bytes());
        out.extend_from_slice(&args);
        Ok(deflate(&out))
    }
}

/// A framed record: one creation or one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRecord {
    Creation(ContractCreation),
    Call(ContractCall),
}

impl CallRecord {
    pub fn to_payload(&self) -> Result<Vec<u8>, PayloadError> {
        match self {
            Self::Creation(c) => c.to_payload(),
            Self::Call(c) => c.to_payload(),
        }
    }

    /// Parses one framed record, inflating first if the bytes are
    /// compressed.
    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        let raw = inflate_or_raw(payload);
        let mut r = Reader::new(&raw);
        let specifier = r.take(SPECIFIER.len())?;
        if specifier != SPECIFIER {
            return Err(PayloadError::UnknownSpecifier(specifier.to_vec()));
        }
        match r.take_byte()? {
            0 => {
                let src_len = u16::from_le_bytes(r.take(2)?.try_into().unwrap()) as usize;
                let source = std::str::from_utf8(r.take(src_len)?)
                    .map_err(|_| PayloadError::Utf8)?
                    .to_string();
                let args_len = u16::from_le_bytes(r.take(2)?.try_into().unwrap()) as usize;
                let args = decode_args(r.take(args_len)?)?;
                Ok(Self::Creation(ContractCreation { source, args }))
            }
            1 => {
                let contract_hash = ContractHash::from_slice(r.take(32)?)
                    .map_err(|_| PayloadError::Truncated)?;
                let method_len = r.take_byte()? as usize;
                let method = std::str::from_utf8(r.take(method_len)?)
                    .map_err(|_| PayloadError::Utf8)?
                    .to_string();
                let args = decode_args(r.rest())?;
                Ok(Self::Call(ContractCall {
                    contract_hash,
                    method,
                    args,
                }))
            }
            kind => Err(PayloadError::UnknownKind(kind)),
        }
    }
}

/// A batch of framed records delivered through one transaction message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallList {
    pub records: Vec<CallRecord>,
}

impl CallList {
    pub fn new(records: Vec<CallRecord>) -> Self {
        Self { records }
    }

    /// Encodes the batch as a compressed list of framed byte strings.
    pub fn to_payload(&self) -> Result<Vec<u8>, PayloadError> {
        let items = self
            .records
            .iter()
            .map(|record| record.to_payload().map(Value::Bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(deflate(&codec::encode(&Value::List(items))?))
    }

    /// Parses a batch. A payload that is not an encoded sequence at all is
    /// retried as a single framed record, so a transaction carrying
    /// exactly one call may omit the outer list wrapper.
    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        let raw = inflate_or_raw(payload);
        let items = match codec::decode(&raw) {
            Ok(Value::List(items)) => items,
            Ok(_) => return Err(PayloadError::NotACallList),
            Err(CodecError::InvalidTag(_)) => {
                return Ok(Self {
                    records: vec![CallRecord::from_payload(&raw)?],
                })
            }
            Err(e) => return Err(e.into()),
        };
        let records = items
            .into_iter()
            .map(|item| match item {
                Value::Bytes(bytes) => CallRecord::from_payload(&bytes),
                _ => Err(PayloadError::ElementNotBytes),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { records })
    }

    /// Convenience for hex-encoded payloads as persisted or served.
    pub fn from_hex(payload: &str) -> Result<Self, PayloadError> {
        let bytes = hex::decode(payload).map_err(|_| PayloadError::Truncated)?;
        Self::from_payload(&bytes)
    }
}

fn decode_args(bytes: &[u8]) -> Result<Vec<Value>, PayloadError> {
    match codec::decode(bytes)? {
        Value::Tuple(args) => Ok(args),
        other => Err(PayloadError::ArgsNotTuple(other.kind().name())),
    }
}

fn deflate(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("writing to a Vec");
    encoder.finish().expect("writing to a Vec")
}

fn inflate_or_raw(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    match ZlibDecoder::new(bytes).read_to_end(&mut out) {
        Ok(_) => out,
        Err(_) => bytes.to_vec(),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PayloadError> {
        if self.buf.len() - self.pos < n {
            return Err(PayloadError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_byte(&mut self) -> Result<u8, PayloadError> {
        Ok(self.take(1)?[0])
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn some_hash() -> ContractHash {
        ContractHash::derive(b"block", b"tx", 0)
    }

    fn sample_call() -> ContractCall {
        ContractCall::new(
            some_hash(),
            "transfer",
            vec![
                Value::str("receiver"),
                Value::Decimal(Decimal::from_str("12.5").unwrap()),
            ],
        )
    }

    #[test]
    fn call_roundtrip() {
        let call = sample_call();
        let payload = call.to_payload().unwrap();
        let parsed = CallRecord::from_payload(&payload).unwrap();
        assert_eq!(parsed, CallRecord::Call(call));
    }

    #[test]
    fn creation_roundtrip_is_compressed() {
        let creation = ContractCreation::new(
            "contract Token\n",
            vec![Value::str("Coin"), Value::str("CN")],
        );
        let payload = creation.to_payload().unwrap();
        // zlib header, not the raw specifier.
        assert_ne!(&payload[..5], SPECIFIER);
        let parsed = CallRecord::from_payload(&payload).unwrap();
        assert_eq!(parsed, CallRecord::Creation(creation));
    }

    #[test]
    fn call_list_roundtrip() {
        let list = CallList::new(vec![
            CallRecord::Creation(ContractCreation::new("contract A\n", vec![])),
            CallRecord::Call(sample_call()),
        ]);
        let payload = list.to_payload().unwrap();
        let parsed = CallList::from_payload(&payload).unwrap();
        assert_eq!(parsed, list);
    }

    #[test]
    fn bare_record_decodes_as_one_element_list() {
        let call = sample_call();
        let payload = call.to_payload().unwrap();
        let parsed = CallList::from_payload(&payload).unwrap();
        assert_eq!(parsed.records, vec![CallRecord::Call(call)]);

        // The same fallback applies to a compressed creation record.
        let creation = ContractCreation::new("contract B\n", vec![]);
        let payload = creation.to_payload().unwrap();
        let parsed = CallList::from_payload(&payload).unwrap();
        assert_eq!(parsed.records, vec![CallRecord::Creation(creation)]);
    }

    #[test]
    fn unknown_specifier_is_rejected() {
        let mut payload = sample_call().to_payload().unwrap();
        payload[..5].copy_from_slice(b"dvm9\0");
        assert!(matches!(
            CallRecord::from_payload(&payload),
            Err(PayloadError::UnknownSpecifier(_))
        ));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut payload = sample_call().to_payload().unwrap();
        payload[5] = 7;
        assert!(matches!(
            CallRecord::from_payload(&payload),
            Err(PayloadError::UnknownKind(7))
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let payload = sample_call().to_payload().unwrap();
        assert!(matches!(
            CallRecord::from_payload(&payload[..10]),
            Err(PayloadError::Truncated)
        ));
        assert!(matches!(
            CallRecord::from_payload(&[]),
            Err(PayloadError::Truncated)
        ));
    }

    #[test]
    fn method_name_length_is_bounded() {
        let call = ContractCall::new(some_hash(), "m".repeat(256), vec![]);
        assert!(matches!(
            call.to_payload(),
            Err(PayloadError::FieldTooLong("method name"))
        ));
    }
}
