//! Error taxonomy for the DVM engine.
//!
//! One enum per concern, mirrored on the eight error classes of the
//! execution pipeline: malformed payloads, unknown targets, forbidden
//! methods, argument mismatches, execution faults, insufficient gas,
//! deployment failures, and persistence failures. Only persistence
//! failures are fatal to the block loop; everything else isolates to a
//! single call or transaction.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::ids::ContractHash;
use crate::value::MAX_DECIMAL_DIGITS;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Malformed identifier input.
#[derive(Debug, Error)]
pub enum IdError {
    #[error("contract hash must be 32 bytes, got {0}")]
    BadLength(usize),
    #[error("invalid hex in contract hash: {0}")]
    BadHex(String),
}

/// Errors of the self-describing value codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The tag byte does not name a supported value kind.
    #[error("invalid serialized type: {0}")]
    InvalidTag(u8),
    /// The buffer ended before the announced body.
    #[error("unexpected end of input")]
    Truncated,
    /// A length field is negative or exceeds the wire bounds.
    #[error("length field out of range")]
    OversizedLength,
    /// A decimal exceeds the bounded precision at encode time.
    #[error("decimal exceeds {MAX_DECIMAL_DIGITS} significant digits")]
    DecimalPrecision,
    /// A decimal body did not parse as a decimal literal.
    #[error("malformed decimal literal: {0}")]
    Decimal(String),
    /// A string body is not valid UTF-8.
    #[error("string is not valid utf-8")]
    Utf8,
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidTag(_) => "CODEC_INVALID_TAG",
            Self::Truncated => "CODEC_TRUNCATED",
            Self::OversizedLength => "CODEC_OVERSIZED_LENGTH",
            Self::DecimalPrecision => "CODEC_DECIMAL_PRECISION",
            Self::Decimal(_) => "CODEC_DECIMAL",
            Self::Utf8 => "CODEC_UTF8",
        }
    }
}

/// Errors of the framed payload envelope.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The 5-byte version specifier is not a known one.
    #[error("unknown payload specifier {0:?}")]
    UnknownSpecifier(Vec<u8>),
    /// The record kind byte is neither creation nor call.
    #[error("unknown record kind {0}")]
    UnknownKind(u8),
    /// The buffer ended before the announced field.
    #[error("truncated payload")]
    Truncated,
    /// Source or method name bytes are not UTF-8.
    #[error("payload text is not valid utf-8")]
    Utf8,
    /// The argument field must decode as a tuple.
    #[error("call arguments must be a tuple, got {0}")]
    ArgsNotTuple(&'static str),
    /// A call-list element must be a byte string holding a framed record.
    #[error("call list element is not a byte string")]
    ElementNotBytes,
    /// The payload decoded as a value, but not as a sequence of records.
    #[error("call list payload is not a sequence")]
    NotACallList,
    /// A framed field exceeds its length prefix.
    #[error("{0} exceeds its length field")]
    FieldTooLong(&'static str),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ErrorCode for PayloadError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownSpecifier(_) => "PAYLOAD_UNKNOWN_SPECIFIER",
            Self::UnknownKind(_) => "PAYLOAD_UNKNOWN_KIND",
            Self::Truncated => "PAYLOAD_TRUNCATED",
            Self::Utf8 => "PAYLOAD_UTF8",
            Self::ArgsNotTuple(_) => "PAYLOAD_ARGS_NOT_TUPLE",
            Self::ElementNotBytes => "PAYLOAD_ELEMENT_NOT_BYTES",
            Self::NotACallList => "PAYLOAD_NOT_A_CALL_LIST",
            Self::FieldTooLong(_) => "PAYLOAD_FIELD_TOO_LONG",
            Self::Codec(_) => "PAYLOAD_CODEC",
        }
    }
}

/// Errors raised while compiling or executing contract code.
#[derive(Debug, Error)]
pub enum VmError {
    /// The source failed to compile in the sandbox.
    #[error("compile error: {0}")]
    Compile(String),
    /// A positional argument failed the declared-kind check.
    #[error("parameter {index} of {method} must be {expected}, not {got}")]
    ArgumentType {
        method: String,
        index: usize,
        expected: &'static str,
        got: &'static str,
    },
    /// The caller supplied the wrong number of arguments.
    #[error("{method} takes {expected} arguments, got {got}")]
    ArgumentCount {
        method: String,
        expected: usize,
        got: usize,
    },
    /// Anything thrown by contract code at run time.
    #[error("execution error: {0}")]
    Execution(String),
    /// The per-call wall-clock or fuel budget was exhausted.
    #[error("call exceeded its execution budget")]
    Timeout,
    /// A contract attempted to re-enter itself through a handle.
    #[error("contract {0} cannot call itself")]
    Reentrancy(ContractHash),
    /// A write targeted something other than contract-owned state.
    #[error("cannot write to {0}")]
    ForbiddenWrite(String),
    /// A reserved name was written or shadowed.
    #[error("{0} is reserved")]
    ReservedName(String),
    /// The invoked method is not in the exported table.
    #[error("unknown method {0}")]
    UnknownMethod(String),
    /// Constructor raised, or the initial state is not encodable.
    #[error("deployment failed: {0}")]
    Deployment(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ErrorCode for VmError {
    fn code(&self) -> &'static str {
        match self {
            Self::Compile(_) => "VM_COMPILE",
            Self::ArgumentType { .. } => "VM_ARGUMENT_TYPE",
            Self::ArgumentCount { .. } => "VM_ARGUMENT_COUNT",
            Self::Execution(_) => "VM_EXECUTION",
            Self::Timeout => "VM_TIMEOUT",
            Self::Reentrancy(_) => "VM_REENTRANCY",
            Self::ForbiddenWrite(_) => "VM_FORBIDDEN_WRITE",
            Self::ReservedName(_) => "VM_RESERVED_NAME",
            Self::UnknownMethod(_) => "VM_UNKNOWN_METHOD",
            Self::Deployment(_) => "VM_DEPLOYMENT",
            Self::Codec(_) => "VM_CODEC",
        }
    }
}

/// Errors of the owned persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error occurred in the storage backend.
    #[error("store backend error: {0}")]
    Backend(String),
    /// A persisted row failed to decode.
    #[error("corrupt store row: {0}")]
    Corrupt(String),
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORE_BACKEND",
            Self::Corrupt(_) => "STORE_CORRUPT",
        }
    }
}

/// Errors surfaced by the consumed ledger database.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger backend error: {0}")]
    Backend(String),
}

impl ErrorCode for LedgerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "LEDGER_BACKEND",
        }
    }
}

/// Errors of the block driver. Per-call variants isolate to one call;
/// `Store` and `Ledger` abort the block without advancing the cursor.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The invocation target has never been deployed.
    #[error("unknown contract {0}")]
    UnknownContract(ContractHash),
    /// `constructor` invoked as a call, or the method is not exported.
    #[error("method {0} cannot be called")]
    ForbiddenMethod(String),
    /// The funding output does not cover the metered gas.
    #[error("insufficient gas: required {required}, funded {funded}")]
    InsufficientGas { required: Decimal, funded: Decimal },
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ErrorCode for DriverError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownContract(_) => "DRIVER_UNKNOWN_CONTRACT",
            Self::ForbiddenMethod(_) => "DRIVER_FORBIDDEN_METHOD",
            Self::InsufficientGas { .. } => "DRIVER_INSUFFICIENT_GAS",
            Self::Payload(e) => e.code(),
            Self::Vm(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::Ledger(e) => e.code(),
        }
    }
}

impl DriverError {
    /// True if this error must abort the block instead of reverting a call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Ledger(_))
    }
}
