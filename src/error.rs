use crate::messages::ExceptionCode;

use thiserror::Error;

/// Coarse classification of a [`Failure`], stable enough for callers to branch on.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum FailureKind {
    Validation,
    Connection,
    Timeout,
    Framing,
    TransactionMismatch,
    ModbusException,
    UnsupportedFunction,
}

/// Every way a single request can fail. Returned by value from
/// `ModbusSession::execute`, never raised past it.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum Failure {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout waiting for response after {0} ms")]
    Timeout(u64),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Transaction mismatch: {0}")]
    TransactionMismatch(String),

    #[error("Modbus exception {code:#04x} ({}) for function code {function}", describe_exception(.code))]
    ModbusException { function: u8, code: u8 },

    #[error("Unsupported function code: {0}")]
    UnsupportedFunction(i64),
}

impl Failure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Failure::Validation(_) => FailureKind::Validation,
            Failure::Connection(_) => FailureKind::Connection,
            Failure::Timeout(_) => FailureKind::Timeout,
            Failure::Framing(_) => FailureKind::Framing,
            Failure::TransactionMismatch(_) => FailureKind::TransactionMismatch,
            Failure::ModbusException { .. } => FailureKind::ModbusException,
            Failure::UnsupportedFunction(_) => FailureKind::UnsupportedFunction,
        }
    }

    /// The named exception for a `ModbusException` failure, if the slave sent a known code.
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            Failure::ModbusException { code, .. } => ExceptionCode::try_from(*code).ok(),
            _ => None,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Failure::Validation(message.into())
    }

    pub(crate) fn framing(message: impl Into<String>) -> Self {
        Failure::Framing(message.into())
    }
}

fn describe_exception(code: &u8) -> &'static str {
    match ExceptionCode::try_from(*code) {
        Ok(exception) => exception.description(),
        Err(_) => "unknown exception",
    }
}
