pub mod codec;
pub mod common;
pub mod communication;
pub mod error;
pub mod master;
pub mod messages;
pub mod service;

pub use master::ModbusMasterConnectionParams;
pub use master::{ModbusSession, SessionState, TransactionTracker};

pub use communication::{ModbusSocket, TcpSocket, TransportError};

pub use common::{Outcome, Request, ResponseData};
pub use error::{Failure, FailureKind};
