use crate::codec;
use crate::common::{Outcome, Request};
use crate::communication::{ModbusSocket, TcpSocket, TransportError};
use crate::error::Failure;
use crate::messages::registry;

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

mod context;

pub use context::{PendingTransaction, TransactionTracker};

const MAX_MODBUS_RESPONSE_TIME: Duration = Duration::from_millis(5000);
const MAX_MODBUS_CONNECT_TIME: Duration = Duration::from_millis(5000);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModbusMasterConnectionParams {
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl Default for ModbusMasterConnectionParams {
    fn default() -> Self {
        ModbusMasterConnectionParams {
            connect_timeout: MAX_MODBUS_CONNECT_TIME,
            response_timeout: MAX_MODBUS_RESPONSE_TIME,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SessionState {
    Disconnected,
    Connected,
    AwaitingResponse,
}

/// One connection to one slave. Requests are strictly sequential: `execute`
/// borrows the session mutably until the response is in.
pub struct ModbusSession<S: ModbusSocket = TcpSocket> {
    socket: S,
    tracker: TransactionTracker,
    state: SessionState,
    params: ModbusMasterConnectionParams,
}

impl ModbusSession<TcpSocket> {
    pub fn new_tcp(params: ModbusMasterConnectionParams) -> Self {
        ModbusSession::with_socket(TcpSocket::new(), params)
    }
}

impl<S: ModbusSocket> ModbusSession<S> {
    pub fn with_socket(socket: S, params: ModbusMasterConnectionParams) -> Self {
        let state = if socket.is_open() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        };

        ModbusSession {
            socket,
            tracker: TransactionTracker::new(),
            state,
            params,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn params(&self) -> ModbusMasterConnectionParams {
        self.params
    }

    pub fn tracker(&self) -> &TransactionTracker {
        &self.tracker
    }

    /// Opens the connection. A session that is already connected is closed first.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), Failure> {
        if self.state != SessionState::Disconnected {
            self.close().await;
        }

        match self
            .socket
            .connect(host, port, self.params.connect_timeout)
            .await
        {
            Ok(()) => {
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(err) => {
                warn!(host, port, error = %err, "connection failed");
                Err(Failure::Connection(err.to_string()))
            }
        }
    }

    pub async fn execute(&mut self, request: &Request) -> Outcome {
        // Nothing reaches the wire unless the request is well formed
        let pdu = registry::encode_request(request).inspect_err(|failure| {
            debug!(function_code = request.function_code, %failure, "request rejected");
        })?;

        if self.state != SessionState::Connected {
            return Err(Failure::Connection(format!(
                "session is {:?}, a connected session is required",
                self.state
            )));
        }

        let transaction_id = self.tracker.next_id();
        let pending = self
            .tracker
            .register(transaction_id, request.unit_id, request.function_code);

        self.state = SessionState::AwaitingResponse;
        let outcome = self.exchange(request, &pdu, pending).await;

        if outcome.is_err() {
            self.tracker.abandon(transaction_id);
        }
        if self.state == SessionState::AwaitingResponse {
            self.state = SessionState::Connected;
        }

        outcome
    }

    /// Releases the connection. Closing a disconnected session does nothing.
    pub async fn close(&mut self) {
        self.socket.close().await;
        self.tracker.clear();
        self.state = SessionState::Disconnected;
    }

    async fn exchange(
        &mut self,
        request: &Request,
        pdu: &[u8],
        pending: PendingTransaction,
    ) -> Outcome {
        let frame = codec::encode(request.unit_id, pdu, pending.transaction_id);
        debug!(
            transaction_id = pending.transaction_id,
            unit_id = request.unit_id,
            function_code = request.function_code,
            "sending {:02X?}",
            frame
        );

        if let Err(err) = self.socket.send(&frame).await {
            return Err(self.on_transport_error(err).await);
        }

        let bytes = self.receive_frame().await?;
        debug!(transaction_id = pending.transaction_id, "received {:02X?}", bytes);

        let frame = codec::decode(&bytes)?;
        self.tracker
            .match_response(frame.transaction_id, frame.unit_id)?;

        registry::decode_response(request, &frame.pdu).inspect_err(|failure| {
            if let Failure::ModbusException { .. } = failure {
                warn!(transaction_id = pending.transaction_id, %failure, "slave answered with an exception");
            }
        })
    }

    /// Buffers received chunks until the MBAP length says a whole frame is in.
    /// Extra bytes stay in the buffer so the decoder can reject them.
    async fn receive_frame(&mut self) -> Result<Vec<u8>, Failure> {
        let deadline = Instant::now() + self.params.response_timeout;
        let mut buffer = Vec::new();

        loop {
            if let Some(frame_len) = codec::expected_frame_len(&buffer)? {
                if buffer.len() >= frame_len {
                    if buffer.len() > frame_len {
                        warn!(
                            extra = buffer.len() - frame_len,
                            "bytes received past the end of the response frame"
                        );
                    }
                    return Ok(buffer);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let err = TransportError::Timeout(self.params.response_timeout);
                return Err(self.on_transport_error(err).await);
            }

            match self.socket.receive(remaining).await {
                Ok(chunk) => buffer.extend_from_slice(&chunk),
                Err(err) => return Err(self.on_transport_error(err).await),
            }
        }
    }

    async fn on_transport_error(&mut self, err: TransportError) -> Failure {
        match err {
            TransportError::Timeout(_) => {
                // A half received frame can't be trusted, neither can the stream behind it
                warn!(
                    timeout_ms = self.params.response_timeout.as_millis() as u64,
                    "no response in time, dropping the connection"
                );
                self.close().await;
                Failure::Timeout(self.params.response_timeout.as_millis() as u64)
            }
            err if err.is_fatal() => {
                info!(error = %err, "connection lost");
                self.close().await;
                Failure::Connection(err.to_string())
            }
            err => {
                warn!(error = %err, "transport error");
                Failure::Connection(err.to_string())
            }
        }
    }
}
