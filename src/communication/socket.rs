use super::TransportError;

use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

const READ_BUFFER_SIZE: usize = 1024;

//This trait is meant to abstract the byte stream under a modbus session so the
//protocol logic never touches sockets directly
#[async_trait]
pub trait ModbusSocket: Send {
    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<(), TransportError>;

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Whatever bytes arrive first, waiting at most `max_wait`. Never returns an
    /// empty chunk: a closed stream is [`TransportError::Closed`].
    async fn receive(&mut self, max_wait: Duration) -> Result<Vec<u8>, TransportError>;

    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct TcpSocket {
    stream: Option<TcpStream>,
}

impl TcpSocket {
    pub fn new() -> Self {
        TcpSocket { stream: None }
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Drops the stream when the error means the peer is gone.
    fn classify(&mut self, error: std::io::Error, on_send: bool) -> TransportError {
        match error.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof => {
                self.stream = None;
                TransportError::Closed
            }
            _ if on_send => TransportError::Send(error.to_string()),
            _ => TransportError::Receive(error.to_string()),
        }
    }
}

#[async_trait]
impl ModbusSocket for TcpSocket {
    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<(), TransportError> {
        let address = format!("{}:{}", host, port);

        let stream = match timeout(connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(TransportError::Connect {
                    address,
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                return Err(TransportError::Connect {
                    address,
                    reason: format!("timed out after {} ms", connect_timeout.as_millis()),
                })
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            debug!(%address, error = %err, "couldn't disable nagle");
        }

        info!(%address, "connected");
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let result = self.stream()?.write_all(data).await;
        result.map_err(|err| self.classify(err, true))
    }

    async fn receive(&mut self, max_wait: Duration) -> Result<Vec<u8>, TransportError> {
        let mut buffer = [0u8; READ_BUFFER_SIZE];

        let stream = self.stream()?;
        let result = match timeout(max_wait, stream.read(&mut buffer)).await {
            Ok(result) => result,
            Err(_) => return Err(TransportError::Timeout(max_wait)),
        };

        match result {
            Ok(0) => {
                self.stream = None;
                Err(TransportError::Closed)
            }
            Ok(n) => Ok(buffer[..n].to_vec()),
            Err(err) => Err(self.classify(err, false)),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                debug!(error = %err, "shutdown failed, dropping the stream anyway");
            }
            info!("connection closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
