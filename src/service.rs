//! Caller facing command shape shared by the CLI and the HTTP endpoint.
//!
//! A command names its own endpoint, so every run gets a fresh session that is
//! closed again before the response is built.

use crate::common::{Request, ResponseData, WRITE_ACK_MESSAGE};
use crate::error::{Failure, FailureKind};
use crate::master::{ModbusMasterConnectionParams, ModbusSession};
use crate::messages::registry;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

fn default_count() -> Option<i64> {
    Some(1)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModbusCommand {
    pub host: String,
    pub port: i64,
    pub unit_id: i64,
    pub start_register: i64,
    pub function_code: i64,
    #[serde(default)]
    pub values: Option<Vec<i64>>,
    #[serde(default = "default_count")]
    pub count: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: Status,
    pub message: String,
    pub data: Value,
}

impl CommandResponse {
    pub fn success(message: String, data: &ResponseData) -> Self {
        let data = match data {
            ResponseData::Bits(bits) => json!(bits),
            ResponseData::Registers(registers) => json!(registers),
            ResponseData::WriteAck => json!(WRITE_ACK_MESSAGE),
        };

        CommandResponse {
            status: Status::Success,
            message,
            data,
        }
    }

    pub fn error(message: String) -> Self {
        CommandResponse {
            status: Status::Error,
            message,
            data: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

fn in_range<T: TryFrom<i64>>(field: &str, value: i64) -> Result<T, Failure> {
    T::try_from(value).map_err(|_| {
        Failure::validation(format!("{} {} is out of range", field, value))
    })
}

impl ModbusCommand {
    pub fn port(&self) -> Result<u16, Failure> {
        match in_range::<u16>("port", self.port)? {
            0 => Err(Failure::validation("port 0 is out of range")),
            port => Ok(port),
        }
    }

    /// Turns the loosely typed command into a [`Request`]. Unsupported function
    /// codes are reported before anything else is looked at.
    pub fn to_request(&self) -> Result<Request, Failure> {
        let function_code = u8::try_from(self.function_code)
            .map_err(|_| Failure::UnsupportedFunction(self.function_code))?;
        let spec = registry::lookup(function_code)?;

        let unit_id = in_range::<u8>("unit_id", self.unit_id)?;
        let start_address = in_range::<u16>("start_register", self.start_register)?;
        let mut request = Request::new(function_code, unit_id, start_address);

        if spec.reads() {
            let count = self.count.ok_or_else(|| {
                Failure::validation(format!(
                    "count must be specified for function code {}",
                    function_code
                ))
            })?;
            request = request.with_count(in_range::<u16>("count", count)?);
        }

        if spec.writes() {
            let values = self.values.as_ref().ok_or_else(|| {
                Failure::validation(format!(
                    "values must be specified for function code {}",
                    function_code
                ))
            })?;

            let values = if spec.table().is_bit_table() {
                values.iter().map(|value| (*value > 0) as u16).collect()
            } else {
                values
                    .iter()
                    .map(|value| in_range::<u16>("value", *value))
                    .collect::<Result<Vec<u16>, Failure>>()?
            };
            request = request.with_values(values);
        }

        Ok(request)
    }
}

/// Connects, runs the command and closes, on every path.
pub async fn run_command(
    command: &ModbusCommand,
    params: ModbusMasterConnectionParams,
) -> CommandResponse {
    let prepared = command.to_request().and_then(|request| {
        // Bad requests don't deserve a connection
        registry::encode_request(&request)?;
        Ok((command.port()?, request))
    });
    let (port, request) = match prepared {
        Ok(prepared) => prepared,
        Err(failure) => return CommandResponse::error(failure.to_string()),
    };

    info!(
        host = %command.host,
        port,
        function_code = command.function_code,
        start_register = command.start_register,
        "executing command"
    );

    let mut session = ModbusSession::new_tcp(params);
    if let Err(failure) = session.connect(&command.host, port).await {
        return CommandResponse::error(format!("Failed to connect to Modbus server: {}", failure));
    }

    let outcome = session.execute(&request).await;
    session.close().await;

    match outcome {
        Ok(data) => {
            info!(function_code = command.function_code, %data, "command succeeded");
            CommandResponse::success(
                format!(
                    "Successfully executed function code {} at address {}",
                    command.function_code, command.start_register
                ),
                &data,
            )
        }
        Err(failure) => {
            error!(function_code = command.function_code, %failure, "command failed");
            let message = match failure.kind() {
                FailureKind::Validation | FailureKind::UnsupportedFunction => failure.to_string(),
                _ => format!(
                    "Failed to execute function code {} at address {}: {}",
                    command.function_code, command.start_register, failure
                ),
            };
            CommandResponse::error(message)
        }
    }
}
