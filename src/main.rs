use tweakable_modbus_master::service::{run_command, CommandResponse, ModbusCommand};
use tweakable_modbus_master::ModbusMasterConnectionParams;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use serde_json::json;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "modbus-master", version, about = "Modbus TCP master")]
struct Args {
    /// Slave host
    #[arg(long, env = "MODBUS_HOST", default_value = "host.docker.internal")]
    host: String,

    #[arg(long, env = "MODBUS_PORT", default_value_t = 502)]
    port: i64,

    #[arg(long, alias = "unit_id", default_value_t = 1)]
    unit_id: i64,

    #[arg(long, alias = "start_register")]
    start_register: Option<i64>,

    #[arg(long, alias = "function_code")]
    function_code: Option<i64>,

    /// Values to write, space or comma separated
    #[arg(long, num_args = 1.., value_delimiter = ',', allow_negative_numbers = true)]
    values: Option<Vec<i64>>,

    #[arg(long, default_value_t = 1)]
    count: i64,

    /// Used for both connecting and waiting on a response
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Serve `POST /modbus` instead of running a single command
    #[arg(long)]
    api: bool,

    #[arg(long, alias = "api_port", default_value_t = 8000)]
    api_port: u16,
}

impl Args {
    /// `None` when the target register or function code is missing.
    fn command(&self) -> Option<ModbusCommand> {
        Some(ModbusCommand {
            host: self.host.clone(),
            port: self.port,
            unit_id: self.unit_id,
            start_register: self.start_register?,
            function_code: self.function_code?,
            values: self.values.clone(),
            count: Some(self.count),
        })
    }

    fn params(&self) -> ModbusMasterConnectionParams {
        let timeout = Duration::from_millis(self.timeout_ms);
        ModbusMasterConnectionParams {
            connect_timeout: timeout,
            response_timeout: timeout,
        }
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn modbus_handler(
    State(params): State<ModbusMasterConnectionParams>,
    Json(command): Json<ModbusCommand>,
) -> Response {
    let response = run_command(&command, params).await;
    if response.is_success() {
        (StatusCode::OK, Json(response)).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({ "detail": response.message }))).into_response()
    }
}

async fn serve(port: u16, params: ModbusMasterConnectionParams) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/modbus", post(modbus_handler))
        .with_state(params);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let args = Args::parse();
    let params = args.params();

    if args.api {
        return serve(args.api_port, params).await;
    }

    let Some(command) = args.command() else {
        eprintln!("Error: --start-register and --function-code are required unless --api is given");
        std::process::exit(1);
    };

    let response: CommandResponse = run_command(&command, params).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
