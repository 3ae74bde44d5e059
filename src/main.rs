mod api;
mod cli;
mod config;
mod errors;
mod logging;
mod model;
mod orchestrator;
mod qbo;
mod storage;
mod text_summary;
mod week;

use clap::Parser;
use errors::{describe_gateway_error, ApiError, ConsoleError, GatewayError, ValidationError};

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    logging::init(args.global.log_json, args.global.verbose);

    match cli::run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            report(&e);
            std::process::exit(1);
        }
    }
}

/// Print a failed command's error for the operator.
fn report(err: &anyhow::Error) {
    let code = err
        .downcast_ref::<ValidationError>()
        .map(|e| (e.error_code(), e.is_user_error()))
        .or_else(|| err.downcast_ref::<GatewayError>().map(|e| (e.error_code(), e.is_user_error())))
        .or_else(|| err.downcast_ref::<ApiError>().map(|e| (e.error_code(), e.is_user_error())));

    let message = if err.downcast_ref::<GatewayError>().is_some() {
        describe_gateway_error(err, "Request failed")
    } else {
        format!("{err:#}")
    };

    match code {
        Some((code, user_error)) => {
            tracing::debug!(event = "command.failed", error_code = code, user_error);
        }
        None => tracing::debug!(event = "command.failed", error = %format!("{err:?}")),
    }
    eprintln!("error: {message}");
}
