//! Talon server binary.
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 unrecoverable
//! startup failure (e.g. transport bind).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use talon_config::TransportMode;
use talon_server::{Backends, Server};
use talon_telemetry::{LogConfig, LogFormat, setup_logging};
use talon_transport::{StdioTransport, TcpTransport, TransportLimits};

#[derive(Parser, Debug)]
#[command(name = "talon", version, about = "DShield SIEM tool-server for AI security analysts")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "TALON_CONFIG")]
    config: Option<PathBuf>,

    /// Override the transport mode (stdio or tcp).
    #[arg(long, value_parser = parse_mode)]
    transport: Option<TransportMode>,

    /// Base log level.
    #[arg(long, default_value = "info", env = "TALON_LOG_LEVEL")]
    log_level: String,

    /// Log format: pretty, compact, or json.
    #[arg(long, default_value = "compact", env = "TALON_LOG_FORMAT")]
    log_format: String,
}

fn parse_mode(raw: &str) -> Result<TransportMode, String> {
    match raw {
        "stdio" => Ok(TransportMode::Stdio),
        "tcp" => Ok(TransportMode::Tcp),
        other => Err(format!("unknown transport '{other}' (stdio or tcp)")),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let format = match args.log_format.as_str() {
        "pretty" => LogFormat::Pretty,
        "json" => LogFormat::Json,
        _ => LogFormat::Compact,
    };
    if let Err(e) = setup_logging(&LogConfig::new(&args.log_level).with_format(format)) {
        eprintln!("talon: cannot initialize logging: {e}");
        return ExitCode::from(1);
    }

    // Configuration problems (including required-secret failures) are
    // exit code 1; everything after config load that prevents startup is 2.
    let config = match talon_config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(1);
        },
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "cannot build async runtime");
            return ExitCode::from(2);
        },
    };

    runtime.block_on(run(config, args.transport))
}

async fn run(config: talon_config::Config, mode_override: Option<TransportMode>) -> ExitCode {
    if let Err(e) = std::fs::create_dir_all(&config.output_directory) {
        tracing::error!(error = %e, directory = %config.output_directory, "cannot create output directory");
        return ExitCode::from(2);
    }

    let backends = match Backends::production(&config) {
        Ok(backends) => backends,
        Err(e) => {
            tracing::error!(error = %e, "cannot build backend adapters");
            return ExitCode::from(2);
        },
    };

    let mode = mode_override.unwrap_or(config.transport.mode);
    let limits = TransportLimits {
        max_frame_bytes: config.transport.max_frame_bytes,
        max_in_flight: config.transport.max_in_flight_per_connection,
        idle_timeout_seconds: config.transport.idle_timeout_seconds,
    };
    let tcp = config.transport.tcp.clone();

    let server = match Server::new(config, backends) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "cannot assemble server");
            return ExitCode::from(2);
        },
    };

    // Initial probe round, then the periodic loop. The server starts even
    // with everything unhealthy; tools just stay hidden.
    let features = server.features();
    features.run_probes_once().await;
    let probe_task = features.spawn(server.shutdown_token());

    let (handle, events) = match mode {
        TransportMode::Stdio => {
            let (transport, events) = StdioTransport::new(limits);
            let connection = transport.start();
            tracing::info!(%connection, "serving on stdio");
            (transport.handle(), events)
        },
        TransportMode::Tcp => {
            let (transport, events) = TcpTransport::new(
                tcp.bind.clone(),
                tcp.port,
                tcp.max_connections,
                limits,
            );
            if let Err(e) = transport.start().await {
                tracing::error!(error = %e, "transport bind failed");
                return ExitCode::from(2);
            }
            (transport.handle(), events)
        },
    };

    let mut serve_task = tokio::spawn(Arc::clone(&server).serve(handle.clone(), events));

    // SIGINT/SIGTERM begin the graceful shutdown protocol; the transport
    // ending on its own (stdio EOF) is a clean shutdown too.
    tokio::select! {
        () = shutdown_signal() => {
            server.graceful_shutdown(&handle).await;
            let _ = serve_task.await;
        },
        _ = &mut serve_task => {
            tracing::info!("transport ended, shutting down");
            server.graceful_shutdown(&handle).await;
        },
    }
    probe_task.abort();
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            },
        };
        tokio::select! {
            _ = ctrl_c => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
