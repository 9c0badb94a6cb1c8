// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Process entry point (C12): parse the CLI, load configuration, wire up
//! logging and the shared broker state, then run the accept loop.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mqttd::config::Config;
use mqttd::{auth, connection, logging};
use mqttd::state::BrokerState;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "mqttd", version, about = "An in-memory MQTT 3.1.1 broker")]
struct Cli {
    /// Optional TOML config file; omitted fields and an absent flag both
    /// fall back to built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long = "server.address")]
    address: Option<String>,
    #[arg(long = "server.port")]
    port: Option<u16>,
    #[arg(long = "conn.timeout-ms")]
    connect_timeout_ms: Option<u64>,
    #[arg(long = "pub.ack-timeout-ms")]
    pub_ack_timeout_ms: Option<u64>,
    #[arg(long = "pub.max-retries")]
    pub_max_retries: Option<u32>,
    #[arg(long = "auth.service")]
    auth_service: Option<String>,
    #[arg(long = "log.file")]
    log_file: Option<PathBuf>,
    #[arg(long = "log.level")]
    log_level: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(address) = &self.address {
            config.listener.address = address.clone();
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.general.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.pub_ack_timeout_ms {
            config.general.pub_ack_timeout_ms = ms;
        }
        if let Some(retries) = self.pub_max_retries {
            config.general.pub_max_retries = retries;
        }
        if let Some(service) = &self.auth_service {
            config.security.auth_service = service.clone();
        }
        if let Some(file) = &self.log_file {
            config.log.file = file.clone();
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("mqttd: failed to load config {}: {err}", path.display());
                return ExitCode::from(1);
            }
        },
        None => Config::default(),
    };
    cli.apply_overrides(&mut config);

    if let Err(err) = logging::init(&config.log) {
        eprintln!("mqttd: failed to initialize logging: {err}");
        return ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("mqttd: failed to start async runtime: {err}");
            return ExitCode::from(2);
        }
    };

    runtime.block_on(run(config))
}

async fn run(config: Config) -> ExitCode {
    let authenticator = match auth::build(
        &config.security.auth_service,
        config.security.password_file.as_deref(),
    ) {
        Ok(authenticator) => authenticator,
        Err(err) => {
            log::error!("failed to build authenticator: {err}");
            return ExitCode::from(1);
        }
    };

    let address = format!("{}:{}", config.listener.address, config.listener.port);
    let state = BrokerState::new(config, authenticator);

    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("failed to bind {address}: {err}");
            return ExitCode::from(2);
        }
    };
    log::info!("mqttd listening on {address}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        let state = state.clone();
                        tokio::spawn(connection::handle(stream, peer_addr, state));
                    }
                    Err(err) => {
                        log::warn!("accept failed: {err}");
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    log::error!("failed to listen for ctrl-c: {err}");
                }
                log::info!("shutdown signal received, stopping all sessions");
                state.sessions.stop_all().await;
                break;
            }
        }
    }

    ExitCode::SUCCESS
}
