// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::path::Path;
use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use metering_agent::{config::Config, Agent};
use metering_agent_compat::http;

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("METERING_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Unable to set default subscriber: {e}");
    }

    debug!("Logging subsystem enabled");

    let Ok(config_path) = env::var("METERING_AGENT_CONFIG") else {
        error!("METERING_AGENT_CONFIG is not set. Shutting down metering agent.");
        return;
    };
    let state_dir = env::var("METERING_AGENT_STATE_DIR").unwrap_or_default();
    if state_dir.is_empty() {
        info!("METERING_AGENT_STATE_DIR is not set, agent state will not survive restarts");
    }
    let use_http = env::var("METERING_AGENT_USE_HTTP")
        .map(|val| val.to_lowercase() != "false")
        .unwrap_or(true);
    let local_port: u16 = env::var("METERING_AGENT_LOCAL_PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(http::DEFAULT_LOCAL_PORT);

    let config = match Config::load(Path::new(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to read configuration {config_path}: {e}");
            return;
        }
    };

    let agent = match Agent::start_with_config(config, &state_dir).await {
        Ok(agent) => Arc::new(agent),
        Err(e) => {
            error!("Unable to start metering agent: {e}");
            return;
        }
    };

    let cancel = CancellationToken::new();
    let server = if use_http {
        match http::bind(local_port).await {
            Ok(listener) => {
                info!("Listening locally on port {local_port}");
                Some(tokio::spawn(http::serve(
                    listener,
                    Arc::clone(&agent),
                    cancel.clone(),
                )))
            }
            Err(e) => {
                error!("Unable to listen on port {local_port}: {e}");
                if let Err(e) = agent.shutdown().await {
                    error!("Metering agent shutdown failed: {e}");
                }
                return;
            }
        }
    } else {
        info!("Local HTTP interface disabled");
        None
    };

    let mut status_interval = interval(STATUS_LOG_INTERVAL);
    status_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Unable to listen for shutdown signal: {e}");
                }
                break;
            }
            _ = status_interval.tick() => match agent.status_json() {
                Ok(status) => debug!("Agent status: {status}"),
                Err(e) => error!("Unable to serialize agent status: {e}"),
            },
        }
    }

    info!("Shutdown signal received");
    cancel.cancel();
    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Report server failed: {e}"),
            Err(e) => error!("Report server task failed: {e}"),
        }
    }
    if let Err(e) = agent.shutdown().await {
        error!("Metering agent shutdown failed: {e}");
    }
}
