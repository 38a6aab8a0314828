//! Tollgate gateway: entry point.
//!
//! Loads the gateway configuration and starts the axum-based HTTP service.
//!
//! # Environment variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TOLLGATE_CONFIG` | *(none)* | Path to a YAML/TOML/JSON gateway config. `TOLLGATE__*` variables override its fields. |
//! | `TOLLGATE_UPSTREAM` | `http://127.0.0.1:8080` | Catch-all backend used when no config file is given. |
//! | `GATEWAY_PORT` | *(config)* | TCP port to listen on; overrides `listen_addr`. |
//! | `GATEWAY_API_KEYS` | *(none)* | Comma-separated list of additional valid API keys. |
//! | `RUST_LOG` | `tollgate_gateway=info,tower_http=info` | Log filter. |

use tollgate_gateway::server::GatewayServer;
use tollgate_kernel::config::{ConfigError, load_gateway_config};
use tollgate_kernel::gateway::{GatewayConfig, RouteConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn load_config() -> Result<GatewayConfig, ConfigError> {
    let mut config = match std::env::var("TOLLGATE_CONFIG") {
        Ok(path) => {
            info!(path = %path, "loading gateway config");
            load_gateway_config(&path)?
        }
        Err(_) => {
            let upstream = std::env::var("TOLLGATE_UPSTREAM")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
            warn!(upstream = %upstream, "TOLLGATE_CONFIG is not set, proxying everything to one upstream");
            GatewayConfig::new("tollgate").with_route(RouteConfig::new("/", upstream))
        }
    };

    if let Some(port) = std::env::var("GATEWAY_PORT").ok().and_then(|v| v.parse::<u16>().ok()) {
        config.listen_addr = format!("0.0.0.0:{port}");
    }

    config.api_keys.extend(
        std::env::var("GATEWAY_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    );

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tollgate_gateway=info,tower_http=info")),
        )
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Gateway config error: {e}");
            std::process::exit(1);
        }
    };

    if config.api_keys.is_empty() {
        warn!("no API keys configured, authentication is DISABLED");
    }

    info!(
        listen_addr = %config.listen_addr,
        routes = config.routes.len(),
        rate_capacity = config.rate_limit.capacity,
        rate_refill_per_sec = config.rate_limit.refill_per_sec,
        "Tollgate gateway configuration loaded"
    );

    if let Err(e) = GatewayServer::new(config).start().await {
        eprintln!("Gateway error: {e}");
        std::process::exit(1);
    }
}
