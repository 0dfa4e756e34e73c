//! Studio Proxy Server - Main entry point
//!
//! Loads configuration, sets up logging and metrics, and serves the router.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use studio_proxy_rust::{
    build_router,
    core::{init_metrics, init_tracing},
    AppConfig, AppState,
};

fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .or_else(detect_cpu_limit)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async_main(worker_threads))
}

async fn async_main(worker_threads: usize) -> Result<()> {
    init_tracing();
    init_metrics();

    let config = match std::env::var("CONFIG_PATH") {
        Ok(path) => {
            tracing::info!(path = %path, "Loading configuration file");
            AppConfig::load(&path)?
        }
        Err(_) => AppConfig::from_env()?,
    };

    for (provider, configured) in [
        ("openai", config.openai.api_key.is_some()),
        ("stability", config.stability.api_key.is_some()),
        ("imgbb", config.imgbb.api_key.is_some()),
    ] {
        if !configured {
            tracing::warn!(provider = provider, "No API key configured; its routes will answer 500");
        }
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid bind address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let state = AppState::new(config).context("Failed to build HTTP client")?;
    let app = build_router(Arc::new(state));

    tracing::info!(worker_threads = worker_threads, "Starting studio proxy on {}", addr);
    tracing::info!("OpenAI: /api/openai/chat, /api/chat, /api/openai/completion, /api/openai/describe");
    tracing::info!("Stability: /api/stability/generate");
    tracing::info!("ImgBB: /api/imgbb/upload");
    tracing::info!("Metrics endpoint: /metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Detect CPU limit from cgroup (for containerized environments)
fn detect_cpu_limit() -> Option<usize> {
    // Try cgroup v2 first
    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        let parts: Vec<&str> = max.split_whitespace().collect();
        if let [quota, period] = parts.as_slice() {
            if let (Ok(quota), Ok(period)) = (quota.parse::<i64>(), period.parse::<i64>()) {
                if quota > 0 && period > 0 {
                    return Some(((quota as f64 / period as f64).ceil() as usize).max(1));
                }
            }
        }
    }

    // Fallback to cgroup v1
    let quota = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us")
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;
    let period = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us")
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;

    if quota > 0 && period > 0 {
        Some(((quota as f64 / period as f64).ceil() as usize).max(1))
    } else {
        None
    }
}
