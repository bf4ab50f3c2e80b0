//! Standalone universe server.
//!
//! Usage:
//!   cargo run -p unisim_server -- [--config universe.json] [--addr 127.0.0.1:5505]
//!       [--rate 1.0] [--min-frametime 0.002] [--max-frametime 0.002] [--vis-frametime 0.1]
//!
//! Command line values override the config file. Ctrl-C stops the server.

use std::env;

use anyhow::{bail, Context};
use tracing::info;
use unisim_server::UniverseServer;
use unisim_shared::config::UniverseConfig;

fn parse_args() -> anyhow::Result<UniverseConfig> {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            let text = std::fs::read_to_string(path).with_context(|| format!("read config {path}"))?;
            UniverseConfig::from_json_str(&text).with_context(|| format!("parse config {path}"))?
        }
        None => UniverseConfig::default(),
    };

    let mut i = 0;
    while i < args.len() {
        let value = args.get(i + 1);
        let number = |flag: &str| -> anyhow::Result<f64> {
            value
                .with_context(|| format!("{flag} needs a value"))?
                .parse()
                .with_context(|| format!("{flag} expects a number"))
        };
        match args[i].as_str() {
            "--config" => {}
            "--addr" => cfg.server_addr = value.context("--addr needs a value")?.clone(),
            "--rate" => cfg.simulation_rate = number("--rate")?,
            "--min-frametime" => cfg.min_physics_frametime = number("--min-frametime")?,
            "--max-frametime" => cfg.max_physics_frametime = number("--max-frametime")?,
            "--vis-frametime" => cfg.min_vis_frametime = number("--vis-frametime")?,
            other => bail!("unknown argument {other}"),
        }
        i += 2;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, rate = cfg.simulation_rate, "starting universe");

    let mut server = UniverseServer::start(cfg).await.context("start server")?;
    info!(addr = %server.local_addr(), "ready");

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("ctrl-c received, stopping");
    server.stop().await;

    let metrics = serde_json::to_string(&server.metrics()).context("serialize metrics")?;
    info!(%metrics, "final metrics");
    Ok(())
}
