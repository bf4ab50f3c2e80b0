//! Scout client.
//!
//! Usage:
//!   cargo run -p unisim_client --bin scout -- [--addr 127.0.0.1:5505] [--seconds 10]
//!
//! Spawns a smart body, subscribes to visual data and logs everything the
//! server reports until the time runs out, then says goodbye. Active scans
//! are answered with the scout's name.

use std::{env, time::Duration};

use anyhow::{bail, Context};
use tokio::time::Instant;
use tracing::info;
use unisim_client::{
    client::{body_props, UniverseClient},
    vis::VisFrameBuffer,
};
use unisim_shared::{
    config::UniverseConfig,
    math::Vec3,
    message::{Message, MessageBody, ScanResponse},
};

struct Args {
    addr: String,
    seconds: f64,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        addr: UniverseConfig::default().server_addr,
        seconds: 10.0,
    };
    let argv: Vec<String> = env::args().skip(1).collect();
    let mut i = 0;
    while i < argv.len() {
        let value = argv.get(i + 1).with_context(|| format!("{} needs a value", argv[i]))?;
        match argv[i].as_str() {
            "--addr" => args.addr = value.clone(),
            "--seconds" => args.seconds = value.parse().context("--seconds expects a number")?,
            other => bail!("unknown argument {other}"),
        }
        i += 2;
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args()?;
    let mut client = UniverseClient::connect(&args.addr).await.context("connect")?;
    let wait = Duration::from_secs(2);

    let me = client
        .spawn_smart(
            body_props("Scout", 1000.0, 5.0, Vec3::new(0.0, 0.0, 1.0e4), Vec3::ZERO),
            wait,
        )
        .await?;
    client.enable_vis(Some(me), true).await?;
    client.passive_scan(me).await?;

    let mut frames = VisFrameBuffer::new(8);
    let deadline = Instant::now() + Duration::from_secs_f64(args.seconds);
    while Instant::now() < deadline {
        let Some(msg) = client.recv(Duration::from_millis(200)).await? else {
            continue;
        };
        match &msg.body {
            MessageBody::VisualData(_) => {
                if frames.push(&msg) {
                    if let Some(frame) = frames.latest() {
                        info!(bodies = frame.bodies.len(), "vis frame");
                    }
                }
            }
            MessageBody::Collision(c) => {
                info!(kind = ?c.kind, energy = ?c.energy, comm = ?c.comm_msg, "collision");
            }
            MessageBody::ScanResult(r) => {
                info!(obj_type = ?r.obj_type, position = ?r.position, data = ?r.data, "scan result");
            }
            MessageBody::ScanQuery(q) if q.scan_id.is_some() => {
                let reply = Message::new(MessageBody::ScanResponse(ScanResponse {
                    scan_id: q.scan_id,
                    data: Some("Scout".to_string()),
                }))
                .addressed_like(&msg);
                client.send(&reply).await?;
                info!(scan_id = ?q.scan_id, "answered scan");
            }
            other => info!(kind = ?other.kind(), "message"),
        }
    }

    client.goodbye(me).await?;
    info!(frames = frames.len(), "scout done");
    Ok(())
}
