//! Helpers shared by the integration tests.

use unisim_client::client::body_props;
use unisim_server::{bind_ephemeral, UniverseServer};
use unisim_shared::{config::UniverseConfig, math::Vec3, message::BodyProperties};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Short frames so tests see many ticks and vis frames quickly.
pub fn fast_config() -> UniverseConfig {
    UniverseConfig {
        min_physics_frametime: 0.002,
        max_physics_frametime: 0.01,
        min_vis_frametime: 0.02,
        ..UniverseConfig::default()
    }
}

pub async fn start_server() -> anyhow::Result<(UniverseServer, String)> {
    let server = bind_ephemeral(fast_config()).await?;
    let addr = server.local_addr().to_string();
    Ok((server, addr))
}

/// A light, motionless ship.
pub fn ship(position: Vec3) -> BodyProperties {
    body_props("Ship", 1000.0, 5.0, position, Vec3::ZERO)
}
