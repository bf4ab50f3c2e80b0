use std::time::Duration;

use unisim_server::{bind_ephemeral, UniverseServer};
use unisim_shared::config::UniverseConfig;
use unisim_tests::{fast_config, init_tracing};

/// Smoke test: the server ticks on its own and stops cleanly.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_ticks_and_stops() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(fast_config()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let m = server.metrics();
    assert!(m.ticks > 0);
    assert!(m.total_time > 0.0);
    assert!(m.last_dt >= 0.002 && m.last_dt <= 0.01);

    server.stop().await;
    assert_eq!(server.connection_count(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn paused_server_keeps_its_clock() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(fast_config()).await?;
    tokio::time::sleep(Duration::from_millis(30)).await;

    server.pause();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let frozen = server.metrics().ticks;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.metrics().ticks, frozen);

    server.resume();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.metrics().ticks > frozen);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn bad_config_is_rejected() {
    let cfg = UniverseConfig {
        simulation_rate: -1.0,
        ..fast_config()
    };
    assert!(UniverseServer::start(cfg).await.is_err());
}
