//! Bodies appear and disappear only at tick boundaries, and a client's
//! smart bodies never outlive its connection.

use std::time::Duration;

use tokio::sync::mpsc;
use unisim_client::{client::body_props, UniverseClient};
use unisim_server::world::WorldListener;
use unisim_shared::{
    body::{PhysId, PhysicsBody},
    math::Vec3,
};
use unisim_tests::{init_tracing, ship, start_server};

const WAIT: Duration = Duration::from_secs(2);

struct ExpiryLog(mpsc::UnboundedSender<PhysId>);

impl WorldListener for ExpiryLog {
    fn on_expire(&mut self, body: &PhysicsBody) {
        let _ = self.0.send(body.id);
    }
}

async fn next_expiry(rx: &mut mpsc::UnboundedReceiver<PhysId>) -> Option<PhysId> {
    tokio::time::timeout(WAIT, rx.recv()).await.ok().flatten()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn goodbye_expires_the_body() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server().await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    server.register_listener(Box::new(ExpiryLog(tx)));

    let mut client = UniverseClient::connect(&addr).await?;
    let id = client.spawn_smart(ship(Vec3::ZERO), WAIT).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.shared().world().body(id).is_some());

    client.goodbye(id).await?;
    assert_eq!(next_expiry(&mut rx).await, Some(id));
    assert!(server.shared().world().body(id).is_none());

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hangup_expires_every_owned_body() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server().await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    server.register_listener(Box::new(ExpiryLog(tx)));

    let mut client = UniverseClient::connect(&addr).await?;
    let a = client.spawn_smart(ship(Vec3::ZERO), WAIT).await?;
    let b = client.spawn_smart(ship(Vec3::new(0.0, 1000.0, 0.0)), WAIT).await?;
    client
        .spawn_dumb(body_props("Rock", 10.0, 1.0, Vec3::new(500.0, 0.0, 0.0), Vec3::ZERO), None)
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.shared().world().body_count(), 3);

    drop(client);
    let mut gone = vec![
        next_expiry(&mut rx).await.expect("first expiry"),
        next_expiry(&mut rx).await.expect("second expiry"),
    ];
    gone.sort_unstable();
    assert_eq!(gone, vec![a.min(b), a.max(b)]);

    // Dumb bodies belong to the universe, not the connection.
    assert_eq!(server.shared().world().body_count(), 1);
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawn_then_immediate_hangup_never_leaks() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server().await?;
    server.pause();

    let mut client = UniverseClient::connect(&addr).await?;
    client.spawn_smart(ship(Vec3::ZERO), WAIT).await?;
    drop(client);
    // Let the reader notice the hangup while nothing is ticking.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.shared().world().body_count(), 0);

    server.resume();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.shared().world().body_count(), 0);

    server.stop().await;
    Ok(())
}
