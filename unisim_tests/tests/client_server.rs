//! Socket-level tests: real server, real clients.

use std::time::Duration;

use unisim_client::{
    client::{beam_along, body_props},
    vis::VisFrameBuffer,
    UniverseClient,
};
use unisim_shared::{
    body::NO_BODY,
    math::Vec3,
    message::{BeamKind, MessageBody},
    spectrum::{Spectrum, SpectrumComponent},
};
use unisim_tests::{init_tracing, ship, start_server};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hello_hands_out_fresh_ids() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server().await?;
    let mut client = UniverseClient::connect(&addr).await?;

    let a = client.hello(WAIT).await?;
    let b = client.hello(WAIT).await?;
    assert!(a > 0);
    assert_ne!(a, b);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smart_body_sees_itself_in_vis_frames() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server().await?;
    let mut client = UniverseClient::connect(&addr).await?;

    let me = client.spawn_smart(ship(Vec3::new(100.0, 0.0, 0.0)), WAIT).await?;
    client.enable_vis(Some(me), true).await?;

    let mut frames = VisFrameBuffer::new(4);
    let deadline = tokio::time::Instant::now() + WAIT;
    let mut complete = false;
    while tokio::time::Instant::now() < deadline && !complete {
        if let Some(msg) = client.recv(Duration::from_millis(100)).await? {
            if frames.push(&msg) {
                assert_eq!(msg.server_id, Some(NO_BODY));
                complete = frames.latest().is_some_and(|f| f.get(me).is_some());
            }
        }
    }
    assert!(complete, "no vis frame containing the subscriber");

    let frame = frames.latest().unwrap();
    let mine = frame.get(me).unwrap();
    assert!(mine.position.len() < 1e-6, "positions are relative to the subscriber");
    assert_eq!(mine.radius, 5.0);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn active_scan_round_trip() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server().await?;
    let mut scanner = UniverseClient::connect(&addr).await?;
    let mut target = UniverseClient::connect(&addr).await?;

    let a = scanner.spawn_smart(ship(Vec3::ZERO), WAIT).await?;
    let b = target
        .spawn_smart(
            body_props("Station", 1.0e6, 50.0, Vec3::new(1000.0, 0.0, 0.0), Vec3::ZERO),
            WAIT,
        )
        .await?;
    // Both bodies join the world at the next tick.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fire = beam_along(
        BeamKind::Scan,
        Vec3::new(10.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
        0.1,
        1.0e9,
    );
    scanner.fire_beam(Some(a), fire).await?;

    let answered = target
        .answer_scan_queries(Duration::from_millis(500), |_energy| "cargo: ore".to_string())
        .await?;
    assert_eq!(answered, 1, "one query per beam and target");

    let hit = target
        .recv_where(WAIT, |m| matches!(m.body, MessageBody::Collision(_)))
        .await?
        .expect("target is told about the scan beam");
    assert_eq!(hit.server_id, Some(b));

    let result = scanner
        .recv_where(WAIT, |m| matches!(m.body, MessageBody::ScanResult(_)))
        .await?
        .expect("scan result delivered to the scanner");
    assert_eq!(result.server_id, Some(a));
    let MessageBody::ScanResult(r) = result.body else {
        unreachable!()
    };
    assert_eq!(r.obj_type.as_deref(), Some("Station"));
    assert_eq!(r.data.as_deref(), Some("cargo: ore"));
    let pos = r.position.unwrap();
    assert!((pos - Vec3::new(1000.0, 0.0, 0.0)).len() < 1.0);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn passive_scan_lists_other_bodies() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server().await?;
    let mut client = UniverseClient::connect(&addr).await?;

    let me = client.spawn_smart(ship(Vec3::ZERO), WAIT).await?;
    let mut rock = body_props("Rock", 10.0, 2.0, Vec3::new(0.0, 50.0, 0.0), Vec3::ZERO);
    rock.spectrum = Some(Spectrum::new(vec![SpectrumComponent {
        wavelength: 5.0e-7,
        power: 1.0e3,
    }]));
    client.spawn_dumb(rock, None).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.passive_scan(me).await?;
    let result = client
        .recv_where(WAIT, |m| matches!(m.body, MessageBody::ScanResult(_)))
        .await?
        .expect("passive scan result");
    let MessageBody::ScanResult(r) = result.body else {
        unreachable!()
    };
    // Passive results carry a bearing and an attenuated spectrum only.
    assert_eq!(r.position, Some(Vec3::new(0.0, 1.0, 0.0)));
    let seen = r.obj_spectrum.expect("spectrum").total_power();
    assert!(seen > 0.0 && seen < 1.0e3);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_frames_do_not_close_the_connection() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server().await?;
    let mut client = UniverseClient::connect(&addr).await?;

    // Unknown field kind inside a well-sized frame.
    client.send_raw(&[3, 0, 0, 0, 0xff, 0xff, 0xff]).await?;
    // Zero length prefix.
    client.send_raw(&[0, 0, 0, 0]).await?;

    let id = client.hello(WAIT).await?;
    assert!(id > 0);
    assert_eq!(server.connection_count(), 1);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_the_owner_may_update_a_smart_body() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server().await?;
    let mut owner = UniverseClient::connect(&addr).await?;
    let mut other = UniverseClient::connect(&addr).await?;

    let id = owner.spawn_smart(ship(Vec3::ZERO), WAIT).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut props = ship(Vec3::ZERO);
    props.thrust = Some(Vec3::new(1.0e6, 0.0, 0.0));
    other.update(id, props.clone()).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let thrust = server.shared().world().body(id).map(|b| b.thrust);
    assert_eq!(thrust, Some(Vec3::ZERO));

    owner.update(id, props).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let thrust = server.shared().world().body(id).map(|b| b.thrust);
    assert_eq!(thrust, Some(Vec3::new(1.0e6, 0.0, 0.0)));

    server.stop().await;
    Ok(())
}
