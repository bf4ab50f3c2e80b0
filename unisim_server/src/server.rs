//! Universe server.
//!
//! Ties the pieces together:
//! - a [`Multiplexer`] feeding a [`UniverseProxy`];
//! - the tick task, which owns the simulation cadence;
//! - the vis task, which broadcasts at its own, slower cadence.
//!
//! Timing notes:
//! - The simulated step is the previous tick's wall time, clamped to
//!   `[min_physics_frametime, max_physics_frametime]` and scaled by
//!   `simulation_rate`. A slow host slows simulated time down instead of
//!   taking larger, less accurate steps.
//! - With `realtime`, a tick that finishes early sleeps out the rest of
//!   `min_physics_frametime`.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::Context;
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tracing::{debug, error, info};
use unisim_shared::{body::IdAllocator, config::UniverseConfig};

use crate::{
    lifecycle::LifecycleQueue,
    multiplexer::Multiplexer,
    proxy::UniverseProxy,
    world::{World, WorldListener, WorldMetrics},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

/// State shared by the tick task, the vis task and every connection.
pub struct Shared {
    pub cfg: UniverseConfig,
    pub ids: Arc<IdAllocator>,
    pub queue: Arc<LifecycleQueue>,
    world: Mutex<World>,
}

impl Shared {
    pub fn new(cfg: UniverseConfig) -> Self {
        let ids = Arc::new(IdAllocator::new(cfg.id_rand_max));
        let queue = Arc::new(LifecycleQueue::new());
        let world = World::new(cfg.clone(), ids.clone(), queue.clone());
        Self {
            cfg,
            ids,
            queue,
            world: Mutex::new(world),
        }
    }

    /// Locks the world. A panic in another holder does not make it unusable.
    pub fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct UniverseServer {
    shared: Arc<Shared>,
    mux: Multiplexer,
    control: watch::Sender<RunState>,
    tick_task: Option<JoinHandle<()>>,
    vis_task: Option<JoinHandle<()>>,
}

impl UniverseServer {
    /// Binds `cfg.server_addr` and starts ticking.
    pub async fn start(cfg: UniverseConfig) -> anyhow::Result<Self> {
        cfg.validate().context("invalid config")?;
        let shared = Arc::new(Shared::new(cfg.clone()));
        let proxy = Arc::new(UniverseProxy::new(shared.clone()));
        let mux = Multiplexer::bind(&cfg.server_addr, proxy, cfg.max_frame_len)
            .await
            .with_context(|| format!("listen on {}", cfg.server_addr))?;

        let (control, control_rx) = watch::channel(RunState::Running);
        let tick_task = tokio::spawn(tick_loop(shared.clone(), control_rx.clone()));
        let vis_task = tokio::spawn(vis_loop(shared.clone(), control_rx));
        info!(
            addr = %mux.local_addr(),
            rate = cfg.simulation_rate,
            min_frametime = cfg.min_physics_frametime,
            max_frametime = cfg.max_physics_frametime,
            "universe running"
        );

        Ok(Self {
            shared,
            mux,
            control,
            tick_task: Some(tick_task),
            vis_task: Some(vis_task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.mux.local_addr()
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn connection_count(&self) -> usize {
        self.mux.connection_count()
    }

    pub fn metrics(&self) -> WorldMetrics {
        self.shared.world().metrics().clone()
    }

    pub fn register_listener(&self, listener: Box<dyn WorldListener>) {
        self.shared.world().add_listener(listener);
    }

    pub fn pause(&self) {
        self.set_state(RunState::Paused);
    }

    pub fn resume(&self) {
        self.set_state(RunState::Running);
    }

    pub fn is_paused(&self) -> bool {
        *self.control.borrow() == RunState::Paused
    }

    fn set_state(&self, state: RunState) {
        self.control.send_if_modified(|s| {
            if *s == RunState::Stopped || *s == state {
                return false;
            }
            info!(from = ?*s, to = ?state, "run state");
            *s = state;
            true
        });
    }

    /// Lets the current tick finish, stops both loops, then closes every
    /// connection. Messages still queued may be lost.
    pub async fn stop(&mut self) {
        let _ = self.control.send(RunState::Stopped);
        for task in [self.tick_task.take(), self.vis_task.take()].into_iter().flatten() {
            if let Err(e) = task.await {
                error!(error = %e, "simulation task panicked");
            }
        }
        self.mux.stop().await;
        info!("universe stopped");
    }
}

/// Starts a server on an ephemeral localhost port, for tests.
pub async fn bind_ephemeral(mut cfg: UniverseConfig) -> anyhow::Result<UniverseServer> {
    cfg.server_addr = "127.0.0.1:0".to_string();
    UniverseServer::start(cfg).await
}

async fn tick_loop(shared: Arc<Shared>, mut control: watch::Receiver<RunState>) {
    let cfg = &shared.cfg;
    let min_frame = Duration::from_secs_f64(cfg.min_physics_frametime);
    let pause_poll = Duration::from_secs_f64(cfg.max_physics_frametime);
    let mut dt = cfg.min_physics_frametime;

    loop {
        // The server handle was dropped without `stop`.
        if control.has_changed().is_err() {
            break;
        }
        let state = *control.borrow_and_update();
        match state {
            RunState::Stopped => break,
            RunState::Paused => {
                tokio::select! {
                    _ = control.changed() => {}
                    _ = tokio::time::sleep(pause_poll) => {}
                }
                continue;
            }
            RunState::Running => {}
        }

        let started = Instant::now();
        {
            let mut world = shared.world();
            world.tick(cfg.simulation_rate * dt);
            let wall = started.elapsed().as_secs_f64();
            let m = world.metrics_mut();
            m.last_physics_wall = wall;
            m.total_physics_wall += wall;
        }

        if cfg.realtime {
            let busy = started.elapsed();
            if busy < min_frame {
                tokio::time::sleep(min_frame - busy).await;
            }
        } else {
            tokio::task::yield_now().await;
        }
        dt = cfg.clamp_frametime(started.elapsed().as_secs_f64());
    }
    debug!("tick loop finished");
}

async fn vis_loop(shared: Arc<Shared>, mut control: watch::Receiver<RunState>) {
    let mut every = tokio::time::interval(Duration::from_secs_f64(shared.cfg.min_vis_frametime));
    every.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = control.changed() => {
                if changed.is_err() || *control.borrow() == RunState::Stopped {
                    break;
                }
            }
            _ = every.tick() => {
                let started = Instant::now();
                let mut world = shared.world();
                if world.vis.is_empty() {
                    continue;
                }
                let frames = world.broadcast_vis();
                world.metrics_mut().last_vis_frame = started.elapsed().as_secs_f64();
                debug!(frames, "vis broadcast");
            }
        }
    }
    debug!("vis loop finished");
}
