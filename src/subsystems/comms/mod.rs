//! Comms subsystem: the channels users ask questions through.
//!
//! Each channel (PTY, HTTP) implements [`Component`] and is spawned by
//! [`start`] via [`spawn_components`]. Channels capture an
//! [`Arc<CommsState>`] at construction.
//!
//! An intra-subsystem [`mpsc`] channel lets running channels signal the
//! comms manager ([`run_event_manager`]). A channel that shuts down on its
//! own (console EOF, `/quit`) cancels the shared token, so the remaining
//! channels and the scheduler stop with it.

#[cfg(feature = "channel-axum")]
pub mod axum_channel;
#[cfg(feature = "channel-pty")]
pub mod pty;
mod state;

pub use state::{CommsEvent, CommsState};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::config::CommsConfig;
use crate::services::Services;
use crate::subsystems::runtime::{Component, SubsystemHandle, spawn_components};

/// Whether [`start`] will spawn at least one channel in this build.
pub fn has_channels(comms: &CommsConfig) -> bool {
    (cfg!(feature = "channel-pty") && comms.pty.enabled)
        || (cfg!(feature = "channel-axum") && comms.http.enabled)
}

/// Spawn all configured channels and return their [`SubsystemHandle`].
pub fn start(services: Arc<Services>, shutdown: CancellationToken) -> SubsystemHandle {
    let (event_tx, event_rx) = mpsc::channel::<CommsEvent>(32);
    let comms_cfg = services.config.comms.clone();
    let state = Arc::new(CommsState::new(services, event_tx));

    let mut components: Vec<Box<dyn Component>> = Vec::new();

    #[cfg(feature = "channel-pty")]
    {
        if comms_cfg.pty.enabled {
            info!("loading pty channel");
            components.push(Box::new(pty::PtyChannel::new("pty0", state.clone())));
        }
    }
    #[cfg(feature = "channel-axum")]
    {
        if comms_cfg.http.enabled {
            info!(bind = %comms_cfg.http.bind, "loading http channel");
            components.push(Box::new(axum_channel::AxumChannel::new(
                "http0",
                comms_cfg.http.bind.clone(),
                state.clone(),
            )));
        }
    }

    if components.is_empty() {
        info!("no comms channels configured");
    }

    drop(state);
    tokio::spawn(run_event_manager(event_rx, shutdown.clone()));

    spawn_components(components, shutdown)
}

/// Drain channel events until every sender is gone. Returns the number of
/// queries the channels received.
pub async fn run_event_manager(
    mut events: mpsc::Receiver<CommsEvent>,
    shutdown: CancellationToken,
) -> usize {
    let mut queries = 0;
    while let Some(event) = events.recv().await {
        match event {
            CommsEvent::ChannelShutdown { channel_id } => {
                if !shutdown.is_cancelled() {
                    info!(%channel_id, "channel closed, shutting down");
                    shutdown.cancel();
                }
            }
            CommsEvent::QueryReceived { channel_id } => {
                queries += 1;
                debug!(%channel_id, queries, "channel received query");
            }
        }
    }
    info!(queries, "comms manager stopped");
    queries
}
