//! Event pump between the registry, the heartbeat channel and the router

use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::heartbeat::ChannelEvent;
use crate::registry::RegistryEvent;
use crate::routing::{Router, RouterSettings};

pub(super) struct EventPump {
    pub config: Arc<Mutex<AgentConfig>>,
    pub router: Arc<Router>,
}

impl EventPump {
    fn on_registry_event(&self, event: RegistryEvent) {
        if event.is_removal() {
            debug!("Dropping circuit state for {}", event.endpoint_id());
            self.router.forget(event.endpoint_id());
        }
    }

    /// Rebuild router settings from the configuration the channel just merged
    fn sync_router(&self) {
        let settings = {
            let config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
            RouterSettings::from_config(&config)
        };
        if settings == self.router.settings() {
            return;
        }
        match self.router.replace_settings(settings) {
            Ok(()) => info!("Router settings follow configuration update"),
            Err(e) => warn!("Router rejected configuration update: {}", e),
        }
    }

    fn on_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::ConfigUpdated(_) => self.sync_router(),
            ChannelEvent::StateChanged { from, to, .. } => debug!("Controller link {} -> {}", from, to),
            ChannelEvent::Command(command) => debug!("Controller command {}", command.kind()),
        }
    }

    pub async fn run(
        self,
        mut registry_events: broadcast::Receiver<RegistryEvent>,
        mut channel_events: broadcast::Receiver<ChannelEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = registry_events.recv() => match event {
                    Ok(event) => self.on_registry_event(event),
                    Err(RecvError::Lagged(n)) => warn!("Event pump missed {} registry events", n),
                    Err(RecvError::Closed) => break,
                },
                event = channel_events.recv() => match event {
                    Ok(event) => self.on_channel_event(event),
                    Err(RecvError::Lagged(n)) => warn!("Event pump missed {} heartbeat events", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Event pump stopped");
    }
}
