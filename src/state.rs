use crate::clock::Clock;
use crate::config::Config;
use crate::services::{
    Collaborators, DeferredDeliveryScheduler, StateChange, StateDispatcher, StateEventBus,
};
use crate::websocket::{FanoutGateway, PresenceRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<FanoutGateway>,
    pub scheduler: DeferredDeliveryScheduler,
    pub deps: Collaborators,
    pub state_events: StateEventBus,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
}

/// Long-running pieces that `main` spawns next to the HTTP server
pub struct BackgroundTasks {
    pub scheduler: DeferredDeliveryScheduler,
    pub dispatcher: StateDispatcher,
    pub state_rx: mpsc::Receiver<StateChange>,
}

impl AppState {
    /// Wire the delivery core around a set of collaborators.
    pub fn new(
        config: Arc<Config>,
        deps: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> (Self, BackgroundTasks) {
        let gateway = Arc::new(FanoutGateway::new(
            PresenceRegistry::new(),
            deps.clone(),
            clock.clone(),
            config.policy,
            config.max_message_length,
        ));
        let scheduler = DeferredDeliveryScheduler::new(
            deps.ledger.clone(),
            deps.availability.clone(),
            gateway.clone(),
            clock.clone(),
            config.scheduler.clone(),
        );
        let dispatcher = StateDispatcher::new(gateway.clone(), deps.activity.clone());
        let (state_events, state_rx) = StateEventBus::new(config.state_event_buffer);

        let state = Self {
            gateway,
            scheduler: scheduler.clone(),
            deps,
            state_events,
            clock,
            config,
        };
        (
            state,
            BackgroundTasks {
                scheduler,
                dispatcher,
                state_rx,
            },
        )
    }
}
