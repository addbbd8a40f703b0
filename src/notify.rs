use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::engine::SideEffect;
use crate::model::{AgencyId, VehicleId};

const CHANNEL_CAPACITY: usize = 256;

/// A committed side effect, routed to the collaborators of one agency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatch {
    pub agency_id: AgencyId,
    pub vehicle_id: VehicleId,
    pub effect: SideEffect,
}

/// Broadcast hub for committed side effects, one channel per agency.
pub struct NotifyHub {
    channels: DashMap<AgencyId, broadcast::Sender<Dispatch>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to an agency's dispatches. Creates the channel if needed.
    pub fn subscribe(&self, agency_id: AgencyId) -> broadcast::Receiver<Dispatch> {
        let sender = self
            .channels
            .entry(agency_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a dispatch. No-op if nobody is listening.
    pub fn send(&self, dispatch: Dispatch) {
        if let Some(sender) = self.channels.get(&dispatch.agency_id) {
            let _ = sender.send(dispatch);
        }
    }
}
