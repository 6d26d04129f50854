use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Event, ReservationNotice};

const CHANNEL_CAPACITY: usize = 256;

/// In-process fan-out of committed changes.
///
/// Per-facility event streams feed live views; the notice stream carries one
/// `ReservationNotice` per created reservation for confirmation delivery.
/// Sending never blocks and never fails the mutation that produced it.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    notices: broadcast::Sender<ReservationNotice>,
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
            notices: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to a facility's committed events. Creates the channel if needed.
    pub fn subscribe(&self, facility_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(facility_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, facility_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&facility_id) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<ReservationNotice> {
        self.notices.subscribe()
    }

    pub fn send_notice(&self, notice: ReservationNotice) {
        if self.notices.send(notice).is_err() {
            tracing::debug!("reservation notice dropped: no subscribers");
        }
    }
}
