use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Appointment, AppointmentStatus};

const CHANNEL_CAPACITY: usize = 256;

/// What the notifier is told about. Reference-data changes are not announced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Booked {
        appointment: Appointment,
    },
    StatusChanged {
        appointment_id: Ulid,
        trainer_id: Ulid,
        member_id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    /// Dropped by a member or trainer deletion.
    Removed {
        appointment_id: Ulid,
        trainer_id: Ulid,
        member_id: Ulid,
    },
}

impl Notification {
    pub fn trainer_id(&self) -> Ulid {
        match self {
            Notification::Booked { appointment } => appointment.trainer_id,
            Notification::StatusChanged { trainer_id, .. }
            | Notification::Removed { trainer_id, .. } => *trainer_id,
        }
    }
}

/// Broadcast hub: one channel per trainer plus a firehose for the notifier.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
    all: broadcast::Sender<Notification>,
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
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one trainer's appointments. Creates the channel if needed.
    pub fn subscribe(&self, trainer_id: Ulid) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(trainer_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Notification> {
        self.all.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, notification: Notification) {
        if let Some(sender) = self.channels.get(&notification.trainer_id()) {
            let _ = sender.send(notification.clone());
        }
        let _ = self.all.send(notification);
    }

    /// Drop a trainer's channel once the trainer is gone.
    pub fn remove(&self, trainer_id: &Ulid) {
        self.channels.remove(trainer_id);
    }
}

/// Drains the firehose into the log until the hub is dropped. Stands in for the
/// external notification service.
pub async fn run_log_notifier(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(n) => match serde_json::to_string(&n) {
                Ok(json) => tracing::info!(target: "gymslot::notify", "{json}"),
                Err(e) => tracing::warn!("unserializable notification: {e}"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("notifier lagged, {skipped} notifications dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
