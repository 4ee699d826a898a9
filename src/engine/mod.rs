mod availability;
mod booking;
mod catalog;
mod conflict;
mod error;
mod lifecycle;
mod matcher;
mod mutations;
mod queries;
mod store;

pub use availability::{covers, day_of_week, AvailabilityIndex, WeeklyAvailability};
pub use booking::BookingRequest;
pub use catalog::Catalog;
pub use conflict::{find_conflict, has_conflict, is_blocking};
pub use error::{EngineError, EntityKind, RejectionReason};
pub use mutations::{GymServiceChanges, TrainerChanges};
pub use store::{ScheduleStore, SharedSchedule};

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notification, NotifyHub};
use crate::wal::{Wal, WalHandle};

pub struct Engine {
    pub catalog: Catalog,
    pub availability: AvailabilityIndex,
    pub(super) schedules: ScheduleStore,
    pub(super) wal: WalHandle,
    pub notify: Arc<NotifyHub>,
    /// Held shared by every mutation. Compaction holds it exclusively so a snapshot
    /// never misses an event appended while it is being written; member removal
    /// does too, since its cascade spans every schedule.
    gate: RwLock<()>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer. Must run inside a tokio runtime.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = WalHandle::spawn(Wal::open(&wal_path)?);

        let engine = Self {
            catalog: Catalog::new(),
            availability: AvailabilityIndex::new(),
            schedules: ScheduleStore::new(),
            wal,
            notify,
            gate: RwLock::new(()),
        };

        // We're the sole owner of every schedule lock here, so try_write always
        // succeeds. Never block: this may run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            "replayed {} events: {} trainers, {} members, {} appointments",
            events.len(),
            engine.catalog.trainer_count(),
            engine.catalog.member_count(),
            engine.schedules.appointment_count(),
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::AppointmentBooked(a) => {
                let shared = self.schedules.get_or_create(a.trainer_id);
                let Ok(mut guard) = shared.try_write() else { return };
                self.schedules.insert_appointment(&mut guard, a.clone());
            }
            Event::AppointmentStatusChanged { id, trainer_id, status, updated_at } => {
                let Some(shared) = self.schedules.get(trainer_id) else { return };
                let Ok(mut guard) = shared.try_write() else { return };
                self.schedules.set_status(&mut guard, id, *status, *updated_at);
            }
            Event::TrainerRemoved { id } => {
                if let Some(shared) = self.schedules.get(id)
                    && let Ok(mut guard) = shared.try_write()
                {
                    self.schedules.remove_appointments(&mut guard, |_| true);
                }
                self.schedules.remove(id);
                self.apply_reference(event);
            }
            Event::MemberRemoved { id } => {
                for (_, shared) in self.schedules.all_sorted() {
                    if let Ok(mut guard) = shared.try_write() {
                        self.schedules.remove_appointments(&mut guard, |a| a.member_id == *id);
                    }
                }
                self.apply_reference(event);
            }
            other => self.apply_reference(other),
        }
    }

    /// Taken first by every mutation, before any schedule lock.
    pub(super) async fn mutation_permit(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Excludes every other mutation until dropped.
    pub(super) async fn exclusive_permit(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    fn apply_reference(&self, event: &Event) {
        self.catalog.apply(event);
        self.availability.apply(event);
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal
            .append(event.clone())
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply a reference-data event.
    pub(super) async fn persist_reference(&self, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        self.apply_reference(&event);
        Ok(())
    }

    /// WAL-append then apply an appointment event to a locked schedule. Nothing is
    /// applied if the append fails.
    pub(super) async fn persist_appointment(
        &self,
        schedule: &mut TrainerSchedule,
        event: &Event,
    ) -> Result<Option<Appointment>, EngineError> {
        self.wal_append(event).await?;
        Ok(match event {
            Event::AppointmentBooked(a) => {
                self.schedules.insert_appointment(schedule, a.clone());
                Some(a.clone())
            }
            Event::AppointmentStatusChanged { id, status, updated_at, .. } => {
                self.schedules.set_status(schedule, id, *status, *updated_at)
            }
            _ => None,
        })
    }

    /// Lookup appointment → trainer, acquire that trainer's write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<TrainerSchedule>, EngineError> {
        let not_found = || EngineError::NotFound(EntityKind::Appointment, *appointment_id);
        let trainer_id = self.schedules.owner_of(appointment_id).ok_or_else(not_found)?;
        let shared = self.schedules.get(&trainer_id).ok_or_else(not_found)?;
        let guard = shared.write_owned().await;
        if guard.get(appointment_id).is_none() {
            // Removed while we waited for the lock.
            return Err(not_found());
        }
        Ok(guard)
    }

    pub(super) fn announce_removed(&self, removed: &[Appointment]) {
        for a in removed {
            self.notify.send(Notification::Removed {
                appointment_id: a.id,
                trainer_id: a.trainer_id,
                member_id: a.member_id,
            });
        }
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.exclusive_permit().await;
        let mut events = self.catalog.snapshot();
        events.extend(self.availability.snapshot());
        for (_, shared) in self.schedules.all_sorted() {
            let guard = shared.read().await;
            events.extend(guard.iter().cloned().map(Event::AppointmentBooked));
        }
        let count = events.len();
        self.wal
            .compact(events)
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
