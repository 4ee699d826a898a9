use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedSchedule = Arc<RwLock<TrainerSchedule>>;

/// The only mutable shared resource of the engine: appointments, one lock per trainer.
pub struct ScheduleStore {
    schedules: DashMap<Ulid, SharedSchedule>,
    /// Reverse lookup: appointment id → trainer id.
    appointment_owner: DashMap<Ulid, Ulid>,
}

impl Default for ScheduleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self {
            schedules: DashMap::new(),
            appointment_owner: DashMap::new(),
        }
    }

    pub fn get(&self, trainer_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(trainer_id).map(|e| e.value().clone())
    }

    pub fn get_or_create(&self, trainer_id: Ulid) -> SharedSchedule {
        self.schedules
            .entry(trainer_id)
            .or_insert_with(|| Arc::new(RwLock::new(TrainerSchedule::new(trainer_id))))
            .value()
            .clone()
    }

    pub fn remove(&self, trainer_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.remove(trainer_id).map(|(_, s)| s)
    }

    /// Every schedule, sorted by trainer id so multi-lock callers never deadlock.
    pub fn all_sorted(&self) -> Vec<(Ulid, SharedSchedule)> {
        let mut all: Vec<_> = self
            .schedules
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    // ── Appointment index ────────────────────────────────────

    pub fn owner_of(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_owner.get(appointment_id).map(|e| *e.value())
    }

    /// Claim `appointment_id` for `trainer_id`. False if any trainer already holds it.
    pub fn reserve_id(&self, appointment_id: Ulid, trainer_id: Ulid) -> bool {
        match self.appointment_owner.entry(appointment_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(trainer_id);
                true
            }
        }
    }

    pub fn release_id(&self, appointment_id: &Ulid) {
        self.appointment_owner.remove(appointment_id);
    }

    pub fn appointment_count(&self) -> usize {
        self.appointment_owner.len()
    }

    // ── Event application (caller holds the schedule's write lock) ──

    pub fn insert_appointment(&self, schedule: &mut TrainerSchedule, appointment: Appointment) {
        self.appointment_owner.insert(appointment.id, schedule.trainer_id);
        schedule.insert(appointment);
    }

    pub fn set_status(
        &self,
        schedule: &mut TrainerSchedule,
        id: &Ulid,
        status: AppointmentStatus,
        updated_at: Ms,
    ) -> Option<Appointment> {
        let appointment = schedule.get_mut(id)?;
        appointment.status = status;
        appointment.updated_at = Some(updated_at);
        Some(appointment.clone())
    }

    pub fn remove_appointments(
        &self,
        schedule: &mut TrainerSchedule,
        pred: impl FnMut(&Appointment) -> bool,
    ) -> Vec<Appointment> {
        let removed = schedule.remove_where(pred);
        for a in &removed {
            self.appointment_owner.remove(&a.id);
        }
        removed
    }
}
