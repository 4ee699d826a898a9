use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, EntityKind};

impl Engine {
    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let not_found = EngineError::NotFound(EntityKind::Appointment, id);
        let Some(trainer_id) = self.schedules.owner_of(&id) else {
            return Err(not_found);
        };
        let Some(shared) = self.schedules.get(&trainer_id) else {
            return Err(not_found);
        };
        let guard = shared.read().await;
        guard.get(&id).cloned().ok_or(not_found)
    }

    /// Every appointment of the trainer, by date then start time.
    pub async fn appointments_for_trainer(&self, trainer_id: Ulid) -> Vec<Appointment> {
        let shared = match self.schedules.get(&trainer_id) {
            Some(shared) => shared,
            None => return vec![],
        };
        let guard = shared.read().await;
        guard.iter().cloned().collect()
    }

    pub async fn appointments_for_member(&self, member_id: Ulid) -> Vec<Appointment> {
        let mut result = Vec::new();
        for (_, shared) in self.schedules.all_sorted() {
            let guard = shared.read().await;
            result.extend(guard.iter().filter(|a| a.member_id == member_id).cloned());
        }
        result.sort_by_key(|a| (a.date, a.time, a.id));
        result
    }

    pub fn windows(&self, trainer_id: Ulid) -> Vec<AvailabilityWindow> {
        self.availability.windows(&trainer_id)
    }
}
