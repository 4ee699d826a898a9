use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::conflict::{find_conflict, validate_duration};
use super::{AvailabilityIndex, Catalog, Engine, EngineError, EntityKind, RejectionReason};

/// The gym service and the gym behind it are both switched on.
pub(super) fn check_gym_service(catalog: &Catalog, gs: &GymService) -> Result<(), RejectionReason> {
    if gs.is_active && catalog.active_gym(&gs.gym_id).is_some() {
        Ok(())
    } else {
        Err(RejectionReason::ServiceInactive)
    }
}

/// Static eligibility: active, assigned to `gym_id`, offers `service_id`.
pub(super) fn check_trainer(
    trainer: &Trainer,
    gym_id: &Ulid,
    service_id: &Ulid,
) -> Result<(), RejectionReason> {
    if trainer.is_active && trainer.gym_id == Some(*gym_id) && trainer.services.contains(service_id) {
        Ok(())
    } else {
        Err(RejectionReason::TrainerIneligible)
    }
}

/// Availability then conflict, against a schedule the caller has locked.
pub(super) fn check_slot(
    availability: &AvailabilityIndex,
    schedule: &TrainerSchedule,
    date: NaiveDate,
    span: &Span,
) -> Result<(), RejectionReason> {
    if !availability.covers_slot(&schedule.trainer_id, date, span) {
        return Err(RejectionReason::OutsideAvailability);
    }
    if let Some(existing) = find_conflict(schedule, &date, span, None) {
        tracing::debug!(
            "slot {span} on {date} overlaps appointment {} of trainer {}",
            existing.id,
            schedule.trainer_id
        );
        return Err(RejectionReason::SlotConflict);
    }
    Ok(())
}

impl Engine {
    /// Trainers at `gym_id` who could take `gym_service_id` on `date` at `time`
    /// right now, in id order. `duration` defaults to the gym service's.
    pub async fn find_available(
        &self,
        gym_id: Ulid,
        gym_service_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        duration: Option<Minute>,
    ) -> Result<Vec<TrainerInfo>, EngineError> {
        let gs = self
            .catalog
            .gym_service(&gym_service_id)
            .ok_or(EngineError::NotFound(EntityKind::GymService, gym_service_id))?;
        let duration = duration.unwrap_or(gs.duration);
        validate_duration(duration)?;
        let span = Span::at(time, duration);

        let mut found = Vec::new();
        if gs.gym_id != gym_id || check_gym_service(&self.catalog, &gs).is_err() {
            metrics::histogram!(observability::CANDIDATES_RETURNED).record(0.0);
            return Ok(found);
        }
        for trainer in self.catalog.trainers_at(&gym_id) {
            if check_trainer(&trainer, &gym_id, &gs.service_id).is_err() {
                continue;
            }
            let Some(shared) = self.schedules.get(&trainer.id) else {
                // Nothing booked yet: availability alone decides.
                if self.availability.covers_slot(&trainer.id, date, &span) {
                    found.push(TrainerInfo::from(&trainer));
                }
                continue;
            };
            let guard = shared.read().await;
            if check_slot(&self.availability, &guard, date, &span).is_ok() {
                found.push(TrainerInfo::from(&trainer));
            }
        }

        metrics::histogram!(observability::CANDIDATES_RETURNED).record(found.len() as f64);
        Ok(found)
    }

    /// Whether `span` on `date` collides with a blocking appointment of `trainer_id`.
    pub async fn has_conflict(
        &self,
        trainer_id: Ulid,
        date: NaiveDate,
        span: Span,
        exclude: Option<Ulid>,
    ) -> bool {
        match self.schedules.get(&trainer_id) {
            Some(shared) => {
                let guard = shared.read().await;
                find_conflict(&guard, &date, &span, exclude).is_some()
            }
            None => false,
        }
    }
}
