use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Notification;
use crate::observability;

use super::conflict::now_ms;
use super::matcher::{check_gym_service, check_slot, check_trainer};
use super::{Engine, EngineError, EntityKind, RejectionReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub member_id: Ulid,
    pub trainer_id: Ulid,
    pub gym_service_id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub notes: Option<String>,
}

fn rejected(reason: RejectionReason) -> EngineError {
    metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => reason.as_str()).increment(1);
    EngineError::Rejected(reason)
}

impl Engine {
    /// Member, gym service and trainer checks, in that order. Returns the gym
    /// service and trainer the appointment will be built from.
    fn check_booking(
        &self,
        actor: &Actor,
        req: &BookingRequest,
    ) -> Result<(GymService, Trainer), EngineError> {
        if self.catalog.member(&req.member_id).is_none() || actor.member_id() != Some(req.member_id) {
            return Err(rejected(RejectionReason::InvalidMember));
        }
        let gs = self
            .catalog
            .gym_service(&req.gym_service_id)
            .ok_or_else(|| rejected(RejectionReason::ServiceNotFound))?;
        check_gym_service(&self.catalog, &gs).map_err(rejected)?;

        let trainer = self
            .catalog
            .trainer(&req.trainer_id)
            .ok_or_else(|| rejected(RejectionReason::TrainerIneligible))?;
        check_trainer(&trainer, &gs.gym_id, &gs.service_id).map_err(rejected)?;
        Ok((gs, trainer))
    }

    /// Validate and store a Pending appointment. Checks run in a fixed order and
    /// the first failure wins: member, gym service, trainer, availability, conflict.
    pub async fn create_appointment(
        &self,
        actor: &Actor,
        req: BookingRequest,
    ) -> Result<Appointment, EngineError> {
        let _permit = self.mutation_permit().await;

        if self.catalog.member(&req.member_id).is_none() || actor.member_id() != Some(req.member_id) {
            return Err(rejected(RejectionReason::InvalidMember));
        }
        if req.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        if self.schedules.owner_of(&req.id).is_some() {
            return Err(EngineError::AlreadyExists(EntityKind::Appointment, req.id));
        }
        let (_, trainer) = self.check_booking(actor, &req)?;

        let shared = self.schedules.get_or_create(trainer.id);
        let mut guard = shared.write().await;

        // Trainer updates commit under this lock, so the catalog read here is the
        // one the appointment is stored against.
        let (gs, trainer) = self.check_booking(actor, &req)?;
        let span = Span::at(req.time, gs.duration);
        check_slot(&self.availability, &guard, req.date, &span).map_err(rejected)?;

        if guard.len() >= MAX_APPOINTMENTS_PER_TRAINER {
            return Err(EngineError::LimitExceeded("too many appointments for trainer"));
        }
        if !self.schedules.reserve_id(req.id, trainer.id) {
            return Err(EngineError::AlreadyExists(EntityKind::Appointment, req.id));
        }

        let appointment = Appointment {
            id: req.id,
            member_id: req.member_id,
            trainer_id: trainer.id,
            gym_service_id: gs.id,
            date: req.date,
            time: req.time,
            duration: gs.duration,
            price: gs.price,
            status: AppointmentStatus::Pending,
            notes: req.notes,
            created_at: now_ms(),
            updated_at: None,
        };
        let event = Event::AppointmentBooked(appointment.clone());
        if let Err(e) = self.persist_appointment(&mut guard, &event).await {
            self.schedules.release_id(&appointment.id);
            return Err(e);
        }
        drop(guard);

        metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "booked").increment(1);
        tracing::info!(
            "booked {} for member {} with trainer {} on {} {span}",
            appointment.id,
            appointment.member_id,
            appointment.trainer_id,
            appointment.date
        );
        self.notify.send(Notification::Booked {
            appointment: appointment.clone(),
        });
        Ok(appointment)
    }
}
