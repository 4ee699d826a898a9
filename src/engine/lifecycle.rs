use ulid::Ulid;

use crate::model::*;
use crate::notify::Notification;
use crate::observability;

use super::conflict::now_ms;
use super::{Engine, EngineError};

impl AppointmentStatus {
    /// Statuses directly reachable from `self`.
    pub fn next_states(&self) -> &'static [AppointmentStatus] {
        match self {
            AppointmentStatus::Pending => &[AppointmentStatus::Approved, AppointmentStatus::Rejected],
            AppointmentStatus::Approved => &[AppointmentStatus::Completed, AppointmentStatus::Cancelled],
            AppointmentStatus::Rejected
            | AppointmentStatus::Completed
            | AppointmentStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, to: AppointmentStatus) -> bool {
        self.next_states().contains(&to)
    }

    pub fn is_terminal(&self) -> bool {
        self.next_states().is_empty()
    }
}

/// Who may move `appointment` to `to`, once the move itself is known to be legal.
fn authorize(actor: &Actor, appointment: &Appointment, to: AppointmentStatus) -> Result<(), EngineError> {
    match actor {
        Actor::Admin => Ok(()),
        Actor::Trainer(id) if *id == appointment.trainer_id => Ok(()),
        Actor::Trainer(_) => Err(EngineError::Forbidden("not this trainer's appointment")),
        Actor::Member(id) if *id != appointment.member_id => {
            Err(EngineError::Forbidden("not this member's appointment"))
        }
        Actor::Member(_) if to == AppointmentStatus::Cancelled => Ok(()),
        Actor::Member(_) => Err(EngineError::Forbidden("members may only cancel")),
    }
}

impl Engine {
    pub async fn transition(
        &self,
        actor: &Actor,
        id: Ulid,
        to: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let _permit = self.mutation_permit().await;
        let mut guard = self.resolve_appointment_write(&id).await?;
        let current = guard
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(super::EntityKind::Appointment, id))?;

        if !current.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to,
            });
        }
        authorize(actor, &current, to)?;

        let event = Event::AppointmentStatusChanged {
            id,
            trainer_id: current.trainer_id,
            status: to,
            updated_at: now_ms(),
        };
        let updated = self
            .persist_appointment(&mut guard, &event)
            .await?
            .ok_or(EngineError::NotFound(super::EntityKind::Appointment, id))?;
        drop(guard);

        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        tracing::info!("{actor} moved appointment {id} from {} to {to}", current.status);
        self.notify.send(Notification::StatusChanged {
            appointment_id: id,
            trainer_id: updated.trainer_id,
            member_id: updated.member_id,
            from: current.status,
            to,
        });
        Ok(updated)
    }

    /// As [`Engine::transition`], with the target status as free text.
    pub async fn transition_str(
        &self,
        actor: &Actor,
        id: Ulid,
        to: &str,
    ) -> Result<Appointment, EngineError> {
        let to: AppointmentStatus = to
            .parse()
            .map_err(|e: UnknownStatus| EngineError::Validation(e.to_string()))?;
        self.transition(actor, id, to).await
    }
}
