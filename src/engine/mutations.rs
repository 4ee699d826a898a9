use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_duration;
use super::{Engine, EngineError, EntityKind};

/// Partial update of a gym service. Appointments already booked keep their copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GymServiceChanges {
    pub duration: Option<Minute>,
    pub price: Option<u64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainerChanges {
    pub is_active: Option<bool>,
    /// `Some(None)` unassigns the trainer.
    pub gym_id: Option<Option<Ulid>>,
}

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("name must not be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn check_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Validation(format!(
            "start {} must be before end {}",
            format_minute(span.start),
            format_minute(span.end)
        )));
    }
    if span.end > MINUTES_PER_DAY {
        return Err(EngineError::Validation("end past midnight".into()));
    }
    Ok(())
}

impl Engine {
    // ── Gyms & services ──────────────────────────────────────

    pub async fn add_gym(&self, gym: Gym) -> Result<(), EngineError> {
        check_name(&gym.name)?;
        check_span(&gym.hours)?;
        if let Some(days) = &gym.working_days
            && days.iter().any(|d| *d > 6)
        {
            return Err(EngineError::Validation("working day outside 0..=6".into()));
        }
        let _permit = self.mutation_permit().await;
        if self.catalog.gym(&gym.id).is_some() {
            return Err(EngineError::AlreadyExists(EntityKind::Gym, gym.id));
        }
        self.persist_reference(Event::GymAdded(gym)).await
    }

    pub async fn add_service(&self, service: Service) -> Result<(), EngineError> {
        check_name(&service.name)?;
        let _permit = self.mutation_permit().await;
        if self.catalog.service(&service.id).is_some() {
            return Err(EngineError::AlreadyExists(EntityKind::Service, service.id));
        }
        self.persist_reference(Event::ServiceAdded(service)).await
    }

    pub async fn add_gym_service(&self, gs: GymService) -> Result<(), EngineError> {
        validate_duration(gs.duration)?;
        let _permit = self.mutation_permit().await;
        if self.catalog.gym_service(&gs.id).is_some() {
            return Err(EngineError::AlreadyExists(EntityKind::GymService, gs.id));
        }
        if self.catalog.gym(&gs.gym_id).is_none() {
            return Err(EngineError::NotFound(EntityKind::Gym, gs.gym_id));
        }
        if self.catalog.service(&gs.service_id).is_none() {
            return Err(EngineError::NotFound(EntityKind::Service, gs.service_id));
        }
        if let Some(existing) = self.catalog.gym_service_for(&gs.gym_id, &gs.service_id) {
            return Err(EngineError::Validation(format!(
                "gym already offers this service as {}",
                existing.id
            )));
        }
        self.persist_reference(Event::GymServiceAdded(gs)).await
    }

    pub async fn update_gym_service(
        &self,
        id: Ulid,
        changes: GymServiceChanges,
    ) -> Result<GymService, EngineError> {
        if let Some(duration) = changes.duration {
            validate_duration(duration)?;
        }
        let _permit = self.mutation_permit().await;
        let mut gs = self
            .catalog
            .gym_service(&id)
            .ok_or(EngineError::NotFound(EntityKind::GymService, id))?;
        gs.duration = changes.duration.unwrap_or(gs.duration);
        gs.price = changes.price.unwrap_or(gs.price);
        gs.is_active = changes.is_active.unwrap_or(gs.is_active);
        self.persist_reference(Event::GymServiceUpdated(gs.clone())).await?;
        Ok(gs)
    }

    // ── Trainers ─────────────────────────────────────────────

    pub async fn add_trainer(&self, trainer: Trainer) -> Result<(), EngineError> {
        check_name(&trainer.name)?;
        if trainer.bio.as_ref().is_some_and(|b| b.len() > MAX_BIO_LEN) {
            return Err(EngineError::LimitExceeded("bio too long"));
        }
        let _permit = self.mutation_permit().await;
        if self.catalog.trainer_count() >= MAX_TRAINERS {
            return Err(EngineError::LimitExceeded("too many trainers"));
        }
        if self.catalog.trainer(&trainer.id).is_some() {
            return Err(EngineError::AlreadyExists(EntityKind::Trainer, trainer.id));
        }
        if let Some(gym_id) = trainer.gym_id
            && self.catalog.gym(&gym_id).is_none()
        {
            return Err(EngineError::NotFound(EntityKind::Gym, gym_id));
        }
        self.persist_reference(Event::TrainerAdded(trainer)).await
    }

    pub async fn update_trainer(
        &self,
        id: Ulid,
        changes: TrainerChanges,
    ) -> Result<Trainer, EngineError> {
        let _permit = self.mutation_permit().await;
        let mut trainer = self
            .catalog
            .trainer(&id)
            .ok_or(EngineError::NotFound(EntityKind::Trainer, id))?;
        if let Some(Some(gym_id)) = changes.gym_id
            && self.catalog.gym(&gym_id).is_none()
        {
            return Err(EngineError::NotFound(EntityKind::Gym, gym_id));
        }
        trainer.is_active = changes.is_active.unwrap_or(trainer.is_active);
        if let Some(gym_id) = changes.gym_id {
            trainer.gym_id = gym_id;
        }
        // Held across the commit so a booking waiting on this trainer sees the update.
        let shared = self.schedules.get_or_create(id);
        let _guard = shared.write().await;
        self.persist_reference(Event::TrainerUpdated(trainer.clone())).await?;
        Ok(trainer)
    }

    pub async fn add_trainer_service(&self, trainer_id: Ulid, service_id: Ulid) -> Result<(), EngineError> {
        let _permit = self.mutation_permit().await;
        if self.catalog.trainer(&trainer_id).is_none() {
            return Err(EngineError::NotFound(EntityKind::Trainer, trainer_id));
        }
        if self.catalog.service(&service_id).is_none() {
            return Err(EngineError::NotFound(EntityKind::Service, service_id));
        }
        self.persist_reference(Event::TrainerServiceAdded { trainer_id, service_id })
            .await
    }

    /// Administrative deletion: the trainer, their windows and all their appointments.
    /// Returns the number of appointments dropped.
    pub async fn remove_trainer(&self, id: Ulid) -> Result<usize, EngineError> {
        let _permit = self.mutation_permit().await;
        if self.catalog.trainer(&id).is_none() {
            return Err(EngineError::NotFound(EntityKind::Trainer, id));
        }
        let shared = self.schedules.get_or_create(id);
        let mut guard = shared.write().await;

        let event = Event::TrainerRemoved { id };
        self.persist_reference(event).await?;
        let removed = self.schedules.remove_appointments(&mut guard, |_| true);
        drop(guard);
        self.schedules.remove(&id);

        self.announce_removed(&removed);
        self.notify.remove(&id);
        tracing::info!("removed trainer {id} with {} appointments", removed.len());
        Ok(removed.len())
    }

    // ── Availability windows ─────────────────────────────────

    pub async fn add_window(&self, window: AvailabilityWindow) -> Result<(), EngineError> {
        if window.day_of_week > 6 {
            return Err(EngineError::Validation(format!(
                "day_of_week {} outside 0..=6",
                window.day_of_week
            )));
        }
        check_span(&window.span)?;
        let _permit = self.mutation_permit().await;
        if self.catalog.trainer(&window.trainer_id).is_none() {
            return Err(EngineError::NotFound(EntityKind::Trainer, window.trainer_id));
        }
        if self.availability.owner_of(&window.id).is_some() {
            return Err(EngineError::AlreadyExists(EntityKind::AvailabilityWindow, window.id));
        }
        if self.availability.window_count(&window.trainer_id) >= MAX_WINDOWS_PER_TRAINER {
            return Err(EngineError::LimitExceeded("too many availability windows"));
        }
        self.persist_reference(Event::WindowAdded(window)).await
    }

    pub async fn remove_window(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _permit = self.mutation_permit().await;
        let trainer_id = self
            .availability
            .owner_of(&id)
            .ok_or(EngineError::NotFound(EntityKind::AvailabilityWindow, id))?;
        self.persist_reference(Event::WindowRemoved { id, trainer_id })
            .await?;
        Ok(trainer_id)
    }

    // ── Members ──────────────────────────────────────────────

    pub async fn add_member(&self, member: Member) -> Result<(), EngineError> {
        check_name(&member.name)?;
        let _permit = self.mutation_permit().await;
        if self.catalog.member_count() >= MAX_MEMBERS {
            return Err(EngineError::LimitExceeded("too many members"));
        }
        if self.catalog.member(&member.id).is_some() {
            return Err(EngineError::AlreadyExists(EntityKind::Member, member.id));
        }
        if let Some(gym_id) = member.gym_id
            && self.catalog.gym(&gym_id).is_none()
        {
            return Err(EngineError::NotFound(EntityKind::Gym, gym_id));
        }
        self.persist_reference(Event::MemberAdded(member)).await
    }

    /// Deleting a member cascades to their appointments. Returns how many were dropped.
    pub async fn remove_member(&self, id: Ulid) -> Result<usize, EngineError> {
        // A member can have appointments with any trainer, including one whose
        // schedule a concurrent booking is about to create.
        let _exclusive = self.exclusive_permit().await;
        if self.catalog.member(&id).is_none() {
            return Err(EngineError::NotFound(EntityKind::Member, id));
        }

        // Lock every schedule in id order before touching the log.
        let mut guards = Vec::new();
        for (_, shared) in self.schedules.all_sorted() {
            guards.push(shared.write_owned().await);
        }

        self.persist_reference(Event::MemberRemoved { id }).await?;
        let mut removed = Vec::new();
        for guard in guards.iter_mut() {
            removed.extend(self.schedules.remove_appointments(guard, |a| a.member_id == id));
        }
        drop(guards);

        self.announce_removed(&removed);
        tracing::info!("removed member {id} with {} appointments", removed.len());
        Ok(removed.len())
    }
}

