use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Read-only reference data for the scheduling core. Written only through the
/// administrative feed (`Engine::add_*` / `update_*` / `remove_*`).
pub struct Catalog {
    gyms: DashMap<Ulid, Gym>,
    services: DashMap<Ulid, Service>,
    gym_services: DashMap<Ulid, GymService>,
    trainers: DashMap<Ulid, Trainer>,
    members: DashMap<Ulid, Member>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            gyms: DashMap::new(),
            services: DashMap::new(),
            gym_services: DashMap::new(),
            trainers: DashMap::new(),
            members: DashMap::new(),
        }
    }

    pub fn gym(&self, id: &Ulid) -> Option<Gym> {
        self.gyms.get(id).map(|e| e.value().clone())
    }

    pub fn active_gym(&self, id: &Ulid) -> Option<Gym> {
        self.gym(id).filter(|g| g.is_active)
    }

    pub fn service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn gym_service(&self, id: &Ulid) -> Option<GymService> {
        self.gym_services.get(id).map(|e| e.value().clone())
    }

    /// The gym service pairing `gym_id` with `service_id`, if any.
    pub fn gym_service_for(&self, gym_id: &Ulid, service_id: &Ulid) -> Option<GymService> {
        self.gym_services
            .iter()
            .find(|e| e.gym_id == *gym_id && e.service_id == *service_id)
            .map(|e| e.value().clone())
    }

    pub fn trainer(&self, id: &Ulid) -> Option<Trainer> {
        self.trainers.get(id).map(|e| e.value().clone())
    }

    pub fn member(&self, id: &Ulid) -> Option<Member> {
        self.members.get(id).map(|e| e.value().clone())
    }

    pub fn trainer_offers_service(&self, trainer_id: &Ulid, service_id: &Ulid) -> bool {
        self.trainers
            .get(trainer_id)
            .is_some_and(|t| t.services.contains(service_id))
    }

    /// Trainers assigned to `gym_id`, in catalog (id) order.
    pub fn trainers_at(&self, gym_id: &Ulid) -> Vec<Trainer> {
        let mut found: Vec<Trainer> = self
            .trainers
            .iter()
            .filter(|e| e.gym_id == Some(*gym_id))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|t| t.id);
        found
    }

    pub fn trainer_count(&self) -> usize {
        self.trainers.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Apply a reference-data event. Appointment events are ignored here.
    pub fn apply(&self, event: &Event) {
        match event {
            Event::GymAdded(gym) => {
                self.gyms.insert(gym.id, gym.clone());
            }
            Event::ServiceAdded(service) => {
                self.services.insert(service.id, service.clone());
            }
            Event::GymServiceAdded(gs) | Event::GymServiceUpdated(gs) => {
                self.gym_services.insert(gs.id, gs.clone());
            }
            Event::TrainerAdded(trainer) | Event::TrainerUpdated(trainer) => {
                self.trainers.insert(trainer.id, trainer.clone());
            }
            Event::TrainerRemoved { id } => {
                self.trainers.remove(id);
            }
            Event::TrainerServiceAdded { trainer_id, service_id } => {
                if let Some(mut trainer) = self.trainers.get_mut(trainer_id) {
                    trainer.services.insert(*service_id);
                }
            }
            Event::MemberAdded(member) => {
                self.members.insert(member.id, member.clone());
            }
            Event::MemberRemoved { id } => {
                self.members.remove(id);
            }
            Event::WindowAdded(_)
            | Event::WindowRemoved { .. }
            | Event::AppointmentBooked(_)
            | Event::AppointmentStatusChanged { .. } => {}
        }
    }

    /// Events recreating the catalog, parents before children.
    pub fn snapshot(&self) -> Vec<Event> {
        fn sorted<T: Clone>(map: &DashMap<Ulid, T>) -> Vec<T> {
            let mut items: Vec<(Ulid, T)> =
                map.iter().map(|e| (*e.key(), e.value().clone())).collect();
            items.sort_by_key(|(id, _)| *id);
            items.into_iter().map(|(_, v)| v).collect()
        }

        let mut events = Vec::new();
        events.extend(sorted(&self.gyms).into_iter().map(Event::GymAdded));
        events.extend(sorted(&self.services).into_iter().map(Event::ServiceAdded));
        events.extend(sorted(&self.gym_services).into_iter().map(Event::GymServiceAdded));
        events.extend(sorted(&self.trainers).into_iter().map(Event::TrainerAdded));
        events.extend(sorted(&self.members).into_iter().map(Event::MemberAdded));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn trainer(gym_id: Option<Ulid>) -> Trainer {
        Trainer {
            id: Ulid::new(),
            name: "J".into(),
            gym_id,
            is_active: true,
            experience: 3,
            bio: None,
            services: BTreeSet::new(),
        }
    }

    #[test]
    fn inactive_gym_hidden_from_active_lookup() {
        let catalog = Catalog::new();
        let gym = Gym {
            id: Ulid::new(),
            name: "G".into(),
            is_active: false,
            hours: Span::new(360, 1320),
            working_days: None,
        };
        catalog.apply(&Event::GymAdded(gym.clone()));
        assert_eq!(catalog.gym(&gym.id), Some(gym.clone()));
        assert_eq!(catalog.active_gym(&gym.id), None);
    }

    #[test]
    fn trainer_service_membership() {
        let catalog = Catalog::new();
        let t = trainer(None);
        let service_id = Ulid::new();
        catalog.apply(&Event::TrainerAdded(t.clone()));
        assert!(!catalog.trainer_offers_service(&t.id, &service_id));

        catalog.apply(&Event::TrainerServiceAdded { trainer_id: t.id, service_id });
        assert!(catalog.trainer_offers_service(&t.id, &service_id));
        assert!(!catalog.trainer_offers_service(&Ulid::new(), &service_id));
    }

    #[test]
    fn trainers_at_skips_unassigned_and_sorts() {
        let catalog = Catalog::new();
        let gym_id = Ulid::new();
        let mut assigned: Vec<Trainer> = (0..3).map(|_| trainer(Some(gym_id))).collect();
        for t in assigned.iter().rev() {
            catalog.apply(&Event::TrainerAdded(t.clone()));
        }
        catalog.apply(&Event::TrainerAdded(trainer(None)));
        catalog.apply(&Event::TrainerAdded(trainer(Some(Ulid::new()))));

        assigned.sort_by_key(|t| t.id);
        assert_eq!(catalog.trainers_at(&gym_id), assigned);
    }

    #[test]
    fn snapshot_replays_to_same_catalog() {
        let catalog = Catalog::new();
        let t = trainer(None);
        catalog.apply(&Event::TrainerAdded(t.clone()));
        catalog.apply(&Event::TrainerServiceAdded { trainer_id: t.id, service_id: Ulid::nil() });
        catalog.apply(&Event::MemberAdded(Member { id: Ulid::new(), name: "M".into(), gym_id: None }));

        let copy = Catalog::new();
        for e in catalog.snapshot() {
            copy.apply(&e);
        }
        assert_eq!(copy.trainer(&t.id), catalog.trainer(&t.id));
        assert_eq!(copy.member_count(), 1);
    }
}
