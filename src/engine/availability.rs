use chrono::{Datelike, NaiveDate};
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

// ── Availability Index ───────────────────────────────────────────

/// 0 = Sunday … 6 = Saturday, independent of locale.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// True iff the window is open and contains the whole of `[start, end)`.
pub fn covers(window: &AvailabilityWindow, span: &Span) -> bool {
    window.is_available && window.span.contains_span(span)
}

/// One trainer's recurring week. A day may hold several windows (split shifts);
/// a request is covered only when a single window contains all of it.
#[derive(Debug, Clone, Default)]
pub struct WeeklyAvailability {
    days: [Vec<AvailabilityWindow>; 7],
}

impl WeeklyAvailability {
    /// Insert maintaining start order within the day.
    pub fn insert(&mut self, window: AvailabilityWindow) {
        let day = &mut self.days[window.day_of_week as usize % 7];
        let pos = day.partition_point(|w| w.span.start <= window.span.start);
        day.insert(pos, window);
    }

    pub fn remove(&mut self, id: &Ulid) -> Option<AvailabilityWindow> {
        self.days.iter_mut().find_map(|day| {
            let pos = day.iter().position(|w| w.id == *id)?;
            Some(day.remove(pos))
        })
    }

    pub fn day(&self, day_of_week: u8) -> &[AvailabilityWindow] {
        self.days
            .get(day_of_week as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn covering(&self, day_of_week: u8, span: &Span) -> Option<&AvailabilityWindow> {
        self.day(day_of_week).iter().find(|w| covers(w, span))
    }

    pub fn len(&self) -> usize {
        self.days.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &AvailabilityWindow> {
        self.days.iter().flatten()
    }
}

/// Per-trainer weekly windows. Absence of a trainer or a day means "never available".
pub struct AvailabilityIndex {
    trainers: DashMap<Ulid, WeeklyAvailability>,
}

impl Default for AvailabilityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityIndex {
    pub fn new() -> Self {
        Self {
            trainers: DashMap::new(),
        }
    }

    /// First window of the day in start order.
    pub fn window_for(&self, trainer_id: &Ulid, day_of_week: u8) -> Option<AvailabilityWindow> {
        self.trainers
            .get(trainer_id)
            .and_then(|week| week.day(day_of_week).first().cloned())
    }

    pub fn windows(&self, trainer_id: &Ulid) -> Vec<AvailabilityWindow> {
        self.trainers
            .get(trainer_id)
            .map(|week| week.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn window_count(&self, trainer_id: &Ulid) -> usize {
        self.trainers.get(trainer_id).map_or(0, |week| week.len())
    }

    /// Does some window on `date`'s weekday contain `span`?
    pub fn covers_slot(&self, trainer_id: &Ulid, date: NaiveDate, span: &Span) -> bool {
        self.trainers
            .get(trainer_id)
            .is_some_and(|week| week.covering(day_of_week(date), span).is_some())
    }

    pub fn owner_of(&self, window_id: &Ulid) -> Option<Ulid> {
        self.trainers
            .iter()
            .find(|e| e.iter().any(|w| w.id == *window_id))
            .map(|e| *e.key())
    }

    pub fn apply(&self, event: &Event) {
        match event {
            Event::WindowAdded(window) => {
                self.trainers
                    .entry(window.trainer_id)
                    .or_default()
                    .insert(window.clone());
            }
            Event::WindowRemoved { id, trainer_id } => {
                if let Some(mut week) = self.trainers.get_mut(trainer_id) {
                    week.remove(id);
                }
            }
            Event::TrainerRemoved { id } => {
                self.trainers.remove(id);
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> Vec<Event> {
        let mut windows: Vec<AvailabilityWindow> = self
            .trainers
            .iter()
            .flat_map(|e| e.iter().cloned().collect::<Vec<_>>())
            .collect();
        windows.sort_by_key(|w| w.id);
        windows.into_iter().map(Event::WindowAdded).collect()
    }
}
