use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for created/updated stamps.
pub type Ms = i64;

/// Minutes since midnight. `1440` is a valid *end* (midnight of the next day).
pub type Minute = u32;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

/// Half-open time-of-day interval `[start, end)` in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Span starting at `time` and lasting `duration` minutes. May run past midnight,
    /// in which case no availability window can cover it.
    pub fn at(time: NaiveTime, duration: Minute) -> Self {
        let start = minute_of_day(time);
        Self::new(start, start + duration)
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", format_minute(self.start), format_minute(self.end))
    }
}

pub fn minute_of_day(time: NaiveTime) -> Minute {
    time.hour() * 60 + time.minute()
}

/// `HH:MM`, with `24:00` for end-of-day.
pub fn format_minute(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

// ── Reference data ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gym {
    pub id: Ulid,
    pub name: String,
    pub is_active: bool,
    /// Opening to closing time.
    pub hours: Span,
    /// Days of week the gym operates (0 = Sunday). `None` means every day.
    pub working_days: Option<BTreeSet<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub is_active: bool,
}

/// A service as offered by one gym, with that gym's duration and price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GymService {
    pub id: Ulid,
    pub gym_id: Ulid,
    pub service_id: Ulid,
    pub duration: Minute,
    /// Smallest currency unit.
    pub price: u64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trainer {
    pub id: Ulid,
    pub name: String,
    /// Unassigned trainers are valid but never bookable.
    pub gym_id: Option<Ulid>,
    pub is_active: bool,
    pub experience: u32,
    pub bio: Option<String>,
    /// Services this trainer can deliver.
    pub services: BTreeSet<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub trainer_id: Ulid,
    /// 0 = Sunday … 6 = Saturday.
    pub day_of_week: u8,
    pub span: Span,
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: Ulid,
    pub name: String,
    pub gym_id: Option<Ulid>,
}

// ── Appointments ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Approved,
        AppointmentStatus::Rejected,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "Pending",
            AppointmentStatus::Approved => "Approved",
            AppointmentStatus::Rejected => "Rejected",
            AppointmentStatus::Completed => "Completed",
            AppointmentStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown appointment status: {:?}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for AppointmentStatus {
    type Err = UnknownStatus;

    /// Case-insensitive; anything outside the five statuses is an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub member_id: Ulid,
    pub trainer_id: Ulid,
    pub gym_service_id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// Copied from the gym service at booking time.
    pub duration: Minute,
    /// Copied from the gym service at booking time.
    pub price: u64,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Option<Ms>,
}

impl Appointment {
    pub fn span(&self) -> Span {
        Span::at(self.time, self.duration)
    }
}

/// All appointments of one trainer, grouped by date and sorted by start time.
#[derive(Debug, Clone)]
pub struct TrainerSchedule {
    pub trainer_id: Ulid,
    days: std::collections::BTreeMap<NaiveDate, Vec<Appointment>>,
}

impl TrainerSchedule {
    pub fn new(trainer_id: Ulid) -> Self {
        Self {
            trainer_id,
            days: Default::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.days.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Insert maintaining start-time order within the day.
    pub fn insert(&mut self, appointment: Appointment) {
        let day = self.days.entry(appointment.date).or_default();
        let start = appointment.span().start;
        let pos = day.partition_point(|a| a.span().start <= start);
        day.insert(pos, appointment);
    }

    pub fn get(&self, id: &Ulid) -> Option<&Appointment> {
        self.iter().find(|a| a.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Appointment> {
        self.days.values_mut().flatten().find(|a| a.id == *id)
    }

    pub fn on_date(&self, date: &NaiveDate) -> &[Appointment] {
        self.days.get(date).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Appointments on `date` whose span overlaps `query`, regardless of status.
    /// Skips everything starting at or after `query.end`.
    pub fn overlapping(&self, date: &NaiveDate, query: &Span) -> impl Iterator<Item = &Appointment> {
        let day = self.on_date(date);
        let right_bound = day.partition_point(|a| a.span().start < query.end);
        day[..right_bound]
            .iter()
            .filter(move |a| a.span().end > query.start)
    }

    /// Remove every appointment matching `pred`, returning them.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&Appointment) -> bool) -> Vec<Appointment> {
        let mut removed = Vec::new();
        for day in self.days.values_mut() {
            let mut i = 0;
            while i < day.len() {
                if pred(&day[i]) {
                    removed.push(day.remove(i));
                } else {
                    i += 1;
                }
            }
        }
        self.days.retain(|_, day| !day.is_empty());
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Appointment> {
        self.days.values().flatten()
    }
}

// ── Actors ──────────────────────────────────────────────────────

/// Who is making a request, as established by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    Admin,
    Member(Ulid),
    Trainer(Ulid),
}

impl Actor {
    pub fn member_id(&self) -> Option<Ulid> {
        match self {
            Actor::Member(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Admin => f.write_str("admin"),
            Actor::Member(id) => write!(f, "member:{id}"),
            Actor::Trainer(id) => write!(f, "trainer:{id}"),
        }
    }
}

// ── WAL record format ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    GymAdded(Gym),
    ServiceAdded(Service),
    GymServiceAdded(GymService),
    GymServiceUpdated(GymService),
    TrainerAdded(Trainer),
    TrainerUpdated(Trainer),
    /// Also drops the trainer's windows and appointments.
    TrainerRemoved {
        id: Ulid,
    },
    TrainerServiceAdded {
        trainer_id: Ulid,
        service_id: Ulid,
    },
    WindowAdded(AvailabilityWindow),
    WindowRemoved {
        id: Ulid,
        trainer_id: Ulid,
    },
    MemberAdded(Member),
    /// Cascades to the member's appointments.
    MemberRemoved {
        id: Ulid,
    },
    AppointmentBooked(Appointment),
    AppointmentStatusChanged {
        id: Ulid,
        trainer_id: Ulid,
        status: AppointmentStatus,
        updated_at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainerInfo {
    pub id: Ulid,
    pub name: String,
    pub experience: u32,
    pub bio: Option<String>,
}

impl From<&Trainer> for TrainerInfo {
    fn from(t: &Trainer) -> Self {
        Self {
            id: t.id,
            name: t.name.clone(),
            experience: t.experience,
            bio: t.bio.clone(),
        }
    }
}
