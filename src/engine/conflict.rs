use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_duration(duration: Minute) -> Result<(), super::EngineError> {
    if duration == 0 {
        return Err(super::EngineError::Validation("duration must be positive".into()));
    }
    if duration > MAX_DURATION_MINUTES {
        return Err(super::EngineError::LimitExceeded("duration longer than a day"));
    }
    Ok(())
}

/// Cancelled and Rejected appointments no longer hold their slot.
pub fn is_blocking(status: AppointmentStatus) -> bool {
    !matches!(status, AppointmentStatus::Cancelled | AppointmentStatus::Rejected)
}

/// First blocking appointment on `date` overlapping the half-open `span`.
/// Adjacent appointments (one ends exactly when the other starts) do not conflict.
pub fn find_conflict<'a>(
    schedule: &'a TrainerSchedule,
    date: &NaiveDate,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<&'a Appointment> {
    schedule
        .overlapping(date, span)
        .filter(|a| Some(a.id) != exclude)
        .find(|a| is_blocking(a.status) && a.span().overlaps(span))
}

pub fn has_conflict(
    schedule: &TrainerSchedule,
    date: &NaiveDate,
    span: &Span,
    exclude: Option<Ulid>,
) -> bool {
    find_conflict(schedule, date, span, exclude).is_some()
}
