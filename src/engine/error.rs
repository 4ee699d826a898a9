use std::fmt;

use ulid::Ulid;

use crate::model::AppointmentStatus;

/// Why a booking was refused. The set is fixed; callers render a message per reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    InvalidMember,
    ServiceNotFound,
    ServiceInactive,
    TrainerIneligible,
    OutsideAvailability,
    SlotConflict,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::InvalidMember => "InvalidMember",
            RejectionReason::ServiceNotFound => "ServiceNotFound",
            RejectionReason::ServiceInactive => "ServiceInactive",
            RejectionReason::TrainerIneligible => "TrainerIneligible",
            RejectionReason::OutsideAvailability => "OutsideAvailability",
            RejectionReason::SlotConflict => "SlotConflict",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Gym,
    Service,
    GymService,
    Trainer,
    AvailabilityWindow,
    Member,
    Appointment,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Gym => "gym",
            EntityKind::Service => "service",
            EntityKind::GymService => "gym service",
            EntityKind::Trainer => "trainer",
            EntityKind::AvailabilityWindow => "availability window",
            EntityKind::Member => "member",
            EntityKind::Appointment => "appointment",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(EntityKind, Ulid),
    AlreadyExists(EntityKind, Ulid),
    /// Malformed input: bad time, non-positive duration, unknown status, …
    Validation(String),
    Rejected(RejectionReason),
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    Forbidden(&'static str),
    LimitExceeded(&'static str),
    /// Store failure. Never means "slot unavailable".
    WalError(String),
}

impl EngineError {
    /// HTTP-equivalent class of the error.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::NotFound(..) => 404,
            EngineError::Forbidden(_) => 403,
            EngineError::AlreadyExists(..) => 409,
            EngineError::Validation(_)
            | EngineError::Rejected(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::LimitExceeded(_) => 422,
            EngineError::WalError(_) => 500,
        }
    }

    pub fn rejection(&self) -> Option<RejectionReason> {
        match self {
            EngineError::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl From<RejectionReason> for EngineError {
    fn from(reason: RejectionReason) -> Self {
        EngineError::Rejected(reason)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotFound(kind, id) => write!(f, "{kind} not found: {id}"),
            EngineError::AlreadyExists(kind, id) => write!(f, "{kind} already exists: {id}"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Rejected(reason) => write!(f, "booking rejected: {reason}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move appointment from {from} to {to}")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
