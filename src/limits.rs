use crate::model::{Minute, MINUTES_PER_DAY};

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_BIO_LEN: usize = 4096;
pub const MAX_NOTES_LEN: usize = 1024;

/// A single appointment or window can never exceed one day.
pub const MAX_DURATION_MINUTES: Minute = MINUTES_PER_DAY;

pub const MAX_WINDOWS_PER_TRAINER: usize = 64;
pub const MAX_APPOINTMENTS_PER_TRAINER: usize = 100_000;
pub const MAX_TRAINERS: usize = 10_000;
pub const MAX_MEMBERS: usize = 1_000_000;
