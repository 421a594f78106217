use jiff::civil::Date;
use thiserror::Error;

/// Failures raised while computing dose dates or classifying a group of appointments.
///
/// Everything but `InvalidIndex` and `DateOverflow` is per-group: the reconciler records it
/// and moves on. `InvalidIndex` means the grouping logic handed the calculator a dose that
/// the schedule does not have, and aborts the run.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ScheduleError {
    #[error("malformed schedule for {vaccine}: {reason}")]
    MalformedSchedule { vaccine: String, reason: String },

    #[error("no active schedule for vaccine {0}")]
    MissingSchedule(String),

    #[error("{count} active schedules for vaccine {vaccine}")]
    DuplicateSchedule { vaccine: String, count: usize },

    #[error("dose index {index} out of range for a {total_doses}-dose schedule")]
    InvalidIndex { index: usize, total_doses: u32 },

    #[error("{count} appointments recorded for a {total_doses}-dose schedule")]
    TooManyAppointments { count: usize, total_doses: u32 },

    #[error("date arithmetic overflowed: {0}")]
    DateOverflow(String),
}

impl ScheduleError {
    pub(crate) fn malformed(vaccine: &str, reason: impl Into<String>) -> Self {
        Self::MalformedSchedule {
            vaccine: vaccine.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Failures reported by an appointment store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("no appointment with id {0}")]
    NotFound(String),

    #[error("appointment {id} is now on {found}, expected {expected}")]
    Stale { id: String, expected: Date, found: Date },

    #[error("no schedule for vaccine {0}")]
    UnknownVaccine(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

impl StoreError {
    /// Only an unreachable store is worth asking again; everything else fails the same way twice.
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
