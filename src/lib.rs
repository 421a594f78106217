#![warn(clippy::all, rust_2018_idioms)]

//! Checks multi-dose vaccination appointments against their schedules and corrects the ones
//! that were booked on the wrong day.
//!
//! A schedule's `dose_intervals` are day offsets of doses 2.. from the FIRST dose (rabies:
//! `[3, 7, 14, 28]`), not gaps between consecutive doses (`[3, 4, 7, 14]`). Both forms have
//! been seen in stored data; `fix_intervals` migrates the gap form.

mod apply;
mod appointment;
mod config;
mod error;
mod reconcile;
mod report;
mod schedule;
mod store;

pub use apply::{
    apply_plan, confirm_and_apply, fix_intervals, ApplyOptions, ApplySummary, AssumeYes, Confirm,
    PlannedUpdate, UpdatePlan, WriteFailure,
};
pub use appointment::{parse_calendar_date, AppointmentFilter, AppointmentRecord, PatientKey};
pub use config::Config;
pub use error::{ScheduleError, StoreError};
pub use reconcile::{
    group_records, reconcile, Classification, MissingDose, ReconciliationReport, SkippedGroup,
    Status,
};
pub use report::{format_plan, IncorrectReport, Summary};
pub use schedule::{expected_date, to_cumulative, DoseNumber, VaccineSchedule};
pub use store::{AppointmentStore, MemoryStore, RonFileStore, Snapshot};
