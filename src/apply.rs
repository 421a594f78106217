use crate::{
    error::StoreError,
    reconcile::{Classification, Status},
    schedule::{to_cumulative, DoseNumber, VaccineSchedule},
    store::AppointmentStore,
};
use anyhow::{anyhow, bail, Result};
use backon::{BlockingRetryable, ConstantBuilder};
use jiff::civil::Date;
use log::{error, info, warn};
use std::time::Duration;

/// One corrective write: move appointment `id` from `old_date` to `new_date`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlannedUpdate {
    pub id: String,
    pub patient_name: String,
    pub vaccine_type: String,
    pub dose_number: DoseNumber,
    pub old_date: Date,
    pub new_date: Date,
    pub audit_note: String,
}

impl PlannedUpdate {
    fn from_classification(c: &Classification) -> Self {
        Self {
            id: c.appointment_id.clone(),
            patient_name: c.patient_name.clone(),
            vaccine_type: c.vaccine_type.clone(),
            dose_number: c.dose_number,
            old_date: c.actual_date,
            new_date: c.expected_date,
            audit_note: format!("corrected from {}", c.actual_date),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UpdatePlan {
    updates: Vec<PlannedUpdate>,
}

impl UpdatePlan {
    /// Build the plan from classifications, keeping only the incorrect ones.
    pub fn from_classifications<'a>(items: impl Iterator<Item = &'a Classification>) -> Self {
        Self {
            updates: items
                .filter(|c| c.status == Status::Incorrect)
                .map(PlannedUpdate::from_classification)
                .collect(),
        }
    }

    pub fn updates(&self) -> &[PlannedUpdate] {
        &self.updates
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }
}

/// Yes/no gate in front of the write phase.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// Approves everything; what `--yes` means.
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

impl<F> Confirm for F
where
    F: FnMut(&str) -> bool,
{
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        Ok(self(prompt))
    }
}

#[derive(Clone, Debug)]
pub struct ApplyOptions {
    pub max_attempts: usize,
    pub retry_delay: Duration,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug)]
pub struct WriteFailure {
    pub update: PlannedUpdate,
    pub cause: StoreError,
}

#[derive(Debug, Default)]
pub struct ApplySummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<WriteFailure>,
}

/// Write every update in the plan, one record at a time.
///
/// A failed write is retried while the store reports it as transient, then recorded and
/// skipped; it never stops the remaining updates.
pub fn apply_plan<S: AppointmentStore + ?Sized>(
    store: &mut S,
    plan: &UpdatePlan,
    options: &ApplyOptions,
) -> ApplySummary {
    let mut summary = ApplySummary::default();
    for update in plan.updates() {
        summary.attempted += 1;
        let result = (|| {
            store.write_appointment_date(&update.id, update.old_date, update.new_date, &update.audit_note)
        })
            .retry(
                ConstantBuilder::default()
                    .with_delay(options.retry_delay)
                    .with_max_times(options.max_attempts.saturating_sub(1)),
            )
            .sleep(std::thread::sleep)
            .when(StoreError::should_retry)
            .notify(|err: &StoreError, dur: Duration| {
                warn!(
                    "write of {} failed, retrying after {:.2}s: {err}",
                    update.id,
                    dur.as_secs_f64()
                )
            })
            .call();
        match result {
            Ok(()) => {
                info!(
                    "{} {} {}: {} -> {}",
                    update.id, update.vaccine_type, update.dose_number, update.old_date, update.new_date
                );
                summary.succeeded += 1;
            }
            Err(cause) => {
                error!("could not update {}: {cause}", update.id);
                summary.failures.push(WriteFailure {
                    update: update.clone(),
                    cause,
                });
            }
        }
    }
    summary
}

/// Ask for confirmation, then apply. `None` means the operator declined and nothing was written.
pub fn confirm_and_apply<S: AppointmentStore + ?Sized>(
    store: &mut S,
    plan: &UpdatePlan,
    confirm: &mut dyn Confirm,
    options: &ApplyOptions,
) -> Result<Option<ApplySummary>> {
    if plan.is_empty() {
        info!("nothing to correct");
        return Ok(Some(ApplySummary::default()));
    }
    let prompt = format!("Apply {} appointment corrections?", plan.len());
    if !confirm.confirm(&prompt)? {
        info!("aborted by operator; no appointments were changed");
        return Ok(None);
    }
    Ok(Some(apply_plan(store, plan, options)))
}

/// Rewrite a schedule whose intervals were entered as gaps between doses into offsets from
/// the first dose, e.g. rabies `[3, 4, 7, 14]` becomes `[3, 7, 14, 28]`.
///
/// `gaps` is the list the operator believes is stored. Nothing is written unless the stored
/// list is exactly that, so an already migrated schedule is never summed a second time.
/// Returns the new intervals, or `None` when the operator declined or nothing would change.
pub fn fix_intervals<S: AppointmentStore + ?Sized>(
    store: &mut S,
    vaccine_type: &str,
    gaps: &[i64],
    confirm: &mut dyn Confirm,
) -> Result<Option<Vec<i64>>> {
    let schedule = store
        .read_schedules()?
        .into_iter()
        .find(|s| s.vaccine_type() == vaccine_type)
        .ok_or_else(|| anyhow!("no schedule for {vaccine_type}"))?;
    if schedule.dose_intervals() != gaps {
        bail!(
            "{vaccine_type} intervals are {:?}, not {gaps:?}; leaving them alone",
            schedule.dose_intervals()
        );
    }
    let cumulative = to_cumulative(gaps);
    if cumulative == schedule.dose_intervals() {
        info!("{vaccine_type} intervals are already cumulative");
        return Ok(None);
    }
    let migrated = VaccineSchedule::new(vaccine_type, schedule.total_doses(), cumulative.clone());
    migrated.validate()?;

    let prompt = format!(
        "Change {vaccine_type} intervals from {:?} to {:?}?",
        schedule.dose_intervals(),
        cumulative
    );
    if !confirm.confirm(&prompt)? {
        info!("aborted by operator; {vaccine_type} schedule unchanged");
        return Ok(None);
    }
    store.write_schedule_intervals(vaccine_type, cumulative.clone())?;
    info!("{vaccine_type} intervals now {cumulative:?}");
    Ok(Some(cumulative))
}
