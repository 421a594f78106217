use crate::{
    apply::{ApplySummary, UpdatePlan},
    reconcile::{Classification, ReconciliationReport, Status},
    schedule::DoseNumber,
};
use anyhow::{Context, Result};
use jiff::civil::Date;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Write as _},
    fs,
    path::Path,
};

/// The JSON file handed from the detection run to the apply run.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct IncorrectReport {
    pub incorrect_appointments: Vec<Classification>,
}

impl IncorrectReport {
    pub fn from_report(report: &ReconciliationReport) -> Self {
        Self {
            incorrect_appointments: report.incorrect().cloned().collect(),
        }
    }

    pub fn plan(&self) -> UpdatePlan {
        UpdatePlan::from_classifications(self.incorrect_appointments.iter())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data).with_context(|| format!("writing report {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data =
            fs::read_to_string(path).with_context(|| format!("reading report {}", path.display()))?;
        let report: Self = serde_json::from_str(&data)
            .with_context(|| format!("parsing report {}", path.display()))?;
        // Entries hand-edited to "correct" during review are dropped by `plan`.
        let kept = report
            .incorrect_appointments
            .iter()
            .filter(|c| c.status == Status::Incorrect)
            .count();
        if kept != report.incorrect_appointments.len() {
            info!(
                "{} entries in {} are no longer marked incorrect",
                report.incorrect_appointments.len() - kept,
                path.display()
            );
        }
        Ok(report)
    }
}

/// Operator-facing summary of a detection run and, if one happened, the write phase.
pub struct Summary<'a> {
    pub report: Option<&'a ReconciliationReport>,
    pub applied: Option<&'a ApplySummary>,
    pub show_missing: bool,
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(report) = self.report {
            writeln!(f, "Groups processed:       {}", report.groups_processed)?;
            writeln!(f, "Groups skipped:         {}", report.skipped_groups.len())?;
            writeln!(f, "Appointments correct:   {}", report.correct().count())?;
            writeln!(f, "Appointments incorrect: {}", report.incorrect().count())?;
            writeln!(f, "Doses not yet booked:   {}", report.missing_doses.len())?;

            for err in &report.malformed_schedules {
                writeln!(f, "  schedule error: {err}")?;
            }
            for group in &report.skipped_groups {
                writeln!(
                    f,
                    "  skipped {} {} ({}): {}",
                    group.patient,
                    group.vaccine_type,
                    group.appointment_ids.join(", "),
                    group.reason
                )?;
            }
            for c in report.incorrect() {
                writeln!(
                    f,
                    "  incorrect {} {} {} {}: {} should be {}",
                    c.appointment_id,
                    c.patient_name,
                    c.vaccine_type,
                    c.dose_number,
                    c.actual_date,
                    c.expected_date
                )?;
            }
            if self.show_missing {
                for m in &report.missing_doses {
                    writeln!(
                        f,
                        "  due {} {} {} on {}",
                        m.patient_name, m.vaccine_type, m.dose_number, m.expected_date
                    )?;
                }
            }
        }

        if let Some(applied) = self.applied {
            writeln!(f, "Writes attempted:       {}", applied.attempted)?;
            writeln!(f, "Writes succeeded:       {}", applied.succeeded)?;
            writeln!(f, "Writes failed:          {}", applied.failures.len())?;
            for failure in &applied.failures {
                let u = &failure.update;
                writeln!(
                    f,
                    "  FAILED {} {} {} {}: {} -> {}: {}",
                    u.id, u.patient_name, u.vaccine_type, u.dose_number, u.old_date, u.new_date, failure.cause
                )?;
            }
        }
        Ok(())
    }
}

/// Render a dose plan as one line per dose.
pub fn format_plan(vaccine: &str, plan: &[(DoseNumber, Date)]) -> String {
    let mut out = String::new();
    let first = plan.first().map(|(_, d)| *d);
    for (dose, day) in plan {
        let offset = first.map_or(0, |f| (*day - f).get_days());
        let _ = writeln!(out, "{vaccine} {dose}: {day} (day {offset})");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        apply::{apply_plan, ApplyOptions},
        appointment::{AppointmentRecord, PatientKey},
        reconcile::reconcile,
        schedule::VaccineSchedule,
        store::MemoryStore,
    };
    use jiff::civil::date;
    use std::time::Duration;

    fn sample() -> Result<ReconciliationReport> {
        let who = PatientKey::IdNumber("p1".into());
        let records = vec![
            AppointmentRecord::new("a1", who.clone(), "rabies", date(2024, 1, 1)).with_patient_name("Somchai"),
            AppointmentRecord::new("a2", who.clone(), "rabies", date(2024, 1, 5)).with_patient_name("Somchai"),
            AppointmentRecord::new("m1", who, "measles", date(2024, 1, 5)),
        ];
        Ok(reconcile(
            &[VaccineSchedule::new("rabies", 5, vec![3, 7, 14, 28])],
            &records,
        )?)
    }

    #[test]
    fn test_json_shape() -> Result<()> {
        let artifact = IncorrectReport::from_report(&sample()?);
        let value = serde_json::to_value(&artifact)?;
        assert_eq!(
            serde_json::json!({
                "incorrect_appointments": [{
                    "appointment_id": "a2",
                    "patient_name": "Somchai",
                    "vaccine_type": "rabies",
                    "dose_number": 2,
                    "actual_date": "2024-01-05",
                    "expected_date": "2024-01-04",
                    "status": "incorrect"
                }]
            }),
            value
        );
        Ok(())
    }

    #[test]
    fn test_save_load_and_plan() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("incorrect.json");
        IncorrectReport::from_report(&sample()?).save(&path)?;

        let loaded = IncorrectReport::load(&path)?;
        let plan = loaded.plan();
        assert_eq!(1, plan.len());
        assert_eq!("a2", plan.updates()[0].id);
        assert_eq!(date(2024, 1, 4), plan.updates()[0].new_date);
        Ok(())
    }

    #[test]
    fn test_reviewed_entries_are_not_applied() -> Result<()> {
        let mut artifact = IncorrectReport::from_report(&sample()?);
        artifact.incorrect_appointments[0].status = Status::Correct;
        assert!(artifact.plan().is_empty());
        Ok(())
    }

    #[test]
    fn test_summary_lists_failures() -> Result<()> {
        let report = sample()?;
        let mut store = MemoryStore::new(vec![], vec![]);
        let applied = apply_plan(
            &mut store,
            &IncorrectReport::from_report(&report).plan(),
            &ApplyOptions {
                max_attempts: 1,
                retry_delay: Duration::ZERO,
            },
        );
        let text = Summary {
            report: Some(&report),
            applied: Some(&applied),
            show_missing: true,
        }
        .to_string();
        assert!(text.contains("Groups processed:       1"));
        assert!(text.contains("Groups skipped:         1"));
        assert!(text.contains("no active schedule for vaccine measles"));
        assert!(text.contains("Writes failed:          1"));
        assert!(text.contains("FAILED a2 Somchai rabies Dose#2: 2024-01-05 -> 2024-01-04"));
        assert!(text.contains("due Somchai rabies Dose#5 on 2024-01-29"));
        Ok(())
    }

    #[test]
    fn test_format_plan() -> Result<()> {
        let plan = VaccineSchedule::new("rabies", 3, vec![3, 7]).dose_plan(date(2024, 1, 1))?;
        assert_eq!(
            "rabies Dose#1: 2024-01-01 (day 0)\nrabies Dose#2: 2024-01-04 (day 3)\nrabies Dose#3: 2024-01-08 (day 7)\n",
            format_plan("rabies", &plan)
        );
        Ok(())
    }
}
