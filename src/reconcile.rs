use crate::{
    appointment::{AppointmentRecord, PatientKey},
    error::ScheduleError,
    schedule::{DoseNumber, VaccineSchedule},
};
use itertools::Itertools;
use jiff::civil::Date;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Correct,
    Incorrect,
}

/// Outcome of checking one stored appointment against its recomputed due date.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Classification {
    pub appointment_id: String,
    pub patient_name: String,
    pub vaccine_type: String,
    pub dose_number: DoseNumber,
    pub actual_date: Date,
    pub expected_date: Date,
    pub status: Status,
}

/// A dose the schedule calls for that has no appointment yet.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MissingDose {
    pub patient: PatientKey,
    pub patient_name: String,
    pub vaccine_type: String,
    pub dose_number: DoseNumber,
    pub expected_date: Date,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SkippedGroup {
    pub patient: PatientKey,
    pub vaccine_type: String,
    pub appointment_ids: Vec<String>,
    pub reason: ScheduleError,
}

#[derive(Clone, Debug, Default)]
pub struct ReconciliationReport {
    pub groups_processed: usize,
    pub classifications: Vec<Classification>,
    pub missing_doses: Vec<MissingDose>,
    pub skipped_groups: Vec<SkippedGroup>,
    pub malformed_schedules: Vec<ScheduleError>,
}

impl ReconciliationReport {
    pub fn correct(&self) -> impl Iterator<Item = &Classification> {
        self.classifications
            .iter()
            .filter(|c| c.status == Status::Correct)
    }

    pub fn incorrect(&self) -> impl Iterator<Item = &Classification> {
        self.classifications
            .iter()
            .filter(|c| c.status == Status::Incorrect)
    }
}

type GroupKey = (PatientKey, String);

/// Bucket records by (patient, vaccine). Every record lands in exactly one group.
pub fn group_records(records: &[AppointmentRecord]) -> BTreeMap<GroupKey, Vec<&AppointmentRecord>> {
    let mut groups: BTreeMap<GroupKey, Vec<&AppointmentRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.patient().clone(), record.vaccine_type().to_owned()))
            .or_default()
            .push(record);
    }
    groups
}

/// Check every appointment against the date its schedule says it should fall on.
///
/// Within a (patient, vaccine) group the earliest appointment is taken as dose 1, and the
/// rest are numbered by date (ties broken by id). Stored dose numbers are ignored. Groups
/// whose vaccine has no usable schedule are skipped and listed in the report; they never
/// stop the other groups from being checked. Only an out-of-range dose index, which the
/// grouping rules out, aborts the run.
pub fn reconcile(
    schedules: &[VaccineSchedule],
    records: &[AppointmentRecord],
) -> Result<ReconciliationReport, ScheduleError> {
    let mut report = ReconciliationReport::default();

    let mut active: BTreeMap<&str, Vec<&VaccineSchedule>> = BTreeMap::new();
    for schedule in schedules.iter().filter(|s| s.active()) {
        active.entry(schedule.vaccine_type()).or_default().push(schedule);
    }
    let mut usable: HashMap<&str, Result<&VaccineSchedule, ScheduleError>> = HashMap::new();
    for (vaccine_type, rows) in active {
        let checked = match rows.as_slice() {
            [schedule] => schedule.validate().map(|()| *schedule),
            _ => Err(ScheduleError::DuplicateSchedule {
                vaccine: vaccine_type.to_owned(),
                count: rows.len(),
            }),
        };
        if let Err(err) = &checked {
            warn!("{err}; its appointments will be skipped");
            report.malformed_schedules.push(err.clone());
        }
        usable.insert(vaccine_type, checked);
    }

    for ((patient, vaccine_type), group) in group_records(records) {
        let skip = |reason: ScheduleError| SkippedGroup {
            patient: patient.clone(),
            vaccine_type: vaccine_type.clone(),
            appointment_ids: group.iter().map(|r| r.id().to_owned()).collect(),
            reason,
        };

        let schedule = match usable.get(vaccine_type.as_str()) {
            Some(Ok(schedule)) => *schedule,
            Some(Err(err)) => {
                report.skipped_groups.push(skip(err.clone()));
                continue;
            }
            None => {
                debug!("{patient}: no active schedule for {vaccine_type}");
                report
                    .skipped_groups
                    .push(skip(ScheduleError::MissingSchedule(vaccine_type.clone())));
                continue;
            }
        };
        if group.len() > schedule.total_doses() as usize {
            warn!(
                "{patient}: {} {vaccine_type} appointments exceed the {}-dose schedule",
                group.len(),
                schedule.total_doses()
            );
            report.skipped_groups.push(skip(ScheduleError::TooManyAppointments {
                count: group.len(),
                total_doses: schedule.total_doses(),
            }));
            continue;
        }

        let (classifications, missing) = classify_group(schedule, &patient, &group)?;
        report.classifications.extend(classifications);
        report.missing_doses.extend(missing);
        report.groups_processed += 1;
    }

    info!(
        "reconciled {} groups: {} correct, {} incorrect, {} skipped",
        report.groups_processed,
        report.correct().count(),
        report.incorrect().count(),
        report.skipped_groups.len()
    );
    Ok(report)
}

fn classify_group(
    schedule: &VaccineSchedule,
    patient: &PatientKey,
    group: &[&AppointmentRecord],
) -> Result<(Vec<Classification>, Vec<MissingDose>), ScheduleError> {
    let ordered = group
        .iter()
        .sorted_by(|a, b| {
            a.appointment_date()
                .cmp(&b.appointment_date())
                .then_with(|| a.id().cmp(b.id()))
        })
        .collect_vec();
    let Some(first) = ordered.first() else {
        return Ok((vec![], vec![]));
    };
    let first_dose = first.appointment_date();
    let patient_name = first.patient_name();

    let mut classifications = Vec::with_capacity(ordered.len());
    for (index, record) in ordered.iter().enumerate() {
        let expected = schedule.expected_date(first_dose, index)?;
        let actual = record.appointment_date();
        let status = if actual == expected {
            Status::Correct
        } else {
            Status::Incorrect
        };
        if let Some(stored) = record.stored_dose_number() {
            if stored != DoseNumber::from_index(index) {
                debug!(
                    "{}: stored {stored} but falls in position {}",
                    record.id(),
                    DoseNumber::from_index(index)
                );
            }
        }
        classifications.push(Classification {
            appointment_id: record.id().to_owned(),
            patient_name: record.patient_name(),
            vaccine_type: schedule.vaccine_type().to_owned(),
            dose_number: DoseNumber::from_index(index),
            actual_date: actual,
            expected_date: expected,
            status,
        });
    }

    let missing = (ordered.len()..schedule.total_doses() as usize)
        .map(|index| {
            Ok(MissingDose {
                patient: patient.clone(),
                patient_name: patient_name.clone(),
                vaccine_type: schedule.vaccine_type().to_owned(),
                dose_number: DoseNumber::from_index(index),
                expected_date: schedule.expected_date(first_dose, index)?,
            })
        })
        .collect::<Result<Vec<_>, ScheduleError>>()?;

    Ok((classifications, missing))
}
