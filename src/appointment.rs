use crate::schedule::DoseNumber;
use jiff::civil::Date;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// How a patient is identified: by national ID number or by their messaging-platform user id.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum PatientKey {
    IdNumber(String),
    LineUser(String),
}

impl PatientKey {
    pub fn raw(&self) -> &str {
        match self {
            Self::IdNumber(id) | Self::LineUser(id) => id,
        }
    }
}

impl fmt::Display for PatientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdNumber(id) => write!(f, "{id}"),
            Self::LineUser(id) => write!(f, "line:{id}"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct AppointmentRecord {
    id: String,
    patient: PatientKey,
    #[serde(default)]
    patient_name: String,
    vaccine_type: String,
    #[serde(deserialize_with = "deserialize_calendar_date")]
    appointment_date: Date,
    // Whatever the booking flow stored. Dose order is always re-derived from dates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dose_number: Option<DoseNumber>,
    #[serde(default)]
    notes: String,
}

impl AppointmentRecord {
    pub fn new(id: &str, patient: PatientKey, vaccine_type: &str, appointment_date: Date) -> Self {
        Self {
            id: id.to_owned(),
            patient,
            patient_name: String::new(),
            vaccine_type: vaccine_type.to_owned(),
            appointment_date,
            dose_number: None,
            notes: String::new(),
        }
    }

    pub fn with_patient_name(mut self, name: &str) -> Self {
        self.patient_name = name.to_owned();
        self
    }

    pub fn with_dose_number(mut self, dose: u32) -> Self {
        self.dose_number = Some(dose.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn patient(&self) -> &PatientKey {
        &self.patient
    }

    /// Name for reports; falls back to the patient key when the booking had no name.
    pub fn patient_name(&self) -> String {
        if self.patient_name.is_empty() {
            self.patient.to_string()
        } else {
            self.patient_name.clone()
        }
    }

    pub fn vaccine_type(&self) -> &str {
        &self.vaccine_type
    }

    pub fn appointment_date(&self) -> Date {
        self.appointment_date
    }

    pub fn stored_dose_number(&self) -> Option<DoseNumber> {
        self.dose_number
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    /// Move the appointment and leave an audit trail of the change in the notes.
    pub fn correct_date(&mut self, new_date: Date, audit_note: &str) {
        self.appointment_date = new_date;
        if self.notes.is_empty() {
            self.notes = audit_note.to_owned();
        } else {
            self.notes = format!("{}; {}", self.notes, audit_note);
        }
    }
}

/// Restricts a store read to one patient and/or one vaccine.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AppointmentFilter {
    pub patient: Option<String>,
    pub vaccine_type: Option<String>,
}

impl AppointmentFilter {
    pub fn matches(&self, record: &AppointmentRecord) -> bool {
        let patient_ok = self
            .patient
            .as_deref()
            .is_none_or(|p| p == record.patient.raw() || p == record.patient.to_string());
        let vaccine_ok = self
            .vaccine_type
            .as_deref()
            .is_none_or(|v| v == record.vaccine_type);
        patient_ok && vaccine_ok
    }
}

/// Parse a stored appointment date, dropping any time-of-day the backend attached.
pub fn parse_calendar_date(text: &str) -> Result<Date, jiff::Error> {
    let text = text.trim();
    let day = match text.char_indices().nth(10) {
        Some((at, 'T' | 't' | ' ')) => &text[..at],
        _ => text,
    };
    day.parse()
}

fn deserialize_calendar_date<'de, D>(deserializer: D) -> Result<Date, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_calendar_date(&text).map_err(serde::de::Error::custom)
}
