use crate::{
    appointment::{AppointmentFilter, AppointmentRecord},
    error::StoreError,
    schedule::VaccineSchedule,
};
use jiff::civil::Date;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Where schedules and appointments live. Reads are taken as one snapshot before any write.
pub trait AppointmentStore {
    fn read_schedules(&self) -> Result<Vec<VaccineSchedule>, StoreError>;

    fn read_appointments(&self, filter: &AppointmentFilter) -> Result<Vec<AppointmentRecord>, StoreError>;

    /// Move one appointment from `expected` to `date` and append `note` to its notes.
    ///
    /// Fails with `StoreError::Stale` when the stored date is no longer `expected`.
    fn write_appointment_date(
        &mut self,
        id: &str,
        expected: Date,
        date: Date,
        note: &str,
    ) -> Result<(), StoreError>;

    fn write_schedule_intervals(&mut self, vaccine_type: &str, intervals: Vec<i64>) -> Result<(), StoreError>;
}

/// Full contents of a store, as kept on disk.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Snapshot {
    pub schedules: Vec<VaccineSchedule>,
    pub appointments: Vec<AppointmentRecord>,
}

impl Snapshot {
    fn read_appointments(&self, filter: &AppointmentFilter) -> Vec<AppointmentRecord> {
        self.appointments
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect()
    }

    fn correct_date(&mut self, id: &str, expected: Date, date: Date, note: &str) -> Result<(), StoreError> {
        let record = self
            .appointments
            .iter_mut()
            .find(|record| record.id() == id)
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        if record.appointment_date() != expected {
            return Err(StoreError::Stale {
                id: id.to_owned(),
                expected,
                found: record.appointment_date(),
            });
        }
        record.correct_date(date, note);
        Ok(())
    }

    fn set_intervals(&mut self, vaccine_type: &str, intervals: Vec<i64>) -> Result<(), StoreError> {
        let schedule = self
            .schedules
            .iter_mut()
            .find(|schedule| schedule.vaccine_type() == vaccine_type)
            .ok_or_else(|| StoreError::UnknownVaccine(vaccine_type.to_owned()))?;
        *schedule.dose_intervals_mut() = intervals;
        Ok(())
    }
}

/// In-process store. Can be told to fail writes to exercise the retry path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Snapshot,
    fail_writes: usize,
    writes: usize,
}

impl MemoryStore {
    pub fn new(schedules: Vec<VaccineSchedule>, appointments: Vec<AppointmentRecord>) -> Self {
        Self {
            snapshot: Snapshot {
                schedules,
                appointments,
            },
            ..Self::default()
        }
    }

    pub fn get(&self, id: &str) -> Option<&AppointmentRecord> {
        self.snapshot.appointments.iter().find(|r| r.id() == id)
    }

    pub fn remove(&mut self, id: &str) {
        self.snapshot.appointments.retain(|r| r.id() != id);
    }

    pub fn schedule(&self, vaccine_type: &str) -> Option<&VaccineSchedule> {
        self.snapshot
            .schedules
            .iter()
            .find(|s| s.vaccine_type() == vaccine_type)
    }

    /// Make the next `n` writes fail as if the backend were unreachable.
    pub fn fail_next_writes(&mut self, n: usize) {
        self.fail_writes = n;
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    fn check_available(&mut self) -> Result<(), StoreError> {
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(StoreError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }
}

impl AppointmentStore for MemoryStore {
    fn read_schedules(&self) -> Result<Vec<VaccineSchedule>, StoreError> {
        Ok(self.snapshot.schedules.clone())
    }

    fn read_appointments(&self, filter: &AppointmentFilter) -> Result<Vec<AppointmentRecord>, StoreError> {
        Ok(self.snapshot.read_appointments(filter))
    }

    fn write_appointment_date(
        &mut self,
        id: &str,
        expected: Date,
        date: Date,
        note: &str,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        self.snapshot.correct_date(id, expected, date, note)?;
        self.writes += 1;
        Ok(())
    }

    fn write_schedule_intervals(&mut self, vaccine_type: &str, intervals: Vec<i64>) -> Result<(), StoreError> {
        self.check_available()?;
        self.snapshot.set_intervals(vaccine_type, intervals)?;
        self.writes += 1;
        Ok(())
    }
}

/// A RON file holding a full snapshot. Every write goes straight back to disk.
#[derive(Debug)]
pub struct RonFileStore {
    path: PathBuf,
    snapshot: Snapshot,
}

impl RonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_owned();
        let data = fs::read_to_string(&path)?;
        let snapshot: Snapshot =
            ron::from_str(&data).map_err(|e| StoreError::Parse(format!("{}: {e}", path.display())))?;
        info!(
            "loaded {} schedules and {} appointments from {}",
            snapshot.schedules.len(),
            snapshot.appointments.len(),
            path.display()
        );
        Ok(Self { path, snapshot })
    }

    pub fn create(path: impl AsRef<Path>, snapshot: Snapshot) -> Result<Self, StoreError> {
        let store = Self {
            path: path.as_ref().to_owned(),
            snapshot,
        };
        store.flush(&store.snapshot)?;
        Ok(store)
    }

    /// Apply `change` to a copy of the snapshot and keep it only once it is on disk.
    fn commit(
        &mut self,
        change: impl FnOnce(&mut Snapshot) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut next = self.snapshot.clone();
        change(&mut next)?;
        self.flush(&next)?;
        self.snapshot = next;
        Ok(())
    }

    fn flush(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let data = ron::ser::to_string_pretty(snapshot, ron::ser::PrettyConfig::default())
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        // Write to a sibling and rename so a crash never leaves half a file behind.
        let tmp = self.path.with_extension("ron.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        debug!("flushed {}", self.path.display());
        Ok(())
    }
}

impl AppointmentStore for RonFileStore {
    fn read_schedules(&self) -> Result<Vec<VaccineSchedule>, StoreError> {
        Ok(self.snapshot.schedules.clone())
    }

    fn read_appointments(&self, filter: &AppointmentFilter) -> Result<Vec<AppointmentRecord>, StoreError> {
        Ok(self.snapshot.read_appointments(filter))
    }

    fn write_appointment_date(
        &mut self,
        id: &str,
        expected: Date,
        date: Date,
        note: &str,
    ) -> Result<(), StoreError> {
        self.commit(|snapshot| snapshot.correct_date(id, expected, date, note))
    }

    fn write_schedule_intervals(&mut self, vaccine_type: &str, intervals: Vec<i64>) -> Result<(), StoreError> {
        self.commit(|snapshot| snapshot.set_intervals(vaccine_type, intervals))
    }
}
