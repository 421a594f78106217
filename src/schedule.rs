use crate::error::ScheduleError;
use jiff::{civil::Date, Span};
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// Dose intervals are CUMULATIVE day offsets from the first dose, not gaps from the previous
// dose. `dose_intervals[i]` is how many days after dose 1 that dose `i + 2` falls due, so the
// rabies (Essen) schedule is `[3, 7, 14, 28]`, never `[3, 4, 7, 14]`. Older rows were entered
// in the gap form; use `to_cumulative` to migrate them.

/// 1-based position of a dose within a vaccine's schedule.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DoseNumber(u32);

impl DoseNumber {
    pub fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).map_or(u32::MAX, |i| i.saturating_add(1)))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for DoseNumber {
    fn from(n: u32) -> Self {
        Self(n)
    }
}

impl fmt::Display for DoseNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dose#{}", self.0)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct VaccineSchedule {
    vaccine_type: String,
    total_doses: u32,
    #[serde(deserialize_with = "deserialize_intervals")]
    dose_intervals: Vec<i64>,
    #[serde(default = "active_by_default")]
    active: bool,
}

fn active_by_default() -> bool {
    true
}

impl VaccineSchedule {
    pub fn new(vaccine_type: &str, total_doses: u32, dose_intervals: Vec<i64>) -> Self {
        Self {
            vaccine_type: vaccine_type.to_owned(),
            total_doses,
            dose_intervals,
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn vaccine_type(&self) -> &str {
        &self.vaccine_type
    }

    pub fn total_doses(&self) -> u32 {
        self.total_doses
    }

    pub fn dose_intervals(&self) -> &[i64] {
        &self.dose_intervals
    }

    pub fn dose_intervals_mut(&mut self) -> &mut Vec<i64> {
        &mut self.dose_intervals
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        validate_intervals(&self.vaccine_type, self.total_doses, &self.dose_intervals)?;
        if !is_non_decreasing(&self.dose_intervals) {
            warn!(
                "{} intervals {:?} are not non-decreasing; were they entered as gaps between doses?",
                self.vaccine_type, self.dose_intervals
            );
        }
        Ok(())
    }

    pub fn expected_date(&self, first_dose: Date, dose_index: usize) -> Result<Date, ScheduleError> {
        expected_date(
            &self.vaccine_type,
            first_dose,
            self.total_doses,
            &self.dose_intervals,
            dose_index,
        )
    }

    /// Every dose date of this schedule, starting from the first dose.
    pub fn dose_plan(&self, first_dose: Date) -> Result<Vec<(DoseNumber, Date)>, ScheduleError> {
        (0..self.total_doses as usize)
            .map(|index| Ok((DoseNumber::from_index(index), self.expected_date(first_dose, index)?)))
            .collect()
    }
}

impl fmt::Display for VaccineSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}x at day 0", self.vaccine_type, self.total_doses)?;
        for offset in &self.dose_intervals {
            write!(f, ", {offset}")?;
        }
        if !self.active {
            write!(f, " (inactive)")?;
        }
        Ok(())
    }
}

fn validate_intervals(vaccine: &str, total_doses: u32, intervals: &[i64]) -> Result<(), ScheduleError> {
    if total_doses == 0 {
        return Err(ScheduleError::malformed(vaccine, "total doses must be at least 1"));
    }
    if intervals.len() != total_doses as usize - 1 {
        return Err(ScheduleError::malformed(
            vaccine,
            format!(
                "{} intervals given for {} doses, expected {}",
                intervals.len(),
                total_doses,
                total_doses - 1
            ),
        ));
    }
    if let Some(negative) = intervals.iter().find(|&&days| days < 0) {
        return Err(ScheduleError::malformed(
            vaccine,
            format!("negative interval {negative}"),
        ));
    }
    Ok(())
}

fn is_non_decreasing(offsets: &[i64]) -> bool {
    offsets.windows(2).all(|pair| pair[0] <= pair[1])
}

/// Calendar date on which dose `dose_index` (0-based) is due, given the first dose date.
///
/// Dose 0 is the first dose itself and is returned unchanged whatever the intervals hold.
/// Later doses land `intervals[dose_index - 1]` days after the first dose.
pub fn expected_date(
    vaccine: &str,
    first_dose: Date,
    total_doses: u32,
    intervals: &[i64],
    dose_index: usize,
) -> Result<Date, ScheduleError> {
    if dose_index >= total_doses as usize {
        return Err(ScheduleError::InvalidIndex {
            index: dose_index,
            total_doses,
        });
    }
    if dose_index == 0 {
        return Ok(first_dose);
    }
    validate_intervals(vaccine, total_doses, intervals)?;

    let offset_days = intervals[dose_index - 1];
    let span = Span::new()
        .try_days(offset_days)
        .map_err(|e| ScheduleError::DateOverflow(e.to_string()))?;
    first_dose
        .checked_add(span)
        .map_err(|e| ScheduleError::DateOverflow(e.to_string()))
}

/// Turn gaps between consecutive doses into offsets from the first dose.
pub fn to_cumulative(gaps: &[i64]) -> Vec<i64> {
    gaps.iter()
        .scan(0i64, |total, gap| {
            *total = total.saturating_add(*gap);
            Some(*total)
        })
        .collect()
}

// Some rows carry the interval list as a JSON-encoded string rather than a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawIntervals {
    List(Vec<i64>),
    Encoded(String),
}

fn deserialize_intervals<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawIntervals::deserialize(deserializer)? {
        RawIntervals::List(intervals) => Ok(intervals),
        RawIntervals::Encoded(text) => {
            serde_json::from_str(&text).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use jiff::civil::date;

    fn rabies() -> VaccineSchedule {
        VaccineSchedule::new("rabies", 5, vec![3, 7, 14, 28])
    }

    #[test]
    fn test_first_dose_is_identity() -> Result<()> {
        let first = date(2024, 1, 1);
        assert_eq!(first, rabies().expected_date(first, 0)?);
        assert_eq!(
            first,
            VaccineSchedule::new("single", 1, vec![]).expected_date(first, 0)?
        );
        // Index 0 ignores the interval contents entirely.
        assert_eq!(first, expected_date("broken", first, 3, &[-5], 0)?);
        Ok(())
    }

    #[test]
    fn test_cumulative_offsets() -> Result<()> {
        let first = date(2024, 1, 1);
        let schedule = rabies();
        assert_eq!(date(2024, 1, 4), schedule.expected_date(first, 1)?);
        assert_eq!(date(2024, 1, 8), schedule.expected_date(first, 2)?);
        assert_eq!(date(2024, 1, 15), schedule.expected_date(first, 3)?);
        assert_eq!(date(2024, 1, 29), schedule.expected_date(first, 4)?);
        Ok(())
    }

    #[test]
    fn test_offsets_cross_month_and_year() -> Result<()> {
        let first = date(2024, 12, 20);
        assert_eq!(date(2025, 1, 17), rabies().expected_date(first, 4)?);
        // 2024 is a leap year.
        let hpv = VaccineSchedule::new("hpv", 3, vec![60, 180]);
        assert_eq!(date(2024, 3, 1), hpv.expected_date(date(2024, 1, 1), 1)?);
        Ok(())
    }

    #[test]
    fn test_invalid_index() {
        let first = date(2024, 1, 1);
        assert_eq!(
            Err(ScheduleError::InvalidIndex {
                index: 5,
                total_doses: 5
            }),
            rabies().expected_date(first, 5)
        );
    }

    #[test]
    fn test_malformed_schedules() {
        let first = date(2024, 1, 1);
        let short = VaccineSchedule::new("rabies", 5, vec![3, 7, 14]);
        assert!(matches!(
            short.expected_date(first, 1),
            Err(ScheduleError::MalformedSchedule { .. })
        ));
        assert!(short.validate().is_err());

        let negative = VaccineSchedule::new("rabies", 3, vec![3, -7]);
        assert!(matches!(
            negative.validate(),
            Err(ScheduleError::MalformedSchedule { .. })
        ));

        let empty = VaccineSchedule::new("nothing", 0, vec![]);
        assert!(empty.validate().is_err());
        assert!(rabies().validate().is_ok());
    }

    #[test]
    fn test_dose_plan() -> Result<()> {
        let plan = rabies().dose_plan(date(2024, 1, 1))?;
        assert_eq!(
            vec![
                (DoseNumber::from(1), date(2024, 1, 1)),
                (DoseNumber::from(2), date(2024, 1, 4)),
                (DoseNumber::from(3), date(2024, 1, 8)),
                (DoseNumber::from(4), date(2024, 1, 15)),
                (DoseNumber::from(5), date(2024, 1, 29)),
            ],
            plan
        );
        assert_eq!("Dose#3", plan[2].0.to_string());
        Ok(())
    }

    #[test]
    fn test_gap_conversion() {
        assert_eq!(vec![3, 7, 14, 28], to_cumulative(&[3, 4, 7, 14]));
        assert!(to_cumulative(&[]).is_empty());
    }

    #[test]
    fn test_intervals_from_encoded_string() -> Result<()> {
        let listed: VaccineSchedule = serde_json::from_str(
            r#"{"vaccine_type": "rabies", "total_doses": 5, "dose_intervals": [3, 7, 14, 28]}"#,
        )?;
        let encoded: VaccineSchedule = serde_json::from_str(
            r#"{"vaccine_type": "rabies", "total_doses": 5, "dose_intervals": "[3,7,14,28]", "active": true}"#,
        )?;
        assert_eq!(listed, encoded);
        assert!(listed.active());

        let garbage = serde_json::from_str::<VaccineSchedule>(
            r#"{"vaccine_type": "rabies", "total_doses": 5, "dose_intervals": "3,7"}"#,
        );
        assert!(garbage.is_err());
        Ok(())
    }
}
