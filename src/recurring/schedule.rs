//! Recurrence dates
//!
//! Occurrence dates are always computed from the schedule's `start_date`
//! anchor: the k-th date is `start_date + k * interval` units. Month-based
//! frequencies use chrono's month arithmetic, which clamps to the last day of
//! shorter months, so a schedule anchored on Jan 31 runs on Feb 28, Mar 31,
//! Apr 30 and never drifts to the 28th.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::types::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

enum Step {
    Days(u64),
    Months(u32),
}

impl Frequency {
    fn step(&self, interval: u32) -> Option<Step> {
        let interval64 = u64::from(interval);
        match self {
            Frequency::Daily => Some(Step::Days(interval64)),
            Frequency::Weekly => interval64.checked_mul(7).map(Step::Days),
            Frequency::Monthly => Some(Step::Months(interval)),
            Frequency::Quarterly => interval.checked_mul(3).map(Step::Months),
            Frequency::Yearly => interval.checked_mul(12).map(Step::Months),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub frequency: Frequency,
    /// Multiplier on the frequency unit, at least 1
    pub interval: u32,
    /// Anchor all occurrence dates are computed from
    pub start_date: NaiveDate,
    pub next_run_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub max_occurrences: Option<u32>,
    pub occurrence_count: u32,
    /// Effective date of the latest output, which can precede its slot
    pub last_run_date: Option<NaiveDate>,
    /// Series date the latest output was generated for
    #[serde(default)]
    pub last_scheduled_date: Option<NaiveDate>,
}

impl Schedule {
    pub fn new(frequency: Frequency, interval: u32, start_date: NaiveDate) -> Self {
        Self {
            frequency,
            interval,
            start_date,
            next_run_date: start_date,
            end_date: None,
            max_occurrences: None,
            occurrence_count: 0,
            last_run_date: None,
            last_scheduled_date: None,
        }
    }

    pub fn until(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn limit(mut self, max_occurrences: u32) -> Self {
        self.max_occurrences = Some(max_occurrences);
        self
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.interval == 0 {
            return Err(LedgerError::InvalidRecurrence(
                "interval must be at least 1".to_string(),
            ));
        }
        if self.frequency.step(self.interval).is_none() {
            return Err(LedgerError::InvalidRecurrence(format!(
                "interval {} is too large",
                self.interval
            )));
        }
        if self.next_run_date < self.start_date {
            return Err(LedgerError::InvalidRecurrence(format!(
                "next run date {} is before start date {}",
                self.next_run_date, self.start_date
            )));
        }
        if let Some(end_date) = self.end_date {
            if end_date < self.next_run_date {
                return Err(LedgerError::InvalidRecurrence(format!(
                    "end date {} is before next run date {}",
                    end_date, self.next_run_date
                )));
            }
        }
        if self.max_occurrences == Some(0) {
            return Err(LedgerError::InvalidRecurrence(
                "max occurrences must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The k-th date of the series; `occurrence_date(0)` is the anchor
    pub fn occurrence_date(&self, k: u32) -> LedgerResult<NaiveDate> {
        let out_of_range = || {
            LedgerError::InvalidRecurrence(format!(
                "occurrence {} of the schedule starting {} is out of range",
                k, self.start_date
            ))
        };
        match self.frequency.step(self.interval).ok_or_else(out_of_range)? {
            Step::Days(days) => {
                let offset = days.checked_mul(u64::from(k)).ok_or_else(out_of_range)?;
                self.start_date
                    .checked_add_days(Days::new(offset))
                    .ok_or_else(out_of_range)
            }
            Step::Months(months) => {
                let offset = months.checked_mul(k).ok_or_else(out_of_range)?;
                self.start_date
                    .checked_add_months(Months::new(offset))
                    .ok_or_else(out_of_range)
            }
        }
    }

    /// Earliest date of the series strictly after `date`
    pub fn next_after(&self, date: NaiveDate) -> LedgerResult<NaiveDate> {
        if date < self.start_date {
            return Ok(self.start_date);
        }
        let step = self.frequency.step(self.interval).ok_or_else(|| {
            LedgerError::InvalidRecurrence(format!("interval {} is too large", self.interval))
        })?;
        // Start just below the answer; clamping can put the k-th date a few
        // days before `date` so walk forward from there.
        let mut k = match step {
            Step::Days(days) => {
                let elapsed = (date - self.start_date).num_days() as u64;
                u32::try_from(elapsed / days).unwrap_or(u32::MAX)
            }
            Step::Months(months) => {
                let elapsed = (date.year() - self.start_date.year()) * 12
                    + date.month() as i32
                    - self.start_date.month() as i32;
                (elapsed.max(0) as u32) / months
            }
        };
        loop {
            let candidate = self.occurrence_date(k)?;
            if candidate > date {
                return Ok(candidate);
            }
            k = k.checked_add(1).ok_or_else(|| {
                LedgerError::InvalidRecurrence("schedule exhausted the calendar".to_string())
            })?;
        }
    }

    /// Record a generation of the occurrence scheduled for `next_run_date`
    pub fn advance(&mut self, effective_date: NaiveDate) -> LedgerResult<()> {
        let next = self.next_after(self.next_run_date)?;
        self.occurrence_count += 1;
        self.last_run_date = Some(effective_date);
        self.last_scheduled_date = Some(self.next_run_date);
        self.next_run_date = next;
        Ok(())
    }

    /// No further occurrences: the count reached its limit or the next date
    /// lies past the end date
    pub fn is_exhausted(&self) -> bool {
        self.max_occurrences
            .is_some_and(|max| self.occurrence_count >= max)
            || self.end_date.is_some_and(|end| self.next_run_date > end)
    }

    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.next_run_date <= today
            && self.end_date.is_none_or(|end| end >= today)
            && self
                .max_occurrences
                .is_none_or(|max| self.occurrence_count < max)
    }

    /// The end date has passed without the schedule completing
    pub fn is_lapsed(&self, today: NaiveDate) -> bool {
        self.end_date.is_some_and(|end| end < today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn run(schedule: &mut Schedule, times: usize) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        for _ in 0..times {
            dates.push(schedule.next_run_date);
            let effective = schedule.next_run_date;
            schedule.advance(effective).unwrap();
        }
        dates
    }

    #[test]
    fn test_month_end_clamps_without_drifting() {
        let mut schedule = Schedule::new(Frequency::Monthly, 1, date(2026, 1, 31));
        let dates = run(&mut schedule, 4);
        assert_eq!(
            dates,
            vec![date(2026, 1, 31), date(2026, 2, 28), date(2026, 3, 31), date(2026, 4, 30)]
        );
        assert_eq!(schedule.next_run_date, date(2026, 5, 31));
        assert_eq!(schedule.occurrence_count, 4);
    }

    #[test]
    fn test_leap_day_yearly() {
        let mut schedule = Schedule::new(Frequency::Yearly, 1, date(2024, 2, 29));
        let dates = run(&mut schedule, 5);
        assert_eq!(
            dates,
            vec![
                date(2024, 2, 29),
                date(2025, 2, 28),
                date(2026, 2, 28),
                date(2027, 2, 28),
                date(2028, 2, 29)
            ]
        );
    }

    #[test]
    fn test_weekly_quarterly_and_intervals() {
        let mut weekly = Schedule::new(Frequency::Weekly, 2, date(2026, 3, 2));
        assert_eq!(
            run(&mut weekly, 3),
            vec![date(2026, 3, 2), date(2026, 3, 16), date(2026, 3, 30)]
        );

        let mut quarterly = Schedule::new(Frequency::Quarterly, 1, date(2026, 11, 30));
        assert_eq!(
            run(&mut quarterly, 3),
            vec![date(2026, 11, 30), date(2027, 2, 28), date(2027, 5, 30)]
        );

        let mut daily = Schedule::new(Frequency::Daily, 3, date(2026, 12, 30));
        assert_eq!(
            run(&mut daily, 3),
            vec![date(2026, 12, 30), date(2027, 1, 2), date(2027, 1, 5)]
        );
    }

    #[test]
    fn test_next_after_is_strictly_later_for_every_frequency() {
        let frequencies = [
            Frequency::Daily,
            Frequency::Weekly,
            Frequency::Monthly,
            Frequency::Quarterly,
            Frequency::Yearly,
        ];
        for frequency in frequencies {
            let mut schedule = Schedule::new(frequency, 1, date(2026, 1, 31));
            for _ in 0..30 {
                let current = schedule.next_run_date;
                schedule.advance(current).unwrap();
                assert!(schedule.next_run_date > current, "{:?}", frequency);
            }
            assert_eq!(schedule.occurrence_count, 30);
        }
    }

    #[test]
    fn test_next_after_arbitrary_date() {
        let schedule = Schedule::new(Frequency::Monthly, 1, date(2026, 1, 31));
        assert_eq!(schedule.next_after(date(2025, 6, 1)).unwrap(), date(2026, 1, 31));
        assert_eq!(schedule.next_after(date(2026, 2, 27)).unwrap(), date(2026, 2, 28));
        assert_eq!(schedule.next_after(date(2026, 2, 28)).unwrap(), date(2026, 3, 31));
    }

    #[test]
    fn test_exhaustion_by_count_and_end_date() {
        let mut limited = Schedule::new(Frequency::Monthly, 1, date(2026, 1, 1)).limit(2);
        run(&mut limited, 2);
        assert!(limited.is_exhausted());
        assert!(!limited.is_due(date(2026, 12, 1)));

        let mut ended = Schedule::new(Frequency::Monthly, 1, date(2026, 1, 15)).until(date(2026, 2, 20));
        run(&mut ended, 1);
        assert!(!ended.is_exhausted());
        run(&mut ended, 1);
        assert!(ended.is_exhausted());
    }

    #[test]
    fn test_validation() {
        let base = Schedule::new(Frequency::Monthly, 1, date(2026, 5, 1));
        assert!(base.validate().is_ok());

        let mut zero_interval = base.clone();
        zero_interval.interval = 0;
        assert!(matches!(zero_interval.validate(), Err(LedgerError::InvalidRecurrence(_))));

        let ends_early = base.clone().until(date(2026, 4, 30));
        assert!(matches!(ends_early.validate(), Err(LedgerError::InvalidRecurrence(_))));

        let no_runs = base.limit(0);
        assert!(matches!(no_runs.validate(), Err(LedgerError::InvalidRecurrence(_))));
    }
}
