use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, Weekday};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    #[error("invalid date: {0}")]
    InvalidDate(String),
}

/// Fixed national holidays as (month, day), recurring every year.
pub const NATIONAL_HOLIDAYS: [(u32, u32); 9] = [
    (1, 1),
    (4, 21),
    (5, 1),
    (9, 7),
    (10, 12),
    (11, 2),
    (11, 15),
    (11, 20),
    (12, 25),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessCalendar {
    holidays: BTreeSet<(u32, u32)>,
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self::new(NATIONAL_HOLIDAYS)
    }
}

impl BusinessCalendar {
    pub fn new(holidays: impl IntoIterator<Item = (u32, u32)>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Parses a comma-separated `MM-DD` list, e.g. `01-01,12-25`.
    pub fn from_list(list: &str) -> Result<Self, CalendarError> {
        let mut holidays = BTreeSet::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (m, d) = item
                .split_once('-')
                .ok_or_else(|| CalendarError::InvalidDate(item.to_string()))?;
            let month: u32 = m
                .parse()
                .map_err(|_| CalendarError::InvalidDate(item.to_string()))?;
            let day: u32 = d
                .parse()
                .map_err(|_| CalendarError::InvalidDate(item.to_string()))?;
            // 2024 is a leap year, so 02-29 is accepted
            NaiveDate::from_ymd_opt(2024, month, day)
                .ok_or_else(|| CalendarError::InvalidDate(item.to_string()))?;
            holidays.insert((month, day));
        }
        Ok(Self { holidays })
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&(date.month(), date.day()))
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }

    /// First business day strictly after `date`.
    pub fn next_business_day(&self, date: NaiveDate) -> Result<NaiveDate, CalendarError> {
        let mut current = date;
        loop {
            current = current
                .succ_opt()
                .ok_or_else(|| CalendarError::InvalidDate(date.to_string()))?;
            if self.is_business_day(current) {
                return Ok(current);
            }
        }
    }

    /// `date` itself when it is a business day, otherwise the next one.
    pub fn snap_forward(&self, date: NaiveDate) -> Result<NaiveDate, CalendarError> {
        if self.is_business_day(date) {
            Ok(date)
        } else {
            self.next_business_day(date)
        }
    }

    /// Snaps `date` forward, then advances `days` business days.
    pub fn add_business_days(&self, date: NaiveDate, days: u32) -> Result<NaiveDate, CalendarError> {
        let mut current = self.snap_forward(date)?;
        for _ in 0..days {
            current = self.next_business_day(current)?;
        }
        Ok(current)
    }

    /// Business days in `[from, to]`, both ends inclusive.
    pub fn business_days(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        from.iter_days()
            .take_while(|d| *d <= to)
            .filter(|d| self.is_business_day(*d))
            .collect()
    }
}
