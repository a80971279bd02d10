use chrono::{Duration, NaiveDate, NaiveDateTime};

use super::Batch;
use crate::engine::{EngineResult, template::TemplateResolver};

/// Splits a policy into calendar windows ending at the aging boundary.
///
/// Every batch re-resolves the full detail list with the window's end as
/// the aging date. Because earlier windows have already been committed,
/// a `< #AGING_DATE#` filter touches only the rows of the current window.
pub struct DayTokenizer<'a> {
    resolver: &'a TemplateResolver,
    loop_date: NaiveDateTime,
    end: NaiveDateTime,
    step: Duration,
}

impl<'a> DayTokenizer<'a> {
    pub fn new(
        resolver: &'a TemplateResolver,
        start_date: NaiveDate,
        end: NaiveDateTime,
        batch_days: u32,
    ) -> Self {
        let start = start_date.and_time(chrono::NaiveTime::default());
        Self {
            resolver,
            loop_date: start,
            end,
            step: Duration::days(i64::from(batch_days.max(1))),
        }
    }

    pub fn has_next(&self) -> bool {
        self.loop_date < self.end
    }

    /// Aging date of the last produced batch.
    pub fn current_aging_date(&self) -> NaiveDateTime {
        self.loop_date
    }
}

impl Iterator for DayTokenizer<'_> {
    type Item = EngineResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        let previous = self.loop_date;
        self.loop_date = (self.loop_date + self.step).min(self.end);

        let label = format!(
            "Processing days before {} (window from {})",
            self.loop_date.format("%Y-%m-%d %H:%M:%S"),
            previous.format("%Y-%m-%d")
        );
        Some(
            self.resolver
                .resolve_all(self.loop_date)
                .map(|details| Batch { label, details }),
        )
    }
}
