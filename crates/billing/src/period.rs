//! Billing period windows

use serde::Serialize;
use time::{util, Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Half-open `[start, end)` window that usage is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BillingPeriod {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl BillingPeriod {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self { start, end }
    }

    /// The UTC calendar month containing `now`
    pub fn calendar_month(now: OffsetDateTime) -> Self {
        let date = now.to_offset(UtcOffset::UTC).date();
        let first = date - Duration::days(i64::from(date.day()) - 1);
        let month_len = Duration::days(i64::from(util::days_in_year_month(first.year(), first.month())));
        let end = first
            .checked_add(month_len)
            .map_or(PrimitiveDateTime::MAX, Date::midnight)
            .assume_utc();

        Self {
            start: first.midnight().assume_utc(),
            end,
        }
    }

    /// The one-month slice of this period that contains `at`
    ///
    /// Slices start at `start + k months`. A tail shorter than a month is
    /// folded into the last slice, so a period of at most one month is its own
    /// single slice.
    pub fn monthly_slice(&self, at: OffsetDateTime) -> Self {
        let mut slice_start = self.start;
        for k in 1.. {
            let (Some(next), Some(after)) = (add_months(self.start, k), add_months(self.start, k + 1))
            else {
                break;
            };
            if next >= self.end || after > self.end {
                break;
            }
            if at < next {
                return Self::new(slice_start, next);
            }
            slice_start = next;
        }
        Self::new(slice_start, self.end)
    }

    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.start <= at && at < self.end
    }
}

/// Same time of day `months` calendar months later, clamped to the last day of
/// the month. `None` past the last representable date.
pub fn add_months(at: OffsetDateTime, months: u32) -> Option<OffsetDateTime> {
    let date = at.date();
    let index = i64::from(date.year()) * 12 + i64::from(u8::from(date.month())) - 1 + i64::from(months);
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = Month::try_from(u8::try_from(index.rem_euclid(12) + 1).ok()?).ok()?;
    let day = date.day().min(util::days_in_year_month(year, month));

    Date::from_calendar_date(year, month, day)
        .ok()
        .map(|next| at.replace_date(next))
}

pub fn add_one_month(at: OffsetDateTime) -> Option<OffsetDateTime> {
    add_months(at, 1)
}
