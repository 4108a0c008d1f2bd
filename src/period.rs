use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// One billing cycle, half-open: `start <= d < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        midnight_utc(self.start)
    }

    pub fn end_at(&self) -> DateTime<Utc> {
        midnight_utc(self.end)
    }
}

/// Computes the billing cycle containing `reference` for a budget whose cycle starts on
/// `cutoff_day`.
///
/// The cutoff is clamped to the last day of each month it is applied to, so a cutoff of 31
/// lands on Feb 28/29 rather than rolling into March.
pub fn calculate_period(cutoff_day: u32, reference: NaiveDate) -> BillingPeriod {
    let cutoff = cutoff_day.clamp(1, 31);
    let (year, month) = (reference.year(), reference.month());
    let this_cycle = day_in_month(year, month, cutoff);

    if reference >= this_cycle {
        let (ny, nm) = shift_month(year, month, 1);
        BillingPeriod {
            start: this_cycle,
            end: day_in_month(ny, nm, cutoff),
        }
    } else {
        let (py, pm) = shift_month(year, month, -1);
        BillingPeriod {
            start: day_in_month(py, pm, cutoff),
            end: this_cycle,
        }
    }
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = shift_month(year, month, 1);
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// `day` in the given month, clamped to the month's last day.
pub fn day_in_month(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let idx = year * 12 + month as i32 - 1 + delta;
    (idx.div_euclid(12), (idx.rem_euclid(12) + 1) as u32)
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&NaiveDateTime::new(date, NaiveTime::MIN))
}
