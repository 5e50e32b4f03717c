use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, Weekday};
use clap::ValueEnum;
use serde::Serialize;

use crate::models::{Holiday, Request, RequestStatus, RequestType};

/// Business-day calendar: Monday to Friday minus configured holidays.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    holidays: BTreeSet<NaiveDate>,
}

impl Calendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn from_holidays(holidays: &[Holiday]) -> Self {
        Self::new(holidays.iter().map(|holiday| holiday.date))
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Business days in `(start, end]`. The start day itself never counts.
    pub fn business_days_between(&self, start: NaiveDate, end: NaiveDate) -> i32 {
        let mut count = 0;
        let mut day = start;
        while day < end {
            let Some(next) = day.succ_opt() else { break };
            day = next;
            if self.is_business_day(day) {
                count += 1;
            }
        }
        count
    }

    /// The date `days` business days after `start`, capped at the last
    /// representable date.
    pub fn add_business_days(&self, start: NaiveDate, days: i32) -> NaiveDate {
        let mut remaining = days;
        let mut day = start;
        while remaining > 0 {
            let Some(next) = day.succ_opt() else { break };
            day = next;
            if self.is_business_day(day) {
                remaining -= 1;
            }
        }
        day
    }
}

/// Ordered from least to most severe for open requests; the last three
/// apply once the clock has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SlaFlag {
    OnTrack,
    Attention,
    Critical,
    Overdue,
    Met,
    Missed,
    Cancelled,
}

impl SlaFlag {
    pub fn for_remaining(remaining: i32, request_type: &RequestType) -> Self {
        if remaining <= 0 {
            SlaFlag::Overdue
        } else if remaining <= request_type.critical_days {
            SlaFlag::Critical
        } else if remaining <= request_type.attention_days {
            SlaFlag::Attention
        } else {
            SlaFlag::OnTrack
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SlaFlag::OnTrack => "on track",
            SlaFlag::Attention => "attention",
            SlaFlag::Critical => "critical",
            SlaFlag::Overdue => "overdue",
            SlaFlag::Met => "met",
            SlaFlag::Missed => "missed",
            SlaFlag::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlaStatus {
    pub elapsed_days: i32,
    pub remaining_days: i32,
    pub due_date: NaiveDate,
    pub flag: SlaFlag,
}

impl SlaStatus {
    /// The "tiempo restante" text shown next to a request.
    pub fn remaining_label(&self) -> String {
        match self.flag {
            SlaFlag::Met | SlaFlag::Missed => return "Respondida".to_string(),
            SlaFlag::Cancelled => return "Cancelada".to_string(),
            _ => {}
        }
        match self.remaining_days {
            0 => "Vence hoy".to_string(),
            1 => "1 día hábil".to_string(),
            -1 => "Vencida hace 1 día hábil".to_string(),
            n if n > 1 => format!("{n} días hábiles"),
            n => format!("Vencida hace {} días hábiles", -n),
        }
    }
}

/// Computes where `request` stands against its type's thresholds on `today`.
///
/// Open requests count up to `today`; answered ones stop the clock at
/// `responded_at`.
pub fn evaluate(
    request: &Request,
    request_type: &RequestType,
    today: NaiveDate,
    calendar: &Calendar,
) -> SlaStatus {
    let submitted = request.submitted_at.date_naive();
    let stop = match (request.status.is_answered(), request.responded_at) {
        (true, Some(responded_at)) => responded_at.date_naive(),
        _ => today,
    };
    let elapsed_days = calendar.business_days_between(submitted, stop);
    let remaining_days = request_type.max_days - elapsed_days;

    let flag = match request.status {
        RequestStatus::Cancelada => SlaFlag::Cancelled,
        status if status.is_answered() => {
            if remaining_days >= 0 {
                SlaFlag::Met
            } else {
                SlaFlag::Missed
            }
        }
        _ => SlaFlag::for_remaining(remaining_days, request_type),
    };

    SlaStatus {
        elapsed_days,
        remaining_days,
        due_date: calendar.add_business_days(submitted, request_type.max_days),
        flag,
    }
}
