use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Result, SchedulerError};

/// Parse a UTC cron expression (`cron` crate's 6-field `sec min hour dom
/// month dow` grammar) and return the next fire instant strictly after
/// `after`, or `None` if the expression has no future occurrence.
pub fn next_fire_after(expr: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let schedule = Schedule::from_str(expr).map_err(|e| SchedulerError::InvalidSchedule {
        expr: expr.to_string(),
        message: e.to_string(),
    })?;
    Ok(schedule.after(&after).next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn every_hour_on_the_hour_advances_to_next_top_of_hour() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 13, 20, 0).unwrap();
        let next = next_fire_after("0 0 * * * *", from).expect("parse").expect("next");
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 14, 0, 0).unwrap());
    }

    #[test]
    fn malformed_expression_is_rejected() {
        assert!(next_fire_after("not a cron expr", Utc::now()).is_err());
    }
}
