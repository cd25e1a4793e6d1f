//! Day-count conventions (§6: backend business-logic contract, out of the core
//! trust-boundary scope but its request shape is fixed by that contract).

use chrono::NaiveDate;
use gateway_core::error::GatewayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Convention {
    #[serde(rename = "ACT_360")]
    Act360,
    #[serde(rename = "ACT_365")]
    Act365,
    #[serde(rename = "THIRTY_360")]
    Thirty360,
}

impl Convention {
    fn basis(self) -> u32 {
        match self {
            Self::Act360 => 360,
            Self::Act365 => 365,
            Self::Thirty360 => 360,
        }
    }

    fn days(self, start: NaiveDate, end: NaiveDate) -> i64 {
        match self {
            Self::Act360 | Self::Act365 => (end - start).num_days(),
            Self::Thirty360 => thirty_360_days(start, end),
        }
    }

    pub fn compute(self, start: NaiveDate, end: NaiveDate) -> Result<DayCountResult, GatewayError> {
        if end < start {
            return Err(GatewayError::validation_error(
                "end date must not be before start date",
            ));
        }
        let days = self.days(start, end);
        let basis = self.basis();
        let year_fraction = days as f64 / basis as f64;
        Ok(DayCountResult {
            days,
            year_fraction,
            basis,
        })
    }
}

/// 30/360 (bond basis): clamps day-of-month to 30 at both ends per the standard
/// ISDA rule before taking the difference.
fn thirty_360_days(start: NaiveDate, end: NaiveDate) -> i64 {
    use chrono::Datelike;

    let d1 = start.day().min(30);
    let d2 = if d1 == 30 && end.day() == 31 {
        30
    } else {
        end.day()
    };

    360 * i64::from(end.year() - start.year())
        + 30 * i64::from(end.month() as i32 - start.month() as i32)
        + i64::from(d2) - i64::from(d1)
}

#[derive(Debug, Clone, Serialize)]
pub struct DayCountResult {
    pub days: i64,
    #[serde(rename = "yearFraction")]
    pub year_fraction: f64,
    pub basis: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn act_360_matches_the_reference_scenario() {
        let result = Convention::Act360
            .compute(date("2025-01-01"), date("2025-07-01"))
            .unwrap();
        assert_eq!(result.days, 181);
        assert_eq!(result.basis, 360);
        assert!((result.year_fraction - 0.502_777_777_777_777_8).abs() < 1e-12);
    }

    #[test]
    fn act_365_uses_a_365_basis() {
        let result = Convention::Act365
            .compute(date("2025-01-01"), date("2026-01-01"))
            .unwrap();
        assert_eq!(result.days, 365);
        assert_eq!(result.basis, 365);
        assert!((result.year_fraction - 1.0).abs() < 1e-12);
    }

    #[test]
    fn end_before_start_is_a_validation_error() {
        let err = Convention::Act360
            .compute(date("2025-07-01"), date("2025-01-01"))
            .unwrap_err();
        assert_eq!(err.kind, gateway_core::error::ErrorKind::ValidationError);
    }
}
