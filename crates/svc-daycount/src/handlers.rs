use crate::convention::Convention;
use axum::{response::IntoResponse, Json};
use chrono::NaiveDate;
use gateway_core::error::GatewayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct DatePair {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize)]
pub struct CountRequest {
    pub pairs: Vec<DatePair>,
    pub convention: Convention,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub results: Vec<crate::convention::DayCountResult>,
    pub convention: Convention,
    pub version: &'static str,
}

pub async fn count(Json(req): Json<CountRequest>) -> Result<impl IntoResponse, GatewayError> {
    if req.pairs.is_empty() {
        return Err(GatewayError::validation_error("pairs must not be empty"));
    }

    let mut results = Vec::with_capacity(req.pairs.len());
    for pair in &req.pairs {
        let start = parse_date(&pair.start)?;
        let end = parse_date(&pair.end)?;
        results.push(req.convention.compute(start, end)?);
    }

    Ok(Json(CountResponse {
        results,
        convention: req.convention,
        version: env!("CARGO_PKG_VERSION"),
    }))
}

fn parse_date(raw: &str) -> Result<NaiveDate, GatewayError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| GatewayError::validation_error(format!("'{raw}' is not a valid YYYY-MM-DD date")))
}
