use axum::{response::IntoResponse, Json};
use gateway_core::error::GatewayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CashFlow {
    /// Years from valuation date to the cash flow, already computed upstream
    /// (e.g. by `svc-daycount`).
    pub time_years: f64,
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct ValueRequest {
    pub cash_flows: Vec<CashFlow>,
    pub discount_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct ValueResponse {
    pub present_value: f64,
    pub version: &'static str,
}

pub async fn value(Json(req): Json<ValueRequest>) -> Result<impl IntoResponse, GatewayError> {
    if req.cash_flows.is_empty() {
        return Err(GatewayError::validation_error("cash_flows must not be empty"));
    }
    if !req.discount_rate.is_finite() || req.discount_rate <= -1.0 {
        return Err(GatewayError::validation_error(
            "discount_rate must be a finite number greater than -1.0",
        ));
    }

    let present_value: f64 = req
        .cash_flows
        .iter()
        .map(|cf| cf.amount / (1.0 + req.discount_rate).powf(cf.time_years))
        .sum();

    Ok(Json(ValueResponse {
        present_value,
        version: env!("CARGO_PKG_VERSION"),
    }))
}
