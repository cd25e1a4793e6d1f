use axum::{response::IntoResponse, Json};
use gateway_core::error::GatewayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CashFlow {
    pub time_years: f64,
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct DurationRequest {
    pub cash_flows: Vec<CashFlow>,
    pub discount_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct DurationResponse {
    pub macaulay_duration: f64,
    pub modified_duration: f64,
    pub version: &'static str,
}

pub async fn duration(Json(req): Json<DurationRequest>) -> Result<impl IntoResponse, GatewayError> {
    if req.cash_flows.is_empty() {
        return Err(GatewayError::validation_error("cash_flows must not be empty"));
    }
    if !req.discount_rate.is_finite() || req.discount_rate <= -1.0 {
        return Err(GatewayError::validation_error(
            "discount_rate must be a finite number greater than -1.0",
        ));
    }

    let mut weighted_sum = 0.0;
    let mut price = 0.0;
    for cf in &req.cash_flows {
        let discounted = cf.amount / (1.0 + req.discount_rate).powf(cf.time_years);
        weighted_sum += cf.time_years * discounted;
        price += discounted;
    }
    if price == 0.0 {
        return Err(GatewayError::validation_error(
            "discounted cash flows sum to zero; duration is undefined",
        ));
    }

    let macaulay_duration = weighted_sum / price;
    let modified_duration = macaulay_duration / (1.0 + req.discount_rate);

    Ok(Json(DurationResponse {
        macaulay_duration,
        modified_duration,
        version: env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_coupon_duration_equals_its_own_maturity() {
        let flows = vec![CashFlow {
            time_years: 5.0,
            amount: 100.0,
        }];
        let discounted: f64 = flows
            .iter()
            .map(|cf| cf.amount / 1.04_f64.powf(cf.time_years))
            .sum();
        let weighted: f64 = flows
            .iter()
            .map(|cf| cf.time_years * cf.amount / 1.04_f64.powf(cf.time_years))
            .sum();
        let macaulay = weighted / discounted;
        assert!((macaulay - 5.0).abs() < 1e-9);
    }
}
