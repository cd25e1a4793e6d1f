use axum::{response::IntoResponse, Json};
use gateway_core::error::GatewayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct PriceRequest {
    pub face_value: f64,
    pub coupon_rate: f64,
    pub periods_per_year: u32,
    pub periods_remaining: u32,
    pub yield_rate: f64,
    /// Periods already elapsed in the current coupon period, for accrued
    /// interest. Defaults to 0 (priced on a coupon date).
    #[serde(default)]
    pub periods_accrued: f64,
}

#[derive(Debug, Serialize)]
pub struct PriceResponse {
    pub clean_price: f64,
    pub accrued_interest: f64,
    pub dirty_price: f64,
    pub version: &'static str,
}

pub async fn price(Json(req): Json<PriceRequest>) -> Result<impl IntoResponse, GatewayError> {
    if req.periods_per_year == 0 {
        return Err(GatewayError::validation_error("periods_per_year must be greater than zero"));
    }
    if req.periods_remaining == 0 {
        return Err(GatewayError::validation_error(
            "periods_remaining must be greater than zero",
        ));
    }
    if !req.yield_rate.is_finite() || req.yield_rate <= -1.0 {
        return Err(GatewayError::validation_error(
            "yield_rate must be a finite number greater than -1.0",
        ));
    }
    if !(0.0..1.0).contains(&req.periods_accrued) {
        return Err(GatewayError::validation_error(
            "periods_accrued must be in [0, 1)",
        ));
    }

    let coupon = req.face_value * req.coupon_rate / f64::from(req.periods_per_year);
    let period_yield = req.yield_rate / f64::from(req.periods_per_year);

    let mut dirty_price = 0.0;
    for period in 1..=req.periods_remaining {
        let cash_flow = if period == req.periods_remaining {
            coupon + req.face_value
        } else {
            coupon
        };
        let discount_periods = f64::from(period) - req.periods_accrued;
        dirty_price += cash_flow / (1.0 + period_yield).powf(discount_periods);
    }

    let accrued_interest = coupon * req.periods_accrued;
    let clean_price = dirty_price - accrued_interest;

    Ok(Json(PriceResponse {
        clean_price,
        accrued_interest,
        dirty_price,
        version: env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn par_bond_prices_at_face_value_on_a_coupon_date() {
        // A bond whose coupon rate equals its yield always prices at par.
        let coupon = 100.0 * 0.05 / 2.0;
        let period_yield = 0.05 / 2.0;
        let mut dirty = 0.0;
        for period in 1..=10u32 {
            let cf = if period == 10 { coupon + 100.0 } else { coupon };
            dirty += cf / (1.0 + period_yield).powf(f64::from(period));
        }
        assert!((dirty - 100.0).abs() < 1e-9);
    }

    #[test]
    fn accrued_interest_scales_linearly_within_a_period() {
        let coupon = 100.0 * 0.06 / 2.0;
        let accrued = coupon * 0.5;
        assert!((accrued - 3.0).abs() < 1e-9);
    }
}
