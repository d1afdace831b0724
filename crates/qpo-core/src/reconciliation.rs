//! Trade reconciliation.
//!
//! Turns a target weight vector and an existing holding into per-asset
//! BUY/SELL/HOLD instructions at the latest prices. Shares, prices and
//! notionals are `rust_decimal::Decimal`; only the incoming weights are `f64`.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::QpoError;
use crate::types::Ticker;
use crate::QpoResult;

/// Decimal places kept on target share counts.
pub const SHARE_DP: u32 = 6;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A held quantity of one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: Ticker,
    pub shares: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

/// What to do with one position to reach the target allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeInstruction {
    pub ticker: Ticker,
    pub current_shares: Decimal,
    pub target_shares: Decimal,
    pub action: TradeAction,
    /// |target - current|
    pub quantity: Decimal,
    /// quantity * price
    pub trade_value: Decimal,
}

/// The full trade list plus turnover figures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub trades: Vec<TradeInstruction>,
    pub total_value: Decimal,
    /// Sum of BUY and SELL notionals.
    pub gross_traded_value: Decimal,
    /// Half the gross traded value over the portfolio value.
    pub turnover: Decimal,
    pub positions_traded: u32,
    pub positions_unchanged: u32,
}

// ---------------------------------------------------------------------------
// Calculation
// ---------------------------------------------------------------------------

/// sum(shares * price)
pub fn portfolio_value(shares: &[Decimal], prices: &[Decimal]) -> Decimal {
    shares.iter().zip(prices.iter()).map(|(s, p)| s * p).sum()
}

/// value_i / total_value for each position.
pub fn current_weights(shares: &[Decimal], prices: &[Decimal]) -> QpoResult<Vec<f64>> {
    validate_holding(shares, prices)?;
    let total = portfolio_value(shares, prices);
    if total <= Decimal::ZERO {
        return Err(QpoError::ZeroPortfolioValue);
    }
    shares
        .iter()
        .zip(prices.iter())
        .map(|(s, p)| to_f64(s * p / total, "current_weights"))
        .collect()
}

/// Build the trade list that moves `current_shares` to `target_weights`.
///
/// `target_shares = w * total_value / price`, rounded to six decimal places.
/// A share delta within `+/- min_trade` is a HOLD.
#[allow(clippy::needless_range_loop)]
pub fn reconcile(
    tickers: &[Ticker],
    target_weights: &[f64],
    current_shares: &[Decimal],
    prices: &[Decimal],
    min_trade: Decimal,
) -> QpoResult<RebalancePlan> {
    let n = tickers.len();
    for (field, len) in [
        ("target_weights", target_weights.len()),
        ("current_shares", current_shares.len()),
        ("prices", prices.len()),
    ] {
        if len != n {
            return Err(QpoError::DimensionMismatch {
                field: field.into(),
                expected: n,
                actual: len,
            });
        }
    }
    validate_holding(current_shares, prices)?;

    let total_value = portfolio_value(current_shares, prices);
    if total_value <= Decimal::ZERO {
        return Err(QpoError::ZeroPortfolioValue);
    }

    let mut trades = Vec::with_capacity(n);
    let mut gross = Decimal::ZERO;
    let mut traded: u32 = 0;

    for i in 0..n {
        let weight = Decimal::from_f64(target_weights[i]).ok_or_else(|| QpoError::InvalidInput {
            field: "target_weights".into(),
            reason: format!("weight {} for {} is not representable", target_weights[i], tickers[i]),
        })?;
        let price = prices[i];
        let current = current_shares[i];
        let target = (weight * total_value / price).round_dp(SHARE_DP);
        let delta = target - current;

        let action = if delta > min_trade {
            TradeAction::Buy
        } else if delta < -min_trade {
            TradeAction::Sell
        } else {
            TradeAction::Hold
        };
        let quantity = delta.abs();
        let trade_value = quantity * price;
        if action != TradeAction::Hold {
            traded += 1;
            gross += trade_value;
        }

        trades.push(TradeInstruction {
            ticker: tickers[i].clone(),
            current_shares: current,
            target_shares: target,
            action,
            quantity,
            trade_value,
        });
    }

    Ok(RebalancePlan {
        trades,
        total_value,
        gross_traded_value: gross,
        turnover: gross / total_value / dec!(2),
        positions_traded: traded,
        positions_unchanged: n as u32 - traded,
    })
}

fn validate_holding(shares: &[Decimal], prices: &[Decimal]) -> QpoResult<()> {
    if shares.len() != prices.len() {
        return Err(QpoError::DimensionMismatch {
            field: "prices".into(),
            expected: shares.len(),
            actual: prices.len(),
        });
    }
    if let Some(s) = shares.iter().find(|s| **s < Decimal::ZERO) {
        return Err(QpoError::InvalidInput {
            field: "shares".into(),
            reason: format!("negative share count {s}"),
        });
    }
    if let Some(p) = prices.iter().find(|p| **p <= Decimal::ZERO) {
        return Err(QpoError::InvalidInput {
            field: "prices".into(),
            reason: format!("price must be positive, got {p}"),
        });
    }
    Ok(())
}

fn to_f64(d: Decimal, field: &str) -> QpoResult<f64> {
    d.to_f64().ok_or_else(|| QpoError::InvalidInput {
        field: field.into(),
        reason: format!("{d} does not fit in f64"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tickers(names: &[&str]) -> Vec<Ticker> {
        names.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_current_weights_round_trip_is_all_hold() {
        let t = tickers(&["AAA", "BBB", "CCC"]);
        let shares = vec![dec!(10), dec!(25), dec!(4)];
        let prices = vec![dec!(150.25), dec!(42.10), dec!(310.00)];
        let w = current_weights(&shares, &prices).unwrap();
        let plan = reconcile(&t, &w, &shares, &prices, dec!(0.01)).unwrap();
        for trade in &plan.trades {
            assert_eq!(trade.action, TradeAction::Hold, "{}", trade.ticker);
            assert!(trade.quantity < dec!(0.01));
        }
        assert_eq!(plan.positions_traded, 0);
        assert_eq!(plan.positions_unchanged, 3);
    }

    #[test]
    fn test_zero_value_is_rejected() {
        let t = tickers(&["AAA", "BBB"]);
        let err = reconcile(
            &t,
            &[0.5, 0.5],
            &[dec!(0), dec!(0)],
            &[dec!(10), dec!(20)],
            dec!(0.01),
        )
        .unwrap_err();
        assert!(matches!(err, QpoError::ZeroPortfolioValue));
    }

    #[test]
    fn test_buy_and_sell() {
        // value 1000 + 1000 = 2000; target 25/75
        let t = tickers(&["AAA", "BBB"]);
        let plan = reconcile(
            &t,
            &[0.25, 0.75],
            &[dec!(10), dec!(50)],
            &[dec!(100), dec!(20)],
            dec!(0.01),
        )
        .unwrap();
        assert_eq!(plan.total_value, dec!(2000));

        let a = &plan.trades[0];
        assert_eq!(a.action, TradeAction::Sell);
        assert_eq!(a.target_shares, dec!(5));
        assert_eq!(a.quantity, dec!(5));
        assert_eq!(a.trade_value, dec!(500));

        let b = &plan.trades[1];
        assert_eq!(b.action, TradeAction::Buy);
        assert_eq!(b.target_shares, dec!(75));
        assert_eq!(b.quantity, dec!(25));
        assert_eq!(b.trade_value, dec!(500));

        assert_eq!(plan.gross_traded_value, dec!(1000));
        assert_eq!(plan.turnover, dec!(0.25));
    }

    #[test]
    fn test_threshold_marks_small_moves_as_hold() {
        let t = tickers(&["AAA", "BBB"]);
        // target for AAA is 10.005 shares, delta 0.005 < 0.01
        let plan = reconcile(
            &t,
            &[0.50025, 0.49975],
            &[dec!(10), dec!(10)],
            &[dec!(100), dec!(100)],
            dec!(0.01),
        )
        .unwrap();
        assert_eq!(plan.trades[0].action, TradeAction::Hold);
        assert_eq!(plan.trades[1].action, TradeAction::Hold);
    }

    #[test]
    fn test_bad_prices_and_shares() {
        let t = tickers(&["AAA"]);
        let err = reconcile(&t, &[1.0], &[dec!(1)], &[dec!(0)], dec!(0.01)).unwrap_err();
        assert!(matches!(err, QpoError::InvalidInput { .. }));
        let err = reconcile(&t, &[1.0], &[dec!(-1)], &[dec!(5)], dec!(0.01)).unwrap_err();
        assert!(matches!(err, QpoError::InvalidInput { .. }));
    }

    #[test]
    fn test_length_mismatch() {
        let t = tickers(&["AAA", "BBB"]);
        let err = reconcile(&t, &[1.0], &[dec!(1), dec!(1)], &[dec!(5), dec!(5)], dec!(0.01))
            .unwrap_err();
        assert!(matches!(err, QpoError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_action_serializes_uppercase() {
        let json = serde_json::to_string(&TradeAction::Buy).unwrap();
        assert_eq!(json, "\"BUY\"");
    }
}
