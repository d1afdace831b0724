use tracing::debug;

use crate::error::QpoError;
use crate::market_data::PriceTable;
use crate::QpoResult;

/// Daily simple returns, rows = trading days, columns aligned to the universe.
#[derive(Debug, Clone)]
pub struct ReturnSeries {
    pub rows: Vec<Vec<f64>>,
    pub n_assets: usize,
}

impl ReturnSeries {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column j as a contiguous vector.
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[j]).collect()
    }
}

/// Clean a price table and difference it into daily returns.
///
/// Gaps are forward-filled; an asset with no observation at all is a
/// `DataQuality` error. Rows still incomplete (leading gaps) are dropped, as
/// are rows producing a non-finite return. Fewer than `min_observations`
/// surviving rows is `InsufficientData`.
pub fn daily_returns(prices: &PriceTable, min_observations: usize) -> QpoResult<ReturnSeries> {
    if prices.is_empty() {
        return Err(QpoError::DataAvailability(
            "price table has no trading days".into(),
        ));
    }

    let filled = prices.forward_filled();
    let n = filled.n_assets();

    let empty: Vec<&str> = (0..n)
        .filter(|&j| filled.rows().iter().all(|row| row[j].is_none()))
        .map(|j| filled.tickers()[j].as_str())
        .collect();
    if !empty.is_empty() {
        return Err(QpoError::DataQuality(format!(
            "no usable prices after forward-fill for: {}",
            empty.join(", ")
        )));
    }

    let complete: Vec<Vec<f64>> = filled
        .rows()
        .iter()
        .filter_map(|row| row.iter().copied().collect::<Option<Vec<f64>>>())
        .collect();

    let dropped = filled.len() - complete.len();
    let rows: Vec<Vec<f64>> = complete
        .windows(2)
        .map(|w| {
            w[1].iter()
                .zip(w[0].iter())
                .map(|(cur, prev)| cur / prev - 1.0)
                .collect::<Vec<f64>>()
        })
        .filter(|r| r.iter().all(|v| v.is_finite()))
        .collect();

    debug!(
        trading_days = filled.len(),
        incomplete_rows = dropped,
        return_rows = rows.len(),
        "computed daily returns"
    );

    if rows.len() < min_observations {
        return Err(QpoError::InsufficientData {
            required: min_observations,
            available: rows.len(),
        });
    }

    Ok(ReturnSeries { rows, n_assets: n })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        (0..n).map(|i| start + Duration::days(i as i64)).collect()
    }

    #[test]
    fn test_simple_returns() {
        let table = PriceTable::from_columns(
            vec!["A".into()],
            dates(3),
            &[vec![100.0, 110.0, 99.0]],
        )
        .unwrap();
        let r = daily_returns(&table, 2).unwrap();
        assert_eq!(r.len(), 2);
        assert!((r.rows[0][0] - 0.10).abs() < 1e-12);
        assert!((r.rows[1][0] + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_leading_gap_rows_dropped() {
        let table = PriceTable::new(
            vec!["A".into(), "B".into()],
            dates(4),
            vec![
                vec![Some(10.0), None],
                vec![Some(11.0), Some(20.0)],
                vec![Some(12.0), None],
                vec![Some(13.0), Some(22.0)],
            ],
        )
        .unwrap();
        let r = daily_returns(&table, 1).unwrap();
        // first row incomplete; forward-fill covers the interior gap
        assert_eq!(r.len(), 2);
        assert_eq!(r.rows[0][1], 0.0);
        assert!((r.rows[1][1] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_all_missing_asset_is_quality_error() {
        let table = PriceTable::new(
            vec!["A".into(), "B".into()],
            dates(3),
            vec![
                vec![Some(10.0), None],
                vec![Some(11.0), None],
                vec![Some(12.0), None],
            ],
        )
        .unwrap();
        let err = daily_returns(&table, 1).unwrap_err();
        assert!(matches!(err, QpoError::DataQuality(_)));
    }

    #[test]
    fn test_insufficient_history() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let table = PriceTable::from_columns(vec!["A".into()], dates(30), &[prices]).unwrap();
        match daily_returns(&table, 30).unwrap_err() {
            QpoError::InsufficientData {
                required,
                available,
            } => {
                assert_eq!(required, 30);
                assert_eq!(available, 29);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
