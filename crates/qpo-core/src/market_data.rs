use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::QpoError;
use crate::types::Ticker;
use crate::QpoResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Adjusted-close prices: one row per trading date, one column per ticker.
///
/// Missing observations are `None`. Non-finite and non-positive prices are
/// treated as missing on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPriceTable")]
pub struct PriceTable {
    tickers: Vec<Ticker>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<Option<f64>>>,
}

/// Wire shape of a `PriceTable`; checked by `PriceTable::new` on the way in.
#[derive(Deserialize)]
struct RawPriceTable {
    tickers: Vec<Ticker>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<Option<f64>>>,
}

impl TryFrom<RawPriceTable> for PriceTable {
    type Error = QpoError;

    fn try_from(raw: RawPriceTable) -> QpoResult<Self> {
        Self::new(raw.tickers, raw.dates, raw.rows)
    }
}

/// The market-data collaborator. Implementations own retrieval, retries and
/// caching; the engine calls this once per request.
pub trait PriceSource {
    fn fetch_prices(
        &self,
        tickers: &[Ticker],
        start: NaiveDate,
        end: NaiveDate,
    ) -> QpoResult<PriceTable>;
}

/// A price source backed by a table already in memory.
#[derive(Debug, Clone)]
pub struct InMemoryPriceSource {
    table: PriceTable,
}

// ---------------------------------------------------------------------------
// PriceTable
// ---------------------------------------------------------------------------

impl PriceTable {
    pub fn new(
        tickers: Vec<Ticker>,
        dates: Vec<NaiveDate>,
        rows: Vec<Vec<Option<f64>>>,
    ) -> QpoResult<Self> {
        validate_universe(&tickers)?;

        if rows.len() != dates.len() {
            return Err(QpoError::DimensionMismatch {
                field: "price rows".into(),
                expected: dates.len(),
                actual: rows.len(),
            });
        }
        for row in &rows {
            if row.len() != tickers.len() {
                return Err(QpoError::DimensionMismatch {
                    field: "price columns".into(),
                    expected: tickers.len(),
                    actual: row.len(),
                });
            }
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(QpoError::InvalidInput {
                field: "dates".into(),
                reason: "trading dates must be strictly ascending".into(),
            });
        }

        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|p| p.filter(|v| v.is_finite() && *v > 0.0))
                    .collect()
            })
            .collect();

        Ok(Self {
            tickers,
            dates,
            rows,
        })
    }

    /// Build from complete columns (one price series per ticker, no gaps).
    pub fn from_columns(
        tickers: Vec<Ticker>,
        dates: Vec<NaiveDate>,
        columns: &[Vec<f64>],
    ) -> QpoResult<Self> {
        if columns.len() != tickers.len() {
            return Err(QpoError::DimensionMismatch {
                field: "price columns".into(),
                expected: tickers.len(),
                actual: columns.len(),
            });
        }
        let mut rows = Vec::with_capacity(dates.len());
        for t in 0..dates.len() {
            let mut row = Vec::with_capacity(columns.len());
            for col in columns {
                row.push(col.get(t).copied());
            }
            rows.push(row);
        }
        Self::new(tickers, dates, rows)
    }

    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    pub fn n_assets(&self) -> usize {
        self.tickers.len()
    }

    /// Number of trading dates.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Reorder/subset columns to the requested universe.
    pub fn select(&self, tickers: &[Ticker]) -> QpoResult<PriceTable> {
        validate_universe(tickers)?;
        let mut idx = Vec::with_capacity(tickers.len());
        let mut missing = Vec::new();
        for t in tickers {
            match self.tickers.iter().position(|have| have == t) {
                Some(i) => idx.push(i),
                None => missing.push(t.as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(QpoError::DataAvailability(format!(
                "no price history for: {}",
                missing.join(", ")
            )));
        }
        let rows = self
            .rows
            .iter()
            .map(|row| idx.iter().map(|&i| row[i]).collect())
            .collect();
        Ok(PriceTable {
            tickers: tickers.to_vec(),
            dates: self.dates.clone(),
            rows,
        })
    }

    /// Rows with `start <= date <= end`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> PriceTable {
        let (dates, rows) = self
            .dates
            .iter()
            .zip(self.rows.iter())
            .filter(|(d, _)| **d >= start && **d <= end)
            .map(|(d, r)| (*d, r.clone()))
            .unzip();
        PriceTable {
            tickers: self.tickers.clone(),
            dates,
            rows,
        }
    }

    /// Carry the last observed price forward over gaps. Leading gaps remain.
    pub fn forward_filled(&self) -> PriceTable {
        let mut last: Vec<Option<f64>> = vec![None; self.n_assets()];
        let rows = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(j, p)| {
                        if p.is_some() {
                            last[j] = *p;
                        }
                        last[j]
                    })
                    .collect()
            })
            .collect();
        PriceTable {
            tickers: self.tickers.clone(),
            dates: self.dates.clone(),
            rows,
        }
    }

    /// Latest observed price per ticker.
    pub fn latest_prices(&self) -> QpoResult<Vec<f64>> {
        (0..self.n_assets())
            .map(|j| {
                self.rows
                    .iter()
                    .rev()
                    .find_map(|row| row[j])
                    .ok_or_else(|| {
                        QpoError::DataQuality(format!(
                            "no observed price for {}",
                            self.tickers[j]
                        ))
                    })
            })
            .collect()
    }
}

/// Tickers must be non-empty and unique; order is kept as given.
pub fn validate_universe(tickers: &[Ticker]) -> QpoResult<()> {
    if tickers.is_empty() {
        return Err(QpoError::InvalidInput {
            field: "tickers".into(),
            reason: "at least one ticker required".into(),
        });
    }
    let mut seen = HashSet::with_capacity(tickers.len());
    for t in tickers {
        if t.trim().is_empty() {
            return Err(QpoError::InvalidInput {
                field: "tickers".into(),
                reason: "empty ticker".into(),
            });
        }
        if !seen.insert(t.as_str()) {
            return Err(QpoError::InvalidInput {
                field: "tickers".into(),
                reason: format!("duplicate ticker {t}"),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// InMemoryPriceSource
// ---------------------------------------------------------------------------

impl InMemoryPriceSource {
    pub fn new(table: PriceTable) -> Self {
        Self { table }
    }
}

impl PriceSource for InMemoryPriceSource {
    fn fetch_prices(
        &self,
        tickers: &[Ticker],
        start: NaiveDate,
        end: NaiveDate,
    ) -> QpoResult<PriceTable> {
        if start > end {
            return Err(QpoError::InvalidInput {
                field: "start_date".into(),
                reason: format!("{start} is after end date {end}"),
            });
        }
        let table = self.table.select(tickers)?.between(start, end);
        if table.is_empty() {
            return Err(QpoError::DataAvailability(format!(
                "no prices between {start} and {end}"
            )));
        }
        Ok(table)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
