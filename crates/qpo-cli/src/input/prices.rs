use chrono::NaiveDate;
use std::path::Path;

use qpo_core::market_data::{InMemoryPriceSource, PriceSource, PriceTable};
use qpo_core::{QpoResult, Ticker};

use super::file::resolve_path;

/// Wide price file: `date,TICKER1,TICKER2,...`, one row per trading day.
/// Empty cells are missing observations. Rows may come in any order.
pub struct CsvPriceSource {
    inner: InMemoryPriceSource,
}

impl CsvPriceSource {
    pub fn from_path(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let canonical = resolve_path(path)?;
        let table = read_price_table(&canonical)?;
        tracing::debug!(
            file = %canonical.display(),
            assets = table.n_assets(),
            days = table.len(),
            "loaded price file"
        );
        Ok(Self {
            inner: InMemoryPriceSource::new(table),
        })
    }
}

impl PriceSource for CsvPriceSource {
    fn fetch_prices(
        &self,
        tickers: &[Ticker],
        start: NaiveDate,
        end: NaiveDate,
    ) -> QpoResult<PriceTable> {
        self.inner.fetch_prices(tickers, start, end)
    }
}

fn read_price_table(path: &Path) -> Result<PriceTable, Box<dyn std::error::Error>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;

    let headers = rdr.headers()?.clone();
    let tickers: Vec<Ticker> = headers.iter().skip(1).map(|h| h.to_string()).collect();
    if tickers.is_empty() {
        return Err(format!("{}: expected a date column followed by ticker columns", path.display()).into());
    }

    let mut records: Vec<(NaiveDate, Vec<Option<f64>>)> = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let raw_date = record.get(0).unwrap_or_default();
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d")
            .map_err(|e| format!("row {}: bad date '{}': {}", line + 2, raw_date, e))?;
        let mut row = Vec::with_capacity(tickers.len());
        for j in 0..tickers.len() {
            let cell = record.get(j + 1).unwrap_or_default();
            let price = if cell.is_empty() {
                None
            } else {
                Some(cell.parse::<f64>().map_err(|e| {
                    format!("row {}: bad price '{}' for {}: {}", line + 2, cell, tickers[j], e)
                })?)
            };
            row.push(price);
        }
        records.push((date, row));
    }
    records.sort_by_key(|(d, _)| *d);

    let (dates, rows) = records.into_iter().unzip();
    Ok(PriceTable::new(tickers, dates, rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("qpo-{}-{name}.csv", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_reads_wide_csv_with_gaps() {
        let path = write_temp(
            "gaps",
            "date,AAA,BBB\n2024-01-03,11.0,\n2024-01-02,10.0,20.0\n",
        );
        let table = read_price_table(&path).unwrap();
        assert_eq!(table.tickers(), &["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0], vec![Some(10.0), Some(20.0)]);
        assert_eq!(table.rows()[1], vec![Some(11.0), None]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_rejects_bad_price() {
        let path = write_temp("bad", "date,AAA\n2024-01-02,abc\n");
        assert!(read_price_table(&path).is_err());
        std::fs::remove_file(path).ok();
    }
}
