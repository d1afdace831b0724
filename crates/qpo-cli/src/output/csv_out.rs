use serde_json::Value;
use std::io;

use super::{format_value, optimization_section, STRATEGIES};

/// Write output as CSV to stdout.
///
/// Rebalance results become one row per trade, optimization results one row
/// per strategy and ticker, estimates one row per ticker. Anything else is a
/// two-column field,value listing.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());
    let result = value.get("result").unwrap_or(value);

    if let Some(Value::Array(plans)) = result.get("plans") {
        write_trades(&mut wtr, plans);
    } else if optimization_section(result).get("classical").is_some() {
        write_allocations(&mut wtr, optimization_section(result));
    } else if result.get("expected_returns").is_some() {
        write_estimates(&mut wtr, result);
    } else if let Value::Object(map) = result {
        let _ = wtr.write_record(["field", "value"]);
        for (key, val) in map {
            let _ = wtr.write_record([key.as_str(), &format_value(val)]);
        }
    } else {
        let _ = wtr.write_record([&format_value(result)]);
    }

    let _ = wtr.flush();
}

type Out<'a> = csv::Writer<io::StdoutLock<'a>>;

fn write_trades(wtr: &mut Out<'_>, plans: &[Value]) {
    let cols = [
        "ticker",
        "current_shares",
        "target_shares",
        "action",
        "quantity",
        "trade_value",
    ];
    let mut header = vec!["strategy"];
    header.extend(cols);
    let _ = wtr.write_record(&header);

    for plan in plans {
        let strategy = plan.get("strategy").map(format_value).unwrap_or_default();
        let trades = plan.pointer("/plan/trades").and_then(Value::as_array);
        for trade in trades.into_iter().flatten() {
            let mut row = vec![strategy.clone()];
            row.extend(
                cols.iter()
                    .map(|c| trade.get(*c).map(format_value).unwrap_or_default()),
            );
            let _ = wtr.write_record(&row);
        }
    }
}

fn write_allocations(wtr: &mut Out<'_>, section: &Value) {
    let _ = wtr.write_record(["strategy", "ticker", "weight"]);
    for name in STRATEGIES {
        let allocation = section
            .get(name)
            .and_then(|s| s.get("allocation"))
            .and_then(Value::as_array);
        for a in allocation.into_iter().flatten() {
            let _ = wtr.write_record([
                name.to_string(),
                a.get("ticker").map(format_value).unwrap_or_default(),
                a.get("weight").map(format_value).unwrap_or_default(),
            ]);
        }
    }
}

fn write_estimates(wtr: &mut Out<'_>, estimates: &Value) {
    let tickers = estimates.get("tickers").and_then(Value::as_array);
    let mu = estimates.get("expected_returns").and_then(Value::as_array);
    let sigma = estimates.get("covariance_matrix").and_then(Value::as_array);
    let (Some(tickers), Some(mu), Some(sigma)) = (tickers, mu, sigma) else {
        return;
    };

    let mut header = vec!["ticker".to_string(), "expected_return".to_string()];
    header.extend(tickers.iter().map(format_value));
    let _ = wtr.write_record(&header);

    for ((t, m), row) in tickers.iter().zip(mu.iter()).zip(sigma.iter()) {
        let mut record = vec![format_value(t), format_value(m)];
        if let Value::Array(cells) = row {
            record.extend(cells.iter().map(format_value));
        }
        let _ = wtr.write_record(&record);
    }
}
