use serde_json::Value;
use tabled::{builder::Builder, Table};

use super::{format_value, optimization_section, STRATEGIES};

/// Format output as tables using the tabled crate.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(result) = map.get("result") {
                print_result_tables(result);
                print_envelope_notes(map);
            } else {
                print_flat_object(value);
            }
        }
        _ => println!("{}", value),
    }
}

fn print_result_tables(result: &Value) {
    print_flat_object(result);

    if let Some(Value::Array(plans)) = result.get("plans") {
        for plan in plans {
            print_trades(plan);
        }
    }

    let section = optimization_section(result);
    if section.get("classical").is_some() {
        print_strategy_summary(section);
        print_allocations(section);
    } else if section.get("expected_returns").is_some() {
        print_estimates(section);
    }
}

/// Scalar fields only; nested sections get their own tables.
fn print_flat_object(value: &Value) {
    if let Value::Object(map) = value {
        let mut builder = Builder::default();
        builder.push_record(["Field", "Value"]);
        let mut rows = 0;
        for (key, val) in map {
            if val.is_object() || val.is_array() {
                continue;
            }
            builder.push_record([key.as_str(), &format_value(val)]);
            rows += 1;
        }
        if rows > 0 {
            println!("{}", Table::from(builder));
        }
    }
}

fn print_strategy_summary(section: &Value) {
    let mut builder = Builder::default();
    builder.push_record(["Strategy", "Return", "Risk", "Sharpe", "HHI"]);
    for name in STRATEGIES {
        let Some(report) = section.get(name) else {
            continue;
        };
        let metric = |path: &str| report.pointer(path).map(format_value).unwrap_or_default();
        builder.push_record([
            name.to_string(),
            metric("/metrics/expected_return"),
            metric("/metrics/risk"),
            metric("/metrics/sharpe_ratio"),
            metric("/concentration_hhi"),
        ]);
    }
    println!("\n{}", Table::from(builder));
}

fn print_allocations(section: &Value) {
    let present: Vec<&str> = STRATEGIES
        .iter()
        .copied()
        .filter(|s| section.get(*s).is_some())
        .collect();
    let Some(first) = section
        .pointer("/classical/allocation")
        .and_then(Value::as_array)
    else {
        return;
    };

    let mut header = vec!["Ticker".to_string()];
    header.extend(present.iter().map(|s| s.to_string()));
    let mut builder = Builder::default();
    builder.push_record(header);

    for (i, entry) in first.iter().enumerate() {
        let mut row = vec![entry.get("ticker").map(format_value).unwrap_or_default()];
        for s in &present {
            let w = section
                .pointer(&format!("/{s}/allocation/{i}/weight"))
                .and_then(Value::as_f64)
                .map(|w| format!("{:.4}", w))
                .unwrap_or_default();
            row.push(w);
        }
        builder.push_record(row);
    }
    println!("\n{}", Table::from(builder));
}

fn print_trades(plan: &Value) {
    let strategy = plan.get("strategy").map(format_value).unwrap_or_default();
    let Some(trades) = plan.pointer("/plan/trades").and_then(Value::as_array) else {
        return;
    };

    let cols = ["ticker", "action", "current_shares", "target_shares", "quantity", "trade_value"];
    let mut builder = Builder::default();
    builder.push_record(cols);
    for trade in trades {
        builder.push_record(cols.map(|c| trade.get(c).map(format_value).unwrap_or_default()));
    }
    println!("\nTrades ({}):\n{}", strategy, Table::from(builder));
}

fn print_estimates(estimates: &Value) {
    let tickers = estimates.get("tickers").and_then(Value::as_array);
    let mu = estimates.get("expected_returns").and_then(Value::as_array);
    let sigma = estimates.get("covariance_matrix").and_then(Value::as_array);
    let (Some(tickers), Some(mu), Some(sigma)) = (tickers, mu, sigma) else {
        return;
    };

    let mut builder = Builder::default();
    builder.push_record(["Ticker", "Expected return", "Volatility"]);
    for (i, (t, m)) in tickers.iter().zip(mu.iter()).enumerate() {
        let vol = sigma
            .get(i)
            .and_then(|row| row.get(i))
            .and_then(Value::as_f64)
            .map(|v| format!("{:.6}", v.max(0.0).sqrt()))
            .unwrap_or_default();
        builder.push_record([format_value(t), format_value(m), vol]);
    }
    println!("\n{}", Table::from(builder));
}

fn print_envelope_notes(envelope: &serde_json::Map<String, Value>) {
    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings {
                if let Value::String(s) = w {
                    println!("  - {}", s);
                }
            }
        }
    }

    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}
