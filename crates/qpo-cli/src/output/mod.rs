pub mod csv_out;
pub mod json;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::Value;

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => json::print_json(value),
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// Strategy sections of an optimization result, in display order.
pub const STRATEGIES: [&str; 3] = ["classical", "heuristic", "subset"];

/// The optimization part of a result, whether it came from `optimize`
/// (top level) or `rebalance` (nested under `optimization`).
pub fn optimization_section(result: &Value) -> &Value {
    result.get("optimization").unwrap_or(result)
}

/// Render a scalar for a single cell.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
