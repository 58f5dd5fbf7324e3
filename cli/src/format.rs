//! Table rendering for `get-info`.
//!
//! Property `definition` strings are vendor JSON describing enum options or a
//! unit. They are interpreted here only, for display.

use serde_json::Value;
use wire::PropertyRecord;

const ID_WIDTH: usize = 4;
const MIN_KEY_WIDTH: usize = 20;
const NAME_WIDTH: usize = 30;
const VALUE_WIDTH: usize = 30;
const RAW_WIDTH: usize = 10;

/// English names for known property keys.
const PROPERTY_NAMES: &[(&str, &str)] = &[
    ("solar_model_type", "Device type"),
    ("dianya", "Battery voltage"),
    ("cddl", "Charging current"),
    ("fddl", "Discharge current"),
    ("temperature", "Temperature"),
    ("solar_status", "Solar panel status"),
    ("work_status", "Load status"),
    ("power_status", "Wind power status"),
    ("total_power", "Total energy recharged"),
    ("total_power_num", "Energy reset count"),
    ("battery_type", "Battery type"),
    ("timing_hour", "Timer hours"),
    ("timing_min", "Timer minutes"),
    ("cm_voltage", "Floating voltage"),
    ("output_mode", "Mode"),
    ("jz_voltage", "Cutoff voltage"),
    ("fz_output", "Output status"),
    ("voltage_monitor_selected", "Battery voltage detection"),
    ("hf_out_voltage", "Restore discharge voltage"),
];

/// Display name for `unikey`, falling back to the key itself.
pub fn human_name(unikey: &str) -> &str {
    PROPERTY_NAMES
        .iter()
        .find(|(key, _)| *key == unikey)
        .map_or(unikey, |&(_, name)| name)
}

/// Raw value decorated from the record's definition: a unit suffix for
/// ranges, the option title for enums, or the raw value unchanged.
pub fn friendly_value(record: &PropertyRecord) -> String {
    let raw = record.value.to_string();
    let Ok(definition) = serde_json::from_str::<Value>(record.definition()) else {
        return raw;
    };
    let options = match &definition {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect::<Vec<_>>(),
        Value::Object(map) => vec![map],
        _ => return raw,
    };

    let unit = options.iter().find_map(|option| {
        let title = option.get("title").and_then(Value::as_str)?;
        if title == "单位" || title == "unit" { option.get("value").and_then(text) } else { None }
    });
    if let Some(unit) = unit {
        if record.unikey() == "temperature" {
            return format!("{raw} °C");
        }
        return format!("{raw} {unit}");
    }

    let label = options.iter().find_map(|option| {
        if option.get("value").and_then(text).as_deref() != Some(raw.as_str()) {
            return None;
        }
        option
            .get("en_title")
            .and_then(Value::as_str)
            .or_else(|| option.get("title").and_then(Value::as_str))
    });
    match label {
        Some(label) => format!("{label} ({raw})"),
        None => raw,
    }
}

/// Render records as a fixed-width table.
pub fn render_table(records: &[PropertyRecord]) -> String {
    if records.is_empty() {
        return "No information available".to_owned();
    }

    let key_width = records
        .iter()
        .map(|record| record.unikey().chars().count())
        .max()
        .unwrap_or(0)
        .max(MIN_KEY_WIDTH);
    let (id_width, name_width, value_width, raw_width) = (ID_WIDTH, NAME_WIDTH, VALUE_WIDTH, RAW_WIDTH);
    let separator = "-".repeat(id_width + key_width + name_width + value_width + raw_width + 12);

    let mut lines = vec![
        separator.clone(),
        format!(
            "{:<id_width$} | {:<key_width$} | {:<name_width$} | {:<value_width$} | {:<raw_width$}",
            "ID", "Property Key", "Human Name", "Value", "Raw Value"
        ),
        separator.clone(),
    ];
    for record in records {
        lines.push(format!(
            "{:>id_width$} | {:<key_width$} | {:<name_width$} | {:<value_width$} | {:<raw_width$}",
            record.property_id,
            record.unikey(),
            human_name(record.unikey()),
            friendly_value(record),
            record.value.to_string(),
        ));
    }
    lines.push(separator);
    lines.join("\n")
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "format_test.rs"]
mod tests;
