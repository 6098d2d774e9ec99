//! Textual-to-typed conversion
//!
//! Rows arrive as text. Types with a converter are coerced at ingestion;
//! dates are normalized wherever they are validated.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Number, Value as Json};

use crate::templates::FieldType;

/// Date sentinel resolved to the current instant
pub const NOW: &str = "now";

pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parse a timestamp. Offset-less forms are read as UTC.
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// `now` or a parseable timestamp, normalized to RFC 3339 UTC.
pub fn normalize_date(input: &str) -> Option<String> {
    if input == NOW {
        return Some(now_timestamp());
    }
    parse_timestamp(input).map(format_timestamp)
}

/// Whether ingestion coerces cells of this type
pub fn has_converter(field_type: FieldType) -> bool {
    matches!(field_type, FieldType::Number | FieldType::Boolean)
}

/// Coerce a cell for a field of `field_type`. `None` means the cell is unusable.
pub fn convert_cell(field_type: FieldType, cell: &str) -> Option<Json> {
    match field_type {
        FieldType::Number => to_number(cell).map(Json::Number),
        FieldType::Boolean => to_bool(cell).map(Json::Bool),
        _ => Some(Json::String(cell.to_string())),
    }
}

fn to_number(cell: &str) -> Option<Number> {
    let cell = cell.trim();
    if let Ok(i) = cell.parse::<i64>() {
        return Some(i.into());
    }
    cell.parse::<f64>().ok().and_then(Number::from_f64)
}

fn to_bool(cell: &str) -> Option<bool> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_conversion() {
        assert_eq!(convert_cell(FieldType::Number, "42"), Some(json!(42)));
        assert_eq!(convert_cell(FieldType::Number, " 3.5 "), Some(json!(3.5)));
        assert_eq!(convert_cell(FieldType::Number, "forty-two"), None);
        assert_eq!(convert_cell(FieldType::Number, "NaN"), None);
    }

    #[test]
    fn test_boolean_conversion() {
        assert_eq!(convert_cell(FieldType::Boolean, "TRUE"), Some(json!(true)));
        assert_eq!(convert_cell(FieldType::Boolean, "no"), Some(json!(false)));
        assert_eq!(convert_cell(FieldType::Boolean, "maybe"), None);
    }

    #[test]
    fn test_text_types_pass_through() {
        assert!(!has_converter(FieldType::String));
        assert_eq!(convert_cell(FieldType::Date, "now"), Some(json!("now")));
    }

    #[test]
    fn test_timestamp_forms() {
        assert_eq!(normalize_date("2024-03-01").as_deref(), Some("2024-03-01T00:00:00Z"));
        assert_eq!(
            normalize_date("2024-03-01T10:30:00+02:00").as_deref(),
            Some("2024-03-01T08:30:00Z")
        );
        assert_eq!(normalize_date("2024-03-01T10:30:00.250").as_deref(), Some("2024-03-01T10:30:00.250Z"));
        assert_eq!(normalize_date("yesterday-ish"), None);
        assert_eq!(normalize_date("2024-02-30"), None);
    }

    #[test]
    fn test_normalization_is_stable() {
        let once = normalize_date("now").unwrap();
        assert_eq!(normalize_date(&once).as_deref(), Some(once.as_str()));
    }
}
