//! Entry to row mapping for structured routes

use contracts::{FieldAccess, MeasureValue, MetricField, MetricType, Route, Row};

/// Rows produced from one entry
#[derive(Debug, Default, PartialEq)]
pub struct EntryRows {
    pub rows: Vec<Row>,
    /// Configured metrics that were absent or not coercible
    pub skipped_metrics: usize,
}

/// Map one entry to one row per configured metric.
///
/// Returns `None` when none of the route's dimension keys resolve; such an
/// entry cannot be attributed and is dropped by the caller.
pub fn entry_rows<E: FieldAccess>(route: &Route, entry: &E, time: i64) -> Option<EntryRows> {
    let dimensions: Vec<(String, String)> = route
        .dimensions
        .iter()
        .filter_map(|key| {
            entry
                .get_str(key)
                .filter(|value| !value.is_empty())
                .map(|value| (key.clone(), value))
        })
        .collect();

    if dimensions.is_empty() {
        return None;
    }

    let mut out = EntryRows::default();
    for metric in &route.metrics {
        match measure_value(entry, metric) {
            Some(value) => out.rows.push(Row {
                dimensions: dimensions.clone(),
                measure: metric.name.clone(),
                value,
                time,
            }),
            None => out.skipped_metrics += 1,
        }
    }
    Some(out)
}

fn measure_value<E: FieldAccess>(entry: &E, metric: &MetricField) -> Option<MeasureValue> {
    match metric.kind {
        MetricType::Bigint => entry.get_i64(&metric.name).map(MeasureValue::Bigint),
        MetricType::Boolean => entry.get_bool(&metric.name).map(MeasureValue::Boolean),
        MetricType::Double => entry
            .get_f64(&metric.name)
            .filter(|v| v.is_finite())
            .map(MeasureValue::Double),
        MetricType::Varchar => entry.get_str(&metric.name).map(MeasureValue::Varchar),
    }
}
