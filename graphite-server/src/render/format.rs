//! Serialization of render responses.

use std::fmt::Write;

use graphite_metrics::{FormatValue, Metrics};

/// Writes one line per series: `name,from,until,step|v1,...,vn`.
///
/// Data points are sorted first and series without data points are skipped. The step is the
/// distance between the first two data points, or `0` for a single point.
pub fn raw(metrics: &mut [Metrics]) -> String {
    let mut out = String::new();

    for series in metrics {
        series.sort_data_points();

        let points = series.data_points();
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            continue;
        };

        let step = points
            .get(1)
            .map_or(0, |second| (second.timestamp() - first.timestamp()).as_secs());

        write!(
            out,
            "{},{},{},{step}|",
            series.name(),
            first.timestamp(),
            last.timestamp()
        )
        .ok();

        for (index, point) in points.iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            write!(out, "{}", FormatValue(point.value())).ok();
        }

        out.push('\n');
    }

    out
}

/// Writes one row per data point: `name,YYYYMMDD HH:MM:SS,value`.
///
/// Data points are written in the order the listener returned them.
pub fn csv(metrics: &[Metrics]) -> String {
    let mut out = String::new();

    for series in metrics {
        for point in series.data_points() {
            writeln!(out, "{},{}", series.name(), point.csv_string()).ok();
        }
    }

    out
}

/// Writes `[{"target": name, "datapoints": [[value, timestamp], ...]}, ...]`.
///
/// Values keep six fractional digits. Values without a JSON representation (`NaN` and the
/// infinities) are written as `null`.
pub fn json(metrics: &[Metrics]) -> Result<String, serde_json::Error> {
    let mut out = String::from("[");

    for (index, series) in metrics.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }

        out.push_str("{\"target\":");
        out.push_str(&serde_json::to_string(series.name())?);
        out.push_str(",\"datapoints\":[");

        for (index, point) in series.data_points().iter().enumerate() {
            if index > 0 {
                out.push(',');
            }

            let value = point.value();
            if value.is_finite() {
                write!(out, "[{}", FormatValue(value)).ok();
            } else {
                out.push_str("[null");
            }
            write!(out, ",{}]", point.timestamp()).ok();
        }

        out.push_str("]}");
    }

    out.push(']');
    Ok(out)
}
