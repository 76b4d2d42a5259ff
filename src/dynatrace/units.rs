//! Conversion of vendor-native units into the canonical units consumers
//! expect: milliseconds for durations, KiB for sizes.

/// Scales a raw metric value. Response-time metrics always report
/// microseconds even when the unit field is absent, so the metric id is
/// checked as well.
pub fn scale_value(metric_id: &str, unit: &str, value: f64) -> f64 {
    if unit == "MicroSecond" || metric_id.contains("builtin:service.response.time") {
        return value / 1000.0;
    }
    if unit == "Byte" {
        return value / 1024.0;
    }
    value
}
