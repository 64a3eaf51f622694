//! Unit conversions for inbound measurements
//!
//! Providers report in whatever unit their API favors; signals declare a
//! canonical unit in the registry and processors convert on the way in.

/// Convert `value` between two named units. Unknown pairs and identical
/// units pass through unchanged.
pub fn convert_unit(value: f64, from_unit: &str, to_unit: &str) -> f64 {
    let from = from_unit.to_ascii_lowercase();
    let to = to_unit.to_ascii_lowercase();
    if from == to {
        return value;
    }

    match (from.as_str(), to.as_str()) {
        // Distance
        ("meters", "kilometers") => value / 1000.0,
        ("kilometers", "meters") => value * 1000.0,
        ("miles", "kilometers") => value * 1.60934,
        ("kilometers", "miles") => value / 1.60934,
        ("feet", "meters") => value * 0.3048,
        ("meters", "feet") => value / 0.3048,

        // Temperature
        ("celsius", "fahrenheit") => value * 9.0 / 5.0 + 32.0,
        ("fahrenheit", "celsius") => (value - 32.0) * 5.0 / 9.0,

        // Speed
        ("m/s", "km/h") => value * 3.6,
        ("km/h", "m/s") => value / 3.6,
        ("mph", "km/h") => value * 1.60934,
        ("km/h", "mph") => value / 1.60934,

        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_conversion() {
        assert!((convert_unit(1.0, "m/s", "km/h") - 3.6).abs() < 1e-9);
        assert!((convert_unit(3.6, "km/h", "m/s") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_identity_and_unknown() {
        assert_eq!(convert_unit(5.0, "bpm", "bpm"), 5.0);
        assert_eq!(convert_unit(5.0, "bpm", "lux"), 5.0);
    }

    #[test]
    fn test_temperature() {
        assert!((convert_unit(0.0, "celsius", "fahrenheit") - 32.0).abs() < 1e-9);
    }
}
