//! Vector helpers shared by calibration, sources and the wire protocols.
//!
//! Every inertial axis triple in the daemon is a `Vec3`. On the wire a triple
//! is a JSON array `[x, y, z]`; elements may be numbers or numeric strings.

use nalgebra::Vector3;
use serde_json::Value;

pub type Vec3 = Vector3<f64>;

pub const AXES: usize = 3;

/// Parse one JSON scalar as `f64`, accepting numeric strings.
pub fn number_from_json(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Parse `[x, y, z, ...]` into a vector. Extra elements are ignored; fewer
/// than three, or any non-numeric element among the first three, yields `None`.
pub fn vec3_from_json(value: &Value) -> Option<Vec3> {
    let items = value.as_array()?;
    if items.len() < AXES {
        return None;
    }
    let x = number_from_json(&items[0])?;
    let y = number_from_json(&items[1])?;
    let z = number_from_json(&items[2])?;
    Some(Vec3::new(x, y, z))
}

pub fn vec3_to_array(v: &Vec3) -> [f64; AXES] {
    [v.x, v.y, v.z]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_numbers_and_numeric_strings() {
        let v = vec3_from_json(&json!([1, "2.5", -3.0])).unwrap();
        assert_eq!(v, Vec3::new(1.0, 2.5, -3.0));
    }

    #[test]
    fn test_ignores_extra_elements() {
        let v = vec3_from_json(&json!([1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(v, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_rejects_short_or_non_numeric() {
        assert!(vec3_from_json(&json!([1.0, 2.0])).is_none());
        assert!(vec3_from_json(&json!([1.0, "x", 3.0])).is_none());
        assert!(vec3_from_json(&json!([1.0, null, 3.0])).is_none());
        assert!(vec3_from_json(&json!({"x": 1.0})).is_none());
        assert!(vec3_from_json(&json!("1,2,3")).is_none());
    }
}
