//! Weighted averaging of numeric and flat-JSON score responses.

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// A response that can be averaged.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericValue {
    Scalar(f64),
    /// Flat object whose values are all numbers.
    Object(BTreeMap<String, f64>),
}

impl NumericValue {
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if let Ok(v) = trimmed.parse::<f64>() {
            return v.is_finite().then_some(NumericValue::Scalar(v));
        }
        match serde_json::from_str::<Value>(trimmed).ok()? {
            Value::Number(n) => n.as_f64().map(NumericValue::Scalar),
            Value::Object(map) if !map.is_empty() => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k, v.as_f64()?);
                }
                Some(NumericValue::Object(out))
            }
            _ => None,
        }
    }
}

/// Weighted mean of `values`. Weights are renormalized over the inputs, so
/// they need not sum to one. `None` when shapes disagree (scalar vs object,
/// or objects with different keys) or the total weight is zero.
pub fn weighted_average(values: &[(NumericValue, f64)]) -> Option<NumericValue> {
    let total: f64 = values.iter().map(|(_, w)| *w).sum();
    if values.is_empty() || total <= 0.0 || !total.is_finite() {
        return None;
    }
    match &values[0].0 {
        NumericValue::Scalar(_) => {
            let mut acc = 0.0;
            for (v, w) in values {
                match v {
                    NumericValue::Scalar(x) => acc += x * w,
                    NumericValue::Object(_) => return None,
                }
            }
            Some(NumericValue::Scalar(acc / total))
        }
        NumericValue::Object(first) => {
            let mut acc: BTreeMap<String, f64> = first.keys().map(|k| (k.clone(), 0.0)).collect();
            for (v, w) in values {
                let NumericValue::Object(obj) = v else {
                    return None;
                };
                if obj.len() != acc.len() {
                    return None;
                }
                for (k, x) in obj {
                    *acc.get_mut(k)? += x * w;
                }
            }
            for x in acc.values_mut() {
                *x /= total;
            }
            Some(NumericValue::Object(acc))
        }
    }
}

pub fn render(value: &NumericValue) -> String {
    match value {
        NumericValue::Scalar(x) => render_number(*x),
        NumericValue::Object(map) => {
            let obj: Map<String, Value> = map
                .iter()
                .map(|(k, x)| (k.clone(), number_value(*x)))
                .collect();
            Value::Object(obj).to_string()
        }
    }
}

fn render_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

fn number_value(x: f64) -> Value {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        Value::Number(Number::from(x as i64))
    } else {
        Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(NumericValue::parse(" 7.5\n"), Some(NumericValue::Scalar(7.5)));
        assert!(matches!(
            NumericValue::parse(r#"{"security": 8, "cost": 6.5}"#),
            Some(NumericValue::Object(m)) if m["cost"] == 6.5
        ));
        assert_eq!(NumericValue::parse("seven"), None);
        assert_eq!(NumericValue::parse(r#"{"a": "high"}"#), None);
        assert_eq!(NumericValue::parse(r#"{"a": {"b": 1}}"#), None);
    }

    #[test]
    fn test_scalar_average_renormalizes() {
        let avg = weighted_average(&[
            (NumericValue::Scalar(8.0), 0.5),
            (NumericValue::Scalar(6.0), 0.25),
        ])
        .unwrap();
        let NumericValue::Scalar(x) = avg else {
            panic!("expected scalar");
        };
        assert!((x - 22.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_object_average_and_render() {
        let a = NumericValue::parse(r#"{"cost": 4, "risk": 2}"#).unwrap();
        let b = NumericValue::parse(r#"{"cost": 8, "risk": 3}"#).unwrap();
        let avg = weighted_average(&[(a, 1.0), (b, 1.0)]).unwrap();
        assert_eq!(render(&avg), r#"{"cost":6,"risk":2.5}"#);
    }

    #[test]
    fn test_mismatched_shapes() {
        let a = NumericValue::Scalar(1.0);
        let b = NumericValue::parse(r#"{"x": 1}"#).unwrap();
        assert!(weighted_average(&[(a.clone(), 1.0), (b, 1.0)]).is_none());
        assert!(weighted_average(&[(a, 0.0)]).is_none());
        assert_eq!(render(&NumericValue::Scalar(8.0)), "8");
    }
}
