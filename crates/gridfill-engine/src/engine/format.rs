//! Display text for numbers and values written into cells.

use super::Value;

/// Format a value for display inside a cell's text.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => s.clone(),
        Value::Sequence(items) => items.iter().map(format_value).collect::<Vec<_>>().join(", "),
        Value::Mapping(map) => {
            let fields = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{}}}", fields)
        }
        Value::Binary(bytes) => format!("<{} bytes>", bytes.len()),
        Value::Hyperlink { label, .. } => label.clone(),
    }
}

/// Format a number for display.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "#NAN!".to_string()
    } else if n.is_infinite() {
        "#INF!".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{:.0}", n)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number_integral_and_fractional() {
        assert_eq!(format_number(6000.0), "6000");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(1234.5), "1234.5");
        assert_eq!(format_number(f64::NAN), "#NAN!");
    }

    #[test]
    fn test_format_value_nested() {
        let value = Value::Sequence(vec![Value::from("a"), Value::from(2.0), Value::Null]);
        assert_eq!(format_value(&value), "a, 2, ");
        assert_eq!(format_value(&Value::Bool(true)), "true");
    }
}
