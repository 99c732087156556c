//! Built-in functions callable from template expressions and their arity table.
//!
//! Conventions:
//! - Names are lower case (`hyperlink`, `len`).
//! - If you add a built-in, add it to `BUILTINS` and to the match in
//!   `call_builtin`.

use crate::engine::{EvalError, Value};

pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
}

pub const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "hyperlink",
        min_args: 2,
        max_args: 2,
    },
    Builtin {
        name: "len",
        min_args: 1,
        max_args: 1,
    },
    Builtin {
        name: "upper",
        min_args: 1,
        max_args: 1,
    },
    Builtin {
        name: "lower",
        min_args: 1,
        max_args: 1,
    },
    Builtin {
        name: "round",
        min_args: 1,
        max_args: 2,
    },
];

fn builtin(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// Invoke a built-in by name with already-evaluated arguments.
pub fn call_builtin(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let Some(def) = builtin(name) else {
        return Err(EvalError::UnknownFunction(name.to_string()));
    };
    if args.len() < def.min_args || args.len() > def.max_args {
        let expected = if def.min_args == def.max_args {
            def.min_args.to_string()
        } else {
            format!("{}..={}", def.min_args, def.max_args)
        };
        return Err(EvalError::ArgumentCount {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }

    match def.name {
        "hyperlink" => {
            let url = args[0].to_display();
            let label = args[1].to_display();
            Ok(Value::Hyperlink { url, label })
        }
        "len" => match &args[0] {
            Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
            Value::Sequence(items) => Ok(Value::Number(items.len() as f64)),
            Value::Mapping(map) => Ok(Value::Number(map.len() as f64)),
            Value::Null => Ok(Value::Number(0.0)),
            other => Err(EvalError::mismatch("string, sequence or mapping", other.kind())),
        },
        "upper" => Ok(Value::String(expect_text(&args[0])?.to_uppercase())),
        "lower" => Ok(Value::String(expect_text(&args[0])?.to_lowercase())),
        "round" => {
            let Value::Number(n) = args[0] else {
                return Err(EvalError::mismatch("number", args[0].kind()));
            };
            let digits = match args.get(1) {
                None => 0,
                Some(Value::Number(d)) => *d as i32,
                Some(other) => return Err(EvalError::mismatch("number", other.kind())),
            };
            let factor = 10f64.powi(digits);
            Ok(Value::Number((n * factor).round() / factor))
        }
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

fn expect_text(value: &Value) -> Result<&str, EvalError> {
    value
        .as_str()
        .ok_or_else(|| EvalError::mismatch("string", value.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hyperlink_constructor() {
        let link = call_builtin(
            "hyperlink",
            vec![Value::from("https://example.com"), Value::from("Example")],
        )
        .unwrap();
        assert_eq!(
            link,
            Value::Hyperlink {
                url: "https://example.com".to_string(),
                label: "Example".to_string()
            }
        );
    }

    #[test]
    fn test_argument_count_checked() {
        let err = call_builtin("hyperlink", vec![Value::from("x")]).unwrap_err();
        assert_eq!(
            err,
            EvalError::ArgumentCount {
                name: "hyperlink".to_string(),
                expected: "2".to_string(),
                got: 1
            }
        );
        assert!(matches!(
            call_builtin("nope", vec![]),
            Err(EvalError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_round_and_len() {
        assert_eq!(
            call_builtin("round", vec![Value::from(1.23456), Value::from(2.0)]).unwrap(),
            Value::Number(1.23)
        );
        assert_eq!(
            call_builtin("len", vec![Value::from("héllo")]).unwrap(),
            Value::Number(5.0)
        );
        assert_eq!(
            call_builtin("upper", vec![Value::from("abc")]).unwrap(),
            Value::from("ABC")
        );
    }
}
