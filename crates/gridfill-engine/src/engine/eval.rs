//! Expression evaluation against a variable scope.
//!
//! Coercion rules are explicit at each operator:
//! - `+` adds numbers, and concatenates display text when either side is a string
//! - `-`, `*`, `/` take numbers only; `/` by zero is an error
//! - `==`/`!=` compare structurally; values of different kinds are unequal
//! - `<`, `<=`, `>`, `>=` need two numbers, two strings or two booleans
//! - `&&`, `||`, `!` take booleans, with null counting as false

use std::borrow::Cow;
use std::collections::HashMap;
use std::rc::Rc;

use super::expr::{BinaryOp, Expr, UnaryOp, parse_expression};
use super::{EvalError, Value};
use crate::builtins::call_builtin;

/// Name lookup for identifiers, innermost scope first.
pub trait Resolver {
    fn resolve(&self, name: &str) -> Option<&Value>;
}

impl Resolver for HashMap<String, Value> {
    fn resolve(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// Parses and evaluates expressions, caching parsed trees by source text.
#[derive(Default)]
pub struct Evaluator {
    cache: HashMap<String, Result<Rc<Expr>, EvalError>>,
}

impl Evaluator {
    pub fn new() -> Evaluator {
        Evaluator::default()
    }

    pub fn evaluate(&mut self, source: &str, scope: &dyn Resolver) -> Result<Value, EvalError> {
        let expr = self.parse(source)?;
        evaluate(&expr, scope)
    }

    /// Evaluate and require a boolean. Null is false.
    pub fn evaluate_condition(
        &mut self,
        source: &str,
        scope: &dyn Resolver,
    ) -> Result<bool, EvalError> {
        truthy(&self.evaluate(source, scope)?)
    }

    fn parse(&mut self, source: &str) -> Result<Rc<Expr>, EvalError> {
        if let Some(cached) = self.cache.get(source) {
            return cached.clone();
        }
        let parsed = parse_expression(source.trim()).map(Rc::new);
        self.cache.insert(source.to_string(), parsed.clone());
        parsed
    }
}

/// Evaluate a parsed expression.
pub fn evaluate(expr: &Expr, scope: &dyn Resolver) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(_) | Expr::Member(..) => evaluate_path(expr, scope).map(Cow::into_owned),
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call_builtin(name, values)
        }
        Expr::Unary(op, operand) => {
            let value = evaluate(operand, scope)?;
            match op {
                UnaryOp::Neg => match value {
                    Value::Number(n) => Ok(Value::Number(-n)),
                    other => Err(EvalError::mismatch("number for unary `-`", other.kind())),
                },
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value)?)),
            }
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            if !truthy(&evaluate(left, scope)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&evaluate(right, scope)?)?))
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            if truthy(&evaluate(left, scope)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&evaluate(right, scope)?)?))
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, scope)?;
            let right = evaluate(right, scope)?;
            apply_binary(*op, left, right)
        }
    }
}

/// Resolve an identifier or member chain, borrowing from the scope where it can.
/// Only the value at the end of the chain is copied by the caller.
fn evaluate_path<'s>(expr: &Expr, scope: &'s dyn Resolver) -> Result<Cow<'s, Value>, EvalError> {
    match expr {
        Expr::Ident(name) => scope
            .resolve(name)
            .map(Cow::Borrowed)
            .ok_or_else(|| EvalError::UnresolvedVariable(name.clone())),
        Expr::Member(base, field) => match evaluate_path(base, scope)? {
            Cow::Borrowed(value) => member(value, field, expr).map(Cow::Borrowed),
            Cow::Owned(value) => member(&value, field, expr).map(|v| Cow::Owned(v.clone())),
        },
        other => evaluate(other, scope).map(Cow::Owned),
    }
}

fn member<'v>(value: &'v Value, field: &str, expr: &Expr) -> Result<&'v Value, EvalError> {
    match value {
        Value::Mapping(map) => map
            .get(field)
            .ok_or_else(|| EvalError::UnresolvedVariable(expr.path())),
        Value::Null => Ok(value),
        other => Err(EvalError::mismatch(
            format!("mapping for `.{}`", field),
            other.kind(),
        )),
    }
}

/// Boolean view of a value: booleans as-is, null as false, anything else is an error.
pub fn truthy(value: &Value) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(EvalError::mismatch("boolean", other.kind())),
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    let operand_error = |left: &Value, right: &Value, expected: &str| {
        EvalError::mismatch(
            format!("{} for `{}`", expected, op.symbol()),
            format!("{} and {}", left.kind(), right.kind()),
        )
    };

    match op {
        BinaryOp::Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(format!(
                "{}{}",
                left.to_display(),
                right.to_display()
            ))),
            _ => Err(operand_error(&left, &right, "numbers or strings")),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                return Err(operand_error(&left, &right, "numbers"));
            };
            match op {
                BinaryOp::Sub => Ok(Value::Number(a - b)),
                BinaryOp::Mul => Ok(Value::Number(a * b)),
                _ if *b == 0.0 => Err(EvalError::DivisionByZero),
                _ => Ok(Value::Number(a / b)),
            }
        }
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => {
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
                _ => return Err(operand_error(&left, &right, "comparable values")),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Ge => ordering.is_ge(),
                BinaryOp::Lt => ordering.is_lt(),
                _ => ordering.is_le(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => {
            let result = match op {
                BinaryOp::And => truthy(&left)? && truthy(&right)?,
                _ => truthy(&left)? || truthy(&right)?,
            };
            Ok(Value::Bool(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> HashMap<String, Value> {
        let mut scope = HashMap::new();
        scope.insert(
            "e".to_string(),
            Value::from(json!({"name": "Bob", "salary": 6000, "boss": null})),
        );
        scope.insert("n".to_string(), Value::Number(3.0));
        scope
    }

    fn eval(src: &str) -> Result<Value, EvalError> {
        Evaluator::new().evaluate(src, &scope())
    }

    #[test]
    fn test_property_access_and_arithmetic() {
        assert_eq!(eval("e.name").unwrap(), Value::from("Bob"));
        assert_eq!(eval("e.salary * 2 + 1").unwrap(), Value::Number(12001.0));
        assert_eq!(eval("(n - 1) / 4").unwrap(), Value::Number(0.5));
        assert_eq!(eval("-n").unwrap(), Value::Number(-3.0));
    }

    #[test]
    fn test_string_concatenation_coerces_numbers() {
        assert_eq!(
            eval("e.name + ' earns ' + e.salary").unwrap(),
            Value::from("Bob earns 6000")
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("e.salary >= 6000").unwrap(), Value::Bool(true));
        assert_eq!(eval("e.salary < 6000").unwrap(), Value::Bool(false));
        assert_eq!(eval("e.name == 'Bob'").unwrap(), Value::Bool(true));
        assert_eq!(eval("e.name != 'Bob'").unwrap(), Value::Bool(false));
        assert_eq!(eval("'a' < 'b'").unwrap(), Value::Bool(true));
        // Different kinds are never equal.
        assert_eq!(eval("e.salary == '6000'").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_type_mismatches() {
        assert!(matches!(
            eval("e.salary > 'x'"),
            Err(EvalError::TypeMismatch { .. })
        ));
        assert!(matches!(eval("e.name - 1"), Err(EvalError::TypeMismatch { .. })));
        assert!(matches!(eval("n.field"), Err(EvalError::TypeMismatch { .. })));
        assert_eq!(eval("n / 0"), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_unresolved_variables_report_full_path() {
        assert_eq!(
            eval("missing"),
            Err(EvalError::UnresolvedVariable("missing".to_string()))
        );
        assert_eq!(
            eval("e.nmae"),
            Err(EvalError::UnresolvedVariable("e.nmae".to_string()))
        );
        // Explicit nulls propagate instead of failing.
        assert_eq!(eval("e.boss.name").unwrap(), Value::Null);
    }

    #[test]
    fn test_member_chains_borrow_from_scope() {
        let mut scope = scope();
        scope.insert(
            "report".to_string(),
            Value::from(json!({"title": "Q1", "meta": {"owner": "Ann"}, "rows": [1, 2, 3]})),
        );
        let expr = parse_expression("report.meta.owner").unwrap();
        assert!(matches!(
            evaluate_path(&expr, &scope),
            Ok(Cow::Borrowed(Value::String(owner))) if owner == "Ann"
        ));
        let expr = parse_expression("report.title").unwrap();
        assert!(matches!(evaluate_path(&expr, &scope), Ok(Cow::Borrowed(_))));
        assert_eq!(
            evaluate(&parse_expression("upper(report.title)").unwrap(), &scope).unwrap(),
            Value::from("Q1")
        );
    }

    #[test]
    fn test_boolean_connectives_short_circuit() {
        assert_eq!(eval("false && missing").unwrap(), Value::Bool(false));
        assert_eq!(eval("true || missing").unwrap(), Value::Bool(true));
        assert_eq!(eval("!e.boss").unwrap(), Value::Bool(true));
        assert!(matches!(eval("n && true"), Err(EvalError::TypeMismatch { .. })));
    }

    #[test]
    fn test_functions() {
        assert_eq!(
            eval("hyperlink('http://x/' + e.name, e.name)").unwrap(),
            Value::Hyperlink {
                url: "http://x/Bob".to_string(),
                label: "Bob".to_string()
            }
        );
        assert_eq!(eval("upper(e.name)").unwrap(), Value::from("BOB"));
    }

    #[test]
    fn test_parse_cache_reuses_errors() {
        let mut evaluator = Evaluator::new();
        let scope = scope();
        assert!(evaluator.evaluate("a +", &scope).is_err());
        assert!(evaluator.evaluate("a +", &scope).is_err());
        assert_eq!(evaluator.cache.len(), 1);
        assert!(evaluator.evaluate_condition("n > 2", &scope).unwrap());
    }
}
