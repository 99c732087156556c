//! Filtering, grouping and ordering of `each` items.
//!
//! Every item is evaluated with the loop variable bound to it, so the
//! expressions read the same as they would inside the rendered block.

use std::collections::HashMap;

use super::eval::{Evaluator, Resolver, truthy};
use super::{EvalError, SortOrder, Value};

/// Resolves the loop variable to one item and everything else to `outer`.
pub struct ItemScope<'a> {
    pub outer: &'a dyn Resolver,
    pub var: &'a str,
    pub item: &'a Value,
}

impl Resolver for ItemScope<'_> {
    fn resolve(&self, name: &str) -> Option<&Value> {
        if name == self.var {
            Some(self.item)
        } else {
            self.outer.resolve(name)
        }
    }
}

/// Members sharing one `groupBy` key, in their original relative order.
#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    pub key: Value,
    pub items: Vec<Value>,
}

impl Group {
    /// The record bound to the loop variable: `key`, `item` (first member), `items`.
    pub fn into_value(self) -> Value {
        let first = self.items.first().cloned().unwrap_or_default();
        Value::mapping([
            ("key", self.key),
            ("item", first),
            ("items", Value::Sequence(self.items)),
        ])
    }
}

/// Keep the items for which `condition` is true.
pub fn select(
    evaluator: &mut Evaluator,
    items: Vec<Value>,
    var: &str,
    condition: &str,
    outer: &dyn Resolver,
) -> Result<Vec<Value>, EvalError> {
    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        let scope = ItemScope {
            outer,
            var,
            item: &item,
        };
        if truthy(&evaluator.evaluate(condition, &scope)?)? {
            kept.push(item);
        }
    }
    Ok(kept)
}

/// Partition items by key, groups in first-seen order.
pub fn group_by(
    evaluator: &mut Evaluator,
    items: Vec<Value>,
    var: &str,
    key_expr: &str,
    outer: &dyn Resolver,
) -> Result<Vec<Group>, EvalError> {
    let mut groups: Vec<Group> = Vec::new();
    // Keys are matched by display text plus kind so 1 and "1" stay apart.
    let mut index: HashMap<(String, &'static str), usize> = HashMap::new();
    for item in items {
        let key = {
            let scope = ItemScope {
                outer,
                var,
                item: &item,
            };
            evaluator.evaluate(key_expr, &scope)?
        };
        let slot = (key.to_display(), key.kind());
        match index.get(&slot) {
            Some(&at) => groups[at].items.push(item),
            None => {
                index.insert(slot, groups.len());
                groups.push(Group {
                    key,
                    items: vec![item],
                });
            }
        }
    }
    Ok(groups)
}

pub fn sort_groups(groups: &mut [Group], order: SortOrder) {
    groups.sort_by(|a, b| {
        let ord = a.key.sort_cmp(&b.key);
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

/// One `orderBy` criterion: an expression and a direction.
#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    pub expr: String,
    pub order: SortOrder,
}

/// Parse `"e.dept ASC, e.name DESC"`. Commas inside quotes or parentheses
/// do not split criteria.
pub fn parse_order_by(text: &str) -> Vec<SortKey> {
    split_top_level(text)
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.rsplit_once(char::is_whitespace) {
            Some((expr, dir)) => match SortOrder::parse(dir) {
                Some(order) => SortKey {
                    expr: expr.trim().to_string(),
                    order,
                },
                None => SortKey {
                    expr: part.to_string(),
                    order: SortOrder::Asc,
                },
            },
            None => SortKey {
                expr: part.to_string(),
                order: SortOrder::Asc,
            },
        })
        .collect()
}

fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&text[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Stable sort by the given criteria. Keys are evaluated once per item.
pub fn order_by(
    evaluator: &mut Evaluator,
    items: Vec<Value>,
    var: &str,
    keys: &[SortKey],
    outer: &dyn Resolver,
) -> Result<Vec<Value>, EvalError> {
    if keys.is_empty() {
        return Ok(items);
    }
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let scope = ItemScope {
            outer,
            var,
            item: &item,
        };
        let values = keys
            .iter()
            .map(|key| evaluator.evaluate(&key.expr, &scope))
            .collect::<Result<Vec<_>, _>>()?;
        keyed.push((values, item));
    }
    keyed.sort_by(|(a, _), (b, _)| {
        keys.iter()
            .zip(a.iter().zip(b.iter()))
            .map(|(key, (x, y))| match key.order {
                SortOrder::Asc => x.sort_cmp(y),
                SortOrder::Desc => y.sort_cmp(x),
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(keyed.into_iter().map(|(_, item)| item).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn employees() -> Vec<Value> {
        match Value::from(json!([
            {"name": "Alice", "dept": "Eng", "salary": 5000},
            {"name": "Bob", "dept": "Ops", "salary": 6000},
            {"name": "Carol", "dept": "Eng", "salary": 7000},
        ])) {
            Value::Sequence(items) => items,
            _ => unreachable!(),
        }
    }

    fn names(items: &[Value]) -> Vec<String> {
        items
            .iter()
            .map(|e| e.get("name").unwrap().to_display())
            .collect()
    }

    #[test]
    fn test_select_filters_items() {
        let outer: HashMap<String, Value> = HashMap::new();
        let kept = select(
            &mut Evaluator::new(),
            employees(),
            "e",
            "e.salary >= 6000",
            &outer,
        )
        .unwrap();
        assert_eq!(names(&kept), vec!["Bob", "Carol"]);
    }

    #[test]
    fn test_select_sees_outer_bindings() {
        let mut outer: HashMap<String, Value> = HashMap::new();
        outer.insert("min".to_string(), Value::Number(7000.0));
        let kept = select(
            &mut Evaluator::new(),
            employees(),
            "e",
            "e.salary >= min",
            &outer,
        )
        .unwrap();
        assert_eq!(names(&kept), vec!["Carol"]);
    }

    #[test]
    fn test_select_requires_boolean() {
        let outer: HashMap<String, Value> = HashMap::new();
        let err = select(&mut Evaluator::new(), employees(), "e", "e.name", &outer).unwrap_err();
        assert!(matches!(err, EvalError::TypeMismatch { .. }));
    }

    #[test]
    fn test_order_by_desc_and_multiple_keys() {
        let outer: HashMap<String, Value> = HashMap::new();
        let keys = parse_order_by("e.name DESC");
        let sorted = order_by(&mut Evaluator::new(), employees(), "e", &keys, &outer).unwrap();
        assert_eq!(names(&sorted), vec!["Carol", "Bob", "Alice"]);

        let keys = parse_order_by("e.dept, e.salary desc");
        let sorted = order_by(&mut Evaluator::new(), employees(), "e", &keys, &outer).unwrap();
        assert_eq!(names(&sorted), vec!["Carol", "Alice", "Bob"]);
    }

    #[test]
    fn test_parse_order_by_respects_quotes() {
        let keys = parse_order_by("e.a + ', x' ASC, upper(e.b)");
        assert_eq!(
            keys,
            vec![
                SortKey {
                    expr: "e.a + ', x'".to_string(),
                    order: SortOrder::Asc
                },
                SortKey {
                    expr: "upper(e.b)".to_string(),
                    order: SortOrder::Asc
                },
            ]
        );
    }

    #[test]
    fn test_group_by_keeps_first_seen_order() {
        let outer: HashMap<String, Value> = HashMap::new();
        let mut groups =
            group_by(&mut Evaluator::new(), employees(), "e", "e.dept", &outer).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, Value::from("Eng"));
        assert_eq!(names(&groups[0].items), vec!["Alice", "Carol"]);

        sort_groups(&mut groups, SortOrder::Desc);
        assert_eq!(groups[0].key, Value::from("Ops"));

        let record = groups.remove(1).into_value();
        assert_eq!(record.get("key"), Some(&Value::from("Eng")));
        assert_eq!(
            record.get("item").and_then(|i| i.get("name")),
            Some(&Value::from("Alice"))
        );
        assert_eq!(
            record.get("items").and_then(Value::as_sequence).map(<[Value]>::len),
            Some(2)
        );
    }
}
