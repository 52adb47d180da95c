//! Map expanded structures to and from JSON documents by path.
//!
//! Each leaf's path is read as a sequence of steps: a step that parses as a
//! non-negative integer indexes an array (0-based), any other step is an object key.
//! Population tolerates missing keys (the leaf keeps its current value); rendering
//! creates objects and arrays on demand, in layout order.

use crate::codec::CodecError;
use crate::expand::{ExpandedField, ExpandedStructure};
use crate::expr::{Environment, Evaluated, Evaluator};
use serde_json::{Map, Value};

/// Populate every non-constant leaf of `s` from `doc`.
///
/// `evaluator` is required only when a leaf carries a `from_json` transform.
pub fn populate_from_json(
    s: &mut ExpandedStructure,
    doc: &Value,
    evaluator: Option<&dyn Evaluator>,
) -> Result<(), CodecError> {
    for field in &mut s.fields {
        if field.definition.is_constant() {
            continue;
        }
        let Some((node, parent)) = lookup(doc, field) else {
            tracing::trace!(path = %field.path, "absent from document");
            continue;
        };
        let value = match &field.definition.from_json {
            Some(expr) => {
                let mut env = Environment::new();
                if let Some(v) = numeric(node, &field.path)? {
                    env.bind("value", i64::from(v));
                }
                if let Some(Value::Object(members)) = parent {
                    for (k, v) in members {
                        if let Ok(Some(n)) = numeric(v, k) {
                            env.bind(format!("parent.{}", k), i64::from(n));
                        }
                    }
                }
                let n = transform(evaluator, expr, &env, &field.path)?;
                Some(fit(i128::from(n), &field.path)?)
            }
            None => numeric(node, &field.path)?,
        };
        if let Some(v) = value {
            field.value = v;
        }
    }
    Ok(())
}

/// Render `s` as a JSON document.
///
/// `evaluator` is required only when a leaf carries a `to_json` transform.
pub fn to_json(
    s: &ExpandedStructure,
    evaluator: Option<&dyn Evaluator>,
) -> Result<Value, CodecError> {
    let mut root = Value::Object(Map::new());
    for field in &s.fields {
        let leaf = match &field.definition.to_json {
            Some(expr) => {
                let mut env = Environment::new();
                env.bind("value", i64::from(field.value));
                Value::from(transform(evaluator, expr, &env, &field.path)?)
            }
            None => Value::from(field.value),
        };
        let steps: Vec<&str> = field.steps().collect();
        insert(&mut root, &steps, leaf);
    }
    Ok(root)
}

/// Walk `doc` along the field's path; returns the leaf node and its parent.
fn lookup<'a>(doc: &'a Value, field: &ExpandedField) -> Option<(&'a Value, Option<&'a Value>)> {
    let mut node = doc;
    let mut parent = None;
    for step in field.steps() {
        let next = match step.parse::<usize>() {
            Ok(index) => node.as_array()?.get(index)?,
            Err(_) => node.as_object()?.get(step)?,
        };
        parent = Some(node);
        node = next;
    }
    Some((node, parent))
}

fn insert(node: &mut Value, steps: &[&str], leaf: Value) {
    let Some((step, rest)) = steps.split_first() else {
        *node = leaf;
        return;
    };
    match step.parse::<usize>() {
        Ok(index) => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            if let Value::Array(items) = node {
                if items.len() <= index {
                    items.resize(index + 1, Value::Null);
                }
                insert(&mut items[index], rest, leaf);
            }
        }
        Err(_) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(members) = node {
                let child = members.entry(step.to_string()).or_insert(Value::Null);
                insert(child, rest, leaf);
            }
        }
    }
}

/// Numeric value of a leaf node. `null` means absent.
///
/// Negative integers wrap (two's complement) and floats truncate toward zero.
fn numeric(node: &Value, path: &str) -> Result<Option<u32>, CodecError> {
    match node {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(u32::from(*b))),
        Value::Number(n) => {
            let v = if let Some(u) = n.as_u64() {
                i128::from(u)
            } else if let Some(i) = n.as_i64() {
                i128::from(i)
            } else {
                n.as_f64().map(|f| f.trunc() as i128).unwrap_or(0)
            };
            fit(v, path).map(Some)
        }
        _ => Err(CodecError::NotNumeric {
            path: path.to_string(),
        }),
    }
}

/// Accepts `0..=u32::MAX`, and negatives down to `i32::MIN` as their two's complement.
fn fit(v: i128, path: &str) -> Result<u32, CodecError> {
    u32::try_from(v)
        .or_else(|_| i32::try_from(v).map(|n| n as u32))
        .map_err(|_| CodecError::OutOfRange {
            path: path.to_string(),
            value: v,
        })
}

fn transform(
    evaluator: Option<&dyn Evaluator>,
    expr: &crate::schema::Expression,
    env: &Environment,
    path: &str,
) -> Result<i64, CodecError> {
    let fail = |reason: String| CodecError::Transform {
        path: path.to_string(),
        reason,
    };
    let evaluator = evaluator.ok_or_else(|| fail("no evaluator available".to_string()))?;
    match evaluator.evaluate(expr, env) {
        Ok(Evaluated::Number(n)) => Ok(n),
        Ok(Evaluated::Rule(rule)) => Err(fail(format!("expected a number, got rule {}", rule))),
        Err(e) => Err(fail(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::expand;
    use crate::expr::ExprEvaluator;
    use crate::schema::{Expression, Field, SchemaRegistry, Structure};
    use serde_json::json;

    fn nested() -> ExpandedStructure {
        let mut reg = SchemaRegistry::new();
        let a = Structure::new("pair")
            .with_field(Field::of_type("b", "uint8", &reg).expect("b"))
            .with_field(Field::of_type("c", "uint16", &reg).expect("c"));
        reg.insert(a).expect("pair");
        let s = Structure::new("s")
            .with_field(Field::of_type("a", "pair", &reg).expect("a"))
            .with_field(
                Field::of_type("items", "uint8", &reg)
                    .expect("items")
                    .repeated(2)
                    .expect("rep"),
            );
        expand(&s)
    }

    #[test]
    fn json_round_trip() {
        let mut s = nested();
        s.set("a/b", 1);
        s.set("a/c", 500);
        s.set("items/0", 7);
        s.set("items/1", 8);
        let doc = to_json(&s, None).expect("to_json");
        assert_eq!(doc, json!({"a": {"b": 1, "c": 500}, "items": [7, 8]}));

        let mut back = nested();
        populate_from_json(&mut back, &doc, None).expect("populate");
        for (x, y) in s.fields.iter().zip(&back.fields) {
            assert_eq!(x.value, y.value, "{}", x.path);
        }
    }

    #[test]
    fn missing_keys_keep_defaults() {
        let mut s = nested();
        populate_from_json(&mut s, &json!({"a": {"c": 3}, "items": [9]}), None).expect("populate");
        assert_eq!(s.get("a/b"), Some(0));
        assert_eq!(s.get("a/c"), Some(3));
        assert_eq!(s.get("items/0"), Some(9));
        assert_eq!(s.get("items/1"), Some(0));
    }

    #[test]
    fn leaf_conversions() {
        let reg = SchemaRegistry::new();
        let s = Structure::new("s")
            .with_field(Field::of_type("neg", "uint32", &reg).expect("neg"))
            .with_field(Field::of_type("flt", "uint32", &reg).expect("flt"))
            .with_field(Field::of_type("flag", "uint8", &reg).expect("flag"));
        let mut e = expand(&s);
        populate_from_json(&mut e, &json!({"neg": -1, "flt": 2.9, "flag": true}), None)
            .expect("populate");
        assert_eq!(e.get("neg"), Some(u32::MAX));
        assert_eq!(e.get("flt"), Some(2));
        assert_eq!(e.get("flag"), Some(1));

        let err = populate_from_json(&mut e, &json!({"neg": "x"}), None).unwrap_err();
        assert_eq!(err, CodecError::NotNumeric {
            path: "neg".to_string(),
        });
    }

    #[test]
    fn values_wider_than_32_bits_are_rejected() {
        let reg = SchemaRegistry::new();
        let s = Structure::new("s")
            .with_field(Field::of_type("x", "uint32", &reg).expect("x").with_range(0, 10));
        let mut e = expand(&s);
        let err = populate_from_json(&mut e, &json!({"x": 4_294_967_301u64}), None).unwrap_err();
        assert_eq!(err, CodecError::OutOfRange {
            path: "x".to_string(),
            value: 4_294_967_301,
        });
        assert_eq!(e.get("x"), Some(0));

        for doc in [json!({"x": -2_147_483_649i64}), json!({"x": 5.0e10})] {
            let err = populate_from_json(&mut e, &doc, None).unwrap_err();
            assert!(matches!(err, CodecError::OutOfRange { .. }), "{}", doc);
        }
        populate_from_json(&mut e, &json!({"x": 4_294_967_295u64}), None).expect("max fits");
        assert_eq!(e.get("x"), Some(u32::MAX));
    }

    #[test]
    fn transform_results_must_fit() {
        let reg = SchemaRegistry::new();
        let s = Structure::new("s").with_field(
            Field::of_type("x", "uint32", &reg)
                .expect("x")
                .with_from_json(Expression::new("value * 0x100000000")),
        );
        let mut e = expand(&s);
        let eval: &dyn Evaluator = &ExprEvaluator;
        let err = populate_from_json(&mut e, &json!({"x": 1}), Some(eval)).unwrap_err();
        assert!(matches!(err, CodecError::OutOfRange { .. }));
    }

    #[test]
    fn constants_are_not_read() {
        let reg = SchemaRegistry::new();
        let s = Structure::new("s")
            .with_field(Field::of_type("k", "uint8", &reg).expect("k").constant(4).expect("c"));
        let mut e = expand(&s);
        populate_from_json(&mut e, &json!({"k": 99}), None).expect("populate");
        assert_eq!(e.get("k"), Some(4));
    }

    #[test]
    fn arrays_of_structures_render_as_objects() {
        let mut reg = SchemaRegistry::new();
        reg.insert(Structure::new("pt")
            .with_field(Field::of_type("x", "uint8", &reg).expect("x"))
            .with_field(Field::of_type("y", "uint8", &reg).expect("y")))
            .expect("pt");
        let pts = Field::of_type("pts", "pt", &reg).expect("pts").repeated(2).expect("rep");
        let s = Structure::new("s").with_field(pts);
        let mut e = expand(&s);
        let doc = json!({"pts": [{"x": 1, "y": 2}, {"x": 3, "y": 4}]});
        populate_from_json(&mut e, &doc, None).expect("populate");
        assert_eq!(e.get("pts/1/x"), Some(3));
        assert_eq!(to_json(&e, None).expect("to_json"), doc);
    }

    #[test]
    fn transforms_apply_in_both_directions() {
        let reg = SchemaRegistry::new();
        let s = Structure::new("s")
            .with_field(Field::of_type("scale", "uint8", &reg).expect("scale"))
            .with_field(
                Field::of_type("level", "uint16", &reg)
                    .expect("level")
                    .with_from_json(Expression::new("value * parent.scale"))
                    .with_to_json(Expression::new("value / 10")),
            );
        let mut e = expand(&s);
        let eval: &dyn Evaluator = &ExprEvaluator;
        let doc = json!({"scale": 10, "level": 25});
        populate_from_json(&mut e, &doc, Some(eval)).expect("populate");
        assert_eq!(e.get("level"), Some(250));
        assert_eq!(to_json(&e, Some(eval)).expect("to_json"), json!({"scale": 10, "level": 25}));

        let err = populate_from_json(&mut e, &json!({"level": 1}), None).unwrap_err();
        assert!(matches!(err, CodecError::Transform { .. }));
    }
}
