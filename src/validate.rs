//! Per-field validation of an expanded structure.
//!
//! Fields are checked in layout order and the first failure is returned. Deferred
//! rules are evaluated into a [`ConcreteRule`] that is applied once and then dropped;
//! the shared field definitions are never written to.

use crate::expand::{ExpandedField, ExpandedStructure};
use crate::expr::{Environment, EvalError, Evaluated, Evaluator};
use crate::schema::{ConcreteRule, FieldRule};
use std::fmt;

/// Which check a field failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    /// Declared or computed range/value-set did not accept the value.
    Rule(ConcreteRule),
    /// A deferred predicate evaluated to zero.
    Predicate(String),
    /// The deferred expression could not be evaluated.
    Evaluation(EvalError),
}

impl fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleViolation::Rule(rule) => write!(f, "outside {}", rule),
            RuleViolation::Predicate(src) => write!(f, "predicate `{}` is false", src),
            RuleViolation::Evaluation(e) => write!(f, "deferred rule failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("field `{path}` = {value}: {rule}")]
pub struct ValidationError {
    pub path: String,
    pub rule: RuleViolation,
    pub value: u32,
}

/// Validate every field of `s`, stopping at the first failure.
pub fn validate(s: &ExpandedStructure, evaluator: &dyn Evaluator) -> Result<(), ValidationError> {
    let mut env: Option<Environment> = None;
    for field in &s.fields {
        if let Err(rule) = validate_field(field, s, &mut env, evaluator) {
            let err = ValidationError {
                path: field.path.clone(),
                rule,
                value: field.value,
            };
            tracing::warn!(structure = %s.name, error = %err, "validation failed");
            return Err(err);
        }
    }
    Ok(())
}

pub fn is_valid(s: &ExpandedStructure, evaluator: &dyn Evaluator) -> bool {
    validate(s, evaluator).is_ok()
}

fn validate_field(
    field: &ExpandedField,
    s: &ExpandedStructure,
    env: &mut Option<Environment>,
    evaluator: &dyn Evaluator,
) -> Result<(), RuleViolation> {
    let def = &field.definition;
    if def.is_constant() {
        return Ok(());
    }
    let concrete = match &def.rule {
        None => return Ok(()),
        Some(FieldRule::Range { lo, hi }) => ConcreteRule::Range { lo: *lo, hi: *hi },
        Some(FieldRule::ValueSet(values)) => ConcreteRule::ValueSet(values.clone()),
        Some(FieldRule::Deferred(expr)) => {
            // Built lazily: most structures carry no deferred rules.
            let base = env.get_or_insert_with(|| environment_for(s));
            let scoped = scoped_environment(base, s, field);
            match evaluator.evaluate(expr, &scoped) {
                Ok(Evaluated::Rule(rule)) => {
                    tracing::trace!(path = %field.path, %rule, "deferred rule");
                    rule
                }
                Ok(Evaluated::Number(0)) => {
                    return Err(RuleViolation::Predicate(expr.source().to_string()))
                }
                Ok(Evaluated::Number(_)) => return Ok(()),
                Err(e) => return Err(RuleViolation::Evaluation(e)),
            }
        }
    };
    if concrete.accepts(field.value) {
        Ok(())
    } else {
        Err(RuleViolation::Rule(concrete))
    }
}

/// Bind every leaf by its field name and by its dotted path (`a/b/0` → `a.b.0`).
/// Repeated names keep the last leaf's value.
pub fn environment_for(s: &ExpandedStructure) -> Environment {
    let mut env = Environment::new();
    for f in &s.fields {
        let v = i64::from(f.value);
        env.bind(f.definition.name.clone(), v);
        env.bind(f.path.replace('/', "."), v);
    }
    env
}

/// `base` with bare names rebound for `field`: siblings sharing its enclosing
/// element (`segs/0/*` for `segs/0/pos`) and then the field itself.
fn scoped_environment(
    base: &Environment,
    s: &ExpandedStructure,
    field: &ExpandedField,
) -> Environment {
    let mut env = base.clone();
    let steps: Vec<&str> = field.steps().collect();
    let own = if field.definition.repeat_count > 1 { 2 } else { 1 };
    let prefix = steps[..steps.len().saturating_sub(own)].join("/");
    for f in s.fields.iter().filter(|f| in_element(&f.path, &prefix)) {
        env.bind(f.definition.name.clone(), i64::from(f.value));
    }
    env.bind(field.definition.name.clone(), i64::from(field.value));
    env
}

fn in_element(path: &str, prefix: &str) -> bool {
    prefix.is_empty() || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}
