//! Expression evaluation for deferred rules and JSON transforms.
//!
//! [`Evaluator`] is the seam: validation and the JSON codec only ever call
//! `evaluate(expression, environment)`. [`ExprEvaluator`] is the built-in
//! implementation, a small integer language parsed with PEST (`expr.pest`):
//!
//! | Form | Result |
//! |------|--------|
//! | `42`, `0x2A`, `name`, `a.b.0` | number (identifiers come from the environment) |
//! | `+ - * / %`, unary `-` | number |
//! | `== != < <= > >=`, `&&`, `\|\|` | 1 or 0 |
//! | `min(a, b)`, `max(a, b)`, `if(c, a, b)` | number |
//! | `range(lo, hi)` | inclusive range rule |
//! | `one_of(a, b, ...)` | value-set rule |

use crate::schema::{ConcreteRule, Expression};
use pest::Parser;
use pest_derive::Parser as PestParser;
use std::collections::HashMap;

#[derive(PestParser)]
#[grammar = "expr.pest"]
struct ExprParser;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("{function} expects {expected} arguments, got {got}")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("expected a number, got a rule")]
    NotANumber,
    #[error("{0} is not a valid unsigned 32-bit bound")]
    OutOfRange(i64),
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluated {
    Number(i64),
    Rule(ConcreteRule),
}

impl Evaluated {
    pub fn as_number(&self) -> Result<i64, EvalError> {
        match self {
            Evaluated::Number(n) => Ok(*n),
            Evaluated::Rule(_) => Err(EvalError::NotANumber),
        }
    }
}

/// Name bindings visible to one evaluation.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    bindings: HashMap<String, i64>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: i64) {
        self.bindings.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.bindings.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Evaluates schema expressions against an environment.
pub trait Evaluator {
    fn evaluate(&self, expression: &Expression, env: &Environment) -> Result<Evaluated, EvalError>;
}

/// Built-in evaluator for the `expr.pest` language.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprEvaluator;

impl ExprEvaluator {
    pub fn new() -> Self {
        ExprEvaluator
    }

    /// Syntax check only; used when declarations are loaded.
    pub fn check(source: &str) -> Result<(), EvalError> {
        compile(source).map(|_| ())
    }
}

impl Evaluator for ExprEvaluator {
    fn evaluate(&self, expression: &Expression, env: &Environment) -> Result<Evaluated, EvalError> {
        let node = compile(expression.source())?;
        eval(&node, env)
    }
}

// ==================== Syntax tree ====================

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Number(i64),
    Ident(String),
    Neg(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Parse expression source into a syntax tree.
pub fn compile(source: &str) -> Result<Node, EvalError> {
    let mut pairs = ExprParser::parse(Rule::program, source)
        .map_err(|e| EvalError::Parse(e.to_string()))?;
    let program = pairs.next().ok_or_else(|| EvalError::Parse("empty program".to_string()))?;
    let expr = program
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or_else(|| EvalError::Parse("missing expression".to_string()))?;
    build_node(expr)
}

fn build_node(pair: pest::iterators::Pair<Rule>) -> Result<Node, EvalError> {
    match pair.as_rule() {
        Rule::expr => {
            let inner = pair.into_inner().next().ok_or_else(|| parse_err("empty expression"))?;
            build_node(inner)
        }
        Rule::or_expr | Rule::and_expr | Rule::cmp_expr | Rule::sum | Rule::product => {
            build_binary_chain(pair)
        }
        Rule::unary => {
            let mut negations = 0usize;
            let mut operand = None;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::neg => negations += 1,
                    _ => operand = Some(build_node(inner)?),
                }
            }
            let mut node = operand.ok_or_else(|| parse_err("missing operand"))?;
            for _ in 0..negations {
                node = Node::Neg(Box::new(node));
            }
            Ok(node)
        }
        Rule::call => {
            let mut it = pair.into_inner();
            let name = it.next().ok_or_else(|| parse_err("call: name"))?.as_str().to_string();
            let args = it.map(build_node).collect::<Result<Vec<_>, _>>()?;
            Ok(Node::Call(name, args))
        }
        Rule::number => parse_number(pair.as_str()).map(Node::Number),
        Rule::ident => Ok(Node::Ident(pair.as_str().to_string())),
        other => Err(parse_err(&format!("unexpected rule {:?}", other))),
    }
}

fn build_binary_chain(pair: pest::iterators::Pair<Rule>) -> Result<Node, EvalError> {
    let mut it = pair.into_inner();
    let first = it.next().ok_or_else(|| parse_err("missing left operand"))?;
    let mut lhs = build_node(first)?;
    while let Some(op) = it.next() {
        let op = parse_op(op.as_str())?;
        let rhs_pair = it.next().ok_or_else(|| parse_err("missing right operand"))?;
        let rhs = build_node(rhs_pair)?;
        lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_op(s: &str) -> Result<BinOp, EvalError> {
    Ok(match s {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Rem,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "&&" => BinOp::And,
        "||" => BinOp::Or,
        other => return Err(parse_err(&format!("unknown operator {}", other))),
    })
}

fn parse_number(s: &str) -> Result<i64, EvalError> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else {
        s.parse::<i64>()
    };
    parsed.map_err(|_| EvalError::Overflow)
}

fn parse_err(msg: &str) -> EvalError {
    EvalError::Parse(msg.to_string())
}

// ==================== Evaluation ====================

/// Evaluate a compiled tree.
pub fn eval(node: &Node, env: &Environment) -> Result<Evaluated, EvalError> {
    match node {
        Node::Number(n) => Ok(Evaluated::Number(*n)),
        Node::Ident(name) => env
            .get(name)
            .map(Evaluated::Number)
            .ok_or_else(|| EvalError::UnknownIdentifier(name.clone())),
        Node::Neg(inner) => {
            let v = number(inner, env)?;
            v.checked_neg().map(Evaluated::Number).ok_or(EvalError::Overflow)
        }
        Node::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, env).map(Evaluated::Number),
        Node::Call(name, args) => eval_call(name, args, env),
    }
}

fn number(node: &Node, env: &Environment) -> Result<i64, EvalError> {
    eval(node, env)?.as_number()
}

fn eval_binary(op: BinOp, lhs: &Node, rhs: &Node, env: &Environment) -> Result<i64, EvalError> {
    let a = number(lhs, env)?;
    // Short-circuit: the right side of && / || may reference unbound names.
    match op {
        BinOp::And if a == 0 => return Ok(0),
        BinOp::Or if a != 0 => return Ok(1),
        _ => {}
    }
    let b = number(rhs, env)?;
    let flag = |c: bool| -> Result<i64, EvalError> { Ok(i64::from(c)) };
    match op {
        BinOp::Add => a.checked_add(b).ok_or(EvalError::Overflow),
        BinOp::Sub => a.checked_sub(b).ok_or(EvalError::Overflow),
        BinOp::Mul => a.checked_mul(b).ok_or(EvalError::Overflow),
        BinOp::Div => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            a.checked_div(b).ok_or(EvalError::Overflow)
        }
        BinOp::Rem => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            a.checked_rem(b).ok_or(EvalError::Overflow)
        }
        BinOp::Eq => flag(a == b),
        BinOp::Ne => flag(a != b),
        BinOp::Lt => flag(a < b),
        BinOp::Le => flag(a <= b),
        BinOp::Gt => flag(a > b),
        BinOp::Ge => flag(a >= b),
        BinOp::And | BinOp::Or => flag(b != 0),
    }
}

fn eval_call(name: &str, args: &[Node], env: &Environment) -> Result<Evaluated, EvalError> {
    let arity = |expected: &str| EvalError::Arity {
        function: name.to_string(),
        expected: expected.to_string(),
        got: args.len(),
    };
    match name {
        "range" => {
            let [lo, hi] = args else { return Err(arity("2")) };
            let lo = bound(number(lo, env)?)?;
            let hi = bound(number(hi, env)?)?;
            Ok(Evaluated::Rule(ConcreteRule::Range { lo, hi }))
        }
        "one_of" => {
            if args.is_empty() {
                return Err(arity("at least 1"));
            }
            let values = args
                .iter()
                .map(|a| number(a, env).and_then(bound))
                .collect::<Result<_, _>>()?;
            Ok(Evaluated::Rule(ConcreteRule::ValueSet(values)))
        }
        "min" | "max" => {
            let [a, b] = args else { return Err(arity("2")) };
            let (a, b) = (number(a, env)?, number(b, env)?);
            Ok(Evaluated::Number(if name == "min" { a.min(b) } else { a.max(b) }))
        }
        "if" => {
            let [cond, then, otherwise] = args else { return Err(arity("3")) };
            if number(cond, env)? != 0 {
                eval(then, env)
            } else {
                eval(otherwise, env)
            }
        }
        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

fn bound(v: i64) -> Result<u32, EvalError> {
    u32::try_from(v).map_err(|_| EvalError::OutOfRange(v))
}
