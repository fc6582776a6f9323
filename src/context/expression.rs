//! Condition Expressions
//!
//! The small typed grammar used by `condition`, `while_loop` and
//! `do_while_loop`, defined in `expression.pest`. It has no calls or
//! attribute evaluation beyond variable lookup, so a condition can read the
//! context but never run code.
//!
//! Precedence, lowest first: `or`/`||`, `and`/`&&`, `not`/`!`, comparisons
//! (`==`, `!=`, `<`, `<=`, `>`, `>=`, `in`, `not in`), `+`/`-`,
//! `*`/`/`/`%`, unary `-`.
//!
//! Chained comparisons behave like Python's: `1 < x < 5` means
//! `1 < x and x < 5`. Truthiness and `%` follow Python as well.

use std::cmp::Ordering;

use log::warn;
use once_cell::sync::Lazy;
use pest::error::InputLocation;
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;
use serde_json::{Number, Value};
use thiserror::Error;

use super::store::Context;

#[derive(Parser)]
#[grammar = "context/expression.pest"]
struct ConditionParser;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    /// `a < b <= c`: operands and the operators between them
    Compare(Vec<Expr>, Vec<CompareOp>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Parses and evaluates `source`, returning its truthiness.
pub fn evaluate(source: &str, ctx: &Context) -> Result<bool, ExpressionError> {
    let expr = parse(source)?;
    Ok(truthy(&expr.eval(ctx)?))
}

/// Parses `source` into an expression tree.
pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let root = ConditionParser::parse(Rule::condition, source)
        .map_err(syntax_error)?
        .next()
        .and_then(|condition| condition.into_inner().next())
        .ok_or_else(|| syntax(0, "empty expression"))?;
    build_disjunction(root)
}

/// Python-style truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/* ===================== Tree Building ===================== */

static LOGIC: Lazy<PrattParser<Rule>> = Lazy::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::op_or, Assoc::Left))
        .op(Op::infix(Rule::op_and, Assoc::Left))
        .op(Op::prefix(Rule::op_not))
});

static ARITHMETIC: Lazy<PrattParser<Rule>> = Lazy::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::op_add, Assoc::Left) | Op::infix(Rule::op_sub, Assoc::Left))
        .op(Op::infix(Rule::op_mul, Assoc::Left)
            | Op::infix(Rule::op_div, Assoc::Left)
            | Op::infix(Rule::op_rem, Assoc::Left))
        .op(Op::prefix(Rule::op_neg))
});

fn syntax(offset: usize, message: &str) -> ExpressionError {
    ExpressionError::Syntax {
        offset,
        message: message.to_string(),
    }
}

fn syntax_error(err: pest::error::Error<Rule>) -> ExpressionError {
    let offset = match err.location {
        InputLocation::Pos(pos) => pos,
        InputLocation::Span((start, _)) => start,
    };
    ExpressionError::Syntax {
        offset,
        message: err.variant.message().into_owned(),
    }
}

fn unexpected(pair: &Pair<Rule>) -> ExpressionError {
    syntax(
        pair.as_span().start(),
        &format!("unexpected {:?} '{}'", pair.as_rule(), pair.as_str()),
    )
}

fn build_disjunction(pair: Pair<Rule>) -> Result<Expr, ExpressionError> {
    LOGIC
        .map_primary(build_comparison)
        .map_prefix(|_, operand| Ok(Expr::Unary(UnaryOp::Not, Box::new(operand?))))
        .map_infix(|left, op, right| {
            let op = match op.as_rule() {
                Rule::op_and => BinaryOp::And,
                Rule::op_or => BinaryOp::Or,
                _ => return Err(unexpected(&op)),
            };
            Ok(Expr::Binary(Box::new(left?), op, Box::new(right?)))
        })
        .parse(pair.into_inner())
}

fn build_comparison(pair: Pair<Rule>) -> Result<Expr, ExpressionError> {
    if pair.as_rule() != Rule::comparison {
        return Err(unexpected(&pair));
    }

    let mut operands = Vec::new();
    let mut ops = Vec::new();
    for part in pair.into_inner() {
        let op = match part.as_rule() {
            Rule::sum => {
                operands.push(build_sum(part)?);
                continue;
            }
            Rule::op_eq => CompareOp::Eq,
            Rule::op_ne => CompareOp::Ne,
            Rule::op_lt => CompareOp::Lt,
            Rule::op_le => CompareOp::Le,
            Rule::op_gt => CompareOp::Gt,
            Rule::op_ge => CompareOp::Ge,
            Rule::op_in => CompareOp::In,
            Rule::op_not_in => CompareOp::NotIn,
            _ => return Err(unexpected(&part)),
        };
        ops.push(op);
    }

    if ops.is_empty() {
        if let Some(single) = operands.pop() {
            return Ok(single);
        }
    }
    Ok(Expr::Compare(operands, ops))
}

fn build_sum(pair: Pair<Rule>) -> Result<Expr, ExpressionError> {
    ARITHMETIC
        .map_primary(build_operand)
        .map_prefix(|_, operand| Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand?))))
        .map_infix(|left, op, right| {
            let op = match op.as_rule() {
                Rule::op_add => BinaryOp::Add,
                Rule::op_sub => BinaryOp::Sub,
                Rule::op_mul => BinaryOp::Mul,
                Rule::op_div => BinaryOp::Div,
                Rule::op_rem => BinaryOp::Rem,
                _ => return Err(unexpected(&op)),
            };
            Ok(Expr::Binary(Box::new(left?), op, Box::new(right?)))
        })
        .parse(pair.into_inner())
}

fn build_operand(pair: Pair<Rule>) -> Result<Expr, ExpressionError> {
    let offset = pair.as_span().start();
    match pair.as_rule() {
        Rule::int => pair
            .as_str()
            .parse::<i64>()
            .map(|n| Expr::Literal(Value::from(n)))
            .map_err(|_| syntax(offset, "integer out of range")),
        Rule::float => pair
            .as_str()
            .parse::<f64>()
            .map(|f| Expr::Literal(float(f)))
            .map_err(|_| syntax(offset, "invalid number")),
        Rule::string => {
            let raw = pair.into_inner().next().map_or("", |inner| inner.as_str());
            Ok(Expr::Literal(Value::String(unescape(raw))))
        }
        Rule::list => Ok(Expr::List(
            pair.into_inner()
                .map(build_disjunction)
                .collect::<Result<_, _>>()?,
        )),
        Rule::disjunction => build_disjunction(pair),
        Rule::name => Ok(match pair.as_str() {
            "true" | "True" => Expr::Literal(Value::Bool(true)),
            "false" | "False" => Expr::Literal(Value::Bool(false)),
            "null" | "None" => Expr::Literal(Value::Null),
            name => Expr::Var(name.to_string()),
        }),
        _ => Err(unexpected(&pair)),
    }
}

fn unescape(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => text.push('\n'),
            Some('t') => text.push('\t'),
            Some(other) => text.push(other),
            None => break,
        }
    }
    text
}

/* ===================== Evaluation ===================== */

impl Expr {
    /// Evaluates this expression against `ctx`.
    ///
    /// Unknown variables log a warning and evaluate to empty text.
    pub fn eval(&self, ctx: &Context) -> Result<Value, ExpressionError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => Ok(ctx.lookup(name).unwrap_or_else(|| {
                warn!("Variable '{}' is not defined, using empty value", name);
                Value::String(String::new())
            })),
            Expr::List(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| item.eval(ctx))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!truthy(&operand.eval(ctx)?))),
            Expr::Unary(UnaryOp::Neg, operand) => match Num::of(&operand.eval(ctx)?) {
                Some(Num::Int(i)) => i
                    .checked_neg()
                    .map(Value::from)
                    .ok_or_else(|| ExpressionError::Type("integer overflow".to_string())),
                Some(Num::Float(f)) => Ok(float(-f)),
                None => Err(ExpressionError::Type("cannot negate a non-number".to_string())),
            },
            Expr::Binary(left, BinaryOp::And, right) => {
                Ok(Value::Bool(truthy(&left.eval(ctx)?) && truthy(&right.eval(ctx)?)))
            }
            Expr::Binary(left, BinaryOp::Or, right) => {
                Ok(Value::Bool(truthy(&left.eval(ctx)?) || truthy(&right.eval(ctx)?)))
            }
            Expr::Binary(left, op, right) => arithmetic(*op, &left.eval(ctx)?, &right.eval(ctx)?),
            Expr::Compare(operands, ops) => {
                let mut left = operands[0].eval(ctx)?;
                for (op, operand) in ops.iter().zip(&operands[1..]) {
                    let right = operand.eval(ctx)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    /// Numbers and booleans are numeric.
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Num::Int)
                .or_else(|| n.as_f64().map(Num::Float)),
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            _ => None,
        }
    }

    /// Like [`Num::of`], but also reads numeric text such as command output.
    fn coerce(value: &Value) -> Option<Num> {
        match value {
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Num::Int)
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(Num::Float))
            }
            other => Num::of(other),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    if op == BinaryOp::Add {
        match (left, right) {
            (Value::String(a), Value::String(b)) => return Ok(Value::String(format!("{}{}", a, b))),
            (Value::Array(a), Value::Array(b)) => {
                return Ok(Value::Array(a.iter().chain(b).cloned().collect()))
            }
            _ => {}
        }
    }

    let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) else {
        return Err(ExpressionError::Type(format!(
            "unsupported operands for {:?}: {} and {}",
            op, left, right
        )));
    };

    match (op, a, b) {
        (BinaryOp::Div, _, b) if b.as_f64() == 0.0 => Err(ExpressionError::DivisionByZero),
        (BinaryOp::Rem, _, b) if b.as_f64() == 0.0 => Err(ExpressionError::DivisionByZero),
        (BinaryOp::Div, a, b) => Ok(float(a.as_f64() / b.as_f64())),
        (op, Num::Int(a), Num::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                _ => Some(floor_rem(a, b)),
            };
            result
                .map(Value::from)
                .ok_or_else(|| ExpressionError::Type("integer overflow".to_string()))
        }
        (op, a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            Ok(float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                _ => {
                    let r = a % b;
                    if r != 0.0 && (r < 0.0) != (b < 0.0) {
                        r + b
                    } else {
                        r
                    }
                }
            }))
        }
    }
}

/// Remainder with the sign of the divisor. `b` is non-zero.
fn floor_rem(a: i64, b: i64) -> i64 {
    // i64::MIN % -1 is 0
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        r + b
    } else {
        r
    }
}

/// Equality that treats `6`, `6.0` and `"6"` as equal.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    let numeric_side = matches!(left, Value::Number(_)) || matches!(right, Value::Number(_));
    match (Num::coerce(left), Num::coerce(right)) {
        (Some(a), Some(b)) if numeric_side => a.as_f64() == b.as_f64(),
        _ => false,
    }
}

fn ordering(left: &Value, right: &Value) -> Result<Ordering, ExpressionError> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (Num::coerce(left), Num::coerce(right)) {
            (Some(a), Some(b)) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .ok_or_else(|| ExpressionError::Type("cannot order NaN".to_string())),
            _ => Err(ExpressionError::Type(format!(
                "cannot order {} and {}",
                left, right
            ))),
        },
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool, ExpressionError> {
    match container {
        Value::Array(items) => Ok(items.iter().any(|item| loosely_equal(item, needle))),
        Value::String(haystack) => match needle {
            Value::String(n) => Ok(haystack.contains(n.as_str())),
            other => Ok(haystack.contains(&other.to_string())),
        },
        Value::Object(map) => match needle {
            Value::String(key) => Ok(map.contains_key(key)),
            _ => Ok(false),
        },
        other => Err(ExpressionError::Type(format!("{} is not a container", other))),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
    Ok(match op {
        CompareOp::Eq => loosely_equal(left, right),
        CompareOp::Ne => !loosely_equal(left, right),
        CompareOp::Lt => ordering(left, right)? == Ordering::Less,
        CompareOp::Le => ordering(left, right)? != Ordering::Greater,
        CompareOp::Gt => ordering(left, right)? == Ordering::Greater,
        CompareOp::Ge => ordering(left, right)? != Ordering::Less,
        CompareOp::In => contains(right, left)?,
        CompareOp::NotIn => !contains(right, left)?,
    })
}
