//! Operators over runtime values.
//!
//! Integers use checked `i64` arithmetic; anything touching a decimal is
//! computed with `rust_decimal` and rounded half-to-even where rounding is
//! needed. Overflow is reported, never wrapped.

use std::cmp::Ordering;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::ast::{BinOp, CmpOp};
use crate::error::EvalError;
use crate::value::Value;

/// Largest result a repetition may produce, counted in bytes for strings
/// and in elements (nested ones included) for lists.
const MAX_REPEAT_LEN: usize = 1_000_000;

/// Numeric operand after bool/int/decimal unification.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Dec(Decimal),
}

fn num(v: &Value) -> Option<Num> {
    match v {
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Int(n) => Some(Num::Int(*n)),
        Value::Decimal(d) => Some(Num::Dec(*d)),
        _ => None,
    }
}

fn to_dec(n: Num) -> Decimal {
    match n {
        Num::Int(i) => Decimal::from(i),
        Num::Dec(d) => d,
    }
}

fn unsupported(op: &str, left: &Value, right: &Value) -> EvalError {
    EvalError::UnsupportedOperator {
        op: op.to_owned(),
        left: left.type_name().to_owned(),
        right: right.type_name().to_owned(),
    }
}

// ──────────────────────────────────────────────
// Arithmetic
// ──────────────────────────────────────────────

pub fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        BinOp::Add => add(left, right),
        BinOp::Sub => sub(left, right),
        BinOp::Mul => mul(left, right),
        BinOp::Div => div(left, right),
        BinOp::Mod => modulo(left, right),
    }
}

pub fn add(left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (Value::List(a), Value::List(b)) => Ok(Value::List([a.as_slice(), b.as_slice()].concat())),
        (Value::Tuple(a), Value::Tuple(b)) => Ok(Value::Tuple([a.as_slice(), b.as_slice()].concat())),
        _ => match (num(left), num(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => a
                .checked_add(b)
                .map(Value::Int)
                .ok_or_else(|| EvalError::overflow("integer addition overflow")),
            (Some(a), Some(b)) => to_dec(a)
                .checked_add(to_dec(b))
                .map(Value::Decimal)
                .ok_or_else(|| EvalError::overflow("decimal addition overflow")),
            _ => Err(unsupported("+", left, right)),
        },
    }
}

fn sub(left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (num(left), num(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a
            .checked_sub(b)
            .map(Value::Int)
            .ok_or_else(|| EvalError::overflow("integer subtraction overflow")),
        (Some(a), Some(b)) => to_dec(a)
            .checked_sub(to_dec(b))
            .map(Value::Decimal)
            .ok_or_else(|| EvalError::overflow("decimal subtraction overflow")),
        _ => Err(unsupported("-", left, right)),
    }
}

fn mul(left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
            let count = repeat_count(*n, s.len())?;
            Ok(Value::Str(s.repeat(count)))
        }
        (Value::List(v), Value::Int(n)) | (Value::Int(n), Value::List(v)) => {
            let unit = v.iter().fold(0usize, |acc, x| acc.saturating_add(weight(x)));
            let count = repeat_count(*n, unit)?;
            Ok(Value::List((0..count).flat_map(|_| v.iter().cloned()).collect()))
        }
        _ => match (num(left), num(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => a
                .checked_mul(b)
                .map(Value::Int)
                .ok_or_else(|| EvalError::overflow("integer multiplication overflow")),
            (Some(a), Some(b)) => to_dec(a)
                .checked_mul(to_dec(b))
                .map(Value::Decimal)
                .ok_or_else(|| EvalError::overflow("decimal multiplication overflow")),
            _ => Err(unsupported("*", left, right)),
        },
    }
}

/// Size of a value as seen by the repetition cap.
fn weight(v: &Value) -> usize {
    match v {
        Value::Str(s) => s.len().max(1),
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .fold(1usize, |acc, x| acc.saturating_add(weight(x))),
        Value::Map(fields) | Value::Record(fields) => fields.iter().fold(1usize, |acc, (k, x)| {
            acc.saturating_add(k.len()).saturating_add(weight(x))
        }),
        _ => 1,
    }
}

fn repeat_count(n: i64, unit_len: usize) -> Result<usize, EvalError> {
    if n <= 0 || unit_len == 0 {
        return Ok(0);
    }
    let count = usize::try_from(n).map_err(|_| EvalError::overflow("repeat count too large"))?;
    match count.checked_mul(unit_len) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(count),
        _ => Err(EvalError::overflow(format!(
            "repetition longer than {} elements",
            MAX_REPEAT_LEN
        ))),
    }
}

/// True division: the result is always a decimal.
fn div(left: &Value, right: &Value) -> Result<Value, EvalError> {
    let (Some(a), Some(b)) = (num(left), num(right)) else {
        return Err(unsupported("/", left, right));
    };
    let divisor = to_dec(b);
    if divisor.is_zero() {
        return Err(EvalError::DivisionByZero);
    }
    to_dec(a)
        .checked_div(divisor)
        .map(Value::Decimal)
        .ok_or_else(|| EvalError::overflow("decimal division overflow"))
}

/// Floored modulo: the result takes the sign of the divisor.
fn modulo(left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (num(left), num(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            let r = a
                .checked_rem(b)
                .ok_or_else(|| EvalError::overflow("integer modulo overflow"))?;
            Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
        }
        (Some(a), Some(b)) => {
            let (a, b) = (to_dec(a), to_dec(b));
            if b.is_zero() {
                return Err(EvalError::DivisionByZero);
            }
            let r = a
                .checked_rem(b)
                .ok_or_else(|| EvalError::overflow("decimal modulo overflow"))?;
            let r = if !r.is_zero() && r.is_sign_negative() != b.is_sign_negative() {
                r + b
            } else {
                r
            };
            Ok(Value::Decimal(r))
        }
        _ => Err(unsupported("%", left, right)),
    }
}

pub fn negate(v: &Value) -> Result<Value, EvalError> {
    match num(v) {
        Some(Num::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| EvalError::overflow("integer negation overflow")),
        Some(Num::Dec(d)) => Ok(Value::Decimal(-d)),
        None => Err(EvalError::type_error(format!(
            "bad operand type for unary -: '{}'",
            v.type_name()
        ))),
    }
}

pub fn plus(v: &Value) -> Result<Value, EvalError> {
    match num(v) {
        Some(Num::Int(n)) => Ok(Value::Int(n)),
        Some(Num::Dec(d)) => Ok(Value::Decimal(d)),
        None => Err(EvalError::type_error(format!(
            "bad operand type for unary +: '{}'",
            v.type_name()
        ))),
    }
}

pub fn abs(v: &Value) -> Result<Value, EvalError> {
    match num(v) {
        Some(Num::Int(n)) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| EvalError::overflow("integer abs overflow")),
        Some(Num::Dec(d)) => Ok(Value::Decimal(d.abs())),
        None => Err(EvalError::type_error(format!(
            "bad operand type for abs(): '{}'",
            v.type_name()
        ))),
    }
}

/// Round half-to-even to `places` digits (negative rounds to tens,
/// hundreds, ...). Integers stay integers.
pub fn round(v: &Value, places: i64) -> Result<Value, EvalError> {
    match num(v) {
        Some(Num::Int(n)) if places >= 0 => Ok(Value::Int(n)),
        Some(Num::Int(n)) => round_decimal(Decimal::from(n), places)?
            .to_i64()
            .map(Value::Int)
            .ok_or_else(|| EvalError::overflow("rounded value out of integer range")),
        Some(Num::Dec(d)) => Ok(Value::Decimal(round_decimal(d, places)?)),
        None => Err(EvalError::type_error(format!(
            "type {} doesn't define rounding",
            v.type_name()
        ))),
    }
}

/// Round to the nearest integer, half-to-even.
pub fn round_to_int(v: &Value) -> Result<Value, EvalError> {
    match num(v) {
        Some(Num::Int(n)) => Ok(Value::Int(n)),
        Some(Num::Dec(d)) => d
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
            .to_i64()
            .map(Value::Int)
            .ok_or_else(|| EvalError::overflow("rounded value out of integer range")),
        None => Err(EvalError::type_error(format!(
            "type {} doesn't define rounding",
            v.type_name()
        ))),
    }
}

fn round_decimal(d: Decimal, places: i64) -> Result<Decimal, EvalError> {
    if places >= 0 {
        let dp = u32::try_from(places.min(28)).unwrap_or(28);
        return Ok(d.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven));
    }
    let exp = match u32::try_from(places.unsigned_abs()) {
        Ok(exp) if exp <= 28 => exp,
        _ => return Ok(Decimal::ZERO),
    };
    let factor = Decimal::from_i128_with_scale(10i128.pow(exp), 0);
    let scaled = d
        .checked_div(factor)
        .ok_or_else(|| EvalError::overflow("rounding overflow"))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    scaled
        .checked_mul(factor)
        .ok_or_else(|| EvalError::overflow("rounding overflow"))
}

// ──────────────────────────────────────────────
// Comparison
// ──────────────────────────────────────────────

/// Equality across the value model. Values of unrelated types are simply
/// unequal; numbers compare by value regardless of representation.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (num(left), num(right)) {
        return match (a, b) {
            (Num::Int(x), Num::Int(y)) => x == y,
            (x, y) => to_dec(x) == to_dec(y),
        };
    }
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Date(a), Value::Date(b)) => a == b,
        (Value::DateTime(a), Value::DateTime(b)) => a == b,
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Map(a) | Value::Record(a), Value::Map(b) | Value::Record(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|w| values_equal(v, w)))
        }
        (Value::Function(a), Value::Function(b)) => a == b,
        (Value::Namespace(a), Value::Namespace(b)) => a == b,
        _ => false,
    }
}

/// Ordering for `<`, `<=`, `>`, `>=`, `min` and `max`.
pub fn order(op: &str, left: &Value, right: &Value) -> Result<Ordering, EvalError> {
    if let (Some(a), Some(b)) = (num(left), num(right)) {
        return Ok(match (a, b) {
            (Num::Int(x), Num::Int(y)) => x.cmp(&y),
            (x, y) => to_dec(x).cmp(&to_dec(y)),
        });
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Ok(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
            for (x, y) in a.iter().zip(b) {
                if !values_equal(x, y) {
                    return order(op, x, y);
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => Err(EvalError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op,
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// Membership test for `in` / `not in`.
pub fn contains(container: &Value, needle: &Value) -> Result<bool, EvalError> {
    match container {
        Value::List(items) | Value::Tuple(items) => {
            Ok(items.iter().any(|item| values_equal(item, needle)))
        }
        Value::Str(haystack) => match needle {
            Value::Str(s) => Ok(haystack.contains(s.as_str())),
            other => Err(EvalError::type_error(format!(
                "'in <str>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Map(fields) | Value::Record(fields) => Ok(match needle {
            Value::Str(key) => fields.contains_key(key),
            _ => false,
        }),
        other => Err(EvalError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Apply one link of a comparison chain.
pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    Ok(match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::Neq => !values_equal(left, right),
        CmpOp::Lt => order(op.symbol(), left, right)? == Ordering::Less,
        CmpOp::Lte => order(op.symbol(), left, right)? != Ordering::Greater,
        CmpOp::Gt => order(op.symbol(), left, right)? == Ordering::Greater,
        CmpOp::Gte => order(op.symbol(), left, right)? != Ordering::Less,
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Is => same_kind(left, right) && values_equal(left, right),
        CmpOp::IsNot => !(same_kind(left, right) && values_equal(left, right)),
    })
}

fn same_kind(left: &Value, right: &Value) -> bool {
    std::mem::discriminant(left) == std::mem::discriminant(right)
}
