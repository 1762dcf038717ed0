//! The closed set of callables an expression may reach.
//!
//! Global names (`len`, `min`, ...), the `math` namespace and the
//! `helpers` namespace all resolve to a [`Function`] variant; nothing else
//! is callable.

use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};

use crate::error::EvalError;
use crate::numeric;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Len,
    Min,
    Max,
    Abs,
    Sum,
    Float,
    Int,
    Str,
    Round,
    // math.*
    Floor,
    Ceil,
    Trunc,
    Fabs,
    Sqrt,
    Pow,
    // helpers.*
    SumItems,
    CountItems,
    TotalVariance,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Math,
    Helpers,
}

impl Namespace {
    pub fn name(&self) -> &'static str {
        match self {
            Namespace::Math => "math",
            Namespace::Helpers => "helpers",
        }
    }

    /// Resolve `namespace.attribute`.
    pub fn member(&self, attribute: &str) -> Option<Function> {
        match (self, attribute) {
            (Namespace::Math, "floor") => Some(Function::Floor),
            (Namespace::Math, "ceil") => Some(Function::Ceil),
            (Namespace::Math, "trunc") => Some(Function::Trunc),
            (Namespace::Math, "fabs") => Some(Function::Fabs),
            (Namespace::Math, "sqrt") => Some(Function::Sqrt),
            (Namespace::Math, "pow") => Some(Function::Pow),
            (Namespace::Helpers, "sum_items") => Some(Function::SumItems),
            (Namespace::Helpers, "count_items") => Some(Function::CountItems),
            (Namespace::Helpers, "total_variance") => Some(Function::TotalVariance),
            (Namespace::Helpers, "coalesce") => Some(Function::Coalesce),
            _ => None,
        }
    }
}

impl Function {
    /// Global built-in names. `helpers` is not here: it only exists when
    /// the context binds it.
    pub fn global(name: &str) -> Option<Value> {
        let func = match name {
            "len" => Function::Len,
            "min" => Function::Min,
            "max" => Function::Max,
            "abs" => Function::Abs,
            "sum" => Function::Sum,
            "float" => Function::Float,
            "int" => Function::Int,
            "str" => Function::Str,
            "round" => Function::Round,
            "math" => return Some(Value::Namespace(Namespace::Math)),
            _ => return None,
        };
        Some(Value::Function(func))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Len => "len",
            Function::Min => "min",
            Function::Max => "max",
            Function::Abs => "abs",
            Function::Sum => "sum",
            Function::Float => "float",
            Function::Int => "int",
            Function::Str => "str",
            Function::Round => "round",
            Function::Floor => "math.floor",
            Function::Ceil => "math.ceil",
            Function::Trunc => "math.trunc",
            Function::Fabs => "math.fabs",
            Function::Sqrt => "math.sqrt",
            Function::Pow => "math.pow",
            Function::SumItems => "helpers.sum_items",
            Function::CountItems => "helpers.count_items",
            Function::TotalVariance => "helpers.total_variance",
            Function::Coalesce => "helpers.coalesce",
        }
    }

    pub fn is_helper(&self) -> bool {
        matches!(
            self,
            Function::SumItems
                | Function::CountItems
                | Function::TotalVariance
                | Function::Coalesce
        )
    }
}

/// Check the argument count of a call.
pub(crate) fn arity(
    func: Function,
    args: &[Value],
    min: usize,
    max: usize,
) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(EvalError::argument(
            func.name(),
            format!("expected {} arguments, got {}", expected, args.len()),
        ));
    }
    Ok(())
}

/// Call a global or `math` function. Helper functions are dispatched by
/// the evaluator, which owns the helper binding.
pub fn call(func: Function, args: Vec<Value>) -> Result<Value, EvalError> {
    match func {
        Function::Len => {
            arity(func, &args, 1, 1)?;
            let n = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(v) | Value::Tuple(v) => v.len(),
                Value::Map(m) | Value::Record(m) => m.len(),
                other => {
                    return Err(EvalError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            i64::try_from(n)
                .map(Value::Int)
                .map_err(|_| EvalError::overflow("length out of range"))
        }
        Function::Min => extreme(func, args, Ordering::Less),
        Function::Max => extreme(func, args, Ordering::Greater),
        Function::Abs => {
            arity(func, &args, 1, 1)?;
            numeric::abs(&args[0])
        }
        Function::Sum => {
            arity(func, &args, 1, 2)?;
            let mut args = args.into_iter();
            let items = iterable(func, args.next())?;
            let mut total = args.next().unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(EvalError::argument(func.name(), "can't sum strings"));
            }
            for item in &items {
                total = numeric::add(&total, item)?;
            }
            Ok(total)
        }
        Function::Float => {
            arity(func, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Decimal(Decimal::ZERO)),
                Some(Value::Str(s)) => parse_decimal(s.trim())
                    .map(Value::Decimal)
                    .ok_or_else(|| {
                        EvalError::argument(
                            func.name(),
                            format!("could not convert string to float: '{}'", s),
                        )
                    }),
                Some(v) => v.as_decimal().map(Value::Decimal).ok_or_else(|| {
                    EvalError::argument(
                        func.name(),
                        format!("argument must be a string or a number, not '{}'", v.type_name()),
                    )
                }),
            }
        }
        Function::Int => {
            arity(func, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Str(s)) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    EvalError::argument(
                        func.name(),
                        format!("invalid literal for int(): '{}'", s),
                    )
                }),
                Some(v) => match v.as_decimal() {
                    Some(d) => d
                        .trunc()
                        .to_i64()
                        .map(Value::Int)
                        .ok_or_else(|| EvalError::overflow("value out of integer range")),
                    None => Err(EvalError::argument(
                        func.name(),
                        format!("argument must be a string or a number, not '{}'", v.type_name()),
                    )),
                },
            }
        }
        Function::Str => {
            arity(func, &args, 0, 1)?;
            Ok(Value::Str(
                args.first().map(Value::to_string).unwrap_or_default(),
            ))
        }
        Function::Round => {
            arity(func, &args, 1, 2)?;
            match args.get(1) {
                None | Some(Value::None) => numeric::round_to_int(&args[0]),
                Some(Value::Int(places)) => numeric::round(&args[0], *places),
                Some(other) => Err(EvalError::argument(
                    func.name(),
                    format!("ndigits must be an integer, not '{}'", other.type_name()),
                )),
            }
        }
        Function::Floor | Function::Ceil | Function::Trunc => {
            arity(func, &args, 1, 1)?;
            let d = number(func, &args[0])?;
            let whole = match func {
                Function::Floor => d.floor(),
                Function::Ceil => d.ceil(),
                _ => d.trunc(),
            };
            whole
                .to_i64()
                .map(Value::Int)
                .ok_or_else(|| EvalError::overflow("value out of integer range"))
        }
        Function::Fabs => {
            arity(func, &args, 1, 1)?;
            Ok(Value::Decimal(number(func, &args[0])?.abs()))
        }
        Function::Sqrt => {
            arity(func, &args, 1, 1)?;
            let d = number(func, &args[0])?;
            if d.is_sign_negative() && !d.is_zero() {
                return Err(EvalError::argument(func.name(), "math domain error"));
            }
            d.sqrt()
                .map(Value::Decimal)
                .ok_or_else(|| EvalError::argument(func.name(), "math domain error"))
        }
        Function::Pow => {
            arity(func, &args, 2, 2)?;
            let base = number(func, &args[0])?;
            let exp = number(func, &args[1])?;
            let result = if exp.fract().is_zero() {
                let e = exp
                    .to_i64()
                    .ok_or_else(|| EvalError::overflow("exponent out of range"))?;
                if base.is_zero() && e < 0 {
                    return Err(EvalError::DivisionByZero);
                }
                base.checked_powi(e)
            } else {
                if base.is_sign_negative() {
                    return Err(EvalError::argument(func.name(), "math domain error"));
                }
                base.checked_powd(exp)
            };
            result
                .map(Value::Decimal)
                .ok_or_else(|| EvalError::overflow("power result out of range"))
        }
        Function::SumItems | Function::CountItems | Function::TotalVariance | Function::Coalesce => {
            Err(EvalError::NotCallable {
                type_name: func.name().to_owned(),
            })
        }
    }
}

fn number(func: Function, v: &Value) -> Result<Decimal, EvalError> {
    v.as_decimal().ok_or_else(|| {
        EvalError::argument(
            func.name(),
            format!("must be a real number, not '{}'", v.type_name()),
        )
    })
}

fn iterable(func: Function, v: Option<Value>) -> Result<Vec<Value>, EvalError> {
    match v {
        Some(Value::List(items)) | Some(Value::Tuple(items)) => Ok(items),
        Some(Value::Str(s)) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Some(other) => Err(EvalError::argument(
            func.name(),
            format!("'{}' object is not iterable", other.type_name()),
        )),
        None => Err(EvalError::argument(func.name(), "expected an iterable")),
    }
}

/// `min`/`max` over either one sequence argument or several arguments.
/// Ties keep the first value seen.
fn extreme(func: Function, args: Vec<Value>, wanted: Ordering) -> Result<Value, EvalError> {
    let candidates = match args.len() {
        0 => {
            return Err(EvalError::argument(
                func.name(),
                "expected at least 1 argument, got 0",
            ))
        }
        1 => iterable(func, args.into_iter().next())?,
        _ => args,
    };
    let mut iter = candidates.into_iter();
    let Some(mut best) = iter.next() else {
        return Err(EvalError::argument(func.name(), "arg is an empty sequence"));
    };
    for candidate in iter {
        if numeric::order(func.name(), &candidate, &best)? == wanted {
            best = candidate;
        }
    }
    Ok(best)
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    if text.contains(['e', 'E']) {
        Decimal::from_scientific(text).ok()
    } else {
        Decimal::from_str(text).ok()
    }
}
