//! Tree-walking evaluator over a closed set of names.
//!
//! The only names an expression can reach are the context bindings
//! (`invoice`, `item`, `helpers`, ...) and the built-in allow-list. Field
//! access goes through records, never through host reflection, and any
//! name or attribute beginning with `_` is refused outright.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::ast::{Expr, UnaryOp};
use crate::builtins::{self, Function, Namespace};
use crate::error::EvalError;
use crate::helpers::RuleHelper;
use crate::numeric;
use crate::parser;
use crate::value::Value;

/// Parse expression text into a tree that can be evaluated many times.
pub fn compile(text: &str) -> Result<Expr, EvalError> {
    parser::parse_expression(text)
}

// ──────────────────────────────────────────────
// Context
// ──────────────────────────────────────────────

/// Name bindings visible to one evaluation.
///
/// Values are borrowed where possible so the engine can rebuild a context
/// per item without copying the invoice record.
#[derive(Debug, Clone, Default)]
pub struct Context<'a> {
    bindings: BTreeMap<String, Cow<'a, Value>>,
    helpers: Option<RuleHelper<'a>>,
}

impl<'a> Context<'a> {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: &'a Value) -> Self {
        self.bindings.insert(name.into(), Cow::Borrowed(value));
        self
    }

    pub fn bind_owned(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(name.into(), Cow::Owned(value.into()));
        self
    }

    /// Bind `helpers` to the aggregation functions of `helper`.
    pub fn with_helpers(mut self, helper: RuleHelper<'a>) -> Self {
        self.bindings.insert(
            "helpers".to_owned(),
            Cow::Owned(Value::Namespace(Namespace::Helpers)),
        );
        self.helpers = Some(helper);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name).map(|v| v.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}

// ──────────────────────────────────────────────
// Evaluator
// ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Evaluator<'a> {
    context: Context<'a>,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: Context<'a>) -> Self {
        Evaluator { context }
    }

    pub fn context(&self) -> &Context<'a> {
        &self.context
    }

    /// Compile and evaluate `text` in this evaluator's context.
    pub fn evaluate(&self, text: &str) -> Result<Value, EvalError> {
        let expr = compile(text)?;
        self.eval(&expr)
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.eval_ref(expr).map(Cow::into_owned)
    }

    /// Evaluate and take the truthiness of the result.
    pub fn test(&self, expr: &Expr) -> Result<bool, EvalError> {
        self.eval_ref(expr).map(|v| v.is_truthy())
    }

    fn eval_ref<'e>(&'e self, expr: &'e Expr) -> Result<Cow<'e, Value>, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(Cow::Borrowed(value)),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(Cow::Owned(Value::List(self.eval_all(items)?))),
            Expr::Tuple(items) => Ok(Cow::Owned(Value::Tuple(self.eval_all(items)?))),
            Expr::Dict(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let key = match self.eval(key)? {
                        Value::Str(s) => s,
                        other => {
                            return Err(EvalError::type_error(format!(
                                "mapping keys must be strings, not '{}'",
                                other.type_name()
                            )))
                        }
                    };
                    map.insert(key, self.eval(value)?);
                }
                Ok(Cow::Owned(Value::Map(map)))
            }
            Expr::Attribute { target, name } => attribute(self.eval_ref(target)?, name),
            Expr::Index { target, index } => {
                let target = self.eval_ref(target)?;
                let index = self.eval_ref(index)?;
                subscript(target, &index)
            }
            Expr::Slice {
                target,
                lower,
                upper,
                step,
            } => {
                let target = self.eval_ref(target)?;
                let lower = self.slice_bound(lower.as_deref())?;
                let upper = self.slice_bound(upper.as_deref())?;
                let step = self.slice_bound(step.as_deref())?;
                slice(&target, lower, upper, step).map(Cow::Owned)
            }
            Expr::Call { func, args } => {
                let callee = self.eval_ref(func)?;
                let Value::Function(function) = callee.as_ref() else {
                    return Err(EvalError::NotCallable {
                        type_name: callee.type_name().to_owned(),
                    });
                };
                let args = self.eval_all(args)?;
                self.call(*function, args).map(Cow::Owned)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval_ref(operand)?;
                let result = match op {
                    UnaryOp::Plus => numeric::plus(&operand),
                    UnaryOp::Minus => numeric::negate(&operand),
                };
                result.map(Cow::Owned)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval_ref(left)?;
                let right = self.eval_ref(right)?;
                numeric::binary(*op, &left, &right).map(Cow::Owned)
            }
            Expr::And(operands) => self.short_circuit(operands, false),
            Expr::Or(operands) => self.short_circuit(operands, true),
            Expr::Not(operand) => Ok(Cow::Owned(Value::Bool(!self.test(operand)?))),
            Expr::Compare { left, rest } => {
                let mut left = self.eval_ref(left)?;
                for (op, operand) in rest {
                    let right = self.eval_ref(operand)?;
                    if !numeric::compare(*op, &left, &right)? {
                        return Ok(Cow::Owned(Value::Bool(false)));
                    }
                    left = right;
                }
                Ok(Cow::Owned(Value::Bool(true)))
            }
        }
    }

    fn lookup<'e>(&'e self, name: &str) -> Result<Cow<'e, Value>, EvalError> {
        if name.starts_with('_') {
            return Err(EvalError::PrivateName {
                name: name.to_owned(),
            });
        }
        if let Some(value) = self.context.bindings.get(name) {
            return Ok(Cow::Borrowed(value.as_ref()));
        }
        Function::global(name)
            .map(Cow::Owned)
            .ok_or_else(|| EvalError::UnknownName {
                name: name.to_owned(),
            })
    }

    fn eval_all(&self, exprs: &[Expr]) -> Result<Vec<Value>, EvalError> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    /// `and` stops at the first falsy operand, `or` at the first truthy
    /// one; either way the deciding operand is the result.
    fn short_circuit<'e>(
        &'e self,
        operands: &'e [Expr],
        stop_when: bool,
    ) -> Result<Cow<'e, Value>, EvalError> {
        let mut last = Cow::Owned(Value::Bool(!stop_when));
        for operand in operands {
            last = self.eval_ref(operand)?;
            if last.is_truthy() == stop_when {
                break;
            }
        }
        Ok(last)
    }

    fn slice_bound(&self, bound: Option<&Expr>) -> Result<Option<i64>, EvalError> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval_ref(expr)?.as_ref() {
            Value::None => Ok(None),
            Value::Int(n) => Ok(Some(*n)),
            other => Err(EvalError::type_error(format!(
                "slice indices must be integers or None, not '{}'",
                other.type_name()
            ))),
        }
    }

    fn call(&self, function: Function, args: Vec<Value>) -> Result<Value, EvalError> {
        if !function.is_helper() {
            return builtins::call(function, args);
        }
        match &self.context.helpers {
            Some(helper) => helper.call(function, args),
            None => Err(EvalError::UnknownName {
                name: "helpers".to_owned(),
            }),
        }
    }
}

// ──────────────────────────────────────────────
// Access
// ──────────────────────────────────────────────

fn attribute<'v>(target: Cow<'v, Value>, name: &str) -> Result<Cow<'v, Value>, EvalError> {
    if name.starts_with('_') {
        return Err(EvalError::PrivateName {
            name: name.to_owned(),
        });
    }
    match target {
        Cow::Borrowed(value) => attribute_ref(value, name),
        Cow::Owned(value) => attribute_ref(&value, name).map(|v| Cow::Owned(v.into_owned())),
    }
}

fn attribute_ref<'v>(target: &'v Value, name: &str) -> Result<Cow<'v, Value>, EvalError> {
    let missing = |target: &str| EvalError::UnknownAttribute {
        target: target.to_owned(),
        attribute: name.to_owned(),
    };
    match target {
        Value::Record(fields) => fields
            .get(name)
            .map(Cow::Borrowed)
            .ok_or_else(|| missing("record")),
        Value::Namespace(ns) => ns
            .member(name)
            .map(|f| Cow::Owned(Value::Function(f)))
            .ok_or_else(|| missing(ns.name())),
        other => Err(missing(other.type_name())),
    }
}

fn subscript<'v>(target: Cow<'v, Value>, index: &Value) -> Result<Cow<'v, Value>, EvalError> {
    match target {
        Cow::Borrowed(value) => subscript_ref(value, index),
        Cow::Owned(value) => subscript_ref(&value, index).map(|v| Cow::Owned(v.into_owned())),
    }
}

fn subscript_ref<'v>(target: &'v Value, index: &Value) -> Result<Cow<'v, Value>, EvalError> {
    match target {
        Value::List(items) | Value::Tuple(items) => {
            let pos = position(items.len(), index, target.type_name())?;
            Ok(Cow::Borrowed(&items[pos]))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let pos = position(chars.len(), index, "string")?;
            Ok(Cow::Owned(Value::Str(chars[pos].to_string())))
        }
        Value::Map(fields) | Value::Record(fields) => match index {
            Value::Str(key) => fields.get(key).map(Cow::Borrowed).ok_or_else(|| {
                EvalError::KeyError {
                    key: key.clone(),
                }
            }),
            other => Err(EvalError::KeyError {
                key: other.repr(),
            }),
        },
        other => Err(EvalError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Resolve a possibly negative index against a sequence of `len` elements.
fn position(len: usize, index: &Value, what: &str) -> Result<usize, EvalError> {
    let Value::Int(raw) = index else {
        return Err(EvalError::type_error(format!(
            "{} indices must be integers, not '{}'",
            what,
            index.type_name()
        )));
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if *raw < 0 { *raw + len_i } else { *raw };
    usize::try_from(resolved)
        .ok()
        .filter(|&p| p < len)
        .ok_or_else(|| EvalError::IndexError {
            message: format!("{} index out of range", what),
        })
}

fn slice(
    target: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<Value, EvalError> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(EvalError::IndexError {
            message: "slice step cannot be zero".to_owned(),
        });
    }
    match target {
        Value::List(items) => Ok(Value::List(pick(items, lower, upper, step))),
        Value::Tuple(items) => Ok(Value::Tuple(pick(items, lower, upper, step))),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(pick(&chars, lower, upper, step).into_iter().collect()))
        }
        other => Err(EvalError::type_error(format!(
            "'{}' object is not sliceable",
            other.type_name()
        ))),
    }
}

fn pick<T: Clone>(items: &[T], lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<T> {
    slice_positions(items.len(), lower, upper, step)
        .into_iter()
        .map(|i| items[i].clone())
        .collect()
}

/// Positions selected by `[lower:upper:step]`, with out-of-range bounds
/// clamped rather than rejected.
fn slice_positions(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let resolve = |bound: i64| if bound < 0 { bound + len } else { bound };

    let (start, stop) = if step > 0 {
        (
            lower.map_or(0, |b| resolve(b).clamp(0, len)),
            upper.map_or(len, |b| resolve(b).clamp(0, len)),
        )
    } else {
        (
            lower.map_or(len - 1, |b| resolve(b).clamp(-1, len - 1)),
            upper.map_or(-1, |b| resolve(b).clamp(-1, len - 1)),
        )
    };

    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        if let Ok(pos) = usize::try_from(i) {
            out.push(pos);
        }
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    out
}
