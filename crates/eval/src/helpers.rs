//! The `helpers` namespace: aggregations over one invoice and its items.

use rust_decimal::Decimal;

use crate::builtins::{arity, Function};
use crate::error::EvalError;
use crate::record::{Invoice, Item};
use crate::value::Value;

/// Bound to one invoice and the item list a rule run iterates over.
/// Stateless, so one instance serves every rule of the run.
#[derive(Debug, Clone, Copy)]
pub struct RuleHelper<'a> {
    invoice: &'a Invoice,
    items: &'a [Item],
}

impl<'a> RuleHelper<'a> {
    pub fn new(invoice: &'a Invoice, items: &'a [Item]) -> Self {
        RuleHelper { invoice, items }
    }

    /// Sum of `field` across items; missing or null values count as zero.
    pub fn sum_items(&self, field: &str) -> Result<Decimal, EvalError> {
        let mut total = Decimal::ZERO;
        for (index, item) in self.items.iter().enumerate() {
            let Some(value) = item.get(field) else {
                continue;
            };
            total = total
                .checked_add(numeric_or_zero(value).ok_or_else(|| {
                    EvalError::type_error(format!(
                        "helpers.sum_items: field '{}' of item {} is {}, not a number",
                        field,
                        index,
                        value.type_name()
                    ))
                })?)
                .ok_or_else(|| EvalError::overflow("helpers.sum_items overflow"))?;
        }
        Ok(total)
    }

    pub fn count_items(&self) -> usize {
        self.items.len()
    }

    /// `|Σ item.total_value + invoice.freight_value - invoice.total_value|`,
    /// nulls as zero.
    pub fn total_variance(&self) -> Result<Decimal, EvalError> {
        let items = self.sum_items("total_value")?;
        let freight = self.invoice_number("freight_value")?;
        let declared = self.invoice_number("total_value")?;
        items
            .checked_add(freight)
            .and_then(|v| v.checked_sub(declared))
            .map(|v| v.abs())
            .ok_or_else(|| EvalError::overflow("helpers.total_variance overflow"))
    }

    /// `value` unless it is null, else `default`.
    pub fn coalesce(value: Value, default: Value) -> Value {
        if value.is_none() {
            default
        } else {
            value
        }
    }

    fn invoice_number(&self, field: &str) -> Result<Decimal, EvalError> {
        let Some(value) = self.invoice.get(field) else {
            return Ok(Decimal::ZERO);
        };
        numeric_or_zero(value).ok_or_else(|| {
            EvalError::type_error(format!(
                "invoice field '{}' is {}, not a number",
                field,
                value.type_name()
            ))
        })
    }

    pub(crate) fn call(&self, func: Function, args: Vec<Value>) -> Result<Value, EvalError> {
        match func {
            Function::SumItems => {
                arity(func, &args, 1, 1)?;
                match &args[0] {
                    Value::Str(field) => self.sum_items(field).map(Value::Decimal),
                    other => Err(EvalError::argument(
                        func.name(),
                        format!("field name must be a string, not '{}'", other.type_name()),
                    )),
                }
            }
            Function::CountItems => {
                arity(func, &args, 0, 0)?;
                i64::try_from(self.count_items())
                    .map(Value::Int)
                    .map_err(|_| EvalError::overflow("item count out of range"))
            }
            Function::TotalVariance => {
                arity(func, &args, 0, 0)?;
                self.total_variance().map(Value::Decimal)
            }
            Function::Coalesce => {
                arity(func, &args, 1, 2)?;
                let mut args = args.into_iter();
                let value = args.next().unwrap_or(Value::None);
                let default = args.next().unwrap_or(Value::Int(0));
                Ok(Self::coalesce(value, default))
            }
            other => Err(EvalError::NotCallable {
                type_name: other.name().to_owned(),
            }),
        }
    }
}

fn numeric_or_zero(value: &Value) -> Option<Decimal> {
    match value {
        Value::None => Some(Decimal::ZERO),
        Value::Int(_) | Value::Decimal(_) => value.as_decimal(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn invoice() -> Invoice {
        Invoice::new()
            .with("total_value", dec("100.00"))
            .with("freight_value", dec("5.00"))
            .with_item(Item::new().with("total_value", dec("60.00")))
            .with_item(Item::new().with("total_value", 30).with("icms_st_value", Value::None))
    }

    #[test]
    fn sums_and_counts_items() {
        let inv = invoice();
        let helper = RuleHelper::new(&inv, inv.items());
        assert_eq!(helper.sum_items("total_value").unwrap(), dec("90.00"));
        assert_eq!(helper.sum_items("icms_st_value").unwrap(), Decimal::ZERO);
        assert_eq!(helper.count_items(), 2);
    }

    #[test]
    fn total_variance_is_absolute() {
        let inv = invoice();
        let helper = RuleHelper::new(&inv, inv.items());
        assert_eq!(helper.total_variance().unwrap(), dec("5.00"));

        let no_freight = Invoice::new()
            .with("total_value", 10)
            .with_item(Item::new().with("total_value", 12));
        let helper = RuleHelper::new(&no_freight, no_freight.items());
        assert_eq!(helper.total_variance().unwrap(), dec("2"));
    }

    #[test]
    fn non_numeric_item_field_is_type_error() {
        let inv = Invoice::new().with_item(Item::new().with("cfop", "6102"));
        let helper = RuleHelper::new(&inv, inv.items());
        assert!(matches!(
            helper.sum_items("cfop"),
            Err(EvalError::TypeError { .. })
        ));
    }

    #[test]
    fn coalesce_defaults_to_zero() {
        let inv = invoice();
        let helper = RuleHelper::new(&inv, inv.items());
        assert_eq!(
            helper.call(Function::Coalesce, vec![Value::None]).unwrap(),
            Value::Int(0)
        );
        assert_eq!(
            helper
                .call(Function::Coalesce, vec![Value::None, Value::from("-")])
                .unwrap(),
            Value::from("-")
        );
        assert_eq!(
            helper.call(Function::Coalesce, vec![Value::Int(4)]).unwrap(),
            Value::Int(4)
        );
    }

    #[test]
    fn helper_arity_checked() {
        let inv = invoice();
        let helper = RuleHelper::new(&inv, inv.items());
        assert!(matches!(
            helper.call(Function::CountItems, vec![Value::Int(1)]),
            Err(EvalError::ArgumentError { .. })
        ));
        assert!(matches!(
            helper.call(Function::SumItems, vec![Value::Int(1)]),
            Err(EvalError::ArgumentError { .. })
        ));
    }
}
