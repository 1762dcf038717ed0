//! Runtime values of the expression language.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};

use crate::builtins::{Function, Namespace};
use crate::record::RecordError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Str(String),
    Date(Date),
    DateTime(OffsetDateTime),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Mapping built by a `{...}` literal; subscript access only.
    Map(BTreeMap<String, Value>),
    /// Named fields of an invoice, item or nested object; attribute and
    /// subscript access.
    Record(BTreeMap<String, Value>),
    Function(Function),
    Namespace(Namespace),
}

impl Value {
    /// Returns a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Decimal(_) => "decimal",
            Value::Str(_) => "str",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Map(_) => "dict",
            Value::Record(_) => "record",
            Value::Function(_) => "function",
            Value::Namespace(_) => "namespace",
        }
    }

    /// Truthiness: null, false, zero and empty containers are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Decimal(d) => !d.is_zero(),
            Value::Str(s) => !s.is_empty(),
            Value::List(v) | Value::Tuple(v) => !v.is_empty(),
            Value::Map(m) | Value::Record(m) => !m.is_empty(),
            Value::Date(_) | Value::DateTime(_) | Value::Function(_) | Value::Namespace(_) => true,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Numeric view as a Decimal. Booleans count as 0/1.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Bool(b) => Some(Decimal::from(u8::from(*b))),
            Value::Int(n) => Some(Decimal::from(*n)),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Convert to a JSON scalar for a finding's evidence. Numbers become
    /// floats, dates their ISO-8601 text; containers and callables fall
    /// back to their quoted text form.
    pub fn to_evidence_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        let float = |d: Decimal| {
            d.to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Json::Number)
                .unwrap_or_else(|| Json::String(d.to_string()))
        };
        match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => float(Decimal::from(*n)),
            Value::Decimal(d) => float(*d),
            Value::Str(s) => Json::String(s.clone()),
            Value::Date(_) | Value::DateTime(_) => Json::String(self.to_string()),
            _ => Json::String(self.repr()),
        }
    }

    /// Convert decoded JSON into a value. Objects become records, numbers
    /// with a fractional part or exponent become exact decimals, and strings
    /// shaped like `YYYY-MM-DD` or RFC 3339 timestamps become dates.
    /// Numbers a decimal cannot hold are rejected.
    pub fn from_json(json: &serde_json::Value) -> Result<Value, RecordError> {
        use serde_json::Value as Json;

        Ok(match json {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => {
                    let text = n.to_string();
                    decimal_from_text(&text)
                        .map(Value::Decimal)
                        .ok_or(RecordError::NumberOutOfRange { number: text })?
                }
            },
            Json::String(s) => parse_temporal(s).unwrap_or_else(|| Value::Str(s.clone())),
            Json::Array(items) => Value::List(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            Json::Object(fields) => Value::Record(
                fields
                    .iter()
                    .map(|(k, v)| Ok::<_, RecordError>((k.clone(), Value::from_json(v)?)))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Quoted form used inside containers: `'a'` rather than `a`.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_string(),
        }
    }
}

fn decimal_from_text(text: &str) -> Option<Decimal> {
    if text.contains(['e', 'E']) {
        Decimal::from_scientific(text).ok()
    } else {
        Decimal::from_str(text).ok()
    }
}

fn parse_temporal(s: &str) -> Option<Value> {
    let date_format = time::macros::format_description!("[year]-[month]-[day]");
    if s.len() == 10 {
        return Date::parse(s, &date_format).ok().map(Value::Date);
    }
    if s.len() >= 20 && s.as_bytes().get(10).is_some_and(|b| *b == b'T' || *b == b't') {
        return OffsetDateTime::parse(s, &Rfc3339).ok().map(Value::DateTime);
    }
    None
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Str(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d),
            Value::DateTime(dt) => match dt.format(&Rfc3339) {
                Ok(text) => f.write_str(&text),
                Err(_) => write!(f, "{}", dt),
            },
            Value::List(items) => {
                write!(f, "[{}]", join_repr(items))
            }
            Value::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0].repr()),
            Value::Tuple(items) => write!(f, "({})", join_repr(items)),
            Value::Map(fields) | Value::Record(fields) => {
                let body: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("'{}': {}", k, v.repr()))
                    .collect();
                write!(f, "{{{}}}", body.join(", "))
            }
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Namespace(ns) => write!(f, "<namespace {}>", ns.name()),
        }
    }
}

fn join_repr(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Date> for Value {
    fn from(d: Date) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_follows_emptiness_and_zero() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Decimal(Decimal::ZERO).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::Str("0".into()).is_truthy());
        assert!(Value::Decimal(Decimal::new(1, 2)).is_truthy());
    }

    #[test]
    fn evidence_json_uses_floats_for_numbers() {
        assert_eq!(Value::Decimal(Decimal::new(500, 2)).to_evidence_json(), json!(5.0));
        assert_eq!(Value::Int(3).to_evidence_json(), json!(3.0));
        assert_eq!(Value::None.to_evidence_json(), json!(null));
        assert_eq!(Value::Bool(true).to_evidence_json(), json!(true));
    }

    #[test]
    fn evidence_json_renders_containers_as_text() {
        assert_eq!(
            Value::Tuple(vec![Value::from("a"), Value::from(true)]).to_evidence_json(),
            json!("('a', True)")
        );
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::from("x")]).to_evidence_json(),
            json!("[1, 'x']")
        );
        let record = Value::Record(BTreeMap::from([("cfop".to_owned(), Value::from("6102"))]));
        assert_eq!(record.to_evidence_json(), json!("{'cfop': '6102'}"));
    }

    #[test]
    fn dates_serialize_as_iso_text() {
        let date = Date::from_calendar_date(2024, time::Month::April, 5).unwrap();
        assert_eq!(Value::Date(date).to_evidence_json(), json!("2024-04-05"));
    }

    #[test]
    fn from_json_maps_numbers_and_dates() {
        let v = Value::from_json(&json!({
            "total_value": 95.5,
            "count": 2,
            "issued_on": "2024-03-01",
            "issued_at": "2024-03-01T10:00:00-04:00",
            "cfop": "6102",
            "cest": null
        }))
        .unwrap();
        let Value::Record(fields) = v else {
            panic!("expected record");
        };
        assert_eq!(fields["total_value"], Value::Decimal(Decimal::new(955, 1)));
        assert_eq!(fields["count"], Value::Int(2));
        assert!(matches!(fields["issued_on"], Value::Date(_)));
        assert!(matches!(fields["issued_at"], Value::DateTime(_)));
        assert_eq!(fields["cfop"], Value::Str("6102".into()));
        assert_eq!(fields["cest"], Value::None);
    }

    #[test]
    fn from_json_rejects_numbers_beyond_decimal_range() {
        assert!(matches!(
            Value::from_json(&json!({"total_value": 1e300})),
            Err(RecordError::NumberOutOfRange { .. })
        ));
        assert_eq!(
            Value::from_json(&json!(u64::MAX)).unwrap(),
            Value::Decimal(Decimal::from(u64::MAX))
        );
    }

    #[test]
    fn display_matches_expression_syntax() {
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::None.to_string(), "None");
        assert_eq!(
            Value::List(vec![Value::from("a"), Value::Int(1)]).to_string(),
            "['a', 1]"
        );
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).to_string(), "(1,)");
    }
}
