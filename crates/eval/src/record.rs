//! Invoice and line-item records as seen by rule expressions.
//!
//! Records are open field maps: ingestion decides which fields exist, and
//! an expression that names a missing field gets an evaluation error.

use std::collections::BTreeMap;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("{what} must be a JSON object")]
    NotAnObject { what: String },
    #[error("invoice field 'items' must be a list")]
    ItemsNotList,
    #[error("number {number} is out of range")]
    NumberOutOfRange { number: String },
}

/// One line item of an invoice.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Item {
    fields: BTreeMap<String, Value>,
}

impl Item {
    pub fn new() -> Self {
        Item::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// The record value bound to `item` in expressions.
    pub fn to_value(&self) -> Value {
        Value::Record(self.fields.clone())
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Item, RecordError> {
        let obj = json.as_object().ok_or_else(|| RecordError::NotAnObject {
            what: "item".to_owned(),
        })?;
        Ok(Item {
            fields: record_fields(obj, None)?,
        })
    }
}

/// An invoice header plus its ordered line items.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Invoice {
    fields: BTreeMap<String, Value>,
    items: Vec<Item>,
}

impl Invoice {
    pub fn new() -> Self {
        Invoice::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn push_item(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// The record value bound to `invoice` in expressions. Items are not
    /// part of it; rules reach them through item scope or `helpers`.
    pub fn to_value(&self) -> Value {
        Value::Record(self.fields.clone())
    }

    /// Build an invoice from an exported JSON object. The optional `items`
    /// array supplies the line items; every other key becomes a field.
    pub fn from_json(json: &serde_json::Value) -> Result<Invoice, RecordError> {
        let obj = json.as_object().ok_or_else(|| RecordError::NotAnObject {
            what: "invoice".to_owned(),
        })?;

        let items = match obj.get("items") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(entries)) => entries
                .iter()
                .enumerate()
                .map(|(i, entry)| {
                    Item::from_json(entry).map_err(|err| match err {
                        RecordError::NotAnObject { .. } => RecordError::NotAnObject {
                            what: format!("item #{}", i + 1),
                        },
                        other => other,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(RecordError::ItemsNotList),
        };

        Ok(Invoice {
            fields: record_fields(obj, Some("items"))?,
            items,
        })
    }
}

fn record_fields(
    obj: &serde_json::Map<String, serde_json::Value>,
    skip: Option<&str>,
) -> Result<BTreeMap<String, Value>, RecordError> {
    obj.iter()
        .filter(|(k, _)| Some(k.as_str()) != skip)
        .map(|(k, v)| Ok::<_, RecordError>((k.clone(), Value::from_json(v)?)))
        .collect()
}
