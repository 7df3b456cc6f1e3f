//! Collection+JSON documents as served by CUBE
//!
//! Every CUBE resource is an item whose attributes are a list of
//! `{"name": ..., "value": ...}` pairs; lookups go by name.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub collection: Collection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Collection {
    #[serde(default)]
    pub items: Vec<Item>,

    /// Total matches across all pages, when the server reports it
    #[serde(default)]
    pub total: Option<u64>,

    #[serde(default)]
    pub error: Option<Value>,
}

impl Collection {
    /// Number of matching resources; falls back to the items on this page.
    pub fn total(&self) -> u64 {
        self.total.unwrap_or(self.items.len() as u64)
    }

    pub fn first(&self) -> Option<&Item> {
        self.items.first()
    }

    /// The `id` of every item, skipping items without a numeric id.
    pub fn ids(&self) -> Vec<u64> {
        self.items.iter().filter_map(Item::id).collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub data: Vec<Field>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl Item {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Numeric attribute; CUBE occasionally serializes ids as strings.
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<u64> {
        self.get_u64("id")
    }
}
