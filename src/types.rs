use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use crate::error::{GicsError, Result};

/// Price and quantity of one item inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub price: i64,
    pub quantity: i64,
}

impl Item {
    pub fn new(price: i64, quantity: i64) -> Self {
        Self { price, quantity }
    }
}

/// A timestamped set of items keyed by item id.
///
/// Item order carries no meaning. The encoder serialises items in ascending
/// id order, so two snapshots that compare equal always encode to the same
/// bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: i64,
    pub items: HashMap<i64, Item>,
}

impl Snapshot {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            items: HashMap::new(),
        }
    }

    /// Builder-style insert, mostly for tests and fixtures.
    pub fn with_item(mut self, id: i64, price: i64, quantity: i64) -> Self {
        self.items.insert(id, Item::new(price, quantity));
        self
    }

    pub fn insert(&mut self, id: i64, price: i64, quantity: i64) {
        self.items.insert(id, Item::new(price, quantity));
    }

    /// Items as `(id, item)` pairs in ascending id order.
    pub fn sorted_items(&self) -> Vec<(i64, Item)> {
        let mut items: Vec<(i64, Item)> = self.items.iter().map(|(k, v)| (*k, *v)).collect();
        items.sort_unstable_by_key(|(id, _)| *id);
        items
    }
}
