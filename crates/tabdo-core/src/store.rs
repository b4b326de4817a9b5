use std::collections::BTreeMap;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::item::{Category, Item, ItemKey};

/// Everything that gets persisted: the items and the last selected tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    #[serde(default)]
    pub items: BTreeMap<ItemKey, Item>,

    #[serde(default)]
    pub active_category: Category,
}

impl Store {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: ItemKey) -> Option<&Item> {
        self.items.get(&key)
    }

    pub fn get_mut(&mut self, key: ItemKey) -> anyhow::Result<&mut Item> {
        self.items
            .get_mut(&key)
            .ok_or_else(|| anyhow!("no to-do with key {key}"))
    }

    /// Returns a key derived from `now` that no existing item uses.
    pub fn fresh_key(&self, now: DateTime<Utc>) -> ItemKey {
        let mut key = ItemKey::from_time(now);
        while self.items.contains_key(&key) {
            key = key.next();
        }
        key
    }

    #[instrument(skip(self, item), fields(working = item.working))]
    pub fn insert(&mut self, now: DateTime<Utc>, item: Item) -> ItemKey {
        let key = self.fresh_key(now);
        self.items.insert(key, item);
        debug!(%key, count = self.items.len(), "inserted item");
        key
    }

    #[instrument(skip(self))]
    pub fn remove(&mut self, key: ItemKey) -> anyhow::Result<Item> {
        let item = self
            .items
            .remove(&key)
            .ok_or_else(|| anyhow!("no to-do with key {key}"))?;
        debug!(count = self.items.len(), "removed item");
        Ok(item)
    }

    /// Items on the given tab, in creation order.
    pub fn items_in(&self, category: Category) -> impl Iterator<Item = (ItemKey, &Item)> {
        self.items
            .iter()
            .filter(move |(_, item)| item.category() == category)
            .map(|(key, item)| (*key, item))
    }

    pub fn count_in(&self, category: Category) -> usize {
        self.items_in(category).count()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::Store;
    use crate::item::{Category, Item, ItemKey};

    #[test]
    fn fresh_key_skips_taken_instants() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut store = Store::default();

        let first = store.insert(now, Item::new("a".to_string(), Category::Work));
        let second = store.insert(now, Item::new("b".to_string(), Category::Work));

        assert_eq!(first, ItemKey::from_time(now));
        assert_eq!(second, first.next());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn items_are_partitioned_by_category() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut store = Store::default();
        store.insert(now, Item::new("report".to_string(), Category::Work));
        store.insert(now, Item::new("lisbon".to_string(), Category::Travel));
        store.insert(now, Item::new("standup".to_string(), Category::Work));

        let work: Vec<_> = store
            .items_in(Category::Work)
            .map(|(_, item)| item.text.as_str())
            .collect();
        assert_eq!(work, vec!["report", "standup"]);
        assert_eq!(store.count_in(Category::Travel), 1);
    }

    #[test]
    fn document_keeps_category_apart_from_items() {
        let mut store = Store::default();
        store.items.insert(
            ItemKey::new(1_700_000_000_000),
            Item::new("buy milk".to_string(), Category::Work),
        );
        store.active_category = Category::Travel;

        let json = serde_json::to_value(&store).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "items": {
                    "1700000000000": {
                        "text": "buy milk",
                        "working": true,
                        "check": false,
                        "editMode": false
                    }
                },
                "activeCategory": false
            })
        );

        let back: Store = serde_json::from_value(json).unwrap();
        assert_eq!(back, store);
    }

    #[test]
    fn empty_document_defaults_to_work_tab() {
        let store: Store = serde_json::from_str("{}").unwrap();
        assert!(store.is_empty());
        assert_eq!(store.active_category, Category::Work);
    }

    #[test]
    fn removing_unknown_key_is_an_error() {
        let mut store = Store::default();
        let err = store.remove(ItemKey::new(42)).unwrap_err();
        assert!(err.to_string().contains("42"));
    }
}
