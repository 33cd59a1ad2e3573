//! Funnel table and item registry.
//!
//! Each stored item carries a membership count: the number of funnels that
//! list it. An item is dropped from the registry when that count reaches
//! zero, so every id found in a funnel always resolves to an item.

use std::collections::hash_map::Entry;
use std::sync::Arc;

use fnv::FnvHashMap;

use super::funnel::Funnel;
use crate::error::{PredictError, Result};
use crate::types::{FunnelId, Item, ItemId};

#[derive(Debug)]
struct StoredItem {
    item: Arc<Item>,
    memberships: u32,
}

#[derive(Debug, Default)]
pub struct Farm {
    funnels: FnvHashMap<FunnelId, Funnel>,
    items: FnvHashMap<ItemId, StoredItem>,
    /// Returned by `funnel` for ids without members.
    empty: Funnel,
}

impl Farm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a farm from persisted funnels and items.
    ///
    /// Membership counts are recomputed. Fails if a funnel is empty or
    /// unsorted, references an unknown item, or if an item belongs to no funnel.
    pub fn restore<F, I>(funnels: F, items: I) -> Result<Self>
    where
        F: IntoIterator<Item = (FunnelId, Funnel)>,
        I: IntoIterator<Item = Item>,
    {
        let mut farm = Self::new();
        for item in items {
            let id = item.id;
            let stored = StoredItem {
                item: Arc::new(item),
                memberships: 0,
            };
            if farm.items.insert(id, stored).is_some() {
                return Err(PredictError::Integrity(format!(
                    "item {id} is stored twice"
                )));
            }
        }

        for (funnel_id, funnel) in funnels {
            if funnel.is_empty() || !funnel.is_strictly_sorted() {
                return Err(PredictError::Integrity(format!(
                    "funnel {} is empty or unsorted",
                    funnel_id.get()
                )));
            }
            for id in funnel.iter() {
                let Some(stored) = farm.items.get_mut(&id) else {
                    return Err(PredictError::Integrity(format!(
                        "funnel {} references unknown item {id}",
                        funnel_id.get()
                    )));
                };
                stored.memberships += 1;
            }
            if farm.funnels.insert(funnel_id, funnel).is_some() {
                return Err(PredictError::Integrity(format!(
                    "funnel {} is stored twice",
                    funnel_id.get()
                )));
            }
        }

        if let Some((id, _)) = farm.items.iter().find(|(_, stored)| stored.memberships == 0) {
            return Err(PredictError::Integrity(format!(
                "item {id} belongs to no funnel"
            )));
        }
        Ok(farm)
    }

    /// Adds `item` to `funnel`.
    ///
    /// A new membership stores (or overwrites) the item and returns true. An
    /// existing membership only overwrites the document when `upsert` is set,
    /// returning `upsert`.
    pub fn attach(&mut self, funnel: FunnelId, item: Arc<Item>, upsert: bool) -> bool {
        let id = item.id;
        let added = self.funnels.entry(funnel).or_default().insert(id);
        if added {
            match self.items.entry(id) {
                Entry::Occupied(mut entry) => {
                    let stored = entry.get_mut();
                    stored.item = item;
                    stored.memberships += 1;
                }
                Entry::Vacant(entry) => {
                    entry.insert(StoredItem {
                        item,
                        memberships: 1,
                    });
                }
            }
            return true;
        }
        if upsert {
            if let Some(stored) = self.items.get_mut(&id) {
                stored.item = item;
            }
        }
        upsert
    }

    /// Removes `id` from `funnel`, returning false if it was not a member.
    pub fn detach(&mut self, funnel: FunnelId, id: ItemId) -> bool {
        let Some(members) = self.funnels.get_mut(&funnel) else {
            return false;
        };
        if !members.remove(id) {
            return false;
        }
        if members.is_empty() {
            self.funnels.remove(&funnel);
        }
        if let Entry::Occupied(mut entry) = self.items.entry(id) {
            let stored = entry.get_mut();
            stored.memberships = stored.memberships.saturating_sub(1);
            if stored.memberships == 0 {
                entry.remove();
            }
        }
        true
    }

    /// Members of `funnel`; empty when the funnel has none.
    pub fn funnel(&self, funnel: FunnelId) -> &Funnel {
        self.funnels.get(&funnel).unwrap_or(&self.empty)
    }

    pub fn item(&self, id: ItemId) -> Option<&Arc<Item>> {
        self.items.get(&id).map(|stored| &stored.item)
    }

    /// Number of funnels listing `id`.
    pub fn memberships(&self, id: ItemId) -> u32 {
        self.items.get(&id).map_or(0, |stored| stored.memberships)
    }

    #[inline]
    pub fn contains_item(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    #[inline]
    pub fn funnel_count(&self) -> usize {
        self.funnels.len()
    }

    #[inline]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Non-empty funnels in arbitrary order.
    pub fn funnels(&self) -> impl Iterator<Item = (FunnelId, &Funnel)> + '_ {
        self.funnels.iter().map(|(id, funnel)| (*id, funnel))
    }

    /// Stored items in arbitrary order.
    pub fn items(&self) -> impl Iterator<Item = &Arc<Item>> + '_ {
        self.items.values().map(|stored| &stored.item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: ItemId, name: &str) -> Arc<Item> {
        Arc::new(Item::from_document(json!({"id": id, "name": name}), "id").unwrap())
    }

    fn funnel(raw: u32) -> FunnelId {
        FunnelId::new(raw)
    }

    #[test]
    fn attach_tracks_memberships() {
        let mut farm = Farm::new();
        assert!(farm.attach(funnel(0), item(1, "a"), false));
        assert!(farm.attach(funnel(1), item(1, "a"), false));
        assert!(!farm.attach(funnel(1), item(1, "a"), false));
        assert_eq!(farm.memberships(1), 2);
        assert_eq!(farm.item_count(), 1);
        assert_eq!(farm.funnel_count(), 2);
    }

    #[test]
    fn upsert_overwrites_existing_member() {
        let mut farm = Farm::new();
        farm.attach(funnel(0), item(1, "old"), false);
        assert!(!farm.attach(funnel(0), item(1, "ignored"), false));
        assert_eq!(farm.item(1).unwrap().field("name"), Some(&json!("old")));

        assert!(farm.attach(funnel(0), item(1, "new"), true));
        assert_eq!(farm.item(1).unwrap().field("name"), Some(&json!("new")));
        assert_eq!(farm.memberships(1), 1);
    }

    #[test]
    fn detach_drops_item_with_last_membership() {
        let mut farm = Farm::new();
        farm.attach(funnel(0), item(7, "x"), false);
        farm.attach(funnel(1), item(7, "x"), false);

        assert!(farm.detach(funnel(0), 7));
        assert!(!farm.detach(funnel(0), 7));
        assert!(farm.funnel(funnel(0)).is_empty());
        assert!(farm.contains_item(7));

        assert!(farm.detach(funnel(1), 7));
        assert!(!farm.contains_item(7));
        assert_eq!(farm.funnel_count(), 0);
    }

    #[test]
    fn detach_unknown_is_noop() {
        let mut farm = Farm::new();
        farm.attach(funnel(0), item(1, "a"), false);
        assert!(!farm.detach(funnel(5), 1));
        assert!(!farm.detach(funnel(0), 2));
        assert_eq!(farm.memberships(1), 1);
    }

    #[test]
    fn restore_recounts_memberships() {
        let items = vec![
            Item::from_document(json!({"id": 1}), "id").unwrap(),
            Item::from_document(json!({"id": 2}), "id").unwrap(),
        ];
        let funnels = vec![
            (funnel(0), Funnel::from_iter([1, 2])),
            (funnel(3), Funnel::with_single(2)),
        ];
        let farm = Farm::restore(funnels, items).unwrap();
        assert_eq!(farm.memberships(1), 1);
        assert_eq!(farm.memberships(2), 2);
        assert_eq!(farm.funnel(funnel(3)).iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn restore_rejects_dangling_references() {
        let items = vec![Item::from_document(json!({"id": 1}), "id").unwrap()];
        let funnels = vec![(funnel(0), Funnel::from_iter([1, 9]))];
        assert!(matches!(
            Farm::restore(funnels, items),
            Err(PredictError::Integrity(_))
        ));
    }

    #[test]
    fn restore_rejects_orphan_items() {
        let items = vec![
            Item::from_document(json!({"id": 1}), "id").unwrap(),
            Item::from_document(json!({"id": 2}), "id").unwrap(),
        ];
        let funnels = vec![(funnel(0), Funnel::with_single(1))];
        assert!(matches!(
            Farm::restore(funnels, items),
            Err(PredictError::Integrity(_))
        ));
    }
}
