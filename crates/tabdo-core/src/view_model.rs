use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::item::{Category, Item, ItemKey};
use crate::storage::{KeyValueStorage, Persistence};
use crate::store::Store;

pub const DELETE_PROMPT: &str = "Delete this to-do?";

/// Asks the user to confirm a destructive action.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> Confirm for F {
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Confirms everything without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, _prompt: &str) -> bool {
        true
    }
}

/// Whether memory and storage agree after the last write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Synced,
    Diverged {
        reason: String,
    },
}

/// In-memory to-do state mirrored to storage after every mutation.
///
/// A failed save keeps the in-memory change and flips the sync state to
/// [`SyncState::Diverged`] until a later save succeeds. When loading failed
/// and the stored blob could not be backed up, nothing is ever saved.
#[derive(Debug)]
pub struct ViewModel<S> {
    store: Store,
    persistence: Persistence<S>,
    input: String,
    sync: SyncState,
    load_failed: bool,
}

impl<S: KeyValueStorage> ViewModel<S> {
    #[instrument(skip(persistence), fields(key = %persistence.key()))]
    pub fn open(mut persistence: Persistence<S>) -> Self {
        let (store, sync, load_failed) = match persistence.load() {
            Ok(store) => (store, SyncState::Synced, false),
            Err(err) => {
                let reason = format!("{err:#}");
                error!(error = %reason, "failed to load to-dos, starting empty without saving");
                (Store::default(), SyncState::Diverged { reason }, true)
            }
        };
        info!(
            count = store.len(),
            category = ?store.active_category,
            "view model ready"
        );
        Self {
            store,
            persistence,
            input: String::new(),
            sync,
            load_failed,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn persistence(&self) -> &Persistence<S> {
        &self.persistence
    }

    pub fn persistence_mut(&mut self) -> &mut Persistence<S> {
        &mut self.persistence
    }

    pub fn active_category(&self) -> Category {
        self.store.active_category
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    pub fn is_synced(&self) -> bool {
        self.sync == SyncState::Synced
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn item(&self, key: ItemKey) -> Option<&Item> {
        self.store.get(key)
    }

    /// Items of the active tab in display order.
    pub fn visible_items(&self) -> Vec<(ItemKey, &Item)> {
        self.store.items_in(self.store.active_category).collect()
    }

    pub fn count_in(&self, category: Category) -> usize {
        self.store.count_in(category)
    }

    /// Accepts a full item key, or a 1-based position in the visible list.
    pub fn resolve_key(&self, token: &str) -> anyhow::Result<ItemKey> {
        let key: ItemKey = token.parse()?;
        if self.store.get(key).is_some() {
            return Ok(key);
        }

        let visible = self.visible_items();
        usize::try_from(key.millis())
            .ok()
            .filter(|pos| (1..=visible.len()).contains(pos))
            .map(|pos| visible[pos - 1].0)
            .ok_or_else(|| anyhow!("no to-do with key or position {token}"))
    }

    pub fn add(&mut self, text: &str) -> Option<ItemKey> {
        self.add_at(text, Utc::now())
    }

    #[instrument(skip(self, text, now))]
    pub fn add_at(&mut self, text: &str, now: DateTime<Utc>) -> Option<ItemKey> {
        if text.trim().is_empty() {
            debug!("ignoring empty to-do");
            return None;
        }

        let item = Item::new(text.to_string(), self.store.active_category);
        let key = self.store.insert(now, item);
        self.persist();
        self.input.clear();
        info!(%key, category = ?self.store.active_category, "added to-do");
        Some(key)
    }

    /// Submits the input field as a new to-do.
    pub fn submit_input(&mut self) -> Option<ItemKey> {
        let text = self.input.clone();
        self.add(&text)
    }

    /// Flips the check mark and returns the new value.
    #[instrument(skip(self))]
    pub fn toggle_check(&mut self, key: ItemKey) -> anyhow::Result<bool> {
        let item = self.store.get_mut(key)?;
        item.check = !item.check;
        let check = item.check;
        self.persist();
        debug!(check, "toggled check");
        Ok(check)
    }

    #[instrument(skip(self))]
    pub fn begin_edit(&mut self, key: ItemKey) -> anyhow::Result<()> {
        let item = self.store.get_mut(key)?;
        item.edit_mode = true;
        self.persist();
        Ok(())
    }

    /// Replaces the text and leaves edit mode; empty text changes nothing.
    #[instrument(skip(self, new_text))]
    pub fn commit_edit(&mut self, key: ItemKey, new_text: &str) -> anyhow::Result<bool> {
        let item = self.store.get_mut(key)?;
        if new_text.trim().is_empty() {
            debug!("ignoring empty edit");
            return Ok(false);
        }
        item.text = new_text.to_string();
        item.edit_mode = false;
        self.persist();
        info!("edited to-do");
        Ok(true)
    }

    #[instrument(skip(self))]
    pub fn cancel_edit(&mut self, key: ItemKey) -> anyhow::Result<()> {
        let item = self.store.get_mut(key)?;
        if item.edit_mode {
            item.edit_mode = false;
            self.persist();
        }
        Ok(())
    }

    /// Removes the item if `confirm` agrees; returns whether it was removed.
    #[instrument(skip(self, confirm))]
    pub fn delete(&mut self, key: ItemKey, confirm: &mut dyn Confirm) -> anyhow::Result<bool> {
        if self.store.get(key).is_none() {
            return Err(anyhow!("no to-do with key {key}"));
        }
        if !confirm.confirm(DELETE_PROMPT) {
            debug!("delete cancelled");
            return Ok(false);
        }
        self.store.remove(key)?;
        self.persist();
        info!("deleted to-do");
        Ok(true)
    }

    #[instrument(skip(self))]
    pub fn set_category(&mut self, category: Category) {
        self.store.active_category = category;
        self.persist();
    }

    fn persist(&mut self) {
        if self.load_failed {
            warn!(key = %self.persistence.key(), "stored to-dos were never loaded; not overwriting them");
            self.sync = SyncState::Diverged {
                reason: format!(
                    "stored to-dos under {} could not be loaded; refusing to overwrite them",
                    self.persistence.key()
                ),
            };
            return;
        }

        match self.persistence.save(&self.store) {
            Ok(()) => {
                if let SyncState::Diverged { .. } = self.sync {
                    info!("storage back in sync");
                }
                self.sync = SyncState::Synced;
            }
            Err(err) => {
                let reason = format!("{err:#}");
                error!(error = %reason, "failed to save to-dos; in-memory state kept");
                self.sync = SyncState::Diverged { reason };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{AssumeYes, SyncState, ViewModel};
    use crate::item::Category;
    use crate::storage::{DEFAULT_STORAGE_KEY, KeyValueStorage, MemoryStorage, Persistence};

    /// Memory storage whose reads or writes can be switched off.
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_reads: bool,
        fail_writes: bool,
    }

    impl KeyValueStorage for FlakyStorage {
        fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
            if self.fail_reads {
                anyhow::bail!("permission denied");
            }
            self.inner.get_item(key)
        }

        fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
            if self.fail_writes {
                anyhow::bail!("disk full");
            }
            self.inner.set_item(key, value)
        }

        fn remove_item(&mut self, key: &str) -> anyhow::Result<()> {
            self.inner.remove_item(key)
        }
    }

    fn memory_vm() -> ViewModel<MemoryStorage> {
        ViewModel::open(Persistence::new(MemoryStorage::new(), DEFAULT_STORAGE_KEY))
    }

    #[test]
    fn add_grows_active_tab_by_one() {
        let mut vm = memory_vm();
        let before = vm.visible_items().len();

        let key = vm.add("write report").unwrap();

        assert_eq!(vm.visible_items().len(), before + 1);
        let item = vm.item(key).unwrap();
        assert!(!item.check);
        assert!(item.working);
    }

    #[test]
    fn empty_text_is_ignored() {
        let mut vm = memory_vm();
        assert!(vm.add("").is_none());
        assert!(vm.add("   ").is_none());
        assert!(vm.store().is_empty());
        assert_eq!(vm.persistence().storage().get_item(DEFAULT_STORAGE_KEY).unwrap(), None);
    }

    #[test]
    fn submit_input_clears_field() {
        let mut vm = memory_vm();
        vm.set_input("book hotel");
        let key = vm.submit_input().unwrap();
        assert_eq!(vm.input(), "");
        assert_eq!(vm.item(key).unwrap().text, "book hotel");
    }

    #[test]
    fn toggle_twice_restores_check() {
        let mut vm = memory_vm();
        let key = vm.add("expenses").unwrap();
        assert!(vm.toggle_check(key).unwrap());
        assert!(!vm.toggle_check(key).unwrap());
        assert!(!vm.item(key).unwrap().check);
    }

    #[test]
    fn edit_flow_is_per_item() {
        let mut vm = memory_vm();
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let a = vm.add_at("draft", now).unwrap();
        let b = vm.add_at("review", now).unwrap();

        vm.begin_edit(a).unwrap();
        vm.begin_edit(b).unwrap();
        assert!(!vm.commit_edit(a, "").unwrap());
        assert!(vm.item(a).unwrap().edit_mode);

        assert!(vm.commit_edit(a, "final draft").unwrap());
        let item = vm.item(a).unwrap();
        assert_eq!(item.text, "final draft");
        assert!(!item.edit_mode);
        assert!(vm.item(b).unwrap().edit_mode);

        vm.cancel_edit(b).unwrap();
        assert!(!vm.item(b).unwrap().edit_mode);
        assert_eq!(vm.item(b).unwrap().text, "review");
    }

    #[test]
    fn refused_delete_keeps_item() {
        let mut vm = memory_vm();
        let key = vm.add("gym").unwrap();

        let mut asked = Vec::new();
        let mut refuse = |prompt: &str| {
            asked.push(prompt.to_string());
            false
        };
        assert!(!vm.delete(key, &mut refuse).unwrap());
        assert_eq!(asked, vec![super::DELETE_PROMPT.to_string()]);
        assert!(vm.item(key).is_some());

        assert!(vm.delete(key, &mut AssumeYes).unwrap());
        assert!(vm.item(key).is_none());
        assert_eq!(vm.count_in(Category::Work) + vm.count_in(Category::Travel), 0);
    }

    #[test]
    fn unknown_key_is_an_error() {
        let mut vm = memory_vm();
        let key = "123".parse().unwrap();
        assert!(vm.toggle_check(key).is_err());
        assert!(vm.begin_edit(key).is_err());
        assert!(vm.delete(key, &mut AssumeYes).is_err());
    }

    #[test]
    fn switching_tabs_keeps_items() {
        let mut vm = memory_vm();
        vm.add("slides").unwrap();
        vm.set_category(Category::Travel);
        vm.add("tokyo").unwrap();

        assert_eq!(vm.visible_items().len(), 1);
        assert_eq!(vm.count_in(Category::Work), 1);
        vm.set_category(Category::Work);
        assert_eq!(vm.visible_items()[0].1.text, "slides");
        assert!(vm.visible_items()[0].1.working);
        assert_eq!(vm.count_in(Category::Travel), 1);
    }

    #[test]
    fn resolve_key_accepts_positions() {
        let mut vm = memory_vm();
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let first = vm.add_at("one", now).unwrap();
        let second = vm.add_at("two", now).unwrap();

        assert_eq!(vm.resolve_key("2").unwrap(), second);
        assert_eq!(vm.resolve_key(&first.to_string()).unwrap(), first);
        assert!(vm.resolve_key("3").is_err());
        assert!(vm.resolve_key("0").is_err());
        assert!(vm.resolve_key("abc").is_err());
    }

    #[test]
    fn failed_save_diverges_until_next_success() {
        let mut vm = ViewModel::open(Persistence::new(FlakyStorage::default(), "@toDos"));
        vm.persistence_mut().storage_mut().fail_writes = true;

        let key = vm.add("water plants").unwrap();
        assert!(vm.item(key).is_some());
        assert!(matches!(
            vm.sync_state(),
            SyncState::Diverged { reason } if reason.contains("disk full")
        ));

        vm.persistence_mut().storage_mut().fail_writes = false;
        vm.toggle_check(key).unwrap();
        assert!(vm.is_synced());
    }

    #[test]
    fn unreadable_store_is_never_overwritten() {
        let mut storage = FlakyStorage::default();
        storage.inner.set_item("@toDos1", "precious").unwrap();
        storage.fail_reads = true;

        let mut vm = ViewModel::open(Persistence::new(storage, "@toDos1"));
        assert!(!vm.is_synced());

        vm.persistence_mut().storage_mut().fail_reads = false;
        let key = vm.add("new").unwrap();
        assert!(vm.item(key).is_some());
        assert!(matches!(
            vm.sync_state(),
            SyncState::Diverged { reason } if reason.contains("refusing to overwrite")
        ));
        assert_eq!(
            vm.persistence().storage().get_item("@toDos1").unwrap().as_deref(),
            Some("precious")
        );
    }

    #[test]
    fn category_survives_reopen() {
        let mut vm = memory_vm();
        vm.set_category(Category::Travel);
        let storage = vm.persistence().storage().clone();

        let reopened = ViewModel::open(Persistence::new(storage, DEFAULT_STORAGE_KEY));
        assert_eq!(reopened.active_category(), Category::Travel);
    }
}
