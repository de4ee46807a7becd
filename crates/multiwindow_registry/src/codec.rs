//! Typed view of instance records over the flat key space.
//!
//! Each record field lives under its own key, `<field>.<instance id>`, so that
//! two processes updating different fields of the same record never collide.

use std::collections::BTreeSet;
use std::sync::Arc;

use multiwindow_shared::diagnostics;

use crate::error::RegistryResult;
use crate::ids::{InstanceId, ProfileKind, TaskId};
use crate::model::{Durability, StoreValue};
use crate::RegistryStore;

pub mod keys {
    use crate::ids::InstanceId;

    pub const TASK_MAP: &str = "task_map";
    pub const LAST_ACCESSED: &str = "last_accessed";
    pub const TAB_COUNT: &str = "tab_count";
    pub const INCOGNITO_TAB_COUNT: &str = "incognito_tab_count";
    pub const URL: &str = "url";
    pub const TITLE: &str = "title";
    pub const CUSTOM_TITLE: &str = "custom_title";
    pub const PROFILE_KIND: &str = "profile_kind";
    pub const CLOSED_BY_USER: &str = "closed_by_user";
    pub const INCOGNITO_SELECTED: &str = "incognito_selected";
    pub const TAB_COUNT_FOR_RELAUNCH: &str = "tab_count_for_relaunch";

    pub const INSTANCE_FIELDS: &[&str] = &[
        TASK_MAP,
        LAST_ACCESSED,
        TAB_COUNT,
        INCOGNITO_TAB_COUNT,
        URL,
        TITLE,
        CUSTOM_TITLE,
        PROFILE_KIND,
        CLOSED_BY_USER,
        INCOGNITO_SELECTED,
        TAB_COUNT_FOR_RELAUNCH,
    ];

    pub const MAX_INSTANCE_LIMIT: &str = "max_instance_limit";
    pub const INSTANCE_LIMIT_DOWNGRADE_HANDLED: &str = "instance_limit_downgrade_handled";
    pub const MULTI_WINDOW_ENTER_TIME: &str = "multi_window_enter_time";
    pub const RESTORATION_MESSAGE_SHOWN: &str = "restoration_message_shown";

    pub fn instance_key(field: &str, id: InstanceId) -> String {
        format!("{}.{}", field, id.0)
    }

    pub fn field_prefix(field: &str) -> String {
        format!("{}.", field)
    }

    /// Parses the instance id out of `<field>.<id>`.
    pub fn parse_instance_key(field: &str, key: &str) -> Option<InstanceId> {
        key.strip_prefix(field)?
            .strip_prefix('.')?
            .parse::<u32>()
            .ok()
            .map(InstanceId)
    }
}

/// Everything the registry knows about one window identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub task_id: Option<TaskId>,
    /// Milliseconds since the epoch; 0 means never accessed.
    pub last_accessed: i64,
    pub tab_count: u32,
    pub incognito_tab_count: u32,
    pub profile_kind: ProfileKind,
    pub url: String,
    pub title: String,
    pub custom_title: String,
    pub closed_by_user: bool,
    pub incognito_selected: bool,
    pub tab_count_for_relaunch: u32,
}

impl InstanceRecord {
    pub fn empty(id: InstanceId) -> Self {
        Self {
            id,
            task_id: None,
            last_accessed: 0,
            tab_count: 0,
            incognito_tab_count: 0,
            profile_kind: ProfileKind::Regular,
            url: String::new(),
            title: String::new(),
            custom_title: String::new(),
            closed_by_user: false,
            incognito_selected: false,
            tab_count_for_relaunch: 0,
        }
    }

    pub fn has_documents(&self) -> bool {
        self.tab_count > 0 || self.incognito_tab_count > 0
    }

    /// Title shown to the user: the custom title when set.
    pub fn display_title(&self) -> &str {
        if self.custom_title.is_empty() {
            &self.title
        } else {
            &self.custom_title
        }
    }
}

/// Typed accessor over a shared [`RegistryStore`].
#[derive(Clone)]
pub struct InstanceRegistry {
    store: Arc<dyn RegistryStore>,
}

impl InstanceRegistry {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    /// Reloads other processes' writes. Failures keep the current view.
    pub fn refresh(&self) {
        if let Err(e) = self.store.refresh() {
            diagnostics::log(format!("registry_refresh_failed error={}", e));
        }
    }

    /// Ids that have at least one key in the store.
    pub fn instance_ids(&self) -> BTreeSet<InstanceId> {
        let mut ids = BTreeSet::new();
        for field in keys::INSTANCE_FIELDS {
            for key in self.store.keys_with_prefix(&keys::field_prefix(field)) {
                if let Some(id) = keys::parse_instance_key(field, &key) {
                    ids.insert(id);
                }
            }
        }
        ids
    }

    pub fn record_exists(&self, id: InstanceId) -> bool {
        keys::INSTANCE_FIELDS
            .iter()
            .any(|field| self.store.get(&keys::instance_key(field, id)).is_some())
    }

    pub fn read(&self, id: InstanceId) -> Option<InstanceRecord> {
        if !self.record_exists(id) {
            return None;
        }
        Some(InstanceRecord {
            id,
            task_id: self.task_id(id),
            last_accessed: self.last_accessed(id),
            tab_count: self.read_count(keys::TAB_COUNT, id),
            incognito_tab_count: self.read_count(keys::INCOGNITO_TAB_COUNT, id),
            profile_kind: self.profile_kind(id),
            url: self.read_text(keys::URL, id),
            title: self.read_text(keys::TITLE, id),
            custom_title: self.read_text(keys::CUSTOM_TITLE, id),
            closed_by_user: self.read_bool(keys::CLOSED_BY_USER, id),
            incognito_selected: self.read_bool(keys::INCOGNITO_SELECTED, id),
            tab_count_for_relaunch: self.read_count(keys::TAB_COUNT_FOR_RELAUNCH, id),
        })
    }

    /// All records, ordered by id.
    pub fn records(&self) -> Vec<InstanceRecord> {
        self.instance_ids()
            .into_iter()
            .filter_map(|id| self.read(id))
            .collect()
    }

    pub fn task_id(&self, id: InstanceId) -> Option<TaskId> {
        self.store
            .get(&keys::instance_key(keys::TASK_MAP, id))
            .and_then(|v| v.as_i64())
            .map(TaskId)
    }

    pub fn set_task_id(
        &self,
        id: InstanceId,
        task: TaskId,
        durability: Durability,
    ) -> RegistryResult<()> {
        self.store.put(
            &keys::instance_key(keys::TASK_MAP, id),
            StoreValue::Int(task.0),
            durability,
        )
    }

    pub fn clear_task_id(&self, id: InstanceId, durability: Durability) -> RegistryResult<()> {
        self.store
            .remove(&keys::instance_key(keys::TASK_MAP, id), durability)
    }

    /// Every `(instance, task)` pair in the task map, ordered by instance.
    pub fn task_mappings(&self) -> Vec<(InstanceId, TaskId)> {
        let mut mappings: Vec<_> = self
            .store
            .keys_with_prefix(&keys::field_prefix(keys::TASK_MAP))
            .into_iter()
            .filter_map(|key| {
                let id = keys::parse_instance_key(keys::TASK_MAP, &key)?;
                let task = self.store.get(&key)?.as_i64()?;
                Some((id, TaskId(task)))
            })
            .collect();
        // Keys sort lexically ("10" before "2").
        mappings.sort_by_key(|(id, _)| *id);
        mappings
    }

    /// Lowest instance id mapped to `task`.
    pub fn instance_for_task(&self, task: TaskId) -> Option<InstanceId> {
        self.task_mappings()
            .into_iter()
            .find(|(_, mapped)| *mapped == task)
            .map(|(id, _)| id)
    }

    pub fn last_accessed(&self, id: InstanceId) -> i64 {
        self.store
            .get(&keys::instance_key(keys::LAST_ACCESSED, id))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }

    pub fn set_last_accessed(&self, id: InstanceId, millis: i64) -> RegistryResult<()> {
        self.put_int(keys::LAST_ACCESSED, id, millis, Durability::Deferred)
    }

    pub fn profile_kind(&self, id: InstanceId) -> ProfileKind {
        self.store
            .get(&keys::instance_key(keys::PROFILE_KIND, id))
            .and_then(|v| v.as_i64())
            .map(ProfileKind::from_stored)
            .unwrap_or_default()
    }

    pub fn set_profile_kind(&self, id: InstanceId, kind: ProfileKind) -> RegistryResult<()> {
        self.put_int(keys::PROFILE_KIND, id, kind.as_stored(), Durability::Deferred)
    }

    pub fn set_tab_counts(&self, id: InstanceId, regular: u32, incognito: u32) -> RegistryResult<()> {
        self.put_int(keys::TAB_COUNT, id, i64::from(regular), Durability::Deferred)?;
        self.put_int(
            keys::INCOGNITO_TAB_COUNT,
            id,
            i64::from(incognito),
            Durability::Deferred,
        )
    }

    pub fn set_url_and_title(&self, id: InstanceId, url: &str, title: &str) -> RegistryResult<()> {
        self.put_text(keys::URL, id, url)?;
        self.put_text(keys::TITLE, id, title)
    }

    pub fn set_custom_title(&self, id: InstanceId, title: &str) -> RegistryResult<()> {
        self.put_text(keys::CUSTOM_TITLE, id, title)
    }

    pub fn set_closed_by_user(&self, id: InstanceId, closed: bool) -> RegistryResult<()> {
        self.put_bool(keys::CLOSED_BY_USER, id, closed)
    }

    pub fn set_incognito_selected(&self, id: InstanceId, selected: bool) -> RegistryResult<()> {
        self.put_bool(keys::INCOGNITO_SELECTED, id, selected)
    }

    /// Durable: read by other processes deciding whether to relaunch.
    pub fn set_tab_count_for_relaunch(&self, id: InstanceId, count: u32) -> RegistryResult<()> {
        self.put_int(
            keys::TAB_COUNT_FOR_RELAUNCH,
            id,
            i64::from(count),
            Durability::Immediate,
        )
    }

    pub fn tab_count_for_relaunch(&self, id: InstanceId) -> u32 {
        self.read_count(keys::TAB_COUNT_FOR_RELAUNCH, id)
    }

    /// Deletes every key of the record.
    pub fn remove_record(&self, id: InstanceId, durability: Durability) -> RegistryResult<()> {
        let mut result = Ok(());
        for field in keys::INSTANCE_FIELDS {
            let key = keys::instance_key(field, id);
            if self.store.get(&key).is_none() {
                continue;
            }
            // Keep going so a single failing key doesn't leave half a record.
            if let Err(e) = self.store.remove(&key, durability) {
                result = Err(e);
            }
        }
        result
    }

    pub fn max_instance_limit(&self) -> Option<u32> {
        self.store
            .get(keys::MAX_INSTANCE_LIMIT)
            .and_then(|v| v.as_i64())
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn set_max_instance_limit(&self, limit: u32) -> RegistryResult<()> {
        self.store.put(
            keys::MAX_INSTANCE_LIMIT,
            StoreValue::Int(i64::from(limit)),
            Durability::Deferred,
        )
    }

    pub fn downgrade_handled(&self) -> bool {
        self.global_bool(keys::INSTANCE_LIMIT_DOWNGRADE_HANDLED)
    }

    pub fn set_downgrade_handled(&self, handled: bool) -> RegistryResult<()> {
        self.store.put(
            keys::INSTANCE_LIMIT_DOWNGRADE_HANDLED,
            StoreValue::Bool(handled),
            Durability::Immediate,
        )
    }

    pub fn multi_window_enter_time(&self) -> Option<i64> {
        self.store
            .get(keys::MULTI_WINDOW_ENTER_TIME)
            .and_then(|v| v.as_i64())
    }

    pub fn set_multi_window_enter_time(&self, millis: i64) -> RegistryResult<()> {
        self.store.put(
            keys::MULTI_WINDOW_ENTER_TIME,
            StoreValue::Int(millis),
            Durability::Deferred,
        )
    }

    pub fn restoration_message_shown(&self) -> bool {
        self.global_bool(keys::RESTORATION_MESSAGE_SHOWN)
    }

    pub fn set_restoration_message_shown(&self) -> RegistryResult<()> {
        self.store.put(
            keys::RESTORATION_MESSAGE_SHOWN,
            StoreValue::Bool(true),
            Durability::Deferred,
        )
    }

    fn global_bool(&self, key: &str) -> bool {
        self.store
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn read_count(&self, field: &str, id: InstanceId) -> u32 {
        self.store
            .get(&keys::instance_key(field, id))
            .and_then(|v| v.as_i64())
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    }

    fn read_text(&self, field: &str, id: InstanceId) -> String {
        self.store
            .get(&keys::instance_key(field, id))
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    fn read_bool(&self, field: &str, id: InstanceId) -> bool {
        self.store
            .get(&keys::instance_key(field, id))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn put_int(
        &self,
        field: &str,
        id: InstanceId,
        value: i64,
        durability: Durability,
    ) -> RegistryResult<()> {
        self.store
            .put(&keys::instance_key(field, id), StoreValue::Int(value), durability)
    }

    fn put_text(&self, field: &str, id: InstanceId, value: &str) -> RegistryResult<()> {
        self.store.put(
            &keys::instance_key(field, id),
            StoreValue::Text(value.to_string()),
            Durability::Deferred,
        )
    }

    fn put_bool(&self, field: &str, id: InstanceId, value: bool) -> RegistryResult<()> {
        self.store.put(
            &keys::instance_key(field, id),
            StoreValue::Bool(value),
            Durability::Deferred,
        )
    }
}
