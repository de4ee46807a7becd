//! Per-window entry point to the coordinator.

use std::sync::Arc;

use multiwindow_registry::{
    Durability, FileRegistryStore, InstanceId, InstanceRegistry, ProfileKind, RegistryResult,
    RegistryStore, TaskId,
};
use multiwindow_shared::{diagnostics, paths};
use parking_lot::Mutex;

use crate::allocator::{AllocationRequest, Allocator};
use crate::closer::{CloseOutcome, WindowCloser};
use crate::config::CoordinatorConfig;
use crate::context::CoordinatorContext;
use crate::host::{Clock, TaskHost};
use crate::lifecycle::LifecycleBus;
use crate::limits::{DeviceProfile, InstanceLimitPolicy, LimitChange, observe_instance_limit};
use crate::merge::{DocumentStoreOwner, MergeCoordinator, WindowDirectory};
use crate::projector::{InstanceSummary, InstanceViewProjector};
use crate::reaper::ExcessInstanceReaper;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::types::{Allocation, CloseReason, InstanceFilter};

/// The document a window currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedTab<'a> {
    pub url: &'a str,
    pub title: &'a str,
    pub incognito: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct CurrentWindow {
    instance: Option<InstanceId>,
    task: Option<TaskId>,
    adjacent: Option<InstanceId>,
}

/// Coordinator facade owned by one window.
pub struct InstanceManager {
    registry: InstanceRegistry,
    tasks: Arc<dyn TaskHost>,
    clock: Arc<dyn Clock>,
    policy: InstanceLimitPolicy,
    device: DeviceProfile,
    reconciler: Reconciler,
    allocator: Allocator,
    closer: WindowCloser,
    projector: InstanceViewProjector,
    current: Mutex<CurrentWindow>,
}

impl InstanceManager {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        tasks: Arc<dyn TaskHost>,
        clock: Arc<dyn Clock>,
        config: &CoordinatorConfig,
        device: DeviceProfile,
    ) -> Self {
        let registry = InstanceRegistry::new(store);
        let reconciler = Reconciler::new(registry.clone(), tasks.clone());
        let reaper = ExcessInstanceReaper::new(registry.clone(), tasks.clone());
        let allocator = Allocator::new(
            registry.clone(),
            clock.clone(),
            reconciler.clone(),
            reaper,
        );
        let closer = WindowCloser::new(
            registry.clone(),
            tasks.clone(),
            config.retention.retain_closed_windows,
        );
        let projector = InstanceViewProjector::new(
            registry.clone(),
            tasks.clone(),
            clock.clone(),
            reconciler.clone(),
            closer.clone(),
            config.retention.horizon_millis(),
        );
        Self {
            registry,
            tasks,
            clock,
            policy: InstanceLimitPolicy::new(config.limits.clone()),
            device,
            reconciler,
            allocator,
            closer,
            projector,
            current: Mutex::new(CurrentWindow::default()),
        }
    }

    /// Opens the shared file registry described by `config`.
    pub fn open(
        config: &CoordinatorConfig,
        tasks: Arc<dyn TaskHost>,
        clock: Arc<dyn Clock>,
        device: DeviceProfile,
    ) -> RegistryResult<Self> {
        if config.debug {
            diagnostics::set_enabled(true);
        }
        let store = FileRegistryStore::open(
            paths::registry_root(),
            &config.storage.profile,
            config.storage.debounce_ms,
        )?;
        Ok(Self::new(Arc::new(store), tasks, clock, config, device))
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn max_instances(&self) -> u32 {
        self.policy.max_instances(&self.device)
    }

    /// Records the current limit; an increase re-arms downgrade reaping.
    pub fn observe_instance_limit(&self) -> LimitChange {
        let limit = self.max_instances();
        observe_instance_limit(&self.registry, limit).unwrap_or_else(|e| {
            diagnostics::log(format!("instance_limit_write_failed error={}", e));
            LimitChange::Unchanged
        })
    }

    pub fn allocate(
        &self,
        window_id_hint: Option<InstanceId>,
        task_id: Option<TaskId>,
        prefer_new: bool,
        profile_kind: ProfileKind,
    ) -> Allocation {
        self.observe_instance_limit();
        let request = AllocationRequest {
            window_id_hint,
            task_id,
            prefer_new,
            profile_kind,
            max_instances: self.max_instances(),
        };
        self.allocator.allocate(&request)
    }

    /// Binds this manager to the window `instance` hosted by `task`.
    pub fn initialize(&self, instance: InstanceId, task: TaskId) {
        {
            let mut current = self.current.lock();
            current.instance = Some(instance);
            current.task = Some(task);
        }
        if self.registry.task_id(instance) != Some(task) {
            if let Some(other) = self.registry.instance_for_task(task) {
                diagnostics::invariant_violation(format!(
                    "initialize_task_already_mapped task={} mapped={} requested={}",
                    task, other, instance
                ));
                self.log_write(
                    "initialize_unmap",
                    self.registry.clear_task_id(other, Durability::Immediate),
                );
            }
            self.log_write(
                "initialize_map",
                self.registry.set_task_id(instance, task, Durability::Immediate),
            );
        }
        self.log_write(
            "initialize_touch",
            self.registry
                .set_last_accessed(instance, self.clock.now_millis()),
        );
        diagnostics::log(format!("instance_initialized instance={} task={}", instance.0, task.0));
    }

    pub fn current_instance(&self) -> Option<InstanceId> {
        self.current.lock().instance
    }

    /// Window shown next to this one in split screen.
    pub fn set_adjacent_instance(&self, adjacent: Option<InstanceId>) {
        self.current.lock().adjacent = adjacent;
    }

    pub fn reconcile(&self) -> ReconcileReport {
        self.reconciler.reconcile()
    }

    pub fn list_instances(&self, filter: InstanceFilter) -> Vec<InstanceSummary> {
        let current = *self.current.lock();
        self.projector
            .list_instances(current.instance, current.adjacent, filter)
    }

    pub fn close_window(&self, id: InstanceId, reason: CloseReason) -> CloseOutcome {
        let outcome = self.closer.close(id, reason);
        let mut current = self.current.lock();
        if current.instance == Some(id) {
            current.instance = None;
            current.task = None;
        }
        if current.adjacent == Some(id) {
            current.adjacent = None;
        }
        outcome
    }

    /// Closes `id` with [`CloseReason::NoTabsInWindow`] if it holds no
    /// documents. Returns whether it was closed.
    pub fn close_window_if_empty(&self, id: InstanceId) -> bool {
        match self.registry.read(id) {
            Some(record) if !record.has_documents() => {
                self.close_window(id, CloseReason::NoTabsInWindow);
                true
            }
            _ => false,
        }
    }

    pub fn on_window_destroyed(&self) -> ReconcileReport {
        self.reconciler.reconcile()
    }

    /// The window gained focus.
    pub fn on_top_resumed(&self) {
        if let Some(id) = self.current_instance() {
            self.log_write(
                "last_accessed",
                self.registry.set_last_accessed(id, self.clock.now_millis()),
            );
        }
    }

    /// `non_blank_tabs` is read by other processes deciding whether this
    /// window is worth relaunching, so it is written durably.
    pub fn on_pause(&self, non_blank_tabs: u32) {
        if let Some(id) = self.current_instance() {
            self.log_write(
                "tab_count_for_relaunch",
                self.registry.set_tab_count_for_relaunch(id, non_blank_tabs),
            );
        }
    }

    pub fn record_tab_counts(&self, regular: u32, incognito: u32) {
        let Some(id) = self.current_instance() else {
            return;
        };
        self.log_write("tab_counts", self.registry.set_tab_counts(id, regular, incognito));
        if regular == 0 {
            self.log_write("url_title", self.registry.set_url_and_title(id, "", ""));
        }
    }

    pub fn record_selected_tab(&self, tab: Option<SelectedTab<'_>>) {
        let Some(id) = self.current_instance() else {
            return;
        };
        match tab {
            Some(tab) if !tab.incognito => {
                self.log_write("url_title", self.registry.set_url_and_title(id, tab.url, tab.title));
                self.log_write("incognito_selected", self.registry.set_incognito_selected(id, false));
            }
            Some(_) => {
                self.log_write("incognito_selected", self.registry.set_incognito_selected(id, true));
            }
            None => {
                self.log_write("incognito_selected", self.registry.set_incognito_selected(id, false));
            }
        }
    }

    pub fn record_profile_kind(&self, kind: ProfileKind) {
        if let Some(id) = self.current_instance() {
            self.log_write("profile_kind", self.registry.set_profile_kind(id, kind));
        }
    }

    /// Sets a user-chosen window title. An empty title restores the default.
    pub fn rename_window(&self, id: InstanceId, title: &str) {
        self.log_write("custom_title", self.registry.set_custom_title(id, title.trim()));
    }

    pub fn instance_count(&self, filter: InstanceFilter) -> usize {
        let live = self.tasks.live_tasks();
        self.registry
            .records()
            .iter()
            .filter(|record| {
                let active = record.task_id.is_some_and(|task| live.contains(&task));
                filter.matches(record, active)
            })
            .count()
    }

    /// Most recently accessed instance of any kind.
    pub fn last_accessed_instance(&self) -> Option<InstanceId> {
        self.registry
            .records()
            .into_iter()
            .max_by_key(|record| (record.last_accessed, std::cmp::Reverse(record.id)))
            .map(|record| record.id)
    }

    /// Where an external link should open: `None` means a new window while
    /// there is room for one, otherwise the most recently used active window.
    pub fn target_instance_for_external_link(&self) -> Option<InstanceId> {
        let live = self.tasks.live_tasks();
        let active: Vec<_> = self
            .registry
            .records()
            .into_iter()
            .filter(|record| record.task_id.is_some_and(|task| live.contains(&task)))
            .collect();
        if active.len() < self.max_instances() as usize {
            return None;
        }
        active
            .into_iter()
            .max_by_key(|record| (record.last_accessed, std::cmp::Reverse(record.id)))
            .map(|record| record.id)
    }

    /// True once, the first time more windows exist than the limit allows.
    pub fn should_show_restoration_message(&self) -> bool {
        if self.registry.restoration_message_shown() {
            return false;
        }
        if self.instance_count(InstanceFilter::ANY) <= self.max_instances() as usize {
            return false;
        }
        self.log_write(
            "restoration_message_shown",
            self.registry.set_restoration_message_shown(),
        );
        true
    }

    pub fn is_only_instance(&self) -> bool {
        self.instance_count(InstanceFilter::ANY) <= 1
    }

    pub fn record_multi_window_mode_entered(&self) {
        self.log_write(
            "multi_window_enter_time",
            self.registry
                .set_multi_window_enter_time(self.clock.now_millis()),
        );
    }

    /// Builds the two-window merge coordinator for `window`.
    pub fn merge_coordinator(
        &self,
        window: Arc<dyn DocumentStoreOwner>,
        directory: Arc<dyn WindowDirectory>,
        context: Arc<CoordinatorContext>,
        bus: LifecycleBus,
    ) -> MergeCoordinator {
        MergeCoordinator::new(
            window,
            directory,
            self.registry.clone(),
            self.tasks.clone(),
            context,
            bus,
        )
    }

    fn log_write(&self, what: &str, result: RegistryResult<()>) {
        if let Err(e) = result {
            diagnostics::log(format!("registry_write_failed field={} error={}", what, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InProcessTaskHost, ManualClock};
    use crate::types::{ActivityFilter, AllocationKind, ProfileFilter};
    use multiwindow_registry::MemoryRegistryStore;

    struct Fixture {
        store: Arc<MemoryRegistryStore>,
        tasks: Arc<InProcessTaskHost>,
        clock: Arc<ManualClock>,
        config: CoordinatorConfig,
    }

    impl Fixture {
        fn new(max_instances: u32) -> Self {
            let mut config = CoordinatorConfig::default();
            config.limits.max_instances = max_instances;
            Self {
                store: Arc::new(MemoryRegistryStore::new()),
                tasks: Arc::new(InProcessTaskHost::new()),
                clock: Arc::new(ManualClock::new(10_000)),
                config,
            }
        }

        fn manager(&self) -> InstanceManager {
            InstanceManager::new(
                self.store.clone(),
                self.tasks.clone(),
                self.clock.clone(),
                &self.config,
                DeviceProfile::default(),
            )
        }

        /// Allocates and initializes a window the way a launching window does.
        fn launch(&self) -> (InstanceManager, InstanceId, TaskId) {
            let manager = self.manager();
            let task = self.tasks.spawn_task();
            let allocation = manager.allocate(None, Some(task), false, ProfileKind::Regular);
            let id = allocation.instance_id.unwrap();
            manager.initialize(id, task);
            self.clock.advance(10);
            (manager, id, task)
        }
    }

    #[test]
    fn test_launch_maps_task_and_counts_as_active() {
        let f = Fixture::new(3);
        let (manager, id, task) = f.launch();

        assert_eq!(manager.current_instance(), Some(id));
        assert_eq!(manager.registry().task_id(id), Some(task));
        assert_eq!(manager.instance_count(InstanceFilter::ACTIVE), 1);
        assert!(manager.is_only_instance());
    }

    #[test]
    fn test_tab_writers_follow_selection() {
        let f = Fixture::new(3);
        let (manager, id, _) = f.launch();

        manager.record_tab_counts(2, 1);
        manager.record_selected_tab(Some(SelectedTab {
            url: "https://a.test",
            title: "A",
            incognito: false,
        }));
        manager.record_selected_tab(Some(SelectedTab {
            url: "https://private.test",
            title: "Secret",
            incognito: true,
        }));

        let record = manager.registry().read(id).unwrap();
        assert_eq!(record.url, "https://a.test", "incognito selection keeps url");
        assert_eq!(record.title, "A");
        assert!(record.incognito_selected);

        manager.record_tab_counts(0, 1);
        let record = manager.registry().read(id).unwrap();
        assert_eq!(record.url, "");
        assert_eq!(record.title, "");
        assert_eq!(record.incognito_tab_count, 1);
    }

    #[test]
    fn test_rename_and_list() {
        let f = Fixture::new(3);
        let (manager, id, _) = f.launch();
        manager.record_tab_counts(1, 0);

        manager.rename_window(id, "  Research ");

        let list = manager.list_instances(InstanceFilter::ANY);
        assert_eq!(list[0].title, "Research");
    }

    #[test]
    fn test_pause_writes_relaunch_count_durably() {
        let f = Fixture::new(3);
        let (manager, id, _) = f.launch();

        manager.on_pause(4);
        f.store.simulate_crash();

        assert_eq!(manager.registry().tab_count_for_relaunch(id), 4);
    }

    #[test]
    fn test_close_window_if_empty() {
        let f = Fixture::new(3);
        let (manager, id, task) = f.launch();
        manager.record_tab_counts(1, 0);
        assert!(!manager.close_window_if_empty(id));

        manager.record_tab_counts(0, 0);
        assert!(manager.close_window_if_empty(id));
        assert!(!manager.registry().record_exists(id));
        assert!(!f.tasks.is_live(task));
        assert_eq!(manager.current_instance(), None);
    }

    #[test]
    fn test_user_close_keeps_restorable_record() {
        let f = Fixture::new(3);
        let (manager, id, _) = f.launch();

        manager.close_window(id, CloseReason::UserInitiated);
        manager.on_window_destroyed();

        let inactive = manager.instance_count(InstanceFilter {
            activity: ActivityFilter::Inactive,
            profile: ProfileFilter::Any,
        });
        assert_eq!(inactive, 1);
        assert!(manager.registry().read(id).unwrap().closed_by_user);
    }

    #[test]
    fn test_external_link_target() {
        let f = Fixture::new(2);
        let (first, first_id, _) = f.launch();
        assert_eq!(first.target_instance_for_external_link(), None, "room for a new window");

        let (second, second_id, _) = f.launch();
        assert_eq!(second.target_instance_for_external_link(), Some(second_id));

        first.on_top_resumed();
        assert_eq!(second.target_instance_for_external_link(), Some(first_id));
        assert_eq!(second.last_accessed_instance(), Some(first_id));
    }

    #[test]
    fn test_restoration_message_shows_once_over_limit() {
        let f = Fixture::new(3);
        for _ in 0..3 {
            f.launch();
        }
        let manager = f.manager();
        assert!(!manager.should_show_restoration_message());

        let mut lowered = f.config.clone();
        lowered.limits.max_instances = 2;
        let manager = InstanceManager::new(
            f.store.clone(),
            f.tasks.clone(),
            f.clock.clone(),
            &lowered,
            DeviceProfile::default(),
        );
        assert!(manager.should_show_restoration_message());
        assert!(!manager.should_show_restoration_message());
    }

    #[test]
    fn test_limit_downgrade_reaps_on_next_allocation() {
        let f = Fixture::new(3);
        let launched: Vec<_> = (0..3).map(|_| f.launch()).collect();

        let mut lowered = f.config.clone();
        lowered.limits.max_instances = 1;
        let manager = InstanceManager::new(
            f.store.clone(),
            f.tasks.clone(),
            f.clock.clone(),
            &lowered,
            DeviceProfile::default(),
        );
        let task = f.tasks.spawn_task();
        let allocation = manager.allocate(None, Some(task), false, ProfileKind::Regular);

        assert!(f.registry_downgrade_handled());
        assert!(!f.tasks.is_live(launched[0].2));
        assert!(!f.tasks.is_live(launched[1].2));
        assert!(f.tasks.is_live(launched[2].2), "most recent window survives");
        assert_eq!(allocation.kind, AllocationKind::ExistingInstanceNewTask);
        assert_eq!(allocation.instance_id, Some(launched[0].1));
    }

    #[test]
    fn test_multi_window_enter_time_uses_clock() {
        let f = Fixture::new(3);
        let manager = f.manager();
        f.clock.set(123_456);

        manager.record_multi_window_mode_entered();

        assert_eq!(manager.registry().multi_window_enter_time(), Some(123_456));
    }

    impl Fixture {
        fn registry_downgrade_handled(&self) -> bool {
            InstanceRegistry::new(self.store.clone()).downgrade_handled()
        }
    }
}
