use std::collections::BTreeSet;
use std::sync::Arc;

use multiwindow::coord::{
    AllocationRequest, Allocator, ExcessInstanceReaper, InProcessTaskHost, ManualClock,
    ReapOutcome, Reconciler,
};
use multiwindow::registry::Durability;
use multiwindow::{
    AllocationKind, CoordinatorContext, InstanceId, InstanceRegistry, MemoryRegistryStore,
    StartupCheck, TaskHost, TaskId,
};

struct World {
    registry: InstanceRegistry,
    tasks: Arc<InProcessTaskHost>,
    clock: Arc<ManualClock>,
}

impl World {
    fn new() -> Self {
        Self {
            registry: InstanceRegistry::new(Arc::new(MemoryRegistryStore::new())),
            tasks: Arc::new(InProcessTaskHost::new()),
            clock: Arc::new(ManualClock::new(1_000)),
        }
    }

    fn live_instance(&self, id: u32, task: i64, last_accessed: i64) {
        self.tasks.adopt_task(TaskId(task));
        self.registry
            .set_task_id(InstanceId(id), TaskId(task), Durability::Immediate)
            .unwrap();
        self.registry
            .set_last_accessed(InstanceId(id), last_accessed)
            .unwrap();
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.registry.clone(), self.tasks.clone())
    }

    fn reaper(&self) -> ExcessInstanceReaper {
        ExcessInstanceReaper::new(self.registry.clone(), self.tasks.clone())
    }

    fn allocator(&self) -> Allocator {
        Allocator::new(
            self.registry.clone(),
            self.clock.clone(),
            self.reconciler(),
            self.reaper(),
        )
    }
}

#[test]
fn prefer_new_takes_lowest_unused_slot() {
    let world = World::new();
    world.live_instance(0, 100, 50);

    let allocation = world
        .allocator()
        .allocate(&AllocationRequest::new(None, 2).prefer_new());

    assert_eq!(allocation.instance_id, Some(InstanceId(1)));
    assert_eq!(allocation.kind, AllocationKind::NewInstanceNewTask);
}

#[test]
fn mapped_task_wins_over_scan() {
    let world = World::new();
    world.live_instance(0, 100, 50);

    let allocation = world
        .allocator()
        .allocate(&AllocationRequest::new(Some(TaskId(100)), 2));

    assert_eq!(allocation.instance_id, Some(InstanceId(0)));
    assert_eq!(allocation.kind, AllocationKind::ExistingInstanceMappedTask);
}

#[test]
fn downgrade_from_three_to_one_reaps_two_oldest_exactly_once() {
    let world = World::new();
    world.live_instance(0, 1, 10);
    world.live_instance(1, 2, 20);
    world.live_instance(2, 3, 30);
    let reaper = world.reaper();

    let outcome = reaper.reap_if_downgraded(1, None);

    assert_eq!(
        outcome,
        ReapOutcome::Reaped(vec![(InstanceId(0), TaskId(1)), (InstanceId(1), TaskId(2))])
    );
    assert_eq!(world.tasks.finished_tasks(), vec![TaskId(1), TaskId(2)]);
    assert!(world.registry.downgrade_handled());
    assert!(
        world.registry.record_exists(InstanceId(0)),
        "reaping clears the mapping but keeps the record"
    );
    assert_eq!(world.registry.task_id(InstanceId(0)), None);

    assert_eq!(reaper.reap_if_downgraded(1, None), ReapOutcome::AlreadyHandled);
    assert_eq!(world.tasks.finished_tasks().len(), 2);
}

#[test]
fn reconcile_deletes_unrestorable_record() {
    let world = World::new();
    world.registry.set_last_accessed(InstanceId(4), 0).unwrap();
    assert!(world.registry.record_exists(InstanceId(4)));

    let report = world.reconciler().reconcile();

    assert_eq!(report.removed, vec![InstanceId(4)]);
    assert!(!world.registry.record_exists(InstanceId(4)));
}

#[test]
fn reconcile_leaves_unique_live_mappings_and_is_idempotent() {
    let world = World::new();
    world.live_instance(0, 7, 10);
    world.live_instance(1, 8, 20);
    world
        .registry
        .set_task_id(InstanceId(2), TaskId(7), Durability::Immediate)
        .unwrap();
    world.registry.set_last_accessed(InstanceId(2), 5).unwrap();
    world
        .registry
        .set_task_id(InstanceId(3), TaskId(99), Durability::Immediate)
        .unwrap();
    world.registry.set_tab_counts(InstanceId(3), 1, 0).unwrap();

    let reconciler = world.reconciler();
    reconciler.reconcile();
    let first: Vec<_> = world.registry.records();
    let second_report = reconciler.reconcile();

    let mappings = world.registry.task_mappings();
    let tasks: BTreeSet<_> = mappings.iter().map(|(_, task)| *task).collect();
    assert_eq!(tasks.len(), mappings.len(), "live tasks map to one instance");
    assert_eq!(world.registry.instance_for_task(TaskId(7)), Some(InstanceId(0)));
    assert_eq!(world.registry.task_id(InstanceId(3)), None, "dead task unmapped");
    assert!(world.registry.record_exists(InstanceId(3)), "record with tabs kept");

    assert!(second_report.is_empty());
    assert_eq!(world.registry.records(), first);
}

#[test]
fn allocation_is_deterministic_for_a_fixed_snapshot() {
    let world = World::new();
    world.live_instance(0, 1, 10);
    world.registry.set_tab_counts(InstanceId(1), 2, 0).unwrap();
    world.registry.set_last_accessed(InstanceId(1), 40).unwrap();
    world.registry.set_tab_counts(InstanceId(2), 1, 0).unwrap();
    world.registry.set_last_accessed(InstanceId(2), 30).unwrap();

    let request = AllocationRequest::new(None, 4);
    let allocator = world.allocator();
    let first = allocator.allocate(&request);
    world.registry.set_last_accessed(InstanceId(1), 40).unwrap();
    let second = allocator.allocate(&request);

    assert_eq!(first, second);
    assert_eq!(first.instance_id, Some(InstanceId(1)));
    assert_eq!(first.kind, AllocationKind::ExistingInstanceNewTask);
}

#[test]
fn startup_is_refused_while_merging_task_is_alive() {
    let tasks = InProcessTaskHost::new();
    let absorbing = tasks.spawn_task();
    let other = tasks.spawn_task();
    let context = CoordinatorContext::new();
    context.set_merged_instance_task_id(absorbing);

    assert_eq!(
        context.check_startup(other, &tasks),
        StartupCheck::Refuse {
            merged_into: absorbing
        }
    );

    tasks.finish_task(absorbing);
    assert_eq!(context.check_startup(other, &tasks), StartupCheck::Proceed);
}
