//! Ordered instance summaries for window switchers and menus.

use std::sync::Arc;

use multiwindow_registry::{InstanceId, InstanceRecord, InstanceRegistry, ProfileKind, TaskId};
use serde::Serialize;

use crate::closer::WindowCloser;
use crate::host::{Clock, TaskHost};
use crate::reconciler::Reconciler;
use crate::types::{CloseReason, InstanceFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceTag {
    Current,
    /// Visible next to the current window in split screen.
    Adjacent,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub instance_id: InstanceId,
    pub task_id: Option<TaskId>,
    pub tag: InstanceTag,
    pub title: String,
    pub url: String,
    pub tab_count: u32,
    pub incognito_tab_count: u32,
    pub profile_kind: ProfileKind,
    pub last_accessed: i64,
    pub is_active: bool,
    pub closed_by_user: bool,
}

impl InstanceSummary {
    fn from_record(record: &InstanceRecord, tag: InstanceTag, is_active: bool) -> Self {
        Self {
            instance_id: record.id,
            task_id: record.task_id,
            tag,
            title: record.display_title().to_string(),
            url: record.url.clone(),
            tab_count: record.tab_count,
            incognito_tab_count: record.incognito_tab_count,
            profile_kind: record.profile_kind,
            last_accessed: record.last_accessed,
            is_active,
            closed_by_user: record.closed_by_user,
        }
    }
}

#[derive(Clone)]
pub struct InstanceViewProjector {
    registry: InstanceRegistry,
    tasks: Arc<dyn TaskHost>,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
    closer: WindowCloser,
    retention_millis: i64,
}

impl InstanceViewProjector {
    pub fn new(
        registry: InstanceRegistry,
        tasks: Arc<dyn TaskHost>,
        clock: Arc<dyn Clock>,
        reconciler: Reconciler,
        closer: WindowCloser,
        retention_millis: i64,
    ) -> Self {
        Self {
            registry,
            tasks,
            clock,
            reconciler,
            closer,
            retention_millis,
        }
    }

    /// Summaries of every record matching `filter`, with `current` first.
    ///
    /// Records idle for longer than the retention horizon are closed and left
    /// out, except `current`.
    pub fn list_instances(
        &self,
        current: Option<InstanceId>,
        adjacent: Option<InstanceId>,
        filter: InstanceFilter,
    ) -> Vec<InstanceSummary> {
        self.reconciler.reconcile();
        let now = self.clock.now_millis();
        let live = self.tasks.live_tasks();

        let mut summaries = Vec::new();
        for record in self.registry.records() {
            let is_current = Some(record.id) == current;
            if !is_current && now.saturating_sub(record.last_accessed) > self.retention_millis {
                self.closer.close(record.id, CloseReason::RetentionExpired);
                continue;
            }

            let is_active = record.task_id.is_some_and(|task| live.contains(&task));
            if !filter.matches(&record, is_active) {
                continue;
            }
            let tag = if is_current {
                InstanceTag::Current
            } else if Some(record.id) == adjacent {
                InstanceTag::Adjacent
            } else {
                InstanceTag::Other
            };
            summaries.push(InstanceSummary::from_record(&record, tag, is_active));
        }

        move_current_to_front(&mut summaries);
        summaries
    }
}

fn move_current_to_front(summaries: &mut [InstanceSummary]) {
    if let Some(pos) = summaries
        .iter()
        .position(|summary| summary.tag == InstanceTag::Current)
    {
        summaries[..=pos].rotate_right(1);
    }
}
