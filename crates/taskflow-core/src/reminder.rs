use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::task::{Task, TaskId};
use crate::view::{DueStatus, classify};

#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub task_id: TaskId,
    pub title: String,
    pub due: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ReminderEngine {
    notified: BTreeSet<TaskId>,
}

impl ReminderEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, tasks: &[Task], now: DateTime<Utc>, threshold: Duration) -> Vec<Reminder> {
        let mut fired = Vec::new();

        for task in tasks {
            if task.completed {
                continue;
            }
            let Some(due) = task.due else {
                continue;
            };
            if classify(task, now, threshold) != DueStatus::DueSoon {
                continue;
            }
            if self.notified.contains(&task.id) {
                continue;
            }

            self.notified.insert(task.id.clone());
            fired.push(Reminder {
                task_id: task.id.clone(),
                title: task.title.clone(),
                due,
            });
        }

        if !fired.is_empty() {
            debug!(count = fired.len(), "due-soon reminders fired");
        }
        fired
    }

    pub fn already_notified(&self, id: &TaskId) -> bool {
        self.notified.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::ReminderEngine;
    use crate::task::{Task, TaskDraft, TaskId};

    fn threshold() -> Duration {
        Duration::minutes(15)
    }

    fn task(id: &str, due: Option<DateTime<Utc>>, completed: bool) -> Task {
        let created = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        let mut task = TaskDraft::new(id)
            .expect("valid draft")
            .into_task(TaskId::new(id), created);
        task.due = due;
        task.completed = completed;
        task
    }

    #[test]
    fn fires_once_per_task_per_session() {
        let now = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
        let tasks = vec![task("soon", Some(now + Duration::minutes(10)), false)];

        let mut engine = ReminderEngine::new();
        let first = engine.check(&tasks, now, threshold());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].task_id, TaskId::new("soon"));

        let second = engine.check(&tasks, now, threshold());
        assert!(second.is_empty());
        assert!(engine.already_notified(&TaskId::new("soon")));
    }

    #[test]
    fn skips_completed_undated_overdue_and_far_future() {
        let now = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
        let tasks = vec![
            task("done", Some(now + Duration::minutes(5)), true),
            task("undated", None, false),
            task("overdue", Some(now - Duration::minutes(5)), false),
            task("far", Some(now + Duration::hours(3)), false),
        ];

        let mut engine = ReminderEngine::new();
        assert!(engine.check(&tasks, now, threshold()).is_empty());
    }

    #[test]
    fn fires_when_task_crosses_threshold_on_later_tick() {
        let now = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
        let tasks = vec![task("later", Some(now + Duration::hours(1)), false)];

        let mut engine = ReminderEngine::new();
        assert!(engine.check(&tasks, now, threshold()).is_empty());

        let advanced = now + Duration::minutes(50);
        let fired = engine.check(&tasks, advanced, threshold());
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].title, "later");
    }

    #[test]
    fn remains_marked_after_task_goes_overdue() {
        let now = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
        let tasks = vec![task("soon", Some(now + Duration::minutes(10)), false)];

        let mut engine = ReminderEngine::new();
        assert_eq!(engine.check(&tasks, now, threshold()).len(), 1);

        let past_due = now + Duration::minutes(30);
        assert!(engine.check(&tasks, past_due, threshold()).is_empty());
        assert!(engine.already_notified(&TaskId::new("soon")));
    }
}
