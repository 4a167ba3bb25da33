use chrono::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::datetime::format_project_datetime;
use crate::error::SyncError;
use crate::notify::Notifier;
use crate::persist::{Persistence, TaskPatch};
use crate::reminder::ReminderEngine;
use crate::store::TaskStore;
use crate::task::{Task, TaskDraft, TaskId, UserId};
use crate::view::{self, Stats, Tab};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    generation: u64,
}

pub struct Session<P, C, N> {
    persistence: P,
    clock: C,
    notifier: N,
    store: TaskStore,
    reminders: ReminderEngine,
    threshold: Duration,
    user: Option<UserId>,
    generation: u64,
    system_notify: bool,
    notices: Vec<String>,
}

impl<P, C, N> Session<P, C, N>
where
    P: Persistence,
    C: Clock,
    N: Notifier,
{
    pub fn new(persistence: P, clock: C, notifier: N, threshold: Duration) -> Self {
        Self {
            persistence,
            clock,
            notifier,
            store: TaskStore::new(),
            reminders: ReminderEngine::new(),
            threshold,
            user: None,
            generation: 0,
            system_notify: false,
            notices: Vec::new(),
        }
    }

    #[tracing::instrument(skip(self), fields(user = %user))]
    pub fn sign_in(&mut self, user: UserId) -> Result<SessionHandle, SyncError> {
        self.generation += 1;
        self.store.clear();
        self.user = Some(user);
        info!(generation = self.generation, "signed in");

        self.refresh()?;
        Ok(SessionHandle {
            generation: self.generation,
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn sign_out(&mut self) {
        self.generation += 1;
        self.user = None;
        self.store.clear();
        info!(generation = self.generation, "signed out");
    }

    pub fn on_snapshot(&mut self, handle: SessionHandle, snapshot: Vec<Task>) {
        if handle.generation != self.generation {
            debug!(
                stale = handle.generation,
                current = self.generation,
                "ignoring snapshot from stale subscription"
            );
            return;
        }

        self.store.replace(snapshot);
        self.run_reminder_pass();
    }

    pub fn on_tick(&mut self, handle: SessionHandle) -> Result<(), SyncError> {
        if handle.generation != self.generation {
            debug!(
                stale = handle.generation,
                current = self.generation,
                "ignoring tick from stale timer"
            );
            return Ok(());
        }

        self.refresh()
    }

    #[tracing::instrument(skip(self, draft))]
    pub fn add(&mut self, draft: TaskDraft) -> Result<Option<TaskId>, SyncError> {
        let Some(user) = self.user.clone() else {
            warn!("add ignored: no authenticated user");
            return Ok(None);
        };

        let id = self.persistence.create(&user, draft)?;
        self.refresh()?;
        Ok(Some(id))
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    pub fn toggle(&mut self, id: &TaskId) -> Result<(), SyncError> {
        let Some(user) = self.user.clone() else {
            warn!("toggle ignored: no authenticated user");
            return Ok(());
        };

        let current = self
            .store
            .get(id)
            .ok_or_else(|| SyncError::UnknownTask(id.clone()))?;
        let patch = TaskPatch {
            completed: Some(!current.completed),
        };
        self.persistence.update(&user, id, &patch)?;
        self.refresh()
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    pub fn delete(&mut self, id: &TaskId) -> Result<(), SyncError> {
        let Some(user) = self.user.clone() else {
            warn!("delete ignored: no authenticated user");
            return Ok(());
        };

        self.persistence.delete(&user, id)?;
        self.refresh()
    }

    pub fn enable_notifications(&mut self) {
        match self.notifier.request_permission() {
            Ok(()) => {
                self.system_notify = true;
            }
            Err(err) => {
                warn!(error = %err, "notification permission not granted; using in-app notices");
                self.system_notify = false;
            }
        }
    }

    pub fn view(&self, tab: Tab) -> Vec<Task> {
        let mut tasks = self.store.tasks().to_vec();
        view::sort_for_display(&mut tasks);
        view::filter_by_tab(&tasks, tab, self.clock.now())
    }

    pub fn stats(&self) -> Stats {
        view::compute_stats(self.store.tasks())
    }

    pub fn tasks(&self) -> &[Task] {
        self.store.tasks()
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    fn refresh(&mut self) -> Result<(), SyncError> {
        let Some(user) = self.user.clone() else {
            self.store.clear();
            return Ok(());
        };

        let snapshot = self.persistence.snapshot(&user)?;
        self.store.replace(snapshot);
        self.run_reminder_pass();
        Ok(())
    }

    fn run_reminder_pass(&mut self) {
        let now = self.clock.now();
        let fired = self.reminders.check(self.store.tasks(), now, self.threshold);

        for reminder in fired {
            let body = format!("due {}", format_project_datetime(reminder.due));
            if self.system_notify {
                if let Err(err) = self.notifier.notify(&reminder.title, &body) {
                    warn!(task = %reminder.task_id, error = %err, "reminder delivery failed");
                    self.notices.push(format!("Due soon: {}", reminder.title));
                }
            } else {
                self.notices.push(format!("Due soon: {}", reminder.title));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{Duration, TimeZone, Utc};

    use super::Session;
    use crate::clock::ManualClock;
    use crate::error::{NotifyError, SyncError};
    use crate::notify::Notifier;
    use crate::persist::{Persistence, TaskPatch};
    use crate::task::{Task, TaskDraft, TaskId, UserId};
    use crate::view::Tab;

    #[derive(Default)]
    struct MemoryBackend {
        collections: HashMap<UserId, Vec<Task>>,
        create_calls: usize,
        next_id: u64,
    }

    impl MemoryBackend {
        fn seed(&mut self, user: &str, titles: &[&str]) {
            let created = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
            let tasks = titles
                .iter()
                .map(|title| {
                    TaskDraft::new(title)
                        .expect("valid draft")
                        .into_task(TaskId::new(format!("{user}-{title}")), created)
                })
                .collect();
            self.collections.insert(UserId::new(user), tasks);
        }
    }

    impl Persistence for MemoryBackend {
        fn snapshot(&self, user: &UserId) -> Result<Vec<Task>, SyncError> {
            Ok(self.collections.get(user).cloned().unwrap_or_default())
        }

        fn create(&mut self, user: &UserId, draft: TaskDraft) -> Result<TaskId, SyncError> {
            self.create_calls += 1;
            self.next_id += 1;
            let id = TaskId::new(format!("t{}", self.next_id));
            let task = draft.into_task(id.clone(), Utc::now());
            self.collections.entry(user.clone()).or_default().push(task);
            Ok(id)
        }

        fn update(&mut self, user: &UserId, id: &TaskId, patch: &TaskPatch) -> Result<(), SyncError> {
            let tasks = self.collections.entry(user.clone()).or_default();
            let task = tasks
                .iter_mut()
                .find(|task| &task.id == id)
                .ok_or_else(|| SyncError::UnknownTask(id.clone()))?;
            if let Some(completed) = patch.completed {
                task.completed = completed;
            }
            Ok(())
        }

        fn delete(&mut self, user: &UserId, id: &TaskId) -> Result<(), SyncError> {
            let tasks = self.collections.entry(user.clone()).or_default();
            let before = tasks.len();
            tasks.retain(|task| &task.id != id);
            if tasks.len() == before {
                return Err(SyncError::UnknownTask(id.clone()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        deny_permission: bool,
        fail_delivery: bool,
        sent: Vec<(String, String)>,
    }

    impl Notifier for RecordingNotifier {
        fn request_permission(&mut self) -> Result<(), NotifyError> {
            if self.deny_permission {
                Err(NotifyError::PermissionDenied)
            } else {
                Ok(())
            }
        }

        fn notify(&mut self, title: &str, body: &str) -> Result<(), NotifyError> {
            if self.fail_delivery {
                return Err(NotifyError::Delivery);
            }
            self.sent.push((title.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap())
    }

    fn threshold() -> Duration {
        Duration::minutes(15)
    }

    #[test]
    fn sign_in_replaces_snapshot_wholesale() {
        let mut backend = MemoryBackend::default();
        backend.seed("alice", &["one", "two"]);
        backend.seed("bob", &["three"]);

        let mut session =
            Session::new(backend, clock(), RecordingNotifier::default(), threshold());

        session.sign_in(UserId::new("alice")).expect("sign in alice");
        assert_eq!(session.tasks().len(), 2);

        session.sign_in(UserId::new("bob")).expect("sign in bob");
        assert_eq!(session.tasks().len(), 1);
        assert_eq!(session.tasks()[0].title, "three");
    }

    #[test]
    fn stale_handles_are_ignored() {
        let mut backend = MemoryBackend::default();
        backend.seed("alice", &["one"]);
        backend.seed("bob", &["three"]);

        let mut session =
            Session::new(backend, clock(), RecordingNotifier::default(), threshold());

        let old = session.sign_in(UserId::new("alice")).expect("sign in alice");
        let _new = session.sign_in(UserId::new("bob")).expect("sign in bob");

        let created = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        let rogue = TaskDraft::new("rogue")
            .expect("valid draft")
            .into_task(TaskId::new("rogue"), created);
        session.on_snapshot(old, vec![rogue]);
        assert_eq!(session.tasks().len(), 1);
        assert_eq!(session.tasks()[0].title, "three");

        session.on_tick(old).expect("stale tick is a no-op");
        assert_eq!(session.tasks().len(), 1);
    }

    #[test]
    fn sign_out_clears_the_store_and_invalidates_handles() {
        let mut backend = MemoryBackend::default();
        backend.seed("alice", &["one", "two"]);

        let mut session =
            Session::new(backend, clock(), RecordingNotifier::default(), threshold());
        let handle = session.sign_in(UserId::new("alice")).expect("sign in");
        assert_eq!(session.tasks().len(), 2);

        session.sign_out();
        assert!(session.tasks().is_empty());

        session.on_tick(handle).expect("stale tick is a no-op");
        assert!(session.tasks().is_empty());

        let draft = TaskDraft::new("late arrival").expect("valid draft");
        assert_eq!(session.add(draft).expect("add after sign out"), None);
    }

    #[test]
    fn add_toggle_delete_round_trip() {
        let mut session = Session::new(
            MemoryBackend::default(),
            clock(),
            RecordingNotifier::default(),
            threshold(),
        );
        let _handle = session.sign_in(UserId::new("alice")).expect("sign in");

        let draft = TaskDraft::new("write tests").expect("valid draft");
        let id = session.add(draft).expect("add").expect("signed in");
        assert_eq!(session.tasks().len(), 1);
        assert!(!session.tasks()[0].completed);

        session.toggle(&id).expect("toggle");
        assert!(session.tasks()[0].completed);

        session.toggle(&id).expect("toggle back");
        assert!(!session.tasks()[0].completed);

        session.delete(&id).expect("delete");
        assert!(session.tasks().is_empty());
    }

    #[test]
    fn invalid_draft_never_reaches_the_backend() {
        let mut session = Session::new(
            MemoryBackend::default(),
            clock(),
            RecordingNotifier::default(),
            threshold(),
        );
        let _handle = session.sign_in(UserId::new("alice")).expect("sign in");

        assert!(TaskDraft::new("   ").is_err());
        assert_eq!(session.persistence.create_calls, 0);
        assert!(session.tasks().is_empty());
    }

    #[test]
    fn signed_out_mutations_are_silent_no_ops() {
        let mut session = Session::new(
            MemoryBackend::default(),
            clock(),
            RecordingNotifier::default(),
            threshold(),
        );

        let draft = TaskDraft::new("orphan").expect("valid draft");
        assert_eq!(session.add(draft).expect("add without user"), None);
        assert_eq!(session.persistence.create_calls, 0);
        session.toggle(&TaskId::new("nope")).expect("toggle without user");
        session.delete(&TaskId::new("nope")).expect("delete without user");
    }

    #[test]
    fn due_soon_task_notifies_system_channel_once() {
        let clock = clock();
        let now = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();

        let mut backend = MemoryBackend::default();
        let created = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        let mut soon = TaskDraft::new("standup")
            .expect("valid draft")
            .into_task(TaskId::new("standup"), created);
        soon.due = Some(now + Duration::minutes(10));
        backend.collections.insert(UserId::new("alice"), vec![soon]);

        let mut session =
            Session::new(backend, &clock, RecordingNotifier::default(), threshold());
        session.enable_notifications();

        let handle = session.sign_in(UserId::new("alice")).expect("sign in");
        assert_eq!(session.notifier.sent.len(), 1);
        assert_eq!(session.notifier.sent[0].0, "standup");

        clock.advance(Duration::minutes(1));
        session.on_tick(handle).expect("tick");
        assert_eq!(session.notifier.sent.len(), 1);
        assert!(session.take_notices().is_empty());
    }

    #[test]
    fn permission_denied_degrades_to_notices_and_still_marks_notified() {
        let clock = clock();
        let now = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();

        let mut backend = MemoryBackend::default();
        let created = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        let mut soon = TaskDraft::new("standup")
            .expect("valid draft")
            .into_task(TaskId::new("standup"), created);
        soon.due = Some(now + Duration::minutes(10));
        backend.collections.insert(UserId::new("alice"), vec![soon]);

        let notifier = RecordingNotifier {
            deny_permission: true,
            ..RecordingNotifier::default()
        };
        let mut session = Session::new(backend, &clock, notifier, threshold());
        session.enable_notifications();

        let handle = session.sign_in(UserId::new("alice")).expect("sign in");
        assert_eq!(session.take_notices(), vec!["Due soon: standup".to_string()]);
        assert!(session.notifier.sent.is_empty());

        clock.advance(Duration::minutes(1));
        session.on_tick(handle).expect("tick");
        assert!(session.take_notices().is_empty());
    }

    #[test]
    fn delivery_failure_still_marks_notified() {
        let clock = clock();
        let now = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();

        let mut backend = MemoryBackend::default();
        let created = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        let mut soon = TaskDraft::new("standup")
            .expect("valid draft")
            .into_task(TaskId::new("standup"), created);
        soon.due = Some(now + Duration::minutes(10));
        backend.collections.insert(UserId::new("alice"), vec![soon]);

        let notifier = RecordingNotifier {
            fail_delivery: true,
            ..RecordingNotifier::default()
        };
        let mut session = Session::new(backend, &clock, notifier, threshold());
        session.enable_notifications();

        let handle = session.sign_in(UserId::new("alice")).expect("sign in");
        assert_eq!(session.take_notices(), vec!["Due soon: standup".to_string()]);

        clock.advance(Duration::minutes(1));
        session.on_tick(handle).expect("tick");
        assert!(session.take_notices().is_empty());
    }

    #[test]
    fn view_sorts_then_filters() {
        let now = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
        let created = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();

        let mut backend = MemoryBackend::default();
        let mut early = TaskDraft::new("early")
            .expect("valid draft")
            .into_task(TaskId::new("early"), created);
        early.due = Some(now + Duration::hours(1));
        let mut late = TaskDraft::new("late")
            .expect("valid draft")
            .into_task(TaskId::new("late"), created);
        late.due = Some(now + Duration::hours(2));
        backend
            .collections
            .insert(UserId::new("alice"), vec![late, early]);

        let mut session =
            Session::new(backend, clock(), RecordingNotifier::default(), threshold());
        session.sign_in(UserId::new("alice")).expect("sign in");

        let upcoming = session.view(Tab::Upcoming);
        let order: Vec<&str> = upcoming.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(order, vec!["early", "late"]);
    }
}
