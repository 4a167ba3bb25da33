use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};

use crate::datetime::to_project_date;
use crate::task::Task;

pub const DEFAULT_DUE_SOON_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueStatus {
    Overdue,
    DueSoon,
    Scheduled,
    Undated,
}

impl DueStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Overdue => "overdue",
            Self::DueSoon => "due soon",
            Self::Scheduled => "scheduled",
            Self::Undated => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Tab {
    #[default]
    All,
    Today,
    Upcoming,
    Overdue,
}

impl Tab {
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "today" => Some(Self::Today),
            "upcoming" => Some(Self::Upcoming),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Today => "today",
            Self::Upcoming => "upcoming",
            Self::Overdue => "overdue",
        }
    }
}

pub fn classify(task: &Task, now: DateTime<Utc>, threshold: Duration) -> DueStatus {
    let Some(due) = task.due else {
        return DueStatus::Undated;
    };

    if !task.completed && due < now {
        return DueStatus::Overdue;
    }
    if !task.completed && due - now <= threshold {
        return DueStatus::DueSoon;
    }

    DueStatus::Scheduled
}

pub fn sort_for_display(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        a.completed
            .cmp(&b.completed)
            .then_with(|| cmp_due(a.due.as_ref(), b.due.as_ref()))
    });
}

fn cmp_due(left: Option<&DateTime<Utc>>, right: Option<&DateTime<Utc>>) -> Ordering {
    match (left, right) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn filter_by_tab(tasks: &[Task], tab: Tab, now: DateTime<Utc>) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| tab_matches(task, tab, now))
        .cloned()
        .collect()
}

fn tab_matches(task: &Task, tab: Tab, now: DateTime<Utc>) -> bool {
    match tab {
        Tab::All => true,
        Tab::Today => task
            .due
            .map(|due| to_project_date(due) == to_project_date(now))
            .unwrap_or(false),
        Tab::Upcoming => task.due.map(|due| due > now).unwrap_or(false),
        Tab::Overdue => !task.completed && task.due.map(|due| due < now).unwrap_or(false),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub pending: usize,
    pub done: usize,
}

pub fn compute_stats(tasks: &[Task]) -> Stats {
    let done = tasks.iter().filter(|task| task.completed).count();
    Stats {
        pending: tasks.len() - done,
        done,
    }
}
