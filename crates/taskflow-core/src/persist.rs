use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SyncError;
use crate::task::{Task, TaskDraft, TaskId, UserId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub completed: Option<bool>,
}

pub trait Persistence {
    fn snapshot(&self, user: &UserId) -> Result<Vec<Task>, SyncError>;

    fn create(&mut self, user: &UserId, draft: TaskDraft) -> Result<TaskId, SyncError>;

    fn update(&mut self, user: &UserId, id: &TaskId, patch: &TaskPatch) -> Result<(), SyncError>;

    fn delete(&mut self, user: &UserId, id: &TaskId) -> Result<(), SyncError>;
}

#[derive(Debug)]
pub struct LocalStore {
    data_dir: PathBuf,
}

impl LocalStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> Result<Self, SyncError> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .map_err(|err| SyncError::io(format!("failed to create {}", data_dir.display()), err))?;

        info!(data_dir = %data_dir.display(), "opened local task store");
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn collection_path(&self, user: &UserId) -> PathBuf {
        self.data_dir.join(format!("{user}.data"))
    }

    #[tracing::instrument(skip(self))]
    fn load(&self, user: &UserId) -> Result<Vec<Task>, SyncError> {
        let path = self.collection_path(user);
        if !path.exists() {
            return Ok(Vec::new());
        }
        load_jsonl(&path)
    }

    #[tracing::instrument(skip(self, tasks))]
    fn save(&self, user: &UserId, tasks: &[Task]) -> Result<(), SyncError> {
        save_jsonl_atomic(&self.collection_path(user), tasks)
    }
}

impl Persistence for LocalStore {
    fn snapshot(&self, user: &UserId) -> Result<Vec<Task>, SyncError> {
        self.load(user)
    }

    #[tracing::instrument(skip(self, draft), fields(user = %user))]
    fn create(&mut self, user: &UserId, draft: TaskDraft) -> Result<TaskId, SyncError> {
        let mut tasks = self.load(user)?;

        let id = TaskId::new(Uuid::new_v4().to_string());
        let task = draft.into_task(id.clone(), Utc::now());
        tasks.push(task);
        self.save(user, &tasks)?;

        debug!(id = %id, count = tasks.len(), "task created");
        Ok(id)
    }

    #[tracing::instrument(skip(self, patch), fields(user = %user, id = %id))]
    fn update(&mut self, user: &UserId, id: &TaskId, patch: &TaskPatch) -> Result<(), SyncError> {
        let mut tasks = self.load(user)?;

        let task = tasks
            .iter_mut()
            .find(|task| &task.id == id)
            .ok_or_else(|| SyncError::UnknownTask(id.clone()))?;
        if let Some(completed) = patch.completed {
            task.completed = completed;
        }

        self.save(user, &tasks)
    }

    #[tracing::instrument(skip(self), fields(user = %user, id = %id))]
    fn delete(&mut self, user: &UserId, id: &TaskId) -> Result<(), SyncError> {
        let mut tasks = self.load(user)?;

        let before = tasks.len();
        tasks.retain(|task| &task.id != id);
        if tasks.len() == before {
            return Err(SyncError::UnknownTask(id.clone()));
        }

        self.save(user, &tasks)
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> Result<Vec<Task>, SyncError> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)
        .map_err(|err| SyncError::io(format!("failed to open {}", path.display()), err))?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line
            .map_err(|err| SyncError::io(format!("failed reading {}", path.display()), err))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let task: Task = serde_json::from_str(trimmed).map_err(|err| {
            SyncError::codec(
                format!("failed parsing {} line {}", path.display(), idx + 1),
                err,
            )
        })?;
        out.push(task);
    }

    debug!(count = out.len(), "loaded tasks from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, tasks))]
fn save_jsonl_atomic(path: &Path, tasks: &[Task]) -> Result<(), SyncError> {
    debug!(file = %path.display(), count = tasks.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)
        .map_err(|err| SyncError::io(format!("failed creating temp file in {}", dir.display()), err))?;
    for task in tasks {
        let serialized = serde_json::to_string(task)
            .map_err(|err| SyncError::codec(format!("failed encoding task {}", task.id), err))?;
        writeln!(temp, "{serialized}")
            .map_err(|err| SyncError::io(format!("failed writing {}", path.display()), err))?;
    }
    temp.flush()
        .map_err(|err| SyncError::io(format!("failed flushing {}", path.display()), err))?;

    temp.persist(path)
        .map_err(|err| SyncError::io(format!("failed to persist {}", path.display()), err.error))?;

    Ok(())
}
