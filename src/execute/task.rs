use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ExecutorError;
use crate::action::Value;
use crate::rule::Rule;

/// Caller-supplied parameters, applied with [`Rule::set`] before compile.
pub type Params = HashMap<String, Value>;

/// Invoked with the rule when its run fails. An error it returns is folded
/// into the task's failure message.
pub type Callback = Arc<dyn Fn(&dyn Rule) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Wait,
    Run,
    Ok,
    Fail,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Ok | TaskStatus::Fail)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Wait => "wait",
            TaskStatus::Run => "run",
            TaskStatus::Ok => "ok",
            TaskStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Once,
    Cycle,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Once => f.write_str("once"),
            TaskType::Cycle => f.write_str("cycle"),
        }
    }
}

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    cron_entry: Option<u64>,
    running_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    error: Option<ExecutorError>,
    runs: u64,
}

/// One execution request for a rule.
///
/// The rule sits behind a mutex, so ticks of a recurring task never run the
/// same instance concurrently.
pub struct Task {
    id: String,
    task_type: TaskType,
    cron: Option<String>,
    rule_key: String,
    rule: Mutex<Box<dyn Rule>>,
    params: Params,
    callback: Option<Callback>,
    state: RwLock<TaskState>,
}

impl Task {
    pub(crate) fn new(
        task_type: TaskType,
        cron: Option<String>,
        rule: Box<dyn Rule>,
        params: Params,
        callback: Option<Callback>,
    ) -> Self {
        Task {
            id: Uuid::new_v4().to_string(),
            task_type,
            cron,
            rule_key: rule.info().key(),
            rule: Mutex::new(rule),
            params,
            callback,
            state: RwLock::new(TaskState {
                status: TaskStatus::Wait,
                cron_entry: None,
                running_time: None,
                end_time: None,
                error: None,
                runs: 0,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TaskState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TaskState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn cron(&self) -> Option<&str> {
        self.cron.as_deref()
    }

    /// Key of the rule this task runs.
    pub fn rule_key(&self) -> &str {
        &self.rule_key
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn status(&self) -> TaskStatus {
        self.read().status
    }

    /// Handle of the cron entry, once the dispatch loop has scheduled it.
    pub fn cron_entry(&self) -> Option<u64> {
        self.read().cron_entry
    }

    /// Start of the latest run.
    pub fn running_time(&self) -> Option<DateTime<Utc>> {
        self.read().running_time
    }

    /// End of the latest run; `None` while running or never run.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.read().end_time
    }

    /// The terminal error of the latest run.
    pub fn error(&self) -> Option<ExecutorError> {
        self.read().error.clone()
    }

    /// How many runs have started.
    pub fn runs(&self) -> u64 {
        self.read().runs
    }

    /// Gives `f` access to the rule, e.g. to [`Rule::get`] results after a
    /// run. Blocks while the rule is running.
    pub fn inspect<R>(&self, f: impl FnOnce(&dyn Rule) -> R) -> R {
        let rule = self.lock_rule();
        f(&**rule)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.read();
        TaskSnapshot {
            id: self.id.clone(),
            rule: self.rule_key.clone(),
            task_type: self.task_type,
            cron: self.cron.clone(),
            status: state.status,
            params: self.params.clone(),
            running_time: state.running_time,
            end_time: state.end_time,
            error: state.error.as_ref().map(ToString::to_string),
            runs: state.runs,
        }
    }

    pub(crate) fn lock_rule(&self) -> MutexGuard<'_, Box<dyn Rule>> {
        self.rule.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn callback(&self) -> Option<&Callback> {
        self.callback.as_ref()
    }

    pub(crate) fn set_cron_entry(&self, entry: u64) {
        self.write().cron_entry = Some(entry);
    }

    pub(crate) fn start(&self) {
        let mut state = self.write();
        let now = Utc::now();
        state.status = TaskStatus::Run;
        state.running_time = Some(now);
        state.end_time = None;
        state.error = None;
        state.runs += 1;
        log::info!("[{}] started at {}", self.id, now);
    }

    pub(crate) fn over(&self) {
        let mut state = self.write();
        state.status = TaskStatus::Ok;
        state.end_time = Some(Utc::now());
        log::info!("[{}] finished, started at {:?}", self.id, state.running_time);
    }

    pub(crate) fn failed(&self, error: ExecutorError) {
        let mut state = self.write();
        log::warn!("[{}] failed: {}", self.id, error);
        state.status = TaskStatus::Fail;
        state.end_time = Some(Utc::now());
        state.error = Some(error);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("rule", &self.rule_key)
            .field("task_type", &self.task_type)
            .field("status", &self.status())
            .finish()
    }
}

/// Serialisable point-in-time view of a [`Task`].
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub rule: String,
    pub task_type: TaskType,
    pub cron: Option<String>,
    pub status: TaskStatus,
    pub params: Params,
    pub running_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub runs: u64,
}
