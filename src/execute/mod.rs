//! Task execution: immediate, queued and recurring.
//!
//! Every path ends in the same pipeline: mark the task running, check and
//! bind the rule's actions from the [`Registry`], apply parameters, compile
//! and run. Queued ids are pulled in FIFO order by a single dispatch loop
//! that hands `once` tasks to the worker pool and registers `cycle` tasks
//! with the cron engine.

pub mod config;
pub mod cron;
pub mod error;
pub mod pool;
pub mod queue;
pub mod task;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::action::Registry;
use crate::rule::Rule;

pub use config::ExecutorConfig;
pub use self::cron::{CronEngine, Schedule};
pub use error::{CronError, ExecutorError, PoolError};
pub use pool::WorkerPool;
pub use queue::TaskQueue;
pub use task::{Callback, Params, Task, TaskSnapshot, TaskStatus, TaskType};

/// The executor contract.
pub trait Executor: Send + Sync {
    /// Starts the dispatch loop. Idempotent.
    fn start(&self) -> Result<(), ExecutorError>;

    /// Stops the dispatch loop after its current iteration. Running tasks and
    /// already scheduled cron entries are unaffected.
    fn stop(&self) -> Result<(), ExecutorError>;

    /// Returns the rule's dependency keys that the registry cannot satisfy.
    /// An empty list means the rule is runnable.
    fn check_action(&self, rule: &dyn Rule) -> Result<Vec<String>, ExecutorError>;

    /// Runs the rule on the calling thread, bypassing queue and pool.
    fn execute(
        &self,
        rule: Box<dyn Rule>,
        params: Params,
        callback: Option<Callback>,
    ) -> (String, Result<(), ExecutorError>);

    /// Queues a one-shot task and returns its id.
    fn add_task(
        &self,
        rule: Box<dyn Rule>,
        params: Params,
        callback: Option<Callback>,
    ) -> Result<String, ExecutorError>;

    /// Queues a recurring task; its cron entry is registered when the
    /// dispatch loop first pulls it. Never reclaimed by [`Executor::clean`].
    fn add_scheduled_task(
        &self,
        cron: &str,
        rule: Box<dyn Rule>,
        params: Params,
        callback: Option<Callback>,
    ) -> Result<String, ExecutorError>;

    /// Deletes the task record only. An in-flight run completes, and a cron
    /// entry ends at its next tick when it finds the task gone.
    fn remove_task(&self, id: &str) -> bool;

    /// Deletes every finished one-shot task. Returns how many were removed.
    fn clean(&self) -> usize;

    fn get_task(&self, id: &str) -> Option<Arc<Task>>;
}

/// The in-process executor, running on a tokio runtime.
pub struct BuiltInExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    config: ExecutorConfig,
    registry: Arc<Registry>,
    handle: Handle,
    pool: WorkerPool,
    cron: CronEngine,
    execute_queue: TaskQueue,
    end_queue: TaskQueue,
    tasks: RwLock<HashMap<String, Arc<Task>>>,
    running: AtomicBool,
    generation: watch::Sender<u64>,
}

impl BuiltInExecutor {
    /// Must be called from within a tokio runtime, whose handle the
    /// executor keeps for its dispatch loop, pool and timers.
    pub fn new(registry: Arc<Registry>, config: ExecutorConfig) -> Result<Self, ExecutorError> {
        let handle = Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;
        let (generation, _) = watch::channel(0);
        log::info!(
            "create executor with pool size {}",
            config.max_pool_size.max(1)
        );
        Ok(BuiltInExecutor {
            inner: Arc::new(Inner {
                pool: WorkerPool::new(config.max_pool_size, handle.clone()),
                cron: CronEngine::new(handle.clone()),
                execute_queue: TaskQueue::new(),
                end_queue: TaskQueue::new(),
                tasks: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
                generation,
                registry,
                handle,
                config,
            }),
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Ids waiting in the execute queue.
    pub fn queued(&self) -> usize {
        self.inner.execute_queue.len()
    }

    /// Finished one-shot tasks awaiting [`Executor::clean`].
    pub fn finished(&self) -> usize {
        self.inner.end_queue.len()
    }

    /// Whether the configured auto-clean quantity has been reached.
    pub fn needs_clean(&self) -> bool {
        self.inner
            .config
            .auto_clean_quantity()
            .is_some_and(|quantity| self.finished() >= quantity)
    }

    /// Active cron entries.
    pub fn scheduled(&self) -> usize {
        self.inner.cron.len()
    }

    /// Snapshots of every known task.
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.inner.read_tasks().values().map(|t| t.snapshot()).collect()
    }

    /// Stops the executor, closes the worker pool and cancels every cron
    /// entry. Tasks dispatched afterwards fail with
    /// [`ExecutorError::PoolClosed`].
    pub fn release(&self) {
        log::warn!("release executor");
        self.inner.halt();
        self.inner.pool.close();
        self.inner.cron.stop();
    }

    fn store(&self, task: Task) -> Arc<Task> {
        let task = Arc::new(task);
        self.inner
            .write_tasks()
            .insert(task.id().to_string(), Arc::clone(&task));
        task
    }
}

impl Drop for BuiltInExecutor {
    fn drop(&mut self) {
        self.inner.halt();
        self.inner.cron.stop();
    }
}

impl Executor for BuiltInExecutor {
    fn start(&self) -> Result<(), ExecutorError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            log::debug!("executor already started");
            return Ok(());
        }
        let mut generation = 0;
        self.inner.generation.send_modify(|g| {
            *g += 1;
            generation = *g;
        });
        log::info!("start executor");
        self.inner
            .handle
            .spawn(dispatch_loop(Arc::clone(&self.inner), generation));
        Ok(())
    }

    fn stop(&self) -> Result<(), ExecutorError> {
        self.inner.halt();
        Ok(())
    }

    fn check_action(&self, rule: &dyn Rule) -> Result<Vec<String>, ExecutorError> {
        Ok(self.inner.check_action(rule))
    }

    fn execute(
        &self,
        rule: Box<dyn Rule>,
        params: Params,
        callback: Option<Callback>,
    ) -> (String, Result<(), ExecutorError>) {
        let task = self.store(Task::new(TaskType::Once, None, rule, params, callback));
        log::info!("execute task {} with rule {}", task.id(), task.rule_key());
        let result = self.inner.run_task(&task);
        (task.id().to_string(), result)
    }

    fn add_task(
        &self,
        rule: Box<dyn Rule>,
        params: Params,
        callback: Option<Callback>,
    ) -> Result<String, ExecutorError> {
        let task = self.store(Task::new(TaskType::Once, None, rule, params, callback));
        self.inner.execute_queue.push(task.id());
        log::info!("add new task {} with rule {}", task.id(), task.rule_key());
        Ok(task.id().to_string())
    }

    fn add_scheduled_task(
        &self,
        cron: &str,
        rule: Box<dyn Rule>,
        params: Params,
        callback: Option<Callback>,
    ) -> Result<String, ExecutorError> {
        Schedule::parse(cron)?;
        let task = self.store(Task::new(
            TaskType::Cycle,
            Some(cron.to_string()),
            rule,
            params,
            callback,
        ));
        self.inner.execute_queue.push(task.id());
        log::info!(
            "add new scheduled task {} with rule {}, cron: '{}'",
            task.id(),
            task.rule_key(),
            cron
        );
        Ok(task.id().to_string())
    }

    fn remove_task(&self, id: &str) -> bool {
        log::info!("remove task {}", id);
        self.inner.write_tasks().remove(id).is_some()
    }

    fn clean(&self) -> usize {
        log::info!("clean ended task cache");
        let ended = self.inner.end_queue.drain();
        let mut tasks = self.inner.write_tasks();
        ended
            .iter()
            .filter(|id| {
                log::debug!("clean ended task {}", id);
                tasks.remove(id.as_str()).is_some()
            })
            .count()
    }

    fn get_task(&self, id: &str) -> Option<Arc<Task>> {
        self.inner.get_task(id)
    }
}

impl Inner {
    fn read_tasks(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Task>>> {
        self.tasks.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_tasks(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Task>>> {
        self.tasks.write().unwrap_or_else(|p| p.into_inner())
    }

    fn get_task(&self, id: &str) -> Option<Arc<Task>> {
        self.read_tasks().get(id).cloned()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && *self.generation.borrow() == generation
    }

    fn halt(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::info!("stop executor");
            self.generation.send_modify(|g| *g += 1);
        }
    }

    fn check_action(&self, rule: &dyn Rule) -> Vec<String> {
        let keys: Vec<&String> = rule.info().rely_on().keys().collect();
        self.registry.check_exist(&keys)
    }

    /// Runs the pipeline and records the outcome. Finished one-shot tasks
    /// go onto the end queue.
    fn run_task(&self, task: &Task) -> Result<(), ExecutorError> {
        task.start();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.pipeline(task)))
            .unwrap_or_else(|_| Err(ExecutorError::Panicked(task.id().to_string())));
        match &result {
            Ok(()) => task.over(),
            Err(e) => task.failed(e.clone()),
        }
        self.finish(task);
        result
    }

    fn finish(&self, task: &Task) {
        if task.task_type() == TaskType::Once {
            self.end_queue.push(task.id());
        }
    }

    fn pipeline(&self, task: &Task) -> Result<(), ExecutorError> {
        let id = task.id();
        let mut rule = task.lock_rule();

        log::info!("check [{}] rely on", id);
        let missing = self.check_action(&**rule);
        if !missing.is_empty() {
            return Err(ExecutorError::ActionsNotLoaded(missing));
        }

        log::info!("add rely on to [{}]", id);
        for (dependency, recipient) in rule.info().rely_on().clone() {
            let action = self
                .registry
                .get_by_key(&dependency)
                .ok_or_else(|| ExecutorError::ActionsNotLoaded(vec![dependency.clone()]))?;
            rule.add_rely_on(&recipient, action)?;
        }

        log::info!("add params to [{}]", id);
        for (name, value) in task.params() {
            rule.set(name, value.clone())?;
        }

        log::info!("compile [{}] of rule {}", id, task.rule_key());
        rule.compile()?;

        log::info!("doing task [{}]", id);
        if let Err(error) = rule.run(&self.config.ctx) {
            let callback = task.callback().and_then(|cb| cb(&**rule).err());
            return Err(ExecutorError::RuleFailed { error, callback });
        }
        Ok(())
    }

    /// Hands the task to the worker pool. A rejected submission fails it.
    async fn submit(self: &Arc<Self>, task: Arc<Task>) -> Result<(), ExecutorError> {
        log::info!("add task {} to worker pool", task.id());
        let inner = Arc::clone(self);
        let job_task = Arc::clone(&task);
        let submitted = self
            .pool
            .submit(move || {
                let _ = inner.run_task(&job_task);
            })
            .await;
        if let Err(e) = submitted {
            let e = ExecutorError::from(e);
            task.failed(e.clone());
            self.finish(&task);
            return Err(e);
        }
        Ok(())
    }

    /// Registers the cron entry of a cycle task. Each tick looks the task up
    /// again, so removing the task ends the entry.
    fn schedule(self: &Arc<Self>, task: &Task) {
        if task.cron_entry().is_some() {
            log::warn!("task {} is already scheduled", task.id());
            return;
        }
        let schedule = match Schedule::parse(task.cron().unwrap_or_default()) {
            Ok(schedule) => schedule,
            Err(e) => {
                task.failed(e.into());
                return;
            }
        };

        let weak: Weak<Inner> = Arc::downgrade(self);
        let id = task.id().to_string();
        let job: self::cron::CronJob = Arc::new(move || {
            let weak = weak.clone();
            let id = id.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                let Some(task) = inner.get_task(&id) else {
                    log::info!("task {} was removed, stop its schedule", id);
                    return false;
                };
                inner.submit(task).await.is_ok()
            }
            .boxed()
        });

        match self.cron.add(schedule, job) {
            Ok(entry) => {
                log::info!("task {} scheduled as cron entry {}", task.id(), entry);
                task.set_cron_entry(entry);
            }
            Err(e) => task.failed(e.into()),
        }
    }
}

async fn dispatch_loop(inner: Arc<Inner>, generation: u64) {
    let mut changes = inner.generation.subscribe();
    loop {
        if !inner.is_current(generation) {
            log::warn!("executor stopped, dispatch loop {} exits", generation);
            break;
        }

        let id = tokio::select! {
            biased;
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            id = inner.execute_queue.pull() => id,
        };

        let Some(task) = inner.get_task(&id) else {
            log::warn!("task {} was removed before dispatch", id);
            continue;
        };
        log::info!("ready to execute task {}", id);
        match task.task_type() {
            TaskType::Once => {
                let _ = inner.submit(task).await;
            }
            TaskType::Cycle => inner.schedule(&task),
        }
    }
}
