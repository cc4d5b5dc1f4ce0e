//! Interval task scheduling
//!
//! A small scheduler for the engine's periodic work (the due-step sweeper,
//! and anything the embedding application wants to hang off it). Tasks are
//! trait-based and registered with a fluent builder:
//!
//! ```rust,ignore
//! let mut schedule = Schedule::new();
//! schedule.add(
//!     schedule.task(engine.sweeper())
//!         .every_minutes(5)
//!         .name("automation:sweep"),
//! );
//! schedule.work_loop(Duration::from_secs(1)).await;
//! ```

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::error::EngineError;

/// Type alias for task results
pub type TaskResult = Result<(), EngineError>;

/// A periodic task
#[async_trait]
pub trait Task: Send + Sync {
    async fn handle(&self) -> TaskResult;
}

/// A registered task with its interval and bookkeeping
pub struct TaskEntry {
    /// Unique name for the task
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// How often the task should run
    pub every: Duration,
    task: Arc<dyn Task>,
    last_run: Mutex<Option<Instant>>,
}

impl TaskEntry {
    /// Check if this task is due to run now
    ///
    /// A task that has never run is due immediately.
    pub fn is_due(&self) -> bool {
        match *self.last_run.lock().expect("task clock poisoned") {
            None => true,
            Some(last) => last.elapsed() >= self.every,
        }
    }

    /// Run the task and stamp its clock
    pub async fn run(&self) -> TaskResult {
        *self.last_run.lock().expect("task clock poisoned") = Some(Instant::now());
        self.task.handle().await
    }
}

/// Fluent builder for task registration
pub struct TaskBuilder {
    name: Option<String>,
    description: Option<String>,
    every: Duration,
    task: Arc<dyn Task>,
}

impl TaskBuilder {
    fn new(task: Arc<dyn Task>) -> Self {
        Self {
            name: None,
            description: None,
            every: Duration::from_secs(60),
            task,
        }
    }

    pub fn every_seconds(mut self, seconds: u64) -> Self {
        self.every = Duration::from_secs(seconds.max(1));
        self
    }

    pub fn every_minutes(self, minutes: u64) -> Self {
        self.every_seconds(minutes * 60)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn build(self, index: usize) -> TaskEntry {
        TaskEntry {
            name: self.name.unwrap_or_else(|| format!("task-{}", index)),
            description: self.description,
            every: self.every,
            task: self.task,
            last_run: Mutex::new(None),
        }
    }
}

/// Schedule - registry and runner for periodic tasks
pub struct Schedule {
    tasks: Vec<TaskEntry>,
}

impl Schedule {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Start configuring a task
    pub fn task(&self, task: Arc<dyn Task>) -> TaskBuilder {
        TaskBuilder::new(task)
    }

    /// Add a configured task builder to the schedule
    pub fn add(&mut self, builder: TaskBuilder) -> &mut Self {
        let index = self.tasks.len();
        self.tasks.push(builder.build(index));
        self
    }

    pub fn tasks(&self) -> &[TaskEntry] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Find a task by name
    pub fn find(&self, name: &str) -> Option<&TaskEntry> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Run all due tasks once, returning each task's result
    pub async fn run_due_tasks(&self) -> Vec<(&str, TaskResult)> {
        let mut results = Vec::new();
        for task in self.tasks.iter().filter(|t| t.is_due()) {
            results.push((task.name.as_str(), task.run().await));
        }
        results
    }

    /// Run every task regardless of schedule; useful for manual triggering
    pub async fn run_all_tasks(&self) -> Vec<(&str, TaskResult)> {
        let mut results = Vec::new();
        for task in &self.tasks {
            results.push((task.name.as_str(), task.run().await));
        }
        results
    }

    /// Run a specific task by name
    pub async fn run_task(&self, name: &str) -> Option<TaskResult> {
        match self.find(name) {
            Some(task) => Some(task.run().await),
            None => None,
        }
    }

    /// Run due tasks on every tick; never returns
    pub async fn work_loop(&self, tick: Duration) {
        info!(tasks = self.len(), "schedule worker started");
        loop {
            for (name, result) in self.run_due_tasks().await {
                if let Err(err) = result {
                    error!(task = name, error = %err, "scheduled task failed");
                }
            }
            tokio::time::sleep(tick).await;
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTask {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Task for CountingTask {
        async fn handle(&self) -> TaskResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting() -> Arc<CountingTask> {
        Arc::new(CountingTask {
            runs: AtomicUsize::new(0),
        })
    }

    #[test]
    fn new_schedule_is_empty() {
        let schedule = Schedule::new();
        assert!(schedule.is_empty());
        assert_eq!(schedule.len(), 0);
    }

    #[tokio::test]
    async fn tasks_are_due_once_per_interval() {
        let mut schedule = Schedule::new();
        let task = counting();
        schedule.add(
            schedule
                .task(task.clone())
                .every_minutes(5)
                .name("sweep"),
        );

        // never run: due immediately
        let results = schedule.run_due_tasks().await;
        assert_eq!(results.len(), 1);
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);

        // freshly run: not due again yet
        let results = schedule.run_due_tasks().await;
        assert!(results.is_empty());
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_task_by_name() {
        let mut schedule = Schedule::new();
        let task = counting();
        schedule.add(schedule.task(task.clone()).every_minutes(5).name("found"));

        assert!(schedule.run_task("found").await.unwrap().is_ok());
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
        assert!(schedule.run_task("missing").await.is_none());
    }

    #[tokio::test]
    async fn run_all_ignores_due_times() {
        let mut schedule = Schedule::new();
        let task = counting();
        schedule.add(schedule.task(task.clone()).every_minutes(5).name("a"));
        schedule.add(schedule.task(task.clone()).every_minutes(5).name("b"));

        schedule.run_all_tasks().await;
        schedule.run_all_tasks().await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 4);
    }
}
