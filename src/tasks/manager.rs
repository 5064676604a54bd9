//! Task store and DAG scheduler
//!
//! An identifier-indexed store with a reverse dependents index, cached
//! topological layering with priority tie-breaks, bounded-concurrency layer
//! execution, and memory accounting for retained results.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::Task;
use crate::agent::AgentResponse;
use crate::error::{Error, Result};

/// Execution statistics snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct TaskManagerStats {
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// UTF-8 byte length of all retained serialized results
    pub result_bytes: usize,
}

impl TaskManagerStats {
    pub fn memory_mb(&self) -> f64 {
        self.result_bytes as f64 / (1024.0 * 1024.0)
    }
}

struct Inner {
    tasks: HashMap<String, Task>,
    /// Insertion order of identifiers (may contain evicted ids)
    sequence: Vec<String>,
    /// Identifier -> insertion index, for stable tie-breaks
    seq_index: HashMap<String, usize>,
    /// Identifier -> identifiers depending on it
    dependents: HashMap<String, Vec<String>>,
    /// Tasks not yet done
    pending: usize,
    /// Cached layering; invalidated on add and reset
    plan: Option<Vec<Vec<String>>>,
    /// Completion order, oldest first
    completed_order: VecDeque<String>,
    result_bytes: usize,
    max_completed_tasks: usize,
    result_size_limit: usize,
}

/// In-memory task store with dependency tracking and layered execution
pub struct TaskManager {
    inner: Mutex<Inner>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    /// Create a manager with default memory limits
    pub fn new() -> Self {
        Self::with_limits(1000, 50 * 1024 * 1024)
    }

    /// Create a manager with explicit memory limits
    pub fn with_limits(max_completed_tasks: usize, result_size_limit: usize) -> Self {
        TaskManager {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                sequence: Vec::new(),
                seq_index: HashMap::new(),
                dependents: HashMap::new(),
                pending: 0,
                plan: None,
                completed_order: VecDeque::new(),
                result_bytes: 0,
                max_completed_tasks,
                result_size_limit,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-mutation; propagating the inner
        // state is still the best recovery for a task store.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a task; fails on a duplicate identifier and leaves the store
    /// unchanged.
    pub fn add_task(&self, task: Task) -> Result<()> {
        task.validate()?;

        let mut inner = self.lock();
        if inner.tasks.contains_key(&task.identifier) {
            return Err(Error::DuplicateTask(task.identifier));
        }

        let id = task.identifier.clone();
        let index = inner.sequence.len();
        inner.sequence.push(id.clone());
        inner.seq_index.insert(id.clone(), index);
        for dep in &task.dependencies {
            inner
                .dependents
                .entry(dep.clone())
                .or_default()
                .push(id.clone());
        }
        if task.done {
            inner.completed_order.push_back(id.clone());
        } else {
            inner.pending += 1;
        }
        inner.tasks.insert(id, task);
        inner.plan = None;
        Ok(())
    }

    /// O(1) lookup by identifier
    pub fn get_task(&self, identifier: &str) -> Result<Task> {
        self.lock()
            .tasks
            .get(identifier)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(identifier.to_string()))
    }

    /// All retained tasks in insertion order
    pub fn tasks(&self) -> Vec<Task> {
        let inner = self.lock();
        inner
            .sequence
            .iter()
            .filter_map(|id| inner.tasks.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    /// O(1): true once every task is done
    pub fn is_all_complete(&self) -> bool {
        self.lock().pending == 0
    }

    /// Check that every declared dependency refers to a known task
    pub fn validate_dependencies(&self) -> Result<()> {
        let inner = self.lock();
        for task in inner.tasks.values() {
            for dep in &task.dependencies {
                if !inner.tasks.contains_key(dep) {
                    return Err(Error::MissingDependency(dep.clone()));
                }
            }
        }
        Ok(())
    }

    /// Map of dependency identifier -> result for the given task
    ///
    /// Fails if any dependency is missing, not yet done, or completed with
    /// an error.
    pub fn get_dependency_results(&self, task: &Task) -> Result<HashMap<String, AgentResponse>> {
        let inner = self.lock();
        let mut results = HashMap::new();
        for dep in &task.dependencies {
            let dep_task = inner
                .tasks
                .get(dep)
                .ok_or_else(|| Error::DependencyNotFound(dep.clone()))?;
            if !dep_task.done {
                return Err(Error::DependencyIncomplete(dep.clone()));
            }
            if let Some(ref error) = dep_task.error {
                return Err(Error::DependencyFailed {
                    id: dep.clone(),
                    error: error.clone(),
                });
            }
            // A result evicted by the size cap reads as empty
            results.insert(dep.clone(), dep_task.result.clone().unwrap_or_default());
        }
        Ok(results)
    }

    /// Layered execution plan: within a layer, higher priority first, then
    /// insertion order. Cached until the store changes.
    pub fn prepare_execution_plan(&self) -> Result<Vec<Vec<Task>>> {
        self.validate_dependencies()?;

        let mut inner = self.lock();
        let layers = match inner.plan.clone() {
            Some(layers) => layers,
            None => {
                let layers = Self::layer(&inner)?;
                inner.plan = Some(layers.clone());
                layers
            }
        };

        Ok(layers
            .iter()
            .map(|layer| {
                layer
                    .iter()
                    .filter_map(|id| inner.tasks.get(id).cloned())
                    .collect()
            })
            .collect())
    }

    /// Kahn layering with cycle detection
    fn layer(inner: &Inner) -> Result<Vec<Vec<String>>> {
        let mut in_degree: HashMap<&str, usize> = inner
            .tasks
            .values()
            .map(|t| (t.identifier.as_str(), t.dependencies.len()))
            .collect();

        let mut ready: Vec<&str> = inner
            .sequence
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id).is_some_and(|d| *d == 0))
            .collect();

        let mut layers: Vec<Vec<String>> = Vec::new();
        let mut processed = 0usize;

        while !ready.is_empty() {
            ready.sort_by_key(|id| {
                let priority = inner.tasks.get(*id).map(|t| t.priority).unwrap_or(0);
                let index = inner.seq_index.get(*id).copied().unwrap_or(usize::MAX);
                (std::cmp::Reverse(priority), index)
            });

            let mut next_ready = Vec::new();
            for id in &ready {
                processed += 1;
                if let Some(dependents) = inner.dependents.get(*id) {
                    for dependent in dependents {
                        if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                            *degree -= 1;
                            if *degree == 0 {
                                next_ready.push(dependent.as_str());
                            }
                        }
                    }
                }
            }

            layers.push(ready.iter().map(|id| id.to_string()).collect());
            ready = next_ready;
        }

        if processed < inner.tasks.len() {
            let mut remaining: Vec<String> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            remaining.sort_by_key(|id| inner.seq_index.get(id).copied().unwrap_or(usize::MAX));
            return Err(Error::CircularDependency(remaining));
        }

        Ok(layers)
    }

    /// Execute every task layer by layer with up to `concurrency` tasks in
    /// flight per layer.
    ///
    /// The handler receives a task snapshot and its dependency results and
    /// returns the task's result; errors are written to the task. A task
    /// whose dependency lookup fails is marked done with that error and the
    /// handler is not invoked.
    pub async fn execute_all<H, Fut>(&self, handler: H, concurrency: usize) -> Result<()>
    where
        H: Fn(Task, HashMap<String, AgentResponse>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<AgentResponse>> + Send,
    {
        let plan = self.prepare_execution_plan()?;
        let gate = Arc::new(Semaphore::new(concurrency.max(1)));
        let handler = &handler;

        for layer in plan {
            let running = layer.into_iter().filter(|t| !t.done).map(|task| {
                let gate = gate.clone();
                async move {
                    let _permit = match gate.acquire().await {
                        Ok(permit) => permit,
                        // The gate is never closed while executing
                        Err(_) => return,
                    };
                    let id = task.identifier.clone();

                    let deps = match self.get_dependency_results(&task) {
                        Ok(deps) => deps,
                        Err(e) => {
                            debug!("Task '{}' blocked by dependency state: {}", id, e);
                            self.complete_with_error(&id, e.to_string());
                            return;
                        }
                    };

                    match handler(task, deps).await {
                        Ok(result) => self.complete_with_result(&id, result),
                        Err(e) => {
                            warn!("Task '{}' failed: {}", id, e);
                            self.complete_with_error(&id, e.to_string());
                        }
                    }
                }
            });
            futures::future::join_all(running).await;
        }

        Ok(())
    }

    /// Record a successful result and update memory accounting
    pub fn complete_with_result(&self, identifier: &str, result: AgentResponse) {
        let size = serde_json::to_vec(&result).map(|b| b.len()).unwrap_or(0);
        let mut inner = self.lock();
        let was_done = match inner.tasks.get_mut(identifier) {
            Some(task) => {
                let was_done = task.done;
                task.result = Some(result);
                task.error = None;
                task.done = true;
                was_done
            }
            None => return,
        };
        if !was_done {
            inner.pending = inner.pending.saturating_sub(1);
        }
        inner.result_bytes += size;
        inner.completed_order.push_back(identifier.to_string());
        Self::enforce_limits(&mut inner);
    }

    /// Record a failure
    pub fn complete_with_error(&self, identifier: &str, error: impl Into<String>) {
        let mut inner = self.lock();
        let was_done = match inner.tasks.get_mut(identifier) {
            Some(task) => {
                let was_done = task.done;
                task.error = Some(error.into());
                task.result = None;
                task.done = true;
                was_done
            }
            None => return,
        };
        if !was_done {
            inner.pending = inner.pending.saturating_sub(1);
        }
        inner.completed_order.push_back(identifier.to_string());
        Self::enforce_limits(&mut inner);
    }

    /// Apply the completed-task and result-size caps
    fn enforce_limits(inner: &mut Inner) {
        // Evict whole oldest completed tasks beyond the count cap
        while inner.completed_order.len() > inner.max_completed_tasks {
            if let Some(oldest) = inner.completed_order.pop_front() {
                if let Some(task) = inner.tasks.remove(&oldest) {
                    if let Some(result) = task.result {
                        let size = serde_json::to_vec(&result).map(|b| b.len()).unwrap_or(0);
                        inner.result_bytes = inner.result_bytes.saturating_sub(size);
                    }
                    debug!("Evicted completed task '{}' (count cap)", oldest);
                }
            }
        }

        // Drop oldest results beyond the byte cap; tasks stay as metadata
        if inner.result_bytes > inner.result_size_limit {
            let order: Vec<String> = inner.completed_order.iter().cloned().collect();
            for id in order {
                if inner.result_bytes <= inner.result_size_limit {
                    break;
                }
                if let Some(task) = inner.tasks.get_mut(&id) {
                    if let Some(result) = task.result.take() {
                        let size = serde_json::to_vec(&result).map(|b| b.len()).unwrap_or(0);
                        inner.result_bytes = inner.result_bytes.saturating_sub(size);
                        debug!("Dropped result of task '{}' (size cap)", id);
                    }
                }
            }
        }
    }

    /// Reset every task and the completion bookkeeping for re-execution
    pub fn reset(&self) {
        let mut inner = self.lock();
        for task in inner.tasks.values_mut() {
            task.reset();
        }
        inner.pending = inner.tasks.len();
        inner.completed_order.clear();
        inner.result_bytes = 0;
        inner.plan = None;
    }

    /// Execution statistics
    pub fn stats(&self) -> TaskManagerStats {
        let inner = self.lock();
        let failed = inner.tasks.values().filter(|t| t.error.is_some()).count();
        let completed = inner
            .tasks
            .values()
            .filter(|t| t.done && t.error.is_none())
            .count();
        TaskManagerStats {
            total_tasks: inner.tasks.len(),
            pending_tasks: inner.pending,
            completed_tasks: completed,
            failed_tasks: failed,
            result_bytes: inner.result_bytes,
        }
    }

    /// Textual dependency tree: roots first with children indented, then a
    /// trailing section for orphans (no dependencies and no dependents).
    pub fn visualize_dependencies(&self) -> String {
        let inner = self.lock();
        let mut lines = vec!["Task Dependency Graph:".to_string()];

        let label = |task: &Task| {
            if task.description.is_empty() {
                task.identifier.clone()
            } else {
                format!("{} ({})", task.description, task.identifier)
            }
        };

        fn render(
            inner: &Inner,
            label: &dyn Fn(&Task) -> String,
            lines: &mut Vec<String>,
            id: &str,
            prefix: &str,
            visited: &mut Vec<String>,
        ) {
            if visited.iter().any(|v| v == id) {
                return;
            }
            visited.push(id.to_string());

            let children: Vec<&String> = inner
                .dependents
                .get(id)
                .map(|deps| deps.iter().collect())
                .unwrap_or_default();
            let count = children.len();
            for (i, child) in children.into_iter().enumerate() {
                let Some(task) = inner.tasks.get(child) else {
                    continue;
                };
                let last = i + 1 == count;
                let connector = if last { "└─" } else { "├─" };
                lines.push(format!("{}{} {}", prefix, connector, label(task)));
                let child_prefix = format!("{}{}", prefix, if last { "   " } else { "│  " });
                render(inner, label, lines, child, &child_prefix, visited);
            }
            visited.pop();
        }

        let has_dependents =
            |id: &str| inner.dependents.get(id).is_some_and(|deps| !deps.is_empty());

        let mut orphans = Vec::new();
        for id in &inner.sequence {
            let Some(task) = inner.tasks.get(id) else {
                continue;
            };
            if !task.dependencies.is_empty() {
                continue;
            }
            if has_dependents(id) {
                lines.push(label(task));
                let mut visited = Vec::new();
                render(&inner, &label, &mut lines, id, "", &mut visited);
            } else {
                orphans.push(label(task));
            }
        }

        if !orphans.is_empty() {
            lines.push(String::new());
            lines.push("Orphaned tasks (no dependencies, no dependents):".to_string());
            for orphan in orphans {
                lines.push(format!("- {}", orphan));
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ok_handler(
        task: Task,
        _deps: HashMap<String, AgentResponse>,
    ) -> impl Future<Output = Result<AgentResponse>> {
        async move { Ok(AgentResponse::from_text(format!("r_{}", task.identifier))) }
    }

    fn chain() -> Vec<Task> {
        vec![
            Task::new("task1").with_description("First task").with_priority(1),
            Task::new("task2")
                .with_description("Second task")
                .with_dependencies(["task1"])
                .with_priority(2),
            Task::new("task3")
                .with_description("Third task")
                .with_dependencies(["task1", "task2"])
                .with_priority(1),
        ]
    }

    #[test]
    fn test_add_and_get_task() {
        let manager = TaskManager::new();
        manager
            .add_task(Task::new("test_task").with_description("Test task"))
            .unwrap();

        assert_eq!(manager.len(), 1);
        let task = manager.get_task("test_task").unwrap();
        assert_eq!(task.description, "Test task");
    }

    #[test]
    fn test_add_duplicate_leaves_store_unchanged() {
        let manager = TaskManager::new();
        manager
            .add_task(Task::new("test_task").with_description("Test task"))
            .unwrap();

        let err = manager
            .add_task(Task::new("test_task").with_description("Another task"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Duplicate task ID: test_task");

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get_task("test_task").unwrap().description, "Test task");
    }

    #[test]
    fn test_get_task_not_found() {
        let manager = TaskManager::new();
        let err = manager.get_task("non_existent").unwrap_err();
        assert_eq!(err.to_string(), "Task not found: non_existent");
    }

    #[test]
    fn test_get_dependency_results() {
        let manager = TaskManager::new();
        for task in chain() {
            manager.add_task(task).unwrap();
        }
        manager.complete_with_result("task1", AgentResponse::from_text("Result 1"));
        manager.complete_with_result("task2", AgentResponse::from_text("Result 2"));

        let task3 = manager.get_task("task3").unwrap();
        let results = manager.get_dependency_results(&task3).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results["task1"].response, "Result 1");
        assert_eq!(results["task2"].response, "Result 2");
    }

    #[test]
    fn test_get_dependency_results_incomplete() {
        let manager = TaskManager::new();
        for task in chain() {
            manager.add_task(task).unwrap();
        }
        manager.complete_with_result("task1", AgentResponse::from_text("Result 1"));

        let task3 = manager.get_task("task3").unwrap();
        let err = manager.get_dependency_results(&task3).unwrap_err();
        assert_eq!(err.to_string(), "Dependency task task2 not yet complete");
    }

    #[test]
    fn test_get_dependency_results_failed() {
        let manager = TaskManager::new();
        for task in chain() {
            manager.add_task(task).unwrap();
        }
        manager.complete_with_result("task1", AgentResponse::from_text("Result 1"));
        manager.complete_with_error("task2", "Task failed");

        let task3 = manager.get_task("task3").unwrap();
        let err = manager.get_dependency_results(&task3).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Dependency task task2 failed with error: Task failed"
        );
    }

    #[test]
    fn test_get_dependency_results_missing() {
        let manager = TaskManager::new();
        manager
            .add_task(
                Task::new("task1")
                    .with_description("Task with missing dependency")
                    .with_dependencies(["missing_dep"]),
            )
            .unwrap();

        let task = manager.get_task("task1").unwrap();
        let err = manager.get_dependency_results(&task).unwrap_err();
        assert_eq!(err.to_string(), "Dependency task missing_dep not found");
    }

    #[test]
    fn test_validate_dependencies() {
        let manager = TaskManager::new();
        for task in chain() {
            manager.add_task(task).unwrap();
        }
        manager.validate_dependencies().unwrap();

        let manager = TaskManager::new();
        manager
            .add_task(Task::new("task1").with_dependencies(["missing_dep"]))
            .unwrap();
        let err = manager.validate_dependencies().unwrap_err();
        assert_eq!(err.to_string(), "Missing dependency: missing_dep");
    }

    #[tokio::test]
    async fn test_is_all_complete() {
        let manager = TaskManager::new();
        for task in chain() {
            manager.add_task(task).unwrap();
        }
        assert!(!manager.is_all_complete());

        manager.execute_all(ok_handler, 4).await.unwrap();
        assert!(manager.is_all_complete());
    }

    #[test]
    fn test_layering_linear_chain() {
        let manager = TaskManager::new();
        manager.add_task(Task::new("task1")).unwrap();
        manager
            .add_task(Task::new("task2").with_dependencies(["task1"]))
            .unwrap();
        manager
            .add_task(Task::new("task3").with_dependencies(["task2"]))
            .unwrap();

        let plan = manager.prepare_execution_plan().unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0][0].identifier, "task1");
        assert_eq!(plan[1][0].identifier, "task2");
        assert_eq!(plan[2][0].identifier, "task3");
    }

    #[test]
    fn test_layering_parallel_fan_in() {
        let manager = TaskManager::new();
        manager.add_task(Task::new("task1")).unwrap();
        manager.add_task(Task::new("task2")).unwrap();
        manager
            .add_task(Task::new("task3").with_dependencies(["task1", "task2"]))
            .unwrap();

        let plan = manager.prepare_execution_plan().unwrap();
        assert_eq!(plan.len(), 2);
        let layer0: Vec<&str> = plan[0].iter().map(|t| t.identifier.as_str()).collect();
        assert!(layer0.contains(&"task1") && layer0.contains(&"task2"));
        assert_eq!(plan[1][0].identifier, "task3");
    }

    #[test]
    fn test_layering_priority_tie_break() {
        let manager = TaskManager::new();
        manager.add_task(Task::new("task1").with_priority(1)).unwrap();
        manager.add_task(Task::new("task2").with_priority(2)).unwrap();
        manager
            .add_task(
                Task::new("task3")
                    .with_dependencies(["task1", "task2"])
                    .with_priority(1),
            )
            .unwrap();

        let plan = manager.prepare_execution_plan().unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0][0].identifier, "task2");
        assert_eq!(plan[0][1].identifier, "task1");
        assert_eq!(plan[1][0].identifier, "task3");
    }

    #[test]
    fn test_layering_equal_priority_keeps_insertion_order() {
        let manager = TaskManager::new();
        manager.add_task(Task::new("b_second")).unwrap();
        manager.add_task(Task::new("a_first")).unwrap();

        let plan = manager.prepare_execution_plan().unwrap();
        assert_eq!(plan[0][0].identifier, "b_second");
        assert_eq!(plan[0][1].identifier, "a_first");
    }

    #[test]
    fn test_circular_dependency_detected() {
        let manager = TaskManager::new();
        manager
            .add_task(Task::new("task1").with_dependencies(["task3"]))
            .unwrap();
        manager
            .add_task(Task::new("task2").with_dependencies(["task1"]))
            .unwrap();
        manager
            .add_task(Task::new("task3").with_dependencies(["task2"]))
            .unwrap();

        let err = manager.prepare_execution_plan().unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Circular dependency detected"));
        assert!(message.contains("task1"));
    }

    #[test]
    fn test_plan_is_cached_and_stable() {
        let manager = TaskManager::new();
        for task in chain() {
            manager.add_task(task).unwrap();
        }

        let first = manager.prepare_execution_plan().unwrap();
        let second = manager.prepare_execution_plan().unwrap();
        let ids =
            |plan: &Vec<Vec<Task>>| -> Vec<Vec<String>> {
                plan.iter()
                    .map(|l| l.iter().map(|t| t.identifier.clone()).collect())
                    .collect()
            };
        assert_eq!(ids(&first), ids(&second));

        // Adding a task invalidates the cache
        manager.add_task(Task::new("task4")).unwrap();
        let third = manager.prepare_execution_plan().unwrap();
        let all: Vec<String> = ids(&third).into_iter().flatten().collect();
        assert!(all.contains(&"task4".to_string()));
    }

    #[tokio::test]
    async fn test_execute_all_linear_chain() {
        let manager = TaskManager::new();
        manager.add_task(Task::new("A")).unwrap();
        manager
            .add_task(Task::new("B").with_dependencies(["A"]))
            .unwrap();
        manager
            .add_task(Task::new("C").with_dependencies(["A", "B"]))
            .unwrap();

        let seen: Arc<Mutex<HashMap<String, Vec<String>>>> = Arc::new(Mutex::new(HashMap::new()));
        let seen_in_handler = seen.clone();

        manager
            .execute_all(
                move |task: Task, deps: HashMap<String, AgentResponse>| {
                    let seen = seen_in_handler.clone();
                    async move {
                        let mut dep_ids: Vec<String> = deps.keys().cloned().collect();
                        dep_ids.sort();
                        seen.lock().unwrap().insert(task.identifier.clone(), dep_ids);
                        Ok(AgentResponse::from_text(format!("r_{}", task.identifier)))
                    }
                },
                4,
            )
            .await
            .unwrap();

        for id in ["A", "B", "C"] {
            let task = manager.get_task(id).unwrap();
            assert!(task.done);
            assert!(task.error.is_none());
            assert_eq!(task.result.unwrap().response, format!("r_{}", id));
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen["C"], vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_all_failure_propagates_to_dependents() {
        let manager = TaskManager::new();
        manager.add_task(Task::new("task1")).unwrap();
        manager
            .add_task(Task::new("task2").with_dependencies(["task1"]))
            .unwrap();

        manager
            .execute_all(
                |task: Task, _deps| async move {
                    if task.identifier == "task1" {
                        Err(Error::Execution("Task failed".into()))
                    } else {
                        Ok(AgentResponse::from_text("Success"))
                    }
                },
                4,
            )
            .await
            .unwrap();

        let task1 = manager.get_task("task1").unwrap();
        assert!(task1.done);
        assert!(task1.result.is_none());
        assert!(task1.error.unwrap().contains("Task failed"));

        let task2 = manager.get_task("task2").unwrap();
        assert!(task2.done);
        assert!(task2.result.is_none());
        assert!(task2
            .error
            .unwrap()
            .contains("Dependency task task1 failed with error"));

        assert!(manager.is_all_complete());
    }

    #[tokio::test]
    async fn test_execute_all_respects_concurrency_limit() {
        let manager = TaskManager::new();
        for i in 0..5 {
            manager.add_task(Task::new(format!("task{i}"))).unwrap();
        }

        let executions = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (executions_h, current_h, peak_h) = (executions.clone(), current.clone(), peak.clone());
        manager
            .execute_all(
                move |_task: Task, _deps| {
                    let (executions, current, peak) =
                        (executions_h.clone(), current_h.clone(), peak_h.clone());
                    async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok(AgentResponse::from_text("ok"))
                    }
                },
                2,
            )
            .await
            .unwrap();

        assert_eq!(executions.load(Ordering::SeqCst), 5);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fan_in_starts_after_both_parents() {
        let manager = TaskManager::new();
        manager.add_task(Task::new("A")).unwrap();
        manager.add_task(Task::new("B")).unwrap();
        manager
            .add_task(Task::new("C").with_dependencies(["A", "B"]))
            .unwrap();

        manager.execute_all(ok_handler, 2).await.unwrap();

        let c = manager.get_task("C").unwrap();
        assert!(c.done && c.error.is_none());
        // C observed both results, which requires A and B to be done first
        let deps = manager
            .get_dependency_results(&Task::new("probe").with_dependencies(["A", "B"]))
            .unwrap();
        assert_eq!(deps.len(), 2);
    }

    #[tokio::test]
    async fn test_completed_task_cap_evicts_oldest() {
        let manager = TaskManager::with_limits(2, 50 * 1024 * 1024);
        for i in 0..4 {
            manager.add_task(Task::new(format!("task{i}"))).unwrap();
        }

        manager.execute_all(ok_handler, 1).await.unwrap();

        let stats = manager.stats();
        assert!(stats.total_tasks <= 2, "retained {} tasks", stats.total_tasks);
        assert_eq!(stats.pending_tasks, 0);
    }

    #[tokio::test]
    async fn test_result_size_cap_drops_results_keeps_tasks() {
        let manager = TaskManager::with_limits(1000, 64);
        manager.add_task(Task::new("big1")).unwrap();
        manager.add_task(Task::new("big2")).unwrap();

        manager
            .execute_all(
                |_task: Task, _deps| async move { Ok(AgentResponse::from_text("x".repeat(200))) },
                1,
            )
            .await
            .unwrap();

        let stats = manager.stats();
        assert_eq!(stats.total_tasks, 2);
        assert!(stats.result_bytes <= 64 || manager.get_task("big1").unwrap().result.is_none());
        // The oldest completed task lost its result first, but stayed done
        let big1 = manager.get_task("big1").unwrap();
        assert!(big1.done);
        assert!(big1.error.is_none());
    }

    #[tokio::test]
    async fn test_reset_allows_reexecution() {
        let manager = TaskManager::new();
        manager.add_task(Task::new("task1")).unwrap();
        manager.execute_all(ok_handler, 1).await.unwrap();
        assert!(manager.is_all_complete());

        manager.reset();
        assert!(!manager.is_all_complete());
        let task = manager.get_task("task1").unwrap();
        assert!(!task.done);
        assert!(task.result.is_none());

        manager.execute_all(ok_handler, 1).await.unwrap();
        assert!(manager.is_all_complete());
    }

    #[test]
    fn test_visualize_dependencies() {
        let manager = TaskManager::new();
        for task in chain() {
            manager.add_task(task).unwrap();
        }

        let viz = manager.visualize_dependencies();
        assert!(viz.contains("Task Dependency Graph:"));
        assert!(viz.contains("First task (task1)"));
        assert!(viz.contains("Second task (task2)"));
        assert!(viz.contains("Third task (task3)"));
        assert!(viz.contains("└─") || viz.contains("├─"));
    }

    #[test]
    fn test_visualize_dependencies_with_orphans() {
        let manager = TaskManager::new();
        manager.add_task(Task::new("task1")).unwrap();
        manager
            .add_task(Task::new("task2").with_dependencies(["task1"]))
            .unwrap();
        manager.add_task(Task::new("task3")).unwrap();

        let viz = manager.visualize_dependencies();
        assert!(viz.contains("task1"));
        assert!(viz.contains("task2"));
        assert!(viz.contains("task3"));
        assert!(viz.to_lowercase().contains("orphan"));
    }

    #[test]
    fn test_stats() {
        let manager = TaskManager::new();
        for task in chain() {
            manager.add_task(task).unwrap();
        }

        let stats = manager.stats();
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.pending_tasks, 3);
        assert_eq!(stats.completed_tasks, 0);

        manager.complete_with_result("task1", AgentResponse::from_text("done"));
        manager.complete_with_error("task2", "broken");

        let stats = manager.stats();
        assert_eq!(stats.pending_tasks, 1);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.failed_tasks, 1);
        assert!(stats.result_bytes > 0);
    }
}
