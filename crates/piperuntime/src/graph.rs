use pipecore::Stage;
use std::collections::HashMap;
use std::sync::Arc;

/// Stages of one task in declaration order.
#[derive(Default)]
pub struct TaskStages {
    order: Vec<String>,
    stages: HashMap<String, Arc<Stage>>,
}

impl TaskStages {
    pub(crate) fn push(&mut self, stage: Stage) {
        let key = stage.key().to_string();
        self.order.push(key.clone());
        self.stages.insert(key, Arc::new(stage));
    }

    pub fn get(&self, key: &str) -> Option<&Arc<Stage>> {
        self.stages.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Stage>> {
        self.order.iter().filter_map(|key| self.stages.get(key))
    }

    pub fn start_stages(&self) -> impl Iterator<Item = &Arc<Stage>> {
        self.iter().filter(|stage| stage.is_start())
    }

    pub fn last_key(&self) -> Option<&str> {
        self.order.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Immutable map of task name to its stages. Built once per worker and
/// shared read-only afterwards.
#[derive(Default)]
pub struct TaskGraph {
    order: Vec<String>,
    tasks: HashMap<String, TaskStages>,
}

impl TaskGraph {
    pub(crate) fn insert(&mut self, task: String, stages: TaskStages) {
        if !self.tasks.contains_key(&task) {
            self.order.push(task.clone());
        }
        self.tasks.insert(task, stages);
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn contains_task(&self, task: &str) -> bool {
        self.tasks.contains_key(task)
    }

    pub fn task(&self, task: &str) -> Option<&TaskStages> {
        self.tasks.get(task)
    }

    pub fn stage(&self, task: &str, key: &str) -> Option<&Arc<Stage>> {
        self.tasks.get(task).and_then(|stages| stages.get(key))
    }

    /// Whether `key` is the last declared stage of `task`.
    pub fn is_last(&self, task: &str, key: &str) -> bool {
        self.tasks
            .get(task)
            .and_then(TaskStages::last_key)
            .map(|last| last == key)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
