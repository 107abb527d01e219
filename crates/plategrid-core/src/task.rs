//! Units of plate work.
//!
//! A plate's todo list mixes device commands and timed waits. Both kinds
//! share an id and a completion flag; the scheduler dispatches on the
//! variant.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::new_id;

/// A command executed by a device of a given type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateTask {
    #[serde(default = "new_id")]
    pub id: String,
    /// Product name of the device type that runs this task.
    pub device_type: String,
    pub command: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub completed: bool,
}

impl PlateTask {
    pub fn new(device_type: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            device_type: device_type.into(),
            command: command.into(),
            parameters: BTreeMap::new(),
            completed: false,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// A pure time delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitTask {
    #[serde(default = "new_id")]
    pub id: String,
    pub duration_seconds: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub completed: bool,
}

impl WaitTask {
    pub fn new(duration_seconds: f64, description: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            duration_seconds,
            description: description.into(),
            completed: false,
        }
    }

    /// The wait as a `Duration`. Negative or non-finite values wait zero.
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_seconds).unwrap_or(Duration::ZERO)
    }
}

/// One entry of a plate's todo list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    Plate(PlateTask),
    Wait(WaitTask),
}

impl Task {
    pub fn id(&self) -> &str {
        match self {
            Task::Plate(t) => &t.id,
            Task::Wait(t) => &t.id,
        }
    }

    pub fn is_completed(&self) -> bool {
        match self {
            Task::Plate(t) => t.completed,
            Task::Wait(t) => t.completed,
        }
    }

    pub fn mark_completed(&mut self) {
        match self {
            Task::Plate(t) => t.completed = true,
            Task::Wait(t) => t.completed = true,
        }
    }

    /// Device type required by the task; waits need none.
    pub fn device_type(&self) -> Option<&str> {
        match self {
            Task::Plate(t) => Some(&t.device_type),
            Task::Wait(_) => None,
        }
    }

    /// Short description for logs and status output.
    pub fn describe(&self) -> String {
        match self {
            Task::Plate(t) => format!("{}:{}", t.device_type, t.command),
            Task::Wait(t) if t.description.is_empty() => format!("wait {}s", t.duration_seconds),
            Task::Wait(t) => format!("wait {}s ({})", t.duration_seconds, t.description),
        }
    }
}

impl From<PlateTask> for Task {
    fn from(task: PlateTask) -> Self {
        Task::Plate(task)
    }
}

impl From<WaitTask> for Task {
    fn from(task: WaitTask) -> Self {
        Task::Wait(task)
    }
}
