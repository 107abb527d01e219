//! Worklists: batches of plates to process and move.
//!
//! A `Worklist` names a set of source and destination plates, an optional
//! `TransferOverview` describing which source feeds which destination, and
//! the tasks each role runs before and after the hitpick. Plates with a
//! bespoke task sequence ride along as workflow plates.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ids::new_id;
use crate::plate::Plate;
use crate::task::Task;

/// Callback fired once when every plate of a worklist has finished.
pub type CompletionCallback = Box<dyn FnOnce(&Worklist) + Send>;

/// One liquid transfer from a source plate to a destination plate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub source_plate: Plate,
    pub destination_plate: Plate,
    #[serde(default)]
    pub source_well: Option<String>,
    #[serde(default)]
    pub destination_well: Option<String>,
    #[serde(default)]
    pub volume: Option<f64>,
}

impl Transfer {
    pub fn new(source_plate: Plate, destination_plate: Plate) -> Self {
        Self {
            source_plate,
            destination_plate,
            source_well: None,
            destination_well: None,
            volume: None,
        }
    }

    pub fn with_wells(mut self, source_well: impl Into<String>, destination_well: impl Into<String>) -> Self {
        self.source_well = Some(source_well.into());
        self.destination_well = Some(destination_well.into());
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }
}

/// Tasks run by each plate role around the hitpick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferTasks {
    #[serde(default)]
    pub source_prehitpick_tasks: Vec<Task>,
    #[serde(default)]
    pub source_posthitpick_tasks: Vec<Task>,
    #[serde(default)]
    pub destination_prehitpick_tasks: Vec<Task>,
    #[serde(default)]
    pub destination_posthitpick_tasks: Vec<Task>,
}

impl TransferTasks {
    /// Full source todo list: pre-hitpick, `hitpick`, post-hitpick.
    pub fn source_todo_list(&self, hitpick: Task) -> Vec<Task> {
        join_phases(&self.source_prehitpick_tasks, hitpick, &self.source_posthitpick_tasks)
    }

    /// Full destination todo list: pre-hitpick, `hitpick`, post-hitpick.
    pub fn destination_todo_list(&self, hitpick: Task) -> Vec<Task> {
        join_phases(
            &self.destination_prehitpick_tasks,
            hitpick,
            &self.destination_posthitpick_tasks,
        )
    }
}

fn join_phases(pre: &[Task], hitpick: Task, post: &[Task]) -> Vec<Task> {
    let mut tasks = Vec::with_capacity(pre.len() + post.len() + 1);
    tasks.extend_from_slice(pre);
    tasks.push(hitpick);
    tasks.extend_from_slice(post);
    tasks
}

/// All transfers of a worklist plus the per-phase tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferOverview {
    #[serde(default)]
    pub transfers: Vec<Transfer>,
    #[serde(default)]
    pub tasks: TransferTasks,
    /// Unique source plates keyed by barcode.
    #[serde(default)]
    pub source_plates: BTreeMap<String, Plate>,
    /// Unique destination plates keyed by barcode.
    #[serde(default)]
    pub destination_plates: BTreeMap<String, Plate>,
}

impl TransferOverview {
    /// Build an overview whose plate maps are derived from the transfers.
    pub fn from_transfers(transfers: Vec<Transfer>, tasks: TransferTasks) -> Self {
        let mut overview = Self {
            transfers,
            tasks,
            ..Self::default()
        };
        for t in &overview.transfers {
            overview
                .source_plates
                .entry(t.source_plate.barcode.clone())
                .or_insert_with(|| t.source_plate.clone());
            overview
                .destination_plates
                .entry(t.destination_plate.barcode.clone())
                .or_insert_with(|| t.destination_plate.clone());
        }
        overview
    }

    /// Source plates with distinct barcodes, in order of first appearance.
    pub fn unique_source_plates(&self) -> Vec<Plate> {
        unique_plates(
            self.transfers.iter().map(|t| &t.source_plate),
            self.source_plates.values(),
        )
    }

    /// Destination plates with distinct barcodes, in order of first appearance.
    pub fn unique_destination_plates(&self) -> Vec<Plate> {
        unique_plates(
            self.transfers.iter().map(|t| &t.destination_plate),
            self.destination_plates.values(),
        )
    }
}

/// Distinct-by-barcode plates: transfer order first, then map-only entries.
fn unique_plates<'a>(
    from_transfers: impl Iterator<Item = &'a Plate>,
    from_map: impl Iterator<Item = &'a Plate>,
) -> Vec<Plate> {
    let mut seen = HashSet::new();
    from_transfers
        .chain(from_map)
        .filter(|p| seen.insert(p.barcode.clone()))
        .cloned()
        .collect()
}

/// A plate that runs an explicit task list instead of the transfer phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPlate {
    pub plate: Plate,
    pub tasks: Vec<Task>,
}

/// A named batch of plates.
pub struct Worklist {
    id: String,
    name: String,
    pub source_plates: Vec<Plate>,
    pub destination_plates: Vec<Plate>,
    pub transfer_overview: Option<TransferOverview>,
    pub workflow_plates: Vec<WorkflowPlate>,
    callbacks: Mutex<Vec<CompletionCallback>>,
    completed: AtomicBool,
}

impl Worklist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            source_plates: Vec::new(),
            destination_plates: Vec::new(),
            transfer_overview: None,
            workflow_plates: Vec::new(),
            callbacks: Mutex::new(Vec::new()),
            completed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_source_plate(&mut self, plate: Plate) {
        self.source_plates.push(plate);
    }

    pub fn add_destination_plate(&mut self, plate: Plate) {
        self.destination_plates.push(plate);
    }

    pub fn add_workflow_plate(&mut self, plate: Plate, tasks: Vec<Task>) {
        self.workflow_plates.push(WorkflowPlate { plate, tasks });
    }

    pub fn set_transfer_overview(&mut self, overview: TransferOverview) {
        self.transfer_overview = Some(overview);
    }

    /// Register a callback fired when the worklist completes.
    pub fn add_completion_callback(&self, callback: impl FnOnce(&Worklist) + Send + 'static) {
        self.callbacks
            .lock()
            .expect("worklist callbacks mutex poisoned")
            .push(Box::new(callback));
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Mark the worklist complete and fire every registered callback.
    ///
    /// Only the first call fires; later calls return `false`.
    pub fn on_worklist_complete(&self) -> bool {
        if self.completed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let callbacks: Vec<CompletionCallback> = self
            .callbacks
            .lock()
            .expect("worklist callbacks mutex poisoned")
            .drain(..)
            .collect();
        info!(worklist = %self.name, callbacks = callbacks.len(), "worklist complete");
        for callback in callbacks {
            callback(self);
        }
        true
    }
}

impl fmt::Debug for Worklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worklist")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("source_plates", &self.source_plates.len())
            .field("destination_plates", &self.destination_plates.len())
            .field("workflow_plates", &self.workflow_plates.len())
            .field("has_transfer_overview", &self.transfer_overview.is_some())
            .field("completed", &self.is_complete())
            .finish()
    }
}

impl fmt::Display for Worklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Worklist({}, {} sources, {} destinations)",
            self.name,
            self.source_plates.len(),
            self.destination_plates.len()
        )
    }
}

/// Build a worklist whose plate lists come from the overview's unique plates.
pub fn create_worklist_from_transfer_overview(
    name: impl Into<String>,
    overview: TransferOverview,
) -> Worklist {
    let mut worklist = Worklist::new(name);
    worklist.source_plates = overview.unique_source_plates();
    worklist.destination_plates = overview.unique_destination_plates();
    worklist.transfer_overview = Some(overview);
    worklist
}
