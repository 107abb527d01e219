//! The active plate state machine.
//!
//! An `ActivePlate` is the scheduler's runtime handle for a plate moving
//! through a worklist. The plate scheduler and the robot scheduler touch it
//! from different tasks, so every field is safe for concurrent access:
//!
//! - a `free` flag (set = not busy)
//! - current and destination locations behind one mutex
//! - the todo list, its cursor, and `still_have_todos` behind another
//!
//! Lifecycle: created → (busy → task runs → free → cursor advances)* →
//! finished. `is_finished()` holds iff the plate is not busy and the cursor
//! has passed the end of its todo list; there is no way back.

use std::fmt;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::plate::{Plate, PlateLocation};
use crate::task::Task;

/// Which side of a worklist a plate plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlateRole {
    Source,
    Destination,
    /// A plate with an explicit task list.
    Workflow,
}

impl PlateRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlateRole::Source => "source",
            PlateRole::Destination => "destination",
            PlateRole::Workflow => "workflow",
        }
    }
}

impl fmt::Display for PlateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct Locations {
    current: Option<Arc<PlateLocation>>,
    destination: Option<Arc<PlateLocation>>,
}

struct TodoList {
    tasks: Vec<Task>,
    cursor: usize,
    still_have_todos: bool,
}

/// Runtime wrapper around a `Plate` with a cursor over its tasks.
pub struct ActivePlate {
    serial: u64,
    instance_index: usize,
    role: PlateRole,
    plate: Option<Plate>,
    free: AtomicBool,
    locations: Mutex<Locations>,
    todo: Mutex<TodoList>,
}

impl ActivePlate {
    /// Create a free plate positioned on the first of `tasks`.
    pub fn new(
        serial: u64,
        instance_index: usize,
        role: PlateRole,
        plate: Option<Plate>,
        tasks: Vec<Task>,
    ) -> Self {
        let still_have_todos = !tasks.is_empty();
        Self {
            serial,
            instance_index,
            role,
            plate,
            free: AtomicBool::new(true),
            locations: Mutex::new(Locations::default()),
            todo: Mutex::new(TodoList {
                tasks,
                cursor: 0,
                still_have_todos,
            }),
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn instance_index(&self) -> usize {
        self.instance_index
    }

    pub fn role(&self) -> PlateRole {
        self.role
    }

    pub fn plate(&self) -> Option<&Plate> {
        self.plate.as_ref()
    }

    pub fn barcode(&self) -> &str {
        self.plate.as_ref().map_or("", |p| p.barcode.as_str())
    }

    pub fn labware_name(&self) -> &str {
        self.plate.as_ref().map_or("", |p| p.labware_name.as_str())
    }

    // ── Busy / free ─────────────────────────────────────────────────

    pub fn is_busy(&self) -> bool {
        !self.free.load(Ordering::SeqCst)
    }

    pub fn mark_busy(&self) {
        self.free.store(false, Ordering::SeqCst);
    }

    pub fn mark_free(&self) {
        self.free.store(true, Ordering::SeqCst);
    }

    // ── Locations ───────────────────────────────────────────────────

    pub fn current_location(&self) -> Option<Arc<PlateLocation>> {
        self.lock_locations().current.clone()
    }

    pub fn destination_location(&self) -> Option<Arc<PlateLocation>> {
        self.lock_locations().destination.clone()
    }

    pub fn set_current_location(&self, location: Option<Arc<PlateLocation>>) {
        self.lock_locations().current = location;
    }

    pub fn set_destination_location(&self, location: Option<Arc<PlateLocation>>) {
        self.lock_locations().destination = location;
    }

    /// Set current and destination together (sourcing a plate in place).
    pub fn set_locations(&self, location: Arc<PlateLocation>) {
        let mut locations = self.lock_locations();
        locations.current = Some(Arc::clone(&location));
        locations.destination = Some(location);
    }

    /// Whether the plate currently sits at `location`.
    pub fn is_at(&self, location: &Arc<PlateLocation>) -> bool {
        self.lock_locations()
            .current
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, location))
    }

    // ── Todo list ───────────────────────────────────────────────────

    /// The task under the cursor, if any remain.
    pub fn current_todo(&self) -> Option<Task> {
        let todo = self.lock_todo();
        if todo.still_have_todos {
            todo.tasks.get(todo.cursor).cloned()
        } else {
            None
        }
    }

    pub fn current_task_id(&self) -> Option<String> {
        let todo = self.lock_todo();
        if todo.still_have_todos {
            todo.tasks.get(todo.cursor).map(|t| t.id().to_string())
        } else {
            None
        }
    }

    pub fn advance_current_todo(&self) {
        let mut todo = self.lock_todo();
        Self::advance(&mut todo);
    }

    fn advance(todo: &mut TodoList) {
        todo.cursor += 1;
        todo.still_have_todos = todo.cursor < todo.tasks.len();
    }

    pub fn still_have_todos(&self) -> bool {
        self.lock_todo().still_have_todos
    }

    pub fn task_count(&self) -> usize {
        self.lock_todo().tasks.len()
    }

    pub fn completed_task_count(&self) -> usize {
        self.lock_todo().tasks.iter().filter(|t| t.is_completed()).count()
    }

    pub fn is_finished(&self) -> bool {
        !self.is_busy() && !self.still_have_todos()
    }

    /// The current job finished: complete the task, advance the cursor,
    /// clear the destination reservation, arrive, and become free.
    pub fn mark_job_completed(&self) {
        {
            let mut todo = self.lock_todo();
            let cursor = todo.cursor;
            if let Some(task) = todo.tasks.get_mut(cursor) {
                task.mark_completed();
            }
            Self::advance(&mut todo);
        }
        {
            let mut locations = self.lock_locations();
            if let Some(destination) = &locations.destination {
                destination.release();
            }
            locations.current = locations.destination.clone();
        }
        debug!(plate = %self, barcode = %self.barcode(), "job completed");
        self.mark_free();
    }

    /// The current job could not run: drop the destination reservation,
    /// stay where the plate is, and become free without advancing.
    pub fn abandon_job(&self) {
        {
            let mut locations = self.lock_locations();
            if let Some(destination) = &locations.destination {
                destination.release();
            }
            locations.destination = locations.current.clone();
        }
        debug!(plate = %self, barcode = %self.barcode(), "job abandoned");
        self.mark_free();
    }

    /// Multi-line diagnostic block.
    pub fn status(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Info for {} plate S/N: {}", self.role, self.serial);
        let _ = writeln!(out, "\tInstanceIndex: {}", self.instance_index);
        let _ = writeln!(out, "\tBarcode: {}", self.barcode());
        let _ = writeln!(out, "\tLabware: {}", self.labware_name());
        let _ = writeln!(out, "\tBusy: {}", self.is_busy());
        {
            let locations = self.lock_locations();
            if let Some(current) = &locations.current {
                let _ = writeln!(out, "\tCurrent location: {}", current.name());
            }
            if let Some(destination) = &locations.destination {
                let _ = writeln!(out, "\tDestination location: {}", destination.name());
            }
        }
        let todo = self.lock_todo();
        let _ = writeln!(out, "\tToDoList:");
        for (i, task) in todo.tasks.iter().enumerate() {
            let marker = if todo.still_have_todos && i == todo.cursor { " <" } else { "" };
            let _ = writeln!(out, "\t\tTask #{}: {}{}", i + 1, task.describe(), marker);
            let _ = writeln!(out, "\t\tCompleted: {}", task.is_completed());
        }
        out
    }

    fn lock_locations(&self) -> std::sync::MutexGuard<'_, Locations> {
        self.locations.lock().expect("active plate locations mutex poisoned")
    }

    fn lock_todo(&self) -> std::sync::MutexGuard<'_, TodoList> {
        self.todo.lock().expect("active plate todo mutex poisoned")
    }
}

impl fmt::Display for ActivePlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.role {
            PlateRole::Source => "ActiveSourcePlate",
            PlateRole::Destination => "ActiveDestinationPlate",
            PlateRole::Workflow => "ActiveWorkflowPlate",
        };
        write!(f, "{kind}{}", self.instance_index)
    }
}

impl fmt::Debug for ActivePlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivePlate")
            .field("serial", &self.serial)
            .field("instance_index", &self.instance_index)
            .field("role", &self.role)
            .field("barcode", &self.barcode())
            .field("busy", &self.is_busy())
            .finish()
    }
}
