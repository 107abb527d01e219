//! plategrid-core — shared model for the plate scheduling engine.
//!
//! Everything the schedulers and the device layer pass between each other
//! lives here:
//!
//! - **`ids`**: sortable, process-monotonic ULID identifiers
//! - **`plate`**: plates, locations, and the places inside them
//! - **`handoff`**: locations shared by two cooperating robots
//! - **`task`**: device tasks and timed waits as one sum type
//! - **`worklist`**: transfers, per-phase task lists, completion callbacks
//! - **`active_plate`**: the runtime state machine wrapping a plate
//! - **`config`**: scheduler tuning knobs loaded from TOML

pub mod active_plate;
pub mod config;
pub mod error;
pub mod handoff;
pub mod ids;
pub mod plate;
pub mod task;
pub mod worklist;

pub use active_plate::{ActivePlate, PlateRole};
pub use config::{SchedulerConfig, parse_duration};
pub use error::{CoreError, CoreResult};
pub use handoff::{HandoffLocation, HandoffState};
pub use ids::{IdGenerator, new_id};
pub use plate::{Plate, PlateLocation, PlatePlace};
pub use task::{PlateTask, Task, WaitTask};
pub use worklist::{
    CompletionCallback, Transfer, TransferOverview, TransferTasks, WorkflowPlate, Worklist,
    create_worklist_from_transfer_overview,
};
