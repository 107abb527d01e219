//! plategrid-scheduler — the two cooperating scheduling loops.
//!
//! ```text
//!                 enqueue_worklist
//!                        │
//!                        ▼
//!  ┌──────────────── PlateScheduler ─────────────────┐
//!  │ factories ──mint──▶ ActivePlateRegistry          │
//!  │ tick: timers, retire, mint, dispatch             │
//!  └──────┬───────────────────────────┬──────────────┘
//!         │ sourcing                  │ MoveJob
//!         ▼                           ▼
//!   device.add_job            RobotScheduler ──▶ PathPlanner
//!                                     │
//!                                     ▼
//!                       robot.transfer_plate (per hop)
//!                                     │
//!                                     ▼
//!                              device.add_job
//! ```
//!
//! - **`registry`**: the shared active plate list and serial counter
//! - **`factory`**: per-role plate minting under a concurrency cap
//! - **`plate_scheduler`**: worklist runs, task dispatch, starvation tracking
//! - **`robot_scheduler`**: move queue, path execution, move callbacks
//! - **`wait_timers`**: deadline heap for wait tasks
//! - **`job_queue`**: async FIFO shared by both schedulers

pub mod error;
pub mod factory;
pub mod job_queue;
pub mod plate_scheduler;
pub mod registry;
pub mod robot_scheduler;
pub mod wait_timers;

pub use error::{SchedulerError, SchedulerResult};
pub use factory::ActivePlateFactory;
pub use job_queue::JobQueue;
pub use plate_scheduler::{PlateFinishedCallback, PlateScheduler, StarvedPlate};
pub use registry::ActivePlateRegistry;
pub use robot_scheduler::{
    MoveCallback, MoveEvent, MoveJob, MoveOutcome, MoveStats, RobotScheduler,
};
pub use wait_timers::WaitTimers;
