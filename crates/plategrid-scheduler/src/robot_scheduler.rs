//! Robot scheduler: executes plate moves one at a time.
//!
//! The plate scheduler decides *where* a plate goes; this worker decides
//! *how*. Each queued `MoveJob` is planned against a freshly built world
//! graph (topology may have changed since the last move) and executed hop
//! by hop. Once the plate has arrived, the job's device work is started in
//! its own task so robot moves never queue behind device processing.
//!
//! ```text
//! add_job ──▶ JobQueue ──▶ worker ──▶ move_plate ──▶ hop, hop, ... ──▶ then_device.add_job
//!                                          │
//!                                          └── NoPath / Aborted ──▶ plate.abandon_job()
//! ```

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use plategrid_core::{ActivePlate, PlateLocation, SchedulerConfig};
use plategrid_devices::{DeviceManager, PlateSchedulerDevice, TransferRequest};
use plategrid_planner::{PathNode, PathPlanner};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::job_queue::JobQueue;

/// Move `plate` from its current to its destination location, then run
/// `then_device`'s job on it.
///
/// With no `then_device` the caller owns the plate's busy flag once the
/// move succeeds.
pub struct MoveJob {
    pub plate: Arc<ActivePlate>,
    pub then_device: Option<Arc<dyn PlateSchedulerDevice>>,
}

impl MoveJob {
    pub fn new(plate: Arc<ActivePlate>) -> Self {
        Self {
            plate,
            then_device: None,
        }
    }

    pub fn then(mut self, device: Arc<dyn PlateSchedulerDevice>) -> Self {
        self.then_device = Some(device);
        self
    }
}

/// How a move ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// Current and destination are the same location.
    AlreadyThere,
    /// Current or destination location is unset.
    MissingLocation,
    Moved { hops: usize },
    NoPath,
    /// Hop `hop` failed; the plate stays where the previous hop left it.
    Aborted { hop: usize, error: String },
}

/// Passed to entering/exiting callbacks around each hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveEvent {
    pub barcode: String,
    pub robot: String,
    pub hop: usize,
    pub from: String,
    pub to: String,
}

pub type MoveCallback = Arc<dyn Fn(&MoveEvent) + Send + Sync>;

/// Cumulative move counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveStats {
    pub moved: u64,
    pub already_there: u64,
    pub no_path: u64,
    pub aborted: u64,
    pub missing_location: u64,
}

#[derive(Default)]
struct Counters {
    moved: AtomicU64,
    already_there: AtomicU64,
    no_path: AtomicU64,
    aborted: AtomicU64,
    missing_location: AtomicU64,
}

struct RobotCore {
    devices: Arc<DeviceManager>,
    entering: RwLock<Vec<MoveCallback>>,
    exiting: RwLock<Vec<MoveCallback>>,
    counters: Counters,
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

pub struct RobotScheduler {
    core: Arc<RobotCore>,
    queue: Arc<JobQueue<MoveJob>>,
    worker: Mutex<Option<Worker>>,
    stop_timeout: Duration,
}

impl RobotScheduler {
    pub fn new(devices: Arc<DeviceManager>, config: &SchedulerConfig) -> SchedulerResult<Self> {
        Ok(Self {
            core: Arc::new(RobotCore {
                devices,
                entering: RwLock::new(Vec::new()),
                exiting: RwLock::new(Vec::new()),
                counters: Counters::default(),
            }),
            queue: Arc::new(JobQueue::new()),
            worker: Mutex::new(None),
            stop_timeout: config.robot_stop_timeout()?,
        })
    }

    /// Queue a move. Jobs run in FIFO order once the scheduler is started.
    pub fn add_job(&self, job: MoveJob) {
        debug!(
            plate = %job.plate,
            barcode = %job.plate.barcode(),
            pending = self.queue.len() + 1,
            "move job queued"
        );
        self.queue.push(job);
    }

    pub fn add_entering_move_plate_callback(&self, callback: MoveCallback) {
        self.core
            .entering
            .write()
            .expect("entering callbacks poisoned")
            .push(callback);
    }

    pub fn add_exiting_move_plate_callback(&self, callback: MoveCallback) {
        self.core
            .exiting
            .write()
            .expect("exiting callbacks poisoned")
            .push(callback);
    }

    /// Spawn the worker loop. Must be called inside a tokio runtime.
    pub fn start_scheduler(&self) -> SchedulerResult<()> {
        let mut worker = self.worker.lock().expect("robot worker slot poisoned");
        if worker.is_some() {
            return Err(SchedulerError::AlreadyRunning("robot scheduler"));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let core = Arc::clone(&self.core);
        let queue = Arc::clone(&self.queue);
        let handle = tokio::spawn(async move {
            run_robot_loop(core, queue, shutdown_rx).await;
        });
        *worker = Some(Worker {
            handle,
            shutdown_tx,
        });
        info!("robot scheduler started");
        Ok(())
    }

    /// Signal the worker and wait up to `robot_stop_timeout` for it to
    /// finish its current move. A worker that does not stop in time is
    /// detached, not aborted.
    pub async fn stop_scheduler(&self) -> SchedulerResult<()> {
        let worker = self
            .worker
            .lock()
            .expect("robot worker slot poisoned")
            .take();
        let Some(mut worker) = worker else {
            return Err(SchedulerError::NotRunning("robot scheduler"));
        };

        let _ = worker.shutdown_tx.send(true);
        match tokio::time::timeout(self.stop_timeout, &mut worker.handle).await {
            Ok(Ok(())) => {
                info!("robot scheduler stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "robot scheduler worker failed");
                Ok(())
            }
            Err(_) => {
                warn!(timeout = ?self.stop_timeout, "robot scheduler did not stop in time");
                Err(SchedulerError::StopTimedOut {
                    scheduler: "robot scheduler",
                    timeout: self.stop_timeout,
                })
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .expect("robot worker slot poisoned")
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> MoveStats {
        let c = &self.core.counters;
        MoveStats {
            moved: c.moved.load(Ordering::SeqCst),
            already_there: c.already_there.load(Ordering::SeqCst),
            no_path: c.no_path.load(Ordering::SeqCst),
            aborted: c.aborted.load(Ordering::SeqCst),
            missing_location: c.missing_location.load(Ordering::SeqCst),
        }
    }

    /// Plan and execute a single move without going through the queue.
    ///
    /// Location bookkeeping is applied; the plate's busy flag is untouched.
    pub async fn move_plate(&self, plate: &Arc<ActivePlate>) -> MoveOutcome {
        self.core.move_plate(plate).await
    }

    pub fn get_status(&self) -> String {
        let barcodes = self.queue.snapshot(|job| job.plate.barcode().to_string());
        let mut out = String::new();
        if barcodes.is_empty() {
            out.push_str("RobotScheduler has no pending jobs\n");
        } else {
            let _ = writeln!(out, "RobotScheduler has {} pending jobs:", barcodes.len());
            for barcode in barcodes {
                let _ = writeln!(out, "\t{barcode}");
            }
        }
        let stats = self.stats();
        let _ = writeln!(
            out,
            "Moves: {} completed, {} already in place, {} without path, {} aborted",
            stats.moved, stats.already_there, stats.no_path, stats.aborted
        );
        out
    }
}

async fn run_robot_loop(
    core: Arc<RobotCore>,
    queue: Arc<JobQueue<MoveJob>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("robot loop starting");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("robot loop shutting down");
                break;
            }
            job = queue.pop() => {
                let plate = Arc::clone(&job.plate);
                let run = tokio::spawn(Arc::clone(&core).execute(job));
                if let Err(e) = run.await {
                    error!(barcode = %plate.barcode(), error = %e, "move job panicked");
                    plate.abandon_job();
                }
            }
        }
    }
}

impl RobotCore {
    async fn execute(self: Arc<Self>, job: MoveJob) {
        let MoveJob { plate, then_device } = job;
        let outcome = self.move_plate(&plate).await;
        match outcome {
            MoveOutcome::AlreadyThere | MoveOutcome::Moved { .. } => {
                if let Some(device) = then_device {
                    spawn_device_job(device, plate);
                }
            }
            MoveOutcome::NoPath => {
                warn!(plate = %plate, barcode = %plate.barcode(), "no path; move dropped");
                plate.abandon_job();
            }
            MoveOutcome::MissingLocation => {
                warn!(plate = %plate, barcode = %plate.barcode(), "move without current or destination location");
                plate.abandon_job();
            }
            MoveOutcome::Aborted { hop, error } => {
                warn!(plate = %plate, barcode = %plate.barcode(), hop, %error, "move aborted");
                plate.abandon_job();
            }
        }
    }

    async fn move_plate(&self, plate: &Arc<ActivePlate>) -> MoveOutcome {
        let (Some(src), Some(dst)) = (plate.current_location(), plate.destination_location())
        else {
            self.counters.missing_location.fetch_add(1, Ordering::SeqCst);
            return MoveOutcome::MissingLocation;
        };
        if Arc::ptr_eq(&src, &dst) {
            debug!(barcode = %plate.barcode(), location = %src.name(), "plate already in place");
            self.counters.already_there.fetch_add(1, Ordering::SeqCst);
            return MoveOutcome::AlreadyThere;
        }

        let mut planner = PathPlanner::new(Arc::clone(&self.devices));
        planner.create_world();
        let Some(path) = planner.plan_path(&src, &dst) else {
            self.counters.no_path.fetch_add(1, Ordering::SeqCst);
            return MoveOutcome::NoPath;
        };
        debug!(
            barcode = %plate.barcode(),
            path = ?path.keys(),
            cost = path.total_cost,
            "path planned"
        );

        for (i, hop) in path.hops.iter().enumerate() {
            let from = &path.nodes[i];
            let to = &path.nodes[i + 1];
            if !Arc::ptr_eq(&from.location, &to.location) {
                lock_place(from);
                lock_place(to);
            }

            let request = TransferRequest::new(&from.endpoint(), &to.endpoint(), plate);
            let event = MoveEvent {
                barcode: plate.barcode().to_string(),
                robot: hop.robot.name().to_string(),
                hop: i,
                from: from.key.clone(),
                to: to.key.clone(),
            };
            fire(&self.entering, &event);
            let result = hop.robot.transfer_plate(&request).await;
            fire(&self.exiting, &event);

            if let Err(e) = result {
                if i > 0 {
                    relocate(plate, &src, &from.location);
                }
                self.counters.aborted.fetch_add(1, Ordering::SeqCst);
                return MoveOutcome::Aborted {
                    hop: i,
                    error: e.to_string(),
                };
            }
        }

        relocate(plate, &src, &dst);
        self.counters.moved.fetch_add(1, Ordering::SeqCst);
        info!(
            barcode = %plate.barcode(),
            from = %src.name(),
            to = %dst.name(),
            hops = path.hops.len(),
            "plate moved"
        );
        MoveOutcome::Moved {
            hops: path.hops.len(),
        }
    }
}

fn lock_place(node: &PathNode) {
    if let Err(e) = node.device.lock_place(&node.place) {
        debug!(device = %node.device.name(), place = %node.place.name, error = %e, "lock_place failed");
    }
}

fn fire(callbacks: &RwLock<Vec<MoveCallback>>, event: &MoveEvent) {
    let callbacks = callbacks.read().expect("move callbacks poisoned").clone();
    for callback in callbacks {
        callback(event);
    }
}

fn relocate(plate: &ActivePlate, from: &Arc<PlateLocation>, to: &Arc<PlateLocation>) {
    from.clear_occupied();
    to.set_occupied();
    plate.set_current_location(Some(Arc::clone(to)));
}

/// Run the device job in the background. A panicking driver frees the plate
/// the same way a failed submission does.
pub(crate) fn spawn_device_job(device: Arc<dyn PlateSchedulerDevice>, plate: Arc<ActivePlate>) {
    tokio::spawn(async move {
        let job = tokio::spawn(run_device_job(device, Arc::clone(&plate)));
        if let Err(e) = job.await {
            error!(barcode = %plate.barcode(), error = %e, "device job panicked");
            plate.abandon_job();
        }
    });
}

/// Run the plate's current task on `device`. A failed submission hands the
/// plate back to the plate scheduler for another attempt.
async fn run_device_job(device: Arc<dyn PlateSchedulerDevice>, plate: Arc<ActivePlate>) {
    debug!(device = %device.name(), plate = %plate, barcode = %plate.barcode(), "device job starting");
    if let Err(e) = device.add_job(Arc::clone(&plate)).await {
        warn!(device = %device.name(), barcode = %plate.barcode(), error = %e, "device job failed");
        plate.abandon_job();
    }
}
