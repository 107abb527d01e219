//! Plate scheduler: the top-level orchestration loop.
//!
//! Worklists are queued and run one after another. A run ticks until every
//! factory is exhausted and every plate it minted has finished. Each tick:
//!
//! 1. fire due wait timers
//! 2. retire finished plates
//! 3. let each factory mint one plate if its role is under the cap
//! 4. walk the run's active plates and dispatch whatever is ready
//!
//! A plate is ready when it is free and no active plate with a lower
//! instance index has the same current task. Wait tasks park the plate on
//! a timer; plate tasks go to the first device of the required type that
//! can reserve a location. A plate with no location yet is sourced in
//! place; anything else is handed to the robot scheduler, which starts the
//! device job once the plate has arrived.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use plategrid_core::{ActivePlate, PlateRole, PlateTask, SchedulerConfig, Task, Worklist};
use plategrid_devices::DeviceManager;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::factory::ActivePlateFactory;
use crate::job_queue::JobQueue;
use crate::registry::ActivePlateRegistry;
use crate::robot_scheduler::{MoveJob, RobotScheduler, spawn_device_job};
use crate::wait_timers::WaitTimers;

pub type PlateFinishedCallback = Arc<dyn Fn(&ActivePlate) + Send + Sync>;

/// A plate whose current task has gone unscheduled past the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarvedPlate {
    pub serial: u64,
    pub barcode: String,
    pub task: String,
    pub waiting: Duration,
}

struct Unscheduled {
    barcode: String,
    task_id: String,
    task: String,
    since: Instant,
}

struct PlateCore {
    config: SchedulerConfig,
    tick: Duration,
    starvation_threshold: Option<Duration>,
    devices: Arc<DeviceManager>,
    robot: Arc<RobotScheduler>,
    registry: Arc<ActivePlateRegistry>,
    worklists: JobQueue<Arc<Worklist>>,
    destination_worklists: Mutex<HashMap<u64, Arc<Worklist>>>,
    unscheduled: Mutex<HashMap<u64, Unscheduled>>,
    finished_callbacks: RwLock<Vec<PlateFinishedCallback>>,
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

pub struct PlateScheduler {
    core: Arc<PlateCore>,
    worker: Mutex<Option<Worker>>,
    stop_timeout: Duration,
}

impl PlateScheduler {
    pub fn new(
        config: SchedulerConfig,
        devices: Arc<DeviceManager>,
        robot: Arc<RobotScheduler>,
        registry: Arc<ActivePlateRegistry>,
    ) -> SchedulerResult<Self> {
        config.validate()?;
        let tick = config.tick_interval()?;
        let starvation_threshold = config.starvation_threshold()?;
        let stop_timeout = config.plate_stop_timeout()?;
        Ok(Self {
            core: Arc::new(PlateCore {
                config,
                tick,
                starvation_threshold,
                devices,
                robot,
                registry,
                worklists: JobQueue::new(),
                destination_worklists: Mutex::new(HashMap::new()),
                unscheduled: Mutex::new(HashMap::new()),
                finished_callbacks: RwLock::new(Vec::new()),
            }),
            worker: Mutex::new(None),
            stop_timeout,
        })
    }

    /// Queue a worklist. Worklists run in submission order.
    pub fn enqueue_worklist(&self, worklist: Arc<Worklist>) {
        info!(worklist = %worklist.name(), id = %worklist.id(), "worklist queued");
        self.core.worklists.push(worklist);
    }

    pub fn add_plate_finished_callback(&self, callback: PlateFinishedCallback) {
        self.core
            .finished_callbacks
            .write()
            .expect("plate finished callbacks poisoned")
            .push(callback);
    }

    /// Spawn the worker loop. Must be called inside a tokio runtime.
    pub fn start_scheduler(&self) -> SchedulerResult<()> {
        let mut worker = self.worker.lock().expect("plate worker slot poisoned");
        if worker.is_some() {
            return Err(SchedulerError::AlreadyRunning("plate scheduler"));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let core = Arc::clone(&self.core);
        let handle = tokio::spawn(async move {
            run_plate_loop(core, shutdown_rx).await;
        });
        *worker = Some(Worker {
            handle,
            shutdown_tx,
        });
        info!(tick = ?self.core.tick, "plate scheduler started");
        Ok(())
    }

    /// Signal the worker and wait up to `plate_stop_timeout` for it. A
    /// worklist interrupted this way does not fire its completion callbacks.
    pub async fn stop_scheduler(&self) -> SchedulerResult<()> {
        let worker = self
            .worker
            .lock()
            .expect("plate worker slot poisoned")
            .take();
        let Some(mut worker) = worker else {
            return Err(SchedulerError::NotRunning("plate scheduler"));
        };

        let _ = worker.shutdown_tx.send(true);
        match tokio::time::timeout(self.stop_timeout, &mut worker.handle).await {
            Ok(Ok(())) => {
                info!("plate scheduler stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "plate scheduler worker failed");
                Ok(())
            }
            Err(_) => {
                warn!(timeout = ?self.stop_timeout, "plate scheduler did not stop in time");
                Err(SchedulerError::StopTimedOut {
                    scheduler: "plate scheduler",
                    timeout: self.stop_timeout,
                })
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .expect("plate worker slot poisoned")
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn queued_worklists(&self) -> usize {
        self.core.worklists.len()
    }

    /// The worklist a live destination plate belongs to.
    pub fn destination_worklist(&self, serial: u64) -> Option<Arc<Worklist>> {
        self.core
            .destination_worklists
            .lock()
            .expect("destination worklists poisoned")
            .get(&serial)
            .cloned()
    }

    /// Plates whose current task has gone unscheduled for longer than
    /// `starvation_threshold`. Empty when no threshold is configured.
    pub fn starved_plates(&self) -> Vec<StarvedPlate> {
        let Some(threshold) = self.core.starvation_threshold else {
            return Vec::new();
        };
        let now = Instant::now();
        let mut starved: Vec<StarvedPlate> = self
            .core
            .unscheduled
            .lock()
            .expect("unscheduled plates poisoned")
            .iter()
            .filter_map(|(serial, u)| {
                let waiting = now.saturating_duration_since(u.since);
                (waiting > threshold).then(|| StarvedPlate {
                    serial: *serial,
                    barcode: u.barcode.clone(),
                    task: u.task.clone(),
                    waiting,
                })
            })
            .collect();
        starved.sort_by_key(|s| s.serial);
        starved
    }

    pub fn get_status(&self) -> String {
        let plates = self.core.registry.snapshot();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "PlateScheduler: {} active plates, {} queued worklists",
            plates.len(),
            self.core.worklists.len()
        );
        for plate in &plates {
            out.push_str(&plate.status());
        }
        let starved = self.starved_plates();
        if !starved.is_empty() {
            let _ = writeln!(out, "Starved plates:");
            for s in starved {
                let _ = writeln!(out, "\t{} waiting {:?} on {}", s.barcode, s.waiting, s.task);
            }
        }
        out.push_str(&self.core.robot.get_status());
        out
    }
}

async fn run_plate_loop(core: Arc<PlateCore>, mut shutdown: watch::Receiver<bool>) {
    debug!("plate loop starting");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("plate loop shutting down");
                break;
            }
            worklist = core.worklists.pop() => {
                let name = worklist.name().to_string();
                let run = tokio::spawn(Arc::clone(&core).run_worklist(worklist, shutdown.clone()));
                if let Err(e) = run.await {
                    error!(worklist = %name, error = %e, "worklist run panicked");
                }
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

impl PlateCore {
    async fn run_worklist(
        self: Arc<Self>,
        worklist: Arc<Worklist>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(worklist = %worklist.name(), id = %worklist.id(), "worklist started");
        let mut factories =
            ActivePlateFactory::for_worklist(&worklist, &self.config, &self.registry);
        let mut active: Vec<Arc<ActivePlate>> = Vec::new();
        let mut timers = WaitTimers::new();

        loop {
            if *shutdown.borrow() {
                info!(worklist = %worklist.name(), active = active.len(), "worklist interrupted");
                self.drop_run(&active);
                return;
            }

            for plate in timers.pop_due(Instant::now()) {
                debug!(plate = %plate, barcode = %plate.barcode(), "wait finished");
                plate.mark_job_completed();
            }

            let finished = self.registry.remove_finished();
            if !finished.is_empty() {
                self.retire(&finished);
                active.retain(|p| !finished.iter().any(|f| Arc::ptr_eq(f, p)));
            }

            for factory in &mut factories {
                if let Some(plate) = factory.try_release_active_plate() {
                    if factory.role() == PlateRole::Destination {
                        self.destination_worklists
                            .lock()
                            .expect("destination worklists poisoned")
                            .insert(plate.serial(), Arc::clone(&worklist));
                    }
                    active.push(plate);
                }
            }

            let remaining: usize = factories.iter().map(ActivePlateFactory::plates_to_create).sum();
            if remaining == 0 && active.is_empty() {
                break;
            }

            let everyone = self.registry.snapshot();
            for plate in &active {
                if plate.is_busy() {
                    continue;
                }
                let Some(task) = plate.current_todo() else {
                    continue;
                };
                if yields_to_lower_instance(plate, task.id(), &everyone) {
                    continue;
                }

                match &task {
                    Task::Wait(wait) => {
                        plate.mark_busy();
                        self.clear_unscheduled(plate);
                        timers.schedule(Arc::clone(plate), wait.duration());
                        debug!(plate = %plate, seconds = wait.duration_seconds, "waiting");
                    }
                    Task::Plate(plate_task) => {
                        if self.dispatch(plate, plate_task) {
                            self.clear_unscheduled(plate);
                        } else {
                            self.record_unscheduled(plate, &task);
                        }
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(worklist = %worklist.name(), "worklist finished");
        worklist.on_worklist_complete();
    }

    /// Match a plate task to the first device that can take the plate.
    fn dispatch(&self, plate: &Arc<ActivePlate>, task: &PlateTask) -> bool {
        let candidates = self.devices.get_devices_by_type(&task.device_type);
        if candidates.is_empty() {
            debug!(barcode = %plate.barcode(), device_type = %task.device_type, "no device of required type");
            return false;
        }

        for device in candidates {
            let location = match device.get_available_location(plate) {
                Ok(Some(location)) => location,
                Ok(None) => continue,
                Err(e) => {
                    debug!(device = %device.name(), error = %e, "location query failed");
                    continue;
                }
            };
            match device.reserve_location(&location, plate) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!(device = %device.name(), location = %location.name(), error = %e, "reservation failed");
                    continue;
                }
            }

            plate.mark_busy();
            info!(
                plate = %plate,
                barcode = %plate.barcode(),
                device = %device.name(),
                location = %location.name(),
                command = %task.command,
                "task scheduled"
            );
            if plate.current_location().is_none() {
                location.set_occupied();
                plate.set_locations(location);
                spawn_device_job(device, Arc::clone(plate));
            } else {
                plate.set_destination_location(Some(location));
                self.robot
                    .add_job(MoveJob::new(Arc::clone(plate)).then(device));
            }
            return true;
        }
        false
    }

    fn retire(&self, finished: &[Arc<ActivePlate>]) {
        {
            let mut destinations = self
                .destination_worklists
                .lock()
                .expect("destination worklists poisoned");
            let mut unscheduled = self.unscheduled.lock().expect("unscheduled plates poisoned");
            for plate in finished {
                destinations.remove(&plate.serial());
                unscheduled.remove(&plate.serial());
            }
        }
        let callbacks = self
            .finished_callbacks
            .read()
            .expect("plate finished callbacks poisoned")
            .clone();
        for plate in finished {
            info!(plate = %plate, barcode = %plate.barcode(), serial = plate.serial(), "plate finished");
            for callback in &callbacks {
                callback(plate);
            }
        }
    }

    /// Forget the plates of an interrupted run so they no longer count
    /// against the role caps of later runs.
    fn drop_run(&self, active: &[Arc<ActivePlate>]) {
        let mut destinations = self
            .destination_worklists
            .lock()
            .expect("destination worklists poisoned");
        let mut unscheduled = self.unscheduled.lock().expect("unscheduled plates poisoned");
        for plate in active {
            self.registry.remove(plate);
            destinations.remove(&plate.serial());
            unscheduled.remove(&plate.serial());
            debug!(plate = %plate, barcode = %plate.barcode(), "plate dropped with its run");
        }
    }

    fn record_unscheduled(&self, plate: &ActivePlate, task: &Task) {
        let mut unscheduled = self.unscheduled.lock().expect("unscheduled plates poisoned");
        let entry = unscheduled.entry(plate.serial()).or_insert_with(|| Unscheduled {
            barcode: plate.barcode().to_string(),
            task_id: task.id().to_string(),
            task: task.describe(),
            since: Instant::now(),
        });
        // A plate that moved on to a new task starts a fresh wait.
        if entry.task_id != task.id() {
            entry.task_id = task.id().to_string();
            entry.task = task.describe();
            entry.since = Instant::now();
        }
    }

    fn clear_unscheduled(&self, plate: &ActivePlate) {
        self.unscheduled
            .lock()
            .expect("unscheduled plates poisoned")
            .remove(&plate.serial());
    }
}

fn yields_to_lower_instance(
    plate: &Arc<ActivePlate>,
    task_id: &str,
    everyone: &[Arc<ActivePlate>],
) -> bool {
    everyone.iter().any(|other| {
        !Arc::ptr_eq(other, plate)
            && other.instance_index() < plate.instance_index()
            && other.current_task_id().as_deref() == Some(task_id)
    })
}
