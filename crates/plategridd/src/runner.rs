//! Drives a built lab through both schedulers.

use std::fmt::Write as _;
use std::sync::Arc;

use plategrid_core::{ActivePlate, SchedulerConfig};
use plategrid_devices::{Device, Robot};
use plategrid_scheduler::{ActivePlateRegistry, MoveEvent, PlateScheduler, RobotScheduler};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::lab::Lab;

pub struct LabRunner {
    lab: Lab,
    robots: Arc<RobotScheduler>,
    plates: PlateScheduler,
    pending: Vec<(String, oneshot::Receiver<()>)>,
}

impl LabRunner {
    /// Start both schedulers and queue every worklist of `lab`.
    pub fn start(mut lab: Lab, config: &SchedulerConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(ActivePlateRegistry::new());
        let robots = Arc::new(RobotScheduler::new(Arc::clone(&lab.devices), config)?);
        robots.add_exiting_move_plate_callback(Arc::new(|event: &MoveEvent| {
            info!(
                barcode = %event.barcode,
                robot = %event.robot,
                hop = event.hop,
                from = %event.from,
                to = %event.to,
                "plate moved"
            );
        }));

        let plates = PlateScheduler::new(
            config.clone(),
            Arc::clone(&lab.devices),
            Arc::clone(&robots),
            registry,
        )?;
        plates.add_plate_finished_callback(Arc::new(|plate: &ActivePlate| {
            info!(barcode = %plate.barcode(), serial = plate.serial(), "plate finished");
        }));

        robots.start_scheduler()?;
        plates.start_scheduler()?;

        let mut pending = Vec::new();
        for worklist in lab.worklists.drain(..) {
            let (tx, rx) = oneshot::channel();
            let name = worklist.name().to_string();
            worklist.add_completion_callback(move |w| {
                info!(worklist = %w.name(), "worklist complete");
                let _ = tx.send(());
            });
            plates.enqueue_worklist(Arc::new(worklist));
            pending.push((name, rx));
        }

        Ok(Self {
            lab,
            robots,
            plates,
            pending,
        })
    }

    /// Resolve once every queued worklist has completed.
    ///
    /// Cancel-safe: worklists already seen complete are not waited on again.
    pub async fn wait(&mut self) {
        while let Some((name, rx)) = self.pending.first_mut() {
            if rx.await.is_err() {
                warn!(worklist = %name, "worklist dropped before completing");
            }
            self.pending.remove(0);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Scheduler status plus what every simulated driver did.
    pub fn report(&self) -> String {
        let mut out = self.plates.get_status();
        for robot in &self.lab.robots {
            let history = robot.history();
            let _ = write!(out, "\n{}: {} transfers", robot.name(), history.len());
            for t in history {
                let _ = write!(
                    out,
                    "\n\t{} {}:{} -> {}:{}",
                    t.barcode, t.src_location, t.src_place, t.dst_location, t.dst_place
                );
            }
        }
        for device in &self.lab.sim_devices {
            let jobs = device.jobs();
            if jobs.is_empty() {
                continue;
            }
            let _ = write!(out, "\n{}: {} jobs", device.name(), jobs.len());
            for job in jobs {
                let _ = write!(out, "\n\t{} {}", job.barcode, job.command);
            }
        }
        out
    }

    pub async fn stop(self) -> anyhow::Result<()> {
        self.plates.stop_scheduler().await?;
        self.robots.stop_scheduler().await?;
        Ok(())
    }
}
