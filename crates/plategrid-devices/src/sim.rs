//! Simulated devices and robots.
//!
//! `SimDevice` completes jobs after a configurable processing time and
//! records what it ran. `SimRobot` moves plates between any devices in its
//! reach at a fixed cost and keeps a transfer history. Both support fault
//! injection for exercising scheduler error paths.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use plategrid_core::{ActivePlate, HandoffLocation, PlateLocation, PlatePlace, Task};
use tracing::{debug, warn};

use crate::device::{AccessibleDevice, Device, Endpoint, PlateSchedulerDevice, Robot, TransferRequest};
use crate::error::{DeviceError, DeviceResult};

/// A job a `SimDevice` has accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimJob {
    pub barcode: String,
    pub command: String,
    pub location: Option<String>,
}

pub struct SimDevice {
    name: String,
    product_name: String,
    locations: Vec<Arc<PlateLocation>>,
    processing_time: Duration,
    failing: AtomicBool,
    jobs: Mutex<Vec<SimJob>>,
    locked_places: Mutex<Vec<String>>,
}

impl SimDevice {
    /// A device with no locations yet.
    pub fn new(name: impl Into<String>, product_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            product_name: product_name.into(),
            locations: Vec::new(),
            processing_time: Duration::ZERO,
            failing: AtomicBool::new(false),
            jobs: Mutex::new(Vec::new()),
            locked_places: Mutex::new(Vec::new()),
        }
    }

    /// Add `count` locations named `"{device}_{i}"`.
    pub fn with_locations(mut self, count: usize) -> Self {
        for i in 0..count {
            let location = PlateLocation::new(format!("{}_{i}", self.name), self.name.clone());
            self.locations.push(Arc::new(location));
        }
        self
    }

    pub fn with_location(mut self, location: PlateLocation) -> Self {
        self.locations.push(Arc::new(location));
        self
    }

    /// Expose a handoff slot as one of this device's locations.
    pub fn with_handoff(mut self, handoff: &HandoffLocation) -> Self {
        self.locations.push(handoff.location());
        self
    }

    pub fn with_processing_time(mut self, processing_time: Duration) -> Self {
        self.processing_time = processing_time;
        self
    }

    /// Make subsequent `add_job` calls fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<SimJob> {
        self.jobs.lock().expect("sim device jobs poisoned").clone()
    }

    pub fn locked_places(&self) -> Vec<String> {
        self.locked_places
            .lock()
            .expect("sim device places poisoned")
            .clone()
    }

    fn owns(&self, location: &Arc<PlateLocation>) -> bool {
        self.locations.iter().any(|l| Arc::ptr_eq(l, location))
    }
}

#[async_trait]
impl Device for SimDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn product_name(&self) -> &str {
        &self.product_name
    }

    fn get_available_location(
        &self,
        plate: &ActivePlate,
    ) -> DeviceResult<Option<Arc<PlateLocation>>> {
        if let Some(here) = self.locations.iter().find(|l| plate.is_at(l)) {
            return Ok(Some(Arc::clone(here)));
        }
        Ok(self
            .locations
            .iter()
            .find(|l| l.is_available() && !l.is_occupied() && !l.is_reserved())
            .cloned())
    }

    fn reserve_location(
        &self,
        location: &Arc<PlateLocation>,
        _plate: &ActivePlate,
    ) -> DeviceResult<bool> {
        Ok(self.owns(location) && location.try_reserve())
    }

    async fn add_job(&self, plate: Arc<ActivePlate>) -> DeviceResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::Driver {
                device: self.name.clone(),
                message: "simulated fault".into(),
            });
        }

        let command = match plate.current_todo() {
            Some(Task::Plate(task)) => task.command,
            _ => {
                return Err(DeviceError::NoPlateTask {
                    device: self.name.clone(),
                    plate: plate.to_string(),
                });
            }
        };
        let location = plate.destination_location().map(|l| l.name().to_string());
        debug!(device = %self.name, plate = %plate, %command, "sim job accepted");
        self.jobs
            .lock()
            .expect("sim device jobs poisoned")
            .push(SimJob {
                barcode: plate.barcode().to_string(),
                command,
                location,
            });

        if self.processing_time.is_zero() {
            plate.mark_job_completed();
        } else {
            let processing_time = self.processing_time;
            tokio::spawn(async move {
                tokio::time::sleep(processing_time).await;
                plate.mark_job_completed();
            });
        }
        Ok(())
    }
}

impl PlateSchedulerDevice for SimDevice {
    fn lock_place(&self, place: &PlatePlace) -> DeviceResult<()> {
        self.locked_places
            .lock()
            .expect("sim device places poisoned")
            .push(place.name.clone());
        Ok(())
    }

    fn plate_location_info(&self) -> Vec<Arc<PlateLocation>> {
        self.locations.clone()
    }
}

impl AccessibleDevice for SimDevice {}

/// A robot that reaches every device, or only those named in its reach set.
pub struct SimRobot {
    name: String,
    reach: Option<BTreeSet<String>>,
    weight: f64,
    transfer_time: Duration,
    handoffs: Vec<Arc<HandoffLocation>>,
    failures_remaining: AtomicUsize,
    history: Mutex<Vec<TransferRequest>>,
}

impl SimRobot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reach: None,
            weight: 1.0,
            transfer_time: Duration::ZERO,
            handoffs: Vec::new(),
            failures_remaining: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Restrict the robot to the named devices.
    pub fn with_reach<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reach = Some(devices.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_transfer_time(mut self, transfer_time: Duration) -> Self {
        self.transfer_time = transfer_time;
        self
    }

    /// Drive the handoff state machine when moving plates through `handoff`.
    pub fn with_handoff(mut self, handoff: Arc<HandoffLocation>) -> Self {
        self.handoffs.push(handoff);
        self
    }

    /// Fail the next `count` transfers.
    pub fn fail_next_transfers(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn history(&self) -> Vec<TransferRequest> {
        self.history.lock().expect("sim robot history poisoned").clone()
    }

    pub fn reaches(&self, device: &str) -> bool {
        self.reach.as_ref().is_none_or(|r| r.contains(device))
    }

    fn handoff_at(&self, location: &str) -> Option<&Arc<HandoffLocation>> {
        self.handoffs.iter().find(|h| h.name() == location)
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Robot for SimRobot {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transfer_plate(&self, request: &TransferRequest) -> DeviceResult<()> {
        if !self.transfer_time.is_zero() {
            tokio::time::sleep(self.transfer_time).await;
        }
        if self.take_failure() {
            return Err(DeviceError::Robot {
                robot: self.name.clone(),
                message: format!("simulated fault moving {}", request.barcode),
            });
        }

        if let Some(handoff) = self.handoff_at(&request.src_location) {
            let picked = handoff
                .mark_picked_up(&self.name)
                .and_then(|()| handoff.mark_free(&self.name));
            if let Err(e) = picked {
                warn!(robot = %self.name, error = %e, "handoff pickup out of order");
            }
        }
        if let Some(handoff) = self.handoff_at(&request.dst_location) {
            if let Err(e) = handoff.mark_waiting_for_pickup(&self.name) {
                warn!(robot = %self.name, error = %e, "handoff drop-off out of order");
            }
        }

        debug!(
            robot = %self.name,
            barcode = %request.barcode,
            from = %request.src_place,
            to = %request.dst_place,
            "sim transfer"
        );
        self.history
            .lock()
            .expect("sim robot history poisoned")
            .push(request.clone());
        Ok(())
    }

    fn get_transfer_weight(&self, src: &Endpoint<'_>, dst: &Endpoint<'_>) -> DeviceResult<f64> {
        if src.same_location(dst) {
            return Ok(f64::INFINITY);
        }
        if !self.reaches(src.device.name()) || !self.reaches(dst.device.name()) {
            return Ok(f64::INFINITY);
        }
        Ok(self.weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plategrid_core::{Plate, PlateRole, PlateTask};

    fn plate() -> ActivePlate {
        ActivePlate::new(
            0,
            0,
            PlateRole::Source,
            Some(Plate::new("SRC001", "Costar 96", "96")),
            vec![PlateTask::new("Processor", "process").into()],
        )
    }

    #[test]
    fn reserved_location_is_not_offered() {
        let device = SimDevice::new("Proc", "Processor").with_locations(2);
        let p = plate();
        let first = device.get_available_location(&p).unwrap().unwrap();
        assert!(device.reserve_location(&first, &p).unwrap());
        assert!(!device.reserve_location(&first, &p).unwrap());

        let second = device.get_available_location(&p).unwrap().unwrap();
        assert_eq!(second.name(), "Proc_1");
        first.release();
    }

    #[test]
    fn foreign_location_cannot_be_reserved() {
        let a = SimDevice::new("A", "X").with_locations(1);
        let b = SimDevice::new("B", "X").with_locations(1);
        let p = plate();
        let loc = b.get_available_location(&p).unwrap().unwrap();
        assert!(!a.reserve_location(&loc, &p).unwrap());
    }

    #[tokio::test]
    async fn job_completes_and_is_recorded() {
        let device = SimDevice::new("Proc", "Processor").with_locations(1);
        let p = Arc::new(plate());
        p.mark_busy();
        device.add_job(Arc::clone(&p)).await.unwrap();
        assert!(p.is_finished());
        assert_eq!(device.jobs()[0].command, "process");
    }

    #[tokio::test(start_paused = true)]
    async fn processing_time_delays_completion() {
        let device = SimDevice::new("Proc", "Processor")
            .with_locations(1)
            .with_processing_time(Duration::from_secs(5));
        let p = Arc::new(plate());
        p.mark_busy();
        device.add_job(Arc::clone(&p)).await.unwrap();
        assert!(p.is_busy());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(p.is_finished());
    }

    #[tokio::test]
    async fn failing_device_rejects_jobs() {
        let device = SimDevice::new("Proc", "Processor");
        device.set_failing(true);
        assert!(device.add_job(Arc::new(plate())).await.is_err());
    }

    #[test]
    fn weight_respects_reach_and_same_location() {
        let hotel = SimDevice::new("Hotel", "Storage").with_locations(2);
        let sealer = SimDevice::new("Sealer", "Sealer").with_locations(1);
        let robot = SimRobot::new("PF400").with_reach(["Hotel"]).with_weight(2.5);

        let h = hotel.plate_location_info();
        let s = sealer.plate_location_info();
        let h0 = Endpoint::new(&hotel, &h[0], &h[0].places()[0]);
        let h1 = Endpoint::new(&hotel, &h[1], &h[1].places()[0]);
        let s0 = Endpoint::new(&sealer, &s[0], &s[0].places()[0]);

        assert_eq!(robot.get_transfer_weight(&h0, &h1).unwrap(), 2.5);
        assert!(robot.get_transfer_weight(&h0, &h0).unwrap().is_infinite());
        assert!(robot.get_transfer_weight(&h0, &s0).unwrap().is_infinite());
    }

    #[tokio::test]
    async fn robot_records_history_and_injected_faults() {
        let robot = SimRobot::new("PF400");
        let request = TransferRequest {
            src_device: "A".into(),
            src_location: "A_0".into(),
            src_place: "A_0_place".into(),
            dst_device: "B".into(),
            dst_location: "B_0".into(),
            dst_place: "B_0_place".into(),
            labware_name: "Costar 96".into(),
            barcode: "SRC001".into(),
        };
        robot.fail_next_transfers(1);
        assert!(robot.transfer_plate(&request).await.is_err());
        robot.transfer_plate(&request).await.unwrap();
        assert_eq!(robot.history(), vec![request]);
    }

    #[tokio::test]
    async fn robots_drive_handoff_states() {
        let handoff = Arc::new(HandoffLocation::new("Handoff_0", "Handoff", ["PF400", "Planar"]));
        let pf400 = SimRobot::new("PF400").with_handoff(Arc::clone(&handoff));
        let planar = SimRobot::new("Planar").with_handoff(Arc::clone(&handoff));

        let drop_off = TransferRequest {
            src_device: "Hotel".into(),
            src_location: "Hotel_0".into(),
            src_place: "Hotel_0_place".into(),
            dst_device: "Handoff".into(),
            dst_location: "Handoff_0".into(),
            dst_place: "Handoff_0_place".into(),
            labware_name: "Costar 96".into(),
            barcode: "WF001".into(),
        };
        pf400.transfer_plate(&drop_off).await.unwrap();
        assert_eq!(handoff.state().as_str(), "waiting_for_pickup");

        let pickup = TransferRequest {
            src_device: "Handoff".into(),
            src_location: "Handoff_0".into(),
            src_place: "Handoff_0_place".into(),
            dst_device: "Planar".into(),
            dst_location: "Planar_0".into(),
            dst_place: "Planar_0_place".into(),
            labware_name: "Costar 96".into(),
            barcode: "WF001".into(),
        };
        planar.transfer_plate(&pickup).await.unwrap();
        assert_eq!(handoff.state().as_str(), "free");
    }
}
