//! Driver contracts for schedulable devices and robots.
//!
//! ```text
//! Device                      name, product type, location query/reserve, add_job
//!   └── PlateSchedulerDevice  + lock_place, plate_location_info
//!         └── AccessibleDevice  (a robot can reach its locations)
//!
//! Robot                       transfer_plate, get_transfer_weight
//! ```
//!
//! Location queries are synchronous and must not block: the plate
//! scheduler calls them inside its dispatch pass. Anything that talks to
//! hardware (`add_job`, `transfer_plate`) is async.

use std::sync::Arc;

use async_trait::async_trait;
use plategrid_core::{ActivePlate, PlateLocation, PlatePlace};

use crate::error::DeviceResult;

/// A device that accepts plate jobs.
#[async_trait]
pub trait Device: Send + Sync {
    /// Unique instance name, used as the registry key.
    fn name(&self) -> &str;

    /// Device type; matched against `PlateTask::device_type`.
    fn product_name(&self) -> &str;

    /// A location on this device where `plate` could go now, if any.
    fn get_available_location(
        &self,
        plate: &ActivePlate,
    ) -> DeviceResult<Option<Arc<PlateLocation>>>;

    /// Claim `location` for `plate`. `Ok(false)` means someone else got it.
    fn reserve_location(&self, location: &Arc<PlateLocation>, plate: &ActivePlate)
    -> DeviceResult<bool>;

    /// Run the plate's current task. The plate must eventually be marked
    /// completed (or freed) by the device.
    async fn add_job(&self, plate: Arc<ActivePlate>) -> DeviceResult<()>;
}

/// A device the plate scheduler can plan moves around.
pub trait PlateSchedulerDevice: Device {
    /// Lock a place against other users while a robot works on it.
    fn lock_place(&self, _place: &PlatePlace) -> DeviceResult<()> {
        Ok(())
    }

    /// Every location this device exposes, in a stable order.
    fn plate_location_info(&self) -> Vec<Arc<PlateLocation>>;
}

/// Marker for devices whose locations robots can physically reach.
///
/// Only accessible devices become nodes of the transport graph.
pub trait AccessibleDevice: PlateSchedulerDevice {}

/// One side of a robot move: a place inside a location on a device.
#[derive(Clone, Copy)]
pub struct Endpoint<'a> {
    pub device: &'a dyn PlateSchedulerDevice,
    pub location: &'a PlateLocation,
    pub place: &'a PlatePlace,
}

impl<'a> Endpoint<'a> {
    pub fn new(
        device: &'a dyn PlateSchedulerDevice,
        location: &'a PlateLocation,
        place: &'a PlatePlace,
    ) -> Self {
        Self {
            device,
            location,
            place,
        }
    }

    /// Both endpoints refer to the same location on the same device.
    pub fn same_location(&self, other: &Endpoint<'_>) -> bool {
        self.device.name() == other.device.name() && self.location.name() == other.location.name()
    }
}

/// A single robot hop handed to `Robot::transfer_plate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub src_device: String,
    pub src_location: String,
    pub src_place: String,
    pub dst_device: String,
    pub dst_location: String,
    pub dst_place: String,
    pub labware_name: String,
    pub barcode: String,
}

impl TransferRequest {
    pub fn new(src: &Endpoint<'_>, dst: &Endpoint<'_>, plate: &ActivePlate) -> Self {
        Self {
            src_device: src.device.name().to_string(),
            src_location: src.location.name().to_string(),
            src_place: src.place.name.clone(),
            dst_device: dst.device.name().to_string(),
            dst_location: dst.location.name().to_string(),
            dst_place: dst.place.name.clone(),
            labware_name: plate.labware_name().to_string(),
            barcode: plate.barcode().to_string(),
        }
    }
}

/// A plate-moving robot.
#[async_trait]
pub trait Robot: Send + Sync {
    fn name(&self) -> &str;

    /// Physically move a plate. Returns once the plate has been set down.
    async fn transfer_plate(&self, request: &TransferRequest) -> DeviceResult<()>;

    /// Cost of moving between two places. `f64::INFINITY` (or any
    /// non-positive value) means this robot cannot make the move.
    fn get_transfer_weight(&self, src: &Endpoint<'_>, dst: &Endpoint<'_>) -> DeviceResult<f64>;
}
