//! Registry of devices, robots, and nodes keyed by name.
//!
//! Registration order is preserved; the plate scheduler tries devices of a
//! type in the order they were registered. Re-registering a name replaces
//! the previous entry in place.

use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::device::{AccessibleDevice, PlateSchedulerDevice, Robot};
use crate::node::NodeClient;

struct DeviceEntry {
    device: Arc<dyn PlateSchedulerDevice>,
    accessible: bool,
}

#[derive(Default)]
struct Registry {
    devices: Vec<DeviceEntry>,
    robots: Vec<Arc<dyn Robot>>,
    nodes: Vec<(String, Arc<dyn NodeClient>)>,
}

/// Thread-safe name → driver lookup shared by both schedulers.
#[derive(Default)]
pub struct DeviceManager {
    inner: RwLock<Registry>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device robots cannot reach.
    pub fn register_device<D>(&self, device: Arc<D>)
    where
        D: PlateSchedulerDevice + 'static,
    {
        self.insert_device(device, false);
    }

    /// Register a device whose locations join the transport graph.
    pub fn register_accessible_device<D>(&self, device: Arc<D>)
    where
        D: AccessibleDevice + 'static,
    {
        self.insert_device(device, true);
    }

    fn insert_device(&self, device: Arc<dyn PlateSchedulerDevice>, accessible: bool) {
        let mut inner = self.write();
        let name = device.name().to_string();
        let entry = DeviceEntry { device, accessible };
        match inner.devices.iter_mut().find(|e| e.device.name() == name) {
            Some(existing) => {
                warn!(device = %name, "replacing registered device");
                *existing = entry;
            }
            None => inner.devices.push(entry),
        }
        debug!(device = %name, accessible, "device registered");
    }

    pub fn register_robot<R>(&self, robot: Arc<R>)
    where
        R: Robot + 'static,
    {
        let robot: Arc<dyn Robot> = robot;
        let mut inner = self.write();
        let name = robot.name().to_string();
        match inner.robots.iter_mut().find(|r| r.name() == name) {
            Some(existing) => {
                warn!(robot = %name, "replacing registered robot");
                *existing = robot;
            }
            None => inner.robots.push(robot),
        }
        debug!(robot = %name, "robot registered");
    }

    pub fn register_node(&self, name: impl Into<String>, node: Arc<dyn NodeClient>) {
        let name = name.into();
        let mut inner = self.write();
        match inner.nodes.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = node,
            None => inner.nodes.push((name.clone(), node)),
        }
        debug!(node = %name, "node registered");
    }

    pub fn get_device(&self, name: &str) -> Option<Arc<dyn PlateSchedulerDevice>> {
        self.read()
            .devices
            .iter()
            .find(|e| e.device.name() == name)
            .map(|e| Arc::clone(&e.device))
    }

    pub fn get_robot(&self, name: &str) -> Option<Arc<dyn Robot>> {
        self.read()
            .robots
            .iter()
            .find(|r| r.name() == name)
            .cloned()
    }

    pub fn get_node(&self, name: &str) -> Option<Arc<dyn NodeClient>> {
        self.read()
            .nodes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, node)| Arc::clone(node))
    }

    /// All devices whose product name matches `device_type`, in registration order.
    pub fn get_devices_by_type(&self, device_type: &str) -> Vec<Arc<dyn PlateSchedulerDevice>> {
        self.read()
            .devices
            .iter()
            .filter(|e| e.device.product_name() == device_type)
            .map(|e| Arc::clone(&e.device))
            .collect()
    }

    pub fn get_accessible_devices(&self) -> Vec<Arc<dyn PlateSchedulerDevice>> {
        self.read()
            .devices
            .iter()
            .filter(|e| e.accessible)
            .map(|e| Arc::clone(&e.device))
            .collect()
    }

    pub fn get_devices(&self) -> Vec<Arc<dyn PlateSchedulerDevice>> {
        self.read()
            .devices
            .iter()
            .map(|e| Arc::clone(&e.device))
            .collect()
    }

    pub fn get_robots(&self) -> Vec<Arc<dyn Robot>> {
        self.read().robots.clone()
    }

    pub fn is_accessible(&self, name: &str) -> bool {
        self.read()
            .devices
            .iter()
            .any(|e| e.accessible && e.device.name() == name)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.inner.read().expect("device registry lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.inner.write().expect("device registry lock poisoned")
    }
}
