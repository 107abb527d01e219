//! Lab description loaded from TOML.
//!
//! A lab file names the devices, the handoff stations between robots, the
//! robots themselves and the worklists to run. `LabConfig::build` turns it
//! into a populated `DeviceManager` plus fresh worklists.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail, ensure};
use plategrid_core::{
    HandoffLocation, Plate, PlateLocation, SchedulerConfig, Task, Transfer, TransferOverview,
    TransferTasks, Worklist, create_worklist_from_transfer_overview, parse_duration,
};
use plategrid_devices::{
    AccessibleDevice, DeviceManager, NodeClient, NodeDevice, RestNodeClient, SimDevice, SimRobot,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

fn default_slots() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

fn default_labware() -> String {
    "Costar 96".to_string()
}

fn default_labware_format() -> String {
    "96".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub handoffs: Vec<HandoffConfig>,
    #[serde(default)]
    pub robots: Vec<RobotConfig>,
    #[serde(default)]
    pub worklists: Vec<WorklistConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub name: String,
    /// Device type matched against task `device_type`.
    pub product: String,
    /// Number of single-place locations named `"{name}_{i}"`.
    #[serde(default = "default_slots")]
    pub slots: usize,
    /// Extra named locations with explicit places.
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    #[serde(default)]
    pub processing_time: Option<String>,
    /// Whether robots may move plates in and out of this device.
    #[serde(default = "default_true")]
    pub accessible: bool,
    /// Serve jobs through a remote node instead of the simulator.
    #[serde(default)]
    pub node_url: Option<String>,
    #[serde(default)]
    pub poll_interval: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationConfig {
    pub name: String,
    #[serde(default)]
    pub places: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffConfig {
    pub name: String,
    /// Device that exposes the handoff as one of its locations.
    pub device: String,
    pub robots: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RobotConfig {
    pub name: String,
    /// Devices this robot can reach. Omitted means every device.
    #[serde(default)]
    pub reach: Option<Vec<String>>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub transfer_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorklistConfig {
    pub name: String,
    #[serde(default = "default_labware")]
    pub labware: String,
    #[serde(default = "default_labware_format")]
    pub labware_format: String,
    #[serde(default)]
    pub transfers: Vec<TransferConfig>,
    #[serde(default)]
    pub tasks: TransferTasks,
    #[serde(default)]
    pub workflow_plates: Vec<WorkflowPlateConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    /// Source plate barcode.
    pub source: String,
    /// Destination plate barcode.
    pub destination: String,
    #[serde(default)]
    pub source_well: Option<String>,
    #[serde(default)]
    pub destination_well: Option<String>,
    #[serde(default)]
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowPlateConfig {
    pub barcode: String,
    #[serde(default)]
    pub labware: Option<String>,
    pub tasks: Vec<Task>,
}

/// Everything `LabConfig::build` creates.
pub struct Lab {
    pub devices: Arc<DeviceManager>,
    pub sim_devices: Vec<Arc<SimDevice>>,
    pub robots: Vec<Arc<SimRobot>>,
    pub handoffs: Vec<Arc<HandoffLocation>>,
    pub worklists: Vec<Worklist>,
}

impl LabConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read lab config {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("invalid lab config {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-check names and parse every duration and URL.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.scheduler.validate()?;

        let mut device_names = BTreeSet::new();
        for device in &self.devices {
            ensure!(
                device_names.insert(device.name.as_str()),
                "duplicate device {}",
                device.name
            );
            if let Some(t) = &device.processing_time {
                parse_duration(t).with_context(|| format!("device {}", device.name))?;
            }
            if let Some(t) = &device.poll_interval {
                parse_duration(t).with_context(|| format!("device {}", device.name))?;
            }
            match &device.node_url {
                Some(url) => {
                    RestNodeClient::new(url.as_str())
                        .with_context(|| format!("device {}", device.name))?;
                    if device.locations.iter().any(|l| !l.places.is_empty()) {
                        bail!("node device {} cannot declare places", device.name);
                    }
                }
                None if device.poll_interval.is_some() => {
                    bail!("device {} sets poll_interval without node_url", device.name);
                }
                None => {}
            }
        }

        let mut robot_names = BTreeSet::new();
        for robot in &self.robots {
            ensure!(
                robot_names.insert(robot.name.as_str()),
                "duplicate robot {}",
                robot.name
            );
            ensure!(robot.weight > 0.0, "robot {} needs a positive weight", robot.name);
            for device in robot.reach.iter().flatten() {
                ensure!(
                    device_names.contains(device.as_str()),
                    "robot {} reaches unknown device {device}",
                    robot.name
                );
            }
            if let Some(t) = &robot.transfer_time {
                parse_duration(t).with_context(|| format!("robot {}", robot.name))?;
            }
        }

        for handoff in &self.handoffs {
            let Some(device) = self.devices.iter().find(|d| d.name == handoff.device) else {
                bail!("handoff {} names unknown device {}", handoff.name, handoff.device);
            };
            ensure!(
                device.node_url.is_none(),
                "handoff {} must sit on a simulated device",
                handoff.name
            );
            ensure!(
                handoff.robots.len() >= 2,
                "handoff {} needs at least two robots",
                handoff.name
            );
            for robot in &handoff.robots {
                ensure!(
                    robot_names.contains(robot.as_str()),
                    "handoff {} names unknown robot {robot}",
                    handoff.name
                );
            }
        }

        for worklist in &self.worklists {
            for wp in &worklist.workflow_plates {
                ensure!(
                    !wp.tasks.is_empty(),
                    "workflow plate {} in {} has no tasks",
                    wp.barcode,
                    worklist.name
                );
            }
        }
        Ok(())
    }

    /// Register every device and robot and create the worklists.
    pub fn build(&self) -> anyhow::Result<Lab> {
        let devices = Arc::new(DeviceManager::new());

        let handoffs: Vec<(Arc<HandoffLocation>, &HandoffConfig)> = self
            .handoffs
            .iter()
            .map(|h| {
                let location = HandoffLocation::new(h.name.as_str(), h.device.as_str(), h.robots.iter().cloned());
                (Arc::new(location), h)
            })
            .collect();

        let mut sim_devices = Vec::new();
        for config in &self.devices {
            match &config.node_url {
                Some(url) => {
                    let node: Arc<dyn NodeClient> = Arc::new(RestNodeClient::new(url.as_str())?);
                    let device = Arc::new(node_device(config, Arc::clone(&node))?);
                    devices.register_node(config.name.as_str(), node);
                    register(&devices, device, config.accessible);
                    debug!(device = %config.name, %url, "node device registered");
                }
                None => {
                    let mut device = SimDevice::new(config.name.as_str(), config.product.as_str())
                        .with_locations(config.slots);
                    for location in &config.locations {
                        device = device.with_location(PlateLocation::with_places(
                            location.name.as_str(),
                            config.name.as_str(),
                            location.places.iter().cloned(),
                        ));
                    }
                    for (handoff, _) in handoffs.iter().filter(|(_, h)| h.device == config.name) {
                        device = device.with_handoff(handoff);
                    }
                    if let Some(t) = &config.processing_time {
                        device = device.with_processing_time(parse_duration(t)?);
                    }
                    let device = Arc::new(device);
                    register(&devices, Arc::clone(&device), config.accessible);
                    sim_devices.push(device);
                }
            }
        }

        let mut robots = Vec::new();
        for config in &self.robots {
            let mut robot = SimRobot::new(config.name.as_str())
                .with_weight(config.weight)
                .with_transfer_time(config.transfer_time()?);
            if let Some(reach) = &config.reach {
                robot = robot.with_reach(reach.iter().cloned());
            }
            for (handoff, _) in handoffs.iter().filter(|(h, _)| h.is_accessible_by(&config.name)) {
                robot = robot.with_handoff(Arc::clone(handoff));
            }
            let robot = Arc::new(robot);
            devices.register_robot(Arc::clone(&robot));
            robots.push(robot);
        }

        let worklists: Vec<Worklist> = self.worklists.iter().map(WorklistConfig::build).collect();

        info!(
            devices = self.devices.len(),
            robots = robots.len(),
            handoffs = handoffs.len(),
            worklists = worklists.len(),
            "lab built"
        );
        Ok(Lab {
            devices,
            sim_devices,
            robots,
            handoffs: handoffs.into_iter().map(|(h, _)| h).collect(),
            worklists,
        })
    }
}

fn node_device(config: &DeviceConfig, node: Arc<dyn NodeClient>) -> anyhow::Result<NodeDevice> {
    let mut device = NodeDevice::new(config.name.as_str(), config.product.as_str(), node);
    for i in 0..config.slots {
        device = device.with_location(&i.to_string());
    }
    for location in &config.locations {
        let suffix = location
            .name
            .strip_prefix(&format!("{}_", config.name))
            .unwrap_or(&location.name);
        device = device.with_location(suffix);
    }
    if let Some(t) = &config.poll_interval {
        device = device.with_polling(parse_duration(t)?);
    }
    Ok(device)
}

fn register<D>(devices: &DeviceManager, device: Arc<D>, accessible: bool)
where
    D: AccessibleDevice + 'static,
{
    if accessible {
        devices.register_accessible_device(device);
    } else {
        devices.register_device(device);
    }
}

impl WorklistConfig {
    fn plate(&self, barcode: &str) -> Plate {
        Plate::new(barcode, self.labware.as_str(), self.labware_format.as_str())
    }

    pub fn build(&self) -> Worklist {
        let mut worklist = if self.transfers.is_empty() {
            Worklist::new(self.name.as_str())
        } else {
            let transfers = self
                .transfers
                .iter()
                .map(|t| Transfer {
                    source_well: t.source_well.clone(),
                    destination_well: t.destination_well.clone(),
                    volume: t.volume,
                    ..Transfer::new(self.plate(&t.source), self.plate(&t.destination))
                })
                .collect();
            create_worklist_from_transfer_overview(
                self.name.as_str(),
                TransferOverview::from_transfers(transfers, self.tasks.clone()),
            )
        };
        for wp in &self.workflow_plates {
            let labware = wp.labware.as_deref().unwrap_or(&self.labware);
            let plate = Plate::new(wp.barcode.as_str(), labware, self.labware_format.as_str());
            worklist.add_workflow_plate(plate, wp.tasks.clone());
        }
        worklist
    }
}

impl RobotConfig {
    pub fn transfer_time(&self) -> anyhow::Result<Duration> {
        match &self.transfer_time {
            Some(t) => Ok(parse_duration(t)?),
            None => Ok(Duration::ZERO),
        }
    }
}
