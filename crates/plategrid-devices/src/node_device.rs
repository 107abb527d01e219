//! A schedulable device backed by a remote node.
//!
//! The plate's current `PlateTask` becomes a node action: the task command
//! is the action name, the task parameters become the action args, and the
//! plate's position is passed in `locations`. Long-running instruments are
//! driven through `submit_action` and polled until the execution settles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use plategrid_core::{ActivePlate, PlateLocation, Task};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::device::{AccessibleDevice, Device, PlateSchedulerDevice};
use crate::error::{DeviceError, DeviceResult};
use crate::node::{ActionStatus, NodeActionRequest, NodeClient};

pub struct NodeDevice {
    name: String,
    product_name: String,
    node: Arc<dyn NodeClient>,
    locations: Vec<Arc<PlateLocation>>,
    poll_interval: Option<Duration>,
}

impl NodeDevice {
    pub fn new(
        name: impl Into<String>,
        product_name: impl Into<String>,
        node: Arc<dyn NodeClient>,
    ) -> Self {
        Self {
            name: name.into(),
            product_name: product_name.into(),
            node,
            locations: Vec::new(),
            poll_interval: None,
        }
    }

    /// Add a location named `"{device}_{suffix}"` with a single default place.
    pub fn with_location(mut self, suffix: &str) -> Self {
        let location = PlateLocation::new(format!("{}_{suffix}", self.name), self.name.clone());
        self.locations.push(Arc::new(location));
        self
    }

    /// Submit actions and poll their status at `interval` instead of
    /// calling them synchronously.
    pub fn with_polling(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    fn owns(&self, location: &Arc<PlateLocation>) -> bool {
        self.locations.iter().any(|l| Arc::ptr_eq(l, location))
    }

    fn failure(&self, message: impl Into<String>) -> DeviceError {
        DeviceError::Driver {
            device: self.name.clone(),
            message: message.into(),
        }
    }

    fn build_request(&self, plate: &ActivePlate) -> DeviceResult<NodeActionRequest> {
        let Some(Task::Plate(task)) = plate.current_todo() else {
            return Err(DeviceError::NoPlateTask {
                device: self.name.clone(),
                plate: plate.to_string(),
            });
        };

        let mut request = NodeActionRequest::new(task.command.clone());
        request.args = task.parameters.into_iter().collect::<Map<String, Value>>();
        request
            .locations
            .insert("barcode".into(), Value::String(plate.barcode().to_string()));
        if let Some(location) = plate.destination_location() {
            request
                .locations
                .insert("location".into(), Value::String(location.name().to_string()));
        }
        Ok(request)
    }

    async fn run_polled(&self, request: NodeActionRequest, interval: Duration) -> DeviceResult<()> {
        let submitted = self.node.submit_action(request).await;
        if !submitted.success {
            return Err(self.failure(submitted.error.unwrap_or_else(|| "submit rejected".into())));
        }
        let Some(execution_id) = submitted.execution_id else {
            return Err(self.failure("node returned no execution id"));
        };

        loop {
            let status = self.node.get_action_status(&execution_id).await;
            match status.status {
                ActionStatus::Succeeded => return Ok(()),
                ActionStatus::Failed | ActionStatus::Cancelled => {
                    return Err(self.failure(
                        status
                            .error
                            .unwrap_or_else(|| format!("execution {}", status.status)),
                    ));
                }
                ActionStatus::Queued | ActionStatus::Running => {
                    if !status.success {
                        return Err(self.failure(status.error.unwrap_or_default()));
                    }
                    debug!(device = %self.name, %execution_id, status = %status.status, "waiting on node");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl Device for NodeDevice {
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
        let request = self.build_request(&plate)?;
        let action = request.action.clone();
        info!(device = %self.name, plate = %plate, %action, "dispatching node action");

        match self.poll_interval {
            Some(interval) => self.run_polled(request, interval).await?,
            None => {
                let response = self.node.call_action(request).await;
                if !response.success {
                    let message = response.error.unwrap_or_else(|| "action failed".into());
                    warn!(device = %self.name, %action, error = %message, "node action failed");
                    return Err(self.failure(message));
                }
            }
        }

        plate.mark_job_completed();
        Ok(())
    }
}

impl PlateSchedulerDevice for NodeDevice {
    fn plate_location_info(&self) -> Vec<Arc<PlateLocation>> {
        self.locations.clone()
    }
}

impl AccessibleDevice for NodeDevice {}
