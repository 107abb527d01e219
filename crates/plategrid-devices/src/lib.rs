//! plategrid-devices — the contract between the schedulers and the world.
//!
//! The schedulers never talk to hardware directly. They interrogate and
//! command devices, robots, and remote nodes only through the traits in
//! this crate:
//!
//! - **`device`**: `Device`, `PlateSchedulerDevice`, `AccessibleDevice`, `Robot`
//! - **`manager`**: `DeviceManager`, the name → device/robot/node registry
//! - **`node`**: the `NodeClient` contract and its wire types
//! - **`rest`**: `RestNodeClient`, the HTTP realisation of `NodeClient`
//! - **`local_node`**: `LocalNode`, an in-process node with an idempotent job store
//! - **`node_server`**: axum router serving the node contract over HTTP
//! - **`node_device`**: `NodeDevice`, a schedulable device backed by a node
//! - **`sim`**: simulated devices and robots for demos and tests
//!
//! # Failure semantics
//!
//! Every driver call may fail. Callers treat a failure as "this option is
//! unavailable" and move on; nothing in this crate retries on its own.

pub mod device;
pub mod error;
pub mod local_node;
pub mod manager;
pub mod node;
pub mod node_device;
pub mod node_server;
pub mod rest;
pub mod sim;

pub use device::{AccessibleDevice, Device, Endpoint, PlateSchedulerDevice, Robot, TransferRequest};
pub use error::{DeviceError, DeviceResult, NodeError, NodeResult};
pub use local_node::LocalNode;
pub use manager::DeviceManager;
pub use node::{
    ActionStatus, NodeAction, NodeActionRequest, NodeActionResponse, NodeClient, NodeDefinition,
};
pub use node_device::NodeDevice;
pub use node_server::node_router;
pub use rest::RestNodeClient;
pub use sim::{SimDevice, SimRobot};
