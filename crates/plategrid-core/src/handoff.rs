//! Handoff locations: slots where one robot sets a plate down for another.
//!
//! Only robots listed at construction may drive the handoff state, and the
//! transitions are strictly ordered:
//!
//! ```text
//! Free ──mark_waiting_for_pickup──▶ WaitingForPickup ──mark_picked_up──▶ Occupied ──mark_free──▶ Free
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::plate::PlateLocation;

/// Handoff progress, with the robot responsible for the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffState {
    Free,
    /// A plate was set down by `robot` and waits for the other robot.
    WaitingForPickup { robot: String },
    /// The plate was picked up by `robot` and the slot is still held.
    Occupied { robot: String },
}

impl HandoffState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffState::Free => "free",
            HandoffState::WaitingForPickup { .. } => "waiting_for_pickup",
            HandoffState::Occupied { .. } => "occupied",
        }
    }
}

/// A `PlateLocation` shared by a fixed set of robots.
#[derive(Debug)]
pub struct HandoffLocation {
    location: Arc<PlateLocation>,
    accessible_by: BTreeSet<String>,
    state: Mutex<HandoffState>,
}

impl HandoffLocation {
    pub fn new<I, S>(name: impl Into<String>, device_name: impl Into<String>, robots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_location(PlateLocation::new(name, device_name), robots)
    }

    pub fn from_location<I, S>(location: PlateLocation, robots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            location: Arc::new(location),
            accessible_by: robots.into_iter().map(Into::into).collect(),
            state: Mutex::new(HandoffState::Free),
        }
    }

    /// The underlying location, as handed to schedulers and the planner.
    pub fn location(&self) -> Arc<PlateLocation> {
        Arc::clone(&self.location)
    }

    pub fn name(&self) -> &str {
        self.location.name()
    }

    pub fn accessible_by(&self) -> &BTreeSet<String> {
        &self.accessible_by
    }

    pub fn is_accessible_by(&self, robot: &str) -> bool {
        self.accessible_by.contains(robot)
    }

    pub fn state(&self) -> HandoffState {
        self.state.lock().expect("handoff state mutex poisoned").clone()
    }

    /// `robot` has set a plate down; the slot now waits for pickup.
    pub fn mark_waiting_for_pickup(&self, robot: &str) -> CoreResult<()> {
        self.ensure_listed(robot)?;
        let mut state = self.state.lock().expect("handoff state mutex poisoned");
        if *state != HandoffState::Free {
            return Err(self.error(format!(
                "cannot drop off while {}",
                state.as_str()
            )));
        }
        *state = HandoffState::WaitingForPickup {
            robot: robot.to_string(),
        };
        self.location.set_occupied();
        debug!(location = %self.name(), %robot, "handoff waiting for pickup");
        Ok(())
    }

    /// `robot` has picked the waiting plate up.
    pub fn mark_picked_up(&self, robot: &str) -> CoreResult<()> {
        self.ensure_listed(robot)?;
        let mut state = self.state.lock().expect("handoff state mutex poisoned");
        if !matches!(*state, HandoffState::WaitingForPickup { .. }) {
            return Err(self.error(format!("cannot pick up while {}", state.as_str())));
        }
        *state = HandoffState::Occupied {
            robot: robot.to_string(),
        };
        debug!(location = %self.name(), %robot, "handoff picked up");
        Ok(())
    }

    /// The robot that picked the plate up releases the slot.
    pub fn mark_free(&self, robot: &str) -> CoreResult<()> {
        self.ensure_listed(robot)?;
        let mut state = self.state.lock().expect("handoff state mutex poisoned");
        match &*state {
            HandoffState::Occupied { robot: holder } if holder == robot => {}
            HandoffState::Occupied { robot: holder } => {
                return Err(self.error(format!("held by {holder}, not {robot}")));
            }
            other => {
                return Err(self.error(format!("cannot free while {}", other.as_str())));
            }
        }
        *state = HandoffState::Free;
        self.location.clear_occupied();
        debug!(location = %self.name(), %robot, "handoff free");
        Ok(())
    }

    fn ensure_listed(&self, robot: &str) -> CoreResult<()> {
        if self.is_accessible_by(robot) {
            Ok(())
        } else {
            Err(self.error(format!("robot {robot} is not allowed here")))
        }
    }

    fn error(&self, reason: String) -> CoreError {
        CoreError::Handoff {
            location: self.name().to_string(),
            reason,
        }
    }
}
