//! Physical plates and the places they can rest.
//!
//! A `PlateLocation` is a named slot on a device. It carries three
//! independent binary signals (`available`, `occupied`, `reserved`) and an
//! ordered list of `PlatePlace`s. Places refer back to their location by name
//! only; the location owns them.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// A physical plate. Read-only once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plate {
    pub barcode: String,
    pub labware_name: String,
    /// e.g. "96-well", "384-well".
    pub labware_format: String,
    #[serde(default = "default_lidded")]
    pub currently_lidded: bool,
}

fn default_lidded() -> bool {
    true
}

impl Plate {
    pub fn new(
        barcode: impl Into<String>,
        labware_name: impl Into<String>,
        labware_format: impl Into<String>,
    ) -> Self {
        Self {
            barcode: barcode.into(),
            labware_name: labware_name.into(),
            labware_format: labware_format.into(),
            currently_lidded: true,
        }
    }
}

/// A named spot inside a location where a plate physically rests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatePlace {
    pub name: String,
    /// Name of the owning location.
    pub location_name: String,
}

/// A named slot on a device.
#[derive(Debug)]
pub struct PlateLocation {
    name: String,
    device_name: String,
    available: AtomicBool,
    occupied: AtomicBool,
    reserved: AtomicBool,
    places: Vec<PlatePlace>,
}

impl PlateLocation {
    /// Create a location with a single default place named `"{name}_place"`.
    pub fn new(name: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self::with_places(name, device_name, Vec::<String>::new())
    }

    /// Create a location with the given place names.
    ///
    /// An empty list yields one default place.
    pub fn with_places<I, S>(name: impl Into<String>, device_name: impl Into<String>, places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let mut places: Vec<PlatePlace> = places
            .into_iter()
            .map(|p| PlatePlace {
                name: p.into(),
                location_name: name.clone(),
            })
            .collect();
        if places.is_empty() {
            places.push(PlatePlace {
                name: format!("{name}_place"),
                location_name: name.clone(),
            });
        }

        Self {
            name,
            device_name: device_name.into(),
            available: AtomicBool::new(true),
            occupied: AtomicBool::new(false),
            reserved: AtomicBool::new(false),
            places,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn places(&self) -> &[PlatePlace] {
        &self.places
    }

    pub fn place(&self, name: &str) -> Option<&PlatePlace> {
        self.places.iter().find(|p| p.name == name)
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::SeqCst)
    }

    pub fn set_occupied(&self) {
        self.occupied.store(true, Ordering::SeqCst);
    }

    pub fn clear_occupied(&self) {
        self.occupied.store(false, Ordering::SeqCst);
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved.load(Ordering::SeqCst)
    }

    pub fn set_reserved(&self) {
        self.reserved.store(true, Ordering::SeqCst);
    }

    /// Atomically claim the reservation. Returns `false` if it was already held.
    pub fn try_reserve(&self) -> bool {
        self.reserved
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Clear the reservation.
    pub fn release(&self) {
        self.reserved.store(false, Ordering::SeqCst);
    }

    /// Key used by the path planner for one of this location's places.
    pub fn place_key(&self, place: &str) -> String {
        format!("{}:{}", self.name, place)
    }
}
