//! Shared list of active plates.
//!
//! The plate list and the serial counter live behind one mutex, so
//! count-then-insert (the concurrency cap check) is a single critical
//! section.

use std::sync::{Arc, Mutex};

use plategrid_core::{ActivePlate, PlateRole};

#[derive(Default)]
struct Inner {
    plates: Vec<Arc<ActivePlate>>,
    next_serial: u64,
}

#[derive(Default)]
pub struct ActivePlateRegistry {
    inner: Mutex<Inner>,
}

impl ActivePlateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and insert a plate if fewer than `cap` plates of `role` are
    /// active. `build` receives the serial number to use.
    pub fn admit_if_below<F>(&self, role: PlateRole, cap: usize, build: F) -> Option<Arc<ActivePlate>>
    where
        F: FnOnce(u64) -> ActivePlate,
    {
        let mut inner = self.lock();
        let active = inner.plates.iter().filter(|p| p.role() == role).count();
        if active >= cap {
            return None;
        }
        Some(Self::insert(&mut inner, build))
    }

    /// Build and insert a plate unconditionally.
    pub fn register<F>(&self, build: F) -> Arc<ActivePlate>
    where
        F: FnOnce(u64) -> ActivePlate,
    {
        let mut inner = self.lock();
        Self::insert(&mut inner, build)
    }

    fn insert<F>(inner: &mut Inner, build: F) -> Arc<ActivePlate>
    where
        F: FnOnce(u64) -> ActivePlate,
    {
        let serial = inner.next_serial;
        inner.next_serial += 1;
        let plate = Arc::new(build(serial));
        inner.plates.push(Arc::clone(&plate));
        plate
    }

    /// Remove and return every finished plate.
    pub fn remove_finished(&self) -> Vec<Arc<ActivePlate>> {
        let mut inner = self.lock();
        let (finished, active): (Vec<_>, Vec<_>) =
            inner.plates.drain(..).partition(|p| p.is_finished());
        inner.plates = active;
        finished
    }

    pub fn remove(&self, plate: &Arc<ActivePlate>) -> bool {
        let mut inner = self.lock();
        let before = inner.plates.len();
        inner.plates.retain(|p| !Arc::ptr_eq(p, plate));
        inner.plates.len() != before
    }

    pub fn snapshot(&self) -> Vec<Arc<ActivePlate>> {
        self.lock().plates.clone()
    }

    pub fn count_role(&self, role: PlateRole) -> usize {
        self.lock().plates.iter().filter(|p| p.role() == role).count()
    }

    pub fn len(&self) -> usize {
        self.lock().plates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("active plate registry poisoned")
    }
}
