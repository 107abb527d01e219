//! Active plate factories.
//!
//! One factory per plate role per worklist run. A factory knows which
//! plates it still has to bring into play and mints them one at a time,
//! subject to its concurrency cap:
//!
//! ```text
//! source       unique source barcodes       pre-hitpick, source_hitpick, post-hitpick
//! destination  unique destination barcodes  pre-hitpick, destination_hitpick, post-hitpick
//! workflow     worklist workflow plates     each plate's own task list
//! ```
//!
//! The hitpick task is created once per factory, so every plate of a role
//! shares its id. That shared identity is what the plate scheduler's
//! lower-instance-first rule keys on.

use std::sync::Arc;

use plategrid_core::{ActivePlate, Plate, PlateRole, PlateTask, SchedulerConfig, Task, Worklist};
use tracing::debug;

use crate::registry::ActivePlateRegistry;

pub struct ActivePlateFactory {
    role: PlateRole,
    entries: Vec<(Plate, Vec<Task>)>,
    next: usize,
    max_simultaneous: usize,
    registry: Arc<ActivePlateRegistry>,
}

impl ActivePlateFactory {
    pub fn source(
        worklist: &Worklist,
        config: &SchedulerConfig,
        registry: Arc<ActivePlateRegistry>,
    ) -> Self {
        let hitpick: Task = PlateTask::new(&config.hitpick_device_type, "source_hitpick").into();
        let (plates, tasks) = match &worklist.transfer_overview {
            Some(overview) => (
                overview.unique_source_plates(),
                overview.tasks.source_todo_list(hitpick),
            ),
            None => (worklist.source_plates.clone(), vec![hitpick]),
        };
        Self::shared_tasks(
            PlateRole::Source,
            plates,
            tasks,
            config.max_active_source_plates,
            registry,
        )
    }

    pub fn destination(
        worklist: &Worklist,
        config: &SchedulerConfig,
        registry: Arc<ActivePlateRegistry>,
    ) -> Self {
        let hitpick: Task =
            PlateTask::new(&config.hitpick_device_type, "destination_hitpick").into();
        let (plates, tasks) = match &worklist.transfer_overview {
            Some(overview) => (
                overview.unique_destination_plates(),
                overview.tasks.destination_todo_list(hitpick),
            ),
            None => (worklist.destination_plates.clone(), vec![hitpick]),
        };
        Self::shared_tasks(
            PlateRole::Destination,
            plates,
            tasks,
            config.max_active_destination_plates,
            registry,
        )
    }

    pub fn workflow(
        worklist: &Worklist,
        config: &SchedulerConfig,
        registry: Arc<ActivePlateRegistry>,
    ) -> Self {
        Self {
            role: PlateRole::Workflow,
            entries: worklist
                .workflow_plates
                .iter()
                .map(|wp| (wp.plate.clone(), wp.tasks.clone()))
                .collect(),
            next: 0,
            max_simultaneous: config.max_active_workflow_plates,
            registry,
        }
    }

    fn shared_tasks(
        role: PlateRole,
        plates: Vec<Plate>,
        tasks: Vec<Task>,
        max_simultaneous: usize,
        registry: Arc<ActivePlateRegistry>,
    ) -> Self {
        Self {
            role,
            entries: plates.into_iter().map(|p| (p, tasks.clone())).collect(),
            next: 0,
            max_simultaneous,
            registry,
        }
    }

    /// All three factories for a worklist run.
    pub fn for_worklist(
        worklist: &Worklist,
        config: &SchedulerConfig,
        registry: &Arc<ActivePlateRegistry>,
    ) -> Vec<Self> {
        vec![
            Self::source(worklist, config, Arc::clone(registry)),
            Self::destination(worklist, config, Arc::clone(registry)),
            Self::workflow(worklist, config, Arc::clone(registry)),
        ]
    }

    pub fn role(&self) -> PlateRole {
        self.role
    }

    pub fn max_simultaneous(&self) -> usize {
        self.max_simultaneous
    }

    /// Plates this factory has not minted yet.
    pub fn plates_to_create(&self) -> usize {
        self.entries.len() - self.next
    }

    /// Mint and register the next plate, ignoring the cap. `None` once
    /// every plate has been created.
    pub fn create_active_plate(&mut self) -> Option<Arc<ActivePlate>> {
        let candidate = self.next_candidate()?;
        let plate = self.registry.register(candidate);
        self.advance(&plate);
        Some(plate)
    }

    /// `true` while fewer than `max_simultaneous` plates of this role are
    /// active.
    pub fn release_active_plate(&self) -> bool {
        self.registry.count_role(self.role) < self.max_simultaneous
    }

    /// Create the next plate only if release is permitted. The cap check
    /// and the registration happen under one registry lock.
    pub fn try_release_active_plate(&mut self) -> Option<Arc<ActivePlate>> {
        let candidate = self.next_candidate()?;
        let plate = self
            .registry
            .admit_if_below(self.role, self.max_simultaneous, candidate)?;
        self.advance(&plate);
        Some(plate)
    }

    fn next_candidate(&self) -> Option<impl FnOnce(u64) -> ActivePlate + use<>> {
        let (plate, tasks) = self.entries.get(self.next)?.clone();
        let (index, role) = (self.next, self.role);
        Some(move |serial| ActivePlate::new(serial, index, role, Some(plate), tasks))
    }

    fn advance(&mut self, plate: &ActivePlate) {
        self.next += 1;
        debug!(
            plate = %plate,
            serial = plate.serial(),
            barcode = %plate.barcode(),
            remaining = self.plates_to_create(),
            "active plate released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plategrid_core::{Transfer, TransferOverview, TransferTasks, WaitTask};

    fn plate(barcode: &str) -> Plate {
        Plate::new(barcode, "Costar 96", "96")
    }

    fn overview_worklist() -> Worklist {
        let tasks = TransferTasks {
            source_prehitpick_tasks: vec![PlateTask::new("Storage", "fetch").into()],
            destination_posthitpick_tasks: vec![PlateTask::new("Sealer", "seal").into()],
            ..TransferTasks::default()
        };
        let transfers = vec![
            Transfer::new(plate("SRC001"), plate("DST001")).with_volume(10.0),
            Transfer::new(plate("SRC001"), plate("DST002")).with_volume(5.0),
            Transfer::new(plate("SRC002"), plate("DST001")).with_volume(2.5),
        ];
        plategrid_core::create_worklist_from_transfer_overview(
            "W1",
            TransferOverview::from_transfers(transfers, tasks),
        )
    }

    #[test]
    fn counts_distinct_barcodes() {
        let registry = Arc::new(ActivePlateRegistry::new());
        let config = SchedulerConfig::default();
        let worklist = overview_worklist();
        let source = ActivePlateFactory::source(&worklist, &config, Arc::clone(&registry));
        let destination = ActivePlateFactory::destination(&worklist, &config, registry);
        assert_eq!(source.plates_to_create(), 2);
        assert_eq!(destination.plates_to_create(), 2);
        assert_eq!(source.max_simultaneous(), 3);
        assert_eq!(destination.max_simultaneous(), 2);
    }

    #[test]
    fn todo_lists_wrap_the_hitpick() {
        let registry = Arc::new(ActivePlateRegistry::new());
        let config = SchedulerConfig::default();
        let worklist = overview_worklist();
        let mut source = ActivePlateFactory::source(&worklist, &config, registry);

        let plate = source.try_release_active_plate().unwrap();
        assert_eq!(plate.task_count(), 2);
        assert_eq!(plate.barcode(), "SRC001");
        assert_eq!(plate.current_todo().unwrap().describe(), "Storage:fetch");
        plate.advance_current_todo();
        assert_eq!(plate.current_todo().unwrap().describe(), "Bumblebee:source_hitpick");
    }

    #[test]
    fn plates_of_a_role_share_task_ids() {
        let registry = Arc::new(ActivePlateRegistry::new());
        let config = SchedulerConfig::default();
        let worklist = overview_worklist();
        let mut destination = ActivePlateFactory::destination(&worklist, &config, registry);

        let a = destination.try_release_active_plate().unwrap();
        let b = destination.try_release_active_plate().unwrap();
        assert_eq!(a.current_task_id(), b.current_task_id());
        assert_eq!((a.instance_index(), b.instance_index()), (0, 1));

        // Completing one plate's task leaves the other's copy untouched.
        a.mark_job_completed();
        assert_eq!(a.completed_task_count(), 1);
        assert_eq!(b.completed_task_count(), 0);
    }

    #[test]
    fn cap_limits_release_until_plates_finish() {
        let registry = Arc::new(ActivePlateRegistry::new());
        let config = SchedulerConfig {
            max_active_source_plates: 1,
            ..SchedulerConfig::default()
        };
        let worklist = overview_worklist();
        let mut source = ActivePlateFactory::source(&worklist, &config, Arc::clone(&registry));

        let first = source.try_release_active_plate().unwrap();
        assert!(source.try_release_active_plate().is_none());
        assert_eq!(source.plates_to_create(), 1);

        first.mark_job_completed();
        first.mark_job_completed();
        registry.remove_finished();
        let second = source.try_release_active_plate().unwrap();
        assert_eq!(second.barcode(), "SRC002");
        assert_eq!(source.plates_to_create(), 0);
        assert!(source.try_release_active_plate().is_none());
    }

    #[test]
    fn release_is_a_cap_predicate() {
        let registry = Arc::new(ActivePlateRegistry::new());
        let config = SchedulerConfig {
            max_active_source_plates: 1,
            ..SchedulerConfig::default()
        };
        let worklist = overview_worklist();
        let mut source = ActivePlateFactory::source(&worklist, &config, Arc::clone(&registry));
        assert!(source.release_active_plate());

        let first = source.try_release_active_plate().unwrap();
        assert!(!source.release_active_plate());
        assert!(!source.release_active_plate());
        assert_eq!(registry.count_role(PlateRole::Source), 1);
        assert_eq!(source.plates_to_create(), 1);

        first.mark_job_completed();
        first.mark_job_completed();
        registry.remove_finished();
        assert!(source.release_active_plate());
    }

    #[test]
    fn create_consumes_until_exhausted() {
        let registry = Arc::new(ActivePlateRegistry::new());
        let config = SchedulerConfig::default();
        let worklist = overview_worklist();
        let mut source = ActivePlateFactory::source(&worklist, &config, Arc::clone(&registry));
        assert_eq!(source.plates_to_create(), 2);

        let first = source.create_active_plate().unwrap();
        assert_eq!(source.plates_to_create(), 1);
        assert_eq!((first.barcode(), first.instance_index()), ("SRC001", 0));

        let second = source.create_active_plate().unwrap();
        assert_eq!(source.plates_to_create(), 0);
        assert_eq!((second.barcode(), second.instance_index()), ("SRC002", 1));

        assert!(source.create_active_plate().is_none());
        assert!(source.try_release_active_plate().is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn try_release_at_cap_creates_nothing() {
        let registry = Arc::new(ActivePlateRegistry::new());
        let config = SchedulerConfig {
            max_active_source_plates: 0,
            ..SchedulerConfig::default()
        };
        let worklist = overview_worklist();
        let mut source = ActivePlateFactory::source(&worklist, &config, Arc::clone(&registry));
        assert!(!source.release_active_plate());
        assert!(source.try_release_active_plate().is_none());
        assert_eq!(source.plates_to_create(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn without_overview_every_listed_plate_counts() {
        let registry = Arc::new(ActivePlateRegistry::new());
        let config = SchedulerConfig::default();
        let mut worklist = Worklist::new("plain");
        worklist.add_source_plate(plate("A"));
        worklist.add_source_plate(plate("B"));
        let mut source = ActivePlateFactory::source(&worklist, &config, registry);
        assert_eq!(source.plates_to_create(), 2);

        let created = source.create_active_plate().unwrap();
        assert_eq!(created.barcode(), "A");
        assert_eq!(created.task_count(), 1);
    }

    #[test]
    fn workflow_plates_keep_their_own_tasks() {
        let registry = Arc::new(ActivePlateRegistry::new());
        let config = SchedulerConfig::default();
        let mut worklist = Worklist::new("handoff");
        worklist.add_workflow_plate(
            plate("WF001"),
            vec![
                PlateTask::new("PlanarProcessingArea", "move").into(),
                WaitTask::new(10.0, "process").into(),
            ],
        );
        let factories = ActivePlateFactory::for_worklist(&worklist, &config, &registry);
        let counts: Vec<usize> = factories.iter().map(|f| f.plates_to_create()).collect();
        assert_eq!(counts, vec![0, 0, 1]);

        let mut workflow = ActivePlateFactory::workflow(&worklist, &config, registry);
        let plate = workflow.try_release_active_plate().unwrap();
        assert_eq!(plate.role(), PlateRole::Workflow);
        assert_eq!(plate.task_count(), 2);
    }
}
