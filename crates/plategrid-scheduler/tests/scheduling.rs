//! End-to-end scheduling against simulated devices and robots.
//!
//! Every test runs on a paused clock so processing delays and wait tasks
//! complete instantly in wall time.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use plategrid_core::{
    ActivePlate, HandoffLocation, HandoffState, Plate, PlateRole, PlateTask, SchedulerConfig, Transfer,
    TransferOverview, TransferTasks, WaitTask, Worklist, create_worklist_from_transfer_overview,
};
use plategrid_devices::{DeviceManager, PlateSchedulerDevice, SimDevice, SimRobot};
use plategrid_scheduler::{ActivePlateRegistry, PlateScheduler, RobotScheduler};
use tokio::sync::oneshot;

struct Lab {
    devices: Arc<DeviceManager>,
    registry: Arc<ActivePlateRegistry>,
    robots: Arc<RobotScheduler>,
    plates: PlateScheduler,
    finished: Arc<Mutex<Vec<String>>>,
}

impl Lab {
    fn new(config: SchedulerConfig, devices: Arc<DeviceManager>) -> Self {
        let registry = Arc::new(ActivePlateRegistry::new());
        let robots = Arc::new(RobotScheduler::new(Arc::clone(&devices), &config).unwrap());
        let plates = PlateScheduler::new(
            config,
            Arc::clone(&devices),
            Arc::clone(&robots),
            Arc::clone(&registry),
        )
        .unwrap();

        let finished = Arc::new(Mutex::new(Vec::new()));
        {
            let finished = Arc::clone(&finished);
            plates.add_plate_finished_callback(Arc::new(move |plate: &ActivePlate| {
                finished.lock().unwrap().push(plate.barcode().to_string());
            }));
        }

        robots.start_scheduler().unwrap();
        plates.start_scheduler().unwrap();
        Self {
            devices,
            registry,
            robots,
            plates,
            finished,
        }
    }

    /// Queue a worklist and return a receiver fired on completion.
    fn submit(&self, worklist: Worklist) -> (Arc<Worklist>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        worklist.add_completion_callback(move |_| {
            let _ = tx.send(());
        });
        let worklist = Arc::new(worklist);
        self.plates.enqueue_worklist(Arc::clone(&worklist));
        (worklist, rx)
    }

    fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    async fn shutdown(self) {
        self.plates.stop_scheduler().await.unwrap();
        self.robots.stop_scheduler().await.unwrap();
    }
}

async fn completes(rx: oneshot::Receiver<()>) {
    tokio::time::timeout(Duration::from_secs(120), rx)
        .await
        .expect("worklist did not complete")
        .unwrap();
}

fn plate(barcode: &str) -> Plate {
    Plate::new(barcode, "Costar 96", "96")
}

struct Hitpick {
    devices: Arc<DeviceManager>,
    hotel: Arc<SimDevice>,
    bumblebee: Arc<SimDevice>,
    robot: Arc<SimRobot>,
}

fn hitpick_lab(hotel_slots: usize, bumblebee_slots: usize) -> Hitpick {
    hitpick_lab_with(
        SimDevice::new("Hotel", "Storage").with_locations(hotel_slots),
        bumblebee_slots,
    )
}

fn hitpick_lab_with(hotel: SimDevice, bumblebee_slots: usize) -> Hitpick {
    let devices = Arc::new(DeviceManager::new());
    let hotel = Arc::new(hotel);
    let bumblebee = Arc::new(SimDevice::new("BB", "Bumblebee").with_locations(bumblebee_slots));
    let robot = Arc::new(SimRobot::new("PF400"));
    devices.register_accessible_device(Arc::clone(&hotel));
    devices.register_accessible_device(Arc::clone(&bumblebee));
    devices.register_robot(Arc::clone(&robot));
    Hitpick {
        devices,
        hotel,
        bumblebee,
        robot,
    }
}

fn single_transfer(name: &str, src: &str, dst: &str) -> Worklist {
    let tasks = TransferTasks {
        source_prehitpick_tasks: vec![PlateTask::new("Storage", "fetch").into()],
        destination_prehitpick_tasks: vec![PlateTask::new("Storage", "fetch").into()],
        ..TransferTasks::default()
    };
    create_worklist_from_transfer_overview(
        name,
        TransferOverview::from_transfers(
            vec![Transfer::new(plate(src), plate(dst)).with_volume(10.0)],
            tasks,
        ),
    )
}

// A finished plate keeps its last location occupied, so the hitpick device
// needs a slot for each plate of the transfer. See
// `single_slot_hitpick_device_stalls`.
#[tokio::test(start_paused = true)]
async fn single_transfer_runs_to_completion() {
    let lab_devices = hitpick_lab(4, 2);
    let lab = Lab::new(SchedulerConfig::default(), Arc::clone(&lab_devices.devices));

    let completions = Arc::new(AtomicUsize::new(0));
    let worklist = single_transfer("W1", "SRC001", "DST001");
    {
        let completions = Arc::clone(&completions);
        worklist.add_completion_callback(move |_| {
            completions.fetch_add(1, Ordering::SeqCst);
        });
    }
    let (worklist, rx) = lab.submit(worklist);
    completes(rx).await;

    assert!(worklist.is_complete());
    assert_eq!(completions.load(Ordering::SeqCst), 1);

    let mut finished = lab.finished();
    finished.sort();
    assert_eq!(finished, vec!["DST001", "SRC001"]);
    assert!(lab.registry.is_empty());

    let history = lab_devices.robot.history();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|t| t.src_device == "Hotel" && t.dst_device == "BB"));

    let mut commands: Vec<String> = lab_devices
        .bumblebee
        .jobs()
        .into_iter()
        .map(|j| j.command)
        .collect();
    commands.sort();
    assert_eq!(commands, vec!["destination_hitpick", "source_hitpick"]);
    assert_eq!(lab_devices.hotel.jobs().len(), 2);

    lab.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn single_slot_hitpick_device_stalls() {
    let lab_devices = hitpick_lab(4, 1);
    let lab = Lab::new(SchedulerConfig::default(), Arc::clone(&lab_devices.devices));
    let (worklist, rx) = lab.submit(single_transfer("W1", "SRC001", "DST001"));

    // The first plate finishes on the only slot and never leaves it.
    let waited = tokio::time::timeout(Duration::from_secs(600), rx).await;
    assert!(waited.is_err());
    assert!(!worklist.is_complete());
    assert_eq!(lab.finished().len(), 1);
    assert_eq!(lab.registry.len(), 1);
    assert_eq!(lab_devices.bumblebee.jobs().len(), 1);
    assert!(lab_devices.bumblebee.plate_location_info()[0].is_occupied());

    lab.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn worklists_run_in_submission_order() {
    let lab_devices = hitpick_lab(6, 4);
    let lab = Lab::new(SchedulerConfig::default(), Arc::clone(&lab_devices.devices));

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut receivers = Vec::new();
    for (name, src, dst) in [("W1", "SRC001", "DST001"), ("W2", "SRC002", "DST002")] {
        let worklist = single_transfer(name, src, dst);
        let order = Arc::clone(&order);
        worklist.add_completion_callback(move |w| {
            order.lock().unwrap().push(w.name().to_string());
        });
        receivers.push(lab.submit(worklist).1);
    }
    for rx in receivers {
        completes(rx).await;
    }

    assert_eq!(*order.lock().unwrap(), vec!["W1", "W2"]);
    assert_eq!(lab_devices.robot.history().len(), 4);
    lab.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn wait_tasks_do_not_block_other_plates() {
    let config = SchedulerConfig {
        max_active_workflow_plates: 2,
        ..SchedulerConfig::default()
    };
    let lab = Lab::new(config, Arc::new(DeviceManager::new()));

    let mut worklist = Worklist::new("waits");
    worklist.add_workflow_plate(plate("SLOW"), vec![WaitTask::new(10.0, "incubate").into()]);
    worklist.add_workflow_plate(plate("FAST"), vec![WaitTask::new(1.0, "settle").into()]);

    let started = tokio::time::Instant::now();
    let (_, rx) = lab.submit(worklist);
    completes(rx).await;

    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(started.elapsed() < Duration::from_secs(12));
    assert_eq!(lab.finished(), vec!["FAST", "SLOW"]);
    lab.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn source_plates_respect_the_cap() {
    let lab_devices = hitpick_lab_with(
        SimDevice::new("Hotel", "Storage")
            .with_locations(8)
            .with_processing_time(Duration::from_millis(200)),
        5,
    );
    let lab = Lab::new(SchedulerConfig::default(), Arc::clone(&lab_devices.devices));

    let tasks = TransferTasks {
        source_prehitpick_tasks: vec![PlateTask::new("Storage", "fetch").into()],
        source_posthitpick_tasks: vec![PlateTask::new("Storage", "store").into()],
        ..TransferTasks::default()
    };
    let transfers = (1..=5)
        .map(|i| Transfer::new(plate(&format!("SRC00{i}")), plate("DST001")).with_volume(1.0))
        .collect();
    let worklist = create_worklist_from_transfer_overview(
        "five-to-one",
        TransferOverview::from_transfers(transfers, tasks),
    );

    let done = Arc::new(AtomicBool::new(false));
    let peak = Arc::new(AtomicUsize::new(0));
    let sampler = {
        let registry = Arc::clone(&lab.registry);
        let done = Arc::clone(&done);
        let peak = Arc::clone(&peak);
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                peak.fetch_max(registry.count_role(PlateRole::Source), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    let (_, rx) = lab.submit(worklist);
    completes(rx).await;
    done.store(true, Ordering::SeqCst);
    sampler.await.unwrap();

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= 3, "peak of {peak} active source plates");
    assert_eq!(lab.finished().len(), 6);

    let stores = lab_devices
        .hotel
        .jobs().iter().filter(|j| j.command == "store").count();
    assert_eq!(stores, 5);
    lab.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_transfer_is_retried() {
    let lab_devices = hitpick_lab(4, 2);
    lab_devices.robot.fail_next_transfers(1);
    let lab = Lab::new(SchedulerConfig::default(), Arc::clone(&lab_devices.devices));

    let (_, rx) = lab.submit(single_transfer("W1", "SRC001", "DST001"));
    completes(rx).await;

    assert_eq!(lab.robots.stats().aborted, 1);
    assert_eq!(lab.robots.stats().moved, 2);
    assert_eq!(lab_devices.robot.history().len(), 2);
    assert_eq!(lab_devices.bumblebee.jobs().len(), 2);
    lab.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_device_job_is_retried() {
    let lab_devices = hitpick_lab(4, 2);
    lab_devices.bumblebee.set_failing(true);
    let lab = Lab::new(SchedulerConfig::default(), Arc::clone(&lab_devices.devices));

    let (worklist, rx) = lab.submit(single_transfer("W1", "SRC001", "DST001"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!worklist.is_complete());
    assert!(lab_devices.bumblebee.jobs().is_empty());

    lab_devices.bumblebee.set_failing(false);
    completes(rx).await;
    assert_eq!(lab_devices.bumblebee.jobs().len(), 2);
    // Plates stayed on the Bumblebee between attempts.
    assert_eq!(lab_devices.robot.history().len(), 2);
    lab.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn handoff_between_two_robots() {
    let devices = Arc::new(DeviceManager::new());
    let handoff = Arc::new(HandoffLocation::new(
        "Handoff",
        "Station",
        ["PF400", "PlanarMotor"],
    ));
    let hotel = Arc::new(SimDevice::new("Hotel", "Storage").with_locations(2));
    let station = Arc::new(SimDevice::new("Station", "HandoffStation").with_handoff(&handoff));
    let planar = Arc::new(
        SimDevice::new("PlanarArea", "PlanarProcessingArea")
            .with_locations(1)
            .with_processing_time(Duration::from_secs(5)),
    );
    devices.register_accessible_device(Arc::clone(&hotel));
    devices.register_accessible_device(Arc::clone(&station));
    devices.register_accessible_device(Arc::clone(&planar));

    let arm = Arc::new(
        SimRobot::new("PF400")
            .with_reach(["Hotel", "Station"])
            .with_handoff(Arc::clone(&handoff)),
    );
    let mover = Arc::new(
        SimRobot::new("PlanarMotor")
            .with_reach(["Station", "PlanarArea"])
            .with_handoff(Arc::clone(&handoff)),
    );
    devices.register_robot(Arc::clone(&arm));
    devices.register_robot(Arc::clone(&mover));

    let lab = Lab::new(SchedulerConfig::default(), Arc::clone(&devices));
    let mut worklist = Worklist::new("handoff");
    worklist.add_workflow_plate(
        plate("WF001"),
        vec![
            PlateTask::new("Storage", "fetch").into(),
            PlateTask::new("PlanarProcessingArea", "process").into(),
            PlateTask::new("Storage", "store").into(),
        ],
    );
    let (_, rx) = lab.submit(worklist);
    completes(rx).await;

    let arm_moves: Vec<(String, String)> = arm
        .history()
        .into_iter()
        .map(|t| (t.src_device, t.dst_device))
        .collect();
    assert_eq!(
        arm_moves,
        vec![
            ("Hotel".to_string(), "Station".to_string()),
            ("Station".to_string(), "Hotel".to_string()),
        ]
    );
    let mover_moves: Vec<(String, String)> = mover
        .history()
        .into_iter()
        .map(|t| (t.src_device, t.dst_device))
        .collect();
    assert_eq!(
        mover_moves,
        vec![
            ("Station".to_string(), "PlanarArea".to_string()),
            ("PlanarArea".to_string(), "Station".to_string()),
        ]
    );
    assert_eq!(handoff.state(), HandoffState::Free);
    assert!(!handoff.location().is_occupied());
    assert_eq!(planar.jobs().len(), 1);
    assert_eq!(planar.jobs()[0].command, "process");
    lab.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn missing_device_type_starves_until_registered() {
    let config = SchedulerConfig {
        starvation_threshold: Some("200ms".into()),
        ..SchedulerConfig::default()
    };
    let devices = Arc::new(DeviceManager::new());
    let lab = Lab::new(config, Arc::clone(&devices));

    let mut worklist = Worklist::new("seal");
    worklist.add_workflow_plate(plate("WF001"), vec![PlateTask::new("Sealer", "seal").into()]);
    let (worklist, rx) = lab.submit(worklist);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let starved = lab.plates.starved_plates();
    assert_eq!(starved.len(), 1);
    assert_eq!(starved[0].barcode, "WF001");
    assert_eq!(starved[0].task, "Sealer:seal");
    assert!(lab.plates.get_status().contains("Starved plates:"));
    assert!(!worklist.is_complete());

    let sealer = Arc::new(SimDevice::new("Sealer1", "Sealer").with_locations(1));
    lab.devices.register_accessible_device(Arc::clone(&sealer));
    completes(rx).await;

    assert!(lab.plates.starved_plates().is_empty());
    assert_eq!(sealer.jobs().len(), 1);
    lab.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stopping_mid_worklist_skips_completion() {
    let lab = Lab::new(SchedulerConfig::default(), Arc::new(DeviceManager::new()));
    let mut worklist = Worklist::new("long");
    worklist.add_workflow_plate(plate("WF001"), vec![WaitTask::new(600.0, "soak").into()]);
    let (worklist, _rx) = lab.submit(worklist);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(lab.registry.len(), 1);
    assert!(lab.plates.get_status().contains("WF001"));

    lab.plates.stop_scheduler().await.unwrap();
    assert!(!worklist.is_complete());
    assert!(lab.registry.is_empty());
    assert!(!lab.plates.get_status().contains("WF001"));
    lab.robots.stop_scheduler().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn restart_after_stop_runs_next_worklist() {
    let config = SchedulerConfig {
        max_active_workflow_plates: 1,
        ..SchedulerConfig::default()
    };
    let lab = Lab::new(config, Arc::new(DeviceManager::new()));
    let mut long = Worklist::new("long");
    long.add_workflow_plate(plate("WF001"), vec![WaitTask::new(600.0, "soak").into()]);
    let (long, _long_rx) = lab.submit(long);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(lab.registry.len(), 1);
    lab.plates.stop_scheduler().await.unwrap();
    assert!(!long.is_complete());

    // The interrupted plate no longer holds the only workflow slot.
    lab.plates.start_scheduler().unwrap();
    let mut short = Worklist::new("short");
    short.add_workflow_plate(plate("WF002"), vec![WaitTask::new(5.0, "settle").into()]);
    let (short, rx) = lab.submit(short);
    completes(rx).await;

    assert!(short.is_complete());
    assert_eq!(lab.finished(), vec!["WF002"]);
    assert!(lab.registry.is_empty());
    lab.shutdown().await;
}
