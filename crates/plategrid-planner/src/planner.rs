//! Transport graph over the places of accessible devices.

use std::collections::HashMap;
use std::sync::Arc;

use plategrid_core::{PlateLocation, PlatePlace};
use plategrid_devices::{DeviceManager, Endpoint, PlateSchedulerDevice, Robot};
use tracing::{debug, warn};

use crate::graph::Graph;

/// One place in the world, with its owning location and device.
#[derive(Clone)]
pub struct PathNode {
    /// `"{location}:{place}"`. Unique only together with the device name.
    pub key: String,
    pub device: Arc<dyn PlateSchedulerDevice>,
    pub location: Arc<PlateLocation>,
    pub place: PlatePlace,
}

impl PathNode {
    /// `"{device}/{location}:{place}"`, unique across the world.
    pub fn qualified_key(&self) -> String {
        format!("{}/{}", self.device.name(), self.key)
    }

    pub fn endpoint(&self) -> Endpoint<'_> {
        Endpoint::new(self.device.as_ref(), &self.location, &self.place)
    }
}

impl std::fmt::Debug for PathNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathNode")
            .field("key", &self.key)
            .field("device", &self.device.name())
            .finish()
    }
}

/// A single hop between two consecutive path nodes.
#[derive(Clone)]
pub struct PathHop {
    pub robot: Arc<dyn Robot>,
    pub cost: f64,
}

impl std::fmt::Debug for PathHop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathHop")
            .field("robot", &self.robot.name())
            .field("cost", &self.cost)
            .finish()
    }
}

/// Cheapest route between two locations. `hops[i]` moves the plate from
/// `nodes[i]` to `nodes[i + 1]`.
#[derive(Debug, Clone)]
pub struct PlannedPath {
    pub nodes: Vec<PathNode>,
    pub hops: Vec<PathHop>,
    pub total_cost: f64,
}

impl PlannedPath {
    pub fn keys(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.key.as_str()).collect()
    }
}

/// Builds the world graph from a `DeviceManager` and plans routes over it.
pub struct PathPlanner {
    devices: Arc<DeviceManager>,
    nodes: Vec<PathNode>,
    /// Keyed by `(device, "{location}:{place}")`; location names are only
    /// unique within a device.
    index: HashMap<(String, String), usize>,
    robots: Vec<Arc<dyn Robot>>,
    graph: Graph,
}

impl PathPlanner {
    /// An empty planner. Call `create_world` before planning.
    pub fn new(devices: Arc<DeviceManager>) -> Self {
        Self {
            devices,
            nodes: Vec::new(),
            index: HashMap::new(),
            robots: Vec::new(),
            graph: Graph::default(),
        }
    }

    /// Rebuild the graph from the current registry.
    ///
    /// Every pair of places is offered to every robot; a finite positive
    /// weight adds an edge in both directions.
    pub fn create_world(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.robots = self.devices.get_robots();

        for device in self.devices.get_accessible_devices() {
            for location in device.plate_location_info() {
                if location.device_name() != device.name() {
                    warn!(
                        device = %device.name(),
                        location = %location.name(),
                        owner = %location.device_name(),
                        "location names a different owning device"
                    );
                }
                for place in location.places() {
                    let key = location.place_key(&place.name);
                    let slot = (location.device_name().to_string(), key.clone());
                    if self.index.contains_key(&slot) {
                        warn!(%key, device = %device.name(), "duplicate place key ignored");
                        continue;
                    }
                    self.index.insert(slot, self.nodes.len());
                    self.nodes.push(PathNode {
                        key,
                        device: Arc::clone(&device),
                        location: Arc::clone(&location),
                        place: place.clone(),
                    });
                }
            }
        }

        let mut graph = Graph::with_nodes(self.nodes.len());
        for i in 0..self.nodes.len() {
            for j in (i + 1)..self.nodes.len() {
                let src = self.nodes[i].endpoint();
                let dst = self.nodes[j].endpoint();
                for (r, robot) in self.robots.iter().enumerate() {
                    match robot.get_transfer_weight(&src, &dst) {
                        Ok(weight) if weight > 0.0 && weight.is_finite() => {
                            graph.add_undirected_edge(i, j, weight, r);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            debug!(
                                robot = %robot.name(),
                                src = %self.nodes[i].key,
                                dst = %self.nodes[j].key,
                                error = %e,
                                "transfer weight unavailable"
                            );
                        }
                    }
                }
            }
        }
        self.graph = graph;

        let disconnected = self.disconnected_places();
        if !disconnected.is_empty() {
            warn!(places = ?disconnected, "places with no robot connection");
        }
        debug!(
            places = self.nodes.len(),
            edges = self.graph.edge_count() / 2,
            robots = self.robots.len(),
            "world graph built"
        );
    }

    /// Qualified keys of places no robot can reach.
    pub fn disconnected_places(&self) -> Vec<String> {
        (0..self.nodes.len())
            .filter(|&n| self.graph.degree(n) == 0)
            .map(|n| self.nodes[n].qualified_key())
            .collect()
    }

    fn node_index(&self, location: &PlateLocation, place: &str) -> Option<usize> {
        let slot = (location.device_name().to_string(), location.place_key(place));
        self.index.get(&slot).copied()
    }

    pub fn place_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of undirected connections (one per robot per place pair).
    pub fn connection_count(&self) -> usize {
        self.graph.edge_count() / 2
    }

    /// Cheapest path from any place of `src` to any place of `dst`.
    ///
    /// `None` if either location has no places in the world or no pair is
    /// connected.
    pub fn plan_path(&self, src: &PlateLocation, dst: &PlateLocation) -> Option<PlannedPath> {
        let mut best: Option<(f64, Vec<usize>, Vec<crate::graph::Edge>)> = None;

        for src_place in src.places() {
            let Some(start) = self.node_index(src, &src_place.name) else {
                continue;
            };
            let paths = self.graph.shortest_paths(start);

            for dst_place in dst.places() {
                let Some(end) = self.node_index(dst, &dst_place.name) else {
                    continue;
                };
                let Some(distance) = paths.distance(end) else {
                    continue;
                };
                if best.as_ref().is_none_or(|(d, _, _)| distance < *d) {
                    if let Some((nodes, edges)) = paths.path_to(end) {
                        best = Some((distance, nodes, edges));
                    }
                }
            }
        }

        let (total_cost, nodes, edges) = best?;
        Some(PlannedPath {
            nodes: nodes.into_iter().map(|n| self.nodes[n].clone()).collect(),
            hops: edges
                .into_iter()
                .map(|e| PathHop {
                    robot: Arc::clone(&self.robots[e.robot]),
                    cost: e.cost,
                })
                .collect(),
            total_cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use plategrid_devices::{DeviceError, DeviceResult, SimDevice, SimRobot, TransferRequest};

    /// Robot whose weights come from a table of location-name pairs.
    struct TableRobot {
        name: String,
        weights: Vec<(&'static str, &'static str, f64)>,
    }

    impl TableRobot {
        fn new(name: &str, weights: Vec<(&'static str, &'static str, f64)>) -> Self {
            Self {
                name: name.to_string(),
                weights,
            }
        }
    }

    #[async_trait]
    impl Robot for TableRobot {
        fn name(&self) -> &str {
            &self.name
        }

        async fn transfer_plate(&self, _request: &TransferRequest) -> DeviceResult<()> {
            Ok(())
        }

        fn get_transfer_weight(&self, src: &Endpoint<'_>, dst: &Endpoint<'_>) -> DeviceResult<f64> {
            let (a, b) = (src.location.name(), dst.location.name());
            Ok(self
                .weights
                .iter()
                .find(|(x, y, _)| (*x == a && *y == b) || (*x == b && *y == a))
                .map(|(_, _, w)| *w)
                .unwrap_or(f64::INFINITY))
        }
    }

    struct BrokenRobot;

    #[async_trait]
    impl Robot for BrokenRobot {
        fn name(&self) -> &str {
            "broken"
        }

        async fn transfer_plate(&self, _request: &TransferRequest) -> DeviceResult<()> {
            Ok(())
        }

        fn get_transfer_weight(&self, _src: &Endpoint<'_>, _dst: &Endpoint<'_>) -> DeviceResult<f64> {
            Err(DeviceError::Robot {
                robot: "broken".into(),
                message: "offline".into(),
            })
        }
    }

    /// Devices A, B, C with one location each: `A_0`, `B_0`, `C_0`.
    fn line_world(robot: impl Robot + 'static) -> (Arc<DeviceManager>, Vec<Arc<PlateLocation>>) {
        let manager = Arc::new(DeviceManager::new());
        let mut locations = Vec::new();
        for name in ["A", "B", "C"] {
            let device = Arc::new(SimDevice::new(name, "Storage").with_locations(1));
            locations.push(Arc::clone(&device.plate_location_info()[0]));
            manager.register_accessible_device(device);
        }
        manager.register_robot(Arc::new(robot));
        (manager, locations)
    }

    #[test]
    fn line_graph_routes_through_b() {
        let robot = TableRobot::new("arm", vec![("A_0", "B_0", 1.0), ("B_0", "C_0", 1.0)]);
        let (manager, locs) = line_world(robot);
        let mut planner = PathPlanner::new(manager);
        planner.create_world();

        let path = planner.plan_path(&locs[0], &locs[2]).unwrap();
        assert_eq!(path.keys(), vec!["A_0:A_0_place", "B_0:B_0_place", "C_0:C_0_place"]);
        assert_eq!(path.total_cost, 2.0);
        assert_eq!(path.hops.len(), 2);
        assert_eq!(path.hops[0].robot.name(), "arm");
    }

    #[test]
    fn disconnected_target_has_no_path() {
        let robot = TableRobot::new("arm", vec![("A_0", "B_0", 1.0)]);
        let (manager, locs) = line_world(robot);
        let mut planner = PathPlanner::new(manager);
        planner.create_world();

        assert!(planner.plan_path(&locs[0], &locs[2]).is_none());
        assert!(planner.plan_path(&locs[0], &locs[1]).is_some());
        assert_eq!(planner.disconnected_places(), vec!["C/C_0:C_0_place"]);
    }

    #[test]
    fn infinite_weights_add_no_edges() {
        let (manager, _) = line_world(TableRobot::new("arm", vec![]));
        let mut planner = PathPlanner::new(manager);
        planner.create_world();
        assert_eq!(planner.place_count(), 3);
        assert_eq!(planner.connection_count(), 0);
        assert_eq!(planner.disconnected_places().len(), 3);
    }

    #[test]
    fn weight_errors_are_treated_as_no_edge() {
        let (manager, locs) = line_world(BrokenRobot);
        manager.register_robot(Arc::new(TableRobot::new("arm", vec![("A_0", "C_0", 4.0)])));
        let mut planner = PathPlanner::new(manager);
        planner.create_world();

        let path = planner.plan_path(&locs[0], &locs[2]).unwrap();
        assert_eq!(path.total_cost, 4.0);
        assert_eq!(path.hops[0].robot.name(), "arm");
    }

    #[test]
    fn same_location_never_connects_to_itself() {
        let manager = Arc::new(DeviceManager::new());
        let device = Arc::new(SimDevice::new("Hotel", "Storage").with_location(
            PlateLocation::with_places("Hotel_0", "Hotel", ["left", "right"]),
        ));
        manager.register_accessible_device(device);
        manager.register_robot(Arc::new(SimRobot::new("PF400")));

        let mut planner = PathPlanner::new(manager);
        planner.create_world();
        assert_eq!(planner.connection_count(), 0);
    }

    #[test]
    fn cheapest_place_pair_wins() {
        let manager = Arc::new(DeviceManager::new());
        let src = Arc::new(SimDevice::new("Src", "Storage").with_location(
            PlateLocation::with_places("S", "Src", ["far", "near"]),
        ));
        let dst = Arc::new(SimDevice::new("Dst", "Storage").with_locations(1));
        let src_loc = Arc::clone(&src.plate_location_info()[0]);
        let dst_loc = Arc::clone(&dst.plate_location_info()[0]);
        manager.register_accessible_device(src);
        manager.register_accessible_device(dst);

        struct PlaceRobot;
        #[async_trait]
        impl Robot for PlaceRobot {
            fn name(&self) -> &str {
                "place-aware"
            }
            async fn transfer_plate(&self, _request: &TransferRequest) -> DeviceResult<()> {
                Ok(())
            }
            fn get_transfer_weight(&self, src: &Endpoint<'_>, dst: &Endpoint<'_>) -> DeviceResult<f64> {
                if src.same_location(dst) {
                    return Ok(f64::INFINITY);
                }
                let near = src.place.name == "near" || dst.place.name == "near";
                Ok(if near { 1.0 } else { 3.0 })
            }
        }
        manager.register_robot(Arc::new(PlaceRobot));

        let mut planner = PathPlanner::new(manager);
        planner.create_world();
        let path = planner.plan_path(&src_loc, &dst_loc).unwrap();
        assert_eq!(path.nodes[0].place.name, "near");
        assert_eq!(path.total_cost, 1.0);
    }

    #[test]
    fn inaccessible_devices_are_not_in_the_world() {
        let manager = Arc::new(DeviceManager::new());
        let hidden = Arc::new(SimDevice::new("Sealer", "Sealer").with_locations(1));
        let hidden_loc = Arc::clone(&hidden.plate_location_info()[0]);
        manager.register_device(hidden);
        let hotel = Arc::new(SimDevice::new("Hotel", "Storage").with_locations(1));
        let hotel_loc = Arc::clone(&hotel.plate_location_info()[0]);
        manager.register_accessible_device(hotel);
        manager.register_robot(Arc::new(SimRobot::new("PF400")));

        let mut planner = PathPlanner::new(manager);
        planner.create_world();
        assert_eq!(planner.place_count(), 1);
        assert!(planner.plan_path(&hotel_loc, &hidden_loc).is_none());
    }

    #[test]
    fn empty_world_plans_nothing() {
        let planner = PathPlanner::new(Arc::new(DeviceManager::new()));
        let loc = PlateLocation::new("X", "Y");
        assert!(planner.plan_path(&loc, &loc).is_none());
    }

    #[test]
    fn same_location_name_on_two_devices_stays_distinct() {
        let manager = Arc::new(DeviceManager::new());
        let hotel = Arc::new(SimDevice::new("Hotel", "Storage").with_locations(1));
        let hotel_loc = Arc::clone(&hotel.plate_location_info()[0]);
        manager.register_accessible_device(hotel);
        let mut nests = Vec::new();
        for name in ["ReaderA", "ReaderB"] {
            let reader = Arc::new(
                SimDevice::new(name, "PlateReader").with_location(PlateLocation::new("nest", name)),
            );
            nests.push(Arc::clone(&reader.plate_location_info()[0]));
            manager.register_accessible_device(reader);
        }
        manager.register_robot(Arc::new(SimRobot::new("PF400")));

        let mut planner = PathPlanner::new(manager);
        planner.create_world();
        assert_eq!(planner.place_count(), 3);

        for (nest, name) in nests.iter().zip(["ReaderA", "ReaderB"]) {
            let path = planner.plan_path(&hotel_loc, nest).unwrap();
            let last = path.nodes.last().unwrap();
            assert_eq!(last.device.name(), name);
            assert!(Arc::ptr_eq(&last.location, nest));
            assert_eq!(last.qualified_key(), format!("{name}/nest:nest_place"));
        }
    }
}
