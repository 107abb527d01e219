//! plategrid-planner: where can a plate go, and which robots take it there.
//!
//! The planner turns the current device registry into a weighted graph and
//! answers shortest-path queries over it:
//!
//! ```text
//! DeviceManager
//!   ├── accessible devices ─▶ locations ─▶ places     (graph nodes "loc:place")
//!   └── robots ─▶ get_transfer_weight(src, dst)         (graph edges, one per robot)
//!
//! PathPlanner::create_world()  rebuild the graph
//! PathPlanner::plan_path(a, b) cheapest path over every place pair of a × b
//! ```
//!
//! Edges are undirected with the same weight both ways. A robot that
//! reports an infinite or non-positive weight, or fails to answer, adds no
//! edge.

pub mod graph;
pub mod planner;

pub use graph::{Edge, Graph, ShortestPaths};
pub use planner::{PathHop, PathNode, PathPlanner, PlannedPath};
