//! Flow-engine (Node-RED) integration.

mod client;
mod flow_graph;

pub use client::NodeRedClient;
pub use flow_graph::{FlowSettings, build_flow, extract_variables, s7_variables};
