//! In-place rolling updates for machine deployments
//!
//! Machines move from an old machine set to the new one by relabeling
//! instead of being replaced. The orchestrator picks machines within the
//! availability budget, an external agent updates their nodes, and the
//! orchestrator transfers ownership once the node reports success.

pub mod cli;
pub mod client;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod labels;
pub mod rollout;
pub mod simulation;
