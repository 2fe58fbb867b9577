//! Optimism-K8s: Kubernetes Operator for OP-Stack Rollup Infrastructure
//!
//! This crate provides a Kubernetes operator for managing OP-Stack rollup
//! networks and their components: op-node/op-geth pairs, batchers, proposers,
//! and fault-proof challengers.

pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;

pub use crate::error::{Error, Result};
