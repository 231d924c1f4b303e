//! Orchestrator scheduling core for the abacus distributed arithmetic
//! evaluator.
//!
//! The pieces, leaves first: [`parser`] turns expression text into an
//! operator tree; [`planner`] walks the tree against completed tasks,
//! grafting values upward and materialising newly-ready operations as
//! durable tasks; [`dispatch`] leases pending tasks to pulling workers and
//! accepts their results; [`lifecycle`] glues them together and decides
//! when an expression is done. [`latency`] is the per-operator artificial
//! latency table, [`rpc`] the worker wire types, [`worker`] the compute
//! helpers, and [`auth`] the session-token / password primitives used by
//! the HTTP surface.

pub mod auth;
pub mod dispatch;
pub mod latency;
pub mod lifecycle;
pub mod parser;
pub mod planner;
pub mod rpc;
pub mod worker;
