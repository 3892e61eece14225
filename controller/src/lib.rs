//! Camwatch controller core.
//!
//! Supervises a fleet of independent, network-attached camera/recording
//! units ("monitors") over a uniform JSON command protocol: per-monitor
//! state machines with adaptive poll cadence, a fleet-wide recording
//! signal, bulk conversion/transfer jobs polled to completion, and a
//! shared file catalog.

pub mod catalog;
pub mod endpoint;
pub mod fleet;
pub mod jobs;
pub mod monitor;
pub mod sink;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;
