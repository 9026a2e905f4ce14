//! PV surplus load scheduler.
//!
//! Allocates a fluctuating power budget (excess solar generation) among
//! competing controllable loads: priority-tiered greedy admission, minimum
//! dwell-time and manual-override locking, post-command verification with
//! fault locks, and a side-effect-free simulation pass alongside the real
//! one.

pub mod config;
pub mod controller;
pub mod domain;
pub mod hardware;
pub mod repo;
pub mod signal;
pub mod telemetry;
pub mod utils;
