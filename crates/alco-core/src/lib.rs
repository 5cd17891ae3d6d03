//! Hardware-independent core library for alco-rs
//!
//! This crate contains all platform-agnostic logic for the breath alcohol
//! monitor: calibration, the metric engine, the shared state store and its
//! strategies, the sampling and actuation loops, display rendering and the
//! query records served to the network layer.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on embedded
//! targets as well as on Linux hosts (for the runtime and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod actuation;
pub mod calibration;
pub mod config;
pub mod display;
pub mod framebuffer;
pub mod history;
pub mod metrics;
pub mod query;
pub mod sampling;
pub mod sensors;
pub mod store;
pub mod task;
