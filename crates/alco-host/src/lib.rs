//! Linux host runtime for the alco breath alcohol monitor
//!
//! Runs the `alco-core` pipeline on OS threads: the sampling loop publishes
//! into a state store, the actuation loop drives the LEDs and display from
//! it, and an axum server answers `/data` and `/history`. The store can be
//! shared in-process, through a memory-mapped region, or through a manager
//! process (see [`app::StoreStrategy`]).

pub mod app;
pub mod clock;
pub mod hardware;
pub mod http;
pub mod manager;
pub mod runtime;
pub mod settings;
pub mod shm;
pub mod sync;
