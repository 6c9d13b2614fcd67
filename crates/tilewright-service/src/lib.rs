//! The asynchronous tile computation and caching core.
//!
//! Tiles are produced through chained transformations of source imagery on worker threads,
//! while a painting thread assembles what is already available without ever blocking:
//!
//! - [`caching`] memoizes computations per source by their [`ComputationKey`](caching::ComputationKey),
//!   so identical requests share one record and are produced at most once.
//! - [`async_ref`] provides the handles to those records, the interest that drives their
//!   scheduling, and the generation tokens that suppress stale completion callbacks.
//! - [`image`] holds the explicitly reference counted, lock guarded pixel buffers.
//! - [`services`] wires records to the producer pool, and assembles paint passes in the
//!   [`Viewer`](services::viewer::Viewer).

#[macro_use]
pub mod metrics;

pub mod async_ref;
pub mod caching;
pub mod config;
pub mod image;
pub mod logging;
pub mod present;
pub mod services;
