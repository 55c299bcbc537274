#![cfg_attr(docsrs, feature(doc_cfg))]
//! # evtvbms_lib
//!
//! This crate decodes the UDP telemetry broadcast of an EVTV Tesla BMS
//! (Battery Management System) controller and derives higher-level battery
//! metrics from it.
//!
//! The two core pieces are:
//!
//! - [`protocol`]: the stateless frame decoder. Raw datagram bytes in, typed
//!   measurements out; malformed or unknown frames are silently dropped.
//! - [`engine`]: the stateful per-device metrics engine. It merges decoded
//!   measurements, integrates energy over monotonic time, classifies
//!   charge/discharge, maintains rolling power averages and utility-meter
//!   style periodic counters, and exposes the full metric mapping.
//!
//! ## Features
//!
//! This crate uses a feature-based system to keep dependencies minimal.
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling
//!   the `evtvbms` command-line tool.
//!
//! ### Listener Features
//! - `udp`: Enables the **synchronous** UDP listener (std networking only).
//! - `tokio-udp-async`: Enables the **asynchronous** UDP listener using
//!   `tokio`.
//!
//! ### Utility Features
//! - `bin-dependencies`: Enables all features required by the `evtvbms`
//!   binary executable.

/// Contains error types for the library.
mod error;
/// Per-device derived-metrics engine.
pub mod engine;
/// Defines the broadcast frame layout of the EVTV Tesla BMS.
pub mod protocol;

pub use error::Error;

/// Synchronous UDP telemetry listener.
#[cfg_attr(docsrs, doc(cfg(feature = "udp")))]
#[cfg(feature = "udp")]
pub mod udp;

/// Asynchronous UDP telemetry listener.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-udp-async")))]
#[cfg(feature = "tokio-udp-async")]
pub mod tokio_udp_async;
