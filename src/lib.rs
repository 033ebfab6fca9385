#![cfg_attr(docsrs, feature(doc_cfg))]
//! # axpert_lib
//!
//! Decoder for the `QPGS` parallel status query of Axpert/Voltronic inverters,
//! plus clients that talk to the inverters through a serial-over-TCP bridge.
//!
//! The decode path is pure: [`protocol::QpgsQuery::decode`] turns the bytes of
//! one reply into a [`Reading`], and [`SystemTotals::aggregate`] folds the
//! readings of all units of a cycle into cluster totals.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, everything needed by the `axpert-monitor` binary.
//! - `tokio-async`: Enables the **asynchronous** client using `tokio`.

/// Contains error types for the library.
mod error;
/// Fault code table and flags.
pub mod fault;
/// Framing, checksum and field layout of the QPGS query.
pub mod protocol;
/// Per-unit decoded telemetry and derived metrics.
pub mod reading;
/// Status bit string flags.
pub mod status;
/// Synchronous client over a TCP serial bridge.
pub mod tcp;
/// Cluster totals.
pub mod totals;

pub use error::{Error, FrameError};
pub use reading::Reading;
pub use totals::SystemTotals;

/// Asynchronous client over a TCP serial bridge.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-async")))]
#[cfg(feature = "tokio-async")]
pub mod tokio_tcp_async;
