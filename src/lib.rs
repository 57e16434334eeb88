//! hwcprobe - two-phase hardware counter instrumentation
//!
//! At build time a [`selection::SelectionIndex`] decides which functions get
//! measured and the [`catalog::DescriptorCatalog`] records a descriptor for
//! each of them, keyed by an identifier from [`identity`]. The descriptors
//! travel to the program as a [`metadata`] blob. At run time the
//! [`runtime::Runtime`] turns every record into a [`stats::MeasurementUnit`]
//! and writes a report when it is torn down.
//!
//! The two phases share no state; they agree only because both derive the
//! same identifier from the same content.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod counters;
pub mod identity;
pub mod metadata;
pub mod runtime;
pub mod selection;
pub mod stats;
