//! Observers that record what the FADO drivers do.
//!
//! Every driver reports to an [`Observer<Event, Action>`]. This crate turns
//! those events into the files a design study usually keeps:
//!
//! - [`HistoryWriter`] writes one delimited line per function pass
//! - [`LogWriter`] writes one fixed-width row per gradient pass and penalty
//!   update
//! - [`Tee`] feeds the same events to two observers
//!
//! Writers never interrupt an optimization. I/O failures are reported through
//! `tracing` and the write is skipped.
//!
//! [`Observer<Event, Action>`]: fado_core::Observer
//! [`Event`]: fado_drivers::Event
//! [`Action`]: fado_drivers::Action

mod history;
mod log;
mod tee;

pub use history::HistoryWriter;
pub use log::LogWriter;
pub use tee::Tee;
