//! History service facade and channel bridge for retrace.
//!
//! [`HistoryService`] is the public operation surface over the visit
//! store; [`bridge::spawn`] moves a service onto its own task and hands
//! callers a cloneable [`HistoryHandle`] for request/response round trips
//! and `visitRemoved` subscriptions.

pub mod bridge;
pub mod service;

pub use bridge::{HistoryHandle, spawn};
pub use service::{CHUNK_SIZE, HistoryService};
