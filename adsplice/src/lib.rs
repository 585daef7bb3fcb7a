//! Live HLS ad insertion driven by SCTE-35 cues.
//!
//! Cues reach a per-channel [`channel::ChannelActor`] either from the
//! [`monitor::SignalMonitor`] polling the origin or through the API. The
//! actor turns them into ad breaks; [`service::ManifestService`] splices the
//! active break into each viewer's playlist.

pub mod api;
pub mod blob;
pub mod channel;
pub mod config;
pub mod container;
pub mod decision;
pub mod error;
pub mod events;
pub mod logging;
pub mod monitor;
pub mod origin;
pub mod service;
pub mod variant;

pub use error::{Error, Result};
