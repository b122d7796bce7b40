//! Keeps speakers out of standby by emitting a short tone at a fixed interval.
//!
//! A [`controller::Controller`] owns the schedule and survives being torn down
//! by restoring from [`storage`]; a [`renderer::ToneRenderer`] turns requests
//! into sine tones; a [`panel::ControlPanel`] mirrors the state for display.

pub mod alarms;
pub mod controller;
pub mod controller_client;
pub mod error;
pub mod keep_alive_config;
pub mod message;
pub mod panel;
pub mod renderer;
pub mod run_state;
pub mod sink;
pub mod storage;
pub mod synth;
pub mod timestamp;
pub mod tone_config;

pub use error::{Error, ErrorKind};
