//! RobotMX - sample-exchange robot server
//!
//! Mounts and dismounts crystals with the beamline robot while a separate
//! safety service moves the surrounding equipment out of the arm's path.
//! Operations come in over HTTP, lifecycle and value updates go out over a
//! WebSocket stream.

pub mod actors;
pub mod api;
pub mod config;
pub mod hardware;
pub mod orchestrator;
pub mod reporter;
pub mod safety;
