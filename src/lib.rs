//! # DotBot controller library
//!
//! This crate allows to control a swarm of DotBots and SailBots from a host
//! computer. It speaks to a radio gateway attached over a serial link; the
//! gateway bridges frames to and from the robots over a radio mesh. The
//! crate keeps live per-robot state (position, heading, battery, waypoints,
//! last-seen), turns high-level commands into framed binary packets, parses
//! telemetry, and publishes change notifications that HTTP/WebSocket/MQTT
//! front-ends can fan out to their clients.
//!
//! ## Status
//!
//! | Component | Support |
//! |-----------|---------|
//! | HDLC framing codec | Full |
//! | Packet codec | Full (protocol v9) |
//! | Serial gateway adapter | Full |
//! | Robot registry and lifecycle | Full |
//! | Commands (move raw, RGB LED, XGO, waypoints) | Full |
//! | LH2 calibration hand-off | Full |
//! | Lighthouse geometry solver | None (external) |
//!
//! ## Usage
//!
//! The basic procedure to use the lib is:
//!  - Create a [controller::Controller] from settings and a gateway
//!    adapter, usually the serial one; this opens the link and starts the
//!    frame pump.
//!  - Robots appear in the registry as soon as they advertise themselves.
//!  - Use the controller operations to steer them, and subscribe to
//!    [controller::Controller::notifications] to follow fleet changes.
//!  - Call [controller::Controller::shutdown] when done.
//!
//! All controller operations take an un-mutable reference to self (`&self`),
//! the intention is for the controller to be shared between tasks using
//! `Arc<>`.
//!
//! For example:
//! ``` no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use dotbot_lib::controller::{Controller, ControllerSettings};
//! use dotbot_lib::models::MoveRawCommand;
//!
//! let controller = Controller::start_serial(ControllerSettings::default()).await?;
//!
//! println!("Known robots:");
//! for dotbot in controller.dotbots(&Default::default()).await {
//!     println!(" - {}", dotbot.address);
//! }
//!
//! if let Some(dotbot) = controller.dotbots(&Default::default()).await.first() {
//!     let command = MoveRawCommand { left_x: 50, left_y: 50, right_x: 50, right_y: 50 };
//!     controller.send_move_raw(dotbot.address, command).await?;
//! }
//!
//! controller.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Compatibility
//!
//! This crate implements version 9 of the DotBot protocol with its 18-byte
//! header. Frames carrying any other version are rejected; legacy gateways
//! must be upgraded.

pub mod adapter;
pub mod controller;
mod error;
pub mod hdlc;
pub mod models;
pub mod protocol;

pub use crate::error::{Error, Result};
pub use crate::protocol::{Address, PROTOCOL_VERSION};
