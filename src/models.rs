//! # Controller data model
//!
//! Types shared between the controller core and its HTTP/WebSocket/MQTT
//! bindings: robot records, positions, command models, query filters and
//! the notifications pushed to connected clients. Everything here is plain
//! data; wire marshalling lives in [crate::protocol] and conversions between
//! the two are provided as `From` impls.

use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::protocol::{
    Address, ApplicationType, CommandMoveRaw, CommandRgbLed, CommandXgoAction, ControlMode,
    GpsPosition, Lh2Location,
};

/// Maximum number of past positions kept per robot.
pub const MAX_POSITION_HISTORY_SIZE: usize = 1000;

/// Default waypoint-reached threshold.
pub const DEFAULT_WAYPOINT_THRESHOLD: u8 = 40;

/// LH2 position of a robot, in arena units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LH2Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// GPS position of a robot, in signed decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GPSPosition {
    pub latitude: f64,
    pub longitude: f64,
}

/// A position of either kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Position {
    Lh2(LH2Position),
    Gps(GPSPosition),
}

impl From<Lh2Location> for LH2Position {
    fn from(location: Lh2Location) -> Self {
        Self {
            x: location.pos_x as f32 / 1e6,
            y: location.pos_y as f32 / 1e6,
            z: location.pos_z as f32 / 1e6,
        }
    }
}

impl From<LH2Position> for Lh2Location {
    fn from(position: LH2Position) -> Self {
        Self {
            pos_x: (position.x * 1e6) as u32,
            pos_y: (position.y * 1e6) as u32,
            pos_z: (position.z * 1e6) as u32,
        }
    }
}

impl From<GpsPosition> for GPSPosition {
    fn from(position: GpsPosition) -> Self {
        Self {
            latitude: f64::from(position.latitude) / 1e6,
            longitude: f64::from(position.longitude) / 1e6,
        }
    }
}

impl From<GPSPosition> for GpsPosition {
    fn from(position: GPSPosition) -> Self {
        Self {
            latitude: (position.latitude * 1e6) as i32,
            longitude: (position.longitude * 1e6) as i32,
        }
    }
}

/// A move raw command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRawCommand {
    pub left_x: i8,
    pub left_y: i8,
    pub right_x: i8,
    pub right_y: i8,
}

impl From<MoveRawCommand> for CommandMoveRaw {
    fn from(command: MoveRawCommand) -> Self {
        Self {
            left_x: command.left_x,
            left_y: command.left_y,
            right_x: command.right_x,
            right_y: command.right_y,
        }
    }
}

/// An RGB LED command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbLedCommand {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl From<RgbLedCommand> for CommandRgbLed {
    fn from(command: RgbLedCommand) -> Self {
        Self {
            red: command.red,
            green: command.green,
            blue: command.blue,
        }
    }
}

/// An XGO action command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XgoActionCommand {
    pub action: u8,
}

impl From<XgoActionCommand> for CommandXgoAction {
    fn from(command: XgoActionCommand) -> Self {
        Self {
            action: command.action,
        }
    }
}

/// A waypoint list command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoints {
    pub threshold: u8,
    pub waypoints: Vec<Position>,
}

/// Lifecycle status of a robot, derived from the time elapsed since its
/// last frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DotBotStatus {
    #[default]
    Active,
    Inactive,
    Lost,
}

/// A known robot and everything the controller tracks about it.
#[derive(Debug, Clone, Serialize)]
pub struct DotBot {
    pub address: Address,
    pub application: ApplicationType,
    pub swarm: u16,
    pub status: DotBotStatus,
    pub mode: ControlMode,
    /// Instant of the most recent inbound frame from this robot.
    #[serde(skip)]
    pub last_seen: Instant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_angle: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rudder_angle: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sail_angle: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_raw: Option<MoveRawCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rgb_led: Option<RgbLedCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lh2_position: Option<LH2Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_position: Option<GPSPosition>,
    pub waypoints: Vec<Position>,
    pub waypoints_threshold: u8,
    pub position_history: VecDeque<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<f32>,
    pub calibrated: bool,
}

impl DotBot {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            application: ApplicationType::DotBot,
            swarm: 0,
            status: DotBotStatus::Active,
            mode: ControlMode::Manual,
            last_seen: Instant::now(),
            direction: None,
            wind_angle: None,
            rudder_angle: None,
            sail_angle: None,
            move_raw: None,
            rgb_led: None,
            lh2_position: None,
            gps_position: None,
            waypoints: Vec::new(),
            waypoints_threshold: DEFAULT_WAYPOINT_THRESHOLD,
            position_history: VecDeque::new(),
            battery: None,
            calibrated: false,
        }
    }

    /// Appends a position to the history, discarding the oldest entry once
    /// the bound is reached.
    pub fn record_position(&mut self, position: Position) {
        self.position_history.push_back(position);
        if self.position_history.len() > MAX_POSITION_HISTORY_SIZE {
            self.position_history.pop_front();
        }
    }
}

fn default_max_positions() -> usize {
    MAX_POSITION_HISTORY_SIZE
}

/// Filter predicates for listing robots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DotBotQuery {
    /// Cap on the number of history positions returned per robot.
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ControlMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DotBotStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swarm: Option<u16>,
}

impl Default for DotBotQuery {
    fn default() -> Self {
        Self {
            max_positions: MAX_POSITION_HISTORY_SIZE,
            application: None,
            mode: None,
            status: None,
            swarm: None,
        }
    }
}

/// Kind of notification pushed to connected clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationCommand {
    /// Clients should reload the full robot list.
    Reload,
    /// Incremental update for a single robot.
    Update,
}

/// Fields carried by an update notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationUpdate {
    pub address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_angle: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rudder_angle: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sail_angle: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lh2_position: Option<LH2Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_position: Option<GPSPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<f32>,
}

/// A notification pushed to all connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub cmd: NotificationCommand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<NotificationUpdate>,
}

impl Notification {
    pub fn reload() -> Self {
        Self {
            cmd: NotificationCommand::Reload,
            data: None,
        }
    }

    pub fn update(data: NotificationUpdate) -> Self {
        Self {
            cmd: NotificationCommand::Update,
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_history_is_bounded() {
        let mut dotbot = DotBot::new(Address::new(0x4242));
        for i in 0..(MAX_POSITION_HISTORY_SIZE + 10) {
            dotbot.record_position(Position::Lh2(LH2Position {
                x: i as f32,
                y: 0.0,
                z: 0.0,
            }));
        }
        assert_eq!(dotbot.position_history.len(), MAX_POSITION_HISTORY_SIZE);
        // Oldest entries were discarded first
        match dotbot.position_history.front().unwrap() {
            Position::Lh2(position) => assert_eq!(position.x, 10.0),
            Position::Gps(_) => panic!("unexpected GPS position"),
        }
    }

    #[test]
    fn wire_position_conversions() {
        let lh2 = LH2Position::from(Lh2Location {
            pos_x: 500_000,
            pos_y: 250_000,
            pos_z: 0,
        });
        assert_eq!(lh2, LH2Position { x: 0.5, y: 0.25, z: 0.0 });
        assert_eq!(
            Lh2Location::from(lh2),
            Lh2Location { pos_x: 500_000, pos_y: 250_000, pos_z: 0 }
        );

        let gps = GPSPosition::from(GpsPosition {
            latitude: 48_832_313,
            longitude: 2_412_689,
        });
        assert!((gps.latitude - 48.832313).abs() < 1e-9);
        assert!((gps.longitude - 2.412689).abs() < 1e-9);
    }

    #[test]
    fn notification_serialization() {
        let notification = Notification::reload();
        assert_eq!(
            serde_json::to_string(&notification).unwrap(),
            r#"{"cmd":"RELOAD"}"#
        );

        let notification = Notification::update(NotificationUpdate {
            address: Address::new(0x4242),
            direction: Some(90),
            wind_angle: None,
            rudder_angle: None,
            sail_angle: None,
            lh2_position: None,
            gps_position: None,
            battery: Some(3.7),
        });
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["cmd"], "UPDATE");
        assert_eq!(json["data"]["address"], "0000000000004242");
        assert_eq!(json["data"]["direction"], 90);
        assert!(json["data"].get("wind_angle").is_none());
    }

    #[test]
    fn query_defaults() {
        let query: DotBotQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.max_positions, MAX_POSITION_HISTORY_SIZE);
        assert!(query.application.is_none());
        assert!(query.status.is_none());
    }
}
