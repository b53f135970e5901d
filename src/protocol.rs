//! # DotBot protocol
//!
//! Typed view of the binary packets exchanged with the gateway. A packet is
//! a fixed [Header] (protocol version, packet kind, destination and source
//! addresses), one payload-type byte, and a typed payload body. All
//! multi-byte integers are little-endian.
//!
//! The payload is modelled as the [Payload] enum with one variant per
//! payload type; parsing and serialization are a single exhaustive match.
//! ```
//! use dotbot_lib::protocol::{Address, Frame, Payload, CommandRgbLed};
//!
//! let frame = Frame::new(
//!     Address::new(0x1122334455667788),
//!     Payload::CmdRgbLed(CommandRgbLed { red: 255, green: 0, blue: 0 }),
//! );
//! assert_eq!(Frame::from_bytes(&frame.to_bytes()).unwrap(), frame);
//! ```

use std::fmt;
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Supported protocol version
///
/// Frames advertising any other version are rejected with
/// [Error::Header].
pub const PROTOCOL_VERSION: u8 = 9;

fn short(what: &str, needed: usize, available: usize) -> Error {
    Error::ShortPayload(format!(
        "{}: need {} bytes, got {}",
        what, needed, available
    ))
}

/// 64-bit robot address, rendered as 16 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address {
    /// Address of the gateway itself, never a valid telemetry source.
    pub const GATEWAY: Address = Address(0x0000_0000_0000_0000);
    /// Broadcast address, never a valid telemetry source.
    pub const BROADCAST: Address = Address(0xFFFF_FFFF_FFFF_FFFF);

    pub const fn new(value: u64) -> Self {
        Address(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        u64::from_str_radix(s, 16)
            .map(Address)
            .map_err(|_| Error::Header(format!("invalid address '{}'", s)))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Types of MAC layer packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PacketType {
    Beacon = 1,
    JoinRequest = 2,
    JoinResponse = 3,
    Leave = 4,
    Data = 5,
}

/// Types of DotBot applications.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum ApplicationType {
    DotBot = 0,
    SailBot = 1,
    Freebot = 2,
    XGO = 3,
    LH2MiniMote = 4,
}

/// Types of DotBot control modes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMode {
    Manual = 0,
    Auto = 1,
}

/// Types of DotBot payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PayloadType {
    CmdMoveRaw = 0,
    CmdRgbLed = 1,
    Lh2RawLocation = 2,
    Lh2Location = 3,
    Advertisement = 4,
    GpsPosition = 5,
    DotBotData = 6,
    ControlMode = 7,
    Lh2Waypoints = 8,
    GpsWaypoints = 9,
    SailBotData = 10,
    CmdXgoAction = 11,
    Lh2ProcessedData = 12,
    Lh2RawData = 13,
    DotBotAdvertisement = 14,
    Lh2CalibrationHomography = 15,
    DotBotSimulatorData = 250,
}

/// MAC header present in every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub packet_type: PacketType,
    pub destination: Address,
    pub source: Address,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            packet_type: PacketType::Data,
            destination: Address::BROADCAST,
            source: Address::GATEWAY,
        }
    }
}

impl Header {
    pub const SIZE: usize = 18;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Header(format!(
                "need {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        let version = data[0];
        if version != PROTOCOL_VERSION {
            return Err(Error::Header(format!(
                "unsupported protocol version '{}' (expected: {})",
                version, PROTOCOL_VERSION
            )));
        }
        let packet_type = PacketType::try_from(data[1])
            .map_err(|_| Error::Header(format!("invalid packet type '0x{:02x}'", data[1])))?;
        Ok(Self {
            version,
            packet_type,
            destination: Address(u64::from_le_bytes(data[2..10].try_into()?)),
            source: Address(u64::from_le_bytes(data[10..18].try_into()?)),
        })
    }

    pub fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.version);
        buffer.push(self.packet_type.into());
        buffer.extend_from_slice(&self.destination.0.to_le_bytes());
        buffer.extend_from_slice(&self.source.0.to_le_bytes());
    }
}

/// Move raw command data fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandMoveRaw {
    pub left_x: i8,
    pub left_y: i8,
    pub right_x: i8,
    pub right_y: i8,
}

impl CommandMoveRaw {
    const SIZE: usize = 4;

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(short("move raw command", Self::SIZE, data.len()));
        }
        Ok(Self {
            left_x: data[0] as i8,
            left_y: data[1] as i8,
            right_x: data[2] as i8,
            right_y: data[3] as i8,
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&[
            self.left_x as u8,
            self.left_y as u8,
            self.right_x as u8,
            self.right_y as u8,
        ]);
    }
}

/// RGB LED command fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandRgbLed {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl CommandRgbLed {
    const SIZE: usize = 3;

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(short("rgb led command", Self::SIZE, data.len()));
        }
        Ok(Self {
            red: data[0],
            green: data[1],
            blue: data[2],
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&[self.red, self.green, self.blue]);
    }
}

/// XGO action command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandXgoAction {
    pub action: u8,
}

impl CommandXgoAction {
    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(short("xgo action command", 1, 0));
        }
        Ok(Self { action: data[0] })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.action);
    }
}

/// Advertisement broadcast by robots announcing their application kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertisement {
    pub application: ApplicationType,
}

impl Advertisement {
    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(short("advertisement", 1, 0));
        }
        let application = ApplicationType::try_from(data[0])
            .map_err(|_| Error::Header(format!("invalid application tag '0x{:02x}'", data[0])))?;
        Ok(Self { application })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.application.into());
    }
}

/// Advertisement variant emitted by the DotBot application, carrying its
/// calibration state, heading, LH2 position and battery level.
///
/// `direction` is `0xFFFF` when the heading is unknown and the position
/// coordinates are `0xFFFF_FFFF` when no LH2 fix is available. Battery is
/// reported in millivolts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DotBotAdvertisement {
    pub calibrated: bool,
    pub direction: u16,
    pub pos_x: u32,
    pub pos_y: u32,
    pub battery: u16,
}

impl DotBotAdvertisement {
    const SIZE: usize = 13;

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(short("dotbot advertisement", Self::SIZE, data.len()));
        }
        Ok(Self {
            calibrated: data[0] != 0,
            direction: u16::from_le_bytes(data[1..3].try_into()?),
            pos_x: u32::from_le_bytes(data[3..7].try_into()?),
            pos_y: u32::from_le_bytes(data[7..11].try_into()?),
            battery: u16::from_le_bytes(data[11..13].try_into()?),
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.push(u8::from(self.calibrated));
        buffer.extend_from_slice(&self.direction.to_le_bytes());
        buffer.extend_from_slice(&self.pos_x.to_le_bytes());
        buffer.extend_from_slice(&self.pos_y.to_le_bytes());
        buffer.extend_from_slice(&self.battery.to_le_bytes());
    }
}

/// LH2 raw location data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lh2RawLocation {
    pub bits: u64,
    pub polynomial_index: u8,
    pub offset: i8,
}

impl Lh2RawLocation {
    const SIZE: usize = 10;

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(short("LH2 raw location", Self::SIZE, data.len()));
        }
        Ok(Self {
            bits: u64::from_le_bytes(data[0..8].try_into()?),
            polynomial_index: data[8],
            offset: data[9] as i8,
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.bits.to_le_bytes());
        buffer.push(self.polynomial_index);
        buffer.push(self.offset as u8);
    }
}

/// List of LH2 raw locations, length governed by a leading count byte.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Lh2RawData {
    pub locations: Vec<Lh2RawLocation>,
}

impl Lh2RawData {
    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(short("LH2 raw data", 1, 0));
        }
        let count = usize::from(data[0]);
        let mut data = &data[1..];
        let mut locations = Vec::with_capacity(count);
        for _ in 0..count {
            if data.len() < Lh2RawLocation::SIZE {
                return Err(short("LH2 raw data", Lh2RawLocation::SIZE, data.len()));
            }
            locations.push(Lh2RawLocation::from_bytes(data)?);
            data = &data[Lh2RawLocation::SIZE..];
        }
        Ok(Self { locations })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.locations.len() as u8);
        for location in &self.locations {
            location.to_bytes(buffer);
        }
    }
}

/// LH2 processed location data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lh2ProcessedLocation {
    pub polynomial_index: u8,
    pub lfsr_index: u32,
    pub timestamp_us: u32,
}

impl Lh2ProcessedLocation {
    const SIZE: usize = 9;

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(short("LH2 processed location", Self::SIZE, data.len()));
        }
        Ok(Self {
            polynomial_index: data[0],
            lfsr_index: u32::from_le_bytes(data[1..5].try_into()?),
            timestamp_us: u32::from_le_bytes(data[5..9].try_into()?),
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.polynomial_index);
        buffer.extend_from_slice(&self.lfsr_index.to_le_bytes());
        buffer.extend_from_slice(&self.timestamp_us.to_le_bytes());
    }
}

/// LH2 computed location, in micro-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lh2Location {
    pub pos_x: u32,
    pub pos_y: u32,
    pub pos_z: u32,
}

impl Lh2Location {
    const SIZE: usize = 12;

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(short("LH2 location", Self::SIZE, data.len()));
        }
        Ok(Self {
            pos_x: u32::from_le_bytes(data[0..4].try_into()?),
            pos_y: u32::from_le_bytes(data[4..8].try_into()?),
            pos_z: u32::from_le_bytes(data[8..12].try_into()?),
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.pos_x.to_le_bytes());
        buffer.extend_from_slice(&self.pos_y.to_le_bytes());
        buffer.extend_from_slice(&self.pos_z.to_le_bytes());
    }
}

/// Direction and LH2 raw data from the DotBot application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotBotData {
    pub direction: i16,
    pub locations: Vec<Lh2RawLocation>,
}

impl DotBotData {
    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 3 {
            return Err(short("dotbot data", 3, data.len()));
        }
        let direction = i16::from_le_bytes(data[0..2].try_into()?);
        let count = usize::from(data[2]);
        let mut data = &data[3..];
        let mut locations = Vec::with_capacity(count);
        for _ in 0..count {
            if data.len() < Lh2RawLocation::SIZE {
                return Err(short("dotbot data", Lh2RawLocation::SIZE, data.len()));
            }
            locations.push(Lh2RawLocation::from_bytes(data)?);
            data = &data[Lh2RawLocation::SIZE..];
        }
        Ok(Self {
            direction,
            locations,
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.direction.to_le_bytes());
        buffer.push(self.locations.len() as u8);
        for location in &self.locations {
            location.to_bytes(buffer);
        }
    }
}

/// GPS position in signed micro-degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpsPosition {
    pub latitude: i32,
    pub longitude: i32,
}

impl GpsPosition {
    const SIZE: usize = 8;

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(short("GPS position", Self::SIZE, data.len()));
        }
        Ok(Self {
            latitude: i32::from_le_bytes(data[0..4].try_into()?),
            longitude: i32::from_le_bytes(data[4..8].try_into()?),
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.latitude.to_le_bytes());
        buffer.extend_from_slice(&self.longitude.to_le_bytes());
    }
}

/// Telemetry from the SailBot application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SailBotData {
    /// Heading, `0xFFFF` when unknown.
    pub direction: u16,
    pub latitude: i32,
    pub longitude: i32,
    /// Wind angle in degrees, `0xFFFF` when the sensor has no reading.
    pub wind_angle: u16,
    pub rudder_angle: i8,
    pub sail_angle: i8,
}

impl SailBotData {
    const SIZE: usize = 14;

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(short("sailbot data", Self::SIZE, data.len()));
        }
        Ok(Self {
            direction: u16::from_le_bytes(data[0..2].try_into()?),
            latitude: i32::from_le_bytes(data[2..6].try_into()?),
            longitude: i32::from_le_bytes(data[6..10].try_into()?),
            wind_angle: u16::from_le_bytes(data[10..12].try_into()?),
            rudder_angle: data[12] as i8,
            sail_angle: data[13] as i8,
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.direction.to_le_bytes());
        buffer.extend_from_slice(&self.latitude.to_le_bytes());
        buffer.extend_from_slice(&self.longitude.to_le_bytes());
        buffer.extend_from_slice(&self.wind_angle.to_le_bytes());
        buffer.push(self.rudder_angle as u8);
        buffer.push(self.sail_angle as u8);
    }
}

/// Heading and position from the DotBot simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DotBotSimulatorData {
    pub theta: u16,
    pub pos_x: u32,
    pub pos_y: u32,
}

impl DotBotSimulatorData {
    const SIZE: usize = 10;

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(short("simulator data", Self::SIZE, data.len()));
        }
        Ok(Self {
            theta: u16::from_le_bytes(data[0..2].try_into()?),
            pos_x: u32::from_le_bytes(data[2..6].try_into()?),
            pos_y: u32::from_le_bytes(data[6..10].try_into()?),
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.theta.to_le_bytes());
        buffer.extend_from_slice(&self.pos_x.to_le_bytes());
        buffer.extend_from_slice(&self.pos_y.to_le_bytes());
    }
}

/// List of LH2 waypoints with the reached threshold.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Lh2Waypoints {
    pub threshold: u8,
    pub waypoints: Vec<Lh2Location>,
}

impl Lh2Waypoints {
    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(short("LH2 waypoints", 2, data.len()));
        }
        let threshold = data[0];
        let count = usize::from(data[1]);
        let mut data = &data[2..];
        let mut waypoints = Vec::with_capacity(count);
        for _ in 0..count {
            if data.len() < Lh2Location::SIZE {
                return Err(short("LH2 waypoints", Lh2Location::SIZE, data.len()));
            }
            waypoints.push(Lh2Location::from_bytes(data)?);
            data = &data[Lh2Location::SIZE..];
        }
        Ok(Self {
            threshold,
            waypoints,
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.threshold);
        buffer.push(self.waypoints.len() as u8);
        for waypoint in &self.waypoints {
            waypoint.to_bytes(buffer);
        }
    }
}

/// List of GPS waypoints with the reached threshold.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GpsWaypoints {
    pub threshold: u8,
    pub waypoints: Vec<GpsPosition>,
}

impl GpsWaypoints {
    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(short("GPS waypoints", 2, data.len()));
        }
        let threshold = data[0];
        let count = usize::from(data[1]);
        let mut data = &data[2..];
        let mut waypoints = Vec::with_capacity(count);
        for _ in 0..count {
            if data.len() < GpsPosition::SIZE {
                return Err(short("GPS waypoints", GpsPosition::SIZE, data.len()));
            }
            waypoints.push(GpsPosition::from_bytes(data)?);
            data = &data[GpsPosition::SIZE..];
        }
        Ok(Self {
            threshold,
            waypoints,
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.threshold);
        buffer.push(self.waypoints.len() as u8);
        for waypoint in &self.waypoints {
            waypoint.to_bytes(buffer);
        }
    }
}

/// LH2 calibration artifact sent to uncalibrated robots: a homography
/// matrix index and the matrix itself, kept opaque at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lh2CalibrationHomography {
    pub index: u32,
    pub homography: [u8; 36],
}

impl Lh2CalibrationHomography {
    const SIZE: usize = 40;

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(short("LH2 calibration", Self::SIZE, data.len()));
        }
        Ok(Self {
            index: u32::from_le_bytes(data[0..4].try_into()?),
            homography: data[4..40].try_into()?,
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.index.to_le_bytes());
        buffer.extend_from_slice(&self.homography);
    }
}

/// Typed payload of a packet, one variant per [PayloadType].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    CmdMoveRaw(CommandMoveRaw),
    CmdRgbLed(CommandRgbLed),
    Lh2RawLocation(Lh2RawLocation),
    Lh2Location(Lh2Location),
    Advertisement(Advertisement),
    GpsPosition(GpsPosition),
    DotBotData(DotBotData),
    ControlMode(ControlMode),
    Lh2Waypoints(Lh2Waypoints),
    GpsWaypoints(GpsWaypoints),
    SailBotData(SailBotData),
    CmdXgoAction(CommandXgoAction),
    Lh2ProcessedData(Lh2ProcessedLocation),
    Lh2RawData(Lh2RawData),
    DotBotAdvertisement(DotBotAdvertisement),
    Lh2CalibrationHomography(Lh2CalibrationHomography),
    DotBotSimulatorData(DotBotSimulatorData),
}

impl Payload {
    /// Payload type tag of this payload.
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::CmdMoveRaw(_) => PayloadType::CmdMoveRaw,
            Payload::CmdRgbLed(_) => PayloadType::CmdRgbLed,
            Payload::Lh2RawLocation(_) => PayloadType::Lh2RawLocation,
            Payload::Lh2Location(_) => PayloadType::Lh2Location,
            Payload::Advertisement(_) => PayloadType::Advertisement,
            Payload::GpsPosition(_) => PayloadType::GpsPosition,
            Payload::DotBotData(_) => PayloadType::DotBotData,
            Payload::ControlMode(_) => PayloadType::ControlMode,
            Payload::Lh2Waypoints(_) => PayloadType::Lh2Waypoints,
            Payload::GpsWaypoints(_) => PayloadType::GpsWaypoints,
            Payload::SailBotData(_) => PayloadType::SailBotData,
            Payload::CmdXgoAction(_) => PayloadType::CmdXgoAction,
            Payload::Lh2ProcessedData(_) => PayloadType::Lh2ProcessedData,
            Payload::Lh2RawData(_) => PayloadType::Lh2RawData,
            Payload::DotBotAdvertisement(_) => PayloadType::DotBotAdvertisement,
            Payload::Lh2CalibrationHomography(_) => PayloadType::Lh2CalibrationHomography,
            Payload::DotBotSimulatorData(_) => PayloadType::DotBotSimulatorData,
        }
    }

    fn from_bytes(payload_type: PayloadType, data: &[u8]) -> Result<Self> {
        Ok(match payload_type {
            PayloadType::CmdMoveRaw => Payload::CmdMoveRaw(CommandMoveRaw::from_bytes(data)?),
            PayloadType::CmdRgbLed => Payload::CmdRgbLed(CommandRgbLed::from_bytes(data)?),
            PayloadType::Lh2RawLocation => {
                Payload::Lh2RawLocation(Lh2RawLocation::from_bytes(data)?)
            }
            PayloadType::Lh2Location => Payload::Lh2Location(Lh2Location::from_bytes(data)?),
            PayloadType::Advertisement => Payload::Advertisement(Advertisement::from_bytes(data)?),
            PayloadType::GpsPosition => Payload::GpsPosition(GpsPosition::from_bytes(data)?),
            PayloadType::DotBotData => Payload::DotBotData(DotBotData::from_bytes(data)?),
            PayloadType::ControlMode => {
                if data.is_empty() {
                    return Err(short("control mode", 1, 0));
                }
                Payload::ControlMode(ControlMode::try_from(data[0]).map_err(|_| {
                    Error::Header(format!("invalid control mode '0x{:02x}'", data[0]))
                })?)
            }
            PayloadType::Lh2Waypoints => Payload::Lh2Waypoints(Lh2Waypoints::from_bytes(data)?),
            PayloadType::GpsWaypoints => Payload::GpsWaypoints(GpsWaypoints::from_bytes(data)?),
            PayloadType::SailBotData => Payload::SailBotData(SailBotData::from_bytes(data)?),
            PayloadType::CmdXgoAction => Payload::CmdXgoAction(CommandXgoAction::from_bytes(data)?),
            PayloadType::Lh2ProcessedData => {
                Payload::Lh2ProcessedData(Lh2ProcessedLocation::from_bytes(data)?)
            }
            PayloadType::Lh2RawData => Payload::Lh2RawData(Lh2RawData::from_bytes(data)?),
            PayloadType::DotBotAdvertisement => {
                Payload::DotBotAdvertisement(DotBotAdvertisement::from_bytes(data)?)
            }
            PayloadType::Lh2CalibrationHomography => {
                Payload::Lh2CalibrationHomography(Lh2CalibrationHomography::from_bytes(data)?)
            }
            PayloadType::DotBotSimulatorData => {
                Payload::DotBotSimulatorData(DotBotSimulatorData::from_bytes(data)?)
            }
        })
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        match self {
            Payload::CmdMoveRaw(body) => body.to_bytes(buffer),
            Payload::CmdRgbLed(body) => body.to_bytes(buffer),
            Payload::Lh2RawLocation(body) => body.to_bytes(buffer),
            Payload::Lh2Location(body) => body.to_bytes(buffer),
            Payload::Advertisement(body) => body.to_bytes(buffer),
            Payload::GpsPosition(body) => body.to_bytes(buffer),
            Payload::DotBotData(body) => body.to_bytes(buffer),
            Payload::ControlMode(mode) => buffer.push((*mode).into()),
            Payload::Lh2Waypoints(body) => body.to_bytes(buffer),
            Payload::GpsWaypoints(body) => body.to_bytes(buffer),
            Payload::SailBotData(body) => body.to_bytes(buffer),
            Payload::CmdXgoAction(body) => body.to_bytes(buffer),
            Payload::Lh2ProcessedData(body) => body.to_bytes(buffer),
            Payload::Lh2RawData(body) => body.to_bytes(buffer),
            Payload::DotBotAdvertisement(body) => body.to_bytes(buffer),
            Payload::Lh2CalibrationHomography(body) => body.to_bytes(buffer),
            Payload::DotBotSimulatorData(body) => body.to_bytes(buffer),
        }
    }
}

/// A complete protocol frame: header, payload type byte and payload body.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: Header,
    pub payload: Payload,
}

impl Frame {
    /// Builds a data frame from the gateway to `destination`.
    pub fn new(destination: Address, payload: Payload) -> Self {
        Self {
            header: Header {
                destination,
                ..Header::default()
            },
            payload,
        }
    }

    /// Parses a frame from its wire representation.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(data)?;
        let data = &data[Header::SIZE..];
        if data.is_empty() {
            return Err(short("payload type", 1, 0));
        }
        let payload_type =
            PayloadType::try_from(data[0]).map_err(|_| Error::UnsupportedPayload(data[0]))?;
        let payload = Payload::from_bytes(payload_type, &data[1..])?;
        Ok(Self { header, payload })
    }

    /// Serializes the frame to its wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(Header::SIZE + 16);
        self.header.to_bytes(&mut buffer);
        buffer.push(self.payload.payload_type().into());
        self.payload.to_bytes(&mut buffer);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(destination: u64, source: u64) -> Vec<u8> {
        let mut bytes = vec![PROTOCOL_VERSION, 0x05];
        bytes.extend_from_slice(&destination.to_le_bytes());
        bytes.extend_from_slice(&source.to_le_bytes());
        bytes
    }

    #[test]
    fn move_raw_frame_bytes() {
        let frame = Frame::new(
            Address::new(0x1122334455667788),
            Payload::CmdMoveRaw(CommandMoveRaw {
                left_x: -10,
                left_y: -10,
                right_x: -10,
                right_y: -10,
            }),
        );
        let mut expected = header_bytes(0x1122334455667788, 0);
        expected.extend_from_slice(&[0x00, 0xF6, 0xF6, 0xF6, 0xF6]);
        assert_eq!(frame.to_bytes(), expected);
        assert_eq!(Frame::from_bytes(&expected).unwrap(), frame);
    }

    #[test]
    fn advertisement_frame_bytes() {
        let mut bytes = header_bytes(0, 0x4242);
        bytes.extend_from_slice(&[0x04, 0x01]);
        let frame = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(frame.header.source, Address::new(0x4242));
        assert_eq!(
            frame.payload,
            Payload::Advertisement(Advertisement {
                application: ApplicationType::SailBot
            })
        );
        assert_eq!(frame.to_bytes(), bytes);
    }

    #[test]
    fn gps_position_frame_bytes() {
        let mut bytes = header_bytes(0, 0x4242);
        bytes.push(0x05);
        bytes.extend_from_slice(&48_856_614i32.to_le_bytes());
        bytes.extend_from_slice(&2_352_221i32.to_le_bytes());
        let frame = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(
            frame.payload,
            Payload::GpsPosition(GpsPosition {
                latitude: 48_856_614,
                longitude: 2_352_221,
            })
        );
        assert_eq!(frame.to_bytes(), bytes);
    }

    #[test]
    fn roundtrip_all_payload_variants() {
        let payloads = vec![
            Payload::CmdMoveRaw(CommandMoveRaw {
                left_x: 10,
                left_y: -66,
                right_x: 0,
                right_y: 66,
            }),
            Payload::CmdRgbLed(CommandRgbLed {
                red: 1,
                green: 2,
                blue: 3,
            }),
            Payload::Lh2RawLocation(Lh2RawLocation {
                bits: 0xF1DEBC9A78563412,
                polynomial_index: 1,
                offset: -2,
            }),
            Payload::Lh2Location(Lh2Location {
                pos_x: 1000,
                pos_y: 1000,
                pos_z: 2,
            }),
            Payload::Advertisement(Advertisement {
                application: ApplicationType::DotBot,
            }),
            Payload::GpsPosition(GpsPosition {
                latitude: -48_856_614,
                longitude: 2_352_221,
            }),
            Payload::DotBotData(DotBotData {
                direction: -90,
                locations: vec![
                    Lh2RawLocation {
                        bits: 0x0123456789ABCDEF,
                        polynomial_index: 0,
                        offset: 3,
                    },
                    Lh2RawLocation {
                        bits: 0xF1DEBC9A78563412,
                        polynomial_index: 1,
                        offset: 2,
                    },
                ],
            }),
            Payload::ControlMode(ControlMode::Auto),
            Payload::Lh2Waypoints(Lh2Waypoints {
                threshold: 10,
                waypoints: vec![Lh2Location {
                    pos_x: 500_000,
                    pos_y: 100_000,
                    pos_z: 0,
                }],
            }),
            Payload::GpsWaypoints(GpsWaypoints {
                threshold: 40,
                waypoints: vec![
                    GpsPosition {
                        latitude: 48_832_313,
                        longitude: 2_412_689,
                    },
                    GpsPosition {
                        latitude: 48_832_999,
                        longitude: 2_412_000,
                    },
                ],
            }),
            Payload::SailBotData(SailBotData {
                direction: 270,
                latitude: 48_832_313,
                longitude: 2_412_689,
                wind_angle: 135,
                rudder_angle: -10,
                sail_angle: 20,
            }),
            Payload::CmdXgoAction(CommandXgoAction { action: 7 }),
            Payload::Lh2ProcessedData(Lh2ProcessedLocation {
                polynomial_index: 2,
                lfsr_index: 12345,
                timestamp_us: 67890,
            }),
            Payload::Lh2RawData(Lh2RawData {
                locations: vec![Lh2RawLocation {
                    bits: 42,
                    polynomial_index: 4,
                    offset: 0,
                }],
            }),
            Payload::DotBotAdvertisement(DotBotAdvertisement {
                calibrated: true,
                direction: 45,
                pos_x: 500_000,
                pos_y: 250_000,
                battery: 3700,
            }),
            Payload::Lh2CalibrationHomography(Lh2CalibrationHomography {
                index: 3,
                homography: [0xAB; 36],
            }),
            Payload::DotBotSimulatorData(DotBotSimulatorData {
                theta: 90,
                pos_x: 100,
                pos_y: 200,
            }),
        ];
        for payload in payloads {
            let frame = Frame::new(Address::new(0x1122334455667788), payload);
            let parsed = Frame::from_bytes(&frame.to_bytes()).unwrap();
            assert_eq!(parsed, frame);
        }
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = header_bytes(0, 0x4242);
        bytes[0] = PROTOCOL_VERSION - 1;
        bytes.extend_from_slice(&[0x04, 0x00]);
        assert!(matches!(Frame::from_bytes(&bytes), Err(Error::Header(_))));
    }

    #[test]
    fn rejects_invalid_packet_type() {
        let mut bytes = header_bytes(0, 0x4242);
        bytes[1] = 0x2A;
        bytes.extend_from_slice(&[0x04, 0x00]);
        assert!(matches!(Frame::from_bytes(&bytes), Err(Error::Header(_))));
    }

    #[test]
    fn rejects_unknown_payload_type() {
        let mut bytes = header_bytes(0, 0x4242);
        bytes.push(0xFE);
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(Error::UnsupportedPayload(0xFE))
        ));
    }

    #[test]
    fn rejects_invalid_application_tag() {
        let mut bytes = header_bytes(0, 0x4242);
        bytes.extend_from_slice(&[0x04, 0x2A]);
        assert!(matches!(Frame::from_bytes(&bytes), Err(Error::Header(_))));
    }

    #[test]
    fn rejects_truncated_bodies() {
        // Fixed-size body cut short
        let mut bytes = header_bytes(0x4242, 0);
        bytes.extend_from_slice(&[0x00, 0xF6, 0xF6]);
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(Error::ShortPayload(_))
        ));

        // Count byte declares two waypoints but only one follows
        let mut bytes = header_bytes(0x4242, 0);
        bytes.extend_from_slice(&[0x08, 0x0A, 0x02]);
        bytes.extend_from_slice(&[0x00; 12]);
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(Error::ShortPayload(_))
        ));

        // Missing payload type byte entirely
        let bytes = header_bytes(0x4242, 0);
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(Error::ShortPayload(_))
        ));
    }

    #[test]
    fn address_renders_as_lowercase_hex() {
        let address = Address::new(0x4242);
        assert_eq!(address.to_string(), "0000000000004242");
        assert_eq!("0000000000004242".parse::<Address>().unwrap(), address);
        assert_eq!(
            Address::BROADCAST.to_string(),
            "ffffffffffffffff"
        );
        assert!("not hex".parse::<Address>().is_err());
    }

    #[test]
    fn address_serde_roundtrip() {
        let address = Address::new(0xABCDEF);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"0000000000abcdef\"");
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), address);
    }
}
