//! # Fleet controller
//!
//! The controller owns the registry of known robots and sits between the
//! gateway adapter and the HTTP/WebSocket/MQTT bindings. Inbound frames
//! mutate the registry; outbound commands become frames handed to the
//! adapter; connected clients learn about changes through a broadcast
//! notification stream.
//!
//! A robot enters the registry the first time it advertises itself; any
//! other telemetry from an unknown address is dropped. Records are never
//! evicted: a robot that goes quiet is marked `Inactive` after 5 seconds
//! and `Lost` after 60, by a periodic sweep that derives the status from
//! the time elapsed since the robot's last frame.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dotbot_lib::adapter::SerialAdapter;
//! use dotbot_lib::controller::{Controller, ControllerSettings};
//!
//! # async fn run() -> dotbot_lib::Result<()> {
//! let settings = ControllerSettings::default();
//! let adapter = Arc::new(SerialAdapter::new(&settings.port, settings.baudrate));
//! let controller = Controller::start(settings, adapter).await?;
//!
//! let dotbots = controller.dotbots(&Default::default()).await;
//! println!("{} robots known", dotbots.len());
//!
//! controller.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! The registry is only ever touched with its lock held for a whole
//! read-modify-write, so `last_seen` stays monotonic and status is only
//! written by the sweep.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_broadcast::broadcast;
use flume as channel;
use futures::lock::Mutex;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use crate::adapter::{GatewayAdapter, SerialAdapter, SERIAL_BAUDRATE_DEFAULT, SERIAL_PORT_DEFAULT};
use crate::models::{
    DotBot, DotBotQuery, DotBotStatus, GPSPosition, LH2Position, MoveRawCommand, Notification,
    NotificationUpdate, Position, RgbLedCommand, Waypoints, XgoActionCommand,
};
use crate::protocol::{
    Address, ApplicationType, Frame, GpsPosition, GpsWaypoints, Lh2CalibrationHomography,
    Lh2Location, Lh2Waypoints, Payload,
};
use crate::{Error, Result};

/// A robot is Inactive once nothing was heard from it for this long.
pub const INACTIVE_DELAY: Duration = Duration::from_secs(5);
/// A robot is Lost once nothing was heard from it for this long.
pub const LOST_DELAY: Duration = Duration::from_secs(60);

/// Minimum move before an LH2 position enters the history, in arena units.
pub const LH2_POSITION_DISTANCE_THRESHOLD: f32 = 0.01;
/// Minimum move before a GPS position enters the history, in meters.
pub const GPS_POSITION_DISTANCE_THRESHOLD: f64 = 5.0;

const SWEEP_PERIOD: Duration = Duration::from_secs(1);
const NOTIFICATION_QUEUE_SIZE: usize = 100;
const EARTH_RADIUS_M: f64 = 6_371_000.0;

// SailBot headings outside this range are sensor noise
const SAILBOT_DIRECTION_MAX: u16 = 500;

fn lh2_distance(last: &LH2Position, new: &LH2Position) -> f32 {
    ((new.x - last.x).powi(2) + (new.y - last.y).powi(2)).sqrt()
}

/// Haversine distance between two GPS positions, in meters.
fn gps_distance(last: &GPSPosition, new: &GPSPosition) -> f64 {
    let lat1 = last.latitude.to_radians();
    let lat2 = new.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (new.longitude - last.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * EARTH_RADIUS_M
}

fn admit_position(history: &VecDeque<Position>, new: &Position) -> bool {
    match (history.back(), new) {
        (None, _) => true,
        (Some(Position::Lh2(last)), Position::Lh2(new)) => {
            lh2_distance(last, new) >= LH2_POSITION_DISTANCE_THRESHOLD
        }
        (Some(Position::Gps(last)), Position::Gps(new)) => {
            gps_distance(last, new) >= GPS_POSITION_DISTANCE_THRESHOLD
        }
        // Positioning kind changed, keep the sample
        _ => true,
    }
}

pub(crate) fn status_for(elapsed: Duration) -> DotBotStatus {
    if elapsed > LOST_DELAY {
        DotBotStatus::Lost
    } else if elapsed > INACTIVE_DELAY {
        DotBotStatus::Inactive
    } else {
        DotBotStatus::Active
    }
}

/// Reads the LH2 calibration artifact: a 32-bit index followed by the
/// 36-byte homography matrix, kept opaque here.
pub fn load_calibration(path: &Path) -> Result<Lh2CalibrationHomography> {
    let data = std::fs::read(path)
        .map_err(|e| Error::SystemError(format!("cannot read calibration file: {}", e)))?;
    if data.len() < 40 {
        return Err(Error::ShortPayload(format!(
            "calibration file: need 40 bytes, got {}",
            data.len()
        )));
    }
    Ok(Lh2CalibrationHomography {
        index: u32::from_le_bytes(data[0..4].try_into()?),
        homography: data[4..40].try_into()?,
    })
}

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Serial port of the gateway.
    pub port: String,
    /// Serial baudrate.
    pub baudrate: u32,
    /// Path of the LH2 calibration artifact, read once on startup.
    pub calibration_path: Option<PathBuf>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            port: SERIAL_PORT_DEFAULT.to_owned(),
            baudrate: SERIAL_BAUDRATE_DEFAULT,
            calibration_path: None,
        }
    }
}

/// # The DotBot fleet controller
///
/// Create one with [Controller::start] (or [Controller::start_serial] to let
/// it open the default serial adapter). The returned `Arc` is intended to be
/// shared between tasks: every method takes `&self`.
pub struct Controller {
    dotbots: Mutex<BTreeMap<Address, DotBot>>,
    uplink: channel::Sender<Frame>,
    notification_sender: async_broadcast::Sender<Notification>,
    notification_receiver: async_broadcast::Receiver<Notification>,
    calibration: Option<Lh2CalibrationHomography>,
    adapter: Arc<dyn GatewayAdapter>,
    disconnect: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Starts the controller on an already constructed gateway adapter.
    ///
    /// This opens the link, spawns the frame dispatcher, the outbound
    /// writer and the status sweep, and returns the running controller.
    pub async fn start(
        settings: ControllerSettings,
        adapter: Arc<dyn GatewayAdapter>,
    ) -> Result<Arc<Self>> {
        let calibration = match &settings.calibration_path {
            Some(path) => match load_calibration(path) {
                Ok(calibration) => {
                    info!("LH2 calibration loaded (index {})", calibration.index);
                    Some(calibration)
                }
                Err(e) => {
                    warn!("No LH2 calibration available: {}", e);
                    None
                }
            },
            None => None,
        };

        let (frame_tx, frame_rx) = channel::unbounded();
        adapter.start(frame_tx).await?;

        let (uplink, uplink_rx) = channel::unbounded();
        let (mut notification_sender, notification_receiver) = broadcast(NOTIFICATION_QUEUE_SIZE);
        // Slow listeners lose old notifications instead of blocking the
        // controller
        notification_sender.set_overflow(true);

        let controller = Arc::new(Self {
            dotbots: Mutex::new(BTreeMap::new()),
            uplink,
            notification_sender,
            notification_receiver,
            calibration,
            adapter: adapter.clone(),
            disconnect: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        });

        // Outbound writer: preserves the order commands were issued in
        let writer_task = {
            let adapter = adapter.clone();
            let disconnect = controller.disconnect.clone();
            tokio::spawn(async move {
                while !disconnect.load(Relaxed) {
                    match tokio::time::timeout(Duration::from_millis(100), uplink_rx.recv_async())
                        .await
                    {
                        Ok(Ok(frame)) => {
                            if let Err(e) = adapter.send_frame(&frame).await {
                                error!("Dropping outbound frame: {}", e);
                                if matches!(e, Error::LinkDown(_)) {
                                    // A write failure terminates the
                                    // controller just like a read failure
                                    disconnect.store(true, Relaxed);
                                    return;
                                }
                            }
                        }
                        Ok(Err(channel::RecvError::Disconnected)) => return,
                        Err(_) => (),
                    }
                }
            })
        };

        // Frame dispatcher: no error in the decode/handle path may take
        // this task down
        let dispatch_task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                while !controller.disconnect.load(Relaxed) {
                    match tokio::time::timeout(Duration::from_millis(100), frame_rx.recv_async())
                        .await
                    {
                        Ok(Ok(frame)) => controller.handle_frame(&frame).await,
                        Ok(Err(channel::RecvError::Disconnected)) => {
                            error!("Gateway link closed");
                            controller.disconnect.store(true, Relaxed);
                            return;
                        }
                        Err(_) => (),
                    }
                }
            })
        };

        // Status sweep
        let sweep_task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SWEEP_PERIOD);
                while !controller.disconnect.load(Relaxed) {
                    ticker.tick().await;
                    if controller.refresh_statuses(Instant::now()).await {
                        controller.notify(Notification::reload()).await;
                    }
                }
            })
        };

        controller
            .tasks
            .lock()
            .await
            .extend([writer_task, dispatch_task, sweep_task]);

        Ok(controller)
    }

    /// Starts the controller on a serial gateway adapter built from the
    /// settings.
    pub async fn start_serial(settings: ControllerSettings) -> Result<Arc<Self>> {
        let adapter = Arc::new(SerialAdapter::new(&settings.port, settings.baudrate));
        Self::start(settings, adapter).await
    }

    /// Stops every task owned by the controller and closes the adapter.
    pub async fn shutdown(&self) {
        self.disconnect.store(true, Relaxed);
        for task in self.tasks.lock().await.drain(..) {
            let _ = task.await;
        }
        self.adapter.close().await;
        info!("Controller stopped");
    }

    /// True once the controller terminated, either through [shutdown] or
    /// because the gateway link went down.
    ///
    /// [shutdown]: Controller::shutdown
    pub fn is_disconnected(&self) -> bool {
        self.disconnect.load(Relaxed)
    }

    /// Returns a receiver of controller notifications.
    ///
    /// Every connected client gets its own receiver; notifications are
    /// delivered to all of them in the order they were generated.
    pub fn notifications(&self) -> async_broadcast::Receiver<Notification> {
        self.notification_receiver.clone()
    }

    async fn notify(&self, notification: Notification) {
        debug!("notify {:?}", notification.cmd);
        let _ = self.notification_sender.broadcast(notification).await;
    }

    fn enqueue(&self, frame: Frame) -> Result<()> {
        self.uplink.send(frame).map_err(|_| {
            warn!("Adapter not running, dropping command");
            Error::DispatchBlocked
        })
    }

    /// Handles one parsed inbound frame.
    pub async fn handle_frame(&self, frame: &Frame) {
        // The controller is not interested in echoes of its own commands
        if matches!(
            frame.payload,
            Payload::CmdMoveRaw(_) | Payload::CmdRgbLed(_)
        ) {
            return;
        }
        let source = frame.header.source;
        if source == Address::GATEWAY || source == Address::BROADCAST {
            warn!("Invalid source in payload: {}", source);
            return;
        }

        let is_advertisement = matches!(
            frame.payload,
            Payload::Advertisement(_) | Payload::DotBotAdvertisement(_)
        );

        let mut dotbots = self.dotbots.lock().await;
        if !dotbots.contains_key(&source) && !is_advertisement {
            info!("Ignoring non advertised dotbot {}", source);
            return;
        }

        let mut created = false;
        let dotbot = dotbots.entry(source).or_insert_with(|| {
            created = true;
            DotBot::new(source)
        });
        if created {
            info!("New robot {}", source);
        }

        let mut needs_update = false;
        let mut calibration_to_send = None;

        match &frame.payload {
            Payload::Advertisement(advertisement) => {
                dotbot.application = advertisement.application;
                debug!("Advertisement received from {}", source);
            }
            Payload::DotBotAdvertisement(advertisement) => {
                dotbot.application = ApplicationType::DotBot;
                dotbot.calibrated = advertisement.calibrated;
                if !advertisement.calibrated && self.calibration.is_some() {
                    // Hand the calibration artifact over first; position
                    // fields of this frame are not trusted yet
                    calibration_to_send = self.calibration;
                } else if advertisement.calibrated {
                    if advertisement.direction != 0xFFFF {
                        dotbot.direction = Some(advertisement.direction as i16);
                    }
                    if advertisement.pos_x != u32::MAX && advertisement.pos_y != u32::MAX {
                        let position = LH2Position {
                            x: advertisement.pos_x as f32 / 1e6,
                            y: advertisement.pos_y as f32 / 1e6,
                            z: 0.0,
                        };
                        dotbot.lh2_position = Some(position);
                        if admit_position(&dotbot.position_history, &Position::Lh2(position)) {
                            dotbot.record_position(Position::Lh2(position));
                            needs_update = true;
                        }
                    }
                }
                let battery = f32::from(advertisement.battery) / 1000.0;
                if dotbot.battery != Some(battery) {
                    dotbot.battery = Some(battery);
                    needs_update = true;
                }
            }
            Payload::Lh2Location(location) => {
                let position = LH2Position::from(*location);
                dotbot.lh2_position = Some(position);
                if admit_position(&dotbot.position_history, &Position::Lh2(position)) {
                    dotbot.record_position(Position::Lh2(position));
                    needs_update = true;
                }
            }
            Payload::GpsPosition(gps) => {
                let position = GPSPosition::from(*gps);
                dotbot.gps_position = Some(position);
                if admit_position(&dotbot.position_history, &Position::Gps(position)) {
                    dotbot.record_position(Position::Gps(position));
                    needs_update = true;
                }
            }
            Payload::SailBotData(data) => {
                if data.direction <= SAILBOT_DIRECTION_MAX {
                    dotbot.direction = Some(data.direction as i16);
                }
                let position = GPSPosition::from(GpsPosition {
                    latitude: data.latitude,
                    longitude: data.longitude,
                });
                dotbot.gps_position = Some(position);
                dotbot.wind_angle = (data.wind_angle != 0xFFFF).then_some(data.wind_angle);
                dotbot.rudder_angle = Some(data.rudder_angle);
                dotbot.sail_angle = Some(data.sail_angle);
                if admit_position(&dotbot.position_history, &Position::Gps(position)) {
                    dotbot.record_position(Position::Gps(position));
                    needs_update = true;
                }
            }
            Payload::DotBotData(data) => {
                // Heading plus raw LH2 frames, debug telemetry only
                dotbot.direction = Some(data.direction);
            }
            Payload::ControlMode(mode) => {
                dotbot.mode = *mode;
            }
            _ => {
                debug!(
                    "Ignoring {:?} payload from {}",
                    frame.payload.payload_type(),
                    source
                );
            }
        }

        dotbot.last_seen = Instant::now();

        let notification = if created {
            Some(Notification::reload())
        } else if needs_update {
            Some(Notification::update(NotificationUpdate {
                address: dotbot.address,
                direction: dotbot.direction,
                wind_angle: dotbot.wind_angle,
                rudder_angle: dotbot.rudder_angle,
                sail_angle: dotbot.sail_angle,
                lh2_position: dotbot.lh2_position,
                gps_position: dotbot.gps_position,
                battery: dotbot.battery,
            }))
        } else {
            None
        };
        drop(dotbots);

        if let Some(calibration) = calibration_to_send {
            info!("Send calibration data to {}", source);
            let _ = self.enqueue(Frame::new(
                source,
                Payload::Lh2CalibrationHomography(calibration),
            ));
        }
        if let Some(notification) = notification {
            self.notify(notification).await;
        }
    }

    /// Sends a move raw command to a robot.
    pub async fn send_move_raw(&self, address: Address, command: MoveRawCommand) -> Result<()> {
        let mut dotbots = self.dotbots.lock().await;
        let dotbot = dotbots
            .get_mut(&address)
            .ok_or(Error::UnknownDotBot(address))?;
        self.enqueue(Frame::new(address, Payload::CmdMoveRaw(command.into())))?;
        dotbot.move_raw = Some(command);
        Ok(())
    }

    /// Sends an RGB LED command to a robot.
    pub async fn send_rgb_led(&self, address: Address, command: RgbLedCommand) -> Result<()> {
        let mut dotbots = self.dotbots.lock().await;
        let dotbot = dotbots
            .get_mut(&address)
            .ok_or(Error::UnknownDotBot(address))?;
        self.enqueue(Frame::new(address, Payload::CmdRgbLed(command.into())))?;
        dotbot.rgb_led = Some(command);
        drop(dotbots);
        self.notify(Notification::reload()).await;
        Ok(())
    }

    /// Sends an XGO action to a robot.
    pub async fn send_xgo_action(&self, address: Address, command: XgoActionCommand) -> Result<()> {
        let dotbots = self.dotbots.lock().await;
        if !dotbots.contains_key(&address) {
            return Err(Error::UnknownDotBot(address));
        }
        self.enqueue(Frame::new(address, Payload::CmdXgoAction(command.into())))
    }

    /// Sends a waypoint list to a robot.
    ///
    /// The robot's current position, when known, is prepended to the list
    /// stored in its record so clients can draw the full route; only the
    /// caller supplied waypoints go on the wire.
    pub async fn send_waypoints(
        &self,
        address: Address,
        application: ApplicationType,
        command: &Waypoints,
    ) -> Result<()> {
        let mut dotbots = self.dotbots.lock().await;
        let dotbot = dotbots
            .get_mut(&address)
            .ok_or(Error::UnknownDotBot(address))?;

        let (payload, current_position) = match application {
            ApplicationType::SailBot => {
                let waypoints = command
                    .waypoints
                    .iter()
                    .filter_map(|position| match position {
                        Position::Gps(gps) => Some(GpsPosition::from(*gps)),
                        Position::Lh2(_) => None,
                    })
                    .collect();
                (
                    Payload::GpsWaypoints(GpsWaypoints {
                        threshold: command.threshold,
                        waypoints,
                    }),
                    dotbot.gps_position.map(Position::Gps),
                )
            }
            _ => {
                let waypoints = command
                    .waypoints
                    .iter()
                    .filter_map(|position| match position {
                        Position::Lh2(lh2) => Some(Lh2Location::from(*lh2)),
                        Position::Gps(_) => None,
                    })
                    .collect();
                (
                    Payload::Lh2Waypoints(Lh2Waypoints {
                        threshold: command.threshold,
                        waypoints,
                    }),
                    dotbot.lh2_position.map(Position::Lh2),
                )
            }
        };

        self.enqueue(Frame::new(address, payload))?;

        let mut stored = Vec::with_capacity(command.waypoints.len() + 1);
        stored.extend(current_position);
        stored.extend(command.waypoints.iter().copied());
        dotbot.waypoints = stored;
        dotbot.waypoints_threshold = command.threshold;
        drop(dotbots);

        self.notify(Notification::reload()).await;
        Ok(())
    }

    /// Empties the position history of a robot.
    pub async fn clear_position_history(&self, address: Address) -> Result<()> {
        let mut dotbots = self.dotbots.lock().await;
        let dotbot = dotbots
            .get_mut(&address)
            .ok_or(Error::UnknownDotBot(address))?;
        dotbot.position_history.clear();
        drop(dotbots);
        self.notify(Notification::reload()).await;
        Ok(())
    }

    /// Returns a snapshot of one robot record.
    pub async fn get(&self, address: Address) -> Option<DotBot> {
        self.dotbots.lock().await.get(&address).cloned()
    }

    /// Returns a snapshot of the robots matching the query, sorted by
    /// address.
    pub async fn dotbots(&self, query: &DotBotQuery) -> Vec<DotBot> {
        self.dotbots
            .lock()
            .await
            .values()
            .filter(|dotbot| {
                query
                    .application
                    .map_or(true, |application| dotbot.application == application)
            })
            .filter(|dotbot| query.mode.map_or(true, |mode| dotbot.mode == mode))
            .filter(|dotbot| query.status.map_or(true, |status| dotbot.status == status))
            .filter(|dotbot| query.swarm.map_or(true, |swarm| dotbot.swarm == swarm))
            .map(|dotbot| {
                let mut dotbot = dotbot.clone();
                dotbot.position_history.truncate(query.max_positions);
                dotbot
            })
            .collect()
    }

    /// Re-derives every robot's status from its `last_seen`; returns
    /// whether any status changed.
    pub(crate) async fn refresh_statuses(&self, now: Instant) -> bool {
        let mut changed = false;
        for dotbot in self.dotbots.lock().await.values_mut() {
            let status = status_for(now.saturating_duration_since(dotbot.last_seen));
            if status != dotbot.status {
                info!(
                    "Dotbot {} status changed: {:?} -> {:?}",
                    dotbot.address, dotbot.status, status
                );
                dotbot.status = status;
                changed = true;
            }
        }
        changed
    }
}
