//! # Peripheral Connection State Machine
//!
//! [`Link`] is a pure reducer over one logical connection. It never touches
//! the radio or the clock: host commands and typed [`LinkEvent`]s go in, a
//! list of [`Effect`]s comes out, and the owning task carries them out in
//! order (see [`crate::service`]).
//!
//! ## States
//! ```text
//! Disconnected --connect--> Connecting --LinkUp--> ServiceDiscovery --ServicesFound--> Connected
//!                                          \ (serial) ------------------------------->/
//! any --LinkDown / DiscoveryFailed--> Disconnected (+ reconnect armed)
//! any --disconnect()--> Disconnected (reconnect cancelled)
//! ```
//!
//! ## Session Reset
//! Reaching `Connected` starts from scratch: the queue and the icon-hash cache
//! are cleared, preferences and the last snapshot are enqueued, and the first
//! ping is armed. Dropping the link discards everything queued or in flight;
//! nothing is carried across a reconnect.

use crate::protocol::{self, DeviceId, Preferences, SERVICE_UUID};
use crate::write_queue::{QueueItem, WriteQueue};
use crate::NavigationSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Contract violations reported synchronously to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Writes are only accepted while connected
    #[error("not connected to a peripheral")]
    NotConnected,

    /// `reconnect` needs a device on record
    #[error("no peripheral on record to connect to")]
    NoTarget,

    /// The transport task is gone
    #[error("transport service has shut down")]
    ServiceClosed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    ServiceDiscovery,
    Connected,
}

/// Which kind of radio channel carries the link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// RFCOMM stream, JSON lines; no service discovery
    #[default]
    Serial,
    /// GATT characteristics
    Ble,
}

/// Radio callbacks, after being marshaled onto the owning task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    LinkUp,
    LinkDown,
    ServicesFound(Vec<Uuid>),
    DiscoveryFailed,
    WriteDone { ok: bool },
    PingTick,
    ReconnectTick { radio_ready: bool },
}

/// Coarse status reported to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
}

impl From<ConnectionState> for ConnectionStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Connecting | ConnectionState::ServiceDiscovery => ConnectionStatus::Connecting,
            ConnectionState::Connected => ConnectionStatus::Connected,
        }
    }
}

/// Host-facing events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceEvent {
    /// `None` once navigation has ended
    NavigationUpdated(Option<NavigationSnapshot>),
    /// km/h
    SpeedUpdated(u32),
    ConnectionStatusChanged {
        status: ConnectionStatus,
        device: Option<DeviceId>,
    },
    BackgroundModeChanged(bool),
}

/// Side effect requested by the reducer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Open(DeviceId),
    Close,
    Discover,
    Write(QueueItem),
    ArmPing(Duration),
    CancelPing,
    ArmReconnect(Duration),
    CancelReconnect,
    Emit(ServiceEvent),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkTimings {
    pub ping_interval: Duration,
    pub first_ping_delay: Duration,
    pub reconnect_interval: Duration,
}

impl Default for LinkTimings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            first_ping_delay: Duration::from_millis(1000),
            reconnect_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug)]
pub struct Link {
    kind: BackendKind,
    timings: LinkTimings,
    state: ConnectionState,
    target: Option<DeviceId>,
    last_device: Option<DeviceId>,
    queue: WriteQueue,
    in_flight: Option<QueueItem>,
    sent_icons: HashSet<String>,
    preferences: Preferences,
    last_snapshot: Option<NavigationSnapshot>,
    background: bool,
    first_ping: bool,
}

impl Link {
    pub fn new(kind: BackendKind, timings: LinkTimings, preferences: Preferences) -> Self {
        Self {
            kind,
            timings,
            state: ConnectionState::Disconnected,
            target: None,
            last_device: None,
            queue: WriteQueue::new(),
            in_flight: None,
            sent_icons: HashSet::new(),
            preferences,
            last_snapshot: None,
            background: false,
            first_ping: false,
        }
    }

    /// Device to reconnect to before any explicit `connect`.
    pub fn with_last_device(mut self, device: Option<DeviceId>) -> Self {
        self.last_device = device;
        self
    }

    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn target(&self) -> Option<&DeviceId> {
        self.target.as_ref()
    }

    pub fn last_device(&self) -> Option<&DeviceId> {
        self.last_device.as_ref()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> Option<&QueueItem> {
        self.in_flight.as_ref()
    }

    pub fn background(&self) -> bool {
        self.background
    }

    pub fn last_snapshot(&self) -> Option<&NavigationSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Effects for a freshly started owner task.
    pub fn start(&self) -> Vec<Effect> {
        if self.background && self.state == ConnectionState::Disconnected {
            vec![Effect::ArmReconnect(self.timings.reconnect_interval)]
        } else {
            Vec::new()
        }
    }

    pub fn connect(&mut self, device: DeviceId) -> Vec<Effect> {
        if self.state != ConnectionState::Disconnected && self.target.as_ref() == Some(&device) {
            log::debug!("already {:?} to {device}", self.state);
            return Vec::new();
        }

        let mut effects = Vec::new();
        if self.state != ConnectionState::Disconnected {
            log::info!("switching peripheral to {device}");
            effects.extend(self.teardown());
        }

        log::info!("connecting to {device} over {:?}", self.kind);
        self.state = ConnectionState::Connecting;
        self.target = Some(device.clone());
        self.last_device = Some(device.clone());
        effects.push(Effect::Open(device));
        effects.push(self.status_event());
        effects
    }

    /// Explicit teardown. Does not auto-retry.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state != ConnectionState::Disconnected {
            log::info!("disconnecting from {:?}", self.target);
            effects.extend(self.teardown());
            effects.push(self.status_event());
        }
        self.target = None;
        effects.push(Effect::CancelReconnect);
        effects
    }

    /// Connect to the last known device.
    pub fn reconnect(&mut self) -> Result<Vec<Effect>, TransportError> {
        let device = self.last_device.clone().ok_or(TransportError::NoTarget)?;
        Ok(self.connect(device))
    }

    /// Allow background operation: reconnect while disconnected.
    pub fn enable(&mut self) -> Vec<Effect> {
        self.background = true;
        let mut effects = vec![Effect::Emit(ServiceEvent::BackgroundModeChanged(true))];
        if self.state == ConnectionState::Disconnected {
            effects.push(Effect::ArmReconnect(self.timings.reconnect_interval));
        }
        effects
    }

    pub fn disable(&mut self) -> Vec<Effect> {
        self.background = false;
        vec![
            Effect::CancelReconnect,
            Effect::Emit(ServiceEvent::BackgroundModeChanged(false)),
        ]
    }

    pub fn set_preferences(&mut self, preferences: Preferences) -> Vec<Effect> {
        self.preferences = preferences;
        if self.state != ConnectionState::Connected {
            log::debug!("preferences stored, they are pushed on connect");
            return Vec::new();
        }
        let item = protocol::preferences_item(&self.preferences);
        self.enqueue(item)
    }

    /// New snapshot from the listener, `None` when navigation ended.
    pub fn navigation_updated(&mut self, snapshot: Option<NavigationSnapshot>) -> Vec<Effect> {
        let ended = snapshot.is_none() && self.last_snapshot.is_some();
        self.last_snapshot = snapshot.clone();
        let mut effects = vec![Effect::Emit(ServiceEvent::NavigationUpdated(snapshot))];
        if self.state != ConnectionState::Connected {
            return effects;
        }
        if ended {
            log::info!("navigation ended, clearing peripheral fields");
            for item in protocol::snapshot_items(&NavigationSnapshot::default()) {
                self.queue.push(item);
            }
            effects.extend(self.pump());
        } else {
            effects.extend(self.enqueue_snapshot());
        }
        effects
    }

    pub fn speed_updated(&mut self, kmh: u32) -> Vec<Effect> {
        let mut effects = vec![Effect::Emit(ServiceEvent::SpeedUpdated(kmh))];
        if self.state == ConnectionState::Connected {
            effects.extend(self.enqueue(protocol::speed_item(kmh)));
        }
        effects
    }

    /// Raw write from the host. Rejected unless connected.
    pub fn submit(&mut self, item: QueueItem) -> Result<Vec<Effect>, TransportError> {
        if self.state != ConnectionState::Connected {
            log::warn!("rejecting write on {} while {:?}", item.channel, self.state);
            return Err(TransportError::NotConnected);
        }
        Ok(self.enqueue(item))
    }

    pub fn handle(&mut self, event: LinkEvent) -> Vec<Effect> {
        use ConnectionState::*;

        match (self.state, event) {
            (Connecting, LinkEvent::LinkUp) => match self.kind {
                BackendKind::Serial => self.on_connected(),
                BackendKind::Ble => {
                    self.state = ServiceDiscovery;
                    log::info!("link up, discovering services");
                    vec![Effect::Discover]
                }
            },
            (ServiceDiscovery, LinkEvent::ServicesFound(services)) => {
                if services.contains(&SERVICE_UUID) {
                    self.on_connected()
                } else {
                    log::error!("peripheral does not expose the navigation service");
                    self.on_link_lost()
                }
            }
            (ServiceDiscovery, LinkEvent::DiscoveryFailed) => {
                log::error!("service discovery failed");
                self.on_link_lost()
            }
            (Connecting | ServiceDiscovery | Connected, LinkEvent::LinkDown) => {
                log::warn!("link to {:?} lost", self.target);
                self.on_link_lost()
            }
            (_, LinkEvent::WriteDone { ok }) => {
                match self.in_flight.take() {
                    Some(item) if ok => {
                        // The peripheral holds an icon only once it acknowledged it
                        if let Some(hash) = item.icon_hash() {
                            self.sent_icons.insert(hash.to_string());
                        }
                    }
                    Some(item) => log::warn!("write on {} failed", item.channel),
                    None => log::debug!("write completion with nothing in flight"),
                }
                self.pump()
            }
            (Connected, LinkEvent::PingTick) => {
                let mut effects = if self.first_ping {
                    self.first_ping = false;
                    log::debug!("first ping, resending preferences");
                    self.enqueue(protocol::preferences_item(&self.preferences))
                } else {
                    self.enqueue_snapshot()
                };
                effects.push(Effect::ArmPing(self.timings.ping_interval));
                effects
            }
            (Disconnected, LinkEvent::ReconnectTick { radio_ready }) => {
                if !self.background {
                    return vec![Effect::CancelReconnect];
                }
                let mut effects = Vec::new();
                match (self.last_device.clone(), radio_ready) {
                    (Some(device), true) => effects.extend(self.connect(device)),
                    (Some(_), false) => log::debug!("radio not ready, skipping reconnect"),
                    (None, _) => log::debug!("no peripheral on record, nothing to reconnect"),
                }
                effects.push(Effect::ArmReconnect(self.timings.reconnect_interval));
                effects
            }
            (Connecting | ServiceDiscovery, LinkEvent::ReconnectTick { .. }) => {
                // An attempt is running; its outcome re-arms if needed
                vec![Effect::ArmReconnect(self.timings.reconnect_interval)]
            }
            (Connected, LinkEvent::ReconnectTick { .. }) => vec![Effect::CancelReconnect],
            (state, event) => {
                log::debug!("ignoring {event:?} while {state:?}");
                Vec::new()
            }
        }
    }

    fn on_connected(&mut self) -> Vec<Effect> {
        log::info!("connected to {:?}", self.target);
        self.state = ConnectionState::Connected;
        self.queue.clear();
        self.in_flight = None;
        self.sent_icons.clear();
        self.first_ping = true;

        let mut effects = vec![self.status_event(), Effect::CancelReconnect];
        self.queue.push(protocol::preferences_item(&self.preferences));
        self.push_snapshot();
        effects.push(Effect::ArmPing(self.timings.first_ping_delay));
        effects.extend(self.pump());
        effects
    }

    fn on_link_lost(&mut self) -> Vec<Effect> {
        let mut effects = self.teardown();
        effects.push(self.status_event());
        if self.background {
            effects.push(Effect::ArmReconnect(self.timings.reconnect_interval));
        }
        effects
    }

    /// Shared cleanup of link-lost and explicit disconnect.
    fn teardown(&mut self) -> Vec<Effect> {
        self.state = ConnectionState::Disconnected;
        self.queue.clear();
        self.in_flight = None;
        self.first_ping = false;
        vec![Effect::Close, Effect::CancelPing]
    }

    fn status_event(&self) -> Effect {
        Effect::Emit(ServiceEvent::ConnectionStatusChanged {
            status: self.state.into(),
            device: self.target.clone(),
        })
    }

    fn enqueue(&mut self, item: QueueItem) -> Vec<Effect> {
        self.queue.push(item);
        self.pump()
    }

    fn enqueue_snapshot(&mut self) -> Vec<Effect> {
        self.push_snapshot();
        self.pump()
    }

    fn push_snapshot(&mut self) {
        let Some(snapshot) = &self.last_snapshot else {
            return;
        };
        for item in protocol::snapshot_items(snapshot) {
            self.queue.push(item);
        }
        if let Some(icon) = &snapshot.icon {
            let hash = icon.content_hash();
            let pending = self
                .in_flight
                .iter()
                .chain(self.queue.iter())
                .any(|item| item.icon_hash() == Some(hash.as_str()));
            if !pending && !self.sent_icons.contains(&hash) {
                self.queue.push(protocol::icon_item(icon));
            }
        }
    }

    /// Issue the next write if the wire is free.
    fn pump(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Connected || self.in_flight.is_some() {
            return Vec::new();
        }
        match self.queue.pop() {
            Some(item) => {
                self.in_flight = Some(item.clone());
                vec![Effect::Write(item)]
            }
            None => Vec::new(),
        }
    }
}
