//! # Transport Service
//!
//! The single owner of one peripheral connection. A tokio task holds the
//! [`Link`] reducer, its ping and reconnect [`Timer`]s and the
//! [`LinkBackend`]; everything else talks to it through a cloneable
//! [`TransportHandle`] and listens on a [`ServiceEvent`] channel.
//!
//! ## Event Sources
//! 1. **Commands** from handles (connect, preferences, snapshots, speed)
//! 2. **Backend callbacks**, tagged with the generation they were opened
//!    under; events from an older generation are dropped
//! 3. **Timers**: ping while connected, reconnect while disconnected
//!
//! Every exit path (shutdown, all handles dropped) disconnects and cancels
//! both timers.

use crate::backend::{EventSink, Generation, LinkBackend, RadioStatus};
use crate::config::Config;
use crate::link::{ConnectionState, Effect, Link, LinkEvent, TransportError};
use crate::protocol::{DeviceId, Preferences};
use crate::timer::Timer;
use crate::write_queue::QueueItem;
use crate::NavigationSnapshot;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub use crate::link::{ConnectionStatus, ServiceEvent};

enum Command {
    Connect(DeviceId),
    Disconnect,
    Reconnect(oneshot::Sender<Result<(), TransportError>>),
    Enable,
    Disable,
    PushPreferences(Preferences),
    NavigationUpdated(Option<NavigationSnapshot>),
    SpeedUpdated(u32),
    Submit(QueueItem, oneshot::Sender<Result<(), TransportError>>),
    Status(oneshot::Sender<LinkStatus>),
    Shutdown,
}

/// Point-in-time view of the link, for hosts and diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub device: Option<DeviceId>,
    pub queued: usize,
    pub in_flight: bool,
    pub background: bool,
}

/// Cloneable command surface of a running [`TransportService`].
#[derive(Clone, Debug)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl TransportHandle {
    fn send(&self, command: Command) -> Result<(), TransportError> {
        self.tx.send(command).map_err(|_| TransportError::ServiceClosed)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| TransportError::ServiceClosed)
    }

    pub fn connect(&self, device: DeviceId) -> Result<(), TransportError> {
        self.send(Command::Connect(device))
    }

    pub fn disconnect(&self) -> Result<(), TransportError> {
        self.send(Command::Disconnect)
    }

    /// Connect to the last known device. Fails with `NoTarget` if none.
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        self.request(Command::Reconnect).await?
    }

    /// Enable background operation (automatic reconnects).
    pub fn enable(&self) -> Result<(), TransportError> {
        self.send(Command::Enable)
    }

    pub fn disable(&self) -> Result<(), TransportError> {
        self.send(Command::Disable)
    }

    pub fn push_preferences(&self, preferences: Preferences) -> Result<(), TransportError> {
        self.send(Command::PushPreferences(preferences))
    }

    pub fn navigation_updated(&self, snapshot: Option<NavigationSnapshot>) -> Result<(), TransportError> {
        self.send(Command::NavigationUpdated(snapshot))
    }

    pub fn speed_updated(&self, kmh: u32) -> Result<(), TransportError> {
        self.send(Command::SpeedUpdated(kmh))
    }

    /// Queue a raw write. Fails with `NotConnected` unless connected.
    pub async fn submit(&self, item: QueueItem) -> Result<(), TransportError> {
        self.request(|reply| Command::Submit(item, reply)).await?
    }

    pub async fn status(&self) -> Result<LinkStatus, TransportError> {
        self.request(Command::Status).await
    }

    pub fn shutdown(&self) -> Result<(), TransportError> {
        self.send(Command::Shutdown)
    }
}

pub struct TransportService<B: LinkBackend, R: RadioStatus> {
    link: Link,
    backend: B,
    radio: R,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ServiceEvent>,
    link_tx: mpsc::UnboundedSender<(Generation, LinkEvent)>,
    link_rx: mpsc::UnboundedReceiver<(Generation, LinkEvent)>,
    generation: Generation,
    ping: Timer,
    reconnect: Timer,
}

impl<B: LinkBackend + 'static, R: RadioStatus + 'static> TransportService<B, R> {
    pub fn new(link: Link, backend: B, radio: R) -> (Self, TransportHandle, mpsc::UnboundedReceiver<ServiceEvent>) {
        if link.kind() != backend.kind() {
            log::warn!("link expects {:?} but backend is {:?}", link.kind(), backend.kind());
        }
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let service = Self {
            link,
            backend,
            radio,
            commands,
            events,
            link_tx,
            link_rx,
            generation: 0,
            ping: Timer::new(),
            reconnect: Timer::new(),
        };
        (service, TransportHandle { tx: command_tx }, event_rx)
    }

    /// Build the link from `config` and start the service task.
    pub fn spawn_from_config(
        config: &Config,
        backend: B,
        radio: R,
    ) -> (TransportHandle, mpsc::UnboundedReceiver<ServiceEvent>, JoinHandle<()>) {
        let transport = &config.transport;
        let link = Link::new(backend.kind(), transport.timings(), config.preferences.clone())
            .with_last_device(transport.device_id())
            .with_background(transport.background);
        Self::spawn(link, backend, radio)
    }

    pub fn spawn(
        link: Link,
        backend: B,
        radio: R,
    ) -> (TransportHandle, mpsc::UnboundedReceiver<ServiceEvent>, JoinHandle<()>) {
        let (service, handle, events) = Self::new(link, backend, radio);
        (handle, events, tokio::spawn(service.run()))
    }

    pub async fn run(mut self) {
        log::info!("transport service started ({:?} backend)", self.link.kind());
        let effects = self.link.start();
        self.apply(effects);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some((generation, event)) = self.link_rx.recv() => {
                    if generation != self.generation {
                        log::debug!("dropping stale {event:?} from connection {generation}");
                        continue;
                    }
                    let effects = self.link.handle(event);
                    self.apply(effects);
                }
                _ = self.ping.fired() => {
                    let effects = self.link.handle(LinkEvent::PingTick);
                    self.apply(effects);
                }
                _ = self.reconnect.fired() => {
                    let radio_ready = self.radio.radio_ready();
                    let effects = self.link.handle(LinkEvent::ReconnectTick { radio_ready });
                    self.apply(effects);
                }
            }
        }

        let effects = self.link.disconnect();
        self.apply(effects);
        self.ping.cancel();
        self.reconnect.cancel();
        log::info!("transport service stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let effects = match command {
            Command::Connect(device) => self.link.connect(device),
            Command::Disconnect => self.link.disconnect(),
            Command::Reconnect(reply) => {
                let result = self.link.reconnect();
                let (effects, outcome) = split(result);
                let _ = reply.send(outcome);
                effects
            }
            Command::Enable => self.link.enable(),
            Command::Disable => self.link.disable(),
            Command::PushPreferences(preferences) => self.link.set_preferences(preferences),
            Command::NavigationUpdated(snapshot) => self.link.navigation_updated(snapshot),
            Command::SpeedUpdated(kmh) => self.link.speed_updated(kmh),
            Command::Submit(item, reply) => {
                let (effects, outcome) = split(self.link.submit(item));
                let _ = reply.send(outcome);
                effects
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
                Vec::new()
            }
            // Handled by the run loop
            Command::Shutdown => Vec::new(),
        };
        self.apply(effects);
    }

    fn status(&self) -> LinkStatus {
        LinkStatus {
            state: self.link.state(),
            device: self.link.target().cloned(),
            queued: self.link.queue_len(),
            in_flight: self.link.in_flight().is_some(),
            background: self.link.background(),
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Open(device) => {
                    self.generation += 1;
                    let sink = EventSink::new(self.generation, self.link_tx.clone());
                    self.backend.open(&device, sink);
                }
                Effect::Close => {
                    self.generation += 1;
                    self.backend.close();
                }
                Effect::Discover => self.backend.discover(),
                Effect::Write(item) => self.backend.write(&item),
                Effect::ArmPing(after) => self.ping.arm(after),
                Effect::CancelPing => self.ping.cancel(),
                Effect::ArmReconnect(after) => self.reconnect.arm(after),
                Effect::CancelReconnect => self.reconnect.cancel(),
                Effect::Emit(event) => {
                    if self.events.send(event).is_err() {
                        log::trace!("no listener for service events");
                    }
                }
            }
        }
    }
}

fn split(result: Result<Vec<Effect>, TransportError>) -> (Vec<Effect>, Result<(), TransportError>) {
    match result {
        Ok(effects) => (effects, Ok(())),
        Err(e) => (Vec::new(), Err(e)),
    }
}
