//! # Radio Backends
//!
//! A [`LinkBackend`] carries out the reducer's `Open`/`Discover`/`Write`/`Close`
//! effects. Calls never block: each outcome is reported later through the
//! [`EventSink`] handed to `open`, which tags every event with the connection
//! generation so the service can drop callbacks from a channel it has already
//! closed.
//!
//! ## Backends
//! - [`SerialBackend`]: RFCOMM-style byte stream (a tty path), one JSON object
//!   per line, no service discovery
//! - [`BleBackend`]: GATT characteristics, one per [`Channel`](crate::protocol::Channel),
//!   delegating the radio work to a platform [`GattClient`]
//!
//! ```text
//! ┌────────────────────────┐   effects   ┌──────────────────┐
//! │ service (owns Link)    │ ──────────▶ │ LinkBackend      │
//! │                        │ ◀────────── │  SerialBackend   │
//! └────────────────────────┘ (gen, event)│  BleBackend<G>   │
//!                                        └──────────────────┘
//! ```

use crate::link::{BackendKind, LinkEvent};
use crate::protocol::{DeviceId, SERVICE_UUID};
use crate::write_queue::QueueItem;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Connection generation: bumped by the owner on every open and close.
pub type Generation = u64;

/// Marshals backend callbacks onto the owning task.
#[derive(Clone, Debug)]
pub struct EventSink {
    generation: Generation,
    tx: mpsc::UnboundedSender<(Generation, LinkEvent)>,
}

impl EventSink {
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<(Generation, LinkEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Deliver `event`. Silently dropped once the owner is gone.
    pub fn send(&self, event: LinkEvent) {
        if self.tx.send((self.generation, event)).is_err() {
            log::debug!("event sink closed, dropping event");
        }
    }
}

/// Radio channel to one peripheral.
pub trait LinkBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Start connecting; reports `LinkUp` or `LinkDown`.
    fn open(&mut self, device: &DeviceId, sink: EventSink);

    /// Enumerate services; reports `ServicesFound` or `DiscoveryFailed`.
    fn discover(&mut self);

    /// Issue one write; reports `WriteDone`.
    fn write(&mut self, item: &QueueItem);

    /// Release the channel. Idempotent.
    fn close(&mut self);
}

/// Radio preconditions, re-checked on every reconnect tick.
pub trait RadioStatus: Send {
    /// Radio enabled and required authorizations held.
    fn radio_ready(&self) -> bool;
}

/// For hosts without radio or permission checks.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysReady;

impl RadioStatus for AlwaysReady {
    fn radio_ready(&self) -> bool {
        true
    }
}

impl<F: Fn() -> bool + Send> RadioStatus for F {
    fn radio_ready(&self) -> bool {
        self()
    }
}

/// Serial stream backend.
///
/// `DeviceId::address` is the device path, e.g. `/dev/rfcomm0`. The device is
/// opened for appending with a bounded timeout; an expired timeout counts as
/// link lost. A writer task owns the file and acknowledges each line.
pub struct SerialBackend {
    connect_timeout: Duration,
    sink: Option<EventSink>,
    lines: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl SerialBackend {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            sink: None,
            lines: None,
            task: None,
        }
    }

    async fn run_writer(
        path: PathBuf,
        connect_timeout: Duration,
        mut lines: mpsc::UnboundedReceiver<String>,
        sink: EventSink,
    ) {
        let mut options = OpenOptions::new();
        options.append(true);
        let open = options.open(&path);
        let mut file = match tokio::time::timeout(connect_timeout, open).await {
            Ok(Ok(file)) => file,
            Ok(Err(e)) => {
                log::warn!("failed to open {}: {e}", path.display());
                sink.send(LinkEvent::LinkDown);
                return;
            }
            Err(_) => {
                log::warn!("timed out opening {} after {connect_timeout:?}", path.display());
                sink.send(LinkEvent::LinkDown);
                return;
            }
        };

        log::info!("serial link open on {}", path.display());
        sink.send(LinkEvent::LinkUp);

        while let Some(line) = lines.recv().await {
            let written = async {
                file.write_all(line.as_bytes()).await?;
                file.flush().await
            };
            match written.await {
                Ok(()) => sink.send(LinkEvent::WriteDone { ok: true }),
                Err(e) => {
                    log::warn!("serial write failed: {e}");
                    sink.send(LinkEvent::WriteDone { ok: false });
                    sink.send(LinkEvent::LinkDown);
                    return;
                }
            }
        }
        log::debug!("serial writer for {} finished", path.display());
    }
}

impl LinkBackend for SerialBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Serial
    }

    fn open(&mut self, device: &DeviceId, sink: EventSink) {
        self.close();
        let (tx, rx) = mpsc::unbounded_channel();
        let path = PathBuf::from(&device.address);
        self.task = Some(tokio::spawn(Self::run_writer(
            path,
            self.connect_timeout,
            rx,
            sink.clone(),
        )));
        self.lines = Some(tx);
        self.sink = Some(sink);
    }

    fn discover(&mut self) {
        // A stream has no services to enumerate
        if let Some(sink) = &self.sink {
            sink.send(LinkEvent::ServicesFound(vec![SERVICE_UUID]));
        }
    }

    fn write(&mut self, item: &QueueItem) {
        let line = item.payload.to_json_line();
        let sent = self.lines.as_ref().is_some_and(|lines| lines.send(line).is_ok());
        if !sent {
            log::warn!("serial write on {} without an open stream", item.channel);
            if let Some(sink) = &self.sink {
                sink.send(LinkEvent::WriteDone { ok: false });
            }
        }
    }

    fn close(&mut self) {
        self.lines = None;
        self.sink = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SerialBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Platform GATT central, e.g. the host OS Bluetooth stack.
///
/// Implementations report outcomes through the sink given to `connect`:
/// `LinkUp`/`LinkDown` for the connection, `ServicesFound`/`DiscoveryFailed`
/// for discovery and `WriteDone` for each write.
pub trait GattClient: Send {
    fn connect(&mut self, address: &str, sink: EventSink);

    fn discover_services(&mut self);

    fn write_characteristic(&mut self, service: Uuid, characteristic: Uuid, value: Vec<u8>);

    fn disconnect(&mut self);
}

/// GATT backend: one characteristic per channel.
pub struct BleBackend<G: GattClient> {
    client: G,
    mtu: usize,
    sink: Option<EventSink>,
}

/// ATT header bytes taken out of every write.
const ATT_HEADER_LEN: usize = 3;

/// Largest characteristic value one write can carry at `mtu`.
pub fn ble_max_payload(mtu: usize) -> usize {
    mtu.saturating_sub(ATT_HEADER_LEN)
}

impl<G: GattClient> BleBackend<G> {
    pub fn new(client: G, mtu: usize) -> Self {
        Self {
            client,
            mtu,
            sink: None,
        }
    }

    /// Largest value that fits one write.
    pub fn max_payload(&self) -> usize {
        ble_max_payload(self.mtu)
    }

    pub fn client(&self) -> &G {
        &self.client
    }
}

impl<G: GattClient> LinkBackend for BleBackend<G> {
    fn kind(&self) -> BackendKind {
        BackendKind::Ble
    }

    fn open(&mut self, device: &DeviceId, sink: EventSink) {
        self.sink = Some(sink.clone());
        self.client.connect(&device.address, sink);
    }

    fn discover(&mut self) {
        self.client.discover_services();
    }

    fn write(&mut self, item: &QueueItem) {
        let value = item.payload.to_bytes();
        if value.len() > self.max_payload() {
            log::warn!(
                "{} byte write on {} exceeds the {} byte limit",
                value.len(),
                item.channel,
                self.max_payload()
            );
            if let Some(sink) = &self.sink {
                sink.send(LinkEvent::WriteDone { ok: false });
            }
            return;
        }
        self.client
            .write_characteristic(SERVICE_UUID, item.channel.characteristic(), value);
    }

    fn close(&mut self) {
        self.sink = None;
        self.client.disconnect();
    }
}
