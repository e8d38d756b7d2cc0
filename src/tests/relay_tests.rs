//! # Relay Scenarios
//!
//! Notification in, peripheral writes out: the listener, the transport
//! service and a backend wired together the way the binary wires them.

use crate::backend::{AlwaysReady, SerialBackend};
use crate::config::ScraperConfig;
use crate::link::{BackendKind, Link, LinkTimings};
use crate::listener::{relay_to_transport, ListenerInput, NotificationListener};
use crate::protocol::{Channel, DeviceId, Preferences};
use crate::service::{ConnectionStatus, ServiceEvent, TransportHandle, TransportService};
use crate::tests::fixtures::{self, FakeBackend, FakeCall, NavStep};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Start a listener feeding `transport`; returns the listener's input.
fn start_listener(transport: TransportHandle) -> mpsc::Sender<ListenerInput> {
    let (events_tx, events_rx) = mpsc::channel(16);
    let listener = NotificationListener::new(&ScraperConfig::default(), Arc::new(fixtures::maps_dump()), events_tx);
    let (inputs, _task) = listener.spawn();
    tokio::spawn(relay_to_transport(events_rx, transport));
    inputs
}

#[tokio::test(start_paused = true)]
async fn ble_session_sends_icon_once() {
    let backend = FakeBackend::new(BackendKind::Ble).auto_link_up().auto_ack();
    let link = Link::new(BackendKind::Ble, LinkTimings::default(), Preferences::default());
    let (handle, mut events, _task) = TransportService::spawn(link, backend.clone(), AlwaysReady);
    let inputs = start_listener(handle.clone());

    handle.connect(DeviceId::new("AA:BB:CC:DD:EE:FF")).unwrap();
    inputs
        .send(ListenerInput::Posted(fixtures::maps_notification(&NavStep::road("First St"))))
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    // Same arrow, next road: debounced, text only
    inputs
        .send(ListenerInput::Posted(fixtures::maps_notification(&NavStep::road("Second St"))))
        .await
        .unwrap();
    sleep(Duration::from_millis(600)).await;

    let calls = backend.calls();
    assert_eq!(calls[0], FakeCall::Open("AA:BB:CC:DD:EE:FF".into()));
    assert!(calls.contains(&FakeCall::Discover));

    let channels = backend.written_channels();
    assert_eq!(channels[0], Channel::Settings);
    assert_eq!(channels.iter().filter(|c| **c == Channel::Icon).count(), 1);
    assert_eq!(channels.iter().filter(|c| **c == Channel::NextRoad).count(), 2);

    let last_road = backend
        .written()
        .into_iter()
        .filter(|item| item.channel == Channel::NextRoad)
        .last()
        .map(|item| item.payload.to_bytes());
    assert_eq!(last_road, Some(b"next_road=Second St".to_vec()));

    let mut connected = false;
    let mut navigation_updates = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ServiceEvent::ConnectionStatusChanged {
                status: ConnectionStatus::Connected,
                device,
            } => {
                connected = true;
                assert_eq!(device, Some(DeviceId::new("AA:BB:CC:DD:EE:FF")));
            }
            ServiceEvent::NavigationUpdated(Some(_)) => navigation_updates += 1,
            _ => {}
        }
    }
    assert!(connected);
    assert_eq!(navigation_updates, 2);
}

#[tokio::test(start_paused = true)]
async fn navigation_end_reaches_the_host() {
    let backend = FakeBackend::new(BackendKind::Serial);
    let link = Link::new(BackendKind::Serial, LinkTimings::default(), Preferences::default());
    let (handle, mut events, _task) = TransportService::spawn(link, backend, AlwaysReady);
    let inputs = start_listener(handle);

    let notification = fixtures::maps_notification(&NavStep::default());
    inputs.send(ListenerInput::Posted(notification.clone())).await.unwrap();
    inputs.send(ListenerInput::Removed(notification)).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let mut updates = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ServiceEvent::NavigationUpdated(snapshot) = event {
            updates.push(snapshot.map(|s| s.direction.next_road));
        }
    }
    assert_eq!(updates, vec![Some("Main St".to_string()), None]);
}

#[tokio::test]
async fn serial_session_writes_json_lines() {
    let tty = tempfile::NamedTempFile::new().unwrap();
    let timings = LinkTimings {
        first_ping_delay: Duration::from_secs(3600),
        ..LinkTimings::default()
    };
    let link = Link::new(BackendKind::Serial, timings, Preferences::default());
    let backend = SerialBackend::new(Duration::from_secs(5));
    let (handle, _events, _task) = TransportService::spawn(link, backend, AlwaysReady);
    let inputs = start_listener(handle.clone());

    handle.connect(DeviceId::new(tty.path().to_string_lossy())).unwrap();
    inputs
        .send(ListenerInput::Posted(fixtures::maps_notification(&NavStep::default())))
        .await
        .unwrap();

    let mut lines = Vec::new();
    for _ in 0..250 {
        let contents = std::fs::read_to_string(tty.path()).unwrap();
        lines = contents.lines().map(str::to_string).collect::<Vec<_>>();
        if lines.len() >= 8 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(lines.len(), 8, "expected preferences, 6 fields and an icon");

    let values: Vec<serde_json::Value> = lines.iter().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(values[0]["theme"], "dark");
    assert_eq!(values[1]["next_road"], "Main St");
    assert_eq!(values[2]["next_road_desc"], "toward Oak Ave");
    assert_eq!(values[3]["distance_to_turn"], "300 m");
    assert_eq!(values[6]["total_distance"], "3.4 km");
    assert_eq!(values[7]["icon"].as_str().map(str::len), Some(16));
    // 32x32 icon: 4 bytes per row, hex encoded
    assert_eq!(values[7]["bits"].as_str().map(str::len), Some(32 * 4 * 2));
}
