//! # Navigation Notification Listener
//!
//! Turns the platform's notification stream into [`NavigationEvent`]s:
//!
//! 1. **Filter**: only the ongoing navigation notification of the configured
//!    map app passes
//! 2. **Debounce**: the first update with no current snapshot is parsed right
//!    away; after that, updates open a fixed window and only the latest
//!    notification inside it is parsed, once, when it closes
//! 3. **Scrape** on the blocking pool, then publish back on the listener task
//! 4. **Diff**: a snapshot equal to the current one is not re-emitted
//!
//! Scrape failures are logged and the update is skipped; the current
//! snapshot stays authoritative.

use crate::config::ScraperConfig;
use crate::scraper::NotificationScraper;
use crate::service::TransportHandle;
use crate::timer::Timer;
use crate::view_tree::{AppResources, Notification};
use crate::NavigationSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Notification callbacks from the platform.
#[derive(Clone, Debug, PartialEq)]
pub enum ListenerInput {
    Posted(Notification),
    Removed(Notification),
    /// Listening (re)started; `active` are the notifications currently shown
    Enabled { active: Vec<Notification> },
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavigationEvent {
    Updated(NavigationSnapshot),
    Ended,
}

/// Which notification is the navigation notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationFilter {
    pub source_package: String,
    pub notification_id: i32,
}

impl NotificationFilter {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            source_package: config.source_package.clone(),
            notification_id: config.notification_id,
        }
    }

    fn is_source(&self, notification: &Notification) -> bool {
        notification.package.contains(&self.source_package) && notification.id == self.notification_id
    }

    /// Posted updates must also be ongoing.
    pub fn accepts(&self, notification: &Notification) -> bool {
        notification.ongoing && self.is_source(notification)
    }
}

/// Fixed-window debounce of notification updates.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: Option<Notification>,
    timer: Timer,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            timer: Timer::new(),
        }
    }

    /// Offer an update. Returns it back when it should be parsed immediately.
    pub fn offer(&mut self, notification: Notification, has_snapshot: bool) -> Option<Notification> {
        if !has_snapshot && self.pending.is_none() {
            return Some(notification);
        }
        self.pending = Some(notification);
        self.timer.arm_if_idle(self.window);
        None
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel(&mut self) {
        self.pending = None;
        self.timer.cancel();
    }

    /// Resolves when the window closes, yielding the latest update.
    pub async fn fired(&mut self) -> Option<Notification> {
        self.timer.fired().await;
        self.pending.take()
    }
}

pub struct NotificationListener<R> {
    filter: NotificationFilter,
    scraper: NotificationScraper,
    resources: Arc<R>,
    debouncer: Debouncer,
    enabled: bool,
    current: Option<NavigationSnapshot>,
    events: mpsc::Sender<NavigationEvent>,
}

impl<R: AppResources + Send + Sync + 'static> NotificationListener<R> {
    pub fn new(config: &ScraperConfig, resources: Arc<R>, events: mpsc::Sender<NavigationEvent>) -> Self {
        Self {
            filter: NotificationFilter::from_config(config),
            scraper: NotificationScraper::from_config(config),
            resources,
            debouncer: Debouncer::new(config.debounce()),
            enabled: true,
            current: None,
            events,
        }
    }

    /// Start the listener task; feed it through the returned sender.
    pub fn spawn(self) -> (mpsc::Sender<ListenerInput>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        (tx, tokio::spawn(self.run(rx)))
    }

    pub async fn run(mut self, mut inputs: mpsc::Receiver<ListenerInput>) {
        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(input) => self.on_input(input).await,
                    None => break,
                },
                Some(notification) = self.debouncer.fired() => {
                    self.parse_and_publish(notification).await;
                }
            }
        }
        self.debouncer.cancel();
        log::debug!("notification listener stopped");
    }

    async fn on_input(&mut self, input: ListenerInput) {
        match input {
            ListenerInput::Posted(notification) => self.on_posted(notification).await,
            ListenerInput::Removed(notification) => {
                if !self.enabled || !self.filter.is_source(&notification) {
                    return;
                }
                log::info!("navigation notification removed");
                self.debouncer.cancel();
                self.current = None;
                self.publish(NavigationEvent::Ended).await;
            }
            ListenerInput::Enabled { active } => {
                log::info!("listener enabled, scanning {} active notifications", active.len());
                self.enabled = true;
                for notification in active {
                    self.on_posted(notification).await;
                }
            }
            ListenerInput::Disabled => {
                log::info!("listener disabled");
                self.enabled = false;
                self.debouncer.cancel();
                self.current = None;
            }
        }
    }

    async fn on_posted(&mut self, notification: Notification) {
        if !self.enabled || !self.filter.accepts(&notification) {
            log::trace!("ignoring notification {} from {}", notification.id, notification.package);
            return;
        }
        if let Some(notification) = self.debouncer.offer(notification, self.current.is_some()) {
            self.parse_and_publish(notification).await;
        }
    }

    async fn parse_and_publish(&mut self, notification: Notification) {
        let scraper = self.scraper.clone();
        let resources = Arc::clone(&self.resources);
        let parsed = tokio::task::spawn_blocking(move || scraper.scrape(resources.as_ref(), &notification)).await;

        let snapshot = match parsed {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                log::error!("failed to read navigation notification: {e}");
                return;
            }
            Err(e) => {
                log::error!("scrape task failed: {e}");
                return;
            }
        };

        if self.current.as_ref() == Some(&snapshot) {
            log::debug!("navigation unchanged");
            return;
        }
        log::debug!("navigation updated: {:?}", snapshot.direction);
        self.current = Some(snapshot.clone());
        self.publish(NavigationEvent::Updated(snapshot)).await;
    }

    async fn publish(&self, event: NavigationEvent) {
        if self.events.send(event).await.is_err() {
            log::debug!("navigation event receiver dropped");
        }
    }
}

/// Feed listener events into the transport until either side closes.
pub async fn relay_to_transport(mut events: mpsc::Receiver<NavigationEvent>, transport: TransportHandle) {
    while let Some(event) = events.recv().await {
        let snapshot = match event {
            NavigationEvent::Updated(snapshot) => Some(snapshot),
            NavigationEvent::Ended => None,
        };
        if transport.navigation_updated(snapshot).is_err() {
            log::debug!("transport closed, stopping relay");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{self, NavStep};
    use tokio::time::{sleep, timeout};

    struct Harness {
        inputs: mpsc::Sender<ListenerInput>,
        events: mpsc::Receiver<NavigationEvent>,
    }

    impl Harness {
        fn start() -> Self {
            let (tx, events) = mpsc::channel(16);
            let listener = NotificationListener::new(&ScraperConfig::default(), Arc::new(fixtures::maps_dump()), tx);
            let (inputs, _task) = listener.spawn();
            Self { inputs, events }
        }

        async fn post(&self, step: &NavStep) {
            self.send(ListenerInput::Posted(fixtures::maps_notification(step))).await;
        }

        async fn send(&self, input: ListenerInput) {
            self.inputs.send(input).await.unwrap();
        }

        async fn next(&mut self) -> Option<NavigationEvent> {
            timeout(Duration::from_secs(5), self.events.recv()).await.ok().flatten()
        }

        fn drain(&mut self) -> Vec<NavigationEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    fn road(event: &NavigationEvent) -> &str {
        match event {
            NavigationEvent::Updated(snapshot) => &snapshot.direction.next_road,
            NavigationEvent::Ended => "<ended>",
        }
    }

    #[test]
    fn test_debouncer_without_snapshot_is_immediate() {
        let notification = fixtures::maps_notification(&NavStep::default());
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        assert!(debouncer.offer(notification.clone(), false).is_some());
        assert!(!debouncer.is_pending());

        assert!(debouncer.offer(notification.clone(), true).is_none());
        assert!(debouncer.is_pending());
        // Pending window: even without a snapshot the update waits
        assert!(debouncer.offer(notification, false).is_none());
        debouncer.cancel();
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn test_filter() {
        let filter = NotificationFilter::from_config(&ScraperConfig::default());
        let mut notification = fixtures::maps_notification(&NavStep::default());
        assert!(filter.accepts(&notification));

        notification.ongoing = false;
        assert!(!filter.accepts(&notification));
        notification.ongoing = true;
        notification.id = 2;
        assert!(!filter.accepts(&notification));
        notification.id = 1;
        notification.package = "com.example.maps".into();
        assert!(!filter.accepts(&notification));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_updates_emit_latest_once() {
        let mut harness = Harness::start();
        harness.post(&NavStep::road("First St")).await;
        assert_eq!(harness.next().await.as_ref().map(road), Some("First St"));

        harness.post(&NavStep::road("Second St")).await;
        sleep(Duration::from_millis(100)).await;
        harness.post(&NavStep::road("Third St")).await;
        sleep(Duration::from_millis(600)).await;

        let events = harness.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(road(&events[0]), "Third St");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_repost_is_not_emitted() {
        let mut harness = Harness::start();
        harness.post(&NavStep::default()).await;
        assert!(harness.next().await.is_some());

        let mut repost = NavStep::default();
        repost.post_time_millis += 1_000;
        harness.post(&repost).await;
        sleep(Duration::from_millis(600)).await;
        assert!(harness.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_notifications_are_ignored() {
        let mut harness = Harness::start();
        let mut other = fixtures::maps_notification(&NavStep::default());
        other.id = 7;
        harness.send(ListenerInput::Posted(other)).await;
        let mut finished = fixtures::maps_notification(&NavStep::default());
        finished.ongoing = false;
        harness.send(ListenerInput::Posted(finished)).await;

        sleep(Duration::from_millis(600)).await;
        assert!(harness.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_cancels_pending_and_ends() {
        let mut harness = Harness::start();
        harness.post(&NavStep::road("First St")).await;
        assert!(harness.next().await.is_some());

        harness.post(&NavStep::road("Second St")).await;
        let notification = fixtures::maps_notification(&NavStep::default());
        harness.send(ListenerInput::Removed(notification)).await;
        assert_eq!(harness.next().await, Some(NavigationEvent::Ended));

        sleep(Duration::from_millis(600)).await;
        assert!(harness.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_rescans_active_notifications() {
        let mut harness = Harness::start();
        harness.post(&NavStep::default()).await;
        assert!(harness.next().await.is_some());

        harness.send(ListenerInput::Disabled).await;
        harness.post(&NavStep::road("Ignored Rd")).await;
        sleep(Duration::from_millis(600)).await;
        assert!(harness.drain().is_empty());

        // The current snapshot was dropped, so the rescan parses immediately
        let active = vec![fixtures::maps_notification(&NavStep::default())];
        harness.send(ListenerInput::Enabled { active }).await;
        assert_eq!(harness.next().await.as_ref().map(road), Some("Main St"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrape_failure_keeps_previous_snapshot() {
        let mut harness = Harness::start();
        harness.post(&NavStep::default()).await;
        assert!(harness.next().await.is_some());

        let mut broken = fixtures::maps_notification(&NavStep::road("Broken Rd"));
        if let Some(layout) = broken.big_content_view.as_mut() {
            layout.layout_id = 999;
        }
        harness.send(ListenerInput::Posted(broken)).await;
        sleep(Duration::from_millis(600)).await;
        assert!(harness.drain().is_empty());

        // Still debounced: the previous snapshot is current
        harness.post(&NavStep::road("Next Rd")).await;
        sleep(Duration::from_millis(600)).await;
        assert_eq!(harness.drain().iter().map(road).collect::<Vec<_>>(), vec!["Next Rd"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_forwards_to_transport() {
        use crate::link::{BackendKind, Link, LinkTimings};
        use crate::protocol::Preferences;
        use crate::service::{ServiceEvent, TransportService};

        let link = Link::new(BackendKind::Serial, LinkTimings::default(), Preferences::default());
        let backend = fixtures::FakeBackend::new(BackendKind::Serial);
        let (handle, mut service_events, _task) =
            TransportService::spawn(link, backend, crate::backend::AlwaysReady);

        let (tx, rx) = mpsc::channel(4);
        let relay = tokio::spawn(relay_to_transport(rx, handle));
        let snapshot = NavigationSnapshot::new(
            crate::NavigationDirection {
                next_road: "Main St".into(),
                ..Default::default()
            },
            crate::TripInfo::default(),
            None,
            0,
        );
        tx.send(NavigationEvent::Updated(snapshot.clone())).await.unwrap();
        tx.send(NavigationEvent::Ended).await.unwrap();
        drop(tx);
        relay.await.unwrap();

        assert_eq!(
            service_events.recv().await,
            Some(ServiceEvent::NavigationUpdated(Some(snapshot)))
        );
        assert_eq!(service_events.recv().await, Some(ServiceEvent::NavigationUpdated(None)));
    }
}
