//! # Map Notification Scraper
//!
//! Reads one map-app navigation notification into a [`NavigationSnapshot`].
//!
//! ## Views Read
//!
//! | Entry name    | Role                                             |
//! |---------------|--------------------------------------------------|
//! | `text`        | styled direction: road name + description        |
//! | `header_text` | `ete · distance · eta ETA`                       |
//! | `title`       | distance to the next maneuver                    |
//! | `right_icon`  | turn arrow bitmap                                |
//!
//! ## Passes
//! The compact layout is read first, then the expanded layout if it differs.
//! Each pass overwrites only what it found, so the richer layout wins while
//! fields only the compact layout carries survive.
//!
//! ## Error Handling
//! Foreign resource and layout failures surface as [`ScrapeError`]; callers
//! log them and keep their previous snapshot. Odd *content* (wrong header
//! shape, unstyled direction) is not an error and degrades to empty fields.

use crate::config::ScraperConfig;
use crate::dither::{self, Compressed};
use crate::span_parser::{split_by_style, SpanSegment, TextStyle};
use crate::view_tree::{find_by_name, render, AppResources, Notification, ResourceTable, TextContent, ViewNode};
use crate::{NavigationDirection, NavigationSnapshot, TripInfo};
use image::RgbaImage;
use thiserror::Error;

/// Errors raised while resolving or rendering a foreign layout.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// The source app's resources could not be opened
    #[error("package {0} is not available")]
    PackageNotFound(String),

    /// The layout id is unknown to the source app
    #[error("layout {0} could not be inflated")]
    LayoutNotFound(u32),

    /// A layout mutation targets a view that is not in the layout
    #[error("view {0} not found in layout")]
    ViewNotFound(u32),

    /// A layout mutation does not fit the kind of view it targets
    #[error("view {0} does not accept this action")]
    ViewKindMismatch(u32),

    /// The notification carries neither a compact nor an expanded layout
    #[error("notification carries no layout")]
    NoLayout,
}

const DIRECTION_VIEW: &str = "text";
const HEADER_VIEW: &str = "header_text";
const TITLE_VIEW: &str = "title";
const ICON_VIEW: &str = "right_icon";

/// Separator between the header's trip fields.
const FIELD_SEPARATOR: char = '·';

/// Junction separator between two road names.
const ROAD_SEPARATOR: &str = "/";

/// Road names are bold; connecting text is in the normal weight.
const DESCRIPTION_STYLE: TextStyle = TextStyle::Normal;

/// Normal-weight spans this short ("/", "&") are separators, not descriptions.
const MIN_DESCRIPTION_LEN: usize = 2;

/// Reads notifications into snapshots with a fixed icon size.
#[derive(Clone, Debug)]
pub struct NotificationScraper {
    icon_width: u32,
    icon_height: u32,
}

impl NotificationScraper {
    pub fn new(icon_width: u32, icon_height: u32) -> Self {
        Self {
            icon_width,
            icon_height,
        }
    }

    pub fn from_config(config: &ScraperConfig) -> Self {
        Self::new(config.icon_width, config.icon_height)
    }

    /// Scrape `notification` using the issuing app's `resources`.
    pub fn scrape<R: AppResources + ?Sized>(
        &self,
        resources: &R,
        notification: &Notification,
    ) -> Result<NavigationSnapshot, ScrapeError> {
        let package = notification.package.as_str();
        let table = resources.resource_table(package)?;

        let compact = notification.content_view.as_ref();
        let best = notification.big_content_view.as_ref().or(compact);
        if best.is_none() {
            return Err(ScrapeError::NoLayout);
        }

        let mut builder = SnapshotBuilder::default();
        if let Some(layout) = compact {
            builder.read(&render(resources, package, layout)?, &table);
        }
        if let Some(layout) = best.filter(|layout| Some(*layout) != compact) {
            builder.read(&render(resources, package, layout)?, &table);
        }

        let captured_at_millis = if notification.post_time_millis > 0 {
            notification.post_time_millis
        } else {
            chrono::Utc::now().timestamp_millis()
        };
        Ok(builder.build(self.icon_width, self.icon_height, captured_at_millis))
    }
}

#[derive(Default)]
struct SnapshotBuilder {
    direction: NavigationDirection,
    trip: TripInfo,
    icon: Option<RgbaImage>,
}

impl SnapshotBuilder {
    fn read(&mut self, root: &ViewNode, table: &ResourceTable) {
        let text_of = |name: &str| find_by_name(root, table, name).and_then(ViewNode::text);

        if let Some(header) = text_of(HEADER_VIEW) {
            match parse_trip(header.as_str()) {
                Some(trip) => self.trip = trip,
                None => log::debug!("unexpected header layout: {:?}", header.as_str()),
            }
        }

        if let Some(title) = text_of(TITLE_VIEW) {
            let distance = sanitize(title.as_str());
            if !distance.is_empty() {
                self.direction.distance_to_turn = distance;
            }
        }

        if let Some(direction) = text_of(DIRECTION_VIEW) {
            let (road, description) = parse_direction(direction);
            self.direction.next_road = road;
            self.direction.next_road_sub = description;
        }

        if let Some(bitmap) = find_by_name(root, table, ICON_VIEW).and_then(ViewNode::bitmap) {
            // Own copy, the platform may recycle its bitmap
            self.icon = Some(bitmap.clone());
        }
    }

    fn build(self, icon_width: u32, icon_height: u32, captured_at_millis: i64) -> NavigationSnapshot {
        let icon = self.icon.map(|bitmap| {
            let compressed = dither::compress(Some(&bitmap), icon_width, icon_height);
            if let Compressed::Unchanged(_) = compressed {
                log::debug!("turn icon has a single color, sending it blank");
            }
            compressed.into_image()
        });
        NavigationSnapshot::new(self.direction, self.trip, icon, captured_at_millis)
    }
}

/// Parse `"12 min · 3.4 km · 14:02 ETA"`.
///
/// Returns `None` unless exactly three fields are present.
pub fn parse_trip(header: &str) -> Option<TripInfo> {
    let fields: Vec<&str> = header.split(FIELD_SEPARATOR).collect();
    let [ete, distance, eta] = fields.as_slice() else {
        return None;
    };
    let eta = eta.trim();
    let eta = eta.strip_suffix("ETA").unwrap_or(eta);
    Some(TripInfo {
        eta: sanitize(eta),
        ete: sanitize(ete),
        total_distance: sanitize(distance),
    })
}

/// Split direction text into `(road, description)`.
///
/// The first segment is always the road. Later segments join the road until
/// the first description-style segment that is not a bare `/`; from there on
/// everything is description. Plain text (e.g. "Rerouting...") is all road.
pub fn parse_direction(content: &TextContent) -> (String, String) {
    let styled = match content {
        TextContent::Plain(text) => {
            log::warn!("direction text is not styled, text: {text:?}");
            return (sanitize(text), String::new());
        }
        TextContent::Styled(styled) => styled,
    };

    let segments = split_by_style(styled, DESCRIPTION_STYLE, MIN_DESCRIPTION_LEN);
    let Some((first, rest)) = segments.split_first() else {
        return (String::new(), String::new());
    };

    let split = rest
        .iter()
        .position(|s| s.is_key_style && s.text.trim() != ROAD_SEPARATOR)
        .unwrap_or(rest.len());

    let road = join(std::iter::once(first).chain(&rest[..split]));
    let description = join(rest[split..].iter());
    (sanitize(strip_dangling_separator(&road)), sanitize(&description))
}

fn join<'a>(segments: impl Iterator<Item = &'a SpanSegment>) -> String {
    segments.map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ")
}

/// "A Rd /" → "A Rd": a separator with no road after it.
fn strip_dangling_separator(road: &str) -> &str {
    let road = road.trim_end();
    road.strip_suffix(ROAD_SEPARATOR).map(str::trim_end).unwrap_or(road)
}

/// Normalize characters the map app emits that the peripheral font lacks.
pub fn sanitize(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .replace('\n', " ")
        .replace("â€¦", "...")
        .trim()
        .to_string()
}
