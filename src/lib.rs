//! # Navigation Relay Core Library
//!
//! This library relays turn-by-turn navigation state, scraped from a map
//! application's ongoing notification, to a low-power display peripheral over
//! a serial or BLE link, and periodically reports vehicle speed.
//!
//! ## Design Philosophy
//!
//! ### Opaque Source, Structured Output
//! The map application never hands out structured data. Everything the
//! peripheral shows is reconstructed from the rendered notification layout:
//! - **Lookup by name**: views are found by their resource entry name, never by
//!   tree position ([`view_tree`])
//! - **Style heuristics**: road names and descriptions share one styled string
//!   and are split by text style ([`span_parser`], [`scraper`])
//! - **Fail soft**: a layout that cannot be read suppresses one update, the
//!   previous snapshot stays authoritative
//!
//! ### One Owner Per Connection
//! The connection state machine ([`link`]) is a pure reducer. A single tokio
//! task ([`service`]) owns it together with its timers and backend, and every
//! radio callback is marshaled onto that task before it touches state.
//!
//! ### Small Payloads
//! The peripheral is a slow, MTU-limited device:
//! - **Coalescing writes**: high-frequency fields keep only their latest value
//!   in the queue ([`write_queue`])
//! - **1-bit icons**: turn icons are dithered down to a packed monochrome
//!   buffer ([`dither`]) and deduplicated by content hash
//!
//! ### Data Flow
//! 1. **Notification**: filter + debounce ([`listener`]) → scrape → snapshot
//! 2. **Transport**: snapshot → `key=value` writes ([`protocol`]) → queue → backend
//! 3. **Liveness**: ping timer refreshes preferences and the last snapshot;
//!    reconnect timer recovers dropped links
//!
//! ## Core Types
//!
//! - [`NavigationSnapshot`]: one immutable reading of navigation state
//! - [`DitheredImage`]: packed 1bpp icon buffer, also an `embedded-graphics`
//!   draw target

use embedded_graphics::{pixelcolor::BinaryColor, prelude::*};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;

// Module declarations
pub mod backend;
pub mod config;
pub mod dither;
pub mod link;
pub mod listener;
pub mod preview;
pub mod protocol;
pub mod scraper;
pub mod service;
pub mod span_parser;
pub mod timer;
pub mod view_tree;
pub mod write_queue;

#[cfg(test)]
mod tests;

/// Next maneuver as shown by the map application.
///
/// All fields are display strings already localized by the source app; the
/// relay never parses units out of them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationDirection {
    /// Road to turn onto, e.g. "Main St" or "A Rd / B St"
    pub next_road: String,
    /// Secondary text after the road name, e.g. "toward Oak Ave"
    pub next_road_sub: String,
    /// Distance to the maneuver, e.g. "300 m"
    pub distance_to_turn: String,
}

/// Whole-trip figures from the notification header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripInfo {
    /// Arrival clock time, e.g. "14:02"
    pub eta: String,
    /// Remaining time en route, e.g. "12 min"
    pub ete: String,
    /// Remaining distance, e.g. "3.4 km"
    pub total_distance: String,
}

/// One immutable structured reading of navigation state.
///
/// A new snapshot replaces the previous one wholesale. Equality compares the
/// direction, the trip and the icon pixels; `captured_at_millis` is
/// bookkeeping and is ignored so that a repost of identical content is not
/// treated as a change.
///
/// # Example
/// ```
/// use nav_relay_lib::{NavigationDirection, NavigationSnapshot, TripInfo};
///
/// let a = NavigationSnapshot::new(
///     NavigationDirection { next_road: "Main St".into(), ..Default::default() },
///     TripInfo::default(),
///     None,
///     1_000,
/// );
/// let mut b = a.clone();
/// b.captured_at_millis = 2_000;
/// assert_eq!(a, b);
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NavigationSnapshot {
    pub direction: NavigationDirection,
    pub trip: TripInfo,
    /// Dithered turn icon, if the notification carried one
    pub icon: Option<DitheredImage>,
    /// Post time of the notification the snapshot was read from
    pub captured_at_millis: i64,
}

impl NavigationSnapshot {
    pub fn new(
        direction: NavigationDirection,
        trip: TripInfo,
        icon: Option<DitheredImage>,
        captured_at_millis: i64,
    ) -> Self {
        Self {
            direction,
            trip,
            icon,
            captured_at_millis,
        }
    }

    /// True when no field carries anything worth showing.
    pub fn is_empty(&self) -> bool {
        self.direction == NavigationDirection::default()
            && self.trip == TripInfo::default()
            && self.icon.is_none()
    }
}

impl PartialEq for NavigationSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.direction == other.direction && self.trip == other.trip && self.icon == other.icon
    }
}

impl Eq for NavigationSnapshot {}

/// Packed monochrome image in the peripheral's buffer layout.
///
/// Memory layout matches the display controller:
/// - Rows are `width.div_ceil(8)` bytes, padded at the end
/// - Bit 7 of each byte is the leftmost pixel
/// - `1` = foreground (ink), `0` = background
///
/// Equality is by pixel content, so two icons decoded from different
/// notifications compare equal when they look the same.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DitheredImage {
    width: u32,
    height: u32,
    bits: Vec<u8>,
}

impl DitheredImage {
    /// All-background image of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        let bytes_per_row = width.div_ceil(8);
        Self {
            width,
            height,
            bits: vec![0x00; (bytes_per_row * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Packed buffer, ready to be written to the peripheral.
    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    fn locate(&self, x: u32, y: u32) -> Option<(usize, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bytes_per_row = self.width.div_ceil(8);
        let byte_index = (y * bytes_per_row + x / 8) as usize;
        Some((byte_index, 0x80 >> (x % 8)))
    }

    /// Out-of-range reads are background.
    pub fn pixel(&self, x: u32, y: u32) -> bool {
        self.locate(x, y)
            .map(|(index, mask)| self.bits[index] & mask != 0)
            .unwrap_or(false)
    }

    /// Out-of-range writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, on: bool) {
        if let Some((index, mask)) = self.locate(x, y) {
            if on {
                self.bits[index] |= mask;
            } else {
                self.bits[index] &= !mask;
            }
        }
    }

    /// Number of foreground pixels.
    pub fn count_set(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    /// Short content hash used by receivers to skip re-rendering an icon
    /// they already hold.
    ///
    /// 16 lowercase hex characters: the first 8 bytes of a SHA-256 over the
    /// dimensions and the packed bits.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(&self.bits);
        let digest = hasher.finalize();

        let mut out = String::with_capacity(16);
        for byte in &digest[..8] {
            let _ = write!(&mut out, "{byte:02x}");
        }
        out
    }
}

impl OriginDimensions for DitheredImage {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for DitheredImage {
    type Color = BinaryColor;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            self.set_pixel(point.x as u32, point.y as u32, color.is_on());
        }
        Ok(())
    }
}
