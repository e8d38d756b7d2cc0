//! # Snapshot Preview
//!
//! Renders a [`NavigationSnapshot`] the way a small monochrome peripheral would
//! lay it out, then prints it to the terminal. Used by the binary's `--stdout`
//! development mode to check scraping without any hardware attached.

use crate::{DitheredImage, NavigationSnapshot};
use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};

/// Preview panel size in pixels
pub const PANEL_WIDTH: u32 = 160;
pub const PANEL_HEIGHT: u32 = 48;

/// Left edge of the text column, right of a 32px icon
const TEXT_LEFT: i32 = 38;
const LINE_HEIGHT: i32 = 12;

/// Draw `snapshot` onto any binary draw target.
///
/// Icon top-left, road / description / distance stacked beside it, trip
/// figures along the bottom.
pub fn draw_panel<D>(snapshot: &NavigationSnapshot, display: &mut D)
where
    D: DrawTarget<Color = BinaryColor>,
{
    let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);

    if let Some(icon) = &snapshot.icon {
        draw_icon(icon, display);
    }

    let direction = &snapshot.direction;
    let lines = [
        &direction.next_road,
        &direction.next_road_sub,
        &direction.distance_to_turn,
    ];
    for (row, line) in lines.iter().enumerate() {
        if line.is_empty() {
            continue;
        }
        Text::with_baseline(
            line,
            Point::new(TEXT_LEFT, row as i32 * LINE_HEIGHT),
            style,
            Baseline::Top,
        )
        .draw(display)
        .ok();
    }

    let trip = trip_line(snapshot);
    if !trip.is_empty() {
        Text::with_baseline(
            &trip,
            Point::new(0, 3 * LINE_HEIGHT),
            style,
            Baseline::Top,
        )
        .draw(display)
        .ok();
    }
}

fn draw_icon<D>(icon: &DitheredImage, display: &mut D)
where
    D: DrawTarget<Color = BinaryColor>,
{
    let pixels = (0..icon.height()).flat_map(move |y| {
        (0..icon.width())
            .filter(move |&x| icon.pixel(x, y))
            .map(move |x| Pixel(Point::new(x as i32, y as i32), BinaryColor::On))
    });
    display.draw_iter(pixels).ok();
}

/// "ETA 14:02 - 12 min - 3.4 km", skipping empty figures. ASCII only, the
/// panel font has no other glyphs.
fn trip_line(snapshot: &NavigationSnapshot) -> String {
    let trip = &snapshot.trip;
    let eta = (!trip.eta.is_empty()).then(|| format!("ETA {}", trip.eta));
    [eta, Some(trip.ete.clone()), Some(trip.total_distance.clone())]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" - ")
}

/// Panel-sized image of `snapshot`.
pub fn render_panel(snapshot: &NavigationSnapshot) -> DitheredImage {
    let mut panel = DitheredImage::blank(PANEL_WIDTH, PANEL_HEIGHT);
    draw_panel(snapshot, &mut panel);
    panel
}

/// Half-block rendering of `image`: two pixel rows per text line, framed.
pub fn to_ascii(image: &DitheredImage) -> String {
    let width = image.width() as usize;
    let mut out = String::new();
    out.push('┌');
    out.push_str(&"─".repeat(width));
    out.push_str("┐\n");

    for y in (0..image.height()).step_by(2) {
        out.push('│');
        for x in 0..image.width() {
            let cell = match (image.pixel(x, y), image.pixel(x, y + 1)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            };
            out.push(cell);
        }
        out.push_str("│\n");
    }

    out.push('└');
    out.push_str(&"─".repeat(width));
    out.push('┘');
    out
}

/// Text summary followed by the rendered panel.
pub fn render_ascii(snapshot: Option<&NavigationSnapshot>) -> String {
    let Some(snapshot) = snapshot.filter(|s| !s.is_empty()) else {
        return "(no navigation)".to_string();
    };

    let direction = &snapshot.direction;
    let mut out = format!("{} → {}", direction.distance_to_turn, direction.next_road);
    if !direction.next_road_sub.is_empty() {
        out.push_str(&format!(" ({})", direction.next_road_sub));
    }
    out.push('\n');

    let trip = trip_line(snapshot);
    if !trip.is_empty() {
        out.push_str(&trip);
        out.push('\n');
    }
    if let Some(icon) = &snapshot.icon {
        out.push_str(&format!("icon {}x{} #{}\n", icon.width(), icon.height(), icon.content_hash()));
    }

    out.push_str(&to_ascii(&render_panel(snapshot)));
    out
}

/// Print the preview of `snapshot` to stdout.
pub fn draw_ascii(snapshot: Option<&NavigationSnapshot>) {
    println!("{}", render_ascii(snapshot));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NavigationDirection, TripInfo};
    use embedded_graphics::mock_display::MockDisplay;

    fn test_snapshot() -> NavigationSnapshot {
        let mut icon = DitheredImage::blank(32, 32);
        for y in 4..28 {
            icon.set_pixel(15, y, true);
            icon.set_pixel(16, y, true);
        }
        NavigationSnapshot::new(
            NavigationDirection {
                next_road: "Main St".into(),
                next_road_sub: "toward Oak Ave".into(),
                distance_to_turn: "300 m".into(),
            },
            TripInfo {
                eta: "14:02".into(),
                ete: "12 min".into(),
                total_distance: "3.4 km".into(),
            },
            Some(icon),
            0,
        )
    }

    fn count_in(image: &DitheredImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> usize {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| image.pixel(x, y))
            .count()
    }

    #[test]
    fn test_panel_copies_icon() {
        let snapshot = test_snapshot();
        let panel = render_panel(&snapshot);
        let icon = snapshot.icon.as_ref().unwrap();
        for y in 0..32 {
            for x in 0..32 {
                assert_eq!(panel.pixel(x, y), icon.pixel(x, y), "pixel {x},{y}");
            }
        }
    }

    #[test]
    fn test_panel_draws_text_beside_icon() {
        let panel = render_panel(&test_snapshot());
        // Road, description, distance rows
        assert!(count_in(&panel, 38..PANEL_WIDTH, 0..12) > 0);
        assert!(count_in(&panel, 38..PANEL_WIDTH, 12..24) > 0);
        assert!(count_in(&panel, 38..PANEL_WIDTH, 24..36) > 0);
        // Trip line
        assert!(count_in(&panel, 0..PANEL_WIDTH, 36..PANEL_HEIGHT) > 0);
    }

    #[test]
    fn test_empty_fields_leave_rows_blank() {
        let mut snapshot = test_snapshot();
        snapshot.direction.next_road_sub.clear();
        snapshot.trip = TripInfo::default();
        let panel = render_panel(&snapshot);
        assert_eq!(count_in(&panel, 38..PANEL_WIDTH, 12..24), 0);
        assert_eq!(count_in(&panel, 0..PANEL_WIDTH, 36..PANEL_HEIGHT), 0);
    }

    #[test]
    fn test_trip_line_skips_missing_figures() {
        let mut snapshot = test_snapshot();
        assert_eq!(trip_line(&snapshot), "ETA 14:02 - 12 min - 3.4 km");
        assert!(trip_line(&snapshot).is_ascii());
        snapshot.trip.eta.clear();
        assert_eq!(trip_line(&snapshot), "12 min - 3.4 km");
    }

    #[test]
    fn test_ascii_frame_dimensions() {
        let ascii = to_ascii(&render_panel(&test_snapshot()));
        let lines: Vec<&str> = ascii.lines().collect();
        // Frame plus two pixel rows per line
        assert_eq!(lines.len(), PANEL_HEIGHT as usize / 2 + 2);
        for line in &lines {
            assert_eq!(line.chars().count(), PANEL_WIDTH as usize + 2);
        }
        assert!(ascii.contains('█'));
    }

    #[test]
    fn test_render_ascii_summary() {
        let snapshot = test_snapshot();
        let ascii = render_ascii(Some(&snapshot));
        assert!(ascii.starts_with("300 m → Main St (toward Oak Ave)\n"));
        assert!(ascii.contains("ETA 14:02"));
        assert!(ascii.contains("icon 32x32 #"));

        assert_eq!(render_ascii(None), "(no navigation)");
        assert_eq!(render_ascii(Some(&NavigationSnapshot::default())), "(no navigation)");
    }

    #[test]
    fn test_mock_display_rendering() {
        let mut display = MockDisplay::<BinaryColor>::new();
        display.set_allow_out_of_bounds_drawing(true);
        display.set_allow_overdraw(true);

        draw_panel(&test_snapshot(), &mut display);

        let pixels_drawn = display.affected_area().size;
        assert!(pixels_drawn.width > 0, "No pixels were drawn to the display");
    }
}
