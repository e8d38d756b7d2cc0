//! # Scraper Scenarios
//!
//! Captured package dumps run through the full scrape path: JSON decoding,
//! layout inflation, action replay, name lookup and style segmentation.

use crate::scraper::NotificationScraper;
use crate::span_parser::{StyledText, TextStyle};
use crate::tests::fixtures::{self, NavStep};
use crate::view_tree::{describe, render, AppResources, PackageDump, TextContent};

/// A dump as written by the capture tool: one layout, one notification.
const CAPTURED_DUMP: &str = r#"{
    "package": "com.google.android.apps.maps",
    "resources": {
        "10": "big_root",
        "11": "header_text",
        "12": "title",
        "13": "text",
        "14": "right_icon"
    },
    "layouts": {
        "42": {
            "kind": "group", "id": 10, "children": [
                { "kind": "text", "id": 11 },
                { "kind": "group", "children": [
                    { "kind": "text", "id": 12 },
                    { "kind": "text", "id": 13 }
                ] },
                { "kind": "image", "id": 14 }
            ]
        }
    },
    "notifications": [ {
        "package": "com.google.android.apps.maps",
        "id": 1,
        "ongoing": true,
        "post_time_millis": 1700000000000,
        "big_content_view": {
            "layout_id": 42,
            "actions": [
                { "action": "set_text", "view_id": 11, "content": "25 min · 18 km · 09:41 ETA" },
                { "action": "set_text", "view_id": 12, "content": "1.2 km" },
                { "action": "set_text", "view_id": 13, "content": {
                    "text": "Ring Rd toward Airport",
                    "runs": [
                        { "start": 0, "end": 7, "style": "bold" },
                        { "start": 15, "end": 22, "style": "bold" }
                    ]
                } },
                { "action": "set_image", "view_id": 14, "bitmap": {
                    "width": 2, "height": 2,
                    "rgba": [255,255,255,255, 0,0,0,0, 0,0,0,0, 255,255,255,255]
                } }
            ]
        }
    } ]
}"#;

#[test]
fn captured_dump_scrapes_every_field() {
    let dump = PackageDump::from_json(CAPTURED_DUMP).expect("dump should parse");
    let notification = &dump.notifications[0];
    let snapshot = NotificationScraper::new(8, 8)
        .scrape(&dump, notification)
        .expect("scrape should succeed");

    assert_eq!(snapshot.direction.next_road, "Ring Rd");
    assert_eq!(snapshot.direction.next_road_sub, "toward Airport");
    assert_eq!(snapshot.direction.distance_to_turn, "1.2 km");
    assert_eq!(snapshot.trip.ete, "25 min");
    assert_eq!(snapshot.trip.total_distance, "18 km");
    assert_eq!(snapshot.trip.eta, "09:41");

    // 2x2 diagonal scaled to 8x8: two 4x4 foreground quadrants
    let icon = snapshot.icon.expect("icon should be present");
    assert_eq!(icon.count_set(), 32);
    assert!(icon.pixel(1, 6));
    assert!(!icon.pixel(1, 1));
}

#[test]
fn describe_lists_named_views() {
    let dump = PackageDump::from_json(CAPTURED_DUMP).unwrap();
    let layout = dump.notifications[0].big_content_view.as_ref().unwrap();
    let root = render(&dump, &dump.package, layout).unwrap();
    let table = dump.resource_table(&dump.package).unwrap();

    let value = describe(&root, &table);
    let children = value["Group:big_root"].as_array().expect("root group");
    assert_eq!(children[0]["Text:header_text"], "25 min · 18 km · 09:41 ETA");
    assert_eq!(children[2]["Image:right_icon"], "2x2");
}

#[test]
fn junction_split_follows_style_not_punctuation() {
    let dump = fixtures::maps_dump();
    let step = NavStep {
        direction: TextContent::Styled(
            StyledText::default()
                .push("A Road", TextStyle::Bold)
                .push("/", TextStyle::Bold)
                .push(" B Street", TextStyle::Normal),
        ),
        ..NavStep::default()
    };
    let snapshot = NotificationScraper::new(16, 16)
        .scrape(&dump, &fixtures::maps_notification(&step))
        .unwrap();

    assert_eq!(snapshot.direction.next_road, "A Road");
    assert_eq!(snapshot.direction.next_road_sub, "B Street");
}

#[test]
fn rerouting_text_is_all_road() {
    let dump = fixtures::maps_dump();
    let step = NavStep {
        direction: TextContent::Plain("Rerouting\u{a0}â€¦".into()),
        title: String::new(),
        header: None,
        icon: None,
        ..NavStep::default()
    };
    let snapshot = NotificationScraper::new(16, 16)
        .scrape(&dump, &fixtures::maps_notification(&step))
        .unwrap();

    assert_eq!(snapshot.direction.next_road, "Rerouting ...");
    assert_eq!(snapshot.direction.next_road_sub, "");
    assert_eq!(snapshot.direction.distance_to_turn, "");
    assert!(snapshot.icon.is_none());
}

#[test]
fn expanded_layout_overrides_compact_fields() {
    let dump = fixtures::maps_dump();
    let mut notification = fixtures::maps_notification(&NavStep::road("Compact Rd"));
    let expanded = fixtures::maps_notification(&NavStep::road("Expanded Rd"));
    notification.big_content_view = expanded.big_content_view;

    let snapshot = NotificationScraper::new(16, 16).scrape(&dump, &notification).unwrap();
    assert_eq!(snapshot.direction.next_road, "Expanded Rd");
}
