use chrono::{TimeZone, Utc};
use hdhr_core::{DeviceSnapshot, Recording, TrayStatus, Tuner};
use ratatui::style::Color;

use crate::viewer::{status_color, status_label, tuner_dots};

fn snapshot(tuners: Vec<Tuner>) -> DeviceSnapshot {
    DeviceSnapshot {
        ts: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        tuners,
        recordings: vec![Recording::new("News")],
    }
}

#[test]
fn tuner_dots_follow_tuner_order_and_activity() {
    // Arrange
    let snapshot = snapshot(vec![
        Tuner::new(Some(0), 0, ""),
        Tuner::new(Some(1), 57_000_000, "192.168.1.20"),
        Tuner::new(Some(2), 0, "192.168.1.21"),
    ]);

    // Act
    let dots = tuner_dots(&snapshot);

    // Assert
    let text: Vec<&str> = dots.iter().map(|span| span.content.as_ref()).collect();
    assert_eq!(text, vec!["○ ", "● ", "● "]);
    assert_eq!(dots[0].style.fg, Some(Color::DarkGray));
    assert_eq!(dots[1].style.fg, Some(Color::Green));
}

#[test]
fn device_without_tuners_has_no_dots() {
    // Arrange
    let snapshot = snapshot(Vec::new());

    // Act
    let dots = tuner_dots(&snapshot);

    // Assert
    assert!(dots.is_empty());
}

#[test]
fn tray_status_maps_to_label_and_color() {
    // Arrange / Act / Assert
    assert_eq!(status_label(TrayStatus::Idle), "idle");
    assert_eq!(status_label(TrayStatus::Recording), "recording");
    assert_eq!(status_color(TrayStatus::Active), Color::Green);
    assert_eq!(status_color(TrayStatus::Recording), Color::Red);
}
