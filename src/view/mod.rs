use serde::Serialize;

use crate::models::location::{Coordinates, LocationRecord, DEFAULT_DRIVER_NAME};

/// Human staleness label for a record's last write. Pure function of the
/// two timestamps.
pub fn staleness_label(now_ms: i64, updated_ms: i64) -> String {
    let secs = (now_ms - updated_ms).max(0) / 1_000;
    if secs < 5 {
        "just now".to_string()
    } else if secs < 60 {
        format!("{secs} seconds ago")
    } else {
        format!("{} minutes ago", secs / 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    pub center: Coordinates,
    pub zoom: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub position: Coordinates,
    pub caption: String,
}

/// Headless map state: a fixed destination marker, a moving marker for the
/// tracked position, and a viewport that follows the mover. Recentering
/// happens only when the tracked coordinates actually change, so it never
/// fights a manual pan within the same render pass.
pub struct MapView {
    destination: Coordinates,
    viewport: Viewport,
    auto_center: bool,
    tracked: Option<Coordinates>,
    tracked_label: String,
    updated_ms: Option<i64>,
}

impl MapView {
    pub fn new(destination: Coordinates, zoom: u8, auto_center: bool) -> Self {
        Self {
            destination,
            viewport: Viewport {
                center: destination,
                zoom,
            },
            auto_center,
            tracked: None,
            tracked_label: DEFAULT_DRIVER_NAME.to_string(),
            updated_ms: None,
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Manual pan/zoom by the user.
    pub fn set_viewport(&mut self, center: Coordinates, zoom: u8) {
        self.viewport = Viewport { center, zoom };
    }

    /// Feeds the latest tracked position into the view. Returns true when
    /// the viewport recentered; rendering the same coordinates again does
    /// not move it.
    pub fn apply(
        &mut self,
        tracked: Option<Coordinates>,
        label: Option<&str>,
        updated_ms: Option<i64>,
    ) -> bool {
        if let Some(label) = label {
            self.tracked_label = label.to_string();
        }
        self.updated_ms = updated_ms;

        let changed = tracked != self.tracked;
        self.tracked = tracked;

        if !changed || !self.auto_center {
            return false;
        }
        match self.tracked {
            Some(position) => {
                // Zoom is the user's; only the center follows the mover.
                self.viewport.center = position;
                true
            }
            None => false,
        }
    }

    /// Convenience for callers holding a reconciled record straight from
    /// a subscription.
    pub fn apply_record(&mut self, record: Option<&LocationRecord>) -> bool {
        match record {
            Some(record) => self.apply(
                Some(record.coordinates()),
                Some(record.display_name()),
                Some(record.timestamp),
            ),
            None => self.apply(None, None, None),
        }
    }

    /// Markers to draw. While no tracked position is known only the
    /// destination shows; once the mover appears it replaces the
    /// destination pin, matching what viewers expect mid-delivery.
    pub fn markers(&self, now_ms: i64) -> Vec<Marker> {
        match self.tracked {
            None => vec![Marker {
                position: self.destination,
                caption: "Delivery destination".to_string(),
            }],
            Some(position) => {
                let staleness = self
                    .updated_ms
                    .map(|updated| staleness_label(now_ms, updated))
                    .unwrap_or_else(|| "unknown".to_string());
                vec![Marker {
                    position,
                    caption: format!(
                        "{} is on the way! Updated {}",
                        self.tracked_label, staleness
                    ),
                }]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(latitude: f64, longitude: f64) -> Coordinates {
        Coordinates {
            latitude,
            longitude,
        }
    }

    #[test]
    fn staleness_labels() {
        assert_eq!(staleness_label(10_000, 7_000), "just now");
        assert_eq!(staleness_label(40_000, 10_000), "30 seconds ago");
        assert_eq!(staleness_label(130_000, 5_000), "2 minutes ago");
    }

    #[test]
    fn staleness_never_goes_negative() {
        // Clock skew between writer and reader.
        assert_eq!(staleness_label(1_000, 5_000), "just now");
    }

    #[test]
    fn recenters_only_when_position_changes() {
        let mut view = MapView::new(coords(51.505, -0.09), 13, true);

        assert!(view.apply(Some(coords(51.51, -0.1)), None, Some(1_000)));
        // Same position rendered again: no second recenter.
        assert!(!view.apply(Some(coords(51.51, -0.1)), None, Some(2_000)));
        assert!(view.apply(Some(coords(51.52, -0.11)), None, Some(3_000)));

        assert_eq!(view.viewport().center, coords(51.52, -0.11));
        assert_eq!(view.viewport().zoom, 13);
    }

    #[test]
    fn auto_center_disabled_keeps_manual_viewport() {
        let mut view = MapView::new(coords(51.505, -0.09), 13, false);
        view.set_viewport(coords(48.85, 2.35), 10);

        assert!(!view.apply(Some(coords(51.51, -0.1)), None, Some(1_000)));
        assert_eq!(view.viewport().center, coords(48.85, 2.35));
        assert_eq!(view.viewport().zoom, 10);
    }

    #[test]
    fn apply_record_feeds_position_label_and_timestamp() {
        let mut view = MapView::new(coords(51.505, -0.09), 13, true);
        let record = LocationRecord {
            latitude: 51.51,
            longitude: -0.1,
            timestamp: 8_000,
            is_tracking: true,
            driver_name: None,
        };

        assert!(view.apply_record(Some(&record)));
        let markers = view.markers(10_000);
        assert_eq!(
            markers[0].caption,
            format!("{DEFAULT_DRIVER_NAME} is on the way! Updated just now")
        );
    }

    #[test]
    fn markers_switch_from_destination_to_mover() {
        let mut view = MapView::new(coords(51.505, -0.09), 13, true);

        let markers = view.markers(10_000);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].position, coords(51.505, -0.09));

        view.apply(Some(coords(51.51, -0.1)), Some("Amrit"), Some(8_000));
        let markers = view.markers(10_000);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].position, coords(51.51, -0.1));
        assert_eq!(markers[0].caption, "Amrit is on the way! Updated just now");
    }
}
