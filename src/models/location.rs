use serde::{Deserialize, Serialize};

pub const DEFAULT_DRIVER_NAME: &str = "Delivery Driver";

/// WGS84 decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One slot in the location store: the global broadcast or an
/// order-specific session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotId {
    Public,
    Order(String),
}

impl SlotId {
    pub fn path(&self) -> String {
        match self {
            SlotId::Public => "public_location".to_string(),
            SlotId::Order(order_id) => format!("locations/{order_id}"),
        }
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// The unit of state exchanged through the store. Field names on the wire
/// are camelCase, matching what viewers already consume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub latitude: f64,
    pub longitude: f64,
    /// Milliseconds since epoch, set by the publisher at write time.
    pub timestamp: i64,
    #[serde(default)]
    pub is_tracking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,
}

impl LocationRecord {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn display_name(&self) -> &str {
        self.driver_name.as_deref().unwrap_or(DEFAULT_DRIVER_NAME)
    }
}

/// Partial update merged into a slot. Unset fields preserve whatever the
/// record already holds; merging into an empty slot creates the record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPatch {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timestamp: Option<i64>,
    pub is_tracking: Option<bool>,
    pub driver_name: Option<String>,
}

impl LocationPatch {
    pub fn position(coords: Coordinates, timestamp: i64) -> Self {
        Self {
            latitude: Some(coords.latitude),
            longitude: Some(coords.longitude),
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }

    pub fn tracking(mut self, is_tracking: bool) -> Self {
        self.is_tracking = Some(is_tracking);
        self
    }

    pub fn driver_name(mut self, name: Option<String>) -> Self {
        self.driver_name = name;
        self
    }

    pub fn apply_to(&self, record: &mut LocationRecord) {
        if let Some(latitude) = self.latitude {
            record.latitude = latitude;
        }
        if let Some(longitude) = self.longitude {
            record.longitude = longitude;
        }
        if let Some(timestamp) = self.timestamp {
            record.timestamp = timestamp;
        }
        if let Some(is_tracking) = self.is_tracking {
            record.is_tracking = is_tracking;
        }
        if let Some(driver_name) = &self.driver_name {
            record.driver_name = Some(driver_name.clone());
        }
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
