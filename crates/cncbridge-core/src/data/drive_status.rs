//! Drive controller status snapshot
//!
//! The spindle-drive controller reports its state as a `{"vfd": {...}}` JSON
//! line. [`DriveStatusCell`] holds the last known snapshot and replaces it
//! atomically, so readers always see fields from a single report.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Last known state of the spindle drive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveStatus {
    /// Drive is answering on its Modbus bus
    pub online: bool,
    /// Spindle is turning
    pub running: bool,
    /// "FWD" or "REV"
    pub direction: String,
    /// Commanded spindle speed
    pub set_rpm: i64,
    /// Measured spindle speed
    pub actual_rpm: i64,
    /// Output current in amps
    pub output_amps: f64,
    /// Load as a percentage of rated current
    pub load_percent: f64,
    /// Drive heatsink temperature in Celsius
    pub vfd_temp_c: f64,
    /// Cumulative Modbus communication errors
    pub comm_errors: u64,
    /// Any further fields the firmware reports (fault codes, voltages, uptime)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for DriveStatus {
    fn default() -> Self {
        Self {
            online: false,
            running: false,
            direction: "FWD".to_string(),
            set_rpm: 0,
            actual_rpm: 0,
            output_amps: 0.0,
            load_percent: 0.0,
            vfd_temp_c: 0.0,
            comm_errors: 0,
            extra: Map::new(),
        }
    }
}

impl DriveStatus {
    /// Build a new snapshot by overlaying the reported fields onto this one
    ///
    /// Fields missing from `update` keep their previous values, and so do
    /// fields reported with a value of the wrong type.
    pub fn merged(&self, update: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        let mut base = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in update {
            if let Err(e) = Self::field_fits(key, value) {
                tracing::debug!("Skipping drive field {}={}: {}", key, value, e);
                continue;
            }
            base.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(base))
    }

    fn field_fits(key: &str, value: &Value) -> Result<(), serde_json::Error> {
        let mut single = Map::new();
        single.insert(key.to_string(), value.clone());
        serde_json::from_value::<Self>(Value::Object(single)).map(|_| ())
    }

    /// Same snapshot with the drive marked offline and stopped
    pub fn offline(&self) -> Self {
        Self {
            online: false,
            running: false,
            ..self.clone()
        }
    }
}

/// Atomically replaced holder for the current [`DriveStatus`]
///
/// Reads are lock-free. Writers are serialized so that a merge never
/// works from a stale base.
#[derive(Debug, Default)]
pub struct DriveStatusCell {
    current: ArcSwap<DriveStatus>,
    writer: Mutex<()>,
}

impl DriveStatusCell {
    /// Create a cell holding the default (offline) status
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<DriveStatus> {
        self.current.load_full()
    }

    /// Replace the snapshot wholesale
    pub fn replace(&self, status: DriveStatus) -> Arc<DriveStatus> {
        let _guard = self.writer.lock();
        let status = Arc::new(status);
        self.current.store(Arc::clone(&status));
        status
    }

    /// Merge a reported `vfd` object into a new snapshot and swap it in
    pub fn apply_update(
        &self,
        update: &Map<String, Value>,
    ) -> Result<Arc<DriveStatus>, serde_json::Error> {
        let _guard = self.writer.lock();
        let next = Arc::new(self.current.load().merged(update)?);
        self.current.store(Arc::clone(&next));
        Ok(next)
    }

    /// Mark the drive offline, keeping the last reported values
    pub fn mark_offline(&self) -> Arc<DriveStatus> {
        let _guard = self.writer.lock();
        let next = Arc::new(self.current.load().offline());
        self.current.store(Arc::clone(&next));
        next
    }
}
