use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::*;

/// Full state of one tenant, as JSON. Used to bootstrap and hand over an engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub agencies: Vec<AgencyConfig>,
    #[serde(default)]
    pub vehicles: Vec<Vehicle>,
    #[serde(default)]
    pub maintenance: Vec<MaintenanceBlock>,
    #[serde(default)]
    pub bookings: Vec<Booking>,
}

impl Snapshot {
    pub fn load(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write to a temp file then rename, so a crash never leaves a torn snapshot.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)
    }

    pub fn is_empty(&self) -> bool {
        self.agencies.is_empty()
            && self.vehicles.is_empty()
            && self.maintenance.is_empty()
            && self.bookings.is_empty()
    }
}
