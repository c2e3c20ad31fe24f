use crate::{
    error::{DatasetError, Result},
    message::TelemetryMessage,
    record::TelemetryRecord,
};
use log::{info, warn};
use std::{fs::File, io, path::Path};

/// Cyclic replay cursor over the dataset rows of a single device.
///
/// The cursor never runs out: after the last record [`advance`](Self::advance)
/// wraps back to the first one.
#[derive(Debug, Clone)]
pub struct DeviceCursor {
    device_id: String,
    records: Vec<TelemetryRecord>,
    position: usize,
}

impl DeviceCursor {
    /// Load the CSV dataset at `path` and keep the rows of `device_id`.
    ///
    /// If no row matches, the first device present in the dataset is used
    /// instead; see [`from_records`](Self::from_records).
    pub fn load(path: impl AsRef<Path>, device_id: &str) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading dataset from: {}", path.display());

        let file = File::open(path).map_err(|source| DatasetError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_reader(file, device_id)
    }

    pub fn from_reader<R: io::Read>(reader: R, device_id: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let records = reader
            .deserialize::<TelemetryRecord>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Self::from_records(records, device_id)
    }

    pub fn from_records(records: Vec<TelemetryRecord>, device_id: &str) -> Result<Self> {
        let first = records.first().ok_or(DatasetError::Empty)?;

        let device_id = if records.iter().any(|r| r.device_id == device_id) {
            device_id.to_string()
        } else {
            warn!("No data found for device {}", device_id);
            info!("Available devices: {:?}", available_devices(&records));
            info!("Using device: {}", first.device_id);
            first.device_id.clone()
        };

        let records: Vec<TelemetryRecord> = records
            .into_iter()
            .filter(|r| r.device_id == device_id)
            .collect();

        info!("Loaded {} records for device {}", records.len(), device_id);

        Ok(Self {
            device_id,
            records,
            position: 0,
        })
    }

    /// The device whose rows are replayed. Differs from the requested id
    /// when the dataset had no rows for it.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn current(&self) -> &TelemetryRecord {
        &self.records[self.position]
    }

    /// The current record encoded as a wire message.
    pub fn current_message(&self) -> TelemetryMessage {
        TelemetryMessage::from_record(self.current(), &self.device_id)
    }

    pub fn advance(&mut self) {
        self.position = (self.position + 1) % self.records.len();
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn available_devices(records: &[TelemetryRecord]) -> Vec<&str> {
    let mut devices: Vec<&str> = Vec::new();
    for record in records {
        if !devices.contains(&record.device_id.as_str()) {
            devices.push(&record.device_id);
        }
    }
    devices
}
