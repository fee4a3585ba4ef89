use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ════════════════════════════════════════════════════════════════
//  InstrumentKind
// ════════════════════════════════════════════════════════════════

/// Instrument that produced a reading. Each kind is its own ordered
/// stream per partition; readings of different kinds never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Temperature,
    Pressure,
    Speed,
    Location,
}

impl InstrumentKind {
    pub const ALL: [InstrumentKind; 4] = [
        InstrumentKind::Temperature,
        InstrumentKind::Pressure,
        InstrumentKind::Speed,
        InstrumentKind::Location,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InstrumentKind::Temperature => "temperature",
            InstrumentKind::Pressure => "pressure",
            InstrumentKind::Speed => "speed",
            InstrumentKind::Location => "location",
        }
    }

    /// Stable one-byte tag used inside page cursors.
    pub(crate) fn tag(self) -> u8 {
        match self {
            InstrumentKind::Temperature => 1,
            InstrumentKind::Pressure => 2,
            InstrumentKind::Speed => 3,
            InstrumentKind::Location => 4,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(InstrumentKind::Temperature),
            2 => Some(InstrumentKind::Pressure),
            3 => Some(InstrumentKind::Speed),
            4 => Some(InstrumentKind::Location),
            _ => None,
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown instrument '{0}'")]
pub struct UnknownInstrument(pub String);

impl FromStr for InstrumentKind {
    type Err = UnknownInstrument;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstrumentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownInstrument(s.to_string()))
    }
}

// ════════════════════════════════════════════════════════════════
//  PartitionKey
// ════════════════════════════════════════════════════════════════

/// (spacecraft, journey) pair identifying one ordered stream of readings.
/// The spacecraft name is compared case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub spacecraft_name: String,
    pub journey_id: Uuid,
}

impl PartitionKey {
    pub fn new(spacecraft_name: impl Into<String>, journey_id: Uuid) -> Self {
        Self {
            spacecraft_name: spacecraft_name.into(),
            journey_id,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.spacecraft_name, self.journey_id)
    }
}

// ════════════════════════════════════════════════════════════════
//  Measurement
// ════════════════════════════════════════════════════════════════

/// Kind-specific payload of a reading.
///
/// Serialized untagged and flattened into the reading, so a temperature
/// reading carries a `temperature` field, a location reading carries
/// `latitude`, `longitude` and `altitude`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measurement {
    Temperature { temperature: f64 },
    Pressure { pressure: f64 },
    Speed { speed: f64 },
    Location {
        latitude: f64,
        longitude: f64,
        altitude: f64,
    },
}

/// Longest accepted spacecraft name, in bytes.
pub const MAX_SPACECRAFT_NAME_BYTES: usize = u16::MAX as usize;

/// Lowest temperature accepted, in degrees Celsius.
pub const ABSOLUTE_ZERO_C: f64 = -273.15;

impl Measurement {
    pub fn kind(&self) -> InstrumentKind {
        match self {
            Measurement::Temperature { .. } => InstrumentKind::Temperature,
            Measurement::Pressure { .. } => InstrumentKind::Pressure,
            Measurement::Speed { .. } => InstrumentKind::Speed,
            Measurement::Location { .. } => InstrumentKind::Location,
        }
    }

    /// Physical plausibility check. Returns the reason on failure.
    pub fn check(&self) -> Result<(), String> {
        match *self {
            Measurement::Temperature { temperature } => {
                finite("temperature", temperature)?;
                if temperature < ABSOLUTE_ZERO_C {
                    return Err(format!("temperature {temperature} is below absolute zero"));
                }
            }
            Measurement::Pressure { pressure } => {
                finite("pressure", pressure)?;
                if pressure < 0.0 {
                    return Err(format!("pressure {pressure} is negative"));
                }
            }
            Measurement::Speed { speed } => {
                finite("speed", speed)?;
                if speed < 0.0 {
                    return Err(format!("speed {speed} is negative"));
                }
            }
            Measurement::Location {
                latitude,
                longitude,
                altitude,
            } => {
                finite("latitude", latitude)?;
                finite("longitude", longitude)?;
                finite("altitude", altitude)?;
                if !(-90.0..=90.0).contains(&latitude) {
                    return Err(format!("latitude {latitude} is outside [-90, 90]"));
                }
                if !(-180.0..=180.0).contains(&longitude) {
                    return Err(format!("longitude {longitude} is outside [-180, 180]"));
                }
            }
        }
        Ok(())
    }
}

fn finite(field: &str, value: f64) -> Result<(), String> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(format!("{field} must be a finite number"))
    }
}

// ════════════════════════════════════════════════════════════════
//  Reading
// ════════════════════════════════════════════════════════════════

/// One telemetry sample. Addressed by its natural key
/// (spacecraft, journey, timestamp); there is no surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub spacecraft_name: String,
    pub journey_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub measurement: Measurement,
}

impl Reading {
    pub fn new(partition: &PartitionKey, timestamp: DateTime<Utc>, measurement: Measurement) -> Self {
        Self {
            spacecraft_name: partition.spacecraft_name.clone(),
            journey_id: partition.journey_id,
            timestamp,
            measurement,
        }
    }

    pub fn kind(&self) -> InstrumentKind {
        self.measurement.kind()
    }

    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(self.spacecraft_name.clone(), self.journey_id)
    }

    pub fn belongs_to(&self, partition: &PartitionKey) -> bool {
        self.spacecraft_name == partition.spacecraft_name && self.journey_id == partition.journey_id
    }

    /// Validate the reading for ingestion as `kind`.
    pub fn validate(&self, kind: InstrumentKind) -> Result<(), String> {
        if self.spacecraft_name.trim().is_empty() {
            return Err("spacecraftName must not be empty".into());
        }
        if self.spacecraft_name.len() > MAX_SPACECRAFT_NAME_BYTES {
            return Err(format!("spacecraftName exceeds {MAX_SPACECRAFT_NAME_BYTES} bytes"));
        }
        if self.kind() != kind {
            return Err(format!("expected a {kind} reading, got {}", self.kind()));
        }
        self.measurement.check()
    }

    /// Parse one element of an ingest body for the given instrument.
    ///
    /// Field names follow the wire format: `spacecraftName`, `journeyId`,
    /// `timestamp` plus the kind-specific value fields.
    pub fn from_json(kind: InstrumentKind, value: &serde_json::Value) -> Result<Self, String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Head {
            spacecraft_name: String,
            journey_id: Uuid,
            timestamp: DateTime<Utc>,
        }

        let head = Head::deserialize(value).map_err(|e| e.to_string())?;
        let measurement = match kind {
            InstrumentKind::Temperature => Measurement::Temperature {
                temperature: number_field(value, "temperature")?,
            },
            InstrumentKind::Pressure => Measurement::Pressure {
                pressure: number_field(value, "pressure")?,
            },
            InstrumentKind::Speed => Measurement::Speed {
                speed: number_field(value, "speed")?,
            },
            InstrumentKind::Location => Measurement::Location {
                latitude: number_field(value, "latitude")?,
                longitude: number_field(value, "longitude")?,
                altitude: number_field(value, "altitude")?,
            },
        };

        Ok(Self {
            spacecraft_name: head.spacecraft_name,
            journey_id: head.journey_id,
            timestamp: head.timestamp,
            measurement,
        })
    }
}

fn number_field(value: &serde_json::Value, name: &str) -> Result<f64, String> {
    match value.get(name) {
        None | Some(serde_json::Value::Null) => Err(format!("missing field `{name}`")),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| format!("field `{name}` must be a number")),
    }
}
