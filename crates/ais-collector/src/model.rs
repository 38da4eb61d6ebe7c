//! Normalized records produced by the classifier and persisted by the writer

use chrono::{DateTime, Utc};

/// Maritime Mobile Service Identity (transient, per transponder)
pub type Mmsi = i64;

/// IMO number (durable, per hull)
pub type Imo = i64;

/// IMO value as reported in static data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImoStatus {
    Valid(Imo),
    /// Field absent from the message
    Missing,
    /// Field present but zero (or otherwise non-positive)
    NotReported,
}

impl ImoStatus {
    pub fn from_raw(raw: Option<i64>) -> Self {
        match raw {
            None => ImoStatus::Missing,
            Some(imo) if imo > 0 => ImoStatus::Valid(imo),
            Some(_) => ImoStatus::NotReported,
        }
    }

    pub fn valid(self) -> Option<Imo> {
        match self {
            ImoStatus::Valid(imo) => Some(imo),
            _ => None,
        }
    }

    /// Value written to `unidentified_observations.imo_marker`
    pub fn marker(self) -> i64 {
        match self {
            ImoStatus::Valid(imo) => imo,
            ImoStatus::Missing => -1,
            ImoStatus::NotReported => 0,
        }
    }
}

/// Hull dimensions derived from the four antenna offsets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dimensions {
    pub length: Option<i32>,
    pub width: Option<i32>,
}

impl Dimensions {
    /// `a`: bow to antenna, `b`: antenna to stern, `c`: port to antenna, `d`: antenna to starboard
    ///
    /// A sum that overflows is treated as absent.
    pub fn from_offsets(a: Option<i32>, b: Option<i32>, c: Option<i32>, d: Option<i32>) -> Self {
        Self {
            length: a.zip(b).and_then(|(a, b)| a.checked_add(b)),
            width: c.zip(d).and_then(|(c, d)| c.checked_add(d)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.length.is_none() && self.width.is_none()
    }
}

/// Vessel registry row, upserted on IMO
#[derive(Debug, Clone, PartialEq)]
pub struct VesselUpsert {
    pub imo: Imo,
    pub mmsi: Option<Mmsi>,
    pub name: String,
    pub ship_type: Option<i32>,
    pub length: Option<i32>,
    pub width: Option<i32>,
    pub max_draught: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticObservation {
    pub imo: Imo,
    pub mmsi: Option<Mmsi>,
    pub name: String,
    pub ship_type: Option<i32>,
    pub length: Option<i32>,
    pub width: Option<i32>,
    pub max_draught: Option<f64>,
    pub destination: String,
    pub observed_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionObservation {
    pub imo: Imo,
    pub observed_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub destination: Option<String>,
    pub sog: Option<f64>,
    pub cog: Option<f64>,
    pub navigational_status: Option<i32>,
    pub rate_of_turn: Option<f64>,
    pub true_heading: Option<i32>,
}

/// Static and dynamic fields merged for a vessel without a usable IMO
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnidentifiedObservation {
    /// -1 when the IMO was absent, 0 when reported as zero
    pub imo_marker: i64,
    pub mmsi: Option<Mmsi>,
    pub name: Option<String>,
    pub ship_type: Option<i32>,
    pub length: Option<i32>,
    pub width: Option<i32>,
    pub max_draught: Option<f64>,
    pub destination: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub sog: Option<f64>,
    pub cog: Option<f64>,
    pub navigational_status: Option<i32>,
    pub rate_of_turn: Option<f64>,
    pub true_heading: Option<i32>,
}

/// One row bound for one of the four destination tables
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Vessel(VesselUpsert),
    Static(StaticObservation),
    Position(PositionObservation),
    Unidentified(UnidentifiedObservation),
}

/// Rows not yet committed, one ordered list per destination table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingBatch {
    pub vessels: Vec<VesselUpsert>,
    pub statics: Vec<StaticObservation>,
    pub positions: Vec<PositionObservation>,
    pub unidentified: Vec<UnidentifiedObservation>,
}

impl PendingBatch {
    pub fn push(&mut self, record: Record) {
        match record {
            Record::Vessel(row) => self.vessels.push(row),
            Record::Static(row) => self.statics.push(row),
            Record::Position(row) => self.positions.push(row),
            Record::Unidentified(row) => self.unidentified.push(row),
        }
    }

    /// Combined row count across all four lists
    pub fn len(&self) -> usize {
        self.vessels.len() + self.statics.len() + self.positions.len() + self.unidentified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move every row of `later` behind the rows already held
    pub fn append(&mut self, mut later: PendingBatch) {
        self.vessels.append(&mut later.vessels);
        self.statics.append(&mut later.statics);
        self.positions.append(&mut later.positions);
        self.unidentified.append(&mut later.unidentified);
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            vessels: self.vessels.len(),
            statics: self.statics.len(),
            positions: self.positions.len(),
            unidentified: self.unidentified.len(),
        }
    }
}

/// Per-table row counts, used in log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub vessels: usize,
    pub statics: usize,
    pub positions: usize,
    pub unidentified: usize,
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} vessel upserts, {} static, {} position, {} unidentified",
            self.vessels, self.statics, self.positions, self.unidentified
        )
    }
}
