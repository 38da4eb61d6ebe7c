//! Routing of decoded feed messages to destination rows

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{trace, warn};

use crate::feed::message::{MessageKind, PositionReport, ShipStaticData};
use crate::identity::{Coverage, IdentityResolver};
use crate::model::{
    ImoStatus, Imo, Mmsi, PositionObservation, Record, StaticObservation,
    UnidentifiedObservation, VesselUpsert,
};
use crate::store::VesselStore;

/// Substituted for absent or blank names and destinations
pub const UNKNOWN: &str = "Unknown";

/// Metadata shared by every message that passed the geofence and timestamp gates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sighting {
    pub mmsi: Option<Mmsi>,
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at: DateTime<Utc>,
}

/// Rows produced for one message
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub kind: MessageKind,
    pub records: Vec<Record>,
    /// No usable IMO and the retention switch is off
    pub unidentified_dropped: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifierSettings {
    pub save_unidentified: bool,
    pub destination_lookback: Duration,
}

#[derive(Debug, Clone)]
struct LatestDestination {
    observed_at: DateTime<Utc>,
    destination: String,
}

pub struct MessageClassifier<S> {
    store: Arc<S>,
    identity: IdentityResolver<S>,
    settings: ClassifierSettings,
    lookback: chrono::Duration,
    /// Newest accepted static destination per IMO, including rows not yet committed
    destinations: HashMap<Imo, LatestDestination>,
}

impl<S: VesselStore> MessageClassifier<S> {
    pub fn new(store: Arc<S>, identity: IdentityResolver<S>, settings: ClassifierSettings) -> Self {
        let lookback = chrono::Duration::from_std(settings.destination_lookback)
            .unwrap_or(chrono::Duration::MAX);

        Self {
            store,
            identity,
            settings,
            lookback,
            destinations: HashMap::new(),
        }
    }

    pub fn coverage(&self) -> Coverage {
        self.identity.coverage()
    }

    pub fn classify_static(&mut self, sighting: Sighting, data: &ShipStaticData) -> Classified {
        let imo = ImoStatus::from_raw(data.imo_number);
        let dims = data.dimensions();
        let name = clean_text(data.name.as_deref()).unwrap_or_else(|| UNKNOWN.to_string());
        let destination =
            clean_text(data.destination.as_deref()).unwrap_or_else(|| UNKNOWN.to_string());

        if let Some(mmsi) = sighting.mmsi {
            self.identity.observe(mmsi);
            if let Some(imo) = imo.valid() {
                self.identity.record(mmsi, imo);
            }
        }

        let mut classified = Classified {
            kind: MessageKind::ShipStaticData,
            records: Vec::new(),
            unidentified_dropped: false,
        };

        match imo {
            ImoStatus::Valid(imo) => {
                self.remember_destination(imo, sighting.observed_at, &destination);

                classified.records.push(Record::Vessel(VesselUpsert {
                    imo,
                    mmsi: sighting.mmsi,
                    name: name.clone(),
                    ship_type: data.ship_type,
                    length: dims.length,
                    width: dims.width,
                    max_draught: data.maximum_static_draught,
                }));
                classified.records.push(Record::Static(StaticObservation {
                    imo,
                    mmsi: sighting.mmsi,
                    name,
                    ship_type: data.ship_type,
                    length: dims.length,
                    width: dims.width,
                    max_draught: data.maximum_static_draught,
                    destination,
                    observed_at: sighting.observed_at,
                    latitude: sighting.latitude,
                    longitude: sighting.longitude,
                }));
            }
            ImoStatus::Missing | ImoStatus::NotReported if self.settings.save_unidentified => {
                classified
                    .records
                    .push(Record::Unidentified(UnidentifiedObservation {
                        imo_marker: imo.marker(),
                        mmsi: sighting.mmsi,
                        name: Some(name),
                        ship_type: data.ship_type,
                        length: dims.length,
                        width: dims.width,
                        max_draught: data.maximum_static_draught,
                        destination: Some(destination),
                        observed_at: sighting.observed_at,
                        latitude: sighting.latitude,
                        longitude: sighting.longitude,
                        ..Default::default()
                    }));
            }
            ImoStatus::Missing | ImoStatus::NotReported => {
                trace!(mmsi = ?sighting.mmsi, "Dropping static data without IMO");
                classified.unidentified_dropped = true;
            }
        }

        classified
    }

    pub async fn classify_position(
        &mut self,
        sighting: Sighting,
        report: &PositionReport,
    ) -> Classified {
        let mut classified = Classified {
            kind: MessageKind::PositionReport,
            records: Vec::new(),
            unidentified_dropped: false,
        };

        let imo = match sighting.mmsi {
            Some(mmsi) => {
                self.identity.observe(mmsi);
                self.identity.resolve(mmsi).await
            }
            None => None,
        };

        match imo {
            Some(imo) => {
                let destination = self.destination_for(imo, sighting.observed_at).await;
                classified.records.push(Record::Position(PositionObservation {
                    imo,
                    observed_at: sighting.observed_at,
                    latitude: sighting.latitude,
                    longitude: sighting.longitude,
                    destination,
                    sog: report.sog,
                    cog: report.cog,
                    navigational_status: report.navigational_status,
                    rate_of_turn: report.rate_of_turn,
                    true_heading: report.true_heading,
                }));
            }
            None if self.settings.save_unidentified => {
                classified
                    .records
                    .push(Record::Unidentified(UnidentifiedObservation {
                        imo_marker: ImoStatus::Missing.marker(),
                        mmsi: sighting.mmsi,
                        observed_at: sighting.observed_at,
                        latitude: sighting.latitude,
                        longitude: sighting.longitude,
                        sog: report.sog,
                        cog: report.cog,
                        navigational_status: report.navigational_status,
                        rate_of_turn: report.rate_of_turn,
                        true_heading: report.true_heading,
                        ..Default::default()
                    }));
            }
            None => {
                trace!(mmsi = ?sighting.mmsi, "Dropping position report without IMO");
                classified.unidentified_dropped = true;
            }
        }

        classified
    }

    fn remember_destination(&mut self, imo: Imo, observed_at: DateTime<Utc>, destination: &str) {
        let newer = self
            .destinations
            .get(&imo)
            .map_or(true, |latest| observed_at >= latest.observed_at);

        if newer {
            self.destinations.insert(
                imo,
                LatestDestination {
                    observed_at,
                    destination: destination.to_string(),
                },
            );
        }
    }

    /// Latest static destination in `[at - lookback, at]`
    async fn destination_for(&self, imo: Imo, at: DateTime<Utc>) -> Option<String> {
        let since = at
            .checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        if let Some(latest) = self.destinations.get(&imo) {
            if latest.observed_at <= at {
                return (latest.observed_at >= since).then(|| latest.destination.clone());
            }
        }

        match self.store.recent_destination(imo, since, at).await {
            Ok(destination) => destination,
            Err(e) => {
                warn!(imo, error = %e, "Destination lookup failed");
                None
            }
        }
    }
}

/// Strip AIS padding (trailing spaces and `@`); blank becomes `None`
fn clean_text(raw: Option<&str>) -> Option<String> {
    raw.map(|s| s.trim_end_matches([' ', '@']).trim_start())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::feed::message::Dimension;
    use crate::store::MemoryVesselStore;
    use chrono::TimeZone;

    fn classifier(
        store: &Arc<MemoryVesselStore>,
        save_unidentified: bool,
    ) -> MessageClassifier<MemoryVesselStore> {
        MessageClassifier::new(
            Arc::clone(store),
            IdentityResolver::new(Arc::clone(store)),
            ClassifierSettings {
                save_unidentified,
                destination_lookback: Duration::from_secs(5 * 3600),
            },
        )
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, hour, minute, 0).unwrap()
    }

    fn sighting(mmsi: Mmsi, observed_at: DateTime<Utc>) -> Sighting {
        Sighting {
            mmsi: Some(mmsi),
            latitude: 53.5,
            longitude: 3.5,
            observed_at,
        }
    }

    fn static_data(imo: Option<i64>, destination: &str) -> ShipStaticData {
        ShipStaticData {
            imo_number: imo,
            name: Some("NORDIC STAR@@@@  ".to_string()),
            ship_type: Some(70),
            dimension: Some(Dimension {
                a: Some(100),
                b: Some(50),
                c: Some(10),
                d: Some(10),
            }),
            maximum_static_draught: Some(7.4),
            destination: Some(destination.to_string()),
        }
    }

    fn report() -> PositionReport {
        PositionReport {
            sog: Some(12.3),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_static_with_valid_imo() {
        let store = Arc::new(MemoryVesselStore::new());
        let mut classifier = classifier(&store, false);

        let out = classifier.classify_static(
            sighting(230000001, at(3, 0)),
            &static_data(Some(9123456), "ROTTERDAM"),
        );

        assert!(!out.unidentified_dropped);
        let [Record::Vessel(vessel), Record::Static(obs)] = out.records.as_slice() else {
            panic!("unexpected records: {:?}", out.records);
        };
        assert_eq!(vessel.name, "NORDIC STAR");
        assert_eq!((vessel.length, vessel.width), (Some(150), Some(20)));
        assert_eq!(obs.destination, "ROTTERDAM");
        assert_eq!(classifier.coverage().resolved, 1);
    }

    #[tokio::test]
    async fn test_static_without_imo_respects_retention_switch() {
        let store = Arc::new(MemoryVesselStore::new());

        let mut dropping = classifier(&store, false);
        let out = dropping.classify_static(sighting(230000001, at(3, 0)), &static_data(Some(0), "X"));
        assert!(out.records.is_empty());
        assert!(out.unidentified_dropped);

        let mut keeping = classifier(&store, true);
        let out = keeping.classify_static(sighting(230000001, at(3, 0)), &static_data(None, "X"));
        let [Record::Unidentified(row)] = out.records.as_slice() else {
            panic!("expected one unidentified row");
        };
        assert_eq!(row.imo_marker, -1);
        assert_eq!(row.length, Some(150));

        let out = keeping.classify_static(sighting(230000001, at(3, 0)), &static_data(Some(0), "X"));
        let [Record::Unidentified(row)] = out.records.as_slice() else {
            panic!("expected one unidentified row");
        };
        assert_eq!(row.imo_marker, 0);
    }

    #[tokio::test]
    async fn test_position_carries_cached_destination_inside_window() {
        let store = Arc::new(MemoryVesselStore::new());
        let mut classifier = classifier(&store, false);

        classifier.classify_static(
            sighting(230000001, at(3, 0)),
            &static_data(Some(9123456), "ROTTERDAM"),
        );

        let out = classifier
            .classify_position(sighting(230000001, at(7, 59)), &report())
            .await;
        let [Record::Position(pos)] = out.records.as_slice() else {
            panic!("expected one position row");
        };
        assert_eq!(pos.imo, 9123456);
        assert_eq!(pos.destination.as_deref(), Some("ROTTERDAM"));
        assert_eq!(pos.sog, Some(12.3));
        assert_eq!(store.identity_queries(), 0);
        assert_eq!(store.destination_queries(), 0);

        let out = classifier
            .classify_position(sighting(230000001, at(8, 1)), &report())
            .await;
        let [Record::Position(pos)] = out.records.as_slice() else {
            panic!("expected one position row");
        };
        assert_eq!(pos.destination, None);
    }

    #[tokio::test]
    async fn test_position_falls_back_to_store_for_destination() {
        let store = Arc::new(MemoryVesselStore::new());
        store
            .insert_vessel(VesselUpsert {
                imo: 9123456,
                mmsi: Some(230000001),
                name: "NORDIC STAR".to_string(),
                ship_type: None,
                length: None,
                width: None,
                max_draught: None,
            })
            .await;
        store
            .insert_static(StaticObservation {
                imo: 9123456,
                mmsi: Some(230000001),
                name: "NORDIC STAR".to_string(),
                ship_type: None,
                length: None,
                width: None,
                max_draught: None,
                destination: "HAMBURG".to_string(),
                observed_at: at(1, 0),
                latitude: 53.5,
                longitude: 3.5,
            })
            .await;
        let mut classifier = classifier(&store, false);

        let out = classifier
            .classify_position(sighting(230000001, at(2, 0)), &report())
            .await;
        let [Record::Position(pos)] = out.records.as_slice() else {
            panic!("expected one position row");
        };
        assert_eq!(pos.destination.as_deref(), Some("HAMBURG"));
        assert_eq!(store.identity_queries(), 1);
        assert_eq!(store.destination_queries(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_position() {
        let store = Arc::new(MemoryVesselStore::new());

        let mut dropping = classifier(&store, false);
        let out = dropping
            .classify_position(sighting(230000009, at(2, 0)), &report())
            .await;
        assert!(out.records.is_empty());
        assert!(out.unidentified_dropped);

        let mut keeping = classifier(&store, true);
        let out = keeping
            .classify_position(sighting(230000009, at(2, 0)), &report())
            .await;
        let [Record::Unidentified(row)] = out.records.as_slice() else {
            panic!("expected one unidentified row");
        };
        assert_eq!(row.imo_marker, -1);
        assert_eq!(row.sog, Some(12.3));
        assert_eq!(row.name, None);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text(Some("ROTTERDAM@@@ ")), Some("ROTTERDAM".to_string()));
        assert_eq!(clean_text(Some("@@@@")), None);
        assert_eq!(clean_text(None), None);
    }
}
