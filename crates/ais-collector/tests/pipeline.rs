//! End-to-end collector tests against the in-memory store
//!
//! Raw feed payloads go in through `IngestPipeline::handle`; assertions are
//! made on what the writer committed.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use ais_collector::config::IngestConfig;
use ais_collector::geofence::GeoFilter;
use ais_collector::identity::IdentityResolver;
use ais_collector::model::{StaticObservation, VesselUpsert};
use ais_collector::pipeline::IngestPipeline;
use ais_collector::store::MemoryVesselStore;
use chrono::{TimeZone, Utc};
use common::{init_test_tracing, position_msg, region_boundary, StaticMsg, INSIDE, OUTSIDE};

const T0: &str = "2024-03-01 10:00:00.000000000 +0000 UTC";
const T1: &str = "2024-03-01 10:05:00.000000000 +0000 UTC";
const T2: &str = "2024-03-01 10:10:00.000000000 +0000 UTC";

fn ingest_config(batch_size: usize, save_unidentified: bool) -> IngestConfig {
    IngestConfig {
        region_boundary: "unused".into(),
        batch_size,
        // Long enough that only size or an explicit flush submits rows
        flush_interval: Duration::from_secs(3600),
        save_unidentified,
        stats_interval: Duration::from_secs(3600),
        destination_lookback: Duration::from_secs(5 * 3600),
        writer_queue_capacity: 4,
        max_retained_rows: 10_000,
    }
}

async fn pipeline(
    store: &Arc<MemoryVesselStore>,
    config: IngestConfig,
) -> IngestPipeline<MemoryVesselStore> {
    init_test_tracing();
    let (_dir, path) = region_boundary();
    let geofence = GeoFilter::load(&path).unwrap();

    let mut identity = IdentityResolver::new(Arc::clone(store));
    identity.load_from_store().await.unwrap();

    IngestPipeline::new(Arc::clone(store), identity, geofence, &config)
}

fn nordic_star<'a>(name: &'a str, time: &'a str) -> StaticMsg<'a> {
    StaticMsg {
        mmsi: 230000001,
        imo: 9123456,
        name,
        destination: "ROTTERDAM",
        position: INSIDE,
        time,
    }
}

#[tokio::test]
async fn test_static_then_position_resolves_vessel_and_destination() {
    let store = Arc::new(MemoryVesselStore::new());
    let mut pipeline = pipeline(&store, ingest_config(100, false)).await;

    pipeline.handle(&nordic_star("NORDIC STAR", T0).to_json()).await;
    pipeline.handle(&position_msg(230000001, INSIDE, T1)).await;
    pipeline.flush().await;

    let vessel = store.vessel(9123456).await.unwrap();
    assert_eq!(vessel.mmsi, Some(230000001));
    assert_eq!(vessel.name, "NORDIC STAR");
    assert_eq!((vessel.length, vessel.width), (Some(150), Some(20)));
    assert_eq!(vessel.max_draught, Some(8.5));

    let statics = store.statics().await;
    assert_eq!(statics.len(), 1);
    assert_eq!(statics[0].destination, "ROTTERDAM");

    let positions = store.positions().await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].imo, 9123456);
    assert_eq!(positions[0].destination.as_deref(), Some("ROTTERDAM"));
    assert_eq!(positions[0].sog, Some(12.3));
    assert_eq!(
        positions[0].observed_at,
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap()
    );

    let counters = pipeline.counters();
    assert_eq!(counters.collected, 2);
    assert_eq!(counters.static_messages, 1);
    assert_eq!(counters.position_messages, 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_position_uses_registry_mapping_and_stored_destination() {
    let store = Arc::new(MemoryVesselStore::new());
    store
        .insert_vessel(VesselUpsert {
            imo: 9123456,
            mmsi: Some(230000001),
            name: "NORDIC STAR".to_string(),
            ship_type: Some(70),
            length: Some(150),
            width: Some(20),
            max_draught: None,
        })
        .await;
    store
        .insert_static(StaticObservation {
            imo: 9123456,
            mmsi: Some(230000001),
            name: "NORDIC STAR".to_string(),
            ship_type: Some(70),
            length: Some(150),
            width: Some(20),
            max_draught: None,
            destination: "HAMBURG".to_string(),
            observed_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            latitude: INSIDE.0,
            longitude: INSIDE.1,
        })
        .await;

    let mut pipeline = pipeline(&store, ingest_config(100, false)).await;
    pipeline.handle(&position_msg(230000001, INSIDE, T1)).await;
    pipeline.flush().await;

    let positions = store.positions().await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].destination.as_deref(), Some("HAMBURG"));
    assert_eq!(store.identity_queries(), 0);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_unidentified_dropped_when_retention_off() {
    let store = Arc::new(MemoryVesselStore::new());
    let mut pipeline = pipeline(&store, ingest_config(100, false)).await;

    let no_imo = StaticMsg {
        imo: 0,
        ..nordic_star("NO IMO", T0)
    };
    pipeline.handle(&no_imo.to_json()).await;
    pipeline.handle(&position_msg(244000002, INSIDE, T1)).await;
    pipeline.flush().await;

    assert!(store.unidentified().await.is_empty());
    assert_eq!(store.vessel_count().await, 0);
    assert_eq!(pipeline.counters().unidentified_dropped, 2);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_unidentified_kept_with_markers_when_retention_on() {
    let store = Arc::new(MemoryVesselStore::new());
    let mut pipeline = pipeline(&store, ingest_config(100, true)).await;

    let no_imo = StaticMsg {
        imo: 0,
        ..nordic_star("NO IMO", T0)
    };
    pipeline.handle(&no_imo.to_json()).await;
    pipeline.handle(&position_msg(244000002, INSIDE, T1)).await;
    pipeline.flush().await;

    let rows = store.unidentified().await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].imo_marker, 0);
    assert_eq!(rows[0].name.as_deref(), Some("NO IMO"));
    assert_eq!(rows[1].imo_marker, -1);
    assert_eq!(rows[1].mmsi, Some(244000002));
    assert_eq!(pipeline.counters().unidentified_dropped, 0);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_out_of_region_and_malformed_are_counted_not_stored() {
    let store = Arc::new(MemoryVesselStore::new());
    let mut pipeline = pipeline(&store, ingest_config(100, true)).await;

    let outside = StaticMsg {
        position: OUTSIDE,
        ..nordic_star("NORDIC STAR", T0)
    };
    pipeline.handle(&outside.to_json()).await;
    pipeline.handle(&position_msg(230000001, OUTSIDE, T1)).await;
    pipeline.handle("{not json").await;
    pipeline
        .handle(&position_msg(230000001, INSIDE, "yesterday at noon"))
        .await;
    pipeline.flush().await;

    let counters = pipeline.counters();
    assert_eq!(counters.filtered, 2);
    assert_eq!(counters.malformed, 2);
    assert_eq!(counters.collected, 0);
    assert_eq!(store.vessel_count().await, 0);
    assert!(store.positions().await.is_empty());
    assert!(store.unidentified().await.is_empty());
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_known_kind_without_payload_is_malformed() {
    let store = Arc::new(MemoryVesselStore::new());
    let mut pipeline = pipeline(&store, ingest_config(100, true)).await;

    let meta = format!(
        r#""MetaData": {{"MMSI": 230000001, "latitude": {}, "longitude": {}, "time_utc": "{T0}"}}"#,
        INSIDE.0, INSIDE.1
    );
    pipeline
        .handle(&format!(r#"{{"MessageType": "PositionReport", {meta}, "Message": {{}}}}"#))
        .await;
    pipeline
        .handle(&format!(r#"{{"MessageType": "ShipStaticData", {meta}}}"#))
        .await;
    pipeline
        .handle(&format!(
            r#"{{"MessageType": "StandardClassBPositionReport", {meta}, "Message": {{}}}}"#
        ))
        .await;
    pipeline.flush().await;

    let counters = pipeline.counters();
    assert_eq!(counters.malformed, 2);
    assert_eq!(counters.collected, 0);
    assert!(store.unidentified().await.is_empty());
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_batch_size_triggers_submission() {
    let store = Arc::new(MemoryVesselStore::new());
    let mut pipeline = pipeline(&store, ingest_config(3, false)).await;

    // Vessel upsert + static observation
    pipeline.handle(&nordic_star("NORDIC STAR", T0).to_json()).await;
    assert_eq!(pipeline.pending_rows(), 2);

    pipeline.handle(&position_msg(230000001, INSIDE, T1)).await;
    assert_eq!(pipeline.pending_rows(), 0);

    pipeline.writer().flush().await.unwrap();
    assert_eq!(store.commits(), 1);
    assert_eq!(store.positions().await.len(), 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_repeated_static_updates_vessel_last_write_wins() {
    let store = Arc::new(MemoryVesselStore::new());
    let mut pipeline = pipeline(&store, ingest_config(100, false)).await;

    pipeline.handle(&nordic_star("NORDIC STAR", T0).to_json()).await;
    pipeline.handle(&nordic_star("NORDIC STAR II", T2).to_json()).await;
    pipeline.flush().await;

    assert_eq!(store.vessel_count().await, 1);
    assert_eq!(store.vessel(9123456).await.unwrap().name, "NORDIC STAR II");
    assert_eq!(store.statics().await.len(), 2);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_flushes_pending_rows() {
    use ais_collector::feed::FeedHandler;

    let store = Arc::new(MemoryVesselStore::new());
    let mut pipeline = pipeline(&store, ingest_config(100, false)).await;

    pipeline
        .on_message(&nordic_star("NORDIC STAR", T0).to_json())
        .await;
    assert_eq!(store.vessel_count().await, 0);

    pipeline.on_disconnect().await;
    assert_eq!(pipeline.pending_rows(), 0);
    assert_eq!(store.vessel_count().await, 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_feed_fault_flushes_pending_rows_before_reconnect() {
    use ais_collector::config::FeedConfig;
    use ais_collector::feed::{ConnectionState, MessageKind, StreamConnector};
    use ais_collector::geofence::BoundingBox;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let payload = nordic_star("NORDIC STAR", T0).to_json();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.next().await.unwrap().unwrap();
        ws.send(Message::Text(payload.into())).await.unwrap();
        ws.close(None).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
        listener
    });

    let store = Arc::new(MemoryVesselStore::new());
    let mut pipeline = pipeline(&store, ingest_config(100, false)).await;
    let feed = FeedConfig {
        url: format!("ws://{addr}"),
        api_key: "test-key".to_string(),
        bounding_box: BoundingBox::NORTH_SEA,
        reconnect_min_delay: Duration::from_secs(60),
        reconnect_max_delay: Duration::from_secs(60),
    };
    let mut connector = StreamConnector::new(&feed, &[MessageKind::ShipStaticData]);
    let mut transitions = connector.watch_transitions();

    let reconnecting = async {
        while let Some(state) = transitions.recv().await {
            if state == ConnectionState::Reconnecting {
                break;
            }
        }
    };

    tokio::time::timeout(Duration::from_secs(10), async {
        tokio::select! {
            _ = connector.run(&mut pipeline) => {}
            _ = reconnecting => {}
        }
    })
    .await
    .unwrap();

    assert_eq!(pipeline.pending_rows(), 0);
    assert_eq!(store.vessel_count().await, 1);
    assert_eq!(store.statics().await.len(), 1);
    assert_eq!(connector.attempt(), 1);
    pipeline.shutdown().await;
    drop(server.await.unwrap());
}
