//! Unit tests for the session protocol state machine.

use std::sync::Arc;
use std::time::Duration;

use apache_avro::types::Value;
use bytes::Bytes;
use offramp_protocol::{encode_record, Event};
use road_consumer::testing::MemoryLog;
use road_consumer::{ConsumerError, OffsetPolicy, Partition};
use road_registry::{RoadSnapshot, StaticRoadRegistry};

use super::*;
use crate::error::SessionError;
use crate::metrics::{MetricsCollector, NoopMetrics};

const PING: &str = r#"{"type": "record", "name": "Ping", "fields": [{"name": "seq", "type": "long"}]}"#;

struct Harness {
    log: MemoryLog,
    metrics: Arc<MetricsCollector>,
    services: SessionServices,
}

fn registry_yaml() -> String {
    format!(
        r#"
roads:
  - name: r1
    schemas:
      1: '{PING}'
  - name: off
    enabled: false
    schemas:
      1: '{PING}'
  - name: gone
    deleted: true
"#
    )
}

fn harness() -> Harness {
    let log = MemoryLog::new().with_poll_interval(Duration::from_millis(10));
    log.create_road("r1", 2);
    log.create_road("off", 2);

    let registry = Arc::new(StaticRoadRegistry::new(
        RoadSnapshot::from_yaml(&registry_yaml()).unwrap(),
    ));
    let metrics = Arc::new(MetricsCollector::new());
    let services = SessionServices {
        registry,
        metrics: metrics.clone(),
        admission: Arc::new(AdmitAll),
    };
    Harness {
        log,
        metrics,
        services,
    }
}

impl Harness {
    fn session(&self, road: &str, policy: OffsetPolicy) -> Session {
        Session::new(
            uuid::Uuid::new_v4(),
            StreamTarget::new(road, "s1", policy),
            Box::new(self.log.consumer(road, "s1")),
            self.services.clone(),
        )
    }

    fn append(&self, partition: Partition, seq: i64) -> i64 {
        self.log
            .append("r1", partition, ping(1, seq), 1_700_000_000_000 + seq)
            .unwrap()
    }

    /// Partition 0 holds offsets 10, 11 and 12.
    fn seed_partition_zero(&self) {
        self.log.set_partition_start("r1", 0, 10);
        for seq in 0..3 {
            self.append(0, seq);
        }
    }

    /// A streaming session on r1 with the seeded partition delivered up to 12.
    async fn delivered_session(&self) -> Session {
        self.seed_partition_zero();
        let mut session = self.session("r1", OffsetPolicy::Earliest);
        session.handle(Event::connection("agent1")).await.unwrap();
        session.handle(Event::request(5)).await.unwrap();
        let events = session.step().await.unwrap();
        assert_eq!(events.len(), 3);
        session
    }
}

fn ping(version: i32, seq: i64) -> Bytes {
    let schema = apache_avro::Schema::parse_str(PING).unwrap();
    let datum = apache_avro::to_avro_datum(
        &schema,
        Value::Record(vec![("seq".to_string(), Value::Long(seq))]),
    )
    .unwrap();
    encode_record(version, &datum)
}

fn message_offsets(events: &[Event]) -> Vec<(Partition, i64)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Message(m) => Some((m.partition, m.offset)),
            _ => None,
        })
        .collect()
}

fn assert_committed_not_ahead(session: &Session) {
    for partition in session.assignment() {
        let tracked = session.offsets().get(partition).unwrap();
        if let Some(committed) = tracked.last_committed {
            assert!(
                tracked.last_delivered.is_some_and(|d| committed <= d),
                "partition {partition}: committed {committed} ahead of {:?}",
                tracked.last_delivered
            );
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

#[tokio::test]
async fn test_connection_reaches_streaming_with_assignment() {
    let h = harness();
    let mut session = h.session("r1", OffsetPolicy::Latest);
    assert_eq!(session.state(), SessionState::Connecting);

    let events = session.handle(Event::connection("agent1")).await.unwrap();

    assert_eq!(events, vec![Event::rebalance([0, 1])]);
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(session.credit(), 0);
    assert_eq!(session.agent(), Some("agent1"));
    assert_eq!(h.log.members("r1", "s1"), 1);
}

#[tokio::test]
async fn test_disabled_road_never_leaves_connecting() {
    let h = harness();
    let mut session = h.session("off", OffsetPolicy::Latest);

    let err = session.handle(Event::connection("agent1")).await.unwrap_err();

    assert!(matches!(err, SessionError::RoadDisabled(road) if road == "off"));
    assert_eq!(session.state(), SessionState::Connecting);
    assert_eq!(h.log.members("off", "s1"), 0);

    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_unknown_and_deleted_roads_are_rejected() {
    let h = harness();

    let mut unknown = h.session("nope", OffsetPolicy::Latest);
    assert!(matches!(
        unknown.handle(Event::connection("agent1")).await,
        Err(SessionError::UnknownRoad(_))
    ));

    let mut deleted = h.session("gone", OffsetPolicy::Latest);
    assert!(matches!(
        deleted.handle(Event::connection("agent1")).await,
        Err(SessionError::RoadDeleted(_))
    ));
    assert_eq!(deleted.state(), SessionState::Connecting);
}

#[tokio::test]
async fn test_connection_requires_agent_name() {
    let h = harness();
    let mut session = h.session("r1", OffsetPolicy::Latest);
    assert!(matches!(
        session.handle(Event::connection("  ")).await,
        Err(SessionError::Protocol(_))
    ));
    assert_eq!(session.state(), SessionState::Connecting);
}

#[tokio::test]
async fn test_events_before_connection_are_protocol_errors() {
    let h = harness();
    let mut session = h.session("r1", OffsetPolicy::Latest);

    assert!(matches!(
        session.handle(Event::request(5)).await,
        Err(SessionError::Protocol(_))
    ));
    assert!(matches!(
        session.handle(Event::commit("c1", [(0, 1)])).await,
        Err(SessionError::Protocol(_))
    ));
    assert_eq!(session.credit(), 0);
}

#[tokio::test]
async fn test_second_connection_is_a_protocol_error() {
    let h = harness();
    let mut session = h.session("r1", OffsetPolicy::Latest);
    session.handle(Event::connection("agent1")).await.unwrap();

    assert!(matches!(
        session.handle(Event::connection("agent1")).await,
        Err(SessionError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_server_events_from_client_are_rejected() {
    let h = harness();
    let mut session = h.session("r1", OffsetPolicy::Latest);
    session.handle(Event::connection("agent1")).await.unwrap();

    for event in [
        Event::rebalance([0]),
        Event::commit_response("c1", true),
        Event::error("nope"),
    ] {
        assert!(matches!(
            session.handle(event).await,
            Err(SessionError::Protocol(_))
        ));
    }
}

struct DenyAll;

impl Admission for DenyAll {
    fn admit(&self, _session: SessionId, target: &StreamTarget, agent: &str) -> crate::error::Result<()> {
        Err(SessionError::DuplicateSession {
            road: target.road.clone(),
            stream: target.stream.clone(),
            agent: agent.to_string(),
        })
    }
}

#[tokio::test]
async fn test_refused_admission_does_not_join_group() {
    let mut h = harness();
    h.services.admission = Arc::new(DenyAll);
    let mut session = h.session("r1", OffsetPolicy::Latest);

    assert!(matches!(
        session.handle(Event::connection("agent1")).await,
        Err(SessionError::DuplicateSession { .. })
    ));
    assert_eq!(session.state(), SessionState::Connecting);
    assert_eq!(h.log.members("r1", "s1"), 0);
}

// ============================================================================
// Credit and delivery
// ============================================================================

#[tokio::test]
async fn test_request_then_delivery_in_offset_order() {
    let h = harness();
    h.seed_partition_zero();
    let mut session = h.session("r1", OffsetPolicy::Earliest);
    session.handle(Event::connection("agent1")).await.unwrap();

    assert!(session.handle(Event::request(5)).await.unwrap().is_empty());
    assert_eq!(session.credit(), 5);

    let events = session.step().await.unwrap();
    assert_eq!(message_offsets(&events), vec![(0, 10), (0, 11), (0, 12)]);
    assert_eq!(session.credit(), 2);
    assert_eq!(session.offsets().last_delivered(0), Some(12));

    match &events[0] {
        Event::Message(m) => {
            assert_eq!(m.schema, 1);
            assert_eq!(m.timestamp_ms, 1_700_000_000_000);
            assert_eq!(m.payload, serde_json::json!({"seq": 0}));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.messages_delivered, 3);
    assert_eq!(snapshot.high_water_offsets["r1"][&0], 12);
}

#[tokio::test]
async fn test_no_delivery_without_credit() {
    let h = harness();
    h.seed_partition_zero();
    let mut session = h.session("r1", OffsetPolicy::Earliest);
    session.handle(Event::connection("agent1")).await.unwrap();

    let idle = tokio::time::timeout(Duration::from_millis(50), session.step()).await;
    assert!(idle.is_err(), "step delivered without credit");

    session.handle(Event::request(1)).await.unwrap();
    let events = session.step().await.unwrap();
    assert_eq!(message_offsets(&events), vec![(0, 10)]);
    assert_eq!(session.credit(), 0);

    let idle = tokio::time::timeout(Duration::from_millis(50), session.step()).await;
    assert!(idle.is_err(), "step delivered past credit");
}

#[tokio::test]
async fn test_invalid_request_leaves_credit_unchanged() {
    let h = harness();
    let mut session = h.session("r1", OffsetPolicy::Latest);
    session.handle(Event::connection("agent1")).await.unwrap();
    session.handle(Event::request(3)).await.unwrap();

    for count in [0, -1] {
        assert!(matches!(
            session.handle(Event::request(count)).await,
            Err(SessionError::Protocol(_))
        ));
        assert_eq!(session.credit(), 3);
    }
}

#[tokio::test]
async fn test_empty_poll_keeps_credit() {
    let h = harness();
    let mut session = h.session("r1", OffsetPolicy::Latest);
    session.handle(Event::connection("agent1")).await.unwrap();
    session.handle(Event::request(2)).await.unwrap();

    assert!(session.step().await.unwrap().is_empty());
    assert_eq!(session.credit(), 2);

    h.append(1, 7);
    let events = session.step().await.unwrap();
    assert_eq!(message_offsets(&events), vec![(1, 0)]);
    assert_eq!(session.credit(), 1);
}

#[tokio::test]
async fn test_unknown_schema_version_is_fatal() {
    let h = harness();
    h.log.append("r1", 0, ping(9, 1), 0).unwrap();
    let mut session = h.session("r1", OffsetPolicy::Earliest);
    session.handle(Event::connection("agent1")).await.unwrap();
    session.handle(Event::request(1)).await.unwrap();

    assert!(matches!(
        session.step().await,
        Err(SessionError::UnknownSchemaVersion { version: 9, .. })
    ));
    assert_eq!(session.credit(), 1);
}

#[tokio::test]
async fn test_undecodable_record_is_fatal() {
    let h = harness();
    h.log.append("r1", 0, Bytes::from_static(b"\x07junk"), 0).unwrap();
    let mut session = h.session("r1", OffsetPolicy::Earliest);
    session.handle(Event::connection("agent1")).await.unwrap();
    session.handle(Event::request(1)).await.unwrap();

    assert!(matches!(
        session.step().await,
        Err(SessionError::Undeliverable { partition: 0, offset: 0, .. })
    ));
}

#[tokio::test]
async fn test_fatal_poll_error_terminates() {
    let h = harness();
    let mut session = h.session("r1", OffsetPolicy::Latest);
    session.handle(Event::connection("agent1")).await.unwrap();
    session.handle(Event::request(1)).await.unwrap();

    h.log.fail_polls_fatally("r1", "s1", "group revoked");
    assert!(matches!(
        session.step().await,
        Err(SessionError::Log(ConsumerError::Fatal(_)))
    ));
}

// ============================================================================
// Commit
// ============================================================================

#[tokio::test]
async fn test_commit_after_delivery_succeeds() {
    let h = harness();
    let mut session = h.delivered_session().await;

    let events = session
        .handle(Event::commit("c1", [(0, 12)]))
        .await
        .unwrap();

    assert_eq!(events, vec![Event::commit_response("c1", true)]);
    assert_eq!(session.offsets().last_committed(0), Some(12));
    assert_eq!(h.log.committed("r1", "s1").get(&0), Some(&13));
    assert_committed_not_ahead(&session);
}

#[tokio::test]
async fn test_commit_is_idempotent() {
    let h = harness();
    let mut session = h.delivered_session().await;

    for correlation_id in ["c1", "c1-again"] {
        let events = session
            .handle(Event::commit(correlation_id, [(0, 12)]))
            .await
            .unwrap();
        assert_eq!(events, vec![Event::commit_response(correlation_id, true)]);
        assert_eq!(session.offsets().last_committed(0), Some(12));
    }
}

#[tokio::test]
async fn test_commits_complete_before_next_event() {
    let h = harness();
    let mut session = h.delivered_session().await;

    // Reusing a correlation id is fine once its response has been produced.
    let first = session
        .handle(Event::commit("c1", [(0, 11)]))
        .await
        .unwrap();
    let second = session
        .handle(Event::commit("c1", [(0, 12)]))
        .await
        .unwrap();

    assert_eq!(first, vec![Event::commit_response("c1", true)]);
    assert_eq!(second, vec![Event::commit_response("c1", true)]);
    assert_eq!(h.log.committed("r1", "s1").get(&0), Some(&13));
}

#[tokio::test]
async fn test_commit_ahead_of_delivery_is_protocol_error() {
    let h = harness();
    let mut session = h.delivered_session().await;

    assert!(matches!(
        session.handle(Event::commit("c1", [(0, 13)])).await,
        Err(SessionError::Protocol(_))
    ));
    assert_eq!(session.offsets().last_committed(0), None);
}

#[tokio::test]
async fn test_commit_behind_committed_is_protocol_error() {
    let h = harness();
    let mut session = h.delivered_session().await;
    session.handle(Event::commit("c1", [(0, 12)])).await.unwrap();

    assert!(matches!(
        session.handle(Event::commit("c2", [(0, 11)])).await,
        Err(SessionError::Protocol(_))
    ));
    assert_eq!(session.offsets().last_committed(0), Some(12));
}

#[tokio::test]
async fn test_failed_commit_keeps_session_and_offsets() {
    let h = harness();
    let mut session = h.delivered_session().await;
    h.log.fail_commits("r1", "s1", true);

    let events = session
        .handle(Event::commit("c1", [(0, 12)]))
        .await
        .unwrap();
    assert_eq!(events, vec![Event::commit_response("c1", false)]);
    assert_eq!(session.offsets().last_committed(0), None);
    assert_eq!(session.state(), SessionState::Streaming);

    h.log.fail_commits("r1", "s1", false);
    let events = session
        .handle(Event::commit("c2", [(0, 12)]))
        .await
        .unwrap();
    assert_eq!(events, vec![Event::commit_response("c2", true)]);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.commits_failed, 1);
    assert_eq!(snapshot.commits_succeeded, 1);
}

#[tokio::test]
async fn test_empty_commit_succeeds() {
    let h = harness();
    let mut session = h.delivered_session().await;
    let events = session
        .handle(Event::commit("c0", std::iter::empty::<(Partition, i64)>()))
        .await
        .unwrap();
    assert_eq!(events, vec![Event::commit_response("c0", true)]);
}

// ============================================================================
// Rebalance
// ============================================================================

#[tokio::test]
async fn test_revoked_partition_fails_later_commit() {
    let h = harness();
    let mut session = h.delivered_session().await;
    session.handle(Event::commit("c1", [(0, 12)])).await.unwrap();

    h.log.revoke("r1", "s1", &[0]);
    let events = session.step().await.unwrap();
    assert_eq!(events, vec![Event::rebalance([1])]);
    assert!(session.offsets().get(0).is_none());
    assert_eq!(session.state(), SessionState::Streaming);

    let events = session
        .handle(Event::commit("c2", [(0, 13)]))
        .await
        .unwrap();
    assert_eq!(events, vec![Event::commit_response("c2", false)]);
}

#[tokio::test]
async fn test_commit_racing_rebalance_sees_new_assignment() {
    let h = harness();
    let mut session = h.delivered_session().await;

    h.log.revoke("r1", "s1", &[0]);
    let events = session
        .handle(Event::commit("c2", [(0, 12)]))
        .await
        .unwrap();

    assert_eq!(
        events,
        vec![Event::rebalance([1]), Event::commit_response("c2", false)]
    );
    assert_eq!(h.log.committed("r1", "s1").get(&0), None);
}

#[tokio::test]
async fn test_rebalance_keeps_credit_and_retained_offsets() {
    let h = harness();
    let mut session = h.delivered_session().await;
    h.append(1, 100);
    let events = session.step().await.unwrap();
    assert_eq!(message_offsets(&events), vec![(1, 0)]);
    session
        .handle(Event::commit("c1", [(0, 12), (1, 0)]))
        .await
        .unwrap();
    let credit = session.credit();

    h.log.revoke("r1", "s1", &[0]);
    session.step().await.unwrap();

    assert_eq!(session.credit(), credit);
    assert_eq!(session.offsets().last_committed(1), Some(0));
    assert_eq!(session.offsets().last_delivered(1), Some(0));
    assert_committed_not_ahead(&session);

    h.log.restore("r1", "s1", &[0]);
    let events = session.step().await.unwrap();
    assert_eq!(events, vec![Event::rebalance([0, 1])]);
    assert_eq!(session.offsets().last_committed(1), Some(0));
    assert_eq!(session.offsets().get(0).unwrap().last_delivered, None);
}

#[tokio::test]
async fn test_rebalance_wakes_session_without_credit() {
    let h = harness();
    let mut session = h.session("r1", OffsetPolicy::Latest);
    session.handle(Event::connection("agent1")).await.unwrap();

    let log = h.log.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        log.revoke("r1", "s1", &[1]);
    });

    let events = tokio::time::timeout(Duration::from_secs(1), session.step())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(events, vec![Event::rebalance([0])]);
}

#[tokio::test]
async fn test_regained_partition_resumes_after_commit() {
    let h = harness();
    let mut session = h.delivered_session().await;
    session.handle(Event::commit("c1", [(0, 11)])).await.unwrap();

    h.log.revoke("r1", "s1", &[0]);
    session.step().await.unwrap();
    h.log.restore("r1", "s1", &[0]);

    let events = session.step().await.unwrap();
    assert_eq!(events, vec![Event::rebalance([0, 1])]);
    let events = session.step().await.unwrap();
    assert_eq!(message_offsets(&events), vec![(0, 12)]);
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test]
async fn test_close_releases_group_once() {
    let h = harness();
    let mut session = h.delivered_session().await;
    assert_eq!(h.log.members("r1", "s1"), 1);

    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(h.log.members("r1", "s1"), 0);
    assert!(session.assignment().is_empty());

    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        session.handle(Event::request(1)).await,
        Err(SessionError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_metrics_sink_is_optional() {
    let mut h = harness();
    h.services.metrics = Arc::new(NoopMetrics);
    let mut session = h.delivered_session().await;
    let events = session
        .handle(Event::commit("c1", [(0, 12)]))
        .await
        .unwrap();
    assert_eq!(events, vec![Event::commit_response("c1", true)]);
    assert_eq!(h.metrics.snapshot().commits_succeeded, 0);
}
