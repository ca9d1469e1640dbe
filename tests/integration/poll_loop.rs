//! Poll loop behaviour against scripted sources
//!
//! - One sample per reachable target per tick, in configured order
//! - A failing target is skipped without affecting the others
//! - Schema violations end the tick with an error
//! - Cancellation stops the loop between targets and during the cadence sleep

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use mongowatch::{
    MetricValue,
    actors::{
        messages::{WorkerEvent, WorkerEventKind},
        poller::{Poller, Shutdown, TickReport},
    },
    error::MonitorError,
};
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::helpers::*;

fn poller(service: &str, targets: &[&str], source: Arc<FakeSource>, sink: Arc<RecordingSink>) -> Poller {
    Poller::new(
        Arc::new(create_test_service(service, targets, 60)),
        source,
        sink,
        format!("{service}_group"),
    )
}

#[tokio::test]
async fn test_tick_submits_one_sample_per_target() {
    let source = Arc::new(FakeSource::healthy());
    let sink = Arc::new(RecordingSink::default());
    let poller = poller("mongo", &["db1"], source, sink.clone());

    let shutdown = Shutdown::new();
    let report = poller.tick(&shutdown.signal()).await.unwrap();

    assert_eq!(
        report,
        TickReport {
            submitted: 1,
            skipped: 0,
            interrupted: false
        }
    );

    let samples = sink.samples();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].group(), "mongo_group");
    assert_eq!(samples[0].identifier(), "db1");
    assert_eq!(samples[0].get("op_inserts"), Some(MetricValue::Integer(42)));
    // missing sections default to zero
    assert_eq!(samples[0].get("mem_resident"), Some(MetricValue::Integer(0)));
}

#[tokio::test]
async fn test_targets_polled_in_configured_order() {
    let source = Arc::new(FakeSource::healthy());
    let sink = Arc::new(RecordingSink::default());
    let poller = poller("mongo", &["c", "a", "b"], source.clone(), sink.clone());

    let shutdown = Shutdown::new();
    poller.tick(&shutdown.signal()).await.unwrap();

    assert_eq!(source.connects(), vec!["c", "a", "b"]);
    assert_eq!(sink.identifiers(), vec!["c", "a", "b"]);
}

#[tokio::test]
async fn test_unreachable_target_is_skipped() {
    let targets = ["t0", "t1", "t2", "t3"];

    for failing in targets {
        for step in [Step::ConnectError, Step::FetchError] {
            let source = Arc::new(FakeSource::healthy().script(failing, vec![step]));
            let sink = Arc::new(RecordingSink::default());
            let poller = poller("mongo", &targets, source, sink.clone());

            let shutdown = Shutdown::new();
            let report = poller.tick(&shutdown.signal()).await.unwrap();

            assert_eq!(report.submitted, 3);
            assert_eq!(report.skipped, 1);

            let expected: Vec<String> = targets
                .iter()
                .filter(|t| **t != failing)
                .map(|t| t.to_string())
                .collect();
            assert_eq!(sink.identifiers(), expected);
        }
    }
}

#[tokio::test]
async fn test_rejected_submission_skips_only_that_target() {
    let source = Arc::new(FakeSource::healthy());
    let sink = Arc::new(RecordingSink::failing_for(&["db2"]));
    let poller = poller("mongo", &["db1", "db2", "db3"], source, sink.clone());

    let shutdown = Shutdown::new();
    let report = poller.tick(&shutdown.signal()).await.unwrap();

    assert_eq!(report.submitted, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(sink.identifiers(), vec!["db1", "db3"]);
}

#[tokio::test]
async fn test_schema_violation_ends_the_tick() {
    let source = Arc::new(
        FakeSource::healthy().script("db2", vec![Step::Stats(malformed_status())]),
    );
    let sink = Arc::new(RecordingSink::default());
    let poller = poller("mongo", &["db1", "db2", "db3"], source, sink.clone());

    let shutdown = Shutdown::new();
    let result = poller.tick(&shutdown.signal()).await;

    assert_matches!(result, Err(MonitorError::Mapping(_)));
    assert_eq!(sink.identifiers(), vec!["db1"]);
}

#[tokio::test]
async fn test_strict_mode_propagates_target_failures() {
    let source = Arc::new(FakeSource::healthy().script("db1", vec![Step::ConnectError]));
    let sink = Arc::new(RecordingSink::default());
    let poller = poller("mongo", &["db1", "db2"], source, sink.clone()).with_strict(true);

    let shutdown = Shutdown::new();
    let result = poller.tick(&shutdown.signal()).await;

    assert_matches!(result, Err(MonitorError::Connection(_)));
    assert!(sink.samples().is_empty());
}

#[tokio::test]
async fn test_cancelled_before_tick_polls_nothing() {
    let source = Arc::new(FakeSource::healthy());
    let sink = Arc::new(RecordingSink::default());
    let poller = poller("mongo", &["db1", "db2"], source.clone(), sink.clone());

    let shutdown = Shutdown::new();
    shutdown.trigger();

    poller.run(shutdown.signal()).await.unwrap();

    assert!(source.connects().is_empty());
    assert!(sink.samples().is_empty());
}

#[tokio::test]
async fn test_cancellation_mid_list_stops_before_next_target() {
    let shutdown = Arc::new(Shutdown::new());
    let source = Arc::new(FakeSource::healthy().cancel_on("db2", shutdown.clone()));
    let sink = Arc::new(RecordingSink::default());
    let poller = poller("mongo", &["db1", "db2", "db3"], source.clone(), sink.clone());

    let report = poller.tick(&shutdown.signal()).await.unwrap();

    // the target in flight completes, the next one is never touched
    assert!(report.interrupted);
    assert_eq!(source.connects(), vec!["db1", "db2"]);
    assert_eq!(sink.identifiers(), vec!["db1", "db2"]);
}

#[tokio::test(start_paused = true)]
async fn test_ticks_follow_the_cadence() {
    let source = Arc::new(FakeSource::healthy());
    let sink = Arc::new(RecordingSink::default());
    let poller = Poller::new(
        Arc::new(create_test_service("mongo", &["db1"], 15)),
        source,
        sink.clone(),
        "mongo",
    );

    let shutdown = Shutdown::new();
    let signal = shutdown.signal();
    let handle = tokio::spawn(async move { poller.run(signal).await });

    // ticks at 0s, 15s and 30s
    tokio::time::sleep(Duration::from_secs(40)).await;
    shutdown.trigger();

    let start = Instant::now();
    handle.await.unwrap().unwrap();
    assert!(start.elapsed() <= Duration::from_secs(1));

    assert_eq!(sink.samples().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_tick_events_are_published() {
    let (event_tx, mut event_rx) = broadcast::channel::<WorkerEvent>(16);
    let source = Arc::new(FakeSource::healthy().script("db2", vec![Step::ConnectError]));
    let sink = Arc::new(RecordingSink::default());
    let poller = poller("mongo", &["db1", "db2"], source, sink).with_events(event_tx);

    let shutdown = Shutdown::new();
    let signal = shutdown.signal();
    let handle = tokio::spawn(async move { poller.run(signal).await });

    let event = event_rx.recv().await.unwrap();
    assert_eq!(event.service, "mongo");
    assert_matches!(
        event.kind,
        WorkerEventKind::TickCompleted {
            submitted: 1,
            skipped: 1
        }
    );

    shutdown.trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_services_poll_independently() {
    let failing = Arc::new(FakeSource::new(Step::ConnectError));
    let healthy = Arc::new(FakeSource::healthy());
    let sink = Arc::new(RecordingSink::default());

    let pollers = [
        poller("a", &["a1", "a2"], healthy.clone(), sink.clone()),
        poller("b", &["b1", "b2"], failing.clone(), sink.clone()),
        poller("c", &["c1"], healthy.clone(), sink.clone()),
    ];

    let shutdown = Shutdown::new();
    let signal = shutdown.signal();
    let reports = futures::future::join_all(pollers.iter().map(|p| p.tick(&signal))).await;

    let reports: Vec<TickReport> = reports
        .into_iter()
        .map(|report| tokio_test::assert_ok!(report))
        .collect();
    assert_eq!(reports[0].submitted, 2);
    assert_eq!(reports[1].skipped, 2);
    assert_eq!(reports[2].submitted, 1);

    let mut identifiers = sink.identifiers();
    identifiers.sort();
    assert_eq!(identifiers, vec!["a1", "a2", "c1"]);
    assert_eq!(failing.connects(), vec!["b1", "b2"]);
}
