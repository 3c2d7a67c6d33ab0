//! Dispatcher runs against wiremock receivers.

mod common;

use chrono::{Duration, Utc};
use common::*;
use pepo_webhooks::*;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Register an endpoint on `server`, subscribe it to tag 1 and fan out one
/// change.
async fn queued_event(h: &Harness, server: &MockServer) -> (uuid::Uuid, Event) {
    let view = h
        .services
        .registry
        .add_endpoint(CLIENT, &format!("{}/hook", server.uri()), None)
        .await
        .unwrap();
    h.services
        .reconciler
        .sync_subscriptions(CLIENT, view.id, &[tag(1)])
        .await
        .unwrap();
    h.services
        .fanout
        .fanout(TopicKind::TagVideo, &video_change(77), &[1])
        .await
        .unwrap();

    let events = h.store.events().await;
    assert_eq!(events.len(), 1);
    (view.id, events[0].clone())
}

async fn reload(h: &Harness, event: &Event) -> Event {
    h.store.find_event(event.uuid).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_event_is_delivered_and_signed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("pepo-version", "v2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness().await;
    let (endpoint, event) = queued_event(&h, &server).await;

    let report = h.services.dispatcher.tick(Utc::now()).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.delivered, 1);

    let stored = reload(&h, &event).await;
    assert_eq!(stored.status, EventStatus::Delivered);
    assert!(stored.lock_id.is_none());
    assert!(stored.error_response.is_none());

    let secrets = h
        .services
        .registry
        .secret_for_receiver(CLIENT, endpoint)
        .await
        .unwrap();
    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let get = |name: &str| request.headers.get(name).unwrap().to_str().unwrap().to_string();
    let body = String::from_utf8(request.body.clone()).unwrap();

    WebhookSignature::new(secrets)
        .verify(
            &get("pepo-timestamp"),
            &get("pepo-version"),
            &body,
            &get("pepo-signature"),
            300,
            Utc::now(),
        )
        .unwrap();
    let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(payload["data"]["video_id"], 77);

    // Nothing left to do.
    let report = h.services.dispatcher.tick(later(10)).await.unwrap();
    assert_eq!(report, DispatchReport::default());
}

#[tokio::test]
async fn test_failures_retry_then_give_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let h = harness().await;
    let (_, event) = queued_event(&h, &server).await;
    let dispatcher = &h.services.dispatcher;

    let first = Utc::now();
    let report = dispatcher.tick(first).await.unwrap();
    assert_eq!(report.retried, 1);

    let stored = reload(&h, &event).await;
    assert_eq!(stored.status, EventStatus::Queued);
    assert_eq!(stored.retry_count, 1);
    // Scheduled from the moment the claim was taken.
    assert!(stored.execute_at >= first + Duration::seconds(10));
    assert!(stored.execute_at < first + Duration::seconds(11));
    let error: serde_json::Value =
        serde_json::from_str(stored.error_response.as_deref().unwrap()).unwrap();
    assert_eq!(error["status_code"], 500);
    assert_eq!(error["body"], "boom");

    // Not due yet.
    let report = dispatcher.tick(first + Duration::seconds(5)).await.unwrap();
    assert_eq!(report.claimed, 0);

    let report = dispatcher.tick(later(1)).await.unwrap();
    assert_eq!(report.retried, 1);
    assert!(h.alerts.alerts().await.is_empty());

    let report = dispatcher.tick(later(2)).await.unwrap();
    assert_eq!(report.failed, 1);

    let stored = reload(&h, &event).await;
    assert_eq!(stored.status, EventStatus::Failed);
    assert_eq!(stored.retry_count, 3);

    let alerts = h.alerts.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::DeliveryFailed);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    assert_eq!(alerts[0].context["event_uuid"], event.uuid.to_string());

    // Terminal events are never picked up again.
    let report = dispatcher.tick(later(10)).await.unwrap();
    assert_eq!(report.claimed, 0);
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let h = harness().await;
    let (_, event) = queued_event(&h, &server).await;

    h.services.dispatcher.tick(Utc::now()).await.unwrap();
    let report = h.services.dispatcher.tick(later(1)).await.unwrap();
    assert_eq!(report.delivered, 1);

    let stored = reload(&h, &event).await;
    assert_eq!(stored.status, EventStatus::Delivered);
    assert_eq!(stored.retry_count, 1);
}

#[tokio::test]
async fn test_inactive_endpoint_fails_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness().await;
    let (endpoint, event) = queued_event(&h, &server).await;
    h.services
        .registry
        .update_endpoint_status(CLIENT, endpoint, "inactive")
        .await
        .unwrap();

    let report = h.services.dispatcher.tick(Utc::now()).await.unwrap();
    assert_eq!(report.failed, 1);

    let stored = reload(&h, &event).await;
    assert_eq!(stored.status, EventStatus::Failed);
    assert_eq!(stored.retry_count, 0);
    let error: serde_json::Value =
        serde_json::from_str(stored.error_response.as_deref().unwrap()).unwrap();
    assert_eq!(error["error"], ENDPOINT_UNAVAILABLE);
}

#[tokio::test]
async fn test_vault_outage_counts_internal_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness().await;
    let (_, event) = queued_event(&h, &server).await;
    h.kms.set_down(true);

    let report = h.services.dispatcher.tick(Utc::now()).await.unwrap();
    assert_eq!(report.retried, 1);
    let stored = reload(&h, &event).await;
    assert_eq!(stored.internal_error_count, 1);
    assert_eq!(stored.retry_count, 0);

    let report = h.services.dispatcher.tick(later(1)).await.unwrap();
    assert_eq!(report.failed, 1);
    let stored = reload(&h, &event).await;
    assert_eq!(stored.status, EventStatus::Failed);
    assert_eq!(stored.internal_error_count, 2);
    assert!(stored.error_response.unwrap().contains("vault_error"));
}

#[tokio::test]
async fn test_two_dispatchers_deliver_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness().await;
    queued_event(&h, &server).await;

    let a = h.services.dispatcher.clone().with_worker_id("a");
    let b = h.services.dispatcher.clone().with_worker_id("b");
    let now = Utc::now();
    let (ra, rb) = tokio::join!(a.tick(now), b.tick(now));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.claimed + rb.claimed, 1);
    assert_eq!(ra.delivered + rb.delivered, 1);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness().await;
    let (_, event) = queued_event(&h, &server).await;

    // A worker claims the event and dies.
    let now = Utc::now();
    let lease = Duration::seconds(30);
    let crashed = h
        .store
        .claim_event(event.uuid, "crashed:1", now, lease)
        .await
        .unwrap();
    assert!(crashed.is_some());

    let report = h.services.dispatcher.tick(now + Duration::seconds(10)).await.unwrap();
    assert_eq!(report.claimed, 0);

    let report = h.services.dispatcher.tick(now + Duration::seconds(31)).await.unwrap();
    assert_eq!(report.delivered, 1);

    // The late result of the dead worker is dropped.
    let written = h
        .store
        .complete_event(
            event.uuid,
            "crashed:1",
            EventUpdate::Failed {
                retry_count: 1,
                internal_error_count: 0,
                error_response: "late".to_string(),
            },
            now + Duration::seconds(40),
        )
        .await
        .unwrap();
    assert!(!written);
    assert_eq!(reload(&h, &event).await.status, EventStatus::Delivered);
}

#[tokio::test]
async fn test_repeated_crash_becomes_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness().await;
    let (_, event) = queued_event(&h, &server).await;

    // Two workers in a row claim the event and die.
    let now = Utc::now();
    let lease = Duration::seconds(30);
    for (n, at) in [(1, now), (2, now + Duration::seconds(31))] {
        let claimed = h
            .store
            .claim_event(event.uuid, &format!("crashed:{n}"), at, lease)
            .await
            .unwrap();
        assert!(claimed.is_some());
    }
    assert_eq!(reload(&h, &event).await.internal_error_count, 1);

    let report = h.services.dispatcher.tick(now + Duration::seconds(62)).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.failed, 1);

    let stored = reload(&h, &event).await;
    assert_eq!(stored.status, EventStatus::Failed);
    assert_eq!(stored.internal_error_count, 2);
    assert_eq!(stored.retry_count, 0);
    assert!(stored.error_response.unwrap().contains(LEASE_EXPIRED));

    let alerts = h.alerts.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::DeliveryFailed);
}

#[tokio::test]
async fn test_slow_batch_never_delivers_twice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(600)),
        )
        .expect(4)
        .mount(&server)
        .await;

    // Four deliveries in a row outlast one lease.
    let config = WebhookConfig::builder()
        .allow_http(true)
        .batch_size(4)
        .concurrency(1)
        .timeout(std::time::Duration::from_secs(1))
        .lease_timeout(std::time::Duration::from_secs(2))
        .retry_policy(RetryPolicy::fixed(3, std::time::Duration::from_secs(10)))
        .build();
    let h = harness_with(config).await;
    for n in 0..4 {
        let view = h
            .services
            .registry
            .add_endpoint(CLIENT, &format!("{}/hook/{n}", server.uri()), None)
            .await
            .unwrap();
        h.services
            .reconciler
            .sync_subscriptions(CLIENT, view.id, &[tag(1)])
            .await
            .unwrap();
    }
    h.services
        .fanout
        .fanout(TopicKind::TagVideo, &video_change(5), &[1])
        .await
        .unwrap();
    assert_eq!(h.store.events().await.len(), 4);

    let a = h.services.dispatcher.clone().with_worker_id("a");
    let b = h.services.dispatcher.clone().with_worker_id("b");
    let first = tokio::spawn(async move { a.tick(Utc::now()).await });

    tokio::time::sleep(std::time::Duration::from_millis(2200)).await;
    let second = b.tick(Utc::now()).await.unwrap();
    let first = first.await.unwrap().unwrap();

    assert_eq!(first.claimed, 4);
    assert_eq!(first.delivered, 4);
    assert_eq!(second.claimed, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
    assert!(
        h.store
            .events()
            .await
            .iter()
            .all(|e| e.status == EventStatus::Delivered)
    );
}

#[tokio::test]
async fn test_rotation_signs_with_both_secrets() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness().await;
    let (endpoint, _) = queued_event(&h, &server).await;
    let old = h
        .services
        .registry
        .secret_for_receiver(CLIENT, endpoint)
        .await
        .unwrap();
    h.services
        .registry
        .rotate_secret(CLIENT, endpoint)
        .await
        .unwrap();
    let both = h
        .services
        .registry
        .secret_for_receiver(CLIENT, endpoint)
        .await
        .unwrap();
    assert_eq!(both.len(), 2);
    assert_eq!(both[0], old[0]);

    h.services.dispatcher.tick(Utc::now()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let get = |name: &str| request.headers.get(name).unwrap().to_str().unwrap().to_string();
    let body = String::from_utf8(request.body.clone()).unwrap();
    assert_eq!(get("pepo-signature").split(',').count(), 2);

    // A receiver that only knows one of the two secrets accepts the request.
    for secret in &both {
        WebhookSignature::single(secret.as_str())
            .verify(
                &get("pepo-timestamp"),
                "v2",
                &body,
                &get("pepo-signature"),
                300,
                Utc::now(),
            )
            .unwrap();
    }
}

#[tokio::test]
async fn test_started_dispatcher_delivers_and_stops() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness().await;
    let (_, event) = queued_event(&h, &server).await;

    let handle = h.services.dispatcher.start();
    for _ in 0..100 {
        if reload(&h, &event).await.status == EventStatus::Delivered {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(!handle.is_finished());
    handle.stop().await.unwrap();

    assert_eq!(reload(&h, &event).await.status, EventStatus::Delivered);
}
