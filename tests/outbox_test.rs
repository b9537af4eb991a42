mod common;

use bakery_payments::domain::error::PaymentError;
use bakery_payments::domain::outcome::PaymentOutcome;
use bakery_payments::domain::payment::PaymentState;
use bakery_payments::domain::ports::{BoxFuture, OutboxStore, OutcomeSink};
use bakery_payments::domain::transaction::TransactionKind;
use bakery_payments::infra::memory::OutboxStatus;
use bakery_payments::services::orchestrator::CreatePayment;
use bakery_payments::services::outbox_relay::{RelaySettings, relay_once};
use bakery_payments::services::reconciler::sweep_once;
use chrono::Utc;
use common::*;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Records what it receives; fails every delivery while `failing` is set.
#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<PaymentOutcome>>,
    failing: AtomicBool,
}

impl RecordingSink {
    fn failing() -> Self {
        let sink = Self::default();
        sink.failing.store(true, Ordering::SeqCst);
        sink
    }

    fn delivered(&self) -> Vec<PaymentOutcome> {
        self.delivered.lock().unwrap().clone()
    }
}

impl OutcomeSink for RecordingSink {
    fn deliver<'a>(&'a self, outcome: &'a PaymentOutcome) -> BoxFuture<'a, Result<(), PaymentError>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(PaymentError::Delivery("order service returned 503".into()));
            }
            self.delivered.lock().unwrap().push(outcome.clone());
            Ok(())
        })
    }
}

async fn captured_payment(h: &Harness) -> bakery_payments::domain::payment::PaymentView {
    let created = h
        .orchestrator
        .create_payment(
            &ctx("K1"),
            CreatePayment {
                order_id: order(),
                amount: amount("18.00"),
            },
        )
        .await
        .unwrap();
    h.orchestrator
        .capture_payment(&ctx("C1"), created.payment_id)
        .await
        .unwrap()
}

#[tokio::test]
async fn relay_delivers_terminal_outcome_once() {
    let h = harness(ScriptedGateway::new());
    let captured = captured_payment(&h).await;
    let sink = RecordingSink::default();
    let settings = RelaySettings::default();

    assert_eq!(relay_once(&h.ledger, &sink, &settings).await.unwrap(), 1);
    assert_eq!(relay_once(&h.ledger, &sink, &settings).await.unwrap(), 0);

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payment_id, captured.payment_id);
    assert_eq!(delivered[0].order_id, captured.order_id);
    assert_eq!(delivered[0].final_state, PaymentState::Captured);
    assert_eq!(delivered[0].gateway_reference, captured.gateway_reference);

    let records = h.ledger.outbox_records().await;
    assert_eq!(records[0].status, OutboxStatus::Delivered);
}

#[tokio::test]
async fn declined_authorization_publishes_failed_outcome() {
    let gateway = ScriptedGateway::new();
    gateway.script(TransactionKind::Authorize, [Step::Decline("insufficient_funds")]);
    let h = harness(gateway);
    let failed = h
        .orchestrator
        .create_payment(
            &ctx("K1"),
            CreatePayment {
                order_id: order(),
                amount: amount("18.00"),
            },
        )
        .await
        .unwrap_err();
    let sink = RecordingSink::default();

    relay_once(&h.ledger, &sink, &RelaySettings::default())
        .await
        .unwrap();

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].final_state, PaymentState::Failed);
    assert_eq!(delivered[0].gateway_reference, None);
    assert_eq!(
        Some(delivered[0].payment_id),
        failed.payment.map(|p| p.payment_id)
    );
}

#[tokio::test]
async fn failed_delivery_is_rescheduled_with_backoff() {
    let h = harness(ScriptedGateway::new());
    captured_payment(&h).await;
    let sink = RecordingSink::failing();
    let settings = RelaySettings::default();

    let before = Utc::now();
    assert_eq!(relay_once(&h.ledger, &sink, &settings).await.unwrap(), 0);

    let record = h.ledger.outbox_records().await.remove(0);
    assert_eq!(record.status, OutboxStatus::Pending);
    assert_eq!(record.entry.attempts, 1);
    assert!(record.entry.next_attempt_at > before);
    assert!(record.last_error.unwrap().contains("503"));

    // Not due yet, so nothing is claimed.
    sink.failing.store(false, Ordering::SeqCst);
    assert_eq!(relay_once(&h.ledger, &sink, &settings).await.unwrap(), 0);
    assert!(sink.delivered().is_empty());

    h.ledger.expedite_outbox().await;
    assert_eq!(relay_once(&h.ledger, &sink, &settings).await.unwrap(), 1);
    assert_eq!(sink.delivered().len(), 1);
}

#[tokio::test]
async fn delivery_keeps_retrying_past_the_alert_threshold() {
    let h = harness(ScriptedGateway::new());
    captured_payment(&h).await;
    let sink = RecordingSink::failing();
    let settings = RelaySettings {
        alert_after: 2,
        ..RelaySettings::default()
    };

    for _ in 0..12 {
        h.ledger.expedite_outbox().await;
        assert_eq!(relay_once(&h.ledger, &sink, &settings).await.unwrap(), 0);
    }

    let record = h.ledger.outbox_records().await.remove(0);
    assert_eq!(record.status, OutboxStatus::Pending);
    assert_eq!(record.entry.attempts, 12);
    let wait = record.entry.next_attempt_at - Utc::now();
    assert!(wait <= chrono::Duration::seconds(300));
    assert!(wait > chrono::Duration::seconds(250));

    // The ordering service comes back long after the threshold.
    sink.failing.store(false, Ordering::SeqCst);
    h.ledger.expedite_outbox().await;
    assert_eq!(relay_once(&h.ledger, &sink, &settings).await.unwrap(), 1);
    assert_eq!(sink.delivered().len(), 1);
    assert_eq!(
        h.ledger.outbox_records().await[0].status,
        OutboxStatus::Delivered
    );
}

#[tokio::test]
async fn claimed_entries_are_leased() {
    let h = harness(ScriptedGateway::new());
    captured_payment(&h).await;

    let first = h
        .ledger
        .claim_due(10, chrono::Duration::seconds(60))
        .await
        .unwrap();
    let second = h
        .ledger
        .claim_due(10, chrono::Duration::seconds(60))
        .await
        .unwrap();

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    assert_eq!(
        h.ledger.outbox_records().await[0].status,
        OutboxStatus::Processing
    );
}

#[tokio::test]
async fn refund_queues_both_terminal_outcomes_in_order() {
    let h = harness(ScriptedGateway::new());
    let captured = captured_payment(&h).await;
    h.orchestrator
        .refund_payment(&ctx("R1"), captured.payment_id, amount("18.00"))
        .await
        .unwrap();
    let sink = RecordingSink::default();

    assert_eq!(
        relay_once(&h.ledger, &sink, &RelaySettings::default())
            .await
            .unwrap(),
        2
    );
    let states: Vec<_> = sink.delivered().iter().map(|o| o.final_state).collect();
    assert_eq!(states, vec![PaymentState::Captured, PaymentState::Refunded]);
}

// ── idempotency retention ──────────────────────────────────────────────────

#[tokio::test]
async fn sweep_purges_only_expired_records() {
    let h = harness(ScriptedGateway::new());
    captured_payment(&h).await;
    assert_eq!(h.idempotency.len().await, 2);

    let kept = sweep_once(&h.idempotency, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(kept, 0);

    std::thread::sleep(Duration::from_millis(2));
    let purged = sweep_once(&h.idempotency, Duration::ZERO).await.unwrap();
    assert_eq!(purged, 2);
    assert!(h.idempotency.is_empty().await);
}

#[tokio::test]
async fn create_after_purge_returns_existing_payment() {
    let h = harness(ScriptedGateway::new());
    let request = CreatePayment {
        order_id: order(),
        amount: amount("9.75"),
    };
    let first = h
        .orchestrator
        .create_payment(&ctx("K1"), request.clone())
        .await
        .unwrap();

    std::thread::sleep(Duration::from_millis(2));
    sweep_once(&h.idempotency, Duration::ZERO).await.unwrap();

    let again = h
        .orchestrator
        .create_payment(&ctx("K1"), request)
        .await
        .unwrap();
    assert_eq!(again.payment_id, first.payment_id);
    assert_eq!(h.gateway.calls().len(), 1);
}
