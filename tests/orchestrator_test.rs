mod common;

use bakery_payments::domain::error::ErrorCode;
use bakery_payments::domain::payment::PaymentState;
use bakery_payments::domain::ports::Ledger;
use bakery_payments::domain::transaction::{TransactionKind, TransactionOutcome};
use bakery_payments::infra::memory::OutboxStatus;
use bakery_payments::services::orchestrator::CreatePayment;
use common::*;

// ── create ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_authorizes_payment() {
    let h = harness(ScriptedGateway::new());
    let order_id = order();

    let view = h
        .orchestrator
        .create_payment(
            &ctx("K1"),
            CreatePayment {
                order_id,
                amount: amount("12.50"),
            },
        )
        .await
        .unwrap();

    assert_eq!(view.state, PaymentState::Authorized);
    assert_eq!(view.order_id, order_id);
    assert_eq!(view.amount.to_string(), "12.50");
    assert_eq!(view.currency, "USD");
    assert_eq!(view.version, 2);
    assert!(view.gateway_reference.as_deref().unwrap().starts_with("auth_"));

    let txs = h.ledger.transactions(view.payment_id).await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].kind, TransactionKind::Authorize);
    assert_eq!(txs[0].outcome, TransactionOutcome::Success);
    assert_eq!(txs[0].attempt_number, 1);
}

#[tokio::test]
async fn replay_returns_identical_snapshot_without_calling_gateway() {
    let h = harness(ScriptedGateway::new());
    let request = CreatePayment {
        order_id: order(),
        amount: amount("12.50"),
    };

    let first = h.orchestrator.create_payment(&ctx("K1"), request.clone()).await;
    let second = h.orchestrator.create_payment(&ctx("K1"), request).await;

    assert_eq!(first, second);
    assert_eq!(h.gateway.calls().len(), 1);
}

#[tokio::test]
async fn replay_returns_original_snapshot_even_after_later_changes() {
    let h = harness(ScriptedGateway::new());
    let request = CreatePayment {
        order_id: order(),
        amount: amount("20.00"),
    };
    let created = h
        .orchestrator
        .create_payment(&ctx("K1"), request.clone())
        .await
        .unwrap();
    h.orchestrator
        .capture_payment(&ctx("C1"), created.payment_id)
        .await
        .unwrap();

    let replay = h.orchestrator.create_payment(&ctx("K1"), request).await.unwrap();
    assert_eq!(replay, created);
    assert_eq!(replay.state, PaymentState::Authorized);
}

#[tokio::test]
async fn reused_key_with_different_payload_is_rejected() {
    let h = harness(ScriptedGateway::new());
    let order_id = order();
    h.orchestrator
        .create_payment(
            &ctx("K1"),
            CreatePayment {
                order_id,
                amount: amount("12.50"),
            },
        )
        .await
        .unwrap();

    let err = h
        .orchestrator
        .create_payment(
            &ctx("K1"),
            CreatePayment {
                order_id,
                amount: amount("99.00"),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::IdempotencyKeyReused);
    assert_eq!(h.gateway.calls().len(), 1);
}

#[tokio::test]
async fn amount_outside_limits_is_rejected_before_anything_is_stored() {
    let h = harness(ScriptedGateway::new());
    let order_id = order();

    for (key, raw) in [("low", "0.10"), ("high", "10000.01")] {
        let err = h
            .orchestrator
            .create_payment(
                &ctx(key),
                CreatePayment {
                    order_id,
                    amount: amount(raw),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError, "{raw}");
    }

    assert!(h.ledger.load_by_order(order_id).await.unwrap().is_empty());
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn declined_authorization_fails_payment() {
    let gateway = ScriptedGateway::new();
    gateway.script(TransactionKind::Authorize, [Step::Decline("insufficient_funds")]);
    let h = harness(gateway);

    let err = h
        .orchestrator
        .create_payment(
            &ctx("K1"),
            CreatePayment {
                order_id: order(),
                amount: amount("12.50"),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::GatewayDeclined);
    let snapshot = err.payment.expect("decline carries the payment");
    assert_eq!(snapshot.state, PaymentState::Failed);
    assert_eq!(snapshot.failure_reason.as_deref(), Some("insufficient_funds"));

    let outbox = h.ledger.outbox_records().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].entry.outcome.final_state, PaymentState::Failed);
}

// ── capture ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn capture_moves_authorized_payment_to_captured() {
    let h = harness(ScriptedGateway::new());
    let created = h
        .orchestrator
        .create_payment(
            &ctx("K1"),
            CreatePayment {
                order_id: order(),
                amount: amount("12.50"),
            },
        )
        .await
        .unwrap();

    let captured = h
        .orchestrator
        .capture_payment(&ctx("C1"), created.payment_id)
        .await
        .unwrap();

    assert_eq!(captured.state, PaymentState::Captured);
    assert_eq!(captured.version, 4);
    assert_eq!(captured.gateway_reference, created.gateway_reference);

    let capture_calls = h.gateway.calls_of(TransactionKind::Capture);
    assert_eq!(capture_calls.len(), 1);
    assert_eq!(
        Some(capture_calls[0].reference.as_str()),
        created.gateway_reference.as_deref()
    );

    let outbox = h.ledger.outbox_records().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].entry.outcome.final_state, PaymentState::Captured);
    assert_eq!(outbox[0].status, OutboxStatus::Pending);
}

#[tokio::test]
async fn capture_of_failed_payment_is_invalid_and_skips_gateway() {
    let gateway = ScriptedGateway::new();
    gateway.script(TransactionKind::Authorize, [Step::Decline("card_declined")]);
    let h = harness(gateway);
    let failed = h
        .orchestrator
        .create_payment(
            &ctx("K1"),
            CreatePayment {
                order_id: order(),
                amount: amount("12.50"),
            },
        )
        .await
        .unwrap_err()
        .payment
        .unwrap();

    let err = h
        .orchestrator
        .capture_payment(&ctx("C1"), failed.payment_id)
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::InvalidTransition);
    assert_eq!(err.payment.unwrap().state, PaymentState::Failed);
    assert!(h.gateway.calls_of(TransactionKind::Capture).is_empty());
}

#[tokio::test]
async fn capture_of_unknown_payment_is_not_found() {
    let h = harness(ScriptedGateway::new());
    let err = h
        .orchestrator
        .capture_payment(
            &ctx("C1"),
            bakery_payments::domain::id::PaymentId::generate(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn declined_capture_fails_payment() {
    let gateway = ScriptedGateway::new();
    gateway.script(TransactionKind::Capture, [Step::Decline("authorization_expired")]);
    let h = harness(gateway);
    let created = h
        .orchestrator
        .create_payment(
            &ctx("K1"),
            CreatePayment {
                order_id: order(),
                amount: amount("12.50"),
            },
        )
        .await
        .unwrap();

    let err = h
        .orchestrator
        .capture_payment(&ctx("C1"), created.payment_id)
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::GatewayDeclined);
    assert_eq!(err.payment.unwrap().state, PaymentState::Failed);
}

// ── refund ─────────────────────────────────────────────────────────────────

async fn captured_payment(h: &Harness, total: &str) -> bakery_payments::domain::payment::PaymentView {
    let created = h
        .orchestrator
        .create_payment(
            &ctx("K1"),
            CreatePayment {
                order_id: order(),
                amount: amount(total),
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
async fn refund_moves_captured_payment_to_refunded() {
    let h = harness(ScriptedGateway::new());
    let captured = captured_payment(&h, "30.00").await;

    let refunded = h
        .orchestrator
        .refund_payment(&ctx("R1"), captured.payment_id, amount("30.00"))
        .await
        .unwrap();

    assert_eq!(refunded.state, PaymentState::Refunded);
    assert_eq!(refunded.refund_amount, Some(amount("30.00")));

    let states: Vec<_> = h
        .ledger
        .outbox_records()
        .await
        .iter()
        .map(|r| r.entry.outcome.final_state)
        .collect();
    assert_eq!(states, vec![PaymentState::Captured, PaymentState::Refunded]);
}

#[tokio::test]
async fn declined_refund_returns_payment_to_captured() {
    let gateway = ScriptedGateway::new();
    gateway.script(TransactionKind::Refund, [Step::Decline("refund_window_closed")]);
    let h = harness(gateway);
    let captured = captured_payment(&h, "30.00").await;

    let err = h
        .orchestrator
        .refund_payment(&ctx("R1"), captured.payment_id, amount("10.00"))
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::GatewayDeclined);
    let snapshot = err.payment.unwrap();
    assert_eq!(snapshot.state, PaymentState::Captured);
    assert_eq!(snapshot.refund_amount, None);
    assert_eq!(snapshot.failure_reason.as_deref(), Some("refund_window_closed"));

    // A second refund under a new key gets a fresh gateway token.
    let refunded = h
        .orchestrator
        .refund_payment(&ctx("R2"), captured.payment_id, amount("10.00"))
        .await
        .unwrap();
    assert_eq!(refunded.state, PaymentState::Refunded);
    let refund_calls = h.gateway.calls_of(TransactionKind::Refund);
    assert_eq!(refund_calls.len(), 2);
    assert_ne!(refund_calls[0].token, refund_calls[1].token);
}

#[tokio::test]
async fn refund_larger_than_payment_is_rejected() {
    let h = harness(ScriptedGateway::new());
    let captured = captured_payment(&h, "30.00").await;

    let err = h
        .orchestrator
        .refund_payment(&ctx("R1"), captured.payment_id, amount("30.01"))
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::ValidationError);
    assert!(h.gateway.calls_of(TransactionKind::Refund).is_empty());
    let stored = h.orchestrator.get_payment(captured.payment_id).await.unwrap();
    assert_eq!(stored.state, PaymentState::Captured);
}

#[tokio::test]
async fn refund_before_capture_is_invalid() {
    let h = harness(ScriptedGateway::new());
    let created = h
        .orchestrator
        .create_payment(
            &ctx("K1"),
            CreatePayment {
                order_id: order(),
                amount: amount("12.50"),
            },
        )
        .await
        .unwrap();

    let err = h
        .orchestrator
        .refund_payment(&ctx("R1"), created.payment_id, amount("12.50"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidTransition);
}

// ── persistence failures ───────────────────────────────────────────────────

#[tokio::test]
async fn persistence_failure_releases_key_for_retry() {
    let h = harness(ScriptedGateway::new());
    let request = CreatePayment {
        order_id: order(),
        amount: amount("12.50"),
    };

    h.ledger.set_unavailable(true);
    let err = h
        .orchestrator
        .create_payment(&ctx("K1"), request.clone())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PersistenceFailure);
    assert!(err.code.is_retryable());
    assert!(h.idempotency.is_empty().await);

    h.ledger.set_unavailable(false);
    let view = h.orchestrator.create_payment(&ctx("K1"), request).await.unwrap();
    assert_eq!(view.state, PaymentState::Authorized);
}

// ── queries ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn payments_are_listed_by_order() {
    let h = harness(ScriptedGateway::new());
    let order_id = order();
    for key in ["K1", "K2"] {
        h.orchestrator
            .create_payment(
                &ctx(key),
                CreatePayment {
                    order_id,
                    amount: amount("5.00"),
                },
            )
            .await
            .unwrap();
    }

    let payments = h.orchestrator.payments_for_order(order_id).await.unwrap();
    assert_eq!(payments.len(), 2);
    assert!(h.orchestrator.payments_for_order(order()).await.unwrap().is_empty());
}

#[tokio::test]
async fn transaction_history_covers_every_step() {
    let h = harness(ScriptedGateway::new());
    let captured = captured_payment(&h, "30.00").await;
    h.orchestrator
        .refund_payment(&ctx("R1"), captured.payment_id, amount("5.00"))
        .await
        .unwrap();

    let kinds: Vec<_> = h
        .orchestrator
        .transactions(captured.payment_id)
        .await
        .unwrap()
        .iter()
        .map(|t| t.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TransactionKind::Authorize,
            TransactionKind::Capture,
            TransactionKind::Refund
        ]
    );
}
