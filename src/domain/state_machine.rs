use {
    super::error::PaymentError,
    super::payment::PaymentState,
    super::transaction::TransactionKind,
    derive_more::Display,
    serde::{Deserialize, Serialize},
};

/// Inputs to the payment state machine. `*Result` events carry whether the
/// gateway reported a definitive success (`ok == true`) or a decline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum PaymentEvent {
    #[display("RequestAuthorize")]
    RequestAuthorize,
    #[display("AuthorizeResult(ok={ok})")]
    AuthorizeResult { ok: bool },
    #[display("RequestCapture")]
    RequestCapture,
    #[display("CaptureResult(ok={ok})")]
    CaptureResult { ok: bool },
    #[display("RequestRefund")]
    RequestRefund,
    #[display("RefundResult(ok={ok})")]
    RefundResult { ok: bool },
}

impl PaymentEvent {
    /// The request event that starts a gateway step of the given kind.
    pub fn request(kind: TransactionKind) -> Option<Self> {
        match kind {
            TransactionKind::Authorize => Some(Self::RequestAuthorize),
            TransactionKind::Capture => Some(Self::RequestCapture),
            TransactionKind::Refund => Some(Self::RequestRefund),
            TransactionKind::Reversal => None,
        }
    }

    /// The result event that closes a gateway step of the given kind.
    pub fn result(kind: TransactionKind, ok: bool) -> Option<Self> {
        match kind {
            TransactionKind::Authorize => Some(Self::AuthorizeResult { ok }),
            TransactionKind::Capture => Some(Self::CaptureResult { ok }),
            TransactionKind::Refund => Some(Self::RefundResult { ok }),
            TransactionKind::Reversal => None,
        }
    }
}

/// Computes the next state for `event` applied in state `from`.
///
/// Pure: never touches storage. Any pair outside the transition table yields
/// [`PaymentError::InvalidTransition`] and the caller keeps the old state.
pub fn transition(from: PaymentState, event: PaymentEvent) -> Result<PaymentState, PaymentError> {
    use {PaymentEvent::*, PaymentState::*};

    let next = match (from, event) {
        (Created, RequestAuthorize) => Authorizing,
        (Authorizing, AuthorizeResult { ok: true }) => Authorized,
        (Authorizing, AuthorizeResult { ok: false }) => Failed,
        (Authorized, RequestCapture) => Capturing,
        (Capturing, CaptureResult { ok: true }) => Captured,
        (Capturing, CaptureResult { ok: false }) => Failed,
        (Captured, RequestRefund) => Refunding,
        (Refunding, RefundResult { ok: true }) => Refunded,
        // A failed refund leaves the captured funds where they were.
        (Refunding, RefundResult { ok: false }) => Captured,
        (from, event) => return Err(PaymentError::InvalidTransition { from, event }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_to_refunded() {
        let mut state = PaymentState::Created;
        for event in [
            PaymentEvent::RequestAuthorize,
            PaymentEvent::AuthorizeResult { ok: true },
            PaymentEvent::RequestCapture,
            PaymentEvent::CaptureResult { ok: true },
            PaymentEvent::RequestRefund,
            PaymentEvent::RefundResult { ok: true },
        ] {
            state = transition(state, event).unwrap();
        }
        assert_eq!(state, PaymentState::Refunded);
    }

    #[test]
    fn refund_failure_reverts_to_captured() {
        let next = transition(PaymentState::Refunding, PaymentEvent::RefundResult { ok: false });
        assert_eq!(next.unwrap(), PaymentState::Captured);
    }

    #[test]
    fn capture_before_authorization_is_invalid() {
        let err = transition(PaymentState::Created, PaymentEvent::RequestCapture).unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InvalidTransition {
                from: PaymentState::Created,
                event: PaymentEvent::RequestCapture
            }
        ));
    }

    #[test]
    fn event_display_is_readable() {
        assert_eq!(
            PaymentEvent::CaptureResult { ok: false }.to_string(),
            "CaptureResult(ok=false)"
        );
    }
}
