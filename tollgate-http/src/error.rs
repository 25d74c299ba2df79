//! Gateway-side error taxonomy and status mapping.

use tollgate::proto::ReasonCode;

/// Why a request did not make it through the payment gate.
///
/// Each variant maps to exactly one HTTP status, see [`GateError::status`].
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// No `X-PAYMENT` header on a protected route.
    #[error("payment required")]
    MissingPayment,

    /// The header was present but not decodable base64 JSON.
    #[error("malformed payment header: {0}")]
    MalformedPayment(String),

    /// The payload names a scheme/network combination this route does not
    /// accept.
    #[error("no accepted payment requirements match the payload")]
    NoMatchingRequirements,

    /// Verification explicitly rejected the payment.
    #[error("payment verification rejected: {reason}")]
    Rejected {
        /// The precise rejection reason.
        reason: ReasonCode,
        /// Human-readable detail, when the facilitator provided one.
        detail: Option<String>,
    },

    /// The authorization was valid but settlement did not complete.
    #[error("payment settlement failed: {reason}")]
    SettlementFailed {
        /// The precise failure reason.
        reason: ReasonCode,
        /// Human-readable detail, when the facilitator provided one.
        detail: Option<String>,
    },

    /// The facilitator could not produce a verdict; no payment state
    /// changed.
    #[error("payment engine fault: {0}")]
    Engine(String),
}

impl GateError {
    /// HTTP status this error must surface as.
    #[must_use]
    pub fn status(&self) -> http::StatusCode {
        match self {
            Self::MissingPayment | Self::NoMatchingRequirements | Self::SettlementFailed { .. } => {
                http::StatusCode::PAYMENT_REQUIRED
            }
            Self::MalformedPayment(_) => http::StatusCode::BAD_REQUEST,
            Self::Rejected { .. } => http::StatusCode::FORBIDDEN,
            Self::Engine(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
