//! [`Facilitator`] implementation backed by a remote facilitator over
//! HTTP.
//!
//! Speaks the facilitator's `POST /verify`, `POST /settle`, and
//! `GET /supported` endpoints with JSON bodies, so a gateway can delegate
//! payment handling to a shared facilitator deployment instead of
//! embedding a [`PaymentEngine`](tollgate::PaymentEngine).

use std::time::Duration;

use http::HeaderMap;
use reqwest::{Client, StatusCode};
use url::Url;

use tollgate::encoding::encode_payment_header;
use tollgate::error::EngineError;
use tollgate::proto::{
    PaymentPayload, PaymentRequirements, SettleRequest, SettlementResult, SupportedResponse,
    VerificationResult, VerifyRequest, PROTOCOL_VERSION,
};
use tollgate::Facilitator;

/// Errors from talking to a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    /// An endpoint URL could not be derived from the base URL.
    #[error("bad facilitator URL ({context}): {source}")]
    UrlParse {
        /// Which endpoint URL failed to build.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },

    /// The payment payload could not be serialized for transport.
    #[error("failed to encode payment payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The HTTP request itself failed.
    #[error("facilitator request failed ({context}): {source}")]
    Http {
        /// Which endpoint was being called.
        context: &'static str,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The facilitator answered with a non-success status.
    #[error("facilitator returned {status} ({context}): {body}")]
    HttpStatus {
        /// Which endpoint was being called.
        context: &'static str,
        /// The response status.
        status: StatusCode,
        /// The response body, for diagnostics.
        body: String,
    },

    /// The response body was not the expected JSON shape.
    #[error("failed to decode facilitator response ({context}): {source}")]
    Decode {
        /// Which endpoint was being called.
        context: &'static str,
        /// The underlying decode error.
        #[source]
        source: reqwest::Error,
    },
}

/// HTTP client for a remote facilitator.
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    client: Client,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl FacilitatorClient {
    /// Creates a client for the facilitator at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError::UrlParse`] if the endpoint URLs
    /// cannot be derived.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let join = |path: &str, context: &'static str| {
            base_url
                .join(path)
                .map_err(|source| FacilitatorClientError::UrlParse { context, source })
        };
        Ok(Self {
            verify_url: join("./verify", "verify endpoint")?,
            settle_url: join("./settle", "settle endpoint")?,
            supported_url: join("./supported", "supported endpoint")?,
            base_url,
            client: Client::new(),
            headers: HeaderMap::new(),
            timeout: None,
        })
    }

    /// The facilitator base URL this client talks to.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Attaches custom headers (e.g. authentication) to every request.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Bounds every request with a timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn request_body(
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyRequest, FacilitatorClientError> {
        Ok(VerifyRequest {
            version: PROTOCOL_VERSION,
            payment_header: encode_payment_header(payload)?,
            payment_requirements: requirements.clone(),
        })
    }

    async fn post_json<B, R>(
        &self,
        url: &Url,
        context: &'static str,
        body: &B,
    ) -> Result<R, FacilitatorClientError>
    where
        B: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let mut request = self
            .client
            .post(url.clone())
            .headers(self.headers.clone())
            .json(body);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|source| FacilitatorClientError::Decode { context, source })
    }

    /// Sends a `POST /verify` request.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] on transport or decode failure.
    pub async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerificationResult, FacilitatorClientError> {
        let body = Self::request_body(payload, requirements)?;
        self.post_json(&self.verify_url, "POST /verify", &body).await
    }

    /// Sends a `POST /settle` request.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] on transport or decode failure.
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettlementResult, FacilitatorClientError> {
        let body: SettleRequest = Self::request_body(payload, requirements)?.into();
        self.post_json(&self.settle_url, "POST /settle", &body).await
    }

    /// Sends a `GET /supported` request.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] on transport or decode failure.
    pub async fn supported(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        let context = "GET /supported";
        let mut request = self
            .client
            .get(self.supported_url.clone())
            .headers(self.headers.clone());
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|source| FacilitatorClientError::Decode { context, source })
    }
}

#[async_trait::async_trait]
impl Facilitator for FacilitatorClient {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerificationResult, EngineError> {
        Self::verify(self, payload, requirements)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettlementResult, EngineError> {
        Self::settle(self, payload, requirements)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))
    }

    async fn supported(&self) -> Result<SupportedResponse, EngineError> {
        Self::supported(self)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))
    }
}
