//! RFC 8693 token exchange (C6, §4.6).
//!
//! Ground: `turbomcp-auth::introspection::IntrospectionClient` for the form-encoded
//! `reqwest` request shape and the redacting manual `Debug` impl.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;

use crate::audit::{AuditEntry, AuditService};
use crate::cache::TokenCache;
use crate::claims::{Claims, StandardClaims};
use crate::config::TokenExchangeConfig;
use crate::error::{CoreError, CoreResult};

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
const REQUESTED_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters for a single exchange call.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub subject_token: String,
    pub audience: String,
    pub scope: Option<String>,
    pub session_id: Option<String>,
}

/// Outcome of a successful exchange.
#[derive(Debug, Clone)]
pub struct ExchangeResult {
    pub access_token: String,
    pub decoded_claims: Claims,
    pub expires_at: Option<SystemTime>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Performs RFC 8693 exchanges against one configured IDP endpoint, reading through an
/// optional [`TokenCache`].
pub struct TokenExchangeService {
    config: TokenExchangeConfig,
    http_client: reqwest::Client,
    cache: Arc<dyn TokenCache>,
    audit: Arc<dyn AuditService>,
}

impl TokenExchangeService {
    pub fn new(
        config: TokenExchangeConfig,
        cache: Arc<dyn TokenCache>,
        audit: Arc<dyn AuditService>,
    ) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            http_client: reqwest::Client::builder()
                .timeout(EXCHANGE_TIMEOUT)
                .build()
                .map_err(|e| CoreError::TokenExchangeConfigInvalid(e.to_string()))?,
            cache,
            audit,
        })
    }

    /// Perform an RFC 8693 exchange, consulting the cache first when a `session_id` is
    /// given.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use mcp_delegation_core::token_exchange::{TokenExchangeService, ExchangeRequest};
    /// # fn service() -> TokenExchangeService { unimplemented!() }
    /// # tokio_test::block_on(async {
    /// let service = service();
    /// let result = service
    ///     .exchange(ExchangeRequest {
    ///         subject_token: "subject-access-token".to_string(),
    ///         audience: "https://downstream.example.com".to_string(),
    ///         scope: None,
    ///         session_id: Some("session-1".to_string()),
    ///     })
    ///     .await?;
    /// println!("exchanged for: {}", result.access_token);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// # });
    /// ```
    pub async fn exchange(&self, request: ExchangeRequest) -> CoreResult<ExchangeResult> {
        if let Some(session_id) = &request.session_id
            && let Some(cached) = self
                .cache
                .get(session_id, &request.audience, &request.subject_token)
                .await
        {
            return decode_cached(cached);
        }

        let result = self.exchange_via_idp(&request).await;

        match &result {
            Ok(exchange) => {
                self.audit.log(
                    AuditEntry::new("auth:token-exchange", "exchange_success", true)
                        .with_metadata("audience", request.audience.clone())
                        .with_metadata(
                            "session_id",
                            request.session_id.clone().unwrap_or_default(),
                        ),
                );

                if let Some(session_id) = &request.session_id {
                    let exp = exchange.expires_at.unwrap_or_else(|| {
                        SystemTime::now() + Duration::from_secs(self.config.cache.ttl_seconds)
                    });
                    self.cache
                        .put(
                            session_id,
                            &request.audience,
                            &exchange.access_token,
                            exp,
                            &request.subject_token,
                        )
                        .await;
                }
            }
            Err(e) => {
                self.audit.log(
                    AuditEntry::new("auth:token-exchange", "exchange_failed", false)
                        .with_metadata("audience", request.audience.clone())
                        .with_metadata(
                            "session_id",
                            request.session_id.clone().unwrap_or_default(),
                        )
                        .with_error(e.sanitized_description()),
                );
            }
        }

        result
    }

    async fn exchange_via_idp(&self, request: &ExchangeRequest) -> CoreResult<ExchangeResult> {
        let scope = request
            .scope
            .clone()
            .or_else(|| self.config.default_scope.clone());

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", GRANT_TYPE),
            ("subject_token", request.subject_token.as_str()),
            ("subject_token_type", SUBJECT_TOKEN_TYPE),
            ("requested_token_type", REQUESTED_TOKEN_TYPE),
            ("audience", request.audience.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(scope) = &scope {
            form.push(("scope", scope.as_str()));
        }
        let secret = self.config.client_secret.expose_secret().to_string();
        form.push(("client_secret", secret.as_str()));

        let response = self
            .http_client
            .post(&self.config.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::TokenExchangeTimeout
                } else {
                    CoreError::TokenExchangeFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body: OAuthErrorBody = response.json().await.unwrap_or_default();
            let reason = body
                .error_description
                .or(body.error)
                .unwrap_or_else(|| format!("status {status}"));
            return Err(CoreError::TokenExchangeFailed(reason));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| CoreError::TokenExchangeFailed(format!("malformed response: {e}")))?;

        let decoded_claims = decode_without_verification(&token_response.access_token)?;
        let expires_at = token_response
            .expires_in
            .map(|secs| SystemTime::now() + Duration::from_secs(secs))
            .or_else(|| decoded_claims.standard.exp.map(|exp| UNIX_EPOCH + Duration::from_secs(exp)));

        Ok(ExchangeResult {
            access_token: token_response.access_token,
            decoded_claims,
            expires_at,
        })
    }
}

/// Decode the delegation token's claims for inspection only. Trust in this token is
/// established by the IDP's own downstream validation (the module that receives it will
/// validate it against its own trusted-issuer config), not by this service.
fn decode_without_verification(compact: &str) -> CoreResult<Claims> {
    let mut parts = compact.split('.');
    let _header = parts.next().ok_or(CoreError::InvalidToken)?;
    let payload_b64 = parts.next().ok_or(CoreError::InvalidToken)?;
    let payload_bytes = base64::Engine::decode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        payload_b64,
    )
    .map_err(|_| CoreError::InvalidToken)?;
    let raw: serde_json::Map<String, Value> =
        serde_json::from_slice(&payload_bytes).map_err(|_| CoreError::InvalidToken)?;

    let aud = match raw.get("aud") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let standard = StandardClaims {
        iss: raw.get("iss").and_then(Value::as_str).map(str::to_string),
        sub: raw.get("sub").and_then(Value::as_str).map(str::to_string),
        aud,
        exp: raw.get("exp").and_then(Value::as_u64),
        nbf: raw.get("nbf").and_then(Value::as_u64),
        iat: raw.get("iat").and_then(Value::as_u64),
        jti: raw.get("jti").and_then(Value::as_str).map(str::to_string),
    };

    Ok(Claims {
        standard,
        raw,
        access_token: compact.to_string(),
    })
}

fn decode_cached(plaintext_token: String) -> CoreResult<ExchangeResult> {
    let decoded_claims = decode_without_verification(&plaintext_token)?;
    let expires_at = decoded_claims
        .standard
        .exp
        .map(|exp| UNIX_EPOCH + Duration::from_secs(exp));
    Ok(ExchangeResult {
        access_token: plaintext_token,
        decoded_claims,
        expires_at,
    })
}
