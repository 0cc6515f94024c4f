//! Per-IDP JWT validation and the issuer dispatcher (C2, §4.2).

use base64::Engine;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk};
use jsonwebtoken::{DecodingKey, Validation};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::claims::{Claims, StandardClaims};
use crate::config::{Algorithm, TrustedIdpConfig};
use crate::error::{CoreError, CoreResult};

use super::jwks::JwksClient;

/// Validates tokens for exactly one [`TrustedIdpConfig`].
pub struct IdpValidator {
    config: TrustedIdpConfig,
    jwks: JwksClient,
}

impl IdpValidator {
    pub fn new(config: TrustedIdpConfig) -> CoreResult<Self> {
        config.validate()?;
        let jwks = JwksClient::new(config.jwks_uri.clone());
        Ok(Self { config, jwks })
    }

    pub fn config(&self) -> &TrustedIdpConfig {
        &self.config
    }

    /// Validate a compact JWT already confirmed to carry this IDP's `iss` and an
    /// allowed `alg`. Performs signature, audience, and time-window checks.
    pub async fn validate(
        &self,
        compact: &str,
        header: &jsonwebtoken::Header,
    ) -> CoreResult<Claims> {
        let alg = header.alg;
        if !self.allows(alg) {
            return Err(CoreError::DisallowedAlgorithm(format!("{alg:?}")));
        }

        let kid = header.kid.as_deref().ok_or(CoreError::InvalidToken)?;
        let jwk = self.jwks.find(kid).await?;
        let decoding_key = decoding_key_from_jwk(&jwk)?;

        let mut validation = Validation::new(alg);
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.set_audience(&[self.config.audience.clone()]);
        validation.leeway = self.config.clock_skew().as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;

        let token_data = jsonwebtoken::decode::<Value>(compact, &decoding_key, &validation)
            .map_err(map_jwt_error)?;

        let payload = token_data.claims;
        let raw = match &payload {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };

        let standard = standard_claims_from(&raw);

        if let Some(max_age) = self.config.max_token_age()
            && let Some(iat) = standard.iat
        {
            let age_limit = UNIX_EPOCH + Duration::from_secs(iat) + max_age;
            if age_limit < SystemTime::now() {
                return Err(CoreError::Expired);
            }
        }

        Ok(Claims {
            standard,
            raw,
            access_token: compact.to_string(),
        })
    }

    fn allows(&self, alg: jsonwebtoken::Algorithm) -> bool {
        self.config
            .allowed_algorithms
            .iter()
            .any(|a| a.to_jsonwebtoken() == alg)
    }
}

/// Selects the right [`IdpValidator`] by the token's `iss` claim before any network
/// call is made, and rejects algorithms outside the union of all configured IDPs'
/// allow-lists up front (blocks an algorithm-confusion attack across IDPs).
pub struct JwtDispatcher {
    validators: HashMap<String, IdpValidator>,
    allowed_union: Vec<Algorithm>,
}

impl JwtDispatcher {
    pub fn new(configs: Vec<TrustedIdpConfig>) -> CoreResult<Self> {
        if configs.is_empty() {
            return Err(CoreError::ConfigInvalid(
                "at least one trusted IDP is required".into(),
            ));
        }

        let mut allowed_union: Vec<Algorithm> = Vec::new();
        for cfg in &configs {
            for alg in &cfg.allowed_algorithms {
                if !allowed_union.contains(alg) {
                    allowed_union.push(*alg);
                }
            }
        }

        let mut validators = HashMap::new();
        for cfg in configs {
            let issuer = cfg.issuer.clone();
            validators.insert(issuer, IdpValidator::new(cfg)?);
        }

        Ok(Self {
            validators,
            allowed_union,
        })
    }

    /// Validate a compact bearer token end to end: parse, algorithm-gate, dispatch by
    /// issuer, then delegate to the per-IDP validator.
    pub async fn validate(&self, compact: &str) -> CoreResult<Claims> {
        let header = jsonwebtoken::decode_header(compact).map_err(|_| CoreError::InvalidToken)?;

        let alg_name = format!("{:?}", header.alg);
        if is_disallowed_family(&alg_name)
            || !self
                .allowed_union
                .iter()
                .any(|a| a.to_jsonwebtoken() == header.alg)
        {
            return Err(CoreError::DisallowedAlgorithm(alg_name));
        }

        let iss = peek_issuer(compact)?;
        let validator = self
            .validators
            .get(&iss)
            .ok_or_else(|| CoreError::UnknownIssuer(iss.clone()))?;

        validator.validate(compact, &header).await
    }
}

/// `none` and HMAC families are never representable in [`Algorithm`], but
/// `jsonwebtoken::decode_header` will happily parse a header naming them — reject
/// explicitly before any lookup.
fn is_disallowed_family(alg_name: &str) -> bool {
    alg_name.starts_with("HS") || alg_name.eq_ignore_ascii_case("none")
}

/// Base64url-decode the JWT payload segment just far enough to read `iss`, without
/// verifying the signature. This value is used only to pick which trusted IDP's
/// validator (and, transitively, public key) to use — it carries no authority.
fn peek_issuer(compact: &str) -> CoreResult<String> {
    let mut parts = compact.split('.');
    let _header = parts.next().ok_or(CoreError::InvalidToken)?;
    let payload_b64 = parts.next().ok_or(CoreError::InvalidToken)?;
    let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| CoreError::InvalidToken)?;
    let payload: Value =
        serde_json::from_slice(&payload_bytes).map_err(|_| CoreError::InvalidToken)?;
    payload
        .get("iss")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(CoreError::InvalidToken)
}

fn standard_claims_from(raw: &serde_json::Map<String, Value>) -> StandardClaims {
    let aud = match raw.get("aud") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    StandardClaims {
        iss: raw.get("iss").and_then(Value::as_str).map(str::to_string),
        sub: raw.get("sub").and_then(Value::as_str).map(str::to_string),
        aud,
        exp: raw.get("exp").and_then(Value::as_u64),
        nbf: raw.get("nbf").and_then(Value::as_u64),
        iat: raw.get("iat").and_then(Value::as_u64),
        jti: raw.get("jti").and_then(Value::as_str).map(str::to_string),
    }
}

fn decoding_key_from_jwk(jwk: &Jwk) -> CoreResult<DecodingKey> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
            .map_err(|e| CoreError::ConfigInvalid(format!("invalid RSA JWK: {e}"))),
        AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y)
            .map_err(|e| CoreError::ConfigInvalid(format!("invalid EC JWK: {e}"))),
        other => Err(CoreError::ConfigInvalid(format!(
            "unsupported JWK key type: {other:?}"
        ))),
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> CoreError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => CoreError::Expired,
        ErrorKind::ImmatureSignature => CoreError::NotYetValid,
        ErrorKind::InvalidAudience => CoreError::InvalidAudience,
        ErrorKind::InvalidIssuer => CoreError::UnknownIssuer(String::new()),
        ErrorKind::InvalidSignature => CoreError::InvalidSignature,
        ErrorKind::InvalidAlgorithm => CoreError::DisallowedAlgorithm(format!("{err}")),
        _ => CoreError::InvalidToken,
    }
}
