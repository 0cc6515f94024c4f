//! Tower Service implementation: extract bearer -> authenticate -> reject-or-attach.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::{HeaderValue, Request, Response, StatusCode, header};
use tower_service::Service;

use crate::context::CoreContext;

use super::CoreAuthLayerConfig;

/// Tower Service performing the extract/authenticate/reject-or-attach sequence of
/// §4.10 for `http::Request<B>`/`http::Response<ResBody>` transports.
#[derive(Clone)]
pub struct CoreAuthService<S> {
    inner: S,
    context: Arc<CoreContext>,
    config: CoreAuthLayerConfig,
}

impl<S> CoreAuthService<S> {
    pub fn new(inner: S, context: Arc<CoreContext>, config: CoreAuthLayerConfig) -> Self {
        Self {
            inner,
            context,
            config,
        }
    }
}

fn extract_bearer<B>(req: &Request<B>) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?;
    let value = value.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim().to_string())
    } else {
        None
    }
}

fn challenge_response<ResBody: Default>(
    realm: &str,
    status: u16,
    error: &str,
    description: &str,
) -> Response<ResBody> {
    let challenge = format!(r#"Bearer realm="{realm}", error="{error}", error_description="{description}""#);
    let mut response = Response::new(ResBody::default());
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

impl<S, B, ResBody> Service<Request<B>> for CoreAuthService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let context = Arc::clone(&self.context);
        let realm = self.config.realm.clone();
        let inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner);

        Box::pin(async move {
            let Some(token) = extract_bearer(&req) else {
                return Ok(challenge_response(
                    &realm,
                    401,
                    "invalid_request",
                    "missing bearer token",
                ));
            };

            match context.auth_service.authenticate(&token).await {
                Ok(result) if !result.rejected => {
                    let mut req = req;
                    req.extensions_mut().insert(result.session);
                    inner.call(req).await
                }
                Ok(result) => Ok(challenge_response(
                    &realm,
                    403,
                    "insufficient_scope",
                    &result.rejection_reason.unwrap_or_default(),
                )),
                Err(e) => Ok(challenge_response(
                    &realm,
                    e.http_status_code(),
                    e.oauth_error_code(),
                    &e.sanitized_description(),
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    #[test]
    fn extracts_bearer_token_case_insensitively() {
        let req = Request::builder()
            .header(header::AUTHORIZATION, "bearer abc.def.ghi")
            .body(())
            .unwrap();
        assert_eq!(extract_bearer(&req).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn missing_authorization_header_yields_none() {
        let req = Request::builder().body(()).unwrap();
        assert!(extract_bearer(&req).is_none());
    }

    #[test]
    fn non_bearer_scheme_yields_none() {
        let req = Request::builder()
            .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(())
            .unwrap();
        assert!(extract_bearer(&req).is_none());
    }

    #[test]
    fn challenge_response_sets_status_and_header() {
        let response: Response<String> = challenge_response(
            "mcp",
            401,
            "invalid_token",
            "token expired",
        );
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let header = response.headers().get(header::WWW_AUTHENTICATE).unwrap();
        assert!(header.to_str().unwrap().contains("error=\"invalid_token\""));
    }
}
