//! Thin tower::Layer/Service binding for HTTP transports (C10, §4.10).
//!
//! Ground: teacher's `tower/mod.rs` + `tower/layer.rs` + `tower/service.rs` shape
//! (`AuthLayerConfig`, a config-carrying `Layer`, a `BoxFuture`-returning `Service`), but
//! attaching the `Session` via `http::Request::extensions_mut()` rather than the
//! teacher's TODO-marked injection path (see that module's `// TODO(Sprint 3)` comment).

mod layer;
mod service;

pub use layer::CoreAuthLayer;
pub use service::CoreAuthService;

/// Configuration for [`CoreAuthLayer`].
#[derive(Debug, Clone)]
pub struct CoreAuthLayerConfig {
    /// `realm` parameter on the `WWW-Authenticate` challenge.
    pub realm: String,
}

impl Default for CoreAuthLayerConfig {
    fn default() -> Self {
        Self {
            realm: "mcp".to_string(),
        }
    }
}

impl CoreAuthLayerConfig {
    pub fn with_realm(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_realm_is_mcp() {
        assert_eq!(CoreAuthLayerConfig::default().realm, "mcp");
    }
}
