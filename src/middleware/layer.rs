//! Tower Layer implementation for core authentication.

use std::sync::Arc;
use tower::Layer;

use crate::context::CoreContext;

use super::CoreAuthLayerConfig;
use super::service::CoreAuthService;

/// Tower Layer that wraps an inner service with bearer-token authentication backed by
/// a [`CoreContext`].
#[derive(Clone)]
pub struct CoreAuthLayer {
    context: Arc<CoreContext>,
    config: CoreAuthLayerConfig,
}

impl CoreAuthLayer {
    pub fn new(context: Arc<CoreContext>) -> Self {
        Self {
            context,
            config: CoreAuthLayerConfig::default(),
        }
    }

    pub fn with_config(context: Arc<CoreContext>, config: CoreAuthLayerConfig) -> Self {
        Self { context, config }
    }
}

impl<S> Layer<S> for CoreAuthLayer {
    type Service = CoreAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CoreAuthService::new(inner, Arc::clone(&self.context), self.config.clone())
    }
}
