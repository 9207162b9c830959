//! Realtime-ordering transport factory
//!
//! Second in the precedence order. Opens sessions against realtime ordering
//! service endpoints (transport tag `ordering`), which push context-change
//! notifications as the container's component tree evolves.

use async_trait::async_trait;
use std::sync::Arc;

use crate::container::CachingUrlResolver;
use crate::resolution::ResolvedUrl;
use crate::session::ContainerSession;
use crate::transport::socket::SocketSession;
use crate::transport::{TransportFactory, TransportSettings};
use crate::types::Result;

pub struct OrderingFactory {
    settings: TransportSettings,
}

impl OrderingFactory {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TransportFactory for OrderingFactory {
    fn id(&self) -> &str {
        "ordering"
    }

    async fn open(
        &self,
        locator: &str,
        resolved: &ResolvedUrl,
        resolver: Arc<CachingUrlResolver>,
    ) -> Result<Arc<dyn ContainerSession>> {
        let session =
            SocketSession::open(locator, resolved, resolver, "ordering", &self.settings.client_name)
                .await?;
        Ok(session as Arc<dyn ContainerSession>)
    }
}
