//! Durable-storage transport factory
//!
//! First in the precedence order. Opens sessions against snapshot-backed
//! container storage endpoints (transport tag `storage`).

use async_trait::async_trait;
use std::sync::Arc;

use crate::container::CachingUrlResolver;
use crate::resolution::ResolvedUrl;
use crate::session::ContainerSession;
use crate::transport::socket::SocketSession;
use crate::transport::{TransportFactory, TransportSettings};
use crate::types::Result;

pub struct DurableStorageFactory {
    settings: TransportSettings,
}

impl DurableStorageFactory {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TransportFactory for DurableStorageFactory {
    fn id(&self) -> &str {
        "storage"
    }

    async fn open(
        &self,
        locator: &str,
        resolved: &ResolvedUrl,
        resolver: Arc<CachingUrlResolver>,
    ) -> Result<Arc<dyn ContainerSession>> {
        let session =
            SocketSession::open(locator, resolved, resolver, "storage", &self.settings.client_name)
                .await?;
        Ok(session as Arc<dyn ContainerSession>)
    }
}
