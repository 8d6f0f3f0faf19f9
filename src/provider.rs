//! The documentation backend seam.

use async_trait::async_trait;

use crate::request::{DocRequest, DocResponse, ResourceClass};

/// Backend failures. Cloned to every caller of a coalesced fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend returned status {status}")]
    Status { status: u16 },
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

/// Source of documentation responses behind the gateway.
///
/// Implementations own transport concerns (HTTP client, retries, credentials). The gateway
/// only calls `fetch` on a cache miss, at most once per fingerprint at a time per process.
#[async_trait]
pub trait DocProvider: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, class: ResourceClass, request: DocRequest) -> Result<DocResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl DocProvider for Echo {
        async fn fetch(&self, class: ResourceClass, request: DocRequest) -> Result<DocResponse, ProviderError> {
            if request.path.is_empty() {
                return Err(ProviderError::NotFound(class.to_string()));
            }
            Ok(DocResponse::new(json!({ "class": class, "path": request.path })))
        }
    }

    #[tokio::test]
    async fn provider_is_object_safe() {
        let provider: std::sync::Arc<dyn DocProvider> = std::sync::Arc::new(Echo);
        let ok = provider
            .fetch(ResourceClass::Listing, DocRequest::new(ResourceClass::Listing, "frameworks"))
            .await
            .unwrap();
        assert_eq!(ok.body["class"], "listing");

        let err = provider
            .fetch(ResourceClass::Documentation, DocRequest::new(ResourceClass::Documentation, ""))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "resource not found: documentation");
    }
}
