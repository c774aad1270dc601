//! Network collaborator.
//!
//! The cache never performs I/O itself; hosts plug their HTTP stack in
//! through [`Fetcher`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::NetworkError;
use crate::http::{Request, Response};

/// Default bound on a single network attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Performs network requests on behalf of the cache.
///
/// Any HTTP status is a successful fetch; `Err` is reserved for transport
/// failures.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        (**self).fetch(request).await
    }
}

/// Fetch with a deadline. Dropping the returned future cancels the fetch.
pub async fn fetch_with_timeout(
    fetcher: &dyn Fetcher,
    request: &Request,
    timeout: Duration,
) -> Result<Response, NetworkError> {
    match tokio::time::timeout(timeout, fetcher.fetch(request)).await {
        Ok(result) => result,
        Err(_) => {
            log::debug!("fetch of {} timed out after {:?}", request.url, timeout);
            Err(NetworkError::Timeout {
                after_ms: timeout.as_millis() as u64,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl Fetcher for Slow {
        async fn fetch(&self, _request: &Request) -> Result<Response, NetworkError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Response::new(200))
        }
    }

    struct Instant;

    #[async_trait]
    impl Fetcher for Instant {
        async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
            Ok(Response::new(200).with_url(request.url.clone()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let request = Request::new("https://expenses.example/");
        let err = fetch_with_timeout(&Slow, &request, Duration::from_millis(250))
            .await
            .unwrap_err();
        assert_eq!(err, NetworkError::Timeout { after_ms: 250 });
    }

    #[tokio::test]
    async fn fast_fetch_passes_through() {
        let fetcher: Arc<dyn Fetcher> = Arc::new(Instant);
        let request = Request::new("https://expenses.example/");
        let response = fetch_with_timeout(&fetcher, &request, DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(response.url, "https://expenses.example/");
    }
}
