use std::future::Future;
use std::time::Duration;

use kpart_core::TransportError;

/// Run `fut`, failing with `Timeout` once `limit` elapses.
pub(crate) async fn bounded<T, F>(limit: Option<Duration>, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match limit {
        Some(d) => tokio::time::timeout(d, fut).await.unwrap_or(Err(TransportError::Timeout(d))),
        None => fut.await,
    }
}
