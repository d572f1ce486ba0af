//! Resource implementations

pub mod acm;
pub mod acmpca;
pub mod ec2;

pub use acm::AcmCertificateResource;
pub use acmpca::CertificateAuthorityResource;
pub use ec2::CustomerGatewayResource;

use crate::api::ApiError;
use std::future::Future;
use std::time::Duration;
use tfplug::context::Context;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Poll until `poll` yields a value, the timeout passes or `ctx` is cancelled.
/// The first poll happens immediately; later ones back off exponentially.
pub(crate) async fn wait_for<F, Fut, T>(
    ctx: &Context,
    what: &str,
    timeout: Duration,
    mut poll: F,
) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ApiError>>,
{
    let ctx = ctx.with_timeout(timeout);
    let mut interval = MIN_POLL_INTERVAL;

    loop {
        match poll().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => return Err(format!("error waiting for {}: {}", what, e)),
        }

        tracing::debug!("Waiting {}ms for {}", interval.as_millis(), what);
        ctx.sleep(interval)
            .await
            .map_err(|e| format!("gave up waiting for {}: {}", what, e))?;
        interval = (interval * 2).min(MAX_POLL_INTERVAL);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn ready_value_returns_without_sleeping() {
        let started = std::time::Instant::now();
        let value = wait_for(&Context::new(), "gateway", Duration::from_secs(5), || async {
            Ok(Some(42))
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert!(started.elapsed() < MIN_POLL_INTERVAL);
    }

    #[tokio::test]
    async fn polls_until_ready() {
        let polls = AtomicU32::new(0);
        let value = wait_for(&Context::new(), "gateway", Duration::from_secs(5), || async {
            if polls.fetch_add(1, Ordering::SeqCst) < 1 {
                Ok(None)
            } else {
                Ok(Some("available"))
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "available");
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn api_errors_stop_the_wait() {
        let err = wait_for::<_, _, ()>(&Context::new(), "gateway", Duration::from_secs(5), || async {
            Err(ApiError::Invalid("boom".to_string()))
        })
        .await
        .unwrap_err();

        assert!(err.starts_with("error waiting for gateway"));
    }

    #[tokio::test]
    async fn times_out() {
        let err = wait_for::<_, _, ()>(&Context::new(), "gateway", Duration::from_millis(20), || async {
            Ok(None)
        })
        .await
        .unwrap_err();

        assert!(err.starts_with("gave up waiting for gateway"), "{}", err);
    }
}
