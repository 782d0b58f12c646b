use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions, ModelClass};

/// Backoff schedule for transient provider failures: the call is retried
/// once per entry, then the error surfaces to the agent as recoverable.
const BACKOFF_MS: [u64; 2] = [100, 500];

fn is_transient(e: &TrellisError) -> bool {
    matches!(e, TrellisError::Provider(_) | TrellisError::RateLimited(_))
}

fn jittered(ms: u64) -> Duration {
    // 0.8x to 1.2x
    let factor = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * factor) as u64)
}

/// A gateway wrapper that retries transient failures with exponential
/// backoff before letting the error reach the engine.
pub struct RetryingGateway {
    inner: Arc<dyn ModelGateway>,
}

impl RetryingGateway {
    pub fn new(inner: Arc<dyn ModelGateway>) -> Self {
        Self { inner }
    }
}

impl ModelGateway for RetryingGateway {
    fn chat(
        &self,
        class: ModelClass,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut last_err = None;
            for (attempt, backoff_ms) in std::iter::once(None)
                .chain(BACKOFF_MS.iter().copied().map(Some))
                .enumerate()
            {
                if let Some(ms) = backoff_ms {
                    tokio::time::sleep(jittered(ms)).await;
                }
                match self
                    .inner
                    .chat(class, messages.clone(), options.clone())
                    .await
                {
                    Ok(text) => return Ok(text),
                    Err(e) if is_transient(&e) => {
                        warn!(attempt, error = %e, "Transient provider failure, retrying chat");
                        last_err = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(last_err.unwrap_or_else(|| TrellisError::Provider("chat retries exhausted".into())))
        })
    }

    fn embed(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let mut last_err = None;
            for (attempt, backoff_ms) in std::iter::once(None)
                .chain(BACKOFF_MS.iter().copied().map(Some))
                .enumerate()
            {
                if let Some(ms) = backoff_ms {
                    tokio::time::sleep(jittered(ms)).await;
                }
                match self.inner.embed(texts.clone()).await {
                    Ok(vectors) => return Ok(vectors),
                    Err(e) if is_transient(&e) => {
                        warn!(attempt, error = %e, "Transient provider failure, retrying embed");
                        last_err = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(last_err
                .unwrap_or_else(|| TrellisError::Provider("embed retries exhausted".into())))
        })
    }

    fn model_label(&self, class: ModelClass) -> String {
        self.inner.model_label(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyGateway {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl ModelGateway for FlakyGateway {
        fn chat(
            &self,
            _class: ModelClass,
            _messages: Vec<ChatMessage>,
            _options: ChatOptions,
        ) -> BoxFuture<'_, Result<String>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < self.fail_first {
                    Err(TrellisError::Provider("transient".into()))
                } else {
                    Ok("ok".into())
                }
            })
        }

        fn embed(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
            Box::pin(async move { Ok(vec![vec![0.0]; texts.len()]) })
        }

        fn model_label(&self, _class: ModelClass) -> String {
            "stub".into()
        }
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let inner = Arc::new(FlakyGateway {
            calls: AtomicUsize::new(0),
            fail_first: 2,
        });
        let gateway = RetryingGateway::new(inner.clone());
        let out = gateway
            .chat(ModelClass::Small, vec![ChatMessage::user("x")], ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_error() {
        let inner = Arc::new(FlakyGateway {
            calls: AtomicUsize::new(0),
            fail_first: 10,
        });
        let gateway = RetryingGateway::new(inner.clone());
        let err = gateway
            .chat(ModelClass::Small, vec![ChatMessage::user("x")], ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::Provider(_)));
        // initial attempt + one retry per backoff entry
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1 + BACKOFF_MS.len());
    }
}
