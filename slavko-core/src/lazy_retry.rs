/*!
Deferred module loading with retry on transient load failures
*/

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use futures::future::{BoxFuture, FutureExt, TryFutureExt};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::LoaderConfig;

type Loader<T, E> = Box<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Decides whether a load error is worth another attempt
pub trait LoadErrorClassifier<E>: Send + Sync {
    fn is_transient_load_error(&self, error: &E) -> bool;
}

impl<E, F> LoadErrorClassifier<E> for F
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn is_transient_load_error(&self, error: &E) -> bool {
        self(error)
    }
}

/// Matches error messages against known chunk-load failure substrings
#[derive(Debug, Clone)]
pub struct ChunkLoadClassifier {
    patterns: Vec<String>,
}

impl ChunkLoadClassifier {
    pub fn new<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .collect(),
        }
    }

    pub fn matches(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.patterns.iter().any(|p| message.contains(p.as_str()))
    }
}

impl Default for ChunkLoadClassifier {
    fn default() -> Self {
        Self::new(LoaderConfig::default().transient_patterns)
    }
}

impl<E: Display> LoadErrorClassifier<E> for ChunkLoadClassifier {
    fn is_transient_load_error(&self, error: &E) -> bool {
        self.matches(&error.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Attempt n waits `delay * n` before attempt n + 1
    pub delay: Duration,
}

impl Default for LoadRetryPolicy {
    fn default() -> Self {
        Self::from(&LoaderConfig::default())
    }
}

impl From<&LoaderConfig> for LoadRetryPolicy {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: config.delay(),
        }
    }
}

/// Run `load` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. The last observed error is returned unchanged.
pub async fn load_with_retry<T, E, F, Fut, C>(
    label: &str,
    load: F,
    policy: LoadRetryPolicy,
    classifier: &C,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    C: LoadErrorClassifier<E> + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match load().await {
            Ok(module) => {
                debug!("Loaded {} on attempt {}", label, attempt);
                return Ok(module);
            }
            Err(e) => e,
        };

        if !classifier.is_transient_load_error(&error) {
            return Err(error);
        }

        if attempt >= max_attempts {
            warn!("❌ Giving up on {} after {} attempts: {}", label, attempt, error);
            return Err(error);
        }

        let wait = policy.delay.saturating_mul(attempt);
        warn!(
            "🔄 Load of {} failed ({}), retrying in {:?} [{}/{}]",
            label, error, wait, attempt, max_attempts
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

/// A module resolved on first use. Construction does no work; failures
/// surface from [`LazyModule::get`] and are not cached, so a later call
/// starts a fresh retry cycle.
pub struct LazyModule<T, E> {
    label: String,
    loader: Loader<T, E>,
    policy: LoadRetryPolicy,
    classifier: Box<dyn LoadErrorClassifier<E>>,
    resolved: OnceCell<Arc<T>>,
}

impl<T, E> LazyModule<T, E>
where
    T: Send + Sync + 'static,
    E: Display + 'static,
{
    pub fn new<F, Fut>(label: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        ChunkLoadClassifier: LoadErrorClassifier<E>,
    {
        Self {
            label: label.into(),
            loader: Box::new(move || loader().boxed()),
            policy: LoadRetryPolicy::default(),
            classifier: Box::new(ChunkLoadClassifier::default()),
            resolved: OnceCell::new(),
        }
    }

    pub fn with_policy(mut self, policy: LoadRetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_classifier<C>(mut self, classifier: C) -> Self
    where
        C: LoadErrorClassifier<E> + 'static,
    {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn with_config(self, config: &LoaderConfig) -> Self {
        self.with_policy(LoadRetryPolicy::from(config))
            .with_classifier(ChunkLoadClassifier::new(config.transient_patterns.clone()))
    }

    pub fn is_loaded(&self) -> bool {
        self.resolved.initialized()
    }

    /// Resolve the module, loading it if this is the first successful use
    pub async fn get(&self) -> Result<Arc<T>, E> {
        self.resolved
            .get_or_try_init(|| async {
                load_with_retry(&self.label, &self.loader, self.policy, self.classifier.as_ref())
                    .await
                    .map(Arc::new)
            })
            .await
            .cloned()
    }
}

/// Lazily load a module whose default export is the loader's output
pub fn lazy_with_retry<T, E, F, Fut>(label: impl Into<String>, loader: F) -> LazyModule<T, E>
where
    T: Send + Sync + 'static,
    E: Display + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    ChunkLoadClassifier: LoadErrorClassifier<E>,
{
    LazyModule::new(label, loader)
}

/// Lazily load one named export of a module. `select` reshapes the loaded
/// module into the export before it reaches the retry loop.
pub fn lazy_named<M, T, E, F, Fut, S>(label: impl Into<String>, loader: F, select: S) -> LazyModule<T, E>
where
    M: Send + 'static,
    T: Send + Sync + 'static,
    E: Display + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<M, E>> + Send + 'static,
    S: Fn(M) -> T + Clone + Send + Sync + 'static,
    ChunkLoadClassifier: LoadErrorClassifier<E>,
{
    LazyModule::new(label, move || loader().map_ok(select.clone()))
}
