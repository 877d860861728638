//! Job handlers supplied by the application.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use docket_store::JobRecord;

use crate::HandlerError;

/// Work performed for each claimed record.
///
/// Handlers may do anything; the engine only waits for completion. An `Err`
/// is recorded on the record as `lastError` and the record is unlocked for
/// another attempt.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: JobRecord) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    async fn handle(&self, job: JobRecord) -> Result<(), HandlerError> {
        (**self).handle(job).await
    }
}

/// Handler built from an async closure. See [`handler_fn`].
#[derive(Clone)]
pub struct FnHandler<F> {
    f: F,
}

/// Turn an async closure into a [`JobHandler`].
///
/// ```
/// use docket_scheduler::handler_fn;
///
/// let handler = handler_fn(|job: docket_store::JobRecord| async move {
///     tracing::info!(id = %job.id, "processing");
///     Ok::<(), String>(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut, E>(f: F) -> FnHandler<F>
where
    F: Fn(JobRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut, E> JobHandler for FnHandler<F>
where
    F: Fn(JobRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    async fn handle(&self, job: JobRecord) -> Result<(), HandlerError> {
        (self.f)(job).await.map_err(HandlerError::new)
    }
}

/// Dispatch table from a record's `kind` to the handler for that subtype.
///
/// Records without a kind, or with a kind that has no route, go to the
/// fallback handler. Without a fallback they fail with a handler error, so
/// they stay enabled and visible through `lastError`.
#[derive(Default)]
pub struct KindRouter {
    routes: HashMap<String, Arc<dyn JobHandler>>,
    fallback: Option<Arc<dyn JobHandler>>,
}

impl KindRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route records of `kind` to `handler`.
    pub fn route(mut self, kind: impl Into<String>, handler: impl JobHandler + 'static) -> Self {
        self.routes.insert(kind.into(), Arc::new(handler));
        self
    }

    /// Handle records no route matches.
    pub fn fallback(mut self, handler: impl JobHandler + 'static) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    fn resolve(&self, kind: Option<&str>) -> Option<&Arc<dyn JobHandler>> {
        kind.and_then(|k| self.routes.get(k))
            .or(self.fallback.as_ref())
    }
}

#[async_trait]
impl JobHandler for KindRouter {
    async fn handle(&self, job: JobRecord) -> Result<(), HandlerError> {
        match self.resolve(job.kind.as_deref()) {
            Some(handler) => handler.handle(job).await,
            None => Err(HandlerError::new(format!(
                "no handler registered for kind {}",
                job.kind.as_deref().unwrap_or("<none>")
            ))),
        }
    }
}
