//! Headless rendering engine seam.
//!
//! The orchestrator and the local conversion backend only ever see these
//! traits. An engine instance is exclusively owned through an
//! [`EngineLease`], which releases it when dropped, so every exit path
//! (success, error, timeout, cancellation) gives the instance back.

#[cfg(feature = "chromium")]
pub mod chromium;

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;

use crate::error::EngineError;
use crate::geometry::PageGeometry;

/// Boxed future returned by engine operations.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// One leased engine instance (a browser tab, a worker, a test double).
pub trait RenderingEngine: Send {
    /// Replace the current document with `html`.
    fn load_markup<'a>(&'a mut self, html: &'a str) -> EngineFuture<'a, ()>;

    /// Evaluate a script and return its JSON result. Promises are awaited.
    /// A thrown exception is [`EngineError::Script`].
    fn execute_script<'a>(&'a mut self, script: &'a str) -> EngineFuture<'a, serde_json::Value>;

    /// Number of elements matching `selector` in the live DOM.
    fn page_count<'a>(&'a mut self, selector: &'a str) -> EngineFuture<'a, u32>;

    /// Serialise the live DOM.
    fn serialize_markup(&mut self) -> EngineFuture<'_, String>;

    /// Print the current document to PDF at the given page size.
    fn print_pdf<'a>(&'a mut self, geometry: &'a PageGeometry) -> EngineFuture<'a, Vec<u8>>;

    /// Give the instance back. Must not block; called from `Drop`.
    fn release(&mut self);
}

/// Hands out engine instances.
pub trait EngineProvider: Send + Sync {
    fn acquire(&self) -> EngineFuture<'_, Box<dyn RenderingEngine>>;
}

/// Acquire an engine wrapped in a lease.
pub async fn lease(provider: &dyn EngineProvider) -> Result<EngineLease, EngineError> {
    let engine = provider.acquire().await?;
    Ok(EngineLease::new(engine))
}

/// Exclusive ownership of one engine instance; released on drop.
pub struct EngineLease {
    engine: Option<Box<dyn RenderingEngine>>,
}

impl EngineLease {
    pub fn new(engine: Box<dyn RenderingEngine>) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    fn release_inner(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.release();
            log::debug!("engine released");
        }
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl Deref for EngineLease {
    type Target = dyn RenderingEngine;

    fn deref(&self) -> &Self::Target {
        match &self.engine {
            Some(engine) => engine.as_ref(),
            // Only `Drop` takes the engine.
            None => unreachable!("engine lease used after release"),
        }
    }
}

impl DerefMut for EngineLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.engine {
            Some(engine) => engine.as_mut(),
            None => unreachable!("engine lease used after release"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Dummy(Arc<AtomicUsize>);

    impl RenderingEngine for Dummy {
        fn load_markup<'a>(&'a mut self, _html: &'a str) -> EngineFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }
        fn execute_script<'a>(&'a mut self, _script: &'a str) -> EngineFuture<'a, serde_json::Value> {
            Box::pin(async { Ok(serde_json::Value::Null) })
        }
        fn page_count<'a>(&'a mut self, _selector: &'a str) -> EngineFuture<'a, u32> {
            Box::pin(async { Ok(1) })
        }
        fn serialize_markup(&mut self) -> EngineFuture<'_, String> {
            Box::pin(async { Ok(String::new()) })
        }
        fn print_pdf<'a>(&'a mut self, _geometry: &'a PageGeometry) -> EngineFuture<'a, Vec<u8>> {
            Box::pin(async { Ok(b"%PDF".to_vec()) })
        }
        fn release(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn drop_releases_exactly_once() {
        let released = Arc::new(AtomicUsize::new(0));
        {
            let _lease = EngineLease::new(Box::new(Dummy(released.clone())));
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let lease = EngineLease::new(Box::new(Dummy(released.clone())));
        drop(lease);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lease_derefs_to_engine() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut lease = EngineLease::new(Box::new(Dummy(released)));
        assert_eq!(lease.page_count("[x]").await.unwrap(), 1);
    }
}
