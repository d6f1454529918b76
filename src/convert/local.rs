//! Local backend: print through a leased rendering engine.

use std::sync::Arc;

use super::{BackendFuture, ConversionBackend};
use crate::engine::{lease, EngineProvider};
use crate::error::{BackendFailure, EngineError};
use crate::geometry::PageGeometry;

pub struct EngineBackend {
    engines: Arc<dyn EngineProvider>,
}

impl EngineBackend {
    pub fn new(engines: Arc<dyn EngineProvider>) -> Self {
        Self { engines }
    }
}

fn failure(err: EngineError) -> BackendFailure {
    match err {
        EngineError::Script(message) => BackendFailure::Rejected {
            status: None,
            diagnostic: message,
        },
        other => BackendFailure::Unreachable(other.to_string()),
    }
}

impl ConversionBackend for EngineBackend {
    fn name(&self) -> &'static str {
        "engine"
    }

    fn convert<'a>(&'a self, html: &'a str, geometry: &'a PageGeometry) -> BackendFuture<'a> {
        Box::pin(async move {
            let mut engine = lease(self.engines.as_ref()).await.map_err(failure)?;
            engine.load_markup(html).await.map_err(failure)?;
            engine.print_pdf(geometry).await.map_err(failure)
        })
    }
}
