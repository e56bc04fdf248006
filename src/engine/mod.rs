mod availability;
mod calendar;
mod conflict;
mod error;
mod filter;
mod grid;
mod store;

pub use availability::{contested_spans, free_spans, merge_overlapping};
pub use calendar::{midnight_ms, window_for, CalendarWindow, Direction, Granularity, Locale};
pub use conflict::{classify, classify_with, Strategy};
pub use error::EngineError;
pub use filter::{apply as apply_filters, narrow_resources, Filters, ResourceFilter};
pub use grid::{Grid, GridQuery};
pub use store::{BookingStore, ResourceBookings};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::source::{BookingSource, ResourceCatalog, SnapshotLoader};

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Concurrent per-resource classification tasks.
    pub workers: usize,
    /// Upper bound on any one engine call, store calls included.
    pub query_timeout: Duration,
    pub strategy: Strategy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            query_timeout: Duration::from_secs(5),
            strategy: Strategy::Auto,
        }
    }
}

/// Where an engine reads from. `Live` collaborators are queried directly;
/// a `Loaded` backing is materialized once per call.
enum Backing {
    Live {
        catalog: Arc<dyn ResourceCatalog>,
        source: Arc<dyn BookingSource>,
    },
    Loaded(Arc<dyn SnapshotLoader>),
}

/// Catalog and bookings serving a single engine call.
pub(crate) struct View {
    pub(crate) catalog: Arc<dyn ResourceCatalog>,
    pub(crate) source: Arc<dyn BookingSource>,
}

/// Stateless query engine over an external catalog and booking source.
/// Every call works on its own snapshot; nothing is cached between calls.
pub struct Engine {
    backing: Backing,
    workers: Arc<Semaphore>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        catalog: Arc<dyn ResourceCatalog>,
        source: Arc<dyn BookingSource>,
        settings: EngineSettings,
    ) -> Self {
        Self::with_backing(Backing::Live { catalog, source }, settings)
    }

    /// One object serving as both catalog and booking source.
    pub fn with_source<S>(source: Arc<S>, settings: EngineSettings) -> Self
    where
        S: ResourceCatalog + BookingSource + 'static,
    {
        Self::new(source.clone(), source, settings)
    }

    /// Catalog and bookings come from one `load` per call, so a grid never
    /// mixes two versions of the underlying data.
    pub fn with_loader(loader: Arc<dyn SnapshotLoader>, settings: EngineSettings) -> Self {
        Self::with_backing(Backing::Loaded(loader), settings)
    }

    fn with_backing(backing: Backing, settings: EngineSettings) -> Self {
        Self {
            backing,
            workers: Arc::new(Semaphore::new(settings.workers.max(1))),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) async fn view(&self, cancel: &CancellationToken) -> Result<View, EngineError> {
        match &self.backing {
            Backing::Live { catalog, source } => Ok(View {
                catalog: catalog.clone(),
                source: source.clone(),
            }),
            Backing::Loaded(loader) => {
                let loaded = Arc::new(with_cancel(cancel, loader.load()).await?);
                debug!("snapshot loaded: {} resources", loaded.resource_count());
                Ok(View {
                    catalog: loaded.clone(),
                    source: loaded,
                })
            }
        }
    }

    /// Bound `fut` by the configured query timeout. Expiry reads as
    /// `Cancelled`, same as a caller cancellation.
    pub(crate) async fn within_timeout<T, F>(&self, what: &str, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        match tokio::time::timeout(self.settings.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{what} timed out after {:?}", self.settings.query_timeout);
                Err(EngineError::Cancelled)
            }
        }
    }

    pub async fn list_resources(
        &self,
        category: Option<ResourceCategory>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Resource>, EngineError> {
        self.within_timeout("resource listing", async {
            let view = self.view(cancel).await?;
            with_cancel(cancel, view.catalog.list(category)).await
        })
        .await
    }

    /// Raw bookings of one resource intersecting `window`, rejected included,
    /// sorted by start then id.
    pub async fn bookings_for_resource(
        &self,
        resource_id: Ulid,
        window: Span,
        cancel: &CancellationToken,
    ) -> Result<Vec<Booking>, EngineError> {
        if window.start >= window.end {
            return Err(EngineError::InvalidRange(window));
        }
        self.within_timeout("booking listing", async {
            let view = self.view(cancel).await?;
            let resource = with_cancel(cancel, view.catalog.get(resource_id)).await?;
            let snapshot = with_cancel(cancel, view.source.snapshot(window, &[resource.id])).await?;
            let store = BookingStore::from_snapshot([&resource.id], snapshot)?;
            store.bookings_for_resource(resource.id, &window)
        })
        .await
    }
}

/// Race `fut` against `cancel`. The losing future is dropped, releasing
/// whatever it held.
pub(crate) async fn with_cancel<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        result = fut => result,
    }
}
