use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;

/// Read-only registry of bookable resources.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    /// Resources ordered by name then id, optionally restricted to a category.
    async fn list(&self, category: Option<ResourceCategory>) -> Result<Vec<Resource>, EngineError>;

    async fn get(&self, id: Ulid) -> Result<Resource, EngineError>;
}

/// Point-in-time booking reads. No subscriptions.
#[async_trait]
pub trait BookingSource: Send + Sync {
    /// Bookings of `resource_ids` intersecting `window`, rejected ones included.
    async fn snapshot(&self, window: Span, resource_ids: &[Ulid]) -> Result<Vec<Booking>, EngineError>;
}

/// Materializes one consistent version of catalog and bookings. The engine
/// loads once per call and serves every read of that call from the result.
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    async fn load(&self) -> Result<InMemorySource, EngineError>;
}

// ── In-memory adapter ────────────────────────────────────────────

/// Concurrent in-memory catalog and booking source. Payload shape differences
/// (bare arrays, `items` wrappers, paginated envelopes) are absorbed before
/// anything lands here.
pub struct InMemorySource {
    resources: DashMap<Ulid, Resource>,
    bookings: DashMap<Ulid, Vec<Booking>>,
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySource {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            bookings: DashMap::new(),
        }
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn insert_resource(&self, resource: Resource) {
        self.bookings.entry(resource.id).or_default();
        self.resources.insert(resource.id, resource);
    }

    /// Bookings may reference resources the catalog does not know; the engine
    /// rejects them when they show up in a snapshot.
    pub fn insert_booking(&self, booking: Booking) {
        self.bookings
            .entry(booking.resource_id)
            .or_default()
            .push(booking);
    }

    pub fn remove_booking(&self, resource_id: &Ulid, booking_id: &Ulid) -> Option<Booking> {
        let mut list = self.bookings.get_mut(resource_id)?;
        let pos = list.iter().position(|b| b.id == *booking_id)?;
        Some(list.remove(pos))
    }

    pub fn from_payload(payload: SnapshotPayload) -> Result<Self, EngineError> {
        let source = Self::new();
        for resource in payload.resources.into_vec() {
            source.insert_resource(resource);
        }
        for booking in payload.bookings.into_vec() {
            if booking.span.start >= booking.span.end {
                return Err(EngineError::InvalidRange(booking.span));
            }
            source.insert_booking(booking);
        }
        Ok(source)
    }
}

#[async_trait]
impl ResourceCatalog for InMemorySource {
    async fn list(&self, category: Option<ResourceCategory>) -> Result<Vec<Resource>, EngineError> {
        let mut out: Vec<Resource> = self
            .resources
            .iter()
            .filter(|e| category.is_none_or(|c| e.value().category == c))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn get(&self, id: Ulid) -> Result<Resource, EngineError> {
        self.resources
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))
    }
}

#[async_trait]
impl BookingSource for InMemorySource {
    async fn snapshot(&self, window: Span, resource_ids: &[Ulid]) -> Result<Vec<Booking>, EngineError> {
        let mut out = Vec::new();
        for id in resource_ids {
            if let Some(list) = self.bookings.get(id) {
                out.extend(list.iter().filter(|b| b.span.overlaps(&window)).cloned());
            }
            if out.len() > MAX_BOOKINGS_PER_SNAPSHOT {
                return Err(EngineError::LimitExceeded("too many bookings in snapshot"));
            }
        }
        Ok(out)
    }
}

// ── JSON snapshot adapter ────────────────────────────────────────

/// The shapes the upstream REST services return collections in.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Collection<T> {
    List(Vec<T>),
    Items { items: Vec<T> },
    Page { data: Vec<T> },
    Results { results: Vec<T> },
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Collection::List(Vec::new())
    }
}

impl<T> Collection<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Collection::List(v)
            | Collection::Items { items: v }
            | Collection::Page { data: v }
            | Collection::Results { results: v } => v,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotPayload {
    #[serde(default, alias = "spaces")]
    pub resources: Collection<Resource>,
    #[serde(default, alias = "reservations")]
    pub bookings: Collection<Booking>,
}

impl SnapshotPayload {
    pub fn from_json(bytes: &[u8]) -> Result<Self, EngineError> {
        serde_json::from_slice(bytes).map_err(|e| EngineError::Source(format!("bad snapshot: {e}")))
    }
}

/// A JSON snapshot file written by the upstream exporter. Every load reads
/// the file afresh, so each engine call sees whatever was last written.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotLoader for JsonFileSource {
    async fn load(&self) -> Result<InMemorySource, EngineError> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| EngineError::Source(format!("{}: {e}", self.path.display())))?;
        if meta.len() > MAX_SNAPSHOT_FILE_BYTES {
            return Err(EngineError::LimitExceeded("snapshot file too large"));
        }
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| EngineError::Source(format!("{}: {e}", self.path.display())))?;
        InMemorySource::from_payload(SnapshotPayload::from_json(&bytes)?)
    }
}
