use std::collections::{BTreeMap, HashMap};

use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Bookings of one resource, sorted by `(span.start, id)`.
#[derive(Debug, Clone, Default)]
pub struct ResourceBookings {
    bookings: Vec<Booking>,
}

impl ResourceBookings {
    /// Insert maintaining sort order by start, ties by id.
    pub fn insert(&mut self, booking: Booking) {
        let key = booking.sort_key();
        let pos = self
            .bookings
            .binary_search_by_key(&key, Booking::sort_key)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    /// Bookings whose span overlaps `query`.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// Point-in-time snapshot of bookings, keyed by resource. Resources must be
/// registered before bookings can reference them.
#[derive(Debug, Default)]
pub struct BookingStore {
    resources: HashMap<Ulid, ResourceBookings>,
}

impl BookingStore {
    pub fn new<'a>(resource_ids: impl IntoIterator<Item = &'a Ulid>) -> Self {
        Self {
            resources: resource_ids
                .into_iter()
                .map(|id| (*id, ResourceBookings::default()))
                .collect(),
        }
    }

    /// Build a store from a snapshot. Fails on the first booking that names an
    /// unregistered resource or carries an empty interval.
    pub fn from_snapshot<'a>(
        resource_ids: impl IntoIterator<Item = &'a Ulid>,
        bookings: Vec<Booking>,
    ) -> Result<Self, EngineError> {
        let mut store = Self::new(resource_ids);
        for booking in bookings {
            store.insert(booking)?;
        }
        Ok(store)
    }

    pub fn insert(&mut self, booking: Booking) -> Result<(), EngineError> {
        if booking.span.start >= booking.span.end {
            return Err(EngineError::InvalidRange(booking.span));
        }
        let entry = self
            .resources
            .get_mut(&booking.resource_id)
            .ok_or(EngineError::NotFound(booking.resource_id))?;
        entry.insert(booking);
        Ok(())
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn booking_count(&self) -> usize {
        self.resources.values().map(ResourceBookings::len).sum()
    }

    pub fn contains_resource(&self, id: &Ulid) -> bool {
        self.resources.contains_key(id)
    }

    /// Bookings of `resource_id` intersecting `window`, sorted by start then id.
    /// Rejected bookings are included; classification drops them.
    pub fn bookings_for_resource(
        &self,
        resource_id: Ulid,
        window: &Span,
    ) -> Result<Vec<Booking>, EngineError> {
        check_window(window)?;
        let entry = self
            .resources
            .get(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        Ok(entry.overlapping(window).cloned().collect())
    }

    /// Batched `bookings_for_resource`. Every requested resource gets an entry,
    /// empty when nothing intersects. `None` means every registered resource.
    pub fn all_bookings(
        &self,
        window: &Span,
        resource_ids: Option<&[Ulid]>,
    ) -> Result<BTreeMap<Ulid, Vec<Booking>>, EngineError> {
        check_window(window)?;
        let mut out = BTreeMap::new();
        match resource_ids {
            Some(ids) => {
                for &id in ids {
                    out.insert(id, self.bookings_for_resource(id, window)?);
                }
            }
            None => {
                for (id, entry) in &self.resources {
                    out.insert(*id, entry.overlapping(window).cloned().collect());
                }
            }
        }
        Ok(out)
    }
}

fn check_window(window: &Span) -> Result<(), EngineError> {
    if window.start >= window.end {
        return Err(EngineError::InvalidRange(*window));
    }
    Ok(())
}
