use std::collections::BTreeMap;
use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::{contested_spans, free_spans};
use super::calendar::{window_for, CalendarWindow, Granularity, Locale};
use super::conflict::{classify_with, slot_count};
use super::filter::{self, Filters};
use super::store::BookingStore;
use super::{with_cancel, Engine, EngineError};

/// Everything the calendar view sends per navigation or filter change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridQuery {
    pub anchor_date: NaiveDate,
    pub granularity: Granularity,
    pub locale: Locale,
    pub filters: Filters,
    pub category: Option<ResourceCategory>,
    pub slot_duration: Ms,
}

impl GridQuery {
    /// Hour slots, pt-BR, no filters.
    pub fn new(anchor_date: NaiveDate, granularity: Granularity) -> Self {
        Self {
            anchor_date,
            granularity,
            locale: Locale::default(),
            filters: Filters::default(),
            category: None,
            slot_duration: HOUR_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grid {
    pub window: CalendarWindow,
    pub label: String,
    /// Filtered resources in catalog order.
    pub resources: Vec<Resource>,
    pub rows: BTreeMap<Ulid, Vec<ClassifiedSlot>>,
    /// Exact contested spans per resource; resources without any are absent.
    pub conflicts: BTreeMap<Ulid, Vec<Span>>,
}

impl Grid {
    pub fn row(&self, resource_id: &Ulid) -> Option<&[ClassifiedSlot]> {
        self.rows.get(resource_id).map(Vec::as_slice)
    }

    pub fn free_spans(&self, resource_id: &Ulid, min_duration: Option<Ms>) -> Vec<Span> {
        self.row(resource_id)
            .map(|row| free_spans(row, min_duration))
            .unwrap_or_default()
    }

    pub fn slot_count(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }
}

type Classified = (Ulid, Vec<ClassifiedSlot>, Vec<Span>);

impl Engine {
    /// Build the availability grid for one calendar view. Fails as a whole:
    /// no partial grid is ever returned.
    pub async fn build(
        &self,
        query: &GridQuery,
        cancel: &CancellationToken,
    ) -> Result<Grid, EngineError> {
        let started = Instant::now();
        let what = format!(
            "grid build ({} {})",
            query.granularity.as_str(),
            query.anchor_date
        );
        let result = self
            .within_timeout(&what, self.build_inner(query, cancel))
            .await;
        metrics::histogram!(observability::GRID_BUILD_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            metrics::counter!(
                observability::GRID_BUILD_FAILURES_TOTAL,
                "error" => observability::error_label(e)
            )
            .increment(1);
            if e.is_recoverable() {
                debug!("grid build rejected: {e}");
            } else {
                error!("grid build aborted: {e}");
            }
        }
        result
    }

    async fn build_inner(
        &self,
        query: &GridQuery,
        cancel: &CancellationToken,
    ) -> Result<Grid, EngineError> {
        let window = window_for(
            query.anchor_date,
            query.granularity,
            query.locale.first_weekday(),
        )?;
        let span = window.span();
        slot_count(&span, query.slot_duration)?;
        debug!(
            "grid window [{}, {}) {} slots of {}ms",
            window.start,
            window.end,
            span.duration_ms() / query.slot_duration,
            query.slot_duration
        );

        let view = self.view(cancel).await?;
        let listed = with_cancel(cancel, view.catalog.list(query.category)).await?;
        let resources = filter::narrow_resources(&listed, &query.filters);
        if resources.len() > MAX_RESOURCES_PER_GRID {
            return Err(EngineError::LimitExceeded("too many resources in grid"));
        }
        let ids: Vec<Ulid> = resources.iter().map(|r| r.id).collect();

        let snapshot = if ids.is_empty() {
            Vec::new()
        } else {
            with_cancel(cancel, view.source.snapshot(span, &ids)).await?
        };
        if snapshot.len() > MAX_BOOKINGS_PER_SNAPSHOT {
            return Err(EngineError::LimitExceeded("too many bookings in snapshot"));
        }
        let store = BookingStore::from_snapshot(&ids, snapshot)?;
        let fetched: Vec<Booking> = store
            .all_bookings(&span, Some(ids.as_slice()))?
            .into_values()
            .flatten()
            .collect();
        debug!(
            "grid fetched {} bookings for {} resources",
            fetched.len(),
            ids.len()
        );

        let (resources, bookings) = filter::apply(resources, fetched, &query.filters);
        // Projects have no catalog here, so an id nobody carries just matches nothing
        if let Some(project) = query.filters.project_id
            && bookings.is_empty()
        {
            debug!("project {project} matches no booking in this window");
        }
        let mut groups: BTreeMap<Ulid, Vec<Booking>> =
            resources.iter().map(|r| (r.id, Vec::new())).collect();
        for booking in bookings {
            if let Some(group) = groups.get_mut(&booking.resource_id) {
                group.push(booking);
            }
        }

        let (rows, conflicts) = self
            .classify_all(groups, span, query.slot_duration, cancel)
            .await?;

        Ok(Grid {
            label: window.label(query.locale),
            window,
            resources,
            rows,
            conflicts,
        })
    }

    /// One blocking task per resource, bounded by the worker semaphore.
    /// The first failure or a cancellation aborts every task still running.
    async fn classify_all(
        &self,
        groups: BTreeMap<Ulid, Vec<Booking>>,
        span: Span,
        slot_duration: Ms,
        cancel: &CancellationToken,
    ) -> Result<(BTreeMap<Ulid, Vec<ClassifiedSlot>>, BTreeMap<Ulid, Vec<Span>>), EngineError> {
        let strategy = self.settings.strategy;
        let mut tasks: JoinSet<Result<Classified, EngineError>> = JoinSet::new();

        for (resource_id, bookings) in groups {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                permit = self.workers.clone().acquire_owned() => permit
                    .map_err(|_| EngineError::Internal("worker pool closed".into()))?,
            };
            tasks.spawn_blocking(move || {
                let _permit = permit; // held until classification finishes
                let row = classify_with(strategy, resource_id, slot_duration, &span, &bookings)?;
                let contested = contested_spans(&bookings, &span);
                Ok((resource_id, row, contested))
            });
        }

        let mut rows = BTreeMap::new();
        let mut conflicts = BTreeMap::new();
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(EngineError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else { break };
            match joined {
                Ok(Ok((resource_id, row, contested))) => {
                    record_slot_metrics(&row);
                    rows.insert(resource_id, row);
                    if !contested.is_empty() {
                        conflicts.insert(resource_id, contested);
                    }
                }
                Ok(Err(e)) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(EngineError::Internal(format!(
                        "classification task failed: {e}"
                    )));
                }
            }
        }
        Ok((rows, conflicts))
    }
}

fn record_slot_metrics(row: &[ClassifiedSlot]) {
    let (mut free, mut occupied, mut conflicted) = (0u64, 0u64, 0u64);
    for cell in row {
        match cell.class {
            SlotClassification::Free => free += 1,
            SlotClassification::Occupied { .. } => occupied += 1,
            SlotClassification::Conflicted { .. } => conflicted += 1,
        }
    }
    metrics::counter!(observability::SLOTS_CLASSIFIED_TOTAL, "status" => "free").increment(free);
    metrics::counter!(observability::SLOTS_CLASSIFIED_TOTAL, "status" => "occupied")
        .increment(occupied);
    metrics::counter!(observability::SLOTS_CLASSIFIED_TOTAL, "status" => "conflicted")
        .increment(conflicted);
}
