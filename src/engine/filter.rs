use std::collections::HashSet;

use ulid::Ulid;

use crate::model::*;

/// Which resources a query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceFilter {
    #[default]
    All,
    Id(Ulid),
    /// An id that could not be parsed. Matches nothing.
    Unknown,
}

impl ResourceFilter {
    /// `"all"` and the empty string are no-ops; anything that is not a ULID
    /// matches no resource instead of failing.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return ResourceFilter::All;
        }
        Ulid::from_string(s).map_or(ResourceFilter::Unknown, ResourceFilter::Id)
    }

    pub fn matches(&self, resource_id: &Ulid) -> bool {
        match self {
            ResourceFilter::All => true,
            ResourceFilter::Id(id) => id == resource_id,
            ResourceFilter::Unknown => false,
        }
    }
}

/// Conjunctive grid filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub resource: ResourceFilter,
    pub project_id: Option<Ulid>,
    pub kind: Option<BookingKind>,
}

impl Filters {
    pub fn matches_booking(&self, booking: &Booking) -> bool {
        self.resource.matches(&booking.resource_id)
            && self.project_id.is_none_or(|p| booking.project_id == Some(p))
            && self.kind.is_none_or(|k| booking.kind == k)
    }
}

/// Resources surviving the resource filter, in input order.
pub fn narrow_resources(resources: &[Resource], filters: &Filters) -> Vec<Resource> {
    resources
        .iter()
        .filter(|r| filters.resource.matches(&r.id))
        .cloned()
        .collect()
}

/// Apply `filters` to a resource set and a booking set. Bookings are kept only
/// when their resource survives and every booking-level filter matches.
pub fn apply(
    resources: Vec<Resource>,
    bookings: Vec<Booking>,
    filters: &Filters,
) -> (Vec<Resource>, Vec<Booking>) {
    let resources: Vec<Resource> = resources
        .into_iter()
        .filter(|r| filters.resource.matches(&r.id))
        .collect();
    let kept: HashSet<Ulid> = resources.iter().map(|r| r.id).collect();
    let bookings = bookings
        .into_iter()
        .filter(|b| kept.contains(&b.resource_id) && filters.matches_booking(b))
        .collect();
    (resources, bookings)
}
