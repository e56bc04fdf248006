use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds on a fixed-offset calendar. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for spans coming from outside the engine.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// `other` lies entirely within `self`.
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
    Pool,
    Court,
    Track,
    Gym,
    Hall,
    Field,
    Other,
}

impl ResourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCategory::Pool => "pool",
            ResourceCategory::Court => "court",
            ResourceCategory::Track => "track",
            ResourceCategory::Gym => "gym",
            ResourceCategory::Hall => "hall",
            ResourceCategory::Field => "field",
            ResourceCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pool" => Some(ResourceCategory::Pool),
            "court" => Some(ResourceCategory::Court),
            "track" => Some(ResourceCategory::Track),
            "gym" => Some(ResourceCategory::Gym),
            "hall" => Some(ResourceCategory::Hall),
            "field" => Some(ResourceCategory::Field),
            "other" => Some(ResourceCategory::Other),
            _ => None,
        }
    }
}

/// A bookable physical space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    pub category: ResourceCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    Internal,
    External,
}

impl BookingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::Internal => "internal",
            BookingKind::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "internal" | "interno" => Some(BookingKind::Internal),
            "external" | "externo" => Some(BookingKind::External),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Confirmed,
    Rejected,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Confirmed => "confirmed",
            ApprovalState::Rejected => "rejected",
        }
    }

    /// Display rank: lower wins when picking a representative booking.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            ApprovalState::Confirmed => 0,
            ApprovalState::Pending => 1,
            ApprovalState::Rejected => 2,
        }
    }
}

/// A reservation of a resource for `span`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    pub kind: BookingKind,
    pub approval: ApprovalState,
    pub responsible: String,
    #[serde(default)]
    pub project_id: Option<Ulid>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

impl Booking {
    pub fn occupies(&self) -> bool {
        self.approval != ApprovalState::Rejected
    }

    /// Ordering used everywhere bookings are listed: start, then id.
    pub fn sort_key(&self) -> (Ms, Ulid) {
        (self.span.start, self.id)
    }
}

/// The atomic unit of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub resource_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotClassification {
    Free,
    Occupied { booking: Booking },
    /// Non-empty, ordered by `(start, id)`.
    Conflicted { bookings: Vec<Booking> },
}

impl SlotClassification {
    pub fn status(&self) -> &'static str {
        match self {
            SlotClassification::Free => "free",
            SlotClassification::Occupied { .. } => "occupied",
            SlotClassification::Conflicted { .. } => "conflicted",
        }
    }

    pub fn bookings(&self) -> &[Booking] {
        match self {
            SlotClassification::Free => &[],
            SlotClassification::Occupied { booking } => std::slice::from_ref(booking),
            SlotClassification::Conflicted { bookings } => bookings,
        }
    }

    /// Single booking for compact display. Confirmed outranks pending, then
    /// earliest start, then id.
    pub fn representative(&self) -> Option<&Booking> {
        self.bookings()
            .iter()
            .min_by_key(|b| (b.approval.rank(), b.span.start, b.id))
    }

    pub fn legend(&self) -> Legend {
        match self {
            SlotClassification::Free => Legend::Free,
            SlotClassification::Occupied { booking } => Legend::for_booking(booking),
            SlotClassification::Conflicted { .. } => Legend::Conflict,
        }
    }
}

/// Calendar colour legend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Legend {
    Free,
    Confirmed,
    Pending,
    Rejected,
    Conflict,
}

impl Legend {
    pub fn for_booking(booking: &Booking) -> Self {
        match booking.approval {
            ApprovalState::Confirmed => Legend::Confirmed,
            ApprovalState::Pending => Legend::Pending,
            ApprovalState::Rejected => Legend::Rejected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Legend::Free => "free",
            Legend::Confirmed => "confirmed",
            Legend::Pending => "pending",
            Legend::Rejected => "rejected",
            Legend::Conflict => "conflict",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedSlot {
    pub slot: TimeSlot,
    pub class: SlotClassification,
}
