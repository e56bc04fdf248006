/// Slots in a single resource row (a 31-day month at one-minute slots fits).
pub const MAX_SLOTS_PER_ROW: usize = 44_640;

/// Resources classified in a single grid build.
pub const MAX_RESOURCES_PER_GRID: usize = 512;

/// Bookings a snapshot may return for one build.
pub const MAX_BOOKINGS_PER_SNAPSHOT: usize = 200_000;

/// Booking counts at or below this are classified with the linear scan.
pub const SCAN_THRESHOLD_BOOKINGS: usize = 32;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;

/// Snapshot files above this size are refused.
pub const MAX_SNAPSHOT_FILE_BYTES: u64 = 64 * 1024 * 1024;
