use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// How slots are stabbed against bookings. Both produce identical output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// O(B·S) scan, every slot against every booking.
    Scan,
    /// O((B+S)·log B): start-sorted cursor plus a min-heap of active bookings
    /// keyed by end time.
    SweepLine,
    /// `Scan` for small booking sets, `SweepLine` otherwise.
    #[default]
    Auto,
}

impl Strategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "scan" => Some(Strategy::Scan),
            "sweep" | "sweepline" | "sweep_line" => Some(Strategy::SweepLine),
            "auto" => Some(Strategy::Auto),
            _ => None,
        }
    }

    fn resolve(self, bookings: usize) -> Strategy {
        match self {
            Strategy::Auto if bookings <= SCAN_THRESHOLD_BOOKINGS => Strategy::Scan,
            Strategy::Auto => Strategy::SweepLine,
            other => other,
        }
    }
}

/// Number of slots of `slot_duration` in `window`, validating both.
pub(crate) fn slot_count(window: &Span, slot_duration: Ms) -> Result<usize, EngineError> {
    if window.start >= window.end {
        return Err(EngineError::InvalidRange(*window));
    }
    if slot_duration <= 0 || window.duration_ms() % slot_duration != 0 {
        return Err(EngineError::InvalidDuration(slot_duration));
    }
    let count = usize::try_from(window.duration_ms() / slot_duration)
        .map_err(|_| EngineError::LimitExceeded("too many slots"))?;
    if count > MAX_SLOTS_PER_ROW {
        return Err(EngineError::LimitExceeded("too many slots per resource"));
    }
    Ok(count)
}

/// Classify every slot of `window` for one resource.
pub fn classify(
    resource_id: Ulid,
    slot_duration: Ms,
    window: &Span,
    bookings: &[Booking],
) -> Result<Vec<ClassifiedSlot>, EngineError> {
    classify_with(Strategy::Auto, resource_id, slot_duration, window, bookings)
}

pub fn classify_with(
    strategy: Strategy,
    resource_id: Ulid,
    slot_duration: Ms,
    window: &Span,
    bookings: &[Booking],
) -> Result<Vec<ClassifiedSlot>, EngineError> {
    let count = slot_count(window, slot_duration)?;
    if let Some(stray) = bookings.iter().find(|b| b.resource_id != resource_id) {
        return Err(EngineError::ResourceMismatch {
            expected: resource_id,
            found: stray.resource_id,
            booking: stray.id,
        });
    }

    let mut active: Vec<&Booking> = bookings.iter().filter(|b| b.occupies()).collect();
    active.sort_by_key(|b| b.sort_key());

    let slots = (0..count).map(|i| {
        let start = window.start + slot_duration * i as Ms;
        Span::new(start, start + slot_duration)
    });

    let hits = match strategy.resolve(active.len()) {
        Strategy::Scan => scan(&active, slots),
        _ => sweep_line(&active, slots),
    };

    Ok(hits
        .into_iter()
        .map(|(span, matched)| ClassifiedSlot {
            slot: TimeSlot { resource_id, span },
            class: into_classification(matched),
        })
        .collect())
}

fn into_classification(mut matched: Vec<&Booking>) -> SlotClassification {
    match matched.len() {
        0 => SlotClassification::Free,
        1 => SlotClassification::Occupied {
            booking: matched[0].clone(),
        },
        _ => {
            matched.sort_by_key(|b| b.sort_key());
            SlotClassification::Conflicted {
                bookings: matched.into_iter().cloned().collect(),
            }
        }
    }
}

/// `sorted` must be ordered by `(start, id)`; matches come out in that order.
fn scan<'a>(
    sorted: &[&'a Booking],
    slots: impl Iterator<Item = Span>,
) -> Vec<(Span, Vec<&'a Booking>)> {
    slots
        .map(|slot| {
            let matched = sorted
                .iter()
                .copied()
                .take_while(|b| b.span.start < slot.end)
                .filter(|b| b.span.overlaps(&slot))
                .collect();
            (slot, matched)
        })
        .collect()
}

/// Slots arrive in increasing order. A booking enters the heap once its start
/// falls before the slot end and leaves once its end is at or before the slot
/// start; whatever remains overlaps the slot.
fn sweep_line<'a>(
    sorted: &[&'a Booking],
    slots: impl Iterator<Item = Span>,
) -> Vec<(Span, Vec<&'a Booking>)> {
    let mut heap: BinaryHeap<Reverse<(Ms, usize)>> = BinaryHeap::new();
    let mut next = 0usize;
    let mut out = Vec::new();

    for slot in slots {
        while next < sorted.len() && sorted[next].span.start < slot.end {
            heap.push(Reverse((sorted[next].span.end, next)));
            next += 1;
        }
        while let Some(Reverse((end, _))) = heap.peek() {
            if *end > slot.start {
                break;
            }
            heap.pop();
        }
        let mut idx: Vec<usize> = heap.iter().map(|Reverse((_, i))| *i).collect();
        idx.sort_unstable();
        out.push((slot, idx.into_iter().map(|i| sorted[i]).collect()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;

    fn booking(resource_id: Ulid, start: Ms, end: Ms, approval: ApprovalState) -> Booking {
        Booking {
            id: Ulid::new(),
            resource_id,
            span: Span::new(start, end),
            kind: BookingKind::Internal,
            approval,
            responsible: "coach".into(),
            project_id: None,
            rejection_reason: None,
        }
    }

    fn ids(class: &SlotClassification) -> Vec<Ulid> {
        class.bookings().iter().map(|b| b.id).collect()
    }

    #[test]
    fn coverage_is_complete_and_ordered() {
        let rid = Ulid::new();
        let window = Span::new(0, 24 * H);
        for duration in [15 * M, 30 * M, H, 2 * H, 24 * H] {
            let row = classify(rid, duration, &window, &[]).unwrap();
            assert_eq!(row.len() as Ms, window.duration_ms() / duration);
            assert_eq!(row[0].slot.span.start, window.start);
            assert_eq!(row.last().unwrap().slot.span.end, window.end);
            for pair in row.windows(2) {
                assert_eq!(pair[0].slot.span.end, pair[1].slot.span.start);
            }
            assert!(row.iter().all(|c| c.class == SlotClassification::Free));
        }
    }

    #[test]
    fn invalid_durations() {
        let rid = Ulid::new();
        let window = Span::new(0, 24 * H);
        assert_eq!(
            classify(rid, 0, &window, &[]),
            Err(EngineError::InvalidDuration(0))
        );
        assert_eq!(
            classify(rid, -H, &window, &[]),
            Err(EngineError::InvalidDuration(-H))
        );
        assert_eq!(
            classify(rid, 7 * M, &window, &[]),
            Err(EngineError::InvalidDuration(7 * M))
        );
    }

    #[test]
    fn empty_window_is_invalid_range() {
        let rid = Ulid::new();
        let empty = Span { start: H, end: H };
        assert_eq!(
            classify(rid, H, &empty, &[]),
            Err(EngineError::InvalidRange(empty))
        );
    }

    #[test]
    fn too_many_slots_is_limited() {
        let rid = Ulid::new();
        let window = Span::new(0, 31 * DAY_MS);
        assert!(classify(rid, M, &window, &[]).is_ok());
        assert!(matches!(
            classify(rid, 1_000, &window, &[]),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn mismatched_resource_is_rejected() {
        let rid = Ulid::new();
        let other = Ulid::new();
        let stray = booking(other, 0, H, ApprovalState::Confirmed);
        let result = classify(rid, H, &Span::new(0, 2 * H), &[stray.clone()]);
        assert_eq!(
            result,
            Err(EngineError::ResourceMismatch {
                expected: rid,
                found: other,
                booking: stray.id,
            })
        );
    }

    #[test]
    fn rejected_bookings_never_occupy() {
        let rid = Ulid::new();
        let rejected = booking(rid, 0, H, ApprovalState::Rejected);
        let row = classify(rid, H, &Span::new(0, H), &[rejected]).unwrap();
        assert_eq!(row[0].class, SlotClassification::Free);
    }

    #[test]
    fn single_booking_occupies() {
        let rid = Ulid::new();
        let b = booking(rid, H, 2 * H, ApprovalState::Pending);
        let row = classify(rid, H, &Span::new(0, 3 * H), &[b.clone()]).unwrap();
        assert_eq!(row[0].class, SlotClassification::Free);
        assert_eq!(row[1].class, SlotClassification::Occupied { booking: b });
        assert_eq!(row[2].class, SlotClassification::Free);
    }

    #[test]
    fn rejected_does_not_turn_occupied_into_conflict() {
        let rid = Ulid::new();
        let ok = booking(rid, 0, H, ApprovalState::Confirmed);
        let no = booking(rid, 0, H, ApprovalState::Rejected);
        let row = classify(rid, H, &Span::new(0, H), &[ok.clone(), no]).unwrap();
        assert_eq!(row[0].class, SlotClassification::Occupied { booking: ok });
    }

    #[test]
    fn conflict_contains_all_overlapping_in_order() {
        let rid = Ulid::new();
        let c = booking(rid, 30 * M, 90 * M, ApprovalState::Pending);
        let a = booking(rid, 0, H, ApprovalState::Confirmed);
        let b = booking(rid, 10 * M, 20 * M, ApprovalState::Pending);
        let row = classify(rid, H, &Span::new(0, H), &[c.clone(), a.clone(), b.clone()]).unwrap();
        match &row[0].class {
            SlotClassification::Conflicted { bookings } => {
                let got: Vec<Ulid> = bookings.iter().map(|x| x.id).collect();
                assert_eq!(got, vec![a.id, b.id, c.id]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn overlap_is_symmetric() {
        let rid = Ulid::new();
        let a = booking(rid, 0, 90 * M, ApprovalState::Confirmed);
        let b = booking(rid, 60 * M, 2 * H, ApprovalState::Pending);
        let ab = classify(rid, H, &Span::new(0, 3 * H), &[a.clone(), b.clone()]).unwrap();
        let ba = classify(rid, H, &Span::new(0, 3 * H), &[b.clone(), a.clone()]).unwrap();
        assert_eq!(ab, ba);
        for cell in &ab {
            let listed = ids(&cell.class);
            assert_eq!(listed.contains(&a.id) && listed.len() > 1, listed.contains(&b.id) && listed.len() > 1);
        }
        assert_eq!(ids(&ab[1].class), vec![a.id, b.id]);
    }

    #[test]
    fn pool_a_scenario() {
        let rid = Ulid::new();
        let b1 = booking(rid, 9 * H, 10 * H, ApprovalState::Confirmed);
        let mut b2 = booking(rid, 9 * H + 30 * M, 11 * H, ApprovalState::Pending);
        b2.kind = BookingKind::External;
        let window = Span::new(0, 24 * H);
        let row = classify(rid, H, &window, &[b1.clone(), b2.clone()]).unwrap();
        assert_eq!(row[8].class, SlotClassification::Free);
        assert_eq!(
            row[9].class,
            SlotClassification::Conflicted {
                bookings: vec![b1.clone(), b2.clone()]
            }
        );
        assert_eq!(row[10].class, SlotClassification::Occupied { booking: b2 });
        assert_eq!(row[9].class.representative(), Some(&b1));
    }

    #[test]
    fn sub_hour_slots() {
        let rid = Ulid::new();
        let b = booking(rid, 10 * M, 20 * M, ApprovalState::Confirmed);
        let row = classify(rid, 5 * M, &Span::new(0, 30 * M), &[b]).unwrap();
        let statuses: Vec<&str> = row.iter().map(|c| c.class.status()).collect();
        assert_eq!(
            statuses,
            vec!["free", "free", "occupied", "occupied", "free", "free"]
        );
    }

    #[test]
    fn bookings_outside_window_are_ignored() {
        let rid = Ulid::new();
        let before = booking(rid, 0, H, ApprovalState::Confirmed);
        let after = booking(rid, 5 * H, 6 * H, ApprovalState::Confirmed);
        let row = classify(rid, H, &Span::new(H, 5 * H), &[before, after]).unwrap();
        assert!(row.iter().all(|c| c.class == SlotClassification::Free));
    }

    #[test]
    fn scan_and_sweep_agree() {
        let rid = Ulid::new();
        // Deterministic pseudo-random bookings
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };
        let mut bookings = Vec::new();
        for _ in 0..200 {
            let start = (next() % (7 * 24 * 4)) as Ms * 15 * M;
            let len = (1 + next() % 12) as Ms * 15 * M;
            let approval = match next() % 3 {
                0 => ApprovalState::Confirmed,
                1 => ApprovalState::Pending,
                _ => ApprovalState::Rejected,
            };
            bookings.push(booking(rid, start, start + len, approval));
        }
        let window = Span::new(0, 7 * DAY_MS);
        for duration in [15 * M, H, DAY_MS] {
            let a = classify_with(Strategy::Scan, rid, duration, &window, &bookings).unwrap();
            let b = classify_with(Strategy::SweepLine, rid, duration, &window, &bookings).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn strategy_parse_and_auto_threshold() {
        assert_eq!(Strategy::parse("sweep"), Some(Strategy::SweepLine));
        assert_eq!(Strategy::parse("SCAN"), Some(Strategy::Scan));
        assert_eq!(Strategy::parse("x"), None);
        assert_eq!(Strategy::Auto.resolve(0), Strategy::Scan);
        assert_eq!(
            Strategy::Auto.resolve(SCAN_THRESHOLD_BOOKINGS + 1),
            Strategy::SweepLine
        );
        assert_eq!(Strategy::Scan.resolve(10_000), Strategy::Scan);
    }
}
