use crate::model::*;

// ── Span algebra over classified rows and raw bookings ────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Runs of consecutive free slots as disjoint spans, dropping runs shorter
/// than `min_duration`.
pub fn free_spans(row: &[ClassifiedSlot], min_duration: Option<Ms>) -> Vec<Span> {
    let free: Vec<Span> = row
        .iter()
        .filter(|c| c.class == SlotClassification::Free)
        .map(|c| c.slot.span)
        .collect();
    let mut merged = merge_overlapping(&free);
    if let Some(min) = min_duration {
        merged.retain(|s| s.duration_ms() >= min);
    }
    merged
}

/// Sweep-line: exact time ranges where two or more non-rejected bookings
/// overlap, clamped to `window`. Independent of slot size.
pub fn contested_spans(bookings: &[Booking], window: &Span) -> Vec<Span> {
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(bookings.len() * 2);
    for b in bookings.iter().filter(|b| b.occupies()) {
        let start = b.span.start.max(window.start);
        let end = b.span.end.min(window.end);
        if start < end {
            events.push((start, 1));
            events.push((end, -1));
        }
    }
    // Ends sort before starts at the same instant: touching bookings don't overlap
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result = Vec::new();
    let mut count: i32 = 0;
    let mut contested_start: Option<Ms> = None;

    for (time, delta) in &events {
        count += delta;
        if count >= 2 && contested_start.is_none() {
            contested_start = Some(*time);
        } else if count < 2
            && let Some(start) = contested_start.take()
            && *time > start {
                result.push(Span::new(start, *time));
            }
    }

    merge_overlapping(&result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = HOUR_MS;

    fn booking(start: Ms, end: Ms, approval: ApprovalState) -> Booking {
        Booking {
            id: Ulid::new(),
            resource_id: Ulid::nil(),
            span: Span::new(start, end),
            kind: BookingKind::Internal,
            approval,
            responsible: "coach".into(),
            project_id: None,
            rejection_reason: None,
        }
    }

    fn cell(start: Ms, end: Ms, class: SlotClassification) -> ClassifiedSlot {
        ClassifiedSlot {
            slot: TimeSlot {
                resource_id: Ulid::nil(),
                span: Span::new(start, end),
            },
            class,
        }
    }

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![
            Span::new(100, 300),
            Span::new(200, 400),
            Span::new(500, 600),
        ];
        let merged = merge_overlapping(&spans);
        assert_eq!(merged, vec![Span::new(100, 400), Span::new(500, 600)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        let merged = merge_overlapping(&spans);
        assert_eq!(merged, vec![Span::new(100, 300)]);
    }

    #[test]
    fn free_spans_join_consecutive_slots() {
        let taken = SlotClassification::Occupied {
            booking: booking(H, 2 * H, ApprovalState::Confirmed),
        };
        let row = vec![
            cell(0, H, SlotClassification::Free),
            cell(H, 2 * H, taken),
            cell(2 * H, 3 * H, SlotClassification::Free),
            cell(3 * H, 4 * H, SlotClassification::Free),
        ];
        assert_eq!(
            free_spans(&row, None),
            vec![Span::new(0, H), Span::new(2 * H, 4 * H)]
        );
        assert_eq!(free_spans(&row, Some(2 * H)), vec![Span::new(2 * H, 4 * H)]);
    }

    #[test]
    fn contested_spans_exact_overlap() {
        let a = booking(9 * H, 10 * H, ApprovalState::Confirmed);
        let b = booking(9 * H + H / 2, 11 * H, ApprovalState::Pending);
        let spans = contested_spans(&[a, b], &Span::new(0, 24 * H));
        assert_eq!(spans, vec![Span::new(9 * H + H / 2, 10 * H)]);
    }

    #[test]
    fn contested_spans_ignore_touching_and_rejected() {
        let a = booking(0, H, ApprovalState::Confirmed);
        let b = booking(H, 2 * H, ApprovalState::Confirmed);
        let c = booking(0, 2 * H, ApprovalState::Rejected);
        assert!(contested_spans(&[a, b, c], &Span::new(0, 24 * H)).is_empty());
    }

    #[test]
    fn contested_spans_clamped_to_window() {
        let a = booking(0, 10 * H, ApprovalState::Confirmed);
        let b = booking(0, 10 * H, ApprovalState::Pending);
        let spans = contested_spans(&[a, b], &Span::new(2 * H, 4 * H));
        assert_eq!(spans, vec![Span::new(2 * H, 4 * H)]);
    }

    #[test]
    fn contested_spans_triple_overlap_is_one_run() {
        let a = booking(0, 100, ApprovalState::Confirmed);
        let b = booking(25, 75, ApprovalState::Pending);
        let c = booking(50, 150, ApprovalState::Pending);
        let spans = contested_spans(&[a, b, c], &Span::new(0, 1000));
        assert_eq!(spans, vec![Span::new(25, 100)]);
    }
}
