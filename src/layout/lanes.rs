use serde::{Deserialize, Serialize};

/// Anything occupying a half-open-or-closed coordinate range.
///
/// The layout compares `end <= start` to decide whether two spans may share a
/// lane, so callers pick the endpoint convention.
pub trait Span {
    /// First coordinate.
    fn start(&self) -> u64;
    /// Last coordinate (or one past it).
    fn end(&self) -> u64;
}

/// Plain coordinate interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    /// First coordinate.
    pub start: u64,
    /// Last coordinate.
    pub end: u64,
}

impl Interval {
    /// Create an interval.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}

impl Span for Interval {
    fn start(&self) -> u64 {
        self.start
    }

    fn end(&self) -> u64 {
        self.end
    }
}

impl From<(u64, u64)> for Interval {
    fn from((start, end): (u64, u64)) -> Self {
        Self::new(start, end)
    }
}

/// Display row of non-overlapping spans in increasing start order.
pub type Lane<T> = Vec<T>;

/// Exclusive end used for placement. Empty and reversed spans still occupy
/// their start coordinate.
fn occupied_end<T: Span>(span: &T) -> u64 {
    span.end().max(span.start().saturating_add(1))
}

/// Greedy first-fit lane assignment.
///
/// Spans are visited by start (ties keep input order) and placed into the
/// first lane whose last span ends at or before the new start. The lane count
/// equals [`max_depth`].
pub fn layout<T: Span + Clone>(spans: &[T]) -> Vec<Lane<T>> {
    let mut order: Vec<&T> = spans.iter().collect();
    order.sort_by_key(|span| span.start());

    let mut lanes: Vec<Lane<T>> = Vec::new();
    for span in order {
        let slot = lanes.iter_mut().find(|lane| {
            lane.last()
                .is_some_and(|last| occupied_end(last) <= span.start())
        });
        match slot {
            Some(lane) => lane.push(span.clone()),
            None => lanes.push(vec![span.clone()]),
        }
    }
    lanes
}

/// Maximum number of spans overlapping at a single coordinate, under the same
/// touching-endpoints-share convention as [`layout`].
pub fn max_depth<T: Span>(spans: &[T]) -> usize {
    // (coordinate, delta); ends sort before starts at the same coordinate.
    let mut events: Vec<(u64, i64)> = Vec::with_capacity(spans.len() * 2);
    for span in spans {
        events.push((span.start(), 1));
        events.push((occupied_end(span), -1));
    }
    events.sort_unstable();

    let mut depth = 0i64;
    let mut best = 0i64;
    for (_, delta) in events {
        depth += delta;
        best = best.max(depth);
    }
    best as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_spans_share_a_lane() {
        let lanes = layout(&[Interval::new(1, 5), Interval::new(5, 9)]);
        assert_eq!(lanes.len(), 1);
    }

    #[test]
    fn ties_keep_input_order() {
        let spans = [Interval::new(3, 4), Interval::new(3, 8), Interval::new(3, 6)];
        let lanes = layout(&spans);
        assert_eq!(lanes.len(), 3);
        assert_eq!(lanes[0][0], spans[0]);
        assert_eq!(lanes[1][0], spans[1]);
        assert_eq!(lanes[2][0], spans[2]);
    }

    #[test]
    fn empty_input_has_no_lanes() {
        assert!(layout::<Interval>(&[]).is_empty());
        assert_eq!(max_depth::<Interval>(&[]), 0);
    }

    #[test]
    fn point_spans_take_room() {
        let spans = [Interval::new(0, 10), Interval::new(5, 5), Interval::new(10, 10)];
        assert_eq!(max_depth(&spans), 2);
        let lanes = layout(&spans);
        assert_eq!(lanes.len(), 2);
        assert_eq!(lanes[0], vec![spans[0], spans[2]]);
    }

    #[test]
    fn depth_counts_nested_spans() {
        let spans = [Interval::new(0, 100), Interval::new(10, 20), Interval::new(15, 30)];
        assert_eq!(max_depth(&spans), 3);
        assert_eq!(layout(&spans).len(), 3);
    }
}
