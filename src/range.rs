use std::ops::Range;

/// Clamps a requested `[start, end)` into `[0, size]`.
///
/// A start at or past `size`, or an end before start, yields an empty range
/// positioned at the clamped start.
pub fn clamp(
    start: u64,
    end: u64,
    size: u64,
) -> Range<u64> {
    let start = start.min(size);
    let end = end.clamp(start, size);
    start..end
}

/// Length of a range as a buffer length.
pub fn len(range: &Range<u64>) -> usize {
    (range.end - range.start) as usize
}
