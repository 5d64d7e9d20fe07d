// Timestamp aliasing correction
//
// Chunks arriving slightly early can carry a first timestamp that is
// earlier than the last one already emitted. Such a chunk's timeline is
// replaced by an evenly spaced one starting at the last emitted timestamp,
// so the emitted series never goes backwards.

/// Tracks the last emitted timestamp of one timeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasingCorrector {
    last: Option<f64>,
}

impl AliasingCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last emitted timestamp, if any
    pub fn last(&self) -> Option<f64> {
        self.last
    }

    /// Forget the anchor; the next chunk is taken as-is
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Correct `timestamps` in place. Returns the detected backwards step
    /// (negative, seconds) when a correction was applied.
    pub fn correct(&mut self, timestamps: &mut [f64]) -> Option<f64> {
        let (&first, &chunk_last) = (timestamps.first()?, timestamps.last()?);

        let mut applied = None;
        if let Some(anchor) = self.last {
            if first < anchor {
                let end = chunk_last.max(anchor);
                linspace_into(timestamps, anchor, end);
                applied = Some(first - anchor);
            }
        }

        self.last = timestamps.last().copied();
        applied
    }
}

/// Fill `out` with evenly spaced values from `start` to `end` inclusive
fn linspace_into(out: &mut [f64], start: f64, end: f64) {
    let n = out.len();
    if n == 1 {
        out[0] = start;
        return;
    }
    let step = (end - start) / (n - 1) as f64;
    for (i, value) in out.iter_mut().enumerate() {
        *value = start + step * i as f64;
    }
    out[n - 1] = end;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_chunk_untouched() {
        let mut corrector = AliasingCorrector::new();
        let mut ts = vec![5.0, 4.0, 6.0];
        assert!(corrector.correct(&mut ts).is_none());
        assert_eq!(ts, vec![5.0, 4.0, 6.0]);
        assert_eq!(corrector.last(), Some(6.0));
    }

    #[test]
    fn test_backwards_chunk_is_respaced() {
        let mut corrector = AliasingCorrector::new();
        let mut first = vec![1.0, 2.0, 3.0];
        corrector.correct(&mut first);

        let mut second = vec![2.5, 3.5, 4.5, 5.5, 7.0];
        let step = corrector.correct(&mut second).unwrap();
        assert!((step + 0.5).abs() < 1e-12);
        assert_eq!(second[0], 3.0);
        assert_eq!(second[4], 7.0);
        assert!(second.windows(2).all(|w| w[1] >= w[0]));
        assert!((second[1] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_end_clamped_to_anchor() {
        let mut corrector = AliasingCorrector::new();
        corrector.correct(&mut [10.0]);

        let mut ts = vec![8.0, 8.5, 9.0];
        assert!(corrector.correct(&mut ts).is_some());
        assert_eq!(ts, vec![10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_single_sample_chunk() {
        let mut corrector = AliasingCorrector::new();
        corrector.correct(&mut [2.0]);
        let mut ts = [1.0];
        corrector.correct(&mut ts);
        assert_eq!(ts, [2.0]);
    }

    #[test]
    fn test_in_order_and_reset() {
        let mut corrector = AliasingCorrector::new();
        corrector.correct(&mut [1.0, 2.0]);
        let mut ts = vec![2.0, 3.0];
        assert!(corrector.correct(&mut ts).is_none());
        assert_eq!(ts, vec![2.0, 3.0]);

        corrector.reset();
        let mut ts = vec![0.5, 0.6];
        assert!(corrector.correct(&mut ts).is_none());
        assert_eq!(ts, vec![0.5, 0.6]);
    }

    #[test]
    fn test_empty_chunk_keeps_anchor() {
        let mut corrector = AliasingCorrector::new();
        corrector.correct(&mut [4.0]);
        assert!(corrector.correct(&mut []).is_none());
        assert_eq!(corrector.last(), Some(4.0));
    }
}
