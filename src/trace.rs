//! Per-epoch error history.

/// Marker for epochs that have not been evaluated yet.
pub const UNEVALUATED: f64 = f64::MAX;

/// In-sample and out-of-sample mean squared error, one entry per epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorTrace {
    in_sample: Vec<f64>,
    out_sample: Vec<f64>,
}

impl ErrorTrace {
    pub fn new(epochs: usize) -> Self {
        Self {
            in_sample: vec![UNEVALUATED; epochs],
            out_sample: vec![UNEVALUATED; epochs],
        }
    }

    /// Build from recorded histories of equal length.
    pub fn from_parts(in_sample: Vec<f64>, out_sample: Vec<f64>) -> Self {
        assert_eq!(
            in_sample.len(),
            out_sample.len(),
            "in-sample len {} does not match out-of-sample len {}",
            in_sample.len(),
            out_sample.len()
        );
        Self {
            in_sample,
            out_sample,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.in_sample.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.in_sample.is_empty()
    }

    /// Reset to `epochs` unevaluated entries.
    pub fn resize(&mut self, epochs: usize) {
        self.in_sample.clear();
        self.in_sample.resize(epochs, UNEVALUATED);
        self.out_sample.clear();
        self.out_sample.resize(epochs, UNEVALUATED);
    }

    /// Panics if `epoch >= len`.
    pub fn record(&mut self, epoch: usize, in_sample: f64, out_sample: f64) {
        self.in_sample[epoch] = in_sample;
        self.out_sample[epoch] = out_sample;
    }

    #[inline]
    pub fn in_sample(&self) -> &[f64] {
        &self.in_sample
    }

    #[inline]
    pub fn out_sample(&self) -> &[f64] {
        &self.out_sample
    }

    /// Checkpoint policy for `epoch`.
    ///
    /// True iff `epoch > 0`, its out-of-sample error is below `threshold`, and
    /// it strictly improves on the previous epoch. NaN never qualifies.
    pub fn should_checkpoint(&self, epoch: usize, threshold: f64) -> bool {
        if epoch == 0 || epoch >= self.len() {
            return false;
        }
        let e = self.out_sample[epoch];
        e < threshold && e < self.out_sample[epoch - 1]
    }

    /// First epoch whose in- or out-of-sample error is non-finite.
    ///
    /// Unevaluated entries are finite and never reported.
    pub fn first_non_finite(&self) -> Option<usize> {
        self.in_sample
            .iter()
            .zip(&self.out_sample)
            .position(|(i, o)| !i.is_finite() || !o.is_finite())
    }

    /// Epoch and value of the lowest finite out-of-sample error.
    pub fn best_out_sample(&self) -> Option<(usize, f64)> {
        self.out_sample
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.is_finite() && *e != UNEVALUATED)
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace_with_out(out: &[f64]) -> ErrorTrace {
        ErrorTrace::from_parts(vec![0.0; out.len()], out.to_vec())
    }

    #[test]
    fn checkpoints_fire_only_on_improvement_below_threshold() {
        let t = trace_with_out(&[1.0, 0.5, 0.05, 0.2, 0.01]);
        let fired: Vec<usize> = (0..t.len())
            .filter(|&e| t.should_checkpoint(e, 0.1))
            .collect();
        assert_eq!(fired, vec![2, 4]);
    }

    #[test]
    fn first_epoch_never_checkpoints() {
        let t = trace_with_out(&[0.0]);
        assert!(!t.should_checkpoint(0, 1.0));
        assert!(!t.should_checkpoint(5, 1.0));
    }

    #[test]
    fn non_finite_errors_never_checkpoint_and_are_detected() {
        let t = trace_with_out(&[1.0, f64::NAN, 0.01, f64::INFINITY]);
        assert!(!t.should_checkpoint(1, 0.1));
        // Improvement over NaN is not an improvement.
        assert!(!t.should_checkpoint(2, 0.1));
        assert!(!t.should_checkpoint(3, f64::INFINITY));
        assert_eq!(t.first_non_finite(), Some(1));
        assert_eq!(t.best_out_sample(), Some((2, 0.01)));
    }

    #[test]
    fn resize_always_yields_exact_length() {
        let mut t = ErrorTrace::new(3);
        t.record(1, 0.5, 0.25);
        t.resize(7);
        assert_eq!(t.len(), 7);
        assert!(t.out_sample().iter().all(|e| *e == UNEVALUATED));
        t.resize(2);
        assert_eq!(t.in_sample().len(), 2);
        assert_eq!(t.out_sample().len(), 2);
        assert_eq!(t.first_non_finite(), None);
        assert_eq!(t.best_out_sample(), None);
    }
}
