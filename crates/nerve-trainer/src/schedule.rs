//! Learning-rate schedule.

/// Inverse-time decay recomputed from the base rate every epoch:
/// `lr(e) = base_lr / (1 + (e + 1) * decay)` after epoch `e` completes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseTimeDecay {
    base_lr: f64,
    decay: f64,
}

impl InverseTimeDecay {
    pub fn new(base_lr: f64, decay: f64) -> Self {
        Self { base_lr, decay }
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }

    /// Rate to use once epoch `epoch` (0-indexed) has finished.
    pub fn rate_after_epoch(&self, epoch: usize) -> f64 {
        self.base_lr / (1.0 + (epoch + 1) as f64 * self.decay)
    }
}
