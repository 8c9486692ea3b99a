use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Externally settable cancellation flag
///
/// Long scans (capture reading, reassembly sweeps, sequence analysis) poll the flag at each
/// record or iteration boundary and stop with a partial result. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> AbortFlag {
        AbortFlag::default()
    }

    /// Request cancellation
    #[inline]
    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Re-arm the flag before a new scan
    #[inline]
    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::AbortFlag;

    #[test]
    fn test_abort_flag_shared() {
        let flag = AbortFlag::new();
        let other = flag.clone();
        assert!(!other.is_set());
        flag.set();
        assert!(other.is_set());
        other.clear();
        assert!(!flag.is_set());
    }
}
