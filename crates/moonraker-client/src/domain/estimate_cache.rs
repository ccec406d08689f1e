//! Single-entry cache of the slicer's estimated print time.
//!
//! The metadata lookup only needs to happen once per file. A cached
//! `None` means "looked it up, the slicer gave no usable estimate".
//!
//! Every invalidation starts a new epoch. A lookup started in an older
//! epoch cannot store its result, so a new print never inherits an
//! estimate fetched for the previous one.

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PrintJobEstimateCache {
    entry: Option<(String, Option<f64>)>,
    epoch: u64,
}

impl PrintJobEstimateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached estimate for `file_name`.
    ///
    /// The outer `None` is a miss; `Some(None)` is a cached unknown.
    pub fn lookup(&self, file_name: &str) -> Option<Option<f64>> {
        match &self.entry {
            Some((cached, estimate)) if cached == file_name => Some(*estimate),
            _ => None,
        }
    }

    /// Read before starting a lookup and hand back to [`store`](Self::store).
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Store a lookup result. Returns false, storing nothing, if the cache
    /// was invalidated since `epoch` was read.
    pub fn store(&mut self, file_name: &str, estimate: Option<f64>, epoch: u64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.entry = Some((file_name.to_string(), estimate));
        true
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
        self.epoch = self.epoch.wrapping_add(1);
    }
}
