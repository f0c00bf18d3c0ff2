/// Where a cached entity is in its fetch / optimistic-write lifecycle.
///
/// ```text
/// Idle -> Fetching -> Fresh
/// Fresh -> OptimisticallyUpdated -> Confirmed | RolledBack
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Fetching,
    Fresh,
    OptimisticallyUpdated,
    Confirmed,
    RolledBack,
}

/// One cached value plus the optimistic layer on top of it.
///
/// `confirmed` only ever holds values the server returned, so a rollback
/// always lands on server state.
#[derive(Clone, Debug)]
pub struct CachedEntity<T> {
    phase: SyncPhase,
    confirmed: Option<T>,
    optimistic: Option<T>,
    last_error: Option<String>,
}

impl<T> Default for CachedEntity<T> {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            confirmed: None,
            optimistic: None,
            last_error: None,
        }
    }
}

impl<T: Clone> CachedEntity<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// What a UI should render: the optimistic value while a write is pending.
    pub fn current(&self) -> Option<&T> {
        self.optimistic.as_ref().or(self.confirmed.as_ref())
    }

    pub fn confirmed(&self) -> Option<&T> {
        self.confirmed.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn has_pending_write(&self) -> bool {
        self.optimistic.is_some()
    }

    pub fn begin_fetch(&mut self) {
        // A revalidation must not hide a write in flight.
        if self.optimistic.is_none() {
            self.phase = SyncPhase::Fetching;
        }
    }

    pub fn finish_fetch(&mut self, value: T) {
        self.confirmed = Some(value);
        self.last_error = None;
        if self.optimistic.is_none() {
            self.phase = SyncPhase::Fresh;
        }
    }

    pub fn fail_fetch(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        if self.optimistic.is_none() {
            self.phase = if self.confirmed.is_some() {
                SyncPhase::Fresh
            } else {
                SyncPhase::Idle
            };
        }
    }

    pub fn apply_optimistic(&mut self, value: T) {
        self.optimistic = Some(value);
        self.phase = SyncPhase::OptimisticallyUpdated;
    }

    pub fn confirm(&mut self, value: T) {
        self.confirmed = Some(value);
        self.optimistic = None;
        self.last_error = None;
        self.phase = SyncPhase::Confirmed;
    }

    /// Drop the optimistic layer. `authoritative` replaces the confirmed value
    /// when a re-fetch after the failure succeeded.
    pub fn roll_back(&mut self, error: impl Into<String>, authoritative: Option<T>) {
        if let Some(v) = authoritative {
            self.confirmed = Some(v);
        }
        self.optimistic = None;
        self.last_error = Some(error.into());
        self.phase = SyncPhase::RolledBack;
    }
}
