use chrono::{DateTime, Utc};

/// Options supplied to [`crate::compile`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Reference instant for `now()` resolution and the default upper
    /// time bound. Defaults to the caller's clock at compile time.
    pub now: Option<DateTime<Utc>>,
}

impl CompileOptions {
    /// Pin `now()` to a fixed instant (deterministic compiles).
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Some(now) }
    }

    /// The resolved reference instant.
    pub fn resolve_now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }
}
