use std::fmt;

/// Health of a session as seen by its reply handling.
///
/// `Healthy -> Degraded -> Fatal`; no transition goes backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Health {
    #[default]
    Healthy,
    /// One reply was lost; every command now goes to the leader.
    Degraded,
    /// A second reply was lost. There is no further fallback.
    Fatal,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Health::Healthy => "healthy",
            Health::Degraded => "degraded",
            Health::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Default)]
pub struct FailureTracker {
    health: Health,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn health(&self) -> Health {
        self.health
    }

    /// True once routing must ignore proximity and target the leader.
    pub fn forces_leader(&self) -> bool {
        self.health != Health::Healthy
    }

    /// Records one missing, garbled or rejected reply and returns the new health.
    pub fn record_failure(&mut self) -> Health {
        self.health = match self.health {
            Health::Healthy => Health::Degraded,
            Health::Degraded | Health::Fatal => Health::Fatal,
        };
        self.health
    }
}
