//! Normalises a caller-supplied lease request into a concrete lease
//! duration plus the provenance of that duration, so callers can log or
//! assert on whether a default/clamp kicked in without re-deriving it.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseSource {
    Explicit,
    Default,
    Clamped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLease {
    pub seconds: i64,
    pub source: LeaseSource,
}

/// Built from a single positive default duration; never fails.
#[derive(Debug, Clone, Copy)]
pub struct LeasePolicy {
    default_seconds: i64,
}

impl LeasePolicy {
    pub fn new(default: Duration) -> Self {
        let default_seconds = default.as_secs().max(1) as i64;
        Self { default_seconds }
    }

    pub fn resolve(&self, requested: Duration, requested_is_negative: bool) -> ResolvedLease {
        if requested_is_negative {
            return ResolvedLease {
                seconds: 1,
                source: LeaseSource::Clamped,
            };
        }

        if requested.is_zero() {
            return ResolvedLease {
                seconds: self.default_seconds,
                source: LeaseSource::Default,
            };
        }

        let seconds = requested.as_secs() as i64;
        if seconds == 0 {
            ResolvedLease {
                seconds: 1,
                source: LeaseSource::Clamped,
            }
        } else {
            ResolvedLease {
                seconds,
                source: LeaseSource::Explicit,
            }
        }
    }

    /// Convenience for callers passing a signed seconds count, as arrives
    /// over the worker-facing `lease=<seconds>` query parameter.
    pub fn resolve_seconds(&self, requested_seconds: i64) -> ResolvedLease {
        if requested_seconds < 0 {
            ResolvedLease {
                seconds: 1,
                source: LeaseSource::Clamped,
            }
        } else if requested_seconds == 0 {
            ResolvedLease {
                seconds: self.default_seconds,
                source: LeaseSource::Default,
            }
        } else {
            ResolvedLease {
                seconds: requested_seconds,
                source: LeaseSource::Explicit,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LeasePolicy {
        LeasePolicy::new(Duration::from_secs(30))
    }

    #[test]
    fn positive_request_is_explicit() {
        let resolved = policy().resolve_seconds(45);
        assert_eq!(resolved.seconds, 45);
        assert_eq!(resolved.source, LeaseSource::Explicit);
    }

    #[test]
    fn zero_request_uses_default() {
        let resolved = policy().resolve_seconds(0);
        assert_eq!(resolved.seconds, 30);
        assert_eq!(resolved.source, LeaseSource::Default);
    }

    #[test]
    fn negative_request_clamps_to_one() {
        let resolved = policy().resolve_seconds(-5);
        assert_eq!(resolved.seconds, 1);
        assert_eq!(resolved.source, LeaseSource::Clamped);
    }
}
