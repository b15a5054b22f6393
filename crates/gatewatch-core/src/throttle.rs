//! Per-identity alert cooldowns.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Cooldown windows for the two kinds of alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub known: Duration,
    pub unknown: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            known: Duration::from_secs(120),
            unknown: Duration::from_secs(30),
        }
    }
}

/// Throttle bucket. Every unidentified face shares the single `Unknown` bucket,
/// which never collides with an enrolled name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Bucket {
    Known(String),
    Unknown,
}

/// Decides whether a classification should produce a new notification.
///
/// State is in-memory only and starts empty on every process start.
pub struct Throttle {
    policy: CooldownPolicy,
    last_sent: Mutex<HashMap<Bucket, Instant>>,
}

impl Throttle {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }

    /// Returns true, and records `now` as the last send, if the bucket has never
    /// sent or its cooldown has fully elapsed (strictly longer than the window).
    ///
    /// The check and the update happen under one lock, so concurrent callers
    /// for the same bucket cannot both pass.
    pub fn should_send(&self, name: &str, is_unknown: bool, now: Instant) -> bool {
        let (bucket, window) = if is_unknown {
            (Bucket::Unknown, self.policy.unknown)
        } else {
            (Bucket::Known(name.to_string()), self.policy.known)
        };

        let mut last_sent = self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);
        let send = match last_sent.get(&bucket) {
            None => true,
            Some(&last) => now.saturating_duration_since(last) > window,
        };
        if send {
            last_sent.insert(bucket, now);
        }
        send
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(CooldownPolicy::default())
    }
}
