// Copyright © 2024 Pathway

use log::{info, warn};
use nix::sys::resource::{getrlimit, setrlimit, Resource, RLIM_INFINITY};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLimit(pub Resource, pub u64);

impl ResourceLimit {
    /// Address-space ceiling for a memory limit given in MiB.
    pub fn memory_mb(limit_mb: u64) -> Self {
        Self(Resource::RLIMIT_AS, limit_mb.saturating_mul(1024 * 1024))
    }

    /// Lowers the soft and hard limit to this value.
    ///
    /// The limit is left alone when the current soft limit is already lower.
    /// Failures are logged and never fatal.
    pub fn apply(self) -> bool {
        let Self(resource, limit) = self;
        let (soft, hard) = match getrlimit(resource) {
            Ok(limits) => limits,
            Err(error) => {
                warn!("Failed to read the current {resource:?} limit: {error}");
                return false;
            }
        };
        info!("Current {resource:?} limits: soft {soft}, hard {hard}");
        if soft != RLIM_INFINITY && soft <= limit {
            return false;
        }
        match setrlimit(resource, limit, limit) {
            Ok(()) => {
                info!("Set {resource:?} limit to {limit}");
                true
            }
            Err(error) => {
                warn!("Failed to set {resource:?} limit to {limit}: {error}");
                false
            }
        }
    }
}
