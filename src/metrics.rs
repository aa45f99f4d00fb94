//! Per-share counters and a lease-break duration histogram (§4.C).
//!
//! Grounded on `examples/kata-containers-kata-containers/Cargo.toml`'s
//! `prometheus = { version = "0.14.0", features = ["process"] }` -- the
//! pack's own precedent for a metrics crate, and not something the teacher
//! declares. Each `ShareMetrics` owns a private `Registry` so one export's
//! counters never collide with another's.

use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};

/// Counters for a single exported share, per §4.C's table.
pub struct ShareMetrics {
    registry: Registry,
    pub acquired: IntCounter,
    pub denied: IntCounter,
    pub blocked_grants: IntCounter,
    /// Cross-protocol conflicts, labeled (initiator protocol, target
    /// protocol) via the two counters below (NFS-initiated-against-SMB and
    /// SMB-initiated-against-NFS are the only two directions that exist).
    pub cross_conflicts_nfs_vs_smb: IntCounter,
    pub cross_conflicts_smb_vs_nfs: IntCounter,
    pub lease_break_durations: Histogram,
}

impl Default for ShareMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ShareMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let acquired = IntCounter::with_opts(Opts::new("ditto_lock_acquired_total", "byte-range locks and leases granted"))
            .expect("static metric opts are always valid");
        let denied = IntCounter::with_opts(Opts::new("ditto_lock_denied_total", "byte-range locks and leases denied"))
            .expect("static metric opts are always valid");
        let blocked_grants = IntCounter::with_opts(Opts::new(
            "ditto_lock_blocked_grant_total",
            "NLM blocking requests granted once a conflicting holder released",
        ))
        .expect("static metric opts are always valid");
        let cross_conflicts_nfs_vs_smb = IntCounter::with_opts(Opts::new(
            "ditto_lock_cross_conflict_nfs_vs_smb_total",
            "conflicts where an NFS-side request found a conflicting SMB lease",
        ))
        .expect("static metric opts are always valid");
        let cross_conflicts_smb_vs_nfs = IntCounter::with_opts(Opts::new(
            "ditto_lock_cross_conflict_smb_vs_nfs_total",
            "conflicts where an SMB-side request found a conflicting NFS lock",
        ))
        .expect("static metric opts are always valid");
        // Exponential buckets from 100ms to 100s, per §4.C.
        let lease_break_durations = Histogram::with_opts(
            HistogramOpts::new("ditto_lease_break_duration_seconds", "time from break-initiated to break-finalized")
                .buckets(vec![0.1, 0.3, 1.0, 3.0, 10.0, 30.0, 100.0]),
        )
        .expect("static histogram opts are always valid");

        for metric in [&acquired, &denied, &blocked_grants, &cross_conflicts_nfs_vs_smb, &cross_conflicts_smb_vs_nfs] {
            registry.register(Box::new(metric.clone())).expect("metric names are unique per registry");
        }
        registry.register(Box::new(lease_break_durations.clone())).expect("metric names are unique per registry");

        Self { registry, acquired, denied, blocked_grants, cross_conflicts_nfs_vs_smb, cross_conflicts_smb_vs_nfs, lease_break_durations }
    }

    pub fn record_acquired(&self) {
        self.acquired.inc();
    }

    pub fn record_denied(&self) {
        self.denied.inc();
    }

    pub fn record_blocked_grant(&self) {
        self.blocked_grants.inc();
    }

    pub fn record_cross_conflict(&self, nfs_initiated: bool) {
        if nfs_initiated {
            self.cross_conflicts_nfs_vs_smb.inc();
        } else {
            self.cross_conflicts_smb_vs_nfs.inc();
        }
    }

    pub fn record_lease_break(&self, duration: Duration) {
        self.lease_break_durations.observe(duration.as_secs_f64());
    }

    /// This share's metric families, ready for whatever scrapes them (an
    /// admin/metrics HTTP endpoint maintained by the listener layer, outside
    /// this crate).
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}
