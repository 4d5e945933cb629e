//! Presence tracking for Hosts.
//!
//! A Host announces itself once, then proves liveness with heartbeats.
//! Liveness is heartbeat-driven: a silent Host stays `online` until it
//! calls `mark_offline` or an external sweep demotes it via
//! `sweep_stale`. Nothing in this module schedules the sweep; embedders
//! that never call it get pure heartbeat semantics.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::store::{RelayStore, StoreError};
use crate::types::{now_ms, HostPatch, HostRecord, HostStatus, Workload};

/// Upper bound on `list_online` results. Callers must not assume the
/// page is complete beyond this many records.
pub const ONLINE_PAGE_CAP: usize = 50;

/// Tracks Host liveness and workload snapshots over a shared store.
pub struct PresenceTracker<S: RelayStore> {
    store: Arc<S>,
}

impl<S: RelayStore> PresenceTracker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Upsert the Host record and stamp `last_seen` with the current
    /// time. The only path that creates a record.
    pub async fn announce(
        &self,
        host_id: &str,
        status: HostStatus,
        active_workloads: Vec<Workload>,
        version: &str,
        platform: &str,
    ) -> Result<(), StoreError> {
        let record = HostRecord {
            host_id: host_id.to_string(),
            status,
            active_workloads,
            version: version.to_string(),
            platform: platform.to_string(),
            last_seen: now_ms(),
        };
        self.store.put_host(record).await?;
        info!(host_id, %status, "host announced");
        Ok(())
    }

    /// Refresh liveness: sets `status=online` and `last_seen=now`.
    /// Workloads are replaced only when supplied; `None` preserves the
    /// stored list. Returns `false` when no record exists (heartbeats
    /// never create one).
    pub async fn heartbeat(
        &self,
        host_id: &str,
        active_workloads: Option<Vec<Workload>>,
    ) -> Result<bool, StoreError> {
        let applied = self
            .store
            .patch_host(
                host_id,
                HostPatch {
                    status: Some(HostStatus::Online),
                    active_workloads,
                    last_seen: Some(now_ms()),
                },
            )
            .await?;
        if !applied {
            debug!(host_id, "heartbeat for unknown host ignored");
        }
        Ok(applied)
    }

    /// Fetch the Host record, if any. No side effects.
    pub async fn get_status(&self, host_id: &str) -> Result<Option<HostRecord>, StoreError> {
        self.store.get_host(host_id).await
    }

    /// List currently-online Hosts, capped at [`ONLINE_PAGE_CAP`].
    /// Order is unspecified.
    pub async fn list_online(&self) -> Result<Vec<HostRecord>, StoreError> {
        self.store
            .hosts_with_status(HostStatus::Online, ONLINE_PAGE_CAP)
            .await
    }

    /// Demote the Host to `offline`, clear its workloads, and refresh
    /// `last_seen`. Idempotent; returns `false` when no record exists.
    pub async fn mark_offline(&self, host_id: &str) -> Result<bool, StoreError> {
        let applied = self
            .store
            .patch_host(
                host_id,
                HostPatch {
                    status: Some(HostStatus::Offline),
                    active_workloads: Some(Vec::new()),
                    last_seen: Some(now_ms()),
                },
            )
            .await?;
        if applied {
            info!(host_id, "host marked offline");
        }
        Ok(applied)
    }

    /// Demote every online Host whose `last_seen` is older than
    /// `stale_after`. Workloads are cleared like `mark_offline`, but
    /// `last_seen` is left untouched so operators can still see when
    /// the Host was last heard. Returns the number demoted.
    pub async fn sweep_stale(
        &self,
        now_ms: u64,
        stale_after: Duration,
    ) -> Result<usize, StoreError> {
        let threshold = stale_after.as_millis() as u64;
        let online = self
            .store
            .hosts_with_status(HostStatus::Online, usize::MAX)
            .await?;

        let mut demoted = 0;
        for host in online {
            if now_ms.saturating_sub(host.last_seen) > threshold {
                let applied = self
                    .store
                    .patch_host(
                        &host.host_id,
                        HostPatch {
                            status: Some(HostStatus::Offline),
                            active_workloads: Some(Vec::new()),
                            last_seen: None,
                        },
                    )
                    .await?;
                if applied {
                    info!(host_id = %host.host_id, last_seen = host.last_seen, "stale host demoted");
                    demoted += 1;
                }
            }
        }
        Ok(demoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::make_workload;
    use crate::store::MemoryRelay;

    fn tracker() -> PresenceTracker<MemoryRelay> {
        PresenceTracker::new(MemoryRelay::new_shared())
    }

    #[tokio::test]
    async fn test_announce_then_get_status() {
        let presence = tracker();
        presence
            .announce(
                "host-1",
                HostStatus::Online,
                vec![make_workload("/srv/app", 3000)],
                "0.1.0",
                "linux",
            )
            .await
            .unwrap();

        let record = presence.get_status("host-1").await.unwrap().unwrap();
        assert_eq!(record.status, HostStatus::Online);
        assert_eq!(record.active_workloads.len(), 1);
        assert_eq!(record.version, "0.1.0");
        assert!(record.last_seen > 0);
    }

    #[tokio::test]
    async fn test_heartbeat_never_creates_a_record() {
        let presence = tracker();
        let applied = presence.heartbeat("host-ghost", None).await.unwrap();
        assert!(!applied);
        assert!(presence.get_status("host-ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_preserves_workloads_when_omitted() {
        let presence = tracker();
        presence
            .announce(
                "host-1",
                HostStatus::Online,
                vec![make_workload("/srv/app", 3000)],
                "0.1.0",
                "linux",
            )
            .await
            .unwrap();

        assert!(presence.heartbeat("host-1", None).await.unwrap());
        let record = presence.get_status("host-1").await.unwrap().unwrap();
        assert_eq!(record.active_workloads.len(), 1);

        // Supplying a list replaces it entirely, no merge.
        assert!(presence
            .heartbeat(
                "host-1",
                Some(vec![
                    make_workload("/srv/a", 3001),
                    make_workload("/srv/b", 3002),
                ]),
            )
            .await
            .unwrap());
        let record = presence.get_status("host-1").await.unwrap().unwrap();
        assert_eq!(record.active_workloads.len(), 2);
        assert_eq!(record.active_workloads[0].path, "/srv/a");
    }

    #[tokio::test]
    async fn test_heartbeat_revives_offline_host() {
        let presence = tracker();
        presence
            .announce("host-1", HostStatus::Online, vec![], "0.1.0", "linux")
            .await
            .unwrap();
        presence.mark_offline("host-1").await.unwrap();

        assert!(presence.heartbeat("host-1", None).await.unwrap());
        let record = presence.get_status("host-1").await.unwrap().unwrap();
        assert_eq!(record.status, HostStatus::Online);
    }

    #[tokio::test]
    async fn test_mark_offline_clears_workloads() {
        let presence = tracker();
        presence
            .announce(
                "host-1",
                HostStatus::Online,
                vec![make_workload("/srv/app", 3000)],
                "0.1.0",
                "linux",
            )
            .await
            .unwrap();

        assert!(presence.mark_offline("host-1").await.unwrap());
        let record = presence.get_status("host-1").await.unwrap().unwrap();
        assert_eq!(record.status, HostStatus::Offline);
        assert!(record.active_workloads.is_empty());

        // Idempotent, and a no-op for absent hosts.
        assert!(presence.mark_offline("host-1").await.unwrap());
        assert!(!presence.mark_offline("host-none").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_online_excludes_offline() {
        let presence = tracker();
        presence
            .announce("host-1", HostStatus::Online, vec![], "0.1.0", "linux")
            .await
            .unwrap();
        presence
            .announce("host-2", HostStatus::Online, vec![], "0.1.0", "linux")
            .await
            .unwrap();
        presence.mark_offline("host-2").await.unwrap();

        let online = presence.list_online().await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].host_id, "host-1");
    }

    #[tokio::test]
    async fn test_list_online_caps_the_page() {
        let presence = tracker();
        for i in 0..ONLINE_PAGE_CAP + 10 {
            presence
                .announce(&format!("host-{i}"), HostStatus::Online, vec![], "0.1.0", "linux")
                .await
                .unwrap();
        }
        let online = presence.list_online().await.unwrap();
        assert_eq!(online.len(), ONLINE_PAGE_CAP);
    }

    #[tokio::test]
    async fn test_sweep_stale_demotes_only_silent_hosts() {
        let store = MemoryRelay::new_shared();
        let presence = PresenceTracker::new(store.clone());

        // Two hosts, one of which stopped heartbeating long ago.
        let mut stale = crate::harness::make_host_record("host-stale", 1_000);
        stale.active_workloads = vec![make_workload("/srv/app", 3000)];
        store.put_host(stale).await.unwrap();
        store
            .put_host(crate::harness::make_host_record("host-fresh", 95_000))
            .await
            .unwrap();

        let demoted = presence
            .sweep_stale(100_000, Duration::from_secs(90))
            .await
            .unwrap();
        assert_eq!(demoted, 1);

        let stale = presence.get_status("host-stale").await.unwrap().unwrap();
        assert_eq!(stale.status, HostStatus::Offline);
        assert!(stale.active_workloads.is_empty());
        // last_seen is preserved so the outage is visible.
        assert_eq!(stale.last_seen, 1_000);

        let fresh = presence.get_status("host-fresh").await.unwrap().unwrap();
        assert_eq!(fresh.status, HostStatus::Online);
    }

    #[tokio::test]
    async fn test_sweep_stale_ignores_offline_hosts() {
        let store = MemoryRelay::new_shared();
        let presence = PresenceTracker::new(store.clone());

        let mut off = crate::harness::make_host_record("host-off", 0);
        off.status = HostStatus::Offline;
        store.put_host(off).await.unwrap();

        let demoted = presence
            .sweep_stale(1_000_000, Duration::from_secs(90))
            .await
            .unwrap();
        assert_eq!(demoted, 0);
    }
}
