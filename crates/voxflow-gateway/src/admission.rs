//! Backpressure admission control for inbound streams.
//!
//! Three independent ceilings: concurrent stream leases, per-stream message
//! rate inside a one-second sliding window, and an idle timeout enforced by
//! a periodic reaper sweep. Every admit, reject, and evict is logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxflow_core::config::LimitsConfig;
use voxflow_core::error::{AdmissionCode, Result, VoxflowError};
use voxflow_pipeline::assembler::PhaseAssembler;

struct StreamLease {
    opened_at: Instant,
    last_activity: Instant,
    message_count: u64,
    /// Arrival times inside the current one-second window.
    recent: Vec<Instant>,
    /// Hardware identity from the first validated request, `None` until
    /// the client has sent one.
    hardware_id: Option<String>,
    evict: CancellationToken,
}

/// Details of one reaped lease, for the eviction log.
#[derive(Debug)]
pub struct EvictedLease {
    pub conn_id: String,
    pub hardware_id: Option<String>,
    pub idle: Duration,
    pub messages: u64,
}

/// In-memory lease table gating stream entry and message rate.
pub struct AdmissionController {
    max_streams: usize,
    max_messages_per_second: usize,
    idle_timeout: Duration,
    leases: Mutex<HashMap<String, StreamLease>>,
}

impl AdmissionController {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            max_streams: limits.max_streams,
            max_messages_per_second: limits.max_messages_per_second,
            idle_timeout: Duration::from_secs(limits.idle_timeout_secs),
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Claim a lease for a new stream. Returns the token the connection
    /// task watches for reaper-driven eviction.
    pub fn acquire(&self, conn_id: &str) -> Result<CancellationToken> {
        let mut leases = self.leases.lock().unwrap();
        if leases.len() >= self.max_streams {
            warn!(
                conn_id,
                active = leases.len(),
                limit = self.max_streams,
                "Rejecting stream: concurrent-stream ceiling reached"
            );
            return Err(VoxflowError::Admission {
                code: AdmissionCode::StreamLimit,
                message: format!("concurrent stream ceiling of {} reached", self.max_streams),
            });
        }

        let now = Instant::now();
        let evict = CancellationToken::new();
        leases.insert(
            conn_id.to_string(),
            StreamLease {
                opened_at: now,
                last_activity: now,
                message_count: 0,
                recent: Vec::new(),
                hardware_id: None,
                evict: evict.clone(),
            },
        );
        info!(conn_id, active = leases.len(), "Stream admitted");
        Ok(evict)
    }

    /// Account one inbound message against the stream's sliding window.
    /// A rejected message still refreshes the idle clock.
    pub fn check_rate(&self, conn_id: &str) -> Result<()> {
        let mut leases = self.leases.lock().unwrap();
        let lease = match leases.get_mut(conn_id) {
            Some(lease) => lease,
            None => {
                return Err(VoxflowError::Session(format!(
                    "no active lease for {conn_id}"
                )));
            }
        };

        let now = Instant::now();
        lease.last_activity = now;
        lease.message_count += 1;

        let cutoff = now - Duration::from_secs(1);
        lease.recent.retain(|t| *t > cutoff);
        if lease.recent.len() >= self.max_messages_per_second {
            warn!(
                conn_id,
                in_window = lease.recent.len(),
                limit = self.max_messages_per_second,
                "Rejecting message: rate ceiling exceeded"
            );
            return Err(VoxflowError::Admission {
                code: AdmissionCode::RateLimit,
                message: format!(
                    "message rate ceiling of {}/s exceeded",
                    self.max_messages_per_second
                ),
            });
        }
        lease.recent.push(now);
        Ok(())
    }

    /// Record the hardware identity behind a lease once the first valid
    /// request names it, so admission logs correlate to the device.
    pub fn bind_hardware(&self, conn_id: &str, hardware_id: &str) {
        let mut leases = self.leases.lock().unwrap();
        if let Some(lease) = leases.get_mut(conn_id) {
            if lease.hardware_id.as_deref() != Some(hardware_id) {
                debug!(conn_id, hardware_id, "Stream bound to hardware identity");
                lease.hardware_id = Some(hardware_id.to_string());
            }
        }
    }

    /// Release the lease when the stream closes.
    pub fn release(&self, conn_id: &str) {
        let mut leases = self.leases.lock().unwrap();
        if let Some(lease) = leases.remove(conn_id) {
            info!(
                conn_id,
                hardware_id = lease.hardware_id.as_deref().unwrap_or("unbound"),
                lifetime_secs = lease.opened_at.elapsed().as_secs(),
                messages = lease.message_count,
                active = leases.len(),
                "Stream released"
            );
        }
    }

    pub fn active_count(&self) -> usize {
        self.leases.lock().unwrap().len()
    }

    /// Evict every lease idle longer than the timeout, cancelling each
    /// one's token so the connection task tears itself down.
    pub fn sweep(&self) -> Vec<EvictedLease> {
        let mut leases = self.leases.lock().unwrap();
        let mut evicted = Vec::new();
        leases.retain(|conn_id, lease| {
            let idle = lease.last_activity.elapsed();
            if idle >= self.idle_timeout {
                lease.evict.cancel();
                evicted.push(EvictedLease {
                    conn_id: conn_id.clone(),
                    hardware_id: lease.hardware_id.clone(),
                    idle,
                    messages: lease.message_count,
                });
                false
            } else {
                true
            }
        });
        for lease in &evicted {
            warn!(
                conn_id = %lease.conn_id,
                hardware_id = lease.hardware_id.as_deref().unwrap_or("unbound"),
                idle_secs = lease.idle.as_secs(),
                messages = lease.messages,
                "Evicting idle stream"
            );
        }
        evicted
    }

    /// Background sweep over idle leases and abandoned pending buffers.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        sweep_interval: Duration,
        assembler: Arc<PhaseAssembler>,
        buffer_ttl: chrono::Duration,
    ) {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_interval);
            tick.tick().await;
            loop {
                tick.tick().await;
                let evicted = controller.sweep();
                let purged = assembler.purge_stale(buffer_ttl);
                if evicted.is_empty() && purged == 0 {
                    debug!(active = controller.active_count(), "Reaper sweep: nothing to do");
                } else if purged > 0 {
                    info!(purged, "Destroyed abandoned pending buffers");
                }
            }
        });
    }
}
