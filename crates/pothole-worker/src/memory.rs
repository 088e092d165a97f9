//! Process memory governor.
//!
//! Samples resident memory periodically and asks registered holders of
//! buffered state to release what they can when it exceeds the threshold.
//! Disabling it changes nothing but memory headroom.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics;

/// Source of the current resident set size.
pub trait MemorySampler: Send {
    fn resident_bytes(&mut self) -> Option<u64>;
}

/// Samples this process through `sysinfo`.
pub struct SysinfoSampler {
    system: System,
    pid: Option<Pid>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| warn!("Cannot determine own pid, memory sampling disabled: {}", e))
            .ok();
        Self {
            system: System::new(),
            pid,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn resident_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system.refresh_process(pid);
        self.system.process(pid).map(|p| p.memory())
    }
}

/// Something that can give memory back on request.
pub trait Reclaim: Send + Sync {
    fn name(&self) -> &str;

    /// Release what can be spared; returns the bytes freed.
    fn reclaim(&self) -> usize;
}

/// Result of one governor sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCheck {
    pub resident_bytes: Option<u64>,
    pub over_threshold: bool,
    /// Bytes freed across all reclaim targets
    pub reclaimed: usize,
}

pub struct MemoryGovernor {
    sampler: Box<dyn MemorySampler>,
    threshold_bytes: u64,
    targets: Vec<Arc<dyn Reclaim>>,
}

impl MemoryGovernor {
    pub fn new(sampler: Box<dyn MemorySampler>, threshold_bytes: u64) -> Self {
        Self {
            sampler,
            threshold_bytes,
            targets: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: Arc<dyn Reclaim>) -> Self {
        self.targets.push(target);
        self
    }

    /// Take one sample and reclaim if over the threshold.
    pub fn check_once(&mut self) -> MemoryCheck {
        let resident = self.sampler.resident_bytes();
        let Some(bytes) = resident else {
            return MemoryCheck {
                resident_bytes: None,
                over_threshold: false,
                reclaimed: 0,
            };
        };

        metrics::set_process_rss(bytes);
        debug!(rss_mb = bytes / (1024 * 1024), "Memory sample");

        if bytes <= self.threshold_bytes {
            return MemoryCheck {
                resident_bytes: resident,
                over_threshold: false,
                reclaimed: 0,
            };
        }

        warn!(
            rss_mb = bytes / (1024 * 1024),
            threshold_mb = self.threshold_bytes / (1024 * 1024),
            "Memory above threshold, reclaiming"
        );
        let mut reclaimed = 0;
        for target in &self.targets {
            let released = target.reclaim();
            info!(holder = target.name(), released_bytes = released, "Reclaimed");
            reclaimed += released;
        }
        metrics::record_memory_reclaim();

        MemoryCheck {
            resident_bytes: resident,
            over_threshold: true,
            reclaimed,
        }
    }

    /// Run [`check_once`](Self::check_once) every `interval` until shutdown.
    pub fn spawn(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Memory governor running every {:?}, threshold {} MB",
                interval,
                self.threshold_bytes / (1024 * 1024)
            );
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        self.check_once();
                    }
                }
            }
            debug!("Memory governor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSampler(Option<u64>);

    impl MemorySampler for FixedSampler {
        fn resident_bytes(&mut self) -> Option<u64> {
            self.0
        }
    }

    #[derive(Default)]
    struct CountingTarget {
        calls: AtomicUsize,
    }

    impl Reclaim for CountingTarget {
        fn name(&self) -> &str {
            "counting"
        }

        fn reclaim(&self) -> usize {
            self.calls.fetch_add(1, Ordering::SeqCst);
            10
        }
    }

    #[test]
    fn test_below_threshold_does_nothing() {
        let target = Arc::new(CountingTarget::default());
        let mut governor = MemoryGovernor::new(Box::new(FixedSampler(Some(100))), 200)
            .with_target(target.clone());

        let check = governor.check_once();
        assert!(!check.over_threshold);
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_above_threshold_reclaims_every_target() {
        let a = Arc::new(CountingTarget::default());
        let b = Arc::new(CountingTarget::default());
        let mut governor = MemoryGovernor::new(Box::new(FixedSampler(Some(300))), 200)
            .with_target(a.clone())
            .with_target(b.clone());

        let check = governor.check_once();
        assert!(check.over_threshold);
        assert_eq!(check.reclaimed, 20);
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unavailable_sample_is_not_over() {
        let mut governor = MemoryGovernor::new(Box::new(FixedSampler(None)), 0);
        assert_eq!(
            governor.check_once(),
            MemoryCheck {
                resident_bytes: None,
                over_threshold: false,
                reclaimed: 0
            }
        );
    }

    #[test]
    fn test_over_threshold_trims_frame_buffer() {
        use crate::ring_buffer::FrameRingBuffer;
        use chrono::Utc;
        use pothole_models::{BufferedFrame, Frame, PixelFormat};

        let buffer = Arc::new(FrameRingBuffer::new(90));
        for _ in 0..90 {
            buffer.append(BufferedFrame::new(
                Frame {
                    pixels: vec![0; 64 * 48 * 3],
                    width: 64,
                    height: 48,
                    format: PixelFormat::Bgr24,
                    captured_at: Utc::now(),
                },
                vec![0.5],
            ));
        }
        let mut governor =
            MemoryGovernor::new(Box::new(FixedSampler(Some(500))), 100).with_target(buffer.clone());

        let check = governor.check_once();

        assert_eq!(buffer.len(), 45);
        assert_eq!(check.reclaimed, 45 * 64 * 48 * 3);
    }

    #[test]
    fn test_sysinfo_reports_own_process() {
        let mut sampler = SysinfoSampler::new();
        assert!(sampler.resident_bytes().unwrap_or(0) > 0);
    }
}
