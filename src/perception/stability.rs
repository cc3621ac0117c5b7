use std::time::Duration;

use crate::agent_engine::loop_control::StopToken;
use crate::errors::DeskPilotResult;
use crate::perception::types::{fingerprint, ElementDescriptor};

#[derive(Debug, Clone)]
pub struct StabilityConfig {
    pub max_wait_ms: u64,
    pub check_interval_ms: u64,
    /// Consecutive identical scans required (1 = two scans that agree).
    pub min_stable_scans: usize,
}

impl StabilityConfig {
    /// Settle budget of `max_wait_ms`, polled a few times within it.
    pub fn with_budget(max_wait_ms: u64) -> Self {
        Self {
            max_wait_ms,
            check_interval_ms: (max_wait_ms / 3).clamp(10, 200),
            min_stable_scans: 1,
        }
    }
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self::with_budget(1500)
    }
}

pub struct ScanStabilityDetector {
    config: StabilityConfig,
    last_fingerprint: Option<u64>,
    stable_scan_count: usize,
}

impl ScanStabilityDetector {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            last_fingerprint: None,
            stable_scan_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.last_fingerprint = None;
        self.stable_scan_count = 0;
    }

    pub fn is_stable(&mut self, elements: &[ElementDescriptor]) -> bool {
        let current = fingerprint(elements);

        if let Some(last) = self.last_fingerprint {
            if current == last {
                self.stable_scan_count += 1;
            } else {
                self.stable_scan_count = 0;
            }
        }

        self.last_fingerprint = Some(current);
        self.stable_scan_count >= self.config.min_stable_scans
    }
}

/// Outcome of a settle wait. `elements` is the last scan taken.
#[derive(Debug, Clone)]
pub struct Settled {
    pub stable: bool,
    pub elements: Vec<ElementDescriptor>,
}

/// Re-scan until consecutive scans agree, the budget runs out, or a stop is requested.
pub async fn wait_for_ui_settle<F, Fut>(
    scan: F,
    config: StabilityConfig,
    stop: &StopToken,
) -> DeskPilotResult<Settled>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = DeskPilotResult<Vec<ElementDescriptor>>>,
{
    let mut detector = ScanStabilityDetector::new(config.clone());
    let start_time = std::time::Instant::now();
    let budget = Duration::from_millis(config.max_wait_ms);
    let mut elements: Vec<ElementDescriptor>;

    loop {
        elements = scan().await?;
        if detector.is_stable(&elements) {
            tracing::debug!("UI settled after {:?}", start_time.elapsed());
            return Ok(Settled {
                stable: true,
                elements,
            });
        }
        if stop.is_stop_requested() || start_time.elapsed() >= budget {
            break;
        }
        tokio::time::sleep(Duration::from_millis(config.check_interval_ms)).await;
    }

    tracing::debug!("UI settle budget spent after {:?}", start_time.elapsed());
    Ok(Settled {
        stable: false,
        elements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::loop_control::StopHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn el(name: &str) -> ElementDescriptor {
        ElementDescriptor {
            role: "AXButton".into(),
            name: name.into(),
            selector: format!("ax:{name}"),
            bounds: None,
            clickable: true,
            focused: false,
        }
    }

    #[test]
    fn detector_needs_two_matching_scans() {
        let mut d = ScanStabilityDetector::new(StabilityConfig::default());
        assert!(!d.is_stable(&[el("a")]));
        assert!(d.is_stable(&[el("a")]));
        assert!(!d.is_stable(&[el("b")]));
        d.reset();
        assert!(!d.is_stable(&[el("b")]));
    }

    #[tokio::test]
    async fn settles_once_scans_stop_changing() {
        let calls = AtomicUsize::new(0);
        let settled = wait_for_ui_settle(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    // changes for the first three scans, then stays put
                    Ok(vec![el(&n.min(3).to_string())])
                }
            },
            StabilityConfig {
                max_wait_ms: 1000,
                check_interval_ms: 1,
                min_stable_scans: 1,
            },
            &StopHandle::new().token(),
        )
        .await
        .unwrap();
        assert!(settled.stable);
        assert_eq!(settled.elements[0].name, "3");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn gives_up_at_budget() {
        let calls = AtomicUsize::new(0);
        let settled = wait_for_ui_settle(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(vec![el(&n.to_string())]) }
            },
            StabilityConfig {
                max_wait_ms: 20,
                check_interval_ms: 5,
                min_stable_scans: 1,
            },
            &StopHandle::new().token(),
        )
        .await
        .unwrap();
        assert!(!settled.stable);
        assert!(!settled.elements.is_empty());
    }
}
