pub mod progress;
pub mod results;
pub mod tcp;

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::error::Result;
pub use progress::{ProgressSnapshot, ProgressTracker, ScanEvent};
pub use results::{PortStatus, ProbeError, ProbeResult, ScanReport, ScanSession, Target};
pub use tcp::{Prober, TcpConnectProber};

/// Fans host x port targets out over a bounded set of concurrent probes.
pub struct Scanner<P = TcpConnectProber> {
    config: ScanConfig,
    prober: Arc<P>,
    events: Option<UnboundedSender<ScanEvent>>,
}

impl Scanner<TcpConnectProber> {
    pub fn new(config: ScanConfig) -> Result<Self> {
        Self::with_prober(config, TcpConnectProber)
    }
}

impl<P: Prober + 'static> Scanner<P> {
    pub fn with_prober(config: ScanConfig, prober: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            prober: Arc::new(prober),
            events: None,
        })
    }

    /// Sends a [`ScanEvent`] for every state change of the sweep.
    pub fn with_events(mut self, events: UnboundedSender<ScanEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Probes every target of `session` and returns the frozen report.
    ///
    /// At most `concurrency` probes are in flight; the next target is only
    /// pulled when one of them finishes. Once `cancel` fires or the scan
    /// timeout passes, nothing new is dispatched, in-flight probes get
    /// `grace_period` to finish and whatever is still running after that is
    /// aborted and recorded as [`ProbeError::Abandoned`].
    pub async fn run(&self, mut session: ScanSession, cancel: CancellationToken) -> ScanReport {
        let total = session.total();
        let deadline = self.config.scan_timeout.map(|t| Instant::now() + t);

        info!(
            range = %session.range(),
            ports = session.ports().len(),
            total,
            concurrency = self.config.concurrency,
            "starting sweep"
        );
        self.emit(ScanEvent::Started { total });

        let mut targets = session.targets();
        let stop = cancel.child_token();
        let mut in_flight: JoinSet<(Target, Option<ProbeResult>)> = JoinSet::new();
        let mut outstanding: HashSet<Target> = HashSet::new();
        let mut stopped = false;

        loop {
            if !stopped && (cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d)) {
                warn!("sweep interrupted, no new probes will be dispatched");
                stopped = true;
            }

            while !stopped && in_flight.len() < self.config.concurrency {
                let Some(target) = targets.next() else { break };
                outstanding.insert(target);
                in_flight.spawn(self.probe_task(target, stop.clone()));
            }

            if in_flight.is_empty() || stopped {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("sweep cancelled");
                    stopped = true;
                }
                _ = wait_for(deadline) => {
                    warn!("scan timeout reached");
                    stopped = true;
                }
                Some(joined) = in_flight.join_next() => {
                    if let Ok((target, result)) = joined {
                        self.settle(&mut session, &mut outstanding, target, result);
                    }
                }
            }
        }

        if stopped {
            stop.cancel();
            self.drain(&mut session, &mut in_flight, &mut outstanding).await;
        }

        let report = session.freeze(stopped);
        info!(
            completed = report.completed,
            total = report.total,
            cancelled = report.cancelled,
            hosts_up = report.hosts_up(),
            open_ports = report.open_ports(),
            "sweep finished"
        );
        self.emit(ScanEvent::Finished {
            completed: report.completed,
            total: report.total,
            cancelled: report.cancelled,
        });

        report
    }

    /// Resolves to `None` when the sweep stopped while the task was still
    /// waiting out `probe_delay`, i.e. before anything was sent.
    fn probe_task(
        &self,
        target: Target,
        stop: CancellationToken,
    ) -> impl std::future::Future<Output = (Target, Option<ProbeResult>)> + Send + 'static {
        let prober = Arc::clone(&self.prober);
        let probe_timeout = self.config.probe_timeout;
        let probe_delay = self.config.probe_delay;

        async move {
            if !probe_delay.is_zero() {
                tokio::select! {
                    _ = stop.cancelled() => return (target, None),
                    _ = sleep(probe_delay) => {}
                }
            }

            // The prober is expected to honour the timeout; this bounds the
            // ones that don't.
            let attempt = AssertUnwindSafe(timeout(probe_timeout, prober.probe(target, probe_timeout)))
                .catch_unwind()
                .await;

            let result = match attempt {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => ProbeResult::filtered(probe_timeout),
                Err(panic) => ProbeResult::error(ProbeError::Panicked(panic_message(panic.as_ref()))),
            };

            (target, Some(result))
        }
    }

    async fn drain(
        &self,
        session: &mut ScanSession,
        in_flight: &mut JoinSet<(Target, Option<ProbeResult>)>,
        outstanding: &mut HashSet<Target>,
    ) {
        if in_flight.is_empty() {
            return;
        }

        debug!(in_flight = in_flight.len(), grace = ?self.config.grace_period, "draining in-flight probes");

        let finished = timeout(self.config.grace_period, async {
            while let Some(joined) = in_flight.join_next().await {
                if let Ok((target, result)) = joined {
                    self.settle(session, outstanding, target, result);
                }
            }
        })
        .await;

        if finished.is_err() {
            in_flight.abort_all();
            // Tasks that finished before the abort landed still carry a verdict.
            while let Some(joined) = in_flight.join_next().await {
                if let Ok((target, result)) = joined {
                    self.settle(session, outstanding, target, result);
                }
            }
            if outstanding.is_empty() {
                return;
            }

            let mut abandoned: Vec<Target> = outstanding.drain().collect();
            abandoned.sort();
            warn!(count = abandoned.len(), "abandoning probes after grace period");
            for target in abandoned {
                let completed = session.record(target, ProbeResult::error(ProbeError::Abandoned));
                self.emit(ScanEvent::ProbeCompleted {
                    target,
                    status: PortStatus::Error,
                    completed,
                    total: session.total(),
                });
            }
        }
    }

    fn settle(
        &self,
        session: &mut ScanSession,
        outstanding: &mut HashSet<Target>,
        target: Target,
        result: Option<ProbeResult>,
    ) {
        match result {
            Some(result) => self.record(session, outstanding, target, result),
            None => {
                outstanding.remove(&target);
                debug!(%target, "sweep stopped before the probe was sent");
            }
        }
    }

    fn record(
        &self,
        session: &mut ScanSession,
        outstanding: &mut HashSet<Target>,
        target: Target,
        result: ProbeResult,
    ) {
        outstanding.remove(&target);
        let status = result.status;
        let completed = session.record(target, result);
        self.emit(ScanEvent::ProbeCompleted {
            target,
            status,
            completed,
            total: session.total(),
        });
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is watching
            let _ = events.send(event);
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
