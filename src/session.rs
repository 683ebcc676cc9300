//! The controller that owns a page and drives optimization passes.
//!
//! A [`Session`] holds the document, the settings it was created with, and
//! every piece of runtime state the rules need between passes: the mutation
//! watcher, the idle scheduler, the intersection registry and the image
//! fallback table. The host feeds it time, idle periods, viewport changes
//! and image load failures; nothing is global.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::{CompiledHeuristics, Settings};
use crate::dom::{Document, NodeId};
use crate::geometry::Viewport;
use crate::images::{self, FallbackOutcome, FallbackTable};
use crate::mutation::MutationWatcher;
use crate::perf::{self, PerformanceSource, ReportSink};
use crate::pipeline::{self, FailedRule, PassContext, PassReport, Rule};
use crate::scheduler::{IdleDeadline, IdleScheduler, PassTicket};
use crate::visibility::{self, IntersectionRegistry};
use crate::worker::ClassifierWorker;

/// Upper bound on back-to-back passes in [`Session::settle`].
const MAX_SETTLE_PASSES: usize = 8;

#[derive(Debug)]
pub struct Session {
    settings: Settings,
    heuristics: CompiledHeuristics,
    document: Document,
    viewport: Viewport,
    enabled: bool,
    degraded: bool,
    watcher: MutationWatcher,
    scheduler: IdleScheduler,
    intersections: IntersectionRegistry,
    fallbacks: FallbackTable,
    report_sent: bool,
}

impl Session {
    pub fn new(document: Document, settings: Settings, viewport: Viewport) -> Result<Self> {
        let heuristics = settings.heuristics.compile()?;
        Ok(Self {
            scheduler: IdleScheduler::new(settings.idle_timeout_ms),
            intersections: IntersectionRegistry::new(settings.viewport_margin_px),
            heuristics,
            settings,
            document,
            viewport,
            enabled: false,
            degraded: false,
            watcher: MutationWatcher::new(),
            fallbacks: FallbackTable::default(),
            report_sent: false,
        })
    }

    // ── Enable / disable ────────────────────────────────────────────────────

    /// Start watching the page and schedule the first pass. If the host
    /// cannot observe mutations the session stays enabled but degraded and
    /// does nothing.
    pub fn enable(&mut self, now: u64) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.degraded = false;
        if let Err(e) = self.watcher.start(&mut self.document) {
            warn!(error = %format!("{e:#}"), "mutation observer unavailable, optimizer disabled for this page");
            self.degraded = true;
            return;
        }
        self.scheduler.schedule(now);
        info!(now, "optimizer enabled");
    }

    /// Disconnect observers and drop pending work. Marks and rewrites
    /// already applied stay in the document.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        self.watcher.stop(&mut self.document);
        self.intersections.disconnect();
        self.scheduler.cancel();
        self.watcher.reset();
        info!("optimizer disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    fn is_active(&self) -> bool {
        self.enabled && !self.degraded
    }

    // ── Scheduling ──────────────────────────────────────────────────────────

    /// Pick up queued mutation records. Returns true if they call for a pass.
    pub fn notify_mutations(&mut self, now: u64) -> bool {
        if !self.is_active() {
            return false;
        }
        let relevant = self.watcher.drain(&mut self.document);
        if relevant {
            self.scheduler.schedule(now);
        }
        relevant
    }

    /// Advance the clock. Runs the pending pass if the host is idle or the
    /// pass has waited past its deadline.
    pub fn tick(&mut self, now: u64, idle: Option<IdleDeadline>) -> Option<PassReport> {
        if !self.is_active() {
            return None;
        }
        self.notify_mutations(now);
        let ticket = self.scheduler.poll(now, idle)?;
        Some(self.execute(ticket, now))
    }

    /// Run a pass right away, whether or not one is pending.
    pub fn run_pass(&mut self, now: u64) -> Option<PassReport> {
        if !self.is_active() {
            return None;
        }
        let ticket = self.scheduler.begin_now(now);
        Some(self.execute(ticket, now))
    }

    /// Run pending passes back to back until the document stops producing
    /// relevant mutations.
    pub fn settle(&mut self, now: u64) -> Vec<PassReport> {
        let mut reports = Vec::new();
        if !self.is_active() {
            return reports;
        }
        self.notify_mutations(now);
        while self.scheduler.is_pending() && reports.len() < MAX_SETTLE_PASSES {
            let ticket = self.scheduler.begin_now(now);
            reports.push(self.execute(ticket, now));
        }
        if self.scheduler.is_pending() {
            warn!(passes = reports.len(), "document did not settle");
        }
        reports
    }

    /// Like [`Session::run_pass`], with image classification done on `worker`.
    /// Falls back to inline classification if the worker is gone.
    pub async fn run_pass_with_worker(
        &mut self,
        now: u64,
        worker: &ClassifierWorker,
    ) -> Option<PassReport> {
        if !self.is_active() {
            return None;
        }
        let ticket = self.scheduler.begin_now(now);
        let read = {
            let ctx = PassContext::new(&self.settings, &self.heuristics, self.viewport);
            pipeline::read_phase(&self.document, &ctx)
        };
        let plans = match worker.classify(read.images.clone()).await {
            Ok(plans) => plans,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "worker classification failed, classifying inline");
                images::classify_all(&read.images, &self.settings.heuristics.responsive_sizes)
            }
        };
        let report = pipeline::write_phase(
            &mut self.document,
            &read,
            &plans,
            &mut self.fallbacks,
            &mut self.intersections,
        );
        Some(self.finish_pass(ticket, now, report))
    }

    fn execute(&mut self, ticket: PassTicket, now: u64) -> PassReport {
        let ctx = PassContext::new(&self.settings, &self.heuristics, self.viewport);
        let report = pipeline::run(
            &mut self.document,
            &ctx,
            &mut self.fallbacks,
            &mut self.intersections,
        );
        self.finish_pass(ticket, now, report)
    }

    fn finish_pass(&mut self, ticket: PassTicket, now: u64, mut report: PassReport) -> PassReport {
        match self.deliver_intersections() {
            Ok(n) => report.intersections_delivered = n,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "intersection delivery failed");
                report.failed_rules.push(FailedRule {
                    rule: Rule::Viewport,
                    error: format!("{e:#}"),
                });
            }
        }
        report.revision_after = self.document.revision();
        report.waited_ms = ticket.waited_ms;
        report.timed_out = ticket.timed_out;

        let seen = self.watcher.reset();
        // Our own writes are queued like any other mutation.
        if self.watcher.drain(&mut self.document) {
            self.scheduler.schedule(now);
        }
        self.scheduler.finish(ticket, now);
        debug!(
            mutated = report.mutated(),
            records_before = seen,
            failed = report.failed_rules.len(),
            "pass finished"
        );
        report
    }

    // ── Host events ─────────────────────────────────────────────────────────

    fn deliver_intersections(&mut self) -> Result<usize> {
        let changes = self
            .intersections
            .compute_changes(&self.document, &self.viewport);
        visibility::deliver(&mut self.document, &changes)
    }

    /// The page scrolled or resized. Returns the number of containers whose
    /// render state flipped.
    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<usize> {
        self.viewport = viewport;
        if !self.is_active() {
            return Ok(0);
        }
        self.deliver_intersections()
    }

    /// An image failed to load. Ignored (`None`) while disabled.
    pub fn report_image_error(&mut self, node: NodeId) -> Result<Option<FallbackOutcome>> {
        if !self.is_active() {
            debug!(node = %node, "image error ignored while disabled");
            return Ok(None);
        }
        self.fallbacks.handle_error(&mut self.document, node).map(Some)
    }

    /// The page finished loading. Sends the performance report the first
    /// time; returns whether it was sent.
    pub fn on_load(&mut self, source: &dyn PerformanceSource, sink: &mut dyn ReportSink) -> Result<bool> {
        if self.report_sent {
            return Ok(false);
        }
        let report = perf::collect_report(source);
        debug!(
            paint = report.paint.len(),
            resources = report.resources.len(),
            "sending performance report"
        );
        sink.send(report)?;
        self.report_sent = true;
        Ok(true)
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Direct access for hosts that mutate the page. Changes are picked up
    /// by the next [`Session::notify_mutations`] or [`Session::tick`].
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn scheduler(&self) -> &IdleScheduler {
        &self.scheduler
    }

    pub fn watcher(&self) -> &MutationWatcher {
        &self.watcher
    }

    pub fn intersections(&self) -> &IntersectionRegistry {
        &self.intersections
    }

    pub fn fallbacks(&self) -> &FallbackTable {
        &self.fallbacks
    }
}
