// mihub - Xiaomi gateway bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Push ingestion
//!
//! Routes unsolicited device reports to the handlers registered under the
//! reporting device's sid and notifies the host of every handler whose state
//! changed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, trace};

use crate::client::{DeviceData, PushEvent, PushHandler};
use crate::error::ParseError;
use crate::host::Host;
use crate::registry::GatewayRegistry;

/// What one push did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReport {
    /// Handlers the push was applied to
    pub handlers: usize,
    /// State change notifications sent to the host
    pub notifications: usize,
    /// Device events sent to the host
    pub events: usize,
    /// Parse failures, one entry per failing parser
    pub errors: Vec<ParseError>,
}

/// Running totals over every push the pipeline saw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub pushes: u64,
    /// Pushes that reached no handler
    pub unrouted: u64,
    pub notifications: u64,
    pub events: u64,
    pub parse_errors: u64,
}

impl IngestionStats {
    /// Work done between `earlier` and `self`
    pub fn since(&self, earlier: &IngestionStats) -> IngestionStats {
        IngestionStats {
            pushes: self.pushes.saturating_sub(earlier.pushes),
            unrouted: self.unrouted.saturating_sub(earlier.unrouted),
            notifications: self.notifications.saturating_sub(earlier.notifications),
            events: self.events.saturating_sub(earlier.events),
            parse_errors: self.parse_errors.saturating_sub(earlier.parse_errors),
        }
    }
}

#[derive(Default)]
struct Counters {
    pushes: AtomicU64,
    unrouted: AtomicU64,
    notifications: AtomicU64,
    events: AtomicU64,
    parse_errors: AtomicU64,
}

impl Counters {
    fn record(&self, report: &PushReport) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
        if report.handlers == 0 {
            self.unrouted.fetch_add(1, Ordering::Relaxed);
        }
        self.notifications
            .fetch_add(report.notifications as u64, Ordering::Relaxed);
        self.events.fetch_add(report.events as u64, Ordering::Relaxed);
        self.parse_errors
            .fetch_add(report.errors.len() as u64, Ordering::Relaxed);
    }
}

/// Applies push events to device handlers
pub struct IngestionPipeline {
    registry: Arc<GatewayRegistry>,
    host: Arc<dyn Host>,
    counters: Counters,
}

impl IngestionPipeline {
    pub fn new(registry: Arc<GatewayRegistry>, host: Arc<dyn Host>) -> Self {
        Self {
            registry,
            host,
            counters: Counters::default(),
        }
    }

    /// Apply one report to every handler of `device_sid` on `gateway_sid`
    ///
    /// Handlers run in registration order. A parse error is logged and only
    /// affects the handler it occurred in.
    pub fn on_push(&self, gateway_sid: &str, device_sid: &str, data: &DeviceData) -> PushReport {
        let report = self.route(gateway_sid, device_sid, data);
        self.counters.record(&report);
        report
    }

    fn route(&self, gateway_sid: &str, device_sid: &str, data: &DeviceData) -> PushReport {
        let mut report = PushReport::default();

        let connection = match self.registry.find(gateway_sid) {
            Ok(connection) => connection,
            Err(e) => {
                debug!("Dropping push for {}: {}", device_sid, e);
                return report;
            }
        };

        for device in connection.handlers_for(device_sid) {
            report.handlers += 1;

            let ingest = device.ingest(data);
            for e in &ingest.errors {
                error!("Failed to parse report for {}: {}", device.name(), e);
            }
            report.errors.extend(ingest.errors);

            if let Some(snapshot) = ingest.changed {
                trace!("{} changed: {}", snapshot.name, snapshot.state);
                self.host.state_changed(&snapshot);
                report.notifications += 1;
            }

            if let Some(event) = device.event_for(data) {
                self.host.device_event(&event);
                report.events += 1;
            }
        }

        if report.handlers == 0 {
            trace!("No handler for device {} on {}", device_sid, gateway_sid);
        }

        report
    }

    pub fn registry(&self) -> &Arc<GatewayRegistry> {
        &self.registry
    }

    /// Totals since the pipeline was created
    pub fn stats(&self) -> IngestionStats {
        let c = &self.counters;
        IngestionStats {
            pushes: c.pushes.load(Ordering::Relaxed),
            unrouted: c.unrouted.load(Ordering::Relaxed),
            notifications: c.notifications.load(Ordering::Relaxed),
            events: c.events.load(Ordering::Relaxed),
            parse_errors: c.parse_errors.load(Ordering::Relaxed),
        }
    }
}

impl PushHandler for IngestionPipeline {
    fn handle_push(&self, event: &PushEvent) {
        self.on_push(&event.gateway_sid, &event.sid, &event.data);
    }
}

impl fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("gateways", &self.registry.len())
            .finish()
    }
}
