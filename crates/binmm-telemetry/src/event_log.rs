//! Structured event log.
//!
//! One JSON object per line, one line per tick, fill, exit action, order
//! outcome, reconciliation mismatch or safety event. Written for operators
//! and post-hoc reconstruction; the core never reads it back.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use binmm_core::{Fill, InstrumentId, OrderRole, OrderSide, Price, Size};

use crate::error::{TelemetryError, TelemetryResult};

/// A loggable event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Tick {
        tick: u64,
        killed: bool,
        positions: usize,
        active_orders: usize,
        active_exits: usize,
        duration_ms: u64,
    },
    Fill {
        fill: Fill,
    },
    Exit {
        instrument: InstrumentId,
        action: String,
        mode: String,
        price: Option<Price>,
        size: Option<Size>,
        reason: Option<String>,
    },
    Order {
        instrument: InstrumentId,
        side: OrderSide,
        role: OrderRole,
        outcome: String,
        price: Price,
        size: Size,
        reason: Option<String>,
    },
    Reconcile {
        instrument: InstrumentId,
        belief: Size,
        authoritative: Size,
    },
    Safety {
        kind: String,
        detail: String,
    },
}

#[derive(Serialize)]
struct Record<'a> {
    ts_ms: u64,
    #[serde(flatten)]
    event: &'a Event,
}

/// Destination for events.
pub trait EventSink: Send + Sync {
    fn record(&self, ts_ms: u64, event: Event);
}

/// Append-only JSON-lines file.
pub struct JsonlEventLog {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlEventLog {
    /// Open (or create) the log file for appending.
    pub fn open(path: impl AsRef<Path>) -> TelemetryResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn write_line(&self, ts_ms: u64, event: &Event) -> TelemetryResult<()> {
        let line = serde_json::to_string(&Record { ts_ms, event })
            .map_err(|e| TelemetryError::EventLog(e.to_string()))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

impl EventSink for JsonlEventLog {
    fn record(&self, ts_ms: u64, event: Event) {
        if let Err(e) = self.write_line(ts_ms, &event) {
            warn!(error = %e, "Failed to write event log record");
        }
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&self, _ts_ms: u64, _event: Event) {}
}

/// Keeps events in memory (tests and diagnostics).
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<(u64, Event)>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(u64, Event)> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, ts_ms: u64, event: Event) {
        self.events.lock().push((ts_ms, event));
    }
}
