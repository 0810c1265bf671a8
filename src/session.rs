/// One tailing session per remote resource.
///
/// A tick walks the phases
/// `Probing → (Unchanged | Fetching → Framing → Persisting)`, or ends in
/// `Backoff` after a connection failure / `Skipped` after an unexpected
/// status. Errors never leave a tick; the caller only sees a `TickOutcome`.

use crate::checkpoint::CheckpointStore;
use crate::config::StartPosition;
use crate::error::{ConfigError, FetchError};
use crate::framer::{self, FetchWindow};
use crate::sink::{Record, Sink};
use crate::transport::Transport;

use std::sync::Arc;
use std::time::Duration;

/// Values resolved once at startup and copied into every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poll_interval: Duration,
    pub max_window_bytes: u64,
    pub emit_unterminated_tail: bool,
    pub host: String,
}

/// What a tick did, and so how long the scheduler waits before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Size equals offset, nothing fetched.
    Unchanged,
    /// A window was framed and the offset persisted (or at least advanced).
    Advanced {
        emitted: usize,
        offset: u64,
        /// The window was capped and progress was made, so more data is
        /// already waiting.
        more_pending: bool,
    },
    /// Unexpected status; offset untouched, retry on the next interval.
    Skipped,
    /// Connection failure; retry after the fixed delay.
    Backoff(Duration),
}

#[derive(Debug)]
enum Phase {
    Probing,
    Unchanged,
    Fetching { start: u64, end: u64, total: u64 },
    Framing(FetchWindow),
    Persisting { offset: u64, emitted: usize, more_pending: bool },
    Skipped,
    Backoff(Duration),
}

/// A line longer than one window, shipped piece by piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SplitLine {
    start: u64,
    pieces: u32,
}

pub struct TailSession {
    locator: String,
    /// Bytes consumed so far; only the Persisting phase moves it forward.
    offset: u64,
    split_line: Option<SplitLine>,
    settings: SessionSettings,
    transport: Arc<dyn Transport>,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Box<dyn Sink>,
}

impl TailSession {
    /// Probe the resource and seed the offset from its checkpoint, or from
    /// `start_position` when none exists yet (creating the checkpoint).
    pub fn start(
        locator: String,
        start_position: StartPosition,
        settings: SessionSettings,
        transport: Arc<dyn Transport>,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Box<dyn Sink>,
    ) -> Result<Self, ConfigError> {
        let size = transport
            .probe_size(&locator)
            .map_err(|e| ConfigError::Startup {
                locator: locator.clone(),
                reason: e.to_string(),
            })?;

        let offset = match checkpoints.load(&locator)? {
            Some(saved) => {
                log::info!("{locator}: resuming at checkpoint offset {saved} (size {size})");
                saved
            }
            None => {
                let initial = match start_position {
                    StartPosition::Beginning => 0,
                    StartPosition::End => size,
                };
                checkpoints.save(&locator, initial)?;
                log::info!("{locator}: no checkpoint, starting at {start_position} (offset {initial})");
                initial
            }
        };

        Ok(Self {
            locator,
            offset,
            split_line: None,
            settings,
            transport,
            checkpoints,
            sink,
        })
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    /// Run one poll: probe, fetch, frame, emit, persist.
    pub fn tick(&mut self) -> TickOutcome {
        let mut phase = Phase::Probing;
        loop {
            phase = match phase {
                Phase::Probing => self.probe(),
                Phase::Fetching { start, end, total } => self.fetch(start, end, total),
                Phase::Framing(window) => self.frame(window),
                Phase::Persisting {
                    offset,
                    emitted,
                    more_pending,
                } => {
                    self.persist(offset);
                    return TickOutcome::Advanced {
                        emitted,
                        offset,
                        more_pending,
                    };
                }
                Phase::Unchanged => return TickOutcome::Unchanged,
                Phase::Skipped => return TickOutcome::Skipped,
                Phase::Backoff(delay) => return TickOutcome::Backoff(delay),
            };
        }
    }

    fn probe(&mut self) -> Phase {
        let total = match self.transport.probe_size(&self.locator) {
            Ok(total) => total,
            Err(e) => return self.failed("size probe", e),
        };
        log::debug!("{}: size={total} offset={}", self.locator, self.offset);

        if total < self.offset {
            log::warn!(
                "{}: shrank from {} to {total} bytes, assuming rotation; re-reading from 0",
                self.locator,
                self.offset
            );
            self.offset = 0;
            self.split_line = None;
            if total == 0 {
                return Phase::Persisting {
                    offset: 0,
                    emitted: 0,
                    more_pending: false,
                };
            }
        }

        if total == self.offset {
            return Phase::Unchanged;
        }

        let end = total.min(self.offset.saturating_add(self.settings.max_window_bytes));
        Phase::Fetching {
            start: self.offset,
            end,
            total,
        }
    }

    fn fetch(&mut self, start: u64, end: u64, total: u64) -> Phase {
        match self.transport.fetch_range(&self.locator, start, end) {
            Ok(body) => {
                let mut bytes = body.bytes;
                bytes.truncate((end - start) as usize);
                let window = FetchWindow::new(start, bytes, total, self.settings.max_window_bytes);
                log::debug!(
                    "{}: fetched [{start}, {}) of {total} bytes (reported length {:?})",
                    self.locator,
                    window.end,
                    body.reported_length
                );
                Phase::Framing(window)
            }
            Err(e) => self.failed("range fetch", e),
        }
    }

    fn frame(&mut self, window: FetchWindow) -> Phase {
        let framed = framer::frame(&window, self.settings.emit_unterminated_tail);
        if let Some(split) = self.track_split(&window, &framed) {
            log::warn!(
                "{}: line at offset {} was longer than max_request_bytes ({}) and went out as {} records",
                self.locator,
                split.start,
                self.settings.max_window_bytes,
                split.pieces
            );
        }

        let offset = framed.next_offset(&window);
        let emitted = framed.lines.len();
        for line in framed.lines {
            self.sink
                .emit(Record::new(line, &self.settings.host, &self.locator));
        }

        Phase::Persisting {
            offset,
            emitted,
            more_pending: window.truncated_tail && offset > window.start,
        }
    }

    /// Count the pieces of an oversized line. Returns the finished split once
    /// the window holding the rest of the line has been framed.
    fn track_split(&mut self, window: &FetchWindow, framed: &framer::Framed) -> Option<SplitLine> {
        if framed.oversized {
            let split = self.split_line.get_or_insert(SplitLine {
                start: window.start,
                pieces: 0,
            });
            split.pieces += 1;
            log::warn!(
                "{}: line at offset {} is longer than max_request_bytes ({}), emitted piece {}",
                self.locator,
                split.start,
                self.settings.max_window_bytes,
                split.pieces
            );
            return None;
        }
        if framed.consumed == 0 {
            return None;
        }
        let mut split = self.split_line.take()?;
        // The remainder is a piece of its own unless the cut fell right on the terminator.
        if !(window.bytes.starts_with(b"\n") || window.bytes.starts_with(b"\r\n")) {
            split.pieces += 1;
        }
        Some(split)
    }

    fn persist(&mut self, offset: u64) {
        self.offset = offset;
        if let Err(e) = self.checkpoints.save(&self.locator, offset) {
            log::error!(
                "{}: {e}; offset {offset} kept in memory, next save will catch up",
                self.locator
            );
        }
    }

    fn failed(&self, step: &str, err: FetchError) -> Phase {
        if err.is_unreachable() {
            log::error!(
                "{}: {step} failed: {err}. Retrying in {}s",
                self.locator,
                self.settings.poll_interval.as_secs()
            );
            Phase::Backoff(self.settings.poll_interval)
        } else {
            log::warn!("{}: {step} failed: {err}. Skipping this poll", self.locator);
            Phase::Skipped
        }
    }
}

// ── Test doubles ────────────────────────────────────────────────────
