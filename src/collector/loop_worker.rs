use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::{
    browser::{bounded, dom, BrowserError, BrowserResult, BrowserSession},
    db::{NewRound, RoundSink, RoundSource},
    extraction::{extract_event, extract_from_text},
};

use super::instrumentation::{self, CapturedEvent};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// DOM locations that render the current result, most specific first.
pub const DOM_SELECTORS: &[&str] = &[
    ".crash-multiplier",
    ".multiplier",
    r#"[data-testid="multiplier"]"#,
    ".game-multiplier",
    ".payout",
    ".bubble-multiplier",
];

const ERROR_PAUSE: Duration = Duration::from_millis(500);
const MAX_RAW_DOM_CHARS: usize = 256;

/// Per-lifecycle collector state. Dropped with the browser.
#[derive(Debug, Default)]
pub struct RunState {
    pub hooks_registered: bool,
    pub hooks_installed: bool,
    pub dom: DomDeduper,
    pub events_drained: u64,
    pub rounds_written: u64,
    pub write_failures: u64,
}

/// Suppresses repeat DOM emissions while the displayed value is unchanged.
#[derive(Debug, Default)]
pub struct DomDeduper {
    last: Option<f64>,
}

impl DomDeduper {
    pub fn is_new(&self, value: f64) -> bool {
        self.last != Some(value)
    }

    pub fn record(&mut self, value: f64) {
        self.last = Some(value);
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }
}

/// Knobs for one polling lifecycle.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub call_timeout: Duration,
    pub room: Option<String>,
    pub keep_unparsed: bool,
}

/// What one tick did. `transient_errors` counts caught page-level failures.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub events: usize,
    pub written: usize,
    pub dom_written: bool,
    pub transient_errors: usize,
}

/// Polls until the browser is lost. Returns the fatal error that ended it.
pub async fn polling_loop(
    page: &dyn BrowserSession,
    sink: &dyn RoundSink,
    settings: &PollSettings,
    run: &mut RunState,
) -> BrowserError {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let tick_start = Instant::now();

        match poll_once(page, sink, settings, run).await {
            Ok(report) => {
                if report.written > 0 {
                    log_info!(
                        "tick: {} events, {} rounds written (dom={}) in {}ms",
                        report.events,
                        report.written,
                        report.dom_written,
                        tick_start.elapsed().as_millis()
                    );
                }
                if report.transient_errors > 0 {
                    tokio::time::sleep(ERROR_PAUSE).await;
                }
            }
            Err(err) => {
                log_error!(
                    "polling stopped after {} rounds written: {err}",
                    run.rounds_written
                );
                return err;
            }
        }
    }
}

/// One poll tick: drain hooks, then read the DOM fallback.
///
/// Only fatal browser errors are returned; anything else is logged and
/// counted in the report.
pub async fn poll_once(
    page: &dyn BrowserSession,
    sink: &dyn RoundSink,
    settings: &PollSettings,
    run: &mut RunState,
) -> BrowserResult<PollReport> {
    let mut report = PollReport::default();

    match bounded("drain events", settings.call_timeout, instrumentation::drain(page)).await {
        Ok(events) => {
            report.events = events.len();
            run.events_drained += events.len() as u64;
            for event in events {
                if persist_event(sink, settings, run, event).await {
                    report.written += 1;
                }
            }
        }
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            log_warn!("event drain failed: {err}");
            report.transient_errors += 1;
        }
    }

    match bounded(
        "read dom",
        settings.call_timeout,
        dom::first_visible_text(page, DOM_SELECTORS),
    )
    .await
    {
        Ok(Some(visible)) => {
            if let Some(candidate) = extract_from_text(&visible.text) {
                if run.dom.is_new(candidate.value) {
                    let raw: String = visible.text.chars().take(MAX_RAW_DOM_CHARS).collect();
                    let round = NewRound::new(RoundSource::Dom)
                        .with_value(Some(candidate.value))
                        .with_raw(format!("dom:{raw}"))
                        .with_room(settings.room.clone());
                    if write(sink, run, round).await {
                        // Only remember values that made it to the store.
                        run.dom.record(candidate.value);
                        report.written += 1;
                        report.dom_written = true;
                    }
                }
            }
        }
        Ok(None) => {}
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            log_warn!("dom read failed: {err}");
            report.transient_errors += 1;
        }
    }

    Ok(report)
}

async fn persist_event(
    sink: &dyn RoundSink,
    settings: &PollSettings,
    run: &mut RunState,
    event: CapturedEvent,
) -> bool {
    let candidate = extract_event(event.parsed.as_ref(), &event.raw);
    let round = match candidate {
        Some(candidate) => NewRound::new(RoundSource::from_tag(&event.source))
            .with_value(Some(candidate.value))
            .with_round_id(candidate.round_id),
        None if settings.keep_unparsed => NewRound::new(RoundSource::from_tag(&event.source)),
        None => return false,
    };
    let round = round.with_raw(event.raw).with_room(settings.room.clone());
    write(sink, run, round).await
}

async fn write(sink: &dyn RoundSink, run: &mut RunState, round: NewRound) -> bool {
    match sink.append(round).await {
        Ok(record) => {
            run.rounds_written += 1;
            log::debug!(
                "stored round #{} value={:?} source={}",
                record.id,
                record.value,
                record.source.as_str()
            );
            true
        }
        Err(err) => {
            run.write_failures += 1;
            log_error!("dropping round after store failure: {err:#}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduper_only_flags_changes() {
        let mut dedup = DomDeduper::default();
        assert!(dedup.is_new(1.5));
        dedup.record(1.5);
        assert!(!dedup.is_new(1.5));
        assert!(dedup.is_new(2.0));
        dedup.record(2.0);
        assert_eq!(dedup.last(), Some(2.0));
    }
}
