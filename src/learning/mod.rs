//! Learning feedback controller
//!
//! Consumes analyst accept/reject events on a fixed interval and adapts the
//! extraction confidence threshold: a high acceptance rate means the model
//! is judged too conservative and the threshold drops; a low rate raises
//! it; in between, the threshold nudges proportionally toward a target
//! rate. Every adjustment is bounded per cycle and the threshold stays
//! clamped inside (0, 1).
//!
//! The controller is the only writer of [`HeuristicsState`]; overlapping
//! cycles are prevented by a single-flight guard. The append-only event
//! log is the sole channel back to the prompt composer — enrichment is
//! harvested from events here, never by calling the composer.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{HeuristicsState, LearningEvent, ThresholdAdjustment};
use crate::prompt::{EnrichmentContext, EnrichmentExample};
use crate::storage::{HeuristicsStore, LearningStore};

// ============================================================================
// Configuration
// ============================================================================

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Accept rate above which the threshold is lowered
    pub high_water_mark: f64,

    /// Accept rate below which the threshold is raised
    pub low_water_mark: f64,

    /// Target accept rate for proportional nudging between the marks
    pub target_accept_rate: f64,

    /// Maximum threshold movement per cycle
    pub step_cap: f64,

    /// Gain applied to the (target - rate) error for the nudge
    pub proportional_gain: f64,

    /// Hard clamp for the threshold, inside [0, 1]
    pub min_threshold: f64,
    pub max_threshold: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            high_water_mark: 0.85,
            low_water_mark: 0.50,
            target_accept_rate: 0.75,
            step_cap: 0.05,
            proportional_gain: 0.2,
            min_threshold: 0.30,
            max_threshold: 0.95,
        }
    }
}

impl LearningConfig {
    pub fn validate(&self) -> Result<()> {
        if self.low_water_mark >= self.high_water_mark {
            anyhow::bail!("low_water_mark must be below high_water_mark");
        }
        if !(0.0..=1.0).contains(&self.min_threshold)
            || !(0.0..=1.0).contains(&self.max_threshold)
            || self.min_threshold >= self.max_threshold
        {
            anyhow::bail!("threshold clamp must satisfy 0 <= min < max <= 1");
        }
        if self.step_cap <= 0.0 {
            anyhow::bail!("step_cap must be positive");
        }
        Ok(())
    }
}

// ============================================================================
// Cycle Outcome
// ============================================================================

/// Result of one learning cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// False when the cycle was skipped (overlap, or no events in window)
    pub adjusted: bool,

    pub events_seen: usize,
    pub accept_rate: Option<f64>,
    pub old_threshold: f64,
    pub new_threshold: f64,
}

// ============================================================================
// Controller
// ============================================================================

/// Learning feedback controller over the event log and heuristics store
pub struct FeedbackController<'a, S>
where
    S: LearningStore + HeuristicsStore,
{
    store: &'a S,
    config: LearningConfig,
    /// Single-flight guard: cycles never overlap
    cycle_lock: Mutex<()>,
}

impl<'a, S> FeedbackController<'a, S>
where
    S: LearningStore + HeuristicsStore,
{
    pub fn new(store: &'a S, config: LearningConfig) -> Self {
        Self {
            store,
            config,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run one learning cycle.
    ///
    /// Reads events since the last cycle boundary, computes the acceptance
    /// rate, adjusts the threshold, and persists the state. Statistics
    /// persistence is best-effort and cannot abort the threshold write. If
    /// another cycle is already in flight this one is skipped.
    pub fn run_cycle(&self) -> Result<CycleOutcome> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("learning cycle already in flight, skipping");
            let state = HeuristicsStore::load(self.store)?;
            return Ok(skipped(&state, 0));
        };

        let mut state = HeuristicsStore::load(self.store)?;
        let since = cycle_boundary(&state);
        let events = self.store.events_since(since)?;

        if events.is_empty() {
            debug!("no learning events since last cycle, skipping adjustment");
            return Ok(skipped(&state, 0));
        }

        let total = events.len();
        let accepted = events.iter().filter(|e| e.approved).count();
        // events is non-empty, so the rate is well-defined
        let accept_rate = accepted as f64 / total as f64;

        let old = state.confidence_threshold;
        let (delta, reason) = self.proposed_delta(accept_rate);
        let new = (old + delta).clamp(self.config.min_threshold, self.config.max_threshold);

        let now = Utc::now();
        state.record_adjustment(ThresholdAdjustment {
            old_value: old,
            new_value: new,
            accept_rate,
            reason: reason.clone(),
            adjusted_at: now,
        });
        self.store.save(&state)?;

        info!(
            accept_rate,
            old_threshold = old,
            new_threshold = new,
            events = total,
            reason,
            "learning cycle adjusted confidence threshold"
        );

        // Best-effort observability; never aborts the adjustment above
        if let Err(e) = self.store.save_cycle_stats(now, accept_rate, total) {
            warn!(error = %e, "failed to persist cycle statistics");
        }

        Ok(CycleOutcome {
            adjusted: true,
            events_seen: total,
            accept_rate: Some(accept_rate),
            old_threshold: old,
            new_threshold: new,
        })
    }

    /// Run cycles on a fixed interval until the task is dropped
    pub async fn run_on_interval(&self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_cycle() {
                warn!(error = %e, "learning cycle failed");
            }
        }
    }

    /// Bounded threshold movement for a given acceptance rate
    fn proposed_delta(&self, accept_rate: f64) -> (f64, String) {
        let cap = self.config.step_cap;

        if accept_rate > self.config.high_water_mark {
            (
                -cap,
                format!("accept rate {accept_rate:.2} above high-water mark"),
            )
        } else if accept_rate < self.config.low_water_mark {
            (
                cap,
                format!("accept rate {accept_rate:.2} below low-water mark"),
            )
        } else {
            let error = self.config.target_accept_rate - accept_rate;
            let nudge = (error * self.config.proportional_gain).clamp(-cap, cap);
            (
                nudge,
                format!("proportional nudge toward target rate {:.2}", self.config.target_accept_rate),
            )
        }
    }
}

/// Boundary for the event window: the last adjustment time, or the epoch on
/// the first ever cycle so no early events are missed
fn cycle_boundary(state: &HeuristicsState) -> DateTime<Utc> {
    if state.adjustment_history.is_empty() {
        DateTime::UNIX_EPOCH
    } else {
        state.last_updated
    }
}

fn skipped(state: &HeuristicsState, events: usize) -> CycleOutcome {
    CycleOutcome {
        adjusted: false,
        events_seen: events,
        accept_rate: None,
        old_threshold: state.confidence_threshold,
        new_threshold: state.confidence_threshold,
    }
}

// ============================================================================
// Enrichment Harvesting
// ============================================================================

/// Maximum raw events examined when harvesting enrichment
pub const ENRICHMENT_EVENT_WINDOW: usize = 100;

/// Build enrichment context from recent learning events.
///
/// Approved events contribute vulnerability/OFC example pairs; their
/// sector and discipline fields accumulate into themes. The composer
/// bounds how much of this reaches a prompt.
pub fn harvest_enrichment(events: &[LearningEvent]) -> EnrichmentContext {
    let mut context = EnrichmentContext::default();

    for event in events.iter().filter(|e| e.approved) {
        let metadata = &event.metadata;

        if let Some(vulnerability) = metadata.get("vulnerability").and_then(|v| v.as_str()) {
            let ofc = metadata
                .get("ofc")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            context.examples.push(EnrichmentExample {
                vulnerability: vulnerability.to_string(),
                ofc: ofc.to_string(),
            });
        }

        for key in ["discipline", "sector"] {
            if let Some(theme) = metadata.get(key).and_then(|v| v.as_str()) {
                if !context.themes.iter().any(|t| t == theme) {
                    context.themes.push(theme.to_string());
                }
            }
        }
    }

    context
}
