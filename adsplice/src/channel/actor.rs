//! Channel actor.
//!
//! One task per channel owns that channel's [`ChannelState`]. Cues, interval
//! ticks, manual breaks and splice reports all arrive through the mailbox and
//! are applied one at a time, so dedupe and break tracking need no locks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scte35::{CueKind, CueSignal, TierFilter, ValidationContext, ValidationError};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handle::{ActorHandle, ActorMetadata, DEFAULT_MAILBOX_CAPACITY};
use super::messages::{BreakReply, ChannelMessage};
use super::state::{
    AdBreakWindow, BreakPhase, ChannelSnapshot, ChannelState, CueDisposition, DedupeKey,
    EndedBreak, RecordedCue, SkipCause, SpliceProgress, TriggerSource,
};
use crate::config::{ChannelConfig, ChannelKey, IntervalSchedule};
use crate::decision::{DecisionCache, ViewerContext};
use crate::events::{AdEvent, BreakEndReason, EventSink};

/// Outcome of an actor's run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorOutcome {
    /// Stop message received or every handle dropped.
    Stopped,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ChannelActorSettings {
    pub mailbox_capacity: usize,
    /// Allowed skew between a cue's wall-clock start and now.
    pub pdt_window: chrono::Duration,
}

impl Default for ChannelActorSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            pdt_window: chrono::Duration::seconds(scte35::validate::DEFAULT_PDT_WINDOW_SECS),
        }
    }
}

/// Next interval break: when it is due and which schedule slot it fills.
#[derive(Debug, Clone, Copy)]
struct IntervalTimer {
    due: Instant,
    slot: i64,
}

pub struct ChannelActor {
    id: String,
    key: ChannelKey,
    mailbox: mpsc::Receiver<ChannelMessage>,
    state: ChannelState,
    config: Arc<ChannelConfig>,
    decisions: Arc<DecisionCache>,
    events: Arc<dyn EventSink>,
    settings: ChannelActorSettings,
    interval: Option<IntervalTimer>,
    break_deadline: Option<Instant>,
    cancellation_token: CancellationToken,
}

impl ChannelActor {
    pub fn new(
        config: Arc<ChannelConfig>,
        decisions: Arc<DecisionCache>,
        events: Arc<dyn EventSink>,
        settings: ChannelActorSettings,
        cancellation_token: CancellationToken,
    ) -> (Self, ActorHandle<ChannelMessage>) {
        let key = config.key();
        let id = key.to_string();
        let (tx, rx) = mpsc::channel(settings.mailbox_capacity.max(1));
        let handle = ActorHandle::new(
            tx,
            cancellation_token.clone(),
            ActorMetadata::channel(id.clone()),
        );

        let mut actor = Self {
            id,
            key,
            mailbox: rx,
            state: ChannelState::new(),
            config,
            decisions,
            events,
            settings,
            interval: None,
            break_deadline: None,
            cancellation_token,
        };
        actor.schedule_interval(Utc::now(), None);
        (actor, handle)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until stopped or cancelled.
    pub async fn run(mut self) -> ActorOutcome {
        info!("ChannelActor {} starting", self.id);

        loop {
            let interval_timer = Self::create_timer(self.interval.map(|t| t.due));
            let break_timer = Self::create_timer(self.break_deadline);

            tokio::select! {
                biased;

                msg = self.mailbox.recv() => {
                    let Some(msg) = msg else {
                        debug!("ChannelActor {} mailbox closed", self.id);
                        break;
                    };
                    if self.handle_message(msg).await {
                        debug!("ChannelActor {} received stop signal", self.id);
                        break;
                    }
                }

                _ = break_timer => {
                    self.end_break(BreakEndReason::Elapsed);
                }

                _ = interval_timer => {
                    if let Some(timer) = self.interval.take() {
                        self.handle_interval(timer.slot).await;
                        self.schedule_interval(Utc::now(), Some(timer.slot + 1));
                    }
                }

                _ = self.cancellation_token.cancelled() => {
                    info!("ChannelActor {} cancelled", self.id);
                    return ActorOutcome::Cancelled;
                }
            }
        }

        info!("ChannelActor {} stopped gracefully", self.id);
        ActorOutcome::Stopped
    }

    /// Completes at `at`, or never.
    async fn create_timer(at: Option<Instant>) {
        match at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    /// Returns `true` if the actor should stop.
    async fn handle_message(&mut self, msg: ChannelMessage) -> bool {
        match msg {
            ChannelMessage::Cue(signal) => {
                self.handle_cue(signal).await;
                false
            }
            ChannelMessage::IntervalTick => {
                match self.config.auto_insert_interval {
                    Some(schedule) if schedule.interval_secs > 0 => {
                        let slot = Utc::now().timestamp().div_euclid(schedule.interval_secs as i64);
                        self.handle_interval(slot).await;
                    }
                    _ => debug!("ChannelActor {} ignoring tick, no interval configured", self.id),
                }
                false
            }
            ChannelMessage::ManualBreak { seconds, reply } => {
                self.handle_manual_break(seconds, reply).await;
                false
            }
            ChannelMessage::ConfigUpdate(config) => {
                self.handle_config_update(config);
                false
            }
            ChannelMessage::SpliceProgress(progress) => {
                self.handle_splice_progress(progress);
                false
            }
            ChannelMessage::RetireBreak { break_id } => {
                if self.state.retire_ended(&break_id) {
                    debug!("ChannelActor {} retired ended break {}", self.id, break_id);
                }
                false
            }
            ChannelMessage::Snapshot(reply) => {
                self.handle_snapshot(reply);
                false
            }
            ChannelMessage::Stop => {
                info!("ChannelActor {} received Stop", self.id);
                self.end_break(BreakEndReason::Stopped);
                true
            }
        }
    }

    async fn handle_cue(&mut self, signal: CueSignal) {
        let now = Utc::now();
        self.state.prune(now);
        self.events
            .emit(AdEvent::cue_received(&self.key, &signal, now));

        let ctx = ValidationContext::new(now).with_pdt_window(self.settings.pdt_window);
        let report = scte35::validate(&signal, &ctx);
        for warning in &report.warnings {
            warn!(channel = %self.key, signal = signal.id(), ?warning, "Cue validation warning");
        }

        match signal.kind() {
            CueKind::BreakEnd => {
                let disposition = if self.state.phase().is_idle() {
                    CueDisposition::Ignored
                } else {
                    self.end_break(BreakEndReason::Signal);
                    CueDisposition::Ended
                };
                self.record(&signal, now, disposition, report.warnings);
            }
            CueKind::BreakStart => {
                let admitted = if report.is_usable() {
                    self.admit(
                        TriggerSource::Cue,
                        DedupeKey::for_signal(&signal),
                        signal.tier(),
                    )
                } else {
                    Err(SkipCause::Invalid {
                        errors: report.errors.clone(),
                    })
                };

                match admitted {
                    Ok(dedupe_key) => {
                        let window = AdBreakWindow {
                            id: signal.id().to_string(),
                            trigger: TriggerSource::Cue,
                            start_pdt: signal.start_pdt().unwrap_or(now),
                            duration_secs: signal.duration_seconds().unwrap_or_default(),
                            dedupe_key: dedupe_key.clone(),
                            signal_id: Some(signal.id().to_string()),
                            event_id: signal.event_id(),
                        };
                        self.state.mark_seen(dedupe_key, now);
                        // Recorded before the decision call so a slow
                        // decision never loses the cue.
                        self.record(
                            &signal,
                            now,
                            CueDisposition::Triggered {
                                break_id: window.id.clone(),
                            },
                            report.warnings,
                        );
                        self.start_break(window).await;
                    }
                    Err(cause) => {
                        self.skip(TriggerSource::Cue, Some(signal.id().to_string()), &cause);
                        self.record(&signal, now, CueDisposition::Skipped(cause), report.warnings);
                    }
                }
            }
            CueKind::Continuation | CueKind::Other => {
                self.record(&signal, now, CueDisposition::Ignored, report.warnings);
            }
        }
    }

    async fn handle_interval(&mut self, slot: i64) {
        let Some(schedule) = self.config.auto_insert_interval else {
            return;
        };
        let now = Utc::now();
        self.state.prune(now);
        let key = DedupeKey::interval(slot);
        let admitted = if schedule.break_secs > 0.0 {
            self.admit(TriggerSource::Interval, key, None)
        } else {
            Err(SkipCause::Invalid {
                errors: vec![ValidationError::ZeroBreakDuration],
            })
        };

        match admitted {
            Ok(key) => {
                self.state.mark_seen(key.clone(), now);
                self.start_break(AdBreakWindow {
                    id: format!("interval-{slot}"),
                    trigger: TriggerSource::Interval,
                    start_pdt: now,
                    duration_secs: schedule.break_secs,
                    dedupe_key: key,
                    signal_id: None,
                    event_id: None,
                })
                .await;
            }
            Err(cause) => self.skip(TriggerSource::Interval, None, &cause),
        }
    }

    async fn handle_manual_break(&mut self, seconds: f64, reply: Option<BreakReply>) {
        let now = Utc::now();
        self.state.prune(now);
        let key = DedupeKey::manual(now);
        let admitted = if seconds.is_finite() && seconds > 0.0 {
            self.admit(TriggerSource::Manual, key, None)
        } else {
            Err(SkipCause::Invalid {
                errors: vec![ValidationError::ZeroBreakDuration],
            })
        };

        let result = match admitted {
            Ok(key) => {
                self.state.mark_seen(key.clone(), now);
                let window = AdBreakWindow {
                    id: format!("manual-{}", now.timestamp_millis()),
                    trigger: TriggerSource::Manual,
                    start_pdt: now,
                    duration_secs: seconds,
                    dedupe_key: key,
                    signal_id: None,
                    event_id: None,
                };
                self.start_break(window.clone()).await;
                Ok(window)
            }
            Err(cause) => {
                self.skip(TriggerSource::Manual, None, &cause);
                Err(cause)
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    /// Gate a break start. Returns the dedupe key to mark on success.
    fn admit(
        &mut self,
        trigger: TriggerSource,
        key: DedupeKey,
        signal_tier: Option<u16>,
    ) -> Result<DedupeKey, SkipCause> {
        if trigger == TriggerSource::Cue && !self.config.auto_insert_cue {
            return Err(SkipCause::TriggerDisabled { trigger });
        }
        if trigger == TriggerSource::Cue && !TierFilter::accepts(self.config.tier, signal_tier) {
            return Err(SkipCause::TierMismatch {
                channel_tier: self.config.tier,
                signal_tier,
            });
        }
        if self.state.is_seen(&key) {
            return Err(SkipCause::Duplicate { key });
        }
        if !self.state.phase().is_idle() {
            return Err(SkipCause::BreakInProgress);
        }
        Ok(key)
    }

    async fn start_break(&mut self, window: AdBreakWindow) {
        self.state.set_phase(BreakPhase::BreakPending {
            window: window.clone(),
        });

        let resolved = self
            .decisions
            .resolve(&self.config, window.duration_secs, &ViewerContext::anonymous())
            .await;

        if resolved.timed_out {
            self.events.emit(AdEvent::DecisionTimeout {
                channel: self.key.clone(),
                break_id: window.id.clone(),
                timeout_ms: self.decisions.timeout().as_millis() as u64,
            });
        }

        info!(
            "ChannelActor {} break {} started: {:.3}s via {}, asset {}{}",
            self.id,
            window.id,
            window.duration_secs,
            window.trigger.as_str(),
            resolved.decision.asset_id,
            if resolved.decision.filler { " (filler)" } else { "" }
        );
        self.events.emit(AdEvent::BreakStarted {
            channel: self.key.clone(),
            break_id: window.id.clone(),
            trigger: window.trigger,
            start_pdt: window.start_pdt,
            duration_secs: window.duration_secs,
            asset_id: resolved.decision.asset_id.clone(),
            filler: resolved.decision.filler,
            cache_hit: resolved.cache_hit,
            event_id: window.event_id,
        });

        let remaining = (window.end() - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.break_deadline = Some(Instant::now() + remaining);
        self.state.set_phase(BreakPhase::BreakActive {
            window,
            decision: resolved.decision,
            decision_timed_out: resolved.timed_out,
        });
    }

    fn end_break(&mut self, reason: BreakEndReason) {
        self.break_deadline = None;
        let phase = self.state.take_phase();
        if let Some(window) = phase.window() {
            info!(
                "ChannelActor {} break {} ended ({:?})",
                self.id, window.id, reason
            );
            self.events.emit(AdEvent::BreakEnded {
                channel: self.key.clone(),
                break_id: window.id.clone(),
                reason,
            });
        }
        if let BreakPhase::BreakActive {
            window, decision, ..
        } = phase
        {
            self.state.keep_ended(EndedBreak { window, decision });
        }
    }

    fn skip(&self, trigger: TriggerSource, signal_id: Option<String>, cause: &SkipCause) {
        match cause {
            SkipCause::Duplicate { key } => {
                debug!("ChannelActor {} duplicate {} skipped", self.id, key)
            }
            other => info!(
                "ChannelActor {} {} break skipped: {}",
                self.id,
                trigger.as_str(),
                other.as_str()
            ),
        }
        self.events.emit(AdEvent::BreakSkipped {
            channel: self.key.clone(),
            trigger,
            signal_id,
            cause: cause.clone(),
        });
    }

    fn record(
        &mut self,
        signal: &CueSignal,
        now: DateTime<Utc>,
        disposition: CueDisposition,
        warnings: Vec<scte35::ValidationWarning>,
    ) {
        self.state
            .record(RecordedCue::new(signal, now, disposition, warnings));
    }

    fn handle_config_update(&mut self, config: Arc<ChannelConfig>) {
        debug!("ChannelActor {} received ConfigUpdate", self.id);
        let old = std::mem::replace(&mut self.config, config);

        if old.tier != self.config.tier {
            info!(
                "ChannelActor {} tier changed: {} -> {}",
                self.id, old.tier, self.config.tier
            );
        }
        if old.auto_insert_interval != self.config.auto_insert_interval {
            info!(
                "ChannelActor {} interval changed: {:?} -> {:?}",
                self.id, old.auto_insert_interval, self.config.auto_insert_interval
            );
            self.schedule_interval(Utc::now(), None);
        }
    }

    fn handle_splice_progress(&mut self, progress: SpliceProgress) {
        if matches!(self.state.phase(), BreakPhase::BreakActive { .. }) {
            self.state.set_last_splice(progress);
        }
    }

    fn handle_snapshot(&self, reply: oneshot::Sender<ChannelSnapshot>) {
        let _ = reply.send(self.state.snapshot(&self.key, Utc::now()));
    }

    /// Arm the timer for the next interval slot boundary after `now`, but no
    /// earlier than `min_slot`.
    fn schedule_interval(&mut self, now: DateTime<Utc>, min_slot: Option<i64>) {
        self.interval = match self.config.auto_insert_interval {
            Some(IntervalSchedule { interval_secs, .. }) if interval_secs > 0 => {
                let interval = interval_secs as i64;
                let slot = (now.timestamp().div_euclid(interval) + 1).max(min_slot.unwrap_or(i64::MIN));
                let boundary_millis = slot * interval * 1000;
                let wait_millis = (boundary_millis - now.timestamp_millis()).max(0) as u64;
                Some(IntervalTimer {
                    due: Instant::now() + Duration::from_millis(wait_millis),
                    slot,
                })
            }
            _ => None,
        };
    }
}
