//! Idle/proactive scheduler.
//!
//! A coarse periodic tick that notices when the student has been drawing in
//! silence and nudges the orchestrator to review the board. The decision
//! itself is a pure function over session timestamps so it can be tested
//! without a clock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::TutorSession;

use super::TurnTrigger;
use super::barge::BargeController;

/// Tick period for the idle check.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Conditions for a proactive board check, all required:
/// the session is live, the tutor asked the student to show work, a snapshot
/// arrived since the last check, neither party has spoken for the silence
/// threshold, and checks are spaced by the minimum interval.
pub fn should_fire(
    session: &TutorSession,
    now: Instant,
    silence_threshold: Duration,
    min_interval: Duration,
) -> bool {
    session.is_active
        && session.wait_for_student
        && session.snapshot_since_proactive
        && session.last_snapshot.is_some()
        && now.duration_since(session.last_interaction) >= silence_threshold
        && session
            .last_proactive_at
            .is_none_or(|at| now.duration_since(at) >= min_interval)
}

/// Periodic task owned by the session; exits when the session token fires.
pub async fn run(
    session: Arc<Mutex<TutorSession>>,
    barge: Arc<BargeController>,
    triggers: mpsc::Sender<TurnTrigger>,
    silence_threshold: Duration,
    min_interval: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(TICK_PERIOD);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {}
        }

        // A turn in flight means the conversation is moving; stay quiet
        if barge.has_active_turn() {
            continue;
        }

        let fire = {
            let mut session = session.lock().await;
            let now = Instant::now();
            if should_fire(&session, now, silence_threshold, min_interval) {
                // Claim the slot before the turn starts so a slow LLM call
                // doesn't let a second check pile up behind it
                session.last_proactive_at = Some(now);
                session.snapshot_since_proactive = false;
                true
            } else {
                false
            }
        };

        if fire {
            debug!("scheduling proactive board check");
            if triggers.try_send(TurnTrigger::ProactiveCheck).is_err() {
                debug!("trigger queue full; proactive check skipped");
            }
        }
    }
}
