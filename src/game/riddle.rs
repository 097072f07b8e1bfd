//! The wall-clock riddle round state machine. The engine owns the only
//! timers in the system; every transition is driven either by its own task
//! or by a winning guess, and the task is woken through `wake` rather than
//! re-entrant callbacks.

use crate::protocol::{AnnouncementPayload, TreasureHuntStatePayload};
use crate::shared::time::now_unix_secs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub mod source;

use source::{fallback_riddle, Riddle, RiddleSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Active,
    Solved,
    Cooldown,
    GameOver,
}

#[derive(Debug, Clone)]
pub struct RiddleConfig {
    pub active_duration: Duration,
    pub hint_offset: Duration,
    pub cooldown_duration: Duration,
    pub win_freeze_duration: Duration,
    pub max_rounds_per_day: u32,
}

impl Default for RiddleConfig {
    fn default() -> Self {
        Self {
            active_duration: Duration::from_secs(60),
            hint_offset: Duration::from_secs(30),
            cooldown_duration: Duration::from_secs(120),
            win_freeze_duration: Duration::from_secs(5),
            max_rounds_per_day: 3,
        }
    }
}

#[derive(Debug)]
struct EngineState {
    phase: Phase,
    round: u32,
    riddle: Option<Riddle>,
    winner: Option<String>,
    hint_revealed: bool,
    phase_entered_at: Instant,
    announcements: Vec<AnnouncementPayload>,
}

type StateCallback = Box<dyn Fn(TreasureHuntStatePayload) + Send + Sync>;

pub struct RiddleEngine {
    config: RiddleConfig,
    state: Mutex<EngineState>,
    wake: Notify,
    callback: Mutex<Option<StateCallback>>,
}

impl RiddleEngine {
    /// Round 1 starts Active with the built-in riddle so clients never
    /// observe an empty riddle state while the first fetch is pending.
    pub fn new(config: RiddleConfig) -> Self {
        Self {
            config,
            state: Mutex::new(EngineState {
                phase: Phase::Active,
                round: 1,
                riddle: Some(fallback_riddle()),
                winner: None,
                hint_revealed: false,
                phase_entered_at: Instant::now(),
                announcements: Vec::new(),
            }),
            wake: Notify::new(),
            callback: Mutex::new(None),
        }
    }

    /// Registers the fast-path broadcast and immediately pushes the current
    /// state through it.
    pub fn on_state_change(
        &self,
        callback: impl Fn(TreasureHuntStatePayload) + Send + Sync + 'static,
    ) {
        *self.callback.lock().unwrap() = Some(Box::new(callback));
        self.notify_state_change();
    }

    /// True iff this call was the winning guess for the current round.
    pub fn guess(&self, username: &str, guess: &str) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::Active {
                return false;
            }
            let answer = match state.riddle.as_ref() {
                Some(riddle) => riddle.answer.trim().to_string(),
                None => return false,
            };
            if guess.trim().to_lowercase() != answer.to_lowercase() {
                return false;
            }
            state.phase = Phase::Solved;
            state.phase_entered_at = Instant::now();
            state.winner = Some(username.to_string());
            state.announcements.push(AnnouncementPayload {
                message: format!("\u{1f3c6} WINNER: {username} guessed '{answer}' correctly!"),
                timestamp: now_unix_secs(),
            });
            tracing::info!(username, "riddle solved");
        }
        self.notify_state_change();
        self.wake.notify_one();
        true
    }

    pub fn snapshot(&self) -> TreasureHuntStatePayload {
        self.state.lock().unwrap().view()
    }

    /// Returns and clears the pending announcement queue.
    pub fn pop_announcements(&self) -> Vec<AnnouncementPayload> {
        std::mem::take(&mut self.state.lock().unwrap().announcements)
    }

    pub fn spawn<S: RiddleSource>(self: &Arc<Self>, source: S) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run(source).await;
        });
    }

    async fn run<S: RiddleSource>(self: Arc<Self>, source: S) {
        loop {
            let (phase, entered_at) = self.phase_info();
            match phase {
                Phase::Active => {
                    let hint_at = entered_at + self.config.hint_offset;
                    let ends_at = entered_at + self.config.active_duration;
                    let hint_pending = !self.hint_revealed();
                    tokio::select! {
                        _ = tokio::time::sleep_until(hint_at), if hint_pending => {
                            self.reveal_hint();
                        }
                        _ = tokio::time::sleep_until(ends_at) => {
                            self.finish_active_round();
                        }
                        _ = self.wake.notified() => {}
                    }
                }
                Phase::Solved => {
                    tokio::time::sleep_until(entered_at + self.config.win_freeze_duration).await;
                    self.enter_cooldown_after_win();
                }
                Phase::Cooldown => {
                    // The fetch overlaps the cooldown window; a new round
                    // starts once both have finished.
                    let cooldown =
                        tokio::time::sleep_until(entered_at + self.config.cooldown_duration);
                    let (_, fetched) = tokio::join!(cooldown, source.generate());
                    let riddle = match fetched {
                        Ok(riddle) => riddle,
                        Err(error) => {
                            tracing::warn!(?error, "riddle generation failed, using fallback");
                            fallback_riddle()
                        }
                    };
                    if self.begin_round(riddle) == Phase::GameOver {
                        tracing::info!("round limit reached, ending riddle loop");
                        return;
                    }
                }
                Phase::GameOver => return,
            }
        }
    }

    fn phase_info(&self) -> (Phase, Instant) {
        let state = self.state.lock().unwrap();
        (state.phase, state.phase_entered_at)
    }

    fn hint_revealed(&self) -> bool {
        self.state.lock().unwrap().hint_revealed
    }

    fn reveal_hint(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::Active || state.hint_revealed {
                return false;
            }
            state.hint_revealed = true;
        }
        self.notify_state_change();
        true
    }

    /// Timeout path out of Active.
    fn finish_active_round(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::Active {
                return false;
            }
            state.phase = Phase::Cooldown;
            state.phase_entered_at = Instant::now();
            let message = state
                .riddle
                .as_ref()
                .map(|riddle| format!("\u{23f0} Time's up! The answer was: {}", riddle.answer));
            if let Some(message) = message {
                state.announcements.push(AnnouncementPayload {
                    message,
                    timestamp: now_unix_secs(),
                });
            }
        }
        self.notify_state_change();
        true
    }

    fn enter_cooldown_after_win(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::Solved {
                return false;
            }
            state.phase = Phase::Cooldown;
            state.phase_entered_at = Instant::now();
        }
        self.notify_state_change();
        true
    }

    /// Leaves Cooldown: either a new Active round with `riddle`, or GameOver
    /// once the round limit is crossed. Returns the phase entered.
    fn begin_round(&self, riddle: Riddle) -> Phase {
        let phase = {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::Cooldown {
                return state.phase;
            }
            state.round += 1;
            if state.round > self.config.max_rounds_per_day {
                state.phase = Phase::GameOver;
                state.riddle = None;
                state.winner = None;
                state.announcements.clear();
            } else {
                state.phase = Phase::Active;
                state.riddle = Some(riddle);
                state.winner = None;
                state.hint_revealed = false;
            }
            state.phase_entered_at = Instant::now();
            state.phase
        };
        self.notify_state_change();
        phase
    }

    fn notify_state_change(&self) {
        let snapshot = self.snapshot();
        let callback = self.callback.lock().unwrap();
        if let Some(callback) = callback.as_ref() {
            callback(snapshot);
        }
    }
}

impl EngineState {
    fn view(&self) -> TreasureHuntStatePayload {
        let clue_text = match (self.phase, self.riddle.as_ref()) {
            (Phase::GameOver, _) => "\u{1f389} Daily Limit Reached! \u{1f389}\n\nYou've \
                                     completed today's riddle rounds.\nCheck back later!"
                .to_string(),
            (_, None) => "Loading...".to_string(),
            (Phase::Active, Some(riddle)) => {
                let mut text = riddle.question.clone();
                if self.hint_revealed {
                    text.push_str(&format!("\n\n\u{1f4a1} HINT: {}", riddle.hint));
                }
                text
            }
            (Phase::Solved | Phase::Cooldown, Some(riddle)) => match self.winner.as_deref() {
                Some(winner) => format!(
                    "\u{2705} SOLVED by {winner}!\nAnswer: {}\n\nNext riddle coming soon...",
                    riddle.answer
                ),
                None => format!(
                    "\u{23f0} Time's up!\nThe answer was: {}\n\nNext riddle coming soon...",
                    riddle.answer
                ),
            },
        };
        let completed = match self.phase {
            Phase::Active => false,
            Phase::GameOver => true,
            Phase::Solved | Phase::Cooldown => self.winner.is_some(),
        };
        TreasureHuntStatePayload {
            current_clue_index: self.round,
            clue_text,
            completed,
        }
    }
}
