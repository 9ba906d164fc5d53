//! Simulated players for the `simulate` command
//!
//! The first seat always moves as soon as a round opens. The second seat
//! only moves on even rounds. Even rounds therefore settle early once both
//! have acted, and odd rounds wait for their deadline.

use common::{MatchAddress, ParticipantId, SharedClock};
use ledger::{LedgerClient, SimulatedLedger};
use registry::MatchRegistry;
use server::ShutdownController;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often players look at their matches
const PLAY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seat {
    First,
    Second,
}

impl Seat {
    /// Whether this seat moves in `round`
    pub fn moves_in(self, round: u64) -> bool {
        match self {
            Seat::First => true,
            Seat::Second => round % 2 == 0,
        }
    }
}

pub struct Players {
    ledger: Arc<SimulatedLedger>,
    registry: Arc<MatchRegistry>,
    clock: SharedClock,
}

impl Players {
    pub fn new(ledger: Arc<SimulatedLedger>, registry: Arc<MatchRegistry>, clock: SharedClock) -> Self {
        Self {
            ledger,
            registry,
            clock,
        }
    }

    /// Create `count` matches, play them out, then trigger shutdown
    pub async fn run(&self, count: usize, shutdown: ShutdownController) {
        let token = shutdown.token();
        let mut matches = Vec::with_capacity(count);

        for i in 1..=count {
            let address = self.ledger.create_match(
                ParticipantId::new(format!("player-{i}a")),
                ParticipantId::new(format!("player-{i}b")),
            );
            info!(%address, "Simulated match created");
            matches.push(address);
        }

        let mut interval = tokio::time::interval(PLAY_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = interval.tick() => {}
            }

            let open = self.play_round(&matches).await;
            let counts = self.registry.counts();
            if open == 0 && counts.active == 0 && counts.settlement_pending == 0 {
                info!(matches = matches.len(), "All simulated matches concluded");
                shutdown.shutdown();
                return;
            }
        }
    }

    /// Make every due move; returns how many matches are still open
    pub async fn play_round(&self, matches: &[MatchAddress]) -> usize {
        let now = self.clock.now();
        let mut open = 0;

        for address in matches {
            let state = match self.ledger.get_match_round_state(address).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(%address, error = %e, "Player could not read round state");
                    open += 1;
                    continue;
                }
            };
            if state.is_terminal {
                continue;
            }
            open += 1;

            if state.deadline_passed(now) {
                continue;
            }
            let Some(participants) = self.ledger.participants(address) else {
                continue;
            };

            let seats = [
                (Seat::First, &participants.first, state.participant1_acted),
                (Seat::Second, &participants.second, state.participant2_acted),
            ];
            for (seat, player, acted) in seats {
                if acted || !seat.moves_in(state.round) {
                    continue;
                }
                match self.ledger.record_move(address, player) {
                    Ok(()) => debug!(%address, %player, round = state.round, "Move recorded"),
                    Err(e) => warn!(%address, %player, error = %e, "Move rejected"),
                }
            }
        }

        open
    }
}
