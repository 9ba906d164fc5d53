//! In-process simulated ledger
//!
//! `SimulatedLedger` models the contract side of a match closely enough to
//! exercise the coordinator end to end: every match runs a fixed-length
//! decision window per round, records participant moves, advances a round
//! on each accepted settlement and becomes terminal after `max_rounds`.
//!
//! Faults can be scripted for reads, submissions and subscriptions, and the
//! ledger tracks how many settlement calls were in flight per match so tests
//! can assert the one-call-at-a-time property.

use async_trait::async_trait;
use chrono::Duration;
use common::{AttemptId, MatchAddress, ParticipantId, Participants, SharedClock, Timestamp};
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

use crate::client::{LedgerClient, MatchCreatedStream};
use crate::error::{LedgerError, LedgerResult};
use crate::types::{MatchCreated, RoundState, SettlementReceipt, SettlementRequest};

/// Simulated ledger settings
#[derive(Debug, Clone)]
pub struct SimulatedLedgerConfig {
    /// Length of every round's decision window
    pub round_duration: Duration,
    /// Rounds played before the match becomes terminal
    pub max_rounds: u64,
}

impl Default for SimulatedLedgerConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::seconds(30),
            max_rounds: 5,
        }
    }
}

#[derive(Debug)]
struct SimMatch {
    participants: Participants,
    round: u64,
    round_started_at: Timestamp,
    first_acted: bool,
    second_acted: bool,
    terminal: bool,
    applied_attempts: HashSet<AttemptId>,
    submissions: u64,
    settlements: u64,
    in_flight: u32,
    max_in_flight: u32,
}

#[derive(Debug, Default)]
struct Faults {
    read_failures: u32,
    submit_script: VecDeque<LedgerError>,
    submit_latency: Option<std::time::Duration>,
    read_latency: HashMap<MatchAddress, std::time::Duration>,
    subscribe_failures: u32,
}

#[derive(Debug, Default)]
struct State {
    matches: HashMap<MatchAddress, SimMatch>,
    next_address: u64,
    next_tx: u64,
}

/// In-memory ledger implementing [`LedgerClient`]
pub struct SimulatedLedger {
    clock: SharedClock,
    config: SimulatedLedgerConfig,
    state: Mutex<State>,
    faults: Mutex<Faults>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<LedgerResult<MatchCreated>>>>,
}

impl SimulatedLedger {
    /// Create an empty ledger
    pub fn new(clock: SharedClock, config: SimulatedLedgerConfig) -> Self {
        Self {
            clock,
            config,
            state: Mutex::new(State::default()),
            faults: Mutex::new(Faults::default()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Create a match whose first round starts now and announce it to subscribers
    pub fn create_match(&self, first: ParticipantId, second: ParticipantId) -> MatchAddress {
        let now = self.clock.now();
        let participants = Participants::new(first, second);

        let address = {
            let mut state = self.state.lock();
            state.next_address += 1;
            let address = match MatchAddress::parse(format!("0x{:040x}", state.next_address)) {
                Ok(address) => address,
                Err(_) => unreachable!("generated addresses are never empty"),
            };
            state.matches.insert(
                address.clone(),
                SimMatch {
                    participants: participants.clone(),
                    round: 1,
                    round_started_at: now,
                    first_acted: false,
                    second_acted: false,
                    terminal: false,
                    applied_attempts: HashSet::new(),
                    submissions: 0,
                    settlements: 0,
                    in_flight: 0,
                    max_in_flight: 0,
                },
            );
            address
        };

        debug!(%address, %participants, "Simulated match created");
        self.broadcast(MatchCreated {
            participants,
            address: address.clone(),
        });
        address
    }

    /// Re-deliver the creation notification for an existing match
    pub fn announce(&self, address: &MatchAddress) -> bool {
        let participants = {
            let state = self.state.lock();
            match state.matches.get(address) {
                Some(m) => m.participants.clone(),
                None => return false,
            }
        };
        self.broadcast(MatchCreated {
            participants,
            address: address.clone(),
        });
        true
    }

    /// Record a move for one participant in the current round
    pub fn record_move(&self, address: &MatchAddress, participant: &ParticipantId) -> LedgerResult<()> {
        let mut state = self.state.lock();
        let m = state
            .matches
            .get_mut(address)
            .ok_or_else(|| LedgerError::fatal(format!("unknown match {address}")))?;

        if m.terminal {
            return Err(LedgerError::fatal(format!("match {address} is over")));
        }
        if participant == &m.participants.first {
            m.first_acted = true;
        } else if participant == &m.participants.second {
            m.second_acted = true;
        } else {
            return Err(LedgerError::fatal(format!(
                "{participant} does not play in {address}"
            )));
        }
        Ok(())
    }

    /// Force a match into its terminal state
    pub fn conclude(&self, address: &MatchAddress) {
        if let Some(m) = self.state.lock().matches.get_mut(address) {
            m.terminal = true;
        }
    }

    /// Fail the next `count` round-state reads with a transient error
    pub fn fail_next_reads(&self, count: u32) {
        self.faults.lock().read_failures = count;
    }

    /// Return these errors, in order, from the next settlement calls
    pub fn fail_next_submissions(&self, errors: impl IntoIterator<Item = LedgerError>) {
        self.faults.lock().submit_script.extend(errors);
    }

    /// Delay every settlement call by `latency`
    pub fn set_submit_latency(&self, latency: Option<std::time::Duration>) {
        self.faults.lock().submit_latency = latency;
    }

    /// Delay round-state reads of one match by `latency`
    pub fn set_read_latency(&self, address: &MatchAddress, latency: Option<std::time::Duration>) {
        let mut faults = self.faults.lock();
        match latency {
            Some(latency) => faults.read_latency.insert(address.clone(), latency),
            None => faults.read_latency.remove(address),
        };
    }

    /// Fail the next `count` subscription attempts
    pub fn fail_next_subscriptions(&self, count: u32) {
        self.faults.lock().subscribe_failures = count;
    }

    /// End every open subscription stream
    pub fn close_subscriptions(&self) {
        self.subscribers.lock().clear();
    }

    /// Settlement calls received for a match, failed ones included
    pub fn submission_count(&self, address: &MatchAddress) -> u64 {
        self.state
            .lock()
            .matches
            .get(address)
            .map(|m| m.submissions)
            .unwrap_or(0)
    }

    /// Settlement calls that advanced the match
    pub fn settlement_count(&self, address: &MatchAddress) -> u64 {
        self.state
            .lock()
            .matches
            .get(address)
            .map(|m| m.settlements)
            .unwrap_or(0)
    }

    /// Highest number of settlement calls ever concurrently in flight for a match
    pub fn max_in_flight(&self, address: &MatchAddress) -> u32 {
        self.state
            .lock()
            .matches
            .get(address)
            .map(|m| m.max_in_flight)
            .unwrap_or(0)
    }

    /// Addresses of every match the ledger knows about
    pub fn addresses(&self) -> Vec<MatchAddress> {
        self.state.lock().matches.keys().cloned().collect()
    }

    /// Participants of a match
    pub fn participants(&self, address: &MatchAddress) -> Option<Participants> {
        self.state
            .lock()
            .matches
            .get(address)
            .map(|m| m.participants.clone())
    }

    fn broadcast(&self, event: MatchCreated) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.unbounded_send(Ok(event.clone())).is_ok());
    }

    fn round_state(&self, m: &SimMatch) -> RoundState {
        RoundState {
            round: m.round,
            is_terminal: m.terminal,
            deadline: m.round_started_at + self.config.round_duration,
            participant1_acted: m.first_acted,
            participant2_acted: m.second_acted,
        }
    }

    fn begin_submission(&self, address: &MatchAddress) -> LedgerResult<()> {
        let mut state = self.state.lock();
        let m = state
            .matches
            .get_mut(address)
            .ok_or_else(|| LedgerError::fatal(format!("unknown match {address}")))?;
        m.submissions += 1;
        m.in_flight += 1;
        m.max_in_flight = m.max_in_flight.max(m.in_flight);
        Ok(())
    }

    fn end_submission(&self, address: &MatchAddress) {
        if let Some(m) = self.state.lock().matches.get_mut(address) {
            m.in_flight = m.in_flight.saturating_sub(1);
        }
    }

    fn apply_settlement(
        &self,
        address: &MatchAddress,
        request: SettlementRequest,
    ) -> LedgerResult<SettlementReceipt> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.next_tx += 1;
        let tx_id = format!("0x{:064x}", state.next_tx);

        let m = state
            .matches
            .get_mut(address)
            .ok_or_else(|| LedgerError::fatal(format!("unknown match {address}")))?;

        if m.terminal {
            return Err(LedgerError::already_settled(format!("match {address} is over")));
        }
        if m.applied_attempts.contains(&request.attempt_id) {
            return Err(LedgerError::already_settled(format!(
                "attempt {} already applied",
                request.attempt_id
            )));
        }
        if request.round < m.round {
            return Err(LedgerError::already_settled(format!(
                "round {} already settled, match is in round {}",
                request.round, m.round
            )));
        }

        let deadline = m.round_started_at + self.config.round_duration;
        if now < deadline && !(m.first_acted && m.second_acted) {
            return Err(LedgerError::transient(format!(
                "decision window for round {} still open",
                m.round
            )));
        }

        m.applied_attempts.insert(request.attempt_id);
        m.settlements += 1;
        if m.round >= self.config.max_rounds {
            m.terminal = true;
        } else {
            m.round += 1;
            m.round_started_at = now;
            m.first_acted = false;
            m.second_acted = false;
        }

        debug!(%address, round = m.round, terminal = m.terminal, "Simulated settlement applied");
        Ok(SettlementReceipt {
            tx_id,
            confirmed: true,
        })
    }
}

/// Counts a settlement call as in flight until dropped, including when the
/// caller times out and abandons the call
struct InFlight<'a> {
    ledger: &'a SimulatedLedger,
    address: &'a MatchAddress,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ledger.end_submission(self.address);
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn subscribe_match_created(&self) -> LedgerResult<MatchCreatedStream> {
        {
            let mut faults = self.faults.lock();
            if faults.subscribe_failures > 0 {
                faults.subscribe_failures -= 1;
                return Err(LedgerError::transient("subscription endpoint unavailable"));
            }
        }

        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        Ok(rx.boxed())
    }

    async fn get_match_round_state(&self, address: &MatchAddress) -> LedgerResult<RoundState> {
        let latency = {
            let mut faults = self.faults.lock();
            if faults.read_failures > 0 {
                faults.read_failures -= 1;
                return Err(LedgerError::transient("ledger unreachable"));
            }
            faults.read_latency.get(address).copied()
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let state = self.state.lock();
        state
            .matches
            .get(address)
            .map(|m| self.round_state(m))
            .ok_or_else(|| LedgerError::fatal(format!("unknown match {address}")))
    }

    async fn submit_settlement(
        &self,
        address: &MatchAddress,
        request: SettlementRequest,
    ) -> LedgerResult<SettlementReceipt> {
        self.begin_submission(address)?;
        let _in_flight = InFlight {
            ledger: self,
            address,
        };

        let (latency, scripted) = {
            let mut faults = self.faults.lock();
            (faults.submit_latency, faults.submit_script.pop_front())
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match scripted {
            Some(err) => Err(err),
            None => self.apply_settlement(address, request),
        }
    }

    async fn list_open_matches(&self) -> LedgerResult<Vec<MatchCreated>> {
        let state = self.state.lock();
        let mut open: Vec<MatchCreated> = state
            .matches
            .iter()
            .filter(|(_, m)| !m.terminal)
            .map(|(address, m)| MatchCreated {
                participants: m.participants.clone(),
                address: address.clone(),
            })
            .collect();
        open.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(open)
    }
}
