//! Admission decision engine.
//!
//! Turns a decoded frame into an [`AccessOutcome`] and fans the result out.
//! The whole of [`DecisionEngine::process_frame`] is synchronous and never
//! waits: lookups read registry snapshots, and every side effect (relay
//! pulse, capture, transaction) is a non-blocking hand-off.
//!
//! # Steps
//!
//! 1. Frames of the wrong width are dropped
//! 2. The card id is extracted per the frame layout
//! 3. Repeat scans of a card inside the debounce window are dropped silently
//! 4. Blocked cards are refused
//! 5. Allowed cards are granted; the channel's relay pulses if it is in `Normal`
//! 6. Anything else is denied
//! 7. Every decision is captured, counted, queued for the audit trail and
//!    kept in the recent ring
//!
//! Steps 1 to 3 record nothing.

use crate::capture::CaptureDispatcher;
use crate::pipeline::TransactionSender;
use crate::rate_limiter::ScanRateLimiter;
use crate::recent::RecentTransactions;
use crate::relay::RelayActuator;
use gatehouse_core::constants::{BLOCKED_NAME, UNKNOWN_NAME};
use gatehouse_core::{AccessOutcome, CardId, ReaderChannel, Transaction};
use gatehouse_protocol::{Frame, FrameLayout};
use gatehouse_storage::{Classification, CredentialRegistry, DailyStats};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Side effects of one accepted scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub transaction: Transaction,
    pub pulsed: bool,
    pub capture_dispatched: bool,
    pub queued: bool,
}

impl Decision {
    pub fn outcome(&self) -> AccessOutcome {
        self.transaction.outcome
    }
}

/// Why a frame produced no decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Malformed(String),
    Debounced(CardId),
}

pub struct DecisionEngine {
    layout: FrameLayout,
    registry: Arc<CredentialRegistry>,
    limiter: Arc<ScanRateLimiter>,
    relays: HashMap<ReaderChannel, Arc<RelayActuator>>,
    capture: Option<CaptureDispatcher>,
    stats: Arc<DailyStats>,
    transactions: TransactionSender,
    recent: Arc<RecentTransactions>,
}

impl DecisionEngine {
    pub fn new(
        layout: FrameLayout,
        registry: Arc<CredentialRegistry>,
        limiter: Arc<ScanRateLimiter>,
        stats: Arc<DailyStats>,
        transactions: TransactionSender,
        recent: Arc<RecentTransactions>,
    ) -> Self {
        Self {
            layout,
            registry,
            limiter,
            relays: HashMap::new(),
            capture: None,
            stats,
            transactions,
            recent,
        }
    }

    #[must_use]
    pub fn with_relay(mut self, relay: Arc<RelayActuator>) -> Self {
        self.relays.insert(relay.channel(), relay);
        self
    }

    #[must_use]
    pub fn with_capture(mut self, capture: CaptureDispatcher) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn relay(&self, channel: ReaderChannel) -> Option<&Arc<RelayActuator>> {
        self.relays.get(&channel)
    }

    /// Decide on one frame. Never fails; rejected frames return `None`.
    pub fn process_frame(&self, channel: ReaderChannel, frame: &Frame) -> Option<Decision> {
        match self.decide(channel, frame) {
            Ok(decision) => Some(decision),
            Err(Rejection::Malformed(reason)) => {
                warn!(%channel, width = frame.width(), %reason, "Frame discarded");
                None
            }
            Err(Rejection::Debounced(card)) => {
                debug!(%channel, card = %card, "Repeat scan ignored");
                None
            }
        }
    }

    /// Like [`process_frame`](Self::process_frame) but says why nothing
    /// happened.
    pub fn decide(&self, channel: ReaderChannel, frame: &Frame) -> Result<Decision, Rejection> {
        let card = self
            .layout
            .extract_card_id(frame)
            .map_err(|e| Rejection::Malformed(e.to_string()))?;

        if !self.limiter.should_process(card) {
            return Err(Rejection::Debounced(card));
        }

        Ok(self.admit(channel, card))
    }

    /// Classify an accepted card and run every side effect.
    fn admit(&self, channel: ReaderChannel, card: CardId) -> Decision {
        let (outcome, name) = match self.registry.classify(card) {
            Classification::Blocked => (AccessOutcome::Blocked, BLOCKED_NAME.to_string()),
            Classification::Allowed(name) => (
                AccessOutcome::Granted,
                name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            ),
            Classification::Unknown => (AccessOutcome::Denied, UNKNOWN_NAME.to_string()),
        };

        let pulsed = outcome == AccessOutcome::Granted
            && match self.relays.get(&channel) {
                Some(relay) => relay.trigger_pulse(),
                None => {
                    debug!(%channel, "No relay on channel");
                    false
                }
            };

        let transaction = Transaction::new(card, name, outcome, channel);
        info!(
            %channel,
            card = %card,
            name = %transaction.resolved_name,
            outcome = %outcome,
            pulsed,
            "Scan decided"
        );

        let capture_dispatched = self
            .capture
            .as_ref()
            .is_some_and(|capture| capture.dispatch(channel, card, transaction.timestamp));
        self.stats.record_now(outcome);
        self.recent.push(transaction.clone());
        let queued = self.transactions.enqueue(transaction.clone());

        Decision {
            transaction,
            pulsed,
            capture_dispatched,
            queued,
        }
    }
}
