// src/poll.rs
//! Poll-and-reconcile: keeps a client session in step with server state.
//!
//! Each successful poll is applied in a fixed order: reset detection, then
//! the fingerprint-driven view update, then the results-visibility check.

use std::hash::{DefaultHasher, Hash, Hasher};

use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::models::{Couple, Snapshot};
use crate::services::ApiClient;
use crate::view::{Card, Control, Location, Notice, View};
use crate::voter::{VoterState, VoterStorage};

/// Comparison keys over `{id, name, image}` and `{id, votes}` of every
/// contestant, in id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprints {
    pub metadata: u64,
    pub votes: u64,
}

impl Fingerprints {
    /// `couples` must already be sorted by id.
    pub fn of(couples: &[Couple]) -> Self {
        let mut metadata = DefaultHasher::new();
        let mut votes = DefaultHasher::new();

        couples.len().hash(&mut metadata);
        couples.len().hash(&mut votes);
        for couple in couples {
            (couple.id, &couple.name, &couple.image).hash(&mut metadata);
            (couple.id, couple.votes).hash(&mut votes);
        }

        Self {
            metadata: metadata.finish(),
            votes: votes.finish(),
        }
    }
}

/// How much of the view a snapshot invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// First poll or metadata changed: cards rebuilt.
    Rebuild,
    /// Only tallies moved: counters updated in place.
    Counts,
    Unchanged,
}

impl Change {
    pub fn classify(previous: Option<Fingerprints>, next: Fingerprints) -> Self {
        match previous {
            None => Self::Rebuild,
            Some(prev) if prev.metadata != next.metadata => Self::Rebuild,
            Some(prev) if prev.votes != next.votes => Self::Counts,
            Some(_) => Self::Unchanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub change: Change,
    pub reset_detected: bool,
    pub navigated: Option<Location>,
}

/// Where a vote stands in its two-phase cast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VotePhase {
    NotVoted,
    Pending { couple_id: i64 },
    Voted { couple_id: i64 },
    Failed { couple_id: i64, reason: String },
}

/// Client-side session: cached roster, rendered cards, voter state and the
/// current screen. Created on load, updated each poll, never shared.
pub struct Session<S: VoterStorage, V: View> {
    pub(crate) storage: S,
    pub(crate) view: V,
    pub(crate) voter: Option<VoterState>,
    pub(crate) phase: VotePhase,
    couples: Vec<Couple>,
    fingerprints: Option<Fingerprints>,
    cards: Vec<Card>,
    location: Location,
    poll_in_flight: bool,
}

impl<S: VoterStorage, V: View> Session<S, V> {
    pub fn new(storage: S, view: V) -> Self {
        let voter = VoterState::load(&storage);
        let phase = match voter.and_then(|v| v.voted_couple_id()) {
            Some(couple_id) => VotePhase::Voted { couple_id },
            None => VotePhase::NotVoted,
        };

        Self {
            storage,
            view,
            voter,
            phase,
            couples: Vec::new(),
            fingerprints: None,
            cards: Vec::new(),
            location: Location::Gallery,
            poll_in_flight: false,
        }
    }

    pub fn couples(&self) -> &[Couple] {
        &self.couples
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn voter(&self) -> Option<VoterState> {
        self.voter
    }

    pub fn phase(&self) -> &VotePhase {
        &self.phase
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// True once a snapshot has been applied and the voter's reset epoch is known.
    pub fn is_loaded(&self) -> bool {
        self.voter.is_some() && self.fingerprints.is_some()
    }

    /// Marks a poll as started. Returns false if one is still in flight, in
    /// which case the caller skips this tick.
    pub fn try_begin_poll(&mut self) -> bool {
        if self.poll_in_flight {
            debug!("Poll still in flight, skipping tick");
            return false;
        }
        self.poll_in_flight = true;
        true
    }

    /// Completes a poll started with [`Self::try_begin_poll`].
    pub fn finish_poll(
        &mut self,
        result: Result<Snapshot, ClientError>,
    ) -> Result<PollOutcome, ClientError> {
        self.poll_in_flight = false;
        match result {
            Ok(snapshot) => Ok(self.apply_snapshot(snapshot)),
            Err(e) => {
                self.poll_failed(&e);
                Err(e)
            }
        }
    }

    /// Fetch and apply one snapshot. Errors are logged and surfaced to the
    /// view; the session stays usable.
    pub async fn poll(&mut self, client: &ApiClient) -> Result<Option<PollOutcome>, ClientError> {
        if !self.try_begin_poll() {
            return Ok(None);
        }
        let result = client.fetch_snapshot().await;
        self.finish_poll(result).map(Some)
    }

    pub fn poll_failed(&mut self, error: &ClientError) {
        warn!(error = %error, "Poll failed");
        self.view.notify(&Notice::PollFailed {
            reason: error.to_string(),
        });
    }

    pub fn apply_snapshot(&mut self, mut snapshot: Snapshot) -> PollOutcome {
        snapshot.sort();

        let reset_detected = self.detect_reset(snapshot.last_reset);

        let next = Fingerprints::of(&snapshot.couples);
        let change = Change::classify(self.fingerprints, next);
        self.fingerprints = Some(next);
        self.couples = snapshot.couples;

        match change {
            Change::Rebuild => {
                self.rebuild_cards();
                self.view.render(&self.cards);
            }
            Change::Counts => {
                for (card, couple) in self.cards.iter_mut().zip(&self.couples) {
                    card.votes = couple.votes;
                }
                self.view.update_counts(&self.cards);
            }
            Change::Unchanged => {}
        }

        if reset_detected && change != Change::Rebuild {
            self.refresh_controls();
        }

        let navigated = self.apply_results_visibility(snapshot.results_visible);

        debug!(?change, reset_detected, ?navigated, "Applied snapshot");
        PollOutcome {
            change,
            reset_detected,
            navigated,
        }
    }

    /// Moves to the results screen when results become visible, and back to
    /// the gallery when they are hidden again.
    pub fn apply_results_visibility(&mut self, visible: bool) -> Option<Location> {
        let target = if visible {
            Location::Results
        } else {
            Location::Gallery
        };
        if target == self.location {
            return None;
        }

        info!(?target, "Navigating");
        self.location = target;
        self.view.navigate(target);
        Some(target)
    }

    fn detect_reset(&mut self, last_reset: i64) -> bool {
        let Some(voter) = self.voter.as_mut() else {
            // First poll for this browser: adopt the server's reset epoch.
            let state = VoterState::new(last_reset);
            self.voter = Some(state);
            self.persist_voter();
            return false;
        };

        if !voter.observe_reset(last_reset) {
            return false;
        }

        info!(last_reset, "Server reset observed, voting re-enabled");
        // A pending vote keeps its phase until its request completes. If that
        // request landed before the reset it was zeroed server-side, yet it
        // still commits under the new epoch and this browser stays locked out.
        if !matches!(self.phase, VotePhase::Pending { .. }) {
            self.phase = VotePhase::NotVoted;
        }
        self.persist_voter();
        self.view.notify(&Notice::VotesReset);
        true
    }

    pub(crate) fn persist_voter(&mut self) {
        if let Some(voter) = self.voter {
            if let Err(e) = voter.save(&mut self.storage) {
                warn!(error = %e, "Failed to persist voter state");
            }
        }
    }

    pub(crate) fn control(&self) -> Control {
        let has_voted = self.voter.is_some_and(|v| v.has_voted());
        if has_voted || matches!(self.phase, VotePhase::Pending { .. }) {
            Control::Disabled
        } else {
            Control::Enabled
        }
    }

    fn rebuild_cards(&mut self) {
        let control = self.control();
        let voted_for = self.voter.and_then(|v| v.voted_couple_id());
        self.cards = self
            .couples
            .iter()
            .map(|couple| Card::new(couple, voted_for, control))
            .collect();
    }

    /// Re-derive control state and voted markers in place, then tell the view.
    pub(crate) fn refresh_controls(&mut self) {
        let control = self.control();
        let voted_for = self.voter.and_then(|v| v.voted_couple_id());
        for card in &mut self.cards {
            card.control = control;
            card.voted = voted_for == Some(card.id);
        }
        self.view.update_controls(&self.cards);
    }
}
