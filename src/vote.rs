//! Casting the one vote a browser gets.
//!
//! `NotVoted -> Pending -> Voted | Failed`. Nothing is committed locally until
//! the server confirms the increment, and a failure leaves the voter state as
//! it was so the attendee can retry.

use tracing::{info, warn};

use crate::error::{ClientError, VoteError};
use crate::models::Couple;
use crate::poll::{Session, VotePhase};
use crate::services::ApiClient;
use crate::view::{Notice, View};
use crate::voter::VoterStorage;

/// Proof that a session moved into `Pending` for this couple.
#[derive(Debug)]
#[must_use = "a pending vote must be completed"]
pub struct PendingVote {
    couple_id: i64,
}

impl PendingVote {
    pub fn couple_id(&self) -> i64 {
        self.couple_id
    }
}

impl<S: VoterStorage, V: View> Session<S, V> {
    /// Local eligibility check. On success the vote controls are disabled
    /// and the caller owns the single outstanding request.
    ///
    /// Refused until the first snapshot is applied: without the server's
    /// reset epoch a committed vote could later be mistaken for a pre-reset one.
    pub fn begin_vote(&mut self, couple_id: i64) -> Result<PendingVote, VoteError> {
        if self.voter.is_some_and(|v| v.has_voted()) {
            return Err(VoteError::AlreadyVoted);
        }
        if !self.is_loaded() {
            return Err(VoteError::NotReady);
        }
        if matches!(self.phase, VotePhase::Pending { .. }) {
            return Err(VoteError::InFlight);
        }

        self.phase = VotePhase::Pending { couple_id };
        self.refresh_controls();
        Ok(PendingVote { couple_id })
    }

    /// Applies the server's answer to a pending vote.
    pub fn complete_vote(
        &mut self,
        pending: PendingVote,
        result: Result<Couple, ClientError>,
    ) -> Result<Couple, VoteError> {
        let couple_id = pending.couple_id;

        match result {
            Ok(couple) => {
                if let Some(voter) = self.voter.as_mut() {
                    voter.record_vote(couple_id);
                }
                self.phase = VotePhase::Voted { couple_id };
                self.persist_voter();
                self.refresh_controls();

                info!(couple_id, votes = couple.votes, "Vote confirmed");
                self.view.notify(&Notice::VoteConfirmed {
                    couple: couple.clone(),
                });
                Ok(couple)
            }
            Err(e) => {
                warn!(couple_id, error = %e, "Vote failed");
                self.phase = VotePhase::Failed {
                    couple_id,
                    reason: e.to_string(),
                };
                self.refresh_controls();
                self.view.notify(&Notice::VoteFailed {
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Full protocol: check, send, commit, then re-poll for the authoritative
    /// tally. The results check runs as part of that poll.
    pub async fn cast_vote(
        &mut self,
        client: &ApiClient,
        couple_id: i64,
    ) -> Result<Couple, VoteError> {
        let pending = self.begin_vote(couple_id)?;
        let result = client.vote(couple_id).await;
        let couple = self.complete_vote(pending, result)?;

        if let Err(e) = self.poll(client).await {
            warn!(error = %e, "Refresh after vote failed");
        }
        Ok(couple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::tests::{couple, snapshot, RecordingView};
    use crate::view::Control;
    use crate::voter::{MemoryStorage, HAS_VOTED_KEY, VOTED_COUPLE_KEY};

    fn loaded_session() -> Session<MemoryStorage, RecordingView> {
        let mut session = Session::new(MemoryStorage::new(), RecordingView::default());
        session.apply_snapshot(snapshot(vec![couple(1, "A", 0), couple(2, "B", 0)], false, 0));
        session
    }

    #[test]
    fn test_successful_vote_commits() {
        let mut session = loaded_session();

        let pending = session.begin_vote(2).unwrap();
        assert_eq!(session.phase(), &VotePhase::Pending { couple_id: 2 });
        assert!(session.cards().iter().all(|c| c.control == Control::Disabled));
        // Nothing committed before the server answers.
        assert!(!session.voter().unwrap().has_voted());
        assert!(session.storage().get(HAS_VOTED_KEY).is_none());

        let counted = session
            .complete_vote(pending, Ok(couple(2, "B", 1)))
            .unwrap();
        assert_eq!(counted.votes, 1);

        let voter = session.voter().unwrap();
        assert!(voter.has_voted());
        assert_eq!(voter.voted_couple_id(), Some(2));
        assert_eq!(session.phase(), &VotePhase::Voted { couple_id: 2 });
        assert_eq!(session.storage().get(VOTED_COUPLE_KEY).as_deref(), Some("2"));
        assert!(session.cards()[1].voted);
        assert!(matches!(
            session.view().notices.last(),
            Some(Notice::VoteConfirmed { .. })
        ));
    }

    #[test]
    fn test_second_vote_is_refused_locally() {
        let mut session = loaded_session();
        let pending = session.begin_vote(1).unwrap();
        session
            .complete_vote(pending, Ok(couple(1, "A", 1)))
            .unwrap();

        assert!(matches!(session.begin_vote(2), Err(VoteError::AlreadyVoted)));
        assert!(matches!(session.begin_vote(1), Err(VoteError::AlreadyVoted)));
        assert_eq!(session.phase(), &VotePhase::Voted { couple_id: 1 });
    }

    #[test]
    fn test_vote_before_first_snapshot_is_refused() {
        let mut session = Session::new(MemoryStorage::new(), RecordingView::default());

        assert!(matches!(session.begin_vote(2), Err(VoteError::NotReady)));
        assert_eq!(session.phase(), &VotePhase::NotVoted);
        assert!(session.storage().get(HAS_VOTED_KEY).is_none());

        // An earlier reset on the server is adopted, not reported, and the
        // one vote this browser then casts survives the next poll.
        let roster = || vec![couple(1, "A", 0), couple(2, "B", 0)];
        let first = session.apply_snapshot(snapshot(roster(), false, 1000));
        assert!(!first.reset_detected);

        let pending = session.begin_vote(2).unwrap();
        session
            .complete_vote(pending, Ok(couple(2, "B", 1)))
            .unwrap();

        let next = session.apply_snapshot(snapshot(roster(), false, 1000));
        assert!(!next.reset_detected);
        assert!(session.voter().unwrap().has_voted());
        assert!(matches!(session.begin_vote(1), Err(VoteError::AlreadyVoted)));
        assert!(!session.view().notices.contains(&Notice::VotesReset));
    }

    #[test]
    fn test_concurrent_begin_is_refused() {
        let mut session = loaded_session();
        let _pending = session.begin_vote(1).unwrap();

        assert!(matches!(session.begin_vote(2), Err(VoteError::InFlight)));
    }

    #[test]
    fn test_rejection_leaves_state_unchanged() {
        let mut session = loaded_session();
        let before = session.voter();

        let pending = session.begin_vote(404).unwrap();
        let err = session
            .complete_vote(
                pending,
                Err(ClientError::Validation("Couple 404 not found".to_string())),
            )
            .unwrap_err();

        assert!(matches!(err, VoteError::Client(ClientError::Validation(_))));
        assert_eq!(session.voter(), before);
        assert!(session.storage().get(HAS_VOTED_KEY).is_none());
        assert!(matches!(session.phase(), VotePhase::Failed { couple_id: 404, .. }));
        assert!(session.cards().iter().all(|c| c.control == Control::Enabled));
        assert!(matches!(
            session.view().notices.last(),
            Some(Notice::VoteFailed { .. })
        ));

        // Retry from the failed state, for a different couple.
        let pending = session.begin_vote(2).unwrap();
        session
            .complete_vote(pending, Ok(couple(2, "B", 1)))
            .unwrap();
        assert_eq!(session.voter().unwrap().voted_couple_id(), Some(2));
    }

    #[test]
    fn test_reset_reopens_voting() {
        let mut session = loaded_session();
        let pending = session.begin_vote(1).unwrap();
        session
            .complete_vote(pending, Ok(couple(1, "A", 1)))
            .unwrap();

        session.apply_snapshot(snapshot(vec![couple(1, "A", 0), couple(2, "B", 0)], false, 1000));

        assert_eq!(session.phase(), &VotePhase::NotVoted);
        assert!(session.begin_vote(2).is_ok());
    }
}
