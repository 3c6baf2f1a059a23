// models.rs
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Number of contestants seeded on first boot.
pub const ROSTER_SIZE: i64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Couple {
    pub id: i64,
    pub name: String,
    pub image: String,
    pub votes: u64,
}

/// Full application state as served by `GET /api/data`.
///
/// The same shape is what the file backend keeps on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub couples: Vec<Couple>,
    pub results_visible: bool,
    #[serde(default)]
    pub last_reset: i64,
}

impl Snapshot {
    /// The state a fresh deployment starts from.
    pub fn seeded() -> Self {
        Self {
            couples: seed_roster(),
            results_visible: false,
            last_reset: 0,
        }
    }

    /// Checks the invariants a well-formed snapshot holds: unique ids and a
    /// non-negative reset timestamp.
    pub fn validate(&self) -> Result<(), String> {
        if self.last_reset < 0 {
            return Err(format!("negative lastReset {}", self.last_reset));
        }

        let mut seen = HashSet::with_capacity(self.couples.len());
        for couple in &self.couples {
            if !seen.insert(couple.id) {
                return Err(format!("duplicate couple id {}", couple.id));
            }
        }

        Ok(())
    }

    pub fn sort(&mut self) {
        self.couples.sort_by_key(|c| c.id);
    }
}

pub fn seed_roster() -> Vec<Couple> {
    (1..=ROSTER_SIZE)
        .map(|id| Couple {
            id,
            name: format!("Couple #{id}"),
            image: if id == 1 {
                "photos/1.jpg".to_string()
            } else {
                format!("photos/{id}.webp")
            },
            votes: 0,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub couple_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub success: bool,
    pub couple: Option<Couple>,
}

/// Admin edit of a contestant's display metadata. Votes are not editable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoupleUpdate {
    pub id: i64,
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub success: bool,
    pub last_reset: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsStatus {
    pub results_visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplesResponse {
    pub success: bool,
    pub couples: Vec<Couple>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_wire_shape() {
        let raw = json!({
            "couples": [
                {"id": 2, "name": "B", "image": "", "votes": 3},
                {"id": 1, "name": "A", "image": "", "votes": 0}
            ],
            "resultsVisible": true,
            "lastReset": 1000
        });

        let mut snapshot: Snapshot = serde_json::from_value(raw).unwrap();
        assert!(snapshot.results_visible);
        assert_eq!(snapshot.last_reset, 1000);

        snapshot.sort();
        let ids: Vec<i64> = snapshot.couples.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_snapshot_rejects_negative_votes() {
        let raw = json!({
            "couples": [{"id": 1, "name": "A", "image": "", "votes": -1}],
            "resultsVisible": false,
            "lastReset": 0
        });

        assert!(serde_json::from_value::<Snapshot>(raw).is_err());
    }

    #[test]
    fn test_validate_duplicate_ids() {
        let mut snapshot = Snapshot::seeded();
        snapshot.couples.push(snapshot.couples[0].clone());

        let err = snapshot.validate().unwrap_err();
        assert!(err.contains("duplicate couple id 1"));
    }

    #[test]
    fn test_seeded_roster() {
        let snapshot = Snapshot::seeded();
        assert_eq!(snapshot.couples.len(), 15);
        assert!(snapshot.couples.iter().all(|c| c.votes == 0));
        assert_eq!(snapshot.couples[0].image, "photos/1.jpg");
        assert_eq!(snapshot.couples[14].image, "photos/15.webp");
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn test_vote_request_without_id() {
        let req: VoteRequest = serde_json::from_value(json!({})).unwrap();
        assert!(req.couple_id.is_none());

        let req: VoteRequest = serde_json::from_value(json!({"coupleId": 7})).unwrap();
        assert_eq!(req.couple_id, Some(7));
    }
}
