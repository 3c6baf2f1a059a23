// services.rs
//! Typed client for the voting API.
//!
//! Every response is decoded into a concrete type at this boundary; anything
//! that does not fit is a [`ClientError::Malformed`].

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ClientError;
use crate::handlers::ADMIN_PASSWORD_HEADER;
use crate::models::{
    Couple, CoupleUpdate, CouplesResponse, ErrorBody, ResetResponse, ResultsStatus, Snapshot,
    VoteRequest, VoteResponse,
};

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        debug!(status, bytes = body.len(), "API response");
        decode(status, &body)
    }

    /// Fetch the full application state, contestants sorted by id.
    pub async fn fetch_snapshot(&self) -> Result<Snapshot, ClientError> {
        let mut snapshot: Snapshot = self.send(self.http.get(self.url("/data"))).await?;
        snapshot.validate().map_err(ClientError::Malformed)?;
        snapshot.sort();
        Ok(snapshot)
    }

    pub async fn results_visible(&self) -> Result<bool, ClientError> {
        let status: ResultsStatus = self.send(self.http.get(self.url("/results-status"))).await?;
        Ok(status.results_visible)
    }

    /// Ask the server to add one vote. Not idempotent: every successful call
    /// counts.
    pub async fn vote(&self, couple_id: i64) -> Result<Couple, ClientError> {
        let request = self.http.post(self.url("/vote")).json(&VoteRequest {
            couple_id: Some(couple_id),
        });

        match self.send::<VoteResponse>(request).await {
            Ok(response) => accept_vote(couple_id, response),
            Err(ClientError::Rejected { status: 400 | 404, message }) => {
                Err(ClientError::Validation(message))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn reset(&self, password: &str) -> Result<i64, ClientError> {
        let request = self
            .http
            .post(self.url("/reset"))
            .header(ADMIN_PASSWORD_HEADER, password);
        let response: ResetResponse = self.send(request).await?;
        Ok(response.last_reset)
    }

    pub async fn toggle_results(&self, password: &str) -> Result<bool, ClientError> {
        let request = self
            .http
            .post(self.url("/toggle-results"))
            .header(ADMIN_PASSWORD_HEADER, password);
        let status: ResultsStatus = self.send(request).await?;
        Ok(status.results_visible)
    }

    pub async fn update_couples(
        &self,
        password: &str,
        updates: &[CoupleUpdate],
    ) -> Result<Vec<Couple>, ClientError> {
        let request = self
            .http
            .put(self.url("/couples"))
            .header(ADMIN_PASSWORD_HEADER, password)
            .json(updates);
        let response: CouplesResponse = self.send(request).await?;
        if !response.success {
            return Err(ClientError::Rejected {
                status: 200,
                message: "update was not applied".to_string(),
            });
        }
        Ok(response.couples)
    }
}

/// Turns a status code and body into `T`, or the matching error.
fn decode<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<T, ClientError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_slice::<ErrorBody>(body)
            .map(|e| e.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
        return Err(ClientError::Rejected { status, message });
    }

    serde_json::from_slice(body).map_err(|e| ClientError::Malformed(e.to_string()))
}

fn accept_vote(couple_id: i64, response: VoteResponse) -> Result<Couple, ClientError> {
    if !response.success {
        return Err(ClientError::Rejected {
            status: 200,
            message: "vote was not accepted".to_string(),
        });
    }

    match response.couple {
        Some(couple) if couple.id == couple_id => Ok(couple),
        Some(couple) => Err(ClientError::Malformed(format!(
            "voted for {couple_id} but server returned couple {}",
            couple.id
        ))),
        None => Err(ClientError::Malformed(
            "vote response without couple".to_string(),
        )),
    }
}
