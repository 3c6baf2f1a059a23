//! Attendee client runtime.
//!
//! One control task owns the [`Session`] and multiplexes three periodic tasks
//! (data poll, results check, clock) plus votes typed on stdin. Requests are
//! spawned so the loop keeps ticking while they are in flight.

use std::future::pending;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::models::{Couple, Snapshot};
use crate::poll::Session;
use crate::services::ApiClient;
use crate::view::View;
use crate::vote::PendingVote;
use crate::voter::VoterStorage;

/// A line typed by the attendee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Vote(i64),
    Refresh,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match (words.next()?, words.next()) {
            ("vote", Some(id)) => Self::Vote(id.parse().ok()?),
            ("refresh", None) => Self::Refresh,
            _ => return None,
        };
        words.next().is_none().then_some(command)
    }
}

fn ticker(period: std::time::Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Resolves when the task in `slot` finishes; never resolves for an empty slot.
async fn join<T>(slot: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match slot.as_mut() {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

type Joined<T> = Result<Result<T, ClientError>, JoinError>;

fn flatten<T>(joined: Joined<T>) -> Result<T, ClientError> {
    joined.unwrap_or_else(|e| Err(ClientError::Malformed(format!("request task failed: {e}"))))
}

struct Runtime<S: VoterStorage, V: View> {
    client: ApiClient,
    session: Session<S, V>,
    poll_task: Option<JoinHandle<Result<Snapshot, ClientError>>>,
    results_task: Option<JoinHandle<Result<bool, ClientError>>>,
    vote_task: Option<(PendingVote, JoinHandle<Result<Couple, ClientError>>)>,
}

impl<S: VoterStorage, V: View> Runtime<S, V> {
    fn new(client: ApiClient, session: Session<S, V>) -> Self {
        Self {
            client,
            session,
            poll_task: None,
            results_task: None,
            vote_task: None,
        }
    }

    fn start_poll(&mut self) {
        if !self.session.try_begin_poll() {
            return;
        }
        let client = self.client.clone();
        self.poll_task = Some(tokio::spawn(async move { client.fetch_snapshot().await }));
    }

    fn start_results_check(&mut self) {
        if self.results_task.is_some() {
            debug!("Results check still in flight, skipping tick");
            return;
        }
        let client = self.client.clone();
        self.results_task = Some(tokio::spawn(async move { client.results_visible().await }));
    }

    fn start_vote(&mut self, couple_id: i64) {
        match self.session.begin_vote(couple_id) {
            Ok(pending) => {
                let client = self.client.clone();
                let handle = tokio::spawn(async move { client.vote(couple_id).await });
                self.vote_task = Some((pending, handle));
            }
            Err(e) => warn!(couple_id, error = %e, "Vote not sent"),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Vote(couple_id) => self.start_vote(couple_id),
            Command::Refresh => self.start_poll(),
        }
    }

    fn finish_poll(&mut self, joined: Joined<Snapshot>) {
        self.poll_task = None;
        // Errors are already logged and surfaced by the session.
        let _ = self.session.finish_poll(flatten(joined));
    }

    fn finish_results_check(&mut self, joined: Joined<bool>) {
        self.results_task = None;
        match flatten(joined) {
            Ok(visible) => {
                self.session.apply_results_visibility(visible);
            }
            Err(e) => warn!(error = %e, "Results check failed"),
        }
    }

    /// A confirmed vote triggers an immediate refresh and results check.
    fn finish_vote(&mut self, joined: Joined<Couple>) {
        let Some((pending, _)) = self.vote_task.take() else {
            return;
        };
        if self.session.complete_vote(pending, flatten(joined)).is_ok() {
            self.start_poll();
            self.start_results_check();
        }
    }
}

async fn join_vote(
    slot: &mut Option<(PendingVote, JoinHandle<Result<Couple, ClientError>>)>,
) -> Joined<Couple> {
    match slot.as_mut() {
        Some((_, handle)) => handle.await,
        None => pending().await,
    }
}

/// Runs the client until stdin closes and the process is stopped. There is
/// no other shutdown path.
pub async fn run<S: VoterStorage, V: View>(
    config: &ClientConfig,
    session: Session<S, V>,
) -> Result<(), ClientError> {
    let client = ApiClient::new(&config.api_url, config.request_timeout)?;
    info!(api_url = %config.api_url, "Watching for updates");

    let mut runtime = Runtime::new(client, session);

    let mut poll_tick = ticker(config.poll_interval);
    let mut results_tick = ticker(config.results_interval);
    let mut clock_tick = ticker(config.clock_interval);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = poll_tick.tick() => runtime.start_poll(),
            _ = results_tick.tick() => runtime.start_results_check(),
            _ = clock_tick.tick() => runtime.session.view.clock(Local::now()),

            joined = join(&mut runtime.poll_task) => runtime.finish_poll(joined),
            joined = join(&mut runtime.results_task) => runtime.finish_results_check(joined),
            joined = join_vote(&mut runtime.vote_task) => runtime.finish_vote(joined),

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match Command::parse(&line) {
                    Some(command) => runtime.handle_command(command),
                    None if line.trim().is_empty() => {}
                    None => warn!(input = %line.trim(), "Unknown command, expected `vote <id>` or `refresh`"),
                },
                Ok(None) => {
                    debug!("stdin closed, continuing without input");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
        }
    }
}
