//! What the client shows, as an observer of the session.

use std::io::Write;

use chrono::{DateTime, Local};

use crate::models::Couple;

/// Which screen the attendee is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Gallery,
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Enabled,
    Disabled,
}

/// One contestant as displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub id: i64,
    pub name: String,
    pub image: String,
    pub votes: u64,
    /// This browser's vote went to this card.
    pub voted: bool,
    pub control: Control,
}

impl Card {
    pub fn new(couple: &Couple, voted_for: Option<i64>, control: Control) -> Self {
        Self {
            id: couple.id,
            name: couple.name.clone(),
            image: couple.image.clone(),
            votes: couple.votes,
            voted: voted_for == Some(couple.id),
            control,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Votes were reset on the server; voting is open again.
    VotesReset,
    VoteConfirmed { couple: Couple },
    VoteFailed { reason: String },
    PollFailed { reason: String },
}

pub trait View {
    /// Rebuild every card from scratch.
    fn render(&mut self, cards: &[Card]);

    /// Refresh vote counters of already-rendered cards.
    fn update_counts(&mut self, cards: &[Card]);

    /// Refresh vote controls and the voted marker of already-rendered cards.
    fn update_controls(&mut self, cards: &[Card]);

    fn notify(&mut self, notice: &Notice);

    fn navigate(&mut self, location: Location);

    fn clock(&mut self, _now: DateTime<Local>) {}
}

/// Line-oriented rendition for a terminal.
pub struct TerminalView<W: Write> {
    out: W,
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{text}") {
            tracing::warn!("Failed to write to terminal: {e}");
        }
    }
}

fn card_line(card: &Card) -> String {
    let action = match (card.voted, card.control) {
        (true, _) => "your vote",
        (false, Control::Enabled) => "vote",
        (false, Control::Disabled) => "closed",
    };
    format!("  #{:<3} {:<30} {:>5} votes  [{action}]", card.id, card.name, card.votes)
}

impl<W: Write> View for TerminalView<W> {
    fn render(&mut self, cards: &[Card]) {
        self.line("---- contestants ----");
        for card in cards {
            let line = card_line(card);
            self.line(&line);
        }
    }

    fn update_counts(&mut self, cards: &[Card]) {
        let counts = cards
            .iter()
            .map(|c| format!("#{}={}", c.id, c.votes))
            .collect::<Vec<_>>()
            .join(" ");
        self.line(&format!("votes: {counts}"));
    }

    fn update_controls(&mut self, cards: &[Card]) {
        let open = cards.iter().any(|c| c.control == Control::Enabled);
        match cards.iter().find(|c| c.voted) {
            Some(card) => self.line(&format!("you voted for #{} {}", card.id, card.name)),
            None if open => self.line("voting is open: type `vote <id>`"),
            None => self.line("voting is closed"),
        }
    }

    fn notify(&mut self, notice: &Notice) {
        let text = match notice {
            Notice::VotesReset => "votes were reset, you can vote again".to_string(),
            Notice::VoteConfirmed { couple } => {
                format!("*** thank you! vote for {} counted ***", couple.name)
            }
            Notice::VoteFailed { reason } => format!("vote failed: {reason}"),
            Notice::PollFailed { reason } => format!("could not refresh: {reason}"),
        };
        self.line(&text);
    }

    fn navigate(&mut self, location: Location) {
        match location {
            Location::Results => self.line("==== results are live ===="),
            Location::Gallery => self.line("==== back to the gallery ===="),
        }
    }

    fn clock(&mut self, now: DateTime<Local>) {
        let text = now.format("%H:%M:%S").to_string();
        self.line(&text);
    }
}
