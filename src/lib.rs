//! Event voting: a small HTTP API over a JSON-file or PostgreSQL store, and an
//! attendee client that polls it, reconciles its view, and casts one vote per
//! browser.
//!
//! Server side: [`db`], [`handlers`], [`routes`], [`state`].
//! Client side: [`services`], [`poll`], [`vote`], [`voter`], [`view`], [`watch`].

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod poll;
pub mod routes;
pub mod services;
pub mod state;
pub mod view;
pub mod vote;
pub mod voter;
pub mod watch;
