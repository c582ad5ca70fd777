//! # Player Module
//!
//! Per-guild playback controller for Open Music Bot.
//!
//! ## Architecture
//!
//! ### [`session`] - Playback Session
//! - Owns the queue, the vote ledger, the current track and the status message
//! - Runs the playback loop and the periodic status refresher
//! - Tears itself down after the idle window or on stop
//!
//! ### [`registry`] - Session Registry
//! - One live [`session::Session`] per guild, created on demand
//!
//! ### [`events`] - Backend Events
//! - Typed lifecycle events tagged with a playback token
//! - A single router task applies them in arrival order
//!
//! ### [`backend`] - Audio Backend
//! - Search and playback behind [`backend::AudioBackend`]
//! - [`songbird_backend::SongbirdBackend`] plays through songbird + yt-dlp

pub mod backend;
pub mod equalizer;
pub mod events;
pub mod queue;
pub mod registry;
pub mod session;
pub mod songbird_backend;
pub mod track;
pub mod votes;
