//! # UI Module
//!
//! Everything the bot shows in a text channel: cards, the self-healing status
//! message, its reaction remote control and the interactive prompts.

pub mod controls;
pub mod embeds;
pub mod prompts;
pub mod reply;
pub mod status;
