//! Console tooling shared between firmware and emulator targets.
//!
//! The command grammar lives in [`grammar`] and is implemented with a
//! lex/parse pipeline that stays compatible with `no_std`; [`commands`]
//! executes parsed commands against the controller state and [`status`]
//! renders the replies.

pub mod commands;
pub mod grammar;
pub mod status;
