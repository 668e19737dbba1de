//! Operator console shared between firmware and emulator targets.
//!
//! The grammar lives in [`grammar`] and is implemented with a token/parse
//! pipeline that stays compatible with `no_std`; [`commands`] applies parsed
//! commands to the lifecycle.

pub mod commands;
pub mod grammar;
pub mod status;
