//! Command line front end of the IC tree engine.
//!
//! Subcommands create tree versions from calibration files, list the versions
//! of a collection, dump a tree's master tables and delegate dataset lookups
//! to the finder tool.

pub mod cli;
