//! Query grader: runs student SQL against a read-only database and checks
//! the result against a task's reference query.
//!
//! The pipeline is [`guard`] → [`executor`] → [`compare`], driven by
//! [`verify::Verifier`].

pub mod audit;
pub mod catalog;
pub mod cli;
pub mod compare;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod guard;
pub mod logging;
pub mod verify;
