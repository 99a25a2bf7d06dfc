//! Othello opening book: command line front end, worker loop and
//! read-through book lookups

pub mod book;
pub mod config;
pub mod worker;

pub use book::Book;
pub use config::{Cli, Command};
pub use worker::{WorkSummary, Worker};
