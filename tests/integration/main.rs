//! Integration test suite.
//!
//! Exercises the full placement → settlement → ledger flow against an
//! in-memory store, with scripted feeds standing in for the external
//! odds and result collaborators.

mod mock_feeds;
mod simulation;
