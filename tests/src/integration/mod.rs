//! Multi-node integration tests.

mod properties;
mod relaying;
mod scenarios;
