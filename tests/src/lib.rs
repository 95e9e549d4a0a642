//! # OCPP Exchange Test Suite
//!
//! Cross-crate tests: whole networks of engines talking over in-memory links.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs        # TestNetwork, actions, signing helpers
//! └── integration/
//!     ├── scenarios.rs  # end-to-end exchanges
//!     ├── relaying.rs   # multi-hop paths and failures along them
//!     └── properties.rs # proptest invariants
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p ocpp-tests
//! cargo test -p ocpp-tests integration::relaying::
//!
//! # Benchmarks
//! cargo bench -p ocpp-tests
//! ```

pub mod harness;
pub mod integration;
