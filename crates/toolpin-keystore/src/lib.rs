//! # Toolpin Key Store - Trust-on-First-Use Key Pinning
//!
//! The Key Store protects consumers of remotely described tool schemas from
//! rug pulls. The first time a `(domain, tool)` pair is seen, the domain's
//! signing key is discovered and pinned; from then on only signatures made
//! by that pinned key are accepted, even if the domain starts advertising a
//! different key.
//!
//! ## Purpose
//!
//! This crate implements three capabilities:
//!
//! 1. **Durable Pins** - Sled-backed records keyed by `"{domain}/{tool_name}"`,
//!    with at most one active pin per tool id.
//!
//! 2. **Well-Known Discovery** - Bounded HTTP lookup of
//!    `https://{domain}/.well-known/schemapin.json` that degrades to `None`.
//!
//! 3. **Revocation** - Logical deletion that sends a tool back through
//!    discovery without erasing the history of what was trusted.
//!
//! ## Threat Model
//!
//! | Threat | Description | Defense |
//! |--------|-------------|---------|
//! | Rug Pull | Domain swaps its key and re-signs a malicious schema | Pinned key is the sole anchor |
//! | First-Trust Race | Two callers pin different keys concurrently | Compare-and-swap first-use path |
//! | Silent Overwrite | Operator or bug replaces an active pin | `PinOutcome::Replaced` surfaced for audit |
//! | Discovery Outage | Well-known endpoint down or slow | Timeout, `None`, deterministic policy |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        KEY STORE                         │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌────────────────────┐        ┌──────────────────────┐  │
//! │  │  DISCOVERY CLIENT  │        │    SLED PIN STORE    │  │
//! │  │                    │        │                      │  │
//! │  │  GET /.well-known/ │  key   │  tool_id → record    │  │
//! │  │  schemapin.json    │──────▶ │  • pinned key (PEM)  │  │
//! │  │  • timeout         │        │  • verification stats│  │
//! │  │  • TTL cache       │        │  • revoked flag      │  │
//! │  └────────────────────┘        └──────────────────────┘  │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use toolpin_keystore::{DiscoveryConfig, FirstUseOutcome, KeyStore};
//!
//! # async fn run() -> toolpin_keystore::Result<()> {
//! let store = KeyStore::open("./schemapin_keys.db", DiscoveryConfig::default())?;
//! let tool_id = "api.corp.com/database_query";
//!
//! match store.get_pinned_key(tool_id)? {
//!     Some(key) => println!("verify against pinned key {}", key),
//!     None => {
//!         if let Some(key) = store.discover("api.corp.com", Duration::from_secs(30)).await {
//!             // ...verify the signature against `key` first...
//!             match store.pin_first_use(tool_id, "api.corp.com", &key, None)? {
//!                 FirstUseOutcome::Pinned(outcome) => println!("pinned: {:?}", outcome),
//!                 FirstUseOutcome::AlreadyPinned(winner) => {
//!                     println!("someone else pinned {}", winner.fingerprint())
//!                 }
//!             }
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Considerations
//!
//! - **Fail Closed on Storage**: every storage failure is a `StoreError`.
//!   Treating an unreadable pin store as "nothing pinned" would reopen the
//!   first-use window for every tool.
//!
//! - **Discovery Is Advisory**: a discovered key is only pinned after a
//!   signature verified against it.
//!
//! - **Storage Security**: the Sled database is not encrypted at rest. Keep
//!   it on storage only the consuming process can write.

pub mod discovery;
pub mod error;
pub mod keystore;
pub mod models;
pub mod storage;

pub use discovery::{DiscoveryClient, DiscoveryConfig};
pub use error::{DiscoveryError, Result, StoreError};
pub use keystore::KeyStore;
pub use models::{
    key_fingerprint, FirstUseOutcome, KeyInfo, KeyMetadata, PinOutcome, PinnedKeyRecord, ToolId,
    WellKnownDocument,
};
