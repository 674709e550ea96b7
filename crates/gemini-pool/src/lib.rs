//! Credential pool for Gemini API keys
//!
//! Manages an ordered list of API keys with a single active credential,
//! per-key cooldown tracking, and a concurrent tier prober. The pool owns
//! the bound client for the active key; callers take an `Arc` snapshot of
//! it and report rate limits back so rotation can skip cooling keys.
//!
//! Key lifecycle:
//! 1. Operator adds a key → format validated, appended with `Unknown` tier
//! 2. First key in an empty pool is bound immediately; bind failure rolls
//!    the insert back
//! 3. Caller hits a quota error → key enters cooldown, `rotate_next` scans
//!    circularly for the next bindable, non-cooling key
//! 4. Cooldown expires → the key is eligible again on the next scan
//! 5. Prober classifies every key as paid / standard / rate-limited /
//!    invalid and records observed tiers

pub mod cooldown;
pub mod pool;
pub mod probe;

pub use cooldown::{CooldownTable, DEFAULT_COOLDOWN};
pub use pool::{
    AddOutcome, AddSummary, BindError, Binder, KeyEntry, KeyPool, KeyTier, RemoveOutcome,
    RotateOutcome, SetActiveOutcome, mask_key,
};
pub use probe::{DEFAULT_PROBE_CONCURRENCY, ProbeConfig, ProbeReport, ProbedKey, probe_pool};
