// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Layer
//!
//! Pure types for multi-agent coordination. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`lock`] | `LockLease`, `DEFAULT_LOCK_TTL` |
//! | [`error`] | `CoordinationError` |

pub mod error;
pub mod lock;

pub use error::*;
pub use lock::*;
