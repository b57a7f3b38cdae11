// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat client that keeps one logical session across reconnects.

pub mod driver;
pub mod session;

pub use driver::{ensure_crypto, ChatClient, ClientConfig, ClientEvent, SessionEnd};
pub use session::{ReconnectPolicy, Reconnector, SendError, SessionState};
