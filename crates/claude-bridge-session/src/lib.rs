// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod registry;

mod bridge;
mod mock;
mod sdk;
mod transport;

pub use bridge::SessionBridge;
pub use mock::{ScriptedMockSdk, ScriptedSessionManager};
pub use sdk::{
    AuthCredentials, InferenceSdk, SdkError, SessionHandle, SessionManager, StartSessionParams,
    TokenSink, CODE_SESSION_NOT_ACTIVE, CODE_SESSION_NOT_FOUND,
};
pub use transport::HttpSdk;
