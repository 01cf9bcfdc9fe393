// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The pluggable readiness poller: the contract every backend implements, the
//! concrete epoll/poll/select implementations, batched subscription deltas,
//! and the probe that binds one backend per base.

mod backend_contract;
mod changelist;
#[cfg(target_os = "linux")]
mod epoll_backend;
mod poll_backend;
mod probe;
mod select_backend;

pub use backend_contract::{BackendFeatures, BackendKind};
pub(crate) use backend_contract::*;
pub(crate) use changelist::*;
#[cfg(target_os = "linux")]
pub(crate) use epoll_backend::*;
pub(crate) use poll_backend::*;
pub(crate) use probe::*;
pub(crate) use select_backend::*;
