// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The reactor itself: configuration, the shared core, the loop driver, the
//! activation/deferred queues, and the thread-wakeup notifier.

mod activation_queues;
mod arena;
mod base_config;
mod base_state;
mod event_base;
mod loop_driver;
mod notifier;

#[cfg(test)]
mod tests;

pub(crate) use activation_queues::*;
pub(crate) use arena::*;
pub use base_config::{ConfigFlags, EventConfig};
pub(crate) use base_state::*;
pub use event_base::EventBase;
pub(crate) use event_base::*;
pub use loop_driver::{LoopExit, LoopFlags};
pub(crate) use loop_driver::*;
pub(crate) use notifier::*;
