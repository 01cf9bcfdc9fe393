// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Signal delivery into the reactor: process-wide signum ownership plus the
//! per-base self-pipe that turns deliveries into fd readability.

mod signal_pipe;
mod signal_registry;

pub(crate) use signal_pipe::*;
pub(crate) use signal_registry::*;
