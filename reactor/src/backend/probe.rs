// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EVENT_NOEPOLL EVENT_NOPOLL EVENT_NOSELECT EVENT_SHOW_METHOD

//! Backend selection: tries candidates in a fixed priority order, honoring the
//! config's avoid set, required features, and the `EVENT_NO*` environment
//! variables.

use super::{Backend, BackendFeatures, BackendKind};
use crate::error::EventError;

#[cfg(target_os = "linux")]
const CANDIDATES: &[BackendKind] =
    &[BackendKind::Epoll, BackendKind::Poll, BackendKind::Select];
#[cfg(not(target_os = "linux"))]
const CANDIDATES: &[BackendKind] = &[BackendKind::Poll, BackendKind::Select];

/// What the probe needs to know from the base config.
pub(crate) struct ProbeRequest<'a> {
    pub(crate) avoid: &'a [BackendKind],
    pub(crate) require_features: BackendFeatures,
    pub(crate) ignore_env: bool,
    pub(crate) epoll_use_changelist: bool,
}

/// Binds the first surviving candidate. Fails with *no-backend-available*
/// when config/env filtering (or init failures) eliminate every candidate.
pub(crate) fn bind_backend(
    request: &ProbeRequest<'_>,
) -> Result<Box<dyn Backend>, EventError> {
    for &kind in CANDIDATES {
        if request.avoid.contains(&kind) {
            tracing::debug!(%kind, "backend avoided by config");
            continue;
        }
        if !request.ignore_env && disabled_by_env(kind) {
            tracing::debug!(%kind, "backend disabled by EVENT_NO* env var");
            continue;
        }
        let backend = match try_init(kind, request) {
            Ok(backend) => backend,
            Err(errno) => {
                tracing::warn!(%kind, %errno, "backend failed to initialize");
                continue;
            }
        };
        if !backend.features().contains(request.require_features) {
            tracing::debug!(%kind, "backend lacks required features");
            continue;
        }
        if show_method_requested(request.ignore_env) {
            tracing::info!(method = %kind, "using event notification method");
        }
        return Ok(backend);
    }
    Err(EventError::NoBackendAvailable)
}

fn try_init(
    kind: BackendKind,
    request: &ProbeRequest<'_>,
) -> Result<Box<dyn Backend>, rustix::io::Errno> {
    match kind {
        #[cfg(target_os = "linux")]
        BackendKind::Epoll => Ok(Box::new(super::EpollBackend::new(
            request.epoll_use_changelist,
        )?)),
        #[cfg(not(target_os = "linux"))]
        BackendKind::Epoll => Err(rustix::io::Errno::NOSYS),
        BackendKind::Poll => Ok(Box::new(super::PollBackend::new()?)),
        BackendKind::Select => Ok(Box::new(super::SelectBackend::new()?)),
    }
}

/// `EVENT_NOEPOLL=1` style kill switches, one per method name.
fn disabled_by_env(kind: BackendKind) -> bool {
    let var = format!("EVENT_NO{}", kind.to_string().to_uppercase());
    std::env::var_os(var).is_some()
}

fn show_method_requested(ignore_env: bool) -> bool {
    !ignore_env && std::env::var_os("EVENT_SHOW_METHOD").is_some()
}
