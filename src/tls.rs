//! Transport security protocol negotiation.
//!
//! Birst endpoints only accept TLS 1.2 or newer. A [`SecurityProtocolContext`]
//! widens the allowed protocol set held by a [`ProtocolSettings`] for the
//! duration of one call and restores the previous set when dropped. The
//! effective set is handed to the transport so each request is configured
//! with it directly.

use reqwest::tls::Version;
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};
use std::sync::{Arc, Mutex, MutexGuard};

/// A single TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TlsProtocol {
    #[serde(rename = "tls1.0")]
    Tls1_0,
    #[serde(rename = "tls1.1")]
    Tls1_1,
    #[serde(rename = "tls1.2")]
    Tls1_2,
    #[serde(rename = "tls1.3")]
    Tls1_3,
}

impl TlsProtocol {
    const ALL: [TlsProtocol; 4] = [Self::Tls1_0, Self::Tls1_1, Self::Tls1_2, Self::Tls1_3];

    fn bit(self) -> u8 {
        match self {
            Self::Tls1_0 => 1 << 0,
            Self::Tls1_1 => 1 << 1,
            Self::Tls1_2 => 1 << 2,
            Self::Tls1_3 => 1 << 3,
        }
    }

    fn version(self) -> Version {
        match self {
            Self::Tls1_0 => Version::TLS_1_0,
            Self::Tls1_1 => Version::TLS_1_1,
            Self::Tls1_2 => Version::TLS_1_2,
            Self::Tls1_3 => Version::TLS_1_3,
        }
    }
}

/// A set of allowed TLS protocol versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SecurityProtocols(u8);

impl SecurityProtocols {
    /// The protocol every Birst call requires.
    pub const REQUIRED: TlsProtocol = TlsProtocol::Tls1_2;

    /// An empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, protocol: TlsProtocol) -> bool {
        self.0 & protocol.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Protocols in the set, oldest first.
    pub fn iter(self) -> impl Iterator<Item = TlsProtocol> {
        TlsProtocol::ALL.into_iter().filter(move |p| self.contains(*p))
    }

    /// Lowest allowed version, for the transport's minimum.
    pub fn min_version(self) -> Option<Version> {
        self.iter().next().map(TlsProtocol::version)
    }

    /// Highest allowed version, for the transport's maximum.
    pub fn max_version(self) -> Option<Version> {
        self.iter().last().map(TlsProtocol::version)
    }
}

impl From<TlsProtocol> for SecurityProtocols {
    fn from(protocol: TlsProtocol) -> Self {
        Self(protocol.bit())
    }
}

impl FromIterator<TlsProtocol> for SecurityProtocols {
    fn from_iter<I: IntoIterator<Item = TlsProtocol>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |set, p| set | p)
    }
}

impl BitOr<TlsProtocol> for SecurityProtocols {
    type Output = Self;

    fn bitor(self, rhs: TlsProtocol) -> Self {
        Self(self.0 | rhs.bit())
    }
}

impl BitOr for SecurityProtocols {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign<TlsProtocol> for SecurityProtocols {
    fn bitor_assign(&mut self, rhs: TlsProtocol) {
        self.0 |= rhs.bit();
    }
}

/// Holder of the allowed protocol set for one client.
///
/// Cloning shares the underlying value. Active contexts are counted rather
/// than each saving and restoring a snapshot, so contexts may be entered and
/// dropped in any order: while at least one is alive the installed set is
/// `baseline | TLS 1.2`, and once the last one drops it is the baseline again.
#[derive(Debug, Clone, Default)]
pub struct ProtocolSettings {
    state: Arc<Mutex<ProtocolState>>,
}

#[derive(Debug, Default)]
struct ProtocolState {
    baseline: SecurityProtocols,
    active: usize,
}

impl ProtocolState {
    fn current(&self) -> SecurityProtocols {
        if self.active > 0 {
            self.baseline | SecurityProtocols::REQUIRED
        } else {
            self.baseline
        }
    }
}

impl ProtocolSettings {
    pub fn new(baseline: SecurityProtocols) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProtocolState { baseline, active: 0 })),
        }
    }

    /// The currently installed set.
    pub fn get(&self) -> SecurityProtocols {
        self.lock().current()
    }

    /// The set installed when no context is active.
    pub fn baseline(&self) -> SecurityProtocols {
        self.lock().baseline
    }

    /// Replace the baseline set.
    pub fn set(&self, protocols: SecurityProtocols) {
        self.lock().baseline = protocols;
    }

    fn lock(&self) -> MutexGuard<'_, ProtocolState> {
        // A poisoned lock still holds a valid bit set and count.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Scoped widening of a [`ProtocolSettings`] to include TLS 1.2.
///
/// The effective set is captured on entry and owned by the context, so the
/// call it configures is unaffected by other contexts entering or leaving.
#[derive(Debug)]
pub struct SecurityProtocolContext {
    settings: ProtocolSettings,
    original: SecurityProtocols,
    effective: SecurityProtocols,
}

impl SecurityProtocolContext {
    /// Enter the context, installing `current | TLS 1.2`.
    pub fn enter(settings: &ProtocolSettings) -> Self {
        let mut state = settings.lock();
        let original = state.current();
        state.active += 1;
        let effective = state.current();
        drop(state);

        Self {
            settings: settings.clone(),
            original,
            effective,
        }
    }

    /// The set installed by this context, used to configure the call.
    pub fn protocols(&self) -> SecurityProtocols {
        self.effective
    }

    /// The set that was installed when this context was entered.
    pub fn original(&self) -> SecurityProtocols {
        self.original
    }
}

impl Drop for SecurityProtocolContext {
    fn drop(&mut self) {
        let mut state = self.settings.lock();
        state.active = state.active.saturating_sub(1);
    }
}
