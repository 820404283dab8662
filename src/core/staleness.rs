use std::{
    cmp::max,
    ops::{BitOr, BitOrAssign},
};

/// Staleness of a derivation (and of a single observer edge).
///
/// Ordered from "no knowledge needed" to "must recompute"; combining two
/// states with `|` keeps the stronger one.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum DependenciesState {
    /// Never tracked, or tracking was torn down (disposal, suspension).
    NotTracking,
    /// The last run's result is still valid.
    UpToDate,
    /// An upstream computed value may have changed; must re-check by
    /// re-reading the upstream computeds before deciding to recompute.
    PossiblyStale,
    /// An upstream observable definitely changed; must recompute.
    Stale,
}

impl DependenciesState {
    pub fn from_is_stale(is_stale: bool) -> Self {
        if is_stale {
            DependenciesState::Stale
        } else {
            DependenciesState::UpToDate
        }
    }
    pub fn is_up_to_date(self) -> bool {
        self == DependenciesState::UpToDate
    }

    /// True if dependants must be told when this state is entered from the
    /// current one.
    ///
    /// Moving from `PossiblyStale` to `Stale` needs no notification: the
    /// earlier `PossiblyStale` notification already scheduled the re-check.
    pub fn needs_notify(self) -> bool {
        self.is_up_to_date()
    }
}

impl BitOr for DependenciesState {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        max(self, rhs)
    }
}
impl BitOrAssign for DependenciesState {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

/// The two levels an invalidation can carry.
///
/// Observables propagate `Stale`; computed values propagate
/// `PossiblyStale` until a recompute confirms the change.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Invalidation {
    Stale,
    PossiblyStale,
}

impl From<Invalidation> for DependenciesState {
    fn from(value: Invalidation) -> Self {
        match value {
            Invalidation::Stale => DependenciesState::Stale,
            Invalidation::PossiblyStale => DependenciesState::PossiblyStale,
        }
    }
}

impl BitOr<Invalidation> for DependenciesState {
    type Output = Self;
    fn bitor(self, rhs: Invalidation) -> Self {
        max(self, rhs.into())
    }
}
impl BitOrAssign<Invalidation> for DependenciesState {
    fn bitor_assign(&mut self, rhs: Invalidation) {
        *self = *self | rhs;
    }
}
