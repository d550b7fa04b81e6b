//! Origin tags for applied updates.
//!
//! Every transaction that touches the document carries one of these tags.
//! Providers compare the tag on incoming update notifications to decide
//! whether an update may be rebroadcast or persisted: an update that came
//! from a peer or from the local cache must never go back out.

use yrs::Origin;

/// Where an applied update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOrigin {
    /// Edit made in this context
    Local,
    /// Update received from a same-origin peer over the broadcast group
    FromPeer,
    /// Snapshot loaded from the local persistent cache
    FromCache,
}

impl UpdateOrigin {
    /// Wire tag stored in the `yrs` transaction origin.
    pub const fn as_str(&self) -> &'static str {
        match self {
            UpdateOrigin::Local => "local",
            UpdateOrigin::FromPeer => "from-peer",
            UpdateOrigin::FromCache => "from-cache",
        }
    }

    /// Classify a transaction origin.
    ///
    /// Untagged transactions and foreign tags count as local edits.
    pub fn of(origin: Option<&Origin>) -> Self {
        match origin {
            Some(o) if *o == Origin::from(UpdateOrigin::FromPeer.as_str()) => UpdateOrigin::FromPeer,
            Some(o) if *o == Origin::from(UpdateOrigin::FromCache.as_str()) => {
                UpdateOrigin::FromCache
            }
            _ => UpdateOrigin::Local,
        }
    }

    /// Whether an update with this origin may be rebroadcast to peers.
    pub fn should_broadcast(&self) -> bool {
        matches!(self, UpdateOrigin::Local)
    }

    /// Whether an update with this origin should (re)schedule a cache write.
    pub fn should_persist(&self) -> bool {
        matches!(self, UpdateOrigin::Local)
    }
}

impl From<UpdateOrigin> for Origin {
    fn from(origin: UpdateOrigin) -> Self {
        Origin::from(origin.as_str())
    }
}

impl std::fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_classification() {
        let peer: Origin = UpdateOrigin::FromPeer.into();
        let cache: Origin = UpdateOrigin::FromCache.into();
        let local: Origin = UpdateOrigin::Local.into();

        assert_eq!(UpdateOrigin::of(Some(&peer)), UpdateOrigin::FromPeer);
        assert_eq!(UpdateOrigin::of(Some(&cache)), UpdateOrigin::FromCache);
        assert_eq!(UpdateOrigin::of(Some(&local)), UpdateOrigin::Local);
        assert_eq!(UpdateOrigin::of(None), UpdateOrigin::Local);
    }

    #[test]
    fn test_foreign_origin_is_local() {
        let other = Origin::from("some-other-provider");
        assert_eq!(UpdateOrigin::of(Some(&other)), UpdateOrigin::Local);
    }

    #[test]
    fn test_propagation_rules() {
        assert!(UpdateOrigin::Local.should_broadcast());
        assert!(UpdateOrigin::Local.should_persist());
        assert!(!UpdateOrigin::FromPeer.should_broadcast());
        assert!(!UpdateOrigin::FromPeer.should_persist());
        assert!(!UpdateOrigin::FromCache.should_broadcast());
        assert!(!UpdateOrigin::FromCache.should_persist());
    }

    #[test]
    fn test_origin_tags() {
        assert_eq!(UpdateOrigin::Local.to_string(), "local");
        assert_eq!(UpdateOrigin::FromPeer.to_string(), "from-peer");
        assert_eq!(UpdateOrigin::FromCache.to_string(), "from-cache");
    }
}
