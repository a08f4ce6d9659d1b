use crate::services::keys::material::Jwk;

/// Picks the key to use out of a published key set.
///
/// `hint` is the `kid` the caller expects (ID token header, configured RP kid).
pub trait KeySelector: Send + Sync {
    fn select_key(&self, candidates: &[Jwk], hint: Option<&str>) -> Option<Jwk>;
}

/// Lookup by `kid`; first entry only when no hint is given.
///
/// A hint that matches nothing selects nothing: another key is never
/// substituted for the one the token names.
#[derive(Debug, Clone, Copy, Default)]
pub struct KidSelector;

impl KeySelector for KidSelector {
    fn select_key(&self, candidates: &[Jwk], hint: Option<&str>) -> Option<Jwk> {
        match hint {
            Some(kid) => candidates
                .iter()
                .find(|k| k.kid.as_deref() == Some(kid))
                .cloned(),
            None => candidates.first().cloned(),
        }
    }
}

/// Legacy behaviour: always `keys[0]`.
///
/// Only correct while exactly one key is published per set.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstKeySelector;

impl KeySelector for FirstKeySelector {
    fn select_key(&self, candidates: &[Jwk], _hint: Option<&str>) -> Option<Jwk> {
        candidates.first().cloned()
    }
}
