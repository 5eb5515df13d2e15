/// Single-slot cache for one authenticated session per transport strategy.
///
/// Exactly one session exists per process and backend; a successful
/// re-authentication replaces the slot wholesale, and any remote call that
/// signals session-invalid clears it. Two concurrent runs against different
/// fulfillment modes would race on this slot — unsupported by design.
#[derive(Debug, Default)]
pub struct SessionStore<S> {
    slot: Option<S>,
}

impl<S> SessionStore<S> {
    pub fn new() -> Self {
        Self { slot: None }
    }

    pub fn get(&self) -> Option<&S> {
        self.slot.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut S> {
        self.slot.as_mut()
    }

    /// Replace the cached session wholesale. Never merges.
    pub fn replace(&mut self, session: S) -> &mut S {
        self.slot.insert(session)
    }

    /// Discard the cached session, forcing full re-authentication on the
    /// next acquire.
    pub fn invalidate(&mut self) -> Option<S> {
        self.slot.take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_overwrites_wholesale() {
        let mut store: SessionStore<&str> = SessionStore::new();
        assert!(store.is_empty());
        store.replace("first");
        store.replace("second");
        assert_eq!(store.get(), Some(&"second"));
    }

    #[test]
    fn test_invalidate_empties_slot() {
        let mut store = SessionStore::new();
        store.replace(42);
        assert_eq!(store.invalidate(), Some(42));
        assert!(store.is_empty());
        assert_eq!(store.invalidate(), None);
    }
}
