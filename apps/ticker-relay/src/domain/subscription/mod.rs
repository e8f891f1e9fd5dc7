//! Broadcast Group Membership
//!
//! Domain types for tracking which downstream sessions are joined to which
//! symbol group. A group is named by its symbol and exists while at least one
//! session is a member.
//!
//! # Design
//!
//! The registry tracks:
//! - Which symbols each session is joined to
//! - How many sessions are joined to each symbol
//!
//! Upstream reference counting lives with the shared streams themselves; the
//! registry only answers "who should see ticks for this symbol".

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::streaming::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a downstream session.
pub type SessionId = String;

// =============================================================================
// Membership State
// =============================================================================

#[derive(Debug, Default)]
struct MembershipState {
    /// Map from session ID to the groups it has joined.
    session_groups: HashMap<SessionId, HashSet<Symbol>>,
    /// Map from group symbol to its members.
    group_members: HashMap<Symbol, HashSet<SessionId>>,
}

impl MembershipState {
    /// Returns true if the group was created by this join.
    fn join(&mut self, session: &str, symbol: &Symbol) -> bool {
        let groups = self.session_groups.entry(session.to_string()).or_default();
        if !groups.insert(symbol.clone()) {
            return false;
        }

        let members = self.group_members.entry(symbol.clone()).or_default();
        members.insert(session.to_string());
        members.len() == 1
    }

    /// Returns true if the group became empty and was removed.
    fn leave(&mut self, session: &str, symbol: &Symbol) -> bool {
        let Some(groups) = self.session_groups.get_mut(session) else {
            return false;
        };

        if !groups.remove(symbol) {
            return false;
        }

        if groups.is_empty() {
            self.session_groups.remove(session);
        }

        self.remove_member(session, symbol)
    }

    /// Returns the groups that became empty.
    fn leave_all(&mut self, session: &str) -> Vec<Symbol> {
        let Some(groups) = self.session_groups.remove(session) else {
            return vec![];
        };

        groups
            .into_iter()
            .filter(|symbol| self.remove_member(session, symbol))
            .collect()
    }

    fn remove_member(&mut self, session: &str, symbol: &Symbol) -> bool {
        let Some(members) = self.group_members.get_mut(symbol) else {
            return false;
        };

        members.remove(session);
        if members.is_empty() {
            self.group_members.remove(symbol);
            return true;
        }
        false
    }
}

// =============================================================================
// Group Registry
// =============================================================================

/// Thread-safe registry of symbol groups and their member sessions.
///
/// # Example
///
/// ```rust
/// use ticker_relay::domain::subscription::GroupRegistry;
/// use ticker_relay::Symbol;
///
/// let registry = GroupRegistry::new();
/// let aapl = Symbol::parse("AAPL").unwrap();
///
/// // First member creates the group
/// assert!(registry.join("a", &aapl));
/// // Second member joins the existing group
/// assert!(!registry.join("b", &aapl));
///
/// // Group survives while a member remains
/// assert!(!registry.leave("a", &aapl));
/// assert!(registry.leave("b", &aapl));
/// ```
#[derive(Debug, Default)]
pub struct GroupRegistry {
    state: RwLock<MembershipState>,
}

impl GroupRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a session to a symbol's group.
    ///
    /// Returns true if this join created the group. Joining twice is a no-op.
    pub fn join(&self, session: &str, symbol: &Symbol) -> bool {
        self.state.write().join(session, symbol)
    }

    /// Remove a session from a symbol's group.
    ///
    /// Returns true if the group is now empty.
    pub fn leave(&self, session: &str, symbol: &Symbol) -> bool {
        self.state.write().leave(session, symbol)
    }

    /// Remove a session from every group it joined.
    ///
    /// Returns the groups that became empty.
    pub fn leave_all(&self, session: &str) -> Vec<Symbol> {
        self.state.write().leave_all(session)
    }

    /// Check whether a session is currently joined to a symbol's group.
    #[must_use]
    pub fn is_member(&self, session: &str, symbol: &Symbol) -> bool {
        self.state
            .read()
            .group_members
            .get(symbol)
            .is_some_and(|members| members.contains(session))
    }

    /// Get the members of a symbol's group.
    #[must_use]
    pub fn members(&self, symbol: &Symbol) -> Vec<SessionId> {
        self.state
            .read()
            .group_members
            .get(symbol)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get the groups a session is joined to.
    #[must_use]
    pub fn session_groups(&self, session: &str) -> Vec<Symbol> {
        self.state
            .read()
            .session_groups
            .get(session)
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get membership statistics.
    #[must_use]
    pub fn stats(&self) -> GroupStats {
        let state = self.state.read();
        GroupStats {
            group_count: state.group_members.len(),
            session_count: state.session_groups.len(),
            membership_count: state.group_members.values().map(HashSet::len).sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Group membership statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Number of non-empty groups.
    pub group_count: usize,
    /// Number of sessions joined to at least one group.
    pub session_count: usize,
    /// Total (session, group) memberships.
    pub membership_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn join_creates_group_once() {
        let registry = GroupRegistry::new();

        assert!(registry.join("a", &sym("AAPL")));
        assert!(!registry.join("b", &sym("AAPL")));
        assert_eq!(registry.members(&sym("AAPL")).len(), 2);
    }

    #[test]
    fn duplicate_join_is_noop() {
        let registry = GroupRegistry::new();

        registry.join("a", &sym("AAPL"));
        assert!(!registry.join("a", &sym("AAPL")));
        assert_eq!(registry.stats().membership_count, 1);
    }

    #[test]
    fn leave_with_remaining_members() {
        let registry = GroupRegistry::new();

        registry.join("a", &sym("AAPL"));
        registry.join("b", &sym("AAPL"));

        assert!(!registry.leave("a", &sym("AAPL")));
        assert!(!registry.is_member("a", &sym("AAPL")));
        assert!(registry.is_member("b", &sym("AAPL")));
    }

    #[test]
    fn leave_last_member_removes_group() {
        let registry = GroupRegistry::new();

        registry.join("a", &sym("AAPL"));

        assert!(registry.leave("a", &sym("AAPL")));
        assert_eq!(registry.stats(), GroupStats::default());
    }

    #[test]
    fn leave_unknown_membership_no_changes() {
        let registry = GroupRegistry::new();

        registry.join("a", &sym("AAPL"));

        assert!(!registry.leave("b", &sym("AAPL")));
        assert!(!registry.leave("a", &sym("MSFT")));
        assert_eq!(registry.members(&sym("AAPL")), vec!["a".to_string()]);
    }

    #[test]
    fn leave_all_cleans_up_session() {
        let registry = GroupRegistry::new();

        registry.join("a", &sym("AAPL"));
        registry.join("a", &sym("BTCUSDT"));
        registry.join("b", &sym("AAPL"));

        let emptied = registry.leave_all("a");

        assert_eq!(emptied, vec![sym("BTCUSDT")]);
        assert!(registry.session_groups("a").is_empty());
        assert_eq!(registry.members(&sym("AAPL")), vec!["b".to_string()]);
    }

    #[test]
    fn leave_all_unknown_session_empty() {
        let registry = GroupRegistry::new();
        assert!(registry.leave_all("ghost").is_empty());
    }

    #[test]
    fn stats_are_accurate() {
        let registry = GroupRegistry::new();

        registry.join("a", &sym("AAPL"));
        registry.join("a", &sym("MSFT"));
        registry.join("b", &sym("AAPL"));

        let stats = registry.stats();
        assert_eq!(stats.group_count, 2);
        assert_eq!(stats.session_count, 2);
        assert_eq!(stats.membership_count, 3);
    }

    #[test]
    fn thread_safety_concurrent_joins_and_leaves() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(GroupRegistry::new());
        let mut handles = vec![];

        for i in 0..10 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                let session = format!("s{i}");
                r.join(&session, &sym("SHARED"));
                r.join(&session, &sym(&format!("SYM{i}")));
                r.leave_all(&session);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.stats(), GroupStats::default());
    }
}
