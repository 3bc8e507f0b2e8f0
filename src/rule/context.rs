//! What a rule sees while it infers.

use super::Shared;
use crate::key::Fact;
use crate::trie::FactTrie;

/// Handed to [`Rule::infer`](super::Rule::infer) on every pass.
///
/// The dirty flag is already cleared when `infer` starts, so a `posit` that
/// lands mid-pass is never lost: it re-arms the flag and the worker runs
/// another pass once this one returns.
///
/// Fact access is closure-scoped. The rule's lock is held only for the
/// duration of the closure, so a rule can read what it needs, let the
/// closure return, and then post derived facts anywhere, including back to
/// itself. Do not invoke other objects from inside the closure.
pub struct InferenceContext<'a> {
    pub(super) shared: &'a Shared,
    pub(super) pass: u64,
    pub(super) rule: &'a str,
}

impl InferenceContext<'_> {
    /// Run `read` against the private fact store.
    pub fn with_facts<R>(&self, read: impl FnOnce(&FactTrie<Fact>) -> R) -> R {
        read(&self.shared.lock().facts)
    }

    /// Run `update` with mutable access to the private fact store.
    ///
    /// Edits made here do not raise the dirty flag; only `posit` does.
    pub fn update_facts<R>(&self, update: impl FnOnce(&mut FactTrie<Fact>) -> R) -> R {
        update(&mut self.shared.lock().facts)
    }

    /// Copy of the private fact store.
    pub fn facts_snapshot(&self) -> FactTrie<Fact> {
        self.with_facts(FactTrie::clone)
    }

    /// True if a new fact arrived since this pass started.
    pub fn has_pending_change(&self) -> bool {
        self.shared.lock().dirty
    }

    /// True once the owner has asked the worker to stop.
    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().cancelled
    }

    /// 1-based pass counter.
    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn rule_name(&self) -> &str {
        self.rule
    }
}
