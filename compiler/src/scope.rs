// scope.rs: Nested name → value environment
//
// A stack of bindings per name, plus an optional borrowed link to an
// enclosing scope that is consulted when a name has no local binding.
// Used for congruence facts during alignment analysis and for the rename
// map in uniquify.
//
// Preconditions: push/pop calls nest like the lexical bindings being walked.
// Postconditions: `get` returns the innermost binding, local frame first.
// Failure modes: `pop` of a name with no local binding returns `None`.
// Side effects: none.

use std::collections::HashMap;

/// A lexically nested environment.
///
/// The enclosing scope is borrowed, never owned: several scopes may hang off
/// one shared parent, and the parent must outlive them. Shadowing a name
/// locally hides, but does not modify, the enclosing binding.
#[derive(Debug)]
pub struct Scope<'p, T> {
    table: HashMap<String, Vec<T>>,
    containing: Option<&'p Scope<'p, T>>,
}

impl<T> Default for Scope<'_, T> {
    fn default() -> Self {
        Scope {
            table: HashMap::new(),
            containing: None,
        }
    }
}

impl<'p, T> Scope<'p, T> {
    /// An empty scope with no enclosing scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty scope whose lookups fall through to `containing`.
    pub fn with_containing(containing: &'p Scope<'p, T>) -> Self {
        Scope {
            table: HashMap::new(),
            containing: Some(containing),
        }
    }

    pub fn containing(&self) -> Option<&'p Scope<'p, T>> {
        self.containing
    }

    /// Bind `name` to `value`, shadowing any existing binding.
    pub fn push(&mut self, name: impl Into<String>, value: T) {
        self.table.entry(name.into()).or_default().push(value);
    }

    /// Remove the most recent local binding of `name`, uncovering whatever
    /// it shadowed. Enclosing scopes are never touched.
    pub fn pop(&mut self, name: &str) -> Option<T> {
        let stack = self.table.get_mut(name)?;
        let value = stack.pop();
        if stack.is_empty() {
            self.table.remove(name);
        }
        value
    }

    /// Innermost binding of `name`, searching the local frame and then the
    /// enclosing chain.
    pub fn get(&self, name: &str) -> Option<&T> {
        match self.table.get(name).and_then(|stack| stack.last()) {
            Some(value) => Some(value),
            None => self.containing.and_then(|parent| parent.get(name)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True if `name` is bound in this scope's own frame.
    pub fn contains_local(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Number of distinct names bound locally.
    pub fn local_len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Run `f` with `name` bound to `value`, popping the binding afterwards.
    pub fn with_binding<R>(
        &mut self,
        name: &str,
        value: T,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        self.push(name, value);
        let result = f(self);
        self.pop(name);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_get_pop() {
        let mut scope: Scope<'_, i32> = Scope::new();
        assert!(scope.get("x").is_none());
        scope.push("x", 1);
        assert_eq!(scope.get("x"), Some(&1));
        assert_eq!(scope.pop("x"), Some(1));
        assert!(scope.get("x").is_none());
        assert!(scope.is_empty());
    }

    #[test]
    fn shadowing_restores_outer_binding() {
        let mut scope: Scope<'_, i32> = Scope::new();
        scope.push("x", 1);
        scope.push("x", 2);
        assert_eq!(scope.get("x"), Some(&2));
        scope.pop("x");
        assert_eq!(scope.get("x"), Some(&1));
    }

    #[test]
    fn lookup_falls_through_to_containing() {
        let mut outer: Scope<'_, &str> = Scope::new();
        outer.push("a", "outer");
        let mut inner = Scope::with_containing(&outer);
        assert_eq!(inner.get("a"), Some(&"outer"));
        inner.push("a", "inner");
        assert_eq!(inner.get("a"), Some(&"inner"));
        assert!(!outer.contains_local("b"));
        inner.pop("a");
        assert_eq!(inner.get("a"), Some(&"outer"));
    }

    #[test]
    fn pop_never_reaches_containing() {
        let mut outer: Scope<'_, i32> = Scope::new();
        outer.push("a", 7);
        let mut inner = Scope::with_containing(&outer);
        assert_eq!(inner.pop("a"), None);
        assert_eq!(inner.get("a"), Some(&7));
    }

    #[test]
    fn three_level_chain() {
        let mut root: Scope<'_, i32> = Scope::new();
        root.push("r", 0);
        let mut mid = Scope::with_containing(&root);
        mid.push("m", 1);
        let leaf = Scope::with_containing(&mid);
        assert_eq!(leaf.get("r"), Some(&0));
        assert_eq!(leaf.get("m"), Some(&1));
        assert!(leaf.get("z").is_none());
    }

    #[test]
    fn siblings_share_one_parent() {
        let mut parent: Scope<'_, i32> = Scope::new();
        parent.push("p", 3);
        let mut left = Scope::with_containing(&parent);
        let mut right = Scope::with_containing(&parent);
        left.push("p", 4);
        right.push("q", 5);
        assert_eq!(left.get("p"), Some(&4));
        assert_eq!(right.get("p"), Some(&3));
        assert!(left.get("q").is_none());
    }

    #[test]
    fn with_binding_pops_on_exit() {
        let mut scope: Scope<'_, i32> = Scope::new();
        let seen = scope.with_binding("k", 9, |s| s.get("k").copied());
        assert_eq!(seen, Some(9));
        assert!(scope.get("k").is_none());
    }
}
