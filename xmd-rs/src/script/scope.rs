//! Name → [`Variable`] store.

use std::collections::HashMap;

use super::value::{Value, Variable};

/// One evaluation context's variables.  Each entry owns one reference to its
/// binding; replacing or removing an entry releases that reference.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    vars: HashMap<String, Variable>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to a fresh variable holding `value`, replacing any
    /// previous binding.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), Variable::new(value));
    }

    /// Bind `name` to an existing variable (shares the binding).
    pub fn bind(&mut self, name: impl Into<String>, var: Variable) {
        self.vars.insert(name.into(), var);
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    /// Current value of `name`, if bound.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.vars.get(name).map(Variable::get)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }
}
