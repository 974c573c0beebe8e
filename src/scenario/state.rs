//! Ordered list of scenario states with a single forward-transition rule.

use std::collections::HashSet;

use crate::error::StateError;

/// The configured, finite order of scenario states.
///
/// Transitions only ever move one step forward: `order[i] → order[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateOrder {
    states: Vec<String>,
}

impl StateOrder {
    /// Builds an order from state labels, rejecting empty or repeated labels.
    pub fn new<I, S>(states: I) -> Result<Self, StateError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let states: Vec<String> = states.into_iter().map(Into::into).collect();
        if states.len() < 2 {
            return Err(StateError::TooShort(states.len()));
        }

        let mut seen = HashSet::new();
        for state in &states {
            if state.is_empty() {
                return Err(StateError::EmptyLabel);
            }
            if !seen.insert(state.as_str()) {
                return Err(StateError::Duplicate(state.clone()));
            }
        }

        Ok(Self { states })
    }

    /// The state eligible for admission.
    pub fn initial(&self) -> &str {
        &self.states[0]
    }

    /// The last state; scenarios here are finished.
    pub fn terminal(&self) -> &str {
        &self.states[self.states.len() - 1]
    }

    /// Index of a state in the order.
    pub fn position(&self, state: &str) -> Option<usize> {
        self.states.iter().position(|s| s == state)
    }

    /// The state at index `n`.
    pub fn nth(&self, n: usize) -> Option<&str> {
        self.states.get(n).map(String::as_str)
    }

    /// The state directly after `state`, `None` for the terminal state.
    pub fn next(&self, state: &str) -> Result<Option<&str>, StateError> {
        let idx = self
            .position(state)
            .ok_or_else(|| StateError::Unknown(state.to_string()))?;
        Ok(self.nth(idx + 1))
    }

    /// Checks that `from → to` is exactly one step forward.
    pub fn check_transition(&self, from: &str, to: &str) -> Result<(), StateError> {
        match self.next(from)? {
            Some(next) if next == to => Ok(()),
            _ => {
                if self.position(to).is_none() {
                    return Err(StateError::Unknown(to.to_string()));
                }
                Err(StateError::NotForward {
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
        }
    }

    /// Returns `true` if `a` lies strictly before `b`.
    pub fn precedes(&self, a: &str, b: &str) -> bool {
        match (self.position(a), self.position(b)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    /// All states in order.
    pub fn states(&self) -> &[String] {
        &self.states
    }

    /// Number of states.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Always `false`; an order has at least two states.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
