//! Token budget accounting for traversals

use serde::Serialize;
use spangraph_core::GraphEdge;

/// Approximate token count of a text: one token per four characters,
/// rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Token estimate of structured content, taken over its JSON form.
/// Content that cannot be serialized never fits.
pub fn estimate_value_tokens<T: Serialize + ?Sized>(value: &T) -> usize {
    match serde_json::to_string(value) {
        Ok(json) => estimate_tokens(&json),
        Err(e) => {
            tracing::debug!(error = %e, "Unserializable content, treating as unbounded");
            usize::MAX
        }
    }
}

/// Something the guard can price.
pub trait TokenCost {
    fn token_cost(&self) -> usize;
}

impl TokenCost for str {
    fn token_cost(&self) -> usize {
        estimate_tokens(self)
    }
}

impl TokenCost for String {
    fn token_cost(&self) -> usize {
        estimate_tokens(self)
    }
}

impl TokenCost for GraphEdge {
    fn token_cost(&self) -> usize {
        estimate_value_tokens(self)
    }
}

impl TokenCost for serde_json::Value {
    fn token_cost(&self) -> usize {
        estimate_value_tokens(self)
    }
}

/// Snapshot of a guard's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub budget: usize,
    pub used: usize,
    pub remaining: usize,
    /// `used / budget * 100`; 0 for a zero budget.
    pub percentage: f64,
}

/// Cumulative budget for one traversal.
///
/// [`try_add`](Self::try_add) is the only way to spend, so `used` can
/// never exceed `budget`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGuard {
    budget: usize,
    used: usize,
}

impl TokenGuard {
    pub fn new(budget: usize) -> Self {
        Self { budget, used: 0 }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.budget - self.used
    }

    pub fn can_fit<C: TokenCost + ?Sized>(&self, content: &C) -> bool {
        self.fits(content.token_cost())
    }

    /// Spend the content's cost if it fits. Returns whether it was spent.
    pub fn try_add<C: TokenCost + ?Sized>(&mut self, content: &C) -> bool {
        let cost = content.token_cost();
        if !self.fits(cost) {
            return false;
        }
        self.used += cost;
        true
    }

    /// Forget everything spent; the budget is unchanged.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    pub fn usage(&self) -> TokenUsage {
        let percentage = if self.budget == 0 {
            0.0
        } else {
            self.used as f64 / self.budget as f64 * 100.0
        };
        TokenUsage {
            budget: self.budget,
            used: self.used,
            remaining: self.remaining(),
            percentage,
        }
    }

    fn fits(&self, cost: usize) -> bool {
        cost <= self.remaining()
    }
}
