// Context window manager
// Fits conversation turns into a model's token budget.

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use crate::store::Role;

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Precomputed token count; estimated from `content` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,
}

impl Turn {
    #[inline]
    pub fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Self {
            role,
            content: content.into(),
            tokens: None,
        }
    }

    #[inline]
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self::new(Role::System, content)
    }

    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::new(Role::User, content)
    }

    #[inline]
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[inline]
    pub const fn with_tokens(mut self, tokens: usize) -> Self {
        self.tokens = Some(tokens);
        self
    }

    #[inline]
    pub fn token_count(&self) -> usize {
        self.tokens.unwrap_or_else(|| estimate_tokens(&self.content))
    }
}

/// How to shrink a conversation that does not fit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowStrategy {
    /// Keep the most recent turns
    #[default]
    #[serde(rename = "truncate-old")]
    TruncateOld,
    /// Keep the first turn and as many of the most recent turns as fit
    #[serde(rename = "truncate-middle")]
    TruncateMiddle,
}

impl fmt::Display for OverflowStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TruncateOld => "truncate-old",
            Self::TruncateMiddle => "truncate-middle",
        })
    }
}

impl FromStr for OverflowStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "truncate-old" => Ok(Self::TruncateOld),
            "truncate-middle" => Ok(Self::TruncateMiddle),
            other => Err(format!(
                "unknown strategy '{other}', expected truncate-old or truncate-middle"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub max_tokens: usize,
    /// Held back for the model's reply
    pub reserve_tokens: usize,
    pub strategy: OverflowStrategy,
    /// Whether system turns are kept (and paid for) ahead of the conversation
    pub include_system: bool,
}

impl Default for ContextSettings {
    #[inline]
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            reserve_tokens: 512,
            strategy: OverflowStrategy::TruncateOld,
            include_system: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitResult {
    pub messages: Vec<Turn>,
    pub total_tokens: usize,
    /// Conversation turns that did not fit
    pub dropped_count: usize,
    pub system_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FitCheck {
    pub fits: bool,
    pub total_tokens: usize,
    pub available_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    pub total_tokens: usize,
    pub available_tokens: usize,
    pub usage_ratio: f64,
    pub message_count: usize,
    pub system_tokens: usize,
}

/// Rough token count for `text`.
///
/// Averages a word-based estimate (about 0.75 words per token) with a character-based
/// one (about 4 characters per token). It is a heuristic, not a tokenizer, and can be
/// off by a wide margin for code or non-Latin scripts.
#[inline]
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count() as f64;
    let chars = text.chars().count() as f64;
    ((words / 0.75 + chars / 4.0) / 2.0).ceil() as usize
}

/// Splits turns into system turns and the conversation, both in original order
fn partition(turns: &[Turn]) -> (Vec<&Turn>, Vec<&Turn>) {
    turns.iter().partition(|t| t.role == Role::System)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextWindowManager {
    settings: ContextSettings,
}

impl ContextWindowManager {
    #[inline]
    pub const fn new(settings: ContextSettings) -> Self {
        Self { settings }
    }

    #[inline]
    pub const fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Tokens left for messages once the reply reserve is set aside
    #[inline]
    pub const fn available_tokens(&self) -> usize {
        self.settings
            .max_tokens
            .saturating_sub(self.settings.reserve_tokens)
    }

    /// Choose the turns that fit the budget, in chronological order
    #[inline]
    pub fn fit_messages(&self, turns: &[Turn]) -> FitResult {
        let (system, conversation) = partition(turns);
        let system_tokens = if self.settings.include_system {
            saturating_total(system.iter().map(|t| t.token_count()))
        } else {
            0
        };
        let budget = self.available_tokens().saturating_sub(system_tokens);
        let costs: Vec<usize> = conversation.iter().map(|t| t.token_count()).collect();

        let kept = match self.settings.strategy {
            OverflowStrategy::TruncateOld => keep_recent(&costs, 0, budget),
            OverflowStrategy::TruncateMiddle => keep_ends(&costs, budget),
        };

        let conversation_tokens = saturating_total(kept.iter().map(|&i| costs[i]));
        let mut messages: Vec<Turn> = Vec::with_capacity(system.len() + kept.len());
        if self.settings.include_system {
            messages.extend(system.iter().map(|&t| t.clone()));
        }
        messages.extend(kept.iter().map(|&i| conversation[i].clone()));

        let dropped_count = conversation.len() - kept.len();
        if dropped_count > 0 {
            debug!(
                "Dropped {} of {} turns to fit {} tokens ({})",
                dropped_count,
                conversation.len(),
                self.available_tokens(),
                self.settings.strategy
            );
        }

        FitResult {
            messages,
            total_tokens: system_tokens.saturating_add(conversation_tokens),
            dropped_count,
            system_tokens,
        }
    }

    /// Whether `turns` fit as they are
    #[inline]
    pub fn check_fit(&self, turns: &[Turn]) -> FitCheck {
        let total_tokens = self.counted_tokens(turns).0;
        let available_tokens = self.available_tokens();
        FitCheck {
            fits: total_tokens <= available_tokens,
            total_tokens,
            available_tokens,
        }
    }

    #[inline]
    pub fn stats(&self, turns: &[Turn]) -> ContextStats {
        let (total_tokens, system_tokens, message_count) = self.counted_tokens(turns);
        let available_tokens = self.available_tokens();
        let usage_ratio = if available_tokens > 0 {
            total_tokens as f64 / available_tokens as f64
        } else if total_tokens == 0 {
            0.0
        } else {
            f64::INFINITY
        };
        ContextStats {
            total_tokens,
            available_tokens,
            usage_ratio,
            message_count,
            system_tokens,
        }
    }

    /// `(total, system, message count)` for the turns that would be sent
    fn counted_tokens(&self, turns: &[Turn]) -> (usize, usize, usize) {
        let (system, conversation) = partition(turns);
        let conversation_tokens = saturating_total(conversation.iter().map(|t| t.token_count()));
        if self.settings.include_system {
            let system_tokens = saturating_total(system.iter().map(|t| t.token_count()));
            (
                system_tokens.saturating_add(conversation_tokens),
                system_tokens,
                system.len() + conversation.len(),
            )
        } else {
            (conversation_tokens, 0, conversation.len())
        }
    }
}

/// Insert a memory block as a system turn right after any leading system turns
#[inline]
pub fn with_memory_context(turns: &[Turn], context: &str) -> Vec<Turn> {
    let mut result = turns.to_vec();
    if context.trim().is_empty() {
        return result;
    }
    let position = turns
        .iter()
        .position(|t| t.role != Role::System)
        .unwrap_or(turns.len());
    result.insert(position, Turn::system(context));
    result
}

/// Token counts are caller-controlled, so totals clamp at `usize::MAX`
fn saturating_total<I: IntoIterator<Item = usize>>(costs: I) -> usize {
    costs.into_iter().fold(0, usize::saturating_add)
}

/// Indices of the longest suffix of `costs[from..]` that fits `budget`
fn keep_recent(costs: &[usize], from: usize, budget: usize) -> Vec<usize> {
    let mut used = 0usize;
    let mut start = costs.len();
    while start > from {
        let cost = costs[start - 1];
        match used.checked_add(cost) {
            Some(total) if total <= budget => used = total,
            _ => break,
        }
        start -= 1;
    }
    (start..costs.len()).collect()
}

/// The first turn plus the longest suffix that fits alongside it. Falls back to
/// [`keep_recent`] when the first and last turns cannot both fit.
fn keep_ends(costs: &[usize], budget: usize) -> Vec<usize> {
    let n = costs.len();
    if n < 2 || costs[0].saturating_add(costs[n - 1]) > budget {
        return keep_recent(costs, 0, budget);
    }

    let remaining = budget - costs[0];
    let mut kept = vec![0];
    kept.extend(keep_recent(costs, 1, remaining));
    kept
}
