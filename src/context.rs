//! Budgeted conversation context
//!
//! Collects the question, facts about the subject and earlier turns, and
//! renders them under a hard size budget. When the budget is tight, content
//! is evicted in a fixed order:
//!
//! 1. oldest conversation turns
//! 2. detail facts, most recently added first
//!
//! The question and summary facts are never evicted. If they alone exceed
//! the budget the rendered text is clipped and a
//! [`ContextWarning::BudgetExceeded`] is recorded.

use crate::normalize::AssetAmount;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who said a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Fact priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FactCategory {
    /// Never evicted
    Summary,
    /// Evicted when over budget
    Detail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FactValue {
    Text(String),
    Amount(AssetAmount),
    Count(u64),
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Text(text) => f.write_str(text),
            FactValue::Amount(amount) => write!(f, "{}", amount),
            FactValue::Count(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for FactValue {
    fn from(text: &str) -> Self {
        FactValue::Text(text.to_string())
    }
}

impl From<String> for FactValue {
    fn from(text: String) -> Self {
        FactValue::Text(text)
    }
}

impl From<AssetAmount> for FactValue {
    fn from(amount: AssetAmount) -> Self {
        FactValue::Amount(amount)
    }
}

impl From<u64> for FactValue {
    fn from(n: u64) -> Self {
        FactValue::Count(n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fact {
    pub category: FactCategory,
    pub key: String,
    pub value: FactValue,
}

/// Non-fatal notes about what was left out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextWarning {
    TurnsDropped { count: usize },
    FactsDropped { count: usize },
    BudgetExceeded { required: usize, budget: usize },
}

impl fmt::Display for ContextWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextWarning::TurnsDropped { count } => {
                write!(f, "dropped {} oldest conversation turn(s) to fit the context budget", count)
            }
            ContextWarning::FactsDropped { count } => {
                write!(f, "dropped {} detail fact(s) to fit the context budget", count)
            }
            ContextWarning::BudgetExceeded { required, budget } => write!(
                f,
                "question and summary need {} bytes but the budget is {}; context was clipped",
                required, budget
            ),
        }
    }
}

/// Assembled context, ready for an LLM request
#[derive(Debug, Clone, Serialize)]
pub struct ConversationContext {
    /// Turns that fit, oldest first
    pub turns: Vec<Turn>,
    /// Facts and question
    pub body: String,
    /// Turns and body as one text; never longer than `budget`
    pub rendered: String,
    pub budget: usize,
    pub warnings: Vec<ContextWarning>,
}

/// Accumulates context for one request
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    budget: usize,
    question: Option<String>,
    facts: Vec<Fact>,
    turns: Vec<Turn>,
}

impl ContextBuilder {
    /// `budget` is measured in bytes of UTF-8, which bounds the character count.
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            question: None,
            facts: Vec::new(),
            turns: Vec::new(),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn set_question(&mut self, question: impl Into<String>) -> &mut Self {
        self.question = Some(question.into());
        self
    }

    pub fn add_fact(
        &mut self,
        category: FactCategory,
        key: impl Into<String>,
        value: impl Into<FactValue>,
    ) -> &mut Self {
        self.facts.push(Fact {
            category,
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn add_turn(&mut self, role: Role, text: impl Into<String>) -> &mut Self {
        self.turns.push(Turn::new(role, text));
        self
    }

    pub fn add_turns(&mut self, turns: impl IntoIterator<Item = Turn>) -> &mut Self {
        self.turns.extend(turns);
        self
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    /// Rendered context. Same input, same output; never longer than the budget.
    pub fn render(&self) -> String {
        self.build().rendered
    }

    /// Apply the eviction order and produce the final context.
    pub fn build(&self) -> ConversationContext {
        let detail_positions: Vec<usize> = self
            .facts
            .iter()
            .enumerate()
            .filter(|(_, f)| f.category == FactCategory::Detail)
            .map(|(i, _)| i)
            .collect();

        let history: Vec<String> = self.turns.iter().map(render_turn).collect();
        let history_lens: Vec<usize> = history.iter().map(|l| l.len()).collect();

        let mut first_turn = 0;
        let mut details_kept = detail_positions.len();
        let mut warnings = Vec::new();

        loop {
            let body = self.render_body(&detail_positions[..details_kept]);
            let size = history_size(&history_lens[first_turn..], body.len());
            if size <= self.budget {
                break;
            }
            if first_turn < history.len() {
                first_turn += 1;
            } else if details_kept > 0 {
                details_kept -= 1;
            } else {
                break;
            }
        }

        if first_turn > 0 {
            warnings.push(ContextWarning::TurnsDropped { count: first_turn });
        }
        let dropped_facts = detail_positions.len() - details_kept;
        if dropped_facts > 0 {
            warnings.push(ContextWarning::FactsDropped {
                count: dropped_facts,
            });
        }

        let mut body = self.render_body(&detail_positions[..details_kept]);
        let mut turns = self.turns[first_turn..].to_vec();
        let mut rendered = join_history(&history[first_turn..], &body);

        if rendered.len() > self.budget {
            warnings.push(ContextWarning::BudgetExceeded {
                required: rendered.len(),
                budget: self.budget,
            });
            clip(&mut rendered, self.budget);
            body = rendered.clone();
            turns.clear();
        }

        for warning in &warnings {
            tracing::debug!(budget = self.budget, warning = %warning, "Context truncated");
        }

        ConversationContext {
            turns,
            body,
            rendered,
            budget: self.budget,
            warnings,
        }
    }

    /// Summary facts, the kept detail facts (insertion order), then the question
    fn render_body(&self, details: &[usize]) -> String {
        let mut out = String::new();

        let summary: Vec<&Fact> = self
            .facts
            .iter()
            .filter(|f| f.category == FactCategory::Summary)
            .collect();
        if !summary.is_empty() {
            out.push_str("Summary:\n");
            for fact in summary {
                push_fact(&mut out, fact);
            }
        }

        if !details.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("Details:\n");
            for &i in details {
                push_fact(&mut out, &self.facts[i]);
            }
        }

        if let Some(question) = &self.question {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("Question: ");
            out.push_str(question);
        }
        out
    }
}

const HISTORY_HEADER: &str = "Conversation so far:\n";

fn render_turn(turn: &Turn) -> String {
    format!("{}: {}\n", turn.role.name(), turn.text)
}

fn push_fact(out: &mut String, fact: &Fact) {
    out.push_str("- ");
    out.push_str(&fact.key);
    out.push_str(": ");
    out.push_str(&fact.value.to_string());
    out.push('\n');
}

fn history_size(turn_lens: &[usize], body_len: usize) -> usize {
    if turn_lens.is_empty() {
        return body_len;
    }
    HISTORY_HEADER.len() + turn_lens.iter().sum::<usize>() + 1 + body_len
}

fn join_history(turns: &[String], body: &str) -> String {
    if turns.is_empty() {
        return body.to_string();
    }
    let mut out = String::from(HISTORY_HEADER);
    for line in turns {
        out.push_str(line);
    }
    out.push('\n');
    out.push_str(body);
    out
}

/// Truncate to at most `max` bytes on a char boundary
fn clip(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn erg(raw: u128) -> AssetAmount {
        AssetAmount::new("nanoErgs", raw, Some(9)).with_symbol("ERG")
    }

    #[test]
    fn test_render_layout() {
        let mut builder = ContextBuilder::new(10_000);
        builder
            .set_question("Is this wallet active?")
            .add_fact(FactCategory::Summary, "balance", erg(2_500_000_000))
            .add_fact(FactCategory::Detail, "transactions", 14u64)
            .add_turn(Role::User, "hello")
            .add_turn(Role::Assistant, "hi");

        let context = builder.build();
        assert!(context.warnings.is_empty());
        assert_eq!(
            context.rendered,
            "Conversation so far:\nuser: hello\nassistant: hi\n\n\
             Summary:\n- balance: 2.5 ERG\n\n\
             Details:\n- transactions: 14\n\n\
             Question: Is this wallet active?"
        );
        assert_eq!(context.turns.len(), 2);
        assert!(context.body.starts_with("Summary:"));
    }

    #[test]
    fn test_render_is_idempotent() {
        let mut builder = ContextBuilder::new(60);
        builder
            .set_question("q")
            .add_fact(FactCategory::Detail, "a", "1".repeat(40))
            .add_turn(Role::User, "x".repeat(40));
        assert_eq!(builder.render(), builder.render());
        assert_eq!(builder.facts().len(), 1);
    }

    #[test]
    fn test_turns_evicted_before_facts() {
        let mut builder = ContextBuilder::new(130);
        builder
            .set_question("Where did the funds go?")
            .add_fact(FactCategory::Summary, "origin", "9fRAW")
            .add_fact(FactCategory::Detail, "hop1", "9hY16")
            .add_turn(Role::User, "a".repeat(50))
            .add_turn(Role::Assistant, "b".repeat(10));

        let context = builder.build();
        assert_eq!(context.warnings, vec![ContextWarning::TurnsDropped { count: 1 }]);
        assert_eq!(context.turns.len(), 1);
        assert!(context.rendered.contains("hop1"));
        assert!(context.rendered.len() <= 130);
    }

    #[test]
    fn test_latest_detail_facts_dropped_first() {
        let mut builder = ContextBuilder::new(80);
        builder
            .set_question("q?")
            .add_fact(FactCategory::Summary, "sum", "kept")
            .add_fact(FactCategory::Detail, "first", "x".repeat(10))
            .add_fact(FactCategory::Detail, "second", "y".repeat(10))
            .add_fact(FactCategory::Detail, "third", "z".repeat(10));

        let context = builder.build();
        assert!(context.rendered.contains("first"));
        assert!(!context.rendered.contains("third"));
        assert!(context.rendered.contains("sum: kept"));
        assert!(context.rendered.ends_with("Question: q?"));
        assert!(matches!(
            context.warnings[0],
            ContextWarning::FactsDropped { .. }
        ));
    }

    #[test]
    fn test_mandatory_content_over_budget_is_clipped() {
        let mut builder = ContextBuilder::new(16);
        builder
            .set_question("é".repeat(20))
            .add_fact(FactCategory::Detail, "d", "v");

        let context = builder.build();
        assert!(context.rendered.len() <= 16);
        assert!(context
            .warnings
            .iter()
            .any(|w| matches!(w, ContextWarning::BudgetExceeded { budget: 16, .. })));
        assert!(context.turns.is_empty());
        assert_eq!(context.body, context.rendered);
    }

    #[test]
    fn test_budget_holds_for_arbitrary_inputs() {
        // Deterministic LCG so failures reproduce
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move |bound: u64| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) % bound.max(1)
        };
        let words = ["ERG", "é", "汉字", "wallet", "→", "0x", ""];

        for _ in 0..300 {
            let budget = next(400) as usize;
            let mut builder = ContextBuilder::new(budget);
            for _ in 0..next(6) {
                let text: String = (0..next(30))
                    .map(|_| words[next(words.len() as u64) as usize])
                    .collect();
                let role = if next(2) == 0 { Role::User } else { Role::Assistant };
                builder.add_turn(role, text);
            }
            for i in 0..next(8) {
                let category = if next(3) == 0 {
                    FactCategory::Summary
                } else {
                    FactCategory::Detail
                };
                builder.add_fact(category, format!("k{}", i), erg(next(10_000_000_000) as u128));
            }
            if next(2) == 0 {
                let question: String = (0..next(20)).map(|_| words[next(7) as usize]).collect();
                builder.set_question(question);
            }

            let context = builder.build();
            assert!(
                context.rendered.len() <= budget,
                "rendered {} > budget {}",
                context.rendered.len(),
                budget
            );
            assert_eq!(builder.render(), context.rendered);
        }
    }
}
