use crate::error::EvsError;
use crate::models::Session;
use crate::tokens;
use crate::transform::trim::{trim, TrimAmount, TrimParams};
use crate::transform::TransformOutcome;
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub enum Budget {
    Tokens(u64),
    Percent(u8),
}

/// Deterministic plan for a token-budget trim.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CompactPlan {
    pub total_tokens: u64,
    pub target_remove_tokens: u64,
    pub max_removable_count: usize,
    pub remove_count: usize,
    pub selected_remove_tokens: u64,
    /// False when even removing everything removable falls short of the
    /// target; the caller decides whether a partial compact is acceptable.
    pub budget_met: bool,
}

/// Walk the message prefix accumulating per-message token estimates until
/// the removal target is met. Pure and deterministic.
pub fn plan_compact(tokens: &[u64], budget: Budget, keep_last_messages: usize) -> CompactPlan {
    let total_tokens: u64 = tokens.iter().sum();
    let target_remove_tokens = match budget {
        Budget::Tokens(n) => n,
        Budget::Percent(p) => total_tokens * (p.min(100) as u64) / 100,
    };
    let max_removable_count = tokens.len().saturating_sub(keep_last_messages);

    if target_remove_tokens == 0 {
        return CompactPlan {
            total_tokens,
            target_remove_tokens,
            max_removable_count,
            remove_count: 0,
            selected_remove_tokens: 0,
            budget_met: true,
        };
    }

    let mut sum: u64 = 0;
    for i in 1..=max_removable_count {
        sum += tokens[i - 1];
        if sum >= target_remove_tokens {
            return CompactPlan {
                total_tokens,
                target_remove_tokens,
                max_removable_count,
                remove_count: i,
                selected_remove_tokens: sum,
                budget_met: true,
            };
        }
    }

    CompactPlan {
        total_tokens,
        target_remove_tokens,
        max_removable_count,
        remove_count: max_removable_count,
        selected_remove_tokens: sum,
        budget_met: false,
    }
}

/// Plan against the session's message token estimates, then delegate the
/// actual cut to `trim`.
pub fn compact(
    session: &Session,
    budget: Budget,
    keep_last_messages: usize,
) -> Result<(TransformOutcome, CompactPlan), EvsError> {
    let message_tokens = match session {
        Session::Claude(s) => tokens::chain_message_tokens(s),
        Session::Codex(s) => tokens::codex_item_tokens(s),
    };

    let plan = plan_compact(&message_tokens, budget, keep_last_messages);
    let outcome = trim(
        session,
        TrimParams {
            amount: TrimAmount::Count(plan.remove_count),
            keep_last_messages,
        },
    )?;
    Ok((outcome, plan))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_matches_reference_scenario() {
        // 25% of 840 targets 210; the first message alone (800) covers it.
        let plan = plan_compact(&[800, 10, 10, 10, 10], Budget::Percent(25), 2);
        assert_eq!(plan.total_tokens, 840);
        assert_eq!(plan.target_remove_tokens, 210);
        assert_eq!(plan.remove_count, 1);
        assert_eq!(plan.selected_remove_tokens, 800);
        assert!(plan.budget_met);
    }

    #[test]
    fn planner_zero_target_removes_nothing() {
        let plan = plan_compact(&[100, 100], Budget::Percent(0), 0);
        assert_eq!(plan.remove_count, 0);
        assert_eq!(plan.selected_remove_tokens, 0);
        assert!(plan.budget_met);
    }

    #[test]
    fn planner_reports_unmet_budget() {
        let plan = plan_compact(&[10, 10, 10, 10], Budget::Tokens(1_000), 2);
        assert_eq!(plan.max_removable_count, 2);
        assert_eq!(plan.remove_count, 2);
        assert_eq!(plan.selected_remove_tokens, 20);
        assert!(!plan.budget_met);
    }

    #[test]
    fn planner_respects_keep_last_entirely() {
        let plan = plan_compact(&[50, 50], Budget::Tokens(100), 2);
        assert_eq!(plan.max_removable_count, 0);
        assert_eq!(plan.remove_count, 0);
        assert!(!plan.budget_met);
    }

    #[test]
    fn planner_token_budget_walks_prefix() {
        let plan = plan_compact(&[100, 100, 100, 100], Budget::Tokens(150), 1);
        assert_eq!(plan.remove_count, 2);
        assert_eq!(plan.selected_remove_tokens, 200);
    }

    #[test]
    fn compact_with_zero_percent_is_identity() {
        use crate::parser::parse_claude;
        use serde_json::json;
        use std::fs;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let values = vec![
            json!({"type": "user", "uuid": "u1", "parentUuid": null,
                   "message": {"role": "user", "content": "hello there"}}),
            json!({"type": "assistant", "uuid": "a1", "parentUuid": "u1",
                   "message": {"role": "assistant", "content": [{"type": "text", "text": "hi"}]}}),
        ];
        fs::write(&path, crate::jsonl::stringify_jsonl(&values)).unwrap();
        let session = Session::Claude(parse_claude(&path).unwrap().session);

        let (outcome, plan) = compact(&session, Budget::Percent(0), 0).unwrap();
        assert!(outcome.changes.is_empty());
        assert_eq!(outcome.next_values, values);
        assert_eq!(plan.remove_count, 0);
    }
}
