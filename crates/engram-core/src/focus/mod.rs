//! Focus of attention - token-budgeted context assembly
//!
//! Layered on hybrid search: candidates are rescored with a composite of
//! relevance, importance, strength, and recency, then packed into a token
//! budget and rendered as a fixed Markdown layout for agent consumption.

use chrono::{DateTime, Utc};

use crate::memory::{Memory, RecallResult, RecalledMemory};

/// Characters-per-token divisor for the budget estimator
const CHARS_PER_TOKEN: f64 = 3.5;

/// Recency bonus for a memory's last access.
///
/// `max(0.1, 1.0 - 0.1 * days_since_access)` when accessed before, else a
/// neutral 0.5 so unseen memories are neither buried nor promoted.
pub fn recency_bonus(last_accessed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match last_accessed_at {
        Some(at) => {
            let days = (now - at).num_seconds().max(0) as f64 / 86_400.0;
            (1.0 - 0.1 * days).max(0.1)
        }
        None => 0.5,
    }
}

/// Composite ranking score for one candidate
pub fn composite_score(relevance: f64, memory: &Memory, now: DateTime<Utc>) -> f64 {
    relevance * memory.importance * memory.strength * recency_bonus(memory.last_accessed_at, now)
}

/// Token estimate for a rendered string: `ceil(chars / 3.5)`
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as usize
}

/// The layout a memory occupies inside the packed context
pub fn render_memory(memory: &Memory) -> String {
    format!(
        "[{}] {}\n{}",
        memory.mem_type, memory.title, memory.content
    )
}

/// Pack composite-sorted candidates into `budget` tokens.
///
/// The first memory is always admitted even when it alone overflows the
/// budget; packing stops at the first overflow after that.
pub fn pack_budget(candidates: Vec<RecalledMemory>, budget: usize) -> (Vec<RecalledMemory>, usize) {
    let mut packed = Vec::new();
    let mut total = 0usize;

    for candidate in candidates {
        if !packed.is_empty() && total + candidate.tokens > budget {
            break;
        }
        total += candidate.tokens;
        packed.push(candidate);
    }

    (packed, total)
}

/// Fixed Markdown rendering of an assembled context
pub fn render_markdown(result: &RecallResult) -> String {
    let mut out = String::new();

    if let Some(context) = &result.session_context {
        out.push_str("## Session Context\n\n");
        out.push_str(context);
        out.push_str("\n\n");
    }

    out.push_str("## Relevant Memories\n\n");
    for recalled in &result.memories {
        out.push_str(&format!(
            "### [{}] {}\n{}\n\n",
            recalled.memory.mem_type, recalled.memory.title, recalled.memory.content
        ));
    }

    out.push_str(&format!(
        "_{} memories | ~{} tokens_\n",
        result.memories.len(),
        result.total_tokens_estimate
    ));

    out
}

// ============================================================================
// TESTS
// ============================================================================
