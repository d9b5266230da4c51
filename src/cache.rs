//! Prompt-cache discipline (§4.7): exactly the first system block and the
//! last block of the last user turn get an ephemeral cache marker on every
//! outgoing request, including retries. The input history is never mutated.

use crate::llm::{CacheControl, SystemBlock, Turn};

/// Builds the `system` array for one request: a single text block annotated
/// with an ephemeral cache marker.
pub fn build_system_blocks(system_prompt: &str) -> Vec<SystemBlock> {
    vec![SystemBlock {
        text: system_prompt.to_string(),
        cache_control: Some(CacheControl::Ephemeral),
    }]
}

/// Returns a defensive copy of `history` with the last block of the last
/// user turn annotated with an ephemeral cache marker. Assistant turns are
/// never annotated. The input slice is left untouched — callers may rely on
/// referential stability of `history` itself.
///
/// If there is no user turn in the history (e.g. an empty history, which
/// should not happen once the initial user turn is appended, but is handled
/// defensively), the clone is returned unannotated.
pub fn apply_cache_markers(history: &[Turn]) -> Vec<Turn> {
    let mut cloned = history.to_vec();

    let last_user_turn = cloned
        .iter_mut()
        .rev()
        .find(|turn| matches!(turn, Turn::User(_)));

    if let Some(turn) = last_user_turn {
        if let Some(block) = turn.last_user_block_mut() {
            *block.cache_control_mut() = Some(CacheControl::Ephemeral);
        }
    }

    cloned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{AssistantBlock, UserBlock};

    #[test]
    fn marks_last_block_of_last_user_turn_only() {
        let history = vec![
            Turn::user(vec![UserBlock::text("first")]),
            Turn::assistant(vec![AssistantBlock::Text {
                text: "ack".into(),
            }]),
            Turn::user(vec![UserBlock::text("second"), UserBlock::text("third")]),
        ];

        let marked = apply_cache_markers(&history);

        let Turn::User(blocks) = &marked[2] else {
            panic!("expected user turn")
        };
        assert_eq!(blocks[0].cache_control_ref(), None);
        assert_eq!(blocks[1].cache_control_ref(), Some(CacheControl::Ephemeral));

        // No assistant block ever carries a cache marker.
        let Turn::Assistant(_) = &marked[1] else {
            panic!("expected assistant turn")
        };
    }

    #[test]
    fn never_mutates_the_input_history() {
        let history = vec![Turn::user(vec![UserBlock::text("only")])];
        let original = history.clone();

        let _ = apply_cache_markers(&history);

        assert_eq!(history, original);
    }

    #[test]
    fn system_blocks_carry_ephemeral_marker() {
        let blocks = build_system_blocks("be helpful");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].cache_control, Some(CacheControl::Ephemeral));
    }
}
