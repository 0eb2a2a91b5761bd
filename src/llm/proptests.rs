//! Property-based tests for prompt assembly
//!
//! - Length is always history + 2
//! - First message is the system instruction
//! - Last message is the current prompt under the user role
//! - History is replayed verbatim, in order, under the user role

use super::prompt::assemble;
use super::types::MessageRole;
use proptest::prelude::*;

fn arb_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 _.!?,]{0,80}"
}

fn arb_history() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(arb_text(), 0..25)
}

proptest! {
    #[test]
    fn assembled_length_is_history_plus_two(
        instruction in arb_text(),
        history in arb_history(),
        prompt in arb_text(),
    ) {
        let messages = assemble(&instruction, &history, &prompt);
        prop_assert_eq!(messages.len(), history.len() + 2);
    }

    #[test]
    fn first_message_is_system_instruction(
        instruction in arb_text(),
        history in arb_history(),
        prompt in arb_text(),
    ) {
        let messages = assemble(&instruction, &history, &prompt);
        prop_assert_eq!(messages[0].role, MessageRole::System);
        prop_assert_eq!(&messages[0].content, &instruction);
    }

    #[test]
    fn last_message_is_current_prompt(
        instruction in arb_text(),
        history in arb_history(),
        prompt in arb_text(),
    ) {
        let messages = assemble(&instruction, &history, &prompt);
        let last = messages.last().unwrap();
        prop_assert_eq!(last.role, MessageRole::User);
        prop_assert_eq!(&last.content, &prompt);
    }

    #[test]
    fn history_replayed_in_order_as_user(
        history in arb_history(),
        prompt in arb_text(),
    ) {
        let messages = assemble("You are a helpful AI assistant.", &history, &prompt);
        let middle = &messages[1..messages.len() - 1];

        prop_assert_eq!(middle.len(), history.len());
        for (msg, text) in middle.iter().zip(&history) {
            prop_assert_eq!(msg.role, MessageRole::User);
            prop_assert_eq!(&msg.content, text);
        }
    }
}
