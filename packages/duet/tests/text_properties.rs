use proptest::prelude::*;

use duet::extract::extract_turns;
use duet::history::DialogueHistory;
use duet_protocol::Speaker;

fn arb_speaker() -> impl Strategy<Value = Speaker> {
    prop_oneof![Just(Speaker::A), Just(Speaker::B)]
}

// Bodies never contain '<' so they cannot open or close a span themselves.
fn arb_body() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,!?ぁ-ん]{1,40}".prop_map(|s| s.trim().to_string())
}

// --- Dialogue history ---

proptest! {
    #[test]
    fn history_stays_within_budget(
        budget in 1usize..200,
        lines in prop::collection::vec("[a-zA-Z ぁ-ん]{0,60}", 1..30),
    ) {
        let mut h = DialogueHistory::new(budget);
        for line in &lines {
            h.append(line.clone());
            prop_assert!(h.len() == 1 || h.serialized_len() <= budget);
        }
        // The newest line always survives.
        prop_assert_eq!(h.lines().last(), lines.last().map(String::as_str));
    }

    #[test]
    fn history_keeps_a_suffix_in_order(
        lines in prop::collection::vec("[a-z]{1,10}", 1..30),
    ) {
        let mut h = DialogueHistory::new(50);
        for line in &lines {
            h.append(line.clone());
        }
        let kept: Vec<&str> = h.lines().collect();
        let tail: Vec<&str> = lines[lines.len() - kept.len()..].iter().map(String::as_str).collect();
        prop_assert_eq!(kept, tail);
    }
}

// --- Turn extraction ---

proptest! {
    #[test]
    fn labeled_turns_come_back_in_order(
        turns in prop::collection::vec((arb_speaker(), arb_body()), 1..8),
        fallback in arb_speaker(),
        fenced in any::<bool>(),
    ) {
        let turns: Vec<(Speaker, String)> =
            turns.into_iter().filter(|(_, body)| !body.is_empty()).collect();
        prop_assume!(!turns.is_empty());

        let mut text: String = turns
            .iter()
            .map(|(s, body)| format!("<{s}>{body}</{s}>\n"))
            .collect();
        if fenced {
            text = format!("```xml\n{text}```");
        }

        let got: Vec<(Speaker, String)> = extract_turns(&text, fallback)
            .into_iter()
            .map(|t| (t.speaker, t.text))
            .collect();
        prop_assert_eq!(got, turns);
    }

    #[test]
    fn unlabeled_text_is_one_fallback_turn(
        body in arb_body(),
        fallback in arb_speaker(),
    ) {
        prop_assume!(!body.is_empty());
        let got = extract_turns(&format!("  {body}  "), fallback);
        prop_assert_eq!(got.len(), 1);
        prop_assert_eq!(got[0].speaker, fallback);
        prop_assert_eq!(&got[0].text, &body);
    }
}
