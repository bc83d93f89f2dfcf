use super::*;

fn manager(max_tokens: usize, strategy: OverflowStrategy) -> ContextWindowManager {
    ContextWindowManager::new(ContextSettings {
        max_tokens,
        reserve_tokens: 0,
        strategy,
        include_system: true,
    })
}

fn conversation(costs: &[usize]) -> Vec<Turn> {
    costs
        .iter()
        .enumerate()
        .map(|(i, &cost)| {
            let turn = if i % 2 == 0 {
                Turn::user(format!("turn {i}"))
            } else {
                Turn::assistant(format!("turn {i}"))
            };
            turn.with_tokens(cost)
        })
        .collect()
}

fn contents(turns: &[Turn]) -> Vec<&str> {
    turns.iter().map(|t| t.content.as_str()).collect()
}

#[test]
fn estimate_blends_words_and_characters() {
    assert_eq!(estimate_tokens(""), 0);
    // 1 word, 5 chars: (1.33 + 1.25) / 2 = 1.29
    assert_eq!(estimate_tokens("hello"), 2);
    // 9 words, 43 chars: (12 + 10.75) / 2 = 11.375
    assert_eq!(estimate_tokens("the quick brown fox jumps over the lazy dog"), 12);
    assert_eq!(Turn::user("ignored").with_tokens(7).token_count(), 7);
}

#[test]
fn truncate_old_keeps_everything_when_budget_allows() {
    let turns = conversation(&[10, 20, 30, 40]);
    let result = manager(10_000, OverflowStrategy::TruncateOld).fit_messages(&turns);
    assert_eq!(result.messages, turns);
    assert_eq!(result.total_tokens, 100);
    assert_eq!(result.dropped_count, 0);
}

#[test]
fn truncate_old_keeps_a_recent_suffix() {
    let turns = conversation(&[10, 20, 30, 40]);
    let result = manager(75, OverflowStrategy::TruncateOld).fit_messages(&turns);
    assert_eq!(contents(&result.messages), vec!["turn 2", "turn 3"]);
    assert_eq!(result.total_tokens, 70);
    assert_eq!(result.dropped_count, 2);
}

#[test]
fn truncate_old_stops_at_first_turn_that_does_not_fit() {
    let turns = conversation(&[1, 50, 10]);
    let result = manager(20, OverflowStrategy::TruncateOld).fit_messages(&turns);
    assert_eq!(contents(&result.messages), vec!["turn 2"]);
}

#[test]
fn truncate_middle_keeps_first_and_recent() {
    let turns = conversation(&[10, 20, 30, 40, 15]);
    let result = manager(70, OverflowStrategy::TruncateMiddle).fit_messages(&turns);
    assert_eq!(contents(&result.messages), vec!["turn 0", "turn 3", "turn 4"]);
    assert_eq!(result.total_tokens, 65);
    assert_eq!(result.dropped_count, 2);
}

#[test]
fn truncate_middle_degenerates_when_ends_do_not_fit() {
    let turns = conversation(&[60, 5, 5, 60]);
    let middle = manager(70, OverflowStrategy::TruncateMiddle).fit_messages(&turns);
    let old = manager(70, OverflowStrategy::TruncateOld).fit_messages(&turns);
    assert_eq!(middle, old);
    assert_eq!(contents(&middle.messages), vec!["turn 1", "turn 2", "turn 3"]);
}

#[test]
fn oversized_token_counts_saturate() {
    let turns = conversation(&[usize::MAX, 5, usize::MAX]);
    for strategy in [OverflowStrategy::TruncateOld, OverflowStrategy::TruncateMiddle] {
        let manager = manager(100, strategy);
        let result = manager.fit_messages(&turns);
        assert!(result.messages.is_empty());
        assert_eq!(result.dropped_count, 3);

        let check = manager.check_fit(&turns);
        assert!(!check.fits);
        assert_eq!(check.total_tokens, usize::MAX);
    }

    let tail = conversation(&[usize::MAX, 5]);
    let result = manager(100, OverflowStrategy::TruncateOld).fit_messages(&tail);
    assert_eq!(contents(&result.messages), vec!["turn 1"]);
    assert_eq!(result.total_tokens, 5);
}

#[test]
fn system_turns_are_paid_for_first() {
    let mut turns = vec![Turn::system("be brief").with_tokens(30)];
    turns.extend(conversation(&[20, 20, 20]));
    let result = manager(75, OverflowStrategy::TruncateOld).fit_messages(&turns);

    assert_eq!(result.system_tokens, 30);
    assert_eq!(contents(&result.messages), vec!["be brief", "turn 1", "turn 2"]);
    assert_eq!(result.total_tokens, 70);
}

#[test]
fn system_turns_are_omitted_when_excluded() {
    let mut turns = vec![Turn::system("be brief").with_tokens(30)];
    turns.extend(conversation(&[20, 20, 20]));
    let manager = ContextWindowManager::new(ContextSettings {
        max_tokens: 75,
        reserve_tokens: 0,
        strategy: OverflowStrategy::TruncateOld,
        include_system: false,
    });

    let result = manager.fit_messages(&turns);
    assert_eq!(result.system_tokens, 0);
    assert_eq!(contents(&result.messages), vec!["turn 0", "turn 1", "turn 2"]);
}

#[test]
fn reserve_reduces_the_budget() {
    let manager = ContextWindowManager::new(ContextSettings {
        max_tokens: 100,
        reserve_tokens: 60,
        ..ContextSettings::default()
    });
    assert_eq!(manager.available_tokens(), 40);
    let result = manager.fit_messages(&conversation(&[30, 30]));
    assert_eq!(result.messages.len(), 1);
}

#[test]
fn check_fit_and_stats_do_not_mutate() {
    let turns = conversation(&[25, 25]);
    let snapshot = turns.clone();
    let manager = manager(100, OverflowStrategy::TruncateOld);

    let check = manager.check_fit(&turns);
    assert!(check.fits);
    assert_eq!(check.total_tokens, 50);
    assert_eq!(check.available_tokens, 100);

    let stats = manager.stats(&turns);
    assert!((stats.usage_ratio - 0.5).abs() < f64::EPSILON);
    assert_eq!(stats.message_count, 2);
    assert_eq!(turns, snapshot);

    assert!(!ContextWindowManager::new(ContextSettings {
        max_tokens: 40,
        reserve_tokens: 0,
        ..ContextSettings::default()
    })
    .check_fit(&turns)
    .fits);
}

#[test]
fn memory_context_goes_after_leading_system_turns() {
    let turns = vec![
        Turn::system("persona"),
        Turn::user("where is the tower?"),
        Turn::system("late system note"),
    ];
    let merged = with_memory_context(&turns, "Relevant context from memory:\n[1] ...");
    assert_eq!(merged.len(), 4);
    assert_eq!(merged[0].content, "persona");
    assert_eq!(merged[1].role, Role::System);
    assert!(merged[1].content.starts_with("Relevant context"));
    assert_eq!(merged[2].content, "where is the tower?");

    assert_eq!(with_memory_context(&turns, "  "), turns);
}

#[test]
fn strategy_names_round_trip_through_serde() {
    let parsed: OverflowStrategy =
        serde_json::from_str("\"truncate-middle\"").expect("should parse");
    assert_eq!(parsed, OverflowStrategy::TruncateMiddle);
    assert_eq!(
        "truncate-old".parse::<OverflowStrategy>(),
        Ok(OverflowStrategy::TruncateOld)
    );
    assert!("middle".parse::<OverflowStrategy>().is_err());
}
