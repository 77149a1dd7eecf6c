use super::{AnswerDelta, AnswerMode, AnswerTally, Counters, ScoreDeltas, TASK_BONUS};

/// Maps one answered card to counter changes. Skips never reach this function.
pub fn on_answer(mode: AnswerMode, is_correct: bool) -> AnswerDelta {
    if !is_correct {
        return AnswerDelta {
            wrong: 1,
            ..AnswerDelta::default()
        };
    }

    let mut delta = AnswerDelta {
        correct: 1,
        ..AnswerDelta::default()
    };
    match mode {
        AnswerMode::JpEn => delta.jp_en = 1,
        AnswerMode::EnJp => delta.en_jp = 1,
        AnswerMode::Grammar => delta.grammar = 1,
    }
    delta
}

/// Change to `tasksCompleted` for a task moving from `previous_done` to `new_done`.
///
/// `previous_done` must be the durably stored value read in the same step as the
/// write, otherwise two tabs toggling the same task both count it.
pub fn on_task_toggle(previous_done: bool, new_done: bool) -> i64 {
    match (previous_done, new_done) {
        (false, true) => 1,
        (true, false) => -1,
        _ => 0,
    }
}

pub fn compute_score(
    jp_en_correct: i64,
    en_jp_correct: i64,
    grammar_correct: i64,
    tasks_completed: i64,
) -> i64 {
    jp_en_correct
        .saturating_add(en_jp_correct)
        .saturating_add(grammar_correct)
        .saturating_add(tasks_completed.saturating_mul(TASK_BONUS))
}

/// Adds `deltas` to `counters`; no counter drops below zero or wraps
pub fn apply_deltas(counters: &Counters, deltas: &ScoreDeltas) -> Counters {
    let add = |current: i64, delta: i64| current.saturating_add(delta).max(0);
    Counters {
        jp_en_correct: add(counters.jp_en_correct, deltas.jp_en_correct),
        en_jp_correct: add(counters.en_jp_correct, deltas.en_jp_correct),
        grammar_correct: add(counters.grammar_correct, deltas.grammar_correct),
        tasks_completed: add(counters.tasks_completed, deltas.tasks_completed),
    }
}

pub fn is_consistent(counters: &Counters, score: i64) -> bool {
    counters.score() == score
        && counters.jp_en_correct >= 0
        && counters.en_jp_correct >= 0
        && counters.grammar_correct >= 0
        && counters.tasks_completed >= 0
}

/// Part of `requested` not yet covered by `already_applied` under the same commit key
pub fn outstanding(requested: &AnswerTally, already_applied: Option<&AnswerTally>) -> AnswerTally {
    match already_applied {
        Some(applied) => requested.saturating_sub(applied),
        None => requested.saturating_sub(&AnswerTally::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AnswerMode::JpEn, (1, 0, 0))]
    #[case(AnswerMode::EnJp, (0, 1, 0))]
    #[case(AnswerMode::Grammar, (0, 0, 1))]
    fn correct_answer_bumps_exactly_one_direction(
        #[case] mode: AnswerMode,
        #[case] expected: (i64, i64, i64),
    ) {
        let delta = on_answer(mode, true);
        assert_eq!((delta.jp_en, delta.en_jp, delta.grammar), expected);
        assert_eq!(delta.correct, 1);
        assert_eq!(delta.wrong, 0);
    }

    #[rstest]
    #[case(AnswerMode::JpEn)]
    #[case(AnswerMode::EnJp)]
    #[case(AnswerMode::Grammar)]
    fn wrong_answer_only_counts_wrong(#[case] mode: AnswerMode) {
        let delta = on_answer(mode, false);
        assert_eq!(
            delta,
            AnswerDelta {
                wrong: 1,
                ..AnswerDelta::default()
            }
        );
    }

    #[rstest]
    #[case(false, true, 1)]
    #[case(true, false, -1)]
    #[case(true, true, 0)]
    #[case(false, false, 0)]
    fn task_toggle_deltas(#[case] previous: bool, #[case] next: bool, #[case] expected: i64) {
        assert_eq!(on_task_toggle(previous, next), expected);
    }

    #[test]
    fn repeated_done_against_stored_state_counts_once() {
        let mut stored = false;
        let mut tasks = 0;
        for requested in [true, true] {
            tasks += on_task_toggle(stored, requested);
            stored = requested;
        }
        assert_eq!(tasks, 1);

        // true -> false -> true nets a single completion
        for requested in [false, true] {
            tasks += on_task_toggle(stored, requested);
            stored = requested;
        }
        assert_eq!(tasks, 1);
    }

    #[test]
    fn score_weights_tasks() {
        assert_eq!(compute_score(4, 3, 2, 1), 4 + 3 + 2 + TASK_BONUS);
        assert_eq!(compute_score(0, 0, 0, 0), 0);
    }

    #[test]
    fn apply_clamps_tasks_at_zero() {
        let counters = Counters::default();
        let next = apply_deltas(&counters, &ScoreDeltas::tasks(-1));
        assert_eq!(next.tasks_completed, 0);
        assert!(is_consistent(&next, next.score()));
    }

    #[test]
    fn inconsistent_score_is_detected() {
        let counters = Counters {
            jp_en_correct: 2,
            tasks_completed: 1,
            ..Counters::default()
        };
        assert!(is_consistent(&counters, 12));
        assert!(!is_consistent(&counters, 13));
    }

    #[test]
    fn outstanding_only_covers_the_unapplied_part() {
        let requested = AnswerTally {
            jp_en_correct: 5,
            en_jp_correct: 2,
            grammar_correct: 0,
        };
        let applied = AnswerTally {
            jp_en_correct: 4,
            en_jp_correct: 2,
            grammar_correct: 0,
        };
        assert_eq!(
            outstanding(&requested, Some(&applied)),
            AnswerTally {
                jp_en_correct: 1,
                ..AnswerTally::default()
            }
        );
        assert_eq!(outstanding(&requested, None), requested);
        assert!(outstanding(&applied, Some(&requested)).is_zero());
    }

    #[test]
    fn answer_mode_string_forms() {
        assert_eq!(AnswerMode::JpEn.to_string(), "jp-en");
        assert_eq!("en-jp".parse::<AnswerMode>().unwrap(), AnswerMode::EnJp);
        assert_eq!(
            serde_json::to_string(&AnswerMode::Grammar).unwrap(),
            "\"grammar\""
        );
    }

    #[test]
    fn huge_counters_saturate_instead_of_wrapping() {
        let counters = Counters {
            jp_en_correct: i64::MAX - 1,
            tasks_completed: i64::MAX / 2,
            ..Counters::default()
        };
        let next = apply_deltas(
            &counters,
            &ScoreDeltas {
                jp_en_correct: 5,
                ..ScoreDeltas::default()
            },
        );

        assert_eq!(next.jp_en_correct, i64::MAX);
        assert_eq!(next.score(), i64::MAX);
        assert!(is_consistent(&next, next.score()));
    }
}
