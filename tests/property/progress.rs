use flowrelay::events::StageSignal;
use flowrelay::progress::{GenerationBands, ProgressState, ProgressStateMachine, Stage};
use proptest::prelude::*;
use proptest::test_runner::TestRunner;

fn stage_signal() -> impl Strategy<Value = StageSignal> {
    prop_oneof![
        4 => (0u64..250, prop::option::of(1u64..200)).prop_map(|(processed, total)| {
            StageSignal::Parsing {
                processed,
                total,
                message: None,
            }
        }),
        1 => Just(StageSignal::EndOfParsing),
        4 => (0usize..3, -10.0f64..120.0).prop_map(|(phase, percent)| StageSignal::Generating {
            phase,
            percent,
            message: None,
        }),
        1 => Just(StageSignal::Completed { message: None }),
        1 => Just(StageSignal::Failed {
            message: "failed".to_string(),
        }),
    ]
}

fn rank(stage: Stage) -> Option<u8> {
    match stage {
        Stage::Ready => Some(0),
        Stage::Parsing => Some(1),
        Stage::Generating => Some(2),
        Stage::Completed => Some(3),
        Stage::Error => None,
    }
}

fn observe(signals: &[StageSignal]) -> (Vec<ProgressState>, ProgressStateMachine) {
    let mut machine = ProgressStateMachine::new(GenerationBands::default(), 2.0);
    let emitted: Vec<ProgressState> = signals
        .iter()
        .filter_map(|signal| machine.apply(signal).ok())
        .flatten()
        .collect();
    (emitted, machine)
}

/// Percentages stay in range and never move backwards within a stage.
#[test]
fn test_percentage_bounded_and_monotonic_property() {
    let mut runner = TestRunner::default();

    runner
        .run(&prop::collection::vec(stage_signal(), 0..40), |signals| {
            let (emitted, machine) = observe(&signals);
            for state in &emitted {
                prop_assert!((0.0..=100.0).contains(&state.percentage));
            }
            for pair in emitted.windows(2) {
                if pair[0].stage == pair[1].stage {
                    prop_assert!(pair[1].percentage >= pair[0].percentage);
                }
            }
            if let Some(last) = emitted.last() {
                prop_assert_eq!(last, machine.state());
            }
            Ok(())
        })
        .unwrap();
}

/// Observed stages only ever move one step forward, or to ERROR.
#[test]
fn test_no_stage_is_skipped_property() {
    let mut runner = TestRunner::default();

    runner
        .run(&prop::collection::vec(stage_signal(), 0..40), |signals| {
            let (emitted, _) = observe(&signals);
            let mut previous = Stage::Ready;
            for state in &emitted {
                prop_assert!(!previous.is_terminal(), "emitted after terminal stage");
                if let (Some(from), Some(to)) = (rank(previous), rank(state.stage)) {
                    prop_assert!(to == from || to == from + 1, "{:?} -> {:?}", previous, state.stage);
                }
                previous = state.stage;
            }
            Ok(())
        })
        .unwrap();
}

/// Replaying the same signal twice in a row never emits on the second apply.
#[test]
fn test_repeated_signal_is_silent_property() {
    let mut runner = TestRunner::default();

    runner
        .run(
            &(prop::collection::vec(stage_signal(), 0..20), stage_signal()),
            |(prefix, repeated)| {
                prop_assume!(!matches!(repeated, StageSignal::Failed { .. }));
                let mut machine = ProgressStateMachine::new(GenerationBands::default(), 2.0);
                for signal in &prefix {
                    let _ = machine.apply(signal);
                }
                if machine.apply(&repeated).is_ok() {
                    let again = machine.apply(&repeated);
                    prop_assert!(again.map(|states| states.is_empty()).unwrap_or(true));
                }
                Ok(())
            },
        )
        .unwrap();
}
