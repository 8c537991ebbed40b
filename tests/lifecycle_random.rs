//! Random transition sequences checked against the transition table.

use dao_control::state_machine::NoHooks;
use dao_control::{DaoError, State, StateMachine, Transition};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

fn expected_target(state: State, transition: Transition) -> Option<State> {
    use State::*;
    use Transition::*;
    match (state, transition) {
        (Off, Init) => Some(Standby),
        (Standby, Stop) => Some(Off),
        (Standby, Enable) => Some(Idle),
        (Idle, Disable) => Some(Standby),
        (Idle, Run) => Some(Running),
        (Running, StopRun) => Some(Idle),
        (Running, Err) => Some(Error),
        (Idle, Err2) => Some(Error),
        (Error, Recover) => Some(Idle),
        _ => None,
    }
}

#[test]
fn random_walks_follow_the_table() {
    for seed in 0..32u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut machine = StateMachine::new();
        let mut model = State::Off;

        for _ in 0..500 {
            let transition = *Transition::ALL.choose(&mut rng).unwrap();
            let result = machine.fire(transition, &mut NoHooks);
            match expected_target(model, transition) {
                Some(target) => {
                    assert_eq!(result.unwrap(), target);
                    model = target;
                }
                None => {
                    assert!(matches!(
                        result,
                        Err(DaoError::InvalidTransition { state, transition: t })
                            if state == model && t == transition
                    ));
                }
            }
            assert_eq!(machine.state(), model);
        }
    }
}

#[test]
fn every_state_is_reachable_from_off() {
    let mut seen = vec![State::Off];
    let mut frontier = vec![State::Off];
    while let Some(state) = frontier.pop() {
        for transition in Transition::ALL {
            if transition.source() == state && !seen.contains(&transition.target()) {
                seen.push(transition.target());
                frontier.push(transition.target());
            }
        }
    }
    for state in [State::Off, State::Standby, State::Idle, State::Running, State::Error] {
        assert!(seen.contains(&state), "{state} unreachable");
    }
}
