//! Small typed classifiers so the control loop branches on enums, not inline regexes.

use std::sync::OnceLock;

use regex::Regex;

use crate::agent_engine::action::{Action, PlannedAction};

/// How the user's request itself should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskIntent {
    /// The whole request is a stop/cancel command ("stop", "that's enough").
    Halt,
    /// A goal to work towards. `opens_with_stop` is set when the request leads
    /// with a stop clause ("ok that's enough, just close the window").
    /// A stop word elsewhere ("set a stop watch") does not count.
    Goal { opens_with_stop: bool },
}

/// What a freshly planned action means for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSignal {
    /// Accept completion immediately, without visual verification.
    Stop,
    /// The planner claims the goal is met. Must be verified.
    DoneClaim,
    /// An ordinary action to dispatch.
    Continue,
}

const POLITE_PREFIX: &str = r"(?:(?:please|ok|okay|alright|hey|just|now|you\s+can)[\s,]+)*";
const STOP_WORDS: &str =
    r"(?:stop|cancel|abort|halt|quit|enough|that'?s\s+enough|that'?s\s+good|never\s*mind)";

fn halt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?ix)^ {POLITE_PREFIX} {STOP_WORDS}
            (?:[\s,]+(?:now|please|it|that|this|everything|the\s+task|right\s+now|thanks|thank\s+you))*
            [\s.!]*$"
        ))
        .expect("halt regex is valid")
    })
}

/// A stop clause closed by punctuation, followed by more of the request.
fn leading_stop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?ix)^ {POLITE_PREFIX} {STOP_WORDS} \s*[,.;:!]+\s*\S"))
            .expect("leading stop regex is valid")
    })
}

pub fn classify_task(task: &str) -> TaskIntent {
    let trimmed = task.trim();
    if trimmed.is_empty() || halt_re().is_match(trimmed) {
        return TaskIntent::Halt;
    }
    TaskIntent::Goal {
        opens_with_stop: leading_stop_re().is_match(trimmed),
    }
}

pub fn classify_plan(task: TaskIntent, planned: &PlannedAction) -> PlanSignal {
    match (&planned.action, task) {
        (Action::Done { .. }, TaskIntent::Halt) => PlanSignal::Stop,
        (Action::Done { .. }, TaskIntent::Goal { opens_with_stop: true }) => PlanSignal::Stop,
        (Action::Done { .. }, TaskIntent::Goal { opens_with_stop: false }) => PlanSignal::DoneClaim,
        _ => PlanSignal::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_stop_phrases_halt() {
        for t in [
            "stop",
            "Stop!",
            "please stop now",
            "ok stop",
            "that's enough",
            "thats enough, thanks",
            "cancel",
            "  never mind ",
            "",
        ] {
            assert_eq!(classify_task(t), TaskIntent::Halt, "{t:?}");
        }
    }

    #[test]
    fn goals_are_not_halts() {
        let plain = TaskIntent::Goal { opens_with_stop: false };
        for t in [
            "open Calculator and compute 12*4",
            "write that the job is done",
            "type 'bus stop' into notes",
            "set a stop watch for 5 minutes and press start, then stop it at 3",
            "cancel my 3pm meeting in Calendar",
            "stop the timer",
            "abort the upload in Safari",
        ] {
            assert_eq!(classify_task(t), plain, "{t:?}");
        }
    }

    #[test]
    fn leading_stop_clause_is_recognised() {
        let stop_first = TaskIntent::Goal { opens_with_stop: true };
        for t in [
            "ok that's enough, close the music player",
            "stop. open Notes instead",
            "please cancel; just quit Safari",
        ] {
            assert_eq!(classify_task(t), stop_first, "{t:?}");
        }
    }

    #[test]
    fn done_is_a_claim_unless_stop_was_requested() {
        let done = PlannedAction::new(Action::Done { summary: None }, "finished");
        let wait = PlannedAction::new(Action::Wait { millis: 10 }, "pause");
        let goal = TaskIntent::Goal { opens_with_stop: false };

        assert_eq!(classify_plan(goal, &done), PlanSignal::DoneClaim);
        assert_eq!(classify_plan(goal, &wait), PlanSignal::Continue);
        assert_eq!(
            classify_plan(TaskIntent::Goal { opens_with_stop: true }, &done),
            PlanSignal::Stop
        );
        assert_eq!(classify_plan(TaskIntent::Halt, &done), PlanSignal::Stop);
    }
}
