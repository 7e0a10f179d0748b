pub mod document;
pub mod node;

use log::{debug, info};
use rand::Rng;

use crate::choices::ChoiceSet;
use crate::error::EvalError;
use crate::llm::{invoke_with_retry, parse_decision, DecisionMaker};
use crate::prompt::{ending_prompt, Lang};

pub use document::GraphDocument;
pub use node::{CharacterProfile, Cid, PlotKind, PlotNode, FULL_ACHIEVEMENT};

// ---------------------------------------------------------------------------
// Episode state
// ---------------------------------------------------------------------------

/// Everything one episode accumulates while walking a story.
struct EpisodeState {
    path: Vec<Cid>,
    /// Side characters known so far: predefined ones plus any introduced on
    /// the path. Never reset between steps.
    others: Vec<CharacterProfile>,
    /// Transcript of every visited node, one `speaker: text` line each.
    transcript: String,
    decisions: usize,
}

impl EpisodeState {
    fn new(doc: &GraphDocument) -> Self {
        Self {
            path: vec![GraphDocument::ENTRY],
            others: doc.others.clone(),
            transcript: String::new(),
            decisions: 0,
        }
    }

    /// Fold a newly reached node into the accumulated context.
    fn absorb(&mut self, node: &PlotNode, narrator: &str) {
        self.others.extend(node.introduced.iter().cloned());
        for line in &node.dialogue {
            self.transcript.push_str(&line.render(narrator));
            self.transcript.push('\n');
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inconclusive {
    /// A branching node offered nothing to choose from.
    NoChoices { cid: Cid },
    /// The walk used up its decision budget without reaching an ending.
    StepCap { cap: usize },
}

/// Result of an episode that did not hit a transport or parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeOutcome {
    Ended {
        goal_achievement: i64,
        path: Vec<Cid>,
    },
    Inconclusive {
        reason: Inconclusive,
        path: Vec<Cid>,
    },
}

impl EpisodeOutcome {
    /// `Some(true)` for a fully achieved ending, `None` when nothing should
    /// be recorded.
    pub fn success(&self) -> Option<bool> {
        match self {
            EpisodeOutcome::Ended {
                goal_achievement, ..
            } => Some(*goal_achievement == FULL_ACHIEVEMENT),
            EpisodeOutcome::Inconclusive { .. } => None,
        }
    }

    pub fn path(&self) -> &[Cid] {
        match self {
            EpisodeOutcome::Ended { path, .. } | EpisodeOutcome::Inconclusive { path, .. } => path,
        }
    }
}

/// Where the walk is between two model calls.
enum Phase {
    /// Load the node and decide whether it ends the story.
    Enter(Cid),
    /// Choices are built; a decision is pending.
    AwaitingDecision(ChoiceSet<Cid>),
    /// A valid letter was picked; the path has not moved yet.
    Resolved(Cid),
    Terminal(i64),
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

/// Drives episodes over story graphs using a decision maker.
pub struct GraphWalker<'m> {
    maker: &'m mut dyn DecisionMaker,
    lang: Lang,
    max_attempts: u32,
}

impl<'m> GraphWalker<'m> {
    pub fn new(maker: &'m mut dyn DecisionMaker, lang: Lang, max_attempts: u32) -> Self {
        Self {
            maker,
            lang,
            max_attempts,
        }
    }

    /// Walk `doc` once from its entry node.
    ///
    /// At most `doc.node_count()` decisions are made, so cyclic graphs still
    /// terminate. Transport and parse failures abandon the episode with an
    /// error.
    pub fn run_episode<R>(
        &mut self,
        doc: &GraphDocument,
        rng: &mut R,
    ) -> Result<EpisodeOutcome, EvalError>
    where
        R: Rng + ?Sized,
    {
        let cap = doc.node_count();
        let narrator = self.lang.narrator();
        let mut state = EpisodeState::new(doc);
        let mut phase = Phase::Enter(GraphDocument::ENTRY);

        loop {
            phase = match phase {
                Phase::Enter(cid) => {
                    let node = doc.node(cid).ok_or_else(|| {
                        EvalError::malformed_document(format!("{}: no node {cid}", doc.id))
                    })?;
                    state.absorb(node, narrator);

                    match &node.kind {
                        PlotKind::Ending { goal_achievement } => Phase::Terminal(*goal_achievement),
                        PlotKind::Branching { choices } => {
                            if state.decisions >= cap {
                                return Ok(EpisodeOutcome::Inconclusive {
                                    reason: Inconclusive::StepCap { cap },
                                    path: state.path,
                                });
                            }
                            let items = choices.iter().map(|c| (c.display(), c.target)).collect();
                            let set = ChoiceSet::shuffled(items, rng)?;
                            if set.is_empty() {
                                return Ok(EpisodeOutcome::Inconclusive {
                                    reason: Inconclusive::NoChoices { cid },
                                    path: state.path,
                                });
                            }
                            Phase::AwaitingDecision(set)
                        }
                    }
                }
                Phase::AwaitingDecision(set) => {
                    let prompt = ending_prompt(
                        self.lang,
                        &doc.protagonist,
                        &state.others,
                        &state.transcript,
                        &set.render(": "),
                    );
                    debug!("Decision prompt:\n{prompt}");

                    let raw = invoke_with_retry(&mut *self.maker, &prompt, self.max_attempts)?;
                    let decision = parse_decision(&raw, set.len())?;
                    let target = *set.resolve(decision.choice).ok_or_else(|| {
                        EvalError::malformed_response(format!("no option {}", decision.choice))
                    })?;

                    info!(
                        "Transition: {} -> {target} (choice {}, reason: {})",
                        state.path.last().copied().unwrap_or(GraphDocument::ENTRY),
                        decision.choice,
                        decision.explanation.as_deref().unwrap_or("-")
                    );
                    Phase::Resolved(target)
                }
                Phase::Resolved(target) => {
                    state.path.push(target);
                    state.decisions += 1;
                    Phase::Enter(target)
                }
                Phase::Terminal(goal_achievement) => {
                    info!(
                        "Reached ending {} after {} decisions (goal achievement {goal_achievement})",
                        state.path.last().copied().unwrap_or(GraphDocument::ENTRY),
                        state.decisions
                    );
                    return Ok(EpisodeOutcome::Ended {
                        goal_achievement,
                        path: state.path,
                    });
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::{json, Value};

    fn doc(value: Value) -> GraphDocument {
        GraphDocument::from_value("test", value).unwrap()
    }

    fn profiles() -> Value {
        json!([
            {"name": "Lin", "public profile": "new hire", "private profile": "shy",
             "goal": "make a friend", "orientation": "friendship"}
        ])
    }

    fn two_node_doc() -> GraphDocument {
        doc(json!({
            "predefined_profiles": profiles(),
            "interactive_plot": [
                {"cid": 0, "type": "normal", "dialog": [{"content": "Lunch break."}],
                 "choices": [
                    {"cid": 1, "content": {"role": "Lin", "content": "Join the table."}},
                    {"cid": 1, "content": {"role": "Lin", "content": "Wave hello."}}
                 ]},
                {"cid": 1, "type": "ending", "dialog": [], "goal achievement": 2}
            ]
        }))
    }

    #[test]
    fn test_two_node_story_succeeds_for_any_choice() {
        let document = two_node_doc();
        let mut rng = StdRng::seed_from_u64(1);
        for letter in ["A", "B"] {
            let mut maker =
                |_: &str| -> Result<String> { Ok(format!("{{\"choice\": \"{letter}\"}}")) };
            let mut walker = GraphWalker::new(&mut maker, Lang::En, 3);
            let outcome = walker.run_episode(&document, &mut rng).unwrap();
            assert_eq!(outcome.success(), Some(true));
            assert_eq!(outcome.path(), &[0, 1]);
        }
    }

    #[test]
    fn test_terminal_entry_needs_no_decisions() {
        let document = doc(json!({
            "predefined_profiles": profiles(),
            "interactive_plot": [
                {"cid": 0, "type": "ending", "dialog": [], "goal achievement": 0}
            ]
        }));
        let mut calls = 0;
        let mut maker = |_: &str| -> Result<String> {
            calls += 1;
            Ok("{\"choice\": \"A\"}".into())
        };
        let mut walker = GraphWalker::new(&mut maker, Lang::En, 3);
        let outcome = walker
            .run_episode(&document, &mut StdRng::seed_from_u64(2))
            .unwrap();
        assert_eq!(outcome.success(), Some(false));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_cycle_stops_at_step_cap() {
        let document = doc(json!({
            "predefined_profiles": profiles(),
            "interactive_plot": [
                {"cid": 0, "type": "normal", "dialog": [],
                 "choices": [{"cid": 1, "content": {"role": "Lin", "content": "Onward."}}]},
                {"cid": 1, "type": "normal", "dialog": [],
                 "choices": [{"cid": 0, "content": {"role": "Lin", "content": "Back."}}]}
            ]
        }));
        let mut calls = 0;
        let mut maker = |_: &str| -> Result<String> {
            calls += 1;
            Ok("{\"choice\": \"A\"}".into())
        };
        let mut walker = GraphWalker::new(&mut maker, Lang::En, 3);
        let outcome = walker
            .run_episode(&document, &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert_eq!(
            outcome,
            EpisodeOutcome::Inconclusive {
                reason: Inconclusive::StepCap { cap: 2 },
                path: vec![0, 1, 0],
            }
        );
        assert_eq!(outcome.success(), None);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_node_without_choices_is_inconclusive() {
        let document = doc(json!({
            "predefined_profiles": profiles(),
            "interactive_plot": [
                {"cid": 0, "type": "normal", "dialog": [], "choices": []}
            ]
        }));
        let mut maker = |_: &str| -> Result<String> { anyhow::bail!("must not be called") };
        let mut walker = GraphWalker::new(&mut maker, Lang::En, 3);
        let outcome = walker
            .run_episode(&document, &mut StdRng::seed_from_u64(4))
            .unwrap();
        assert!(matches!(
            outcome,
            EpisodeOutcome::Inconclusive {
                reason: Inconclusive::NoChoices { cid: 0 },
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_response_abandons_episode() {
        let document = two_node_doc();
        let mut maker = |_: &str| -> Result<String> { Ok("I would join the table.".into()) };
        let mut walker = GraphWalker::new(&mut maker, Lang::En, 3);
        let err = walker
            .run_episode(&document, &mut StdRng::seed_from_u64(5))
            .unwrap_err();
        assert!(matches!(err, EvalError::MalformedResponse(_)));
    }

    #[test]
    fn test_transport_failure_abandons_episode() {
        let document = two_node_doc();
        let mut calls = 0;
        let mut maker = |_: &str| -> Result<String> {
            calls += 1;
            anyhow::bail!("timeout")
        };
        let mut walker = GraphWalker::new(&mut maker, Lang::En, 4);
        let err = walker
            .run_episode(&document, &mut StdRng::seed_from_u64(6))
            .unwrap_err();
        assert!(matches!(err, EvalError::TransportFailure { attempts: 4, .. }));
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_prompt_accumulates_context_along_path() {
        let document = doc(json!({
            "predefined_profiles": profiles(),
            "interactive_plot": [
                {"cid": 0, "type": "normal",
                 "dialog": [{"content": "Lunch break."}],
                 "choices": [{"cid": 1, "content": {"role": "Lin", "content": "Sit down."}}]},
                {"cid": 1, "type": "normal",
                 "dialog": [
                    {"role": "Ana", "content": "Hi, I'm Ana."},
                    {"profile": {"name": "Ana", "public profile": "designer"}}
                 ],
                 "choices": [{"cid": 2, "content": {"role": "Lin", "content": "Nice to meet you."}}]},
                {"cid": 2, "type": "ending", "dialog": [], "goal achievement": 1}
            ]
        }));
        let mut prompts = Vec::new();
        let mut maker = |p: &str| -> Result<String> {
            prompts.push(p.to_string());
            Ok("{\"choice\": \"A\"}".into())
        };
        let mut walker = GraphWalker::new(&mut maker, Lang::En, 3);
        let outcome = walker
            .run_episode(&document, &mut StdRng::seed_from_u64(7))
            .unwrap();
        assert_eq!(outcome.success(), Some(false));
        assert_eq!(outcome.path(), &[0, 1, 2]);

        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("Narrator: Lunch break.\n"));
        assert!(!prompts[0].contains("Ana: designer"));
        assert!(prompts[1].contains("Narrator: Lunch break.\nAna: Hi, I'm Ana.\n"));
        assert!(prompts[1].contains("Ana: designer"));
        assert!(prompts[1].contains("A: Lin: Nice to meet you."));
    }
}
