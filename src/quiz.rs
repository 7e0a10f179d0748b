use log::debug;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;

use crate::choices::ChoiceSet;
use crate::error::EvalError;
use crate::llm::{invoke_with_retry, parse_decision, DecisionMaker};
use crate::prompt::{skill_prompt, Lang};
use crate::story::document::RawProfile;
use crate::story::node::CharacterProfile;

/// Choice type that marks the correct answer.
pub const SKILL_CHOICE: &str = "skill choice";

/// Speaker used for dialogue turns without a role.
const DEFAULT_SPEAKER: &str = "system";

// ---------------------------------------------------------------------------
// Raw corpus shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NestedQuestion {
    #[serde(default)]
    skill: Vec<String>,
    #[serde(default)]
    question: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FlatQuestion {
    text: String,
    #[serde(default, alias = "skill")]
    skills: Vec<String>,
}

/// Both question layouts found in published quiz files.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawQuestion {
    /// `[{"skill": [...], "question": ["..."]}]`
    Nested(Vec<NestedQuestion>),
    /// `{"text": "...", "skills": [...]}`
    Flat(FlatQuestion),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Line {
        #[serde(default)]
        role: Option<String>,
        content: String,
    },
    Text(String),
}

impl RawContent {
    fn into_parts(self) -> (Option<String>, String) {
        match self {
            RawContent::Line { role, content } => (role, content),
            RawContent::Text(text) => (None, text),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    content: RawContent,
}

#[derive(Debug, Deserialize)]
struct RawQuizItem {
    #[serde(default)]
    profile: Vec<RawProfile>,
    #[serde(default)]
    content: Vec<RawContent>,
    question: RawQuestion,
    #[serde(default)]
    choice: Vec<RawChoice>,
}

// ---------------------------------------------------------------------------
// Normalized item
// ---------------------------------------------------------------------------

/// One multiple-choice skill question, independent of the file layout it
/// came from.
#[derive(Debug, Clone)]
pub struct QuizItem {
    pub protagonist: CharacterProfile,
    pub others: Vec<CharacterProfile>,
    /// Rendered `speaker: text` transcript.
    pub dialogue: String,
    pub question: String,
    /// Skill tags as written in the corpus (trimmed, not normalized).
    pub skills: Vec<String>,
    /// Option text and whether it is the correct answer.
    pub options: Vec<(String, bool)>,
}

impl QuizItem {
    pub fn from_value(value: Value) -> Result<Self, EvalError> {
        let raw: RawQuizItem = serde_json::from_value(value)?;

        let (question, skills) = match raw.question {
            RawQuestion::Nested(list) => {
                let first = list
                    .into_iter()
                    .next()
                    .ok_or_else(|| EvalError::malformed_document("empty question list"))?;
                let text = first.question.into_iter().next().unwrap_or_default();
                (text, first.skill)
            }
            RawQuestion::Flat(flat) => (flat.text, flat.skills),
        };
        if question.trim().is_empty() {
            return Err(EvalError::malformed_document("question has no text"));
        }
        let skills = skills
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let mut profiles = raw.profile.into_iter().map(CharacterProfile::from);
        let protagonist = profiles
            .next()
            .ok_or_else(|| EvalError::malformed_document("item has no profiles"))?;
        let others = profiles.collect();

        let dialogue = raw
            .content
            .into_iter()
            .map(|c| {
                let (role, text) = c.into_parts();
                format!("{}: {text}", role.as_deref().unwrap_or(DEFAULT_SPEAKER))
            })
            .collect::<Vec<_>>()
            .join("\n");

        let options: Vec<(String, bool)> = raw
            .choice
            .into_iter()
            .map(|c| {
                let correct = c.kind.as_deref() == Some(SKILL_CHOICE);
                (c.content.into_parts().1, correct)
            })
            .collect();
        let correct = options.iter().filter(|(_, ok)| *ok).count();
        if correct != 1 {
            return Err(EvalError::malformed_document(format!(
                "expected exactly one '{SKILL_CHOICE}', found {correct}"
            )));
        }

        Ok(Self {
            protagonist,
            others,
            dialogue,
            question,
            skills,
            options,
        })
    }

    /// Ask the decision maker this question once. Returns whether the answer
    /// was correct.
    pub fn answer<R>(
        &self,
        maker: &mut dyn DecisionMaker,
        lang: Lang,
        max_attempts: u32,
        rng: &mut R,
    ) -> Result<bool, EvalError>
    where
        R: Rng + ?Sized,
    {
        let set = ChoiceSet::shuffled(self.options.clone(), rng)?;
        let correct = set.correct_label()?;

        let prompt = skill_prompt(
            lang,
            &self.protagonist,
            &self.others,
            &self.dialogue,
            &self.question,
            &set.render(". "),
        );
        debug!("Quiz prompt:\n{prompt}");

        let raw = invoke_with_retry(maker, &prompt, max_attempts)?;
        let decision = parse_decision(&raw, set.len())?;
        debug!("Picked {} (correct {correct})", decision.choice);

        Ok(decision.choice == correct)
    }
}
