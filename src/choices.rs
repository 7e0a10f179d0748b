use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::EvalError;

/// Upper bound on options: one per letter A..=Z.
pub const MAX_OPTIONS: usize = 26;

/// One option as shown to the model.
#[derive(Debug, Clone)]
pub struct LabeledOption<T> {
    pub label: char,
    pub text: String,
    pub value: T,
}

/// A shuffled, lettered set of options.
///
/// `T` is whatever the caller needs back once a letter is picked: the target
/// node id while walking a story, or a correctness flag for quiz items.
#[derive(Debug, Clone)]
pub struct ChoiceSet<T> {
    options: Vec<LabeledOption<T>>,
}

impl<T> ChoiceSet<T> {
    /// Shuffle `items` into a fresh random order and letter them A, B, C, ...
    ///
    /// An empty input yields an empty set; callers treat that as "no decision
    /// possible".
    pub fn shuffled<R>(items: Vec<(String, T)>, rng: &mut R) -> Result<Self, EvalError>
    where
        R: Rng + ?Sized,
    {
        if items.len() > MAX_OPTIONS {
            return Err(EvalError::malformed_document(format!(
                "{} options exceed the {MAX_OPTIONS} available labels",
                items.len()
            )));
        }

        let mut items = items;
        items.shuffle(rng);

        let options = items
            .into_iter()
            .zip('A'..='Z')
            .map(|((text, value), label)| LabeledOption { label, text, value })
            .collect();

        Ok(Self { options })
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// The value behind a label, if the label exists in this set.
    pub fn resolve(&self, label: char) -> Option<&T> {
        self.options
            .iter()
            .find(|o| o.label == label)
            .map(|o| &o.value)
    }

    /// One line per option, e.g. `A: text` with `separator = ": "`.
    pub fn render(&self, separator: &str) -> String {
        self.options
            .iter()
            .map(|o| format!("{}{separator}{}", o.label, o.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ChoiceSet<bool> {
    /// The label of the single correct option.
    ///
    /// Fails when the set does not contain exactly one correct option.
    pub fn correct_label(&self) -> Result<char, EvalError> {
        let mut correct = self.options.iter().filter(|o| o.value);
        match (correct.next(), correct.next()) {
            (Some(o), None) => Ok(o.label),
            (None, _) => Err(EvalError::malformed_document("no option is marked correct")),
            (Some(_), Some(_)) => Err(EvalError::malformed_document(
                "more than one option is marked correct",
            )),
        }
    }
}
