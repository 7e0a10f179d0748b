use serde::Serialize;

/// Identifier of a plot node, unique within one document.
pub type Cid = i64;

/// Goal-achievement code that marks an ending as a full success.
pub const FULL_ACHIEVEMENT: i64 = 2;

/// A character as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterProfile {
    pub name: String,
    #[serde(rename = "public")]
    pub public_info: String,
    /// Only meaningful for the protagonist.
    #[serde(rename = "private", skip_serializing_if = "Option::is_none")]
    pub private_info: Option<String>,
    /// Only meaningful for the protagonist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    /// Scenario category used to bucket narrative statistics.
    #[serde(skip)]
    pub orientation: Option<String>,
}

impl CharacterProfile {
    /// `name: public info`, the one-line form used for side characters.
    pub fn summary(&self) -> String {
        format!("{}: {}", self.name, self.public_info)
    }
}

/// One spoken or narrated line. `speaker == None` means the narrator.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueLine {
    pub speaker: Option<String>,
    pub text: String,
}

impl DialogueLine {
    pub fn render(&self, narrator: &str) -> String {
        format!("{}: {}", self.speaker.as_deref().unwrap_or(narrator), self.text)
    }
}

/// A distractor attached to a choice. Only quiz material uses these.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionEdge {
    pub kind: String,
    pub speaker: String,
    pub text: String,
}

/// An outgoing edge of a branching node.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceEdge {
    pub target: Cid,
    pub speaker: String,
    pub text: String,
    pub confusions: Vec<ConfusionEdge>,
}

impl ChoiceEdge {
    /// How the option reads in a prompt, e.g. `Mia: Could we talk later?`.
    pub fn display(&self) -> String {
        if self.speaker.is_empty() {
            self.text.clone()
        } else {
            format!("{}: {}", self.speaker, self.text)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlotKind {
    /// The story is over; `goal_achievement == FULL_ACHIEVEMENT` is a win.
    Ending { goal_achievement: i64 },
    /// The protagonist must pick one of `choices`.
    Branching { choices: Vec<ChoiceEdge> },
}

/// A single beat of the branching story.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotNode {
    pub cid: Cid,
    pub kind: PlotKind,
    pub dialogue: Vec<DialogueLine>,
    /// Characters whose profiles are revealed when this node is reached.
    pub introduced: Vec<CharacterProfile>,
}

impl PlotNode {
    pub fn choices(&self) -> &[ChoiceEdge] {
        match &self.kind {
            PlotKind::Branching { choices } => choices,
            PlotKind::Ending { .. } => &[],
        }
    }
}
