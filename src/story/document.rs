use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::EvalError;
use crate::story::node::{
    CharacterProfile, ChoiceEdge, Cid, ConfusionEdge, DialogueLine, PlotKind, PlotNode,
};

// ---------------------------------------------------------------------------
// Raw corpus shapes
// ---------------------------------------------------------------------------

/// Accept strings as-is, render numbers/objects as JSON text, map null to None.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawProfile {
    #[serde(default, deserialize_with = "lenient_text")]
    name: Option<String>,
    #[serde(default, rename = "public profile", deserialize_with = "lenient_text")]
    public: Option<String>,
    #[serde(default, rename = "private profile", deserialize_with = "lenient_text")]
    private: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    goal: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    orientation: Option<String>,
}

impl From<RawProfile> for CharacterProfile {
    fn from(raw: RawProfile) -> Self {
        Self {
            name: raw.name.unwrap_or_default(),
            public_info: raw.public.unwrap_or_default(),
            private_info: raw.private,
            goal: raw.goal,
            orientation: raw.orientation,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct RawDialog {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    profile: Option<RawProfile>,
}

#[derive(Debug, Deserialize)]
struct RawConfusion {
    #[serde(rename = "type", default)]
    kind: String,
    content: RawLine,
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    cid: Cid,
    content: RawLine,
    #[serde(default)]
    confusion: Vec<RawConfusion>,
}

#[derive(Debug, Deserialize)]
struct RawPlot {
    cid: Cid,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    dialog: Vec<RawDialog>,
    #[serde(default)]
    choices: Vec<RawChoice>,
    #[serde(rename = "goal achievement", default)]
    goal_achievement: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RawDocument {
    predefined_profiles: Vec<RawProfile>,
    #[serde(alias = "interactive plot")]
    interactive_plot: Vec<RawPlot>,
}

// ---------------------------------------------------------------------------
// Validated document
// ---------------------------------------------------------------------------

/// One branching story, validated and indexed by node id.
#[derive(Debug, Clone)]
pub struct GraphDocument {
    pub id: String,
    pub protagonist: CharacterProfile,
    /// Side characters known before the story starts.
    pub others: Vec<CharacterProfile>,
    nodes: Vec<PlotNode>,
    index: HashMap<Cid, usize>,
}

impl GraphDocument {
    /// Every episode starts here.
    pub const ENTRY: Cid = 0;

    pub fn from_value(id: impl Into<String>, value: Value) -> Result<Self, EvalError> {
        let raw: RawDocument = serde_json::from_value(value)?;
        Self::from_raw(id, raw)
    }

    /// Check the invariants the walker relies on:
    /// - there is a protagonist with an orientation,
    /// - node ids are unique and the entry node exists,
    /// - every edge points at an existing node,
    /// - every ending carries a goal-achievement code.
    pub fn from_raw(id: impl Into<String>, raw: RawDocument) -> Result<Self, EvalError> {
        let id = id.into();
        let mut profiles = raw.predefined_profiles.into_iter().map(CharacterProfile::from);
        let protagonist = profiles
            .next()
            .ok_or_else(|| EvalError::malformed_document(format!("{id}: no profiles")))?;
        if protagonist.orientation.is_none() {
            return Err(EvalError::malformed_document(format!(
                "{id}: protagonist has no orientation"
            )));
        }
        let others = profiles.collect();

        let mut nodes = Vec::with_capacity(raw.interactive_plot.len());
        let mut index = HashMap::new();
        for plot in raw.interactive_plot {
            let cid = plot.cid;
            if index.insert(cid, nodes.len()).is_some() {
                return Err(EvalError::malformed_document(format!(
                    "{id}: duplicate node id {cid}"
                )));
            }
            nodes.push(convert_plot(&id, plot)?);
        }

        if !index.contains_key(&Self::ENTRY) {
            return Err(EvalError::malformed_document(format!(
                "{id}: missing entry node {}",
                Self::ENTRY
            )));
        }

        for node in &nodes {
            if let Some(edge) = node.choices().iter().find(|e| !index.contains_key(&e.target)) {
                return Err(EvalError::malformed_document(format!(
                    "{id}: node {} points at unknown node {}",
                    node.cid, edge.target
                )));
            }
        }

        Ok(Self {
            id,
            protagonist,
            others,
            nodes,
            index,
        })
    }

    pub fn node(&self, cid: Cid) -> Option<&PlotNode> {
        self.index.get(&cid).map(|&i| &self.nodes[i])
    }

    /// Size of the node set; also the decision budget of one episode.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The statistics bucket for this story.
    pub fn category(&self) -> &str {
        self.protagonist.orientation.as_deref().unwrap_or_default()
    }
}

fn convert_plot(doc_id: &str, plot: RawPlot) -> Result<PlotNode, EvalError> {
    let mut dialogue = Vec::new();
    let mut introduced = Vec::new();
    for line in plot.dialog {
        if let Some(profile) = line.profile {
            introduced.push(CharacterProfile::from(profile));
        }
        if let Some(text) = line.content {
            dialogue.push(DialogueLine {
                speaker: line.role,
                text,
            });
        }
    }

    let kind = if plot.kind == "ending" {
        let goal_achievement = plot.goal_achievement.ok_or_else(|| {
            EvalError::malformed_document(format!(
                "{doc_id}: ending {} has no goal achievement",
                plot.cid
            ))
        })?;
        PlotKind::Ending { goal_achievement }
    } else {
        let choices = plot
            .choices
            .into_iter()
            .map(|c| ChoiceEdge {
                target: c.cid,
                speaker: c.content.role.unwrap_or_default(),
                text: c.content.content,
                confusions: c
                    .confusion
                    .into_iter()
                    .map(|f| ConfusionEdge {
                        kind: f.kind,
                        speaker: f.content.role.unwrap_or_default(),
                        text: f.content.content,
                    })
                    .collect(),
            })
            .collect();
        PlotKind::Branching { choices }
    };

    Ok(PlotNode {
        cid: plot.cid,
        kind,
        dialogue,
        introduced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::node::FULL_ACHIEVEMENT;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "predefined_profiles": [
                {"name": "Lin", "public profile": "new hire", "private profile": "nervous",
                 "goal": "get the project lead role", "orientation": "workplace"},
                {"name": "Chen", "public profile": "team manager"}
            ],
            "interactive_plot": [
                {"cid": 0, "type": "normal",
                 "dialog": [
                    {"content": "Monday stand-up begins."},
                    {"role": "Chen", "content": "Who wants to lead the migration?"},
                    {"profile": {"name": "Wu", "public profile": "senior engineer"}}
                 ],
                 "choices": [
                    {"cid": 1, "content": {"role": "Lin", "content": "I'd like to try."},
                     "confusion": [{"type": "skill confusion", "content": {"role": "Lin", "content": "Maybe."}}]},
                    {"cid": 2, "content": {"role": "Lin", "content": "Not me."}, "confusion": []}
                 ]},
                {"cid": 1, "type": "ending", "dialog": [], "goal achievement": 2},
                {"cid": 2, "type": "ending", "dialog": [], "goal achievement": 0}
            ]
        })
    }

    #[test]
    fn test_parse_and_index() {
        let doc = GraphDocument::from_value("office", sample()).unwrap();
        assert_eq!(doc.node_count(), 3);
        assert_eq!(doc.category(), "workplace");
        assert_eq!(doc.protagonist.goal.as_deref(), Some("get the project lead role"));
        assert_eq!(doc.others[0].name, "Chen");

        let entry = doc.node(GraphDocument::ENTRY).unwrap();
        assert_eq!(entry.dialogue.len(), 2);
        assert_eq!(entry.dialogue[0].speaker, None);
        assert_eq!(entry.introduced[0].name, "Wu");
        assert_eq!(entry.choices()[0].confusions[0].kind, "skill confusion");

        assert_eq!(
            doc.node(1).unwrap().kind,
            PlotKind::Ending {
                goal_achievement: FULL_ACHIEVEMENT
            }
        );
        assert!(doc.node(7).is_none());
    }

    #[test]
    fn test_spaced_plot_key_is_accepted() {
        let mut value = sample();
        let plot = value.as_object_mut().unwrap().remove("interactive_plot").unwrap();
        value["interactive plot"] = plot;
        assert!(GraphDocument::from_value("office", value).is_ok());
    }

    #[test]
    fn test_numeric_orientation_is_stringified() {
        let mut value = sample();
        value["predefined_profiles"][0]["orientation"] = json!(3);
        let doc = GraphDocument::from_value("office", value).unwrap();
        assert_eq!(doc.category(), "3");
    }

    #[test]
    fn test_dangling_edge_is_rejected() {
        let mut value = sample();
        value["interactive_plot"][0]["choices"][1]["cid"] = json!(9);
        let err = GraphDocument::from_value("office", value).unwrap_err();
        assert!(matches!(err, EvalError::MalformedDocument(_)));
        assert!(err.to_string().contains("unknown node 9"));
    }

    #[test]
    fn test_missing_entry_and_duplicates_are_rejected() {
        let mut value = sample();
        value["interactive_plot"][0]["cid"] = json!(5);
        assert!(GraphDocument::from_value("office", value).is_err());

        let mut value = sample();
        value["interactive_plot"][2]["cid"] = json!(1);
        let err = GraphDocument::from_value("office", value).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_ending_without_code_is_rejected() {
        let mut value = sample();
        value["interactive_plot"][1]
            .as_object_mut()
            .unwrap()
            .remove("goal achievement");
        assert!(GraphDocument::from_value("office", value).is_err());
    }

    #[test]
    fn test_missing_orientation_is_rejected() {
        let mut value = sample();
        value["predefined_profiles"][0]
            .as_object_mut()
            .unwrap()
            .remove("orientation");
        assert!(GraphDocument::from_value("office", value).is_err());
    }
}
