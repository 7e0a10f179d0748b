use serde::Serialize;

use crate::story::node::CharacterProfile;

/// Corpus / prompt language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Cn,
    En,
}

impl Lang {
    pub fn code(self) -> &'static str {
        match self {
            Lang::Cn => "cn",
            Lang::En => "en",
        }
    }

    /// Speaker name for lines without a role.
    pub fn narrator(self) -> &'static str {
        match self {
            Lang::Cn => "旁白",
            Lang::En => "Narrator",
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Serialize)]
struct SideCharacter<'a> {
    name: &'a str,
    info: &'a str,
}

/// Decision prompt for one step of a story.
///
/// `choices` is the already-lettered option block (`A: ...` per line).
pub fn ending_prompt(
    lang: Lang,
    protagonist: &CharacterProfile,
    others: &[CharacterProfile],
    dialogue: &str,
    choices: &str,
) -> String {
    let name = &protagonist.name;
    let main_profile = serde_json::to_string(protagonist).unwrap_or_default();
    let user_profile = others
        .iter()
        .map(CharacterProfile::summary)
        .collect::<Vec<_>>()
        .join("\n");

    match lang {
        Lang::Cn => format!(
            "请你扮演{name}，给定{name}的信息，其中包含了{name}的公开信息、隐私信息和在社交场景中要实现的社交目标，\
同时，给定在社交中其他角色的信息，请你基于给定{name}的角色信息、{name}的社交目标和{name}和其他角色的对话上下文，\
从给定的选项中选择一个最有可能达成目标结局的{name}的回复选项，并给出解释，输出json格式，\
输出示例: {{\"explanation\": \"解释\", \"choice\": \"A\"}}。
[{name}的信息]
{main_profile}

[其他角色的信息]
{user_profile}

[对话上下文]
{dialogue}

[选项]
{choices}
"
        ),
        Lang::En => format!(
            "Please play the role of {name}. Given the information about {name}, which includes {name}'s public information, \
private information, and social goals to be achieved in a social scenario, and also given the information of other characters \
in the social setting, please choose the response option for {name} that is most likely to achieve the target outcome based on \
the given role information of {name}, {name}'s social goals, and the dialogue context between {name} and other characters. \
Provide an explanation and output in JSON format. Output example: {{\"explanation\": \"explanation\", \"choice\": \"A\"}}.
[{name}'s Information]
{main_profile}

[Other Characters' Information]
{user_profile}

[Dialogue Context]
{dialogue}

[Options]
{choices}
"
        ),
    }
}

/// Prompt for one multiple-choice skill question.
pub fn skill_prompt(
    lang: Lang,
    protagonist: &CharacterProfile,
    others: &[CharacterProfile],
    dialogue: &str,
    question: &str,
    choices: &str,
) -> String {
    let name = &protagonist.name;
    let public = &protagonist.public_info;
    let private = protagonist.private_info.as_deref().unwrap_or_default();
    let goal = protagonist.goal.as_deref().unwrap_or_default();
    let side: Vec<SideCharacter<'_>> = others
        .iter()
        .map(|p| SideCharacter {
            name: &p.name,
            info: &p.public_info,
        })
        .collect();
    let user_profile = serde_json::to_string(&side).unwrap_or_default();

    match lang {
        Lang::Cn => format!(
            "请你扮演{name}，给定{name}的信息，其中包含了{name}的公开信息、隐私信息和在社交场景中要实现的社交目标，\
同时，给定在社交中其他角色的信息，请你基于给定的角色信息、{name}和其他角色的对话上下文、和提问，\
从给定的选项中选择一个正确的答案并给出解释，输出json格式，\
输出示例(json有两个字段，explanation和choice）：{{\"explanation\": \"解释\", \"choice\": \"A\"}}。

[{name}的信息]
公开信息：{public}
隐私信息：{private}
社交目标：{goal}

[其他角色的信息]
{user_profile}

[对话上下文]
{dialogue}

[提问]
{question}

[选项]
{choices}"
        ),
        Lang::En => format!(
            "Please act as {name}. You are provided with information about {name}, which includes {name}'s public information, \
private information, and social goals to achieve in the social scenario. Additionally, information about other roles in the \
social interaction is provided. Based on the given role information, the dialogue context involving {name} and other roles, \
and the question, choose the correct answer from the given options and explain it. Output the result in JSON format. \
Example output: {{\"explanation\": \"explanation to your answer\", \"choice\": \"A\"}}.

[{name}'s Information]
Public Information: {public}
Private Information: {private}
Social Goal: {goal}

[Other Roles' Information]
{user_profile}

[Dialogue Context]
{dialogue}

[Question]
{question}

[Options]
{choices}
"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lin() -> CharacterProfile {
        CharacterProfile {
            name: "Lin".into(),
            public_info: "new hire".into(),
            private_info: Some("nervous".into()),
            goal: Some("lead the project".into()),
            orientation: Some("workplace".into()),
        }
    }

    fn chen() -> CharacterProfile {
        CharacterProfile {
            name: "Chen".into(),
            public_info: "team manager".into(),
            private_info: None,
            goal: None,
            orientation: None,
        }
    }

    #[test]
    fn test_ending_prompt_sections() {
        let prompt = ending_prompt(
            Lang::En,
            &lin(),
            &[chen()],
            "Chen: Who wants to lead?\n",
            "A: Lin: Me.\nB: Lin: Not me.",
        );
        assert!(prompt.starts_with("Please play the role of Lin."));
        assert!(prompt.contains(r#""private":"nervous""#));
        assert!(!prompt.contains("workplace"));
        assert!(prompt.contains("Chen: team manager"));
        assert!(prompt.contains("[Options]\nA: Lin: Me.\nB: Lin: Not me."));
    }

    #[test]
    fn test_skill_prompt_sections() {
        let prompt = skill_prompt(
            Lang::Cn,
            &lin(),
            &[chen()],
            "Chen: Hello",
            "What should Lin say?",
            "A. Hi\nB. Bye",
        );
        assert!(prompt.contains("隐私信息：nervous"));
        assert!(prompt.contains(r#"[{"name":"Chen","info":"team manager"}]"#));
        assert!(prompt.ends_with("[选项]\nA. Hi\nB. Bye"));
    }

    #[test]
    fn test_narrator_by_language() {
        assert_eq!(Lang::Cn.narrator(), "旁白");
        assert_eq!(Lang::En.narrator(), "Narrator");
        assert_eq!(Lang::En.to_string(), "en");
    }
}
