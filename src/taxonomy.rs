use std::collections::HashMap;

/// Canonical form of a skill or category name: lowercase with all spaces and
/// hyphens removed, so "Time-Management" and "time management" collide.
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// A named group of skills used for roll-up reporting.
#[derive(Debug, Clone)]
pub struct SkillCategory {
    pub name: String,
    /// Normalized member skill names.
    pub skills: Vec<String>,
}

/// Immutable lookup table between skill categories and their member skills.
///
/// Built once at startup and passed by reference to whoever needs it.
#[derive(Debug, Clone)]
pub struct SkillTaxonomy {
    categories: Vec<SkillCategory>,
    /// normalized category name -> index into `categories`
    by_category: HashMap<String, usize>,
}

impl SkillTaxonomy {
    pub fn new<C, S>(groups: impl IntoIterator<Item = (C, Vec<S>)>) -> Self
    where
        C: Into<String>,
        S: AsRef<str>,
    {
        let mut categories = Vec::new();
        let mut by_category = HashMap::new();

        for (idx, (name, skills)) in groups.into_iter().enumerate() {
            let name = name.into();
            let skills = skills.iter().map(|s| normalize(s.as_ref())).collect();
            by_category.insert(normalize(&name), idx);
            categories.push(SkillCategory { name, skills });
        }

        Self {
            categories,
            by_category,
        }
    }

    /// The five social-skill families the quiz corpus is tagged with.
    pub fn standard() -> Self {
        Self::new([
            (
                "Self Management Skills",
                vec![
                    "task management",
                    "time management",
                    "detail management",
                    "organizational skill",
                    "responsibility management",
                    "capacity for consistency",
                    "goal regulation",
                    "rule-following skill",
                    "decision-making skill",
                    "adaptability",
                    "capacity for independence",
                    "self-reflection skill",
                ],
            ),
            (
                "Social Engagement Skills",
                vec![
                    "leadership skill",
                    "persuasive skill",
                    "conversational skill",
                    "expressive skill",
                    "energy regulation",
                ],
            ),
            (
                "Cooperation Skills",
                vec![
                    "teamwork skill",
                    "capacity for trust",
                    "perspective-taking skill",
                    "capacity for social warmth",
                    "ethical competence",
                ],
            ),
            (
                "Emotional Resilience Skills",
                vec![
                    "stress regulation",
                    "capacity for optimism",
                    "anger management",
                    "confidence regulation",
                    "impulse regulation",
                ],
            ),
            (
                "Innovation Skills",
                vec![
                    "abstract thinking skill",
                    "creative skill",
                    "artistic skill",
                    "cultural competence",
                    "information processing skill",
                ],
            ),
        ])
    }

    /// Look up a category by any spelling of its name.
    pub fn category(&self, name: &str) -> Option<&SkillCategory> {
        self.by_category
            .get(&normalize(name))
            .map(|&idx| &self.categories[idx])
    }
}
