use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use crate::error::EvalError;
use crate::llm::{DecisionMaker, DEFAULT_MAX_ATTEMPTS};
use crate::prompt::Lang;
use crate::quiz::QuizItem;
use crate::stats::{KeyStyle, StatsAggregator, Tally};
use crate::story::{EpisodeOutcome, GraphDocument, GraphWalker};
use crate::taxonomy::{normalize, SkillTaxonomy};

/// Episodes sampled per story by default.
pub const DEFAULT_EPISODES: usize = 10;

// ---------------------------------------------------------------------------
// Corpus loading
// ---------------------------------------------------------------------------

fn read_json(path: &Path) -> Result<Value, EvalError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>, EvalError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

fn as_records(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Load every story in `path` (a file or a directory of `*.json` files).
///
/// A record is either `{"data_id": .., "cn_data": {..}, "en_data": {..}}`, in
/// which case `lang` picks the document, or a bare document. Records that do
/// not validate are logged and skipped. An unreadable single file is an
/// error; inside a directory it is skipped.
pub fn load_stories(path: &Path, lang: Lang) -> Result<Vec<GraphDocument>, EvalError> {
    let is_dir = fs::metadata(path)?.is_dir();
    let files = if is_dir {
        json_files(path)?
    } else {
        vec![path.to_path_buf()]
    };
    if files.is_empty() {
        return Err(EvalError::EmptyCorpus(path.to_path_buf()));
    }

    let lang_key = format!("{}_data", lang.code());
    let mut docs = Vec::new();

    for file in &files {
        info!("Loading {} for language {lang}", file.display());
        let value = match read_json(file) {
            Ok(v) => v,
            Err(e) if is_dir => {
                warn!("Skipping {}: {e}", file.display());
                continue;
            }
            Err(e) => return Err(e),
        };

        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        for (i, mut record) in as_records(value).into_iter().enumerate() {
            let id = match record.get("data_id") {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => format!("{stem}#{i}"),
            };

            let doc_value = if let Some(inner) = record.get_mut(&lang_key) {
                inner.take()
            } else if record.get("predefined_profiles").is_some() {
                record
            } else {
                warn!("Entry {id} has no {lang_key}, skipping");
                continue;
            };

            match GraphDocument::from_value(id.clone(), doc_value) {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!("Skipping entry {id}: {e}"),
            }
        }
    }

    info!("Loaded {} stories", docs.len());
    Ok(docs)
}

/// Standard quiz file name for a language inside a corpus directory.
pub fn quiz_file_name(lang: Lang) -> String {
    format!("{}_interpersonal_abilities_data.json", lang.code())
}

fn lang_from_file_name(path: &Path) -> Option<Lang> {
    let name = path.file_name()?.to_string_lossy();
    if name.starts_with("en_") {
        Some(Lang::En)
    } else if name.starts_with("cn_") {
        Some(Lang::Cn)
    } else {
        None
    }
}

/// Load quiz items from `path`.
///
/// A directory contributes its standard per-language files (only the one for
/// `lang` when given); a file is used directly. Unreadable files and invalid
/// items are logged and skipped.
pub fn load_quiz(path: &Path, lang: Option<Lang>) -> Result<Vec<(Lang, QuizItem)>, EvalError> {
    let files: Vec<(Lang, PathBuf)> = if fs::metadata(path)?.is_dir() {
        [Lang::Cn, Lang::En]
            .into_iter()
            .filter(|l| lang.map_or(true, |wanted| wanted == *l))
            .map(|l| (l, path.join(quiz_file_name(l))))
            .filter(|(_, p)| p.exists())
            .collect()
    } else {
        let file_lang = lang.or_else(|| lang_from_file_name(path)).unwrap_or(Lang::Cn);
        vec![(file_lang, path.to_path_buf())]
    };
    if files.is_empty() {
        return Err(EvalError::EmptyCorpus(path.to_path_buf()));
    }

    let mut items = Vec::new();
    for (file_lang, file) in files {
        info!("Processing {}...", file.display());
        let value = match read_json(&file) {
            Ok(v) => v,
            Err(e) => {
                warn!("Error loading {}: {e}", file.display());
                continue;
            }
        };
        for (i, record) in as_records(value).into_iter().enumerate() {
            match QuizItem::from_value(record) {
                Ok(item) => items.push((file_lang, item)),
                Err(e) => warn!("Skipping item {i} of {}: {e}", file.display()),
            }
        }
    }

    info!("Loaded {} quiz items", items.len());
    Ok(items)
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EvalSettings {
    /// Independent walks per story.
    pub episodes: usize,
    /// Attempts per decision-maker call.
    pub max_attempts: u32,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            episodes: DEFAULT_EPISODES,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Runs a corpus through the decision maker and tallies the results.
///
/// Work is sequential: each prompt depends on the answer to the previous
/// one. Failures never escape a single episode or item.
pub struct EvaluationDriver<'m> {
    maker: &'m mut dyn DecisionMaker,
    settings: EvalSettings,
}

impl<'m> EvaluationDriver<'m> {
    pub fn new(maker: &'m mut dyn DecisionMaker, settings: EvalSettings) -> Self {
        Self { maker, settings }
    }

    /// Goal achievement: success rate per story category.
    pub fn goal_achievement<R>(
        &mut self,
        docs: &[GraphDocument],
        lang: Lang,
        rng: &mut R,
    ) -> StatsAggregator
    where
        R: Rng + ?Sized,
    {
        let mut stats = StatsAggregator::new(KeyStyle::Verbatim);
        let episodes = self.settings.episodes;
        let mut walker = GraphWalker::new(&mut *self.maker, lang, self.settings.max_attempts);

        for doc in docs {
            info!("Processing entry {} ({})", doc.id, doc.category());
            stats.register(doc.category());

            for episode in 1..=episodes {
                match walker.run_episode(doc, rng) {
                    Ok(outcome) => match outcome.success() {
                        Some(success) => stats.record(doc.category(), success),
                        None => {
                            if let EpisodeOutcome::Inconclusive { reason, path } = &outcome {
                                warn!(
                                    "Episode {episode}/{episodes} of {} inconclusive: {reason:?} (path {path:?})",
                                    doc.id
                                );
                            }
                        }
                    },
                    Err(e) => warn!("Episode {episode}/{episodes} of {} abandoned: {e}", doc.id),
                }
            }
        }

        stats
    }

    /// Interpersonal abilities: accuracy per normalized skill tag.
    pub fn interpersonal<R>(&mut self, items: &[(Lang, QuizItem)], rng: &mut R) -> StatsAggregator
    where
        R: Rng + ?Sized,
    {
        let mut stats = StatsAggregator::new(KeyStyle::Normalized);

        for (n, (lang, item)) in items.iter().enumerate() {
            if item.skills.is_empty() {
                warn!("Skipping item {n}: question has no skill tags");
                continue;
            }
            for skill in &item.skills {
                stats.register(skill);
            }

            match item.answer(&mut *self.maker, *lang, self.settings.max_attempts, rng) {
                Ok(correct) => {
                    for skill in &item.skills {
                        stats.record(skill, correct);
                    }
                }
                Err(e) => warn!("Skipping item {n}: {e}"),
            }
        }

        stats
    }
}

// ---------------------------------------------------------------------------
// Result selection
// ---------------------------------------------------------------------------

/// Either every key's percentage or the single value a filter asked for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Summary {
    Breakdown(BTreeMap<String, f64>),
    Single(f64),
}

/// Narrative results, optionally narrowed to one category.
///
/// Categories match regardless of case, spaces and hyphens. Corpus spellings
/// that collapse to the same name are pooled. An unknown category falls back
/// to the full breakdown.
pub fn select_category(stats: &StatsAggregator, filter: Option<&str>) -> Summary {
    let Some(filter) = filter else {
        return Summary::Breakdown(stats.percentages());
    };

    let wanted = normalize(filter);
    let matches: Vec<(&String, &Tally)> = stats
        .tallies()
        .iter()
        .filter(|(k, _)| normalize(k) == wanted)
        .collect();

    match matches.as_slice() {
        [] => {
            warn!("Invalid filter: no category '{filter}', reporting all categories");
            Summary::Breakdown(stats.percentages())
        }
        [(_, tally)] => Summary::Single(tally.percentage()),
        several => {
            let names: Vec<&str> = several.iter().map(|(k, _)| k.as_str()).collect();
            warn!("Filter '{filter}' matches categories {names:?}; pooling their counts");
            let pooled = several.iter().fold(Tally::default(), |acc, (_, t)| Tally {
                hits: acc.hits + t.hits,
                total: acc.total + t.total,
            });
            Summary::Single(pooled.percentage())
        }
    }
}

/// Quiz results, optionally narrowed to a skill family or a single skill.
///
/// A family reports the mean over its skills that have samples. Unknown
/// names fall back to the full breakdown.
pub fn select_ability(
    stats: &StatsAggregator,
    taxonomy: &SkillTaxonomy,
    filter: Option<&str>,
) -> Summary {
    let Some(filter) = filter else {
        return Summary::Breakdown(stats.percentages());
    };

    if let Some(category) = taxonomy.category(filter) {
        return Summary::Single(stats.roll_up(category.skills.iter().map(String::as_str)));
    }
    if stats.contains(filter) {
        return Summary::Single(stats.percentage(filter));
    }

    warn!("Invalid filter: no skill or category '{filter}', reporting all skills");
    Summary::Breakdown(stats.percentages())
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// JSON report written with `--output`.
#[derive(Debug, Serialize)]
pub struct Report {
    pub model: String,
    pub data_path: String,
    pub language: Option<Lang>,
    pub filter: Option<String>,
    pub results: Summary,
    /// Raw tallies; a `total` of zero means the key was never evaluated.
    pub counts: BTreeMap<String, Tally>,
}

impl Report {
    pub fn write_to(&self, path: &Path) -> Result<(), EvalError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
