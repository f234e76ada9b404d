//! YAML catalog of curricula and recurring classes, imported into the store.
//!
//! Curricula and classes are upserted by name; each curriculum's lessons are
//! replaced wholesale so positions stay dense and 1-based.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, instrument};

use crate::db::{self, Pool};
use crate::model::Lesson;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid catalog: {0}")]
    Invalid(String),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Catalog {
    #[serde(default)]
    pub curricula: Vec<CurriculumEntry>,
    #[serde(default)]
    pub classes: Vec<ClassEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurriculumEntry {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// In teaching order; position is the list index plus one.
    #[serde(default)]
    pub lessons: Vec<LessonEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LessonEntry {
    pub title: String,
    #[serde(default, rename = "ref")]
    pub lesson_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassEntry {
    pub name: String,
    /// Weekday name (`thursday`, `thu`) or number with 0 = Sunday.
    pub start_weekday: String,
    #[serde(default)]
    pub curriculum: Option<String>,
    /// Defaults to the lesson count of the referenced curriculum.
    #[serde(default)]
    pub total_sessions: Option<i64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Summary of one import.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub curricula: usize,
    pub lessons: usize,
    pub classes: usize,
}

pub fn parse_weekday(raw: &str) -> Option<u32> {
    let raw = raw.trim().to_ascii_lowercase();
    if let Ok(n) = raw.parse::<u32>() {
        return (n <= 6).then_some(n);
    }
    const NAMES: [&str; 7] = [
        "sunday",
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
    ];
    NAMES
        .iter()
        .position(|name| *name == raw || (raw.len() == 3 && name.starts_with(raw.as_str())))
        .map(|i| i as u32)
}

pub fn load(path: &Path) -> Result<Catalog, CatalogError> {
    let content = fs::read_to_string(path)?;
    let catalog: Catalog = serde_yaml::from_str(&content)?;
    validate(&catalog)?;
    Ok(catalog)
}

pub fn validate(catalog: &Catalog) -> Result<(), CatalogError> {
    let mut names: Vec<&str> = catalog.curricula.iter().map(|c| c.name.as_str()).collect();
    names.sort_unstable();
    if names.windows(2).any(|w| w[0] == w[1]) {
        return Err(CatalogError::Invalid("curriculum names must be unique".into()));
    }
    for cur in &catalog.curricula {
        if cur.name.trim().is_empty() {
            return Err(CatalogError::Invalid("curricula[].name must be non-empty".into()));
        }
    }

    let mut class_names: Vec<&str> = catalog.classes.iter().map(|c| c.name.as_str()).collect();
    class_names.sort_unstable();
    if class_names.windows(2).any(|w| w[0] == w[1]) {
        return Err(CatalogError::Invalid("class names must be unique".into()));
    }
    for class in &catalog.classes {
        if class.name.trim().is_empty() {
            return Err(CatalogError::Invalid("classes[].name must be non-empty".into()));
        }
        if parse_weekday(&class.start_weekday).is_none() {
            return Err(CatalogError::Invalid(format!(
                "class {}: unknown start_weekday {:?}",
                class.name, class.start_weekday
            )));
        }
        if let Some(cur) = &class.curriculum {
            if !catalog.curricula.iter().any(|c| &c.name == cur) {
                return Err(CatalogError::Invalid(format!(
                    "class {}: unknown curriculum {cur}",
                    class.name
                )));
            }
        } else if class.total_sessions.is_none() {
            return Err(CatalogError::Invalid(format!(
                "class {}: total_sessions is required without a curriculum",
                class.name
            )));
        }
        if matches!(class.total_sessions, Some(n) if n <= 0) {
            return Err(CatalogError::Invalid(format!(
                "class {}: total_sessions must be > 0",
                class.name
            )));
        }
    }
    Ok(())
}

/// Write the catalog into the store. Safe to repeat.
#[instrument(skip_all, fields(curricula = catalog.curricula.len(), classes = catalog.classes.len()))]
pub async fn import(pool: &Pool, catalog: &Catalog) -> Result<ImportSummary, CatalogError> {
    validate(catalog)?;
    let mut summary = ImportSummary::default();
    let mut curricula: HashMap<&str, (i64, i64)> = HashMap::new();

    for cur in &catalog.curricula {
        let id = db::upsert_curriculum(pool, &cur.name, cur.active).await?;
        let lessons: Vec<Lesson> = cur
            .lessons
            .iter()
            .enumerate()
            .map(|(i, l)| Lesson {
                position: i as i64 + 1,
                lesson_ref: l.lesson_ref.trim().to_string(),
                title: l.title.trim().to_string(),
            })
            .collect();
        db::replace_lessons(pool, id, &lessons).await?;
        summary.curricula += 1;
        summary.lessons += lessons.len();
        curricula.insert(cur.name.as_str(), (id, lessons.len() as i64));
    }

    for class in &catalog.classes {
        let weekday = parse_weekday(&class.start_weekday).unwrap_or_default();
        let linked = class
            .curriculum
            .as_deref()
            .and_then(|name| curricula.get(name).copied());
        let curriculum_id = linked.map(|(id, _)| id);
        let total_sessions = class
            .total_sessions
            .or(linked.map(|(_, count)| count))
            .unwrap_or_default();
        db::upsert_class(
            pool,
            &class.name,
            weekday,
            curriculum_id,
            total_sessions,
            class.active,
        )
        .await?;
        summary.classes += 1;
    }

    info!(
        curricula = summary.curricula,
        lessons = summary.lessons,
        classes = summary.classes,
        "catalog imported"
    );
    Ok(summary)
}

/// Reference catalog document.
pub fn example() -> &'static str {
    r#"curricula:
  - name: "Rust Foundations"
    lessons:
      - { title: "Getting Started", ref: "rf-01" }
      - { title: "Ownership", ref: "rf-02" }
      - { title: "Borrowing", ref: "rf-03" }
      - { title: "Structs and Enums", ref: "rf-04" }
      - { title: "Error Handling", ref: "rf-05" }
      - { title: "Traits", ref: "rf-06" }
      - { title: "Iterators", ref: "rf-07" }
      - { title: "Async Basics", ref: "rf-08" }
      - { title: "Testing", ref: "rf-09" }
      - { title: "Capstone", ref: "rf-10" }

classes:
  - name: "Rust Evenings"
    start_weekday: thursday
    curriculum: "Rust Foundations"
"#
}
