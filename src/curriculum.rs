//! Curriculum resolution: class → curriculum, session number → lesson.

use thiserror::Error;
use tracing::{instrument, warn};

use crate::db::{self, Pool};
use crate::model::{ClassDefinition, Curriculum};

#[derive(Debug, Error)]
pub enum CurriculumError {
    #[error("class '{class}' has no curriculum assigned; set curriculum in the catalog")]
    Unassigned { class: String },
    #[error("curriculum {curriculum_id} for class '{class}' does not exist")]
    Missing { class: String, curriculum_id: i64 },
    #[error("curriculum '{name}' for class '{class}' is inactive; reactivate it or reassign the class")]
    Inactive { class: String, name: String },
    #[error("class '{class}' has a curriculum length of 0")]
    Empty { class: String },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Title and lesson reference for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLesson {
    pub title: String,
    pub lesson_ref: Option<String>,
}

impl ResolvedLesson {
    /// Generic entry used when the lesson list has no entry for `n`.
    pub fn fallback(session_number: i64) -> Self {
        Self {
            title: format!("Class {session_number}"),
            lesson_ref: None,
        }
    }
}

/// Resolve the active curriculum of a class. Any failure means no batch may
/// be created for the class.
#[instrument(skip_all, fields(class = %class.name))]
pub async fn resolve_for_class(
    pool: &Pool,
    class: &ClassDefinition,
) -> Result<Curriculum, CurriculumError> {
    let Some(curriculum_id) = class.curriculum_id else {
        return Err(CurriculumError::Unassigned {
            class: class.name.clone(),
        });
    };
    if class.total_sessions <= 0 {
        return Err(CurriculumError::Empty {
            class: class.name.clone(),
        });
    }
    let curriculum = db::fetch_curriculum(pool, curriculum_id)
        .await?
        .ok_or_else(|| CurriculumError::Missing {
            class: class.name.clone(),
            curriculum_id,
        })?;
    if !curriculum.active {
        return Err(CurriculumError::Inactive {
            class: class.name.clone(),
            name: curriculum.name,
        });
    }
    Ok(curriculum)
}

/// Lesson for 1-based `session_number`, falling back to a generic title when
/// the curriculum has no such entry.
#[instrument(skip_all, fields(curriculum_id = curriculum_id, session_number = session_number))]
pub async fn lesson_for(
    pool: &Pool,
    curriculum_id: i64,
    session_number: i64,
) -> anyhow::Result<ResolvedLesson> {
    match db::fetch_lesson(pool, curriculum_id, session_number).await? {
        Some(lesson) if !lesson.title.trim().is_empty() => Ok(ResolvedLesson {
            title: lesson.title,
            lesson_ref: Some(lesson.lesson_ref).filter(|r| !r.trim().is_empty()),
        }),
        Some(_) | None => {
            warn!(curriculum_id, session_number, "lesson missing; using fallback title");
            Ok(ResolvedLesson::fallback(session_number))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_title() {
        assert_eq!(
            ResolvedLesson::fallback(7),
            ResolvedLesson {
                title: "Class 7".into(),
                lesson_ref: None
            }
        );
    }
}
