use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

#[skip_serializing_none]
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// The `{id, name}` projection embedded in every course returned to callers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CategoryRef {
    pub id: Uuid,
    pub name: String,
}

impl From<&Category> for CategoryRef {
    fn from(c: &Category) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Beginner,
    Intermediate,
    Advanced,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Beginner => "beginner",
            Level::Intermediate => "intermediate",
            Level::Advanced => "advanced",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    // accepts the French labels the authoring form has always used
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "beginner" | "débutant" | "debutant" => Ok(Level::Beginner),
            "intermediate" | "intermédiaire" | "intermediaire" => Ok(Level::Intermediate),
            "advanced" | "avancé" | "avance" => Ok(Level::Advanced),
            other => Err(format!("unknown level '{other}'")),
        }
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub long_description: String,
    pub level: Level,
    pub price: f64,
    pub duration_label: String,
    pub image_url: Option<String>,
    pub category_id: Uuid,
    pub owner_id: Uuid,
    pub is_published: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Course as served to callers: the stored row plus its category projection.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CourseView {
    #[serde(flatten)]
    pub course: Course,
    pub category: CategoryRef,
    pub lesson_count: usize,
}

/// Author dashboard row: drafts included, with how many learners started it.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OwnedCourse {
    #[serde(flatten)]
    pub view: CourseView,
    pub student_count: u64,
}

#[skip_serializing_none]
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Lesson {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub content: String,
    pub video_url: Option<String>,
    pub order_index: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LessonRef {
    pub id: Uuid,
    pub title: String,
    pub order_index: i32,
}

impl From<&Lesson> for LessonRef {
    fn from(l: &Lesson) -> Self {
        Self {
            id: l.id,
            title: l.title.clone(),
            order_index: l.order_index,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LessonDraft {
    /// Keeps an existing lesson's identity (and learners' completion of it).
    #[serde(default)]
    pub id: Option<Uuid>,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub video_url: Option<String>,
    /// Position hint; lessons are renumbered 1..N after sorting on it.
    #[serde(default)]
    pub order_index: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CreateCourseReq {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub long_description: Option<String>,
    pub level: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub duration_label: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    /// Category by name; synonyms resolve, unknown names are created.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub publish: bool,
    #[serde(default)]
    pub lessons: Vec<LessonDraft>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateCourseReq {
    pub title: Option<String>,
    pub description: Option<String>,
    pub long_description: Option<String>,
    pub level: Option<String>,
    pub price: Option<f64>,
    pub duration_label: Option<String>,
    pub image_url: Option<String>,
    pub category_id: Option<Uuid>,
    pub category: Option<String>,
    pub expected_version: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetLessonsReq {
    pub lessons: Vec<LessonDraft>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReorderLessonReq {
    /// 1-based target position, clamped into the course's range.
    pub position: i32,
}

#[derive(Serialize, Debug, Clone)]
pub struct CreatedCourse {
    pub course: CourseView,
    pub lessons: Vec<Lesson>,
    /// Set when publish was requested but refused; the course stays a draft.
    pub publish_rejected: Option<crate::error::FieldError>,
}

// ------------- quiz -------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuizQuestion {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub correct_option_index: usize,
    pub points: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuizDefinition {
    pub course_id: Uuid,
    pub questions: Vec<QuizQuestion>,
    pub pass_threshold: u32,
    pub certificate_threshold: u32,
}

impl QuizDefinition {
    /// Saturates instead of wrapping; validated definitions never get there.
    pub fn total_points(&self) -> u32 {
        self.questions
            .iter()
            .fold(0u32, |acc, q| acc.saturating_add(q.points))
    }

    /// Exact total, `None` on `u32` overflow.
    pub fn checked_total_points(&self) -> Option<u32> {
        self.questions
            .iter()
            .try_fold(0u32, |acc, q| acc.checked_add(q.points))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QuizDefinitionReq {
    pub questions: Vec<QuizQuestion>,
    #[serde(default)]
    pub pass_threshold: Option<u32>,
    #[serde(default)]
    pub certificate_threshold: Option<u32>,
}

/// Learner-facing question: the answer key is withheld.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PublicQuestion {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub points: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PublicQuiz {
    pub course_id: Uuid,
    pub questions: Vec<PublicQuestion>,
    pub total_points: u32,
    pub pass_threshold: u32,
    pub certificate_threshold: u32,
}

impl From<&QuizDefinition> for PublicQuiz {
    fn from(def: &QuizDefinition) -> Self {
        Self {
            course_id: def.course_id,
            questions: def
                .questions
                .iter()
                .map(|q| PublicQuestion {
                    id: q.id.clone(),
                    text: q.text.clone(),
                    options: q.options.clone(),
                    points: q.points,
                })
                .collect(),
            total_points: def.total_points(),
            pass_threshold: def.pass_threshold,
            certificate_threshold: def.certificate_threshold,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuizSubmission {
    pub answers: HashMap<String, usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuizResult {
    pub score: u32,
    pub total_possible: u32,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// At or above the certificate threshold.
    Excellent,
    Passed,
    Failed,
}

impl Classification {
    pub fn is_passing(&self) -> bool {
        !matches!(self, Classification::Failed)
    }

    pub fn certificate_eligible(&self) -> bool {
        matches!(self, Classification::Excellent)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct QuizOutcome {
    pub result: QuizResult,
    pub classification: Classification,
    pub certificate_eligible: bool,
    pub course_complete: bool,
}

// ------------- progression -------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnrollmentProgress {
    pub learner_id: Uuid,
    pub course_id: Uuid,
    pub completed_lesson_ids: BTreeSet<Uuid>,
    pub quiz_result: Option<QuizResult>,
    pub updated_at: DateTime<Utc>,
}

impl EnrollmentProgress {
    pub fn new(learner_id: Uuid, course_id: Uuid) -> Self {
        Self {
            learner_id,
            course_id,
            completed_lesson_ids: BTreeSet::new(),
            quiz_result: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Navigation {
    pub previous: Option<LessonRef>,
    pub next: Option<LessonRef>,
    /// No next lesson: the learner continues to the course quiz.
    pub quiz: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub course_id: Uuid,
    pub learner_id: Uuid,
    pub completed_lesson_ids: Vec<Uuid>,
    pub total_lessons: usize,
    pub progress_percent: f64,
    pub quiz_unlocked: bool,
    pub quiz_result: Option<QuizResult>,
    pub classification: Option<Classification>,
    pub course_complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parses_english_and_french_labels() {
        assert_eq!("Beginner".parse::<Level>(), Ok(Level::Beginner));
        assert_eq!("Débutant".parse::<Level>(), Ok(Level::Beginner));
        assert_eq!(" intermédiaire ".parse::<Level>(), Ok(Level::Intermediate));
        assert_eq!("Avancé".parse::<Level>(), Ok(Level::Advanced));
        assert!("expert".parse::<Level>().is_err());
    }

    #[test]
    fn public_quiz_hides_answer_key() {
        let def = QuizDefinition {
            course_id: Uuid::new_v4(),
            questions: vec![QuizQuestion {
                id: "q1".into(),
                text: "What is React?".into(),
                options: vec!["A framework".into(), "A UI library".into()],
                correct_option_index: 1,
                points: 10,
            }],
            pass_threshold: 5,
            certificate_threshold: 10,
        };
        let public = PublicQuiz::from(&def);
        let json = serde_json::to_value(&public).unwrap();
        assert!(json["questions"][0].get("correct_option_index").is_none());
        assert_eq!(public.total_points, 10);
    }

    #[test]
    fn course_view_flattens_course_fields() {
        let now = Utc::now();
        let category = Category {
            id: Uuid::new_v4(),
            name: "Design".into(),
            description: None,
        };
        let view = CourseView {
            course: Course {
                id: Uuid::new_v4(),
                title: "Figma".into(),
                description: "UI basics".into(),
                long_description: String::new(),
                level: Level::Beginner,
                price: 0.0,
                duration_label: "2h".into(),
                image_url: None,
                category_id: category.id,
                owner_id: Uuid::new_v4(),
                is_published: false,
                version: 1,
                created_at: now,
                updated_at: now,
            },
            category: CategoryRef::from(&category),
            lesson_count: 0,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["title"], "Figma");
        assert_eq!(json["category"]["name"], "Design");
        assert!(json.get("image_url").is_none());
    }
}
