//! Final quiz: definition, scoring and classification.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{CatalogError, CatalogResult};
use crate::identity::Identity;
use crate::models::{
    Classification, PublicQuiz, QuizDefinition, QuizDefinitionReq, QuizOutcome, QuizResult,
};
use crate::notify::Notifier;
use crate::progression::build_report;
use crate::store::CatalogStore;

pub fn classify(score: u32, pass_threshold: u32, certificate_threshold: u32) -> Classification {
    if score >= certificate_threshold {
        Classification::Excellent
    } else if score >= pass_threshold {
        Classification::Passed
    } else {
        Classification::Failed
    }
}

/// All-or-nothing per question. The answer map must cover every question
/// exactly once with an index inside that question's options.
pub fn score(def: &QuizDefinition, answers: &HashMap<String, usize>) -> CatalogResult<u32> {
    let known: HashSet<&str> = def.questions.iter().map(|q| q.id.as_str()).collect();
    if let Some(extra) = answers.keys().find(|k| !known.contains(k.as_str())) {
        return Err(CatalogError::validation(
            format!("answers.{extra}"),
            "no such question in this quiz",
        ));
    }

    let mut total = 0;
    for q in &def.questions {
        let Some(&picked) = answers.get(&q.id) else {
            return Err(CatalogError::validation(
                format!("answers.{}", q.id),
                "every question must be answered",
            ));
        };
        if picked >= q.options.len() {
            return Err(CatalogError::validation(
                format!("answers.{}", q.id),
                format!("option {picked} is out of range"),
            ));
        }
        if picked == q.correct_option_index {
            total = q.points.saturating_add(total);
        }
    }
    Ok(total)
}

/// Upper bound for points, thresholds and totals; scores are stored as
/// Postgres `INTEGER`.
pub const MAX_POINTS: u32 = i32::MAX as u32;

/// Thresholds applied when a definition does not carry its own.
#[derive(Debug, Clone, Copy)]
pub struct QuizDefaults {
    pub pass_threshold: u32,
    pub certificate_threshold: u32,
}

impl Default for QuizDefaults {
    fn default() -> Self {
        Self {
            pass_threshold: 40,
            certificate_threshold: 50,
        }
    }
}

fn validate_definition(def: &QuizDefinition) -> CatalogResult<()> {
    if def.questions.is_empty() {
        return Err(CatalogError::validation("questions", "a quiz needs at least one question"));
    }
    let mut ids = HashSet::new();
    for (i, q) in def.questions.iter().enumerate() {
        let field = |name: &str| format!("questions[{i}].{name}");
        if q.id.trim().is_empty() {
            return Err(CatalogError::validation(field("id"), "question id is required"));
        }
        if !ids.insert(q.id.as_str()) {
            return Err(CatalogError::validation(field("id"), "duplicate question id"));
        }
        if q.text.trim().is_empty() {
            return Err(CatalogError::validation(field("text"), "question text is required"));
        }
        if q.options.len() < 2 {
            return Err(CatalogError::validation(field("options"), "at least two options"));
        }
        if q.correct_option_index >= q.options.len() {
            return Err(CatalogError::validation(
                field("correct_option_index"),
                "correct option is out of range",
            ));
        }
        if q.points == 0 {
            return Err(CatalogError::validation(field("points"), "points must be positive"));
        }
        if q.points > MAX_POINTS {
            return Err(CatalogError::validation(
                field("points"),
                format!("points must not exceed {MAX_POINTS}"),
            ));
        }
    }
    let total = def
        .checked_total_points()
        .filter(|t| *t <= MAX_POINTS)
        .ok_or_else(|| {
            CatalogError::validation(
                "questions",
                format!("total points must not exceed {MAX_POINTS}"),
            )
        })?;
    if def.pass_threshold == 0 || def.pass_threshold >= def.certificate_threshold {
        return Err(CatalogError::validation(
            "pass_threshold",
            "pass threshold must be positive and below the certificate threshold",
        ));
    }
    if def.certificate_threshold > total {
        return Err(CatalogError::validation(
            "certificate_threshold",
            format!("certificate threshold exceeds the {total} points available"),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct QuizEngine {
    store: Arc<dyn CatalogStore>,
    notifier: Notifier,
    defaults: QuizDefaults,
}

impl QuizEngine {
    pub fn new(store: Arc<dyn CatalogStore>, notifier: Notifier, defaults: QuizDefaults) -> Self {
        Self {
            store,
            notifier,
            defaults,
        }
    }

    pub async fn define(
        &self,
        course_id: Uuid,
        req: QuizDefinitionReq,
        actor: &Identity,
    ) -> CatalogResult<QuizDefinition> {
        let course = self.store.get_course_required(course_id).await?;
        actor.require_manage(&course)?;
        let def = QuizDefinition {
            course_id,
            questions: req.questions,
            pass_threshold: req.pass_threshold.unwrap_or(self.defaults.pass_threshold),
            certificate_threshold: req
                .certificate_threshold
                .unwrap_or(self.defaults.certificate_threshold),
        };
        validate_definition(&def)?;
        let def = self.store.put_quiz(def).await?;
        tracing::info!(course_id = %course_id, questions = def.questions.len(), "quiz defined");
        Ok(def)
    }

    /// Learners get the questions without the answer key.
    pub async fn public_quiz(
        &self,
        course_id: Uuid,
        viewer: Option<&Identity>,
    ) -> CatalogResult<Option<PublicQuiz>> {
        let Some(course) = self.store.get_course(course_id).await? else {
            return Ok(None);
        };
        if !course.is_published && !viewer.is_some_and(|v| v.can_manage(&course)) {
            return Ok(None);
        }
        Ok(self.store.get_quiz(course_id).await?.as_ref().map(PublicQuiz::from))
    }

    /// Scores and stores the attempt, replacing any earlier result.
    pub async fn submit(
        &self,
        course_id: Uuid,
        learner: &Identity,
        answers: &HashMap<String, usize>,
    ) -> CatalogResult<QuizOutcome> {
        let course = self.store.get_course_required(course_id).await?;
        if !course.is_published && !learner.can_manage(&course) {
            return Err(CatalogError::not_found("course", course_id));
        }
        let def = self
            .store
            .get_quiz(course_id)
            .await?
            .ok_or_else(|| CatalogError::not_found("quiz", course_id))?;

        let lessons = self.store.list_lessons(course_id).await?;
        let progress = self.store.get_enrollment(learner.user_id, course_id).await?;
        let before = build_report(course_id, learner.user_id, &lessons, progress.as_ref(), Some(&def));
        if !before.quiz_unlocked {
            return Err(CatalogError::validation(
                "lessons",
                "complete every lesson before taking the quiz",
            ));
        }

        let points = score(&def, answers)?;
        let result = QuizResult {
            score: points,
            total_possible: def.total_points(),
            attempted_at: Utc::now(),
        };
        let progress = self
            .store
            .record_quiz_result(learner.user_id, course_id, result.clone())
            .await?;
        let classification = classify(points, def.pass_threshold, def.certificate_threshold);
        let after = build_report(course_id, learner.user_id, &lessons, Some(&progress), Some(&def));
        tracing::info!(
            course_id = %course_id,
            learner = %learner.user_id,
            score = points,
            total = result.total_possible,
            ?classification,
            "quiz submitted"
        );

        if let Some(email) = &learner.email {
            self.notifier
                .quiz_result(email, &course, points, result.total_possible, classification);
        }

        Ok(QuizOutcome {
            result,
            classification,
            certificate_eligible: classification.certificate_eligible(),
            course_complete: after.course_complete,
        })
    }
}
