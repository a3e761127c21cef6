//! Per-learner lesson completion, progress and navigation.

use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{CatalogError, CatalogResult};
use crate::identity::Identity;
use crate::models::{
    Course, EnrollmentProgress, Lesson, LessonRef, Navigation, ProgressReport, QuizDefinition,
};
use crate::quiz::classify;
use crate::store::CatalogStore;

/// `completed / total * 100`, clamped to [0, 100] and rounded to 2 decimals.
pub fn progress_percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = (completed as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
    (pct * 100.0).round() / 100.0
}

/// Neighbours of `lesson_id` in order; `None` if the lesson is not in the list.
pub fn navigation_for(lessons: &[Lesson], lesson_id: Uuid) -> Option<Navigation> {
    let mut sorted: Vec<&Lesson> = lessons.iter().collect();
    sorted.sort_by_key(|l| l.order_index);
    let at = sorted.iter().position(|l| l.id == lesson_id)?;
    let previous = at.checked_sub(1).map(|i| LessonRef::from(sorted[i]));
    let next = sorted.get(at + 1).map(|l| LessonRef::from(*l));
    Some(Navigation {
        quiz: next.is_none(),
        previous,
        next,
    })
}

/// Completed ids that still belong to the course; lessons removed since
/// completion no longer count.
fn completed_in(lessons: &[Lesson], progress: Option<&EnrollmentProgress>) -> BTreeSet<Uuid> {
    match progress {
        Some(p) => lessons
            .iter()
            .map(|l| l.id)
            .filter(|id| p.completed_lesson_ids.contains(id))
            .collect(),
        None => BTreeSet::new(),
    }
}

pub fn build_report(
    course_id: Uuid,
    learner_id: Uuid,
    lessons: &[Lesson],
    progress: Option<&EnrollmentProgress>,
    quiz: Option<&QuizDefinition>,
) -> ProgressReport {
    let completed = completed_in(lessons, progress);
    let total = lessons.len();
    let all_done = total > 0 && completed.len() == total;
    let quiz_result = progress.and_then(|p| p.quiz_result.clone());
    let classification = match (&quiz_result, quiz) {
        (Some(r), Some(q)) => Some(classify(r.score, q.pass_threshold, q.certificate_threshold)),
        _ => None,
    };
    ProgressReport {
        course_id,
        learner_id,
        completed_lesson_ids: completed.iter().copied().collect(),
        total_lessons: total,
        progress_percent: progress_percent(completed.len(), total),
        quiz_unlocked: all_done,
        course_complete: all_done && classification.is_some_and(|c| c.is_passing()),
        quiz_result,
        classification,
    }
}

#[derive(Clone)]
pub struct Progression {
    store: Arc<dyn CatalogStore>,
}

impl Progression {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Monotonic: completing a lesson twice changes nothing.
    pub async fn mark_lesson_complete(
        &self,
        learner: &Identity,
        lesson_id: Uuid,
    ) -> CatalogResult<ProgressReport> {
        let lesson = self.learner_lesson(lesson_id, learner).await?;
        self.store
            .add_completed_lesson(learner.user_id, lesson.course_id, lesson.id)
            .await?;
        tracing::debug!(learner = %learner.user_id, lesson_id = %lesson.id, "lesson completed");
        self.report(learner, lesson.course_id).await
    }

    pub async fn report(&self, learner: &Identity, course_id: Uuid) -> CatalogResult<ProgressReport> {
        self.learner_course(course_id, learner).await?;
        let lessons = self.store.list_lessons(course_id).await?;
        let progress = self.store.get_enrollment(learner.user_id, course_id).await?;
        let quiz = self.store.get_quiz(course_id).await?;
        Ok(build_report(
            course_id,
            learner.user_id,
            &lessons,
            progress.as_ref(),
            quiz.as_ref(),
        ))
    }

    pub async fn compute_navigation(
        &self,
        lesson_id: Uuid,
        viewer: Option<&Identity>,
    ) -> CatalogResult<Navigation> {
        let lesson = self
            .store
            .get_lesson(lesson_id)
            .await?
            .ok_or_else(|| CatalogError::not_found("lesson", lesson_id))?;
        let course = self.store.get_course_required(lesson.course_id).await?;
        if !visible(&course, viewer) {
            return Err(CatalogError::not_found("lesson", lesson_id));
        }
        let lessons = self.store.list_lessons(course.id).await?;
        navigation_for(&lessons, lesson_id).ok_or_else(|| CatalogError::not_found("lesson", lesson_id))
    }

    async fn learner_lesson(&self, lesson_id: Uuid, learner: &Identity) -> CatalogResult<Lesson> {
        let lesson = self
            .store
            .get_lesson(lesson_id)
            .await?
            .ok_or_else(|| CatalogError::not_found("lesson", lesson_id))?;
        match self.learner_course(lesson.course_id, learner).await {
            Ok(_) => Ok(lesson),
            Err(CatalogError::NotFound { .. }) => Err(CatalogError::not_found("lesson", lesson_id)),
            Err(e) => Err(e),
        }
    }

    async fn learner_course(&self, course_id: Uuid, learner: &Identity) -> CatalogResult<Course> {
        let course = self.store.get_course_required(course_id).await?;
        if !visible(&course, Some(learner)) {
            return Err(CatalogError::not_found("course", course_id));
        }
        Ok(course)
    }
}

fn visible(course: &Course, viewer: Option<&Identity>) -> bool {
    course.is_published || viewer.is_some_and(|v| v.can_manage(course))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuizResult;
    use chrono::Utc;

    fn lessons(n: i32) -> Vec<Lesson> {
        (1..=n)
            .map(|i| Lesson {
                id: Uuid::new_v4(),
                course_id: Uuid::nil(),
                title: format!("L{i}"),
                content: "body".into(),
                video_url: None,
                order_index: i,
                created_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn percent_rounds_to_two_decimals() {
        assert_eq!(progress_percent(2, 3), 66.67);
        assert_eq!(progress_percent(0, 3), 0.0);
        assert_eq!(progress_percent(3, 3), 100.0);
        assert_eq!(progress_percent(0, 0), 0.0);
        assert_eq!(progress_percent(5, 3), 100.0);
    }

    #[test]
    fn navigation_at_boundaries() {
        let ls = lessons(3);
        let mid = navigation_for(&ls, ls[1].id).unwrap();
        assert_eq!(mid.previous.unwrap().id, ls[0].id);
        assert_eq!(mid.next.unwrap().id, ls[2].id);
        assert!(!mid.quiz);

        let first = navigation_for(&ls, ls[0].id).unwrap();
        assert!(first.previous.is_none());

        let last = navigation_for(&ls, ls[2].id).unwrap();
        assert_eq!(last.previous.unwrap().id, ls[1].id);
        assert!(last.next.is_none());
        assert!(last.quiz);

        assert!(navigation_for(&ls, Uuid::new_v4()).is_none());
    }

    #[test]
    fn navigation_follows_order_index_not_slice_order() {
        let mut ls = lessons(3);
        ls.reverse();
        let nav = navigation_for(&ls, ls[1].id).unwrap();
        assert_eq!(nav.previous.unwrap().title, "L1");
        assert_eq!(nav.next.unwrap().title, "L3");
    }

    #[test]
    fn report_ignores_completions_of_removed_lessons() {
        let ls = lessons(2);
        let mut progress = EnrollmentProgress::new(Uuid::new_v4(), Uuid::nil());
        progress.completed_lesson_ids.insert(ls[0].id);
        progress.completed_lesson_ids.insert(Uuid::new_v4());
        let report = build_report(Uuid::nil(), progress.learner_id, &ls, Some(&progress), None);
        assert_eq!(report.completed_lesson_ids, vec![ls[0].id]);
        assert_eq!(report.progress_percent, 50.0);
        assert!(!report.quiz_unlocked);
    }

    #[test]
    fn course_complete_needs_lessons_and_passing_quiz() {
        let ls = lessons(1);
        let quiz = QuizDefinition {
            course_id: Uuid::nil(),
            questions: vec![],
            pass_threshold: 40,
            certificate_threshold: 50,
        };
        let mut progress = EnrollmentProgress::new(Uuid::new_v4(), Uuid::nil());
        progress.completed_lesson_ids.insert(ls[0].id);
        progress.quiz_result = Some(QuizResult {
            score: 30,
            total_possible: 60,
            attempted_at: Utc::now(),
        });
        let failed = build_report(Uuid::nil(), progress.learner_id, &ls, Some(&progress), Some(&quiz));
        assert!(failed.quiz_unlocked);
        assert!(!failed.course_complete);

        progress.quiz_result.as_mut().unwrap().score = 45;
        let passed = build_report(Uuid::nil(), progress.learner_id, &ls, Some(&progress), Some(&quiz));
        assert!(passed.course_complete);
    }
}
