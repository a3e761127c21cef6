use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::CatalogStore;
use crate::error::{CatalogError, CatalogResult};
use crate::models::{Category, Course, EnrollmentProgress, Lesson, QuizDefinition, QuizResult};

#[derive(Default)]
struct Inner {
    categories: HashMap<Uuid, Category>,
    courses: HashMap<Uuid, Course>,
    lessons: HashMap<Uuid, Vec<Lesson>>,
    quizzes: HashMap<Uuid, QuizDefinition>,
    enrollments: HashMap<(Uuid, Uuid), EnrollmentProgress>,
}

impl Inner {
    fn published<F>(&self, keep: F) -> Vec<Course>
    where
        F: Fn(&Course) -> bool,
    {
        let mut out: Vec<Course> = self
            .courses
            .values()
            .filter(|c| c.is_published && keep(c))
            .cloned()
            .collect();
        newest_first(&mut out);
        out
    }

    fn check_version(&self, course_id: Uuid, expected: i64) -> CatalogResult<()> {
        let current = self
            .courses
            .get(&course_id)
            .ok_or_else(|| CatalogError::not_found("course", course_id))?;
        if current.version != expected {
            return Err(CatalogError::Conflict(format!(
                "course {course_id} is at version {}, expected {expected}",
                current.version
            )));
        }
        Ok(())
    }
}

fn newest_first(courses: &mut [Course]) {
    courses.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
}

/// Single-process store behind one lock; writes are trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn list_categories(&self) -> CatalogResult<Vec<Category>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Category> = inner.categories.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn get_category(&self, id: Uuid) -> CatalogResult<Option<Category>> {
        Ok(self.inner.read().await.categories.get(&id).cloned())
    }

    async fn find_category_by_name(&self, name: &str) -> CatalogResult<Option<Category>> {
        let inner = self.inner.read().await;
        Ok(inner.categories.values().find(|c| c.name == name).cloned())
    }

    async fn insert_category(&self, category: Category) -> CatalogResult<Category> {
        let mut inner = self.inner.write().await;
        if inner.categories.values().any(|c| c.name == category.name) {
            return Err(CatalogError::Conflict(format!(
                "category '{}' already exists",
                category.name
            )));
        }
        inner.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn insert_course(&self, course: Course, lessons: Vec<Lesson>) -> CatalogResult<Course> {
        let mut inner = self.inner.write().await;
        if inner.courses.contains_key(&course.id) {
            return Err(CatalogError::Conflict(format!("course {} exists", course.id)));
        }
        inner.lessons.insert(course.id, lessons);
        inner.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn get_course(&self, id: Uuid) -> CatalogResult<Option<Course>> {
        Ok(self.inner.read().await.courses.get(&id).cloned())
    }

    async fn list_published(&self) -> CatalogResult<Vec<Course>> {
        Ok(self.inner.read().await.published(|_| true))
    }

    async fn list_by_owner(&self, owner_id: Option<Uuid>) -> CatalogResult<Vec<Course>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Course> = inner
            .courses
            .values()
            .filter(|c| owner_id.map_or(true, |o| c.owner_id == o))
            .cloned()
            .collect();
        newest_first(&mut out);
        Ok(out)
    }

    async fn enrollment_counts(&self, course_ids: &[Uuid]) -> CatalogResult<HashMap<Uuid, u64>> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for (_, course_id) in inner.enrollments.keys() {
            if course_ids.contains(course_id) {
                *counts.entry(*course_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn list_published_in_category(&self, category_id: Uuid) -> CatalogResult<Vec<Course>> {
        Ok(self
            .inner
            .read()
            .await
            .published(|c| c.category_id == category_id))
    }

    async fn search_published_text(&self, text: &str) -> CatalogResult<Vec<Course>> {
        let needle = text.to_lowercase();
        Ok(self.inner.read().await.published(|c| {
            c.title.to_lowercase().contains(&needle)
                || c.description.to_lowercase().contains(&needle)
        }))
    }

    async fn search_published_category_name(&self, text: &str) -> CatalogResult<Vec<Course>> {
        let needle = text.to_lowercase();
        let inner = self.inner.read().await;
        Ok(inner.published(|c| {
            inner
                .categories
                .get(&c.category_id)
                .is_some_and(|cat| cat.name.to_lowercase().contains(&needle))
        }))
    }

    async fn update_course(&self, mut course: Course, expected_version: i64) -> CatalogResult<Course> {
        let mut inner = self.inner.write().await;
        inner.check_version(course.id, expected_version)?;
        course.version = expected_version + 1;
        course.updated_at = Utc::now();
        inner.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn delete_course(&self, id: Uuid) -> CatalogResult<bool> {
        let mut inner = self.inner.write().await;
        let existed = inner.courses.remove(&id).is_some();
        inner.lessons.remove(&id);
        inner.quizzes.remove(&id);
        inner.enrollments.retain(|(_, course_id), _| *course_id != id);
        Ok(existed)
    }

    async fn list_lessons(&self, course_id: Uuid) -> CatalogResult<Vec<Lesson>> {
        let inner = self.inner.read().await;
        let mut out = inner.lessons.get(&course_id).cloned().unwrap_or_default();
        out.sort_by_key(|l| l.order_index);
        Ok(out)
    }

    async fn get_lesson(&self, id: Uuid) -> CatalogResult<Option<Lesson>> {
        let inner = self.inner.read().await;
        Ok(inner
            .lessons
            .values()
            .flat_map(|ls| ls.iter())
            .find(|l| l.id == id)
            .cloned())
    }

    async fn replace_lessons(
        &self,
        course_id: Uuid,
        lessons: Vec<Lesson>,
        expected_version: i64,
    ) -> CatalogResult<Course> {
        let mut inner = self.inner.write().await;
        inner.check_version(course_id, expected_version)?;
        inner.lessons.insert(course_id, lessons);
        let course = inner
            .courses
            .get_mut(&course_id)
            .ok_or_else(|| CatalogError::not_found("course", course_id))?;
        course.version += 1;
        course.updated_at = Utc::now();
        Ok(course.clone())
    }

    async fn get_quiz(&self, course_id: Uuid) -> CatalogResult<Option<QuizDefinition>> {
        Ok(self.inner.read().await.quizzes.get(&course_id).cloned())
    }

    async fn put_quiz(&self, quiz: QuizDefinition) -> CatalogResult<QuizDefinition> {
        let mut inner = self.inner.write().await;
        if !inner.courses.contains_key(&quiz.course_id) {
            return Err(CatalogError::not_found("course", quiz.course_id));
        }
        inner.quizzes.insert(quiz.course_id, quiz.clone());
        Ok(quiz)
    }

    async fn get_enrollment(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
    ) -> CatalogResult<Option<EnrollmentProgress>> {
        let inner = self.inner.read().await;
        Ok(inner.enrollments.get(&(learner_id, course_id)).cloned())
    }

    async fn add_completed_lesson(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        lesson_id: Uuid,
    ) -> CatalogResult<EnrollmentProgress> {
        let mut inner = self.inner.write().await;
        let progress = inner
            .enrollments
            .entry((learner_id, course_id))
            .or_insert_with(|| EnrollmentProgress::new(learner_id, course_id));
        progress.completed_lesson_ids.insert(lesson_id);
        progress.updated_at = Utc::now();
        Ok(progress.clone())
    }

    async fn record_quiz_result(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        result: QuizResult,
    ) -> CatalogResult<EnrollmentProgress> {
        let mut inner = self.inner.write().await;
        let progress = inner
            .enrollments
            .entry((learner_id, course_id))
            .or_insert_with(|| EnrollmentProgress::new(learner_id, course_id));
        progress.quiz_result = Some(result);
        progress.updated_at = Utc::now();
        Ok(progress.clone())
    }
}
