//! Catalog system of record.
//!
//! Every method is atomic at the level of the entity it mutates. Course-level
//! writes carry the caller's `expected_version` and fail with
//! [`CatalogError::Conflict`] when another writer got there first.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{CatalogError, CatalogResult};
use crate::models::{Category, Course, EnrollmentProgress, Lesson, QuizDefinition, QuizResult};

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_categories(&self) -> CatalogResult<Vec<Category>>;

    async fn get_category(&self, id: Uuid) -> CatalogResult<Option<Category>>;

    /// Exact, case-sensitive match on the canonical name.
    async fn find_category_by_name(&self, name: &str) -> CatalogResult<Option<Category>>;

    async fn insert_category(&self, category: Category) -> CatalogResult<Category>;

    /// Inserts the course together with its initial lessons, all or nothing.
    async fn insert_course(&self, course: Course, lessons: Vec<Lesson>) -> CatalogResult<Course>;

    /// Fetch regardless of publication state.
    async fn get_course(&self, id: Uuid) -> CatalogResult<Option<Course>>;

    async fn get_course_required(&self, id: Uuid) -> CatalogResult<Course> {
        self.get_course(id)
            .await?
            .ok_or_else(|| CatalogError::not_found("course", id))
    }

    /// Published courses, newest first.
    async fn list_published(&self) -> CatalogResult<Vec<Course>>;

    /// Drafts and published courses alike, newest first; `None` lists every owner's.
    async fn list_by_owner(&self, owner_id: Option<Uuid>) -> CatalogResult<Vec<Course>>;

    /// Learners with any recorded progress on each course; absent ids count zero.
    async fn enrollment_counts(&self, course_ids: &[Uuid]) -> CatalogResult<HashMap<Uuid, u64>>;

    async fn list_published_in_category(&self, category_id: Uuid) -> CatalogResult<Vec<Course>>;

    /// Published courses whose title or description contains `text`, ignoring case.
    async fn search_published_text(&self, text: &str) -> CatalogResult<Vec<Course>>;

    /// Published courses whose category name contains `text`, ignoring case.
    async fn search_published_category_name(&self, text: &str) -> CatalogResult<Vec<Course>>;

    /// Overwrites the mutable course fields and bumps `version`.
    async fn update_course(&self, course: Course, expected_version: i64) -> CatalogResult<Course>;

    /// Removes the course with its lessons, quiz and enrollments.
    async fn delete_course(&self, id: Uuid) -> CatalogResult<bool>;

    /// Lessons of a course ordered by `order_index`.
    async fn list_lessons(&self, course_id: Uuid) -> CatalogResult<Vec<Lesson>>;

    async fn get_lesson(&self, id: Uuid) -> CatalogResult<Option<Lesson>>;

    /// Swaps the whole lesson set in one step and bumps the course version.
    async fn replace_lessons(
        &self,
        course_id: Uuid,
        lessons: Vec<Lesson>,
        expected_version: i64,
    ) -> CatalogResult<Course>;

    async fn get_quiz(&self, course_id: Uuid) -> CatalogResult<Option<QuizDefinition>>;

    async fn put_quiz(&self, quiz: QuizDefinition) -> CatalogResult<QuizDefinition>;

    async fn get_enrollment(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
    ) -> CatalogResult<Option<EnrollmentProgress>>;

    /// Creates the enrollment lazily; adding an already completed lesson is a no-op.
    async fn add_completed_lesson(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        lesson_id: Uuid,
    ) -> CatalogResult<EnrollmentProgress>;

    /// Overwrites the learner's latest quiz result.
    async fn record_quiz_result(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        result: QuizResult,
    ) -> CatalogResult<EnrollmentProgress>;
}
