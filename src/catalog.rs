//! Learner-facing reads: listing, lookup, search and category filtering.
//!
//! Drafts never leave this module unless the caller may manage the course.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::category;
use crate::error::{CatalogError, CatalogResult};
use crate::identity::Identity;
use crate::models::{Category, CategoryRef, Course, CourseView, Lesson, OwnedCourse};
use crate::store::CatalogStore;

#[derive(Clone)]
pub struct CatalogQuery {
    store: Arc<dyn CatalogStore>,
}

impl CatalogQuery {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub async fn list_categories(&self) -> CatalogResult<Vec<Category>> {
        self.store.list_categories().await
    }

    pub async fn list_published(&self) -> CatalogResult<Vec<CourseView>> {
        let courses = self.store.list_published().await?;
        self.views(courses).await
    }

    /// The caller's own courses in every state; admins see all of them.
    pub async fn list_owned(&self, author: &Identity) -> CatalogResult<Vec<OwnedCourse>> {
        let owner = (!author.is_admin()).then_some(author.user_id);
        let courses = self.store.list_by_owner(owner).await?;
        let ids: Vec<Uuid> = courses.iter().map(|c| c.id).collect();
        let counts = self.store.enrollment_counts(&ids).await?;
        Ok(self
            .views(courses)
            .await?
            .into_iter()
            .map(|view| OwnedCourse {
                student_count: counts.get(&view.course.id).copied().unwrap_or(0),
                view,
            })
            .collect())
    }

    /// `None` for unknown ids and for drafts the caller may not see.
    pub async fn get_by_id(
        &self,
        id: Uuid,
        viewer: Option<&Identity>,
    ) -> CatalogResult<Option<CourseView>> {
        match self.visible_course(id, viewer).await? {
            Some(course) => Ok(self.views(vec![course]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Category inference wins over text matching: "Développement Web" filters
    /// by the Développement category instead of fuzzy-matching titles.
    pub async fn search(&self, text: &str) -> CatalogResult<Vec<CourseView>> {
        let text = text.trim();
        if text.is_empty() {
            return self.list_published().await;
        }
        if let Some(canonical) = category::resolve(text) {
            tracing::debug!(query = %text, category = %canonical, "search resolved to category");
            return self.by_category(canonical.name()).await;
        }

        let mut hits = self.store.search_published_text(text).await?;
        hits.extend(self.store.search_published_category_name(text).await?);
        let mut seen = HashSet::new();
        hits.retain(|c| seen.insert(c.id));
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        self.views(hits).await
    }

    /// Accepts a category id, a canonical name or a synonym. Unknown
    /// categories give an empty list.
    pub async fn by_category(&self, name_or_id: &str) -> CatalogResult<Vec<CourseView>> {
        let Some(cat) = self.find_category(name_or_id).await? else {
            return Ok(Vec::new());
        };
        let courses = self.store.list_published_in_category(cat.id).await?;
        self.views(courses).await
    }

    pub async fn find_category(&self, name_or_id: &str) -> CatalogResult<Option<Category>> {
        let raw = name_or_id.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        if let Ok(id) = Uuid::parse_str(raw) {
            return self.store.get_category(id).await;
        }
        let canonical = category::resolve(raw).map(|c| c.name()).unwrap_or(raw);
        self.store.find_category_by_name(canonical).await
    }

    pub async fn lessons(
        &self,
        course_id: Uuid,
        viewer: Option<&Identity>,
    ) -> CatalogResult<Option<Vec<Lesson>>> {
        match self.visible_course(course_id, viewer).await? {
            Some(_) => Ok(Some(self.store.list_lessons(course_id).await?)),
            None => Ok(None),
        }
    }

    pub async fn lesson(
        &self,
        lesson_id: Uuid,
        viewer: Option<&Identity>,
    ) -> CatalogResult<Option<Lesson>> {
        let Some(lesson) = self.store.get_lesson(lesson_id).await? else {
            return Ok(None);
        };
        Ok(self
            .visible_course(lesson.course_id, viewer)
            .await?
            .map(|_| lesson))
    }

    pub(crate) async fn visible_course(
        &self,
        id: Uuid,
        viewer: Option<&Identity>,
    ) -> CatalogResult<Option<Course>> {
        Ok(self.store.get_course(id).await?.filter(|c| {
            c.is_published || viewer.is_some_and(|v| v.can_manage(c))
        }))
    }

    /// Attaches the `{id, name}` category projection and lesson count.
    pub(crate) async fn views(&self, courses: Vec<Course>) -> CatalogResult<Vec<CourseView>> {
        let categories: HashMap<Uuid, Category> = self
            .store
            .list_categories()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let mut out = Vec::with_capacity(courses.len());
        for course in courses {
            let category = categories
                .get(&course.category_id)
                .map(CategoryRef::from)
                .ok_or_else(|| CatalogError::not_found("category", course.category_id))?;
            let lesson_count = self.store.list_lessons(course.id).await?.len();
            out.push(CourseView {
                course,
                category,
                lesson_count,
            });
        }
        Ok(out)
    }
}
