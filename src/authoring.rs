//! Course and lesson authoring.
//!
//! Every mutation runs under a per-course lock, rebuilds the full lesson list,
//! renumbers it densely via [`normalize_order`], checks the result and hands it
//! to the store in one atomic replace guarded by the course version.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::catalog::CatalogQuery;
use crate::category;
use crate::error::{CatalogError, CatalogResult, FieldError};
use crate::identity::Identity;
use crate::models::{
    Category, Course, CourseView, CreateCourseReq, CreatedCourse, Lesson, LessonDraft, Level,
    UpdateCourseReq,
};
use crate::notify::Notifier;
use crate::store::CatalogStore;

/// Sorts on the current `order_index` (stable, so ties keep input position)
/// and renumbers to 1..N. Idempotent.
pub fn normalize_order(mut lessons: Vec<Lesson>) -> Vec<Lesson> {
    lessons.sort_by_key(|l| l.order_index);
    renumber(lessons)
}

fn renumber(mut lessons: Vec<Lesson>) -> Vec<Lesson> {
    for (i, l) in lessons.iter_mut().enumerate() {
        l.order_index = i as i32 + 1;
    }
    lessons
}

/// True when the order indices are exactly {1..N}.
pub fn is_dense(lessons: &[Lesson]) -> bool {
    let mut seen: Vec<i32> = lessons.iter().map(|l| l.order_index).collect();
    seen.sort_unstable();
    seen.iter().enumerate().all(|(i, idx)| *idx == i as i32 + 1)
}

fn check_dense(lessons: &[Lesson]) -> CatalogResult<()> {
    if is_dense(lessons) {
        Ok(())
    } else {
        tracing::error!(count = lessons.len(), "lesson order not dense after normalization");
        Err(CatalogError::Conflict("lesson order could not be normalized".into()))
    }
}

fn required(field: &str, value: &str) -> CatalogResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(CatalogError::validation(field, format!("{field} is required")));
    }
    Ok(v.to_string())
}

fn parse_level(raw: &str) -> CatalogResult<Level> {
    if raw.trim().is_empty() {
        return Err(CatalogError::validation("level", "level is required"));
    }
    raw.parse().map_err(|e: String| CatalogError::validation("level", e))
}

fn check_price(price: f64) -> CatalogResult<f64> {
    if !price.is_finite() || price < 0.0 {
        return Err(CatalogError::validation("price", "price must be a non-negative amount"));
    }
    Ok(price)
}

fn blank_to_none(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Turns drafts into lessons for `course_id`, reusing ids of `existing`
/// lessons the drafts point at, and normalizes the order.
fn build_lessons(
    course_id: Uuid,
    drafts: Vec<LessonDraft>,
    existing: &[Lesson],
) -> CatalogResult<Vec<Lesson>> {
    let now = Utc::now();
    let mut out = Vec::with_capacity(drafts.len());
    for (pos, d) in drafts.into_iter().enumerate() {
        let title = required(&format!("lessons[{pos}].title"), &d.title)?;
        let content = required(&format!("lessons[{pos}].content"), &d.content)?;
        let prior = d
            .id
            .and_then(|id| existing.iter().find(|l| l.id == id));
        if out.iter().any(|l: &Lesson| Some(l.id) == d.id) {
            return Err(CatalogError::validation(
                format!("lessons[{pos}].id"),
                "lesson listed twice",
            ));
        }
        out.push(Lesson {
            id: prior.map(|l| l.id).unwrap_or_else(Uuid::new_v4),
            course_id,
            title,
            content,
            video_url: blank_to_none(d.video_url),
            order_index: d.order_index.unwrap_or(pos as i32 + 1),
            created_at: prior.map(|l| l.created_at).unwrap_or(now),
        });
    }
    Ok(normalize_order(out))
}

#[derive(Default)]
struct CourseLocks {
    inner: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl CourseLocks {
    async fn acquire(&self, course_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(course_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    fn forget(&self, course_id: Uuid) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&course_id);
    }
}

#[derive(Clone)]
pub struct Authoring {
    store: Arc<dyn CatalogStore>,
    catalog: CatalogQuery,
    notifier: Notifier,
    locks: Arc<CourseLocks>,
}

impl Authoring {
    pub fn new(store: Arc<dyn CatalogStore>, notifier: Notifier) -> Self {
        Self {
            catalog: CatalogQuery::new(store.clone()),
            store,
            notifier,
            locks: Arc::new(CourseLocks::default()),
        }
    }

    pub async fn create_course(
        &self,
        req: CreateCourseReq,
        owner: &Identity,
    ) -> CatalogResult<CreatedCourse> {
        let title = required("title", &req.title)?;
        let description = required("description", &req.description)?;
        let level = parse_level(&req.level)?;
        let price = check_price(req.price.unwrap_or(0.0))?;
        let category = self
            .category_for(req.category_id, req.category.as_deref())
            .await?;

        let course_id = Uuid::new_v4();
        let lessons = build_lessons(course_id, req.lessons, &[])?;

        let publish_rejected = if req.publish && lessons.is_empty() {
            Some(FieldError {
                field: "lessons".into(),
                message: "a course needs at least one lesson to be published".into(),
            })
        } else {
            None
        };

        let now = Utc::now();
        let course = Course {
            id: course_id,
            title,
            description,
            long_description: req.long_description.unwrap_or_default(),
            level,
            price,
            duration_label: req.duration_label.unwrap_or_default(),
            image_url: blank_to_none(req.image_url),
            category_id: category.id,
            owner_id: owner.user_id,
            is_published: req.publish && publish_rejected.is_none(),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let course = self.store.insert_course(course, lessons.clone()).await?;
        tracing::info!(
            course_id = %course.id,
            lessons = lessons.len(),
            published = course.is_published,
            "course created"
        );
        if publish_rejected.is_some() {
            tracing::warn!(course_id = %course.id, "publish refused: no lessons, kept as draft");
        }

        if let Some(email) = &owner.email {
            self.notifier.course_created(email, &course);
        }

        let view = self.view(course).await?;
        Ok(CreatedCourse {
            course: view,
            lessons,
            publish_rejected,
        })
    }

    pub async fn update_course(
        &self,
        course_id: Uuid,
        patch: UpdateCourseReq,
        actor: &Identity,
    ) -> CatalogResult<CourseView> {
        let _guard = self.locks.acquire(course_id).await;
        let mut course = self.managed_course(course_id, actor, patch.expected_version).await?;
        let version = course.version;

        if let Some(t) = patch.title {
            course.title = required("title", &t)?;
        }
        if let Some(d) = patch.description {
            course.description = required("description", &d)?;
        }
        if let Some(ld) = patch.long_description {
            course.long_description = ld;
        }
        if let Some(l) = patch.level {
            course.level = parse_level(&l)?;
        }
        if let Some(p) = patch.price {
            course.price = check_price(p)?;
        }
        if let Some(d) = patch.duration_label {
            course.duration_label = d;
        }
        if let Some(url) = patch.image_url {
            course.image_url = blank_to_none(Some(url));
        }
        if patch.category_id.is_some() || patch.category.is_some() {
            course.category_id = self
                .category_for(patch.category_id, patch.category.as_deref())
                .await?
                .id;
        }

        let course = self.store.update_course(course, version).await?;
        tracing::info!(course_id = %course.id, version = course.version, "course updated");
        self.view(course).await
    }

    pub async fn delete_course(&self, course_id: Uuid, actor: &Identity) -> CatalogResult<()> {
        {
            let _guard = self.locks.acquire(course_id).await;
            self.managed_course(course_id, actor, None).await?;
            self.store.delete_course(course_id).await?;
        }
        self.locks.forget(course_id);
        tracing::info!(course_id = %course_id, "course deleted");
        Ok(())
    }

    /// Replaces the whole lesson list; order follows the drafts' hints, then
    /// their position.
    pub async fn set_lessons(
        &self,
        course_id: Uuid,
        drafts: Vec<LessonDraft>,
        expected_version: Option<i64>,
        actor: &Identity,
    ) -> CatalogResult<Vec<Lesson>> {
        let _guard = self.locks.acquire(course_id).await;
        let course = self.managed_course(course_id, actor, expected_version).await?;
        let existing = self.store.list_lessons(course_id).await?;
        let lessons = build_lessons(course_id, drafts, &existing)?;
        self.commit_lessons(&course, lessons).await
    }

    /// Inserts at `draft.order_index` (clamped) or appends.
    pub async fn add_lesson(
        &self,
        course_id: Uuid,
        draft: LessonDraft,
        actor: &Identity,
    ) -> CatalogResult<Vec<Lesson>> {
        let _guard = self.locks.acquire(course_id).await;
        let course = self.managed_course(course_id, actor, None).await?;
        let mut lessons = self.store.list_lessons(course_id).await?;
        let at = draft.order_index;
        let mut built = build_lessons(course_id, vec![LessonDraft { id: None, ..draft }], &[])?;
        let lesson = built.remove(0);
        let pos = match at {
            Some(p) => (p.max(1) as usize - 1).min(lessons.len()),
            None => lessons.len(),
        };
        lessons.insert(pos, lesson);
        self.commit_lessons(&course, renumber(lessons)).await
    }

    pub async fn remove_lesson(&self, lesson_id: Uuid, actor: &Identity) -> CatalogResult<Vec<Lesson>> {
        let lesson = self
            .store
            .get_lesson(lesson_id)
            .await?
            .ok_or_else(|| CatalogError::not_found("lesson", lesson_id))?;
        let _guard = self.locks.acquire(lesson.course_id).await;
        let course = self.managed_course(lesson.course_id, actor, None).await?;
        let mut lessons = self.store.list_lessons(course.id).await?;
        let before = lessons.len();
        lessons.retain(|l| l.id != lesson_id);
        if lessons.len() == before {
            // removed by a concurrent writer while we waited for the lock
            return Err(CatalogError::not_found("lesson", lesson_id));
        }
        self.commit_lessons(&course, renumber(lessons)).await
    }

    /// Moves a lesson to the 1-based `position`, clamped into 1..=N.
    pub async fn reorder_lesson(
        &self,
        lesson_id: Uuid,
        position: i32,
        actor: &Identity,
    ) -> CatalogResult<Vec<Lesson>> {
        let lesson = self
            .store
            .get_lesson(lesson_id)
            .await?
            .ok_or_else(|| CatalogError::not_found("lesson", lesson_id))?;
        let _guard = self.locks.acquire(lesson.course_id).await;
        let course = self.managed_course(lesson.course_id, actor, None).await?;
        let mut lessons = self.store.list_lessons(course.id).await?;
        let from = lessons
            .iter()
            .position(|l| l.id == lesson_id)
            .ok_or_else(|| CatalogError::not_found("lesson", lesson_id))?;
        let moved = lessons.remove(from);
        let to = (position.max(1) as usize - 1).min(lessons.len());
        lessons.insert(to, moved);
        self.commit_lessons(&course, renumber(lessons)).await
    }

    pub async fn publish(&self, course_id: Uuid, actor: &Identity) -> CatalogResult<CourseView> {
        let _guard = self.locks.acquire(course_id).await;
        let mut course = self.managed_course(course_id, actor, None).await?;
        let lesson_count = self.store.list_lessons(course_id).await?.len();
        if lesson_count == 0 {
            return Err(CatalogError::validation(
                "lessons",
                "a course needs at least one lesson to be published",
            ));
        }
        required("title", &course.title)?;
        required("description", &course.description)?;
        if course.is_published {
            return self.view(course).await;
        }
        let version = course.version;
        course.is_published = true;
        let course = self.store.update_course(course, version).await?;
        tracing::info!(course_id = %course.id, lessons = lesson_count, "course published");
        if let Some(email) = &actor.email {
            self.notifier.course_published(email, &course);
        }
        self.view(course).await
    }

    pub async fn unpublish(&self, course_id: Uuid, actor: &Identity) -> CatalogResult<CourseView> {
        let _guard = self.locks.acquire(course_id).await;
        let mut course = self.managed_course(course_id, actor, None).await?;
        if !course.is_published {
            return self.view(course).await;
        }
        let version = course.version;
        course.is_published = false;
        let course = self.store.update_course(course, version).await?;
        tracing::info!(course_id = %course.id, "course unpublished");
        self.view(course).await
    }

    async fn commit_lessons(&self, course: &Course, lessons: Vec<Lesson>) -> CatalogResult<Vec<Lesson>> {
        check_dense(&lessons)?;
        if course.is_published && lessons.is_empty() {
            return Err(CatalogError::validation(
                "lessons",
                "a published course must keep at least one lesson; unpublish it first",
            ));
        }
        self.store
            .replace_lessons(course.id, lessons.clone(), course.version)
            .await?;
        tracing::debug!(course_id = %course.id, lessons = lessons.len(), "lessons replaced");
        Ok(lessons)
    }

    /// Loads the course for mutation: exists, caller may manage it, and the
    /// caller's version (if any) is current.
    async fn managed_course(
        &self,
        course_id: Uuid,
        actor: &Identity,
        expected_version: Option<i64>,
    ) -> CatalogResult<Course> {
        let course = self.store.get_course_required(course_id).await?;
        actor.require_manage(&course)?;
        if let Some(v) = expected_version {
            if v != course.version {
                return Err(CatalogError::Conflict(format!(
                    "course {course_id} changed (version {}), reload and retry",
                    course.version
                )));
            }
        }
        Ok(course)
    }

    /// Category by id, or by name through the resolver; unknown names are created.
    async fn category_for(&self, id: Option<Uuid>, name: Option<&str>) -> CatalogResult<Category> {
        if let Some(id) = id {
            return self
                .store
                .get_category(id)
                .await?
                .ok_or_else(|| CatalogError::validation("category", "unknown category"));
        }
        let raw = required("category", name.unwrap_or(""))?;
        if let Some(existing) = self.catalog.find_category(&raw).await? {
            return Ok(existing);
        }
        let name = category::resolve(&raw)
            .map(|c| c.name().to_string())
            .unwrap_or(raw);
        let fresh = Category {
            id: Uuid::new_v4(),
            name: name.clone(),
            description: None,
        };
        match self.store.insert_category(fresh).await {
            Ok(c) => {
                tracing::info!(category = %c.name, "category created");
                Ok(c)
            }
            // lost a race with another author creating the same name
            Err(CatalogError::Conflict(_)) => self
                .store
                .find_category_by_name(&name)
                .await?
                .ok_or_else(|| CatalogError::Conflict(format!("category '{name}' in flux"))),
            Err(e) => Err(e),
        }
    }

    async fn view(&self, course: Course) -> CatalogResult<CourseView> {
        self.catalog
            .views(vec![course])
            .await?
            .pop()
            .ok_or_else(|| CatalogError::StoreUnavailable("course view vanished".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(order: i32, title: &str) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            course_id: Uuid::nil(),
            title: title.into(),
            content: "body".into(),
            video_url: None,
            order_index: order,
            created_at: Utc::now(),
        }
    }

    fn titles(ls: &[Lesson]) -> Vec<&str> {
        ls.iter().map(|l| l.title.as_str()).collect()
    }

    #[test]
    fn normalize_closes_gaps_and_breaks_ties_by_position() {
        let out = normalize_order(vec![
            lesson(10, "c"),
            lesson(3, "a"),
            lesson(3, "b"),
            lesson(42, "d"),
        ]);
        assert_eq!(titles(&out), vec!["a", "b", "c", "d"]);
        assert_eq!(out.iter().map(|l| l.order_index).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert!(is_dense(&out));
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_order(vec![lesson(5, "x"), lesson(2, "y")]);
        let twice = normalize_order(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn is_dense_rejects_gaps_and_duplicates() {
        assert!(is_dense(&[]));
        assert!(!is_dense(&[lesson(1, "a"), lesson(3, "b")]));
        assert!(!is_dense(&[lesson(1, "a"), lesson(1, "b")]));
        assert!(!is_dense(&[lesson(0, "a")]));
    }

    #[test]
    fn build_lessons_validates_and_numbers() {
        let drafts = vec![
            LessonDraft {
                title: "Second".into(),
                content: "b".into(),
                order_index: Some(2),
                ..Default::default()
            },
            LessonDraft {
                title: "First".into(),
                content: "a".into(),
                order_index: Some(1),
                video_url: Some("  ".into()),
                ..Default::default()
            },
        ];
        let out = build_lessons(Uuid::nil(), drafts, &[]).unwrap();
        assert_eq!(titles(&out), vec!["First", "Second"]);
        assert_eq!(out[0].video_url, None);

        let err = build_lessons(
            Uuid::nil(),
            vec![LessonDraft {
                title: "ok".into(),
                content: " ".into(),
                ..Default::default()
            }],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Validation { ref field, .. } if field == "lessons[0].content"));
    }

    #[test]
    fn build_lessons_keeps_known_ids() {
        let prior = lesson(1, "old");
        let out = build_lessons(
            Uuid::nil(),
            vec![LessonDraft {
                id: Some(prior.id),
                title: "renamed".into(),
                content: "x".into(),
                ..Default::default()
            }],
            std::slice::from_ref(&prior),
        )
        .unwrap();
        assert_eq!(out[0].id, prior.id);
        assert_eq!(out[0].title, "renamed");
    }

    #[test]
    fn price_and_level_validation() {
        assert!(check_price(-1.0).is_err());
        assert!(check_price(f64::NAN).is_err());
        assert_eq!(check_price(0.0).unwrap(), 0.0);
        assert!(matches!(
            parse_level(""),
            Err(CatalogError::Validation { ref field, .. }) if field == "level"
        ));
    }
}
