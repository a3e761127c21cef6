use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{query, query_as};
use uuid::Uuid;

use super::CatalogStore;
use crate::db::Db;
use crate::error::{CatalogError, CatalogResult};
use crate::models::{
    Category, Course, EnrollmentProgress, Lesson, Level, QuizDefinition, QuizQuestion, QuizResult,
};

const COURSE_COLUMNS: &str = "c.id, c.title, c.description, c.long_description, c.level, c.price, \
     c.duration_label, c.image_url, c.category_id, c.owner_id, c.is_published, c.version, \
     c.created_at, c.updated_at";

const ENROLLMENT_COLUMNS: &str =
    "learner_id, course_id, completed_lesson_ids, quiz_score, quiz_total, quiz_attempted_at, updated_at";

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: Uuid,
    title: String,
    description: String,
    long_description: String,
    level: String,
    price: f64,
    duration_label: String,
    image_url: Option<String>,
    category_id: Uuid,
    owner_id: Uuid,
    is_published: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CourseRow> for Course {
    type Error = CatalogError;

    fn try_from(r: CourseRow) -> Result<Self, Self::Error> {
        let level: Level = r
            .level
            .parse()
            .map_err(|e: String| CatalogError::StoreUnavailable(format!("course {}: {e}", r.id)))?;
        Ok(Course {
            id: r.id,
            title: r.title,
            description: r.description,
            long_description: r.long_description,
            level,
            price: r.price,
            duration_label: r.duration_label,
            image_url: r.image_url,
            category_id: r.category_id,
            owner_id: r.owner_id,
            is_published: r.is_published,
            version: r.version,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn courses(rows: Vec<CourseRow>) -> CatalogResult<Vec<Course>> {
    rows.into_iter().map(Course::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct QuizRow {
    course_id: Uuid,
    questions: Json<Vec<QuizQuestion>>,
    pass_threshold: i32,
    certificate_threshold: i32,
}

impl From<QuizRow> for QuizDefinition {
    fn from(r: QuizRow) -> Self {
        QuizDefinition {
            course_id: r.course_id,
            questions: r.questions.0,
            pass_threshold: r.pass_threshold.max(0) as u32,
            certificate_threshold: r.certificate_threshold.max(0) as u32,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    learner_id: Uuid,
    course_id: Uuid,
    completed_lesson_ids: Vec<Uuid>,
    quiz_score: Option<i32>,
    quiz_total: Option<i32>,
    quiz_attempted_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<EnrollmentRow> for EnrollmentProgress {
    fn from(r: EnrollmentRow) -> Self {
        let quiz_result = match (r.quiz_score, r.quiz_total, r.quiz_attempted_at) {
            (Some(score), Some(total), Some(at)) => Some(QuizResult {
                score: score.max(0) as u32,
                total_possible: total.max(0) as u32,
                attempted_at: at,
            }),
            _ => None,
        };
        EnrollmentProgress {
            learner_id: r.learner_id,
            course_id: r.course_id,
            completed_lesson_ids: r.completed_lesson_ids.into_iter().collect(),
            quiz_result,
            updated_at: r.updated_at,
        }
    }
}

/// Points columns are `INTEGER`; out-of-range values are caller errors.
fn db_int(field: &str, value: u32) -> CatalogResult<i32> {
    i32::try_from(value)
        .map_err(|_| CatalogError::validation(field, format!("{value} is out of range")))
}

/// Escapes LIKE metacharacters so user text only ever matches literally.
fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    async fn published_where(&self, clause: &str, bind: Option<String>) -> CatalogResult<Vec<Course>> {
        let sql = format!(
            "SELECT {COURSE_COLUMNS} FROM courses c JOIN categories cat ON cat.id = c.category_id \
             WHERE c.is_published {clause} ORDER BY c.created_at DESC, c.id"
        );
        let mut q = query_as::<_, CourseRow>(&sql);
        if let Some(b) = bind {
            q = q.bind(b);
        }
        courses(q.fetch_all(&self.db).await?)
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn list_categories(&self) -> CatalogResult<Vec<Category>> {
        Ok(
            query_as::<_, Category>("SELECT id, name, description FROM categories ORDER BY name")
                .fetch_all(&self.db)
                .await?,
        )
    }

    async fn get_category(&self, id: Uuid) -> CatalogResult<Option<Category>> {
        Ok(
            query_as::<_, Category>("SELECT id, name, description FROM categories WHERE id=$1")
                .bind(id)
                .fetch_optional(&self.db)
                .await?,
        )
    }

    async fn find_category_by_name(&self, name: &str) -> CatalogResult<Option<Category>> {
        Ok(
            query_as::<_, Category>("SELECT id, name, description FROM categories WHERE name=$1")
                .bind(name)
                .fetch_optional(&self.db)
                .await?,
        )
    }

    async fn insert_category(&self, category: Category) -> CatalogResult<Category> {
        Ok(query_as::<_, Category>(
            "INSERT INTO categories (id, name, description) VALUES ($1,$2,$3) \
             RETURNING id, name, description",
        )
        .bind(category.id)
        .bind(&category.name)
        .bind(&category.description)
        .fetch_one(&self.db)
        .await?)
    }

    async fn insert_course(&self, course: Course, lessons: Vec<Lesson>) -> CatalogResult<Course> {
        let mut tx = self.db.begin().await?;
        query(
            r#"
            INSERT INTO courses (id, title, description, long_description, level, price,
                duration_label, image_url, category_id, owner_id, is_published, version,
                created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            "#,
        )
        .bind(course.id)
        .bind(&course.title)
        .bind(&course.description)
        .bind(&course.long_description)
        .bind(course.level.as_str())
        .bind(course.price)
        .bind(&course.duration_label)
        .bind(&course.image_url)
        .bind(course.category_id)
        .bind(course.owner_id)
        .bind(course.is_published)
        .bind(course.version)
        .bind(course.created_at)
        .bind(course.updated_at)
        .execute(&mut *tx)
        .await?;

        for l in &lessons {
            insert_lesson(&mut tx, l).await?;
        }
        tx.commit().await?;
        Ok(course)
    }

    async fn get_course(&self, id: Uuid) -> CatalogResult<Option<Course>> {
        let sql = format!("SELECT {COURSE_COLUMNS} FROM courses c WHERE c.id=$1");
        query_as::<_, CourseRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .map(Course::try_from)
            .transpose()
    }

    async fn list_published(&self) -> CatalogResult<Vec<Course>> {
        self.published_where("", None).await
    }

    async fn list_by_owner(&self, owner_id: Option<Uuid>) -> CatalogResult<Vec<Course>> {
        let sql = format!(
            "SELECT {COURSE_COLUMNS} FROM courses c \
             WHERE ($1::uuid IS NULL OR c.owner_id=$1) ORDER BY c.created_at DESC, c.id"
        );
        courses(
            query_as::<_, CourseRow>(&sql)
                .bind(owner_id)
                .fetch_all(&self.db)
                .await?,
        )
    }

    async fn enrollment_counts(&self, course_ids: &[Uuid]) -> CatalogResult<HashMap<Uuid, u64>> {
        let rows: Vec<(Uuid, i64)> = query_as(
            "SELECT course_id, COUNT(*) FROM enrollments \
             WHERE course_id = ANY($1) GROUP BY course_id",
        )
        .bind(course_ids)
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, n)| (id, n.max(0) as u64))
            .collect())
    }

    async fn list_published_in_category(&self, category_id: Uuid) -> CatalogResult<Vec<Course>> {
        let sql = format!(
            "SELECT {COURSE_COLUMNS} FROM courses c \
             WHERE c.is_published AND c.category_id=$1 ORDER BY c.created_at DESC, c.id"
        );
        courses(
            query_as::<_, CourseRow>(&sql)
                .bind(category_id)
                .fetch_all(&self.db)
                .await?,
        )
    }

    async fn search_published_text(&self, text: &str) -> CatalogResult<Vec<Course>> {
        self.published_where(
            "AND (c.title ILIKE $1 OR c.description ILIKE $1)",
            Some(like_pattern(text)),
        )
        .await
    }

    async fn search_published_category_name(&self, text: &str) -> CatalogResult<Vec<Course>> {
        self.published_where("AND cat.name ILIKE $1", Some(like_pattern(text)))
            .await
    }

    async fn update_course(&self, course: Course, expected_version: i64) -> CatalogResult<Course> {
        let sql = format!(
            r#"
            UPDATE courses c SET title=$3, description=$4, long_description=$5, level=$6,
                price=$7, duration_label=$8, image_url=$9, category_id=$10, is_published=$11,
                version = c.version + 1, updated_at = now()
            WHERE c.id=$1 AND c.version=$2
            RETURNING {COURSE_COLUMNS}
            "#
        );
        let row = query_as::<_, CourseRow>(&sql)
            .bind(course.id)
            .bind(expected_version)
            .bind(&course.title)
            .bind(&course.description)
            .bind(&course.long_description)
            .bind(course.level.as_str())
            .bind(course.price)
            .bind(&course.duration_label)
            .bind(&course.image_url)
            .bind(course.category_id)
            .bind(course.is_published)
            .fetch_optional(&self.db)
            .await?;
        match row {
            Some(r) => r.try_into(),
            None => match self.get_course(course.id).await? {
                Some(current) => Err(CatalogError::Conflict(format!(
                    "course {} is at version {}, expected {expected_version}",
                    course.id, current.version
                ))),
                None => Err(CatalogError::not_found("course", course.id)),
            },
        }
    }

    async fn delete_course(&self, id: Uuid) -> CatalogResult<bool> {
        // lessons, quizzes and enrollments cascade in the schema
        let done = query("DELETE FROM courses WHERE id=$1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn list_lessons(&self, course_id: Uuid) -> CatalogResult<Vec<Lesson>> {
        Ok(query_as::<_, Lesson>(
            "SELECT id, course_id, title, content, video_url, order_index, created_at \
             FROM lessons WHERE course_id=$1 ORDER BY order_index",
        )
        .bind(course_id)
        .fetch_all(&self.db)
        .await?)
    }

    async fn get_lesson(&self, id: Uuid) -> CatalogResult<Option<Lesson>> {
        Ok(query_as::<_, Lesson>(
            "SELECT id, course_id, title, content, video_url, order_index, created_at \
             FROM lessons WHERE id=$1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?)
    }

    async fn replace_lessons(
        &self,
        course_id: Uuid,
        lessons: Vec<Lesson>,
        expected_version: i64,
    ) -> CatalogResult<Course> {
        let mut tx = self.db.begin().await?;
        let current: Option<i64> =
            sqlx::query_scalar("SELECT version FROM courses WHERE id=$1 FOR UPDATE")
                .bind(course_id)
                .fetch_optional(&mut *tx)
                .await?;
        match current {
            None => return Err(CatalogError::not_found("course", course_id)),
            Some(v) if v != expected_version => {
                return Err(CatalogError::Conflict(format!(
                    "course {course_id} is at version {v}, expected {expected_version}"
                )))
            }
            Some(_) => {}
        }

        query("DELETE FROM lessons WHERE course_id=$1")
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
        for l in &lessons {
            insert_lesson(&mut tx, l).await?;
        }

        let sql = format!(
            "UPDATE courses c SET version = c.version + 1, updated_at = now() \
             WHERE c.id=$1 RETURNING {COURSE_COLUMNS}"
        );
        let row = query_as::<_, CourseRow>(&sql)
            .bind(course_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        row.try_into()
    }

    async fn get_quiz(&self, course_id: Uuid) -> CatalogResult<Option<QuizDefinition>> {
        Ok(query_as::<_, QuizRow>(
            "SELECT course_id, questions, pass_threshold, certificate_threshold \
             FROM quizzes WHERE course_id=$1",
        )
        .bind(course_id)
        .fetch_optional(&self.db)
        .await?
        .map(QuizDefinition::from))
    }

    async fn put_quiz(&self, quiz: QuizDefinition) -> CatalogResult<QuizDefinition> {
        let row = query_as::<_, QuizRow>(
            r#"
            INSERT INTO quizzes (course_id, questions, pass_threshold, certificate_threshold)
            VALUES ($1,$2,$3,$4)
            ON CONFLICT (course_id)
            DO UPDATE SET questions=EXCLUDED.questions,
                pass_threshold=EXCLUDED.pass_threshold,
                certificate_threshold=EXCLUDED.certificate_threshold,
                updated_at=now()
            RETURNING course_id, questions, pass_threshold, certificate_threshold
            "#,
        )
        .bind(quiz.course_id)
        .bind(Json(&quiz.questions))
        .bind(db_int("pass_threshold", quiz.pass_threshold)?)
        .bind(db_int("certificate_threshold", quiz.certificate_threshold)?)
        .fetch_one(&self.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                CatalogError::not_found("course", quiz.course_id)
            }
            other => other.into(),
        })?;
        Ok(row.into())
    }

    async fn get_enrollment(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
    ) -> CatalogResult<Option<EnrollmentProgress>> {
        let sql = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE learner_id=$1 AND course_id=$2"
        );
        Ok(query_as::<_, EnrollmentRow>(&sql)
            .bind(learner_id)
            .bind(course_id)
            .fetch_optional(&self.db)
            .await?
            .map(EnrollmentProgress::from))
    }

    async fn add_completed_lesson(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        lesson_id: Uuid,
    ) -> CatalogResult<EnrollmentProgress> {
        let sql = format!(
            r#"
            INSERT INTO enrollments (learner_id, course_id, completed_lesson_ids)
            VALUES ($1, $2, ARRAY[$3]::uuid[])
            ON CONFLICT (learner_id, course_id)
            DO UPDATE SET completed_lesson_ids = CASE
                    WHEN $3 = ANY(enrollments.completed_lesson_ids)
                        THEN enrollments.completed_lesson_ids
                    ELSE array_append(enrollments.completed_lesson_ids, $3)
                END,
                updated_at = now()
            RETURNING {ENROLLMENT_COLUMNS}
            "#
        );
        Ok(query_as::<_, EnrollmentRow>(&sql)
            .bind(learner_id)
            .bind(course_id)
            .bind(lesson_id)
            .fetch_one(&self.db)
            .await?
            .into())
    }

    async fn record_quiz_result(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        result: QuizResult,
    ) -> CatalogResult<EnrollmentProgress> {
        let sql = format!(
            r#"
            INSERT INTO enrollments (learner_id, course_id, quiz_score, quiz_total, quiz_attempted_at)
            VALUES ($1,$2,$3,$4,$5)
            ON CONFLICT (learner_id, course_id)
            DO UPDATE SET quiz_score=EXCLUDED.quiz_score, quiz_total=EXCLUDED.quiz_total,
                quiz_attempted_at=EXCLUDED.quiz_attempted_at, updated_at=now()
            RETURNING {ENROLLMENT_COLUMNS}
            "#
        );
        Ok(query_as::<_, EnrollmentRow>(&sql)
            .bind(learner_id)
            .bind(course_id)
            .bind(db_int("score", result.score)?)
            .bind(db_int("total_possible", result.total_possible)?)
            .bind(result.attempted_at)
            .fetch_one(&self.db)
            .await?
            .into())
    }
}

async fn insert_lesson(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    l: &Lesson,
) -> CatalogResult<()> {
    query(
        "INSERT INTO lessons (id, course_id, title, content, video_url, order_index, created_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7)",
    )
    .bind(l.id)
    .bind(l.course_id)
    .bind(&l.title)
    .bind(&l.content)
    .bind(&l.video_url)
    .bind(l.order_index)
    .bind(l.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{db_int, like_pattern};
    use crate::error::CatalogError;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("react"), "%react%");
        assert_eq!(like_pattern("100%_off"), "%100\\%\\_off%");
    }

    #[test]
    fn db_int_rejects_values_past_i32() {
        assert_eq!(db_int("score", 60).unwrap(), 60);
        assert!(matches!(
            db_int("score", u32::MAX),
            Err(CatalogError::Validation { ref field, .. }) if field == "score"
        ));
    }
}
