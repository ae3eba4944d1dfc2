use crate::auth;
use crate::calc;
use crate::model::{
    AssessmentItem, FluencyAssessment, GeneralAssessment, Goal, ItemScore, Student, Teacher,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("session is missing or expired")]
    Unauthorized,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl StoreError {
    /// Stable error code used in IPC error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Validation(_) => "validation_failed",
            StoreError::Conflict(_) => "conflict",
            StoreError::Unauthorized => "unauthorized",
            StoreError::Db(_) => "db_query_failed",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ---- teachers & sessions ----

pub fn register_teacher(conn: &Connection, email: &str, password: &str) -> StoreResult<Teacher> {
    let email = email.trim();
    let key = auth::email_key(email);
    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE email_key = ?", [&key], |r| {
            r.get(0)
        })
        .optional()?;
    if taken.is_some() {
        return Err(StoreError::Conflict(
            "An account with this email already exists.".into(),
        ));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO teachers(id, email, email_key, password_hash, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &id,
            email,
            &key,
            auth::hash_password(password),
            timestamp(Utc::now()),
        ),
    )?;
    Ok(Teacher {
        id,
        email: email.to_string(),
    })
}

pub fn authenticate(conn: &Connection, email: &str, password: &str) -> StoreResult<Option<Teacher>> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, email, password_hash FROM teachers WHERE email_key = ?",
            [auth::email_key(email)],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    Ok(row.and_then(|(id, email, hash)| {
        auth::verify_password(password, &hash).then_some(Teacher { id, email })
    }))
}

pub fn create_session(
    conn: &Connection,
    teacher_id: &str,
    now: DateTime<Utc>,
    ttl_minutes: i64,
) -> StoreResult<String> {
    let token = auth::new_session_token();
    conn.execute(
        "INSERT INTO sessions(token, teacher_id, created_at, expires_at) VALUES(?, ?, ?, ?)",
        (
            &token,
            teacher_id,
            timestamp(now),
            timestamp(auth::session_expiry(now, ttl_minutes)),
        ),
    )?;
    Ok(token)
}

/// Resolves a session token to its teacher. Expired sessions are removed.
pub fn session_teacher(conn: &Connection, token: &str, now: DateTime<Utc>) -> StoreResult<Teacher> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT t.id, t.email, s.expires_at
             FROM sessions s
             JOIN teachers t ON t.id = s.teacher_id
             WHERE s.token = ?",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((id, email, expires_at)) = row else {
        return Err(StoreError::Unauthorized);
    };
    let live = DateTime::parse_from_rfc3339(&expires_at)
        .map(|t| t.with_timezone(&Utc) > now)
        .unwrap_or(false);
    if !live {
        conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
        return Err(StoreError::Unauthorized);
    }
    Ok(Teacher { id, email })
}

pub fn revoke_session(conn: &Connection, token: &str) -> StoreResult<bool> {
    let n = conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
    Ok(n > 0)
}

// ---- teacher-scoped records ----

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub grade_level: String,
}

#[derive(Debug, Clone)]
pub struct NewGoal {
    pub student_id: String,
    pub area: String,
    pub description: String,
    pub goal_grade_level: String,
    pub mastery_criteria: String,
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub goal_id: String,
    pub prompt: String,
    pub correct_answer: String,
    pub score: ItemScore,
}

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        teacher_id: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        grade_level: r.get(4)?,
    })
}

fn goal_from_row(r: &Row<'_>) -> rusqlite::Result<Goal> {
    let active: i64 = r.get(6)?;
    Ok(Goal {
        id: r.get(0)?,
        student_id: r.get(1)?,
        area: r.get(2)?,
        description: r.get(3)?,
        goal_grade_level: r.get(4)?,
        mastery_criteria: r.get(5)?,
        active: active != 0,
    })
}

fn fluency_from_row(r: &Row<'_>) -> rusqlite::Result<FluencyAssessment> {
    Ok(FluencyAssessment {
        id: r.get(0)?,
        student_id: r.get(1)?,
        date: r.get(2)?,
        total_words_attempted: r.get(3)?,
        errors: r.get(4)?,
        wcpm: r.get(5)?,
        accuracy_percent: r.get(6)?,
    })
}

const GOAL_COLUMNS: &str =
    "g.id, g.student_id, g.area, g.description, g.goal_grade_level, g.mastery_criteria, g.active";

/// Every read and write below is restricted to one teacher's roster, so a
/// foreign id behaves exactly like a missing one.
#[derive(Debug, Clone, Copy)]
pub struct TeacherScope<'a> {
    pub conn: &'a Connection,
    pub teacher_id: &'a str,
}

impl<'a> TeacherScope<'a> {
    pub fn new(conn: &'a Connection, teacher_id: &'a str) -> Self {
        Self { conn, teacher_id }
    }

    pub fn students(&self) -> StoreResult<Vec<Student>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, teacher_id, first_name, last_name, grade_level
             FROM students
             WHERE teacher_id = ?
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([self.teacher_id], student_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn student(&self, student_id: &str) -> StoreResult<Option<Student>> {
        let s = self
            .conn
            .query_row(
                "SELECT id, teacher_id, first_name, last_name, grade_level
                 FROM students
                 WHERE id = ? AND teacher_id = ?",
                (student_id, self.teacher_id),
                student_from_row,
            )
            .optional()?;
        Ok(s)
    }

    fn require_student(&self, student_id: &str) -> StoreResult<Student> {
        self.student(student_id)?
            .ok_or(StoreError::NotFound("student"))
    }

    pub fn add_student(&self, new: NewStudent) -> StoreResult<Student> {
        let first_name = new.first_name.trim().to_string();
        let last_name = new.last_name.trim().to_string();
        let grade_level = new.grade_level.trim().to_string();
        if first_name.is_empty() || last_name.is_empty() || grade_level.is_empty() {
            return Err(StoreError::Validation(
                "first name, last name and grade level are required".into(),
            ));
        }
        let id = new_id();
        self.conn.execute(
            "INSERT INTO students(id, teacher_id, first_name, last_name, grade_level)
             VALUES(?, ?, ?, ?, ?)",
            (&id, self.teacher_id, &first_name, &last_name, &grade_level),
        )?;
        Ok(Student {
            id,
            teacher_id: self.teacher_id.to_string(),
            first_name,
            last_name,
            grade_level,
        })
    }

    /// Removes the student and everything recorded against them.
    pub fn delete_student(&self, student_id: &str) -> StoreResult<bool> {
        if self.student(student_id)?.is_none() {
            return Ok(false);
        }

        let tx = self.conn.unchecked_transaction()?;
        // Dependency order; the schema has no ON DELETE CASCADE.
        tx.execute(
            "DELETE FROM general_assessment_items
             WHERE assessment_id IN (
               SELECT id FROM general_assessments WHERE student_id = ?
             )",
            [student_id],
        )?;
        // Items may also reference this student's goals from another record.
        tx.execute(
            "DELETE FROM general_assessment_items
             WHERE goal_id IN (SELECT id FROM goals WHERE student_id = ?)",
            [student_id],
        )?;
        tx.execute(
            "DELETE FROM general_assessments WHERE student_id = ?",
            [student_id],
        )?;
        tx.execute(
            "DELETE FROM fluency_assessments WHERE student_id = ?",
            [student_id],
        )?;
        tx.execute("DELETE FROM goals WHERE student_id = ?", [student_id])?;
        tx.execute(
            "DELETE FROM students WHERE id = ? AND teacher_id = ?",
            (student_id, self.teacher_id),
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// All goals on the roster, in creation order.
    pub fn goals(&self) -> StoreResult<Vec<Goal>> {
        let sql = format!(
            "SELECT {GOAL_COLUMNS}
             FROM goals g
             JOIN students s ON s.id = g.student_id
             WHERE s.teacher_id = ?
             ORDER BY g.rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([self.teacher_id], goal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn student_goals(&self, student_id: &str) -> StoreResult<Vec<Goal>> {
        let sql = format!(
            "SELECT {GOAL_COLUMNS}
             FROM goals g
             JOIN students s ON s.id = g.student_id
             WHERE s.teacher_id = ? AND g.student_id = ?
             ORDER BY g.rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map((self.teacher_id, student_id), goal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn goal(&self, goal_id: &str) -> StoreResult<Option<Goal>> {
        let sql = format!(
            "SELECT {GOAL_COLUMNS}
             FROM goals g
             JOIN students s ON s.id = g.student_id
             WHERE s.teacher_id = ? AND g.id = ?"
        );
        let g = self
            .conn
            .query_row(&sql, (self.teacher_id, goal_id), goal_from_row)
            .optional()?;
        Ok(g)
    }

    pub fn add_goal(&self, new: NewGoal) -> StoreResult<Goal> {
        let student = self.require_student(&new.student_id)?;
        let area = new.area.trim().to_string();
        let description = new.description.trim().to_string();
        let goal_grade_level = new.goal_grade_level.trim().to_string();
        let mastery_criteria = new.mastery_criteria.trim().to_string();
        if area.is_empty()
            || description.is_empty()
            || goal_grade_level.is_empty()
            || mastery_criteria.is_empty()
        {
            return Err(StoreError::Validation("all goal fields are required".into()));
        }
        let id = new_id();
        self.conn.execute(
            "INSERT INTO goals(id, student_id, area, description, goal_grade_level, mastery_criteria, active)
             VALUES(?, ?, ?, ?, ?, ?, 1)",
            (
                &id,
                &student.id,
                &area,
                &description,
                &goal_grade_level,
                &mastery_criteria,
            ),
        )?;
        Ok(Goal {
            id,
            student_id: student.id,
            area,
            description,
            goal_grade_level,
            mastery_criteria,
            active: true,
        })
    }

    /// Removes the goal and any assessment items scored against it.
    pub fn delete_goal(&self, goal_id: &str) -> StoreResult<bool> {
        if self.goal(goal_id)?.is_none() {
            return Ok(false);
        }
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM general_assessment_items WHERE goal_id = ?",
            [goal_id],
        )?;
        tx.execute("DELETE FROM goals WHERE id = ?", [goal_id])?;
        tx.commit()?;
        Ok(true)
    }

    pub fn set_goal_active(&self, goal_id: &str, active: bool) -> StoreResult<bool> {
        if self.goal(goal_id)?.is_none() {
            return Ok(false);
        }
        self.conn.execute(
            "UPDATE goals SET active = ? WHERE id = ?",
            (active as i64, goal_id),
        )?;
        Ok(true)
    }

    pub fn general_assessments(&self, student_id: &str) -> StoreResult<Vec<GeneralAssessment>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.student_id, a.date,
                    i.goal_id, i.prompt, i.correct_answer, i.score
             FROM general_assessments a
             JOIN students s ON s.id = a.student_id
             LEFT JOIN general_assessment_items i ON i.assessment_id = a.id
             WHERE s.teacher_id = ? AND a.student_id = ?
             ORDER BY a.rowid, i.idx",
        )?;
        let rows = stmt
            .query_map((self.teacher_id, student_id), |r| {
                let id: String = r.get(0)?;
                let student_id: String = r.get(1)?;
                let date: String = r.get(2)?;
                let goal_id: Option<String> = r.get(3)?;
                let item = match goal_id {
                    Some(goal_id) => {
                        let score: String = r.get(6)?;
                        Some(AssessmentItem {
                            goal_id,
                            prompt: r.get(4)?,
                            correct_answer: r.get(5)?,
                            score: ItemScore::parse(&score).unwrap_or(ItemScore::Incorrect),
                        })
                    }
                    None => None,
                };
                Ok((id, student_id, date, item))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out: Vec<GeneralAssessment> = Vec::new();
        for (id, student_id, date, item) in rows {
            if out.last().map(|a| a.id != id).unwrap_or(true) {
                out.push(GeneralAssessment {
                    id,
                    student_id,
                    date,
                    items: Vec::new(),
                });
            }
            if let (Some(item), Some(a)) = (item, out.last_mut()) {
                a.items.push(item);
            }
        }
        Ok(out)
    }

    /// Saves a scored assessment. Every item must reference one of the
    /// student's own goals.
    pub fn save_general_assessment(
        &self,
        student_id: &str,
        date: &str,
        items: &[NewItem],
    ) -> StoreResult<GeneralAssessment> {
        let student = self.require_student(student_id)?;
        if calc::parse_iso_date(date).is_none() {
            return Err(StoreError::Validation(format!("invalid date: {date}")));
        }
        let goal_ids: Vec<String> = self
            .student_goals(&student.id)?
            .into_iter()
            .map(|g| g.id)
            .collect();
        if let Some(bad) = items.iter().find(|it| !goal_ids.contains(&it.goal_id)) {
            return Err(StoreError::Validation(format!(
                "goal {} does not belong to this student",
                bad.goal_id
            )));
        }

        let id = new_id();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO general_assessments(id, student_id, date) VALUES(?, ?, ?)",
            (&id, &student.id, date),
        )?;
        for (idx, it) in items.iter().enumerate() {
            tx.execute(
                "INSERT INTO general_assessment_items(id, assessment_id, idx, goal_id, prompt, correct_answer, score)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    new_id(),
                    &id,
                    idx as i64,
                    &it.goal_id,
                    &it.prompt,
                    &it.correct_answer,
                    it.score.as_str(),
                ),
            )?;
        }
        tx.commit()?;

        Ok(GeneralAssessment {
            id,
            student_id: student.id,
            date: date.to_string(),
            items: items
                .iter()
                .map(|it| AssessmentItem {
                    goal_id: it.goal_id.clone(),
                    prompt: it.prompt.clone(),
                    correct_answer: it.correct_answer.clone(),
                    score: it.score,
                })
                .collect(),
        })
    }

    pub fn fluency_assessments(&self, student_id: &str) -> StoreResult<Vec<FluencyAssessment>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.id, f.student_id, f.date, f.total_words_attempted, f.errors, f.wcpm, f.accuracy_percent
             FROM fluency_assessments f
             JOIN students s ON s.id = f.student_id
             WHERE s.teacher_id = ? AND f.student_id = ?
             ORDER BY f.rowid",
        )?;
        let rows = stmt
            .query_map((self.teacher_id, student_id), fluency_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn save_fluency_assessment(
        &self,
        student_id: &str,
        date: &str,
        attempted: i64,
        errors: i64,
    ) -> StoreResult<FluencyAssessment> {
        let student = self.require_student(student_id)?;
        if calc::parse_iso_date(date).is_none() {
            return Err(StoreError::Validation(format!("invalid date: {date}")));
        }
        let Some((wcpm, accuracy_percent)) = calc::fluency_metrics(attempted, errors) else {
            return Err(StoreError::Validation(
                "words attempted must be positive and errors between 0 and attempted".into(),
            ));
        };

        let id = new_id();
        self.conn.execute(
            "INSERT INTO fluency_assessments(id, student_id, date, total_words_attempted, errors, wcpm, accuracy_percent)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &student.id,
                date,
                attempted,
                errors,
                wcpm,
                accuracy_percent,
            ),
        )?;
        Ok(FluencyAssessment {
            id,
            student_id: student.id,
            date: date.to_string(),
            total_words_attempted: attempted,
            errors,
            wcpm,
            accuracy_percent,
        })
    }
}
