use crate::error::EngineError;
use crate::models::{score_answers, Question, QuestionKey, Quiz, ScoreResult};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::{fs, path::Path};
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizRecord {
    pub id: i64,
    pub owner_teacher_id: String,
    pub title: String,
    pub course_id: Option<i64>,
    pub questions: Vec<Question>,
}

/// Who an assignment is issued to. Mirrors the wire shape of the clients:
/// `{"courseId": 7}` or `{"studentIds": ["s1", "s2"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssignmentScope {
    Course {
        #[serde(rename = "courseId")]
        course_id: i64,
    },
    Students {
        #[serde(rename = "studentIds")]
        student_ids: BTreeSet<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: i64,
    pub quiz_id: i64,
    pub scope: AssignmentScope,
    pub created_at: DateTime<Utc>,
    /// Frozen scoring contract, taken from the quiz when the assignment was
    /// issued. Later quiz edits never reach it.
    pub answer_key: Vec<QuestionKey>,
}

/// Submission and its result travel as one record, so neither can be
/// persisted without the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub assignment_id: i64,
    pub student_id: String,
    pub answers: Vec<Option<usize>>,
    pub submitted_at: DateTime<Utc>,
    pub result: ScoreResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptStatus {
    Attempted,
    NotAttempted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub status: AttemptStatus,
    #[serde(flatten)]
    pub result: Option<ScoreResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentListItem {
    pub id: i64,
    pub quiz_id: i64,
    pub quiz_title: String,
    pub question_count: usize,
    pub created_at: DateTime<Utc>,
}

pub struct InMemoryDb {
    pub quizzes: RwLock<HashMap<i64, QuizRecord>>,
    pub assignments: RwLock<HashMap<i64, AssignmentRecord>>,
    // Keyed by (assignment_id, student_id): the uniqueness constraint is the
    // map key itself, checked and inserted under one write-lock acquisition.
    pub submissions: RwLock<HashMap<(i64, String), SubmissionRecord>>,
    next_quiz_id: AtomicI64,
    next_assignment_id: AtomicI64,
    next_submission_id: AtomicI64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistentSnapshot {
    quizzes: HashMap<i64, QuizRecord>,
    assignments: HashMap<i64, AssignmentRecord>,
    submissions: Vec<SubmissionRecord>,
    next_quiz_id: i64,
    next_assignment_id: i64,
    next_submission_id: i64,
}

impl InMemoryDb {
    pub fn new(snapshot_path: Option<&str>) -> Self {
        let snapshot = snapshot_path.and_then(|path| {
            let raw = fs::read_to_string(path).ok()?;
            match serde_json::from_str::<PersistentSnapshot>(&raw) {
                Ok(s) => Some(s),
                Err(err) => {
                    warn!("failed to read local snapshot {}: {}", path, err);
                    None
                }
            }
        });

        let quizzes = snapshot
            .as_ref()
            .map(|s| s.quizzes.clone())
            .unwrap_or_default();
        let assignments = snapshot
            .as_ref()
            .map(|s| s.assignments.clone())
            .unwrap_or_default();
        let submissions: HashMap<(i64, String), SubmissionRecord> = snapshot
            .as_ref()
            .map(|s| {
                s.submissions
                    .iter()
                    .map(|sub| ((sub.assignment_id, sub.student_id.clone()), sub.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let next_quiz_id = snapshot
            .as_ref()
            .map(|s| s.next_quiz_id)
            .unwrap_or(1)
            .max(quizzes.keys().max().copied().unwrap_or(0) + 1);
        let next_assignment_id = snapshot
            .as_ref()
            .map(|s| s.next_assignment_id)
            .unwrap_or(1)
            .max(assignments.keys().max().copied().unwrap_or(0) + 1);
        let next_submission_id = snapshot
            .as_ref()
            .map(|s| s.next_submission_id)
            .unwrap_or(1)
            .max(submissions.values().map(|s| s.id).max().unwrap_or(0) + 1);

        Self {
            quizzes: RwLock::new(quizzes),
            assignments: RwLock::new(assignments),
            submissions: RwLock::new(submissions),
            next_quiz_id: AtomicI64::new(next_quiz_id),
            next_assignment_id: AtomicI64::new(next_assignment_id),
            next_submission_id: AtomicI64::new(next_submission_id),
        }
    }

    pub fn next_quiz_id(&self) -> i64 {
        self.next_quiz_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_assignment_id(&self) -> i64 {
        self.next_assignment_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_submission_id(&self) -> i64 {
        self.next_submission_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn snapshot(&self) -> PersistentSnapshot {
        PersistentSnapshot {
            quizzes: self.quizzes.read().await.clone(),
            assignments: self.assignments.read().await.clone(),
            submissions: self.submissions.read().await.values().cloned().collect(),
            next_quiz_id: self.next_quiz_id.load(Ordering::SeqCst),
            next_assignment_id: self.next_assignment_id.load(Ordering::SeqCst),
            next_submission_id: self.next_submission_id.load(Ordering::SeqCst),
        }
    }
}

/// Read-only view onto the course-enrollment collaborator. The engine never
/// stores rosters; it asks at the moment it needs them.
pub trait EnrollmentProvider: Send + Sync {
    fn students_in_course(&self, course_id: i64)
        -> BoxFuture<'static, anyhow::Result<Vec<StudentProfile>>>;
    fn student_profile(&self, student_id: &str)
        -> BoxFuture<'static, anyhow::Result<Option<StudentProfile>>>;
}

/// Roster backed by a JSON file (`ROSTER_PATH`), the deployment shape used
/// while the platform's enrollment service is not wired up yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticRoster {
    #[serde(default)]
    pub courses: HashMap<i64, Vec<StudentProfile>>,
}

impl StaticRoster {
    pub fn from_env() -> Option<Self> {
        let path = std::env::var("ROSTER_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("failed to read roster file {}: {}", path, err);
                return None;
            }
        };
        match serde_json::from_str::<StaticRoster>(&raw) {
            Ok(roster) => Some(roster),
            Err(err) => {
                warn!("failed to parse roster file {}: {}", path, err);
                None
            }
        }
    }

    pub fn with_courses(courses: HashMap<i64, Vec<StudentProfile>>) -> Self {
        Self { courses }
    }
}

impl EnrollmentProvider for StaticRoster {
    fn students_in_course(
        &self,
        course_id: i64,
    ) -> BoxFuture<'static, anyhow::Result<Vec<StudentProfile>>> {
        let roster = self.courses.get(&course_id).cloned().unwrap_or_default();
        Box::pin(async move { Ok(roster) })
    }

    fn student_profile(
        &self,
        student_id: &str,
    ) -> BoxFuture<'static, anyhow::Result<Option<StudentProfile>>> {
        let found = self
            .courses
            .values()
            .flatten()
            .find(|s| s.id == student_id)
            .cloned();
        Box::pin(async move { Ok(found) })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<InMemoryDb>,
    pub enrollment: Arc<dyn EnrollmentProvider>,
    pub local_state_path: Option<String>,
}

// Lock discipline: a method that needs more than one table acquires them in
// quizzes -> assignments -> submissions order; everything else holds at most
// one table lock at a time.
impl AppState {
    pub fn new(enrollment: Arc<dyn EnrollmentProvider>, local_state_path: Option<String>) -> Self {
        Self {
            db: Arc::new(InMemoryDb::new(local_state_path.as_deref())),
            enrollment,
            local_state_path,
        }
    }

    pub async fn create_quiz(&self, owner_teacher_id: &str, quiz: Quiz) -> i64 {
        let id = self.db.next_quiz_id();
        let record = QuizRecord {
            id,
            owner_teacher_id: owner_teacher_id.to_string(),
            title: quiz.title,
            course_id: quiz.course_id,
            questions: quiz.questions,
        };
        self.db.quizzes.write().await.insert(id, record);
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after create_quiz: {}", err);
        }
        id
    }

    pub async fn get_quiz(&self, id: i64, caller: &str) -> Result<QuizRecord, EngineError> {
        let quiz = self
            .db
            .quizzes
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::QuizNotFound)?;
        if quiz.owner_teacher_id != caller {
            return Err(EngineError::Forbidden);
        }
        Ok(quiz)
    }

    pub async fn list_quizzes(&self, owner_teacher_id: &str, course_id: Option<i64>) -> Vec<QuizRecord> {
        let quizzes = self.db.quizzes.read().await;
        let mut items: Vec<QuizRecord> = quizzes
            .values()
            .filter(|q| q.owner_teacher_id == owner_teacher_id)
            .filter(|q| course_id.is_none() || q.course_id == course_id)
            .cloned()
            .collect();
        items.sort_by_key(|q| q.id);
        items
    }

    /// Full replacement of title/course/questions. Re-checks ownership and the
    /// lock state while holding the quizzes write lock, so a submission that
    /// lands first always wins.
    pub async fn update_quiz(&self, id: i64, caller: &str, quiz: Quiz) -> Result<(), EngineError> {
        {
            let mut quizzes = self.db.quizzes.write().await;
            let record = quizzes.get_mut(&id).ok_or(EngineError::QuizNotFound)?;
            if record.owner_teacher_id != caller {
                return Err(EngineError::Forbidden);
            }
            let assignments = self.db.assignments.read().await;
            let submissions = self.db.submissions.read().await;
            let locked = assignments
                .values()
                .filter(|a| a.quiz_id == id)
                .any(|a| submissions.keys().any(|(aid, _)| *aid == a.id));
            if locked {
                return Err(EngineError::Locked);
            }
            record.title = quiz.title;
            record.course_id = quiz.course_id;
            record.questions = quiz.questions;
        }
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after update_quiz: {}", err);
        }
        Ok(())
    }

    /// Hard cascade: the quiz, its assignments, and their submissions go in
    /// one critical section, so no score can outlive its questions.
    pub async fn delete_quiz(&self, id: i64, caller: &str) -> Result<(), EngineError> {
        {
            let mut quizzes = self.db.quizzes.write().await;
            let record = quizzes.get(&id).ok_or(EngineError::QuizNotFound)?;
            if record.owner_teacher_id != caller {
                return Err(EngineError::Forbidden);
            }
            quizzes.remove(&id);

            let mut assignments = self.db.assignments.write().await;
            let removed: BTreeSet<i64> = assignments
                .values()
                .filter(|a| a.quiz_id == id)
                .map(|a| a.id)
                .collect();
            assignments.retain(|_, a| a.quiz_id != id);

            let mut submissions = self.db.submissions.write().await;
            submissions.retain(|(assignment_id, _), _| !removed.contains(assignment_id));
        }
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after delete_quiz: {}", err);
        }
        Ok(())
    }

    /// The new-version path once a quiz is locked: copies it into a fresh
    /// record the owner can edit freely. Existing assignments keep pointing
    /// at the original.
    pub async fn clone_quiz(&self, id: i64, caller: &str) -> Result<i64, EngineError> {
        let source = self.get_quiz(id, caller).await?;
        let new_id = self.db.next_quiz_id();
        let record = QuizRecord {
            id: new_id,
            owner_teacher_id: source.owner_teacher_id,
            title: source.title,
            course_id: source.course_id,
            questions: source.questions,
        };
        self.db.quizzes.write().await.insert(new_id, record);
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after clone_quiz: {}", err);
        }
        Ok(new_id)
    }

    pub async fn assign(
        &self,
        quiz_id: i64,
        caller: &str,
        scope: AssignmentScope,
    ) -> Result<AssignmentRecord, EngineError> {
        let answer_key: Vec<QuestionKey> = {
            let quizzes = self.db.quizzes.read().await;
            let quiz = quizzes.get(&quiz_id).ok_or(EngineError::QuizNotFound)?;
            if quiz.owner_teacher_id != caller {
                return Err(EngineError::Forbidden);
            }
            quiz.questions.iter().map(QuestionKey::of).collect()
        };
        if let AssignmentScope::Students { student_ids } = &scope {
            if student_ids.is_empty() {
                return Err(EngineError::EmptyScope);
            }
        }

        let record = AssignmentRecord {
            id: self.db.next_assignment_id(),
            quiz_id,
            scope,
            created_at: Utc::now(),
            answer_key,
        };
        self.db
            .assignments
            .write()
            .await
            .insert(record.id, record.clone());
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after assign: {}", err);
        }
        Ok(record)
    }

    pub async fn get_assignment(&self, id: i64) -> Result<AssignmentRecord, EngineError> {
        self.db
            .assignments
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::AssignmentNotFound)
    }

    /// Whether `student_id` belongs to the assignment's audience. Course-scope
    /// membership is resolved through the enrollment collaborator.
    pub async fn is_assignee(
        &self,
        assignment: &AssignmentRecord,
        student_id: &str,
    ) -> Result<bool, EngineError> {
        match &assignment.scope {
            AssignmentScope::Students { student_ids } => Ok(student_ids.contains(student_id)),
            AssignmentScope::Course { course_id } => {
                let roster = self
                    .enrollment
                    .students_in_course(*course_id)
                    .await
                    .map_err(EngineError::Enrollment)?;
                Ok(roster.iter().any(|s| s.id == student_id))
            }
        }
    }

    pub async fn assignments_for_student(
        &self,
        student_id: &str,
    ) -> Result<Vec<AssignmentListItem>, EngineError> {
        let assignments: Vec<AssignmentRecord> =
            self.db.assignments.read().await.values().cloned().collect();

        // Resolve each distinct course once, not once per assignment.
        let mut member_of: BTreeSet<i64> = BTreeSet::new();
        let course_ids: BTreeSet<i64> = assignments
            .iter()
            .filter_map(|a| match &a.scope {
                AssignmentScope::Course { course_id } => Some(*course_id),
                AssignmentScope::Students { .. } => None,
            })
            .collect();
        for course_id in course_ids {
            let roster = self
                .enrollment
                .students_in_course(course_id)
                .await
                .map_err(EngineError::Enrollment)?;
            if roster.iter().any(|s| s.id == student_id) {
                member_of.insert(course_id);
            }
        }

        let mut eligible: Vec<AssignmentRecord> = assignments
            .into_iter()
            .filter(|a| match &a.scope {
                AssignmentScope::Students { student_ids } => student_ids.contains(student_id),
                AssignmentScope::Course { course_id } => member_of.contains(course_id),
            })
            .collect();
        eligible.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let quizzes = self.db.quizzes.read().await;
        Ok(eligible
            .into_iter()
            .map(|a| {
                let quiz_title = quizzes
                    .get(&a.quiz_id)
                    .map(|q| q.title.clone())
                    .unwrap_or_default();
                AssignmentListItem {
                    id: a.id,
                    quiz_id: a.quiz_id,
                    quiz_title,
                    question_count: a.answer_key.len(),
                    created_at: a.created_at,
                }
            })
            .collect())
    }

    /// Scores against the assignment's frozen answer key and records
    /// Submission+Result as one unit. The uniqueness check and the insert
    /// share a single write-lock acquisition; a concurrent duplicate always
    /// surfaces as `AlreadySubmitted`.
    pub async fn submit(
        &self,
        assignment_id: i64,
        student_id: &str,
        answers: Vec<Option<usize>>,
    ) -> Result<ScoreResult, EngineError> {
        let key = self.get_assignment(assignment_id).await?.answer_key;

        let result = {
            let mut submissions = self.db.submissions.write().await;
            let entry_key = (assignment_id, student_id.to_string());
            if submissions.contains_key(&entry_key) {
                return Err(EngineError::AlreadySubmitted);
            }
            if answers.len() != key.len() {
                return Err(EngineError::MalformedSubmission {
                    expected: key.len(),
                    got: answers.len(),
                });
            }
            for (i, (k, answer)) in key.iter().zip(&answers).enumerate() {
                if let Some(a) = answer {
                    if *a >= k.option_count {
                        return Err(EngineError::InvalidAnswerIndex { question: i });
                    }
                }
            }

            let result = score_answers(&key, &answers);
            let record = SubmissionRecord {
                id: self.db.next_submission_id(),
                assignment_id,
                student_id: student_id.to_string(),
                answers,
                submitted_at: Utc::now(),
                result,
            };
            submissions.insert(entry_key, record);
            result
        };
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after submit: {}", err);
        }
        Ok(result)
    }

    pub async fn own_submission(
        &self,
        assignment_id: i64,
        student_id: &str,
    ) -> Result<SubmissionRecord, EngineError> {
        self.get_assignment(assignment_id).await?;
        self.db
            .submissions
            .read()
            .await
            .get(&(assignment_id, student_id.to_string()))
            .cloned()
            .ok_or(EngineError::SubmissionNotFound)
    }

    /// Per-assignment report for the owning teacher: the eligible students
    /// left-joined against recorded submissions, filtered by name/email and
    /// ordered by display name.
    pub async fn summarize(
        &self,
        assignment_id: i64,
        caller: &str,
        filter: Option<&str>,
    ) -> Result<Vec<StudentSummary>, EngineError> {
        let assignment = self.get_assignment(assignment_id).await?;
        {
            let quizzes = self.db.quizzes.read().await;
            let quiz = quizzes
                .get(&assignment.quiz_id)
                .ok_or(EngineError::QuizNotFound)?;
            if quiz.owner_teacher_id != caller {
                return Err(EngineError::Forbidden);
            }
        }

        let mut eligible: Vec<StudentProfile> = match &assignment.scope {
            AssignmentScope::Course { course_id } => self
                .enrollment
                .students_in_course(*course_id)
                .await
                .map_err(EngineError::Enrollment)?,
            AssignmentScope::Students { student_ids } => {
                let mut profiles = Vec::with_capacity(student_ids.len());
                for id in student_ids {
                    let profile = self
                        .enrollment
                        .student_profile(id)
                        .await
                        .map_err(EngineError::Enrollment)?
                        .unwrap_or_else(|| StudentProfile {
                            id: id.clone(),
                            name: id.clone(),
                            email: String::new(),
                        });
                    profiles.push(profile);
                }
                profiles
            }
        };

        if let Some(term) = filter.map(str::trim).filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            eligible.retain(|s| {
                s.name.to_lowercase().contains(&term) || s.email.to_lowercase().contains(&term)
            });
        }

        let submissions = self.db.submissions.read().await;
        let mut rows: Vec<StudentSummary> = eligible
            .into_iter()
            .map(|profile| {
                let submission = submissions.get(&(assignment_id, profile.id.clone()));
                StudentSummary {
                    student_id: profile.id,
                    name: profile.name,
                    email: profile.email,
                    status: if submission.is_some() {
                        AttemptStatus::Attempted
                    } else {
                        AttemptStatus::NotAttempted
                    },
                    result: submission.map(|s| s.result),
                }
            })
            .collect();
        rows.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(rows)
    }

    pub async fn persist_core_data(&self) -> anyhow::Result<()> {
        let Some(path) = self.local_state_path.as_ref() else {
            return Ok(());
        };
        let snapshot = self.db.snapshot().await;
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serialized).await?;
        Ok(())
    }
}
