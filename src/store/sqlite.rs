use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use super::{
    ContestStandingStore, ExecutionResultStore, ProblemStore, SubmissionStore, TestCaseStore,
};
use crate::models::{
    ContestId, ContestStanding, ExecutionResult, NewSubmission, Problem, ProblemId, Submission,
    SubmissionId, SubmissionStatus, TestCase, UserId,
};

const DATABASE_NAME: &str = "oj-judge.sqlite3";

pub fn get_db_path() -> Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs =
        ProjectDirs::from("", "", "oj-judge").context("Unable to find user directory")?;
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir).context("Failed to create local data dir")?;

    Ok(data_dir.join(DATABASE_NAME))
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // Remove WAL and SHM files (ignore errors as they might not exist)
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

fn timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Store backed by a SQLite database file
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and its schema
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display()); // rwc = read/write/create
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .connect(&db_url)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.as_ref().display()))?;

        // PRAGMA statements cannot run inside a transaction
        for pragma_sql in &[
            "PRAGMA foreign_keys = ON;",
            "PRAGMA busy_timeout = 2000;",
            "PRAGMA journal_mode = WAL;",
            "PRAGMA synchronous = NORMAL;",
        ] {
            sqlx::query(pragma_sql).execute(&pool).await?;
        }

        let mut tx = pool.begin().await?;
        for sql in &[
            r"
            CREATE TABLE IF NOT EXISTS problems (
                id            INTEGER  PRIMARY KEY,
                contest_id    INTEGER  NOT NULL,
                title         TEXT     NOT NULL,
                time_limit    REAL     NOT NULL DEFAULT 1.0,
                memory_limit  INTEGER  NOT NULL DEFAULT 256,
                weight        INTEGER  NOT NULL DEFAULT 1
            );",
            r"
            CREATE TABLE IF NOT EXISTS test_cases (
                id               INTEGER  PRIMARY KEY,
                problem_id       INTEGER  NOT NULL,
                input            TEXT     NOT NULL,
                expected_output  TEXT     NOT NULL,
                weight           INTEGER  NOT NULL DEFAULT 1,
                is_sample        INTEGER  NOT NULL DEFAULT 0,
                FOREIGN KEY (problem_id)  REFERENCES problems (id)
            );",
            r"
            CREATE TABLE IF NOT EXISTS submissions (
                id            INTEGER  PRIMARY KEY AUTOINCREMENT,
                user_id       INTEGER  NOT NULL,
                problem_id    INTEGER  NOT NULL,
                contest_id    INTEGER  NOT NULL,
                language      TEXT     NOT NULL,
                source_code   TEXT     NOT NULL,
                submitted_at  TEXT     NOT NULL,
                status        TEXT     NOT NULL,
                score         INTEGER  NOT NULL DEFAULT 0,
                FOREIGN KEY (problem_id)  REFERENCES problems (id)
            );",
            r"
            CREATE TABLE IF NOT EXISTS execution_results (
                submission_id  INTEGER  NOT NULL,
                test_case_id   INTEGER  NOT NULL,
                status         TEXT     NOT NULL,
                time_us        INTEGER  NOT NULL,
                memory_kb      INTEGER  NOT NULL,
                error          TEXT     NOT NULL DEFAULT '',
                PRIMARY KEY (submission_id, test_case_id),
                FOREIGN KEY (submission_id)  REFERENCES submissions (id)
            );",
            r"
            CREATE TABLE IF NOT EXISTS contest_standings (
                contest_id   INTEGER  NOT NULL,
                user_id      INTEGER  NOT NULL,
                total_score  INTEGER  NOT NULL,
                solved       INTEGER  NOT NULL,
                penalty      INTEGER  NOT NULL,
                rank         INTEGER  NOT NULL,
                PRIMARY KEY (contest_id, user_id)
            );",
            "CREATE INDEX IF NOT EXISTS submissions_by_user ON submissions (contest_id, problem_id, user_id);",
        ] {
            sqlx::query(sql).execute(tx.as_mut()).await?;
        }
        tx.commit().await?;

        log::info!("Initialized database at {}", db_path.as_ref().display());
        Ok(Self { pool })
    }
}

#[derive(sqlx::FromRow)]
struct ProblemRow {
    id: u32,
    contest_id: u32,
    title: String,
    time_limit: f64,
    memory_limit: u32,
    weight: u32,
}

impl From<ProblemRow> for Problem {
    fn from(row: ProblemRow) -> Self {
        Self {
            id: row.id,
            contest_id: row.contest_id,
            title: row.title,
            time_limit: row.time_limit,
            memory_limit: row.memory_limit,
            weight: row.weight,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TestCaseRow {
    id: u32,
    problem_id: u32,
    input: String,
    expected_output: String,
    weight: u32,
    is_sample: bool,
}

impl From<TestCaseRow> for TestCase {
    fn from(row: TestCaseRow) -> Self {
        Self {
            id: row.id,
            problem_id: row.problem_id,
            input: row.input,
            expected_output: row.expected_output,
            weight: row.weight,
            is_sample: row.is_sample,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: u32,
    user_id: u32,
    problem_id: u32,
    contest_id: u32,
    language: String,
    source_code: String,
    submitted_at: String,
    status: String,
    score: u32,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = anyhow::Error;

    fn try_from(row: SubmissionRow) -> Result<Self> {
        let submitted_at = DateTime::parse_from_rfc3339(&row.submitted_at)
            .with_context(|| format!("Submission {} has a malformed timestamp", row.id))?
            .with_timezone(&Utc);
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            problem_id: row.problem_id,
            contest_id: row.contest_id,
            language: row.language,
            source_code: row.source_code,
            submitted_at,
            status: row.status.parse()?,
            score: row.score,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionResultRow {
    submission_id: u32,
    test_case_id: u32,
    status: String,
    time_us: i64,
    memory_kb: i64,
    error: String,
}

impl TryFrom<ExecutionResultRow> for ExecutionResult {
    type Error = anyhow::Error;

    fn try_from(row: ExecutionResultRow) -> Result<Self> {
        Ok(Self {
            submission_id: row.submission_id,
            test_case_id: row.test_case_id,
            status: row.status.parse()?,
            time_us: row.time_us.max(0) as u64,
            memory_kb: row.memory_kb.max(0) as u64,
            error: row.error,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StandingRow {
    contest_id: u32,
    user_id: u32,
    total_score: u32,
    solved: u32,
    penalty: u32,
    rank: u32,
}

impl From<StandingRow> for ContestStanding {
    fn from(row: StandingRow) -> Self {
        Self {
            contest_id: row.contest_id,
            user_id: row.user_id,
            total_score: row.total_score,
            solved: row.solved,
            penalty: row.penalty,
            rank: row.rank,
        }
    }
}

const SUBMISSION_COLUMNS: &str =
    "id, user_id, problem_id, contest_id, language, source_code, submitted_at, status, score";

#[async_trait]
impl ProblemStore for SqliteStore {
    async fn get(&self, id: ProblemId) -> Result<Option<Problem>> {
        let row = sqlx::query_as::<_, ProblemRow>(
            "SELECT id, contest_id, title, time_limit, memory_limit, weight FROM problems WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Problem::from))
    }

    async fn list_by_contest(&self, contest_id: ContestId) -> Result<Vec<Problem>> {
        let rows = sqlx::query_as::<_, ProblemRow>(
            r"
            SELECT id, contest_id, title, time_limit, memory_limit, weight
            FROM problems
            WHERE contest_id = ?
            ORDER BY id
            ",
        )
        .bind(contest_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Problem::from).collect())
    }

    async fn create(&self, problem: &Problem) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO problems (id, contest_id, title, time_limit, memory_limit, weight)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(problem.id)
        .bind(problem.contest_id)
        .bind(&problem.title)
        .bind(problem.time_limit)
        .bind(problem.memory_limit)
        .bind(problem.weight)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TestCaseStore for SqliteStore {
    async fn list_by_problem(&self, problem_id: ProblemId) -> Result<Vec<TestCase>> {
        let rows = sqlx::query_as::<_, TestCaseRow>(
            r"
            SELECT id, problem_id, input, expected_output, weight, is_sample
            FROM test_cases
            WHERE problem_id = ?
            ORDER BY id
            ",
        )
        .bind(problem_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TestCase::from).collect())
    }

    async fn create(&self, test_case: &TestCase) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO test_cases (id, problem_id, input, expected_output, weight, is_sample)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(test_case.id)
        .bind(test_case.problem_id)
        .bind(&test_case.input)
        .bind(&test_case.expected_output)
        .bind(test_case.weight)
        .bind(test_case.is_sample)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for SqliteStore {
    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>> {
        let row = sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Submission::try_from).transpose()
    }

    async fn create(&self, new: &NewSubmission) -> Result<Submission> {
        let result = sqlx::query(
            r"
            INSERT INTO submissions (user_id, problem_id, contest_id, language, source_code, submitted_at, status, score)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            ",
        )
        .bind(new.user_id)
        .bind(new.problem_id)
        .bind(new.contest_id)
        .bind(&new.language)
        .bind(&new.source_code)
        .bind(timestamp(&new.submitted_at))
        .bind(SubmissionStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        let id = u32::try_from(result.last_insert_rowid())
            .map_err(|_| anyhow!("Submission id out of range"))?;
        log::debug!("Created submission {id}");

        Ok(Submission {
            id,
            user_id: new.user_id,
            problem_id: new.problem_id,
            contest_id: new.contest_id,
            language: new.language.clone(),
            source_code: new.source_code.clone(),
            submitted_at: new.submitted_at,
            status: SubmissionStatus::Pending,
            score: 0,
        })
    }

    async fn update_status(&self, id: SubmissionId, status: SubmissionStatus) -> Result<()> {
        let updated = sqlx::query("UPDATE submissions SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(anyhow!("Submission {id} does not exist"));
        }
        Ok(())
    }

    async fn update_score(&self, id: SubmissionId, score: u32) -> Result<()> {
        let updated = sqlx::query("UPDATE submissions SET score = ? WHERE id = ?")
            .bind(score)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(anyhow!("Submission {id} does not exist"));
        }
        Ok(())
    }

    async fn list_for_user(
        &self,
        contest_id: ContestId,
        problem_id: ProblemId,
        user_id: UserId,
    ) -> Result<Vec<Submission>> {
        let rows = sqlx::query_as::<_, SubmissionRow>(&format!(
            r"
            SELECT {SUBMISSION_COLUMNS}
            FROM submissions
            WHERE contest_id = ? AND problem_id = ? AND user_id = ?
            ORDER BY submitted_at, id
            "
        ))
        .bind(contest_id)
        .bind(problem_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Submission::try_from).collect()
    }

    async fn list_pending(&self) -> Result<Vec<SubmissionId>> {
        let ids = sqlx::query_scalar::<_, u32>(
            "SELECT id FROM submissions WHERE status = ? ORDER BY submitted_at, id",
        )
        .bind(SubmissionStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl ExecutionResultStore for SqliteStore {
    async fn clear_for_submission(&self, submission_id: SubmissionId) -> Result<()> {
        let removed = sqlx::query("DELETE FROM execution_results WHERE submission_id = ?")
            .bind(submission_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        log::debug!("Cleared {removed} results of submission {submission_id}");
        Ok(())
    }

    async fn create(&self, result: &ExecutionResult) -> Result<()> {
        self.create_many(std::slice::from_ref(result)).await
    }

    async fn create_many(&self, results: &[ExecutionResult]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for result in results {
            sqlx::query(
                r"
                INSERT INTO execution_results (submission_id, test_case_id, status, time_us, memory_kb, error)
                VALUES (?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(result.submission_id)
            .bind(result.test_case_id)
            .bind(result.status.as_str())
            .bind(i64::try_from(result.time_us).unwrap_or(i64::MAX))
            .bind(i64::try_from(result.memory_kb).unwrap_or(i64::MAX))
            .bind(&result.error)
            .execute(tx.as_mut())
            .await
            .with_context(|| format!("Failed to insert result of test case {}", result.test_case_id))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_by_submission(&self, submission_id: SubmissionId) -> Result<Vec<ExecutionResult>> {
        let rows = sqlx::query_as::<_, ExecutionResultRow>(
            r"
            SELECT submission_id, test_case_id, status, time_us, memory_kb, error
            FROM execution_results
            WHERE submission_id = ?
            ORDER BY test_case_id
            ",
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ExecutionResult::try_from).collect()
    }
}

#[async_trait]
impl ContestStandingStore for SqliteStore {
    async fn upsert(&self, standing: &ContestStanding) -> Result<()> {
        self.upsert_many(std::slice::from_ref(standing)).await
    }

    async fn upsert_many(&self, standings: &[ContestStanding]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for standing in standings {
            sqlx::query(
                r"
                INSERT INTO contest_standings (contest_id, user_id, total_score, solved, penalty, rank)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (contest_id, user_id) DO UPDATE SET
                    total_score = excluded.total_score,
                    solved = excluded.solved,
                    penalty = excluded.penalty,
                    rank = excluded.rank
                ",
            )
            .bind(standing.contest_id)
            .bind(standing.user_id)
            .bind(standing.total_score)
            .bind(standing.solved)
            .bind(standing.penalty)
            .bind(standing.rank)
            .execute(tx.as_mut())
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_by_contest(&self, contest_id: ContestId) -> Result<Vec<ContestStanding>> {
        let rows = sqlx::query_as::<_, StandingRow>(
            r"
            SELECT contest_id, user_id, total_score, solved, penalty, rank
            FROM contest_standings
            WHERE contest_id = ?
            ORDER BY rank, user_id
            ",
        )
        .bind(contest_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ContestStanding::from).collect())
    }
}
