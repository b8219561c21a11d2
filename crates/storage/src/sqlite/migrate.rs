use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "progress tables",
        statements: &[
            r"
                CREATE TABLE IF NOT EXISTS page_visits (
                    id INTEGER PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    module_id INTEGER NOT NULL CHECK (module_id > 0),
                    section_id INTEGER NOT NULL CHECK (section_id > 0),
                    page_number INTEGER NOT NULL CHECK (page_number > 0),
                    visited_at TEXT NOT NULL
                );
            ",
            r"
                CREATE TABLE IF NOT EXISTS section_completions (
                    user_id TEXT NOT NULL,
                    module_id INTEGER NOT NULL CHECK (module_id > 0),
                    section_id INTEGER NOT NULL CHECK (section_id > 0),
                    total_pages INTEGER NOT NULL CHECK (total_pages >= 0),
                    pages_visited INTEGER NOT NULL CHECK (pages_visited >= 0),
                    quizzes_total INTEGER NOT NULL CHECK (quizzes_total >= 0),
                    quizzes_completed INTEGER NOT NULL CHECK (quizzes_completed >= 0),
                    is_complete INTEGER NOT NULL CHECK (is_complete IN (0, 1)),
                    completed_at TEXT,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, module_id, section_id)
                );
            ",
            r"
                CREATE TABLE IF NOT EXISTS module_progress (
                    user_id TEXT NOT NULL,
                    module_id INTEGER NOT NULL CHECK (module_id > 0),
                    unlocked_section INTEGER NOT NULL CHECK (unlocked_section >= 1),
                    completed INTEGER NOT NULL CHECK (completed IN (0, 1)),
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, module_id)
                );
            ",
            r"
                CREATE INDEX IF NOT EXISTS idx_page_visits_section
                    ON page_visits (user_id, module_id, section_id, visited_at);
            ",
        ],
    },
    Migration {
        version: 2,
        name: "quiz attempts",
        statements: &[
            r"
                CREATE TABLE IF NOT EXISTS quiz_attempts (
                    id INTEGER PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    module_id INTEGER NOT NULL CHECK (module_id > 0),
                    section_id INTEGER NOT NULL CHECK (section_id > 0),
                    page_number INTEGER NOT NULL CHECK (page_number > 0),
                    score INTEGER NOT NULL CHECK (score >= 0),
                    total_questions INTEGER NOT NULL CHECK (total_questions > 0),
                    idempotency_key TEXT,
                    completed_at TEXT NOT NULL,
                    CHECK (score <= total_questions)
                );
            ",
            r"
                CREATE TABLE IF NOT EXISTS quiz_answers (
                    id INTEGER PRIMARY KEY,
                    attempt_id INTEGER NOT NULL,
                    question_index INTEGER NOT NULL CHECK (question_index >= 0),
                    selected_option TEXT NOT NULL,
                    is_correct INTEGER NOT NULL CHECK (is_correct IN (0, 1)),
                    FOREIGN KEY (attempt_id) REFERENCES quiz_attempts(id) ON DELETE CASCADE
                );
            ",
            r"
                CREATE INDEX IF NOT EXISTS idx_quiz_attempts_section
                    ON quiz_attempts (user_id, module_id, section_id, completed_at);
            ",
        ],
    },
    Migration {
        version: 3,
        name: "quiz idempotency keys",
        statements: &[r"
                CREATE TABLE IF NOT EXISTS quiz_idempotency_keys (
                    user_id TEXT NOT NULL,
                    idempotency_key TEXT NOT NULL,
                    attempt_id INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, idempotency_key),
                    FOREIGN KEY (attempt_id) REFERENCES quiz_attempts(id) ON DELETE CASCADE
                );
            "],
    },
];

/// Applies every migration that is not yet recorded in `schema_migrations`.
/// Each version runs in its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    for migration in MIGRATIONS {
        if is_applied(pool, migration.version).await? {
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }
        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(migration.version)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applied database migration"
        );
    }

    Ok(())
}
