use std::fmt;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use progress_core::Curriculum;
use progress_core::model::{QuizAnswer, UserId};
use services::{
    Clock, DegradedMode, ModuleRequest, PageVisitRequest, ProgressError, ProgressTracker,
    QuizCompletionRequest, SectionRequest, TrackerConfig,
};
use storage::repository::Storage;

#[derive(Debug)]
enum CliError {
    InvalidDbUrl { raw: String },
    Curriculum { path: PathBuf, reason: String },
    Tracker(ProgressError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            CliError::Curriculum { path, reason } => {
                write!(f, "cannot load curriculum {}: {reason}", path.display())
            }
            CliError::Tracker(err) => write!(f, "{}: {err}", err.kind()),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ProgressError> for CliError {
    fn from(err: ProgressError) -> Self {
        CliError::Tracker(err)
    }
}

/// Records learner progress and answers unlock questions against a `SQLite` store.
#[derive(Parser, Debug)]
#[command(name = "bizen-progress", version, about)]
struct Cli {
    /// `SQLite` database URL or path.
    #[arg(long = "db", env = "BIZEN_DB_URL", default_value = "sqlite:bizen-progress.sqlite3")]
    db_url: String,

    /// Answer to give `check` when the store cannot be read.
    #[arg(long, env = "BIZEN_DEGRADED_MODE", default_value_t = DegradedMode::Strict)]
    degraded_mode: DegradedMode,

    /// JSON file describing sections per module and per-section layouts.
    #[arg(long, env = "BIZEN_CURRICULUM")]
    curriculum: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Clone)]
struct SectionArgs {
    #[arg(long)]
    user: Option<UserId>,
    #[arg(long, allow_negative_numbers = true)]
    module: i64,
    #[arg(long, allow_negative_numbers = true)]
    section: i64,
}

impl SectionArgs {
    fn request(&self) -> SectionRequest {
        SectionRequest {
            user_id: self.user,
            module_id: self.module,
            section_id: self.section,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a page visit.
    Visit {
        #[command(flatten)]
        target: SectionArgs,
        #[arg(long, allow_negative_numbers = true)]
        page: i64,
        #[arg(long)]
        total_pages: Option<u32>,
        #[arg(long)]
        quizzes_total: Option<u32>,
    },
    /// Record a completed quiz.
    Quiz {
        #[command(flatten)]
        target: SectionArgs,
        #[arg(long, allow_negative_numbers = true)]
        page: i64,
        #[arg(long, allow_negative_numbers = true)]
        score: i64,
        #[arg(long, allow_negative_numbers = true)]
        total_questions: i64,
        /// Answers as a JSON array of `{questionIndex, selectedOption, isCorrect}`.
        #[arg(long)]
        answers: Option<String>,
        #[arg(long)]
        idempotency_key: Option<String>,
        #[arg(long)]
        total_pages: Option<u32>,
        #[arg(long)]
        quizzes_total: Option<u32>,
    },
    /// Check whether a section is unlocked.
    Check {
        #[command(flatten)]
        target: SectionArgs,
    },
    /// Mark a section complete regardless of its counters.
    ForceComplete {
        #[command(flatten)]
        target: SectionArgs,
    },
    /// Take back one completed quiz.
    ResetQuiz {
        #[command(flatten)]
        target: SectionArgs,
    },
    /// Show every section of a module.
    Overview {
        #[arg(long)]
        user: Option<UserId>,
        #[arg(long, allow_negative_numbers = true)]
        module: i64,
    },
    /// Delete all progress of one learner.
    Wipe {
        #[arg(long)]
        user: Option<UserId>,
    },
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") || raw.starts_with("sqlite:file:") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" || db_url.starts_with("sqlite:file:") {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| CliError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(CliError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn load_curriculum(path: &Path) -> Result<Curriculum, CliError> {
    let fail = |reason: String| CliError::Curriculum {
        path: path.to_path_buf(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let curriculum: Curriculum = serde_json::from_str(&raw).map_err(|e| fail(e.to_string()))?;
    curriculum.validate().map_err(|e| fail(e.to_string()))?;
    Ok(curriculum)
}

async fn execute(
    tracker: &ProgressTracker,
    command: Command,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let value = match command {
        Command::Visit {
            target,
            page,
            total_pages,
            quizzes_total,
        } => {
            let res = tracker
                .record_page_visit(PageVisitRequest {
                    user_id: target.user,
                    module_id: target.module,
                    section_id: target.section,
                    page_number: page,
                    total_pages,
                    quizzes_total,
                })
                .await
                .map_err(CliError::from)?;
            serde_json::to_value(res)?
        }
        Command::Quiz {
            target,
            page,
            score,
            total_questions,
            answers,
            idempotency_key,
            total_pages,
            quizzes_total,
        } => {
            let answers: Vec<QuizAnswer> = match answers {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Vec::new(),
            };
            let res = tracker
                .record_quiz_completion(QuizCompletionRequest {
                    user_id: target.user,
                    module_id: target.module,
                    section_id: target.section,
                    page_number: page,
                    score,
                    total_questions,
                    answers,
                    idempotency_key,
                    total_pages,
                    quizzes_total,
                })
                .await
                .map_err(CliError::from)?;
            serde_json::to_value(res)?
        }
        Command::Check { target } => {
            let res = tracker
                .check_access(target.request())
                .await
                .map_err(CliError::from)?;
            serde_json::to_value(res)?
        }
        Command::ForceComplete { target } => {
            let res = tracker
                .force_complete_section(target.request())
                .await
                .map_err(CliError::from)?;
            serde_json::to_value(res)?
        }
        Command::ResetQuiz { target } => {
            let res = tracker
                .reset_quiz(target.request())
                .await
                .map_err(CliError::from)?;
            serde_json::to_value(res)?
        }
        Command::Overview { user, module } => {
            let res = tracker
                .module_overview(ModuleRequest {
                    user_id: user,
                    module_id: module,
                })
                .await
                .map_err(CliError::from)?;
            serde_json::to_value(res)?
        }
        Command::Wipe { user } => {
            let res = tracker.wipe_user(user).await.map_err(CliError::from)?;
            serde_json::to_value(res)?
        }
    };
    Ok(value)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = TrackerConfig::default().with_degraded_mode(cli.degraded_mode);
    if let Some(path) = &cli.curriculum {
        config = config.with_curriculum(load_curriculum(path)?);
    }

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    let db_url = normalize_sqlite_url(cli.db_url);
    prepare_sqlite_file(&db_url)?;
    let storage = Storage::sqlite(&db_url).await?;
    tracing::debug!(db_url = %db_url, degraded_mode = %config.degraded_mode, "storage ready");

    let tracker = ProgressTracker::from_storage(Clock::system(), &storage).with_config(config);
    let output = execute(&tracker, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "bizen_progress=info,services=info,storage=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
