use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, FromRow, SqliteConnection};

use super::TurnStore;
use super::error::{
    CreateSqliteDirectorySnafu, InvariantViolationSnafu, NotFoundSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu,
    SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu, StorageError, StorageResult,
};
use super::ids::{SessionId, TurnId};
use super::types::{ChatTurn, NewChatTurn, TokenCounts, TurnRole};

const TURN_COLUMNS: &str = "id, session_id, role, author, created_at, message, payload_json, stack_trace, response_time_ms, input_tokens, output_tokens, total_tokens, deleted";

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        // Every store call opens its own connection; the pool only bootstraps the schema.
        pool.close().await;

        tracing::info!(database_url = %database_url, "opened sqlite chat store");
        Ok(Self { database_url })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Store traits are sync, so each call executes on a dedicated worker thread
        // with its own current-thread runtime to avoid nested-runtime blocking panics.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl TurnStore for SqliteStorage {
    fn insert_turn(&self, input: NewChatTurn) -> StorageResult<ChatTurn> {
        let database_url = self.database_url.clone();
        self.run_db_call("turn-insert", async move {
            let mut connection = connect_store_connection(&database_url, "turn-insert-connect").await?;
            let turn = ChatTurn {
                id: TurnId::new_v7(),
                session_id: input.session_id,
                role: input.role,
                author: input.author,
                created_at_unix_millis: unix_timestamp_millis(),
                message: input.message,
                payload_json: input.payload_json,
                stack_trace: input.stack_trace,
                response_time_ms: input.response_time_ms,
                token_usage: input.token_usage,
                deleted: false,
            };
            let row = TurnRow::from_turn(&turn)?;

            sqlx::query(
                "INSERT INTO chat_turns (id, session_id, role, author, created_at, message, payload_json, stack_trace, response_time_ms, input_tokens, output_tokens, total_tokens, deleted) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(row.id)
            .bind(row.session_id)
            .bind(row.role)
            .bind(row.author)
            .bind(row.created_at)
            .bind(row.message)
            .bind(row.payload_json)
            .bind(row.stack_trace)
            .bind(row.response_time_ms)
            .bind(row.input_tokens)
            .bind(row.output_tokens)
            .bind(row.total_tokens)
            .bind(row.deleted)
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "turn-insert-apply",
            })?;

            tracing::debug!(
                turn_id = %turn.id,
                session_id = %turn.session_id,
                role = turn.role.as_str(),
                "inserted chat turn"
            );
            Ok(turn)
        })
    }

    fn update_turns(&self, turns: Vec<ChatTurn>) -> StorageResult<Vec<ChatTurn>> {
        let database_url = self.database_url.clone();
        self.run_db_call("turn-update", async move {
            let mut connection = connect_store_connection(&database_url, "turn-update-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "turn-update-begin",
            })?;

            // Identity columns (id, session, role, timestamp) never change after insert.
            for turn in &turns {
                let row = TurnRow::from_turn(turn)?;
                let result = sqlx::query(
                    "UPDATE chat_turns SET author = ?, message = ?, payload_json = ?, stack_trace = ?, response_time_ms = ?, input_tokens = ?, output_tokens = ?, total_tokens = ?, deleted = ? WHERE id = ?",
                )
                .bind(row.author)
                .bind(row.message)
                .bind(row.payload_json)
                .bind(row.stack_trace)
                .bind(row.response_time_ms)
                .bind(row.input_tokens)
                .bind(row.output_tokens)
                .bind(row.total_tokens)
                .bind(row.deleted)
                .bind(row.id)
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "turn-update-apply",
                })?;

                if result.rows_affected() == 0 {
                    return NotFoundSnafu {
                        stage: "turn-update-missing",
                        entity: "chat_turn",
                        id: turn.id.to_string(),
                    }
                    .fail();
                }
            }

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "turn-update-commit",
            })?;

            Ok(turns)
        })
    }

    fn get_turn(&self, turn_id: TurnId) -> StorageResult<Option<ChatTurn>> {
        let database_url = self.database_url.clone();
        self.run_db_call("turn-get", async move {
            let mut connection = connect_store_connection(&database_url, "turn-get-connect").await?;
            let row = sqlx::query_as::<_, TurnRow>(&format!(
                "SELECT {TURN_COLUMNS} FROM chat_turns WHERE id = ?"
            ))
            .bind(turn_id.to_string())
            .fetch_optional(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "turn-get-query",
            })?;

            row.map(TurnRow::into_turn).transpose()
        })
    }

    fn list_session_turns(&self, session_id: SessionId) -> StorageResult<Vec<ChatTurn>> {
        let database_url = self.database_url.clone();
        self.run_db_call("turn-list", async move {
            let mut connection = connect_store_connection(&database_url, "turn-list-connect").await?;
            let rows = sqlx::query_as::<_, TurnRow>(&format!(
                "SELECT {TURN_COLUMNS} FROM chat_turns WHERE session_id = ? AND deleted = 0 ORDER BY created_at DESC, id DESC"
            ))
            .bind(session_id.to_string())
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "turn-list-query",
            })?;

            rows.into_iter().map(TurnRow::into_turn).collect()
        })
    }
}

#[derive(Debug, FromRow)]
struct TurnRow {
    id: String,
    session_id: String,
    role: String,
    author: String,
    created_at: i64,
    message: String,
    payload_json: Option<String>,
    stack_trace: Option<String>,
    response_time_ms: Option<i64>,
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
    total_tokens: Option<i64>,
    deleted: bool,
}

impl TurnRow {
    fn from_turn(turn: &ChatTurn) -> StorageResult<Self> {
        let usage = turn.token_usage;
        Ok(Self {
            id: turn.id.to_string(),
            session_id: turn.session_id.to_string(),
            role: role_to_sql(turn.role).to_string(),
            author: turn.author.clone(),
            created_at: u64_to_i64(turn.created_at_unix_millis, "turn-row-created-at")?,
            message: turn.message.clone(),
            payload_json: turn.payload_json.clone(),
            stack_trace: turn.stack_trace.clone(),
            response_time_ms: turn
                .response_time_ms
                .map(|value| u64_to_i64(value, "turn-row-response-time"))
                .transpose()?,
            input_tokens: usage
                .map(|usage| u64_to_i64(usage.input_tokens, "turn-row-input-tokens"))
                .transpose()?,
            output_tokens: usage
                .map(|usage| u64_to_i64(usage.output_tokens, "turn-row-output-tokens"))
                .transpose()?,
            total_tokens: usage
                .map(|usage| u64_to_i64(usage.total_tokens, "turn-row-total-tokens"))
                .transpose()?,
            deleted: turn.deleted,
        })
    }

    fn into_turn(self) -> StorageResult<ChatTurn> {
        let token_usage = match (self.input_tokens, self.output_tokens, self.total_tokens) {
            (Some(input), Some(output), Some(total)) => Some(TokenCounts {
                input_tokens: i64_to_u64(input, "turn-row-input-tokens")?,
                output_tokens: i64_to_u64(output, "turn-row-output-tokens")?,
                total_tokens: i64_to_u64(total, "turn-row-total-tokens")?,
            }),
            _ => None,
        };

        Ok(ChatTurn {
            id: TurnId::parse(&self.id)?,
            session_id: SessionId::parse(&self.session_id)?,
            role: role_from_sql(&self.role)?,
            author: self.author,
            created_at_unix_millis: i64_to_u64(self.created_at, "turn-row-created-at")?,
            message: self.message,
            payload_json: self.payload_json,
            stack_trace: self.stack_trace,
            response_time_ms: self
                .response_time_ms
                .map(|value| i64_to_u64(value, "turn-row-response-time"))
                .transpose()?,
            token_usage,
            deleted: self.deleted,
        })
    }
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-busy-timeout",
            pragma: "busy_timeout",
        })?;

    Ok(connection)
}

fn role_to_sql(role: TurnRole) -> &'static str {
    role.as_str()
}

fn role_from_sql(raw: &str) -> StorageResult<TurnRole> {
    match raw {
        "user" => Ok(TurnRole::User),
        "assistant" => Ok(TurnRole::Assistant),
        "system_error" => Ok(TurnRole::SystemError),
        _ => InvariantViolationSnafu {
            stage: "turn-role-from-sql",
            details: format!("unknown turn role '{raw}'"),
        }
        .fail(),
    }
}

fn unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn u64_to_i64(value: u64, stage: &'static str) -> StorageResult<i64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("u64 '{value}' cannot map to sqlite i64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    format!("sqlite://{database_location}")
}
