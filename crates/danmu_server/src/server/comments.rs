#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use danmu_domain::Comment;
use danmu_platform::CommentSink;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const DEFAULT_COMMENT_QUEUE_CAPACITY: usize = 4096;

/// Database holding the `comments` table.
#[derive(Clone)]
pub enum CommentBackend {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
	Mysql(sqlx::MySqlPool),
}

impl CommentBackend {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if database_url.starts_with("sqlite:") {
			// In-memory databases exist per connection.
			let max_connections = if database_url.contains(":memory:") { 1 } else { 4 };
			let pool = SqlitePoolOptions::new()
				.max_connections(max_connections)
				.connect(database_url)
				.await
				.context("connect sqlite")?;
			sqlx::migrate!("migrations/sqlite")
				.run(&pool)
				.await
				.context("run sqlite migrations")?;
			Ok(Self::Sqlite(pool))
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
			sqlx::migrate!("migrations/postgres")
				.run(&pool)
				.await
				.context("run postgres migrations")?;
			Ok(Self::Postgres(pool))
		} else if database_url.starts_with("mysql:") || database_url.starts_with("mariadb:") {
			let pool = sqlx::MySqlPool::connect(database_url).await.context("connect mysql")?;
			sqlx::migrate!("migrations/mysql")
				.run(&pool)
				.await
				.context("run mysql migrations")?;
			Ok(Self::Mysql(pool))
		} else {
			Err(anyhow!("unsupported database_url (use sqlite:, postgres:, mysql:)"))
		}
	}

	pub async fn insert(&self, comment: &Comment) -> anyhow::Result<()> {
		let live_id = comment.live_id.get() as i64;
		match self {
			CommentBackend::Sqlite(pool) => {
				sqlx::query("INSERT INTO comments (live_id, content) VALUES (?, ?)")
					.bind(live_id)
					.bind(&comment.content)
					.execute(pool)
					.await
					.context("insert comment (sqlite)")?;
			}
			CommentBackend::Postgres(pool) => {
				sqlx::query("INSERT INTO comments (live_id, content) VALUES ($1, $2)")
					.bind(live_id)
					.bind(&comment.content)
					.execute(pool)
					.await
					.context("insert comment (postgres)")?;
			}
			CommentBackend::Mysql(pool) => {
				sqlx::query("INSERT INTO comments (live_id, content) VALUES (?, ?)")
					.bind(live_id)
					.bind(&comment.content)
					.execute(pool)
					.await
					.context("insert comment (mysql)")?;
			}
		}
		Ok(())
	}
}

/// Fire-and-forget comment writer.
///
/// `insert_comment` only enqueues; a background task performs the inserts in
/// arrival order. A full queue drops the comment.
#[derive(Clone)]
pub struct CommentStore {
	tx: mpsc::Sender<Comment>,
}

impl CommentStore {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		let backend = CommentBackend::connect(database_url).await?;
		Ok(Self::spawn(backend, DEFAULT_COMMENT_QUEUE_CAPACITY))
	}

	pub fn spawn(backend: CommentBackend, capacity: usize) -> Self {
		let (tx, mut rx) = mpsc::channel::<Comment>(capacity.max(1));
		tokio::spawn(async move {
			while let Some(comment) = rx.recv().await {
				if let Err(e) = backend.insert(&comment).await {
					metrics::counter!("danmu_comment_insert_failures_total").increment(1);
					warn!(live_id = %comment.live_id, error = %format!("{e:#}"), "failed to persist comment");
				}
			}
			debug!("comment writer stopped");
		});
		Self { tx }
	}
}

impl CommentSink for CommentStore {
	fn insert_comment(&self, comment: Comment) {
		match self.tx.try_send(comment) {
			Ok(()) => {}
			Err(mpsc::error::TrySendError::Full(c)) => {
				metrics::counter!("danmu_comments_dropped_total").increment(1);
				warn!(live_id = %c.live_id, "comment queue full; dropping comment");
			}
			Err(mpsc::error::TrySendError::Closed(c)) => {
				warn!(live_id = %c.live_id, "comment writer gone; dropping comment");
			}
		}
	}
}
