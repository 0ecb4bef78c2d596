use crate::config::Config;
use crate::model::Book;
use anyhow::Result;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_books.sql", include_str!("migrations/001_books.sql"))];

const BOOK_COLUMNS: &str = "id, title, author, review, date_added";

pub struct Database {
    db: LibsqlDatabase,
    conn: Connection,
    tx_lock: Mutex<()>,
    turso_url: Option<String>,
    turso_auth_token: Option<String>,
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_replica(turso_url: &Option<String>, turso_auth_token: &Option<String>) -> bool {
        turso_url.is_some() && turso_auth_token.is_some()
    }

    pub async fn sync(&self) -> Result<()> {
        if Self::is_replica(&self.turso_url, &self.turso_auth_token) {
            self.db
                .sync()
                .await
                .map_err(|e| anyhow::anyhow!("sync failed: {}", e))?;
        }
        Ok(())
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    /// Opens the store configured in `cfg`, relative to `data_dir`.
    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(cfg.app.get_db());
        let turso_url = cfg.app.turso_url.clone();
        let turso_auth_token = cfg.app.turso_auth_token.clone();

        let db = match (&turso_url, &turso_auth_token) {
            (Some(url), Some(token)) => {
                tracing::info!("[db] running in synced database mode (offline writes)");
                let sync_interval = Duration::from_secs(cfg.app.sync_interval_seconds);
                Builder::new_synced_database(&path, url.clone(), token.clone())
                    .sync_interval(sync_interval)
                    .build()
                    .await?
            }
            _ => {
                tracing::info!(path = ?path, "[db] running in local mode");
                Builder::new_local(&path).build().await?
            }
        };

        Self::setup(db, turso_url, turso_auth_token).await
    }

    /// Opens a plain local store at `path`.
    pub async fn open_local(path: &Path) -> Result<Self> {
        let db = Builder::new_local(path).build().await?;
        Self::setup(db, None, None).await
    }

    async fn setup(
        db: LibsqlDatabase,
        turso_url: Option<String>,
        turso_auth_token: Option<String>,
    ) -> Result<Self> {
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;

        for (filename, sql) in SYSTEM_MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        for (filename, sql) in MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        Ok(Database {
            db,
            conn,
            tx_lock: Mutex::new(()),
            turso_url,
            turso_auth_token,
        })
    }

    fn row_to_book(row: &libsql::Row) -> Result<Book> {
        let date_added: String = row.get(4)?;
        let date_added = DateTime::parse_from_rfc3339(&date_added)
            .map_err(|e| anyhow::anyhow!("invalid date_added {date_added:?}: {e}"))?
            .with_timezone(&Utc);

        Ok(Book {
            id: row.get(0)?,
            title: row.get(1)?,
            author: row.get(2)?,
            review: row.get(3)?,
            date_added,
        })
    }

    pub async fn list_books_by_date_added(&self) -> Result<Vec<Book>> {
        let query = format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY date_added ASC, id ASC");

        let mut rows = self.conn.query(&query, ()).await?;
        let mut books = Vec::new();

        while let Some(row) = rows.next().await? {
            books.push(Self::row_to_book(&row)?);
        }

        Ok(books)
    }

    pub async fn count_books(&self) -> Result<usize> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM books", ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as usize),
            None => Ok(0),
        }
    }

    pub async fn get_book_by_id(&self, book_id: i64) -> Result<Option<Book>> {
        let query = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?");

        let mut rows = self.conn.query(&query, libsql::params![book_id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_book(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Exact match on already normalized values; used for the duplicate check on add.
    pub async fn find_book_by_title_author(&self, title: &str, author: &str) -> Result<Option<Book>> {
        let query = format!("SELECT {BOOK_COLUMNS} FROM books WHERE title = ? AND author = ? ORDER BY id LIMIT 1");

        let mut rows = self.conn.query(&query, libsql::params![title, author]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_book(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn create_book(&self, title: &str, author: &str, review: f64) -> Result<Book> {
        let _guard = self.tx_lock.lock().await;

        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        let result: Result<Book> = async {
            let query = format!(
                r#"
                INSERT INTO books (title, author, review, date_added)
                VALUES (?, ?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                RETURNING {BOOK_COLUMNS}
                "#
            );

            let mut rows = self.conn.query(&query, libsql::params![title, author, review]).await?;

            match rows.next().await? {
                Some(row) => Self::row_to_book(&row),
                None => anyhow::bail!("Failed to create book"),
            }
        }
        .await;

        self.finish_transaction(result).await
    }

    /// Overwrites the editable fields of `book` and, once committed, mirrors
    /// them onto `book`. `id` and `date_added` never change.
    pub async fn update_book(&self, book: &mut Book, title: &str, author: &str, review: f64) -> Result<()> {
        let _guard = self.tx_lock.lock().await;

        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            let updated = self
                .conn
                .execute(
                    "UPDATE books SET title = ?, author = ?, review = ? WHERE id = ?",
                    libsql::params![title, author, review, book.id],
                )
                .await?;
            if updated == 0 {
                anyhow::bail!("book {} no longer exists", book.id);
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        self.finish_transaction(result).await?;

        book.title = title.to_string();
        book.author = author.to_string();
        book.review = review;
        Ok(())
    }

    pub async fn delete_book(&self, book: &Book) -> Result<()> {
        let _guard = self.tx_lock.lock().await;

        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            self.conn
                .execute("DELETE FROM books WHERE id = ?", libsql::params![book.id])
                .await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        self.finish_transaction(result).await
    }

    /// Commits on success, rolls back on any failure including a failed commit.
    async fn finish_transaction<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => match self.conn.execute("COMMIT", ()).await {
                Ok(_) => Ok(value),
                Err(e) => {
                    if let Err(rollback_err) = self.conn.execute("ROLLBACK", ()).await {
                        tracing::error!(error = %rollback_err, "rollback after failed commit failed");
                    }
                    Err(e.into())
                }
            },
            Err(e) => {
                if let Err(rollback_err) = self.conn.execute("ROLLBACK", ()).await {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_local(&dir.path().join("books.db")).await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("books.db");
        {
            let db = Database::open_local(&path).await.unwrap();
            db.create_book("Dune", "Frank Herbert", 8.0).await.unwrap();
        }
        let db = Database::open_local(&path).await.unwrap();
        assert_eq!(db.count_books().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let (_dir, db) = open().await;

        let book = db.create_book("The Hobbit", "J R R Tolkien", 9.5).await.unwrap();
        assert_eq!(book.title, "The Hobbit");
        assert_eq!(book.review, 9.5);

        assert_eq!(db.get_book_by_id(book.id).await.unwrap(), Some(book.clone()));
        assert_eq!(
            db.find_book_by_title_author("The Hobbit", "J R R Tolkien").await.unwrap(),
            Some(book)
        );
        assert!(db.find_book_by_title_author("The Hobbit", "Someone Else").await.unwrap().is_none());
        assert!(db.get_book_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let (_dir, db) = open().await;

        let titles = ["A", "B", "C", "D"];
        for t in titles {
            db.create_book(t, "Author", 5.0).await.unwrap();
        }

        let listed: Vec<String> = db
            .list_books_by_date_added()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.title)
            .collect();
        assert_eq!(listed, titles);
    }

    #[tokio::test]
    async fn test_update_keeps_id_and_date_added() {
        let (_dir, db) = open().await;

        let original = db.create_book("Dune", "Frank Herbert", 8.0).await.unwrap();
        let mut book = original.clone();
        db.update_book(&mut book, "Dune Messiah", "Frank Herbert", 7.0).await.unwrap();

        assert_eq!(book.id, original.id);
        assert_eq!(book.date_added, original.date_added);
        assert_eq!(book.title, "Dune Messiah");
        assert_eq!(db.get_book_by_id(original.id).await.unwrap(), Some(book));
    }

    #[tokio::test]
    async fn test_delete_does_not_reuse_ids() {
        let (_dir, db) = open().await;

        let first = db.create_book("A", "X", 1.0).await.unwrap();
        let second = db.create_book("B", "X", 2.0).await.unwrap();
        db.delete_book(&second).await.unwrap();
        assert_eq!(db.count_books().await.unwrap(), 1);

        let third = db.create_book("C", "X", 3.0).await.unwrap();
        assert!(third.id > second.id);
        assert_eq!(db.get_book_by_id(first.id).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_failed_delete_rolls_back() {
        let (_dir, db) = open().await;

        let book = db.create_book("A", "X", 1.0).await.unwrap();
        db.connection()
            .execute_batch(
                "CREATE TRIGGER block_delete BEFORE DELETE ON books BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .await
            .unwrap();

        assert!(db.delete_book(&book).await.is_err());
        assert_eq!(db.count_books().await.unwrap(), 1);

        // the connection is usable again after the rollback
        db.create_book("B", "X", 2.0).await.unwrap();
        assert_eq!(db.count_books().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_book_untouched() {
        let (_dir, db) = open().await;

        let mut book = db.create_book("A", "X", 1.0).await.unwrap();
        db.connection()
            .execute_batch(
                "CREATE TRIGGER block_update BEFORE UPDATE ON books BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .await
            .unwrap();

        assert!(db.update_book(&mut book, "B", "Y", 2.0).await.is_err());
        assert_eq!(book.title, "A");
        assert_eq!(db.get_book_by_id(book.id).await.unwrap().unwrap().title, "A");
    }

    #[tokio::test]
    async fn test_failed_commit_is_rolled_back() {
        let (_dir, db) = open().await;

        // Deferred foreign keys are only checked at COMMIT, which makes the
        // commit itself fail and leaves the transaction open.
        db.connection()
            .execute_batch(
                "PRAGMA foreign_keys = ON;
                 CREATE TABLE owners (id INTEGER PRIMARY KEY);
                 CREATE TABLE audit (book_id INTEGER REFERENCES owners(id) DEFERRABLE INITIALLY DEFERRED);
                 CREATE TRIGGER audit_insert AFTER INSERT ON books BEGIN INSERT INTO audit VALUES (NEW.id); END;",
            )
            .await
            .unwrap();

        assert!(db.create_book("A", "X", 1.0).await.is_err());
        assert_eq!(db.count_books().await.unwrap(), 0);

        db.connection().execute_batch("DROP TRIGGER audit_insert;").await.unwrap();
        let book = db.create_book("B", "Y", 2.0).await.unwrap();
        assert_eq!(db.count_books().await.unwrap(), 1);
        assert_eq!(db.get_book_by_id(book.id).await.unwrap().unwrap().title, "B");
    }
}
