//! The local index: a SQLite projection of written records for fast
//! querying by subject, line, and author, plus thread and reaction
//! aggregation.
//!
//! Rows here are never authoritative. The remote repository is the source
//! of truth; a missing or stale row is recoverable staleness, not
//! corruption, and [`LocalIndex`] upserts so a backfill sweep can replay
//! records idempotently.

use marginalia_common::{Datetime, Did, RecordUri, StrongRef};
use miette::Diagnostic;
use smol_str::SmolStr;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use thiserror::Error;

use crate::records::{CommentRecord, ReactionRecord};

#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    #[error("index database error: {0}")]
    #[diagnostic(code(marginalia::index::db))]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    #[diagnostic(code(marginalia::index::parse))]
    Parse(#[from] marginalia_common::error::ParseError),
}

type Result<T> = core::result::Result<T, IndexError>;

/// A comment row as projected into the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRow {
    pub uri: RecordUri,
    pub cid: SmolStr,
    pub author_did: Did,
    pub contract: SmolStr,
    pub deploy_tx: SmolStr,
    pub line: Option<u32>,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
    pub root_uri: Option<RecordUri>,
    pub parent_uri: Option<RecordUri>,
    pub text: String,
    pub created_at: Datetime,
}

impl CommentRow {
    /// Derives the parent record's key from the reply reference; this is
    /// how threads reconstruct at read time, no stored relationship.
    pub fn parent_rkey(&self) -> Option<&str> {
        self.parent_uri.as_ref().map(|uri| uri.rkey())
    }

    fn from_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Self> {
        let uri: String = row.get("uri");
        let root_uri: Option<String> = row.get("root_uri");
        let parent_uri: Option<String> = row.get("parent_uri");
        let created_at: String = row.get("created_at");
        Ok(Self {
            uri: RecordUri::new(&uri)?,
            cid: SmolStr::new(row.get::<String, _>("cid")),
            author_did: Did::new(row.get::<String, _>("author_did"))?,
            contract: SmolStr::new(row.get::<String, _>("contract")),
            deploy_tx: SmolStr::new(row.get::<String, _>("deploy_tx")),
            line: row.get::<Option<i64>, _>("line").map(|v| v as u32),
            line_start: row.get::<Option<i64>, _>("line_start").map(|v| v as u32),
            line_end: row.get::<Option<i64>, _>("line_end").map(|v| v as u32),
            root_uri: root_uri.as_deref().map(RecordUri::new).transpose()?,
            parent_uri: parent_uri.as_deref().map(RecordUri::new).transpose()?,
            text: row.get("text"),
            created_at: Datetime::parse(&created_at)?,
        })
    }
}

/// Reactions to one subject, grouped by emoji.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionCount {
    pub emoji: SmolStr,
    pub count: i64,
}

#[derive(Clone)]
pub struct LocalIndex {
    db: SqlitePool,
}

impl LocalIndex {
    /// Wraps an existing pool without touching the schema.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Connects and applies the schema migration.
    pub async fn connect(url: &str) -> Result<Self> {
        let db = SqlitePool::connect(url).await?;
        let index = Self { db };
        index.migrate().await?;
        Ok(index)
    }

    /// Applies the embedded schema migration; safe to re-run.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_initial_schema.sql"))
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Upserts a comment row; replaying the same record is a no-op.
    pub async fn insert_comment(
        &self,
        reference: &StrongRef,
        author: &Did,
        record: &CommentRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO comments
            (uri, cid, author_did, contract, deploy_tx, line, line_start, line_end,
             root_uri, parent_uri, text, created_at, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(reference.uri.as_str())
        .bind(reference.cid.as_str())
        .bind(author.as_str())
        .bind(record.subject.contract.as_str())
        .bind(record.subject.deploy_tx.as_str())
        .bind(record.line.map(|v| v as i64))
        .bind(record.line_range.map(|r| r.start as i64))
        .bind(record.line_range.map(|r| r.end as i64))
        .bind(record.reply.as_ref().map(|r| r.root.uri.as_str()))
        .bind(record.reply.as_ref().map(|r| r.parent.uri.as_str()))
        .bind(&record.text)
        .bind(record.created_at.as_str())
        .bind(Datetime::now().as_str())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn delete_comment(&self, uri: &RecordUri) -> Result<()> {
        sqlx::query("DELETE FROM comments WHERE uri = ?")
            .bind(uri.as_str())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Upserts a reaction row.
    pub async fn insert_reaction(
        &self,
        reference: &StrongRef,
        author: &Did,
        record: &ReactionRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO reactions
            (uri, cid, author_did, subject_uri, subject_cid, emoji, created_at, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(reference.uri.as_str())
        .bind(reference.cid.as_str())
        .bind(author.as_str())
        .bind(record.subject.uri.as_str())
        .bind(record.subject.cid.as_str())
        .bind(record.emoji.as_str())
        .bind(record.created_at.as_str())
        .bind(Datetime::now().as_str())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn delete_reaction(&self, uri: &RecordUri) -> Result<()> {
        sqlx::query("DELETE FROM reactions WHERE uri = ?")
            .bind(uri.as_str())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// All comments on a subject, oldest first.
    pub async fn comments_for_subject(
        &self,
        contract: &str,
        deploy_tx: &str,
    ) -> Result<Vec<CommentRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM comments
            WHERE contract = ? AND deploy_tx = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(contract)
        .bind(deploy_tx)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(CommentRow::from_sqlite).collect()
    }

    /// Comments anchored to one line, including ranges covering it.
    pub async fn comments_for_line(
        &self,
        contract: &str,
        deploy_tx: &str,
        line: u32,
    ) -> Result<Vec<CommentRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM comments
            WHERE contract = ? AND deploy_tx = ?
              AND (line = ? OR (line_start IS NOT NULL AND line_start <= ? AND line_end >= ?))
            ORDER BY created_at ASC
            "#,
        )
        .bind(contract)
        .bind(deploy_tx)
        .bind(line as i64)
        .bind(line as i64)
        .bind(line as i64)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(CommentRow::from_sqlite).collect()
    }

    pub async fn comments_by_author(&self, author: &Did) -> Result<Vec<CommentRow>> {
        let rows = sqlx::query(
            "SELECT * FROM comments WHERE author_did = ? ORDER BY created_at DESC",
        )
        .bind(author.as_str())
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(CommentRow::from_sqlite).collect()
    }

    /// All replies in a thread, oldest first. The root comment itself is
    /// included; nesting reconstructs from each row's parent pointer.
    pub async fn thread(&self, root: &RecordUri) -> Result<Vec<CommentRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM comments
            WHERE uri = ? OR root_uri = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(root.as_str())
        .bind(root.as_str())
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(CommentRow::from_sqlite).collect()
    }

    /// Reaction tallies for one subject record, grouped by emoji.
    pub async fn reaction_counts(&self, subject: &RecordUri) -> Result<Vec<ReactionCount>> {
        let rows = sqlx::query(
            r#"
            SELECT emoji, COUNT(*) as count FROM reactions
            WHERE subject_uri = ?
            GROUP BY emoji
            ORDER BY count DESC, emoji ASC
            "#,
        )
        .bind(subject.as_str())
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .iter()
            .map(|row| ReactionCount {
                emoji: SmolStr::new(row.get::<String, _>("emoji")),
                count: row.get("count"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ContractSubject;

    async fn index() -> LocalIndex {
        // A pooled `:memory:` database is per-connection; pin to one.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let index = LocalIndex::new(pool);
        index.migrate().await.unwrap();
        index
    }

    fn author() -> Did {
        Did::new("did:plc:alice123").unwrap()
    }

    fn subject() -> ContractSubject {
        ContractSubject {
            contract: "0xdeadbeef".into(),
            deploy_tx: "0xcafe".into(),
        }
    }

    fn reference(rkey: &str) -> StrongRef {
        StrongRef::new(
            RecordUri::from_parts("did:plc:alice123", "site.marginalia.comment", rkey).unwrap(),
            "bafyreib2rxk3rh6kzwq",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn queries_by_subject_and_line() {
        let index = index().await;
        let contract_level = CommentRecord::new(subject(), "overall fine");
        let line_level = CommentRecord::new(subject(), "off by one").at_line(10);
        let range_level = CommentRecord::new(subject(), "this block").at_range(8, 12);
        index
            .insert_comment(&reference("3jzfcijpj2z2a"), &author(), &contract_level)
            .await
            .unwrap();
        index
            .insert_comment(&reference("3jzfcijpj2z2b"), &author(), &line_level)
            .await
            .unwrap();
        index
            .insert_comment(&reference("3jzfcijpj2z2c"), &author(), &range_level)
            .await
            .unwrap();

        let all = index.comments_for_subject("0xdeadbeef", "0xcafe").await.unwrap();
        assert_eq!(all.len(), 3);

        let on_line = index
            .comments_for_line("0xdeadbeef", "0xcafe", 10)
            .await
            .unwrap();
        assert_eq!(on_line.len(), 2);
        assert!(on_line.iter().any(|c| c.line == Some(10)));
        assert!(on_line.iter().any(|c| c.line_start == Some(8)));
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let index = index().await;
        let comment = CommentRecord::new(subject(), "hello").at_line(1);
        for _ in 0..3 {
            index
                .insert_comment(&reference("3jzfcijpj2z2a"), &author(), &comment)
                .await
                .unwrap();
        }
        let all = index.comments_for_subject("0xdeadbeef", "0xcafe").await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn thread_reconstructs_from_parent_pointers() {
        let index = index().await;
        let root_ref = reference("3jzfcijpj2z2a");
        let root = CommentRecord::new(subject(), "root");
        index.insert_comment(&root_ref, &author(), &root).await.unwrap();

        let reply = CommentRecord::new(subject(), "reply")
            .as_reply(root_ref.clone(), root_ref.clone());
        index
            .insert_comment(&reference("3jzfcijpj2z2b"), &author(), &reply)
            .await
            .unwrap();

        let nested = CommentRecord::new(subject(), "nested").as_reply(
            root_ref.clone(),
            StrongRef::new(
                RecordUri::from_parts("did:plc:alice123", "site.marginalia.comment", "3jzfcijpj2z2b")
                    .unwrap(),
                "bafyreib2rxk3rh6kzwq",
            )
            .unwrap(),
        );
        index
            .insert_comment(&reference("3jzfcijpj2z2c"), &author(), &nested)
            .await
            .unwrap();

        let thread = index.thread(&root_ref.uri).await.unwrap();
        assert_eq!(thread.len(), 3);
        assert_eq!(thread[0].parent_rkey(), None);
        assert_eq!(thread[1].parent_rkey(), Some("3jzfcijpj2z2a"));
        assert_eq!(thread[2].parent_rkey(), Some("3jzfcijpj2z2b"));
    }

    #[tokio::test]
    async fn tallies_reactions_by_emoji() {
        let index = index().await;
        let target = reference("3jzfcijpj2z2a");
        for (i, emoji) in ["👍", "👍", "🔥"].iter().enumerate() {
            let reaction = ReactionRecord::new(target.clone(), *emoji);
            let uri = RecordUri::from_parts(
                "did:plc:alice123",
                "site.marginalia.reaction",
                format!("3jzfcijpj2z{i}a"),
            )
            .unwrap();
            index
                .insert_reaction(
                    &StrongRef::new(uri, "bafyreib2rxk3rh6kzwq").unwrap(),
                    &author(),
                    &reaction,
                )
                .await
                .unwrap();
        }

        let counts = index.reaction_counts(&target.uri).await.unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].emoji, "👍");
        assert_eq!(counts[0].count, 2);
    }
}
