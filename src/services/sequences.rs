//! Date-scoped document numbers (`INV-20240301-001`, `ORD-20240301-001`).

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, OnConflict, Query},
    ConnectionTrait,
};
use tracing::debug;

use crate::{
    entities::document_sequence::{self, Column},
    errors::ServiceError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentScope {
    Invoice,
    Order,
}

impl DocumentScope {
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentScope::Invoice => "INV",
            DocumentScope::Order => "ORD",
        }
    }
}

/// UTC date, digits only.
pub fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d").to_string()
}

pub fn format_number(scope: DocumentScope, day: &str, seq: i64) -> String {
    format!("{}-{}-{:03}", scope.prefix(), day, seq)
}

/// Atomically increments and returns the counter for `(scope, day)`.
///
/// A single upsert statement, so two concurrent callers can never observe
/// the same value.
pub async fn next_value<C>(conn: &C, scope: DocumentScope, day: &str) -> Result<i64, ServiceError>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let mut insert = Query::insert();
    insert
        .into_table(document_sequence::Entity)
        .columns([Column::Scope, Column::DayKey, Column::LastValue, Column::UpdatedAt]);
    insert
        .values([
            scope.prefix().into(),
            day.into(),
            1i64.into(),
            now.into(),
        ])
        .map_err(|e| ServiceError::InternalError(format!("sequence statement: {}", e)))?;
    insert
        .on_conflict(
            OnConflict::columns([Column::Scope, Column::DayKey])
                .value(
                    Column::LastValue,
                    Expr::col((document_sequence::Entity, Column::LastValue)).add(1),
                )
                .value(Column::UpdatedAt, Expr::value(now))
                .to_owned(),
        )
        .returning_col(Column::LastValue);

    let stmt = conn.get_database_backend().build(&insert);
    let row = conn
        .query_one(stmt)
        .await?
        .ok_or_else(|| ServiceError::InternalError("sequence upsert returned no row".into()))?;
    let value: i64 = row.try_get("", "last_value")?;

    debug!(scope = scope.prefix(), day, value, "sequence advanced");
    Ok(value)
}

/// Issues the next document number for today.
pub async fn issue_number<C>(conn: &C, scope: DocumentScope) -> Result<String, ServiceError>
where
    C: ConnectionTrait,
{
    let day = day_key(Utc::now());
    let seq = next_value(conn, scope, &day).await?;
    Ok(format_number(scope, &day, seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn numbers_are_zero_padded_and_day_scoped() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap();
        let day = day_key(at);
        assert_eq!(day, "20240309");
        assert_eq!(format_number(DocumentScope::Invoice, &day, 7), "INV-20240309-007");
        assert_eq!(format_number(DocumentScope::Order, &day, 1234), "ORD-20240309-1234");
    }

    #[tokio::test]
    async fn counter_increments_per_scope_and_day() {
        let db = memory_db().await;

        assert_eq!(next_value(&*db, DocumentScope::Invoice, "20240101").await.unwrap(), 1);
        assert_eq!(next_value(&*db, DocumentScope::Invoice, "20240101").await.unwrap(), 2);
        // independent scope and day
        assert_eq!(next_value(&*db, DocumentScope::Order, "20240101").await.unwrap(), 1);
        assert_eq!(next_value(&*db, DocumentScope::Invoice, "20240102").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn issued_numbers_are_unique() {
        let db = memory_db().await;
        let mut seen = HashSet::new();
        for _ in 0..25 {
            let number = issue_number(&*db, DocumentScope::Invoice).await.unwrap();
            assert!(number.starts_with("INV-"));
            assert!(seen.insert(number));
        }
    }
}
