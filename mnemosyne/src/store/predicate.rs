//! Incremental WHERE-clause construction for the filtered statements.
//!
//! Clauses and bind parameters are appended together through
//! [`QueryBuilder`], so placeholders are numbered `$1..$n` in the order the
//! filters are present, for every combination of token / from / to.

use sqlx::{Postgres, QueryBuilder};

use super::{ExpiryRange, SessionFilter};

pub(crate) const SESSION_COLUMNS: &str = "token, subject_id, bag, expire_at";

/// Appends ` WHERE ...` for every present filter; appends nothing when empty.
pub(crate) fn push_predicate(qb: &mut QueryBuilder<'_, Postgres>, filter: &SessionFilter) {
    if filter.is_empty() {
        return;
    }

    qb.push(" WHERE ");
    let mut clauses = qb.separated(" AND ");

    if let Some(token) = &filter.token {
        clauses.push("token = ");
        clauses.push_bind_unseparated(token.as_bytes().to_vec());
    }
    if let Some(from) = filter.expire_at.from {
        clauses.push("expire_at >= ");
        clauses.push_bind_unseparated(from);
    }
    if let Some(to) = filter.expire_at.to {
        clauses.push("expire_at < ");
        clauses.push_bind_unseparated(to);
    }
}

pub(crate) fn select_page<'a>(
    table: &str,
    offset: i64,
    limit: i64,
    range: &ExpiryRange,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {SESSION_COLUMNS} FROM {table}"));
    push_predicate(&mut qb, &SessionFilter::by_expiry(*range));

    qb.push(" ORDER BY expire_at, token OFFSET ");
    qb.push_bind(offset);
    qb.push(" LIMIT ");
    qb.push_bind(limit);
    qb
}

pub(crate) fn delete_matching<'a>(
    table: &str,
    filter: &SessionFilter,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("DELETE FROM {table}"));
    push_predicate(&mut qb, filter);
    qb
}
