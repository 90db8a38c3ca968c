//! `TicketStore` over the `tickets` table.

use crate::config::PostgresConfig;
use chrono::{DateTime, Utc};
use raffle_core::{
    BoxFuture, Buyer, Liveness, Page, Phone, SortOrder, StoreError, Ticket, TicketFilter,
    TicketNumber, TicketStatus, TicketStore,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};

const SELECT_COLUMNS: &str = "SELECT ticket_number, status, client_name, client_phone, \
                              client_state, created_at FROM tickets";

const DEFAULT_PAGE_SIZE: usize = 1000;
const DEFAULT_INSERT_ROWS: usize = 500;

/// PostgreSQL-backed ticket store.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE tickets (
///     ticket_number TEXT PRIMARY KEY,
///     status TEXT NOT NULL,
///     client_name TEXT NOT NULL,
///     client_phone TEXT NOT NULL,
///     client_state TEXT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL
/// );
/// ```
///
/// Numbers are stored in their five-digit form, so text ordering on
/// `ticket_number` is numeric ordering.
#[derive(Clone)]
pub struct PostgresTicketStore {
    pool: PgPool,
    max_page_size: usize,
    max_insert_rows: usize,
}

impl PostgresTicketStore {
    /// Store over an existing pool, with the default limits.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_page_size: DEFAULT_PAGE_SIZE,
            max_insert_rows: DEFAULT_INSERT_ROWS,
        }
    }

    /// Opens a pool from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection fails.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Overrides the advertised page and insert caps.
    #[must_use]
    pub fn with_limits(mut self, max_page_size: usize, max_insert_rows: usize) -> Self {
        self.max_page_size = max_page_size.max(1);
        self.max_insert_rows = max_insert_rows.max(1);
        self
    }

    /// Creates the `tickets` table and its indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    ticket_number: String,
    status: String,
    client_name: String,
    client_phone: String,
    client_state: String,
    created_at: DateTime<Utc>,
}

impl TicketRow {
    fn into_ticket(self) -> Result<Ticket, StoreError> {
        let invalid = |e: &dyn std::fmt::Display| {
            StoreError::InvalidRow(format!("ticket {:?}: {e}", self.ticket_number))
        };
        let number: TicketNumber = self.ticket_number.parse().map_err(|e| invalid(&e))?;
        let status: TicketStatus = self.status.parse().map_err(|e| invalid(&e))?;
        let phone = Phone::parse(&self.client_phone).map_err(|e| invalid(&e))?;
        let owner = Buyer::new(self.client_name.clone(), phone, self.client_state.clone())
            .map_err(|e| invalid(&e))?;
        Ok(Ticket {
            number,
            status,
            owner,
            created_at: self.created_at,
        })
    }
}

/// Appends `WHERE` conditions equivalent to [`TicketFilter::matches`].
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &TicketFilter) {
    builder.push(" WHERE TRUE");
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(phone) = &filter.phone {
        builder
            .push(" AND client_phone = ")
            .push_bind(phone.as_str().to_owned());
    }
    if let Some(numbers) = &filter.numbers {
        let keys: Vec<String> = numbers.iter().map(ToString::to_string).collect();
        builder
            .push(" AND ticket_number = ANY(")
            .push_bind(keys)
            .push(")");
    }
    if let Some(after) = filter.number_after {
        builder
            .push(" AND ticket_number > ")
            .push_bind(after.to_string());
    }
    match filter.liveness {
        Some(Liveness::LiveSince(cutoff)) => {
            builder
                .push(" AND (status = 'paid' OR (status = 'reserved' AND created_at >= ")
                .push_bind(cutoff)
                .push("))");
        }
        Some(Liveness::ExpiredBefore(cutoff)) => {
            builder
                .push(" AND status = 'reserved' AND created_at < ")
                .push_bind(cutoff);
        }
        None => {}
    }
    if let Some(term) = &filter.text {
        let pattern = format!("%{}%", escape_like(term));
        builder
            .push(" AND (lower(client_name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR client_phone LIKE ")
            .push_bind(pattern.clone())
            .push(" OR ticket_number LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn unavailable(context: &str, err: &sqlx::Error) -> StoreError {
    StoreError::Unavailable(format!("{context}: {err}"))
}

impl TicketStore for PostgresTicketStore {
    fn query(
        &self,
        filter: TicketFilter,
        order: SortOrder,
        page: Page,
    ) -> BoxFuture<'_, Result<Vec<Ticket>, StoreError>> {
        Box::pin(async move {
            let mut builder = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
            push_filter(&mut builder, &filter);
            builder.push(match order {
                SortOrder::NumberAscending => " ORDER BY ticket_number ASC",
                SortOrder::NewestFirst => " ORDER BY created_at DESC, ticket_number ASC",
            });
            builder
                .push(" LIMIT ")
                .push_bind(to_i64(page.limit.min(self.max_page_size)))
                .push(" OFFSET ")
                .push_bind(to_i64(page.offset));

            let rows: Vec<TicketRow> = builder
                .build_query_as::<TicketRow>()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| unavailable("Failed to query tickets", &e))?;
            tracing::debug!(rows = rows.len(), "Queried tickets");

            rows.into_iter().map(TicketRow::into_ticket).collect()
        })
    }

    fn count(&self, filter: TicketFilter) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tickets");
            push_filter(&mut builder, &filter);

            let count: i64 = builder
                .build_query_scalar::<i64>()
                .fetch_one(&self.pool)
                .await
                .map_err(|e| unavailable("Failed to count tickets", &e))?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    fn insert_batch(&self, rows: Vec<Ticket>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if rows.is_empty() {
                return Ok(());
            }
            let numbers: Vec<TicketNumber> = rows.iter().map(|row| row.number).collect();

            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO tickets \
                 (ticket_number, status, client_name, client_phone, client_state, created_at) ",
            );
            builder.push_values(rows, |mut values, row| {
                values
                    .push_bind(row.number.to_string())
                    .push_bind(row.status.as_str())
                    .push_bind(row.owner.name)
                    .push_bind(String::from(row.owner.phone))
                    .push_bind(row.owner.region)
                    .push_bind(row.created_at);
            });

            match builder.build().execute(&self.pool).await {
                Ok(result) => {
                    tracing::debug!(rows = result.rows_affected(), "Inserted tickets");
                    Ok(())
                }
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    tracing::debug!(rows = numbers.len(), "Insert hit the ticket number key");
                    Err(StoreError::UniqueViolation { numbers })
                }
                Err(e) => Err(unavailable("Failed to insert tickets", &e)),
            }
        })
    }

    fn update_status(
        &self,
        filter: TicketFilter,
        status: TicketStatus,
    ) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            let mut builder = QueryBuilder::<Postgres>::new("UPDATE tickets SET status = ");
            builder.push_bind(status.as_str());
            push_filter(&mut builder, &filter);

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| unavailable("Failed to update tickets", &e))?;
            Ok(result.rows_affected())
        })
    }

    fn delete(&self, filter: TicketFilter) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM tickets");
            push_filter(&mut builder, &filter);

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| unavailable("Failed to delete tickets", &e))?;
            Ok(result.rows_affected())
        })
    }

    fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    fn max_insert_rows(&self) -> usize {
        self.max_insert_rows
    }
}
