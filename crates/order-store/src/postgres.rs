use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use domain::{Address, DomainError, Money, Order, OrderState, Payment};
use sqlx::{
    PgConnection, PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
};
use uuid::Uuid;

use crate::{Event, EventId, Result, StepCommit, StoreError, store::OrderStore};

const ORDERS_PKEY: &str = "orders_pkey";
const UNIQUE_ORDER_EVENT_TYPE: &str = "unique_order_event_type";
const ONE_CHARGED_PAYMENT_PER_ORDER: &str = "one_charged_payment_per_order";
const EVENTS_ORDER_FKEY: &str = "events_order_id_fkey";
const PAYMENTS_ORDER_FKEY: &str = "payments_order_id_fkey";

const ORDER_COLUMNS: &str = "id, state, items, address, created_at, updated_at";

/// PostgreSQL-backed order store implementation.
///
/// Every call acquires a pooled connection for its own duration; the
/// connection goes back to the pool when the call returns, on success or
/// error.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        let state: String = row.try_get("state")?;
        let items: serde_json::Value = row.try_get("items")?;
        let address: serde_json::Value = row.try_get("address")?;

        Ok(Order::rehydrate(
            OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            state.parse()?,
            serde_json::from_value(items)?,
            Address::new(address),
            row.try_get("created_at")?,
            row.try_get("updated_at")?,
        ))
    }

    fn row_to_payment(row: &PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        let amount: i64 = row.try_get("amount")?;
        let amount = u64::try_from(amount)
            .map_err(|_| StoreError::Corrupt(format!("negative payment amount {amount}")))?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            status: status.parse()?,
            amount: Money::from_cents(amount),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_event(row: &PgRow) -> Result<Event> {
        Ok(Event {
            id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

/// Name of the constraint a database error violated, if any.
fn violated_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint().map(str::to_owned),
        _ => None,
    }
}

async fn insert_order_on(conn: &mut PgConnection, order: &Order) -> Result<()> {
    let items = serde_json::to_value(order.items())?;

    sqlx::query(
        r#"
        INSERT INTO orders (id, state, items, address, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(order.id().as_uuid())
    .bind(order.state().as_str())
    .bind(items)
    .bind(order.address().as_json())
    .bind(order.created_at())
    .bind(order.updated_at())
    .execute(&mut *conn)
    .await
    .map_err(|e| match violated_constraint(&e).as_deref() {
        Some(ORDERS_PKEY) => StoreError::OrderAlreadyExists(order.id()),
        _ => StoreError::Database(e),
    })?;

    Ok(())
}

async fn update_state_on(
    conn: &mut PgConnection,
    order_id: OrderId,
    from: OrderState,
    to: OrderState,
    at: DateTime<Utc>,
) -> Result<Order> {
    if !from.can_transition_to(to) {
        return Err(DomainError::InvalidTransition { from, to }.into());
    }

    let row = sqlx::query(&format!(
        r#"
        UPDATE orders
        SET state = $3, updated_at = GREATEST(updated_at, $4)
        WHERE id = $1 AND state = $2
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(order_id.as_uuid())
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(at)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = row {
        return PostgresOrderStore::row_to_order(&row);
    }

    // Nothing matched: either the order is missing or it has moved on.
    let actual: Option<String> = sqlx::query_scalar("SELECT state FROM orders WHERE id = $1")
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;

    match actual {
        None => Err(StoreError::OrderNotFound(order_id)),
        Some(actual) => Err(StoreError::StaleState {
            order_id,
            expected: from,
            actual: actual.parse()?,
        }),
    }
}

async fn insert_payment_on(conn: &mut PgConnection, payment: &Payment) -> Result<()> {
    let amount = i64::try_from(payment.amount.cents())
        .map_err(|_| StoreError::Corrupt(format!("payment amount {} out of range", payment.amount)))?;

    sqlx::query(
        r#"
        INSERT INTO payments (id, order_id, status, amount, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(payment.id.as_uuid())
    .bind(payment.order_id.as_uuid())
    .bind(payment.status.as_str())
    .bind(amount)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| match violated_constraint(&e).as_deref() {
        Some(ONE_CHARGED_PAYMENT_PER_ORDER) => StoreError::PaymentAlreadyCharged(payment.order_id),
        Some(PAYMENTS_ORDER_FKEY) => StoreError::OrderNotFound(payment.order_id),
        _ => StoreError::Database(e),
    })?;

    Ok(())
}

async fn insert_event_on(conn: &mut PgConnection, event: &Event) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO events (id, order_id, event_type, payload, timestamp)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(event.id.as_uuid())
    .bind(event.order_id.as_uuid())
    .bind(&event.event_type)
    .bind(&event.payload)
    .bind(event.timestamp)
    .execute(&mut *conn)
    .await
    .map_err(|e| match violated_constraint(&e).as_deref() {
        Some(UNIQUE_ORDER_EVENT_TYPE) => StoreError::DuplicateEvent {
            order_id: event.order_id,
            event_type: event.event_type.clone(),
        },
        Some(EVENTS_ORDER_FKEY) => StoreError::OrderNotFound(event.order_id),
        _ => StoreError::Database(e),
    })?;

    Ok(())
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_order_on(&mut conn, order).await
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn update_order_state(
        &self,
        order_id: OrderId,
        from: OrderState,
        to: OrderState,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let mut conn = self.pool.acquire().await?;
        update_state_on(&mut conn, order_id, from, to, at).await
    }

    #[tracing::instrument(skip(self, payment), fields(order_id = %payment.order_id))]
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_payment_on(&mut conn, payment).await
    }

    async fn get_payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, status, amount, created_at, updated_at
            FROM payments
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_payment).collect()
    }

    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id, event_type = %event.event_type))]
    async fn insert_event(&self, event: &Event) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_event_on(&mut conn, event).await
    }

    async fn find_event(&self, order_id: OrderId, event_type: &str) -> Result<Option<Event>> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, event_type, payload, timestamp
            FROM events
            WHERE order_id = $1 AND event_type = $2
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(event_type)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn get_events_for_order(&self, order_id: OrderId) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, event_type, payload, timestamp
            FROM events
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn find_unfinished_orders(&self) -> Result<Vec<OrderId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM orders
            WHERE state NOT IN ($1, $2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(OrderState::Dispatched.as_str())
        .bind(OrderState::Rejected.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(OrderId::from_uuid).collect())
    }

    #[tracing::instrument(skip(self, commit), fields(order_id = %commit.order_id, event_type = %commit.event.event_type))]
    async fn commit_step(&self, commit: StepCommit) -> Result<Event> {
        commit.validate().map_err(StoreError::Corrupt)?;

        // Dropping the transaction on any early return rolls it back.
        let mut tx = self.pool.begin().await?;

        if let Some(order) = &commit.new_order {
            insert_order_on(&mut tx, order).await?;
        }
        if let Some(t) = commit.transition {
            update_state_on(&mut tx, commit.order_id, t.from, t.to, t.at).await?;
        }
        if let Some(payment) = &commit.payment {
            insert_payment_on(&mut tx, payment).await?;
        }
        insert_event_on(&mut tx, &commit.event).await?;

        tx.commit().await?;
        Ok(commit.event)
    }
}
