//! PostgreSQL store for studio-service.

use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    ChargeOutcome, Chat, ChatSummary, Message, NewMessage, Subscription, SubscriptionSnapshot,
    UpsertOutcome, User,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{sort_by_activity, Store, StoreError};

const USER_COLUMNS: &str = "id, name, email, count, is_admin, created_utc, updated_utc";
const SUBSCRIPTION_COLUMNS: &str = "id, user_id, customer_id, status, subscription_id, price_id, current_period_start, current_period_end, cancel_at_period_end, created_utc, updated_utc";
const CHAT_COLUMNS: &str = "id, user_id, name, created_utc, updated_utc";
const MESSAGE_COLUMNS: &str =
    "id, chat_id, user_id, role, prompt, image, image_asset_id, created_utc, updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

#[derive(FromRow)]
struct UpsertedRow {
    #[sqlx(flatten)]
    subscription: Subscription,
    inserted: bool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "studio-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl Store for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1").execute(&self.pool).await?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // User Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn refund_generation(&self, user_id: Uuid) -> Result<i32, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["refund_generation"])
            .start_timer();

        let count: i32 = sqlx::query_scalar(
            r#"
            UPDATE users SET count = GREATEST(count - 1, 0), updated_utc = NOW()
            WHERE id = $1
            RETURNING count
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        info!(user_id = %user_id, count = count, "Generation refunded");
        Ok(count)
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn get_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(subscription)
    }

    #[instrument(skip(self, subscription), fields(user_id = %subscription.user_id))]
    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_subscription"])
            .start_timer();

        let inserted = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (id, user_id, customer_id, status, subscription_id, price_id, current_period_start, current_period_end, cancel_at_period_end)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(&subscription.customer_id)
        .bind(subscription.status.as_str())
        .bind(&subscription.subscription_id)
        .bind(&subscription.price_id)
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at_period_end)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        info!(customer_id = %inserted.customer_id, "Subscription row created");
        Ok(inserted)
    }

    #[instrument(skip(self, snapshot), fields(customer_id = %snapshot.customer_id))]
    async fn upsert_subscription(
        &self,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<UpsertOutcome, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_subscription"])
            .start_timer();

        let outcome = match snapshot.user_id {
            Some(user_id) => {
                let row = sqlx::query_as::<_, UpsertedRow>(&format!(
                    r#"
                    INSERT INTO subscriptions (id, user_id, customer_id, status, subscription_id, price_id, current_period_start, current_period_end, cancel_at_period_end)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT (customer_id) DO UPDATE SET
                        status = EXCLUDED.status,
                        subscription_id = EXCLUDED.subscription_id,
                        price_id = EXCLUDED.price_id,
                        current_period_start = EXCLUDED.current_period_start,
                        current_period_end = EXCLUDED.current_period_end,
                        cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                        updated_utc = NOW()
                    WHERE (subscriptions.status, subscriptions.subscription_id, subscriptions.price_id,
                           subscriptions.current_period_start, subscriptions.current_period_end,
                           subscriptions.cancel_at_period_end)
                        IS DISTINCT FROM
                          (EXCLUDED.status, EXCLUDED.subscription_id, EXCLUDED.price_id,
                           EXCLUDED.current_period_start, EXCLUDED.current_period_end,
                           EXCLUDED.cancel_at_period_end)
                    RETURNING {}, (xmax = 0) AS inserted
                    "#,
                    SUBSCRIPTION_COLUMNS
                ))
                .bind(Uuid::new_v4())
                .bind(user_id)
                .bind(&snapshot.customer_id)
                .bind(snapshot.status.as_str())
                .bind(&snapshot.subscription_id)
                .bind(&snapshot.price_id)
                .bind(snapshot.current_period_start)
                .bind(snapshot.current_period_end)
                .bind(snapshot.cancel_at_period_end)
                .fetch_optional(&self.pool)
                .await?;

                match row {
                    Some(row) if row.inserted => UpsertOutcome::Inserted(row.subscription),
                    Some(row) => UpsertOutcome::Updated(row.subscription),
                    None => UpsertOutcome::Unchanged,
                }
            }
            None => {
                let row = sqlx::query_as::<_, Subscription>(&format!(
                    r#"
                    UPDATE subscriptions SET
                        status = $2,
                        subscription_id = $3,
                        price_id = $4,
                        current_period_start = $5,
                        current_period_end = $6,
                        cancel_at_period_end = $7,
                        updated_utc = NOW()
                    WHERE customer_id = $1
                      AND (status, subscription_id, price_id, current_period_start,
                           current_period_end, cancel_at_period_end)
                          IS DISTINCT FROM
                          ($2::TEXT, $3::TEXT, $4::TEXT, $5::TIMESTAMPTZ, $6::TIMESTAMPTZ, $7::BOOLEAN)
                    RETURNING {}
                    "#,
                    SUBSCRIPTION_COLUMNS
                ))
                .bind(&snapshot.customer_id)
                .bind(snapshot.status.as_str())
                .bind(&snapshot.subscription_id)
                .bind(&snapshot.price_id)
                .bind(snapshot.current_period_start)
                .bind(snapshot.current_period_end)
                .bind(snapshot.cancel_at_period_end)
                .fetch_optional(&self.pool)
                .await?;

                match row {
                    Some(subscription) => UpsertOutcome::Updated(subscription),
                    None => {
                        let exists: bool = sqlx::query_scalar(
                            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE customer_id = $1)",
                        )
                        .bind(&snapshot.customer_id)
                        .fetch_one(&self.pool)
                        .await?;
                        if exists {
                            UpsertOutcome::Unchanged
                        } else {
                            UpsertOutcome::UnknownCustomer
                        }
                    }
                }
            }
        };

        timer.observe_duration();
        Ok(outcome)
    }

    // =========================================================================
    // Chat Operations
    // =========================================================================

    #[instrument(skip(self, chat), fields(chat_id = %chat.id))]
    async fn create_chat(&self, chat: &Chat) -> Result<Chat, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_chat"])
            .start_timer();

        let created = sqlx::query_as::<_, Chat>(&format!(
            "INSERT INTO chats (id, user_id, name) VALUES ($1, $2, $3) RETURNING {}",
            CHAT_COLUMNS
        ))
        .bind(chat.id)
        .bind(chat.user_id)
        .bind(&chat.name)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_chat(&self, chat_id: Uuid) -> Result<Option<Chat>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_chat"])
            .start_timer();

        let chat = sqlx::query_as::<_, Chat>(&format!(
            "SELECT {} FROM chats WHERE id = $1",
            CHAT_COLUMNS
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(chat)
    }

    #[instrument(skip(self))]
    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_chats"])
            .start_timer();

        let chats = sqlx::query_as::<_, Chat>(&format!(
            "SELECT {} FROM chats WHERE user_id = $1",
            CHAT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let chat_ids: Vec<Uuid> = chats.iter().map(|c| c.id).collect();
        let latest = sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT DISTINCT ON (chat_id) {}
            FROM messages
            WHERE chat_id = ANY($1)
            ORDER BY chat_id, updated_utc DESC, seq DESC
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(&chat_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut latest: HashMap<Uuid, Message> =
            latest.into_iter().map(|m| (m.chat_id, m)).collect();
        let mut summaries: Vec<ChatSummary> = chats
            .into_iter()
            .map(|chat| ChatSummary {
                last_message: latest.remove(&chat.id),
                chat,
            })
            .collect();
        sort_by_activity(&mut summaries);

        timer.observe_duration();
        Ok(summaries)
    }

    #[instrument(skip(self, name))]
    async fn rename_chat(&self, chat_id: Uuid, name: &str) -> Result<Chat, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["rename_chat"])
            .start_timer();

        let chat = sqlx::query_as::<_, Chat>(&format!(
            "UPDATE chats SET name = $2, updated_utc = NOW() WHERE id = $1 RETURNING {}",
            CHAT_COLUMNS
        ))
        .bind(chat_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(chat)
    }

    #[instrument(skip(self))]
    async fn delete_chat(&self, chat_id: Uuid) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_chat"])
            .start_timer();

        let result = sqlx::query("DELETE FROM chats WHERE id = $1")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;

        timer.observe_duration();
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("chat {}", chat_id)));
        }
        info!(chat_id = %chat_id, "Chat deleted");
        Ok(())
    }

    // =========================================================================
    // Message Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn list_messages(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Message>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_messages"])
            .start_timer();

        let messages = sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT {} FROM messages
            WHERE chat_id = $1 AND user_id = $2
            ORDER BY created_utc ASC, seq ASC
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(chat_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(messages)
    }

    #[instrument(skip(self))]
    async fn last_message(&self, chat_id: Uuid) -> Result<Option<Message>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["last_message"])
            .start_timer();

        let message = sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT {} FROM messages
            WHERE chat_id = $1
            ORDER BY created_utc DESC, seq DESC
            LIMIT 1
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(message)
    }

    #[instrument(skip(self, message), fields(chat_id = %message.chat_id, user_id = %message.user_id))]
    async fn insert_charged_message(
        &self,
        message: NewMessage,
        free_quota: i32,
        subscribed: bool,
    ) -> Result<ChargeOutcome, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_charged_message"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE users SET count = count + 1, updated_utc = NOW()
            WHERE id = $1 AND (count < $2 OR $3)
            RETURNING count
            "#,
        )
        .bind(message.user_id)
        .bind(free_quota)
        .bind(subscribed)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(count) = count else {
            tx.rollback().await?;
            timer.observe_duration();
            return Ok(ChargeOutcome::QuotaExhausted);
        };

        let inserted = insert_message_query(message).fetch_one(&mut *tx).await?;
        tx.commit().await?;

        timer.observe_duration();
        Ok(ChargeOutcome::Charged {
            message: inserted,
            count,
        })
    }

    #[instrument(skip(self, message), fields(chat_id = %message.chat_id, role = %message.role))]
    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_message"])
            .start_timer();

        let inserted = insert_message_query(message).fetch_one(&self.pool).await?;

        timer.observe_duration();
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn claim_prompt(&self, message_id: Uuid) -> Result<bool, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_prompt"])
            .start_timer();

        let result = sqlx::query(
            r#"
            INSERT INTO prompt_claims (message_id) VALUES ($1)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }
}

fn insert_message_query(
    message: NewMessage,
) -> sqlx::query::QueryAs<'static, sqlx::Postgres, Message, sqlx::postgres::PgArguments> {
    sqlx::query_as::<_, Message>(INSERT_MESSAGE_SQL)
        .bind(Uuid::new_v4())
        .bind(message.chat_id)
        .bind(message.user_id)
        .bind(message.role.as_str())
        .bind(message.prompt)
        .bind(message.image)
        .bind(message.image_asset_id)
}

const INSERT_MESSAGE_SQL: &str = r#"
    INSERT INTO messages (id, chat_id, user_id, role, prompt, image, image_asset_id)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    RETURNING id, chat_id, user_id, role, prompt, image, image_asset_id, created_utc, updated_utc
"#;
