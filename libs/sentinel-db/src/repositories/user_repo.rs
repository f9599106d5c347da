use anyhow::{Context, Result};
use sqlx::PgConnection;

use crate::models::user::UserAccount;

pub struct UserRepository;

impl UserRepository {
    pub async fn get_by_id(conn: &mut PgConnection, id: i64) -> Result<Option<UserAccount>> {
        sqlx::query_as::<_, UserAccount>(
            "SELECT id, telegram_id, username, language_code, balance,
                    promo_discount_percent, promo_discount_expires_at
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(conn)
        .await
        .context("Failed to fetch user by ID")
    }

    /// Debits only when the balance covers the amount. The ledger row is
    /// written by the same statement, so either both land or neither does.
    pub async fn debit(
        conn: &mut PgConnection,
        user_id: i64,
        amount: i64,
        reason: &str,
    ) -> Result<bool> {
        let inserted: Option<i64> = sqlx::query_scalar(
            "WITH debited AS (
                UPDATE users SET balance = balance - $2
                WHERE id = $1 AND balance >= $2
                RETURNING id
             )
             INSERT INTO balance_transactions (user_id, amount, reason)
             SELECT id, -($2::BIGINT), $3 FROM debited
             RETURNING id",
        )
        .bind(user_id)
        .bind(amount)
        .bind(reason)
        .fetch_optional(conn)
        .await
        .context("Failed to debit user balance")?;
        Ok(inserted.is_some())
    }

    /// Refunds or tops up. Returns false when the user does not exist.
    pub async fn credit(
        conn: &mut PgConnection,
        user_id: i64,
        amount: i64,
        reason: &str,
    ) -> Result<bool> {
        let inserted: Option<i64> = sqlx::query_scalar(
            "WITH credited AS (
                UPDATE users SET balance = balance + $2
                WHERE id = $1
                RETURNING id
             )
             INSERT INTO balance_transactions (user_id, amount, reason)
             SELECT id, $2::BIGINT, $3 FROM credited
             RETURNING id",
        )
        .bind(user_id)
        .bind(amount)
        .bind(reason)
        .fetch_optional(conn)
        .await
        .context("Failed to credit user balance")?;
        Ok(inserted.is_some())
    }

    pub async fn consume_promo_discount(conn: &mut PgConnection, user_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE users SET promo_discount_percent = 0, promo_discount_expires_at = NULL WHERE id = $1",
        )
        .bind(user_id)
        .execute(conn)
        .await
        .context("Failed to consume promo discount")?;
        Ok(())
    }
}
