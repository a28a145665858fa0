//! Credit ledger
//!
//! Three pools per user: regular credits (renewed with capped rollover),
//! bonus credits (promotional, never expire), and batch credits (absolute
//! reset each cycle, never roll over). Every balance mutation writes a
//! signed row to the transaction log in the same database transaction that
//! moves the balance, so the log replays to the stored balance.

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use streamsuite_shared::{CreditOperation, CreditType};

use crate::error::{BillingError, BillingResult};
use crate::plans;

/// A row in the credit transaction log
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub balance_after: i64,
    pub operation_type: CreditOperation,
    pub credit_type: CreditType,
    pub workflow_count: Option<i64>,
    pub description: Option<String>,
    pub metadata: Option<JsonValue>,
    pub created_at: OffsetDateTime,
}

/// A row in the batch credit transaction log
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BatchCreditTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub balance_after: i64,
    pub operation_type: CreditOperation,
    pub workflow_count: Option<i64>,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Balance across all three pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CreditBalance {
    pub credits: i64,
    pub bonus_credits: i64,
    pub batch_credits: i64,
}

/// Balance carried into a new cycle: the monthly allotment plus unspent
/// credits capped at half the allotment.
pub fn renewed_balance(monthly_credits: i64, current_balance: i64) -> i64 {
    monthly_credits + current_balance.min(monthly_credits / 2)
}

/// Pick the pool a deduction draws from. The preferred pool wins if it
/// covers the full amount, then the other pool; a deduction never splits
/// across pools.
pub fn choose_pool(
    credits: i64,
    bonus_credits: i64,
    use_bonus_first: bool,
    amount: i64,
) -> Option<CreditType> {
    let order = if use_bonus_first {
        [CreditType::Bonus, CreditType::Regular]
    } else {
        [CreditType::Regular, CreditType::Bonus]
    };

    order.into_iter().find(|credit_type| {
        let available = match credit_type {
            CreditType::Regular => credits,
            CreditType::Bonus => bonus_credits,
        };
        available >= amount
    })
}

/// Credit ledger service
pub struct CreditLedger {
    pool: PgPool,
}

impl CreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get all pool balances for a user; a missing profile reads as zero
    pub async fn get_balance(&self, user_id: Uuid) -> BillingResult<CreditBalance> {
        let row: Option<(i64, i64, i64)> = sqlx::query_as(
            "SELECT credits::bigint, bonus_credits::bigint, batch_credits::bigint
             FROM profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((credits, bonus_credits, batch_credits)) => CreditBalance {
                credits,
                bonus_credits,
                batch_credits,
            },
            None => CreditBalance {
                credits: 0,
                bonus_credits: 0,
                batch_credits: 0,
            },
        })
    }

    /// Deduct credits for a generation, honoring the user's pool preference.
    ///
    /// The deduction draws entirely from one pool: the preferred pool if it
    /// covers the full amount, otherwise the other pool if it covers the full
    /// amount. A deduction never splits across pools. When neither pool
    /// covers it the call fails and no state changes.
    ///
    /// The balance check and decrement are a single conditional UPDATE, so
    /// concurrent deductions serialize on the row and can never drive a
    /// balance negative.
    pub async fn deduct(
        &self,
        user_id: Uuid,
        amount: i64,
        description: &str,
        workflow_count: Option<i64>,
        metadata: Option<JsonValue>,
    ) -> BillingResult<CreditTransaction> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "deduction amount must be positive, got {}",
                amount
            )));
        }

        let row: Option<(i64, i64, bool)> = sqlx::query_as(
            "SELECT credits::bigint, bonus_credits::bigint, use_bonus_first
             FROM profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let (credits, bonus_credits, use_bonus_first) =
            row.ok_or_else(|| BillingError::NotFound(format!("profile {}", user_id)))?;

        match choose_pool(credits, bonus_credits, use_bonus_first, amount) {
            Some(credit_type) => {
                self.deduct_from_pool(user_id, amount, credit_type, description, workflow_count, metadata)
                    .await
            }
            None => Err(BillingError::InsufficientCredits {
                requested: amount,
                available: credits.max(bonus_credits),
            }),
        }
    }

    /// Atomically decrement one pool and append the log row
    async fn deduct_from_pool(
        &self,
        user_id: Uuid,
        amount: i64,
        credit_type: CreditType,
        description: &str,
        workflow_count: Option<i64>,
        metadata: Option<JsonValue>,
    ) -> BillingResult<CreditTransaction> {
        let mut tx = self.pool.begin().await?;

        let query = match credit_type {
            CreditType::Regular => {
                "UPDATE profiles
                 SET credits = credits - $2, updated_at = NOW()
                 WHERE id = $1 AND credits >= $2
                 RETURNING credits::bigint"
            }
            CreditType::Bonus => {
                "UPDATE profiles
                 SET bonus_credits = bonus_credits - $2, updated_at = NOW()
                 WHERE id = $1 AND bonus_credits >= $2
                 RETURNING bonus_credits::bigint"
            }
        };

        let balance_after: Option<(i64,)> = sqlx::query_as(query)
            .bind(user_id)
            .bind(amount)
            .fetch_optional(&mut *tx)
            .await?;

        // A concurrent deduction may have spent the pool between our read and
        // this UPDATE; the WHERE clause turns that race into a clean failure.
        let (balance_after,) = match balance_after {
            Some(row) => row,
            None => {
                tx.rollback().await?;
                return Err(BillingError::InsufficientCredits {
                    requested: amount,
                    available: 0,
                });
            }
        };

        let transaction = self
            .record_transaction(
                &mut tx,
                user_id,
                -amount,
                balance_after,
                CreditOperation::Generation,
                credit_type,
                workflow_count,
                Some(description),
                metadata,
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            credit_type = %credit_type,
            balance_after = balance_after,
            "Deducted credits"
        );

        Ok(transaction)
    }

    /// Add credits to a pool (admin adjustments, promotional grants)
    pub async fn add(
        &self,
        user_id: Uuid,
        amount: i64,
        credit_type: CreditType,
        operation: CreditOperation,
        description: &str,
        metadata: Option<JsonValue>,
    ) -> BillingResult<CreditTransaction> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }

        let mut tx = self.pool.begin().await?;

        let query = match credit_type {
            CreditType::Regular => {
                "UPDATE profiles
                 SET credits = credits + $2, updated_at = NOW()
                 WHERE id = $1
                 RETURNING credits::bigint"
            }
            CreditType::Bonus => {
                "UPDATE profiles
                 SET bonus_credits = bonus_credits + $2, updated_at = NOW()
                 WHERE id = $1
                 RETURNING bonus_credits::bigint"
            }
        };

        let row: Option<(i64,)> = sqlx::query_as(query)
            .bind(user_id)
            .bind(amount)
            .fetch_optional(&mut *tx)
            .await?;

        let (balance_after,) =
            row.ok_or_else(|| BillingError::NotFound(format!("profile {}", user_id)))?;

        let transaction = self
            .record_transaction(
                &mut tx,
                user_id,
                amount,
                balance_after,
                operation,
                credit_type,
                None,
                Some(description),
                metadata,
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            credit_type = %credit_type,
            balance_after = balance_after,
            "Added credits"
        );

        Ok(transaction)
    }

    /// Renew regular credits for a billing cycle.
    ///
    /// new_balance = monthly_allotment + min(current_balance, monthly_allotment / 2)
    ///
    /// The CTE captures the pre-renewal balance so the logged amount is the
    /// actual delta, and the whole renewal is one statement so a concurrent
    /// deduction cannot interleave between read and write.
    pub async fn renew_regular_credits(
        &self,
        user_id: Uuid,
        tier: streamsuite_shared::SubscriptionTier,
    ) -> BillingResult<CreditTransaction> {
        let monthly = plans::monthly_credits(tier);

        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, i64)> = sqlx::query_as(
            "WITH previous AS (
                 SELECT credits::bigint AS balance FROM profiles WHERE id = $1 FOR UPDATE
             )
             UPDATE profiles
             SET credits = $2 + LEAST(credits, $3), updated_at = NOW()
             FROM previous
             WHERE profiles.id = $1
             RETURNING profiles.credits::bigint, previous.balance",
        )
        .bind(user_id)
        .bind(monthly)
        .bind(monthly / 2)
        .fetch_optional(&mut *tx)
        .await?;

        let (balance_after, previous) =
            row.ok_or_else(|| BillingError::NotFound(format!("profile {}", user_id)))?;

        let transaction = self
            .record_transaction(
                &mut tx,
                user_id,
                balance_after - previous,
                balance_after,
                CreditOperation::Rollover,
                CreditType::Regular,
                None,
                Some(&format!("cycle renewal for {} plan", tier)),
                Some(serde_json::json!({
                    "monthly_credits": monthly,
                    "previous_balance": previous,
                    "rolled_over": (balance_after - monthly).max(0),
                })),
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            tier = %tier,
            previous_balance = previous,
            balance_after = balance_after,
            "Renewed regular credits"
        );

        Ok(transaction)
    }

    /// Reset batch credits to the tier's allotment. Batch credits never roll
    /// over, so this is an absolute set rather than an increment; the logged
    /// amount is the delta so the batch log still replays to the balance.
    pub async fn reset_batch_credits(
        &self,
        user_id: Uuid,
        tier: streamsuite_shared::SubscriptionTier,
    ) -> BillingResult<()> {
        let allotment = plans::monthly_batch_credits(tier);

        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, i64)> = sqlx::query_as(
            "WITH previous AS (
                 SELECT batch_credits::bigint AS balance FROM profiles WHERE id = $1 FOR UPDATE
             )
             UPDATE profiles
             SET batch_credits = $2, updated_at = NOW()
             FROM previous
             WHERE profiles.id = $1
             RETURNING profiles.batch_credits::bigint, previous.balance",
        )
        .bind(user_id)
        .bind(allotment)
        .fetch_optional(&mut *tx)
        .await?;

        let (balance_after, previous) =
            row.ok_or_else(|| BillingError::NotFound(format!("profile {}", user_id)))?;

        sqlx::query(
            "INSERT INTO batch_credit_transactions
                 (id, user_id, amount, balance_after, operation_type, description)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(balance_after - previous)
        .bind(balance_after)
        .bind(CreditOperation::Rollover)
        .bind(format!("batch credit reset for {} plan", tier))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            tier = %tier,
            batch_credits = allotment,
            "Reset batch credits"
        );

        Ok(())
    }

    /// Deduct batch credits for a batch generation
    pub async fn deduct_batch(
        &self,
        user_id: Uuid,
        amount: i64,
        workflow_count: i64,
        description: &str,
    ) -> BillingResult<BatchCreditTransaction> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "deduction amount must be positive, got {}",
                amount
            )));
        }

        let mut tx = self.pool.begin().await?;

        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE profiles
             SET batch_credits = batch_credits - $2, updated_at = NOW()
             WHERE id = $1 AND batch_credits >= $2
             RETURNING batch_credits::bigint",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        let (balance_after,) = match row {
            Some(row) => row,
            None => {
                tx.rollback().await?;
                let balance = self.get_balance(user_id).await?;
                return Err(BillingError::InsufficientCredits {
                    requested: amount,
                    available: balance.batch_credits,
                });
            }
        };

        let transaction: BatchCreditTransaction = sqlx::query_as(
            "INSERT INTO batch_credit_transactions
                 (id, user_id, amount, balance_after, operation_type, workflow_count, description)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id, user_id, amount, balance_after, operation_type,
                       workflow_count, description, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(-amount)
        .bind(balance_after)
        .bind(CreditOperation::Generation)
        .bind(workflow_count)
        .bind(description)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            workflow_count = workflow_count,
            balance_after = balance_after,
            "Deducted batch credits"
        );

        Ok(transaction)
    }

    /// Grant the full plan allotment on initial subscription activation:
    /// regular credits set absolutely (replacing any free-tier remainder)
    /// and batch credits set to the plan allotment.
    pub async fn grant_plan_credits(
        &self,
        user_id: Uuid,
        tier: streamsuite_shared::SubscriptionTier,
    ) -> BillingResult<CreditTransaction> {
        let mut tx = self.pool.begin().await?;
        let transaction = self.grant_plan_credits_in(&mut tx, user_id, tier).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    /// The grant inside a caller-owned transaction, so profile mutations that
    /// accompany it commit or roll back as one unit. Both pools are set
    /// absolutely; the logged amounts are the deltas from the previous
    /// balances so each log still replays to its stored balance.
    pub(crate) async fn grant_plan_credits_in(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        tier: streamsuite_shared::SubscriptionTier,
    ) -> BillingResult<CreditTransaction> {
        let plan = plans::get_plan(tier);

        let row: Option<(i64, i64, i64)> = sqlx::query_as(
            "WITH previous AS (
                 SELECT credits::bigint AS balance, batch_credits::bigint AS batch_balance
                 FROM profiles WHERE id = $1 FOR UPDATE
             )
             UPDATE profiles
             SET credits = $2, batch_credits = $3, updated_at = NOW()
             FROM previous
             WHERE profiles.id = $1
             RETURNING profiles.credits::bigint, previous.balance, previous.batch_balance",
        )
        .bind(user_id)
        .bind(plan.monthly_credits)
        .bind(plan.monthly_batch_credits)
        .fetch_optional(&mut **tx)
        .await?;

        let (balance_after, previous, batch_previous) =
            row.ok_or_else(|| BillingError::NotFound(format!("profile {}", user_id)))?;

        let transaction = self
            .record_transaction(
                tx,
                user_id,
                balance_after - previous,
                balance_after,
                CreditOperation::SubscriptionGrant,
                CreditType::Regular,
                None,
                Some(&format!("initial grant for {} plan", tier)),
                Some(serde_json::json!({
                    "previous_balance": previous,
                    "batch_credits": plan.monthly_batch_credits,
                })),
            )
            .await?;

        sqlx::query(
            "INSERT INTO batch_credit_transactions
                 (id, user_id, amount, balance_after, operation_type, description)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(plan.monthly_batch_credits - batch_previous)
        .bind(plan.monthly_batch_credits)
        .bind(CreditOperation::SubscriptionGrant)
        .bind(format!("initial batch allotment for {} plan", tier))
        .execute(&mut **tx)
        .await?;

        tracing::info!(
            user_id = %user_id,
            tier = %tier,
            credits = plan.monthly_credits,
            batch_credits = plan.monthly_batch_credits,
            "Granted plan credits"
        );

        Ok(transaction)
    }

    /// Recent transactions for a user, newest first
    pub async fn recent_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<CreditTransaction>> {
        let rows = sqlx::query_as(
            "SELECT id, user_id, amount, balance_after, operation_type, credit_type,
                    workflow_count, description, metadata, created_at
             FROM credit_transactions
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_transaction(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        amount: i64,
        balance_after: i64,
        operation: CreditOperation,
        credit_type: CreditType,
        workflow_count: Option<i64>,
        description: Option<&str>,
        metadata: Option<JsonValue>,
    ) -> BillingResult<CreditTransaction> {
        let transaction: CreditTransaction = sqlx::query_as(
            "INSERT INTO credit_transactions
                 (id, user_id, amount, balance_after, operation_type, credit_type,
                  workflow_count, description, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id, user_id, amount, balance_after, operation_type, credit_type,
                       workflow_count, description, metadata, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(amount)
        .bind(balance_after)
        .bind(operation)
        .bind(credit_type)
        .bind(workflow_count)
        .bind(description)
        .bind(metadata)
        .fetch_one(&mut **tx)
        .await?;

        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renewed_balance_caps_rollover_at_half() {
        // 80 unspent of a 100 allotment rolls over only 50
        assert_eq!(renewed_balance(100, 80), 150);
        // 10 unspent rolls over in full
        assert_eq!(renewed_balance(100, 10), 110);
        // exactly at the cap
        assert_eq!(renewed_balance(100, 50), 150);
        // more banked than the allotment itself
        assert_eq!(renewed_balance(250, 300), 375);
        // empty balance renews to the allotment
        assert_eq!(renewed_balance(25, 0), 25);
    }

    #[test]
    fn test_renewed_balance_odd_allotment_floors_cap() {
        // free tier: 5 monthly, cap floor(5/2) = 2
        assert_eq!(renewed_balance(5, 4), 7);
        assert_eq!(renewed_balance(5, 2), 7);
        assert_eq!(renewed_balance(5, 1), 6);
    }
}
