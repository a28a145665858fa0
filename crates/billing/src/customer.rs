//! Stripe customer management

use sqlx::PgPool;
use stripe::{CreateCustomer, Customer, CustomerId};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Customer service for managing Stripe customers
pub struct CustomerService {
    stripe: StripeClient,
    pool: PgPool,
}

impl CustomerService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Create or get the Stripe customer for a user
    pub async fn get_or_create_customer(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> BillingResult<Customer> {
        let existing: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM profiles WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((Some(customer_id),)) = existing {
            let customer_id = customer_id
                .parse::<CustomerId>()
                .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

            let customer = Customer::retrieve(self.stripe.inner(), &customer_id, &[]).await?;

            return Ok(customer);
        }

        self.create_customer(user_id, email).await
    }

    /// Create a new Stripe customer and store its ID on the profile
    pub async fn create_customer(&self, user_id: Uuid, email: &str) -> BillingResult<Customer> {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("platform".to_string(), "streamsuite".to_string());

        let params = CreateCustomer {
            email: Some(email),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(self.stripe.inner(), params).await?;

        sqlx::query(
            "UPDATE profiles SET stripe_customer_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(customer.id.as_str())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer.id,
            "Created Stripe customer"
        );

        Ok(customer)
    }

    /// Get the Stripe customer ID for a user
    pub async fn get_customer_id(&self, user_id: Uuid) -> BillingResult<CustomerId> {
        let result: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM profiles WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        match result {
            Some((Some(id),)) => id
                .parse::<CustomerId>()
                .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e))),
            _ => Err(BillingError::CustomerNotFound(user_id.to_string())),
        }
    }

    /// Resolve a user ID from a Stripe customer ID (used by webhook reconciliation)
    pub async fn user_id_for_customer(&self, customer_id: &str) -> BillingResult<Uuid> {
        let result: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM profiles WHERE stripe_customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;

        match result {
            Some((id,)) => Ok(id),
            None => Err(BillingError::CustomerNotFound(customer_id.to_string())),
        }
    }
}
