//! Hosted checkout adapter
//!
//! The booking path calls [`CheckoutAdapter::create_checkout_session`]
//! synchronously; payment completion arrives later as a webhook.

use crate::config::CheckoutConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Hosted checkout request
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    /// Product name shown on the payment page
    pub product_name: String,
    /// Price
    pub amount: Decimal,
    /// Lowercase ISO currency
    pub currency: String,
    /// Redirect after payment
    pub success_url: String,
    /// Redirect after cancellation
    pub cancel_url: String,
    /// Echoed back in the completion webhook
    pub metadata: BTreeMap<String, String>,
}

/// Issued checkout session
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutSession {
    /// Provider session id
    pub id: String,
    /// Payment page URL
    pub url: String,
}

/// Payment provider checkout API
#[async_trait]
pub trait CheckoutAdapter: Send + Sync {
    /// Create a hosted checkout session
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;
}

/// Amount in the currency's minor unit
pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| Error::Checkout(format!("Amount out of range: {}", amount)))
}

/// Stripe Checkout Sessions client
pub struct StripeCheckout {
    client: reqwest::Client,
    config: CheckoutConfig,
}

impl StripeCheckout {
    /// Create client
    pub fn new(config: CheckoutConfig) -> Result<Self> {
        if config.secret_key.is_empty() {
            return Err(Error::Config("Checkout secret key is not set".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn form(&self, request: &CheckoutRequest) -> Result<Vec<(String, String)>> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                to_minor_units(request.amount)?.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.product_name.clone(),
            ),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }
        Ok(form)
    }
}

#[async_trait]
impl CheckoutAdapter for StripeCheckout {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let url = format!(
            "{}/v1/checkout/sessions",
            self.config.api_base.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .form(&self.form(request)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "Checkout session request rejected");
            return Err(Error::Checkout(format!(
                "Payment provider returned {}: {}",
                status, body
            )));
        }

        let session: CheckoutSession = response.json().await?;
        tracing::debug!(checkout_session_id = %session.id, "Checkout session created");
        Ok(session)
    }
}

/// In-memory checkout adapter for local runs and tests
#[derive(Debug, Clone, Default)]
pub struct MockCheckout {
    requests: Arc<Mutex<Vec<CheckoutRequest>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockCheckout {
    /// Create adapter that always succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CheckoutAdapter for MockCheckout {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        if *self.fail.lock() {
            return Err(Error::Checkout("Mock checkout unavailable".to_string()));
        }
        let mut requests = self.requests.lock();
        requests.push(request.clone());
        let id = format!("cs_test_{:04}", requests.len());
        Ok(CheckoutSession {
            url: format!("https://checkout.example.com/pay/{}", id),
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> CheckoutRequest {
        let mut metadata = BTreeMap::new();
        metadata.insert("type".to_string(), "booked_session".to_string());
        CheckoutRequest {
            product_name: "virtual with coach".to_string(),
            amount: dec!(50.00),
            currency: "usd".to_string(),
            success_url: "http://localhost:3000/confirmation?session_id=1".to_string(),
            cancel_url: "http://localhost:3000/payment-cancel?session_id=1".to_string(),
            metadata,
        }
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(dec!(50.00)).unwrap(), 5000);
        assert_eq!(to_minor_units(dec!(19.99)).unwrap(), 1999);
        assert_eq!(to_minor_units(dec!(0.5)).unwrap(), 50);
    }

    #[test]
    fn test_stripe_form_fields() {
        let mut config = CheckoutConfig::default();
        config.secret_key = "sk_test".to_string();
        let client = StripeCheckout::new(config).unwrap();

        let form = client.form(&request()).unwrap();
        assert!(form.contains(&("mode".to_string(), "payment".to_string())));
        assert!(form.contains(&(
            "line_items[0][price_data][unit_amount]".to_string(),
            "5000".to_string()
        )));
        assert!(form.contains(&("metadata[type]".to_string(), "booked_session".to_string())));
    }

    #[test]
    fn test_stripe_requires_key() {
        assert!(StripeCheckout::new(CheckoutConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_mock_checkout() {
        let mock = MockCheckout::new();
        let session = mock.create_checkout_session(&request()).await.unwrap();
        assert_eq!(session.id, "cs_test_0001");
        assert_eq!(mock.requests().len(), 1);

        mock.set_failing(true);
        assert!(mock.create_checkout_session(&request()).await.is_err());
    }
}
