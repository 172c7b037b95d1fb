//! Stripe payment intents and refunds.

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use flextk_auth::http::{json as read_json, transport_error};
use flextk_common::{Error, Result, SecretString};
use flextk_config::settings::StripeSettings;

const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// A PaymentIntent as Stripe returns it, reduced to the fields flextk shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    /// Amount in the currency's smallest unit.
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_method_types: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub created: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundReason {
    Duplicate,
    Fraudulent,
    RequestedByCustomer,
}

impl RefundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundReason::Duplicate => "duplicate",
            RefundReason::Fraudulent => "fraudulent",
            RefundReason::RequestedByCustomer => "requested_by_customer",
        }
    }
}

impl fmt::Display for RefundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefundReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "duplicate" => Ok(RefundReason::Duplicate),
            "fraudulent" => Ok(RefundReason::Fraudulent),
            "requested_by_customer" => Ok(RefundReason::RequestedByCustomer),
            other => Err(Error::InvalidInput(format!(
                "Refund reason must be duplicate, fraudulent or requested_by_customer, not '{}'",
                other
            ))),
        }
    }
}

/// Parameters for [`StripeClient::create_payment_intent`].
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntentParams {
    pub amount: i64,
    pub payment_method_types: Vec<String>,
    pub currency: String,
    pub metadata: BTreeMap<String, String>,
    pub customer: Option<String>,
}

impl PaymentIntentParams {
    /// A card payment in USD.
    pub fn new(amount: i64) -> Self {
        Self {
            amount,
            payment_method_types: vec!["card".to_string()],
            currency: "usd".to_string(),
            metadata: BTreeMap::new(),
            customer: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(Error::InvalidInput("amount must be positive".to_string()));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::InvalidInput(format!(
                "currency must be a three-letter ISO code, not '{}'",
                self.currency
            )));
        }
        if self.payment_method_types.is_empty() {
            return Err(Error::InvalidInput(
                "at least one payment method type is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Stripe's bracketed form encoding.
    fn to_form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("amount".to_string(), self.amount.to_string()),
            ("currency".to_string(), self.currency.to_ascii_lowercase()),
        ];
        for kind in &self.payment_method_types {
            form.push(("payment_method_types[]".to_string(), kind.clone()));
        }
        for (key, value) in &self.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }
        if let Some(customer) = &self.customer {
            form.push(("customer".to_string(), customer.clone()));
        }
        form
    }
}

/// Stripe REST client authenticated with a secret key.
pub struct StripeClient {
    api_key: SecretString,
    base_url: String,
    http: Client,
}

impl StripeClient {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            base_url: STRIPE_API_BASE.to_string(),
            http: Client::new(),
        }
    }

    pub fn from_settings(settings: &StripeSettings) -> Self {
        Self::new(settings.api_key.clone())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
        what: &str,
    ) -> Result<T> {
        let response = self
            .http
            .post(self.url(path))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.api_key.expose()),
            )
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        read_json(response, what).await
    }

    /// # Errors
    /// - `InvalidInput` for a non-positive amount, a malformed currency or
    ///   no payment method types
    /// - `Auth` if the API key is rejected
    /// - `Provider` for any other Stripe error
    pub async fn create_payment_intent(
        &self,
        params: &PaymentIntentParams,
    ) -> Result<PaymentIntent> {
        params.validate()?;
        let intent: PaymentIntent = self
            .post("payment_intents", &params.to_form(), "Stripe create intent")
            .await?;
        info!(
            "PaymentIntent created: {} ({} {})",
            intent.id, intent.amount, intent.currency
        );
        Ok(intent)
    }

    pub async fn confirm_payment_intent(
        &self,
        intent_id: &str,
        payment_method: Option<&str>,
    ) -> Result<PaymentIntent> {
        let mut form = Vec::new();
        if let Some(method) = payment_method {
            form.push(("payment_method".to_string(), method.to_string()));
        }
        let intent: PaymentIntent = self
            .post(
                &format!("payment_intents/{}/confirm", intent_id),
                &form,
                "Stripe confirm intent",
            )
            .await?;
        info!("PaymentIntent confirmed: {} ({})", intent.id, intent.status);
        Ok(intent)
    }

    /// # Errors
    /// - `NotFound` if no intent has this id
    pub async fn get_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        let response = self
            .http
            .get(self.url(&format!("payment_intents/{}", intent_id)))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.api_key.expose()),
            )
            .send()
            .await
            .map_err(|e| transport_error("Stripe get intent", e))?;
        read_json(response, "Stripe get intent").await
    }

    pub async fn create_refund(
        &self,
        intent_id: &str,
        amount: i64,
        reason: RefundReason,
    ) -> Result<Refund> {
        if amount <= 0 {
            return Err(Error::InvalidInput("refund amount must be positive".to_string()));
        }
        let form = vec![
            ("payment_intent".to_string(), intent_id.to_string()),
            ("amount".to_string(), amount.to_string()),
            ("reason".to_string(), reason.as_str().to_string()),
        ];
        let refund: Refund = self.post("refunds", &form, "Stripe refund").await?;
        info!(
            "Refund {} created for {}: {} ({})",
            refund.id, intent_id, amount, reason
        );
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> StripeClient {
        StripeClient::new("sk_test_123".into()).with_base_url(server.uri())
    }

    fn intent_json(status: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "pi_1",
            "object": "payment_intent",
            "amount": 2000,
            "currency": "usd",
            "status": status,
            "payment_method_types": ["card"],
            "metadata": { "order": "42" },
            "client_secret": "pi_1_secret",
            "created": 1714557600
        })
    }

    #[test]
    fn test_form_encoding() {
        let mut params = PaymentIntentParams::new(2000);
        params.metadata.insert("order".to_string(), "42".to_string());
        params.customer = Some("cus_1".to_string());

        let form = params.to_form();
        assert!(form.contains(&("payment_method_types[]".to_string(), "card".to_string())));
        assert!(form.contains(&("metadata[order]".to_string(), "42".to_string())));
        assert!(form.contains(&("customer".to_string(), "cus_1".to_string())));
    }

    #[test]
    fn test_params_validation() {
        assert!(PaymentIntentParams::new(0).validate().is_err());

        let mut params = PaymentIntentParams::new(100);
        params.currency = "dollars".to_string();
        assert!(params.validate().is_err());

        let mut params = PaymentIntentParams::new(100);
        params.payment_method_types.clear();
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_refund_reason_parsing() {
        assert_eq!(
            "requested_by_customer".parse::<RefundReason>().unwrap(),
            RefundReason::RequestedByCustomer
        );
        assert!("because".parse::<RefundReason>().is_err());
    }

    #[tokio::test]
    async fn test_create_payment_intent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header_eq("authorization", "Bearer sk_test_123"))
            .and(body_string_contains("amount=2000"))
            .and(body_string_contains("currency=usd"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(intent_json("requires_payment_method")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let intent = client(&server)
            .create_payment_intent(&PaymentIntentParams::new(2000))
            .await
            .unwrap();
        assert_eq!(intent.id, "pi_1");
        assert_eq!(intent.metadata.get("order").map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn test_confirm_and_get() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents/pi_1/confirm"))
            .and(body_string_contains("payment_method=pm_card_visa"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent_json("succeeded")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent_json("succeeded")))
            .mount(&server)
            .await;

        let client = client(&server);
        let confirmed = client
            .confirm_payment_intent("pi_1", Some("pm_card_visa"))
            .await
            .unwrap();
        assert_eq!(confirmed.status, "succeeded");
        assert_eq!(client.get_payment_intent("pi_1").await.unwrap(), confirmed);
    }

    #[tokio::test]
    async fn test_create_refund() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/refunds"))
            .and(body_string_contains("reason=duplicate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "re_1",
                "amount": 500,
                "currency": "usd",
                "status": "succeeded",
                "reason": "duplicate",
                "payment_intent": "pi_1"
            })))
            .mount(&server)
            .await;

        let refund = client(&server)
            .create_refund("pi_1", 500, RefundReason::Duplicate)
            .await
            .unwrap();
        assert_eq!(refund.id, "re_1");
        assert_eq!(refund.payment_intent.as_deref(), Some("pi_1"));
    }

    #[tokio::test]
    async fn test_card_error_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": { "type": "card_error", "message": "Your card was declined." }
            })))
            .mount(&server)
            .await;

        let result = client(&server).confirm_payment_intent("pi_1", None).await;
        assert!(matches!(result, Err(Error::Provider(msg)) if msg.contains("declined")));
    }

    #[tokio::test]
    async fn test_bad_key_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = client(&server).get_payment_intent("pi_1").await;
        assert!(matches!(result, Err(Error::Auth(_))));
    }
}
