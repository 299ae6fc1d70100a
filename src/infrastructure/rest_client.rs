//! Signed REST Client
//!
//! The exchange's call-response API: form-encoded POSTs to a single
//! endpoint, selected by a `method` field, signed HMAC-SHA512 over the
//! exact body with the API secret, key and signature in headers. Responses
//! wrap their payload in `{"success": 1, "return": {...}}` or carry a
//! top-level error string.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha512;
use tracing::{debug, info};
use url::form_urlencoded;

use crate::domain::entities::order::{Order, OrderSide, OrderType};
use crate::domain::repositories::exchange_rest::{
    AccountBalance, ExchangeRest, PlacedOrder, RestError, RestResult,
};
use crate::infrastructure::credentials::CredentialProvider;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    success: u8,
    #[serde(default)]
    error: Option<String>,
    #[serde(rename = "return", default)]
    payload: Option<Value>,
}

pub struct HttpExchangeRest {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    /// Strictly increasing request nonce, seeded from the wall clock.
    nonce: AtomicU64,
}

impl HttpExchangeRest {
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        HttpExchangeRest {
            client: Client::new(),
            base_url: base_url.into(),
            credentials,
            nonce: AtomicU64::new(Utc::now().timestamp_millis() as u64),
        }
    }

    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::SeqCst)
    }

    fn sign(secret: &str, body: &str) -> RestResult<String> {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
            .map_err(|e| RestError::Credentials(format!("bad secret: {}", e)))?;
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// POST one signed call and unwrap the response envelope.
    async fn call(&self, method: &str, params: &[(&str, String)]) -> RestResult<Value> {
        let creds = self
            .credentials
            .credentials()
            .map_err(|e| RestError::Credentials(e.to_string()))?;

        let body = {
            let mut form = form_urlencoded::Serializer::new(String::new());
            form.append_pair("method", method);
            form.append_pair("timestamp", &Utc::now().timestamp_millis().to_string());
            form.append_pair("nonce", &self.next_nonce().to_string());
            for (name, value) in params {
                form.append_pair(name, value);
            }
            form.finish()
        };
        let signature = Self::sign(&creds.api_secret, &body)?;

        let url = format!("{}/tapi", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Key", creds.api_key)
            .header("Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| RestError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RestError::Http(format!("{} - {}", status, text)));
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| RestError::Parse(e.to_string()))?;
        if envelope.success != 1 {
            return Err(RestError::Api(
                envelope.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        debug!(method, "api call succeeded");
        envelope
            .payload
            .ok_or_else(|| RestError::Parse("missing return payload".to_string()))
    }
}

/// The exchange serializes amounts either as numbers or strings.
fn as_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl ExchangeRest for HttpExchangeRest {
    async fn place_order(&self, order: &Order) -> RestResult<PlacedOrder> {
        let order_type = match order.order_type {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        };
        let payload = self
            .call(
                "trade",
                &[
                    ("pair", order.pair.clone()),
                    ("type", order.side.as_str().to_string()),
                    ("order_type", order_type.to_string()),
                    ("price", order.price.to_string()),
                    ("amount", order.amount.to_string()),
                ],
            )
            .await?;

        let exchange_order_id = match payload.get("order_id") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => return Err(RestError::Parse("missing order_id".to_string())),
        };
        info!(
            pair = %order.pair,
            side = %order.side,
            exchange_order_id = %exchange_order_id,
            "order placed"
        );
        Ok(PlacedOrder { exchange_order_id })
    }

    async fn cancel_order(
        &self,
        pair: &str,
        exchange_order_id: &str,
        side: OrderSide,
    ) -> RestResult<()> {
        self.call(
            "cancelOrder",
            &[
                ("pair", pair.to_string()),
                ("order_id", exchange_order_id.to_string()),
                ("type", side.as_str().to_string()),
            ],
        )
        .await?;
        info!(pair, exchange_order_id, "order cancelled");
        Ok(())
    }

    async fn get_balance(&self) -> RestResult<Vec<AccountBalance>> {
        let payload = self.call("getInfo", &[]).await?;
        let available = payload
            .get("balance")
            .and_then(Value::as_object)
            .ok_or_else(|| RestError::Parse("missing balance object".to_string()))?;
        let held = payload.get("balance_hold").and_then(Value::as_object);

        let mut balances = Vec::with_capacity(available.len());
        for (currency, value) in available {
            balances.push(AccountBalance {
                currency: currency.clone(),
                available: as_amount(value).unwrap_or(0.0),
                held: held
                    .and_then(|h| h.get(currency))
                    .and_then(as_amount)
                    .unwrap_or(0.0),
            });
        }
        Ok(balances)
    }

    async fn generate_token(&self) -> RestResult<String> {
        let payload = self.call("generateToken", &[]).await?;
        payload
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RestError::Parse("missing token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_hex_sha512() {
        let signature = HttpExchangeRest::sign("secret", "method=getInfo&nonce=1").unwrap();
        assert_eq!(signature.len(), 128);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
        // stable for a fixed secret and body
        let again = HttpExchangeRest::sign("secret", "method=getInfo&nonce=1").unwrap();
        assert_eq!(signature, again);
        let other = HttpExchangeRest::sign("secret", "method=getInfo&nonce=2").unwrap();
        assert_ne!(signature, other);
    }

    #[test]
    fn test_nonce_is_strictly_increasing() {
        struct NoCreds;
        impl CredentialProvider for NoCreds {
            fn credentials(
                &self,
            ) -> Result<
                crate::infrastructure::credentials::ExchangeCredentials,
                crate::infrastructure::credentials::CredentialError,
            > {
                Err(crate::infrastructure::credentials::CredentialError::Missing(
                    "none".to_string(),
                ))
            }
        }
        let rest = HttpExchangeRest::new("https://example.com", Arc::new(NoCreds));
        let first = rest.next_nonce();
        let second = rest.next_nonce();
        assert!(second > first);
    }

    #[test]
    fn test_envelope_error_decodes() {
        let envelope: ApiEnvelope = serde_json::from_str(
            r#"{"success": 0, "error": "Invalid credentials", "error_code": "invalid_credentials"}"#,
        )
        .unwrap();
        assert_eq!(envelope.success, 0);
        assert_eq!(envelope.error.as_deref(), Some("Invalid credentials"));
        assert!(envelope.payload.is_none());
    }
}
