use crate::domain::ledger::TransactionCode;
use crate::domain::ports::{GatewayConfirmation, HostedCheckout, PaymentGateway, PaymentRequest};
use crate::domain::wallet::Amount;
use crate::error::{Result, WalletError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

/// Deterministic stand-in for the hosted-checkout provider.
///
/// Produces stable payment URLs and provider transaction ids derived from the
/// reference code, and parses the generic confirmation payload the webhook
/// endpoint receives. The real provider protocol (bank codes, signature
/// verification, redirect pages) is out of scope and would live in a sibling
/// adapter implementing the same port.
#[derive(Clone)]
pub struct StaticGateway {
    provider: String,
}

impl StaticGateway {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }

    pub fn provider_tx_id(&self, reference: &TransactionCode) -> String {
        format!("{}-{}", self.provider, reference)
    }
}

#[async_trait]
impl PaymentGateway for StaticGateway {
    async fn create_payment_url(&self, request: &PaymentRequest) -> Result<HostedCheckout> {
        let mut checkout_fields = HashMap::new();
        checkout_fields.insert("amount".to_string(), request.amount.value().to_string());
        checkout_fields.insert("currency".to_string(), request.currency.to_string());
        checkout_fields.insert("return_url".to_string(), request.return_url.clone());
        checkout_fields.insert("client_ip".to_string(), request.ip_address.clone());

        Ok(HostedCheckout {
            payment_url: format!(
                "https://checkout.{}.example/pay?ref={}&amount={}",
                self.provider,
                request.reference,
                request.amount.value()
            ),
            provider: self.provider.clone(),
            provider_transaction_id: self.provider_tx_id(&request.reference),
            checkout_fields,
        })
    }

    fn parse_confirmation(&self, payload: &serde_json::Value) -> Result<GatewayConfirmation> {
        let status = payload
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::Validation("confirmation missing status".to_string()))?;
        let amount_raw = payload
            .get("amount")
            .and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::Validation("confirmation missing amount".to_string()))?;
        let amount = Decimal::from_str(amount_raw)
            .map_err(|e| WalletError::Validation(format!("bad confirmation amount: {e}")))
            .and_then(Amount::new)?;

        Ok(GatewayConfirmation {
            success: status == "success",
            amount,
            provider_transaction_id: payload
                .get("provider_tx")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            reference_code: payload
                .get("ref")
                .and_then(|v| v.as_str())
                .map(TransactionCode::new),
            raw: payload.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wallet::Currency;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn gateway() -> StaticGateway {
        StaticGateway::new("simbank")
    }

    #[tokio::test]
    async fn checkout_url_embeds_reference_and_amount() {
        let checkout = gateway()
            .create_payment_url(&PaymentRequest {
                reference: TransactionCode::new("dep-1"),
                amount: Amount::new(dec!(150)).unwrap(),
                currency: Currency::new("VND"),
                return_url: "https://app.example/return".to_string(),
                ip_address: "10.0.0.1".to_string(),
            })
            .await
            .unwrap();

        assert!(checkout.payment_url.contains("ref=dep-1"));
        assert_eq!(checkout.provider, "simbank");
        assert_eq!(checkout.provider_transaction_id, "simbank-dep-1");
        assert_eq!(checkout.checkout_fields["currency"], "VND");
    }

    #[test]
    fn parses_success_and_failure_payloads() {
        let ok = gateway()
            .parse_confirmation(&json!({
                "status": "success",
                "amount": "100",
                "provider_tx": "simbank-dep-1",
                "ref": "dep-1",
            }))
            .unwrap();
        assert!(ok.success);
        assert_eq!(ok.amount.value(), dec!(100));
        assert_eq!(ok.reference_code, Some(TransactionCode::new("dep-1")));

        let failed = gateway()
            .parse_confirmation(&json!({"status": "failed", "amount": "100"}))
            .unwrap();
        assert!(!failed.success);
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(matches!(
            gateway().parse_confirmation(&json!({"amount": "100"})),
            Err(WalletError::Validation(_))
        ));
        assert!(matches!(
            gateway().parse_confirmation(&json!({"status": "success", "amount": "-5"})),
            Err(WalletError::Validation(_))
        ));
    }
}
