//! Payment gateway port and its policy-driven simulator.
//!
//! A production deployment would put a real processor integration behind the
//! same three-call contract. The simulator stands in for the network: every
//! probability (and the RNG seed) lives in [`GatewayPolicy`], so tests can
//! pin each branch instead of fighting inline randomness.

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rust_decimal::Decimal;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{FailureReason, PaymentMethod};

/// Outcome of an authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// Authorized; the payment can move to settlement.
    Processing,
    /// The issuer demands a second factor before authorizing.
    RequiresOtp,
    /// Declined outright.
    Failed,
}

#[derive(Debug, Clone)]
pub struct AuthorizeResponse {
    pub status: AuthorizationStatus,
    /// Correlation id for the in-flight authorization; links the OTP and
    /// settlement calls back to this attempt.
    pub gateway_reference: String,
    pub failure_reason: Option<FailureReason>,
}

#[derive(Debug, Clone)]
pub struct OtpResponse {
    pub approved: bool,
    pub failure_reason: Option<FailureReason>,
}

#[derive(Debug, Clone)]
pub struct SettleResponse {
    pub success: bool,
    /// Gateway-issued transaction id, present on success.
    pub transaction_id: Option<String>,
    pub failure_reason: Option<FailureReason>,
}

/// The three calls the orchestrator depends on.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(
        &self,
        amount: Decimal,
        method: PaymentMethod,
        details: &serde_json::Value,
    ) -> anyhow::Result<AuthorizeResponse>;

    async fn verify_otp(
        &self,
        gateway_reference: &str,
        otp: &str,
    ) -> anyhow::Result<OtpResponse>;

    async fn settle(&self, gateway_reference: &str) -> anyhow::Result<SettleResponse>;
}

/// Behaviour knobs for the simulator.
#[derive(Debug, Clone)]
pub struct GatewayPolicy {
    /// Probability an authorization is declined outright.
    pub decline_rate: f64,
    /// Probability a `Card` authorization demands an OTP. Other methods
    /// never do.
    pub card_otp_rate: f64,
    /// Probability an OTP check passes.
    pub otp_success_rate: f64,
    /// Probability a settlement succeeds.
    pub settle_success_rate: f64,
    /// Simulated network round-trip per call.
    pub latency: Duration,
    /// Fixed seed for reproducible runs; entropy-seeded when `None`.
    pub seed: Option<u64>,
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            decline_rate: 0.10,
            card_otp_rate: 0.80,
            otp_success_rate: 0.95,
            settle_success_rate: 0.95,
            latency: Duration::from_millis(400),
            seed: None,
        }
    }
}

impl GatewayPolicy {
    /// Everything succeeds immediately, no OTP. The baseline test policy.
    pub fn always_approve() -> Self {
        Self {
            decline_rate: 0.0,
            card_otp_rate: 0.0,
            otp_success_rate: 1.0,
            settle_success_rate: 1.0,
            latency: Duration::ZERO,
            seed: Some(0),
        }
    }
}

pub struct SimulatedGateway {
    policy: GatewayPolicy,
    rng: Mutex<StdRng>,
}

impl SimulatedGateway {
    pub fn new(policy: GatewayPolicy) -> Self {
        let rng = match policy.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            policy,
            rng: Mutex::new(rng),
        }
    }

    /// Bernoulli draw. Rates pinned to 0 or 1 never touch the RNG, so forced
    /// policies stay deterministic independent of call order.
    fn chance(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.rng.lock().expect("gateway rng poisoned").gen::<f64>() < rate
    }

    fn decline_reason(&self, method: PaymentMethod) -> FailureReason {
        let roll = self
            .rng
            .lock()
            .expect("gateway rng poisoned")
            .gen_range(0..10u8);
        match method {
            // Card declines skew toward issuer-side reasons.
            PaymentMethod::Card => match roll {
                0..=3 => FailureReason::InsufficientFunds,
                4..=7 => FailureReason::CardDeclined,
                8 => FailureReason::PaymentTimedOut,
                _ => FailureReason::GatewayError,
            },
            _ => match roll {
                0..=3 => FailureReason::InsufficientFunds,
                4..=6 => FailureReason::PaymentTimedOut,
                _ => FailureReason::GatewayError,
            },
        }
    }

    fn settle_reason(&self) -> FailureReason {
        if self
            .rng
            .lock()
            .expect("gateway rng poisoned")
            .gen::<bool>()
        {
            FailureReason::PaymentTimedOut
        } else {
            FailureReason::GatewayError
        }
    }

    async fn round_trip(&self) {
        if !self.policy.latency.is_zero() {
            tokio::time::sleep(self.policy.latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn authorize(
        &self,
        amount: Decimal,
        method: PaymentMethod,
        _details: &serde_json::Value,
    ) -> anyhow::Result<AuthorizeResponse> {
        self.round_trip().await;

        let gateway_reference = format!("gw_ref_{}", Uuid::new_v4().simple());

        if self.chance(self.policy.decline_rate) {
            let reason = self.decline_reason(method);
            tracing::info!(
                %gateway_reference,
                %amount,
                method = %method,
                reason = %reason,
                "authorization declined"
            );
            return Ok(AuthorizeResponse {
                status: AuthorizationStatus::Failed,
                gateway_reference,
                failure_reason: Some(reason),
            });
        }

        let status = if method == PaymentMethod::Card && self.chance(self.policy.card_otp_rate) {
            AuthorizationStatus::RequiresOtp
        } else {
            AuthorizationStatus::Processing
        };

        tracing::debug!(%gateway_reference, %amount, method = %method, ?status, "authorization issued");
        Ok(AuthorizeResponse {
            status,
            gateway_reference,
            failure_reason: None,
        })
    }

    async fn verify_otp(
        &self,
        gateway_reference: &str,
        _otp: &str,
    ) -> anyhow::Result<OtpResponse> {
        self.round_trip().await;

        if self.chance(self.policy.otp_success_rate) {
            tracing::debug!(%gateway_reference, "OTP accepted");
            Ok(OtpResponse {
                approved: true,
                failure_reason: None,
            })
        } else {
            tracing::info!(%gateway_reference, "OTP rejected");
            Ok(OtpResponse {
                approved: false,
                failure_reason: Some(FailureReason::AuthenticationFailed),
            })
        }
    }

    async fn settle(&self, gateway_reference: &str) -> anyhow::Result<SettleResponse> {
        self.round_trip().await;

        if self.chance(self.policy.settle_success_rate) {
            let transaction_id = format!("GTXN-{}", Uuid::new_v4().simple());
            tracing::debug!(%gateway_reference, %transaction_id, "settlement confirmed");
            Ok(SettleResponse {
                success: true,
                transaction_id: Some(transaction_id),
                failure_reason: None,
            })
        } else {
            let reason = self.settle_reason();
            tracing::info!(%gateway_reference, reason = %reason, "settlement failed");
            Ok(SettleResponse {
                success: false,
                transaction_id: None,
                failure_reason: Some(reason),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn policy(decline: f64, otp: f64) -> GatewayPolicy {
        GatewayPolicy {
            decline_rate: decline,
            card_otp_rate: otp,
            latency: Duration::ZERO,
            seed: Some(7),
            ..GatewayPolicy::always_approve()
        }
    }

    #[tokio::test]
    async fn forced_decline_reports_a_reason() {
        let gateway = SimulatedGateway::new(policy(1.0, 0.0));
        let response = gateway
            .authorize(dec!(500), PaymentMethod::Upi, &serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(response.status, AuthorizationStatus::Failed);
        assert!(response.failure_reason.is_some());
        assert!(response.gateway_reference.starts_with("gw_ref_"));
    }

    #[tokio::test]
    async fn card_with_forced_otp_challenges() {
        let gateway = SimulatedGateway::new(policy(0.0, 1.0));
        let response = gateway
            .authorize(dec!(500), PaymentMethod::Card, &serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(response.status, AuthorizationStatus::RequiresOtp);
    }

    #[tokio::test]
    async fn only_cards_are_challenged() {
        let gateway = SimulatedGateway::new(policy(0.0, 1.0));
        for method in [PaymentMethod::Upi, PaymentMethod::NetBanking] {
            let response = gateway
                .authorize(dec!(500), method, &serde_json::Value::Null)
                .await
                .unwrap();
            assert_eq!(response.status, AuthorizationStatus::Processing);
        }
    }

    #[tokio::test]
    async fn non_card_declines_never_report_card_declined() {
        let gateway = SimulatedGateway::new(policy(1.0, 0.0));
        for _ in 0..50 {
            let response = gateway
                .authorize(dec!(500), PaymentMethod::NetBanking, &serde_json::Value::Null)
                .await
                .unwrap();
            assert_ne!(
                response.failure_reason,
                Some(FailureReason::CardDeclined)
            );
        }
    }

    #[tokio::test]
    async fn forced_settlement_issues_a_transaction_id() {
        let gateway = SimulatedGateway::new(GatewayPolicy::always_approve());
        let response = gateway.settle("gw_ref_test").await.unwrap();
        assert!(response.success);
        assert!(response.transaction_id.unwrap().starts_with("GTXN-"));
    }

    #[tokio::test]
    async fn forced_otp_rejection_is_an_authentication_failure() {
        let mut p = GatewayPolicy::always_approve();
        p.otp_success_rate = 0.0;
        let gateway = SimulatedGateway::new(p);
        let response = gateway.verify_otp("gw_ref_test", "123456").await.unwrap();
        assert!(!response.approved);
        assert_eq!(
            response.failure_reason,
            Some(FailureReason::AuthenticationFailed)
        );
    }

    #[tokio::test]
    async fn seeded_policies_reproduce_their_draws() {
        let run = |seed| async move {
            let gateway = SimulatedGateway::new(GatewayPolicy {
                decline_rate: 0.5,
                card_otp_rate: 0.5,
                latency: Duration::ZERO,
                seed: Some(seed),
                ..GatewayPolicy::default()
            });
            let mut outcomes = Vec::new();
            for _ in 0..20 {
                let response = gateway
                    .authorize(dec!(100), PaymentMethod::Card, &serde_json::Value::Null)
                    .await
                    .unwrap();
                outcomes.push(response.status);
            }
            outcomes
        };

        assert_eq!(run(42).await, run(42).await);
    }
}
