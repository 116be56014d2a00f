use fee_payment_service::config::{
    Config, DatabaseConfig, FeeSettings, GatewayConfig, ReceiptConfig, ServerConfig, SmtpConfig,
};
use fee_payment_service::Application;
use secrecy::Secret;
use serde_json::{json, Value};

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

/// Gateway policy with every branch pinned to the happy path.
pub fn approving_gateway() -> GatewayConfig {
    GatewayConfig {
        decline_rate: 0.0,
        card_otp_rate: 0.0,
        otp_success_rate: 1.0,
        settle_success_rate: 1.0,
        latency_ms: 0,
        seed: Some(0),
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_gateway(approving_gateway()).await
    }

    /// Spawns the service on a random port against the in-memory store,
    /// with the given (usually pinned) gateway policy.
    pub async fn spawn_with_gateway(gateway: GatewayConfig) -> Self {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
            },
            database: DatabaseConfig {
                url: None, // In-memory store
                db_name: format!("fee_test_{}", uuid::Uuid::new_v4()),
            },
            gateway,
            fees: FeeSettings {
                surcharge_pct: "5".parse().expect("surcharge literal"),
                max_installments: 4,
            },
            receipts: ReceiptConfig {
                dir: std::env::temp_dir().join(format!("fee-receipts-{}", uuid::Uuid::new_v4())),
            },
            smtp: SmtpConfig {
                enabled: false,
                host: "localhost".to_string(),
                port: 587,
                user: String::new(),
                password: Secret::new(String::new()),
                from_email: "accounts@campus.example".to_string(),
                from_name: "Accounts Office".to_string(),
            },
            catalog: Default::default(),
            service_name: "fee-payment-service-test".to_string(),
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();

        // Wait for the server to come up by polling the health endpoint.
        let health_url = format!("http://127.0.0.1:{}/health", port);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address: format!("http://127.0.0.1:{}", port),
            client,
        }
    }

    pub async fn initiate(&self, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}/payments/initiate", self.address))
            .json(&body)
            .send()
            .await
            .expect("initiate request failed")
    }

    /// Initiates a payment for `student_id` and returns the summary JSON.
    pub async fn initiate_ok(&self, student_id: &str, fee_types: Value, n: u32, k: u32) -> Value {
        let response = self
            .initiate(json!({
                "student_id": student_id,
                "college_id": "clg-arts",
                "department_id": "dep-cs",
                "student_email": "student@campus.example",
                "fee_types": fee_types,
                "installment_option": n,
                "current_installment": k,
            }))
            .await;
        assert_eq!(response.status(), 201, "initiate should create a record");
        response.json().await.expect("initiate summary JSON")
    }

    pub async fn process(&self, payment_id: &str, method: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/payments/{}/process", self.address, payment_id))
            .json(&json!({ "payment_method": method, "payment_details": {} }))
            .send()
            .await
            .expect("process request failed")
    }

    pub async fn verify_otp(&self, payment_id: &str, otp: &str) -> reqwest::Response {
        self.client
            .post(format!(
                "{}/payments/{}/verify-otp",
                self.address, payment_id
            ))
            .json(&json!({ "otp": otp }))
            .send()
            .await
            .expect("verify-otp request failed")
    }

    pub async fn complete(&self, payment_id: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/payments/{}/complete", self.address, payment_id))
            .send()
            .await
            .expect("complete request failed")
    }

    pub async fn get_payment(&self, payment_id: &str) -> Value {
        self.client
            .get(format!("{}/payments/{}", self.address, payment_id))
            .send()
            .await
            .expect("status request failed")
            .json()
            .await
            .expect("payment summary JSON")
    }

    pub async fn get_json(&self, path: &str) -> Value {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("GET request failed")
            .json()
            .await
            .expect("response JSON")
    }

    /// Drives one payment through initiate -> process -> complete with the
    /// happy-path gateway, returning the completed payment id.
    pub async fn settle_payment(
        &self,
        student_id: &str,
        fee_types: Value,
        n: u32,
        k: u32,
    ) -> String {
        let summary = self.initiate_ok(student_id, fee_types, n, k).await;
        let id = summary["id"].as_str().expect("payment id").to_string();

        let processed: Value = self
            .process(&id, "UPI")
            .await
            .json()
            .await
            .expect("process JSON");
        assert_eq!(processed["status"], "PROCESSING");

        let completed: Value = self
            .complete(&id)
            .await
            .json()
            .await
            .expect("complete JSON");
        assert_eq!(completed["status"], "COMPLETED");

        id
    }
}
