pub mod dues;
pub mod fees;
pub mod gateway;
pub mod metrics;
pub mod orchestrator;
pub mod receipts;
pub mod repository;

pub use dues::DuesService;
pub use gateway::SimulatedGateway;
pub use metrics::{get_metrics, init_metrics};
pub use orchestrator::PaymentService;
pub use repository::{InMemoryPaymentStore, MongoPaymentRepository};
