pub mod client;
pub mod models;

use async_trait::async_trait;

use crate::api::models::{GatewayMessage, HistoryQuery, SendReceipt};
use crate::error::GatewayError;

/// The external WhatsApp delivery service.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_text(&self, address: &str, text: &str) -> Result<SendReceipt, GatewayError>;

    /// Returns the conversation's recent records, oldest first.
    async fn find_messages(&self, address: &str, query: HistoryQuery) -> Result<Vec<GatewayMessage>, GatewayError>;
}
