// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Order persistence.
//!
//! Orders land here once the processor has validated them. The insert runs
//! inside a transaction and the `order_number` column is UNIQUE, so a
//! redelivered message cannot create a second row for the same order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresOrderStore;
pub use sqlite::SqliteOrderStore;

/// Order payload carried inside an envelope's `content` field.
///
/// Producers serialize this with PascalCase keys, so the field is renamed
/// rather than the struct adopting a rename-all rule. A missing key
/// deserializes to an empty string and is rejected by validation instead
/// of failing the parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderData {
    /// Business order number, unique per order.
    #[serde(rename = "OrderNumber", default)]
    pub order_number: String,
}

/// Persistence contract for processed orders.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert an order inside a transaction. Returns the store-assigned id.
    async fn save_order(&self, order: &OrderData) -> Result<i64>;

    /// Verify the backing database answers a trivial query.
    async fn health_check(&self) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_data_deserializes_pascal_case() {
        let order: OrderData = serde_json::from_str(r#"{"OrderNumber":"ORD-1001"}"#).unwrap();
        assert_eq!(order.order_number, "ORD-1001");
    }

    #[test]
    fn test_order_data_missing_number_defaults_to_empty() {
        let order: OrderData = serde_json::from_str("{}").unwrap();
        assert!(order.order_number.is_empty());
    }

    #[test]
    fn test_order_data_ignores_camel_case_key() {
        // The wire format is PascalCase; a camelCase key is just an unknown
        // field and leaves the order number empty.
        let order: OrderData = serde_json::from_str(r#"{"orderNumber":"ORD-1001"}"#).unwrap();
        assert!(order.order_number.is_empty());
    }
}
