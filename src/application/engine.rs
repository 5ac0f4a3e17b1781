use crate::application::state_machine::{NewTransaction, TransactionService};
use crate::domain::money::Currency;
use crate::domain::transaction::{Actor, Transaction};
use crate::error::Result;
use crate::gateway::{GatewayRegistry, OrderRequest};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiated {
    pub transaction: Transaction,
    pub gateway_order_id: String,
    pub client_token: String,
}

/// Entry point for new purchases: prices and records the transaction, then
/// opens the matching order with the payment gateway.
pub struct SettlementEngine {
    transactions: Arc<TransactionService>,
    gateways: GatewayRegistry,
    default_currency: Currency,
}

impl SettlementEngine {
    pub fn new(
        transactions: Arc<TransactionService>,
        gateways: GatewayRegistry,
        default_currency: Currency,
    ) -> Self {
        Self {
            transactions,
            gateways,
            default_currency,
        }
    }

    pub fn transactions(&self) -> &Arc<TransactionService> {
        &self.transactions
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    /// Creates a `pending` transaction and its gateway order.
    ///
    /// If the gateway cannot open the order, the transaction is cancelled (which
    /// releases the item) and the gateway error is returned to the caller.
    pub async fn initiate(&self, request: NewTransaction) -> Result<Initiated> {
        let currency = request.currency.unwrap_or(self.default_currency);
        let gateway = self.gateways.select(request.payment_method, currency)?;

        let tx = self.transactions.create(request).await?;
        let order_request = OrderRequest {
            transaction_id: tx.id,
            amount: tx.total_amount,
            currency: tx.currency,
            payment_method: tx.payment_method,
            buyer_id: tx.buyer_id.clone(),
            seller_id: tx.seller_id.clone(),
            item_id: tx.item_id.clone(),
        };

        let order = match self.gateways.create_order(&gateway, &order_request).await {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!(
                    transaction_id = %tx.id,
                    provider = %gateway.provider(),
                    error = %e,
                    "Gateway order failed, cancelling transaction"
                );
                if let Err(cancel_err) = self
                    .transactions
                    .cancel(tx.id, "gateway order could not be created", Actor::System)
                    .await
                {
                    tracing::error!(transaction_id = %tx.id, error = %cancel_err, "Failed to cancel orphaned transaction");
                }
                return Err(e);
            }
        };

        let transaction = self
            .transactions
            .attach_gateway_order(tx.id, gateway.provider(), &order.gateway_order_id)
            .await?;

        tracing::info!(
            transaction_id = %transaction.id,
            provider = %gateway.provider(),
            gateway_order_id = %order.gateway_order_id,
            "Payment initiated"
        );

        Ok(Initiated {
            transaction,
            gateway_order_id: order.gateway_order_id,
            client_token: order.client_token,
        })
    }
}
