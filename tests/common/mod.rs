#![allow(dead_code)]

use rust_decimal::Decimal;
use settlement_core::application::state_machine::{NewTransaction, TransactionService};
use settlement_core::application::webhook::WebhookOutcome;
use settlement_core::config::SettlementConfig;
use settlement_core::domain::event::GatewayProvider;
use settlement_core::domain::money::Money;
use settlement_core::domain::ports::{EcoSavings, ItemDetails};
use settlement_core::domain::transaction::{PaymentMethod, TransactionKind};
use settlement_core::error::Result;
use settlement_core::gateway::GatewayRegistry;
use settlement_core::gateway::simulated::SimulatedGateway;
use settlement_core::infrastructure::in_memory::{
    InMemoryItemCatalog, InMemoryNgoFunds, InMemoryTransactionStore, RecordingEcoImpactService,
    RecordingScoringService, StaticUserDirectory,
};
use settlement_core::interfaces::http::{AppState, Collaborators};
use std::sync::Arc;
use std::time::Duration;

pub const WEBHOOK_SECRET: &str = "whsec_integration";

/// Everything wired in memory, with handles kept on the adapters tests inspect.
pub struct Harness {
    pub state: AppState,
    pub gateway: Arc<SimulatedGateway>,
    pub catalog: InMemoryItemCatalog,
    pub funds: InMemoryNgoFunds,
    pub scoring: RecordingScoringService,
    pub eco_impact: RecordingEcoImpactService,
}

fn item(id: &str, owner: &str, category: &str, eco: bool) -> ItemDetails {
    ItemDetails {
        id: id.into(),
        owner_id: owner.into(),
        category: category.into(),
        eco_savings: eco.then(|| EcoSavings {
            co2_saved: 4.2,
            water_saved: 120.0,
            waste_reduced: 0.8,
            energy_saved: 11.0,
            trees_equivalent: 0.2,
        }),
    }
}

pub fn harness() -> Harness {
    harness_with(SettlementConfig::default())
}

pub fn harness_with(config: SettlementConfig) -> Harness {
    let catalog = InMemoryItemCatalog::with_items([
        item("phone", "seller", "electronics", true),
        item("laptop", "seller", "electronics", false),
        item("novel", "seller", "books", false),
        item("bike", "alice", "sports", true),
        item("guitar", "bob", "musical_instruments", false),
    ]);
    let funds = InMemoryNgoFunds::new();
    let scoring = RecordingScoringService::new();
    let eco_impact = RecordingEcoImpactService::new();
    let gateway = Arc::new(SimulatedGateway::new(WEBHOOK_SECRET));
    let gateways = GatewayRegistry::new(Duration::from_secs(2)).register(gateway.clone());

    let state = AppState::new(
        &config,
        gateways,
        Collaborators {
            repository: Arc::new(InMemoryTransactionStore::new()),
            items: Arc::new(catalog.clone()),
            ngo_funds: Arc::new(funds.clone()),
            scoring: Arc::new(scoring.clone()),
            eco_impact: Arc::new(eco_impact.clone()),
            users: Arc::new(StaticUserDirectory::new(["seller"])),
        },
    )
    .unwrap();

    Harness {
        state,
        gateway,
        catalog,
        funds,
        scoring,
        eco_impact,
    }
}

impl Harness {
    pub fn transactions(&self) -> &Arc<TransactionService> {
        self.state.engine.transactions()
    }

    pub fn signed(&self, event_type: &str, order_id: &str) -> (Vec<u8>, String) {
        let payload = SimulatedGateway::event_payload(event_type, order_id, Some("pay_int_1"));
        let signature = self.gateway.sign(&payload);
        (payload, signature)
    }

    pub async fn webhook(&self, event_type: &str, order_id: &str) -> Result<WebhookOutcome> {
        let (payload, signature) = self.signed(event_type, order_id);
        self.state
            .webhooks
            .handle_event(GatewayProvider::Simulated, &payload, Some(&signature))
            .await
    }
}

pub fn money(value: Decimal) -> Money {
    Money::new(value).unwrap()
}

pub fn sale(item_id: &str, amount: Decimal) -> NewTransaction {
    NewTransaction {
        buyer_id: "buyer".into(),
        seller_id: "seller".into(),
        item_id: item_id.into(),
        kind: TransactionKind::Sale,
        amount: money(amount),
        currency: None,
        payment_method: PaymentMethod::Upi,
        ngo_id: None,
        ngo_donation: None,
        emi_months: None,
        shipping_address: None,
        notes: None,
    }
}

pub fn donation(item_id: &str, amount: Decimal, ngo_id: &str) -> NewTransaction {
    NewTransaction {
        kind: TransactionKind::Donation,
        ngo_id: Some(ngo_id.into()),
        ..sale(item_id, amount)
    }
}
