//! Application layer: orchestrates the domain model against its ports.
//!
//! [`state_machine::TransactionService`] is the single writer of transaction
//! rows. [`engine::SettlementEngine`] opens gateway orders on top of it,
//! [`webhook::WebhookReconciler`] feeds gateway notifications back in, and
//! [`swap::SwapCoordinator`] moves linked exchange pairs together.

pub mod engine;
pub mod side_effects;
pub mod state_machine;
pub mod swap;
pub mod webhook;
