//! Domain layer: the transaction aggregate, its value objects, the pure fee and
//! tax arithmetic, and the ports the application layer talks through.

pub mod event;
pub mod fees;
pub mod money;
pub mod ports;
pub mod transaction;
