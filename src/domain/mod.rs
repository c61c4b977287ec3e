//! Domain layer: plain data structs, value objects, and the narrow ports
//! the application services are injected with.

pub mod events;
pub mod external;
pub mod ledger;
pub mod ports;
pub mod wallet;
