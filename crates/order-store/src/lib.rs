pub mod commit;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use commit::{StepCommit, Transition};
pub use error::{Result, StoreError};
pub use event::{Event, EventId};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use store::{OrderStore, OrderStoreExt};
