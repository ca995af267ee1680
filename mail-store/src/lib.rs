pub mod entities;
pub mod error;
pub mod memory;
pub mod notify;
pub mod render;
pub mod store;

pub use entities::*;
pub use error::StoreError;
pub use notify::{Event, NotificationBus};
pub use store::MailboxStore;
