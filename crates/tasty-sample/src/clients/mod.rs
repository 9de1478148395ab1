//! Domain clients over the generic `tastytopping` resource types.

mod entry_client;
mod tree_client;
mod user_client;

pub use entry_client::EntryClient;
pub use tree_client::TreeClient;
pub use user_client::UserClient;
