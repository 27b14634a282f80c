//! Ledger data model: wallets, transactions and monetary amounts

pub mod amount;
pub mod transaction;
pub mod wallet;

pub use amount::{format_minor, parse_amount};
pub use transaction::{
    generate_reference, merge_metadata, Direction, NewTransaction, Transaction, TransactionStatus,
    TransactionType,
};
pub use wallet::{VirtualAccount, Wallet};
