//! In-memory bookkeeping core for a double-entry ledger
//!
//! This crate provides the hierarchical chart of accounts, the journal
//! that registers transactions against it, and the incrementally
//! updated per-account statistics that keep repeated balance queries
//! cheap. Parsing, report formatting, and expression evaluation live
//! outside; they feed [`Posting`]s and [`Transaction`]s in through
//! [`Journal::add_transaction`] and read aggregates back out through
//! the account queries.

#![warn(clippy::all)]
#![warn(missing_docs)]

/// Module for hierarchical account structure
pub mod account;

/// Module for single-commodity amounts
pub mod amount;

/// Module for multi-commodity balance management
pub mod balance;

/// Module for commodity definitions and the known-symbol registry
pub mod commodity;

/// Module for the session clock behind date-relative statistics
pub mod datetime;

/// Module for the journal error taxonomy
pub mod error;

/// Module for the journal data structure
pub mod journal;

/// Module for posting/entry representation
pub mod posting;

/// Module for transaction representation and balancing
pub mod transaction;

/// Module for per-account report bookkeeping and statistics
pub mod xdata;

pub use account::{Account, AccountFlags, AccountId, AccountTree, UNKNOWN_NAME};
pub use amount::Amount;
pub use balance::Balance;
pub use commodity::{Commodity, CommodityFlags, CommodityPool};
pub use error::{BalanceError, LedgerError, ParseError, RuntimeError};
pub use journal::{CheckingStyle, Journal};
pub use posting::{Posting, PostingExtData, PostingFlags, PostingId, PostingStatus};
pub use transaction::{
    Transaction, TransactionBuilder, TransactionFlags, TransactionStatus, UUID_TAG,
};
pub use xdata::{AccountDetails, AccountExtData, AccountXDataFlags};
