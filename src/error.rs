//! Error types raised while assembling and checking a journal.

use thiserror::Error;

/// Violations of the journal's checking policy when it runs in
/// [`CheckingStyle::Error`](crate::journal::CheckingStyle) mode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// An account name was used that had never been declared known.
    #[error("Unknown account '{0}'")]
    UnknownAccount(String),
    /// A payee was used that had never been declared known.
    #[error("Unknown payee '{0}'")]
    UnknownPayee(String),
    /// A commodity symbol was used that had never been declared known.
    #[error("Unknown commodity '{0}'")]
    UnknownCommodity(String),
    /// A metadata tag was used that had never been declared known.
    #[error("Unknown metadata tag '{0}'")]
    UnknownTag(String),
}

/// Failures detected while auto-balancing a transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    /// The postings that must balance do not sum to zero.
    #[error("Transaction does not balance")]
    Unbalanced,
    /// More than one posting was left without an amount.
    #[error("Only one posting with null amount allowed per transaction")]
    MultipleNullAmounts,
    /// An amountless posting's account name ends in a digit or closing
    /// bracket, which usually indicates a mistyped amount.
    #[error("Posting with null amount's account may be misspelled:\n  \"{0}\"")]
    MisspelledAccount(String),
    /// A posting still had no amount once balancing finished.
    #[error("There cannot be null amounts after balancing a transaction")]
    NullAmountRemains,
}

/// Structural failures raised while inserting into the journal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Alias expansion revisited a name it had already expanded.
    #[error("Infinite recursion on alias expansion for {0}")]
    AliasCycle(String),
    /// A transaction reused a UUID with a different set of postings.
    #[error("Transactions with the same UUID must have equivalent postings")]
    DuplicateMismatch,
}

/// Umbrella error for every failure the journal can produce.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A checking-policy violation.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// A transaction balancing failure.
    #[error(transparent)]
    Balance(#[from] BalanceError),
    /// A structural consistency failure.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ParseError::UnknownAccount("Assets:Bank".into()).to_string(),
            "Unknown account 'Assets:Bank'"
        );
        assert_eq!(
            ParseError::UnknownTag("project".into()).to_string(),
            "Unknown metadata tag 'project'"
        );
        assert_eq!(
            BalanceError::Unbalanced.to_string(),
            "Transaction does not balance"
        );
        assert_eq!(
            RuntimeError::AliasCycle("bank".into()).to_string(),
            "Infinite recursion on alias expansion for bank"
        );
    }

    #[test]
    fn test_umbrella_wraps_transparently() {
        let err = LedgerError::from(ParseError::UnknownPayee("Acme".into()));
        assert_eq!(err.to_string(), "Unknown payee 'Acme'");

        let err = LedgerError::from(BalanceError::MisspelledAccount("Assets:Cash9".into()));
        assert_eq!(
            err.to_string(),
            "Posting with null amount's account may be misspelled:\n  \"Assets:Cash9\""
        );
    }
}
