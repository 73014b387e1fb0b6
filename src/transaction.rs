//! Transactions and the balancing pass that runs before insertion.

use crate::account::AccountTree;
use crate::amount::Amount;
use crate::balance::Balance;
use crate::error::BalanceError;
use crate::posting::{Posting, PostingFlags, PostingId};
use bitflags::bitflags;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Metadata tag key that gives a transaction a stable identity across
/// repeated insertions.
pub const UUID_TAG: &str = "UUID";

/// Location of an item in its source file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Position {
    /// Path of the source file.
    pub pathname: String,
    /// First line of the item.
    pub beg_line: usize,
    /// Last line of the item.
    pub end_line: usize,
    /// Zero-based order of the item within the file.
    pub sequence: usize,
}

/// Value side of a metadata tag. Tags may be bare markers or carry text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagData {
    /// The tag's value, absent for bare markers.
    pub value: Option<String>,
}

bitflags! {
    /// Item-level bits carried by a transaction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TransactionFlags: u8 {
        /// Produced by a pass rather than written by the user.
        const GENERATED = 0x01;
        /// Scratch transaction owned by a report pass; clearing
        /// bookkeeping leaves its postings alone.
        const TEMP = 0x02;
    }
}

/// Clearing state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// No clearing mark.
    #[default]
    Uncleared,
    /// Confirmed against an external statement.
    Cleared,
    /// Written but awaiting confirmation.
    Pending,
}

/// A dated, named group of postings.
///
/// Build one (directly or through [`TransactionBuilder`]), give it
/// postings, and hand it to
/// [`Journal::add_transaction`](crate::journal::Journal::add_transaction).
/// Until then the transaction owns its postings; insertion moves them
/// into the journal's arena and leaves [`posting_ids`](Self::posting_ids)
/// pointing at them.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Primary date.
    pub date: NaiveDate,
    /// Secondary (effective) date, if any.
    pub aux_date: Option<NaiveDate>,
    /// Clearing state, inherited by postings that have none.
    pub status: TransactionStatus,
    /// Check number or similar short code.
    pub code: Option<String>,
    /// Who the money moved to or from.
    pub payee: String,
    /// Free-form note.
    pub note: Option<String>,
    /// Item-level bits.
    pub flags: TransactionFlags,
    /// Metadata tags.
    pub metadata: BTreeMap<String, TagData>,
    /// Source location, when known.
    pub pos: Option<Position>,
    /// Journal-wide insertion order, assigned when added.
    pub sequence: usize,
    postings: Vec<Posting>,
    pub(crate) posting_ids: SmallVec<[PostingId; 4]>,
}

impl Transaction {
    /// Creates an empty transaction for `date` and `payee`.
    pub fn new(date: NaiveDate, payee: impl Into<String>) -> Self {
        Transaction {
            date,
            aux_date: None,
            status: TransactionStatus::default(),
            code: None,
            payee: payee.into(),
            note: None,
            flags: TransactionFlags::empty(),
            metadata: BTreeMap::new(),
            pos: None,
            sequence: 0,
            postings: Vec::new(),
            posting_ids: SmallVec::new(),
        }
    }

    /// Appends a posting. Only meaningful before insertion.
    pub fn add_posting(&mut self, posting: Posting) {
        self.postings.push(posting);
    }

    /// Postings still owned by this transaction. Empty once inserted.
    pub fn postings(&self) -> &[Posting] {
        &self.postings
    }

    /// Arena handles of this transaction's postings. Empty until inserted.
    pub fn posting_ids(&self) -> &[PostingId] {
        &self.posting_ids
    }

    pub(crate) fn take_postings(&mut self) -> Vec<Posting> {
        std::mem::take(&mut self.postings)
    }

    /// Value of a metadata tag, if the tag is present and carries one.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|data| data.value.as_deref())
    }

    /// True when the tag is present at all, with or without a value.
    pub fn has_tag(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    /// Adds or replaces a metadata tag.
    pub fn set_tag(&mut self, key: impl Into<String>, value: Option<String>) {
        self.metadata.insert(key.into(), TagData { value });
    }

    /// The transaction's identity: its UUID tag when present, otherwise
    /// its insertion sequence rendered as text.
    pub fn id(&self) -> String {
        match self.tag(UUID_TAG) {
            Some(uuid) => uuid.to_string(),
            None => self.sequence.to_string(),
        }
    }

    /// Balances the transaction in place.
    ///
    /// Sums the postings that must balance; at most one of them may be
    /// amountless, and it absorbs the negated remainder, split into one
    /// posting per commodity when several are involved.
    ///
    /// Returns `Ok(false)` when every posting is amountless, which marks
    /// the transaction as one to ignore entirely.
    pub fn finalize(&mut self, accounts: &AccountTree) -> Result<bool, BalanceError> {
        let mut balance = Balance::new();
        let mut saw_amount = false;
        let mut null_post: Option<usize> = None;

        for (index, posting) in self.postings.iter().enumerate() {
            if !posting.must_balance() {
                continue;
            }
            match &posting.amount {
                Some(amount) => {
                    saw_amount = true;
                    balance.add_amount(amount);
                }
                None => {
                    if let Some(first) = null_post {
                        let this_name = accounts.full_name(posting.account);
                        if ends_with_special_char(this_name) {
                            return Err(BalanceError::MisspelledAccount(this_name.to_string()));
                        }
                        let first_name = accounts.full_name(self.postings[first].account);
                        if ends_with_special_char(first_name) {
                            return Err(BalanceError::MisspelledAccount(first_name.to_string()));
                        }
                        return Err(BalanceError::MultipleNullAmounts);
                    }
                    null_post = Some(index);
                }
            }
        }

        if let Some(index) = null_post {
            if saw_amount {
                let remainder = std::mem::take(&mut balance);
                let account = self.postings[index].account;
                let status = self.postings[index].status;
                let mut generated: Vec<Posting> = Vec::new();
                let mut first = true;

                for (symbol, quantity) in remainder.amounts() {
                    let amount = if symbol.is_empty() {
                        Amount::new(-quantity)
                    } else {
                        Amount::with_commodity(-quantity, symbol)
                    };
                    if first {
                        let posting = &mut self.postings[index];
                        posting.amount = Some(amount);
                        posting.flags |= PostingFlags::CALCULATED;
                        first = false;
                    } else {
                        let mut posting = Posting::with_amount(account, amount);
                        posting.flags |= PostingFlags::GENERATED | PostingFlags::CALCULATED;
                        posting.status = status;
                        generated.push(posting);
                    }
                }
                if first {
                    // The others cancelled exactly; the amountless
                    // posting still receives an explicit zero.
                    let posting = &mut self.postings[index];
                    posting.amount = Some(Amount::new(Decimal::ZERO));
                    posting.flags |= PostingFlags::CALCULATED;
                }
                self.postings.extend(generated);
            }
        } else if saw_amount && !balance.is_zero() {
            return Err(BalanceError::Unbalanced);
        }

        if self.postings.iter().all(|posting| posting.amount.is_none()) {
            return Ok(false);
        }
        if self.postings.iter().any(|posting| posting.amount.is_none()) {
            return Err(BalanceError::NullAmountRemains);
        }
        Ok(true)
    }
}

fn ends_with_special_char(name: &str) -> bool {
    name.chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, ')' | '}' | ']'))
}

/// Fluent construction of a [`Transaction`].
#[derive(Debug)]
pub struct TransactionBuilder {
    transaction: Transaction,
}

impl TransactionBuilder {
    /// Starts a transaction for `date` and `payee`.
    pub fn new(date: NaiveDate, payee: impl Into<String>) -> Self {
        TransactionBuilder {
            transaction: Transaction::new(date, payee),
        }
    }

    /// Sets the clearing state.
    pub fn status(mut self, status: TransactionStatus) -> Self {
        self.transaction.status = status;
        self
    }

    /// Sets the short code.
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.transaction.code = Some(code.into());
        self
    }

    /// Sets the note.
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.transaction.note = Some(note.into());
        self
    }

    /// Sets the secondary date.
    pub fn aux_date(mut self, date: NaiveDate) -> Self {
        self.transaction.aux_date = Some(date);
        self
    }

    /// Adds a bare metadata tag.
    pub fn tag(mut self, key: impl Into<String>) -> Self {
        self.transaction.set_tag(key, None);
        self
    }

    /// Adds a metadata tag with a value.
    pub fn tag_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.transaction.set_tag(key, Some(value.into()));
        self
    }

    /// Gives the transaction a UUID identity.
    pub fn uuid(self, uuid: impl Into<String>) -> Self {
        self.tag_value(UUID_TAG, uuid)
    }

    /// Adds a posting of `amount` against `account`.
    pub fn posting(mut self, account: crate::account::AccountId, amount: Amount) -> Self {
        self.transaction.add_posting(Posting::with_amount(account, amount));
        self
    }

    /// Adds an amountless posting that will absorb the balancing
    /// remainder.
    pub fn balancing_posting(mut self, account: crate::account::AccountId) -> Self {
        self.transaction.add_posting(Posting::new(account));
        self
    }

    /// Adds a fully constructed posting.
    pub fn with_posting(mut self, posting: Posting) -> Self {
        self.transaction.add_posting(posting);
        self
    }

    /// Finishes construction.
    pub fn build(self) -> Transaction {
        self.transaction
    }
}
