//! Postings: the individual debit and credit lines of a transaction.

use crate::account::AccountId;
use crate::amount::Amount;
use crate::transaction::{Position, TagData};
use bitflags::bitflags;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

bitflags! {
    /// Behavior bits carried by a posting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PostingFlags: u16 {
        /// Produced by balancing rather than written by the user.
        const GENERATED = 0x0001;
        /// Scratch posting owned by a report pass, never by the journal.
        const TEMP = 0x0002;
        /// Excluded from transaction balancing unless MUST_BALANCE is set.
        const VIRTUAL = 0x0010;
        /// Forces a virtual posting back into the balancing sum.
        const MUST_BALANCE = 0x0020;
        /// The amount was computed, not written by the user.
        const CALCULATED = 0x0040;
        /// The posting's cost leg is virtual.
        const COST_VIRTUAL = 0x0400;
        /// Held back from its account until another copy of the same
        /// transaction arrives or deferred postings are applied.
        const DEFERRED = 0x1000;
    }
}

/// Clearing state of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostingStatus {
    /// No clearing mark.
    #[default]
    Uncleared,
    /// Confirmed against an external statement.
    Cleared,
    /// Written but awaiting confirmation.
    Pending,
}

/// Stable handle to a posting in the journal's posting arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostingId(pub(crate) usize);

impl PostingId {
    /// Arena slot index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Report-pass bookkeeping attached to a posting on demand.
///
/// Absent until a pass touches the posting. Cleared wholesale between
/// passes by [`Journal::clear_xdata`](crate::journal::Journal::clear_xdata).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingExtData {
    /// The posting has been walked by the current pass.
    pub visited: bool,
    /// The posting has been folded into its account's running total.
    pub considered: bool,
    /// Pass-assigned date that overrides the posting's own.
    pub date: Option<NaiveDate>,
}

/// One line of a transaction: an account, an optional amount, and the
/// item-level details (dates, status, metadata) that may override the
/// enclosing transaction's.
///
/// `date`, `payee`, and `status` may be left unset when building; the
/// journal fills them from the transaction as it attaches the posting.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    /// The account this posting books against.
    pub account: AccountId,
    /// The amount, or `None` to have balancing supply it.
    pub amount: Option<Amount>,
    /// Posting-level date overriding the transaction date.
    pub date: Option<NaiveDate>,
    /// Clearing state.
    pub status: PostingStatus,
    /// Behavior bits.
    pub flags: PostingFlags,
    /// Posting-level payee overriding the transaction payee.
    pub payee: Option<String>,
    /// Timeclock check-in moment, if this posting came from one.
    pub checkin: Option<NaiveDateTime>,
    /// Timeclock check-out moment.
    pub checkout: Option<NaiveDateTime>,
    /// Metadata tags attached to this posting.
    pub metadata: BTreeMap<String, TagData>,
    /// Source location, when known.
    pub pos: Option<Position>,
    /// Journal-wide insertion order, assigned when attached.
    pub sequence: usize,
    pub(crate) xact_sequence: Option<usize>,
    xdata: Option<PostingExtData>,
}

impl Posting {
    /// Creates an amountless posting against `account`.
    pub fn new(account: AccountId) -> Self {
        Posting {
            account,
            amount: None,
            date: None,
            status: PostingStatus::default(),
            flags: PostingFlags::empty(),
            payee: None,
            checkin: None,
            checkout: None,
            metadata: BTreeMap::new(),
            pos: None,
            sequence: 0,
            xact_sequence: None,
            xdata: None,
        }
    }

    /// Creates a posting of `amount` against `account`.
    pub fn with_amount(account: AccountId, amount: Amount) -> Self {
        let mut posting = Posting::new(account);
        posting.amount = Some(amount);
        posting
    }

    /// The posting's effective date: a report override wins over the
    /// posting's own date.
    pub fn date(&self) -> Option<NaiveDate> {
        self.xdata
            .as_ref()
            .and_then(|xdata| xdata.date)
            .or(self.date)
    }

    /// Sequence of the transaction this posting belongs to, once attached.
    pub fn transaction_sequence(&self) -> Option<usize> {
        self.xact_sequence
    }

    /// True for postings excluded from balancing.
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(PostingFlags::VIRTUAL)
    }

    /// True for postings held back for deferred application.
    pub fn is_deferred(&self) -> bool {
        self.flags.contains(PostingFlags::DEFERRED)
    }

    /// Whether this posting participates in the balancing sum.
    pub fn must_balance(&self) -> bool {
        !self.is_virtual() || self.flags.contains(PostingFlags::MUST_BALANCE)
    }

    /// Source file this posting came from, when known.
    pub fn filename(&self) -> Option<&str> {
        self.pos.as_ref().map(|pos| pos.pathname.as_str())
    }

    /// True once report bookkeeping has been attached.
    pub fn has_xdata(&self) -> bool {
        self.xdata.is_some()
    }

    /// Report bookkeeping, if attached.
    pub fn xdata(&self) -> Option<&PostingExtData> {
        self.xdata.as_ref()
    }

    /// Report bookkeeping, attaching a fresh record on first use.
    pub fn ensure_xdata(&mut self) -> &mut PostingExtData {
        self.xdata.get_or_insert_with(PostingExtData::default)
    }

    /// Drops report bookkeeping entirely.
    pub fn clear_xdata(&mut self) {
        self.xdata = None;
    }

    /// True when a pass has walked this posting.
    pub fn is_visited(&self) -> bool {
        self.xdata.as_ref().is_some_and(|xdata| xdata.visited)
    }

    /// True when an account total has already absorbed this posting.
    pub fn is_considered(&self) -> bool {
        self.xdata.as_ref().is_some_and(|xdata| xdata.considered)
    }

    /// Flags the posting as walked by the current pass.
    pub fn mark_visited(&mut self) {
        self.ensure_xdata().visited = true;
    }
}
