//! The journal: the transactional boundary of the bookkeeping core.
//!
//! A [`Journal`] owns the account tree, the posting arena, and the
//! transaction list. Insertion goes through
//! [`add_transaction`](Journal::add_transaction), which balances the
//! transaction, books its postings, checks metadata, and filters out
//! duplicates by UUID. Name resolution goes through
//! [`register_account`](Journal::register_account), which expands
//! aliases and applies the checking policy.

use crate::account::{AccountId, AccountTree, UNKNOWN_NAME};
use crate::balance::Balance;
use crate::commodity::CommodityPool;
use crate::error::{LedgerError, ParseError, RuntimeError};
use crate::posting::{Posting, PostingId, PostingStatus};
use crate::transaction::{Transaction, TransactionFlags, TransactionStatus, UUID_TAG};
use crate::xdata::AccountDetails;
use compact_str::CompactString;
use regex::Regex;
use rust_decimal::Decimal;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// How the journal treats account, payee, commodity, and tag names it
/// has never been told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckingStyle {
    /// Accept everything silently.
    #[default]
    Permissive,
    /// Log a warning on first sight, then continue.
    Warning,
    /// Refuse the enclosing operation with a [`ParseError`].
    Error,
}

impl CheckingStyle {
    fn is_checking(self) -> bool {
        matches!(self, CheckingStyle::Warning | CheckingStyle::Error)
    }
}

/// One ledger session's accounts, postings, and transactions.
#[derive(Debug, Default)]
pub struct Journal {
    accounts: AccountTree,
    postings: Vec<Posting>,
    transactions: Vec<Transaction>,
    commodities: CommodityPool,

    aliases: BTreeMap<CompactString, AccountId>,
    /// Expand the result of an alias rewrite again until nothing applies.
    pub recursive_aliases: bool,
    /// Disables alias expansion entirely.
    pub no_aliases: bool,

    /// Policy for names never declared known.
    pub checking_style: CheckingStyle,
    /// Whether the checking policy covers payees at all.
    pub check_payees: bool,
    known_payees: BTreeSet<String>,
    known_tags: BTreeSet<String>,

    payee_mappings: Vec<(Regex, String)>,
    payee_routes: Vec<(Regex, AccountId)>,

    transactions_by_id: HashMap<String, usize>,
    next_sequence: usize,
}

impl Journal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Journal::default()
    }

    /// The account hierarchy.
    pub fn accounts(&self) -> &AccountTree {
        &self.accounts
    }

    /// Mutable access to the account hierarchy.
    pub fn accounts_mut(&mut self) -> &mut AccountTree {
        &mut self.accounts
    }

    /// Handle of the root account.
    pub fn root(&self) -> AccountId {
        self.accounts.root()
    }

    /// Every posting ever inserted, in insertion order.
    pub fn postings(&self) -> &[Posting] {
        &self.postings
    }

    /// Borrows one posting.
    pub fn posting(&self, id: PostingId) -> &Posting {
        &self.postings[id.0]
    }

    /// Mutably borrows one posting.
    pub fn posting_mut(&mut self, id: PostingId) -> &mut Posting {
        &mut self.postings[id.0]
    }

    /// The accepted transactions, in insertion order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// The commodity registry.
    pub fn commodities(&self) -> &CommodityPool {
        &self.commodities
    }

    /// Mutable access to the commodity registry.
    pub fn commodities_mut(&mut self) -> &mut CommodityPool {
        &mut self.commodities
    }

    /// Resolves an account name without alias expansion, creating the
    /// missing levels when `auto_create` is set.
    pub fn find_account(&mut self, name: &str, auto_create: bool) -> Option<AccountId> {
        self.accounts.find_account(name, auto_create)
    }

    /// All accounts whose full name matches the pattern.
    pub fn find_accounts_by_pattern(&self, pattern: &Regex) -> Vec<AccountId> {
        self.accounts.find_accounts_by_pattern(pattern)
    }

    /// Defines an alias from `name` to the account called `target`,
    /// registering the target first.
    pub fn add_alias(&mut self, name: &str, target: &str) -> Result<Option<AccountId>, LedgerError> {
        let account = self.register_account(target, None)?;
        if let Some(account) = account {
            self.aliases.insert(CompactString::from(name), account);
        }
        Ok(account)
    }

    /// Adds a payee rewrite applied by [`register_payee`](Self::register_payee).
    pub fn add_payee_mapping(&mut self, pattern: Regex, payee: impl Into<String>) {
        self.payee_mappings.push((pattern, payee.into()));
    }

    /// Routes postings that resolve to the "Unknown" account to a real
    /// one when the transaction payee matches.
    pub fn add_payee_route(&mut self, pattern: Regex, account: AccountId) {
        self.payee_routes.push((pattern, account));
    }

    /// Runs `name` through the alias table.
    ///
    /// A full-name match rewrites to its target; failing that, a match
    /// on the first segment rewrites that segment and keeps the rest.
    /// With [`recursive_aliases`](Self::recursive_aliases) the rewritten
    /// name is expanded again, and any alias seen twice within one
    /// expansion raises [`RuntimeError::AliasCycle`] rather than
    /// looping. Returns `None` when no alias applies.
    pub fn expand_aliases(&mut self, name: &str) -> Result<Option<AccountId>, RuntimeError> {
        if self.no_aliases || self.aliases.is_empty() {
            return Ok(None);
        }
        let mut seen: Vec<CompactString> = Vec::new();
        match self.expanded_alias_name(name, &mut seen)? {
            Some(expanded) => Ok(self.accounts.find_account(&expanded, true)),
            None => Ok(None),
        }
    }

    fn expanded_alias_name(
        &self,
        name: &str,
        seen: &mut Vec<CompactString>,
    ) -> Result<Option<CompactString>, RuntimeError> {
        if let Some(&target) = self.aliases.get(name) {
            if seen.iter().any(|expanded| expanded == name) {
                return Err(RuntimeError::AliasCycle(name.to_string()));
            }
            seen.push(CompactString::from(name));

            let full = CompactString::from(self.accounts.full_name(target));
            if self.recursive_aliases {
                if let Some(further) = self.expanded_alias_name(&full, seen)? {
                    return Ok(Some(further));
                }
            }
            return Ok(Some(full));
        }

        // Only the very first segment is considered for expansion.
        let Some((first, rest)) = name.split_once(':') else {
            return Ok(None);
        };
        let Some(&target) = self.aliases.get(first) else {
            return Ok(None);
        };
        if seen.iter().any(|expanded| expanded == first) {
            return Err(RuntimeError::AliasCycle(first.to_string()));
        }
        seen.push(CompactString::from(first));

        let mut rewritten = CompactString::from(self.accounts.full_name(target));
        rewritten.push(':');
        match self.recursive_aliases {
            true => match self.expanded_alias_name(rest, seen)? {
                Some(expanded_rest) => rewritten.push_str(&expanded_rest),
                None => rewritten.push_str(rest),
            },
            false => rewritten.push_str(rest),
        }

        if self.recursive_aliases {
            if let Some(further) = self.expanded_alias_name(&rewritten, seen)? {
                return Ok(Some(further));
            }
        }
        Ok(Some(rewritten))
    }

    /// Resolves an account name the way journal input does: aliases
    /// first, auto-creation second, payee routing for the "Unknown"
    /// account, then the checking policy.
    ///
    /// `context` is the transaction whose posting uses the name; pass
    /// `None` when declaring the account rather than using it, which
    /// marks the name known instead of checking it.
    pub fn register_account(
        &mut self,
        name: &str,
        context: Option<&Transaction>,
    ) -> Result<Option<AccountId>, LedgerError> {
        let mut account = self.expand_aliases(name)?;
        if account.is_none() {
            account = self.accounts.find_account(name, true);
        }
        let Some(mut account) = account else {
            return Ok(None);
        };

        if self.accounts.account(account).name() == UNKNOWN_NAME {
            if let Some(txn) = context {
                if let Some((_, routed)) = self
                    .payee_routes
                    .iter()
                    .find(|(pattern, _)| pattern.is_match(&txn.payee))
                {
                    account = *routed;
                }
            }
        }

        if self.checking_style.is_checking() && !self.accounts.account(account).is_known() {
            if context.is_none() {
                self.accounts.account_mut(account).mark_known();
            } else if self.checking_style == CheckingStyle::Warning {
                log::warn!("Unknown account '{}'", self.accounts.full_name(account));
            } else {
                return Err(
                    ParseError::UnknownAccount(self.accounts.full_name(account).to_string())
                        .into(),
                );
            }
        }

        Ok(Some(account))
    }

    /// Checks a payee name against the policy, then applies the first
    /// matching payee rewrite.
    ///
    /// Payees are only checked when [`check_payees`](Self::check_payees)
    /// is set. As with accounts, a `None` context declares the name.
    pub fn register_payee(
        &mut self,
        name: &str,
        context: Option<&Transaction>,
    ) -> Result<String, ParseError> {
        if self.check_payees
            && self.checking_style.is_checking()
            && !self.known_payees.contains(name)
        {
            if context.is_none() {
                self.known_payees.insert(name.to_string());
            } else if self.checking_style == CheckingStyle::Warning {
                log::warn!("Unknown payee '{name}'");
            } else {
                return Err(ParseError::UnknownPayee(name.to_string()));
            }
        }

        for (pattern, replacement) in &self.payee_mappings {
            if pattern.is_match(name) {
                return Ok(replacement.clone());
            }
        }
        Ok(name.to_string())
    }

    /// Interns a commodity symbol and checks it against the policy.
    pub fn register_commodity(
        &mut self,
        symbol: &str,
        context: Option<&Transaction>,
    ) -> Result<(), ParseError> {
        let checking = self.checking_style.is_checking();
        let commodity = self.commodities.find_or_create(symbol);
        if checking && !commodity.is_known() {
            if context.is_none() {
                commodity.mark_known();
            } else if self.checking_style == CheckingStyle::Warning {
                log::warn!("Unknown commodity '{symbol}'");
            } else {
                return Err(ParseError::UnknownCommodity(symbol.to_string()));
            }
        }
        Ok(())
    }

    /// Checks a metadata tag key against the policy.
    pub fn register_metadata(
        &mut self,
        key: &str,
        context: Option<&Transaction>,
    ) -> Result<(), ParseError> {
        if context.is_some() {
            return self.check_tag(key);
        }
        if self.checking_style.is_checking() && !self.known_tags.contains(key) {
            self.known_tags.insert(key.to_string());
        }
        Ok(())
    }

    fn check_tag(&self, key: &str) -> Result<(), ParseError> {
        if !self.checking_style.is_checking() || self.known_tags.contains(key) {
            return Ok(());
        }
        match self.checking_style {
            CheckingStyle::Error => Err(ParseError::UnknownTag(key.to_string())),
            _ => {
                log::warn!("Unknown metadata tag '{key}'");
                Ok(())
            }
        }
    }

    fn check_all_metadata(&self, txn: &Transaction) -> Result<(), ParseError> {
        for key in txn.metadata.keys() {
            self.check_tag(key)?;
        }
        for &pid in txn.posting_ids() {
            for key in self.postings[pid.0].metadata.keys() {
                self.check_tag(key)?;
            }
        }
        Ok(())
    }

    /// Balances a transaction and inserts it.
    ///
    /// Returns `Ok(false)` without inserting when the transaction is
    /// one to ignore: every posting amountless, or a repeat of a UUID
    /// already on file with an equivalent posting set. A repeat with a
    /// different posting set raises
    /// [`RuntimeError::DuplicateMismatch`]; balancing and policy
    /// failures propagate. Whatever the failure, the journal is left
    /// without any trace of the rejected transaction.
    pub fn add_transaction(&mut self, mut txn: Transaction) -> Result<bool, LedgerError> {
        if !txn.finalize(&self.accounts)? {
            return Ok(false);
        }

        txn.sequence = self.next_sequence;
        self.next_sequence += 1;

        let uuid = txn.tag(UUID_TAG).map(str::to_string);
        let correlation = txn.id();

        // Move the postings into the arena and book each against its
        // account; deferred ones go to the holding index instead.
        let mut ids: SmallVec<[PostingId; 4]> = SmallVec::new();
        for mut posting in txn.take_postings() {
            if posting.date.is_none() {
                posting.date = Some(txn.date);
            }
            if posting.status == PostingStatus::Uncleared {
                posting.status = inherited_status(txn.status);
            }
            if posting.payee.is_none() {
                posting.payee = Some(txn.payee.clone());
            }
            posting.xact_sequence = Some(txn.sequence);
            posting.mark_visited();

            let pid = PostingId(self.postings.len());
            posting.sequence = pid.0;
            let account = posting.account;
            let deferred = posting.is_deferred();
            self.postings.push(posting);

            if deferred {
                self.accounts
                    .account_mut(account)
                    .add_deferred_posting(&correlation, pid);
            } else {
                self.accounts.add_posting(account, pid);
            }
            self.accounts.account_mut(account).ensure_xdata().mark_visited();
            ids.push(pid);
        }
        txn.posting_ids = ids;

        if let Err(err) = self.check_all_metadata(&txn) {
            self.detach(&txn);
            return Err(err.into());
        }

        if let Some(uuid) = uuid {
            if let Some(&stored) = self.transactions_by_id.get(&uuid) {
                // The earlier copy may have deferred postings under
                // this id; seeing the id again releases them.
                self.replay_deferred(&txn, &uuid);

                let stored_ids: Vec<PostingId> =
                    self.transactions[stored].posting_ids().to_vec();
                let equivalent = self.postings_equivalent(txn.posting_ids(), &stored_ids);
                self.detach(&txn);
                if !equivalent {
                    return Err(RuntimeError::DuplicateMismatch.into());
                }
                return Ok(false);
            }
            self.transactions_by_id.insert(uuid, self.transactions.len());
        }

        self.transactions.push(txn);
        Ok(true)
    }

    /// Removes the transaction at `index`, unbooking its postings.
    pub fn remove_transaction(&mut self, index: usize) -> bool {
        if index >= self.transactions.len() {
            return false;
        }
        let txn = self.transactions.remove(index);
        self.detach(&txn);
        if let Some(uuid) = txn.tag(UUID_TAG) {
            self.transactions_by_id.remove(uuid);
        }
        for slot in self.transactions_by_id.values_mut() {
            if *slot > index {
                *slot -= 1;
            }
        }
        true
    }

    fn replay_deferred(&mut self, txn: &Transaction, uuid: &str) {
        for &pid in txn.posting_ids() {
            let account = self.postings[pid.0].account;
            if let Some(held) = self.accounts.account_mut(account).take_deferred(uuid) {
                for hid in held {
                    if self.postings[hid.0].account == account {
                        self.accounts.add_posting(account, hid);
                    }
                }
            }
        }
    }

    fn postings_equivalent(&self, left: &[PostingId], right: &[PostingId]) -> bool {
        self.posting_signature(left) == self.posting_signature(right)
    }

    /// The (account, amount) pairs of a posting set in a canonical
    /// order, for duplicate comparison.
    fn posting_signature(
        &self,
        ids: &[PostingId],
    ) -> Vec<(AccountId, Option<(CompactString, Decimal)>)> {
        let mut signature: Vec<_> = ids
            .iter()
            .map(|&pid| {
                let posting = &self.postings[pid.0];
                let amount = posting.amount.as_ref().map(|amount| {
                    (
                        CompactString::from(amount.commodity().unwrap_or("")),
                        amount.quantity(),
                    )
                });
                (posting.account, amount)
            })
            .collect();
        signature.sort();
        signature
    }

    fn detach(&mut self, txn: &Transaction) {
        if txn.flags.contains(TransactionFlags::TEMP) {
            return;
        }
        for &pid in txn.posting_ids() {
            let account = self.postings[pid.0].account;
            self.accounts.remove_posting(account, pid);
            self.accounts.account_mut(account).remove_deferred_posting(pid);
        }
    }

    /// Releases every deferred posting in the tree to its account.
    /// Called once a whole input unit has been read.
    pub fn apply_deferred_posts(&mut self) {
        let root = self.accounts.root();
        self.accounts.apply_deferred_posts(root, &self.postings);
    }

    /// The account's own running total. See [`AccountTree::amount`].
    pub fn amount(&mut self, account: AccountId, real_only: bool) -> Option<Balance> {
        self.accounts.amount(account, &mut self.postings, real_only)
    }

    /// The subtree's running total. See [`AccountTree::total`].
    pub fn total(&mut self, account: AccountId) -> Option<Balance> {
        self.accounts.total(account, &mut self.postings)
    }

    /// Statistics over the account's own postings.
    pub fn self_details(&mut self, account: AccountId, gather_all: bool) -> &AccountDetails {
        self.accounts.self_details(account, &self.postings, gather_all)
    }

    /// Statistics over the account's whole subtree.
    pub fn family_details(&mut self, account: AccountId, gather_all: bool) -> &AccountDetails {
        self.accounts.family_details(account, &self.postings, gather_all)
    }

    /// Drops report bookkeeping from every posting and from the
    /// account tree, sparing scratch transactions' postings.
    pub fn clear_xdata(&mut self) {
        let mut scratch = vec![false; self.postings.len()];
        for txn in &self.transactions {
            if txn.flags.contains(TransactionFlags::TEMP) {
                for &pid in txn.posting_ids() {
                    scratch[pid.0] = true;
                }
            }
        }
        for (posting, keep) in self.postings.iter_mut().zip(&scratch) {
            if !keep {
                posting.clear_xdata();
            }
        }
        let root = self.accounts.root();
        self.accounts.clear_xdata(root);
    }

    /// True when any posting or account carries report bookkeeping.
    pub fn has_xdata(&self) -> bool {
        self.postings.iter().any(Posting::has_xdata)
            || self.accounts.has_xdata_below(self.accounts.root())
    }

    /// Structural sanity check: the account tree must validate and
    /// every transaction's postings must point back at it.
    pub fn validate(&self) -> bool {
        if !self.accounts.validate() {
            return false;
        }
        self.transactions.iter().all(|txn| {
            txn.posting_ids().iter().all(|&pid| {
                self.postings
                    .get(pid.0)
                    .is_some_and(|posting| posting.xact_sequence == Some(txn.sequence))
            })
        })
    }
}

fn inherited_status(status: TransactionStatus) -> PostingStatus {
    match status {
        TransactionStatus::Uncleared => PostingStatus::Uncleared,
        TransactionStatus::Cleared => PostingStatus::Cleared,
        TransactionStatus::Pending => PostingStatus::Pending,
    }
}
