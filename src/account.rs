//! Hierarchical chart of accounts.
//!
//! Accounts live in an arena owned by [`AccountTree`] and refer to each
//! other through [`AccountId`] handles, so the tree can hand out stable
//! ids while still growing. The statistics operations borrow the
//! journal's posting arena as a slice, which keeps the tree and the
//! postings independently borrowable.

use crate::balance::Balance;
use crate::posting::{Posting, PostingId};
use crate::xdata::{AccountDetails, AccountExtData};
use bitflags::bitflags;
use compact_str::CompactString;
use once_cell::unsync::OnceCell;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

/// Account name under which unrecognized postings are filed.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Accounts nested deeper than this fail validation.
const MAX_ACCOUNT_DEPTH: usize = 256;

bitflags! {
    /// State bits carried by an account.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccountFlags: u8 {
        /// The name has been declared to the checking policy.
        const KNOWN = 0x01;
        /// Scratch account owned by a report pass; survives xdata
        /// clearing untouched.
        const TEMP = 0x02;
        /// Created by a pass rather than by journal input.
        const GENERATED = 0x04;
    }
}

/// Stable handle to an account in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub(crate) usize);

impl AccountId {
    /// Arena slot index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// One node of the account hierarchy.
#[derive(Debug, Clone)]
pub struct Account {
    name: CompactString,
    parent: Option<AccountId>,
    depth: usize,
    /// State bits.
    pub flags: AccountFlags,
    children: BTreeMap<CompactString, AccountId>,
    postings: Vec<PostingId>,
    deferred: Option<BTreeMap<String, Vec<PostingId>>>,
    xdata: Option<Box<AccountExtData>>,
    full_name: OnceCell<CompactString>,
}

impl Account {
    fn new(name: &str, parent: Option<AccountId>, depth: usize) -> Self {
        Account {
            name: CompactString::from(name),
            parent,
            depth,
            flags: AccountFlags::empty(),
            children: BTreeMap::new(),
            postings: Vec::new(),
            deferred: None,
            xdata: None,
            full_name: OnceCell::new(),
        }
    }

    /// The account's own segment of its name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent handle, absent only for the root.
    pub fn parent(&self) -> Option<AccountId> {
        self.parent
    }

    /// Number of colon-separated levels above the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Child handle for one name segment.
    pub fn child(&self, name: &str) -> Option<AccountId> {
        self.children.get(name).copied()
    }

    /// Iterates direct children in name order.
    pub fn children(&self) -> impl Iterator<Item = (&str, AccountId)> {
        self.children.iter().map(|(name, id)| (name.as_str(), *id))
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Handles of the postings booked against this account, in
    /// attachment order.
    pub fn postings(&self) -> &[PostingId] {
        &self.postings
    }

    /// True once the checking policy accepts this name.
    pub fn is_known(&self) -> bool {
        self.flags.contains(AccountFlags::KNOWN)
    }

    /// Declares the name known to the checking policy.
    pub fn mark_known(&mut self) {
        self.flags |= AccountFlags::KNOWN;
    }

    /// True for scratch accounts owned by a report pass.
    pub fn is_temp(&self) -> bool {
        self.flags.contains(AccountFlags::TEMP)
    }

    /// True for accounts created by a pass rather than journal input.
    pub fn is_generated(&self) -> bool {
        self.flags.contains(AccountFlags::GENERATED)
    }

    /// True once report bookkeeping has been attached.
    pub fn has_xdata(&self) -> bool {
        self.xdata.is_some()
    }

    /// Report bookkeeping, if attached.
    pub fn xdata(&self) -> Option<&AccountExtData> {
        self.xdata.as_deref()
    }

    /// Mutable report bookkeeping, if attached.
    pub fn xdata_mut(&mut self) -> Option<&mut AccountExtData> {
        self.xdata.as_deref_mut()
    }

    /// Report bookkeeping, attaching a fresh record on first use.
    pub fn ensure_xdata(&mut self) -> &mut AccountExtData {
        self.xdata.get_or_insert_with(Box::default)
    }

    /// Holds a posting back under a transaction id until it is either
    /// applied or deleted.
    pub fn add_deferred_posting(&mut self, id: &str, posting: PostingId) {
        self.deferred
            .get_or_insert_with(BTreeMap::new)
            .entry(id.to_string())
            .or_default()
            .push(posting);
    }

    /// Postings held back under a transaction id.
    pub fn deferred_postings(&self, id: &str) -> Option<&[PostingId]> {
        self.deferred
            .as_ref()
            .and_then(|deferred| deferred.get(id))
            .map(Vec::as_slice)
    }

    /// Discards the postings held back under a transaction id.
    pub fn delete_deferred_postings(&mut self, id: &str) {
        if let Some(deferred) = self.deferred.as_mut() {
            deferred.remove(id);
        }
    }

    pub(crate) fn take_deferred(&mut self, id: &str) -> Option<Vec<PostingId>> {
        self.deferred.as_mut().and_then(|deferred| deferred.remove(id))
    }

    pub(crate) fn remove_deferred_posting(&mut self, posting: PostingId) {
        if let Some(deferred) = self.deferred.as_mut() {
            for held in deferred.values_mut() {
                held.retain(|&pid| pid != posting);
            }
            deferred.retain(|_, held| !held.is_empty());
            if deferred.is_empty() {
                self.deferred = None;
            }
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Arena-backed account hierarchy rooted at an unnamed master account.
#[derive(Debug, Clone)]
pub struct AccountTree {
    nodes: Vec<Account>,
}

impl AccountTree {
    /// Creates a tree holding only the root account.
    pub fn new() -> Self {
        AccountTree {
            nodes: vec![Account::new("", None, 0)],
        }
    }

    /// Handle of the root account.
    pub fn root(&self) -> AccountId {
        AccountId(0)
    }

    /// Borrows an account.
    pub fn account(&self, id: AccountId) -> &Account {
        &self.nodes[id.0]
    }

    /// Mutably borrows an account.
    pub fn account_mut(&mut self, id: AccountId) -> &mut Account {
        &mut self.nodes[id.0]
    }

    /// Number of accounts in the tree, the root included.
    pub fn account_count(&self) -> usize {
        self.nodes.len()
    }

    /// Resolves a colon-separated name from the root, creating the
    /// missing levels when `auto_create` is set.
    pub fn find_account(&mut self, path: &str, auto_create: bool) -> Option<AccountId> {
        self.find_account_from(self.root(), path, auto_create)
    }

    /// Resolves a colon-separated name relative to `base`.
    ///
    /// Splits on the first colon and descends one segment at a time.
    /// Created accounts inherit the TEMP and GENERATED bits of their
    /// parent.
    pub fn find_account_from(
        &mut self,
        base: AccountId,
        path: &str,
        auto_create: bool,
    ) -> Option<AccountId> {
        let mut current = base;
        let mut rest = path;

        loop {
            let (segment, remainder) = match rest.split_once(':') {
                Some((segment, remainder)) => (segment, Some(remainder)),
                None => (rest, None),
            };

            let next = match self.nodes[current.0].children.get(segment) {
                Some(&child) => child,
                None => {
                    if !auto_create {
                        return None;
                    }
                    let id = AccountId(self.nodes.len());
                    let parent = &self.nodes[current.0];
                    let mut child = Account::new(segment, Some(current), parent.depth + 1);
                    child.flags =
                        parent.flags & (AccountFlags::TEMP | AccountFlags::GENERATED);
                    self.nodes.push(child);
                    self.nodes[current.0]
                        .children
                        .insert(CompactString::from(segment), id);
                    id
                }
            };

            match remainder {
                Some(remainder) => {
                    current = next;
                    rest = remainder;
                }
                None => return Some(next),
            }
        }
    }

    /// The account's full colon-joined name, computed once and cached.
    ///
    /// Empty-named ancestors contribute no segment, so a child created
    /// through a doubled colon reads as if the gap were not there.
    pub fn full_name(&self, id: AccountId) -> &str {
        self.nodes[id.0].full_name.get_or_init(|| {
            let mut segments = vec![self.nodes[id.0].name.as_str()];
            let mut cursor = self.nodes[id.0].parent;
            while let Some(parent) = cursor {
                let node = &self.nodes[parent.0];
                if !node.name.is_empty() {
                    segments.push(node.name.as_str());
                }
                cursor = node.parent;
            }
            segments.reverse();
            CompactString::from(segments.join(":"))
        })
    }

    /// All accounts whose full name matches the pattern, in creation
    /// order.
    pub fn find_accounts_by_pattern(&self, pattern: &Regex) -> Vec<AccountId> {
        (0..self.nodes.len())
            .map(AccountId)
            .filter(|&id| pattern.is_match(self.full_name(id)))
            .collect()
    }

    /// Books a posting against an account and invalidates the cached
    /// statistics its arrival staled.
    ///
    /// The account's own pass flags reset and its family total drops;
    /// ancestors reset only their family bookkeeping, and only if they
    /// have any. Scan cursors and running sums stay, which is what lets
    /// [`amount`](Self::amount) pick up exactly the new postings.
    pub fn add_posting(&mut self, id: AccountId, posting: PostingId) {
        let node = &mut self.nodes[id.0];
        node.postings.push(posting);

        let xdata = node.ensure_xdata();
        xdata.self_details.gathered = false;
        xdata.self_details.calculated = false;
        xdata.family_details.gathered = false;
        xdata.family_details.calculated = false;
        xdata.family_details.total = None;

        let mut cursor = node.parent;
        while let Some(parent) = cursor {
            let node = &mut self.nodes[parent.0];
            if let Some(xdata) = node.xdata.as_deref_mut() {
                xdata.family_details.gathered = false;
                xdata.family_details.calculated = false;
                xdata.family_details.total = None;
            }
            cursor = node.parent;
        }
    }

    /// Unbooks a posting from an account. Cached statistics are left
    /// alone; hosts clear bookkeeping between passes.
    pub fn remove_posting(&mut self, id: AccountId, posting: PostingId) -> bool {
        let posts = &mut self.nodes[id.0].postings;
        match posts.iter().position(|&pid| pid == posting) {
            Some(slot) => {
                posts.remove(slot);
                true
            }
            None => false,
        }
    }

    /// The account's own running total, advanced incrementally.
    ///
    /// Returns `None` until a pass has visited the account. Otherwise
    /// scans forward from the cursors, folding in postings that are
    /// visited but not yet considered, and returns the running sum:
    /// the full total, or with `real_only` the sum that excludes
    /// virtual postings.
    pub fn amount(
        &mut self,
        id: AccountId,
        postings: &mut [Posting],
        real_only: bool,
    ) -> Option<Balance> {
        let Account {
            postings: own_posts,
            xdata,
            ..
        } = &mut self.nodes[id.0];
        let xdata = xdata.as_deref_mut()?;
        if !xdata.is_visited() {
            return None;
        }

        for slot in xdata.self_details.last_post..own_posts.len() {
            let posting = &mut postings[own_posts[slot].0];
            if posting.is_visited() && !posting.is_considered() {
                fold_posting_amount(&mut xdata.self_details, posting);
            }
        }
        xdata.self_details.last_post = own_posts.len();

        for slot in xdata.self_details.last_reported_post..xdata.reported_posts.len() {
            let posting = &mut postings[xdata.reported_posts[slot].0];
            if posting.is_visited() && !posting.is_considered() {
                fold_posting_amount(&mut xdata.self_details, posting);
            }
        }
        xdata.self_details.last_reported_post = xdata.reported_posts.len();

        if real_only {
            xdata.self_details.real_total.clone()
        } else {
            xdata.self_details.total.clone()
        }
    }

    /// Statistics over the account's own postings, gathered once per
    /// pass and reused until a new posting arrives.
    pub fn self_details(
        &mut self,
        id: AccountId,
        postings: &[Posting],
        gather_all: bool,
    ) -> &AccountDetails {
        let gathered = self.nodes[id.0]
            .xdata
            .as_ref()
            .is_some_and(|xdata| xdata.self_details.gathered);

        if !gathered {
            let own_posts = self.nodes[id.0].postings.clone();
            let names: Vec<CompactString> = if gather_all {
                own_posts
                    .iter()
                    .map(|pid| CompactString::from(self.full_name(postings[pid.0].account)))
                    .collect()
            } else {
                Vec::new()
            };

            let xdata = self.nodes[id.0].ensure_xdata();
            xdata.self_details.reset_gathered();
            xdata.self_details.gathered = true;
            for (slot, pid) in own_posts.iter().enumerate() {
                let account_name = names.get(slot).map(CompactString::as_str);
                xdata
                    .self_details
                    .update(&postings[pid.0], gather_all, account_name);
            }
        }

        &self.nodes[id.0].ensure_xdata().self_details
    }

    /// Statistics over the whole subtree: every child's family
    /// statistics merged, then the account's own.
    pub fn family_details(
        &mut self,
        id: AccountId,
        postings: &[Posting],
        gather_all: bool,
    ) -> &AccountDetails {
        let gathered = self.nodes[id.0]
            .xdata
            .as_ref()
            .is_some_and(|xdata| xdata.family_details.gathered);

        if !gathered {
            let family = &mut self.nodes[id.0].ensure_xdata().family_details;
            family.reset_gathered();
            family.gathered = true;

            let children: Vec<AccountId> =
                self.nodes[id.0].children.values().copied().collect();
            for child in children {
                let details = self.family_details(child, postings, gather_all).clone();
                self.nodes[id.0]
                    .ensure_xdata()
                    .family_details
                    .add(&details);
            }

            let own = self.self_details(id, postings, gather_all).clone();
            self.nodes[id.0].ensure_xdata().family_details.add(&own);
        }

        &self.nodes[id.0].ensure_xdata().family_details
    }

    /// The subtree's running total: every child's total plus the
    /// account's own [`amount`](Self::amount), computed once per pass.
    pub fn total(&mut self, id: AccountId, postings: &mut [Posting]) -> Option<Balance> {
        let calculated = self.nodes[id.0]
            .xdata
            .as_ref()
            .is_some_and(|xdata| xdata.family_details.calculated);

        if !calculated {
            self.nodes[id.0].ensure_xdata().family_details.calculated = true;

            let children: Vec<AccountId> =
                self.nodes[id.0].children.values().copied().collect();
            for child in children {
                if let Some(subtotal) = self.total(child, postings) {
                    if !subtotal.is_empty() {
                        let family = &mut self.nodes[id.0].ensure_xdata().family_details;
                        *family.total.get_or_insert_with(Balance::new) += &subtotal;
                    }
                }
            }

            if let Some(own) = self.amount(id, postings, false) {
                if !own.is_empty() {
                    let family = &mut self.nodes[id.0].ensure_xdata().family_details;
                    *family.total.get_or_insert_with(Balance::new) += &own;
                }
            }
        }

        self.nodes[id.0]
            .xdata
            .as_ref()
            .and_then(|xdata| xdata.family_details.total.clone())
    }

    /// Releases every held-back posting in the subtree to the account
    /// it was written against.
    pub fn apply_deferred_posts(&mut self, id: AccountId, postings: &[Posting]) {
        if let Some(deferred) = self.nodes[id.0].deferred.take() {
            for held in deferred.into_values() {
                for pid in held {
                    let home = postings[pid.0].account;
                    self.add_posting(home, pid);
                }
            }
        }

        let children: Vec<AccountId> = self.nodes[id.0].children.values().copied().collect();
        for child in children {
            self.apply_deferred_posts(child, postings);
        }
    }

    /// Drops report bookkeeping for the account and its subtree,
    /// leaving scratch (TEMP) children alone.
    pub fn clear_xdata(&mut self, id: AccountId) {
        self.nodes[id.0].xdata = None;

        let children: Vec<AccountId> = self.nodes[id.0].children.values().copied().collect();
        for child in children {
            if !self.nodes[child.0].is_temp() {
                self.clear_xdata(child);
            }
        }
    }

    /// True when the account or any descendant carries bookkeeping.
    pub fn has_xdata_below(&self, id: AccountId) -> bool {
        let node = &self.nodes[id.0];
        node.xdata.is_some()
            || node
                .children
                .values()
                .any(|&child| self.has_xdata_below(child))
    }

    /// Structural sanity check over the whole tree.
    ///
    /// Rejects accounts nested past the depth limit and accounts that
    /// list themselves as a direct child. Cycles between distinct
    /// accounts are not detected.
    pub fn validate(&self) -> bool {
        self.validate_node(self.root())
    }

    fn validate_node(&self, id: AccountId) -> bool {
        let node = &self.nodes[id.0];
        if node.depth > MAX_ACCOUNT_DEPTH {
            log::debug!(
                "account '{}' failed validation: depth exceeds {}",
                self.full_name(id),
                MAX_ACCOUNT_DEPTH
            );
            return false;
        }
        for &child in node.children.values() {
            if child == id {
                log::debug!(
                    "account '{}' failed validation: it is its own child",
                    self.full_name(id)
                );
                return false;
            }
            if !self.validate_node(child) {
                return false;
            }
        }
        true
    }
}

impl Default for AccountTree {
    fn default() -> Self {
        AccountTree::new()
    }
}

fn fold_posting_amount(details: &mut AccountDetails, posting: &mut Posting) {
    if let Some(amount) = posting.amount.clone() {
        if !posting.is_virtual() {
            details
                .real_total
                .get_or_insert_with(Balance::new)
                .add_amount(&amount);
        }
        details
            .total
            .get_or_insert_with(Balance::new)
            .add_amount(&amount);
    }
    posting.ensure_xdata().considered = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::datetime::{reset_current_date, set_current_date};
    use crate::posting::PostingFlags;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn visited_posting(
        arena: &mut Vec<Posting>,
        account: AccountId,
        quantity: rust_decimal::Decimal,
        on: NaiveDate,
    ) -> PostingId {
        let mut posting = Posting::with_amount(account, Amount::with_commodity(quantity, "USD"));
        posting.date = Some(on);
        posting.mark_visited();
        arena.push(posting);
        PostingId(arena.len() - 1)
    }

    fn attach(
        tree: &mut AccountTree,
        arena: &mut Vec<Posting>,
        account: AccountId,
        quantity: rust_decimal::Decimal,
        on: NaiveDate,
    ) -> PostingId {
        let pid = visited_posting(arena, account, quantity, on);
        tree.add_posting(account, pid);
        tree.account_mut(account).ensure_xdata().mark_visited();
        pid
    }

    #[test]
    fn test_find_account_creates_missing_levels() {
        let mut tree = AccountTree::new();
        let food = tree.find_account("Expenses:Food", true).unwrap();

        assert_eq!(tree.account_count(), 3);
        assert_eq!(tree.account(food).name(), "Food");
        assert_eq!(tree.account(food).depth(), 2);

        let expenses = tree.account(food).parent().unwrap();
        assert_eq!(tree.account(expenses).name(), "Expenses");
        assert_eq!(tree.account(expenses).parent(), Some(tree.root()));
        assert_eq!(tree.account(expenses).child("Food"), Some(food));

        assert_eq!(tree.find_account("Expenses:Food", false), Some(food));
        assert_eq!(tree.find_account("Expenses:Rent", false), None);
        assert_eq!(tree.account_count(), 3);
    }

    #[test]
    fn test_full_name_skips_empty_ancestors() {
        let mut tree = AccountTree::new();
        let leaf = tree.find_account("Expenses::Food", true).unwrap();

        assert_eq!(tree.full_name(leaf), "Expenses:Food");

        let gap = tree.account(leaf).parent().unwrap();
        assert_eq!(tree.account(gap).name(), "");
        assert_eq!(tree.full_name(gap), "Expenses:");
        assert_eq!(tree.full_name(tree.root()), "");
    }

    #[test]
    fn test_created_children_inherit_scratch_bits() {
        let mut tree = AccountTree::new();
        let scratch = tree.find_account("Scratch", true).unwrap();
        tree.account_mut(scratch).flags |= AccountFlags::TEMP | AccountFlags::KNOWN;

        let child = tree
            .find_account_from(scratch, "Inner:Leaf", true)
            .unwrap();
        assert!(tree.account(child).is_temp());
        assert!(!tree.account(child).is_known());
        assert!(!tree.account(child).is_generated());
    }

    #[test]
    fn test_add_posting_invalidates_family_bookkeeping() {
        let mut tree = AccountTree::new();
        let food = tree.find_account("Expenses:Food", true).unwrap();
        let expenses = tree.account(food).parent().unwrap();

        {
            let xdata = tree.account_mut(expenses).ensure_xdata();
            xdata.family_details.gathered = true;
            xdata.family_details.calculated = true;
            xdata.family_details.total = Some(Balance::new());
            xdata.self_details.gathered = true;
            xdata.self_details.last_post = 7;
        }
        let root = tree.root();
        assert!(!tree.account(root).has_xdata());

        tree.add_posting(food, PostingId(0));

        // The posting's own account resets both detail blocks.
        let own = tree.account(food).xdata().unwrap();
        assert!(!own.self_details.gathered);
        assert!(!own.family_details.calculated);

        // Ancestors with bookkeeping reset only the family side.
        let parent = tree.account(expenses).xdata().unwrap();
        assert!(!parent.family_details.gathered);
        assert!(!parent.family_details.calculated);
        assert!(parent.family_details.total.is_none());
        assert!(parent.self_details.gathered);
        assert_eq!(parent.self_details.last_post, 7);

        // Ancestors without bookkeeping are left alone.
        assert!(!tree.account(root).has_xdata());
    }

    #[test]
    fn test_amount_requires_visit() {
        let mut tree = AccountTree::new();
        let mut arena: Vec<Posting> = Vec::new();
        let cash = tree.find_account("Assets:Cash", true).unwrap();

        assert_eq!(tree.amount(cash, &mut arena, false), None);

        let pid = visited_posting(&mut arena, cash, dec!(10), date(2024, 1, 1));
        tree.add_posting(cash, pid);
        assert_eq!(tree.amount(cash, &mut arena, false), None);

        tree.account_mut(cash).ensure_xdata().mark_visited();
        let total = tree.amount(cash, &mut arena, false).unwrap();
        assert_eq!(total.amount_for("USD"), Some(dec!(10)));
    }

    #[test]
    fn test_amount_advances_incrementally() {
        let mut tree = AccountTree::new();
        let mut arena: Vec<Posting> = Vec::new();
        let cash = tree.find_account("Assets:Cash", true).unwrap();

        attach(&mut tree, &mut arena, cash, dec!(10), date(2024, 1, 1));
        attach(&mut tree, &mut arena, cash, dec!(20), date(2024, 1, 2));

        let total = tree.amount(cash, &mut arena, false).unwrap();
        assert_eq!(total.amount_for("USD"), Some(dec!(30)));
        assert!(arena.iter().all(Posting::is_considered));

        // A second call rescans nothing and returns the same sum.
        let again = tree.amount(cash, &mut arena, false).unwrap();
        assert_eq!(again.amount_for("USD"), Some(dec!(30)));

        // Only the posting added after the last scan is folded in.
        attach(&mut tree, &mut arena, cash, dec!(5), date(2024, 1, 3));
        let grown = tree.amount(cash, &mut arena, false).unwrap();
        assert_eq!(grown.amount_for("USD"), Some(dec!(35)));
    }

    #[test]
    fn test_amount_skips_unvisited_postings() {
        let mut tree = AccountTree::new();
        let mut arena: Vec<Posting> = Vec::new();
        let cash = tree.find_account("Assets:Cash", true).unwrap();

        attach(&mut tree, &mut arena, cash, dec!(10), date(2024, 1, 1));

        let skipped = Posting::with_amount(cash, Amount::with_commodity(dec!(99), "USD"));
        arena.push(skipped);
        let skipped_id = PostingId(arena.len() - 1);
        tree.add_posting(cash, skipped_id);

        let total = tree.amount(cash, &mut arena, false).unwrap();
        assert_eq!(total.amount_for("USD"), Some(dec!(10)));

        // The cursor has moved past it; a later visit no longer counts.
        arena[skipped_id.0].mark_visited();
        let total = tree.amount(cash, &mut arena, false).unwrap();
        assert_eq!(total.amount_for("USD"), Some(dec!(10)));
    }

    #[test]
    fn test_amount_real_total_excludes_virtual_postings() {
        let mut tree = AccountTree::new();
        let mut arena: Vec<Posting> = Vec::new();
        let cash = tree.find_account("Assets:Cash", true).unwrap();

        attach(&mut tree, &mut arena, cash, dec!(10), date(2024, 1, 1));
        let virtual_id = attach(&mut tree, &mut arena, cash, dec!(90), date(2024, 1, 2));
        arena[virtual_id.0].flags |= PostingFlags::VIRTUAL;

        let full = tree.amount(cash, &mut arena, false).unwrap();
        assert_eq!(full.amount_for("USD"), Some(dec!(100)));

        let real = tree.amount(cash, &mut arena, true).unwrap();
        assert_eq!(real.amount_for("USD"), Some(dec!(10)));
    }

    #[test]
    fn test_amount_includes_reported_postings() {
        let mut tree = AccountTree::new();
        let mut arena: Vec<Posting> = Vec::new();
        let cash = tree.find_account("Assets:Cash", true).unwrap();
        let other = tree.find_account("Assets:Other", true).unwrap();

        tree.account_mut(cash).ensure_xdata().mark_visited();

        // A pass can route another account's posting here explicitly.
        let pid = visited_posting(&mut arena, other, dec!(40), date(2024, 1, 1));
        tree.account_mut(cash).ensure_xdata().reported_posts.push(pid);

        let total = tree.amount(cash, &mut arena, false).unwrap();
        assert_eq!(total.amount_for("USD"), Some(dec!(40)));
    }

    #[test]
    fn test_self_details_gathers_once() {
        set_current_date(date(2024, 6, 15));

        let mut tree = AccountTree::new();
        let mut arena: Vec<Posting> = Vec::new();
        let cash = tree.find_account("Assets:Cash", true).unwrap();

        attach(&mut tree, &mut arena, cash, dec!(10), date(2024, 6, 14));
        attach(&mut tree, &mut arena, cash, dec!(20), date(2024, 5, 1));

        let details = tree.self_details(cash, &arena, true);
        assert_eq!(details.posts_count, 2);
        assert_eq!(details.posts_last_7_count, 1);
        assert!(details.gathered);
        assert!(details.accounts_referenced.contains("Assets:Cash"));

        // Gathered already, so a repeat call does not double-count.
        let details = tree.self_details(cash, &arena, true);
        assert_eq!(details.posts_count, 2);

        reset_current_date();
    }

    #[test]
    fn test_details_regather_after_new_posting_does_not_double_count() {
        set_current_date(date(2024, 6, 15));

        let mut tree = AccountTree::new();
        let mut arena: Vec<Posting> = Vec::new();
        let food = tree.find_account("Expenses:Food", true).unwrap();
        let expenses = tree.find_account("Expenses", true).unwrap();

        attach(&mut tree, &mut arena, food, dec!(30), date(2024, 6, 1));
        assert_eq!(tree.family_details(expenses, &arena, false).posts_count, 1);

        // The new posting invalidates the gathered statistics; the next
        // gather starts over instead of stacking onto the old counts.
        attach(&mut tree, &mut arena, food, dec!(12), date(2024, 6, 3));
        let family = tree.family_details(expenses, &arena, false);
        assert_eq!(family.posts_count, 2);
        assert_eq!(family.latest_post, Some(date(2024, 6, 3)));

        let own = tree.self_details(food, &arena, false);
        assert_eq!(own.posts_count, 2);

        reset_current_date();
    }

    #[test]
    fn test_family_details_rolls_up_subtree() {
        set_current_date(date(2024, 6, 15));

        let mut tree = AccountTree::new();
        let mut arena: Vec<Posting> = Vec::new();
        let food = tree.find_account("Expenses:Food", true).unwrap();
        let rent = tree.find_account("Expenses:Rent", true).unwrap();
        let expenses = tree.find_account("Expenses", true).unwrap();

        attach(&mut tree, &mut arena, food, dec!(30), date(2024, 6, 1));
        attach(&mut tree, &mut arena, rent, dec!(900), date(2024, 6, 2));
        attach(&mut tree, &mut arena, expenses, dec!(1), date(2024, 6, 3));

        let family = tree.family_details(expenses, &arena, false);
        assert_eq!(family.posts_count, 3);
        assert_eq!(family.earliest_post, Some(date(2024, 6, 1)));
        assert_eq!(family.latest_post, Some(date(2024, 6, 3)));

        let own = tree.self_details(expenses, &arena, false);
        assert_eq!(own.posts_count, 1);

        reset_current_date();
    }

    #[test]
    fn test_total_sums_children_and_self() {
        let mut tree = AccountTree::new();
        let mut arena: Vec<Posting> = Vec::new();
        let food = tree.find_account("Expenses:Food", true).unwrap();
        let rent = tree.find_account("Expenses:Rent", true).unwrap();
        let expenses = tree.find_account("Expenses", true).unwrap();

        attach(&mut tree, &mut arena, food, dec!(30), date(2024, 1, 1));
        attach(&mut tree, &mut arena, rent, dec!(900), date(2024, 1, 2));
        attach(&mut tree, &mut arena, expenses, dec!(1), date(2024, 1, 3));

        let total = tree.total(expenses, &mut arena).unwrap();
        assert_eq!(total.amount_for("USD"), Some(dec!(931)));

        let root_total = tree.total(tree.root(), &mut arena).unwrap();
        assert_eq!(root_total.amount_for("USD"), Some(dec!(931)));
    }

    #[test]
    fn test_total_picks_up_new_postings_after_invalidation() {
        let mut tree = AccountTree::new();
        let mut arena: Vec<Posting> = Vec::new();
        let food = tree.find_account("Expenses:Food", true).unwrap();
        let expenses = tree.find_account("Expenses", true).unwrap();

        attach(&mut tree, &mut arena, food, dec!(30), date(2024, 1, 1));
        let total = tree.total(expenses, &mut arena).unwrap();
        assert_eq!(total.amount_for("USD"), Some(dec!(30)));

        attach(&mut tree, &mut arena, food, dec!(12), date(2024, 1, 4));
        let total = tree.total(expenses, &mut arena).unwrap();
        assert_eq!(total.amount_for("USD"), Some(dec!(42)));
    }

    #[test]
    fn test_deferred_postings_roundtrip() {
        let mut tree = AccountTree::new();
        let cash = tree.find_account("Assets:Cash", true).unwrap();

        tree.account_mut(cash).add_deferred_posting("uuid-1", PostingId(3));
        tree.account_mut(cash).add_deferred_posting("uuid-1", PostingId(4));
        tree.account_mut(cash).add_deferred_posting("uuid-2", PostingId(5));

        assert_eq!(
            tree.account(cash).deferred_postings("uuid-1"),
            Some(&[PostingId(3), PostingId(4)][..])
        );

        tree.account_mut(cash).delete_deferred_postings("uuid-1");
        assert_eq!(tree.account(cash).deferred_postings("uuid-1"), None);
        assert!(tree.account(cash).deferred_postings("uuid-2").is_some());
    }

    #[test]
    fn test_apply_deferred_posts_books_to_home_account() {
        let mut tree = AccountTree::new();
        let mut arena: Vec<Posting> = Vec::new();
        let holder = tree.find_account("Assets:Holding", true).unwrap();
        let cash = tree.find_account("Assets:Cash", true).unwrap();

        let pid = visited_posting(&mut arena, cash, dec!(10), date(2024, 1, 1));
        tree.account_mut(holder).add_deferred_posting("uuid-1", pid);
        assert!(tree.account(cash).postings().is_empty());

        tree.apply_deferred_posts(tree.root(), &arena);

        assert_eq!(tree.account(cash).postings(), &[pid]);
        assert_eq!(tree.account(holder).deferred_postings("uuid-1"), None);
    }

    #[test]
    fn test_clear_xdata_spares_temp_children() {
        let mut tree = AccountTree::new();
        let real = tree.find_account("Assets:Cash", true).unwrap();
        let scratch = tree.find_account("Scratch", true).unwrap();
        tree.account_mut(scratch).flags |= AccountFlags::TEMP;

        tree.account_mut(real).ensure_xdata().mark_visited();
        tree.account_mut(scratch).ensure_xdata().mark_visited();
        assert!(tree.has_xdata_below(tree.root()));

        tree.clear_xdata(tree.root());

        assert!(!tree.account(real).has_xdata());
        assert!(tree.account(scratch).has_xdata());
        assert!(tree.has_xdata_below(tree.root()));
    }

    #[test]
    fn test_validate_accepts_ordinary_trees() {
        let mut tree = AccountTree::new();
        tree.find_account("Assets:Bank:Checking", true).unwrap();
        tree.find_account("Expenses:Food", true).unwrap();
        assert!(tree.validate());
    }

    #[test]
    fn test_validate_rejects_self_child() {
        let mut tree = AccountTree::new();
        let cash = tree.find_account("Assets:Cash", true).unwrap();
        tree.nodes[cash.0]
            .children
            .insert(CompactString::from("loop"), cash);
        assert!(!tree.validate());
    }

    #[test]
    fn test_validate_rejects_excessive_depth() {
        let mut tree = AccountTree::new();
        let mut current = tree.root();
        for _ in 0..(MAX_ACCOUNT_DEPTH + 1) {
            current = tree.find_account_from(current, "n", true).unwrap();
        }
        assert!(!tree.validate());
    }

    #[test]
    fn test_find_accounts_by_pattern() {
        let mut tree = AccountTree::new();
        let checking = tree.find_account("Assets:Bank:Checking", true).unwrap();
        let savings = tree.find_account("Assets:Bank:Savings", true).unwrap();
        tree.find_account("Expenses:Bank Fees", true).unwrap();

        let bank = tree.account(checking).parent().unwrap();
        let pattern = Regex::new("^Assets:Bank").unwrap();
        assert_eq!(
            tree.find_accounts_by_pattern(&pattern),
            vec![bank, checking, savings]
        );

        let pattern = Regex::new("Nothing").unwrap();
        assert!(tree.find_accounts_by_pattern(&pattern).is_empty());
    }
}
