//! Per-account report bookkeeping: state flags and posting statistics.
//!
//! Accounts carry no statistics until a pass asks for them. The
//! journal then hangs an [`AccountExtData`] off the account, with one
//! [`AccountDetails`] for the account's own postings and one for the
//! whole subtree.

use crate::balance::Balance;
use crate::datetime::current_date;
use crate::posting::{Posting, PostingFlags, PostingId, PostingStatus};
use bitflags::bitflags;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use compact_str::CompactString;
use std::collections::BTreeSet;

bitflags! {
    /// Report-pass state bits on an account.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccountXDataFlags: u16 {
        /// The sort key for this account has been computed.
        const SORT_CALC = 0x01;
        /// The subtree holds at least one non-virtual posting.
        const HAS_NON_VIRTUALS = 0x02;
        /// The subtree holds unbalanced virtual postings.
        const HAS_UNB_VIRTUALS = 0x04;
        /// The pass should auto-create virtual postings here.
        const AUTO_VIRTUALIZE = 0x08;
        /// At least one posting of this account has been walked.
        const VISITED = 0x10;
        /// The account matched the pass's selection predicate.
        const MATCHING = 0x20;
        /// The account is scheduled for display.
        const TO_DISPLAY = 0x40;
        /// The account has been displayed.
        const DISPLAYED = 0x80;
    }
}

/// Statistics over a set of postings, plus the running totals and scan
/// cursors used to compute them incrementally.
///
/// `total` and `real_total` accumulate across repeated scans; the
/// cursors remember how far previous scans got so postings are never
/// counted twice. Merging with [`add`](Self::add) combines only the
/// gathered statistics, never totals or cursors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountDetails {
    /// Running sum of scanned posting amounts.
    pub total: Option<Balance>,
    /// Running sum excluding virtual postings.
    pub real_total: Option<Balance>,
    /// The running total has been computed for the current pass.
    pub calculated: bool,
    /// The statistics below have been gathered for the current pass.
    pub gathered: bool,

    /// Postings counted.
    pub posts_count: usize,
    /// Postings flagged as virtual cost legs.
    pub posts_virtuals_count: usize,
    /// Postings in a cleared state.
    pub posts_cleared_count: usize,
    /// Postings dated within the last 7 days of the session date.
    pub posts_last_7_count: usize,
    /// Postings dated within the last 30 days of the session date.
    pub posts_last_30_count: usize,
    /// Postings dated in the session date's calendar month.
    pub posts_this_month_count: usize,

    /// Date of the oldest posting seen.
    pub earliest_post: Option<NaiveDate>,
    /// Date of the oldest cleared posting seen.
    pub earliest_cleared_post: Option<NaiveDate>,
    /// Date of the newest posting seen.
    pub latest_post: Option<NaiveDate>,
    /// Date of the newest cleared posting seen.
    pub latest_cleared_post: Option<NaiveDate>,

    /// Earliest timeclock check-in seen. Never merged by `add`.
    pub earliest_checkin: Option<NaiveDateTime>,
    /// Latest timeclock check-out seen. Never merged by `add`.
    pub latest_checkout: Option<NaiveDateTime>,
    /// Whether the posting holding the latest check-out was cleared.
    pub latest_checkout_cleared: bool,

    /// Source files the postings came from. Gathered on demand only.
    pub filenames: BTreeSet<CompactString>,
    /// Full names of the accounts posted against. Gathered on demand only.
    pub accounts_referenced: BTreeSet<CompactString>,
    /// Payees seen. Gathered on demand only.
    pub payees_referenced: BTreeSet<CompactString>,

    /// How many of the account's own postings the total has absorbed.
    pub last_post: usize,
    /// How many report-selected postings the total has absorbed.
    pub last_reported_post: usize,
}

impl AccountDetails {
    /// Folds one posting into the statistics.
    pub(crate) fn update(&mut self, posting: &Posting, gather_all: bool, account_name: Option<&str>) {
        self.posts_count += 1;

        if posting.flags.contains(PostingFlags::COST_VIRTUAL) {
            self.posts_virtuals_count += 1;
        }

        if gather_all {
            if let Some(filename) = posting.filename() {
                self.filenames.insert(CompactString::from(filename));
            }
        }

        if let Some(date) = posting.date() {
            let today = current_date();

            if date.year() == today.year() && date.month() == today.month() {
                self.posts_this_month_count += 1;
            }
            if (today - date).num_days() <= 30 {
                self.posts_last_30_count += 1;
            }
            if (today - date).num_days() <= 7 {
                self.posts_last_7_count += 1;
            }

            if self.earliest_post.is_none_or(|earliest| date < earliest) {
                self.earliest_post = Some(date);
            }
            if self.latest_post.is_none_or(|latest| date > latest) {
                self.latest_post = Some(date);
            }

            if posting.status == PostingStatus::Cleared {
                self.posts_cleared_count += 1;

                if self.earliest_cleared_post.is_none_or(|earliest| date < earliest) {
                    self.earliest_cleared_post = Some(date);
                }
                if self.latest_cleared_post.is_none_or(|latest| date > latest) {
                    self.latest_cleared_post = Some(date);
                }
            }
        }

        if let Some(checkin) = posting.checkin {
            if self.earliest_checkin.is_none_or(|earliest| checkin < earliest) {
                self.earliest_checkin = Some(checkin);
            }
        }
        if let Some(checkout) = posting.checkout {
            if self.latest_checkout.is_none_or(|latest| checkout > latest) {
                self.latest_checkout = Some(checkout);
                self.latest_checkout_cleared = posting.status == PostingStatus::Cleared;
            }
        }

        if gather_all {
            if let Some(name) = account_name {
                self.accounts_referenced.insert(CompactString::from(name));
            }
            if let Some(payee) = &posting.payee {
                self.payees_referenced.insert(CompactString::from(payee.as_str()));
            }
        }
    }

    /// Drops the gathered statistics ahead of a fresh gather, keeping
    /// the running totals, pass flags, and scan cursors that belong to
    /// the incremental total machinery.
    pub(crate) fn reset_gathered(&mut self) {
        *self = AccountDetails {
            total: self.total.take(),
            real_total: self.real_total.take(),
            calculated: self.calculated,
            last_post: self.last_post,
            last_reported_post: self.last_reported_post,
            ..AccountDetails::default()
        };
    }

    /// Merges another aggregate's gathered statistics into this one.
    ///
    /// Counts are summed, date extremes widened, and name sets
    /// unioned. Totals, pass flags, scan cursors, and the timeclock
    /// extremes stay untouched.
    pub fn add(&mut self, other: &AccountDetails) {
        self.posts_count += other.posts_count;
        self.posts_virtuals_count += other.posts_virtuals_count;
        self.posts_cleared_count += other.posts_cleared_count;
        self.posts_last_7_count += other.posts_last_7_count;
        self.posts_last_30_count += other.posts_last_30_count;
        self.posts_this_month_count += other.posts_this_month_count;

        self.earliest_post = merge_earliest(self.earliest_post, other.earliest_post);
        self.earliest_cleared_post =
            merge_earliest(self.earliest_cleared_post, other.earliest_cleared_post);
        self.latest_post = merge_latest(self.latest_post, other.latest_post);
        self.latest_cleared_post =
            merge_latest(self.latest_cleared_post, other.latest_cleared_post);

        self.filenames.extend(other.filenames.iter().cloned());
        self.accounts_referenced
            .extend(other.accounts_referenced.iter().cloned());
        self.payees_referenced
            .extend(other.payees_referenced.iter().cloned());
    }
}

fn merge_earliest(mine: Option<NaiveDate>, theirs: Option<NaiveDate>) -> Option<NaiveDate> {
    match (mine, theirs) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn merge_latest(mine: Option<NaiveDate>, theirs: Option<NaiveDate>) -> Option<NaiveDate> {
    match (mine, theirs) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Report bookkeeping hung off an account on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountExtData {
    /// Report-pass state bits.
    pub flags: AccountXDataFlags,
    /// Statistics over the account's own postings.
    pub self_details: AccountDetails,
    /// Statistics over the account's whole subtree.
    pub family_details: AccountDetails,
    /// Postings a report pass routed to this account explicitly.
    pub reported_posts: Vec<PostingId>,
}

impl AccountExtData {
    /// True once a pass has walked a posting of this account.
    pub fn is_visited(&self) -> bool {
        self.flags.contains(AccountXDataFlags::VISITED)
    }

    /// Flags the account as walked.
    pub fn mark_visited(&mut self) {
        self.flags |= AccountXDataFlags::VISITED;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountId;
    use crate::amount::Amount;
    use crate::datetime::{reset_current_date, set_current_date};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dated_posting(on: NaiveDate) -> Posting {
        let mut posting = Posting::with_amount(AccountId(0), Amount::new(dec!(1)));
        posting.date = Some(on);
        posting
    }

    #[test]
    fn test_update_counts_and_extremes() {
        set_current_date(date(2024, 6, 15));

        let mut details = AccountDetails::default();
        details.update(&dated_posting(date(2024, 6, 14)), false, None);
        details.update(&dated_posting(date(2024, 6, 1)), false, None);
        details.update(&dated_posting(date(2023, 12, 25)), false, None);

        assert_eq!(details.posts_count, 3);
        assert_eq!(details.posts_last_7_count, 1);
        assert_eq!(details.posts_last_30_count, 2);
        assert_eq!(details.posts_this_month_count, 2);
        assert_eq!(details.earliest_post, Some(date(2023, 12, 25)));
        assert_eq!(details.latest_post, Some(date(2024, 6, 14)));

        reset_current_date();
    }

    #[test]
    fn test_update_tracks_cleared_postings() {
        set_current_date(date(2024, 6, 15));

        let mut details = AccountDetails::default();
        let mut cleared = dated_posting(date(2024, 5, 1));
        cleared.status = PostingStatus::Cleared;
        details.update(&cleared, false, None);
        details.update(&dated_posting(date(2024, 5, 2)), false, None);

        assert_eq!(details.posts_cleared_count, 1);
        assert_eq!(details.earliest_cleared_post, Some(date(2024, 5, 1)));
        assert_eq!(details.latest_cleared_post, Some(date(2024, 5, 1)));

        reset_current_date();
    }

    #[test]
    fn test_update_gathers_names_only_on_request() {
        set_current_date(date(2024, 6, 15));

        let mut plain = AccountDetails::default();
        let mut posting = dated_posting(date(2024, 5, 1));
        posting.payee = Some("Acme".into());
        plain.update(&posting, false, Some("Assets:Cash"));
        assert!(plain.accounts_referenced.is_empty());
        assert!(plain.payees_referenced.is_empty());

        let mut gathered = AccountDetails::default();
        gathered.update(&posting, true, Some("Assets:Cash"));
        assert!(gathered.accounts_referenced.contains("Assets:Cash"));
        assert!(gathered.payees_referenced.contains("Acme"));

        reset_current_date();
    }

    #[test]
    fn test_add_merges_counts_dates_and_sets() {
        let mut left = AccountDetails {
            posts_count: 2,
            posts_cleared_count: 1,
            earliest_post: Some(date(2024, 1, 5)),
            latest_post: Some(date(2024, 2, 1)),
            ..Default::default()
        };
        left.payees_referenced.insert("Acme".into());

        let mut right = AccountDetails {
            posts_count: 3,
            earliest_post: Some(date(2023, 11, 30)),
            latest_post: Some(date(2024, 1, 20)),
            ..Default::default()
        };
        right.payees_referenced.insert("Bravo".into());

        left.add(&right);
        assert_eq!(left.posts_count, 5);
        assert_eq!(left.posts_cleared_count, 1);
        assert_eq!(left.earliest_post, Some(date(2023, 11, 30)));
        assert_eq!(left.latest_post, Some(date(2024, 2, 1)));
        assert!(left.payees_referenced.contains("Acme"));
        assert!(left.payees_referenced.contains("Bravo"));
    }

    #[test]
    fn test_add_leaves_totals_and_cursors_alone() {
        let mut left = AccountDetails {
            last_post: 4,
            calculated: true,
            ..Default::default()
        };
        left.total = Some(Balance::from_amount(&Amount::new(dec!(9))));

        let right = AccountDetails {
            posts_count: 1,
            last_post: 100,
            earliest_checkin: date(2024, 1, 1).and_hms_opt(9, 0, 0),
            ..Default::default()
        };

        left.add(&right);
        assert_eq!(left.last_post, 4);
        assert!(left.calculated);
        assert_eq!(left.total, Some(Balance::from_amount(&Amount::new(dec!(9)))));
        assert!(left.earliest_checkin.is_none());
    }

    #[test]
    fn test_ext_data_visited_flag() {
        let mut xdata = AccountExtData::default();
        assert!(!xdata.is_visited());
        xdata.mark_visited();
        assert!(xdata.is_visited());
        assert!(xdata.flags.contains(AccountXDataFlags::VISITED));
    }
}
