//! Read models: denormalised bid views, paging and per-user counts
use chrono::Utc;

use crate::bid::{Bid, BidStatus};
use crate::product::{Availability, Product};
use crate::types::{Amount, TimeStamp};

/// A bid with the product fields a UI needs to render it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidView {
    pub bid: Bid,
    pub product_name: String,
    pub expected_price: Option<Amount>,
    pub product_availability: Availability,
    pub is_expired: bool, // logically expired, even if not yet swept
}

impl BidView {
    pub fn new(bid: Bid, product: &Product, now: &TimeStamp<Utc>) -> Self {
        Self {
            is_expired: bid.status == BidStatus::Expired || bid.is_expired_at(now),
            bid,
            product_name: product.name.clone(),
            expected_price: product.expected_price,
            product_availability: product.availability.clone(),
        }
    }
}

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidQuery {
    pub status: Option<BidStatus>,
    pub page: usize, // 1-based
    pub limit: usize,
}

impl Default for BidQuery {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl BidQuery {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_status(mut self, status: BidStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn with_page(mut self, page: usize, limit: usize) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }
    pub fn matches(&self, bid: &Bid) -> bool {
        self.status.is_none_or(|status| status == bid.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    /// Slice `all` into the requested page. Out of range pages come back empty
    /// with the totals still filled in.
    pub fn paginate(all: Vec<T>, page: usize, limit: usize) -> Self {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let total = all.len();
        let pages = total.div_ceil(limit);

        let items = all
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Self {
            items,
            page,
            limit,
            total,
            pages,
            has_next: page < pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BidStats {
    pub total: usize,
    pub pending: usize, // PLACED or COUNTERED and still within its window
    pub accepted: usize,
    pub rejected: usize,
    pub expired: usize,
}

impl BidStats {
    pub fn tally<'a>(bids: impl IntoIterator<Item = &'a Bid>, now: &TimeStamp<Utc>) -> Self {
        let mut stats = BidStats::default();
        for bid in bids {
            stats.total += 1;
            match bid.status {
                _ if bid.is_expired_at(now) => stats.expired += 1,
                BidStatus::Placed | BidStatus::Countered => stats.pending += 1,
                BidStatus::Accepted => stats.accepted += 1,
                BidStatus::Rejected => stats.rejected += 1,
                BidStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_reports_neighbours() {
        let page = Page::paginate((1..=45).collect::<Vec<_>>(), 2, 20);
        assert_eq!(page.items.first(), Some(&21));
        assert_eq!(page.items.len(), 20);
        assert_eq!(page.pages, 3);
        assert!(page.has_next);
        assert!(page.has_prev);

        let last = Page::paginate((1..=45).collect::<Vec<_>>(), 3, 20);
        assert_eq!(last.items, vec![41, 42, 43, 44, 45]);
        assert!(!last.has_next);
    }

    #[test]
    fn paging_clamps_degenerate_requests() {
        let page = Page::paginate(vec!['a', 'b'], 0, 0);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 1);
        assert_eq!(page.items, vec!['a']);

        let empty: Page<u8> = Page::paginate(vec![], 1, 20);
        assert_eq!(empty.pages, 0);
        assert!(!empty.has_next);
    }
}
