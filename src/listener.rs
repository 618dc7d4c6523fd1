use crate::history::BidEvent;
use crate::order::Order;

/// Hook for notifiers. Called after the corresponding change has committed;
/// implementations must not block for long, they run on the caller's thread.
pub trait NegotiationListener: Send + Sync {
    fn on_bid_event(&self, event: &BidEvent);

    fn on_order_created(&self, _order: &Order) {}
}
