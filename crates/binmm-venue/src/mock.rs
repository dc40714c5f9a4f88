//! Mock venue for testing.
//!
//! Holds a scriptable in-memory account: books, positions, balance, trades.
//! Accepted orders are kept as resting orders until cancelled, so ledger
//! sync and "what is live on the venue" assertions work against it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rust_decimal::Decimal;

use binmm_core::{
    BookTop, InstrumentId, OrderId, OrderSide, PostOrderRequest, PostOrderResult, Price, Size,
};

use crate::error::{VenueError, VenueResult};
use crate::types::{OpenOrder, RawTrade, VenuePosition};
use crate::venue::{BoxFuture, Venue};

/// Venue operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    Book,
    Post,
    Cancel,
    CancelAll,
    OpenOrders,
    Trades,
    Positions,
    Balance,
}

#[derive(Debug, Default)]
struct MockState {
    books: HashMap<InstrumentId, BookTop>,
    positions: HashMap<InstrumentId, VenuePosition>,
    balance: Decimal,
    trades: Vec<RawTrade>,
    resting: Vec<OpenOrder>,
    scripted_posts: VecDeque<PostOrderResult>,
    failing: HashSet<MockCall>,
    refuse_cancel: HashSet<OrderId>,
    posts: Vec<PostOrderRequest>,
    cancels: Vec<OrderId>,
    cancel_all_calls: u32,
    position_calls: u32,
}

/// Mock venue for testing.
#[derive(Debug, Default)]
pub struct MockVenue {
    state: Mutex<MockState>,
    next_id: AtomicU64,
}

impl MockVenue {
    /// Create an empty mock venue.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_book(&self, instrument: &InstrumentId, bid: Decimal, ask: Decimal) {
        self.state.lock().books.insert(
            instrument.clone(),
            BookTop::new(Price::new(bid), Price::new(ask)),
        );
    }

    /// Set the authoritative holding for an instrument (zero removes it).
    pub fn set_position(&self, instrument: &InstrumentId, size: Decimal, avg_price: Decimal) {
        let mut state = self.state.lock();
        if size.is_zero() {
            state.positions.remove(instrument);
        } else {
            state.positions.insert(
                instrument.clone(),
                VenuePosition {
                    instrument: instrument.clone(),
                    size: Size::new(size),
                    avg_price: Price::new(avg_price),
                },
            );
        }
    }

    pub fn set_balance(&self, usdc: Decimal) {
        self.state.lock().balance = usdc;
    }

    /// Append a trade to the account history.
    pub fn push_trade(&self, trade: RawTrade) {
        self.state.lock().trades.push(trade);
    }

    /// Queue the result for the next `post_order` call.
    ///
    /// Unscripted posts are accepted with a generated id.
    pub fn script_post(&self, result: PostOrderResult) {
        self.state.lock().scripted_posts.push_back(result);
    }

    /// Make every call of the given kind fail (or succeed again).
    pub fn set_failing(&self, call: MockCall, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(call);
        } else {
            state.failing.remove(&call);
        }
    }

    /// Make cancels of one specific order report "not cancelled".
    pub fn refuse_cancel(&self, order_id: &OrderId) {
        self.state.lock().refuse_cancel.insert(order_id.clone());
    }

    /// Simulate a venue-side fill of a resting order (removes it when done).
    pub fn fill_resting(&self, order_id: &OrderId, size: Decimal) {
        let mut state = self.state.lock();
        if let Some(order) = state.resting.iter_mut().find(|o| &o.order_id == order_id) {
            order.size_matched = order.size_matched + Size::new(size);
        }
        state.resting.retain(|o| o.size_remaining().is_positive());
    }

    /// Drop a resting order without telling anyone (venue-side expiry).
    pub fn expire_resting(&self, order_id: &OrderId) {
        self.state.lock().resting.retain(|o| &o.order_id != order_id);
    }

    pub fn posts(&self) -> Vec<PostOrderRequest> {
        self.state.lock().posts.clone()
    }

    pub fn cancels(&self) -> Vec<OrderId> {
        self.state.lock().cancels.clone()
    }

    pub fn cancel_all_calls(&self) -> u32 {
        self.state.lock().cancel_all_calls
    }

    pub fn position_calls(&self) -> u32 {
        self.state.lock().position_calls
    }

    pub fn resting(&self) -> Vec<OpenOrder> {
        self.state.lock().resting.clone()
    }

    /// Resting orders for one instrument and side.
    pub fn resting_for(&self, instrument: &InstrumentId, side: OrderSide) -> Vec<OpenOrder> {
        self.state
            .lock()
            .resting
            .iter()
            .filter(|o| &o.instrument == instrument && o.side == side)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        let mut state = self.state.lock();
        state.posts.clear();
        state.cancels.clear();
        state.cancel_all_calls = 0;
        state.position_calls = 0;
    }

    fn check(&self, call: MockCall) -> VenueResult<()> {
        if self.state.lock().failing.contains(&call) {
            return Err(VenueError::Http(format!("HTTP 503: mock {call:?} failure")));
        }
        Ok(())
    }

    fn do_post(&self, request: &PostOrderRequest) -> VenueResult<PostOrderResult> {
        self.check(MockCall::Post)?;
        let mut state = self.state.lock();
        state.posts.push(request.clone());

        let result = match state.scripted_posts.pop_front() {
            Some(result) => result,
            None => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                PostOrderResult::accepted(OrderId::from_string(format!("mock-{n}")))
            }
        };

        if result.success {
            if let Some(id) = &result.order_id {
                state.resting.push(OpenOrder {
                    order_id: id.clone(),
                    instrument: request.instrument.clone(),
                    side: request.side,
                    price: request.price,
                    size: request.size,
                    size_matched: Size::ZERO,
                });
            }
        }
        Ok(result)
    }

    fn do_cancel(&self, order_id: &OrderId) -> VenueResult<bool> {
        self.check(MockCall::Cancel)?;
        let mut state = self.state.lock();
        state.cancels.push(order_id.clone());
        if state.refuse_cancel.contains(order_id) {
            return Ok(false);
        }
        state.resting.retain(|o| &o.order_id != order_id);
        Ok(true)
    }

    fn do_cancel_all(&self) -> VenueResult<bool> {
        self.check(MockCall::CancelAll)?;
        let mut state = self.state.lock();
        state.cancel_all_calls += 1;
        let refused = state.refuse_cancel.clone();
        state.resting.retain(|o| refused.contains(&o.order_id));
        Ok(state.resting.is_empty())
    }
}

impl Venue for MockVenue {
    fn get_order_book<'a>(
        &'a self,
        instrument: &'a InstrumentId,
    ) -> BoxFuture<'a, VenueResult<BookTop>> {
        Box::pin(async move {
            self.check(MockCall::Book)?;
            Ok(self
                .state
                .lock()
                .books
                .get(instrument)
                .copied()
                .unwrap_or_else(BookTop::empty))
        })
    }

    fn post_order<'a>(
        &'a self,
        request: &'a PostOrderRequest,
    ) -> BoxFuture<'a, VenueResult<PostOrderResult>> {
        Box::pin(async move { self.do_post(request) })
    }

    fn cancel_order<'a>(&'a self, order_id: &'a OrderId) -> BoxFuture<'a, VenueResult<bool>> {
        Box::pin(async move { self.do_cancel(order_id) })
    }

    fn cancel_all(&self) -> BoxFuture<'_, VenueResult<bool>> {
        Box::pin(async move { self.do_cancel_all() })
    }

    fn get_open_orders(&self) -> BoxFuture<'_, VenueResult<Vec<OpenOrder>>> {
        Box::pin(async move {
            self.check(MockCall::OpenOrders)?;
            Ok(self.state.lock().resting.clone())
        })
    }

    fn get_trades<'a>(
        &'a self,
        _account: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, VenueResult<Vec<RawTrade>>> {
        Box::pin(async move {
            self.check(MockCall::Trades)?;
            let state = self.state.lock();
            // Newest first, like the data API.
            Ok(state.trades.iter().rev().take(limit).cloned().collect())
        })
    }

    fn get_positions<'a>(
        &'a self,
        _account: &'a str,
    ) -> BoxFuture<'a, VenueResult<Vec<VenuePosition>>> {
        Box::pin(async move {
            self.check(MockCall::Positions)?;
            let mut state = self.state.lock();
            state.position_calls += 1;
            Ok(state.positions.values().cloned().collect())
        })
    }

    fn get_balance<'a>(&'a self, _account: &'a str) -> BoxFuture<'a, VenueResult<Decimal>> {
        Box::pin(async move {
            self.check(MockCall::Balance)?;
            Ok(self.state.lock().balance)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sell(instrument: &InstrumentId, price: Decimal) -> PostOrderRequest {
        PostOrderRequest::new(
            instrument.clone(),
            OrderSide::Sell,
            Price::new(price),
            Size::new(dec!(10)),
        )
    }

    #[tokio::test]
    async fn test_posted_orders_rest_until_cancelled() {
        let venue = MockVenue::new();
        let tok = InstrumentId::from("tok");

        let result = venue.post_order(&sell(&tok, dec!(0.52))).await.unwrap();
        assert!(result.success);
        let id = result.order_id.unwrap();
        assert_eq!(venue.resting_for(&tok, OrderSide::Sell).len(), 1);

        assert!(venue.cancel_order(&id).await.unwrap());
        assert!(venue.resting().is_empty());
        assert_eq!(venue.cancels(), vec![id]);
    }

    #[test]
    fn test_unset_book_is_empty() {
        let venue = MockVenue::new();
        let tok = InstrumentId::from("tok");
        let book = tokio_test::block_on(venue.get_order_book(&tok)).unwrap();
        assert!(!book.has_valid_bid());

        venue.set_book(&tok, dec!(0.48), dec!(0.52));
        let book = tokio_test::block_on(venue.get_order_book(&tok)).unwrap();
        assert_eq!(book.best_bid, Price::new(dec!(0.48)));
    }

    #[tokio::test]
    async fn test_scripted_rejection_does_not_rest() {
        let venue = MockVenue::new();
        let tok = InstrumentId::from("tok");
        venue.script_post(PostOrderResult::crossed());

        let result = venue.post_order(&sell(&tok, dec!(0.40))).await.unwrap();
        assert!(result.would_cross);
        assert!(venue.resting().is_empty());
        assert_eq!(venue.posts().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_call_returns_error() {
        let venue = MockVenue::new();
        venue.set_failing(MockCall::Trades, true);
        assert!(venue.get_trades("acct", 50).await.is_err());
        venue.set_failing(MockCall::Trades, false);
        assert!(venue.get_trades("acct", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_book_is_empty() {
        let venue = MockVenue::new();
        let book = venue.get_order_book(&InstrumentId::from("x")).await.unwrap();
        assert!(!book.has_valid_bid());
    }
}
