//! Simulated account on top of a real market-data venue.
//!
//! Books come from the wrapped venue; orders, positions, trades and cash live
//! in memory. In paper mode resting orders fill when the live book trades
//! through them; in dry-run mode nothing ever fills.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info};

use binmm_core::{
    BookTop, Clock, InstrumentId, OrderId, OrderSide, PostOrderRequest, PostOrderResult, Price,
    Size, SystemClock,
};

use crate::error::VenueResult;
use crate::types::{OpenOrder, RawTrade, VenuePosition};
use crate::venue::{BoxFuture, DynVenue, Venue};

#[derive(Debug, Default)]
struct SimAccount {
    cash: Decimal,
    resting: Vec<OpenOrder>,
    /// instrument -> (shares, avg price)
    holdings: HashMap<InstrumentId, (Size, Price)>,
    trades: Vec<RawTrade>,
    seq: u64,
}

impl SimAccount {
    fn reserved_cash(&self) -> Decimal {
        self.resting
            .iter()
            .filter(|o| o.side == OrderSide::Buy)
            .map(|o| o.size_remaining().notional(o.price))
            .sum()
    }

    fn reserved_shares(&self, instrument: &InstrumentId) -> Size {
        self.resting
            .iter()
            .filter(|o| o.side == OrderSide::Sell && &o.instrument == instrument)
            .fold(Size::ZERO, |acc, o| acc + o.size_remaining())
    }

    fn held(&self, instrument: &InstrumentId) -> Size {
        self.holdings
            .get(instrument)
            .map(|(s, _)| *s)
            .unwrap_or(Size::ZERO)
    }

    fn apply_trade(
        &mut self,
        instrument: &InstrumentId,
        side: OrderSide,
        price: Price,
        size: Size,
        order_id: &OrderId,
        is_maker: bool,
        now_ms: u64,
    ) {
        let entry = self
            .holdings
            .entry(instrument.clone())
            .or_insert((Size::ZERO, Price::ZERO));
        match side {
            OrderSide::Buy => {
                let total = entry.0 + size;
                let cost = entry.0.notional(entry.1) + size.notional(price);
                entry.1 = Price::new(cost / total.inner());
                entry.0 = total;
                self.cash -= size.notional(price);
            }
            OrderSide::Sell => {
                entry.0 = entry.0.saturating_sub(size);
                self.cash += size.notional(price);
            }
        }
        if entry.0.is_zero() {
            self.holdings.remove(instrument);
        }

        self.seq += 1;
        self.trades.push(RawTrade {
            tx_ref: Some(format!("0xsim{:016x}{:08x}", now_ms, self.seq)),
            order_id: Some(order_id.to_string()),
            asset: instrument.to_string(),
            side: side.to_string(),
            size: size.inner(),
            price: price.inner(),
            timestamp_ms: Some(now_ms),
            is_maker,
            fee: Decimal::ZERO,
            rebate: Decimal::ZERO,
        });
    }

    /// Fill resting orders the book has traded through.
    fn match_against(&mut self, instrument: &InstrumentId, book: &BookTop, now_ms: u64) {
        let crossed: Vec<OpenOrder> = self
            .resting
            .iter()
            .filter(|o| &o.instrument == instrument)
            .filter(|o| match o.side {
                OrderSide::Buy => book.best_ask < Price::MAX && o.price >= book.best_ask,
                OrderSide::Sell => book.has_valid_bid() && o.price <= book.best_bid,
            })
            .cloned()
            .collect();

        for order in crossed {
            self.resting.retain(|o| o.order_id != order.order_id);
            let size = order.size_remaining();
            self.apply_trade(
                instrument,
                order.side,
                order.price,
                size,
                &order.order_id,
                true,
                now_ms,
            );
            info!(
                instrument = %instrument,
                side = %order.side,
                price = %order.price,
                size = %size,
                "Paper fill"
            );
        }
    }
}

/// Simulated venue for dry-run and paper trading.
pub struct SimVenue {
    market_data: DynVenue,
    fill_on_cross: bool,
    clock: Arc<dyn Clock>,
    account: Mutex<SimAccount>,
    last_books: Mutex<HashMap<InstrumentId, BookTop>>,
}

impl SimVenue {
    /// Dry-run: orders rest forever, nothing fills.
    pub fn dry_run(market_data: DynVenue, starting_cash: Decimal) -> Self {
        Self::new(market_data, starting_cash, false, Arc::new(SystemClock))
    }

    /// Paper: resting orders fill when the live book crosses them.
    pub fn paper(market_data: DynVenue, starting_cash: Decimal) -> Self {
        Self::new(market_data, starting_cash, true, Arc::new(SystemClock))
    }

    pub fn new(
        market_data: DynVenue,
        starting_cash: Decimal,
        fill_on_cross: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            market_data,
            fill_on_cross,
            clock,
            account: Mutex::new(SimAccount {
                cash: starting_cash,
                ..SimAccount::default()
            }),
            last_books: Mutex::new(HashMap::new()),
        }
    }

    async fn book(&self, instrument: &InstrumentId) -> VenueResult<BookTop> {
        let book = self.market_data.get_order_book(instrument).await?;
        self.last_books.lock().insert(instrument.clone(), book);
        if self.fill_on_cross {
            let now = self.clock.now_ms();
            self.account.lock().match_against(instrument, &book, now);
        }
        Ok(book)
    }

    fn post(&self, req: &PostOrderRequest) -> PostOrderResult {
        let book = self.last_books.lock().get(&req.instrument).copied();
        let now = self.clock.now_ms();
        let mut account = self.account.lock();

        match req.side {
            OrderSide::Buy => {
                let free = account.cash - account.reserved_cash();
                if req.size.notional(req.price) > free {
                    return PostOrderResult::rejected("not enough balance / allowance");
                }
            }
            OrderSide::Sell => {
                let free = account
                    .held(&req.instrument)
                    .saturating_sub(account.reserved_shares(&req.instrument));
                if req.size > free {
                    return PostOrderResult::rejected("not enough balance / allowance");
                }
            }
        }

        let crosses = book.is_some_and(|b| match req.side {
            OrderSide::Buy => b.best_ask < Price::MAX && req.price >= b.best_ask,
            OrderSide::Sell => b.has_valid_bid() && req.price <= b.best_bid,
        });

        let id = OrderId::synthetic("sim");
        if crosses {
            if req.post_only {
                debug!(
                    instrument = %req.instrument,
                    price = %req.price,
                    "Sim post-only would cross"
                );
                return PostOrderResult::crossed();
            }
            if self.fill_on_cross {
                account.apply_trade(
                    &req.instrument,
                    req.side,
                    req.price,
                    req.size,
                    &id,
                    false,
                    now,
                );
                return PostOrderResult::accepted(id);
            }
        }

        account.resting.push(OpenOrder {
            order_id: id.clone(),
            instrument: req.instrument.clone(),
            side: req.side,
            price: req.price,
            size: req.size,
            size_matched: Size::ZERO,
        });
        PostOrderResult::accepted(id)
    }
}

impl Venue for SimVenue {
    fn get_order_book<'a>(
        &'a self,
        instrument: &'a InstrumentId,
    ) -> BoxFuture<'a, VenueResult<BookTop>> {
        Box::pin(self.book(instrument))
    }

    fn post_order<'a>(
        &'a self,
        request: &'a PostOrderRequest,
    ) -> BoxFuture<'a, VenueResult<PostOrderResult>> {
        Box::pin(async move { Ok(self.post(request)) })
    }

    fn cancel_order<'a>(&'a self, order_id: &'a OrderId) -> BoxFuture<'a, VenueResult<bool>> {
        Box::pin(async move {
            let mut account = self.account.lock();
            let before = account.resting.len();
            account.resting.retain(|o| &o.order_id != order_id);
            Ok(account.resting.len() < before)
        })
    }

    fn cancel_all(&self) -> BoxFuture<'_, VenueResult<bool>> {
        Box::pin(async move {
            self.account.lock().resting.clear();
            Ok(true)
        })
    }

    fn get_open_orders(&self) -> BoxFuture<'_, VenueResult<Vec<OpenOrder>>> {
        Box::pin(async move { Ok(self.account.lock().resting.clone()) })
    }

    fn get_trades<'a>(
        &'a self,
        _account: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, VenueResult<Vec<RawTrade>>> {
        Box::pin(async move {
            let account = self.account.lock();
            Ok(account.trades.iter().rev().take(limit).cloned().collect())
        })
    }

    fn get_positions<'a>(
        &'a self,
        _account: &'a str,
    ) -> BoxFuture<'a, VenueResult<Vec<VenuePosition>>> {
        Box::pin(async move {
            let account = self.account.lock();
            Ok(account
                .holdings
                .iter()
                .map(|(instrument, (size, avg))| VenuePosition {
                    instrument: instrument.clone(),
                    size: *size,
                    avg_price: *avg,
                })
                .collect())
        })
    }

    fn get_balance<'a>(&'a self, _account: &'a str) -> BoxFuture<'a, VenueResult<Decimal>> {
        Box::pin(async move { Ok(self.account.lock().cash) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockVenue;
    use binmm_core::ManualClock;
    use rust_decimal_macros::dec;

    fn setup(fill_on_cross: bool) -> (Arc<MockVenue>, SimVenue, InstrumentId) {
        let market = Arc::new(MockVenue::new());
        let tok = InstrumentId::from("tok");
        market.set_book(&tok, dec!(0.45), dec!(0.47));
        let sim = SimVenue::new(
            market.clone(),
            dec!(20),
            fill_on_cross,
            Arc::new(ManualClock::new(1_000)),
        );
        (market, sim, tok)
    }

    fn req(tok: &InstrumentId, side: OrderSide, price: Decimal, size: Decimal) -> PostOrderRequest {
        PostOrderRequest::new(tok.clone(), side, Price::new(price), Size::new(size))
    }

    #[tokio::test]
    async fn test_paper_buy_fills_when_book_crosses() {
        let (market, sim, tok) = setup(true);
        sim.get_order_book(&tok).await.unwrap();

        let r = sim
            .post_order(&req(&tok, OrderSide::Buy, dec!(0.44), dec!(10)))
            .await
            .unwrap();
        assert!(r.success);
        assert!(sim.get_positions("a").await.unwrap().is_empty());

        market.set_book(&tok, dec!(0.40), dec!(0.44));
        sim.get_order_book(&tok).await.unwrap();

        let positions = sim.get_positions("a").await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].size.inner(), dec!(10));
        assert_eq!(sim.get_balance("a").await.unwrap(), dec!(15.60));
        let trades = sim.get_trades("a", 50).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert!(trades[0].tx_ref.is_some());
    }

    #[tokio::test]
    async fn test_post_only_cross_rejected() {
        let (_market, sim, tok) = setup(true);
        sim.get_order_book(&tok).await.unwrap();
        let r = sim
            .post_order(&req(&tok, OrderSide::Buy, dec!(0.47), dec!(5)))
            .await
            .unwrap();
        assert!(r.would_cross);
    }

    #[tokio::test]
    async fn test_sell_without_shares_is_balance_error() {
        let (_market, sim, tok) = setup(true);
        let r = sim
            .post_order(&req(&tok, OrderSide::Sell, dec!(0.50), dec!(5)))
            .await
            .unwrap();
        assert!(r.is_balance_error());
    }

    #[tokio::test]
    async fn test_dry_run_never_fills() {
        let (market, sim, tok) = setup(false);
        sim.get_order_book(&tok).await.unwrap();
        sim.post_order(&req(&tok, OrderSide::Buy, dec!(0.44), dec!(10)))
            .await
            .unwrap();
        market.set_book(&tok, dec!(0.30), dec!(0.35));
        sim.get_order_book(&tok).await.unwrap();

        assert!(sim.get_positions("a").await.unwrap().is_empty());
        assert_eq!(sim.get_open_orders().await.unwrap().len(), 1);
        assert!(sim.cancel_all().await.unwrap());
        assert!(sim.get_open_orders().await.unwrap().is_empty());
    }
}
