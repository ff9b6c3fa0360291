use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{info, instrument, warn};

use crate::catalog::CatalogService;
use crate::entities::{CartLine, OrderDraft, OrderOutcome, OrderReceipt, OrderStatus};
use crate::error::Error;
use crate::ports::ShopApi;
use crate::session::SharedCredentials;

/// The order endpoint requires a return URL even for wallet-funded orders
pub const RETURN_URL: &str = "http://127.0.0.1";

/// Per-line progress heartbeat interval
const LINE_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Running,
    /// Every line was processed
    Completed,
    /// Cancelled between lines; already-submitted lines stand
    Stopped,
}

/// Progress stream of one checkout batch
#[derive(Debug, Clone)]
pub enum BatchEvent {
    LineStarted { index: usize },
    /// Heartbeat while a line is in flight, for spinner-style display
    LineTick { index: usize },
    LineFinished { index: usize, outcome: OrderOutcome },
    BatchFinished { state: BatchState, outcomes: Vec<OrderOutcome> },
}

/// Submits cart lines strictly one at a time.
///
/// Orders are never retried and never reordered; a failed line records its
/// error and the batch moves on. A stop request takes effect before the next
/// line, never mid-submission.
pub struct OrderExecutor<S>
where
    S: ShopApi + 'static,
{
    api: Arc<S>,
    catalog: Arc<CatalogService<S>>,
    credentials: SharedCredentials,
    throttle: Duration,
    running: AtomicBool,
    stop: AtomicBool,
    state: Mutex<BatchState>,
}

impl<S> OrderExecutor<S>
where
    S: ShopApi + 'static,
{
    pub fn new(
        api: Arc<S>,
        catalog: Arc<CatalogService<S>>,
        credentials: SharedCredentials,
        throttle: Duration,
    ) -> Self {
        Self {
            api,
            catalog,
            credentials,
            throttle,
            running: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            state: Mutex::new(BatchState::Idle),
        }
    }

    pub fn state(&self) -> BatchState {
        *self.state.lock().expect("batch state lock poisoned")
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Launch a batch in the background. A no-op while a batch is already
    /// running; the in-flight batch is never disturbed.
    pub fn start(self: &Arc<Self>, lines: Vec<CartLine>, events: UnboundedSender<BatchEvent>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("checkout batch already running, ignoring start request");
            return;
        }
        self.stop.store(false, Ordering::SeqCst);
        *self.state.lock().expect("batch state lock poisoned") = BatchState::Running;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(lines, events).await;
        });
    }

    /// Request cancellation; honoured before the next line starts
    pub fn stop(&self) {
        if self.is_running() {
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    #[instrument(skip_all, fields(lines = lines.len()))]
    async fn run(&self, lines: Vec<CartLine>, events: UnboundedSender<BatchEvent>) {
        let mut outcomes = Vec::with_capacity(lines.len());
        let mut stopped = false;

        for (index, line) in lines.iter().enumerate() {
            if self.stop.load(Ordering::SeqCst) {
                info!(processed = index, "batch stopped by user");
                stopped = true;
                break;
            }

            let _ = events.send(BatchEvent::LineStarted { index });
            let (done_tx, ticker) = self.spawn_ticker(index, events.clone());

            // One fixed pause per request keeps the storefront from
            // rate-limiting the batch.
            time::sleep(self.throttle).await;
            let outcome = self.submit_line(line).await;

            let _ = done_tx.send(());
            let _ = ticker.await;

            if let OrderOutcome::Failed(reason) = &outcome {
                warn!(item_id = %line.item_id, %reason, "order line failed");
            }
            let _ = events.send(BatchEvent::LineFinished {
                index,
                outcome: outcome.clone(),
            });
            outcomes.push(outcome);
        }

        let state = if stopped {
            BatchState::Stopped
        } else {
            BatchState::Completed
        };
        *self.state.lock().expect("batch state lock poisoned") = state;

        // Balances changed server-side; a failed refresh only affects display
        if let Err(e) = self.catalog.refresh_wallets().await {
            warn!(error = %e, "post-batch wallet refresh failed");
        }

        let _ = events.send(BatchEvent::BatchFinished { state, outcomes });
        self.running.store(false, Ordering::SeqCst);
    }

    fn spawn_ticker(
        &self,
        index: usize,
        events: UnboundedSender<BatchEvent>,
    ) -> (oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let (done_tx, mut done_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut ticks = time::interval(LINE_TICK);
            loop {
                tokio::select! {
                    _ = &mut done_rx => break,
                    _ = ticks.tick() => {
                        if events.send(BatchEvent::LineTick { index }).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        (done_tx, handle)
    }

    /// Safeguard against the current catalog, then submit. Items that have
    /// been delisted since they were carted are refused locally rather than
    /// bounced by the server.
    async fn submit_line(&self, line: &CartLine) -> OrderOutcome {
        match self.catalog.find_by_id(&line.item_id).await {
            Ok(item) if item.is_orderable() => {}
            _ => {
                return OrderOutcome::Failed(
                    "item was not found or not publicly available for purchase".to_string(),
                )
            }
        }

        let session = match self.credentials.read().await.clone() {
            Some(session) => session,
            None => return OrderOutcome::Failed(Error::NotLoggedIn.to_string()),
        };

        let draft = OrderDraft::from_line(line, RETURN_URL);
        match self.api.submit_order(&session, &draft).await {
            Ok(receipt) => match receipt.status {
                OrderStatus::Fulfilled => OrderOutcome::Fulfilled,
                _ => OrderOutcome::Accepted(receipt.payment_station_url),
            },
            Err(e) => OrderOutcome::Failed(e.to_string()),
        }
    }

    /// Direct single-item purchase outside the cart, by SKU or item id.
    /// Returns the receipt so the caller can open the payment-station URL.
    #[instrument(skip(self))]
    pub async fn buy_now(&self, sku_or_id: &str, quantity: u32) -> Result<OrderReceipt, Error> {
        if quantity == 0 {
            return Err(Error::Validation(
                "you cannot place an order for 0 items".to_string(),
            ));
        }
        let item = match self.catalog.find_by_sku(sku_or_id).await {
            Ok(item) => item,
            Err(_) => self.catalog.find_by_id(sku_or_id).await?,
        };
        if !item.is_orderable() {
            return Err(Error::Order(
                "item was not found or not publicly available for purchase".to_string(),
            ));
        }
        let pricing = item
            .pricing
            .as_ref()
            .ok_or_else(|| Error::Order(format!("item {} has no price", item.item_id)))?;

        let session = self.credentials.read().await.clone().ok_or(Error::NotLoggedIn)?;
        let draft = OrderDraft {
            item_id: item.item_id.clone(),
            quantity,
            price: pricing.price * i64::from(quantity),
            discounted_price: pricing.discounted_price * i64::from(quantity),
            currency_code: pricing.currency_code.clone(),
            region: item.region.clone(),
            language: item.language.clone(),
            return_url: RETURN_URL.to_string(),
        };
        let receipt = self.api.submit_order(&session, &draft).await?;
        info!(order_no = %receipt.order_no, "order placed");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{CatalogItem, Credentials, PriceTag, TokenBundle, WalletBalance};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio::sync::RwLock;

    struct MockShop {
        catalog: Vec<CatalogItem>,
        failing_items: HashSet<String>,
        submissions: Mutex<Vec<String>>,
        wallet_calls: AtomicUsize,
    }

    impl MockShop {
        fn new(catalog: Vec<CatalogItem>) -> Self {
            Self {
                catalog,
                failing_items: HashSet::new(),
                submissions: Mutex::new(Vec::new()),
                wallet_calls: AtomicUsize::new(0),
            }
        }

        fn submitted(&self) -> Vec<String> {
            self.submissions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ShopApi for MockShop {
        async fn fetch_catalog(&self, _: &Credentials) -> Result<Vec<CatalogItem>, Error> {
            Ok(self.catalog.clone())
        }

        async fn fetch_wallet(
            &self,
            _: &Credentials,
            currency_code: &str,
        ) -> Result<WalletBalance, Error> {
            self.wallet_calls.fetch_add(1, Ordering::SeqCst);
            Ok(WalletBalance {
                currency_code: currency_code.to_string(),
                balance: 100,
            })
        }

        async fn submit_order(
            &self,
            _: &Credentials,
            draft: &OrderDraft,
        ) -> Result<OrderReceipt, Error> {
            self.submissions.lock().unwrap().push(draft.item_id.clone());
            if self.failing_items.contains(&draft.item_id) {
                return Err(Error::Order("insufficient funds".to_string()));
            }
            Ok(OrderReceipt {
                order_no: format!("order-{}", draft.item_id),
                status: OrderStatus::Fulfilled,
                price: draft.price,
                tax: 0,
                vat: 0,
                sales_tax: 0,
                payment_provider_fee: 0,
                payment_method_fee: 0,
                currency_code: draft.currency_code.clone(),
                currency_decimals: 0,
                payment_station_url: None,
            })
        }
    }

    fn orderable(id: &str) -> CatalogItem {
        CatalogItem {
            item_id: id.to_string(),
            sku: format!("pd3_preplanning_uni_{}", id),
            name: format!("name-{}", id),
            category_path: "/PreplanningAssets".to_string(),
            region: "US".to_string(),
            language: "en".to_string(),
            purchasable: true,
            listable: true,
            use_count: 1,
            pricing: Some(PriceTag {
                price: 1000,
                discounted_price: 800,
                currency_code: "CASH".to_string(),
            }),
        }
    }

    fn line(id: &str) -> CartLine {
        CartLine {
            item_id: id.to_string(),
            quantity: 1,
            price: 1000,
            discounted_price: 800,
            currency_code: "CASH".to_string(),
            region: "US".to_string(),
            language: "en".to_string(),
            display_name: format!("name-{}", id),
            family_name: "Universal".to_string(),
        }
    }

    fn logged_in() -> SharedCredentials {
        let bundle = TokenBundle {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 3600,
            refresh_expires_in: 86400,
            user_id: "user-1".to_string(),
            display_name: "Dallas".to_string(),
        };
        Arc::new(RwLock::new(Some(Credentials::from_bundle(bundle, 0))))
    }

    async fn executor(shop: MockShop) -> Arc<OrderExecutor<MockShop>> {
        let api = Arc::new(shop);
        let credentials = logged_in();
        let catalog = Arc::new(CatalogService::new(Arc::clone(&api), Arc::clone(&credentials)));
        catalog.refresh().await.unwrap();
        Arc::new(OrderExecutor::new(
            api,
            catalog,
            credentials,
            Duration::from_millis(1500),
        ))
    }

    async fn wait_for_finish(
        rx: &mut UnboundedReceiver<BatchEvent>,
    ) -> (BatchState, Vec<OrderOutcome>) {
        while let Some(event) = rx.recv().await {
            if let BatchEvent::BatchFinished { state, outcomes } = event {
                return (state, outcomes);
            }
        }
        panic!("event stream closed before the batch finished");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_line_does_not_halt_the_batch() {
        let mut shop = MockShop::new(vec![orderable("a"), orderable("b"), orderable("c")]);
        shop.failing_items.insert("b".to_string());
        let exec = executor(shop).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = time::Instant::now();
        exec.start(vec![line("a"), line("b"), line("c")], tx);

        let (state, outcomes) = wait_for_finish(&mut rx).await;
        // Three lines, one full throttle pause before each submission
        assert!(started.elapsed() >= Duration::from_millis(3 * 1500));
        assert_eq!(state, BatchState::Completed);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_fulfilled());
        assert!(matches!(&outcomes[1], OrderOutcome::Failed(msg) if msg.contains("insufficient")));
        assert!(outcomes[2].is_fulfilled());

        // One submission per line, in cart order, no retries
        assert_eq!(exec.api.submitted(), vec!["a", "b", "c"]);
        assert_eq!(exec.state(), BatchState::Completed);
        assert!(!exec.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_takes_effect_before_the_next_line() {
        let exec = executor(MockShop::new(vec![orderable("a"), orderable("b")])).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        exec.start(vec![line("a"), line("b")], tx);

        // Request the stop while line 0 is still in flight
        loop {
            match rx.recv().await.unwrap() {
                BatchEvent::LineStarted { index: 0 } => {
                    exec.stop();
                    break;
                }
                _ => continue,
            }
        }

        let (state, outcomes) = wait_for_finish(&mut rx).await;
        assert_eq!(state, BatchState::Stopped);
        // The in-flight line completed; the next one never started
        assert_eq!(outcomes.len(), 1);
        assert_eq!(exec.api.submitted(), vec!["a"]);
        assert_eq!(exec.state(), BatchState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_a_no_op_while_running() {
        let exec = executor(MockShop::new(vec![orderable("a")])).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        exec.start(vec![line("a")], tx);
        exec.start(vec![line("a")], tx2);

        let (_, outcomes) = wait_for_finish(&mut rx).await;
        assert_eq!(outcomes.len(), 1);
        // The second request was ignored; only the first batch submitted
        assert_eq!(exec.api.submitted(), vec!["a"]);
        assert!(rx2.try_recv().is_err(), "ignored start emitted events");

        // A finished executor accepts a new batch
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        exec.start(vec![line("a")], tx3);
        wait_for_finish(&mut rx3).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_delisted_item_is_refused_without_submission() {
        let mut gone = orderable("a");
        gone.listable = false;
        let exec = executor(MockShop::new(vec![gone])).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        exec.start(vec![line("a"), line("missing")], tx);

        let (state, outcomes) = wait_for_finish(&mut rx).await;
        assert_eq!(state, BatchState::Completed);
        assert!(matches!(&outcomes[0], OrderOutcome::Failed(_)));
        assert!(matches!(&outcomes[1], OrderOutcome::Failed(_)));
        assert!(exec.api.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_emits_ticks_and_refreshes_wallets() {
        let exec = executor(MockShop::new(vec![orderable("a")])).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        exec.start(vec![line("a")], tx);

        let mut ticks = 0;
        while let Some(event) = rx.recv().await {
            match event {
                BatchEvent::LineTick { index: 0 } => ticks += 1,
                BatchEvent::BatchFinished { .. } => break,
                _ => {}
            }
        }
        assert!(ticks > 0, "no heartbeat during the throttle window");

        // CASH, GOLD and CRED refetched after the batch
        assert_eq!(exec.api.wallet_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_buy_now_returns_the_receipt() {
        let exec = executor(MockShop::new(vec![orderable("a")])).await;

        let receipt = exec.buy_now("pd3_preplanning_uni_a", 2).await.unwrap();
        assert_eq!(receipt.order_no, "order-a");
        assert_eq!(receipt.price, 2000);

        assert!(matches!(
            exec.buy_now("unknown", 1).await,
            Err(Error::ItemNotFound(_))
        ));
        assert!(matches!(
            exec.buy_now("pd3_preplanning_uni_a", 0).await,
            Err(Error::Validation(_))
        ));
    }
}
