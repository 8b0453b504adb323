#![allow(dead_code)]

use async_trait::async_trait;
use charge_connector::charges::{
    Charge, ChargeEvent, ChargeStatus, GatewayAccount, Refund, RefundStatus,
};
use charge_connector::database::{
    ChargeStore, DatabaseError, InMemoryChargeStore, RefundStatusChange, StatusChange, StoreResult,
    SweepQuery,
};
use charge_connector::payments::gateways::SandboxGateway;
use charge_connector::payments::types::{
    AuthorisationOutcome, AuthorisationRequest, CancelOutcome, CaptureOutcome, CardDetails,
    ChallengeResponseRequest, GatewayName, GatewayNotification, NotificationPolicy,
    RefundOutcome, RefundRequest, TransactionRequest,
};
use charge_connector::payments::{
    GatewayRegistry, GatewayResponse, PaymentGateway, StatusMapper,
};
use charge_connector::services::{
    CardAuthoriseService, CardCaptureService, ChargeCancelService, ChargeRefundService,
    DnsResolver, GatewayOperationExecutor, LifecycleConfig, NotificationReconciler,
    NotificationSourceVerifier, StatusChangeNotifier,
};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const ACCOUNT_ID: i64 = 1;

// ---------------------------------------------------------------------------
// Scripted gateway
// ---------------------------------------------------------------------------

/// Gateway whose outcomes are queued by the test. Empty queues fall back to
/// the happy path. Notification parsing and the status mapping are the
/// sandbox gateway's.
pub struct ScriptedGateway {
    sandbox: SandboxGateway,
    authorise: Mutex<VecDeque<GatewayResponse<AuthorisationOutcome>>>,
    capture: Mutex<VecDeque<GatewayResponse<CaptureOutcome>>>,
    cancel: Mutex<VecDeque<GatewayResponse<CancelOutcome>>>,
    refund: Mutex<VecDeque<GatewayResponse<RefundOutcome>>>,
    delay: Mutex<Duration>,
    trusted_domain: Mutex<Option<String>>,
    calls: Mutex<HashMap<&'static str, u32>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            sandbox: SandboxGateway::default(),
            authorise: Mutex::new(VecDeque::new()),
            capture: Mutex::new(VecDeque::new()),
            cancel: Mutex::new(VecDeque::new()),
            refund: Mutex::new(VecDeque::new()),
            delay: Mutex::new(Duration::ZERO),
            trusted_domain: Mutex::new(None),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue_authorise(&self, outcome: GatewayResponse<AuthorisationOutcome>) {
        self.authorise.lock().unwrap().push_back(outcome);
    }

    pub fn queue_capture(&self, outcome: GatewayResponse<CaptureOutcome>) {
        self.capture.lock().unwrap().push_back(outcome);
    }

    pub fn queue_cancel(&self, outcome: GatewayResponse<CancelOutcome>) {
        self.cancel.lock().unwrap().push_back(outcome);
    }

    pub fn queue_refund(&self, outcome: GatewayResponse<RefundOutcome>) {
        self.refund.lock().unwrap().push_back(outcome);
    }

    /// Every gateway call sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_trusted_domain(&self, domain: &str) {
        *self.trusted_domain.lock().unwrap() = Some(domain.to_string());
    }

    pub fn calls(&self, operation: &str) -> u32 {
        self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
    }

    async fn call(&self, operation: &'static str) {
        *self.calls.lock().unwrap().entry(operation).or_insert(0) += 1;
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Sandbox
    }

    async fn authorise(
        &self,
        _request: AuthorisationRequest,
    ) -> GatewayResponse<AuthorisationOutcome> {
        self.call("authorise").await;
        let next = self.authorise.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(AuthorisationOutcome::Authorised {
                transaction_id: format!("tx-{}", Uuid::new_v4().simple()),
            })
        })
    }

    async fn authorise_challenge_response(
        &self,
        request: ChallengeResponseRequest,
    ) -> GatewayResponse<AuthorisationOutcome> {
        self.call("authorise_3ds").await;
        let next = self.authorise.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(AuthorisationOutcome::Authorised {
                transaction_id: request
                    .gateway_transaction_id
                    .unwrap_or_else(|| "tx-3ds".to_string()),
            })
        })
    }

    async fn capture(&self, _request: TransactionRequest) -> GatewayResponse<CaptureOutcome> {
        self.call("capture").await;
        let next = self.capture.lock().unwrap().pop_front();
        next.unwrap_or(Ok(CaptureOutcome::Submitted))
    }

    async fn cancel(&self, _request: TransactionRequest) -> GatewayResponse<CancelOutcome> {
        self.call("cancel").await;
        let next = self.cancel.lock().unwrap().pop_front();
        next.unwrap_or(Ok(CancelOutcome::Cancelled))
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResponse<RefundOutcome> {
        self.call("refund").await;
        let next = self.refund.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(RefundOutcome::Completed {
                reference: format!("ref-{}", request.refund_external_id),
            })
        })
    }

    fn parse_notification(&self, payload: &[u8]) -> GatewayResponse<Vec<GatewayNotification>> {
        self.sandbox.parse_notification(payload)
    }

    fn verify_notification(
        &self,
        notification: &GatewayNotification,
        account: &GatewayAccount,
    ) -> bool {
        self.sandbox.verify_notification(notification, account)
    }

    fn status_mapper(&self) -> &StatusMapper {
        self.sandbox.status_mapper()
    }

    fn notification_policy(&self) -> NotificationPolicy {
        NotificationPolicy {
            requires_transaction_id: true,
            trusted_domain: self.trusted_domain.lock().unwrap().clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Recording notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub terminal: Mutex<Vec<(String, ChargeStatus, ChargeStatus)>>,
    pub refunds: Mutex<Vec<(String, RefundStatus)>>,
}

impl RecordingNotifier {
    pub fn terminal_statuses(&self) -> Vec<ChargeStatus> {
        self.terminal.lock().unwrap().iter().map(|(_, _, to)| *to).collect()
    }
}

#[async_trait]
impl StatusChangeNotifier for RecordingNotifier {
    async fn on_terminal_status_reached(&self, charge: &Charge, old: ChargeStatus, new: ChargeStatus) {
        self.terminal
            .lock()
            .unwrap()
            .push((charge.external_id.clone(), old, new));
    }

    async fn on_refund_status_reached(
        &self,
        _charge: &Charge,
        refund: &Refund,
        _old: RefundStatus,
        new: RefundStatus,
    ) {
        self.refunds
            .lock()
            .unwrap()
            .push((refund.external_id.clone(), new));
    }
}

// ---------------------------------------------------------------------------
// Conflict-injecting store
// ---------------------------------------------------------------------------

/// Delegates to an in-memory store, failing the next N charge status commits
/// with a version conflict. When an interloper status is set, the first
/// injected conflict also writes that status, as a concurrent writer would.
pub struct ConflictingStore {
    pub inner: Arc<InMemoryChargeStore>,
    conflicts: AtomicU32,
    interloper: Mutex<Option<ChargeStatus>>,
}

impl ConflictingStore {
    pub fn new(inner: Arc<InMemoryChargeStore>) -> Self {
        Self {
            inner,
            conflicts: AtomicU32::new(0),
            interloper: Mutex::new(None),
        }
    }

    pub fn fail_next_commits(&self, count: u32) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    pub fn interleave(&self, status: ChargeStatus) {
        *self.interloper.lock().unwrap() = Some(status);
        self.conflicts.store(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChargeStore for ConflictingStore {
    async fn insert_charge(&self, charge: Charge) -> StoreResult<Charge> {
        self.inner.insert_charge(charge).await
    }

    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Charge>> {
        self.inner.find_by_external_id(external_id).await
    }

    async fn find_by_gateway_transaction_id(
        &self,
        gateway: GatewayName,
        transaction_id: &str,
    ) -> StoreResult<Option<Charge>> {
        self.inner
            .find_by_gateway_transaction_id(gateway, transaction_id)
            .await
    }

    async fn reload(&self, charge_id: Uuid) -> StoreResult<Charge> {
        self.inner.reload(charge_id).await
    }

    async fn commit_status_change(
        &self,
        charge: &Charge,
        change: StatusChange,
    ) -> StoreResult<Charge> {
        let inject = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            let interloper = self.interloper.lock().unwrap().take();
            if let Some(status) = interloper {
                self.inner
                    .commit_status_change(charge, StatusChange::to(status))
                    .await?;
            }
            return Err(DatabaseError::Conflict {
                entity: "charge",
                id: charge.external_id.clone(),
            });
        }
        self.inner.commit_status_change(charge, change).await
    }

    async fn find_events(&self, charge_id: Uuid) -> StoreResult<Vec<ChargeEvent>> {
        self.inner.find_events(charge_id).await
    }

    async fn find_eligible_for_sweep(&self, query: &SweepQuery) -> StoreResult<Vec<Charge>> {
        self.inner.find_eligible_for_sweep(query).await
    }

    async fn find_gateway_account(&self, account_id: i64) -> StoreResult<Option<GatewayAccount>> {
        self.inner.find_gateway_account(account_id).await
    }

    async fn insert_refund(&self, charge: &Charge, refund: Refund) -> StoreResult<Refund> {
        self.inner.insert_refund(charge, refund).await
    }

    async fn find_refunds_for_charge(&self, charge_id: Uuid) -> StoreResult<Vec<Refund>> {
        self.inner.find_refunds_for_charge(charge_id).await
    }

    async fn commit_refund_status_change(
        &self,
        refund: &Refund,
        change: RefundStatusChange,
    ) -> StoreResult<Refund> {
        self.inner.commit_refund_status_change(refund, change).await
    }
}

// ---------------------------------------------------------------------------
// DNS
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StaticResolver {
    pub reverse: HashMap<IpAddr, String>,
    pub forward: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn with_host(mut self, ip: &str, host: &str) -> Self {
        let ip: IpAddr = ip.parse().unwrap();
        self.reverse.insert(ip, host.to_string());
        self.forward.entry(host.to_string()).or_default().push(ip);
        self
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn reverse_lookup(&self, ip: IpAddr) -> Option<String> {
        self.reverse.get(&ip).cloned()
    }

    async fn forward_lookup(&self, host: &str) -> Vec<IpAddr> {
        self.forward.get(host).cloned().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub memory: Arc<InMemoryChargeStore>,
    pub store: Arc<dyn ChargeStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub registry: Arc<GatewayRegistry>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub async fn new() -> Self {
        let memory = Arc::new(InMemoryChargeStore::new());
        Self::with_store(memory.clone(), memory).await
    }

    /// Harness whose services go through a `ConflictingStore`.
    pub async fn conflicting() -> (Self, Arc<ConflictingStore>) {
        let memory = Arc::new(InMemoryChargeStore::new());
        let conflicting = Arc::new(ConflictingStore::new(memory.clone()));
        let harness = Self::with_store(memory, conflicting.clone()).await;
        (harness, conflicting)
    }

    async fn with_store(memory: Arc<InMemoryChargeStore>, store: Arc<dyn ChargeStore>) -> Self {
        memory
            .insert_gateway_account(GatewayAccount::new(ACCOUNT_ID, GatewayName::Sandbox))
            .await;
        let gateway = Arc::new(ScriptedGateway::new());
        let registry = Arc::new(GatewayRegistry::new().with_gateway(gateway.clone()));
        Self {
            memory,
            store,
            gateway,
            registry,
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn authorise_service(&self, executor: GatewayOperationExecutor) -> CardAuthoriseService {
        CardAuthoriseService::new(
            self.store.clone(),
            self.registry.clone(),
            self.notifier.clone(),
            Arc::new(executor),
        )
    }

    pub fn captures(&self, config: LifecycleConfig) -> CardCaptureService {
        CardCaptureService::new(
            self.store.clone(),
            self.registry.clone(),
            self.notifier.clone(),
            config,
        )
    }

    pub fn cancels(&self) -> ChargeCancelService {
        ChargeCancelService::new(self.store.clone(), self.registry.clone(), self.notifier.clone())
    }

    pub fn refunds(&self) -> ChargeRefundService {
        ChargeRefundService::new(self.store.clone(), self.registry.clone(), self.notifier.clone())
    }

    pub fn reconciler(&self, resolver: StaticResolver) -> NotificationReconciler {
        NotificationReconciler::new(
            self.store.clone(),
            self.registry.clone(),
            self.notifier.clone(),
            NotificationSourceVerifier::new(Arc::new(resolver)),
        )
    }

    pub async fn charge(&self, status: ChargeStatus, transaction_id: Option<&str>) -> Charge {
        let mut charge = Charge::new(ACCOUNT_ID, 1000, "order-1", "Test charge").with_status(status);
        if let Some(tx) = transaction_id {
            charge = charge.with_gateway_transaction_id(tx);
        }
        self.memory.insert_charge(charge).await.unwrap()
    }

    pub async fn status_of(&self, charge: &Charge) -> ChargeStatus {
        self.memory.reload(charge.id).await.unwrap().status
    }
}

pub fn card() -> CardDetails {
    CardDetails {
        card_number: "4242424242424242".to_string(),
        cvc: "123".to_string(),
        expiry_date: "12/30".to_string(),
        cardholder_name: "Test Payer".to_string(),
    }
}
