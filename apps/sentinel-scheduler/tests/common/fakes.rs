//! Recording fakes for the outbound collaborators.

use async_trait::async_trait;
use sentinel_db::models::subscription::Subscription;
use sentinel_scheduler::clients::{
    ChannelMembership, NotificationGateway, PanelUserUpdate, Pricing, VpnPanel,
};
use sentinel_scheduler::templates::RenderedMessage;
use sentinel_scheduler::{CoreError, CoreResult};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCall {
    Disable(Uuid),
    Enable(Uuid),
    Update { uuid: Uuid, expire_at: chrono::DateTime<chrono::Utc> },
    ResetTraffic(Uuid),
}

#[derive(Default)]
pub struct FakePanel {
    pub calls: Mutex<Vec<PanelCall>>,
    /// Queued probe results; an empty queue means healthy.
    pub probes: Mutex<VecDeque<CoreResult<bool>>>,
    pub probe_count: AtomicUsize,
    pub fail_updates: AtomicBool,
}

impl FakePanel {
    pub fn calls(&self) -> Vec<PanelCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn queue_probe_failures(&self, n: usize) {
        let mut probes = self.probes.lock().unwrap();
        for _ in 0..n {
            probes.push_back(Err(CoreError::transient("panel", "connection refused")));
        }
    }

    fn push(&self, call: PanelCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VpnPanel for FakePanel {
    async fn disable(&self, uuid: Uuid) -> CoreResult<()> {
        self.push(PanelCall::Disable(uuid));
        Ok(())
    }

    async fn enable(&self, uuid: Uuid) -> CoreResult<()> {
        self.push(PanelCall::Enable(uuid));
        Ok(())
    }

    async fn update(&self, update: &PanelUserUpdate) -> CoreResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(CoreError::transient("panel", "502 Bad Gateway"));
        }
        self.push(PanelCall::Update {
            uuid: update.uuid,
            expire_at: update.expire_at,
        });
        Ok(())
    }

    async fn reset_traffic(&self, uuid: Uuid) -> CoreResult<()> {
        self.push(PanelCall::ResetTraffic(uuid));
        Ok(())
    }

    async fn health_probe(&self) -> CoreResult<bool> {
        self.probe_count.fetch_add(1, Ordering::SeqCst);
        self.probes.lock().unwrap().pop_front().unwrap_or(Ok(true))
    }
}

#[derive(Default)]
pub struct FakeGateway {
    pub sent: Mutex<Vec<(i64, String)>>,
    pub blocked: Mutex<HashSet<i64>>,
    pub down: AtomicBool,
}

impl FakeGateway {
    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, recipient: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| *to == recipient)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn block(&self, recipient: i64) {
        self.blocked.lock().unwrap().insert(recipient);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationGateway for FakeGateway {
    async fn send(&self, recipient: i64, message: &RenderedMessage) -> CoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CoreError::transient("telegram", "Bad Gateway"));
        }
        if self.blocked.lock().unwrap().contains(&recipient) {
            return Err(CoreError::RecipientUnreachable(recipient));
        }
        self.sent.lock().unwrap().push((recipient, message.text.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMembership {
    pub members: Mutex<HashSet<i64>>,
}

impl FakeMembership {
    pub fn join(&self, telegram_id: i64) {
        self.members.lock().unwrap().insert(telegram_id);
    }

    pub fn leave(&self, telegram_id: i64) {
        self.members.lock().unwrap().remove(&telegram_id);
    }
}

#[async_trait]
impl ChannelMembership for FakeMembership {
    async fn is_member(&self, telegram_id: i64) -> CoreResult<bool> {
        Ok(self.members.lock().unwrap().contains(&telegram_id))
    }
}

pub struct FixedPricing(pub i64);

#[async_trait]
impl Pricing for FixedPricing {
    async fn renewal_price(&self, _subscription: &Subscription) -> CoreResult<i64> {
        Ok(self.0)
    }
}
