use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::telegram_gateway::{Inbound, ReplyGateway};

/// One worker per active chat: a chat's messages are handled in arrival
/// order, different chats run concurrently.
pub struct ChatLanes {
    gateway: ReplyGateway,
    lanes: Mutex<HashMap<i64, mpsc::UnboundedSender<Inbound>>>,
    idle_timeout: Duration,
}

impl ChatLanes {
    pub fn new(gateway: ReplyGateway, idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            lanes: Mutex::new(HashMap::new()),
            idle_timeout,
        })
    }

    fn lock_lanes(&self) -> MutexGuard<'_, HashMap<i64, mpsc::UnboundedSender<Inbound>>> {
        match self.lanes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn active(&self) -> usize {
        self.lock_lanes().len()
    }

    /// Queues the event; never blocks and never fails.
    pub fn dispatch(self: &Arc<Self>, inbound: Inbound) {
        let lane_id = inbound.lane_id();
        let mut lanes = self.lock_lanes();
        let pending = match lanes.get(&lane_id) {
            Some(tx) => match tx.send(inbound) {
                Ok(()) => return,
                Err(mpsc::error::SendError(back)) => back,
            },
            None => inbound,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // rx 还在本函数手里，这里不会失败。
        let _ = tx.send(pending);
        lanes.insert(lane_id, tx);
        drop(lanes);

        debug!("chat lane opened: lane_id={}", lane_id);
        tokio::spawn(run_lane(self.clone(), lane_id, rx));
    }
}

async fn run_lane(lanes: Arc<ChatLanes>, lane_id: i64, mut rx: mpsc::UnboundedReceiver<Inbound>) {
    loop {
        let next = match tokio::time::timeout(lanes.idle_timeout, rx.recv()).await {
            Ok(Some(inbound)) => Some(inbound),
            Ok(None) => None,
            Err(_) => {
                // 空闲退出：持锁检查队列，避免与 dispatch 竞争。
                let mut map = lanes.lock_lanes();
                match rx.try_recv() {
                    Ok(inbound) => Some(inbound),
                    Err(_) => {
                        map.remove(&lane_id);
                        None
                    }
                }
            }
        };
        let Some(inbound) = next else {
            debug!("chat lane closed: lane_id={}", lane_id);
            return;
        };
        if let Err(err) = lanes.gateway.handle(inbound).await {
            error!("handle inbound failed: lane_id={} err={:#}", lane_id, err);
        }
    }
}
