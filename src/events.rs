//! SSE 事件中心：按客户端维护有界队列，向浏览器推送目录与设置变更。

use axum::extract::Extension;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::SSE_CLIENT_QUEUE;
use crate::error::ApiError;
use crate::permissions::{Permission, PermissionSet};
use crate::settings::SharedSettings;

/// 单条待推送的事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubMessage {
    pub event: &'static str,
    pub data: String,
}

/// `dirsChanged` 负载；`ts` 为 RFC 3339 UTC 时间。
#[derive(Serialize)]
pub struct DirsChanged {
    pub dirs: Vec<String>,
    pub ts: String,
}

#[derive(Serialize)]
pub struct SettingsChanged<'a> {
    pub key: &'a str,
    pub value: Option<&'a Value>,
}

/// 事件流保活配置。
#[derive(Clone, Copy, Debug)]
pub struct EventStreamConfig {
    pub keep_alive: Duration,
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    clients: Mutex<HashMap<u64, Arc<ClientQueue>>>,
}

#[derive(Default)]
struct ClientQueue {
    messages: Mutex<VecDeque<HubMessage>>,
    wake: Notify,
    closed: AtomicBool,
}

impl ClientQueue {
    /// 队列已满时丢弃积压，只保留最新一条。
    fn push(&self, message: HubMessage) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut messages = self.messages.lock();
            if messages.len() >= SSE_CLIENT_QUEUE {
                messages.clear();
            }
            messages.push_back(message);
        }
        self.wake.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}

/// 事件中心句柄，克隆后共享同一客户端注册表。
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(ClientQueue::default());
        self.inner.clients.lock().insert(id, queue.clone());
        debug!(client = id, "event client subscribed");
        Subscription {
            id,
            queue,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// 向所有客户端广播，遍历注册表快照且从不阻塞。
    pub fn broadcast<T: Serialize>(&self, event: &'static str, payload: &T) {
        let data = match serde_json::to_string(payload) {
            Ok(data) => data,
            Err(err) => {
                warn!(event, error = %err, "event payload serialization failed");
                return;
            }
        };
        let clients: Vec<Arc<ClientQueue>> = self.inner.clients.lock().values().cloned().collect();
        for client in clients {
            client.push(HubMessage {
                event,
                data: data.clone(),
            });
        }
    }

    /// 关闭并移除全部客户端，对应的事件流随即结束。
    pub fn close_all(&self) {
        let clients: Vec<Arc<ClientQueue>> = self
            .inner
            .clients
            .lock()
            .drain()
            .map(|(_, client)| client)
            .collect();
        for client in clients {
            client.close();
        }
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.lock().len()
    }
}

/// 单个客户端的订阅，释放时自动注销。
pub struct Subscription {
    id: u64,
    queue: Arc<ClientQueue>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn try_next(&mut self) -> Option<HubMessage> {
        self.queue.messages.lock().pop_front()
    }

    /// 等待下一条事件；中心关闭且队列耗尽后返回 `None`。
    pub async fn recv(&mut self) -> Option<HubMessage> {
        loop {
            if let Some(message) = self.try_next() {
                return Some(message);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.wake.notified().await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.clients.lock().remove(&self.id);
            debug!(client = self.id, "event client unsubscribed");
        }
    }
}

/// `GET /api/events`：长连接事件流。
pub async fn stream_events(
    Extension(settings): Extension<SharedSettings>,
    Extension(events): Extension<EventHub>,
    Extension(config): Extension<EventStreamConfig>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    PermissionSet::load(settings.as_ref()).require(Permission::Read)?;

    let connected = stream::once(async { Ok(Event::default().comment("connected")) });
    let updates = stream::unfold(events.subscribe(), |mut subscription| async move {
        let message = subscription.recv().await?;
        let event = Event::default().event(message.event).data(message.data);
        Some((Ok(event), subscription))
    });

    Ok(Sse::new(connected.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(config.keep_alive)
            .text("ping"),
    ))
}
