//! In-memory transport: a client endpoint and a service host joined by
//! tokio channels. Request handling is sequential per connection, so
//! replies and pushes keep their order.

use crate::{
    CallFuture, Endpoint, PushHandler, PushSender, RemoteService, ServiceId, TransportError,
    ROOT_SERVICE,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

struct Request {
    target: ServiceId,
    code: u32,
    data: Bytes,
    reply: oneshot::Sender<Result<Bytes, TransportError>>,
}

/// Service-side end of a connection: the id-to-service registry plus the
/// push sender back to the client. Registrations take the write lock;
/// dispatch only reads.
pub struct ServiceHost {
    services: RwLock<HashMap<ServiceId, Arc<dyn RemoteService>>>,
    next_id: AtomicU64,
    push_tx: mpsc::UnboundedSender<(u32, Bytes)>,
    shutdown_tx: watch::Sender<bool>,
}

impl ServiceHost {
    /// Registers the root service, reachable as [`ROOT_SERVICE`].
    pub fn register_root(&self, service: Arc<dyn RemoteService>) {
        if let Ok(mut services) = self.services.write() {
            services.insert(ROOT_SERVICE, service);
        }
    }

    /// Registers a service under a fresh id and returns it.
    pub fn register(&self, service: Arc<dyn RemoteService>) -> ServiceId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut services) = self.services.write() {
            services.insert(id, service);
        }
        id
    }

    /// Drops a registration. Returns false when the id was not live.
    pub fn unregister(&self, id: ServiceId) -> bool {
        match self.services.write() {
            Ok(mut services) => services.remove(&id).is_some(),
            Err(_) => false,
        }
    }

    fn get(&self, id: ServiceId) -> Option<Arc<dyn RemoteService>> {
        self.services.read().ok()?.get(&id).cloned()
    }

    pub fn pusher(&self) -> PushSender {
        PushSender {
            tx: self.push_tx.clone(),
        }
    }

    /// Terminates the connection: the dispatch loop stops and the client's
    /// death signal fires. Models the service process going away.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Client-side end of a connection.
pub struct ChannelEndpoint {
    req_tx: mpsc::UnboundedSender<Request>,
    closed_rx: watch::Receiver<bool>,
}

impl Endpoint for ChannelEndpoint {
    fn call(&self, target: ServiceId, code: u32, data: Bytes) -> CallFuture<'_> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .req_tx
            .send(Request {
                target,
                code,
                data,
                reply: reply_tx,
            })
            .is_ok();
        Box::pin(async move {
            if !sent {
                return Err(TransportError::Disconnected);
            }
            reply_rx.await.map_err(|_| TransportError::Disconnected)?
        })
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }
}

/// Builds a connected endpoint/host pair. Pushes arriving at the client
/// are handed to `push_handler` on a dedicated task, in send order.
pub fn channel_pair(
    push_handler: Arc<dyn PushHandler>,
) -> (Arc<ChannelEndpoint>, Arc<ServiceHost>) {
    let (req_tx, mut req_rx) = mpsc::unbounded_channel::<Request>();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<(u32, Bytes)>();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let (closed_tx, closed_rx) = watch::channel(false);

    let host = Arc::new(ServiceHost {
        services: RwLock::new(HashMap::new()),
        next_id: AtomicU64::new(1),
        push_tx,
        shutdown_tx,
    });

    let endpoint = Arc::new(ChannelEndpoint { req_tx, closed_rx });

    let dispatch_host = Arc::clone(&host);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                request = req_rx.recv() => {
                    let Some(request) = request else { break };
                    let result = match dispatch_host.get(request.target) {
                        Some(service) => Ok(service.handle(request.code, request.data).await),
                        None => {
                            warn!(target_id = request.target, code = request.code,
                                  "call to unregistered service");
                            Err(TransportError::UnknownService(request.target))
                        }
                    };
                    // Caller may have stopped waiting.
                    let _ = request.reply.send(result);
                }
            }
        }
        debug!("connection dispatch loop terminated");
        let _ = closed_tx.send(true);
    });

    tokio::spawn(async move {
        while let Some((code, data)) = push_rx.recv().await {
            push_handler.on_push(code, data);
        }
    });

    (endpoint, host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HandleFuture;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Echo;

    impl RemoteService for Echo {
        fn handle(&self, code: u32, data: Bytes) -> HandleFuture<'_> {
            Box::pin(async move {
                let mut out = Vec::with_capacity(4 + data.len());
                out.extend_from_slice(&code.to_le_bytes());
                out.extend_from_slice(&data);
                Bytes::from(out)
            })
        }
    }

    struct NullPush;

    impl PushHandler for NullPush {
        fn on_push(&self, _code: u32, _data: Bytes) {}
    }

    struct CollectPush(Mutex<Vec<(u32, Bytes)>>);

    impl PushHandler for CollectPush {
        fn on_push(&self, code: u32, data: Bytes) {
            self.0.lock().unwrap().push((code, data));
        }
    }

    #[tokio::test]
    async fn call_round_trips_through_registered_service() {
        let (endpoint, host) = channel_pair(Arc::new(NullPush));
        host.register_root(Arc::new(Echo));
        let reply = endpoint
            .call(ROOT_SERVICE, 9, Bytes::from_static(b"ping"))
            .await
            .unwrap();
        assert_eq!(&reply[..4], &9u32.to_le_bytes());
        assert_eq!(&reply[4..], b"ping");
    }

    #[tokio::test]
    async fn unknown_service_id_is_an_error() {
        let (endpoint, _host) = channel_pair(Arc::new(NullPush));
        let err = endpoint
            .call(77, 0, Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::UnknownService(77));
    }

    #[tokio::test]
    async fn unregistered_id_stops_answering() {
        let (endpoint, host) = channel_pair(Arc::new(NullPush));
        let id = host.register(Arc::new(Echo));
        endpoint.call(id, 0, Bytes::new()).await.unwrap();
        assert!(host.unregister(id));
        assert!(!host.unregister(id));
        let err = endpoint.call(id, 0, Bytes::new()).await.unwrap_err();
        assert_eq!(err, TransportError::UnknownService(id));
    }

    #[tokio::test]
    async fn pushes_arrive_in_order() {
        let collector = Arc::new(CollectPush(Mutex::new(Vec::new())));
        let (_endpoint, host) = channel_pair(collector.clone());
        let pusher = host.pusher();
        for i in 0..5u32 {
            assert!(pusher.send(i, Bytes::new()));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen: Vec<u32> = collector.0.lock().unwrap().iter().map(|(c, _)| *c).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn shutdown_fires_death_signal_and_fails_calls() {
        let (endpoint, host) = channel_pair(Arc::new(NullPush));
        host.register_root(Arc::new(Echo));
        let mut closed = endpoint.closed();
        host.shutdown();
        closed.changed().await.unwrap();
        assert!(*closed.borrow());
        let err = endpoint.call(ROOT_SERVICE, 0, Bytes::new()).await.unwrap_err();
        assert_eq!(err, TransportError::Disconnected);
    }
}
