//! Fan-out of change notifications to subscribed clients.

use dkv_transport::PushSender;
use dkv_types::ChangeNotification;
use dkv_wire::ops::PushOp;
use dkv_wire::{codec, BufWriter};
use tracing::debug;

/// Pushes one encoded notification per subscriber. Fire and forget: a
/// subscriber whose client is gone just misses out.
pub struct ObserverPusher {
    pusher: PushSender,
}

impl ObserverPusher {
    pub fn new(pusher: PushSender) -> Self {
        ObserverPusher { pusher }
    }

    pub fn notify(
        &self,
        subscribers: &[u64],
        change: &ChangeNotification,
        snapshot_handle: Option<u64>,
    ) {
        for &subscriber in subscribers {
            let mut w = BufWriter::new();
            w.write_u64(subscriber);
            codec::write_change(&mut w, change, snapshot_handle);
            if !self.pusher.send(PushOp::OnChange.code(), w.freeze()) {
                debug!(subscriber, "change push dropped, client gone");
            }
        }
    }
}
