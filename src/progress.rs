use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

/// Upload state at the moment a chunk was acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub total_size: u64,
    pub bytes_acknowledged: u64,
}

impl Snapshot {
    pub fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.bytes_acknowledged)
    }
}

enum Signal {
    Subscribe(mpsc::Sender<Snapshot>),
    Progress(Snapshot),
}

/// Relays snapshots to every subscriber from a background task.
///
/// Subscriptions and snapshots travel through the same channel, so a
/// subscriber only sees snapshots emitted after it registered. Delivery
/// waits on each subscriber in turn: a subscriber that does not drain its
/// receiver holds back the relay and, through the capacity one signal
/// channel, the producer. Use a larger channel capacity on the subscriber
/// side to absorb bursts.
#[derive(Debug)]
pub struct Broadcaster {
    signals: mpsc::Sender<Signal>,
    relay: JoinHandle<()>,
}

impl Broadcaster {
    /// Spawn the relay task. Must be called inside a tokio runtime.
    pub fn spawn() -> Self {
        let (signals, rx) = mpsc::channel(1);
        let relay = tokio::spawn(relay(rx));
        Self { signals, relay }
    }

    pub async fn subscribe(&self, subscriber: mpsc::Sender<Snapshot>) {
        if self
            .signals
            .send(Signal::Subscribe(subscriber))
            .await
            .is_err()
        {
            warn!("Progress relay has stopped, subscription ignored");
        }
    }

    pub async fn notify(&self, snapshot: Snapshot) {
        if self.signals.send(Signal::Progress(snapshot)).await.is_err() {
            warn!("Progress relay has stopped, snapshot dropped");
        }
    }

    /// Close the signal channel and wait until every pending snapshot has
    /// been delivered and the relay task has exited.
    pub async fn close(self) {
        let Self { signals, relay } = self;
        drop(signals);
        if let Err(e) = relay.await {
            warn!("Progress relay failed: {}", e);
        }
    }
}

async fn relay(mut signals: mpsc::Receiver<Signal>) {
    let mut subscribers: Vec<mpsc::Sender<Snapshot>> = Vec::new();

    while let Some(signal) = signals.recv().await {
        match signal {
            Signal::Subscribe(subscriber) => subscribers.push(subscriber),
            Signal::Progress(snapshot) => {
                let mut i = 0;
                while i < subscribers.len() {
                    if subscribers[i].send(snapshot).await.is_err() {
                        debug!("Progress subscriber {} went away", i);
                        subscribers.remove(i);
                    } else {
                        i += 1;
                    }
                }
            }
        }
    }

    debug!("Progress relay stopped");
}
