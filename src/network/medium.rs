use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Serialize, Deserialize};
use tokio::sync::{mpsc, Mutex};
use tokio::time;

use crate::core::{Error, NodeId, Result};
use super::Radio;

/// An undirected radio link between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link(pub NodeId, pub NodeId);

/// Configuration of the simulated broadcast domain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediumConfig {
    /// Independent per-receiver frame loss probability
    pub loss: f64,
    /// Seed for loss decisions
    pub seed: u64,
    /// Who hears whom; empty means every node hears every other node
    pub links: Vec<Link>,
}

/// Delivery statistics of the medium
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediumStats {
    pub delivered: u64,
    pub lost: u64,
}

/// Receive side of an attached radio
struct Port {
    tx: mpsc::UnboundedSender<Bytes>,
    listening: Arc<AtomicBool>,
}

struct Inner {
    ports: HashMap<NodeId, Port>,
    links: HashSet<(NodeId, NodeId)>,
    loss: f64,
    rng: StdRng,
}

impl Inner {
    fn hears(&self, from: NodeId, to: NodeId) -> bool {
        self.links.is_empty() || self.links.contains(&(from.min(to), from.max(to)))
    }
}

/// In-memory shared broadcast medium
///
/// A frame reaches every attached radio that is linked to the sender and
/// is inside [`Radio::receive`] at the moment of transmission.
#[derive(Clone)]
pub struct Medium {
    inner: Arc<Mutex<Inner>>,
    delivered: Arc<AtomicU64>,
    lost: Arc<AtomicU64>,
}

impl Medium {
    /// Creates a new medium
    pub fn new(config: &MediumConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.loss) {
            return Err(Error::config(format!(
                "loss probability {} outside [0, 1]",
                config.loss
            )));
        }

        let links = config
            .links
            .iter()
            .map(|Link(a, b)| (*a.min(b), *a.max(b)))
            .collect();

        Ok(Medium {
            inner: Arc::new(Mutex::new(Inner {
                ports: HashMap::new(),
                links,
                loss: config.loss,
                rng: StdRng::seed_from_u64(config.seed),
            })),
            delivered: Arc::new(AtomicU64::new(0)),
            lost: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Attaches a radio for node `id`
    pub async fn attach(&self, id: NodeId) -> Result<SimRadio> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listening = Arc::new(AtomicBool::new(false));

        let mut inner = self.inner.lock().await;
        if inner.ports.contains_key(&id) {
            return Err(Error::radio(format!("node {} already attached", id)));
        }
        inner.ports.insert(id, Port { tx, listening: Arc::clone(&listening) });

        Ok(SimRadio {
            id,
            medium: self.clone(),
            rx,
            listening,
        })
    }

    /// Returns delivery statistics
    pub fn stats(&self) -> MediumStats {
        MediumStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
        }
    }

    async fn broadcast(&self, from: NodeId, frame: &[u8]) {
        let frame = Bytes::copy_from_slice(frame);
        let mut inner = self.inner.lock().await;
        let Inner { ports, links, loss, rng } = &mut *inner;
        let fully_connected = links.is_empty();

        for (&to, port) in ports.iter() {
            if to == from || !port.listening.load(Ordering::Acquire) {
                continue;
            }
            if !fully_connected && !links.contains(&(from.min(to), from.max(to))) {
                continue;
            }
            if *loss > 0.0 && rng.gen_bool(*loss) {
                self.lost.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if port.tx.send(frame.clone()).is_ok() {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Whether `to` can hear `from`
    pub async fn hears(&self, from: NodeId, to: NodeId) -> bool {
        self.inner.lock().await.hears(from, to)
    }
}

/// A node's radio on a [`Medium`]
pub struct SimRadio {
    id: NodeId,
    medium: Medium,
    rx: mpsc::UnboundedReceiver<Bytes>,
    listening: Arc<AtomicBool>,
}

impl SimRadio {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl Radio for SimRadio {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.medium.broadcast(self.id, frame).await;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut BytesMut, timeout: Duration) -> Result<usize> {
        buf.clear();

        // Frames that arrived during an earlier window are stale
        while self.rx.try_recv().is_ok() {}

        self.listening.store(true, Ordering::Release);
        let result = time::timeout(timeout, self.rx.recv()).await;
        self.listening.store(false, Ordering::Release);

        match result {
            Ok(Some(frame)) => {
                buf.extend_from_slice(&frame);
                Ok(frame.len())
            }
            Ok(None) => Err(Error::radio("medium closed")),
            Err(_) => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_only_listening_radios_receive() {
        let medium = Medium::new(&MediumConfig::default()).unwrap();
        let mut a = medium.attach(NodeId(1)).await.unwrap();
        let mut b = medium.attach(NodeId(2)).await.unwrap();

        // Nobody is listening yet
        a.send(&[1, 2, 3]).await.unwrap();

        let listener = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            let len = b.receive(&mut buf, Duration::from_millis(50)).await.unwrap();
            (len, buf)
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        a.send(&[4, 5]).await.unwrap();

        let (len, buf) = listener.await.unwrap();
        assert_eq!(len, 2);
        assert_eq!(&buf[..], &[4, 5]);
        assert_eq!(medium.stats().delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_timeout() {
        let medium = Medium::new(&MediumConfig::default()).unwrap();
        let mut a = medium.attach(NodeId(1)).await.unwrap();

        let mut buf = BytesMut::new();
        let len = a.receive(&mut buf, Duration::from_millis(25)).await.unwrap();
        assert_eq!(len, 0);
        assert!(buf.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_links_restrict_delivery() {
        let config = MediumConfig {
            links: vec![Link(NodeId(1), NodeId(2))],
            ..MediumConfig::default()
        };
        let medium = Medium::new(&config).unwrap();
        let _a = medium.attach(NodeId(1)).await.unwrap();
        let _b = medium.attach(NodeId(2)).await.unwrap();
        let _c = medium.attach(NodeId(3)).await.unwrap();

        assert!(medium.hears(NodeId(2), NodeId(1)).await);
        assert!(!medium.hears(NodeId(1), NodeId(3)).await);
    }

    #[tokio::test]
    async fn test_duplicate_attach_rejected() {
        let medium = Medium::new(&MediumConfig::default()).unwrap();
        let _a = medium.attach(NodeId(1)).await.unwrap();
        assert!(medium.attach(NodeId(1)).await.is_err());
    }

    #[test]
    fn test_invalid_loss_rejected() {
        let config = MediumConfig { loss: 1.5, ..MediumConfig::default() };
        assert!(Medium::new(&config).is_err());
    }
}
