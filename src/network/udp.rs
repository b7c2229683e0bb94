use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::core::{Error, NodeId, Result};
use super::Radio;

/// Bytes in front of every datagram carrying the sender id
const SENDER_PREFIX: usize = 2;

/// Radio over an IPv4 multicast group
///
/// Every node binds the same group and port, so a transmission reaches all
/// processes in the group including the sender, which filters its own frames
/// by the sender id prefix.
pub struct UdpRadio {
    id: NodeId,
    socket: UdpSocket,
    target: SocketAddr,
    scratch: BytesMut,
}

impl UdpRadio {
    /// Joins `group:port` on `interface`
    pub async fn bind(id: NodeId, group: Ipv4Addr, port: u16, interface: Ipv4Addr) -> Result<Self> {
        if !group.is_multicast() {
            return Err(Error::config(format!("{} is not a multicast group", group)));
        }

        let socket = make_multicast_socket(group, port, interface)
            .map_err(|e| Error::radio(format!("Failed to bind {}:{}: {}", group, port, e)))?;
        let socket = UdpSocket::from_std(socket)?;

        debug!(node = %id, %group, port, "udp radio joined multicast group");

        Ok(UdpRadio {
            id,
            socket,
            target: SocketAddr::V4(SocketAddrV4::new(group, port)),
            scratch: BytesMut::with_capacity(2048),
        })
    }

    /// Discards datagrams queued while the radio was not listening
    fn drain_stale(&mut self) {
        let mut buf = [0u8; 2048];
        while self.socket.try_recv_from(&mut buf).is_ok() {}
    }
}

fn make_multicast_socket(
    group: Ipv4Addr,
    port: u16,
    interface: Ipv4Addr,
) -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    socket.join_multicast_v4(&group, &interface)?;
    socket.set_multicast_if_v4(&interface)?;
    socket.set_multicast_loop_v4(true)?;
    Ok(socket.into())
}

impl Radio for UdpRadio {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.scratch.clear();
        self.scratch.put_u16_le(self.id.0);
        self.scratch.extend_from_slice(frame);

        self.socket
            .send_to(&self.scratch, self.target)
            .await
            .map_err(|e| Error::radio(format!("send failed: {}", e)))?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut BytesMut, timeout: Duration) -> Result<usize> {
        buf.clear();
        self.drain_stale();

        let deadline = Instant::now() + timeout;
        let mut datagram = [0u8; 2048];

        loop {
            let len = match time::timeout_at(deadline, self.socket.recv_from(&mut datagram)).await {
                Ok(Ok((len, _))) => len,
                Ok(Err(e)) => return Err(Error::radio(format!("receive failed: {}", e))),
                Err(_) => return Ok(0),
            };

            if len < SENDER_PREFIX {
                trace!(len, "runt datagram ignored");
                continue;
            }

            let mut frame = &datagram[..len];
            let sender = NodeId(frame.get_u16_le());
            if sender == self.id {
                continue;
            }

            buf.extend_from_slice(frame);
            return Ok(frame.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_unicast_group() {
        let result = UdpRadio::bind(NodeId(1), Ipv4Addr::LOCALHOST, 0, Ipv4Addr::LOCALHOST).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
