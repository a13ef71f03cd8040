use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::time::{interval, sleep};
use tracing::{debug, trace, warn};

use crate::config::SocketConfig;
use crate::error::TransportError;

/// Simultaneous-open NAT traversal: keep firing the probe datagram at the
///  peer's advertised address until a datagram arrives on our socket, then
///  report where it came from. With both peers doing the same, the first
///  probes to cross open the NAT bindings in both directions.
///
/// The source address of the arriving datagram is the authoritative remote
///  endpoint for the rest of the session - NATs may rewrite ports, so it can
///  differ from the address that was probed.
///
/// The arriving datagram itself is dropped. It is (almost always) the peer's
///  probe, i.e. a datagram carrying its SYN - that is fine because the SYN is
///  re-sent until acknowledged.
pub async fn punch_hole(
    socket: &UdpSocket,
    remote: SocketAddr,
    probe: &[u8],
    config: &SocketConfig,
) -> Result<SocketAddr, TransportError> {
    debug!("punching hole towards {:?}", remote);

    let mut probe_interval = interval(config.punch_probe_interval);
    let deadline = sleep(config.punch_deadline);
    tokio::pin!(deadline);

    let mut rx_buffer = vec![0u8; config.mtu];

    loop {
        select! {
            _ = &mut deadline => {
                debug!("no datagram from {:?} within {:?} - giving up", remote, config.punch_deadline);
                return Err(TransportError::HolePunchFailed);
            }
            _ = probe_interval.tick() => {
                trace!("sending probe to {:?}", remote);
                if let Err(e) = socket.send_to(probe, remote).await {
                    warn!("error sending probe to {:?}: {}", remote, e);
                    return Err(TransportError::HolePunchFailed);
                }
            }
            received = socket.recv_from(&mut rx_buffer) => {
                match received {
                    Ok((_, from)) => {
                        debug!("hole punched, remote endpoint is {:?}", from);
                        return Ok(from);
                    }
                    Err(e) => {
                        // e.g. ICMP unreachable surfaced by the OS while the
                        //  peer's NAT binding is not open yet - keep probing
                        trace!("receive error while punching: {}", e);
                    }
                }
            }
        }
    }
}
