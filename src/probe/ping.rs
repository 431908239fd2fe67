//! ICMP ping prober.
//!
//! Prefers native ICMP sockets (RAW when privileged, DGRAM otherwise)
//! and falls back to the system `ping` command when neither can be
//! created. Blocking socket I/O runs in `spawn_blocking` so a slow
//! target never stalls other trackers.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{ProbeError, ProbeOutcome, Prober};
use crate::config::Target;

/// Sequence counter so concurrent pings, even to the same host, can be
/// told apart.
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

static NATIVE_ICMP: OnceLock<bool> = OnceLock::new();

/// Detect ICMP capability by attempting to create a socket.
fn native_icmp_available() -> bool {
    *NATIVE_ICMP.get_or_init(|| {
        let ok = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok()
            || Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok();
        if ok {
            tracing::info!("ping probe: using native ICMP sockets");
        } else {
            tracing::info!("ping probe: native ICMP unavailable, using ping command");
        }
        ok
    })
}

pub struct PingProber {
    timeout: Duration,
}

impl PingProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn check(&self, target: &Target) -> Result<(), ProbeError> {
        if native_icmp_available() {
            let ip = resolve(target.address()).await?;
            let timeout = self.timeout;
            let result = tokio::task::spawn_blocking(move || echo_once(ip, timeout))
                .await
                .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {e}")))?;

            match result {
                Ok(()) => return Ok(()),
                // Sockets can be creatable yet unusable without privileges;
                // the command fallback still works in that case.
                Err(ProbeError::Network(msg))
                    if msg.contains("Permission") || msg.contains("not permitted") =>
                {
                    tracing::warn!(
                        "native ping failed with permission error for {}, \
                         falling back to ping command",
                        target
                    );
                }
                Err(e) => return Err(e),
            }
        }

        ping_command(target.address(), self.timeout).await
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, target: &Target) -> ProbeOutcome {
        match self.check(target).await {
            Ok(()) => ProbeOutcome::Reachable,
            Err(e) => {
                tracing::debug!("ping {} failed: {}", target, e);
                ProbeOutcome::Unreachable
            }
        }
    }
}

/// Resolve a hostname to an IP address. Direct parse first, DNS second.
async fn resolve(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host(format!("{address}:0"))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {e}")))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("no addresses found for {address}")))
}

/// One echo request / echo reply exchange, blocking.
fn echo_once(ip: IpAddr, timeout: Duration) -> Result<(), ProbeError> {
    let (domain, proto, echo_type, reply_type) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, 8u8, 0u8),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, 128u8, 129u8),
    };

    // RAW needs privileges; DGRAM works unprivileged where the kernel
    // allows ping sockets.
    let socket = Socket::new(domain, Type::RAW, Some(proto))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(proto)))
        .map_err(|e| ProbeError::Network(format!("failed to create ICMP socket: {e}")))?;

    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("failed to set timeout: {e}")))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("failed to set timeout: {e}")))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Network(format!("failed to connect: {e}")))?;

    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = build_echo_request(echo_type, identifier, sequence);

    let deadline = Instant::now() + timeout;
    socket
        .send(&packet)
        .map_err(|e| ProbeError::Network(format!("failed to send: {e}")))?;

    // Receive until we see our own reply or the deadline passes. A RAW
    // socket can deliver other traffic in between.
    loop {
        let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
        let len = socket.recv(&mut buf).map_err(|e| {
            if matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network(format!("failed to receive: {e}"))
            }
        })?;

        if Instant::now() >= deadline {
            return Err(ProbeError::Timeout(timeout));
        }

        // SAFETY: recv initialized `len` bytes.
        let reply: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        if let Some((id, seq)) = parse_echo_reply(reply, reply_type) {
            if id == identifier && seq == sequence {
                return Ok(());
            }
        }
    }
}

/// Build an echo request: 8 byte header + 8 byte payload. The ICMPv6
/// checksum is filled in by the kernel.
fn build_echo_request(echo_type: u8, identifier: u16, sequence: u16) -> [u8; 16] {
    let mut packet = [0u8; 16];
    packet[0] = echo_type;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    if echo_type == 8 {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Extract (identifier, sequence) from an echo reply, skipping the
/// IPv4 header when the socket delivers one (RAW sockets do).
fn parse_echo_reply(reply: &[u8], reply_type: u8) -> Option<(u16, u16)> {
    let offset = match reply.first() {
        Some(b) if b >> 4 == 4 => 20,
        _ => 0,
    };
    let icmp = reply.get(offset..offset + 8)?;
    if icmp[0] != reply_type {
        return None;
    }
    Some((
        u16::from_be_bytes([icmp[4], icmp[5]]),
        u16::from_be_bytes([icmp[6], icmp[7]]),
    ))
}

/// RFC 1071 internet checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let Some(&last) = chunks.remainder().first() {
        sum += (last as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Fallback: a single system `ping`; reachability is its exit status.
async fn ping_command(address: &str, timeout: Duration) -> Result<(), ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let status = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(ProbeError::Command(format!("ping exited with {status}")))
    }
}
