//! Ping probe with native ICMP (high-precision) and command fallback.
//!
//! Native echoes run on blocking sockets inside `spawn_blocking` so the
//! measured round trip is not skewed by the async scheduler.

use std::future::Future;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::ProbeError;

/// Extra time granted to the `ping` command beyond the probe timeout,
/// since it cannot be given sub-second deadlines portably.
const COMMAND_GRACE: Duration = Duration::from_secs(2);

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Identifier and sequence for one echo request, so concurrent pings
/// (even to the same host) can tell their replies apart.
fn next_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// Ping `address` once and return the measured round trip.
pub async fn run_ping_probe(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let started = Instant::now();
    let ip = resolve_address(address, timeout).await?;
    let timeout = timeout
        .checked_sub(started.elapsed())
        .filter(|d| !d.is_zero())
        .ok_or(ProbeError::Timeout(timeout))?;
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

    if capability == IcmpCapability::Native {
        let result = tokio::task::spawn_blocking(move || ping_blocking(ip, timeout))
            .await
            .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

        match result {
            Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
                tracing::warn!(
                    "Native ping to {} denied, falling back to command: {}",
                    ip,
                    msg
                );
            }
            other => return other,
        }
    }

    run_ping_command(ip, timeout).await
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("Operation not permitted") || msg.contains("denied")
}

/// Resolve an address to an IP within `timeout`. Anything that looks like a
/// command-line option is rejected before it can reach the `ping` command.
async fn resolve_address(address: &str, timeout: Duration) -> Result<IpAddr, ProbeError> {
    let address = address.trim();
    if address.is_empty() || address.starts_with('-') || address.contains(char::is_whitespace) {
        return Err(ProbeError::Network(format!("invalid address {:?}", address)));
    }

    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let lookup = async {
        tokio::net::lookup_host(format!("{}:0", address))
            .await
            .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?
            .next()
            .map(|sa| sa.ip())
            .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", address)))
    };
    within(timeout, lookup).await
}

async fn within<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, ProbeError>>,
) -> Result<T, ProbeError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
}

/// Per-family ICMP echo parameters.
struct EchoFamily {
    domain: Domain,
    protocol: Protocol,
    request_type: u8,
    reply_type: u8,
}

const ECHO_V4: EchoFamily = EchoFamily {
    domain: Domain::IPV4,
    protocol: Protocol::ICMPV4,
    request_type: 8,
    reply_type: 0,
};

const ECHO_V6: EchoFamily = EchoFamily {
    domain: Domain::IPV6,
    protocol: Protocol::ICMPV6,
    request_type: 128,
    reply_type: 129,
};

/// Send one ICMP echo and wait for the matching reply. Runs on a blocking thread.
fn ping_blocking(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let family = match ip {
        IpAddr::V4(_) => &ECHO_V4,
        IpAddr::V6(_) => &ECHO_V6,
    };

    // RAW needs privileges; DGRAM works unprivileged where the kernel allows it.
    let (socket, raw) = match Socket::new(family.domain, Type::RAW, Some(family.protocol)) {
        Ok(s) => (s, true),
        Err(_) => (
            Socket::new(family.domain, Type::DGRAM, Some(family.protocol))
                .map_err(|e| ProbeError::Network(format!("Failed to create ICMP socket: {}", e)))?,
            false,
        ),
    };

    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Network(format!("Failed to connect: {}", e)))?;

    let (identifier, sequence) = next_ping_id();
    let packet = build_echo_request(family.request_type, identifier, sequence, ip.is_ipv4());

    let start = Instant::now();
    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Network(format!("Permission denied: {}", e))
        } else {
            ProbeError::Network(format!("Failed to send: {}", e))
        }
    })?;

    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
    loop {
        let remaining = timeout
            .checked_sub(start.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or(ProbeError::Timeout(timeout))?;
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;

        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => ProbeError::Timeout(timeout),
            _ => ProbeError::Network(format!("Failed to receive: {}", e)),
        })?;
        let elapsed = start.elapsed();

        // SAFETY: recv initialized the first `len` bytes.
        let reply: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }
        if is_our_reply(reply, family.reply_type, identifier, sequence, raw && ip.is_ipv4(), raw) {
            return Ok(elapsed);
        }
        // Someone else's ICMP traffic; keep waiting.
    }
}

/// Check that a received datagram is the echo reply to our request.
///
/// Raw IPv4 sockets deliver the IP header first. Datagram sockets have the
/// kernel rewrite the identifier, so only the sequence is compared there.
fn is_our_reply(
    buf: &[u8],
    reply_type: u8,
    identifier: u16,
    sequence: u16,
    has_ip_header: bool,
    check_identifier: bool,
) -> bool {
    let offset = if has_ip_header {
        match buf.first() {
            Some(b) if b >> 4 == 4 => usize::from(b & 0x0f) * 4,
            _ => return false,
        }
    } else {
        0
    };

    let Some(icmp) = buf.get(offset..offset + 8) else {
        return false;
    };
    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);

    icmp[0] == reply_type && reply_seq == sequence && (!check_identifier || reply_id == identifier)
}

/// Build an ICMP echo request: 8 byte header plus a 56 byte payload.
///
/// The ICMPv6 checksum covers a pseudo-header and is filled in by the kernel.
fn build_echo_request(request_type: u8, identifier: u16, sequence: u16, checksum: bool) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = request_type;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    packet[8..16].copy_from_slice(&stamp.to_be_bytes());

    if checksum {
        let sum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    packet
}

/// Internet checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Ping via the system command (fallback).
async fn run_ping_command(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let address = ip.to_string();
    let wait_secs = timeout.as_secs().max(1).to_string();
    let wait_ms = timeout.as_millis().max(1).to_string();

    let mut command = Command::new("ping");
    if cfg!(windows) {
        command.args(["-n", "1", "-w", &wait_ms, &address]);
    } else if cfg!(target_os = "macos") {
        command.args(["-c", "1", "-W", &wait_ms, &address]);
    } else {
        command.args(["-c", "1", "-W", &wait_secs, &address]);
    }
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(timeout + COMMAND_GRACE, command.output())
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    command_latency(&String::from_utf8_lossy(&output.stdout), output.status.success(), timeout)
}

/// Interpret `ping` output. Replies slower than `timeout` count as timeouts,
/// since the command's own deadline is only whole seconds on Linux.
fn command_latency(stdout: &str, success: bool, timeout: Duration) -> Result<Duration, ProbeError> {
    if !success {
        if stdout.contains("100% packet loss") || stdout.contains("100.0% packet loss") {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Command(format!("ping failed: {}", stdout.trim())));
    }

    let latency = parse_ping_output(stdout)?;
    if latency >= timeout {
        return Err(ProbeError::Timeout(timeout));
    }
    Ok(latency)
}

/// Parse ping command output for latency.
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    // Per-packet "time=12.3 ms" or Windows "time<1ms".
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    let per_packet = PER_PACKET.get_or_init(|| {
        Regex::new(r"time[=<]\s*(?P<val>[0-9]+(?:\.[0-9]+)?)\s*ms").expect("valid regex")
    });

    // Summary "round-trip min/avg/max/stddev = ..." (macOS) or "rtt min/avg/max/mdev = ..." (Linux).
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(r"(?:round-trip|rtt)\s+min/avg/max/(?:stddev|mdev)\s*=\s*[0-9.]+/(?P<val>[0-9.]+)/")
            .expect("valid regex")
    });

    let lowered = output.to_lowercase();
    [per_packet, summary]
        .iter()
        .find_map(|re| re.captures(&lowered)?.name("val")?.as_str().parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| Duration::from_nanos((ms * 1_000_000.0).round() as u64))
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}
