//! DHCP client (RFC 2131)
//!
//! One client per Ethernet interface, running the four-message exchange
//! over a UDP socket bound to port 68:
//!
//! ```text
//! AwaitingOffer --OFFER--> AwaitingAck --ACK--> Bound
//!      DISCOVER sent         REQUEST sent         IPv4 info installed
//! ```
//!
//! No lease renewal. Retransmission only happens when
//! `StackConfig::dhcp_retransmit_ms` is set and the integrator's timer
//! service fires.

use alloc::sync::Arc;
use core::fmt;
use core::net::Ipv4Addr;

use log::{debug, info, warn};

use crate::net::error::NetError;
use crate::net::ethernet::{MacAddr, BROADCAST_MAC};
use crate::net::event::{StackTimer, TimerId};
use crate::net::ipv4::Ipv4Info;
use crate::net::netif::IfaceId;
use crate::net::packet::ResetMode;
use crate::net::stack::NetStack;
use crate::net::udp::{self, SocketHandle, UdpDatagram};

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

/// Fixed BOOTP header including the magic cookie
pub const HEADER_LEN: usize = 240;

const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const FLAGS_BROADCAST: u16 = 0x8000;
const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

const OPTION_PAD: u8 = 0;
const OPTION_SUBNET_MASK: u8 = 1;
const OPTION_ROUTER: u8 = 3;
const OPTION_REQUESTED_IP: u8 = 50;
const OPTION_MSG_TYPE: u8 = 53;
const OPTION_PARAM_REQ_LIST: u8 = 55;
const OPTION_MAX_MSG_SIZE: u8 = 57;
const OPTION_END: u8 = 255;

pub const MSG_DISCOVER: u8 = 1;
pub const MSG_OFFER: u8 = 2;
pub const MSG_REQUEST: u8 = 3;
pub const MSG_ACK: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpState {
    /// DISCOVER sent
    AwaitingOffer,
    /// REQUEST sent for the offered address
    AwaitingAck,
    /// Configuration installed; nothing more is sent
    Bound,
}

impl DhcpState {
    /// Message type a reply must carry in this state
    fn expected_type(self) -> Option<u8> {
        match self {
            DhcpState::AwaitingOffer => Some(MSG_OFFER),
            DhcpState::AwaitingAck => Some(MSG_ACK),
            DhcpState::Bound => None,
        }
    }
}

/// Per-interface client state, owned by the interface
#[derive(Debug)]
pub struct DhcpClient {
    socket: SocketHandle,
    /// Configuration being negotiated
    ip_info: Ipv4Info,
    xid: u32,
    state: DhcpState,
    timer: Option<TimerId>,
}

impl DhcpClient {
    pub fn socket(&self) -> SocketHandle {
        self.socket
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    pub fn state(&self) -> DhcpState {
        self.state
    }

    /// Address, mask and router collected so far
    pub fn offered(&self) -> Ipv4Info {
        self.ip_info
    }

    pub(crate) fn timer(&self) -> Option<TimerId> {
        self.timer
    }
}

/// Why a server reply was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyError {
    TooShort,
    NotReply,
    BadHardware,
    Relayed,
    XidMismatch,
    ChaddrMismatch,
    BadCookie,
    TruncatedOption,
    MissingMessageType,
    UnexpectedType(u8),
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyError::TooShort => write!(f, "message too short"),
            ReplyError::NotReply => write!(f, "not a BOOTREPLY"),
            ReplyError::BadHardware => write!(f, "not an Ethernet reply"),
            ReplyError::Relayed => write!(f, "non-zero hops"),
            ReplyError::XidMismatch => write!(f, "transaction id mismatch"),
            ReplyError::ChaddrMismatch => write!(f, "not for our MAC"),
            ReplyError::BadCookie => write!(f, "bad magic cookie"),
            ReplyError::TruncatedOption => write!(f, "truncated option"),
            ReplyError::MissingMessageType => write!(f, "no message type"),
            ReplyError::UnexpectedType(t) => write!(f, "unexpected message type {}", t),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DhcpOptions {
    message_type: Option<u8>,
    subnet_mask: Option<Ipv4Addr>,
    router: Option<Ipv4Addr>,
}

/// The parts of an accepted reply the client keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reply {
    yiaddr: Ipv4Addr,
    subnet_mask: Option<Ipv4Addr>,
    router: Option<Ipv4Addr>,
}

impl Reply {
    /// Fold into the configuration being negotiated. Options the server
    /// left out keep their earlier value.
    fn apply(&self, info: &mut Ipv4Info) {
        info.ip = self.yiaddr;
        if let Some(mask) = self.subnet_mask {
            info.netmask = mask;
        }
        if let Some(router) = self.router {
            info.router = router;
        }
    }
}

fn addr(data: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(data[0], data[1], data[2], data[3])
}

fn parse_options(options: &[u8]) -> Result<DhcpOptions, ReplyError> {
    let mut opts = DhcpOptions::default();
    let mut i = 0usize;
    while i < options.len() {
        let code = options[i];
        if code == OPTION_END {
            break;
        }
        if code == OPTION_PAD {
            i += 1;
            continue;
        }

        let len = *options.get(i + 1).ok_or(ReplyError::TruncatedOption)? as usize;
        let data = options
            .get(i + 2..i + 2 + len)
            .ok_or(ReplyError::TruncatedOption)?;
        match code {
            OPTION_MSG_TYPE if len >= 1 => opts.message_type = Some(data[0]),
            OPTION_SUBNET_MASK if len >= 4 => opts.subnet_mask = Some(addr(data)),
            OPTION_ROUTER if len >= 4 => opts.router = Some(addr(data)),
            _ => {}
        }

        i += 2 + len;
    }

    Ok(opts)
}

fn parse_reply(msg: &[u8], xid: u32, mac: &MacAddr, expected: u8) -> Result<Reply, ReplyError> {
    if msg.len() < HEADER_LEN {
        return Err(ReplyError::TooShort);
    }
    if msg[0] != BOOTREPLY {
        return Err(ReplyError::NotReply);
    }
    if msg[1] != HTYPE_ETHERNET || msg[2] != 6 {
        return Err(ReplyError::BadHardware);
    }
    if msg[3] != 0 {
        return Err(ReplyError::Relayed);
    }
    if u32::from_be_bytes([msg[4], msg[5], msg[6], msg[7]]) != xid {
        return Err(ReplyError::XidMismatch);
    }
    if msg[28..34] != mac[..] {
        return Err(ReplyError::ChaddrMismatch);
    }
    if msg[236..240] != MAGIC_COOKIE {
        return Err(ReplyError::BadCookie);
    }

    let opts = parse_options(&msg[HEADER_LEN..])?;
    match opts.message_type {
        Some(t) if t == expected => {}
        Some(t) => return Err(ReplyError::UnexpectedType(t)),
        None => return Err(ReplyError::MissingMessageType),
    }

    Ok(Reply {
        yiaddr: addr(&msg[16..20]),
        subnet_mask: opts.subnet_mask,
        router: opts.router,
    })
}

/// Bytes a client message occupies on the wire
fn message_len(requested: Option<Ipv4Addr>, min_len: usize) -> usize {
    // 53, [50], 57, 55 and END
    let options = 3 + requested.map_or(0, |_| 6) + 4 + 4 + 1;
    (HEADER_LEN + options).max(min_len)
}

fn put_option(msg: &mut [u8], i: &mut usize, code: u8, data: &[u8]) {
    msg[*i] = code;
    msg[*i + 1] = data.len() as u8;
    msg[*i + 2..*i + 2 + data.len()].copy_from_slice(data);
    *i += 2 + data.len();
}

/// Fill `msg` (sized by [`message_len`]) with a client message
fn build_message(
    msg: &mut [u8],
    mac: &MacAddr,
    xid: u32,
    msg_type: u8,
    requested: Option<Ipv4Addr>,
    max_size: u16,
) {
    msg.fill(0);
    msg[0] = BOOTREQUEST;
    msg[1] = HTYPE_ETHERNET;
    msg[2] = 6; // hlen
    msg[4..8].copy_from_slice(&xid.to_be_bytes());
    msg[10..12].copy_from_slice(&FLAGS_BROADCAST.to_be_bytes());
    msg[28..34].copy_from_slice(mac);
    msg[236..240].copy_from_slice(&MAGIC_COOKIE);

    let mut i = HEADER_LEN;
    put_option(msg, &mut i, OPTION_MSG_TYPE, &[msg_type]);
    if let Some(ip) = requested {
        put_option(msg, &mut i, OPTION_REQUESTED_IP, &ip.octets());
    }
    put_option(msg, &mut i, OPTION_MAX_MSG_SIZE, &max_size.to_be_bytes());
    put_option(
        msg,
        &mut i,
        OPTION_PARAM_REQ_LIST,
        &[OPTION_SUBNET_MASK, OPTION_ROUTER],
    );
    msg[i] = OPTION_END;
    // the rest stays zero padding
}

fn client_mut(stack: &mut NetStack, iface: IfaceId) -> Result<&mut DhcpClient, NetError> {
    stack
        .etherif_mut(iface)?
        .dhcpc
        .as_mut()
        .ok_or(NetError::DhcpNotRunning)
}

/// Start the client on `iface`, sending a DISCOVER
///
/// A client already running there is stopped first, so calling this again
/// restarts the exchange.
pub fn start(stack: &mut NetStack, iface: IfaceId) -> Result<(), NetError> {
    stop(stack, iface)?;

    let socket = udp::register_socket(
        stack,
        iface,
        CLIENT_PORT,
        Some(SERVER_PORT),
        Arc::new(receive),
    )?;
    stack.etherif_mut(iface)?.dhcpc = Some(DhcpClient {
        socket,
        ip_info: Ipv4Info::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
        ),
        xid: 0,
        state: DhcpState::AwaitingOffer,
        timer: None,
    });
    info!("DHCP: starting on {}", iface);

    if let Err(e) = discover(stack, iface) {
        warn!("DHCP: DISCOVER on {} failed: {}", iface, e);
        stop(stack, iface)?;
        return Err(e);
    }
    Ok(())
}

/// Stop the client on `iface` and release its socket
///
/// Does nothing if no client is running. Installed IPv4 info is left alone.
pub fn stop(stack: &mut NetStack, iface: IfaceId) -> Result<(), NetError> {
    let Some(client) = stack.etherif_mut(iface)?.dhcpc.take() else {
        return Ok(());
    };

    if let Some(timer) = client.timer {
        stack.timers.timer_del(timer);
    }
    udp::unregister_socket(stack, client.socket)?;
    info!("DHCP: stopped on {}", iface);
    Ok(())
}

/// Phase of the client on `iface`, `None` when none is running
pub fn state(stack: &NetStack, iface: IfaceId) -> Option<DhcpState> {
    stack
        .etherif(iface)
        .ok()
        .and_then(|ether| ether.dhcp_client())
        .map(|client| client.state)
}

/// Begin a fresh exchange with a new transaction id
fn discover(stack: &mut NetStack, iface: IfaceId) -> Result<(), NetError> {
    let xid = stack.dhcp_xid;
    stack.dhcp_xid = stack.dhcp_xid.wrapping_add(1);

    let client = client_mut(stack, iface)?;
    client.xid = xid;
    client.state = DhcpState::AwaitingOffer;
    client.ip_info = Ipv4Info::new(
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
    );

    debug!("DHCP: DISCOVER on {} xid {:#010x}", iface, xid);
    send(stack, iface, MSG_DISCOVER)
}

/// Broadcast a client message from 0.0.0.0:68 to 255.255.255.255:67
fn send(stack: &mut NetStack, iface: IfaceId, msg_type: u8) -> Result<(), NetError> {
    let ether = stack.etherif(iface)?;
    let client = ether.dhcp_client().ok_or(NetError::DhcpNotRunning)?;
    let (socket, xid) = (client.socket, client.xid);
    let requested = (msg_type == MSG_REQUEST).then_some(client.ip_info.ip);
    let mac = ether.mac_address();
    let max_size = ether.packet_size().unwrap_or(stack.config.packet_size);
    let len = message_len(requested, stack.config.dhcp_min_message_len);

    let pkt = stack.packet_mut();
    pkt.reset(ResetMode::Tail);
    build_message(
        pkt.push(len)?,
        &mac,
        xid,
        msg_type,
        requested,
        max_size.min(u16::MAX as usize) as u16,
    );

    udp::socket_xmit(
        stack,
        socket,
        BROADCAST_MAC,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::BROADCAST,
        len as u16,
    )?;
    arm_retransmit(stack, iface);
    Ok(())
}

fn cancel_retransmit(stack: &mut NetStack, iface: IfaceId) {
    let timer = client_mut(stack, iface)
        .ok()
        .and_then(|client| client.timer.take());
    if let Some(timer) = timer {
        stack.timers.timer_del(timer);
    }
}

fn arm_retransmit(stack: &mut NetStack, iface: IfaceId) {
    cancel_retransmit(stack, iface);
    let Some(delay) = stack.config.dhcp_retransmit_ms else {
        return;
    };

    let timer = stack
        .timers
        .timer_set(delay, StackTimer::DhcpRetransmit(iface));
    match client_mut(stack, iface) {
        Ok(client) => client.timer = Some(timer),
        Err(_) => stack.timers.timer_del(timer),
    }
}

/// Retransmit timer expiry: start over from DISCOVER unless bound
pub(crate) fn on_retransmit_timer(stack: &mut NetStack, iface: IfaceId) -> Result<(), NetError> {
    let client = client_mut(stack, iface)?;
    client.timer = None;
    if client.state == DhcpState::Bound {
        return Ok(());
    }

    warn!("DHCP: no answer on {}, restarting", iface);
    discover(stack, iface)
}

/// Socket callback for server replies
fn receive(stack: &mut NetStack, dgram: UdpDatagram) {
    let iface = dgram.iface;
    let Ok(ether) = stack.etherif(iface) else {
        return;
    };
    let mac = ether.mac_address();
    let Some(client) = ether.dhcp_client() else {
        return;
    };
    let Some(expected) = client.state.expected_type() else {
        debug!("DHCP: already bound on {}, ignoring reply", iface);
        return;
    };

    let reply = match parse_reply(stack.packet().data(), client.xid, &mac, expected) {
        Ok(reply) => reply,
        Err(e) => {
            info!("DHCP: dropping reply on {}: {}", iface, e);
            return;
        }
    };

    let Ok(client) = client_mut(stack, iface) else {
        return;
    };
    reply.apply(&mut client.ip_info);

    if expected == MSG_OFFER {
        client.state = DhcpState::AwaitingAck;
        info!("DHCP: offered {} on {}", reply.yiaddr, iface);
        if let Err(e) = send(stack, iface, MSG_REQUEST) {
            warn!("DHCP: REQUEST on {} failed: {}", iface, e);
        }
    } else {
        client.state = DhcpState::Bound;
        let info = client.ip_info;
        cancel_retransmit(stack, iface);
        info!("DHCP: bound {} on {}", info.ip, iface);
        if let Err(e) = stack.set_ipv4_info(iface, info) {
            warn!("DHCP: installing address on {} failed: {}", iface, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: MacAddr = [0x02, 0x00, 0x00, 0xAA, 0xBB, 0xCC];
    const XID: u32 = 0x453a_939a;

    fn reply(msg_type: u8, options: &[u8]) -> alloc::vec::Vec<u8> {
        let mut msg = alloc::vec![0u8; HEADER_LEN];
        msg[0] = BOOTREPLY;
        msg[1] = HTYPE_ETHERNET;
        msg[2] = 6;
        msg[4..8].copy_from_slice(&XID.to_be_bytes());
        msg[16..20].copy_from_slice(&[192, 168, 1, 50]);
        msg[28..34].copy_from_slice(&MAC);
        msg[236..240].copy_from_slice(&MAGIC_COOKIE);
        msg.extend_from_slice(&[OPTION_MSG_TYPE, 1, msg_type]);
        msg.extend_from_slice(options);
        msg.push(OPTION_END);
        msg
    }

    #[test]
    fn test_discover_layout() {
        let len = message_len(None, 300);
        assert_eq!(len, 300);

        let mut msg = [0xEEu8; 300];
        build_message(&mut msg, &MAC, XID, MSG_DISCOVER, None, 400);

        assert_eq!(&msg[0..4], &[1, 1, 6, 0]);
        assert_eq!(&msg[4..8], &XID.to_be_bytes());
        assert_eq!(&msg[10..12], &[0x80, 0x00]);
        assert_eq!(&msg[28..34], &MAC);
        assert_eq!(&msg[236..240], &MAGIC_COOKIE);
        assert_eq!(
            &msg[240..252],
            &[53, 1, 1, 57, 2, 0x01, 0x90, 55, 2, 1, 3, 255]
        );
        assert!(msg[252..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_request_carries_requested_ip() {
        let requested = Some(Ipv4Addr::new(192, 168, 1, 50));
        let mut msg = [0u8; 300];
        build_message(&mut msg, &MAC, XID, MSG_REQUEST, requested, 400);

        assert_eq!(&msg[240..249], &[53, 1, 3, 50, 4, 192, 168, 1, 50]);
        assert_eq!(msg[257], OPTION_END);
    }

    #[test]
    fn test_message_len_without_padding() {
        assert_eq!(message_len(None, 0), 252);
        assert_eq!(message_len(Some(Ipv4Addr::LOCALHOST), 0), 258);
    }

    #[test]
    fn test_parse_options_skips_pad_and_unknown() {
        let options = [0, 0, 53, 1, 2, 12, 3, b'a', b'b', b'c', 1, 4, 255, 255, 255, 0, 255, 3];
        let opts = parse_options(&options).unwrap();
        assert_eq!(opts.message_type, Some(MSG_OFFER));
        assert_eq!(opts.subnet_mask, Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(opts.router, None);
    }

    #[test]
    fn test_parse_options_rejects_truncation() {
        assert_eq!(parse_options(&[53, 1]), Err(ReplyError::TruncatedOption));
        assert_eq!(parse_options(&[3, 4, 10, 0]), Err(ReplyError::TruncatedOption));
        assert_eq!(parse_options(&[53]), Err(ReplyError::TruncatedOption));
    }

    #[test]
    fn test_parse_reply_accepts_offer() {
        let msg = reply(MSG_OFFER, &[1, 4, 255, 255, 255, 0, 3, 4, 192, 168, 1, 1]);
        let parsed = parse_reply(&msg, XID, &MAC, MSG_OFFER).unwrap();
        assert_eq!(parsed.yiaddr, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(parsed.subnet_mask, Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(parsed.router, Some(Ipv4Addr::new(192, 168, 1, 1)));

        let mut info = Ipv4Info::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
        );
        parsed.apply(&mut info);
        assert_eq!(info.ip, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(info.router, Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn test_parse_reply_rejects_mismatches() {
        let msg = reply(MSG_OFFER, &[]);
        assert_eq!(
            parse_reply(&msg, XID + 1, &MAC, MSG_OFFER),
            Err(ReplyError::XidMismatch)
        );
        assert_eq!(
            parse_reply(&msg, XID, &[0; 6], MSG_OFFER),
            Err(ReplyError::ChaddrMismatch)
        );
        assert_eq!(
            parse_reply(&msg, XID, &MAC, MSG_ACK),
            Err(ReplyError::UnexpectedType(MSG_OFFER))
        );

        let mut relayed = msg.clone();
        relayed[3] = 1;
        assert_eq!(
            parse_reply(&relayed, XID, &MAC, MSG_OFFER),
            Err(ReplyError::Relayed)
        );

        let mut request = msg.clone();
        request[0] = BOOTREQUEST;
        assert_eq!(
            parse_reply(&request, XID, &MAC, MSG_OFFER),
            Err(ReplyError::NotReply)
        );

        let mut no_type = msg.clone();
        no_type.truncate(HEADER_LEN);
        no_type.push(OPTION_END);
        assert_eq!(
            parse_reply(&no_type, XID, &MAC, MSG_OFFER),
            Err(ReplyError::MissingMessageType)
        );

        assert_eq!(
            parse_reply(&msg[..200], XID, &MAC, MSG_OFFER),
            Err(ReplyError::TooShort)
        );
    }
}
