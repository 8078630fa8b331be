//! UDP socket matching, delivery and transmit

use std::sync::{Arc, Mutex};

use core::net::Ipv4Addr;
use rustrial_net::drivers::net::loopback::{LoopbackDevice, LoopbackHandle};
use rustrial_net::net::checksum;
use rustrial_net::net::ethernet::{self, EtherType, EthernetHeader, MacAddr};
use rustrial_net::net::ipv4::{self, Ipv4Header, Ipv4RxInfo, protocol};
use rustrial_net::net::packet::ResetMode;
use rustrial_net::net::udp::{self, SocketHandle, UdpDatagram, UdpHandler, UdpHeader};
use rustrial_net::{IfaceId, Ipv4Info, NetError, NetStack, StackConfig};

const OUR_MAC: MacAddr = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
const PEER_MAC: MacAddr = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];
const OUR_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);
const PEER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

/// UDP payload offset in a frame
const PAYLOAD: usize = ethernet::HEADER_SIZE + ipv4::HEADER_SIZE + udp::HEADER_SIZE;

type Seen = Arc<Mutex<Vec<(UdpDatagram, Vec<u8>)>>>;

fn setup_with(config: StackConfig) -> (NetStack, IfaceId, LoopbackHandle) {
    let mut stack = NetStack::new(config);
    let dev = LoopbackDevice::new(OUR_MAC);
    let handle = dev.handle();
    let iface = stack.register_etherif(Box::new(dev));
    stack
        .set_ipv4_info(
            iface,
            Ipv4Info::new(OUR_IP, Ipv4Addr::new(255, 255, 255, 0), PEER_IP),
        )
        .unwrap();
    (stack, iface, handle)
}

fn setup() -> (NetStack, IfaceId, LoopbackHandle) {
    setup_with(StackConfig::default())
}

fn recording(seen: &Seen) -> Arc<dyn UdpHandler> {
    let seen = Arc::clone(seen);
    Arc::new(move |stack: &mut NetStack, dgram: UdpDatagram| {
        seen.lock()
            .unwrap()
            .push((dgram, stack.packet().data().to_vec()));
    })
}

/// Frame carrying one UDP datagram from the peer to us
fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let udp_len = (udp::HEADER_SIZE + payload.len()) as u16;
    let mut frame = vec![0u8; PAYLOAD];
    EthernetHeader {
        dest_mac: OUR_MAC,
        src_mac: PEER_MAC,
        ethertype: EtherType::IPV4,
    }
    .write(&mut frame);
    Ipv4Header::new(PEER_IP, OUR_IP, protocol::UDP, udp_len)
        .write(&mut frame[ethernet::HEADER_SIZE..]);
    UdpHeader {
        src_port,
        dst_port,
        length: udp_len,
        checksum: 0,
    }
    .write(&mut frame[ethernet::HEADER_SIZE + ipv4::HEADER_SIZE..]);
    frame.extend_from_slice(payload);
    frame
}

fn deliver(stack: &mut NetStack, iface: IfaceId, handle: &LoopbackHandle, frame: &[u8]) {
    handle.inject(frame);
    stack.packet_received(iface);
}

#[test]
fn test_specific_remote_port_filters_source() {
    let (mut stack, iface, handle) = setup();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sock = udp::register_socket(&mut stack, iface, 5000, Some(7000), recording(&seen)).unwrap();

    deliver(&mut stack, iface, &handle, &udp_frame(7001, 5000, b"wrong port"));
    assert!(seen.lock().unwrap().is_empty());

    deliver(&mut stack, iface, &handle, &udp_frame(7000, 5000, b"hello"));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);

    let (dgram, payload) = &seen[0];
    assert_eq!(dgram.iface, iface);
    assert_eq!(dgram.socket, sock);
    assert_eq!(dgram.src_addr, PEER_IP);
    assert_eq!(dgram.dst_addr, OUR_IP);
    assert_eq!(dgram.src_port, 7000);
    assert_eq!(dgram.dst_port, 5000);
    assert_eq!(payload, b"hello");
}

#[test]
fn test_wildcard_socket_takes_any_source() {
    let (mut stack, iface, handle) = setup();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    udp::register_socket(&mut stack, iface, 5000, None, recording(&seen)).unwrap();

    deliver(&mut stack, iface, &handle, &udp_frame(1234, 5000, b"a"));
    deliver(&mut stack, iface, &handle, &udp_frame(4321, 5000, b"b"));
    deliver(&mut stack, iface, &handle, &udp_frame(4321, 5001, b"c"));

    let ports: Vec<u16> = seen.lock().unwrap().iter().map(|(d, _)| d.src_port).collect();
    assert_eq!(ports, vec![1234, 4321]);
}

#[test]
fn test_newest_matching_socket_wins() {
    let (mut stack, iface, handle) = setup();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let older = udp::register_socket(&mut stack, iface, 5000, None, recording(&seen)).unwrap();
    let newer = udp::register_socket(&mut stack, iface, 5000, None, recording(&seen)).unwrap();
    assert_ne!(older, newer);

    deliver(&mut stack, iface, &handle, &udp_frame(1, 5000, b"x"));
    assert_eq!(seen.lock().unwrap()[0].0.socket, newer);

    udp::unregister_socket(&mut stack, newer).unwrap();
    deliver(&mut stack, iface, &handle, &udp_frame(1, 5000, b"x"));
    assert_eq!(seen.lock().unwrap()[1].0.socket, older);
}

#[test]
fn test_unregister_socket() {
    let (mut stack, iface, handle) = setup();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sock = udp::register_socket(&mut stack, iface, 5000, None, recording(&seen)).unwrap();
    assert_eq!(stack.etherif(iface).unwrap().sockets().len(), 1);

    udp::unregister_socket(&mut stack, sock).unwrap();
    assert_eq!(
        udp::unregister_socket(&mut stack, sock),
        Err(NetError::NotRegistered)
    );

    deliver(&mut stack, iface, &handle, &udp_frame(1, 5000, b"x"));
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_malformed_datagrams_are_dropped() {
    let (mut stack, iface, handle) = setup();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    udp::register_socket(&mut stack, iface, 5000, None, recording(&seen)).unwrap();

    // Zero source port
    deliver(&mut stack, iface, &handle, &udp_frame(0, 5000, b"x"));

    // Length field longer than the datagram
    let mut frame = udp_frame(1, 5000, b"x");
    frame[ethernet::HEADER_SIZE + ipv4::HEADER_SIZE + 5] = 50;
    deliver(&mut stack, iface, &handle, &frame);

    // Length field shorter than the header
    let mut frame = udp_frame(1, 5000, b"x");
    frame[ethernet::HEADER_SIZE + ipv4::HEADER_SIZE + 5] = 4;
    deliver(&mut stack, iface, &handle, &frame);

    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_length_field_trims_payload() {
    let (mut stack, iface, handle) = setup();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    udp::register_socket(&mut stack, iface, 5000, None, recording(&seen)).unwrap();

    // IPv4 says 4 payload bytes, UDP claims only 2 of them
    let mut frame = udp_frame(1, 5000, b"abcd");
    frame[ethernet::HEADER_SIZE + ipv4::HEADER_SIZE + 5] = 10;
    deliver(&mut stack, iface, &handle, &frame);

    assert_eq!(seen.lock().unwrap()[0].1, b"ab");
}

#[test]
fn test_socket_send_without_checksum() {
    let (mut stack, iface, handle) = setup();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sock = udp::register_socket(&mut stack, iface, 5000, Some(7000), recording(&seen)).unwrap();

    udp::socket_send(&mut stack, sock, PEER_MAC, OUR_IP, PEER_IP, b"data").unwrap();

    let frame = handle.last_transmitted().unwrap();
    assert_eq!(frame.len(), PAYLOAD + 4);
    let ip = Ipv4Header::from_bytes(&frame[ethernet::HEADER_SIZE..]).unwrap();
    assert_eq!(ip.protocol, protocol::UDP);
    assert_eq!(ip.src_ip, OUR_IP);
    assert_eq!(ip.dest_ip, PEER_IP);

    let udp = UdpHeader::from_bytes(&frame[ethernet::HEADER_SIZE + ipv4::HEADER_SIZE..]).unwrap();
    assert_eq!(udp.src_port, 5000);
    assert_eq!(udp.dst_port, 7000);
    assert_eq!(udp.length, 12);
    assert_eq!(udp.checksum, 0);
    assert_eq!(&frame[PAYLOAD..], b"data");
}

#[test]
fn test_socket_send_with_checksum() {
    let (mut stack, iface, handle) = setup_with(StackConfig::default().with_udp_tx_checksum(true));
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sock = udp::register_socket(&mut stack, iface, 5000, Some(7000), recording(&seen)).unwrap();

    udp::socket_send(&mut stack, sock, PEER_MAC, OUR_IP, PEER_IP, b"data!").unwrap();
    let frame = handle.last_transmitted().unwrap();
    let datagram = &frame[ethernet::HEADER_SIZE + ipv4::HEADER_SIZE..];
    assert_ne!(u16::from_be_bytes([datagram[6], datagram[7]]), 0);

    // Pseudo-header plus datagram sums to all ones
    let mut sum = checksum::sum(&OUR_IP.octets(), 0);
    sum = checksum::sum(&PEER_IP.octets(), sum);
    sum += protocol::UDP as u32 + datagram.len() as u32;
    assert_eq!(checksum::finish(checksum::sum(datagram, sum)), 0);
}

#[test]
fn test_wildcard_socket_needs_explicit_port() {
    let (mut stack, iface, handle) = setup();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sock = udp::register_socket(&mut stack, iface, 5000, None, recording(&seen)).unwrap();

    assert_eq!(
        udp::socket_send(&mut stack, sock, PEER_MAC, OUR_IP, PEER_IP, b"x"),
        Err(NetError::NoRemotePort)
    );
    assert_eq!(handle.transmitted_count(), 0);

    let pkt = stack.packet_mut();
    pkt.reset(rustrial_net::net::packet::ResetMode::Tail);
    pkt.push_slice(b"x").unwrap();
    udp::socket_xmit_to(&mut stack, sock, PEER_MAC, OUR_IP, PEER_IP, 9000, 1).unwrap();

    let frame = handle.last_transmitted().unwrap();
    let udp = UdpHeader::from_bytes(&frame[ethernet::HEADER_SIZE + ipv4::HEADER_SIZE..]).unwrap();
    assert_eq!(udp.dst_port, 9000);
}

#[test]
fn test_send_on_unknown_socket() {
    let (mut stack, iface, _handle) = setup();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sock: SocketHandle =
        udp::register_socket(&mut stack, iface, 5000, Some(1), recording(&seen)).unwrap();
    udp::unregister_socket(&mut stack, sock).unwrap();

    assert_eq!(
        udp::socket_send(&mut stack, sock, PEER_MAC, OUR_IP, PEER_IP, b"x"),
        Err(NetError::NotRegistered)
    );
}

#[test]
fn test_handler_can_reply_from_callback() {
    let (mut stack, iface, handle) = setup();

    // Echo server: send every payload straight back to its source
    let echo = Arc::new(|stack: &mut NetStack, dgram: UdpDatagram| {
        let payload = stack.packet().data().to_vec();
        let pkt = stack.packet_mut();
        pkt.reset(rustrial_net::net::packet::ResetMode::Tail);
        pkt.push_slice(&payload).unwrap();
        udp::socket_xmit_to(
            stack,
            dgram.socket,
            PEER_MAC,
            dgram.dst_addr,
            dgram.src_addr,
            dgram.src_port,
            payload.len() as u16,
        )
        .unwrap();
    });
    udp::register_socket(&mut stack, iface, 7, None, echo).unwrap();

    deliver(&mut stack, iface, &handle, &udp_frame(40000, 7, b"marco"));

    let frame = handle.last_transmitted().unwrap();
    let udp = UdpHeader::from_bytes(&frame[ethernet::HEADER_SIZE + ipv4::HEADER_SIZE..]).unwrap();
    assert_eq!(udp.src_port, 7);
    assert_eq!(udp.dst_port, 40000);
    assert_eq!(&frame[PAYLOAD..], b"marco");
}

#[test]
fn test_register_on_unknown_interface() {
    let (mut stack, _iface, _handle) = setup();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    assert_eq!(
        udp::register_socket(&mut stack, IfaceId(42), 1, None, recording(&seen)),
        Err(NetError::UnknownInterface(IfaceId(42)))
    );
}

#[test]
fn test_xmit_rejects_bad_payload_length() {
    let (mut stack, iface, handle) = setup();
    let pkt = stack.packet_mut();
    pkt.reset(ResetMode::Tail);
    pkt.push_slice(b"ping").unwrap();

    for bad in [0u16, 3, 5, 65530] {
        assert_eq!(
            udp::xmit(&mut stack, iface, PEER_MAC, OUR_IP, PEER_IP, 1, 2, bad),
            Err(NetError::LengthMismatch)
        );
    }
    assert_eq!(handle.transmitted_count(), 0);
    assert_eq!(stack.packet().data(), b"ping");

    udp::xmit(&mut stack, iface, PEER_MAC, OUR_IP, PEER_IP, 1, 2, 4).unwrap();
    assert_eq!(handle.transmitted_count(), 1);
}

#[test]
fn test_xmit_rejects_oversized_datagram() {
    let (mut stack, iface, handle) = setup_with(StackConfig::default().with_packet_size(70_000));
    let payload = vec![0u8; 65_530];
    let pkt = stack.packet_mut();
    pkt.reset(ResetMode::Tail);
    pkt.push_slice(&payload).unwrap();

    // Header plus payload does not fit the 16-bit length field
    assert_eq!(
        udp::xmit(&mut stack, iface, PEER_MAC, OUR_IP, PEER_IP, 1, 2, 65_530),
        Err(NetError::LengthMismatch)
    );
    assert_eq!(handle.transmitted_count(), 0);
}

#[test]
fn test_nested_receive_keeps_outer_addressing() {
    let (mut stack, iface, handle) = setup();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    udp::register_socket(&mut stack, iface, 9, None, recording(&seen)).unwrap();

    // Second datagram, to the limited broadcast address
    let mut inner = udp_frame(1000, 9, b"inner");
    Ipv4Header::new(PEER_IP, Ipv4Addr::BROADCAST, protocol::UDP, (udp::HEADER_SIZE + 5) as u16)
        .write(&mut inner[ethernet::HEADER_SIZE..]);

    let after = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&after);
    let nested = handle.clone();
    udp::register_socket(
        &mut stack,
        iface,
        7,
        None,
        Arc::new(move |stack: &mut NetStack, dgram: UdpDatagram| {
            nested.inject(&inner);
            stack.packet_received(dgram.iface);
            *sink.lock().unwrap() = stack.ipv4_rx();
        }),
    )
    .unwrap();

    deliver(&mut stack, iface, &handle, &udp_frame(1000, 7, b"outer"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.dst_addr, Ipv4Addr::BROADCAST);
    assert_eq!(seen[0].1, b"inner");
    assert_eq!(
        *after.lock().unwrap(),
        Some(Ipv4RxInfo {
            src: PEER_IP,
            dst: OUR_IP,
            protocol: protocol::UDP,
        })
    );
    assert_eq!(stack.ipv4_rx(), None);
}
