//! IPv4 receive filtering, protocol dispatch and transmit

use std::sync::{Arc, Mutex};

use core::net::Ipv4Addr;
use rustrial_net::drivers::net::loopback::{LoopbackDevice, LoopbackHandle};
use rustrial_net::net::checksum;
use rustrial_net::net::ethernet::{self, EtherType, EthernetHeader, MacAddr};
use rustrial_net::net::ipv4::{self, Ipv4Header, Ipv4RxInfo};
use rustrial_net::net::packet::ResetMode;
use rustrial_net::{IfaceId, Ipv4Info, NetError, NetStack, StackConfig};

const OUR_MAC: MacAddr = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
const PEER_MAC: MacAddr = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];
const OUR_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);
const PEER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const TEST_PROTO: u8 = 253;

type Seen = Arc<Mutex<Vec<(Ipv4RxInfo, Vec<u8>)>>>;

fn setup(configured: bool) -> (NetStack, IfaceId, LoopbackHandle, Seen) {
    let mut stack = NetStack::default();
    let dev = LoopbackDevice::new(OUR_MAC);
    let handle = dev.handle();
    let iface = stack.register_etherif(Box::new(dev));
    if configured {
        stack
            .set_ipv4_info(
                iface,
                Ipv4Info::new(OUR_IP, Ipv4Addr::new(255, 255, 255, 0), PEER_IP),
            )
            .unwrap();
    }

    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    ipv4::register_proto(
        &mut stack,
        TEST_PROTO,
        Arc::new(move |stack: &mut NetStack, _iface: IfaceId| {
            let rx = stack.ipv4_rx().unwrap();
            sink.lock().unwrap().push((rx, stack.packet().data().to_vec()));
        }),
    );
    (stack, iface, handle, seen)
}

/// Ethernet frame carrying one IPv4 datagram
fn datagram(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; ethernet::HEADER_SIZE + ipv4::HEADER_SIZE];
    EthernetHeader {
        dest_mac: OUR_MAC,
        src_mac: PEER_MAC,
        ethertype: EtherType::IPV4,
    }
    .write(&mut frame);
    Ipv4Header::new(src, dst, protocol, payload.len() as u16)
        .write(&mut frame[ethernet::HEADER_SIZE..]);
    frame.extend_from_slice(payload);
    frame
}

fn deliver(stack: &mut NetStack, iface: IfaceId, handle: &LoopbackHandle, frame: &[u8]) {
    handle.inject(frame);
    stack.packet_received(iface);
}

#[test]
fn test_datagram_for_us_is_dispatched() {
    let (mut stack, iface, handle, seen) = setup(true);
    deliver(&mut stack, iface, &handle, &datagram(PEER_IP, OUR_IP, TEST_PROTO, b"ping"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.src, PEER_IP);
    assert_eq!(seen[0].0.dst, OUR_IP);
    assert_eq!(seen[0].0.protocol, TEST_PROTO);
    assert_eq!(seen[0].1, b"ping");
    drop(seen);

    // Only visible while the datagram is being dispatched
    assert_eq!(stack.ipv4_rx(), None);
}

#[test]
fn test_link_padding_is_trimmed() {
    let (mut stack, iface, handle, seen) = setup(true);
    let mut frame = datagram(PEER_IP, OUR_IP, TEST_PROTO, b"abc");
    frame.extend_from_slice(&[0u8; 20]);
    deliver(&mut stack, iface, &handle, &frame);

    assert_eq!(seen.lock().unwrap()[0].1, b"abc");
}

#[test]
fn test_broadcasts_are_accepted() {
    let (mut stack, iface, handle, seen) = setup(true);
    deliver(&mut stack, iface, &handle, &datagram(PEER_IP, Ipv4Addr::BROADCAST, TEST_PROTO, b"a"));
    deliver(
        &mut stack,
        iface,
        &handle,
        &datagram(PEER_IP, Ipv4Addr::new(192, 168, 1, 255), TEST_PROTO, b"b"),
    );
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[test]
fn test_unconfigured_interface_takes_only_limited_broadcast() {
    let (mut stack, iface, handle, seen) = setup(false);
    deliver(&mut stack, iface, &handle, &datagram(PEER_IP, OUR_IP, TEST_PROTO, b"a"));
    assert!(seen.lock().unwrap().is_empty());

    deliver(&mut stack, iface, &handle, &datagram(PEER_IP, Ipv4Addr::BROADCAST, TEST_PROTO, b"b"));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_filter_drops_bad_datagrams() {
    let (mut stack, iface, handle, seen) = setup(true);

    // Somebody else's address
    deliver(
        &mut stack,
        iface,
        &handle,
        &datagram(PEER_IP, Ipv4Addr::new(192, 168, 1, 51), TEST_PROTO, b"x"),
    );

    // Zero destination
    deliver(&mut stack, iface, &handle, &datagram(PEER_IP, Ipv4Addr::UNSPECIFIED, TEST_PROTO, b"x"));

    // Corrupted header checksum
    let mut frame = datagram(PEER_IP, OUR_IP, TEST_PROTO, b"x");
    frame[ethernet::HEADER_SIZE + 10] ^= 0xFF;
    deliver(&mut stack, iface, &handle, &frame);

    // Options present (IHL 6)
    let mut frame = datagram(PEER_IP, OUR_IP, TEST_PROTO, b"xxxx");
    frame[ethernet::HEADER_SIZE] = 0x46;
    deliver(&mut stack, iface, &handle, &frame);

    // Total length past the end of the frame
    let mut frame = datagram(PEER_IP, OUR_IP, TEST_PROTO, b"x");
    frame.truncate(frame.len() - 1);
    deliver(&mut stack, iface, &handle, &frame);

    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_zero_ttl_is_dropped() {
    let (mut stack, iface, handle, seen) = setup(true);

    let mut header = Ipv4Header::new(PEER_IP, OUR_IP, TEST_PROTO, 1);
    header.ttl = 0;
    let mut frame = datagram(PEER_IP, OUR_IP, TEST_PROTO, b"x");
    header.write(&mut frame[ethernet::HEADER_SIZE..]);
    deliver(&mut stack, iface, &handle, &frame);

    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_unknown_protocol_is_dropped() {
    let (mut stack, iface, handle, seen) = setup(true);
    deliver(&mut stack, iface, &handle, &datagram(PEER_IP, OUR_IP, 254, b"x"));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(handle.transmitted_count(), 0);
}

#[test]
fn test_xmit_builds_header() {
    let (mut stack, iface, handle, _seen) = setup(true);

    let pkt = stack.packet_mut();
    pkt.reset(ResetMode::Tail);
    pkt.push_slice(b"payload").unwrap();
    ipv4::xmit(&mut stack, iface, PEER_MAC, TEST_PROTO, OUR_IP, PEER_IP, 7).unwrap();

    let frame = handle.last_transmitted().unwrap();
    let eth = EthernetHeader::from_bytes(&frame).unwrap();
    assert_eq!(eth.dest_mac, PEER_MAC);
    assert_eq!(eth.ethertype, EtherType::IPV4);

    let ip = &frame[ethernet::HEADER_SIZE..];
    assert_eq!(ip[0], 0x45);
    assert_eq!(u16::from_be_bytes([ip[2], ip[3]]), 27);
    assert_eq!(&ip[6..8], &[0x40, 0x00]); // DF, no fragment offset
    assert_eq!(ip[8], 255);
    assert_eq!(ip[9], TEST_PROTO);
    assert_eq!(checksum::checksum(&ip[..ipv4::HEADER_SIZE]), 0);
    assert_eq!(&ip[12..16], &OUR_IP.octets());
    assert_eq!(&ip[16..20], &PEER_IP.octets());
    assert_eq!(&ip[ipv4::HEADER_SIZE..], b"payload");
}

#[test]
fn test_unregister_protocol() {
    let (mut stack, iface, handle, seen) = setup(true);
    let id = ipv4::register_proto(
        &mut stack,
        TEST_PROTO,
        Arc::new(|_stack: &mut NetStack, _iface: IfaceId| {}),
    );

    // The newer registration shadows the recording one
    deliver(&mut stack, iface, &handle, &datagram(PEER_IP, OUR_IP, TEST_PROTO, b"x"));
    assert!(seen.lock().unwrap().is_empty());

    ipv4::unregister_proto(&mut stack, id).unwrap();
    deliver(&mut stack, iface, &handle, &datagram(PEER_IP, OUR_IP, TEST_PROTO, b"x"));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_xmit_rejects_bad_payload_length() {
    let (mut stack, iface, handle, _seen) = setup(true);
    let pkt = stack.packet_mut();
    pkt.reset(ResetMode::Tail);
    pkt.push_slice(b"payload").unwrap();

    for bad in [0u16, 6, 8, 65_530] {
        assert_eq!(
            ipv4::xmit(&mut stack, iface, PEER_MAC, TEST_PROTO, OUR_IP, PEER_IP, bad),
            Err(NetError::LengthMismatch)
        );
    }
    assert_eq!(handle.transmitted_count(), 0);
    assert_eq!(stack.packet().data(), b"payload");
}

#[test]
fn test_xmit_rejects_oversized_datagram() {
    let mut stack = NetStack::new(StackConfig::default().with_packet_size(70_000));
    let dev = LoopbackDevice::new(OUR_MAC);
    let handle = dev.handle();
    let iface = stack.register_etherif(Box::new(dev));

    // Fits in a u16 but not once the header is added
    let payload = vec![0u8; 65_520];
    let pkt = stack.packet_mut();
    pkt.reset(ResetMode::Tail);
    pkt.push_slice(&payload).unwrap();
    assert_eq!(
        ipv4::xmit(&mut stack, iface, PEER_MAC, TEST_PROTO, OUR_IP, PEER_IP, 65_520),
        Err(NetError::LengthMismatch)
    );
    assert_eq!(handle.transmitted_count(), 0);
}
