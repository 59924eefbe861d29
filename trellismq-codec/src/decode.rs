use std::num::NonZeroU16;

use bytes::{Buf, Bytes};
use bytestring::ByteString;

use crate::error::DecodeError;
use crate::types::{command, ConnectAckFlags, ConnectFlags, Publish, QoS};
use crate::utils::{timestamp_millis, Decode};

use super::packet::{Connect, ConnectAck, Packet, SubscribeReturnCode};

pub(crate) fn decode_packet(mut src: Bytes, first_byte: u8) -> Result<Packet, DecodeError> {
    let flags = first_byte & 0b0000_1111;
    match first_byte >> 4 {
        command::CONNECT => decode_connect_packet(&mut src, flags),
        command::CONNACK => decode_connect_ack_packet(&mut src, flags),
        command::PUBLISH => Ok(Packet::Publish(decode_publish_body(&mut src, flags)?)),
        command::PUBACK => decode_ack(src, |packet_id| Packet::PublishAck { packet_id }),
        command::SUBSCRIBE => decode_subscribe_packet(&mut src, flags),
        command::SUBACK => decode_subscribe_ack_packet(&mut src),
        command::PING => Ok(Packet::PingRequest),
        command::PONG => Ok(Packet::PingResponse),
        command::DISCONNECT => Ok(Packet::Disconnect),
        command::QUEUE => Ok(Packet::Queue(decode_publish_body(&mut src, flags)?)),
        _ => Err(DecodeError::UnsupportedCommandCode),
    }
}

#[inline]
fn decode_ack(mut src: Bytes, f: impl Fn(NonZeroU16) -> Packet) -> Result<Packet, DecodeError> {
    let packet_id = NonZeroU16::decode(&mut src)?;
    ensure!(!src.has_remaining(), DecodeError::InvalidLength);
    Ok(f(packet_id))
}

fn decode_connect_packet(src: &mut Bytes, flags: u8) -> Result<Packet, DecodeError> {
    // undefined flag bits are ignored
    let flags = ConnectFlags::from_bits_truncate(flags);
    let clean_start = flags.contains(ConnectFlags::CLEAN_START);

    let keep_alive = u16::decode(src)?;
    let client_id = ByteString::decode(src)?;

    ensure!(!client_id.is_empty() || clean_start, DecodeError::InvalidClientId);

    let username = ByteString::decode(src)?;
    let password = Bytes::decode(src)?;
    ensure!(!src.has_remaining(), DecodeError::InvalidLength);

    Ok(Connect { clean_start, keep_alive, client_id, username, password }.into())
}

fn decode_connect_ack_packet(src: &mut Bytes, flags: u8) -> Result<Packet, DecodeError> {
    let flags = ConnectAckFlags::from_bits_truncate(flags);
    ensure!(src.remaining() >= 1, DecodeError::InvalidLength);
    let reason = src.get_u8().try_into()?;
    ensure!(!src.has_remaining(), DecodeError::InvalidLength);
    Ok(Packet::ConnectAck(ConnectAck {
        reason,
        session_present: flags.contains(ConnectAckFlags::SESSION_PRESENT),
    }))
}

fn decode_publish_body(src: &mut Bytes, flags: u8) -> Result<Publish, DecodeError> {
    let topic = ByteString::decode(src)?;
    let qos = QoS::try_from(flags & 0b0011)?; // QoS 2 and 3 are malformed
    let packet_id = if qos == QoS::AtMostOnce {
        None
    } else {
        Some(NonZeroU16::decode(src)?) // packet id = 0 encountered
    };

    Ok(Publish {
        dup: (flags & 0b0100) == 0b0100,
        qos,
        retain: (flags & 0b1000) == 0b1000,
        topic,
        packet_id,
        payload: src.split_off(0),
        create_time: Some(timestamp_millis()),
    })
}

fn decode_subscribe_packet(src: &mut Bytes, flags: u8) -> Result<Packet, DecodeError> {
    let qos = QoS::try_from(flags & 0b0011)?;
    let packet_id = if qos == QoS::AtMostOnce { None } else { Some(NonZeroU16::decode(src)?) };
    let topic = ByteString::decode(src)?;
    ensure!(!src.has_remaining(), DecodeError::InvalidLength);

    Ok(Packet::Subscribe { packet_id, topic, qos })
}

fn decode_subscribe_ack_packet(src: &mut Bytes) -> Result<Packet, DecodeError> {
    let packet_id = NonZeroU16::decode(src)?;
    ensure!(src.remaining() == 1, DecodeError::InvalidLength);
    let code = src.get_u8();
    let status = if code == 0x80 {
        SubscribeReturnCode::Failure
    } else {
        SubscribeReturnCode::Success(QoS::try_from(code)?)
    };
    Ok(Packet::SubscribeAck { packet_id, status })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::ConnectAckReason;
    use crate::utils::decode_variable_length;

    macro_rules! assert_decode_packet (
        ($bytes:expr, $res:expr) => {{
            let first_byte = $bytes.as_ref()[0];
            let (_len, consumed) = decode_variable_length(&$bytes[1..]).unwrap().unwrap();
            let cur = Bytes::from_static(&$bytes[consumed + 1..]);
            assert_eq!(decode_packet(cur, first_byte).unwrap(), $res);
        }};
    );

    fn packet_id(v: u16) -> NonZeroU16 {
        NonZeroU16::new(v).unwrap()
    }

    #[test]
    fn test_decode_connect_packets() {
        assert_decode_packet!(
            b"\x10\x15\x00\x3C\x00\x0512345\x00\x04user\x00\x04pass",
            Packet::Connect(Box::new(Connect {
                clean_start: false,
                keep_alive: 60,
                client_id: ByteString::from_static("12345"),
                username: ByteString::from_static("user"),
                password: Bytes::from_static(b"pass"),
            }))
        );

        // clean start bit; empty username means anonymous
        assert_decode_packet!(
            b"\x11\x0D\x00\x3C\x00\x0512345\x00\x00\x00\x00",
            Packet::Connect(Box::new(Connect {
                clean_start: true,
                keep_alive: 60,
                client_id: ByteString::from_static("12345"),
                username: ByteString::new(),
                password: Bytes::new(),
            }))
        );

        // empty client id is only allowed together with clean start
        assert_eq!(
            decode_connect_packet(&mut Bytes::from_static(b"\x00\x3C\x00\x00\x00\x00\x00\x00"), 0)
                .map_err(|e| matches!(e, DecodeError::InvalidClientId)),
            Err(true),
        );
        assert!(decode_connect_packet(
            &mut Bytes::from_static(b"\x00\x3C\x00\x00\x00\x00\x00\x00"),
            0b0001
        )
        .is_ok());

        // undefined flag bits are ignored
        assert_eq!(
            decode_connect_packet(
                &mut Bytes::from_static(b"\x00\x3C\x00\x0512345\x00\x00\x00\x00"),
                0b1110
            )
            .unwrap(),
            Packet::Connect(Box::new(Connect {
                clean_start: false,
                keep_alive: 60,
                client_id: ByteString::from_static("12345"),
                username: ByteString::new(),
                password: Bytes::new(),
            }))
        );

        assert_decode_packet!(
            b"\x21\x01\x01",
            Packet::ConnectAck(ConnectAck {
                session_present: true,
                reason: ConnectAckReason::BadCredentials,
            })
        );
        assert_decode_packet!(
            b"\x20\x01\x00",
            Packet::ConnectAck(ConnectAck {
                session_present: false,
                reason: ConnectAckReason::Accepted,
            })
        );
        // unknown reason byte
        assert_eq!(
            decode_connect_ack_packet(&mut Bytes::from_static(b"\x05"), 0)
                .map_err(|e| matches!(e, DecodeError::MalformedPacket)),
            Err(true)
        );

        assert_decode_packet!(b"\x90\x00", Packet::Disconnect);
    }

    #[test]
    fn test_decode_publish_packets() {
        let publish = |dup, retain, qos, packet_id, payload: &'static [u8]| Publish {
            dup,
            retain,
            qos,
            topic: ByteString::from_static("topic"),
            packet_id,
            payload: Bytes::from_static(payload),
            create_time: None,
        };

        // create_time is stamped during decode, compare without it
        let strip = |p: Packet| match p {
            Packet::Publish(mut v) => {
                v.create_time = None;
                Packet::Publish(v)
            }
            Packet::Queue(mut v) => {
                v.create_time = None;
                Packet::Queue(v)
            }
            other => other,
        };

        assert_eq!(
            strip(decode_packet(Bytes::from_static(b"\x00\x05topic\x43\x21data"), 0x3d).unwrap()),
            Packet::Publish(publish(true, true, QoS::AtLeastOnce, Some(packet_id(0x4321)), b"data"))
        );
        assert_eq!(
            strip(decode_packet(Bytes::from_static(b"\x00\x05topicdata"), 0x30).unwrap()),
            Packet::Publish(publish(false, false, QoS::AtMostOnce, None, b"data"))
        );
        assert_eq!(
            strip(decode_packet(Bytes::from_static(b"\x00\x05topic\x43\x21data"), 0xa1).unwrap()),
            Packet::Queue(publish(false, false, QoS::AtLeastOnce, Some(packet_id(0x4321)), b"data"))
        );

        // QoS 2 and 3 are rejected
        assert_eq!(
            decode_packet(Bytes::from_static(b"\x00\x05topicdata"), 0x32)
                .map_err(|e| matches!(e, DecodeError::MalformedPacket)),
            Err(true)
        );
        assert_eq!(
            decode_packet(Bytes::from_static(b"\x00\x05topicdata"), 0x33)
                .map_err(|e| matches!(e, DecodeError::MalformedPacket)),
            Err(true)
        );

        // packet id 0 on a QoS 1 frame
        assert_eq!(
            decode_packet(Bytes::from_static(b"\x00\x05topic\x00\x00data"), 0x31)
                .map_err(|e| matches!(e, DecodeError::MalformedPacket)),
            Err(true)
        );

        assert_decode_packet!(b"\x40\x02\x43\x21", Packet::PublishAck { packet_id: packet_id(0x4321) });
        // trailing bytes after a puback id
        assert_eq!(
            decode_packet(Bytes::from_static(b"\x43\x21\x00"), 0x40)
                .map_err(|e| matches!(e, DecodeError::InvalidLength)),
            Err(true)
        );
    }

    #[test]
    fn test_decode_subscribe_packets() {
        assert_decode_packet!(
            b"\x51\x08\x12\x34\x00\x04test",
            Packet::Subscribe {
                packet_id: Some(packet_id(0x1234)),
                topic: ByteString::from_static("test"),
                qos: QoS::AtLeastOnce,
            }
        );
        assert_decode_packet!(
            b"\x50\x06\x00\x04test",
            Packet::Subscribe {
                packet_id: None,
                topic: ByteString::from_static("test"),
                qos: QoS::AtMostOnce,
            }
        );

        assert_decode_packet!(
            b"\x60\x03\x12\x34\x01",
            Packet::SubscribeAck {
                packet_id: packet_id(0x1234),
                status: SubscribeReturnCode::Success(QoS::AtLeastOnce),
            }
        );
        assert_decode_packet!(
            b"\x60\x03\x12\x34\x80",
            Packet::SubscribeAck { packet_id: packet_id(0x1234), status: SubscribeReturnCode::Failure }
        );
    }

    #[test]
    fn test_decode_ping_packets() {
        assert_decode_packet!(b"\x70\x00", Packet::PingRequest);
        assert_decode_packet!(b"\x80\x00", Packet::PingResponse);
    }

    #[test]
    fn test_decode_unknown_commands() {
        assert_eq!(
            decode_packet(Bytes::new(), 0x00)
                .map_err(|e| matches!(e, DecodeError::UnsupportedCommandCode)),
            Err(true)
        );
        for first_byte in [0xb0u8, 0xc0, 0xd0, 0xe0, 0xf0] {
            assert_eq!(
                decode_packet(Bytes::new(), first_byte)
                    .map_err(|e| matches!(e, DecodeError::UnsupportedCommandCode)),
                Err(true)
            );
        }
    }
}
