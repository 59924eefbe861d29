use bytes::{BufMut, BytesMut};

use crate::error::EncodeError;
use crate::types::{command, Publish, QoS};
use crate::utils::{write_variable_length, Encode};

use super::packet::*;

pub(crate) fn get_encoded_publish_size(p: &Publish) -> usize {
    // Topic + Packet Id + Payload
    if p.qos == QoS::AtLeastOnce {
        4 + p.topic.len() + p.payload.len()
    } else {
        2 + p.topic.len() + p.payload.len()
    }
}

pub(crate) fn get_encoded_size(packet: &Packet) -> usize {
    match *packet {
        Packet::Connect(ref connect) => {
            let Connect { ref client_id, ref username, ref password, .. } = **connect;

            // Keep Alive + Client Id + Username + Password
            2 + 2 + client_id.len() + 2 + username.len() + 2 + password.len()
        }

        Packet::ConnectAck { .. } => 1, // Reason Code
        Packet::Publish(ref publish) | Packet::Queue(ref publish) => get_encoded_publish_size(publish),
        Packet::PublishAck { .. } => 2, // Packet Id
        Packet::Subscribe { packet_id, ref topic, .. } => {
            if packet_id.is_some() {
                4 + topic.len()
            } else {
                2 + topic.len()
            }
        }
        Packet::SubscribeAck { .. } => 3, // Packet Id + Status

        Packet::PingRequest | Packet::PingResponse | Packet::Disconnect => 0,
    }
}

#[inline]
fn publish_first_byte(code: u8, publish: &Publish) -> u8 {
    (code << 4)
        | u8::from(publish.qos)
        | ((publish.dup as u8) << 2)
        | ((publish.retain as u8) << 3)
}

fn encode_publish_body(publish: &Publish, dst: &mut BytesMut) -> Result<(), EncodeError> {
    publish.topic.encode(dst)?;
    if publish.qos == QoS::AtMostOnce {
        if publish.packet_id.is_some() {
            return Err(EncodeError::MalformedPacket); // packet id must not be set
        }
    } else {
        publish.packet_id.ok_or(EncodeError::PacketIdRequired)?.encode(dst)?;
    }
    dst.put(publish.payload.as_ref());
    Ok(())
}

pub(crate) fn encode(packet: &Packet, dst: &mut BytesMut, content_size: u32) -> Result<(), EncodeError> {
    match packet {
        Packet::Connect(connect) => {
            dst.put_u8((command::CONNECT << 4) | (connect.clean_start as u8));
            write_variable_length(content_size, dst);
            dst.put_u16(connect.keep_alive);
            connect.client_id.encode(dst)?;
            connect.username.encode(dst)?;
            connect.password.encode(dst)?;
        }
        Packet::ConnectAck(ack) => {
            dst.put_u8((command::CONNACK << 4) | (ack.session_present as u8));
            write_variable_length(content_size, dst);
            dst.put_u8(u8::from(ack.reason));
        }
        Packet::Publish(publish) => {
            dst.put_u8(publish_first_byte(command::PUBLISH, publish));
            write_variable_length(content_size, dst);
            encode_publish_body(publish, dst)?;
        }
        Packet::Queue(publish) => {
            dst.put_u8(publish_first_byte(command::QUEUE, publish));
            write_variable_length(content_size, dst);
            encode_publish_body(publish, dst)?;
        }

        Packet::PublishAck { packet_id } => {
            dst.put_u8(command::PUBACK << 4);
            write_variable_length(content_size, dst);
            packet_id.encode(dst)?;
        }
        Packet::Subscribe { packet_id, ref topic, qos } => {
            dst.put_u8((command::SUBSCRIBE << 4) | u8::from(*qos));
            write_variable_length(content_size, dst);
            if *qos == QoS::AtMostOnce {
                if packet_id.is_some() {
                    return Err(EncodeError::MalformedPacket); // packet id must not be set
                }
            } else {
                packet_id.ok_or(EncodeError::PacketIdRequired)?.encode(dst)?;
            }
            topic.encode(dst)?;
        }
        Packet::SubscribeAck { packet_id, ref status } => {
            dst.put_u8(command::SUBACK << 4);
            write_variable_length(content_size, dst);
            packet_id.encode(dst)?;
            dst.put_u8(match *status {
                SubscribeReturnCode::Success(qos) => qos.into(),
                SubscribeReturnCode::Failure => 0x80u8,
            });
        }
        Packet::PingRequest => dst.put_slice(&[command::PING << 4, 0]),
        Packet::PingResponse => dst.put_slice(&[command::PONG << 4, 0]),
        Packet::Disconnect => dst.put_slice(&[command::DISCONNECT << 4, 0]),
    }

    Ok(())
}
