//! MQTT 3.1.1 (v4) packets.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::types::QoS;

use super::codec::{
    read_binary, read_string, read_u16, read_u8, write_binary, write_fixed_header, write_string,
    PacketType,
};
use super::{Frame, PROTOCOL_LEVEL, PROTOCOL_NAME};

/// MQTT 3.1.1 packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    PubRec(PubRec),
    PubRel(PubRel),
    PubComp(PubComp),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect,
}

/// CONNECT packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub will: Option<Will>,
}

/// Last Will and Testament.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// CONNACK return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Success = 0,
    RefusedProtocolVersion = 1,
    BadClientId = 2,
    ServiceUnavailable = 3,
    BadUserNamePassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => ConnectReturnCode::Success,
            1 => ConnectReturnCode::RefusedProtocolVersion,
            2 => ConnectReturnCode::BadClientId,
            3 => ConnectReturnCode::ServiceUnavailable,
            4 => ConnectReturnCode::BadUserNamePassword,
            5 => ConnectReturnCode::NotAuthorized,
            _ => return None,
        })
    }
}

/// CONNACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub code: ConnectReturnCode,
}

/// PUBLISH packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Packet identifier, 0 for QoS 0.
    pub pkid: u16,
}

/// PUBACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub pkid: u16,
}

/// PUBREC packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubRec {
    pub pkid: u16,
}

/// PUBREL packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubRel {
    pub pkid: u16,
}

/// PUBCOMP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubComp {
    pub pkid: u16,
}

/// SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub pkid: u16,
    pub filters: Vec<SubscribeFilter>,
}

/// Subscribe filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeFilter {
    pub path: String,
    pub qos: QoS,
}

/// SUBACK packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub pkid: u16,
    pub return_codes: Vec<SubscribeReasonCode>,
}

/// Subscribe reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReasonCode {
    Success(QoS),
    Failure,
}

impl SubscribeReasonCode {
    pub fn from_u8(value: u8) -> Self {
        match QoS::from_u8(value) {
            Some(qos) => SubscribeReasonCode::Success(qos),
            None => SubscribeReasonCode::Failure,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            SubscribeReasonCode::Success(qos) => qos as u8,
            SubscribeReasonCode::Failure => 0x80,
        }
    }
}

/// UNSUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub pkid: u16,
    pub topics: Vec<String>,
}

/// UNSUBACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAck {
    pub pkid: u16,
}

// ============================================================================
// Packet parsing
// ============================================================================

impl Packet {
    /// Decode the body of a framed packet.
    pub fn decode(frame: Frame) -> Result<Packet> {
        let packet_type = PacketType::from_u8(frame.header >> 4)
            .ok_or_else(|| Error::Protocol(format!("invalid packet type {}", frame.header >> 4)))?;
        let flags = frame.header & 0x0F;
        if let Some(required) = packet_type.required_flags() {
            if flags != required {
                return Err(Error::Protocol(format!(
                    "invalid flags {:#x} for {:?}",
                    flags, packet_type
                )));
            }
        }

        let mut body = frame.body;
        let packet = match packet_type {
            PacketType::Connect => Packet::Connect(Connect::read(&mut body)?),
            PacketType::ConnAck => Packet::ConnAck(ConnAck::read(&mut body)?),
            PacketType::Publish => Packet::Publish(Publish::read(flags, &mut body)?),
            PacketType::PubAck => Packet::PubAck(PubAck { pkid: read_u16(&mut body)? }),
            PacketType::PubRec => Packet::PubRec(PubRec { pkid: read_u16(&mut body)? }),
            PacketType::PubRel => Packet::PubRel(PubRel { pkid: read_u16(&mut body)? }),
            PacketType::PubComp => Packet::PubComp(PubComp { pkid: read_u16(&mut body)? }),
            PacketType::Subscribe => Packet::Subscribe(Subscribe::read(&mut body)?),
            PacketType::SubAck => Packet::SubAck(SubAck::read(&mut body)?),
            PacketType::Unsubscribe => Packet::Unsubscribe(Unsubscribe::read(&mut body)?),
            PacketType::UnsubAck => Packet::UnsubAck(UnsubAck { pkid: read_u16(&mut body)? }),
            PacketType::PingReq => Packet::PingReq,
            PacketType::PingResp => Packet::PingResp,
            PacketType::Disconnect => Packet::Disconnect,
        };

        if !body.is_empty() {
            return Err(Error::Protocol(format!(
                "{} trailing bytes after {}",
                body.len(),
                packet.name()
            )));
        }

        Ok(packet)
    }

    /// Append the encoded packet to `buf`. Returns the number of bytes
    /// written.
    pub fn write(&self, buf: &mut BytesMut) -> Result<usize> {
        let mut body = BytesMut::new();
        let (packet_type, flags) = match self {
            Packet::Connect(p) => {
                p.write_body(&mut body)?;
                (PacketType::Connect, 0)
            }
            Packet::ConnAck(p) => {
                body.put_u8(p.session_present as u8);
                body.put_u8(p.code as u8);
                (PacketType::ConnAck, 0)
            }
            Packet::Publish(p) => {
                p.write_body(&mut body)?;
                (PacketType::Publish, p.flags())
            }
            Packet::PubAck(p) => {
                body.put_u16(p.pkid);
                (PacketType::PubAck, 0)
            }
            Packet::PubRec(p) => {
                body.put_u16(p.pkid);
                (PacketType::PubRec, 0)
            }
            Packet::PubRel(p) => {
                body.put_u16(p.pkid);
                (PacketType::PubRel, 0x02)
            }
            Packet::PubComp(p) => {
                body.put_u16(p.pkid);
                (PacketType::PubComp, 0)
            }
            Packet::Subscribe(p) => {
                p.write_body(&mut body)?;
                (PacketType::Subscribe, 0x02)
            }
            Packet::SubAck(p) => {
                body.put_u16(p.pkid);
                for code in &p.return_codes {
                    body.put_u8(code.to_u8());
                }
                (PacketType::SubAck, 0)
            }
            Packet::Unsubscribe(p) => {
                body.put_u16(p.pkid);
                for topic in &p.topics {
                    write_string(&mut body, topic)?;
                }
                (PacketType::Unsubscribe, 0x02)
            }
            Packet::UnsubAck(p) => {
                body.put_u16(p.pkid);
                (PacketType::UnsubAck, 0)
            }
            Packet::PingReq => (PacketType::PingReq, 0),
            Packet::PingResp => (PacketType::PingResp, 0),
            Packet::Disconnect => (PacketType::Disconnect, 0),
        };

        let header_len = write_fixed_header(buf, packet_type, flags, body.len())?;
        buf.put_slice(&body);
        Ok(header_len + body.len())
    }

    /// Upper-case MQTT name of the packet, for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnAck(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PubAck(_) => "PUBACK",
            Packet::PubRec(_) => "PUBREC",
            Packet::PubRel(_) => "PUBREL",
            Packet::PubComp(_) => "PUBCOMP",
            Packet::Subscribe(_) => "SUBSCRIBE",
            Packet::SubAck(_) => "SUBACK",
            Packet::Unsubscribe(_) => "UNSUBSCRIBE",
            Packet::UnsubAck(_) => "UNSUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }

    /// Packet identifier of the acknowledgment family (PUBACK, PUBREC,
    /// PUBREL, PUBCOMP, SUBACK, UNSUBACK).
    pub fn ack_id(&self) -> Option<u16> {
        match self {
            Packet::PubAck(p) => Some(p.pkid),
            Packet::PubRec(p) => Some(p.pkid),
            Packet::PubRel(p) => Some(p.pkid),
            Packet::PubComp(p) => Some(p.pkid),
            Packet::SubAck(p) => Some(p.pkid),
            Packet::UnsubAck(p) => Some(p.pkid),
            _ => None,
        }
    }
}

// ============================================================================
// Individual packet implementations
// ============================================================================

impl Connect {
    fn read(buf: &mut Bytes) -> Result<Self> {
        let name = read_string(buf)?;
        if name.as_bytes() != PROTOCOL_NAME {
            return Err(Error::Protocol(format!("unknown protocol name {:?}", name)));
        }

        let level = read_u8(buf)?;
        if level != PROTOCOL_LEVEL {
            return Err(Error::Protocol(format!("unsupported protocol level {}", level)));
        }

        let flags = read_u8(buf)?;
        if flags & 0x01 != 0 {
            return Err(Error::Protocol("reserved connect flag set".to_string()));
        }
        let keep_alive = read_u16(buf)?;
        let client_id = read_string(buf)?;

        let will = if flags & 0x04 != 0 {
            let topic = read_string(buf)?;
            let payload = read_binary(buf)?;
            let qos = QoS::from_u8((flags >> 3) & 0x03)
                .ok_or_else(|| Error::Protocol("invalid will qos".to_string()))?;
            Some(Will {
                topic,
                payload,
                qos,
                retain: flags & 0x20 != 0,
            })
        } else {
            None
        };

        let username = if flags & 0x80 != 0 { Some(read_string(buf)?) } else { None };
        let password = if flags & 0x40 != 0 { Some(read_binary(buf)?) } else { None };

        Ok(Connect {
            client_id,
            keep_alive,
            clean_session: flags & 0x02 != 0,
            username,
            password,
            will,
        })
    }

    fn write_body(&self, buf: &mut BytesMut) -> Result<()> {
        write_binary(buf, PROTOCOL_NAME)?;
        buf.put_u8(PROTOCOL_LEVEL);

        let mut flags = 0u8;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(ref will) = self.will {
            flags |= 0x04 | ((will.qos as u8) << 3);
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        buf.put_u8(flags);
        buf.put_u16(self.keep_alive);
        write_string(buf, &self.client_id)?;

        if let Some(ref will) = self.will {
            write_string(buf, &will.topic)?;
            write_binary(buf, &will.payload)?;
        }
        if let Some(ref username) = self.username {
            write_string(buf, username)?;
        }
        if let Some(ref password) = self.password {
            write_binary(buf, password)?;
        }

        Ok(())
    }
}

impl ConnAck {
    fn read(buf: &mut Bytes) -> Result<Self> {
        let ack_flags = read_u8(buf)?;
        let raw = read_u8(buf)?;
        let code = ConnectReturnCode::from_u8(raw)
            .ok_or_else(|| Error::Protocol(format!("invalid connack return code {}", raw)))?;

        Ok(ConnAck {
            session_present: ack_flags & 0x01 != 0,
            code,
        })
    }
}

impl Publish {
    fn read(flags: u8, buf: &mut Bytes) -> Result<Self> {
        let dup = flags & 0x08 != 0;
        let qos = QoS::from_u8((flags >> 1) & 0x03)
            .ok_or_else(|| Error::Protocol("invalid publish qos 3".to_string()))?;
        let retain = flags & 0x01 != 0;

        let topic = read_string(buf)?;
        let pkid = if qos != QoS::AtMostOnce {
            let pkid = read_u16(buf)?;
            if pkid == 0 {
                return Err(Error::Protocol("publish with packet identifier 0".to_string()));
            }
            pkid
        } else {
            0
        };
        let payload = buf.split_off(0);

        Ok(Publish { topic, payload, qos, retain, dup, pkid })
    }

    fn flags(&self) -> u8 {
        let mut flags = (self.qos as u8) << 1;
        if self.dup {
            flags |= 0x08;
        }
        if self.retain {
            flags |= 0x01;
        }
        flags
    }

    fn write_body(&self, buf: &mut BytesMut) -> Result<()> {
        write_string(buf, &self.topic)?;
        if self.qos != QoS::AtMostOnce {
            buf.put_u16(self.pkid);
        }
        buf.put_slice(&self.payload);
        Ok(())
    }
}

impl Subscribe {
    fn read(buf: &mut Bytes) -> Result<Self> {
        let pkid = read_u16(buf)?;

        let mut filters = Vec::new();
        while !buf.is_empty() {
            let path = read_string(buf)?;
            let options = read_u8(buf)?;
            let qos = QoS::from_u8(options & 0x03)
                .ok_or_else(|| Error::Protocol("invalid subscription qos".to_string()))?;
            filters.push(SubscribeFilter { path, qos });
        }
        if filters.is_empty() {
            return Err(Error::Protocol("subscribe without filters".to_string()));
        }

        Ok(Subscribe { pkid, filters })
    }

    fn write_body(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(self.pkid);
        for filter in &self.filters {
            write_string(buf, &filter.path)?;
            buf.put_u8(filter.qos as u8);
        }
        Ok(())
    }
}

impl SubAck {
    fn read(buf: &mut Bytes) -> Result<Self> {
        let pkid = read_u16(buf)?;
        let return_codes = buf.iter().map(|&b| SubscribeReasonCode::from_u8(b)).collect();
        buf.clear();
        Ok(SubAck { pkid, return_codes })
    }
}

impl Unsubscribe {
    fn read(buf: &mut Bytes) -> Result<Self> {
        let pkid = read_u16(buf)?;

        let mut topics = Vec::new();
        while !buf.is_empty() {
            topics.push(read_string(buf)?);
        }

        Ok(Unsubscribe { pkid, topics })
    }
}

// ============================================================================
// Helper functions for creating packets
// ============================================================================

/// Create a CONNECT packet.
pub fn create_connect(
    client_id: &str,
    username: Option<&str>,
    password: Option<&[u8]>,
    keep_alive: u16,
    clean_session: bool,
    will: Option<Will>,
) -> Packet {
    Packet::Connect(Connect {
        client_id: client_id.to_string(),
        keep_alive,
        clean_session,
        username: username.map(|s| s.to_string()),
        password: password.map(Bytes::copy_from_slice),
        will,
    })
}

/// Create a PUBLISH packet. `pkid` is ignored for QoS 0.
pub fn create_publish(topic: &str, payload: Bytes, qos: QoS, pkid: u16, retain: bool) -> Packet {
    Packet::Publish(Publish {
        topic: topic.to_string(),
        payload,
        qos,
        retain,
        dup: false,
        pkid: if qos == QoS::AtMostOnce { 0 } else { pkid },
    })
}

/// Create a SUBSCRIBE packet.
pub fn create_subscribe(pkid: u16, filters: &[(&str, QoS)]) -> Packet {
    let filters = filters
        .iter()
        .map(|(path, qos)| SubscribeFilter {
            path: path.to_string(),
            qos: *qos,
        })
        .collect();
    Packet::Subscribe(Subscribe { pkid, filters })
}

/// Create an UNSUBSCRIBE packet.
pub fn create_unsubscribe(pkid: u16, topics: &[&str]) -> Packet {
    let topics = topics.iter().map(|t| t.to_string()).collect();
    Packet::Unsubscribe(Unsubscribe { pkid, topics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Framer;

    fn reparse(packet: &Packet) -> Packet {
        let mut buf = BytesMut::new();
        let written = packet.write(&mut buf).unwrap();
        assert_eq!(written, buf.len());

        let mut framer = Framer::new(1024 * 1024);
        framer.extend(&buf);
        let frame = framer.next_frame().unwrap().expect("complete frame");
        assert_eq!(framer.buffered(), 0);
        Packet::decode(frame).unwrap()
    }

    #[test]
    fn test_publish_qos2_wire_layout() {
        let packet = create_publish("a/b", Bytes::from_static(b"hi"), QoS::ExactlyOnce, 0x0102, true);
        let mut buf = BytesMut::new();
        packet.write(&mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[0x35, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x01, 0x02, b'h', b'i']
        );
        assert_eq!(reparse(&packet), packet);
    }

    #[test]
    fn test_ack_family() {
        for packet in [
            Packet::PubAck(PubAck { pkid: 1 }),
            Packet::PubRec(PubRec { pkid: 2 }),
            Packet::PubRel(PubRel { pkid: 3 }),
            Packet::PubComp(PubComp { pkid: 4 }),
            Packet::UnsubAck(UnsubAck { pkid: 5 }),
        ] {
            let mut buf = BytesMut::new();
            assert_eq!(packet.write(&mut buf).unwrap(), 4);
            assert_eq!(reparse(&packet), packet);
            assert!(packet.ack_id().is_some());
        }

        let mut buf = BytesMut::new();
        Packet::PubRel(PubRel { pkid: 0x1234 }).write(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x62, 0x02, 0x12, 0x34]);
    }

    #[test]
    fn test_connect_with_credentials() {
        let packet = create_connect("client-1", Some("user"), Some(b"pass"), 30, true, None);
        assert_eq!(reparse(&packet), packet);
    }

    #[test]
    fn test_connect_with_will() {
        let will = Will {
            topic: "status/client-1".to_string(),
            payload: Bytes::from_static(b"offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        let packet = create_connect("client-1", None, None, 30, true, Some(will.clone()));

        let mut buf = BytesMut::new();
        packet.write(&mut buf).unwrap();
        // will flag, will QoS 1, will retain, clean session
        assert_eq!(buf[9], 0x04 | 0x08 | 0x20 | 0x02);

        match reparse(&packet) {
            Packet::Connect(connect) => assert_eq!(connect.will, Some(will)),
            other => panic!("expected CONNECT, got {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_and_suback() {
        let packet = create_subscribe(9, &[("a/#", QoS::AtLeastOnce), ("b/+", QoS::ExactlyOnce)]);
        assert_eq!(reparse(&packet), packet);

        let suback = Packet::SubAck(SubAck {
            pkid: 9,
            return_codes: vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::Failure,
            ],
        });
        assert_eq!(reparse(&suback), suback);
    }

    #[test]
    fn test_rejects_bad_flags() {
        // PUBREL with flags 0 instead of 2.
        let frame = Frame { header: 0x60, body: Bytes::from_static(&[0x00, 0x01]) };
        assert!(matches!(Packet::decode(frame), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let frame = Frame { header: 0x40, body: Bytes::from_static(&[0x00, 0x01, 0x00]) };
        assert!(matches!(Packet::decode(frame), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_rejects_publish_qos3() {
        let frame = Frame { header: 0x36, body: Bytes::from_static(&[0x00, 0x01, b't', 0x00, 0x01]) };
        assert!(matches!(Packet::decode(frame), Err(Error::Protocol(_))));
    }
}
