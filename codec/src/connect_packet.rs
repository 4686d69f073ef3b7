// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::convert::TryFrom;
use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

use crate::connect_flags::ConnectFlags;
use crate::protocol_level::ProtocolLevel;
use crate::utils::{validate_client_id, validate_two_bytes_data, validate_utf8_string};
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType, QoS,
    PROTOCOL_NAME,
};

/// `ConnectPacket` consists of three parts:
/// * `FixedHeader`
/// * Variable header
/// * Payload
///
/// Basic struct of `ConnectPacket` is as below:
/// ```txt
///  7                          0
/// +----------------------------+
/// | Fixed header               |
/// |                            |
/// +----------------------------+
/// | Protocol level             |
/// +----------------------------+
/// | Connect flags              |
/// +----------------------------+
/// | Keep alive                 |
/// |                            |
/// +----------------------------+
/// | Client id length           |
/// |                            |
/// +----------------------------+
/// | Client id string ...       |
/// +----------------------------+
/// | Will topic length          |
/// |                            |
/// +----------------------------+
/// | Will topic string ...      |
/// +----------------------------+
/// | Will message length        |
/// |                            |
/// +----------------------------+
/// | Will message bytes ...     |
/// +----------------------------+
/// | Username length            |
/// |                            |
/// +----------------------------+
/// | Username string ...        |
/// +----------------------------+
/// | Password length            |
/// |                            |
/// +----------------------------+
/// | Password bytes ...         |
/// +----------------------------+
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectPacket {
    /// Protocol name can only be `MQTT` in specification.
    protocol_name: String,
    protocol_level: ProtocolLevel,
    connect_flags: ConnectFlags,

    /// Time interval between two packets in seconds.
    /// Client must send `PingRequest` Packet before exceeding this interval.
    /// If this value is not zero and time exceeds after last packet, the Server
    /// will disconnect the network.
    ///
    /// If this value is zero, the Server is not required to disconnect the network.
    keep_alive: u16,

    /// Payload is `client_id`.
    /// `client_id` is generated in client side. Normally it can be `device_id` or just
    /// randomly generated string.
    /// `client_id` is used to identify client connections in server. Session is based on this
    /// field. It must be valid UTF-8 string, length shall be between 1 and 23 bytes.
    /// If `client_id` is invalid, the Server will reply `ConnectAck` Packet with return code
    /// 0x02 (Identifier rejected).
    client_id: String,

    /// If the `will` flag is true in `connect_flags`, then `will_topic` field must be set.
    /// It will be used as the topic of Will Message.
    will_topic: String,

    /// If the `will` flag is true in `connect_flags`, then `will_message` field must be set.
    /// It will be used as the payload of Will Message.
    will_message: Vec<u8>,

    /// If the `has_username` flag is true in `connect_flags`, then `username` field must be set.
    username: String,

    /// If the `has_password` flag is true in `connect_flags`, then `password` field must be set.
    password: Vec<u8>,
}

impl ConnectPacket {
    #[must_use]
    pub fn new(client_id: &str) -> Self {
        Self {
            protocol_name: PROTOCOL_NAME.to_string(),
            keep_alive: 60,
            client_id: client_id.to_string(),
            ..Self::default()
        }
    }

    pub fn set_client_id(&mut self, id: &str) -> Result<&mut Self, DecodeError> {
        validate_client_id(id)?;
        self.client_id.clear();
        self.client_id.push_str(id);
        Ok(self)
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    #[must_use]
    pub fn connect_flags(&self) -> &ConnectFlags {
        &self.connect_flags
    }

    #[must_use]
    pub fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.connect_flags.set_clean_session(clean_session);
        self
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        self.connect_flags.set_will_qos(qos);
        self
    }

    pub fn set_username(&mut self, username: &str) -> Result<&mut Self, DecodeError> {
        validate_utf8_string(username)?;
        self.connect_flags.set_has_username(!username.is_empty());
        self.username = username.to_string();
        Ok(self)
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn set_password(&mut self, password: &[u8]) -> Result<&mut Self, EncodeError> {
        validate_two_bytes_data(password)?;
        self.connect_flags.set_has_password(!password.is_empty());
        self.password = password.to_vec();
        Ok(self)
    }

    #[must_use]
    pub fn password(&self) -> &[u8] {
        &self.password
    }

    pub fn set_will_topic(&mut self, topic: &str) -> Result<&mut Self, DecodeError> {
        validate_utf8_string(topic)?;
        self.connect_flags.set_will(!topic.is_empty());
        self.will_topic = topic.to_string();
        Ok(self)
    }

    #[must_use]
    pub fn will_topic(&self) -> &str {
        &self.will_topic
    }

    pub fn set_will_message(&mut self, message: &[u8]) -> Result<&mut Self, EncodeError> {
        validate_two_bytes_data(message)?;
        self.will_message = message.to_vec();
        Ok(self)
    }

    #[must_use]
    pub fn will_message(&self) -> &[u8] {
        &self.will_message
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let mut remaining_length = 2 // protocol_name_len
            + self.protocol_name.len() // b"MQTT" protocol name
            + 1 // protocol_level
            + 1 // connect_flags
            + 2 // keep_alive
            + 2 // client_id_len
            + self.client_id.len();

        if self.connect_flags.will() {
            remaining_length += 2 + self.will_topic.len();
            remaining_length += 2 + self.will_message.len();
        }
        if self.connect_flags.has_username() {
            remaining_length += 2 + self.username.len();
        }
        if self.connect_flags.has_password() {
            remaining_length += 2 + self.password.len();
        }

        let fixed_header = FixedHeader::new(PacketType::Connect, remaining_length)?;
        fixed_header.encode(v)?;

        // Variable header
        v.write_u16::<BigEndian>(self.protocol_name.len() as u16)?;
        v.write_all(self.protocol_name.as_bytes())?;
        self.protocol_level.encode(v)?;
        self.connect_flags.encode(v)?;
        v.write_u16::<BigEndian>(self.keep_alive)?;

        // Payload
        v.write_u16::<BigEndian>(self.client_id.len() as u16)?;
        v.write_all(self.client_id.as_bytes())?;
        if self.connect_flags.will() {
            v.write_u16::<BigEndian>(self.will_topic.len() as u16)?;
            v.write_all(self.will_topic.as_bytes())?;

            v.write_u16::<BigEndian>(self.will_message.len() as u16)?;
            v.write_all(&self.will_message)?;
        }
        if self.connect_flags.has_username() {
            v.write_u16::<BigEndian>(self.username.len() as u16)?;
            v.write_all(self.username.as_bytes())?;
        }
        if self.connect_flags.has_password() {
            v.write_u16::<BigEndian>(self.password.len() as u16)?;
            v.write_all(&self.password)?;
        }

        Ok(v.len() - old_len)
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name_len = ba.read_u16()? as usize;
        let protocol_name = ba.read_string(protocol_name_len)?;
        if protocol_name != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }

        let protocol_level = ProtocolLevel::try_from(ba.read_byte()?)?;
        let connect_flags = ConnectFlags::decode(ba)?;
        let keep_alive = ba.read_u16()?;

        let client_id_len = ba.read_u16()? as usize;
        let client_id = ba.read_string(client_id_len)?;
        validate_client_id(&client_id)?;

        let will_topic = if connect_flags.will() {
            let will_topic_len = ba.read_u16()? as usize;
            ba.read_string(will_topic_len)?
        } else {
            String::new()
        };
        let will_message = if connect_flags.will() {
            let will_message_len = ba.read_u16()? as usize;
            ba.read_bytes(will_message_len)?.to_vec()
        } else {
            Vec::new()
        };

        let username = if connect_flags.has_username() {
            let username_len = ba.read_u16()? as usize;
            ba.read_string(username_len)?
        } else {
            String::new()
        };

        let password = if connect_flags.has_password() {
            let password_len = ba.read_u16()? as usize;
            ba.read_bytes(password_len)?.to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            protocol_name,
            protocol_level,
            keep_alive,
            connect_flags,
            client_id,
            will_topic,
            will_message,
            username,
            password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let buf: Vec<u8> = vec![
            16, 20, 0, 4, 77, 81, 84, 84, 4, 2, 0, 60, 0, 8, 119, 118, 80, 84, 88, 99, 67, 119,
        ];
        let mut ba = ByteArray::new(&buf);
        let packet = ConnectPacket::decode(&mut ba);
        assert!(packet.is_ok());
        let packet = packet.unwrap();
        assert_eq!(packet.client_id(), "wvPTXcCw");
    }
}
