// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

use crate::topic::validate_pub_topic;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, QoS,
};

/// Publish packet is sent from a Client to a Server or from a Server to a Client to transport
/// an application message.
///
/// Basic packet structure:
/// ```txt
///  7                          0
/// +----------------------------+
/// | Fixed header               |
/// |                            |
/// +----------------------------+
/// | Topic name length          |
/// |                            |
/// +----------------------------+
/// | Topic name ...             |
/// +----------------------------+
/// | Packet id (QoS 1/2 only)   |
/// |                            |
/// +----------------------------+
/// | Payload ...                |
/// +----------------------------+
/// ```
///
/// The packet id field is only present when `qos` is `AtLeastOnce` or `ExactOnce`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublishPacket {
    dup: bool,
    qos: QoS,
    retain: bool,
    topic: String,
    packet_id: PacketId,
    payload: Vec<u8>,
}

impl PublishPacket {
    /// # Errors
    ///
    /// Returns error if `topic` contains wildcard characters.
    pub fn new(topic: &str, qos: QoS, payload: &[u8]) -> Result<Self, DecodeError> {
        validate_pub_topic(topic).map_err(|_err| DecodeError::InvalidTopic)?;
        Ok(Self {
            dup: false,
            qos,
            retain: false,
            topic: topic.to_string(),
            packet_id: 0,
            payload: payload.to_vec(),
        })
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub fn dup(&self) -> bool {
        self.dup
    }

    pub fn set_dup(&mut self, dup: bool) -> &mut Self {
        self.dup = dup;
        self
    }

    #[must_use]
    pub fn retain(&self) -> bool {
        self.retain
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        let (dup, qos, retain) = match fixed_header.packet_type() {
            PacketType::Publish { dup, qos, retain } => (dup, qos, retain),
            _ => return Err(DecodeError::InvalidPacketType),
        };

        let mut consumed = 0;
        let topic_len = ba.read_u16()? as usize;
        consumed += 2 + topic_len;
        let topic = ba.read_string(topic_len)?;
        validate_pub_topic(&topic).map_err(|_err| DecodeError::InvalidTopic)?;

        let packet_id = if qos == QoS::AtMostOnce {
            0
        } else {
            consumed += 2;
            ba.read_u16()?
        };

        if consumed > fixed_header.remaining_length() {
            return Err(DecodeError::InvalidRemainingLength);
        }
        let payload_len = fixed_header.remaining_length() - consumed;
        let payload = ba.read_bytes(payload_len)?.to_vec();

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            payload,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let mut remaining_length = 2 + self.topic.len() + self.payload.len();
        if self.qos != QoS::AtMostOnce {
            remaining_length += 2;
        }

        let fixed_header = FixedHeader::new(
            PacketType::Publish {
                dup: self.dup,
                qos: self.qos,
                retain: self.retain,
            },
            remaining_length,
        )?;
        fixed_header.encode(buf)?;

        buf.write_u16::<BigEndian>(self.topic.len() as u16)?;
        buf.write_all(self.topic.as_bytes())?;
        if self.qos != QoS::AtMostOnce {
            buf.write_u16::<BigEndian>(self.packet_id)?;
        }
        buf.write_all(&self.payload)?;

        Ok(buf.len() - old_len)
    }
}
