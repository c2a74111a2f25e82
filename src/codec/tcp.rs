use crate::common::SlaveId;
use crate::error::Failure;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Transaction id, protocol id and length; the unit id follows.
pub const MBAP_PREFIX_LEN: usize = 6;
pub const MBAP_HEADER_LEN: usize = 7;
pub const MAX_PDU_LEN: usize = 253;

//Protocol Identifier: 0u16 means Modbus
const MODBUS_PROTOCOL_ID: u16 = 0;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Frame {
    pub transaction_id: u16,
    pub unit_id: SlaveId,
    pub pdu: Vec<u8>,
}

pub fn encode(unit_id: SlaveId, pdu: &[u8], transaction_id: u16) -> Vec<u8> {
    let mut result = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());

    // Writes into a Vec can't fail
    let _ = result.write_u16::<BigEndian>(transaction_id);
    let _ = result.write_u16::<BigEndian>(MODBUS_PROTOCOL_ID);
    let _ = result.write_u16::<BigEndian>(pdu.len() as u16 + 1);
    result.push(unit_id);
    result.extend_from_slice(pdu);

    result
}

pub fn decode(data: &[u8]) -> Result<Frame, Failure> {
    if data.len() < MBAP_HEADER_LEN {
        return Err(Failure::framing(format!(
            "Not enough bytes to form an mbap: {} bytes",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let transaction_id = read_u16(&mut cursor)?;
    let protocol_id = read_u16(&mut cursor)?;
    let length = read_u16(&mut cursor)? as usize;
    let unit_id = cursor.read_u8().map_err(|_| short_header())?;

    if protocol_id != MODBUS_PROTOCOL_ID {
        return Err(Failure::framing(format!(
            "Unexpected protocol id {:#06x}",
            protocol_id
        )));
    }

    let remaining = data.len() - MBAP_PREFIX_LEN;
    if length != remaining {
        return Err(Failure::framing(format!(
            "Declared length {} doesn't match the {} bytes that follow",
            length, remaining
        )));
    }

    Ok(Frame {
        transaction_id,
        unit_id,
        pdu: data[MBAP_HEADER_LEN..].to_vec(),
    })
}

/// Total size of the frame starting at the head of `buffer`, once enough of the
/// header is buffered to tell. Headers that can never lead to a valid frame are
/// rejected straight away.
pub fn expected_frame_len(buffer: &[u8]) -> Result<Option<usize>, Failure> {
    if buffer.len() < MBAP_PREFIX_LEN {
        return Ok(None);
    }

    let protocol_id = u16::from_be_bytes([buffer[2], buffer[3]]);
    if protocol_id != MODBUS_PROTOCOL_ID {
        return Err(Failure::framing(format!(
            "Unexpected protocol id {:#06x}",
            protocol_id
        )));
    }

    let length = u16::from_be_bytes([buffer[4], buffer[5]]) as usize;
    if !(2..=MAX_PDU_LEN + 1).contains(&length) {
        return Err(Failure::framing(format!(
            "Declared length {} is outside 2..={}",
            length,
            MAX_PDU_LEN + 1
        )));
    }

    Ok(Some(MBAP_PREFIX_LEN + length))
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, Failure> {
    cursor.read_u16::<BigEndian>().map_err(|_| short_header())
}

fn short_header() -> Failure {
    Failure::framing("Not enough bytes to form an mbap")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::FailureKind;

    fn test_frame_round_trip(unit_id: u8, transaction_id: u16, pdu: Vec<u8>) {
        let bytes = encode(unit_id, &pdu, transaction_id);
        assert_eq!(bytes.len(), MBAP_HEADER_LEN + pdu.len());

        let frame = decode(&bytes).unwrap();
        assert_eq!(
            frame,
            Frame {
                transaction_id,
                unit_id,
                pdu
            }
        );
    }

    #[test]
    fn test_read_requests_round_trip() {
        test_frame_round_trip(1, 1, vec![0x01, 0x00, 0xFF, 0x00, 0x20]);
        test_frame_round_trip(3, 0xFFFF, vec![0x02, 0x00, 0x00, 0x07, 0xD0]);
        test_frame_round_trip(0xFF, 0, vec![0x03, 0x00, 0x0A, 0x00, 0x02]);
        test_frame_round_trip(17, 0x1234, vec![0x04, 0xFF, 0xFF, 0x00, 0x01]);
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encode(1, &[0x03, 0x00, 0x0A, 0x00, 0x02], 0x0102);
        assert_eq!(
            bytes,
            vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x0A, 0x00, 0x02]
        );
    }

    #[test]
    fn test_decode_too_short() {
        let error = decode(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x01]).unwrap_err();
        assert_eq!(error.kind(), FailureKind::Framing);
    }

    #[test]
    fn test_decode_wrong_protocol() {
        let error = decode(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x02, 0x01, 0x03]).unwrap_err();
        assert_eq!(error.kind(), FailureKind::Framing);
    }

    #[test]
    fn test_decode_length_mismatch_is_never_truncated_or_padded() {
        let mut bytes = encode(1, &[0x03, 0x02, 0x00, 0x01], 7);

        bytes.push(0xAA);
        assert_eq!(decode(&bytes).unwrap_err().kind(), FailureKind::Framing);

        bytes.truncate(bytes.len() - 2);
        assert_eq!(decode(&bytes).unwrap_err().kind(), FailureKind::Framing);
    }

    #[test]
    fn test_expected_frame_len() {
        assert_eq!(expected_frame_len(&[0x00, 0x01, 0x00]), Ok(None));
        assert_eq!(
            expected_frame_len(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x05]),
            Ok(Some(11))
        );
        assert!(expected_frame_len(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00]).is_err());
        assert!(expected_frame_len(&[0x00, 0x01, 0x00, 0x00, 0x01, 0x00]).is_err());
        assert!(expected_frame_len(&[0x00, 0x01, 0xAB, 0xCD, 0x00, 0x05]).is_err());
    }
}
