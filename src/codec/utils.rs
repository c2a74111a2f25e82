use crate::common::{ModbusTable, ResponseData};
use crate::error::Failure;

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

pub fn expected_byte_count(table: ModbusTable, ammount: u16) -> usize {
    let ammount = ammount as usize;
    if table.is_bit_table() {
        ammount.div_ceil(8)
    } else {
        ammount * 2
    }
}

/// Byte count prefix followed by the packed values. Coils are packed LSB first,
/// any non-zero value is ON.
pub fn serialize_values(table: ModbusTable, values: &[u16]) -> Result<Vec<u8>, Failure> {
    if values.is_empty() {
        return Err(Failure::validation("At least one value must be sent"));
    }

    let byte_count = expected_byte_count(table, values.len() as u16);
    let byte_count = u8::try_from(byte_count).map_err(|_| {
        Failure::validation(format!("{} values don't fit in a single PDU", values.len()))
    })?;

    let mut result = Vec::with_capacity(byte_count as usize + 1);
    result.push(byte_count);

    if table.is_bit_table() {
        for chunk in values.chunks(8) {
            let mut aux_byte = 0u8;
            for (bit, value) in chunk.iter().enumerate() {
                if *value != 0 {
                    aux_byte |= 1 << bit;
                }
            }
            result.push(aux_byte);
        }
    } else {
        for value in values {
            result.extend_from_slice(&value.to_be_bytes());
        }
    }

    Ok(result)
}

/// Reads a byte count prefix and exactly `ammount` values from it. The byte
/// count has to be the one implied by `ammount`.
pub fn deserialize_values(
    table: ModbusTable,
    ammount: u16,
    data: &mut Cursor<&[u8]>,
) -> Result<ResponseData, Failure> {
    let byte_count = data.read_u8().map_err(|_| truncated())? as usize;

    let expected = expected_byte_count(table, ammount);
    if expected != byte_count {
        return Err(Failure::framing(format!(
            "Expected {} bytes for values, got {}",
            expected, byte_count
        )));
    }

    if table.is_bit_table() {
        let mut values = Vec::with_capacity(ammount as usize);
        let mut aux_byte = 0u8;
        for index in 0..ammount {
            if index % 8 == 0 {
                aux_byte = data.read_u8().map_err(|_| truncated())?;
            }
            values.push(aux_byte & 0b1 != 0);
            aux_byte >>= 1;
        }
        Ok(ResponseData::Bits(values))
    } else {
        let mut values = Vec::with_capacity(ammount as usize);
        for _ in 0..ammount {
            values.push(data.read_u16::<BigEndian>().map_err(|_| truncated())?);
        }
        Ok(ResponseData::Registers(values))
    }
}

pub fn ensure_consumed(data: &Cursor<&[u8]>) -> Result<(), Failure> {
    let position = data.position() as usize;
    let len = data.get_ref().len();

    if position != len {
        return Err(Failure::framing(format!(
            "Response too long, {} too many bytes",
            len - position
        )));
    }
    Ok(())
}

pub(crate) fn truncated() -> Failure {
    Failure::framing("Response payload is truncated")
}
