//! Static table of the supported function codes.
//!
//! Every entry carries the three rules a request goes through: `validate` runs
//! before anything touches the network, `encode` builds the request PDU and
//! `decode` turns the payload of a normal (non exception) response back into
//! [`ResponseData`].

use super::{FunctionCode, EXCEPTION_FLAG};
use crate::codec::utils::{deserialize_values, ensure_consumed, serialize_values, truncated};
use crate::common::{
    coil_from_representation, coil_representation, ModbusTable, Outcome, Request, ResponseData,
};
use crate::error::Failure;

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_COILS: u16 = 1968;
pub const MAX_WRITE_REGISTERS: u16 = 123;
pub const MAX_READ_WRITE_READ_REGISTERS: u16 = 125;
pub const MAX_READ_WRITE_WRITE_REGISTERS: u16 = 121;

type ValidateFn = fn(&FunctionSpec, &Request) -> Result<(), Failure>;
type EncodeFn = fn(&FunctionSpec, &Request) -> Result<Vec<u8>, Failure>;
type DecodeFn = fn(&FunctionSpec, &Request, &[u8]) -> Outcome;

pub struct FunctionSpec {
    pub code: FunctionCode,
    pub name: &'static str,
    pub validate: ValidateFn,
    pub encode: EncodeFn,
    pub decode: DecodeFn,
}

impl FunctionSpec {
    pub fn table(&self) -> ModbusTable {
        ModbusTable::get_table_from_function_code(self.code)
    }

    /// Whether the request carries a quantity to read.
    pub fn reads(&self) -> bool {
        matches!(
            self.code,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadMultipleHoldingRegisters
                | FunctionCode::ReadInputRegisters
                | FunctionCode::ReadWriteMultipleRegisters
        )
    }

    /// Whether the request carries values to write.
    pub fn writes(&self) -> bool {
        !self.reads() || self.code == FunctionCode::ReadWriteMultipleRegisters
    }

    fn code_byte(&self) -> u8 {
        self.code.into()
    }
}

pub static REGISTRY: [FunctionSpec; 9] = [
    FunctionSpec {
        code: FunctionCode::ReadCoils,
        name: "Read Coils",
        validate: validate_read_bits,
        encode: encode_read,
        decode: decode_read,
    },
    FunctionSpec {
        code: FunctionCode::ReadDiscreteInputs,
        name: "Read Discrete Inputs",
        validate: validate_read_bits,
        encode: encode_read,
        decode: decode_read,
    },
    FunctionSpec {
        code: FunctionCode::ReadMultipleHoldingRegisters,
        name: "Read Holding Registers",
        validate: validate_read_registers,
        encode: encode_read,
        decode: decode_read,
    },
    FunctionSpec {
        code: FunctionCode::ReadInputRegisters,
        name: "Read Input Registers",
        validate: validate_read_registers,
        encode: encode_read,
        decode: decode_read,
    },
    FunctionSpec {
        code: FunctionCode::WriteSingleCoil,
        name: "Write Single Coil",
        validate: validate_single_write,
        encode: encode_single_write,
        decode: decode_single_write_echo,
    },
    FunctionSpec {
        code: FunctionCode::WriteSingleHoldingRegister,
        name: "Write Single Register",
        validate: validate_single_write,
        encode: encode_single_write,
        decode: decode_single_write_echo,
    },
    FunctionSpec {
        code: FunctionCode::WriteMultipleCoils,
        name: "Write Multiple Coils",
        validate: validate_multiple_write,
        encode: encode_multiple_write,
        decode: decode_multiple_write_echo,
    },
    FunctionSpec {
        code: FunctionCode::WriteMultipleHoldingRegisters,
        name: "Write Multiple Registers",
        validate: validate_multiple_write,
        encode: encode_multiple_write,
        decode: decode_multiple_write_echo,
    },
    FunctionSpec {
        code: FunctionCode::ReadWriteMultipleRegisters,
        name: "Read/Write Multiple Registers",
        validate: validate_read_write,
        encode: encode_read_write,
        decode: decode_read,
    },
];

pub fn lookup(function_code: u8) -> Result<&'static FunctionSpec, Failure> {
    REGISTRY
        .iter()
        .find(|spec| spec.code_byte() == function_code)
        .ok_or(Failure::UnsupportedFunction(function_code.into()))
}

/// Validates `request` and builds its PDU, function code included.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, Failure> {
    let spec = lookup(request.function_code)?;
    (spec.validate)(spec, request)?;
    (spec.encode)(spec, request)
}

/// Interprets the PDU answering `request`. Exception responses short-circuit
/// before any payload decoding.
pub fn decode_response(request: &Request, pdu: &[u8]) -> Outcome {
    let (&raw_function_code, payload) = pdu
        .split_first()
        .ok_or_else(|| Failure::framing("Response PDU is empty"))?;

    if raw_function_code & EXCEPTION_FLAG != 0 {
        return Err(Failure::ModbusException {
            function: raw_function_code & !EXCEPTION_FLAG,
            code: payload.first().copied().unwrap_or(0),
        });
    }

    let spec = lookup(request.function_code)?;
    if raw_function_code != request.function_code {
        return Err(Failure::framing(format!(
            "Response carries function code {} for a {} request",
            raw_function_code, spec.name
        )));
    }

    (spec.decode)(spec, request, payload)
}

fn check_quantity(name: &str, what: &str, quantity: u16, max: u16) -> Result<(), Failure> {
    if quantity == 0 || quantity > max {
        return Err(Failure::validation(format!(
            "{}: {} must be between 1 and {}, got {}",
            name, what, max, quantity
        )));
    }
    Ok(())
}

fn check_range(name: &str, address: u16, quantity: u16) -> Result<(), Failure> {
    if address as u32 + quantity as u32 > 0x10000 {
        return Err(Failure::validation(format!(
            "{}: {} items starting at {} run past address 65535",
            name, quantity, address
        )));
    }
    Ok(())
}

fn value_count(spec: &FunctionSpec, request: &Request) -> Result<u16, Failure> {
    if request.values.is_empty() {
        return Err(Failure::validation(format!(
            "values must be specified for function code {}",
            spec.code_byte()
        )));
    }
    u16::try_from(request.values.len()).map_err(|_| {
        Failure::validation(format!("{}: too many values", spec.name))
    })
}

fn validate_read_bits(spec: &FunctionSpec, request: &Request) -> Result<(), Failure> {
    check_quantity(spec.name, "count", request.count, MAX_READ_BITS)?;
    check_range(spec.name, request.start_address, request.count)
}

fn validate_read_registers(spec: &FunctionSpec, request: &Request) -> Result<(), Failure> {
    check_quantity(spec.name, "count", request.count, MAX_READ_REGISTERS)?;
    check_range(spec.name, request.start_address, request.count)
}

fn validate_single_write(spec: &FunctionSpec, request: &Request) -> Result<(), Failure> {
    if request.values.len() != 1 {
        return Err(Failure::validation(format!(
            "values must contain exactly one value for function code {}, got {}",
            spec.code_byte(),
            request.values.len()
        )));
    }
    Ok(())
}

fn validate_multiple_write(spec: &FunctionSpec, request: &Request) -> Result<(), Failure> {
    let max = if spec.table().is_bit_table() {
        MAX_WRITE_COILS
    } else {
        MAX_WRITE_REGISTERS
    };
    let count = value_count(spec, request)?;
    check_quantity(spec.name, "count", count, max)?;
    check_range(spec.name, request.start_address, count)
}

fn validate_read_write(spec: &FunctionSpec, request: &Request) -> Result<(), Failure> {
    check_quantity(spec.name, "read count", request.count, MAX_READ_WRITE_READ_REGISTERS)?;
    check_range(spec.name, request.start_address, request.count)?;

    let write_count = value_count(spec, request)?;
    check_quantity(spec.name, "write count", write_count, MAX_READ_WRITE_WRITE_REGISTERS)?;
    check_range(spec.name, request.effective_write_address(), write_count)
}

fn encode_read(spec: &FunctionSpec, request: &Request) -> Result<Vec<u8>, Failure> {
    let mut read_query = Vec::with_capacity(5);

    //Function code
    read_query.push(spec.code_byte());

    //Starting Address
    read_query.extend_from_slice(&request.start_address.to_be_bytes());

    //Ammount
    read_query.extend_from_slice(&request.count.to_be_bytes());

    Ok(read_query)
}

fn single_write_representation(spec: &FunctionSpec, value: u16) -> u16 {
    if spec.table().is_bit_table() {
        coil_representation(value != 0)
    } else {
        value
    }
}

fn encode_single_write(spec: &FunctionSpec, request: &Request) -> Result<Vec<u8>, Failure> {
    let value = request
        .values
        .first()
        .copied()
        .ok_or_else(|| Failure::validation("missing value"))?;

    let mut single_write_query = Vec::with_capacity(5);
    single_write_query.push(spec.code_byte());
    single_write_query.extend_from_slice(&request.start_address.to_be_bytes());
    single_write_query
        .extend_from_slice(&single_write_representation(spec, value).to_be_bytes());

    Ok(single_write_query)
}

fn encode_multiple_write(spec: &FunctionSpec, request: &Request) -> Result<Vec<u8>, Failure> {
    let mut multiple_write_query = Vec::new();

    multiple_write_query.push(spec.code_byte());
    multiple_write_query.extend_from_slice(&request.start_address.to_be_bytes());

    let ammount = value_count(spec, request)?;
    multiple_write_query.extend_from_slice(&ammount.to_be_bytes());

    //Byte count and values
    let values = serialize_values(spec.table(), &request.values)?;
    multiple_write_query.extend_from_slice(&values);

    Ok(multiple_write_query)
}

fn encode_read_write(spec: &FunctionSpec, request: &Request) -> Result<Vec<u8>, Failure> {
    let mut multiple_write_read_query = Vec::new();

    multiple_write_read_query.push(spec.code_byte());

    //Read Starting Address
    multiple_write_read_query.extend_from_slice(&request.start_address.to_be_bytes());

    //Read Ammount
    multiple_write_read_query.extend_from_slice(&request.count.to_be_bytes());

    //Write Starting Address
    multiple_write_read_query
        .extend_from_slice(&request.effective_write_address().to_be_bytes());

    //Write Ammount
    let write_ammount = value_count(spec, request)?;
    multiple_write_read_query.extend_from_slice(&write_ammount.to_be_bytes());

    //Write values
    let values = serialize_values(spec.table(), &request.values)?;
    multiple_write_read_query.extend_from_slice(&values);

    Ok(multiple_write_read_query)
}

fn decode_read(spec: &FunctionSpec, request: &Request, payload: &[u8]) -> Outcome {
    let mut data = Cursor::new(payload);
    let values = deserialize_values(spec.table(), request.count, &mut data)?;
    ensure_consumed(&data)?;
    Ok(values)
}

fn read_echo(payload: &[u8]) -> Result<(u16, u16), Failure> {
    let mut data = Cursor::new(payload);
    let address = data.read_u16::<BigEndian>().map_err(|_| truncated())?;
    let value = data.read_u16::<BigEndian>().map_err(|_| truncated())?;
    ensure_consumed(&data)?;
    Ok((address, value))
}

fn check_echo(spec: &FunctionSpec, what: &str, expected: u16, echoed: u16) -> Result<(), Failure> {
    if expected != echoed {
        return Err(Failure::framing(format!(
            "{} echoed {} {:#06x}, request had {:#06x}",
            spec.name, what, echoed, expected
        )));
    }
    Ok(())
}

fn decode_single_write_echo(spec: &FunctionSpec, request: &Request, payload: &[u8]) -> Outcome {
    let (address, value) = read_echo(payload)?;
    let expected_value = request
        .values
        .first()
        .map(|value| single_write_representation(spec, *value))
        .unwrap_or_default();

    if spec.table().is_bit_table() {
        coil_from_representation(value)?;
    }
    check_echo(spec, "address", request.start_address, address)?;
    check_echo(spec, "value", expected_value, value)?;
    Ok(ResponseData::WriteAck)
}

fn decode_multiple_write_echo(spec: &FunctionSpec, request: &Request, payload: &[u8]) -> Outcome {
    let (address, ammount) = read_echo(payload)?;

    check_echo(spec, "address", request.start_address, address)?;
    check_echo(spec, "count", request.values.len() as u16, ammount)?;
    Ok(ResponseData::WriteAck)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::FailureKind;

    fn assert_validation(request: Request) {
        let error = encode_request(&request).unwrap_err();
        assert_eq!(error.kind(), FailureKind::Validation, "{:?}", request);
    }

    #[test]
    fn test_registry_covers_every_function_code_once() {
        for (index, spec) in REGISTRY.iter().enumerate() {
            assert_eq!(lookup(spec.code.into()).unwrap().code, spec.code);
            assert!(REGISTRY[index + 1..].iter().all(|other| other.code != spec.code));
        }
    }

    #[test]
    fn test_read_write_semantics() {
        let reads: Vec<u8> = REGISTRY.iter().filter(|spec| spec.reads()).map(|spec| spec.code.into()).collect();
        let writes: Vec<u8> = REGISTRY.iter().filter(|spec| spec.writes()).map(|spec| spec.code.into()).collect();
        assert_eq!(reads, vec![1, 2, 3, 4, 23]);
        assert_eq!(writes, vec![5, 6, 15, 16, 23]);
    }

    #[test]
    fn test_unsupported_function() {
        for code in [0u8, 7, 8, 11, 17, 22, 43, 99, 0x83] {
            let request = Request::new(code, 1, 0).with_count(1);
            assert_eq!(
                encode_request(&request).unwrap_err(),
                Failure::UnsupportedFunction(code.into())
            );
        }
    }

    #[test]
    fn test_read_encoding() {
        let pdu = encode_request(&Request::read_holding_registers(1, 10, 2)).unwrap();
        assert_eq!(pdu, vec![0x03, 0x00, 0x0A, 0x00, 0x02]);

        let pdu = encode_request(&Request::read_coils(1, 0x0013, 0x0013)).unwrap();
        assert_eq!(pdu, vec![0x01, 0x00, 0x13, 0x00, 0x13]);
    }

    #[test]
    fn test_read_count_bounds() {
        // (function code, max count)
        let table = [(1u8, 2000u16), (2, 2000), (3, 125), (4, 125)];
        for (code, max) in table {
            assert!(encode_request(&Request::new(code, 1, 0).with_count(max)).is_ok());
            assert_validation(Request::new(code, 1, 0).with_count(max + 1));
            assert_validation(Request::new(code, 1, 0).with_count(0));
        }
    }

    #[test]
    fn test_read_address_range() {
        assert!(encode_request(&Request::read_holding_registers(1, 0xFFFF, 1)).is_ok());
        assert_validation(Request::read_holding_registers(1, 0xFFFF, 2));
        assert_validation(Request::read_coils(1, 0xFFF0, 17));
    }

    #[test]
    fn test_single_write_requires_exactly_one_value() {
        for code in [5u8, 6] {
            assert_validation(Request::new(code, 1, 0));
            assert_validation(Request::new(code, 1, 0).with_values(vec![1, 0]));
            assert!(encode_request(&Request::new(code, 1, 0).with_values(vec![1])).is_ok());
        }
    }

    #[test]
    fn test_write_coil_encoding() {
        let pdu = encode_request(&Request::new(5, 1, 0).with_values(vec![1])).unwrap();
        assert_eq!(pdu, vec![0x05, 0x00, 0x00, 0xFF, 0x00]);

        let pdu = encode_request(&Request::write_single_coil(1, 0x00AC, false)).unwrap();
        assert_eq!(pdu, vec![0x05, 0x00, 0xAC, 0x00, 0x00]);

        let pdu = encode_request(&Request::write_single_register(1, 1, 0x0003)).unwrap();
        assert_eq!(pdu, vec![0x06, 0x00, 0x01, 0x00, 0x03]);
    }

    #[test]
    fn test_multiple_write_bounds() {
        assert!(encode_request(&Request::write_multiple_coils(1, 0, &[true; 1968])).is_ok());
        assert_validation(Request::write_multiple_coils(1, 0, &[true; 1969]));
        assert_validation(Request::write_multiple_coils(1, 0, &[]));

        assert!(encode_request(&Request::write_multiple_registers(1, 0, vec![0; 123])).is_ok());
        assert_validation(Request::write_multiple_registers(1, 0, vec![0; 124]));
        assert_validation(Request::write_multiple_registers(1, 0, vec![]));
        assert_validation(Request::write_multiple_registers(1, 0xFFFF, vec![1, 2]));
    }

    #[test]
    fn test_multiple_write_encoding() {
        let request = Request::write_multiple_coils(
            1,
            0x0013,
            &[true, false, true, true, false, false, true, true, true, false],
        );
        assert_eq!(
            encode_request(&request).unwrap(),
            vec![0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );

        let request = Request::write_multiple_registers(1, 0x0001, vec![0x000A, 0x0102]);
        assert_eq!(
            encode_request(&request).unwrap(),
            vec![0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_read_write_encoding_and_bounds() {
        let request = Request::read_write_multiple_registers(1, 0x0003, 6, 0x000E, vec![0x00FF; 3]);
        assert_eq!(
            encode_request(&request).unwrap(),
            vec![
                0x17, 0x00, 0x03, 0x00, 0x06, 0x00, 0x0E, 0x00, 0x03, 0x06, 0x00, 0xFF, 0x00,
                0xFF, 0x00, 0xFF
            ]
        );

        // write address defaults to the read address
        let request = Request::new(23, 1, 5).with_count(1).with_values(vec![9]);
        assert_eq!(&encode_request(&request).unwrap()[5..7], &[0x00, 0x05]);

        assert_validation(Request::new(23, 1, 0).with_count(1));
        assert_validation(Request::new(23, 1, 0).with_values(vec![1]));
        assert_validation(Request::new(23, 1, 0).with_count(126).with_values(vec![1]));
        assert_validation(Request::new(23, 1, 0).with_count(1).with_values(vec![1; 122]));
    }

    #[test]
    fn test_decode_registers() {
        let request = Request::read_holding_registers(1, 10, 2);
        let outcome = decode_response(&request, &[0x03, 0x04, 0x00, 0x01, 0x00, 0xFF]);
        assert_eq!(outcome, Ok(ResponseData::Registers(vec![1, 255])));
    }

    #[test]
    fn test_decode_bits_unpacks_to_count() {
        let request = Request::read_discrete_inputs(1, 0, 3);
        let outcome = decode_response(&request, &[0x02, 0x01, 0b0000_0101]);
        assert_eq!(outcome, Ok(ResponseData::Bits(vec![true, false, true])));
    }

    #[test]
    fn test_decode_read_write_uses_read_count() {
        let request = Request::read_write_multiple_registers(1, 0, 1, 10, vec![1, 2, 3]);
        let outcome = decode_response(&request, &[0x17, 0x02, 0x12, 0x34]);
        assert_eq!(outcome, Ok(ResponseData::Registers(vec![0x1234])));
    }

    #[test]
    fn test_decode_exception_never_decodes_payload() {
        let request = Request::read_holding_registers(1, 0, 2);
        for pdu in [
            vec![0x83, 0x02],
            vec![0x83, 0x04, 0x00, 0x01, 0x00, 0x02],
            vec![0x81],
            vec![0xFF, 0x01],
        ] {
            let error = decode_response(&request, &pdu).unwrap_err();
            assert_eq!(error.kind(), FailureKind::ModbusException, "{:?}", pdu);
        }

        assert_eq!(
            decode_response(&request, &[0x83, 0x02]),
            Err(Failure::ModbusException {
                function: 3,
                code: 2
            })
        );
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        let request = Request::read_holding_registers(1, 0, 2);
        let malformed: [&[u8]; 5] = [
            &[],
            &[0x04, 0x04, 0x00, 0x01, 0x00, 0x02],
            &[0x03, 0x02, 0x00, 0x01],
            &[0x03, 0x04, 0x00, 0x01, 0x00],
            &[0x03, 0x04, 0x00, 0x01, 0x00, 0x02, 0x00],
        ];
        for pdu in malformed {
            let error = decode_response(&request, pdu).unwrap_err();
            assert_eq!(error.kind(), FailureKind::Framing, "{:?}", pdu);
        }
    }

    #[test]
    fn test_decode_write_echoes() {
        let request = Request::new(5, 1, 0).with_values(vec![1]);
        assert_eq!(
            decode_response(&request, &[0x05, 0x00, 0x00, 0xFF, 0x00]),
            Ok(ResponseData::WriteAck)
        );
        assert!(decode_response(&request, &[0x05, 0x00, 0x00, 0x00, 0x00]).is_err());
        assert!(decode_response(&request, &[0x05, 0x00, 0x01, 0xFF, 0x00]).is_err());

        let request = Request::write_multiple_registers(1, 0x0001, vec![0x000A, 0x0102]);
        assert_eq!(
            decode_response(&request, &[0x10, 0x00, 0x01, 0x00, 0x02]),
            Ok(ResponseData::WriteAck)
        );
        assert!(decode_response(&request, &[0x10, 0x00, 0x01, 0x00, 0x03]).is_err());
    }

    #[test]
    fn test_decode_coil_echo_with_invalid_value() {
        let request = Request::write_single_coil(1, 3, true);
        let error = decode_response(&request, &[0x05, 0x00, 0x03, 0x12, 0x34]).unwrap_err();
        assert_eq!(error.kind(), FailureKind::Framing);
        assert!(error.to_string().contains("can't be decoded to a coil"), "{}", error);
    }

    #[test]
    fn test_decode_single_register_and_coils_echo_mismatch() {
        let request = Request::write_single_register(1, 0x0010, 0xABCD);
        assert_eq!(
            decode_response(&request, &[0x06, 0x00, 0x10, 0xAB, 0xCD]),
            Ok(ResponseData::WriteAck)
        );
        let error = decode_response(&request, &[0x06, 0x00, 0x10, 0xAB, 0xCE]).unwrap_err();
        assert_eq!(error.kind(), FailureKind::Framing);
        let error = decode_response(&request, &[0x06, 0x00, 0x11, 0xAB, 0xCD]).unwrap_err();
        assert_eq!(error.kind(), FailureKind::Framing);

        let request = Request::write_multiple_coils(1, 0x0013, &[true, false, true]);
        assert_eq!(
            decode_response(&request, &[0x0F, 0x00, 0x13, 0x00, 0x03]),
            Ok(ResponseData::WriteAck)
        );
        let error = decode_response(&request, &[0x0F, 0x00, 0x13, 0x00, 0x04]).unwrap_err();
        assert_eq!(error.kind(), FailureKind::Framing);
        let error = decode_response(&request, &[0x0F, 0x00, 0x14, 0x00, 0x03]).unwrap_err();
        assert_eq!(error.kind(), FailureKind::Framing);
    }
}
