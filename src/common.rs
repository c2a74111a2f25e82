use crate::error::Failure;
use crate::messages::FunctionCode;

use std::fmt;

pub type SlaveId = u8;

/// Result of one request/response exchange.
pub type Outcome = Result<ResponseData, Failure>;

pub const WRITE_ACK_MESSAGE: &str = "Write operation successful";

pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

#[derive(Clone, Copy, PartialEq, Debug, Eq, Hash)]
pub enum ModbusTable {
    DiscreteInput,
    Coils,
    InputRegisters,
    HoldingRegisters,
}

impl ModbusTable {
    pub fn get_table_from_function_code(function_code: FunctionCode) -> ModbusTable {
        match function_code {
            FunctionCode::WriteSingleCoil
            | FunctionCode::ReadCoils
            | FunctionCode::WriteMultipleCoils => ModbusTable::Coils,
            FunctionCode::WriteSingleHoldingRegister
            | FunctionCode::ReadMultipleHoldingRegisters
            | FunctionCode::WriteMultipleHoldingRegisters
            | FunctionCode::ReadWriteMultipleRegisters => ModbusTable::HoldingRegisters,
            FunctionCode::ReadInputRegisters => ModbusTable::InputRegisters,
            FunctionCode::ReadDiscreteInputs => ModbusTable::DiscreteInput,
        }
    }

    pub fn is_bit_table(&self) -> bool {
        matches!(self, ModbusTable::Coils | ModbusTable::DiscreteInput)
    }
}

pub fn coil_representation(value: bool) -> u16 {
    if value {
        COIL_ON
    } else {
        COIL_OFF
    }
}

pub fn coil_from_representation(raw_value: u16) -> Result<bool, Failure> {
    match raw_value {
        COIL_ON => Ok(true),
        COIL_OFF => Ok(false),
        _ => Err(Failure::framing(format!(
            "{:#06x} can't be decoded to a coil, only valid values are 0xFF00 and 0x0000",
            raw_value
        ))),
    }
}

/// One request addressed to one unit. Coil values are ON when non-zero.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Request {
    pub function_code: u8,
    pub unit_id: SlaveId,
    pub start_address: u16,
    /// Quantity to read; ignored by pure write functions.
    pub count: u16,
    pub values: Vec<u16>,
    /// Write block address for read/write multiple registers, defaults to `start_address`.
    pub write_address: Option<u16>,
}

impl Request {
    pub fn new(function_code: u8, unit_id: SlaveId, start_address: u16) -> Self {
        Request {
            function_code,
            unit_id,
            start_address,
            count: 0,
            values: Vec::new(),
            write_address: None,
        }
    }

    pub fn with_count(mut self, count: u16) -> Self {
        self.count = count;
        self
    }

    pub fn with_values(mut self, values: Vec<u16>) -> Self {
        self.values = values;
        self
    }

    pub fn with_write_address(mut self, write_address: u16) -> Self {
        self.write_address = Some(write_address);
        self
    }

    fn read(function_code: FunctionCode, unit_id: SlaveId, address: u16, count: u16) -> Self {
        Request::new(function_code.into(), unit_id, address).with_count(count)
    }

    pub fn read_coils(unit_id: SlaveId, address: u16, count: u16) -> Self {
        Request::read(FunctionCode::ReadCoils, unit_id, address, count)
    }

    pub fn read_discrete_inputs(unit_id: SlaveId, address: u16, count: u16) -> Self {
        Request::read(FunctionCode::ReadDiscreteInputs, unit_id, address, count)
    }

    pub fn read_holding_registers(unit_id: SlaveId, address: u16, count: u16) -> Self {
        Request::read(FunctionCode::ReadMultipleHoldingRegisters, unit_id, address, count)
    }

    pub fn read_input_registers(unit_id: SlaveId, address: u16, count: u16) -> Self {
        Request::read(FunctionCode::ReadInputRegisters, unit_id, address, count)
    }

    pub fn write_single_coil(unit_id: SlaveId, address: u16, value: bool) -> Self {
        Request::new(FunctionCode::WriteSingleCoil.into(), unit_id, address)
            .with_values(vec![value as u16])
    }

    pub fn write_single_register(unit_id: SlaveId, address: u16, value: u16) -> Self {
        Request::new(FunctionCode::WriteSingleHoldingRegister.into(), unit_id, address)
            .with_values(vec![value])
    }

    pub fn write_multiple_coils(unit_id: SlaveId, address: u16, values: &[bool]) -> Self {
        Request::new(FunctionCode::WriteMultipleCoils.into(), unit_id, address)
            .with_values(values.iter().map(|value| *value as u16).collect())
    }

    pub fn write_multiple_registers(unit_id: SlaveId, address: u16, values: Vec<u16>) -> Self {
        Request::new(FunctionCode::WriteMultipleHoldingRegisters.into(), unit_id, address)
            .with_values(values)
    }

    pub fn read_write_multiple_registers(
        unit_id: SlaveId,
        read_address: u16,
        read_count: u16,
        write_address: u16,
        values: Vec<u16>,
    ) -> Self {
        Request::new(FunctionCode::ReadWriteMultipleRegisters.into(), unit_id, read_address)
            .with_count(read_count)
            .with_write_address(write_address)
            .with_values(values)
    }

    pub fn effective_write_address(&self) -> u16 {
        self.write_address.unwrap_or(self.start_address)
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ResponseData {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
    WriteAck,
}

impl fmt::Display for ResponseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseData::Bits(bits) => write!(f, "{:?}", bits),
            ResponseData::Registers(registers) => write!(f, "{:?}", registers),
            ResponseData::WriteAck => f.write_str(WRITE_ACK_MESSAGE),
        }
    }
}
