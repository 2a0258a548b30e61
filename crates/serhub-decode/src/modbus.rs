//! Modbus RTU frame decoder.

use crate::{to_hex, DecodeError, DecodedFrame, Decoder};

/// Address + function code + 2 byte CRC.
const MIN_FRAME_LEN: usize = 4;
const EXCEPTION_BIT: u8 = 0x80;

/// CRC-16/MODBUS: reflected polynomial 0xA001, initial value 0xFFFF.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

pub fn function_name(code: u8) -> Option<&'static str> {
    Some(match code {
        0x01 => "Read Coils",
        0x02 => "Read Discrete Inputs",
        0x03 => "Read Holding Registers",
        0x04 => "Read Input Registers",
        0x05 => "Write Single Coil",
        0x06 => "Write Single Register",
        0x0F => "Write Multiple Coils",
        0x10 => "Write Multiple Registers",
        0x17 => "Read/Write Multiple Registers",
        _ => return None,
    })
}

/// Treats a whole chunk as one RTU frame.
///
/// A CRC mismatch still yields a frame with `crcValid = false`. Chunks whose
/// function code is unknown (and not an exception) are left to raw text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusRtuDecoder;

impl Decoder for ModbusRtuDecoder {
    fn name(&self) -> &'static str {
        "Modbus RTU"
    }

    fn description(&self) -> &'static str {
        "Decodes Modbus RTU protocol frames (function codes, addresses, CRC)"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Option<DecodedFrame>, DecodeError> {
        if bytes.len() < MIN_FRAME_LEN {
            return Ok(None);
        }

        let slave = bytes[0];
        let function = bytes[1];
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 2);
        let crc_received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        let crc_valid = crc16(body) == crc_received;

        let is_exception = function & EXCEPTION_BIT != 0;
        let base = function & !EXCEPTION_BIT;
        let known = function_name(base);
        if known.is_none() && !is_exception {
            return Ok(None);
        }

        let name = if is_exception {
            format!("Exception ({})", known.unwrap_or("Unknown"))
        } else {
            known.unwrap_or("Unknown").to_string()
        };
        let payload = &body[2..];

        let summary = format!(
            "[Modbus] Slave:{slave} Func:{}{} CRC:{}",
            known.map(str::to_string).unwrap_or_else(|| format!("0x{base:x}")),
            if is_exception { " EXCEPTION" } else { "" },
            if crc_valid { "OK" } else { "FAIL" },
        );

        Ok(Some(
            DecodedFrame::new("Modbus RTU")
                .with_field("slaveAddress", slave)
                .with_field("functionCode", format!("0x{function:02x}"))
                .with_field("functionName", name)
                .with_field("isException", is_exception)
                .with_field("payload", to_hex(payload))
                .with_field("payloadLength", payload.len())
                .with_field("crcReceived", format!("0x{crc_received:04x}"))
                .with_field("crcValid", crc_valid)
                .with_summary(summary),
        ))
    }
}
