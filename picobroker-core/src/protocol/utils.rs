use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::ProtocolError;

/// Largest value the remaining-length field can carry (four bytes).
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Bytes needed to encode `value` as a remaining length.
pub const fn variable_length_length(value: usize) -> usize {
    if value < 128 {
        1
    } else if value < 16384 {
        2
    } else if value < 2097152 {
        3
    } else {
        4
    }
}

/// Reads a remaining-length field from the start of `bytes`.
///
/// Returns `Ok(None)` when the field is not complete yet, otherwise the
/// decoded value and the number of bytes it occupied.
pub fn read_variable_length(bytes: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let mut multiplier = 1usize;
    let mut value = 0usize;

    for (index, &byte) in bytes.iter().enumerate() {
        if index >= 4 {
            return Err(ProtocolError::InvalidLengthEncoding);
        }
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
        multiplier *= 128;
    }

    if bytes.len() >= 4 {
        return Err(ProtocolError::InvalidLengthEncoding);
    }
    Ok(None)
}

pub fn write_variable_length(value: usize, buffer: &mut BytesMut) -> Result<(), ProtocolError> {
    if value > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::PacketTooLarge {
            max_size: MAX_REMAINING_LENGTH,
            actual_size: value,
        });
    }

    let mut encoded = value;
    loop {
        let mut byte = (encoded & 0x7F) as u8;
        encoded >>= 7;
        if encoded > 0 {
            byte |= 0x80;
        }
        buffer.put_u8(byte);
        if encoded == 0 {
            break;
        }
    }
    Ok(())
}

pub fn read_u8(bytes: &[u8], offset: &mut usize, field: &'static str) -> Result<u8, ProtocolError> {
    let byte = *bytes.get(*offset).ok_or(ProtocolError::UnexpectedEof { field })?;
    *offset += 1;
    Ok(byte)
}

pub fn read_u16(bytes: &[u8], offset: &mut usize, field: &'static str) -> Result<u16, ProtocolError> {
    let end = *offset + 2;
    let slice = bytes.get(*offset..end).ok_or(ProtocolError::UnexpectedEof { field })?;
    *offset = end;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

/// Reads a non-zero packet identifier.
pub fn read_packet_id(bytes: &[u8], offset: &mut usize) -> Result<u16, ProtocolError> {
    match read_u16(bytes, offset, "packet identifier")? {
        0 => Err(ProtocolError::MissingPacketId),
        packet_id => Ok(packet_id),
    }
}

/// Reads length-prefixed binary data.
pub fn read_binary<'a>(
    bytes: &'a [u8],
    offset: &mut usize,
    field: &'static str,
) -> Result<&'a [u8], ProtocolError> {
    let len = read_u16(bytes, offset, field)? as usize;
    let end = *offset + len;
    let data = bytes.get(*offset..end).ok_or(ProtocolError::UnexpectedEof { field })?;
    *offset = end;
    Ok(data)
}

/// Reads a length-prefixed UTF-8 string. U+0000 is rejected as malformed.
pub fn read_string(bytes: &[u8], offset: &mut usize, field: &'static str) -> Result<String, ProtocolError> {
    let data = read_binary(bytes, offset, field)?;
    let value = core::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8String)?;
    if value.contains('\0') {
        return Err(ProtocolError::InvalidUtf8String);
    }
    Ok(value.to_owned())
}

pub fn write_binary(data: &[u8], buffer: &mut BytesMut) -> Result<(), ProtocolError> {
    let len = u16::try_from(data.len()).map_err(|_| ProtocolError::StringTooLong(data.len()))?;
    buffer.put_u16(len);
    buffer.put_slice(data);
    Ok(())
}

pub fn write_string(value: &str, buffer: &mut BytesMut) -> Result<(), ProtocolError> {
    write_binary(value.as_bytes(), buffer)
}

pub fn copy_bytes(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(data)
}
