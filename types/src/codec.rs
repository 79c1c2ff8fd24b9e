use bytes::{Buf, BufMut};
use commonware_codec::{Error, ReadExt, Write};

/// Helper to write a string as length-prefixed UTF-8 bytes.
pub fn write_string(s: &str, writer: &mut impl BufMut) {
    write_bytes(s.as_bytes(), writer);
}

/// Helper to read a string from length-prefixed UTF-8 bytes.
pub fn read_string(reader: &mut impl Buf, max_len: usize) -> Result<String, Error> {
    let len = read_len(reader, max_len, "String")?;
    if reader.chunk().len() >= len {
        let result = {
            let chunk = reader.chunk();
            match std::str::from_utf8(&chunk[..len]) {
                Ok(s) => Ok(s.to_owned()),
                Err(_) => Err(Error::Invalid("String", "invalid UTF-8")),
            }
        };
        reader.advance(len);
        return result;
    }
    let mut bytes = vec![0u8; len];
    reader.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| Error::Invalid("String", "invalid UTF-8"))
}

/// Helper to get encode size of a string.
pub fn string_encode_size(s: &str) -> usize {
    bytes_encode_size(s.as_bytes())
}

/// Helper to write an opaque byte payload with a `u32` length prefix.
pub fn write_bytes(bytes: &[u8], writer: &mut impl BufMut) {
    (bytes.len() as u32).write(writer);
    writer.put_slice(bytes);
}

/// Helper to read an opaque byte payload written by [write_bytes].
pub fn read_bytes(reader: &mut impl Buf, max_len: usize) -> Result<Vec<u8>, Error> {
    let len = read_len(reader, max_len, "Bytes")?;
    let mut bytes = vec![0u8; len];
    reader.copy_to_slice(&mut bytes);
    Ok(bytes)
}

/// Helper to get encode size of a byte payload.
pub fn bytes_encode_size(bytes: &[u8]) -> usize {
    4 + bytes.len()
}

fn read_len(reader: &mut impl Buf, max_len: usize, ctx: &'static str) -> Result<usize, Error> {
    let len = u32::read(reader)? as usize;
    if len > max_len {
        return Err(Error::Invalid(ctx, "too long"));
    }
    if reader.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    Ok(len)
}
