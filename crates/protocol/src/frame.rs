use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use dcache_common::{MAX_FIELD_LEN, ProtocolError};

/// Tipos que sabem se escrever como um frame binário.
pub trait Encode {
    /// Encoda o frame no buffer de saída (inteiros little-endian, sem padding).
    fn encode(&self, dst: &mut BytesMut);

    /// Helper: encoda em um buffer novo.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Tipos que sabem se ler de um frame binário.
///
/// `decode` avança o cursor apenas o necessário. Se o buffer acabar no meio
/// do frame retorna `ProtocolError::Incomplete`; quem chamou decide se
/// espera mais bytes ou se trata como fim de stream.
pub trait Decode: Sized {
    fn decode(src: &mut Cursor<&[u8]>) -> Result<Self, ProtocolError>;
}

pub(crate) fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    if !src.has_remaining() {
        return Err(ProtocolError::Incomplete);
    }
    Ok(src.get_u8())
}

pub(crate) fn get_i32(src: &mut Cursor<&[u8]>) -> Result<i32, ProtocolError> {
    if src.remaining() < 4 {
        return Err(ProtocolError::Incomplete);
    }
    Ok(src.get_i32_le())
}

/// Lê `i32 len` seguido de `len` bytes.
///
/// O comprimento é validado antes de esperar pelos dados, então um prefixo
/// corrompido ou malicioso nunca faz o buffer crescer até `len`.
pub(crate) fn get_field(src: &mut Cursor<&[u8]>) -> Result<Bytes, ProtocolError> {
    let len = get_i32(src)?;
    if len < 0 {
        return Err(ProtocolError::InvalidLength(len));
    }
    let len = len as usize;
    if len > MAX_FIELD_LEN {
        return Err(ProtocolError::FieldTooLarge(len));
    }
    if src.remaining() < len {
        return Err(ProtocolError::Incomplete);
    }
    let start = src.position() as usize;
    let data = Bytes::copy_from_slice(&src.get_ref()[start..start + len]);
    src.advance(len);
    Ok(data)
}

pub(crate) fn put_field(dst: &mut BytesMut, data: &[u8]) {
    debug_assert!(data.len() <= MAX_FIELD_LEN);
    dst.put_i32_le(data.len() as i32);
    dst.put_slice(data);
}
