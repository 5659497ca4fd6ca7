use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::io::Cursor;
use dcache_common::ProtocolError;

use crate::frame::{Decode, Encode, get_field, get_u8, put_field};

/// Status de uma resposta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Placeholder antes de um status ser atribuído; nunca válido no fio.
    #[default]
    None = 0,
    Ok = 1,
    Error = 2,
    KeyNotFound = 3,
}

impl TryFrom<u8> for Status {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            1 => Ok(Status::Ok),
            2 => Ok(Status::Error),
            3 => Ok(Status::KeyNotFound),
            other => Err(ProtocolError::InvalidStatus(other)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "OK",
            Status::Error => "ERR",
            Status::KeyNotFound => "KEYNOTFOUND",
            Status::None => "NONE",
        };
        f.write_str(s)
    }
}

fn get_status(src: &mut Cursor<&[u8]>) -> Result<Status, ProtocolError> {
    Status::try_from(get_u8(src)?)
}

/// Resposta de status único: `[u8 status]`.
///
/// Usada pelo SET e também pelo HAS (`Ok`/`KeyNotFound`) e pelo DELETE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetResponse {
    pub status: Status,
}

impl SetResponse {
    pub fn new(status: Status) -> Self {
        Self { status }
    }

    pub fn ok() -> Self {
        Self::new(Status::Ok)
    }
}

impl Encode for SetResponse {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.status as u8);
    }
}

impl Decode for SetResponse {
    fn decode(src: &mut Cursor<&[u8]>) -> Result<Self, ProtocolError> {
        Ok(Self {
            status: get_status(src)?,
        })
    }
}

/// Resposta do GET: `[u8 status][i32 len][value]`.
///
/// Em `KeyNotFound`/`Error` o valor é vazio; um valor vazio com `Ok` continua
/// distinguível pelo byte de status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetResponse {
    pub status: Status,
    pub value: Bytes,
}

impl GetResponse {
    pub fn ok(value: Bytes) -> Self {
        Self {
            status: Status::Ok,
            value,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: Status::KeyNotFound,
            value: Bytes::new(),
        }
    }
}

impl Encode for GetResponse {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.status as u8);
        // Só respostas OK carregam valor
        let value: &[u8] = if self.status == Status::Ok {
            &self.value[..]
        } else {
            &[]
        };
        put_field(dst, value);
    }
}

impl Decode for GetResponse {
    fn decode(src: &mut Cursor<&[u8]>) -> Result<Self, ProtocolError> {
        let status = get_status(src)?;
        let value = get_field(src)?;
        Ok(Self { status, value })
    }
}
