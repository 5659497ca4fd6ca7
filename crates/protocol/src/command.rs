use bytes::{BufMut, Bytes, BytesMut};
use std::io::Cursor;
use std::time::Duration;
use dcache_common::ProtocolError;

use crate::frame::{Decode, Encode, get_field, get_i32, get_u8, put_field};

/// Byte de tag que abre todo frame de comando. A tag 0 é reservada e
/// rejeitada como comando inválido.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandTag {
    Set = 1,
    Has = 2,
    Get = 3,
    Delete = 4,
    Join = 5,
}

impl TryFrom<u8> for CommandTag {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            1 => Ok(CommandTag::Set),
            2 => Ok(CommandTag::Has),
            3 => Ok(CommandTag::Get),
            4 => Ok(CommandTag::Delete),
            5 => Ok(CommandTag::Join),
            other => Err(ProtocolError::InvalidCommand(other)),
        }
    }
}

/// Enum com todos os comandos do protocolo.
///
/// O `ttl` do SET viaja como `i32` em nanossegundos; use [`ttl_from_wire`]
/// para obter a `Duration` que o store espera.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set { key: Bytes, value: Bytes, ttl: i32 },
    Has { key: Bytes },
    Get { key: Bytes },
    Delete { key: Bytes },
    Join,
}

impl Command {
    pub fn tag(&self) -> CommandTag {
        match self {
            Command::Set { .. } => CommandTag::Set,
            Command::Has { .. } => CommandTag::Has,
            Command::Get { .. } => CommandTag::Get,
            Command::Delete { .. } => CommandTag::Delete,
            Command::Join => CommandTag::Join,
        }
    }

    /// Nome curto usado em logs e mensagens de erro.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "SET",
            Command::Has { .. } => "HAS",
            Command::Get { .. } => "GET",
            Command::Delete { .. } => "DELETE",
            Command::Join => "JOIN",
        }
    }
}

impl Encode for Command {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.tag() as u8);
        match self {
            Command::Set { key, value, ttl } => {
                put_field(dst, key);
                put_field(dst, value);
                dst.put_i32_le(*ttl);
            }
            Command::Has { key } | Command::Get { key } | Command::Delete { key } => {
                put_field(dst, key);
            }
            Command::Join => {}
        }
    }
}

impl Decode for Command {
    fn decode(src: &mut Cursor<&[u8]>) -> Result<Command, ProtocolError> {
        let cmd = match CommandTag::try_from(get_u8(src)?)? {
            CommandTag::Set => {
                let key = get_field(src)?;
                let value = get_field(src)?;
                let ttl = get_i32(src)?;
                Command::Set { key, value, ttl }
            }
            CommandTag::Has => Command::Has {
                key: get_field(src)?,
            },
            CommandTag::Get => Command::Get {
                key: get_field(src)?,
            },
            CommandTag::Delete => Command::Delete {
                key: get_field(src)?,
            },
            CommandTag::Join => Command::Join,
        };
        Ok(cmd)
    }
}

/// Maior TTL que o fio consegue expressar: `i32::MAX` nanossegundos.
pub const MAX_TTL: Duration = Duration::from_nanos(i32::MAX as u64);

/// Converte o TTL do fio (nanossegundos) para `Duration`. Valores `<= 0`
/// significam "sem expiração" e viram `Duration::ZERO`.
pub fn ttl_from_wire(ttl: i32) -> Duration {
    if ttl <= 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(ttl as u64)
    }
}

/// Converte uma `Duration` para o TTL do fio, saturando em `i32::MAX` ns
/// (~2,147 s), o maior TTL que o formato consegue expressar.
pub fn ttl_to_wire(ttl: Duration) -> i32 {
    i32::try_from(ttl.as_nanos()).unwrap_or(i32::MAX)
}
