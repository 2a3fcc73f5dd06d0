// Special commands: reliable events that ride inside the tic stream
//
// Records carry no length prefix. Each discriminator has a fixed field
// layout and both decoding and skipping are driven by it.

use bytes::{BufMut, BytesMut};
use num_traits::FromPrimitive;
use tracing::debug;

use crate::fields;
use crate::ticbuf::BACKUPTICS;
use crate::wire::{Reader, WireError, Writer};
use crate::Tic;

const INITIAL_SPECIAL_SIZE: usize = 256;

const CVAR_BOOL: u8 = 0;
const CVAR_INT: u8 = 1;
const CVAR_FLOAT: u8 = 2;
const CVAR_STRING: u8 = 3;
const CVAR_NAME_MAX: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, num_derive::FromPrimitive)]
#[repr(u8)]
pub enum SpecialKind {
    /// Terminates the special records of a tic; the packed user command follows.
    UserCmd = 1,
    Say,
    MusicChange,
    Print,
    CenterPrint,
    UserInfoChanged,
    ServerInfoChanged,
    GiveCheat,
    GenericCheat,
    ChangeMap,
    Suicide,
    AddBot,
    KillBots,
    InvSel,
    InvUse,
    WeapSel,
    WeapSlot,
    WeapNext,
    WeapPrev,
    Summon,
    Pause,
    SaveGame,
    DropPlayer,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Byte,
    CStr,
    /// `(type << 6) | name_len`, the name, then a value sized by type.
    CVar,
}

impl SpecialKind {
    fn layout(self) -> &'static [Field] {
        use Field::*;
        match self {
            SpecialKind::Say | SpecialKind::AddBot => &[Byte, CStr],
            SpecialKind::GiveCheat => &[CStr, Byte],
            SpecialKind::MusicChange
            | SpecialKind::Print
            | SpecialKind::CenterPrint
            | SpecialKind::UserInfoChanged
            | SpecialKind::ChangeMap
            | SpecialKind::Summon => &[CStr],
            SpecialKind::GenericCheat
            | SpecialKind::DropPlayer
            | SpecialKind::InvSel
            | SpecialKind::InvUse
            | SpecialKind::WeapSel
            | SpecialKind::WeapSlot => &[Byte],
            SpecialKind::SaveGame => &[CStr, CStr],
            SpecialKind::ServerInfoChanged => &[CVar],
            SpecialKind::UserCmd
            | SpecialKind::Suicide
            | SpecialKind::KillBots
            | SpecialKind::WeapNext
            | SpecialKind::WeapPrev
            | SpecialKind::Pause => &[],
        }
    }
}

/// Value carried by a server-info change.
#[derive(Debug, Clone, PartialEq)]
pub enum CVarValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    String(String),
}

impl CVarValue {
    fn type_code(&self) -> u8 {
        match self {
            CVarValue::Bool(_) => CVAR_BOOL,
            CVarValue::Int(_) => CVAR_INT,
            CVarValue::Float(_) => CVAR_FLOAT,
            CVarValue::String(_) => CVAR_STRING,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpecialCommand {
    Say { who: u8, text: String },
    MusicChange(String),
    Print(String),
    CenterPrint(String),
    UserInfoChanged(String),
    ServerInfoChanged { name: String, value: CVarValue },
    GiveCheat { item: String, amount: u8 },
    GenericCheat(u8),
    ChangeMap(String),
    Suicide,
    AddBot { slot: u8, name: String },
    KillBots,
    InvSel(u8),
    InvUse(u8),
    WeapSel(u8),
    WeapSlot(u8),
    WeapNext,
    WeapPrev,
    Summon(String),
    Pause,
    SaveGame { file: String, description: String },
    DropPlayer(u8),
}

impl SpecialCommand {
    pub fn kind(&self) -> SpecialKind {
        match self {
            SpecialCommand::Say { .. } => SpecialKind::Say,
            SpecialCommand::MusicChange(_) => SpecialKind::MusicChange,
            SpecialCommand::Print(_) => SpecialKind::Print,
            SpecialCommand::CenterPrint(_) => SpecialKind::CenterPrint,
            SpecialCommand::UserInfoChanged(_) => SpecialKind::UserInfoChanged,
            SpecialCommand::ServerInfoChanged { .. } => SpecialKind::ServerInfoChanged,
            SpecialCommand::GiveCheat { .. } => SpecialKind::GiveCheat,
            SpecialCommand::GenericCheat(_) => SpecialKind::GenericCheat,
            SpecialCommand::ChangeMap(_) => SpecialKind::ChangeMap,
            SpecialCommand::Suicide => SpecialKind::Suicide,
            SpecialCommand::AddBot { .. } => SpecialKind::AddBot,
            SpecialCommand::KillBots => SpecialKind::KillBots,
            SpecialCommand::InvSel(_) => SpecialKind::InvSel,
            SpecialCommand::InvUse(_) => SpecialKind::InvUse,
            SpecialCommand::WeapSel(_) => SpecialKind::WeapSel,
            SpecialCommand::WeapSlot(_) => SpecialKind::WeapSlot,
            SpecialCommand::WeapNext => SpecialKind::WeapNext,
            SpecialCommand::WeapPrev => SpecialKind::WeapPrev,
            SpecialCommand::Summon(_) => SpecialKind::Summon,
            SpecialCommand::Pause => SpecialKind::Pause,
            SpecialCommand::SaveGame { .. } => SpecialKind::SaveGame,
            SpecialCommand::DropPlayer(_) => SpecialKind::DropPlayer,
        }
    }

    /// Writes the discriminator and the record body.
    pub fn write(&self, w: &mut Writer) {
        w.write_u8(self.kind() as u8);
        match self {
            SpecialCommand::Say { who, text } => {
                w.write_u8(*who);
                w.write_str(text);
            }
            SpecialCommand::AddBot { slot, name } => {
                w.write_u8(*slot);
                w.write_str(name);
            }
            SpecialCommand::GiveCheat { item, amount } => {
                w.write_str(item);
                w.write_u8(*amount);
            }
            SpecialCommand::MusicChange(s)
            | SpecialCommand::Print(s)
            | SpecialCommand::CenterPrint(s)
            | SpecialCommand::UserInfoChanged(s)
            | SpecialCommand::ChangeMap(s)
            | SpecialCommand::Summon(s) => w.write_str(s),
            SpecialCommand::GenericCheat(b)
            | SpecialCommand::DropPlayer(b)
            | SpecialCommand::InvSel(b)
            | SpecialCommand::InvUse(b)
            | SpecialCommand::WeapSel(b)
            | SpecialCommand::WeapSlot(b) => w.write_u8(*b),
            SpecialCommand::SaveGame { file, description } => {
                w.write_str(file);
                w.write_str(description);
            }
            SpecialCommand::ServerInfoChanged { name, value } => {
                let name = &name.as_bytes()[..name.len().min(CVAR_NAME_MAX)];
                w.write_u8((value.type_code() << 6) | name.len() as u8);
                w.write_bytes(name);
                match value {
                    CVarValue::Bool(b) => w.write_u8(u8::from(*b)),
                    CVarValue::Int(i) => w.write_i32(*i),
                    CVarValue::Float(f) => w.write_f32(*f),
                    CVarValue::String(s) => w.write_str(s),
                }
            }
            SpecialCommand::Suicide
            | SpecialCommand::KillBots
            | SpecialCommand::WeapNext
            | SpecialCommand::WeapPrev
            | SpecialCommand::Pause => {}
        }
    }

    /// Decodes the body of a record whose discriminator was already read.
    pub fn read(kind: SpecialKind, r: &mut Reader<'_>) -> Result<Self, WireError> {
        let cmd = match kind {
            SpecialKind::UserCmd => return Err(WireError::UnknownSpecial(kind as u8)),
            SpecialKind::Say => SpecialCommand::Say {
                who: r.read_u8()?,
                text: r.read_string()?,
            },
            SpecialKind::AddBot => SpecialCommand::AddBot {
                slot: r.read_u8()?,
                name: r.read_string()?,
            },
            SpecialKind::GiveCheat => SpecialCommand::GiveCheat {
                item: r.read_string()?,
                amount: r.read_u8()?,
            },
            SpecialKind::MusicChange => SpecialCommand::MusicChange(r.read_string()?),
            SpecialKind::Print => SpecialCommand::Print(r.read_string()?),
            SpecialKind::CenterPrint => SpecialCommand::CenterPrint(r.read_string()?),
            SpecialKind::UserInfoChanged => SpecialCommand::UserInfoChanged(r.read_string()?),
            SpecialKind::ChangeMap => SpecialCommand::ChangeMap(r.read_string()?),
            SpecialKind::Summon => SpecialCommand::Summon(r.read_string()?),
            SpecialKind::GenericCheat => SpecialCommand::GenericCheat(r.read_u8()?),
            SpecialKind::DropPlayer => SpecialCommand::DropPlayer(r.read_u8()?),
            SpecialKind::InvSel => SpecialCommand::InvSel(r.read_u8()?),
            SpecialKind::InvUse => SpecialCommand::InvUse(r.read_u8()?),
            SpecialKind::WeapSel => SpecialCommand::WeapSel(r.read_u8()?),
            SpecialKind::WeapSlot => SpecialCommand::WeapSlot(r.read_u8()?),
            SpecialKind::SaveGame => SpecialCommand::SaveGame {
                file: r.read_string()?,
                description: r.read_string()?,
            },
            SpecialKind::ServerInfoChanged => {
                let t = r.read_u8()?;
                let name_len = usize::from(t & 63);
                let mut name = Vec::with_capacity(name_len);
                for _ in 0..name_len {
                    name.push(r.read_u8()?);
                }
                let value = match t >> 6 {
                    CVAR_BOOL => CVarValue::Bool(r.read_u8()? != 0),
                    CVAR_INT => CVarValue::Int(r.read_i32()?),
                    CVAR_FLOAT => CVarValue::Float(r.read_f32()?),
                    _ => CVarValue::String(r.read_string()?),
                };
                SpecialCommand::ServerInfoChanged {
                    name: String::from_utf8_lossy(&name).into_owned(),
                    value,
                }
            }
            SpecialKind::Suicide => SpecialCommand::Suicide,
            SpecialKind::KillBots => SpecialCommand::KillBots,
            SpecialKind::WeapNext => SpecialCommand::WeapNext,
            SpecialKind::WeapPrev => SpecialCommand::WeapPrev,
            SpecialKind::Pause => SpecialCommand::Pause,
        };
        Ok(cmd)
    }

    /// Steps over the body of a record whose discriminator was already read.
    pub fn skip(kind: SpecialKind, r: &mut Reader<'_>) -> Result<(), WireError> {
        for field in kind.layout() {
            match field {
                Field::Byte => r.skip(1)?,
                Field::CStr => r.skip_cstr()?,
                Field::CVar => {
                    let t = r.read_u8()?;
                    r.skip(usize::from(t & 63))?;
                    match t >> 6 {
                        CVAR_BOOL => r.skip(1)?,
                        CVAR_INT | CVAR_FLOAT => r.skip(4)?,
                        _ => r.skip_cstr()?,
                    }
                }
            }
        }
        Ok(())
    }
}

/// Decodes a run of complete special records, as drained from a stream.
pub fn decode_specials(bytes: &[u8]) -> Result<Vec<SpecialCommand>, WireError> {
    let mut r = Reader::new(bytes);
    let mut out = Vec::new();
    while !r.is_empty() {
        let b = r.read_u8()?;
        let kind = SpecialKind::from_u8(b).ok_or(WireError::UnknownSpecial(b))?;
        out.push(SpecialCommand::read(kind, &mut r)?);
    }
    Ok(out)
}

/// Per-tic outgoing special bytes, kept for `BACKUPTICS` tics so resends
/// carry exactly what the first send carried.
#[derive(Debug)]
pub struct SpecialStream {
    slots: Vec<BytesMut>,
    owners: Vec<Option<Tic>>,
    current: Option<Tic>,
    special_size: usize,
}

impl Default for SpecialStream {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecialStream {
    pub fn new() -> Self {
        Self {
            slots: (0..BACKUPTICS)
                .map(|_| BytesMut::with_capacity(INITIAL_SPECIAL_SIZE))
                .collect(),
            owners: vec![None; BACKUPTICS],
            current: None,
            special_size: INITIAL_SPECIAL_SIZE,
        }
    }

    fn slot(tic: Tic) -> usize {
        tic.rem_euclid(BACKUPTICS as Tic) as usize
    }

    /// Tic currently being assembled.
    pub fn current_tic(&self) -> Option<Tic> {
        self.current
    }

    pub fn special_size(&self) -> usize {
        self.special_size
    }

    /// Closes the previous tic and starts collecting for `tic`.
    pub fn begin_tic(&mut self, tic: Tic) {
        let slot = Self::slot(tic);
        self.slots[slot].clear();
        self.owners[slot] = Some(tic);
        self.current = Some(tic);
    }

    fn current_buf(&mut self, extra: usize) -> Option<&mut BytesMut> {
        let tic = self.current?;
        let slot = Self::slot(tic);
        let needed = self.slots[slot].len() + extra;
        if needed > self.special_size {
            while needed > self.special_size {
                self.special_size *= 2;
            }
            debug!(
                { fields::TIC } = tic,
                { fields::SPECIAL_SIZE } = self.special_size,
                "Expanding special size"
            );
            for buf in &mut self.slots {
                let len = buf.len();
                buf.reserve(self.special_size - len);
            }
        }
        Some(&mut self.slots[slot])
    }

    pub fn write_byte(&mut self, v: u8) {
        if let Some(buf) = self.current_buf(1) {
            buf.put_u8(v);
        }
    }

    pub fn write_word(&mut self, v: u16) {
        if let Some(buf) = self.current_buf(2) {
            buf.put_u16_le(v);
        }
    }

    pub fn write_long(&mut self, v: u32) {
        if let Some(buf) = self.current_buf(4) {
            buf.put_u32_le(v);
        }
    }

    pub fn write_float(&mut self, v: f32) {
        if let Some(buf) = self.current_buf(4) {
            buf.put_f32_le(v);
        }
    }

    /// NUL-terminated; anything after an interior NUL is dropped.
    pub fn write_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        if let Some(buf) = self.current_buf(end + 1) {
            buf.put_slice(&bytes[..end]);
            buf.put_u8(0);
        }
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        if let Some(buf) = self.current_buf(data.len()) {
            buf.put_slice(data);
        }
    }

    pub fn write_command(&mut self, cmd: &SpecialCommand) {
        let mut w = Writer::new();
        cmd.write(&mut w);
        self.write_bytes(w.as_slice());
    }

    /// Committed bytes of a closed tic. The open tic and tics that have
    /// rotated out of the ring yield nothing.
    pub fn drain(&self, tic: Tic) -> &[u8] {
        if self.current == Some(tic) {
            return &[];
        }
        let slot = Self::slot(tic);
        if self.owners[slot] == Some(tic) {
            &self.slots[slot][..]
        } else {
            &[]
        }
    }
}
