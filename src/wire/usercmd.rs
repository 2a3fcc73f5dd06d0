// Packed player input
// A flags byte announces which fields follow; a field is sent only when it
// is non-zero. Roll and use live behind a second flags byte.

use super::{Reader, WireError, Writer};

const UCMDF_BUTTONS: u8 = 0x01;
const UCMDF_PITCH: u8 = 0x02;
const UCMDF_YAW: u8 = 0x04;
const UCMDF_FORWARDMOVE: u8 = 0x08;
const UCMDF_SIDEMOVE: u8 = 0x10;
const UCMDF_UPMOVE: u8 = 0x20;
const UCMDF_IMPULSE: u8 = 0x40;
const UCMDF_MORE: u8 = 0x80;

const UCMDF_ROLL: u8 = 0x01;
const UCMDF_USE: u8 = 0x02;

/// One tic of player input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UserCmd {
    pub buttons: u8,
    pub pitch: i16,
    pub yaw: i16,
    pub forward_move: i16,
    pub side_move: i16,
    pub up_move: i16,
    pub impulse: u8,
    pub roll: i16,
    pub use_item: u8,
}

/// Input plus the consistency fingerprint it was built against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TicCmd {
    pub consistency: u16,
    pub ucmd: UserCmd,
}

impl TicCmd {
    pub fn new(consistency: u16, ucmd: UserCmd) -> Self {
        Self { consistency, ucmd }
    }
}

pub fn pack_user_cmd(w: &mut Writer, cmd: &UserCmd) {
    let mut flags = 0u8;
    let mut more = 0u8;

    if cmd.buttons != 0 {
        flags |= UCMDF_BUTTONS;
    }
    if cmd.pitch != 0 {
        flags |= UCMDF_PITCH;
    }
    if cmd.yaw != 0 {
        flags |= UCMDF_YAW;
    }
    if cmd.forward_move != 0 {
        flags |= UCMDF_FORWARDMOVE;
    }
    if cmd.side_move != 0 {
        flags |= UCMDF_SIDEMOVE;
    }
    if cmd.up_move != 0 {
        flags |= UCMDF_UPMOVE;
    }
    if cmd.impulse != 0 {
        flags |= UCMDF_IMPULSE;
    }
    if cmd.roll != 0 {
        more |= UCMDF_ROLL;
    }
    if cmd.use_item != 0 {
        more |= UCMDF_USE;
    }
    if more != 0 {
        flags |= UCMDF_MORE;
    }

    w.write_u8(flags);
    if flags & UCMDF_MORE != 0 {
        w.write_u8(more);
    }
    if flags & UCMDF_BUTTONS != 0 {
        w.write_u8(cmd.buttons);
    }
    if flags & UCMDF_PITCH != 0 {
        w.write_i16(cmd.pitch);
    }
    if flags & UCMDF_YAW != 0 {
        w.write_i16(cmd.yaw);
    }
    if flags & UCMDF_FORWARDMOVE != 0 {
        w.write_i16(cmd.forward_move);
    }
    if flags & UCMDF_SIDEMOVE != 0 {
        w.write_i16(cmd.side_move);
    }
    if flags & UCMDF_UPMOVE != 0 {
        w.write_i16(cmd.up_move);
    }
    if flags & UCMDF_IMPULSE != 0 {
        w.write_u8(cmd.impulse);
    }
    if more & UCMDF_ROLL != 0 {
        w.write_i16(cmd.roll);
    }
    if more & UCMDF_USE != 0 {
        w.write_u8(cmd.use_item);
    }
}

pub fn unpack_user_cmd(r: &mut Reader<'_>) -> Result<UserCmd, WireError> {
    let mut cmd = UserCmd::default();
    let flags = r.read_u8()?;
    let more = if flags & UCMDF_MORE != 0 {
        r.read_u8()?
    } else {
        0
    };

    if flags & UCMDF_BUTTONS != 0 {
        cmd.buttons = r.read_u8()?;
    }
    if flags & UCMDF_PITCH != 0 {
        cmd.pitch = r.read_i16()?;
    }
    if flags & UCMDF_YAW != 0 {
        cmd.yaw = r.read_i16()?;
    }
    if flags & UCMDF_FORWARDMOVE != 0 {
        cmd.forward_move = r.read_i16()?;
    }
    if flags & UCMDF_SIDEMOVE != 0 {
        cmd.side_move = r.read_i16()?;
    }
    if flags & UCMDF_UPMOVE != 0 {
        cmd.up_move = r.read_i16()?;
    }
    if flags & UCMDF_IMPULSE != 0 {
        cmd.impulse = r.read_u8()?;
    }
    if more & UCMDF_ROLL != 0 {
        cmd.roll = r.read_i16()?;
    }
    if more & UCMDF_USE != 0 {
        cmd.use_item = r.read_u8()?;
    }
    Ok(cmd)
}

/// Size of the packed fields selected by the flag bytes, without decoding them.
pub fn skip_user_cmd(r: &mut Reader<'_>) -> Result<(), WireError> {
    let flags = r.read_u8()?;
    let more = if flags & UCMDF_MORE != 0 {
        r.read_u8()?
    } else {
        0
    };

    let mut len = 0;
    for (bit, size) in [
        (UCMDF_BUTTONS, 1),
        (UCMDF_PITCH, 2),
        (UCMDF_YAW, 2),
        (UCMDF_FORWARDMOVE, 2),
        (UCMDF_SIDEMOVE, 2),
        (UCMDF_UPMOVE, 2),
        (UCMDF_IMPULSE, 1),
    ] {
        if flags & bit != 0 {
            len += size;
        }
    }
    if more & UCMDF_ROLL != 0 {
        len += 2;
    }
    if more & UCMDF_USE != 0 {
        len += 1;
    }
    r.skip(len)
}
