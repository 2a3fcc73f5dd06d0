// Packet framing
//
// Header (8 bytes):
//   u32  checksum (low 28 bits) | flags (high 4 bits)
//   u8   retransmit_from (low byte of the tic we want resent)
//   u8   start_tic       (low byte of the first tic carried)
//   u8   player          (top bit marks a drone)
//   u8   num_tics
// Payload, repeated num_tics times:
//   u16  consistency
//   ...  special records, each led by a discriminator byte
//   u8   DEM_USERCMD marker
//   ...  packed user command

use num_traits::FromPrimitive;

use super::checksum::{compute_checksum, NCMD_CHECKSUM};
use super::usercmd::{pack_user_cmd, skip_user_cmd, unpack_user_cmd, TicCmd};
use super::{Reader, WireError, Writer};
use crate::special::{SpecialCommand, SpecialKind};
use crate::Tic;

pub const NCMD_EXIT: u32 = 0x8000_0000;
pub const NCMD_RETRANSMIT: u32 = 0x4000_0000;
pub const NCMD_SETUP: u32 = 0x2000_0000;
pub const NCMD_KILL: u32 = 0x1000_0000;

pub const PL_DRONE: u8 = 0x80;

pub const HEADER_SIZE: usize = 8;
pub const MAX_MSGLEN: usize = 14000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketHeader {
    /// Only the NCMD_* bits; the checksum is computed on encode.
    pub flags: u32,
    pub retransmit_from: u8,
    pub start_tic: u8,
    pub player: u8,
    pub num_tics: u8,
}

impl PacketHeader {
    pub fn is_exit(&self) -> bool {
        self.flags & NCMD_EXIT != 0
    }

    pub fn is_setup(&self) -> bool {
        self.flags & NCMD_SETUP != 0
    }

    pub fn is_kill(&self) -> bool {
        self.flags & NCMD_KILL != 0
    }

    pub fn wants_retransmit(&self) -> bool {
        self.flags & NCMD_RETRANSMIT != 0
    }

    pub fn is_drone(&self) -> bool {
        self.player & PL_DRONE != 0
    }

    pub fn player_num(&self) -> usize {
        usize::from(self.player & !PL_DRONE)
    }

    fn parse(bytes: &[u8]) -> Result<(Self, u32), WireError> {
        if bytes.len() < HEADER_SIZE {
            return Err(WireError::TooShort(bytes.len()));
        }
        let mut r = Reader::new(bytes);
        let word = r.read_u32()?;
        let header = PacketHeader {
            flags: word & !NCMD_CHECKSUM,
            retransmit_from: r.read_u8()?,
            start_tic: r.read_u8()?,
            player: r.read_u8()?,
            num_tics: r.read_u8()?,
        };
        Ok((header, word & NCMD_CHECKSUM))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(header: PacketHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Header-only EXIT packet.
    pub fn exit(player: u8) -> Self {
        Self::new(
            PacketHeader {
                flags: NCMD_EXIT,
                player,
                ..Default::default()
            },
            Vec::new(),
        )
    }

    /// Serializes the packet and stamps the checksum into the first word.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let total = HEADER_SIZE + self.payload.len();
        if total > MAX_MSGLEN {
            return Err(WireError::TooLarge(total));
        }

        let mut tail = Writer::with_capacity(total - 4);
        tail.write_u8(self.header.retransmit_from);
        tail.write_u8(self.header.start_tic);
        tail.write_u8(self.header.player);
        tail.write_u8(self.header.num_tics);
        tail.write_bytes(&self.payload);

        let checksum = compute_checksum(tail.as_slice());
        let mut out = Writer::with_capacity(total);
        out.write_u32(checksum | (self.header.flags & !NCMD_CHECKSUM));
        out.write_bytes(tail.as_slice());
        Ok(out.into_vec())
    }

    /// Validates checksum then length. Setup packets carry a different
    /// payload and only get the checksum test.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (header, expected) = PacketHeader::parse(bytes)?;
        let actual = compute_checksum(&bytes[4..]);
        if expected != actual {
            return Err(WireError::BadChecksum { expected, actual });
        }

        if !header.is_setup() {
            let size = netbuffer_size(bytes)?;
            if size != bytes.len() {
                return Err(WireError::LengthMismatch {
                    expected: size,
                    actual: bytes.len(),
                });
            }
        }

        Ok(Self::new(header, bytes[HEADER_SIZE..].to_vec()))
    }
}

/// Length a gameplay packet should have, found by walking its tic records.
pub fn netbuffer_size(bytes: &[u8]) -> Result<usize, WireError> {
    let (header, _) = PacketHeader::parse(bytes)?;
    if header.is_exit() {
        return Ok(HEADER_SIZE);
    }
    let mut r = Reader::new(&bytes[HEADER_SIZE..]);
    skip_tic_cmds(&mut r, usize::from(header.num_tics))?;
    Ok(HEADER_SIZE + r.position())
}

/// Appends one tic record. `specials` is the raw special-stream content for
/// the tic and is copied verbatim so resends carry identical bytes.
pub fn write_tic_cmd(w: &mut Writer, cmd: &TicCmd, specials: &[u8]) {
    w.write_u16(cmd.consistency);
    w.write_bytes(specials);
    w.write_u8(SpecialKind::UserCmd as u8);
    pack_user_cmd(w, &cmd.ucmd);
}

fn read_kind(r: &mut Reader<'_>) -> Result<SpecialKind, WireError> {
    let b = r.read_u8()?;
    SpecialKind::from_u8(b).ok_or(WireError::UnknownSpecial(b))
}

pub fn read_tic_cmd(r: &mut Reader<'_>) -> Result<(TicCmd, Vec<SpecialCommand>), WireError> {
    let consistency = r.read_u16()?;
    let mut specials = Vec::new();
    loop {
        let kind = read_kind(r)?;
        if kind == SpecialKind::UserCmd {
            break;
        }
        specials.push(SpecialCommand::read(kind, r)?);
    }
    let ucmd = unpack_user_cmd(r)?;
    Ok((TicCmd { consistency, ucmd }, specials))
}

/// Steps over `count` tic records without decoding them.
pub fn skip_tic_cmds(r: &mut Reader<'_>, count: usize) -> Result<(), WireError> {
    for _ in 0..count {
        r.skip(2)?;
        loop {
            let kind = read_kind(r)?;
            if kind == SpecialKind::UserCmd {
                break;
            }
            SpecialCommand::skip(kind, r)?;
        }
        skip_user_cmd(r)?;
    }
    Ok(())
}

/// Rebuilds a full tic number from its low byte, picking the candidate
/// within 64 tics of `maketic`.
pub fn expand_tics(low: u8, maketic: Tic) -> Tic {
    let low = Tic::from(low);
    let base = maketic & !0xff;
    let delta = low - (maketic & 0xff);

    if delta > 64 {
        base - 256 + low
    } else if delta < -64 {
        base + 256 + low
    } else {
        base + low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::special::CVarValue;
    use crate::wire::UserCmd;
    use proptest::prelude::*;

    fn tic_packet(start: u8, cmds: &[(TicCmd, Vec<u8>)]) -> Packet {
        let mut w = Writer::new();
        for (cmd, specials) in cmds {
            write_tic_cmd(&mut w, cmd, specials);
        }
        Packet::new(
            PacketHeader {
                start_tic: start,
                player: 1,
                num_tics: cmds.len() as u8,
                ..Default::default()
            },
            w.into_vec(),
        )
    }

    fn special_bytes(cmds: &[SpecialCommand]) -> Vec<u8> {
        let mut w = Writer::new();
        for cmd in cmds {
            cmd.write(&mut w);
        }
        w.into_vec()
    }

    #[test]
    fn test_expand_tics() {
        assert_eq!(expand_tics(5, 300), 261);
        assert_eq!(expand_tics(44, 300), 300);
        assert_eq!(expand_tics(250, 260), 250);
        assert_eq!(expand_tics(3, 250), 259);
        assert_eq!(expand_tics(0, 0), 0);
    }

    #[test]
    fn test_encode_decode_with_specials() {
        let say = SpecialCommand::Say {
            who: 0,
            text: "hello".into(),
        };
        let cvar = SpecialCommand::ServerInfoChanged {
            name: "sv_gravity".into(),
            value: CVarValue::Float(800.0),
        };
        let cmd = TicCmd::new(
            0xbeef,
            UserCmd {
                yaw: 90,
                ..Default::default()
            },
        );
        let packet = tic_packet(
            7,
            &[
                (cmd, special_bytes(&[say.clone(), cvar.clone()])),
                (TicCmd::default(), Vec::new()),
            ],
        );

        let bytes = packet.encode().unwrap();
        assert_eq!(netbuffer_size(&bytes).unwrap(), bytes.len());

        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);

        let mut r = Reader::new(&decoded.payload);
        let (first, specials) = read_tic_cmd(&mut r).unwrap();
        assert_eq!(first, cmd);
        assert_eq!(specials, vec![say, cvar]);
        let (second, specials) = read_tic_cmd(&mut r).unwrap();
        assert_eq!(second, TicCmd::default());
        assert!(specials.is_empty());
        assert!(r.is_empty());
    }

    #[test]
    fn test_exit_packet_is_header_only() {
        let bytes = Packet::exit(3).encode().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let decoded = Packet::decode(&bytes).unwrap();
        assert!(decoded.header.is_exit());
        assert_eq!(decoded.header.player_num(), 3);
    }

    #[test]
    fn test_corruption_is_droppable() {
        let packet = tic_packet(0, &[(TicCmd::default(), Vec::new())]);
        let mut bytes = packet.encode().unwrap();
        bytes[HEADER_SIZE] ^= 0x40;
        let err = Packet::decode(&bytes).unwrap_err();
        assert!(matches!(err, WireError::BadChecksum { .. }));
        assert!(err.is_corruption());

        let err = Packet::decode(&bytes[..5]).unwrap_err();
        assert_eq!(err, WireError::TooShort(5));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_trailing_garbage_is_length_mismatch() {
        let mut packet = tic_packet(0, &[(TicCmd::default(), Vec::new())]);
        packet.payload.push(0);
        let bytes = packet.encode().unwrap();
        assert_eq!(
            Packet::decode(&bytes),
            Err(WireError::LengthMismatch {
                expected: bytes.len() - 1,
                actual: bytes.len()
            })
        );
    }

    #[test]
    fn test_unknown_special_is_fatal() {
        let mut w = Writer::new();
        w.write_u16(0);
        w.write_u8(0xee);
        let packet = Packet::new(
            PacketHeader {
                num_tics: 1,
                ..Default::default()
            },
            w.into_vec(),
        );
        let err = Packet::decode(&packet.encode().unwrap()).unwrap_err();
        assert_eq!(err, WireError::UnknownSpecial(0xee));
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_setup_packets_skip_length_walk() {
        let packet = Packet::new(
            PacketHeader {
                flags: NCMD_SETUP,
                player: 1,
                ..Default::default()
            },
            b"map01\0\x01\x02\x03\x04".to_vec(),
        );
        let bytes = packet.encode().unwrap();
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_oversized_packet_rejected() {
        let packet = Packet::new(PacketHeader::default(), vec![0; MAX_MSGLEN]);
        assert_eq!(
            packet.encode(),
            Err(WireError::TooLarge(MAX_MSGLEN + HEADER_SIZE))
        );
    }

    fn arb_special() -> impl Strategy<Value = SpecialCommand> {
        prop_oneof![
            (any::<u8>(), "[a-z ]{0,12}").prop_map(|(who, text)| SpecialCommand::Say { who, text }),
            any::<u8>().prop_map(SpecialCommand::WeapSlot),
            Just(SpecialCommand::Suicide),
            ("[a-z]{1,8}", "[a-z ]{0,8}")
                .prop_map(|(file, description)| SpecialCommand::SaveGame { file, description }),
            ("[a-z_]{1,10}", any::<i32>()).prop_map(|(name, v)| SpecialCommand::ServerInfoChanged {
                name,
                value: CVarValue::Int(v),
            }),
        ]
    }

    fn arb_tic() -> impl Strategy<Value = (TicCmd, Vec<SpecialCommand>)> {
        (
            any::<u16>(),
            any::<i16>(),
            any::<i16>(),
            any::<u8>(),
            proptest::collection::vec(arb_special(), 0..3),
        )
            .prop_map(|(consistency, yaw, forward_move, buttons, specials)| {
                let ucmd = UserCmd {
                    yaw,
                    forward_move,
                    buttons,
                    ..Default::default()
                };
                (TicCmd::new(consistency, ucmd), specials)
            })
    }

    proptest! {
        #[test]
        fn skip_lands_where_read_lands(
            tics in proptest::collection::vec(arb_tic(), 1..12),
            split in 0usize..12,
        ) {
            let split = split.min(tics.len());
            let mut w = Writer::new();
            for (cmd, specials) in &tics {
                write_tic_cmd(&mut w, cmd, &special_bytes(specials));
            }
            let bytes = w.into_vec();

            let mut skipped = Reader::new(&bytes);
            skip_tic_cmds(&mut skipped, split).unwrap();
            let mut read = Reader::new(&bytes);
            for _ in 0..split {
                read_tic_cmd(&mut read).unwrap();
            }
            prop_assert_eq!(skipped.position(), read.position());

            for (cmd, specials) in &tics[split..] {
                let (got, got_specials) = read_tic_cmd(&mut skipped).unwrap();
                prop_assert_eq!(&got, cmd);
                prop_assert_eq!(&got_specials, specials);
            }
            prop_assert!(skipped.is_empty());
        }

        #[test]
        fn expand_tics_recovers_nearby_tics(maketic in 0i32..100_000, offset in -64i32..=64) {
            let tic = maketic + offset;
            prop_assume!(tic >= 0);
            prop_assert_eq!(expand_tics((tic & 0xff) as u8, maketic), tic);
        }
    }
}
