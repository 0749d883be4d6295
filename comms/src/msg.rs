use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize, SystemState};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const ALPHA_H: Header = 2;
const STATES_H: Header = 3;
const ENERGIES_H: Header = 4;

const COUNT_SIZE: usize = size_of::<u64>();

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// A single control parameter.
    Alpha(f64),
    /// An ordered collection of replica states.
    States(Cow<'a, [SystemState]>),
    /// One row of the energy matrix, one entry per replica.
    Energies(Cow<'a, [f64]>),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Join { rank: usize },
    Welcome { world_size: usize },
    Ack,
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name of the message variant, used when reporting protocol violations.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Join { .. }) => "control/join",
            Msg::Control(Command::Welcome { .. }) => "control/welcome",
            Msg::Control(Command::Ack) => "control/ack",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Alpha(_)) => "data/alpha",
            Msg::Data(Payload::States(_)) => "data/states",
            Msg::Data(Payload::Energies(_)) => "data/energies",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(byte: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind byte {byte}"),
        ))
    }

    fn invalid_len<T>(what: &str, got: usize, expected: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid {what} payload of {got} bytes, expected {expected}"),
        ))
    }

    fn deserialize_states(rest: &[u8]) -> io::Result<Vec<SystemState>> {
        if rest.len() < 2 * COUNT_SIZE {
            return Self::invalid_len("states", rest.len(), 2 * COUNT_SIZE);
        }

        let (counts, mut records) = rest.split_at(2 * COUNT_SIZE);
        let (count, n_atoms) = counts.split_at(COUNT_SIZE);
        let count = read_count(count)?;
        let n_atoms = read_count(n_atoms)?;

        let expected = n_atoms
            .checked_mul(6)
            .and_then(|words| words.checked_add(3))
            .and_then(|words| words.checked_mul(COUNT_SIZE))
            .and_then(|len| len.checked_mul(count))
            .unwrap_or(usize::MAX);

        if records.len() != expected {
            return Self::invalid_len("states", records.len(), expected);
        }

        let mut states = Vec::with_capacity(count);
        for _ in 0..count {
            let (state, tail) = SystemState::decode(records, n_atoms)?;
            states.push(state);
            records = tail;
        }

        Ok(states)
    }
}

fn read_count(bytes: &[u8]) -> io::Result<usize> {
    let count = <[u8; COUNT_SIZE]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    usize::try_from(count).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());

                // `Command` derives its serde impls and has no non string-keyed maps,
                // writing it into a vector can't fail.
                if let Err(e) = serde_json::to_writer(&mut *buf, cmd) {
                    unreachable!("failed to serialize command {cmd:?}: {e}");
                }
                None
            }
            Msg::Data(Payload::Alpha(alpha)) => {
                buf.extend_from_slice(&ALPHA_H.to_be_bytes());
                buf.extend_from_slice(&alpha.to_ne_bytes());
                None
            }
            Msg::Data(Payload::States(states)) => {
                buf.extend_from_slice(&STATES_H.to_be_bytes());

                let n_atoms = states.first().map(SystemState::n_atoms).unwrap_or_default();
                buf.extend_from_slice(&(states.len() as u64).to_be_bytes());
                buf.extend_from_slice(&(n_atoms as u64).to_be_bytes());
                buf.reserve(states.len() * SystemState::encoded_len(n_atoms));

                for state in states.iter() {
                    state.encode(buf);
                }
                None
            }
            Msg::Data(Payload::Energies(energies)) => {
                buf.extend_from_slice(&ENERGIES_H.to_be_bytes());
                Some(bytemuck::cast_slice::<f64, u8>(energies))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let buf: &'a [u8] = buf;
        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let mut kind = [0; HEADER_SIZE];
        kind.copy_from_slice(kind_buf);

        match Header::from_be_bytes(kind) {
            ERR_H => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_H => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            ALPHA_H => {
                let bytes: [u8; 8] = rest
                    .try_into()
                    .or_else(|_| Self::invalid_len("alpha", rest.len(), 8))?;

                Ok(Self::Data(Payload::Alpha(f64::from_ne_bytes(bytes))))
            }
            STATES_H => {
                let states = Self::deserialize_states(rest)?;
                Ok(Self::Data(Payload::States(Cow::Owned(states))))
            }
            ENERGIES_H => {
                if rest.len() % size_of::<f64>() != 0 {
                    let expected = rest.len().next_multiple_of(size_of::<f64>());
                    return Self::invalid_len("energies", rest.len(), expected);
                }

                let energies = bytemuck::pod_collect_to_vec(rest);
                Ok(Self::Data(Payload::Energies(Cow::Owned(energies))))
            }
            kind => Self::invalid_kind_byte(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn roundtrip(msg: &Msg<'_>) -> Vec<u8> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf);
        buf.extend_from_slice(tail.unwrap_or_default());
        buf
    }

    #[test]
    fn states_payload_keeps_order() {
        let states: Vec<_> = (0..3)
            .map(|i| {
                let v = i as f64;
                SystemState::new(
                    Array2::from_elem((5, 3), v),
                    Array2::from_elem((5, 3), v),
                    v / 10.0,
                    Some(v),
                )
                .unwrap()
            })
            .collect();

        let mut buf = roundtrip(&Msg::Data(Payload::States(Cow::Borrowed(&states))));
        let Msg::Data(Payload::States(decoded)) = Msg::deserialize(&mut buf).unwrap() else {
            panic!("expected states");
        };

        assert_eq!(decoded.as_ref(), states.as_slice());
    }

    #[test]
    fn empty_states_payload() {
        let mut buf = roundtrip(&Msg::Data(Payload::States(Cow::Borrowed(&[]))));
        let Msg::Data(Payload::States(decoded)) = Msg::deserialize(&mut buf).unwrap() else {
            panic!("expected states");
        };

        assert!(decoded.is_empty());
    }

    #[test]
    fn control_is_json() {
        let mut buf = roundtrip(&Msg::Control(Command::Join { rank: 3 }));
        assert_eq!(&buf[HEADER_SIZE..], br#"{"join":{"rank":3}}"#);

        let msg = Msg::deserialize(&mut buf).unwrap();
        assert!(matches!(msg, Msg::Control(Command::Join { rank: 3 })));
    }

    #[test]
    fn err_borrows_from_buffer() {
        let mut buf = roundtrip(&Msg::Err(Cow::Borrowed("bad rank")));
        let Msg::Err(detail) = Msg::deserialize(&mut buf).unwrap() else {
            panic!("expected err");
        };

        assert!(matches!(detail, Cow::Borrowed("bad rank")));
    }

    #[test]
    fn rejects_truncated_states() {
        let state = SystemState::new(Array2::zeros((2, 3)), Array2::zeros((2, 3)), 0.0, None)
            .unwrap();
        let mut buf = roundtrip(&Msg::Data(Payload::States(Cow::Owned(vec![state]))));
        buf.truncate(buf.len() - 8);

        let err = Msg::deserialize(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_misaligned_energies() {
        let mut buf = roundtrip(&Msg::Data(Payload::Energies(Cow::Borrowed(&[1.0, 2.0]))));
        buf.pop();

        assert!(Msg::deserialize(&mut buf).is_err());
    }

    #[test]
    fn rejects_unknown_kind() {
        let mut buf = 9u32.to_be_bytes().to_vec();
        assert!(Msg::deserialize(&mut buf).is_err());
    }

    #[test]
    fn rejects_short_header() {
        let mut buf = vec![0, 1];
        assert!(Msg::deserialize(&mut buf).is_err());
    }
}
