//! The transportable snapshot of a single replica.

use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::{Array2, ArrayView2};

const WORD: usize = size_of::<u64>();
const NO_ENERGY: u64 = 0;
const HAS_ENERGY: u64 = 1;

/// Error returned when positions and velocities don't describe the same set of atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeErr {
    pub positions: (usize, usize),
    pub velocities: (usize, usize),
}

impl Display for ShapeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (pr, pc) = self.positions;
        let (vr, vc) = self.velocities;
        write!(
            f,
            "invalid state shape: positions are {pr}x{pc}, velocities are {vr}x{vc}, both must be n_atoms x 3"
        )
    }
}

impl Error for ShapeErr {}

/// Positions, velocities, alpha and energy of one replica.
///
/// Both arrays are `n_atoms x 3` and share the same atom indexing. Cloning
/// yields a fully detached copy.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemState {
    positions: Array2<f64>,
    velocities: Array2<f64>,
    alpha: f64,
    energy: Option<f64>,
}

impl SystemState {
    /// Creates a new `SystemState`.
    ///
    /// # Arguments
    /// * `positions` - An `n_atoms x 3` array of coordinates.
    /// * `velocities` - An `n_atoms x 3` array of velocities.
    /// * `alpha` - The control parameter of the replica.
    /// * `energy` - The evaluated energy, if any.
    ///
    /// # Returns
    /// The new state or `ShapeErr` if the arrays don't have matching `n x 3` shapes.
    pub fn new(
        positions: Array2<f64>,
        velocities: Array2<f64>,
        alpha: f64,
        energy: Option<f64>,
    ) -> Result<Self, ShapeErr> {
        if positions.ncols() != 3 || positions.dim() != velocities.dim() {
            return Err(ShapeErr {
                positions: positions.dim(),
                velocities: velocities.dim(),
            });
        }

        Ok(Self {
            positions,
            velocities,
            alpha,
            energy,
        })
    }

    pub fn positions(&self) -> ArrayView2<'_, f64> {
        self.positions.view()
    }

    pub fn velocities(&self) -> ArrayView2<'_, f64> {
        self.velocities.view()
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn energy(&self) -> Option<f64> {
        self.energy
    }

    pub fn n_atoms(&self) -> usize {
        self.positions.nrows()
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha;
    }

    pub fn set_energy(&mut self, energy: Option<f64>) {
        self.energy = energy;
    }

    /// Size in bytes of one encoded state with `n_atoms` atoms.
    pub fn encoded_len(n_atoms: usize) -> usize {
        (3 + 6 * n_atoms) * WORD
    }

    /// Appends the binary form of this state to `buf`.
    ///
    /// Floats are copied as raw bit patterns so the receiving end rebuilds the exact
    /// same values.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.alpha.to_ne_bytes());

        let (flag, energy) = match self.energy {
            Some(energy) => (HAS_ENERGY, energy),
            None => (NO_ENERGY, 0.0),
        };

        buf.extend_from_slice(&flag.to_be_bytes());
        buf.extend_from_slice(&energy.to_ne_bytes());
        encode_array(&self.positions, buf);
        encode_array(&self.velocities, buf);
    }

    /// Rebuilds a state of `n_atoms` atoms from the start of `buf`.
    ///
    /// # Returns
    /// The decoded state and the remaining unread bytes.
    pub fn decode(buf: &[u8], n_atoms: usize) -> io::Result<(Self, &[u8])> {
        let needed = Self::encoded_len(n_atoms);
        if buf.len() < needed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "truncated state: got {} bytes, expected {needed} for {n_atoms} atoms",
                    buf.len()
                ),
            ));
        }

        let (record, rest) = buf.split_at(needed);
        let (head, arrays) = record.split_at(3 * WORD);
        let words: Vec<u64> = bytemuck::pod_collect_to_vec(head);

        let alpha = f64::from_bits(words[0]);
        let energy = match u64::from_be(words[1]) {
            NO_ENERGY => None,
            HAS_ENERGY => Some(f64::from_bits(words[2])),
            flag => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid energy flag {flag}"),
                ));
            }
        };

        let (positions, velocities) = arrays.split_at(3 * n_atoms * WORD);
        let positions = decode_array(positions, n_atoms)?;
        let velocities = decode_array(velocities, n_atoms)?;

        let state = Self {
            positions,
            velocities,
            alpha,
            energy,
        };

        Ok((state, rest))
    }
}

fn encode_array(array: &Array2<f64>, buf: &mut Vec<u8>) {
    match array.as_slice() {
        Some(nums) => buf.extend_from_slice(bytemuck::cast_slice(nums)),
        None => array
            .iter()
            .for_each(|x| buf.extend_from_slice(&x.to_ne_bytes())),
    }
}

fn decode_array(bytes: &[u8], n_atoms: usize) -> io::Result<Array2<f64>> {
    let nums: Vec<f64> = bytemuck::pod_collect_to_vec(bytes);
    Array2::from_shape_vec((n_atoms, 3), nums)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn state(n_atoms: usize, value: f64, energy: Option<f64>) -> SystemState {
        let positions = Array2::from_elem((n_atoms, 3), value);
        let velocities = Array2::from_elem((n_atoms, 3), -value);
        SystemState::new(positions, velocities, value / 10.0, energy).unwrap()
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let err = SystemState::new(Array2::zeros((4, 3)), Array2::zeros((5, 3)), 0.0, None)
            .unwrap_err();
        assert_eq!(err.positions, (4, 3));
        assert_eq!(err.velocities, (5, 3));
    }

    #[test]
    fn rejects_non_cartesian_arrays() {
        let res = SystemState::new(Array2::zeros((4, 2)), Array2::zeros((4, 2)), 0.0, None);
        assert!(res.is_err());
    }

    #[test]
    fn clone_is_detached() {
        let original = state(3, 1.0, Some(2.0));
        let mut copy = original.clone();
        copy.set_alpha(0.9);
        copy.set_energy(None);

        assert_eq!(original.alpha(), 0.1);
        assert_eq!(original.energy(), Some(2.0));
    }

    #[test]
    fn decode_preserves_bit_patterns() {
        let mut positions = Array2::zeros((2, 3));
        positions[[0, 0]] = -0.0;
        positions[[0, 1]] = f64::MIN_POSITIVE / 2.0;
        positions[[1, 2]] = f64::NAN;
        let velocities = Array2::from_elem((2, 3), 1.0 / 3.0);
        let original = SystemState::new(positions, velocities, 0.7, None).unwrap();

        let mut buf = Vec::new();
        original.encode(&mut buf);
        assert_eq!(buf.len(), SystemState::encoded_len(2));

        let (decoded, rest) = SystemState::decode(&buf, 2).unwrap();
        assert!(rest.is_empty());

        let bits = |a: ArrayView2<'_, f64>| a.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(decoded.positions()), bits(original.positions()));
        assert_eq!(bits(decoded.velocities()), bits(original.velocities()));
        assert_eq!(decoded.alpha(), 0.7);
        assert_eq!(decoded.energy(), None);
    }

    #[test]
    fn decode_keeps_logical_order_of_transposed_arrays() {
        let positions = Array2::from_shape_vec((3, 2), (0..6).map(f64::from).collect())
            .unwrap()
            .reversed_axes();
        let expected = positions.to_owned();
        let original =
            SystemState::new(positions, Array2::zeros((2, 3)), 0.0, Some(1.5)).unwrap();

        let mut buf = Vec::new();
        original.encode(&mut buf);
        let (decoded, _) = SystemState::decode(&buf, 2).unwrap();

        assert_eq!(decoded.positions(), expected.view());
        assert_eq!(decoded.energy(), Some(1.5));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let mut buf = Vec::new();
        state(4, 1.0, None).encode(&mut buf);
        buf.pop();

        let err = SystemState::decode(&buf, 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
