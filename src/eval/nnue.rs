//! NNUE network loading and the forward pass: affine -> clipped ReLU ->
//! affine -> clipped ReLU -> affine scalar, over a 12x64 one-hot board
//! encoding.
//!
//! Weights are stored as `i16` and accumulated in `i32`, scaled back down
//! by `ACTIVATION_SCALE_BITS` after each affine layer -- standard
//! fixed-point NNUE practice that keeps the forward pass in integer
//! arithmetic.

use crate::basetypes::*;
use crate::bitsets::BitboardIter;
use crate::error::NetworkError;
use crate::position::Position;
use std::fs;

const MAGIC: &[u8; 16] = b"ALCIBIADES-NNUE\0";
const FORMAT_VERSION: u32 = 1;
const ACTIVATION_SCALE_BITS: u32 = 6;

fn clipped_relu(x: i32) -> i32 {
    x.clamp(0, 127 << ACTIVATION_SCALE_BITS) >> ACTIVATION_SCALE_BITS
}

/// A loaded, ready-to-evaluate NNUE network.
pub struct Network {
    input_size: usize,
    l1_size: usize,
    l2_size: usize,
    w1: Vec<i16>,
    b1: Vec<i16>,
    w2: Vec<i16>,
    b2: Vec<i16>,
    w3: Vec<i16>,
    b3: i16,
}

impl Network {
    pub fn load_file(path: &str) -> Result<Network, NetworkError> {
        let bytes = fs::read(path)?;
        Network::load_bytes(&bytes)
    }

    pub fn load_bytes(bytes: &[u8]) -> Result<Network, NetworkError> {
        let mut cursor = 0usize;

        let magic = read_bytes(bytes, &mut cursor, 16, "magic")?;
        if magic != MAGIC {
            return Err(NetworkError::BadMagic);
        }

        let version = read_u32(bytes, &mut cursor, "version")?;
        if version != FORMAT_VERSION {
            return Err(NetworkError::BadVersion { found: version, expected: FORMAT_VERSION });
        }

        let input_size = read_u32(bytes, &mut cursor, "input_size")? as usize;
        let l1_size = read_u32(bytes, &mut cursor, "l1_size")? as usize;
        let l2_size = read_u32(bytes, &mut cursor, "l2_size")? as usize;
        let output_size = read_u32(bytes, &mut cursor, "output_size")?;
        if output_size != 1 {
            return Err(NetworkError::BadVersion { found: output_size, expected: 1 });
        }

        let w1 = read_i16_vec(bytes, &mut cursor, input_size * l1_size, "l1 weights")?;
        let b1 = read_i16_vec(bytes, &mut cursor, l1_size, "l1 biases")?;
        let w2 = read_i16_vec(bytes, &mut cursor, l1_size * l2_size, "l2 weights")?;
        let b2 = read_i16_vec(bytes, &mut cursor, l2_size, "l2 biases")?;
        let w3 = read_i16_vec(bytes, &mut cursor, l2_size, "l3 weights")?;
        let b3_vec = read_i16_vec(bytes, &mut cursor, 1, "l3 bias")?;

        Ok(Network {
            input_size,
            l1_size,
            l2_size,
            w1,
            b1,
            w2,
            b2,
            w3,
            b3: b3_vec[0],
        })
    }

    /// Serializes the network back to the on-disk format, for round-trip
    /// testing and for saving networks produced by an external tuner.
    pub fn save_file(&self, path: &str) -> Result<(), NetworkError> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.input_size as u32).to_le_bytes());
        out.extend_from_slice(&(self.l1_size as u32).to_le_bytes());
        out.extend_from_slice(&(self.l2_size as u32).to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        for v in [&self.w1, &self.b1, &self.w2, &self.b2, &self.w3] {
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        out.extend_from_slice(&self.b3.to_le_bytes());
        fs::write(path, out)?;
        Ok(())
    }

    /// Builds the two-perspective input features (own pieces then enemy
    /// pieces, each as a 6x64 one-hot block) and runs the forward pass.
    /// Returns a centipawn score from the side-to-move's perspective.
    pub fn forward(&self, pos: &Position) -> i32 {
        let us = pos.to_move();
        let them = opposite(us);
        let mut features = vec![0i32; self.input_size];
        let half = self.input_size / 2;
        let per_side = half / 6;

        for (slot, color) in [(0, us), (1, them)] {
            for piece in 0..6 {
                for sq in BitboardIter(pos.piece_type_bb()[piece] & pos.color_bb()[color]) {
                    let idx = slot * half + piece * per_side + sq;
                    if idx < features.len() {
                        features[idx] = 1;
                    }
                }
            }
        }

        let mut l1 = vec![0i32; self.l1_size];
        for (j, l1_val) in l1.iter_mut().enumerate() {
            let mut acc = self.b1[j] as i32;
            for (i, &f) in features.iter().enumerate() {
                if f != 0 {
                    acc += self.w1[i * self.l1_size + j] as i32;
                }
            }
            *l1_val = clipped_relu(acc);
        }

        let mut l2 = vec![0i32; self.l2_size];
        for (j, l2_val) in l2.iter_mut().enumerate() {
            let mut acc = self.b2[j] as i32;
            for (i, &v) in l1.iter().enumerate() {
                acc += v * self.w2[i * self.l2_size + j] as i32;
            }
            *l2_val = clipped_relu(acc);
        }

        let mut out = self.b3 as i32;
        for (i, &v) in l2.iter().enumerate() {
            out += v * self.w3[i] as i32;
        }
        out >> ACTIVATION_SCALE_BITS
    }
}

fn read_bytes<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize, section: &'static str) -> Result<&'a [u8], NetworkError> {
    if *cursor + len > bytes.len() {
        return Err(NetworkError::Truncated { section });
    }
    let slice = &bytes[*cursor..*cursor + len];
    *cursor += len;
    Ok(slice)
}

fn read_u32(bytes: &[u8], cursor: &mut usize, section: &'static str) -> Result<u32, NetworkError> {
    let slice = read_bytes(bytes, cursor, 4, section)?;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn read_i16_vec(bytes: &[u8], cursor: &mut usize, count: usize, section: &'static str) -> Result<Vec<i16>, NetworkError> {
    let slice = read_bytes(bytes, cursor, count * 2, section)?;
    Ok(slice.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_network() -> Network {
        // input=8, l1=4, l2=2, output=1 -- small enough to hand-compute.
        Network {
            input_size: 8,
            l1_size: 4,
            l2_size: 2,
            w1: vec![0; 8 * 4],
            b1: vec![0; 4],
            w2: vec![0; 4 * 2],
            b2: vec![0; 2],
            w3: vec![0; 2],
            b3: 0,
        }
    }

    #[test]
    fn test_zero_network_scores_zero() {
        let net = tiny_network();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        for v in [&net.w1, &net.b1, &net.w2, &net.b2, &net.w3] {
            for x in v {
                bytes.extend_from_slice(&x.to_le_bytes());
            }
        }
        bytes.extend_from_slice(&net.b3.to_le_bytes());
        let loaded = Network::load_bytes(&bytes).unwrap();
        assert_eq!(loaded.input_size, 8);
        assert_eq!(loaded.l1_size, 4);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let bytes = vec![0u8; 64];
        assert!(matches!(Network::load_bytes(&bytes), Err(NetworkError::BadMagic)));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        let result = Network::load_bytes(&bytes);
        assert!(matches!(result, Err(NetworkError::Truncated { .. })));
    }

    #[test]
    fn test_forward_on_start_position_does_not_panic() {
        let net = tiny_network();
        let pos = Position::start_position();
        let _ = net.forward(&pos);
    }
}
