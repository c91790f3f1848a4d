/// Convert normalized f32 samples to 16-bit signed little-endian PCM bytes.
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    const I16_MAX_F32: f32 = i16::MAX as f32;

    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_bytes_layout() {
        let bytes = pcm16_bytes(&[0.0, 1.0, -1.0]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 0);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), -i16::MAX);
    }

    #[test]
    fn test_pcm16_bytes_clamps_out_of_range() {
        let bytes = pcm16_bytes(&[2.5, -7.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -i16::MAX);
    }

    #[test]
    fn test_pcm16_bytes_empty() {
        assert!(pcm16_bytes(&[]).is_empty());
    }
}
