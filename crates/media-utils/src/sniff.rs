//! Cheap content sniffing on file headers.

/// Major brands of ISO-BMFF files that carry HEIF/HEIC images.
const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"hevm", b"hevs", b"mif1", b"msf1",
];

/// Whether the buffer is a GIF with more than one frame.
///
/// Counts graphic control extensions (`21 F9 04`) that are followed by an
/// image descriptor or another extension block.
pub fn is_animated_gif(buf: &[u8]) -> bool {
    if buf.len() < 6 || !(buf.starts_with(b"GIF87a") || buf.starts_with(b"GIF89a")) {
        return false;
    }

    let mut frames = 0usize;
    let mut i = 0usize;
    while i + 10 < buf.len() {
        if buf[i] == 0x00
            && buf[i + 1] == 0x21
            && buf[i + 2] == 0xF9
            && buf[i + 3] == 0x04
            && buf[i + 8] == 0x00
            && (buf[i + 9] == 0x2C || buf[i + 9] == 0x21)
        {
            frames += 1;
            if frames > 1 {
                return true;
            }
            i += 9;
        } else {
            i += 1;
        }
    }

    false
}

/// Whether the buffer is an ISO-BMFF container with a HEIF major brand.
pub fn is_heif(buf: &[u8]) -> bool {
    if buf.len() < 12 || &buf[4..8] != b"ftyp" {
        return false;
    }
    HEIF_BRANDS.iter().any(|brand| &buf[8..12] == brand.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gif_with_frames(frames: usize) -> Vec<u8> {
        let mut buf = b"GIF89a".to_vec();
        // logical screen descriptor, no global color table
        buf.extend_from_slice(&[1, 0, 1, 0, 0, 0, 0]);
        for _ in 0..frames {
            buf.extend_from_slice(&[0x00, 0x21, 0xF9, 0x04, 0x04, 0x0A, 0x00, 0x00, 0x00, 0x2C]);
            buf.extend_from_slice(&[0, 0, 0, 0, 1, 0, 1, 0, 0, 0x02, 0x02, 0x44, 0x01]);
        }
        buf.push(0x3B);
        buf
    }

    #[test]
    fn test_static_gif_is_not_animated() {
        assert!(!is_animated_gif(&gif_with_frames(1)));
    }

    #[test]
    fn test_multi_frame_gif_is_animated() {
        assert!(is_animated_gif(&gif_with_frames(3)));
    }

    #[test]
    fn test_non_gif_is_not_animated() {
        assert!(!is_animated_gif(b"\x89PNG\r\n\x1a\n"));
        assert!(!is_animated_gif(b""));
    }

    #[test]
    fn test_heif_detection() {
        let mut heic = vec![0, 0, 0, 24];
        heic.extend_from_slice(b"ftypheic");
        heic.extend_from_slice(&[0; 12]);
        assert!(is_heif(&heic));

        let mut mp4 = vec![0, 0, 0, 24];
        mp4.extend_from_slice(b"ftypisom");
        mp4.extend_from_slice(&[0; 12]);
        assert!(!is_heif(&mp4));
        assert!(!is_heif(b"short"));
    }
}
