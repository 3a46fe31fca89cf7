//! Binary I/O operations for photon-stream events

use log::trace;
use std::io::{self, Read};

use crate::error::{PhsError, Result};
use crate::format::*;
use crate::utils::*;

// ============================================================================
// PHOTON ARRIVAL TIMES (NESTED u8 ARRAYS)
// ============================================================================

/// Size in bytes of the arrival block that follows its u32 prefix:
/// one byte per slice plus a u16 length per pixel.
pub fn arrival_block_len(arrivals: &[Vec<u8>]) -> Result<u32> {
    if arrivals.len() > MAX_U16_LEN {
        return Err(PhsError::range(
            "PhotonArrivals_500ps",
            arrivals.len() as u64,
            0,
            MAX_U16_LEN as i128,
        ));
    }
    let mut total: u64 = 0;
    for pixel in arrivals {
        if pixel.len() > MAX_U16_LEN {
            return Err(PhsError::range(
                "PhotonArrivals_500ps",
                pixel.len() as u64,
                0,
                MAX_U16_LEN as i128,
            ));
        }
        total += pixel.len() as u64 + 2;
    }
    u32::try_from(total)
        .map_err(|_| PhsError::range("PhotonArrivals_500ps", total, 0, u32::MAX as i128))
}

/// Append `u32 total_len` then `{u16 len; u8[len]}` per pixel
pub fn encode_arrival_times(arrivals: &[Vec<u8>], buf: &mut Vec<u8>) -> Result<()> {
    let total = arrival_block_len(arrivals)?;
    buf.reserve(4 + total as usize);
    write_u32_le(buf, total)?;
    for pixel in arrivals {
        write_u16_le(buf, pixel.len() as u16)?;
        buf.extend_from_slice(pixel);
    }
    Ok(())
}

/// Read an arrival block, checking that the pixels consume exactly the prefixed size
pub fn read_arrival_times<R: Read>(reader: &mut R) -> Result<Vec<Vec<u8>>> {
    let total = read_u32_le(reader)? as u64;
    let mut consumed: u64 = 0;
    let mut arrivals = Vec::new();
    while consumed < total {
        if total - consumed < 2 {
            return Err(PhsError::InvalidFormat(format!(
                "Arrival block of {} bytes ends inside a pixel length",
                total
            )));
        }
        let len = read_u16_le(reader)? as u64;
        consumed += 2;
        if consumed + len > total {
            return Err(PhsError::InvalidFormat(format!(
                "Pixel of {} slices overruns arrival block of {} bytes",
                len, total
            )));
        }
        let mut pixel = vec![0u8; len as usize];
        reader.read_exact(&mut pixel)?;
        consumed += len;
        arrivals.push(pixel);
    }
    Ok(arrivals)
}

/// Skip an arrival block using only its prefix
pub fn skip_arrival_times<R: Read>(reader: &mut R) -> Result<u32> {
    let total = read_u32_le(reader)?;
    let skipped = io::copy(&mut reader.take(total as u64), &mut io::sink())?;
    if skipped != total as u64 {
        return Err(PhsError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "Arrival block truncated",
        )));
    }
    Ok(total)
}

// ============================================================================
// SATURATED PIXELS (FLAT u16 ARRAY)
// ============================================================================

/// Append `u16 count` then `u16[count]`
pub fn encode_saturated_pixels(pixels: &[u16], buf: &mut Vec<u8>) -> Result<()> {
    if pixels.len() > MAX_U16_LEN {
        return Err(PhsError::range(
            "SaturatedPixels",
            pixels.len() as u64,
            0,
            MAX_U16_LEN as i128,
        ));
    }
    buf.reserve(2 + 2 * pixels.len());
    write_u16_le(buf, pixels.len() as u16)?;
    for &p in pixels {
        write_u16_le(buf, p)?;
    }
    Ok(())
}

pub fn read_saturated_pixels<R: Read>(reader: &mut R) -> Result<Vec<u16>> {
    let count = read_u16_le(reader)? as usize;
    let mut pixels = Vec::with_capacity(count);
    for _ in 0..count {
        pixels.push(read_u16_le(reader)?);
    }
    Ok(pixels)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Encode one event into a fresh buffer. Either the whole record encodes or
/// an error is returned and nothing is produced.
pub fn encode_event(event: &PhotonEvent) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(event.encoded_len());
    buf.extend_from_slice(&pack_i32(&event.integer_fields()));
    buf.extend_from_slice(&pack_f64(&[event.az_deg, event.zd_deg]));
    buf.extend_from_slice(&pack_f64(&[event.unix_time]));
    encode_arrival_times(&event.photon_arrivals, &mut buf)?;
    encode_saturated_pixels(&event.saturated_pixels, &mut buf)?;
    trace!(
        "Encoded event {} of run {}/{}: {} bytes",
        event.event,
        event.night,
        event.run,
        buf.len()
    );
    Ok(buf)
}

/// Read one event. `Ok(None)` means a clean end of stream at an event boundary.
pub fn read_event<R: Read>(reader: &mut R) -> Result<Option<PhotonEvent>> {
    let mut first = [0u8; 4];
    let mut filled = 0;
    while filled < first.len() {
        match reader.read(&mut first[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if filled == 0 {
        return Ok(None);
    }
    if filled < first.len() {
        return Err(PhsError::InvalidFormat("Truncated event".to_string()));
    }

    read_event_body(reader, i32::from_le_bytes(first))
        .map(Some)
        .map_err(|e| match e {
            PhsError::Io(io) if io.kind() == io::ErrorKind::UnexpectedEof => {
                PhsError::InvalidFormat("Truncated event".to_string())
            }
            other => other,
        })
}

fn read_event_body<R: Read>(reader: &mut R, night: i32) -> Result<PhotonEvent> {
    let run = read_i32_le(reader)?;
    let event = read_i32_le(reader)?;
    let trigger = read_i32_le(reader)?;
    let az_deg = read_f64_le(reader)?;
    let zd_deg = read_f64_le(reader)?;
    let unix_time = read_f64_le(reader)?;
    let photon_arrivals = read_arrival_times(reader)?;
    let saturated_pixels = read_saturated_pixels(reader)?;
    Ok(PhotonEvent {
        night,
        run,
        event,
        trigger,
        az_deg,
        zd_deg,
        unix_time,
        photon_arrivals,
        saturated_pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_event() -> PhotonEvent {
        PhotonEvent {
            night: 20200101,
            run: 55,
            event: 3,
            trigger: 1,
            az_deg: 10.5,
            zd_deg: 45.0,
            unix_time: 1000.5,
            photon_arrivals: vec![vec![1, 2], vec![]],
            saturated_pixels: vec![],
        }
    }

    #[test]
    fn test_arrival_prefix_counts_bytes_not_elements() {
        let arrivals = vec![vec![], vec![7, 8, 9], vec![1, 2]];
        assert_eq!(arrival_block_len(&arrivals).unwrap(), 5 + 3 * 2);

        let mut buf = Vec::new();
        encode_arrival_times(&arrivals, &mut buf).unwrap();
        assert_eq!(&buf[0..4], &11u32.to_le_bytes());
        assert_eq!(buf.len(), 4 + 11);
        assert_eq!(&buf[4..6], &[0, 0]);
        assert_eq!(&buf[6..11], &[3, 0, 7, 8, 9]);
    }

    #[test]
    fn test_empty_arrays() {
        let mut buf = Vec::new();
        encode_arrival_times(&[], &mut buf).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0]);

        let mut buf = Vec::new();
        encode_saturated_pixels(&[], &mut buf).unwrap();
        assert_eq!(buf, vec![0, 0]);
        assert!(read_saturated_pixels(&mut Cursor::new(buf)).unwrap().is_empty());
    }

    #[test]
    fn test_oversized_sublist_is_rejected() {
        let mut event = sample_event();
        event.photon_arrivals = vec![vec![0u8; 70000]];
        match encode_event(&event) {
            Err(PhsError::RangeOverflow { value, max, .. }) => {
                assert_eq!(value, 70000);
                assert_eq!(max, 65535);
            }
            other => panic!("expected RangeOverflow, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_too_many_pixels_is_rejected() {
        let pixels = vec![Vec::new(); 65536];
        assert!(matches!(
            arrival_block_len(&pixels),
            Err(PhsError::RangeOverflow { value: 65536, .. })
        ));
        assert_eq!(arrival_block_len(&pixels[..65535]).unwrap(), 2 * 65535);

        let mut buf = Vec::new();
        assert!(matches!(
            encode_saturated_pixels(&vec![1u16; 65536], &mut buf),
            Err(PhsError::RangeOverflow { field: "SaturatedPixels", value: 65536, .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_event_layout() {
        let bytes = encode_event(&sample_event()).unwrap();
        assert_eq!(bytes.len(), sample_event().encoded_len());
        assert_eq!(&bytes[0..4], &20200101i32.to_le_bytes());
        assert_eq!(&bytes[16..24], &10.5f64.to_le_bytes());
        assert_eq!(&bytes[32..40], &1000.5f64.to_le_bytes());
        assert_eq!(&bytes[40..44], &6u32.to_le_bytes());
        assert_eq!(&bytes[44..52], &[2, 0, 1, 2, 0, 0, 0, 0]);
    }

    #[test]
    fn test_event_roundtrip_bit_exact() {
        let mut event = sample_event();
        event.az_deg = -0.0;
        event.zd_deg = 0.1 + 0.2;
        event.saturated_pixels = vec![0, 1439, u16::MAX];
        let bytes = encode_event(&event).unwrap();

        let mut cursor = Cursor::new(bytes);
        let decoded = read_event(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded.az_deg.to_bits(), event.az_deg.to_bits());
        assert_eq!(decoded.zd_deg.to_bits(), event.zd_deg.to_bits());
        assert_eq!(decoded, event);
        assert!(read_event(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_truncated_event() {
        let bytes = encode_event(&sample_event()).unwrap();
        for cut in [2, 20, bytes.len() - 1] {
            let mut cursor = Cursor::new(&bytes[..cut]);
            assert!(matches!(
                read_event(&mut cursor),
                Err(PhsError::InvalidFormat(_))
            ));
        }
    }

    #[test]
    fn test_inconsistent_arrival_prefix() {
        // prefix says 3 bytes, pixel claims 5 slices
        let bytes = [3u8, 0, 0, 0, 5, 0, 1, 2, 3, 4, 5];
        assert!(matches!(
            read_arrival_times(&mut Cursor::new(&bytes[..])),
            Err(PhsError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_skip_arrival_times() {
        let mut buf = Vec::new();
        encode_arrival_times(&[vec![1, 2, 3], vec![4]], &mut buf).unwrap();
        buf.extend_from_slice(&[0xAB]);
        let mut cursor = Cursor::new(buf);
        assert_eq!(skip_arrival_times(&mut cursor).unwrap(), 8);
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![0xAB]);
    }
}
