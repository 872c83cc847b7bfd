use super::ConnectionError;

const WIDTH: usize = std::mem::size_of::<f64>();

/// points are stored as little endian f64 blobs
pub fn encode_point(point: &[f64]) -> Vec<u8> {
    point.iter().flat_map(|value| value.to_le_bytes()).collect()
}

pub fn decode_point(bytes: &[u8]) -> Result<Vec<f64>, ConnectionError> {
    if bytes.len() % WIDTH != 0 {
        return Err(ConnectionError::Codec(format!(
            "blob of {} bytes is not a multiple of {WIDTH}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(WIDTH)
        .map(|chunk| {
            let mut buffer = [0u8; WIDTH];
            buffer.copy_from_slice(chunk);
            f64::from_le_bytes(buffer)
        })
        .collect())
}
