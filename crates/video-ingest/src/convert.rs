//! Channel-order conversion between OpenCV (BGR) and image-crate (RGB) buffers.

/// Swap the first and third channel of every packed 3-byte pixel.
///
/// The operation is its own inverse, so it serves both BGR→RGB and RGB→BGR.
pub fn swap_red_blue(input: &[u8]) -> Vec<u8> {
    let mut output = vec![0u8; input.len() - input.len() % 3];
    swap_red_blue_into(input, &mut output);
    output
}

/// In-place flavour of [`swap_red_blue`] writing into a pre-sized buffer.
///
/// Trailing bytes that do not form a full pixel are ignored.
pub fn swap_red_blue_into(input: &[u8], output: &mut [u8]) {
    for (src, dst) in input.chunks_exact(3).zip(output.chunks_exact_mut(3)) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
    }
}
