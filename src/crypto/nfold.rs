/// RFC3961 section 5.1 n-fold. Replicates the input, rotating each copy 13
/// bits to the right, until the length is a multiple of both the input and
/// output lengths and then sums each output sized chunk with ones complement
/// addition.
pub(crate) fn n_fold(input: &[u8], out_len: usize) -> Vec<u8> {
    let in_len = input.len();
    let mut out = vec![0u8; out_len];
    if in_len == 0 || out_len == 0 {
        return out;
    }

    let lcm = in_len / gcd(in_len, out_len) * out_len;
    let in_bits = in_len << 3;
    let mut byte: u32 = 0;

    for i in (0..lcm).rev() {
        // The msbit in the (rotated) input that lands in this output byte.
        let msbit = ((in_bits - 1) + ((in_bits + 13) * (i / in_len)) + ((in_len - (i % in_len)) << 3))
            % in_bits;

        let hi = input[((in_len - 1) - (msbit >> 3)) % in_len] as u32;
        let lo = input[(in_len - (msbit >> 3)) % in_len] as u32;
        byte += (((hi << 8) | lo) >> ((msbit & 7) + 1)) & 0xff;

        byte += out[i % out_len] as u32;
        out[i % out_len] = (byte & 0xff) as u8;
        byte >>= 8;
    }

    // End around carry.
    if byte != 0 {
        for o in out.iter_mut().rev() {
            byte += *o as u32;
            *o = (byte & 0xff) as u8;
            byte >>= 8;
        }
    }

    out
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
