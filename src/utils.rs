use num_bigint::BigInt;

/// [Szudzik pairing function][szudzik-pairing].
///
/// ```text
/// (a, b) -> if (a<b) then (b^2 + a) else (a^2 + a + b)
/// ```
///
/// [szudzik-pairing]: https://en.wikipedia.org/wiki/Pairing_function
pub fn pairing_szudzik(a: u64, b: u64) -> u64 {
    if a < b {
        b.wrapping_mul(b).wrapping_add(a)
    } else {
        a.wrapping_mul(a).wrapping_add(a).wrapping_add(b)
    }
}

/// Pairing function for two `u64` values.
pub fn pairing2(a: u64, b: u64) -> u64 {
    pairing_szudzik(a, b)
}

/// Pairing function for three `u64` values.
pub fn pairing3(a: u64, b: u64, c: u64) -> u64 {
    pairing2(pairing2(a, b), c)
}

/// Hash function used by the unique table and the operation caches.
///
/// Implementations should be injective on the values that actually occur
/// (node ids are small), so that the direct-mapped caches can compare
/// hashed keys instead of the keys themselves.
pub trait MyHash {
    fn hash(&self) -> u64;
}

impl MyHash for u64 {
    fn hash(&self) -> u64 {
        *self
    }
}

impl MyHash for (u64, u64) {
    fn hash(&self) -> u64 {
        pairing2(self.0, self.1)
    }
}

impl MyHash for (u64, u64, u64) {
    fn hash(&self) -> u64 {
        pairing3(self.0, self.1, self.2)
    }
}

/// Mix the magnitude digits and sign of a big integer into a `u64`.
pub fn hash_bigint(value: &BigInt) -> u64 {
    let mut h: u64 = match value.sign() {
        num_bigint::Sign::Minus => 0x9e37_79b9,
        _ => 0x85eb_ca6b,
    };
    for digit in value.iter_u64_digits() {
        h = h
            .rotate_left(27)
            .wrapping_mul(0x0100_0000_01b3)
            .wrapping_add(digit);
    }
    h
}
